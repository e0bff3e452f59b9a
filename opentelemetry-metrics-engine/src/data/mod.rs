//! Snapshots a reader gets back from a collection.

use std::{borrow::Cow, time::SystemTime};

use opentelemetry::{InstrumentationScope, KeyValue};

mod temporality;

pub use temporality::Temporality;

/// The streams of one meter that had data in a collection.
#[derive(Default, Debug)]
pub struct ScopeMetrics {
    /// The scope the meter was created with.
    pub scope: InstrumentationScope,
    /// Streams in instrument creation order.
    pub metrics: Vec<Metric>,
}

/// One output stream.
#[derive(Debug)]
pub struct Metric {
    /// The instrument name, or the name a view gave the stream.
    pub name: Cow<'static, str>,
    /// The instrument description unless a view replaced it.
    pub description: Cow<'static, str>,
    /// The instrument unit unless a view replaced it.
    pub unit: Cow<'static, str>,
    /// The points of every attribute set.
    pub data: AggregatedMetrics,
}

/// Stream data tagged with the value kind of its instrument.
#[derive(Debug)]
pub enum AggregatedMetrics {
    /// Data of an `f64` instrument.
    F64(MetricData<f64>),
    /// Data of a `u64` instrument.
    U64(MetricData<u64>),
    /// Data of an `i64` instrument.
    I64(MetricData<i64>),
}

/// Stream data in the shape of its aggregation.
#[derive(Debug)]
pub enum MetricData<T> {
    /// Last value aggregation.
    Gauge(Gauge<T>),
    /// Sum aggregation.
    Sum(Sum<T>),
    /// Explicit bucket histogram aggregation.
    Histogram(Histogram<T>),
    /// Base-2 exponential histogram aggregation.
    ExponentialHistogram(ExponentialHistogram<T>),
    /// Summary aggregation.
    Summary(Summary<T>),
}

impl From<MetricData<f64>> for AggregatedMetrics {
    fn from(value: MetricData<f64>) -> Self {
        AggregatedMetrics::F64(value)
    }
}

impl From<MetricData<i64>> for AggregatedMetrics {
    fn from(value: MetricData<i64>) -> Self {
        AggregatedMetrics::I64(value)
    }
}

impl From<MetricData<u64>> for AggregatedMetrics {
    fn from(value: MetricData<u64>) -> Self {
        AggregatedMetrics::U64(value)
    }
}

impl<T> From<Gauge<T>> for MetricData<T> {
    fn from(value: Gauge<T>) -> Self {
        MetricData::Gauge(value)
    }
}

impl<T> From<Sum<T>> for MetricData<T> {
    fn from(value: Sum<T>) -> Self {
        MetricData::Sum(value)
    }
}

impl<T> From<Histogram<T>> for MetricData<T> {
    fn from(value: Histogram<T>) -> Self {
        MetricData::Histogram(value)
    }
}

impl<T> From<ExponentialHistogram<T>> for MetricData<T> {
    fn from(value: ExponentialHistogram<T>) -> Self {
        MetricData::ExponentialHistogram(value)
    }
}

impl<T> From<Summary<T>> for MetricData<T> {
    fn from(value: Summary<T>) -> Self {
        MetricData::Summary(value)
    }
}

/// The last value of one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeDataPoint<T> {
    /// Attributes after the stream's filter.
    pub attributes: Vec<KeyValue>,
    /// The most recent measurement.
    pub value: T,
}

/// Last values of a gauge, or of a stream a view turned into one.
#[derive(Debug, Clone)]
pub struct Gauge<T> {
    /// One point per attribute set.
    pub data_points: Vec<GaugeDataPoint<T>>,
    /// Stream creation, or the previous collection for delta streams.
    pub start_time: SystemTime,
    /// The collection that produced this snapshot.
    pub time: SystemTime,
}

/// The sum of one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct SumDataPoint<T> {
    /// Attributes after the stream's filter.
    pub attributes: Vec<KeyValue>,
    /// Integer sums wrap on overflow.
    pub value: T,
}

/// Sums of a counter, an up-down counter or their observable forms.
#[derive(Debug, Clone)]
pub struct Sum<T> {
    /// One point per attribute set.
    pub data_points: Vec<SumDataPoint<T>>,
    /// Stream creation, or the previous collection for delta streams.
    pub start_time: SystemTime,
    /// The collection that produced this snapshot.
    pub time: SystemTime,
    /// Either [Temporality::Delta] or [Temporality::Cumulative], never
    /// [Temporality::LowMemory].
    pub temporality: Temporality,
    /// Set for counters, which reject negative increments.
    pub is_monotonic: bool,
}

/// Explicit bucket histograms of an instrument.
#[derive(Debug, Clone)]
pub struct Histogram<T> {
    /// One point per attribute set.
    pub data_points: Vec<HistogramDataPoint<T>>,
    /// Stream creation, or the previous collection for delta streams.
    pub start_time: SystemTime,
    /// The collection that produced this snapshot.
    pub time: SystemTime,
    /// Either [Temporality::Delta] or [Temporality::Cumulative].
    pub temporality: Temporality,
}

/// Explicit bucket histogram of one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDataPoint<T> {
    /// Attributes after the stream's filter.
    pub attributes: Vec<KeyValue>,
    /// Number of measurements.
    pub count: u64,
    /// Upper inclusive bounds of every bucket but the last, which is unbounded.
    pub bounds: Vec<f64>,
    /// One more entry than `bounds`.
    pub bucket_counts: Vec<u64>,
    /// `None` when min and max recording is off or nothing was measured.
    pub min: Option<T>,
    /// `None` when min and max recording is off or nothing was measured.
    pub max: Option<T>,
    /// Sum of the measurements.
    pub sum: T,
}

/// Base-2 exponential histograms of an instrument.
#[derive(Debug, Clone)]
pub struct ExponentialHistogram<T> {
    /// One point per attribute set.
    pub data_points: Vec<ExponentialHistogramDataPoint<T>>,
    /// Stream creation, or the previous collection for delta streams.
    pub start_time: SystemTime,
    /// The collection that produced this snapshot.
    pub time: SystemTime,
    /// Either [Temporality::Delta] or [Temporality::Cumulative].
    pub temporality: Temporality,
}

/// Base-2 exponential histogram of one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialHistogramDataPoint<T> {
    /// Attributes after the stream's filter.
    pub attributes: Vec<KeyValue>,
    /// Number of measurements, zeros included.
    pub count: usize,
    /// `None` when min and max recording is off or nothing was measured.
    pub min: Option<T>,
    /// `None` when min and max recording is off or nothing was measured.
    pub max: Option<T>,
    /// Sum of the measurements.
    pub sum: T,
    /// Bucket boundaries are powers of `2 ^ (2 ^ -scale)`.
    ///
    /// Starts at the configured maximum and goes down whenever the recorded
    /// range needs more buckets than allowed.
    pub scale: i8,
    /// Measurements equal to zero, which fall in no bucket.
    pub zero_count: u64,
    /// Buckets of positive measurements.
    pub positive_bucket: ExponentialBucket,
    /// Buckets of the absolute values of negative measurements.
    pub negative_bucket: ExponentialBucket,
}

/// Contiguous bucket counts of one sign.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBucket {
    /// Bucket index of `counts[0]`.
    pub offset: i32,
    /// `counts[i]` counts values in `(base^(offset+i), base^(offset+i+1)]`.
    pub counts: Vec<u64>,
}

/// Count, sum, min and max of the measurements of an instrument.
#[derive(Debug, Clone)]
pub struct Summary<T> {
    /// One point per attribute set.
    pub data_points: Vec<SummaryDataPoint<T>>,
    /// Stream creation, or the previous collection for delta streams.
    pub start_time: SystemTime,
    /// The collection that produced this snapshot.
    pub time: SystemTime,
    /// Either [Temporality::Delta] or [Temporality::Cumulative].
    pub temporality: Temporality,
}

/// Summary of one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryDataPoint<T> {
    /// Attributes after the stream's filter.
    pub attributes: Vec<KeyValue>,
    /// Number of measurements.
    pub count: u64,
    /// Sum of the measurements.
    pub sum: T,
    /// Smallest measurement.
    pub min: T,
    /// Largest measurement.
    pub max: T,
}
