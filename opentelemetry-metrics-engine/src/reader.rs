//! Interfaces for reading and producing metrics
use std::{fmt, sync::Weak};

use crate::{
    aggregation::Aggregation,
    data::{ScopeMetrics, Temporality},
    error::MetricResult,
    instrument::InstrumentKind,
    pipeline::Pipeline,
};

/// The interface used between the engine and a collector.
///
/// Control flow is bi-directional through the `MetricReader`, since the
/// engine initiates `force_flush` and `shutdown` while the reader initiates
/// collection. The `register_pipeline` method here informs the metric reader
/// that it can begin reading, signaling the start of bi-directional control
/// flow.
///
/// Each reader gets its own pipeline: its own storages, its own temporality
/// and its own run of every observable callback per collection.
pub trait MetricReader: fmt::Debug + Send + Sync + 'static {
    /// Registers a [MetricReader] with a [Pipeline].
    ///
    /// The pipeline argument allows the `MetricReader` to signal the engine to
    /// collect aggregated metric measurements.
    fn register_pipeline(&self, pipeline: Weak<Pipeline>);

    /// Gathers all metric data related to the [MetricReader] and stores it in
    /// `out`, one entry per meter scope with data.
    fn collect(&self, out: &mut Vec<ScopeMetrics>) -> MetricResult<()>;

    /// Flushes all metric measurements held in an export pipeline.
    fn force_flush(&self) -> MetricResult<()>;

    /// Flushes all metric measurements held in an export pipeline and releases any
    /// held computational resources.
    fn shutdown(&self) -> MetricResult<()>;

    /// The output temporality, a function of instrument kind.
    ///
    /// If not configured, the Cumulative temporality SHOULD be used.
    fn temporality(&self, kind: InstrumentKind) -> Temporality;

    /// The aggregation this reader forces for instruments of `kind`.
    ///
    /// Anything other than [Aggregation::Default] takes precedence over views,
    /// advice and the kind default.
    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        let _ = kind;
        Aggregation::Default
    }
}

/// Produces metrics for a [MetricReader].
pub(crate) trait SdkProducer: fmt::Debug + Send + Sync {
    /// Fills `out` with aggregated metrics from a single collection.
    fn produce(&self, out: &mut Vec<ScopeMetrics>) -> MetricResult<()>;
}

/// Chooses the aggregation a reader forces for each instrument kind.
pub trait AggregationSelector: Send + Sync {
    /// Selects the aggregation and the parameters to use for that aggregation
    /// based on the [InstrumentKind].
    fn aggregation(&self, kind: InstrumentKind) -> Aggregation;
}

impl<T> AggregationSelector for T
where
    T: Fn(InstrumentKind) -> Aggregation + Send + Sync,
{
    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        self(kind)
    }
}

/// Leaves every choice to views, advice and the kind default.
#[derive(Clone, Default, Debug)]
pub struct DefaultAggregationSelector {
    pub(crate) _private: (),
}

impl DefaultAggregationSelector {
    /// Create a new default aggregation selector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregationSelector for DefaultAggregationSelector {
    fn aggregation(&self, _kind: InstrumentKind) -> Aggregation {
        Aggregation::Default
    }
}
