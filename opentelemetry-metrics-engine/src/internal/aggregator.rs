use opentelemetry::KeyValue;

use crate::data::{self, MetricData, Temporality};

use super::exponential_histogram::{ExpoConfig, ExpoHistogramDataPoint};
use super::histogram::{Buckets, HistogramConfig};
use super::last_value::LastValueState;
use super::sum::SumState;
use super::summary::SummaryState;
use super::{AggregateTime, Number};

/// A resolved aggregation strategy for one stream.
///
/// `Drop` never reaches this point, dropped streams get no storage.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Aggregator {
    Sum { monotonic: bool },
    LastValue,
    ExplicitBucketHistogram(HistogramConfig),
    Base2ExponentialHistogram(ExpoConfig),
    Summary,
}

/// Mutable aggregated state for one attribute set of a stream.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Accumulation<T> {
    Sum(SumState<T>),
    LastValue(LastValueState<T>),
    Histogram(Buckets<T>),
    ExponentialHistogram(ExpoHistogramDataPoint<T>),
    Summary(SummaryState<T>),
}

impl Aggregator {
    pub(crate) fn create_empty<T: Number>(&self) -> Accumulation<T> {
        match self {
            Aggregator::Sum { .. } => Accumulation::Sum(SumState::default()),
            Aggregator::LastValue => Accumulation::LastValue(LastValueState::default()),
            Aggregator::ExplicitBucketHistogram(config) => {
                Accumulation::Histogram(Buckets::new(config.bounds.len() + 1))
            }
            Aggregator::Base2ExponentialHistogram(config) => {
                Accumulation::ExponentialHistogram(ExpoHistogramDataPoint::new(config))
            }
            Aggregator::Summary => Accumulation::Summary(SummaryState::default()),
        }
    }

    /// Why `value` cannot be aggregated, if it cannot.
    pub(crate) fn rejects<T: Number>(&self, value: T) -> Option<&'static str> {
        if value.is_nan() {
            return Some("NaN value");
        }
        match self {
            Aggregator::Sum { monotonic: true } if value.is_negative() => {
                Some("negative value on a monotonic instrument")
            }
            Aggregator::Base2ExponentialHistogram(_) if value.into_float().is_infinite() => {
                Some("infinite value")
            }
            _ => None,
        }
    }

    pub(crate) fn update<T: Number>(&self, acc: &mut Accumulation<T>, value: T) {
        match (self, acc) {
            (Aggregator::Sum { .. }, Accumulation::Sum(s)) => s.update(value),
            (Aggregator::LastValue, Accumulation::LastValue(s)) => s.update(value),
            (Aggregator::ExplicitBucketHistogram(config), Accumulation::Histogram(s)) => {
                s.update(value, config)
            }
            (Aggregator::Base2ExponentialHistogram(_), Accumulation::ExponentialHistogram(s)) => {
                s.record(value)
            }
            (Aggregator::Summary, Accumulation::Summary(s)) => s.update(value),
            _ => {}
        }
    }

    /// Replaces a sum with an observed cumulative value. Other strategies fold it.
    pub(crate) fn assign<T: Number>(&self, acc: &mut Accumulation<T>, value: T) {
        match acc {
            Accumulation::Sum(s) => s.assign(value),
            other => self.update(other, value),
        }
    }

    pub(crate) fn merge<T: Number>(&self, acc: &mut Accumulation<T>, other: &Accumulation<T>) {
        match (acc, other) {
            (Accumulation::Sum(a), Accumulation::Sum(b)) => a.merge(b),
            (Accumulation::LastValue(a), Accumulation::LastValue(b)) => a.merge(b),
            (Accumulation::Histogram(a), Accumulation::Histogram(b)) => a.merge(b),
            (Accumulation::ExponentialHistogram(a), Accumulation::ExponentialHistogram(b)) => {
                a.merge(b)
            }
            (Accumulation::Summary(a), Accumulation::Summary(b)) => a.merge(b),
            _ => {}
        }
    }

    /// The change from `older` to `newer`, two cumulative states of one series.
    pub(crate) fn diff<T: Number>(
        &self,
        newer: &Accumulation<T>,
        older: &Accumulation<T>,
    ) -> Accumulation<T> {
        match (self, newer, older) {
            (Aggregator::Sum { monotonic }, Accumulation::Sum(n), Accumulation::Sum(o)) => {
                Accumulation::Sum(n.diff(o, *monotonic))
            }
            (_, Accumulation::LastValue(n), Accumulation::LastValue(o)) => {
                Accumulation::LastValue(n.diff(o))
            }
            (_, Accumulation::Histogram(n), Accumulation::Histogram(o)) => {
                Accumulation::Histogram(n.diff(o))
            }
            (_, Accumulation::ExponentialHistogram(n), Accumulation::ExponentialHistogram(o)) => {
                Accumulation::ExponentialHistogram(n.diff(o))
            }
            (_, Accumulation::Summary(n), Accumulation::Summary(o)) => {
                Accumulation::Summary(n.diff(o))
            }
            _ => newer.clone(),
        }
    }

    /// Renders accumulations into output data. `None` if there are no points.
    pub(crate) fn build_data<T: Number>(
        &self,
        points: Vec<(Vec<KeyValue>, Accumulation<T>)>,
        time: AggregateTime,
        temporality: Temporality,
    ) -> Option<MetricData<T>> {
        if points.is_empty() {
            return None;
        }

        let data = match self {
            Aggregator::Sum { monotonic } => MetricData::Sum(data::Sum {
                data_points: points
                    .into_iter()
                    .filter_map(|(attributes, acc)| match acc {
                        Accumulation::Sum(s) => Some(data::SumDataPoint {
                            attributes,
                            value: s.total,
                        }),
                        _ => None,
                    })
                    .collect(),
                start_time: time.start,
                time: time.current,
                temporality,
                is_monotonic: *monotonic,
            }),
            Aggregator::LastValue => MetricData::Gauge(data::Gauge {
                data_points: points
                    .into_iter()
                    .filter_map(|(attributes, acc)| match acc {
                        Accumulation::LastValue(s) => Some(data::GaugeDataPoint {
                            attributes,
                            value: s.value,
                        }),
                        _ => None,
                    })
                    .collect(),
                start_time: time.start,
                time: time.current,
            }),
            Aggregator::ExplicitBucketHistogram(config) => MetricData::Histogram(data::Histogram {
                data_points: points
                    .into_iter()
                    .filter_map(|(attributes, acc)| match acc {
                        Accumulation::Histogram(b) => Some(data::HistogramDataPoint {
                            attributes,
                            count: b.count,
                            bounds: config.bounds.to_vec(),
                            bucket_counts: b.counts,
                            min: (config.record_min_max && b.count > 0).then_some(b.min),
                            max: (config.record_min_max && b.count > 0).then_some(b.max),
                            sum: b.total,
                        }),
                        _ => None,
                    })
                    .collect(),
                start_time: time.start,
                time: time.current,
                temporality,
            }),
            Aggregator::Base2ExponentialHistogram(config) => {
                MetricData::ExponentialHistogram(data::ExponentialHistogram {
                    data_points: points
                        .into_iter()
                        .filter_map(|(attributes, acc)| match acc {
                            Accumulation::ExponentialHistogram(dp) => {
                                Some(data::ExponentialHistogramDataPoint {
                                    attributes,
                                    count: dp.count,
                                    min: (config.record_min_max && dp.count > 0).then_some(dp.min),
                                    max: (config.record_min_max && dp.count > 0).then_some(dp.max),
                                    sum: dp.sum,
                                    scale: dp.scale,
                                    zero_count: dp.zero_count,
                                    positive_bucket: data::ExponentialBucket {
                                        offset: dp.pos_buckets.start_bin,
                                        counts: dp.pos_buckets.counts,
                                    },
                                    negative_bucket: data::ExponentialBucket {
                                        offset: dp.neg_buckets.start_bin,
                                        counts: dp.neg_buckets.counts,
                                    },
                                })
                            }
                            _ => None,
                        })
                        .collect(),
                    start_time: time.start,
                    time: time.current,
                    temporality,
                })
            }
            Aggregator::Summary => MetricData::Summary(data::Summary {
                data_points: points
                    .into_iter()
                    .filter_map(|(attributes, acc)| match acc {
                        Accumulation::Summary(s) => Some(data::SummaryDataPoint {
                            attributes,
                            count: s.count,
                            sum: s.sum,
                            min: s.min,
                            max: s.max,
                        }),
                        _ => None,
                    })
                    .collect(),
                start_time: time.start,
                time: time.current,
                temporality,
            }),
        };

        Some(data)
    }
}
