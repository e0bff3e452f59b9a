use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use opentelemetry::{otel_debug, otel_warn, Key, KeyValue};

use crate::attributes::AttributeSet;
use crate::data::{AggregatedMetrics, MetricData, Temporality};
use crate::diagnostics::Diagnostics;

use super::storage::STREAM_OVERFLOW_ATTRIBUTES;
use super::{Accumulation, AggregateTimeInitiator, Aggregator, ComputeAggregation, Number};

/// Storage of one stream of an observable instrument for one reader.
///
/// Observations are keyed by their unfiltered attribute set, so observing the
/// same series twice in a cycle replaces a precomputed sum while distinct
/// series that collapse under the attribute filter are added together.
pub(crate) struct ObservableStorage<T> {
    aggregator: Aggregator,
    temporality: Temporality,
    /// Observations are cumulative totals rather than increments.
    precomputed: bool,
    filter: Option<Arc<HashSet<Key>>>,
    cardinality_limit: usize,
    state: Mutex<ObservedState<T>>,
    start: AggregateTimeInitiator,
    diagnostics: Arc<Diagnostics>,
}

struct ObservedState<T> {
    current: HashMap<AttributeSet, Accumulation<T>>,
    /// Precomputed sums: the previous cycle's totals.
    /// Folded cumulative streams: everything observed so far.
    reported: HashMap<AttributeSet, Accumulation<T>>,
}

impl<T> fmt::Debug for ObservableStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableStorage")
            .field("aggregator", &self.aggregator)
            .field("temporality", &self.temporality)
            .field("precomputed", &self.precomputed)
            .finish()
    }
}

impl<T: Number> ObservableStorage<T> {
    pub(crate) fn new(
        aggregator: Aggregator,
        temporality: Temporality,
        precomputed: bool,
        filter: Option<Arc<HashSet<Key>>>,
        cardinality_limit: usize,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        ObservableStorage {
            aggregator,
            temporality,
            precomputed,
            filter,
            cardinality_limit,
            state: Mutex::new(ObservedState {
                current: HashMap::new(),
                reported: HashMap::new(),
            }),
            start: AggregateTimeInitiator::default(),
            diagnostics,
        }
    }

    pub(crate) fn observe(&self, value: T, attrs: &[KeyValue]) {
        if let Some(reason) = self.aggregator.rejects(value) {
            self.diagnostics.invalid_measurement();
            otel_debug!(name: "Observable.MeasurementDiscarded", reason = reason);
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        let acc = state
            .current
            .entry(AttributeSet::from(attrs))
            .or_insert_with(|| self.aggregator.create_empty());
        if self.precomputed {
            self.aggregator.assign(acc, value);
        } else {
            self.aggregator.update(acc, value);
        }
    }

    /// Folds raw observations into series keyed by the filtered attribute set.
    fn fold(
        &self,
        current: HashMap<AttributeSet, Accumulation<T>>,
    ) -> HashMap<AttributeSet, Accumulation<T>> {
        let mut series: HashMap<AttributeSet, Accumulation<T>> = HashMap::new();
        let mut overflowed = false;
        for (attrs, acc) in current {
            let mut attrs = attrs;
            if let Some(allowed) = &self.filter {
                attrs.retain(|kv| allowed.contains(&kv.key));
            }
            if !series.contains_key(&attrs) && series.len() + 1 >= self.cardinality_limit {
                attrs = STREAM_OVERFLOW_ATTRIBUTES.clone();
                overflowed = true;
            }
            match series.get_mut(&attrs) {
                Some(existing) => self.aggregator.merge(existing, &acc),
                None => {
                    series.insert(attrs, acc);
                }
            }
        }
        if overflowed {
            otel_warn!(
                name: "Metrics.CardinalityLimitReached",
                message = "new attribute sets are aggregated into the overflow series",
                limit = self.cardinality_limit as u64,
            );
        }
        series
    }

    pub(crate) fn collect(&self) -> Option<MetricData<T>> {
        let time = match self.temporality {
            Temporality::Delta => self.start.delta(),
            _ => self.start.cumulative(),
        };
        let temporality = match self.temporality {
            Temporality::Delta => Temporality::Delta,
            _ => Temporality::Cumulative,
        };

        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        let current = std::mem::take(&mut state.current);
        let observed = self.fold(current);

        let points: Vec<(Vec<KeyValue>, Accumulation<T>)> = match (&self.aggregator, temporality) {
            (Aggregator::Sum { .. }, Temporality::Delta) if self.precomputed => {
                let points = observed
                    .iter()
                    .map(|(attrs, acc)| {
                        let delta = match state.reported.get(attrs) {
                            Some(previous) => self.aggregator.diff(acc, previous),
                            None => acc.clone(),
                        };
                        (attrs.as_slice().to_vec(), delta)
                    })
                    .collect();
                state.reported = observed;
                points
            }
            (Aggregator::LastValue, _) | (_, Temporality::Delta) => observed
                .into_iter()
                .map(|(attrs, acc)| (attrs.into_vec(), acc))
                .collect(),
            _ if self.precomputed => observed
                .into_iter()
                .map(|(attrs, acc)| (attrs.into_vec(), acc))
                .collect(),
            _ => {
                let mut points = Vec::with_capacity(observed.len());
                for (attrs, acc) in observed {
                    let total = match state.reported.get_mut(&attrs) {
                        Some(total) => {
                            self.aggregator.merge(total, &acc);
                            total.clone()
                        }
                        None => {
                            state.reported.insert(attrs.clone(), acc.clone());
                            acc
                        }
                    };
                    points.push((attrs.into_vec(), total));
                }
                points
            }
        };
        drop(state);

        self.aggregator.build_data(points, time, temporality)
    }
}

impl<T> ComputeAggregation for ObservableStorage<T>
where
    T: Number,
    MetricData<T>: Into<AggregatedMetrics>,
{
    fn call(&self) -> Option<AggregatedMetrics> {
        self.collect().map(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SumDataPoint;
    use crate::internal::HistogramConfig;

    fn storage<T: Number>(
        aggregator: Aggregator,
        temporality: Temporality,
        precomputed: bool,
    ) -> ObservableStorage<T> {
        ObservableStorage::new(
            aggregator,
            temporality,
            precomputed,
            None,
            2000,
            Arc::new(Diagnostics::default()),
        )
    }

    fn sum_values<T: Number>(data: Option<MetricData<T>>) -> Vec<T> {
        match data {
            Some(MetricData::Sum(sum)) => sum.data_points.into_iter().map(|p: SumDataPoint<T>| p.value).collect(),
            None => vec![],
            other => panic!("expected a sum, got {other:?}"),
        }
    }

    #[test]
    fn precomputed_delta_reports_change_since_previous_observation() {
        let s = storage::<u64>(Aggregator::Sum { monotonic: true }, Temporality::Delta, true);
        s.observe(10, &[]);
        assert_eq!(sum_values(s.collect()), vec![10]);
        s.observe(25, &[]);
        assert_eq!(sum_values(s.collect()), vec![15]);
        s.observe(25, &[]);
        assert_eq!(sum_values(s.collect()), vec![0]);
    }

    #[test]
    fn precomputed_cumulative_reports_latest_observation() {
        let s = storage::<i64>(Aggregator::Sum { monotonic: false }, Temporality::Cumulative, true);
        s.observe(10, &[]);
        s.observe(4, &[]);
        assert_eq!(sum_values(s.collect()), vec![4]);
        s.observe(-3, &[]);
        assert_eq!(sum_values(s.collect()), vec![-3]);
    }

    #[test]
    fn unobserved_series_are_not_reported() {
        let s = storage::<u64>(Aggregator::Sum { monotonic: true }, Temporality::Cumulative, true);
        s.observe(1, &[KeyValue::new("k", "a")]);
        s.observe(2, &[KeyValue::new("k", "b")]);
        assert_eq!(sum_values(s.collect()).len(), 2);
        s.observe(3, &[KeyValue::new("k", "a")]);
        assert_eq!(sum_values(s.collect()), vec![3]);
        assert!(s.collect().is_none());
    }

    #[test]
    fn filtered_series_are_added_together() {
        let allowed: HashSet<Key> = [Key::new("host")].into_iter().collect();
        let s = ObservableStorage::new(
            Aggregator::Sum { monotonic: true },
            Temporality::Cumulative,
            true,
            Some(Arc::new(allowed)),
            2000,
            Arc::new(Diagnostics::default()),
        );
        s.observe(5u64, &[KeyValue::new("host", "a"), KeyValue::new("cpu", 0i64)]);
        s.observe(7u64, &[KeyValue::new("host", "a"), KeyValue::new("cpu", 1i64)]);
        s.observe(9u64, &[KeyValue::new("host", "a"), KeyValue::new("cpu", 1i64)]);
        assert_eq!(sum_values(s.collect()), vec![14]);
    }

    #[test]
    fn folded_cumulative_histogram_accumulates_across_cycles() {
        let s = storage::<f64>(
            Aggregator::ExplicitBucketHistogram(HistogramConfig::new(vec![10.0], true, true)),
            Temporality::Cumulative,
            false,
        );
        s.observe(1.0, &[]);
        s.collect();
        s.observe(20.0, &[]);
        match s.collect() {
            Some(MetricData::Histogram(h)) => {
                assert_eq!(h.data_points[0].count, 2);
                assert_eq!(h.data_points[0].bucket_counts, vec![1, 1]);
            }
            other => panic!("expected a histogram, got {other:?}"),
        }
    }

    #[test]
    fn gauge_reports_only_the_current_cycle() {
        let s = storage::<f64>(Aggregator::LastValue, Temporality::Cumulative, false);
        s.observe(1.5, &[KeyValue::new("k", "v")]);
        match s.collect() {
            Some(MetricData::Gauge(g)) => assert_eq!(g.data_points[0].value, 1.5),
            other => panic!("expected a gauge, got {other:?}"),
        }
        assert!(s.collect().is_none());
    }
}
