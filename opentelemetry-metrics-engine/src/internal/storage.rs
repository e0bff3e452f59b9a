use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use once_cell::sync::Lazy;
use opentelemetry::{otel_debug, otel_warn, Key, KeyValue};

use crate::attributes::AttributeSet;
use crate::data::{AggregatedMetrics, MetricData, Temporality};
use crate::diagnostics::Diagnostics;

use super::{Accumulation, AggregateTimeInitiator, Aggregator, ComputeAggregation, Number};

/// Series that measurements with new attribute sets go to once a stream hit
/// its cardinality limit.
pub(crate) static STREAM_OVERFLOW_ATTRIBUTES: Lazy<AttributeSet> =
    Lazy::new(|| AttributeSet::from(vec![KeyValue::new("otel.metric.overflow", true)]));

/// The accumulation of one attribute set.
///
/// The whole accumulation is updated under one lock so a collection never
/// sees a bucket count without its sum and count.
pub(crate) struct Slot<T> {
    state: Mutex<SlotState<T>>,
}

struct SlotState<T> {
    acc: Accumulation<T>,
    /// Has a value since the last delta collection, or ever for cumulative.
    updated: bool,
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Slot")
    }
}

impl<T: Number> Slot<T> {
    fn new(acc: Accumulation<T>) -> Self {
        Slot {
            state: Mutex::new(SlotState {
                acc,
                updated: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Storage of one stream of a synchronous instrument for one reader.
pub(crate) struct SyncStorage<T> {
    aggregator: Aggregator,
    temporality: Temporality,
    filter: Option<Arc<HashSet<Key>>>,
    cardinality_limit: usize,
    no_attribs: Arc<Slot<T>>,
    trackers: RwLock<HashMap<AttributeSet, Arc<Slot<T>>>>,
    start: AggregateTimeInitiator,
    diagnostics: Arc<Diagnostics>,
}

impl<T> fmt::Debug for SyncStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncStorage")
            .field("aggregator", &self.aggregator)
            .field("temporality", &self.temporality)
            .field("cardinality_limit", &self.cardinality_limit)
            .finish()
    }
}

impl<T: Number> SyncStorage<T> {
    pub(crate) fn new(
        aggregator: Aggregator,
        temporality: Temporality,
        filter: Option<Arc<HashSet<Key>>>,
        cardinality_limit: usize,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        SyncStorage {
            no_attribs: Arc::new(Slot::new(aggregator.create_empty())),
            aggregator,
            temporality,
            filter,
            cardinality_limit,
            trackers: RwLock::new(HashMap::new()),
            start: AggregateTimeInitiator::default(),
            diagnostics,
        }
    }

    pub(crate) fn record(&self, value: T, attrs: &[KeyValue]) {
        if !self.accepts(value) {
            return;
        }
        let slot = self.slot_for(attrs);
        self.update(&slot, value);
    }

    /// The slot measurements with `attrs` aggregate into.
    pub(crate) fn bind(&self, attrs: &[KeyValue]) -> Arc<Slot<T>> {
        self.slot_for(attrs)
    }

    pub(crate) fn record_bound(&self, slot: &Slot<T>, value: T) {
        if self.accepts(value) {
            self.update(slot, value);
        }
    }

    fn accepts(&self, value: T) -> bool {
        match self.aggregator.rejects(value) {
            None => true,
            Some(reason) => {
                self.diagnostics.invalid_measurement();
                if value.is_nan() {
                    otel_debug!(name: "Metrics.MeasurementDiscarded", reason = reason);
                } else {
                    otel_warn!(
                        name: "Metrics.MeasurementDiscarded",
                        message = "measurement rejected by its aggregation",
                        reason = reason,
                    );
                }
                false
            }
        }
    }

    fn update(&self, slot: &Slot<T>, value: T) {
        let mut state = slot.lock();
        self.aggregator.update(&mut state.acc, value);
        state.updated = true;
    }

    fn slot_for(&self, attrs: &[KeyValue]) -> Arc<Slot<T>> {
        let attrs = match &self.filter {
            Some(allowed) => AttributeSet::filtered(attrs, |kv| allowed.contains(&kv.key)),
            None => AttributeSet::from(attrs),
        };
        if attrs.is_empty() {
            return Arc::clone(&self.no_attribs);
        }

        if let Ok(trackers) = self.trackers.read() {
            if let Some(slot) = trackers.get(&attrs) {
                return Arc::clone(slot);
            }
        }

        let mut trackers = self.trackers.write().unwrap_or_else(|err| err.into_inner());
        // Recheck, another thread may have inserted it while the lock was released.
        if let Some(slot) = trackers.get(&attrs) {
            return Arc::clone(slot);
        }

        if trackers.len() + 1 >= self.cardinality_limit {
            if let Some(slot) = trackers.get(&*STREAM_OVERFLOW_ATTRIBUTES) {
                return Arc::clone(slot);
            }
            otel_warn!(
                name: "Metrics.CardinalityLimitReached",
                message = "new attribute sets are aggregated into the overflow series",
                limit = self.cardinality_limit as u64,
            );
            let slot = Arc::new(Slot::new(self.aggregator.create_empty()));
            trackers.insert(STREAM_OVERFLOW_ATTRIBUTES.clone(), Arc::clone(&slot));
            return slot;
        }

        let slot = Arc::new(Slot::new(self.aggregator.create_empty()));
        trackers.insert(attrs, Arc::clone(&slot));
        slot
    }

    pub(crate) fn collect(&self) -> Option<MetricData<T>> {
        match self.temporality {
            Temporality::Delta => self.collect_delta(),
            _ => self.collect_cumulative(),
        }
    }

    /// Reports slots updated since the previous collection and resets them.
    ///
    /// Slots are reset in place so bound handles keep aggregating into the
    /// series; idle slots no handle refers to are released.
    fn collect_delta(&self) -> Option<MetricData<T>> {
        let time = self.start.delta();
        let mut points = Vec::new();

        {
            let mut state = self.no_attribs.lock();
            if state.updated {
                let acc = std::mem::replace(&mut state.acc, self.aggregator.create_empty());
                state.updated = false;
                points.push((vec![], acc));
            }
        }

        let mut trackers = self.trackers.write().unwrap_or_else(|err| err.into_inner());
        trackers.retain(|attrs, slot| {
            let mut state = slot.lock();
            if state.updated {
                let acc = std::mem::replace(&mut state.acc, self.aggregator.create_empty());
                state.updated = false;
                points.push((attrs.as_slice().to_vec(), acc));
                true
            } else {
                Arc::strong_count(slot) > 1
            }
        });
        drop(trackers);

        self.aggregator
            .build_data(points, time, Temporality::Delta)
    }

    fn collect_cumulative(&self) -> Option<MetricData<T>> {
        let time = self.start.cumulative();
        let mut points = Vec::new();

        {
            let state = self.no_attribs.lock();
            if state.updated {
                points.push((vec![], state.acc.clone()));
            }
        }

        let trackers = self.trackers.read().unwrap_or_else(|err| err.into_inner());
        for (attrs, slot) in trackers.iter() {
            let state = slot.lock();
            if state.updated {
                points.push((attrs.as_slice().to_vec(), state.acc.clone()));
            }
        }
        drop(trackers);

        self.aggregator
            .build_data(points, time, Temporality::Cumulative)
    }
}

impl<T> ComputeAggregation for SyncStorage<T>
where
    T: Number,
    MetricData<T>: Into<AggregatedMetrics>,
{
    fn call(&self) -> Option<AggregatedMetrics> {
        self.collect().map(Into::into)
    }
}
