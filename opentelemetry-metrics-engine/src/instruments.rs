//! Handles applications record and observe measurements through.
use std::{
    any::Any,
    borrow::Cow,
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use opentelemetry::{otel_debug, KeyValue};

use crate::{
    diagnostics::Diagnostics,
    internal::{Number, ObservableStorage, Slot, SyncStorage},
};

/// A synchronous instrument: counter, up-down counter, histogram or gauge.
///
/// Cloning is cheap, clones record into the same streams.
pub struct SyncInstrument<T> {
    inner: Arc<SyncInner<T>>,
}

struct SyncInner<T> {
    name: Cow<'static, str>,
    storages: Vec<Arc<SyncStorage<T>>>,
    shutdown: Arc<AtomicBool>,
}

impl<T> Clone for SyncInstrument<T> {
    fn clone(&self) -> Self {
        SyncInstrument {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for SyncInstrument<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncInstrument")
            .field("name", &self.inner.name)
            .field("streams", &self.inner.storages.len())
            .finish()
    }
}

impl<T: Number> SyncInstrument<T> {
    pub(crate) fn new(
        name: Cow<'static, str>,
        storages: Vec<Arc<SyncStorage<T>>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        SyncInstrument {
            inner: Arc::new(SyncInner {
                name,
                storages,
                shutdown,
            }),
        }
    }

    /// Records a measurement into every stream of this instrument.
    pub fn record(&self, value: T, attributes: &[KeyValue]) {
        if self.inner.shutdown.load(Ordering::Relaxed) {
            return;
        }
        for storage in &self.inner.storages {
            storage.record(value, attributes);
        }
    }

    /// Binds `attributes` once so later records skip the attribute lookup.
    ///
    /// Binding the same attributes twice yields handles that compare equal.
    pub fn bind(&self, attributes: &[KeyValue]) -> BoundInstrument<T> {
        BoundInstrument {
            slots: self
                .inner
                .storages
                .iter()
                .map(|storage| (Arc::clone(storage), storage.bind(attributes)))
                .collect(),
            shutdown: Arc::clone(&self.inner.shutdown),
        }
    }
}

/// A [SyncInstrument] with its attributes fixed.
pub struct BoundInstrument<T> {
    slots: Vec<(Arc<SyncStorage<T>>, Arc<Slot<T>>)>,
    shutdown: Arc<AtomicBool>,
}

impl<T> Clone for BoundInstrument<T> {
    fn clone(&self) -> Self {
        BoundInstrument {
            slots: self
                .slots
                .iter()
                .map(|(storage, slot)| (Arc::clone(storage), Arc::clone(slot)))
                .collect(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<T> fmt::Debug for BoundInstrument<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundInstrument")
            .field("streams", &self.slots.len())
            .finish()
    }
}

impl<T> PartialEq for BoundInstrument<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slots.len() == other.slots.len()
            && self
                .slots
                .iter()
                .zip(&other.slots)
                .all(|((_, a), (_, b))| Arc::ptr_eq(a, b))
    }
}

impl<T> Eq for BoundInstrument<T> {}

impl<T: Number> BoundInstrument<T> {
    /// Records a measurement with the bound attributes.
    pub fn record(&self, value: T) {
        if self.shutdown.load(Ordering::Relaxed) {
            return;
        }
        for (storage, slot) in &self.slots {
            storage.record_bound(slot, value);
        }
    }
}

/// An instrument whose measurements are observed from a callback.
///
/// Observations are only accepted through the handle a callback receives
/// while it runs.
pub trait AsyncInstrument<T>: Send + Sync {
    /// Observes the state of the instrument.
    ///
    /// It is only valid to call this within a callback.
    fn observe(&self, measurement: T, attributes: &[KeyValue]);

    /// Used for supporting downcasting to the engine's own instruments.
    fn as_any(&self) -> Arc<dyn Any + Send + Sync>;
}

/// Observes measurements of several observable instruments from one callback.
pub trait Observer {
    /// Records the f64 value with attributes for the observable.
    fn observe_f64(&self, inst: &dyn AsyncInstrument<f64>, measurement: f64, attrs: &[KeyValue]);

    /// Records the u64 value with attributes for the observable.
    fn observe_u64(&self, inst: &dyn AsyncInstrument<u64>, measurement: u64, attrs: &[KeyValue]);

    /// Records the i64 value with attributes for the observable.
    fn observe_i64(&self, inst: &dyn AsyncInstrument<i64>, measurement: i64, attrs: &[KeyValue]);
}

static OBSERVABLE_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) struct ObservableInner<T> {
    pub(crate) id: u64,
    pub(crate) meter_id: u64,
    name: Cow<'static, str>,
    /// Storages grouped by pipeline index.
    storages: Vec<Vec<Arc<ObservableStorage<T>>>>,
    diagnostics: Arc<Diagnostics>,
}

impl<T: Number> ObservableInner<T> {
    fn commit(&self, pipeline: usize, value: T, attributes: &[KeyValue]) {
        if let Some(storages) = self.storages.get(pipeline) {
            for storage in storages {
                storage.observe(value, attributes);
            }
        }
    }
}

/// An observable counter, up-down counter or gauge.
pub struct ObservableInstrument<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Clone for ObservableInstrument<T> {
    fn clone(&self) -> Self {
        ObservableInstrument {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ObservableInstrument<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableInstrument")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .finish()
    }
}

impl<T: Number> ObservableInstrument<T> {
    pub(crate) fn new(
        meter_id: u64,
        name: Cow<'static, str>,
        storages: Vec<Vec<Arc<ObservableStorage<T>>>>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        ObservableInstrument {
            inner: Arc::new(ObservableInner {
                id: OBSERVABLE_ID.fetch_add(1, Ordering::Relaxed),
                meter_id,
                name,
                storages,
                diagnostics,
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn meter_id(&self) -> u64 {
        self.inner.meter_id
    }

    /// A handle that buffers one callback invocation's observations.
    pub(crate) fn window(&self) -> ObservationWindow<T> {
        ObservationWindow {
            instrument: Arc::clone(&self.inner),
            buffer: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Number> AsyncInstrument<T> for ObservableInstrument<T> {
    /// Observations outside a callback are dropped.
    fn observe(&self, _measurement: T, _attributes: &[KeyValue]) {
        self.inner.diagnostics.dropped_measurement();
        otel_debug!(
            name: "Observable.MeasurementOutsideCallback",
            message = "observations are only accepted from a registered callback",
            instrument_name = self.inner.name.to_string(),
        );
    }

    fn as_any(&self) -> Arc<dyn Any + Send + Sync> {
        self.inner.clone()
    }
}

/// The observable handle passed to a single-instrument callback.
///
/// Observations are applied to the collecting pipeline only once the callback
/// returned normally.
pub(crate) struct ObservationWindow<T> {
    instrument: Arc<ObservableInner<T>>,
    buffer: Mutex<Vec<(T, Vec<KeyValue>)>>,
}

impl<T: Number> ObservationWindow<T> {
    pub(crate) fn commit(self, pipeline: usize) {
        let buffer = self.buffer.into_inner().unwrap_or_else(|err| err.into_inner());
        for (value, attributes) in buffer {
            self.instrument.commit(pipeline, value, &attributes);
        }
    }
}

impl<T: Number> AsyncInstrument<T> for ObservationWindow<T> {
    fn observe(&self, measurement: T, attributes: &[KeyValue]) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push((measurement, attributes.to_vec()));
        }
    }

    fn as_any(&self) -> Arc<dyn Any + Send + Sync> {
        self.instrument.clone()
    }
}

type PendingObservation = Box<dyn FnOnce(usize) + Send>;

/// The [Observer] passed to a batch callback.
pub(crate) struct BatchObserver {
    meter_id: u64,
    registered: Arc<HashSet<u64>>,
    pending: Mutex<Vec<PendingObservation>>,
    diagnostics: Arc<Diagnostics>,
}

impl BatchObserver {
    pub(crate) fn new(
        meter_id: u64,
        registered: Arc<HashSet<u64>>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        BatchObserver {
            meter_id,
            registered,
            pending: Mutex::new(Vec::new()),
            diagnostics,
        }
    }

    pub(crate) fn commit(self, pipeline: usize) {
        let pending = self.pending.into_inner().unwrap_or_else(|err| err.into_inner());
        for observation in pending {
            observation(pipeline);
        }
    }

    fn observe<T: Number>(&self, inst: &dyn AsyncInstrument<T>, value: T, attrs: &[KeyValue]) {
        let inner = match inst.as_any().downcast::<ObservableInner<T>>() {
            Ok(inner) => inner,
            Err(_) => {
                self.drop_observation("instrument was not created by this engine");
                return;
            }
        };
        if inner.meter_id != self.meter_id {
            self.drop_observation("instrument belongs to another meter");
            return;
        }
        if !self.registered.contains(&inner.id) {
            self.drop_observation("instrument is not registered with this callback");
            return;
        }

        let attrs = attrs.to_vec();
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(Box::new(move |pipeline| {
                inner.commit(pipeline, value, &attrs)
            }));
        }
    }

    fn drop_observation(&self, reason: &'static str) {
        self.diagnostics.dropped_measurement();
        otel_debug!(name: "Observer.MeasurementDropped", reason = reason);
    }
}

impl Observer for BatchObserver {
    fn observe_f64(&self, inst: &dyn AsyncInstrument<f64>, measurement: f64, attrs: &[KeyValue]) {
        self.observe(inst, measurement, attrs)
    }

    fn observe_u64(&self, inst: &dyn AsyncInstrument<u64>, measurement: u64, attrs: &[KeyValue]) {
        self.observe(inst, measurement, attrs)
    }

    fn observe_i64(&self, inst: &dyn AsyncInstrument<i64>, measurement: i64, attrs: &[KeyValue]) {
        self.observe(inst, measurement, attrs)
    }
}

/// The (meter id, instrument id) of an observable handle created by this
/// engine, `None` for anything else.
pub(crate) fn observable_ids(handle: &Arc<dyn Any + Send + Sync>) -> Option<(u64, u64)> {
    if let Some(inner) = handle.downcast_ref::<ObservableInner<u64>>() {
        return Some((inner.meter_id, inner.id));
    }
    if let Some(inner) = handle.downcast_ref::<ObservableInner<i64>>() {
        return Some((inner.meter_id, inner.id));
    }
    handle
        .downcast_ref::<ObservableInner<f64>>()
        .map(|inner| (inner.meter_id, inner.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MetricData, Temporality};
    use crate::internal::Aggregator;

    fn observable(meter_id: u64) -> (ObservableInstrument<u64>, Arc<ObservableStorage<u64>>, Arc<Diagnostics>) {
        let diagnostics = Arc::new(Diagnostics::default());
        let storage = Arc::new(ObservableStorage::new(
            Aggregator::Sum { monotonic: true },
            Temporality::Cumulative,
            true,
            None,
            2000,
            Arc::clone(&diagnostics),
        ));
        let inst = ObservableInstrument::new(
            meter_id,
            "jobs".into(),
            vec![vec![Arc::clone(&storage)]],
            Arc::clone(&diagnostics),
        );
        (inst, storage, diagnostics)
    }

    fn total(storage: &ObservableStorage<u64>) -> Option<u64> {
        match storage.collect() {
            Some(MetricData::Sum(sum)) => Some(sum.data_points[0].value),
            _ => None,
        }
    }

    struct Foreign;

    impl AsyncInstrument<u64> for Foreign {
        fn observe(&self, _measurement: u64, _attributes: &[KeyValue]) {}

        fn as_any(&self) -> Arc<dyn Any + Send + Sync> {
            Arc::new(())
        }
    }

    #[test]
    fn direct_observe_is_dropped() {
        let (inst, storage, diagnostics) = observable(1);
        inst.observe(5, &[]);
        assert_eq!(total(&storage), None);
        assert_eq!(diagnostics.snapshot().dropped_measurements, 1);
    }

    #[test]
    fn window_commits_to_its_pipeline_only_when_committed() {
        let (inst, storage, _) = observable(1);
        let window = inst.window();
        window.observe(5, &[]);
        drop(window);
        assert_eq!(total(&storage), None);

        let window = inst.window();
        window.observe(7, &[]);
        window.commit(0);
        assert_eq!(total(&storage), Some(7));
    }

    #[test]
    fn batch_observer_drops_foreign_and_unregistered_handles() {
        let (inst, storage, diagnostics) = observable(1);
        let (other_meter, _, _) = observable(2);
        let registered: HashSet<u64> = [inst.id(), other_meter.id()].into_iter().collect();
        let observer = BatchObserver::new(1, Arc::new(registered), Arc::clone(&diagnostics));

        observer.observe_u64(&Foreign, 1, &[]);
        observer.observe_u64(&other_meter, 1, &[]);
        observer.observe_u64(&inst, 3, &[]);
        observer.commit(0);

        assert_eq!(total(&storage), Some(3));
        assert_eq!(diagnostics.snapshot().dropped_measurements, 2);
    }

    #[test]
    fn handle_ids_identify_engine_instruments() {
        let (inst, _, _) = observable(9);
        assert_eq!(observable_ids(&inst.as_any()), Some((9, inst.id())));
        assert_eq!(observable_ids(&Foreign.as_any()), None);
    }
}
