use core::fmt;
use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use opentelemetry::{otel_debug, otel_warn, InstrumentationScope};

use crate::{
    aggregation::Aggregation,
    data::{Metric, ScopeMetrics},
    diagnostics::Diagnostics,
    error::{MetricError, MetricResult},
    instrument::{DescriptorKey, InstrumentDescriptor, InstrumentId, InstrumentKind, Stream},
    internal::{
        self, Aggregator, ExpoConfig, HistogramConfig, Number, ObservableStorage, SyncStorage,
    },
    reader::{MetricReader, SdkProducer},
    view::View,
};

/// Connects all of the instruments created by a meter provider to a [MetricReader].
///
/// This is the object that will be registered when a meter provider is
/// created.
///
/// As instruments are created the instrument should be checked if it exists in
/// the views of a the reader, and if so each storage should be added to the
/// pipeline.
#[doc(hidden)]
pub struct Pipeline {
    index: usize,
    reader: Box<dyn MetricReader>,
    views: Vec<Arc<dyn View>>,
    default_boundaries: Vec<f64>,
    cardinality_limit: usize,
    inner: Mutex<PipelineInner>,
    shutdown: Arc<AtomicBool>,
    diagnostics: Arc<Diagnostics>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("index", &self.index)
            .field("reader", &self.reader)
            .finish()
    }
}

/// A callback run once per collection of the pipeline with the given index.
pub(crate) type PipelineCallback = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct PipelineInner {
    aggregations: Vec<(InstrumentationScope, Vec<InstrumentSync>)>,
    callbacks: Vec<(u64, PipelineCallback)>,
}

impl Pipeline {
    /// Adds the [InstrumentSync] to pipeline with scope.
    ///
    /// This method is not idempotent. Duplicate calls will result in duplicate
    /// additions, it is the callers responsibility to ensure this is called with
    /// unique values.
    fn add_sync(&self, scope: &InstrumentationScope, i_sync: InstrumentSync) {
        let _ = self.inner.lock().map(|mut inner| {
            otel_debug!(
                name: "InstrumentCreated",
                instrument_name = i_sync.name.as_ref(),
            );
            match inner.aggregations.iter_mut().find(|(s, _)| s == scope) {
                Some((_, instruments)) => instruments.push(i_sync),
                None => inner.aggregations.push((scope.clone(), vec![i_sync])),
            }
        });
    }

    fn add_callback(&self, id: u64, callback: PipelineCallback) {
        let _ = self
            .inner
            .lock()
            .map(|mut inner| inner.callbacks.push((id, callback)));
    }

    fn remove_callback(&self, id: u64) {
        let _ = self
            .inner
            .lock()
            .map(|mut inner| inner.callbacks.retain(|(cb_id, _)| *cb_id != id));
    }

    fn force_flush(&self) -> MetricResult<()> {
        self.reader.force_flush()
    }

    fn shutdown(&self) -> MetricResult<()> {
        self.reader.shutdown()
    }

    fn run_callbacks(&self) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }

        // Callbacks may create instruments, so they run without the lock.
        let callbacks: Vec<PipelineCallback> = match self.inner.lock() {
            Ok(inner) => inner.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => return,
        };
        otel_debug!(
            name: "MeterProviderInvokingObservableCallbacks",
            count = callbacks.len() as u64,
        );

        for cb in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| cb(self.index))).is_err() {
                self.diagnostics.callback_failure();
                otel_warn!(
                    name: "Callback.Panicked",
                    message = "observable callback panicked, its observations were discarded",
                );
            }
        }
    }
}

impl SdkProducer for Pipeline {
    /// Runs this reader's callbacks once, then snapshots every stream.
    fn produce(&self, out: &mut Vec<ScopeMetrics>) -> MetricResult<()> {
        self.run_callbacks();

        let inner = self.inner.lock()?;
        out.clear();
        for (scope, instruments) in &inner.aggregations {
            let metrics: Vec<Metric> = instruments
                .iter()
                .filter_map(|inst| {
                    inst.comp_agg.call().map(|data| Metric {
                        name: inst.name.clone(),
                        description: inst.description.clone(),
                        unit: inst.unit.clone(),
                        data,
                    })
                })
                .collect();

            if !metrics.is_empty() {
                out.push(ScopeMetrics {
                    scope: scope.clone(),
                    metrics,
                });
            }
        }

        Ok(())
    }
}

/// A synchronization point between a [Pipeline] and a stream's storage.
struct InstrumentSync {
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
    comp_agg: Arc<dyn internal::ComputeAggregation>,
}

impl fmt::Debug for InstrumentSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentSync")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("unit", &self.unit)
            .finish()
    }
}

/// Storage of one resolved stream.
pub(crate) enum StreamStorage<T> {
    Sync(Arc<SyncStorage<T>>),
    Observable(Arc<ObservableStorage<T>>),
}

impl<T> Clone for StreamStorage<T> {
    fn clone(&self) -> Self {
        match self {
            StreamStorage::Sync(s) => StreamStorage::Sync(Arc::clone(s)),
            StreamStorage::Observable(s) => StreamStorage::Observable(Arc::clone(s)),
        }
    }
}

impl<T> fmt::Debug for StreamStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStorage::Sync(s) => fmt::Debug::fmt(&**s, f),
            StreamStorage::Observable(s) => fmt::Debug::fmt(&**s, f),
        }
    }
}

/// A stream id together with the instrument that produced it.
///
/// Two instruments renamed to the same stream by a view are separate streams.
type StreamKey = (DescriptorKey, InstrumentId);

/// Streams created by one meter, shared by all of its inserters.
///
/// Used to warn once per pair of streams that share a name ignoring case but
/// differ in any other identifying field or in their source instrument.
#[derive(Debug, Default)]
pub(crate) struct StreamRegistry {
    by_name: HashMap<String, Vec<StreamKey>>,
}

type Cache<T> = Mutex<HashMap<StreamKey, Option<StreamStorage<T>>>>;

/// Facilitates inserting of new instruments from a single scope into a pipeline.
struct Inserter<T> {
    /// Storages already inserted into the pipeline. Requests for the same
    /// stream get the same instance back.
    storages: Cache<T>,

    /// Stream ids of every instrument the owning meter created.
    registry: Arc<Mutex<StreamRegistry>>,

    pipeline: Arc<Pipeline>,
}

impl<T> Inserter<T>
where
    T: Number,
    crate::data::MetricData<T>: Into<crate::data::AggregatedMetrics>,
{
    fn new(pipeline: Arc<Pipeline>, registry: Arc<Mutex<StreamRegistry>>) -> Self {
        Inserter {
            storages: Default::default(),
            registry,
            pipeline,
        }
    }

    /// Inserts the provided instrument into the pipeline.
    ///
    /// Every matching view produces a stream; with no match the instrument is
    /// inserted with its own identity and default aggregation. Identical
    /// streams are returned once. Streams aggregated with
    /// [Aggregation::Drop] get no storage.
    fn instrument(
        &self,
        desc: &InstrumentDescriptor,
        scope: &InstrumentationScope,
    ) -> MetricResult<Vec<StreamStorage<T>>> {
        let inst = desc.to_instrument(scope);
        let reader_aggregation = self.pipeline.reader.aggregation(desc.kind);
        let mut seen = HashSet::new();
        let mut storages = vec![];
        let mut matched = false;

        for view in &self.pipeline.views {
            let stream = match view.match_inst(&inst) {
                Some(stream) => stream,
                None => continue,
            };
            matched = true;
            if let Some(storage) =
                self.cached_storage(desc, scope, stream, &reader_aggregation, &mut seen)?
            {
                storages.push(storage);
            }
        }

        if !matched {
            let stream = Stream {
                name: Some(desc.name.clone()),
                description: Some(desc.description.clone()),
                unit: Some(desc.unit.clone()),
                ..Default::default()
            };
            if let Some(storage) =
                self.cached_storage(desc, scope, stream, &reader_aggregation, &mut seen)?
            {
                storages.push(storage);
            }
        }

        Ok(storages)
    }

    /// Returns the storage of a stream, creating and registering it with the
    /// pipeline the first time the stream is seen.
    fn cached_storage(
        &self,
        desc: &InstrumentDescriptor,
        scope: &InstrumentationScope,
        stream: Stream,
        reader_aggregation: &Aggregation,
        seen: &mut HashSet<InstrumentId>,
    ) -> MetricResult<Option<StreamStorage<T>>> {
        let kind = desc.kind;
        let aggregation = self.select_aggregation(desc, stream.aggregation.as_ref(), reader_aggregation);
        let aggregator = match to_aggregator(&aggregation, kind) {
            Some(aggregator) => aggregator,
            None => return Ok(None),
        };

        let id = InstrumentId {
            name: stream.name.unwrap_or_else(|| desc.name.clone()),
            description: stream
                .description
                .unwrap_or_else(|| desc.description.clone()),
            kind,
            unit: stream.unit.unwrap_or_else(|| desc.unit.clone()),
            number: T::KIND,
            aggregation: aggregation.name(),
        };
        if !seen.insert(id.clone()) {
            return Ok(None);
        }
        let key = (desc.key(), id);
        self.log_conflict(&key);

        let mut cache = self.storages.lock()?;
        if let Some(cached) = cache.get(&key) {
            return Ok(cached.clone());
        }
        let id = &key.1;

        let temporality = kind.temporality_preference(self.pipeline.reader.temporality(kind));
        let filter = stream
            .allowed_attribute_keys
            .or_else(|| desc.advice.attribute_keys.clone());
        let limit = stream
            .cardinality_limit
            .unwrap_or(self.pipeline.cardinality_limit);
        let diagnostics = Arc::clone(&self.pipeline.diagnostics);

        let (storage, comp_agg): (StreamStorage<T>, Arc<dyn internal::ComputeAggregation>) =
            if kind.is_observable() {
                let precomputed = matches!(aggregator, Aggregator::Sum { .. });
                let s = Arc::new(ObservableStorage::new(
                    aggregator,
                    temporality,
                    precomputed,
                    filter,
                    limit,
                    diagnostics,
                ));
                (StreamStorage::Observable(Arc::clone(&s)), s)
            } else {
                let s = Arc::new(SyncStorage::new(
                    aggregator,
                    temporality,
                    filter,
                    limit,
                    diagnostics,
                ));
                (StreamStorage::Sync(Arc::clone(&s)), s)
            };

        self.pipeline.add_sync(
            scope,
            InstrumentSync {
                name: id.name.clone(),
                description: id.description.clone(),
                unit: id.unit.clone(),
                comp_agg,
            },
        );
        cache.insert(key, Some(storage.clone()));

        Ok(Some(storage))
    }

    /// Picks the aggregation of a stream.
    ///
    /// A reader forcing an aggregation for the kind wins over the view, which
    /// wins over advised boundaries, which win over the kind default. A choice
    /// that does not fit the kind falls back to the default.
    fn select_aggregation(
        &self,
        desc: &InstrumentDescriptor,
        view_aggregation: Option<&Aggregation>,
        reader_aggregation: &Aggregation,
    ) -> Aggregation {
        let kind = desc.kind;
        let chosen = if !matches!(reader_aggregation, Aggregation::Default) {
            reader_aggregation.clone()
        } else if let Some(agg) =
            view_aggregation.filter(|agg| !matches!(agg, Aggregation::Default))
        {
            agg.clone()
        } else if let (InstrumentKind::Histogram, Some(boundaries)) =
            (kind, desc.advice.explicit_bucket_boundaries())
        {
            Aggregation::ExplicitBucketHistogram {
                boundaries: boundaries.to_vec(),
                record_min_max: true,
            }
        } else {
            return self.default_aggregation(kind);
        };

        if chosen.is_compatible(kind) {
            return chosen;
        }

        self.pipeline.diagnostics.incompatible_aggregation();
        otel_warn!(
            name: "Instrument.IncompatibleAggregation",
            message = "aggregation does not fit the instrument kind, using the default",
            instrument_name = desc.name.to_string(),
            kind = format!("{kind:?}"),
            aggregation = chosen.name(),
        );
        self.default_aggregation(kind)
    }

    /// The default aggregation for an instrument of [InstrumentKind].
    ///
    /// * Counter ⇨ Sum
    /// * Observable Counter ⇨ Sum
    /// * UpDownCounter ⇨ Sum
    /// * Observable UpDownCounter ⇨ Sum
    /// * Gauge ⇨ LastValue
    /// * Observable Gauge ⇨ LastValue
    /// * Histogram ⇨ ExplicitBucketHistogram
    fn default_aggregation(&self, kind: InstrumentKind) -> Aggregation {
        match kind {
            InstrumentKind::Counter
            | InstrumentKind::UpDownCounter
            | InstrumentKind::ObservableCounter
            | InstrumentKind::ObservableUpDownCounter => Aggregation::Sum,
            InstrumentKind::Gauge | InstrumentKind::ObservableGauge => Aggregation::LastValue,
            InstrumentKind::Histogram => Aggregation::ExplicitBucketHistogram {
                boundaries: self.pipeline.default_boundaries.clone(),
                record_min_max: true,
            },
        }
    }

    /// Warns once for every earlier stream that conflicts with `key`.
    fn log_conflict(&self, key: &StreamKey) {
        let Ok(mut registry) = self.registry.lock() else {
            return;
        };
        let id = &key.1;
        let known = registry.by_name.entry(id.conflict_key()).or_default();
        if known.contains(key) {
            return;
        }
        let conflicting: Vec<InstrumentId> = known.iter().map(|(_, id)| id.clone()).collect();
        known.push(key.clone());

        for existing in conflicting {
            self.pipeline.diagnostics.duplicate_definition();
            otel_warn!(
                name: "Instrument.DuplicateMetricStreamDefinitions",
                message = "duplicate metric stream definitions",
                reason = format!("names: ({} and {}), descriptions: ({} and {}), kinds: ({:?} and {:?}), units: ({:?} and {:?}), numbers: ({} and {}), aggregations: ({} and {})",
                existing.name, id.name,
                existing.description, id.description,
                existing.kind, id.kind,
                existing.unit, id.unit,
                existing.number, id.number,
                existing.aggregation, id.aggregation,)
            );
        }
    }
}

/// Returns the aggregator for the given aggregation, `None` for
/// [Aggregation::Drop].
fn to_aggregator(agg: &Aggregation, kind: InstrumentKind) -> Option<Aggregator> {
    let record_sum = !matches!(
        kind,
        InstrumentKind::UpDownCounter
            | InstrumentKind::ObservableUpDownCounter
            | InstrumentKind::ObservableGauge
    );
    match agg {
        Aggregation::Drop | Aggregation::Default => None,
        Aggregation::Sum => Some(Aggregator::Sum {
            monotonic: matches!(
                kind,
                InstrumentKind::Counter
                    | InstrumentKind::ObservableCounter
                    | InstrumentKind::Histogram
            ),
        }),
        Aggregation::LastValue => Some(Aggregator::LastValue),
        Aggregation::ExplicitBucketHistogram {
            boundaries,
            record_min_max,
        } => Some(Aggregator::ExplicitBucketHistogram(HistogramConfig::new(
            boundaries.clone(),
            *record_min_max,
            record_sum,
        ))),
        Aggregation::Base2ExponentialHistogram {
            max_size,
            max_scale,
            record_min_max,
        } => Some(Aggregator::Base2ExponentialHistogram(ExpoConfig {
            max_size: i32::try_from(*max_size).unwrap_or(i32::MAX),
            max_scale: *max_scale,
            record_min_max: *record_min_max,
            record_sum,
        })),
        Aggregation::Summary => Some(Aggregator::Summary),
    }
}

static CALLBACK_ID: AtomicU64 = AtomicU64::new(0);

/// The group of pipelines connecting Readers with instrument measurement.
#[derive(Debug)]
pub(crate) struct Pipelines(pub(crate) Vec<Arc<Pipeline>>);

impl Pipelines {
    pub(crate) fn new(
        readers: Vec<Box<dyn MetricReader>>,
        views: Vec<Arc<dyn View>>,
        default_boundaries: Vec<f64>,
        cardinality_limit: usize,
        shutdown: Arc<AtomicBool>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let mut pipes = Vec::with_capacity(readers.len());
        for (index, reader) in readers.into_iter().enumerate() {
            let p = Arc::new(Pipeline {
                index,
                reader,
                views: views.clone(),
                default_boundaries: default_boundaries.clone(),
                cardinality_limit,
                inner: Default::default(),
                shutdown: Arc::clone(&shutdown),
                diagnostics: Arc::clone(&diagnostics),
            });
            p.reader.register_pipeline(Arc::downgrade(&p));
            pipes.push(p);
        }

        Pipelines(pipes)
    }

    /// Registers `callback` with every pipeline and returns its id.
    pub(crate) fn register_callback(&self, callback: PipelineCallback) -> u64 {
        let id = CALLBACK_ID.fetch_add(1, Ordering::Relaxed);
        for pipe in &self.0 {
            pipe.add_callback(id, Arc::clone(&callback));
        }
        id
    }

    pub(crate) fn unregister_callback(&self, id: u64) {
        for pipe in &self.0 {
            pipe.remove_callback(id);
        }
    }

    /// Force flush all pipelines
    pub(crate) fn force_flush(&self) -> MetricResult<()> {
        let errs: Vec<_> = self
            .0
            .iter()
            .filter_map(|pipeline| pipeline.force_flush().err())
            .collect();

        if errs.is_empty() {
            Ok(())
        } else {
            Err(MetricError::Other(format!("{errs:?}")))
        }
    }

    /// Shut down all pipelines
    pub(crate) fn shutdown(&self) -> MetricResult<()> {
        let errs: Vec<_> = self
            .0
            .iter()
            .filter_map(|pipeline| pipeline.shutdown().err())
            .collect();

        if errs.is_empty() {
            Ok(())
        } else {
            Err(MetricError::Other(format!("{errs:?}")))
        }
    }
}

/// Resolves the storages an instrument writes to, across every pipeline.
///
/// Resolution happens once per distinct descriptor; asking again returns the
/// same storages without repeating warnings.
pub(crate) struct Resolver<T> {
    inserters: Vec<Inserter<T>>,
    resolved: Mutex<HashMap<DescriptorKey, Vec<Vec<StreamStorage<T>>>>>,
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("pipelines", &self.inserters.len())
            .finish()
    }
}

impl<T> Resolver<T>
where
    T: Number,
    crate::data::MetricData<T>: Into<crate::data::AggregatedMetrics>,
{
    pub(crate) fn new(pipelines: &Pipelines, registry: Arc<Mutex<StreamRegistry>>) -> Self {
        let inserters = pipelines
            .0
            .iter()
            .map(|pipe| Inserter::new(Arc::clone(pipe), Arc::clone(&registry)))
            .collect();

        Resolver {
            inserters,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// The storages of `desc`, grouped by pipeline index.
    pub(crate) fn storages(
        &self,
        desc: &InstrumentDescriptor,
        scope: &InstrumentationScope,
    ) -> MetricResult<Vec<Vec<StreamStorage<T>>>> {
        let mut resolved = self.resolved.lock()?;
        if let Some(storages) = resolved.get(&desc.key()) {
            return Ok(storages.clone());
        }

        let storages = self
            .inserters
            .iter()
            .map(|inserter| inserter.instrument(desc, scope))
            .collect::<MetricResult<Vec<_>>>()?;

        if storages.iter().all(Vec::is_empty) {
            otel_debug!(
                name: "Instrument.Dropped",
                message = "no stream aggregates this instrument, its measurements are dropped",
                instrument_name = desc.name.to_string(),
            );
        }
        resolved.insert(desc.key(), storages.clone());

        Ok(storages)
    }
}
