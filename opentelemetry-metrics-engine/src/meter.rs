use core::fmt;
use std::{
    any::Any,
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};

use opentelemetry::{otel_debug, InstrumentationScope};

use crate::{
    data::{AggregatedMetrics, MetricData},
    diagnostics::Diagnostics,
    error::{MetricError, MetricResult},
    instrument::{InstrumentDescriptor, ValueKind},
    instruments::{
        observable_ids, AsyncInstrument, BatchObserver, ObservableInstrument, Observer,
        SyncInstrument,
    },
    internal::Number,
    pipeline::{Pipelines, Resolver, StreamRegistry, StreamStorage},
};

static METER_ID: AtomicU64 = AtomicU64::new(0);

/// Handles the creation and coordination of all metric instruments.
///
/// A meter represents a single instrumentation scope; all metric telemetry
/// produced by an instrumentation scope will use metric instruments from a
/// single meter. Cloning is cheap.
#[derive(Clone)]
pub struct SdkMeter {
    inner: Arc<MeterInner>,
}

struct MeterInner {
    id: u64,
    scope: InstrumentationScope,
    pipes: Arc<Pipelines>,
    u64_resolver: Resolver<u64>,
    i64_resolver: Resolver<i64>,
    f64_resolver: Resolver<f64>,
    shutdown: Arc<AtomicBool>,
    diagnostics: Arc<Diagnostics>,
}

impl fmt::Debug for SdkMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkMeter")
            .field("scope", &self.inner.scope)
            .finish()
    }
}

impl SdkMeter {
    pub(crate) fn new(
        scope: InstrumentationScope,
        pipes: Arc<Pipelines>,
        shutdown: Arc<AtomicBool>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let registry: Arc<Mutex<StreamRegistry>> = Default::default();

        SdkMeter {
            inner: Arc::new(MeterInner {
                id: METER_ID.fetch_add(1, Ordering::Relaxed),
                scope,
                u64_resolver: Resolver::new(&pipes, Arc::clone(&registry)),
                i64_resolver: Resolver::new(&pipes, Arc::clone(&registry)),
                f64_resolver: Resolver::new(&pipes, registry),
                pipes,
                shutdown,
                diagnostics,
            }),
        }
    }

    /// The instrumentation scope of this meter.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.inner.scope
    }

    fn resolver<T: Number>(&self) -> MetricResult<&Resolver<T>> {
        let any: &dyn Any = match T::KIND {
            ValueKind::U64 => &self.inner.u64_resolver,
            ValueKind::I64 => &self.inner.i64_resolver,
            ValueKind::F64 => &self.inner.f64_resolver,
        };
        any.downcast_ref::<Resolver<T>>()
            .ok_or_else(|| MetricError::Other(format!("no resolver for {} values", T::KIND)))
    }

    fn resolve<T>(&self, desc: &InstrumentDescriptor) -> MetricResult<Vec<Vec<StreamStorage<T>>>>
    where
        T: Number,
        MetricData<T>: Into<AggregatedMetrics>,
    {
        desc.validate()?;
        if desc.value_kind() != T::KIND {
            return Err(MetricError::Config(format!(
                "instrument {} records {} values, not {}",
                desc.name(),
                desc.value_kind(),
                T::KIND
            )));
        }
        self.resolver::<T>()?.storages(desc, &self.inner.scope)
    }

    /// Creates a synchronous instrument, resolving its storages in every
    /// reader.
    ///
    /// Creating an instrument with an equal descriptor again returns an
    /// instrument recording into the same streams.
    pub fn sync_instrument<T>(&self, desc: InstrumentDescriptor) -> MetricResult<SyncInstrument<T>>
    where
        T: Number,
        MetricData<T>: Into<AggregatedMetrics>,
    {
        if desc.kind().is_observable() {
            return Err(MetricError::Config(format!(
                "{:?} is not a synchronous instrument kind",
                desc.kind()
            )));
        }
        let storages = self
            .resolve::<T>(&desc)?
            .into_iter()
            .flatten()
            .filter_map(|storage| match storage {
                StreamStorage::Sync(s) => Some(s),
                StreamStorage::Observable(_) => None,
            })
            .collect();

        Ok(SyncInstrument::new(
            desc.name,
            storages,
            Arc::clone(&self.inner.shutdown),
        ))
    }

    /// Creates an observable instrument. Measurements are only taken through
    /// callbacks registered with [SdkMeter::register_callback] or
    /// [SdkMeter::register_batch_callback].
    pub fn observable_instrument<T>(
        &self,
        desc: InstrumentDescriptor,
    ) -> MetricResult<ObservableInstrument<T>>
    where
        T: Number,
        MetricData<T>: Into<AggregatedMetrics>,
    {
        if !desc.kind().is_observable() {
            return Err(MetricError::Config(format!(
                "{:?} is not an observable instrument kind",
                desc.kind()
            )));
        }
        let storages = self
            .resolve::<T>(&desc)?
            .into_iter()
            .map(|per_pipeline| {
                per_pipeline
                    .into_iter()
                    .filter_map(|storage| match storage {
                        StreamStorage::Observable(s) => Some(s),
                        StreamStorage::Sync(_) => None,
                    })
                    .collect()
            })
            .collect();

        Ok(ObservableInstrument::new(
            self.inner.id,
            desc.name,
            storages,
            Arc::clone(&self.inner.diagnostics),
        ))
    }

    /// Registers `callback` to observe `instrument` once per collection of
    /// each reader.
    ///
    /// Observations made by a callback that panics are discarded.
    pub fn register_callback<T, F>(
        &self,
        instrument: &ObservableInstrument<T>,
        callback: F,
    ) -> MetricResult<CallbackRegistration>
    where
        T: Number,
        F: Fn(&dyn AsyncInstrument<T>) + Send + Sync + 'static,
    {
        if instrument.meter_id() != self.inner.id {
            return Err(MetricError::Config(
                "callback instrument was created by another meter".into(),
            ));
        }

        let instrument = instrument.clone();
        let id = self.inner.pipes.register_callback(Arc::new(move |pipeline: usize| {
            let window = instrument.window();
            callback(&window);
            window.commit(pipeline);
        }));

        Ok(CallbackRegistration {
            id,
            pipes: Arc::downgrade(&self.inner.pipes),
        })
    }

    /// Registers `callback` to observe several instruments of this meter once
    /// per collection of each reader.
    ///
    /// `instruments` are the [AsyncInstrument::as_any] handles of the
    /// instruments the callback observes. Observations of any other
    /// instrument are dropped.
    pub fn register_batch_callback<F>(
        &self,
        instruments: &[Arc<dyn Any + Send + Sync>],
        callback: F,
    ) -> MetricResult<CallbackRegistration>
    where
        F: Fn(&dyn Observer) + Send + Sync + 'static,
    {
        let mut registered = HashSet::with_capacity(instruments.len());
        for handle in instruments {
            match observable_ids(handle) {
                Some((meter_id, id)) if meter_id == self.inner.id => {
                    registered.insert(id);
                }
                Some(_) => {
                    return Err(MetricError::Config(
                        "batch callback instrument was created by another meter".into(),
                    ))
                }
                None => {
                    return Err(MetricError::Config(
                        "batch callback instrument was not created by this engine".into(),
                    ))
                }
            }
        }
        if registered.is_empty() {
            otel_debug!(
                name: "Meter.EmptyBatchCallback",
                message = "batch callback registered without instruments, its observations are dropped",
            );
        }

        let meter_id = self.inner.id;
        let registered = Arc::new(registered);
        let diagnostics = Arc::clone(&self.inner.diagnostics);
        let id = self.inner.pipes.register_callback(Arc::new(move |pipeline: usize| {
            let observer =
                BatchObserver::new(meter_id, Arc::clone(&registered), Arc::clone(&diagnostics));
            callback(&observer);
            observer.commit(pipeline);
        }));

        Ok(CallbackRegistration {
            id,
            pipes: Arc::downgrade(&self.inner.pipes),
        })
    }
}

/// A registered callback. Dropping it keeps the callback registered.
#[derive(Debug)]
pub struct CallbackRegistration {
    id: u64,
    pipes: Weak<Pipelines>,
}

impl CallbackRegistration {
    /// Removes the callback from every reader. Later collections no longer
    /// run it. Calling this more than once has no further effect.
    pub fn unregister(&mut self) -> MetricResult<()> {
        if let Some(pipes) = self.pipes.upgrade() {
            pipes.unregister_callback(self.id);
        }
        self.pipes = Weak::new();
        Ok(())
    }
}
