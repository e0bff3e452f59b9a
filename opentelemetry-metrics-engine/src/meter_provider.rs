use core::fmt;
use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use opentelemetry::{otel_debug, otel_error, otel_info, otel_warn, InstrumentationScope};

use crate::{
    aggregation::DEFAULT_HISTOGRAM_BOUNDARIES,
    diagnostics::{Diagnostics, DiagnosticsSnapshot},
    error::{MetricError, MetricResult},
    instrument::validate_bucket_boundaries,
    meter::SdkMeter,
    pipeline::Pipelines,
    reader::MetricReader,
    view::View,
};

/// The number of attribute sets a stream keeps, overflow included, unless a
/// view sets its own limit.
pub const DEFAULT_CARDINALITY_LIMIT: usize = 2000;

/// Handles the creation and coordination of [SdkMeter]s.
///
/// All meters created by a `SdkMeterProvider` have the same [View]s applied to
/// them and have their produced metric telemetry passed to the configured
/// [MetricReader]s. This is a clonable handle to the provider implementation
/// itself, and cloning it will create a new reference, not a new instance.
/// Dropping the last reference to it will trigger shutdown of the provider.
/// Shutdown can also be triggered manually by calling the `shutdown` method.
#[derive(Clone, Debug)]
pub struct SdkMeterProvider {
    inner: Arc<SdkMeterProviderInner>,
}

struct SdkMeterProviderInner {
    pipes: Arc<Pipelines>,
    meters: Mutex<HashMap<InstrumentationScope, SdkMeter>>,
    shutdown_invoked: Arc<AtomicBool>,
    diagnostics: Arc<Diagnostics>,
}

impl fmt::Debug for SdkMeterProviderInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkMeterProviderInner")
            .field("pipes", &self.pipes)
            .field("shutdown_invoked", &self.shutdown_invoked)
            .finish()
    }
}

impl Default for SdkMeterProvider {
    fn default() -> Self {
        SdkMeterProvider::builder().build()
    }
}

impl SdkMeterProvider {
    /// Return default [MeterProviderBuilder]
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// The meter for the scope named `name`.
    pub fn meter(&self, name: impl Into<Cow<'static, str>>) -> SdkMeter {
        self.meter_with_scope(InstrumentationScope::builder(name).build())
    }

    /// The meter for `scope`. Asking for an equal scope again returns the
    /// same meter.
    pub fn meter_with_scope(&self, scope: InstrumentationScope) -> SdkMeter {
        if scope.name().is_empty() {
            otel_info!(name: "MeterNameEmpty", message = "Meter name is empty; consider providing a meaningful name. Meter will function normally and the provided name will be used as-is.");
        };

        let mut meters = self
            .inner
            .meters
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        if let Some(existing_meter) = meters.get(&scope) {
            otel_debug!(
                name: "MeterProvider.ExistingMeterReturned",
                meter_name = scope.name().to_string(),
            );
            return existing_meter.clone();
        }

        let new_meter = SdkMeter::new(
            scope.clone(),
            Arc::clone(&self.inner.pipes),
            Arc::clone(&self.inner.shutdown_invoked),
            Arc::clone(&self.inner.diagnostics),
        );
        meters.insert(scope, new_meter.clone());
        otel_debug!(
            name: "MeterProvider.NewMeterCreated",
            meter_name = new_meter.scope().name().to_string(),
        );
        new_meter
    }

    /// Counters of the problems the engine handled without returning an error.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.inner.diagnostics.snapshot()
    }

    /// Flushes all pending telemetry.
    pub fn force_flush(&self) -> MetricResult<()> {
        self.inner.force_flush()
    }

    /// Shuts down the meter provider.
    ///
    /// Afterwards recording, bound recording and observable callbacks are
    /// no-ops. Readers can still collect what was aggregated before. The first
    /// call shuts every reader down; later calls return
    /// [MetricError::AlreadyShutdown].
    pub fn shutdown(&self) -> MetricResult<()> {
        otel_info!(
            name: "MeterProvider.Shutdown",
            message = "User initiated shutdown of MeterProvider."
        );
        self.inner.shutdown()
    }
}

impl SdkMeterProviderInner {
    fn force_flush(&self) -> MetricResult<()> {
        if self.shutdown_invoked.load(Ordering::Relaxed) {
            Err(MetricError::AlreadyShutdown)
        } else {
            self.pipes.force_flush()
        }
    }

    fn shutdown(&self) -> MetricResult<()> {
        if self.shutdown_invoked.swap(true, Ordering::SeqCst) {
            // If the previous value was true, shutdown was already invoked.
            Err(MetricError::AlreadyShutdown)
        } else {
            self.pipes.shutdown()
        }
    }
}

impl Drop for SdkMeterProviderInner {
    fn drop(&mut self) {
        // If user has already shutdown the provider manually by calling
        // shutdown(), then we don't need to call shutdown again.
        if self.shutdown_invoked.load(Ordering::Relaxed) {
            otel_debug!(
                name: "MeterProvider.Drop.AlreadyShutdown",
                message = "MeterProvider was already shut down; drop will not attempt shutdown again."
            );
        } else {
            otel_info!(
                name: "MeterProvider.Drop",
                message = "Last reference of MeterProvider dropped, initiating shutdown."
            );
            if let Err(err) = self.shutdown() {
                otel_error!(
                    name: "MeterProvider.Drop.ShutdownFailed",
                    message = "Shutdown attempt failed during drop of MeterProvider.",
                    reason = format!("{}", err)
                );
            }
        }
    }
}

/// Configuration options for a [SdkMeterProvider].
pub struct MeterProviderBuilder {
    readers: Vec<Box<dyn MetricReader>>,
    views: Vec<Arc<dyn View>>,
    default_boundaries: Vec<f64>,
    cardinality_limit: usize,
}

impl Default for MeterProviderBuilder {
    fn default() -> Self {
        MeterProviderBuilder {
            readers: Vec::new(),
            views: Vec::new(),
            default_boundaries: DEFAULT_HISTOGRAM_BOUNDARIES.to_vec(),
            cardinality_limit: DEFAULT_CARDINALITY_LIMIT,
        }
    }
}

impl MeterProviderBuilder {
    /// Associates a [MetricReader] with a [SdkMeterProvider].
    ///
    /// Every reader collects independently, with its own temporality and
    /// aggregation preferences. A provider without readers aggregates
    /// nothing.
    pub fn with_reader<T: MetricReader>(mut self, reader: T) -> Self {
        self.readers.push(Box::new(reader));
        self
    }

    /// Associates a [View] with a [SdkMeterProvider].
    ///
    /// [View]s are appended to existing ones if this option is used multiple
    /// times. Every matching view produces its own stream.
    pub fn with_view<T: View>(mut self, view: T) -> Self {
        self.views.push(Arc::new(view));
        self
    }

    /// Bucket boundaries for histograms that no reader, view or advice
    /// configures.
    ///
    /// Invalid boundaries are ignored with a warning.
    pub fn with_default_histogram_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        match validate_bucket_boundaries(&boundaries) {
            Ok(()) => self.default_boundaries = boundaries,
            Err(err) => {
                otel_warn!(
                    name: "MeterProviderBuilder.InvalidHistogramBoundaries",
                    message = "keeping the previous default histogram boundaries",
                    reason = format!("{err}"),
                );
            }
        }
        self
    }

    /// The number of attribute sets a stream keeps when its view sets no
    /// limit. Zero is ignored with a warning.
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        if limit == 0 {
            otel_warn!(
                name: "MeterProviderBuilder.InvalidCardinalityLimit",
                message = "cardinality limit must be positive, keeping the previous limit",
            );
        } else {
            self.cardinality_limit = limit;
        }
        self
    }

    /// Construct a new [SdkMeterProvider] with this configuration.
    pub fn build(self) -> SdkMeterProvider {
        otel_debug!(
            name: "MeterProvider.Building",
            builder = format!("{:?}", &self),
        );

        let shutdown_invoked = Arc::new(AtomicBool::new(false));
        let diagnostics = Arc::new(Diagnostics::default());
        let meter_provider = SdkMeterProvider {
            inner: Arc::new(SdkMeterProviderInner {
                pipes: Arc::new(Pipelines::new(
                    self.readers,
                    self.views,
                    self.default_boundaries,
                    self.cardinality_limit,
                    Arc::clone(&shutdown_invoked),
                    Arc::clone(&diagnostics),
                )),
                meters: Default::default(),
                shutdown_invoked,
                diagnostics,
            }),
        };

        otel_info!(
            name: "MeterProvider.Built",
        );
        meter_provider
    }
}

impl fmt::Debug for MeterProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterProviderBuilder")
            .field("readers", &self.readers)
            .field("views", &self.views.len())
            .field("default_boundaries", &self.default_boundaries)
            .field("cardinality_limit", &self.cardinality_limit)
            .finish()
    }
}
