use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
};

use opentelemetry::otel_debug;

use crate::{
    aggregation::Aggregation,
    data::{ScopeMetrics, Temporality},
    error::{MetricError, MetricResult},
    instrument::InstrumentKind,
    pipeline::Pipeline,
    reader::{AggregationSelector, DefaultAggregationSelector, MetricReader, SdkProducer},
};

/// A simple [MetricReader] that allows an application to read metrics on demand.
///
/// The reader is a cheap handle: clone it before passing it to
/// [MeterProviderBuilder::with_reader] and keep the clone to call
/// [ManualReader::collect].
///
/// See [ManualReaderBuilder] for configuration options.
///
/// # Example
///
/// ```
/// use opentelemetry_metrics_engine::ManualReader;
///
/// // can specify additional reader configuration
/// let reader = ManualReader::builder().build();
/// # drop(reader)
/// ```
///
/// [MeterProviderBuilder::with_reader]: crate::MeterProviderBuilder::with_reader
#[derive(Clone)]
pub struct ManualReader {
    inner: Arc<Mutex<ManualReaderInner>>,
    temporality: Temporality,
    aggregation_selector: Arc<dyn AggregationSelector>,
}

impl Default for ManualReader {
    fn default() -> Self {
        ManualReader::builder().build()
    }
}

impl fmt::Debug for ManualReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualReader")
            .field("temporality", &self.temporality)
            .finish()
    }
}

#[derive(Debug, Default)]
struct ManualReaderInner {
    sdk_producer: Option<Weak<dyn SdkProducer>>,
    is_shutdown: bool,
}

impl ManualReader {
    /// Configuration for this reader
    pub fn builder() -> ManualReaderBuilder {
        ManualReaderBuilder::default()
    }

    /// A [MetricReader] which is directly called to collect metrics.
    pub(crate) fn new(
        temporality: Temporality,
        aggregation_selector: Arc<dyn AggregationSelector>,
    ) -> Self {
        ManualReader {
            inner: Arc::new(Mutex::new(ManualReaderInner::default())),
            temporality,
            aggregation_selector,
        }
    }

    /// Runs one collection cycle and returns its snapshot.
    pub fn collect_scopes(&self) -> MetricResult<Vec<ScopeMetrics>> {
        let mut out = Vec::new();
        self.collect(&mut out)?;
        Ok(out)
    }
}

impl MetricReader for ManualReader {
    ///  Register a pipeline which enables the caller to read metrics from the
    ///  engine on demand.
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        let _ = self.inner.lock().map(|mut inner| {
            // Only register once. If producer is already set, do nothing.
            if inner.sdk_producer.is_none() {
                inner.sdk_producer = Some(pipeline);
            } else {
                otel_debug!(
                    name: "ManualReader.DuplicateRegistration",
                    message = "The pipeline is already registered to the Reader. Registering pipeline multiple times is not allowed.",
                );
            }
        });
    }

    /// Runs the registered pipeline's callbacks and snapshots its streams.
    ///
    /// Collection keeps working after shutdown so a final snapshot can be
    /// taken; it fails once the meter provider is gone.
    fn collect(&self, out: &mut Vec<ScopeMetrics>) -> MetricResult<()> {
        let producer = {
            let inner = self.inner.lock()?;
            inner.sdk_producer.as_ref().and_then(|w| w.upgrade())
        };
        match producer {
            Some(producer) => producer.produce(out),
            None => Err(MetricError::Other(
                "reader is not registered or its meter provider was dropped".into(),
            )),
        }
    }

    /// ForceFlush is a no-op, it always returns Ok.
    fn force_flush(&self) -> MetricResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> MetricResult<()> {
        let mut inner = self.inner.lock()?;
        if inner.is_shutdown {
            return Err(MetricError::AlreadyShutdown);
        }
        inner.is_shutdown = true;
        Ok(())
    }

    fn temporality(&self, _kind: InstrumentKind) -> Temporality {
        self.temporality
    }

    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        self.aggregation_selector.aggregation(kind)
    }
}

/// Configuration for a [ManualReader]
pub struct ManualReaderBuilder {
    temporality: Temporality,
    aggregation_selector: Arc<dyn AggregationSelector>,
}

impl fmt::Debug for ManualReaderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualReaderBuilder")
            .field("temporality", &self.temporality)
            .finish()
    }
}

impl Default for ManualReaderBuilder {
    fn default() -> Self {
        ManualReaderBuilder {
            temporality: Temporality::default(),
            aggregation_selector: Arc::new(DefaultAggregationSelector::new()),
        }
    }
}

impl ManualReaderBuilder {
    /// New manual builder configuration
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the [Temporality] of the exporter.
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Sets the [AggregationSelector] a reader will use to determine the
    /// aggregation to use for an instrument based on its kind.
    ///
    /// If this option is not used, the reader will use the default aggregation
    /// selector or the aggregation explicitly passed for a view matching an
    /// instrument.
    pub fn with_aggregation_selector(
        mut self,
        aggregation_selector: impl AggregationSelector + 'static,
    ) -> Self {
        self.aggregation_selector = Arc::new(aggregation_selector);
        self
    }

    /// Create a new [ManualReader] from this configuration.
    pub fn build(self) -> ManualReader {
        ManualReader::new(self.temporality, self.aggregation_selector)
    }
}
