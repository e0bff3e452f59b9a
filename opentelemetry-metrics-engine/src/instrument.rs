use std::{borrow::Cow, collections::HashSet, fmt, sync::Arc};

use opentelemetry::{InstrumentationScope, Key};

use crate::{
    aggregation::Aggregation,
    data::Temporality,
    error::{MetricError, MetricResult},
};

// maximum length of instrument name
pub(crate) const INSTRUMENT_NAME_MAX_LENGTH: usize = 255;
// maximum length of instrument unit name
pub(crate) const INSTRUMENT_UNIT_NAME_MAX_LENGTH: usize = 63;
// Characters allowed in instrument name
const INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS: [char; 4] = ['_', '.', '-', '/'];

pub(crate) const INSTRUMENT_NAME_EMPTY: &str = "instrument name must be non-empty";
pub(crate) const INSTRUMENT_NAME_LENGTH: &str = "instrument name must be less than 256 characters";
pub(crate) const INSTRUMENT_NAME_INVALID_CHAR: &str =
    "characters in instrument name must be ASCII and belong to the alphanumeric characters, '_', '.', '-' and '/'";
pub(crate) const INSTRUMENT_NAME_FIRST_ALPHABETIC: &str =
    "instrument name must start with an alphabetic character";
pub(crate) const INSTRUMENT_UNIT_LENGTH: &str = "instrument unit must be less than 64 characters";
pub(crate) const INSTRUMENT_UNIT_INVALID_CHAR: &str = "characters in instrument unit must be ASCII";
pub(crate) const INSTRUMENT_VALUE_KIND_UNSUPPORTED: &str =
    "up-down counters cannot record unsigned values";
const BOUNDARIES_NOT_FINITE: &str = "Bucket boundaries must not contain NaN, Infinity, or -Infinity";
const BOUNDARIES_NOT_SORTED: &str = "Bucket boundaries must be sorted and not contain any duplicates";
const CARDINALITY_LIMIT_ZERO: &str = "Cardinality limit must be greater than 0";

/// The identifier of a group of instruments that all perform the same function.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum InstrumentKind {
    /// Identifies a group of instruments that record increasing values synchronously
    /// with the code path they are measuring.
    Counter,
    /// A group of instruments that record increasing and decreasing values
    /// synchronously with the code path they are measuring.
    UpDownCounter,
    /// A group of instruments that record a distribution of values synchronously with
    /// the code path they are measuring.
    Histogram,
    /// A group of instruments that record increasing values in an asynchronous
    /// callback.
    ObservableCounter,
    /// A group of instruments that record increasing and decreasing values in an
    /// asynchronous callback.
    ObservableUpDownCounter,
    /// a group of instruments that record current value synchronously with
    /// the code path they are measuring.
    Gauge,
    /// a group of instruments that record current values in an asynchronous callback.
    ObservableGauge,
}

impl InstrumentKind {
    /// Whether measurements of this kind are produced by callbacks.
    pub fn is_observable(&self) -> bool {
        matches!(
            self,
            InstrumentKind::ObservableCounter
                | InstrumentKind::ObservableUpDownCounter
                | InstrumentKind::ObservableGauge
        )
    }

    /// Select the [Temporality] a storage of this kind uses for a reader
    /// preference. `LowMemory` only applies delta to synchronous counters and
    /// histograms.
    pub(crate) fn temporality_preference(&self, temporality: Temporality) -> Temporality {
        match temporality {
            Temporality::Cumulative => Temporality::Cumulative,
            Temporality::Delta => Temporality::Delta,
            Temporality::LowMemory => match self {
                Self::Counter | Self::Histogram => Temporality::Delta,
                Self::ObservableCounter
                | Self::Gauge
                | Self::ObservableGauge
                | Self::UpDownCounter
                | Self::ObservableUpDownCounter => Temporality::Cumulative,
            },
        }
    }
}

/// The numeric type an instrument records.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ValueKind {
    /// Unsigned 64 bit integers.
    U64,
    /// Signed 64 bit integers.
    I64,
    /// 64 bit floating point numbers.
    F64,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::U64 => "u64",
            ValueKind::I64 => "i64",
            ValueKind::F64 => "f64",
        })
    }
}

/// Optional hints supplied when an instrument is created.
///
/// Advice is the lowest priority configuration source: a view or a reader
/// that picks an aggregation discards the advised boundaries entirely.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Advice {
    pub(crate) explicit_bucket_boundaries: Option<Vec<f64>>,
    pub(crate) attribute_keys: Option<Arc<HashSet<Key>>>,
}

impl Advice {
    /// Bucket boundaries used when the instrument ends up with the default
    /// explicit bucket histogram.
    pub fn with_explicit_bucket_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.explicit_bucket_boundaries = Some(boundaries);
        self
    }

    /// Attribute keys kept when no view sets its own allow-list.
    pub fn with_attribute_keys(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.attribute_keys = Some(Arc::new(keys.into_iter().collect()));
        self
    }

    /// The advised bucket boundaries, if any.
    pub fn explicit_bucket_boundaries(&self) -> Option<&[f64]> {
        self.explicit_bucket_boundaries.as_deref()
    }
}

/// The immutable description of an instrument, supplied when it is created.
///
/// # Example
///
/// ```
/// use opentelemetry_metrics_engine::{Advice, InstrumentDescriptor, InstrumentKind, ValueKind};
///
/// let descriptor = InstrumentDescriptor::new("http.server.duration", InstrumentKind::Histogram, ValueKind::F64)
///     .with_unit("ms")
///     .with_advice(Advice::default().with_explicit_bucket_boundaries(vec![10.0, 100.0]));
/// assert!(descriptor.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentDescriptor {
    pub(crate) name: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
    pub(crate) unit: Cow<'static, str>,
    pub(crate) kind: InstrumentKind,
    pub(crate) value_kind: ValueKind,
    pub(crate) advice: Advice,
}

impl InstrumentDescriptor {
    /// Create a descriptor with an empty description and unit.
    pub fn new(name: impl Into<Cow<'static, str>>, kind: InstrumentKind, value_kind: ValueKind) -> Self {
        InstrumentDescriptor {
            name: name.into(),
            description: Cow::Borrowed(""),
            unit: Cow::Borrowed(""),
            kind,
            value_kind,
            advice: Advice::default(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the advice.
    pub fn with_advice(mut self, advice: Advice) -> Self {
        self.advice = advice;
        self
    }

    /// Instrument name, in the casing it was created with.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Instrument description.
    pub fn description(&self) -> &str {
        self.description.as_ref()
    }

    /// Instrument unit.
    pub fn unit(&self) -> &str {
        self.unit.as_ref()
    }

    /// Instrument kind.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// The numeric type the instrument records.
    pub fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    /// Instrument advice.
    pub fn advice(&self) -> &Advice {
        &self.advice
    }

    /// Checks the name, unit, value kind and advice of the descriptor.
    pub fn validate(&self) -> MetricResult<()> {
        validate_instrument_name(&self.name)?;
        validate_instrument_unit(&self.unit)?;
        if self.value_kind == ValueKind::U64
            && matches!(
                self.kind,
                InstrumentKind::UpDownCounter | InstrumentKind::ObservableUpDownCounter
            )
        {
            return Err(MetricError::InvalidInstrumentConfiguration(
                INSTRUMENT_VALUE_KIND_UNSUPPORTED,
            ));
        }
        if let Some(boundaries) = &self.advice.explicit_bucket_boundaries {
            validate_bucket_boundaries(boundaries)?;
        }
        Ok(())
    }

    pub(crate) fn key(&self) -> DescriptorKey {
        let mut attribute_keys = self
            .advice
            .attribute_keys
            .as_ref()
            .map(|keys| keys.iter().cloned().collect::<Vec<_>>());
        if let Some(keys) = attribute_keys.as_mut() {
            keys.sort();
        }
        DescriptorKey {
            name: self.name.clone(),
            description: self.description.clone(),
            unit: self.unit.clone(),
            kind: self.kind,
            value_kind: self.value_kind,
            boundaries: self
                .advice
                .explicit_bucket_boundaries
                .as_ref()
                .map(|b| b.iter().map(|v| v.to_bits()).collect()),
            attribute_keys,
        }
    }

    pub(crate) fn to_instrument(&self, scope: &InstrumentationScope) -> Instrument {
        Instrument {
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind,
            unit: self.unit.clone(),
            scope: scope.clone(),
        }
    }
}

/// Hashable form of an [InstrumentDescriptor], used to cache view resolution.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct DescriptorKey {
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
    kind: InstrumentKind,
    value_kind: ValueKind,
    boundaries: Option<Vec<u64>>,
    attribute_keys: Option<Vec<Key>>,
}

pub(crate) fn validate_instrument_name(name: &str) -> MetricResult<()> {
    if name.is_empty() {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_EMPTY,
        ));
    }
    if name.len() > INSTRUMENT_NAME_MAX_LENGTH {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_LENGTH,
        ));
    }
    if name.starts_with(|c: char| !c.is_ascii_alphabetic()) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_FIRST_ALPHABETIC,
        ));
    }
    if name.contains(|c: char| {
        !c.is_ascii_alphanumeric() && !INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS.contains(&c)
    }) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_INVALID_CHAR,
        ));
    }
    Ok(())
}

pub(crate) fn validate_instrument_unit(unit: &str) -> MetricResult<()> {
    if unit.len() > INSTRUMENT_UNIT_NAME_MAX_LENGTH {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_UNIT_LENGTH,
        ));
    }
    if unit.contains(|c: char| !c.is_ascii()) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_UNIT_INVALID_CHAR,
        ));
    }
    Ok(())
}

pub(crate) fn validate_bucket_boundaries(boundaries: &[f64]) -> MetricResult<()> {
    if boundaries.iter().any(|b| b.is_nan() || b.is_infinite()) {
        return Err(MetricError::Config(BOUNDARIES_NOT_FINITE.into()));
    }
    if boundaries.windows(2).any(|w| w[1] <= w[0]) {
        return Err(MetricError::Config(BOUNDARIES_NOT_SORTED.into()));
    }
    Ok(())
}

/// Describes the properties of an instrument at creation, used for matching
/// views.
///
/// # Example
///
/// ```rust
/// use opentelemetry_metrics_engine::{Instrument, Stream};
///
/// let my_view_change_cardinality = |i: &Instrument| {
///     if i.name() == "my_second_histogram" {
///         Stream::builder().with_cardinality_limit(2).build().ok()
///     } else {
///         None
///     }
/// };
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Instrument {
    pub(crate) name: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
    pub(crate) kind: InstrumentKind,
    pub(crate) unit: Cow<'static, str>,
    pub(crate) scope: InstrumentationScope,
}

impl Instrument {
    /// Instrument name.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Instrument description.
    pub fn description(&self) -> &str {
        self.description.as_ref()
    }

    /// Instrument kind.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Instrument unit.
    pub fn unit(&self) -> &str {
        self.unit.as_ref()
    }

    /// Instrument scope.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }
}

/// A builder for creating Stream objects.
///
/// # Example
///
/// ```
/// use opentelemetry_metrics_engine::{Aggregation, Stream};
///
/// let stream = Stream::builder()
///     .with_name("my_stream")
///     .with_aggregation(Aggregation::Sum)
///     .with_cardinality_limit(100)
///     .build()
///     .unwrap();
/// ```
#[derive(Default, Debug)]
pub struct StreamBuilder {
    name: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    unit: Option<Cow<'static, str>>,
    aggregation: Option<Aggregation>,
    allowed_attribute_keys: Option<Arc<HashSet<Key>>>,
    cardinality_limit: Option<usize>,
}

impl StreamBuilder {
    pub(crate) fn new() -> Self {
        StreamBuilder::default()
    }

    /// Set the stream name. If this is not set, the instrument name is used.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the stream description. If this is not set, the instrument description is used.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the stream unit. If this is not set, the instrument unit is used.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the stream aggregation.
    ///
    /// An aggregation incompatible with the matched instrument falls back to
    /// the instrument's default aggregation.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Set the stream allowed attribute keys.
    ///
    /// Any attribute recorded for the stream with a key not in this set will be
    /// dropped. If the set is empty, all attributes will be dropped.
    /// If this method is not used, all attributes will be kept.
    pub fn with_allowed_attribute_keys(
        mut self,
        attribute_keys: impl IntoIterator<Item = Key>,
    ) -> Self {
        self.allowed_attribute_keys = Some(Arc::new(attribute_keys.into_iter().collect()));
        self
    }

    /// Set the stream cardinality limit. If this is not set, the provider default is used.
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        self.cardinality_limit = Some(limit);
        self
    }

    /// Build a new Stream instance using the configuration in this builder.
    pub fn build(self) -> MetricResult<Stream> {
        if let Some(name) = &self.name {
            validate_instrument_name(name)?;
        }
        if let Some(unit) = &self.unit {
            validate_instrument_unit(unit)?;
        }
        if self.cardinality_limit == Some(0) {
            return Err(MetricError::Config(CARDINALITY_LIMIT_ZERO.into()));
        }
        if let Some(aggregation) = &self.aggregation {
            aggregation.validate()?;
        }

        Ok(Stream {
            name: self.name,
            description: self.description,
            unit: self.unit,
            aggregation: self.aggregation,
            allowed_attribute_keys: self.allowed_attribute_keys,
            cardinality_limit: self.cardinality_limit,
        })
    }
}

/// Describes the stream of data an instrument produces. Returned by views to
/// customize the metric output.
#[derive(Default, Debug, Clone)]
pub struct Stream {
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) description: Option<Cow<'static, str>>,
    pub(crate) unit: Option<Cow<'static, str>>,
    pub(crate) aggregation: Option<Aggregation>,
    /// `None` keeps every attribute, an empty set drops all of them.
    pub(crate) allowed_attribute_keys: Option<Arc<HashSet<Key>>>,
    pub(crate) cardinality_limit: Option<usize>,
}

impl Stream {
    /// Create a new stream builder with default values.
    pub fn builder() -> StreamBuilder {
        StreamBuilder::new()
    }
}

/// The identity of an output stream within a meter.
///
/// Two ids with the same name ignoring ASCII case that differ in any other
/// field are a conflict. Ids are compared with their original casing, so
/// `Requests` and `requests` get separate storages. Equal ids produced by two
/// different instruments also get separate storages and conflict.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct InstrumentId {
    pub(crate) name: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
    pub(crate) kind: InstrumentKind,
    pub(crate) unit: Cow<'static, str>,
    pub(crate) number: ValueKind,
    /// Point shape of the resolved aggregation.
    pub(crate) aggregation: &'static str,
}

impl InstrumentId {
    pub(crate) fn conflict_key(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}
