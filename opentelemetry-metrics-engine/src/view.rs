use std::borrow::Cow;

use regex::Regex;

use crate::error::MetricResult;
use crate::instrument::{Instrument, InstrumentKind, Stream};

/// Used to customize the metrics that are output by the engine.
///
/// Here are some examples when a [View] might be needed:
///
/// * Customize which instruments are to be processed/ignored. For example, an
///   instrumented library can provide both temperature and humidity, but the
///   application developer might only want temperature.
/// * Customize the aggregation - if the default aggregation associated with the
///   [Instrument] does not meet the needs of the user. For example, an HTTP client
///   library might expose HTTP client request duration as Histogram by default,
///   but the application developer might only want the total count of outgoing
///   requests.
/// * Customize which attribute(s) are to be reported on metrics.
///
/// Every view that matches an instrument produces its own output stream.
///
/// # Example Custom View
///
/// View is implemented for all `Fn(&Instrument) -> Option<Stream>`.
///
/// ```
/// use opentelemetry_metrics_engine::{Instrument, SdkMeterProvider, Stream};
///
/// // return streams for the given instrument
/// let my_view = |i: &Instrument| {
///   // return Some(Stream) or
///   None
/// };
///
/// let provider = SdkMeterProvider::builder().with_view(my_view).build();
/// # drop(provider)
/// ```
pub trait View: Send + Sync + 'static {
    /// Defines how data should be collected for certain instruments.
    ///
    /// Return [Stream] to use for matching [Instrument]s,
    /// otherwise if there is no match, return `None`.
    fn match_inst(&self, inst: &Instrument) -> Option<Stream>;
}

impl<T> View for T
where
    T: Fn(&Instrument) -> Option<Stream> + Send + Sync + 'static,
{
    fn match_inst(&self, inst: &Instrument) -> Option<Stream> {
        self(inst)
    }
}

impl View for Box<dyn View> {
    fn match_inst(&self, inst: &Instrument) -> Option<Stream> {
        (**self).match_inst(inst)
    }
}

#[derive(Debug, Clone)]
enum NameMatcher {
    Exact(Cow<'static, str>),
    Regex(Regex),
}

impl NameMatcher {
    fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Exact(expected) => expected == name,
            NameMatcher::Regex(re) => re.is_match(name),
        }
    }
}

/// Criteria a [View] created by [new_view] matches instruments with.
///
/// Every field that is set must match; unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct InstrumentSelector {
    name: Option<NameMatcher>,
    kind: Option<InstrumentKind>,
    meter_name: Option<Cow<'static, str>>,
    meter_version: Option<Cow<'static, str>>,
    meter_schema_url: Option<Cow<'static, str>>,
}

impl InstrumentSelector {
    /// Match instruments named exactly `name`.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(NameMatcher::Exact(name.into()));
        self
    }

    /// Match instrument names against a regular expression.
    ///
    /// The pattern must match the whole name.
    pub fn with_name_pattern(mut self, pattern: &str) -> MetricResult<Self> {
        let re = Regex::new(&format!("^(?:{pattern})$"))?;
        self.name = Some(NameMatcher::Regex(re));
        Ok(self)
    }

    /// Match instruments of this kind.
    pub fn with_kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Match instruments created by meters with this name.
    pub fn with_meter_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.meter_name = Some(name.into());
        self
    }

    /// Match instruments created by meters with this version.
    pub fn with_meter_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.meter_version = Some(version.into());
        self
    }

    /// Match instruments created by meters with this schema url.
    pub fn with_meter_schema_url(mut self, schema_url: impl Into<Cow<'static, str>>) -> Self {
        self.meter_schema_url = Some(schema_url.into());
        self
    }

    fn matches(&self, inst: &Instrument) -> bool {
        self.name.as_ref().map_or(true, |m| m.matches(inst.name()))
            && self.kind.map_or(true, |k| k == inst.kind())
            && self
                .meter_name
                .as_ref()
                .map_or(true, |n| n.as_ref() == inst.scope().name())
            && self
                .meter_version
                .as_ref()
                .map_or(true, |v| Some(v.as_ref()) == inst.scope().version())
            && self
                .meter_schema_url
                .as_ref()
                .map_or(true, |s| Some(s.as_ref()) == inst.scope().schema_url())
    }
}

/// Creates a [View] that applies the [Stream] mask for instruments matching
/// `selector`.
///
/// Fields set on the mask replace the matching instrument's. An aggregation
/// that is invalid on its own is rejected here; one that is merely
/// incompatible with a matched instrument falls back at resolution time.
///
/// # Example
///
/// ```
/// use opentelemetry_metrics_engine::{new_view, Aggregation, InstrumentSelector, Stream};
///
/// let selector = InstrumentSelector::default().with_name_pattern("http\\..*").unwrap();
/// let mask = Stream::builder().with_aggregation(Aggregation::Summary).build().unwrap();
/// let view = new_view(selector, mask).unwrap();
/// # drop(view)
/// ```
pub fn new_view(selector: InstrumentSelector, mask: Stream) -> MetricResult<Box<dyn View>> {
    if let Some(aggregation) = &mask.aggregation {
        aggregation.validate()?;
    }

    Ok(Box::new(move |inst: &Instrument| -> Option<Stream> {
        if !selector.matches(inst) {
            return None;
        }
        Some(Stream {
            name: Some(mask.name.clone().unwrap_or_else(|| inst.name.clone())),
            description: Some(
                mask.description
                    .clone()
                    .unwrap_or_else(|| inst.description.clone()),
            ),
            unit: Some(mask.unit.clone().unwrap_or_else(|| inst.unit.clone())),
            aggregation: mask.aggregation.clone(),
            allowed_attribute_keys: mask.allowed_attribute_keys.clone(),
            cardinality_limit: mask.cardinality_limit,
        })
    }))
}
