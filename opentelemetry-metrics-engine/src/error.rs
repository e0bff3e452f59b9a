use std::result;
use std::sync::PoisonError;
use thiserror::Error;

/// A specialized `Result` type for metric operations.
pub type MetricResult<T> = result::Result<T, MetricError>;

/// Errors returned while configuring or collecting metrics.
///
/// Recording a measurement never returns an error: invalid or dropped
/// measurements are reported through internal logs and the provider's
/// [diagnostics](crate::SdkMeterProvider::diagnostics).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetricError {
    /// Other errors not covered by specific cases.
    #[error("Metrics error: {0}")]
    Other(String),
    /// Invalid configuration
    #[error("Config error {0}")]
    Config(String),
    /// Invalid instrument configuration such invalid instrument name, invalid
    /// instrument unit, or a value kind the instrument kind does not support.
    #[error("Invalid instrument configuration: {0}")]
    InvalidInstrumentConfiguration(&'static str),
    /// The meter provider or reader was already shut down.
    #[error("metrics pipeline is already shut down")]
    AlreadyShutdown,
}

impl<T> From<PoisonError<T>> for MetricError {
    fn from(err: PoisonError<T>) -> Self {
        MetricError::Other(err.to_string())
    }
}

impl From<regex::Error> for MetricError {
    fn from(err: regex::Error) -> Self {
        MetricError::Config(format!("invalid instrument name pattern: {err}"))
    }
}
