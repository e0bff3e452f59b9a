//! Self-observability counters for problems that never surface as errors.
//!
//! Recording paths never fail. Anything that would otherwise be an error is
//! logged through the `otel_*` macros and counted here so tests and
//! operators can observe it.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    invalid_measurements: AtomicU64,
    dropped_measurements: AtomicU64,
    duplicate_definitions: AtomicU64,
    incompatible_aggregations: AtomicU64,
    callback_failures: AtomicU64,
}

impl Diagnostics {
    /// A measurement rejected by its aggregation (negative on a monotonic sum, NaN).
    pub(crate) fn invalid_measurement(&self) {
        self.invalid_measurements.fetch_add(1, Ordering::Relaxed);
    }

    /// A measurement that never reached an aggregation.
    pub(crate) fn dropped_measurement(&self) {
        self.dropped_measurements.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn duplicate_definition(&self) {
        self.duplicate_definitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incompatible_aggregation(&self) {
        self.incompatible_aggregations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            invalid_measurements: self.invalid_measurements.load(Ordering::Relaxed),
            dropped_measurements: self.dropped_measurements.load(Ordering::Relaxed),
            duplicate_definitions: self.duplicate_definitions.load(Ordering::Relaxed),
            incompatible_aggregations: self.incompatible_aggregations.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the diagnostic counters of a meter provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct DiagnosticsSnapshot {
    /// Measurements discarded because the aggregation rejected the value.
    pub invalid_measurements: u64,
    /// Observations discarded before aggregation because they were made
    /// outside a callback window or through a handle the callback may not use.
    /// Records made after shutdown are silent no-ops and are not counted.
    pub dropped_measurements: u64,
    /// Unique pairs of conflicting metric stream definitions.
    pub duplicate_definitions: u64,
    /// Aggregation overrides that were incompatible with the instrument kind.
    pub incompatible_aggregations: u64,
    /// Callbacks that panicked during a collection.
    pub callback_failures: u64,
}
