mod aggregator;
mod exponential_histogram;
mod histogram;
mod last_value;
mod observable;
mod storage;
mod sum;
mod summary;

use core::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::data::AggregatedMetrics;
use crate::instrument::ValueKind;

pub(crate) use aggregator::{Accumulation, Aggregator};
pub(crate) use exponential_histogram::{ExpoConfig, EXPO_MAX_SCALE, EXPO_MIN_SCALE};
pub(crate) use histogram::HistogramConfig;
pub(crate) use observable::ObservableStorage;
pub(crate) use storage::{Slot, SyncStorage};

/// Produces the data of one stream for one collection.
pub(crate) trait ComputeAggregation: Send + Sync + 'static {
    /// `None` when the stream has no points to report.
    fn call(&self) -> Option<AggregatedMetrics>;
}

mod private {
    pub trait Sealed {}
    impl Sealed for u64 {}
    impl Sealed for i64 {}
    impl Sealed for f64 {}
}

/// The numeric types instruments can record: `u64`, `i64` and `f64`.
pub trait Number:
    private::Sealed
    + Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + PartialOrd
    + fmt::Debug
    + Clone
    + Copy
    + PartialEq
    + Default
    + Send
    + Sync
    + 'static
{
    /// The [ValueKind] an instrument of this number type records.
    const KIND: ValueKind;

    #[doc(hidden)]
    fn min() -> Self;
    #[doc(hidden)]
    fn max() -> Self;
    #[doc(hidden)]
    fn into_float(self) -> f64;
    #[doc(hidden)]
    fn is_negative(self) -> bool {
        self < Self::default()
    }
    #[doc(hidden)]
    fn is_nan(self) -> bool {
        false
    }
    /// `self - other`, clamped for integers.
    #[doc(hidden)]
    fn saturating_delta(self, other: Self) -> Self;
    /// `self + other`, wrapping around for integers.
    #[doc(hidden)]
    fn wrapping_add(self, other: Self) -> Self;
}

impl Number for i64 {
    const KIND: ValueKind = ValueKind::I64;

    fn min() -> Self {
        i64::MIN
    }

    fn max() -> Self {
        i64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }

    fn saturating_delta(self, other: Self) -> Self {
        self.saturating_sub(other)
    }

    fn wrapping_add(self, other: Self) -> Self {
        i64::wrapping_add(self, other)
    }
}

impl Number for u64 {
    const KIND: ValueKind = ValueKind::U64;

    fn min() -> Self {
        u64::MIN
    }

    fn max() -> Self {
        u64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }

    fn saturating_delta(self, other: Self) -> Self {
        self.saturating_sub(other)
    }

    fn wrapping_add(self, other: Self) -> Self {
        u64::wrapping_add(self, other)
    }
}

impl Number for f64 {
    const KIND: ValueKind = ValueKind::F64;

    fn min() -> Self {
        f64::MIN
    }

    fn max() -> Self {
        f64::MAX
    }

    fn into_float(self) -> f64 {
        self
    }

    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }

    fn saturating_delta(self, other: Self) -> Self {
        self - other
    }

    fn wrapping_add(self, other: Self) -> Self {
        self + other
    }
}

pub(crate) struct AggregateTime {
    pub(crate) start: SystemTime,
    pub(crate) current: SystemTime,
}

/// Tracks the start time reported for a stream.
///
/// Delta collections move the start forward to the collection time,
/// cumulative ones keep the creation time.
pub(crate) struct AggregateTimeInitiator(Mutex<SystemTime>);

impl AggregateTimeInitiator {
    pub(crate) fn delta(&self) -> AggregateTime {
        let current_time = SystemTime::now();
        let start_time = self
            .0
            .lock()
            .map(|mut start| std::mem::replace(&mut *start, current_time))
            .unwrap_or(current_time);
        AggregateTime {
            start: start_time,
            current: current_time,
        }
    }

    pub(crate) fn cumulative(&self) -> AggregateTime {
        let current_time = SystemTime::now();
        let start_time = self.0.lock().map(|start| *start).unwrap_or(current_time);
        AggregateTime {
            start: start_time,
            current: current_time,
        }
    }
}

impl Default for AggregateTimeInitiator {
    fn default() -> Self {
        Self(Mutex::new(SystemTime::now()))
    }
}
