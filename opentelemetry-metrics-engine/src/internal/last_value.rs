use std::time::SystemTime;

use super::Number;

/// The latest value written and when it was written.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct LastValueState<T> {
    pub(crate) value: T,
    pub(crate) time: SystemTime,
}

impl<T: Number> Default for LastValueState<T> {
    fn default() -> Self {
        LastValueState {
            value: T::default(),
            time: SystemTime::UNIX_EPOCH,
        }
    }
}

impl<T: Number> LastValueState<T> {
    pub(crate) fn update(&mut self, value: T) {
        self.value = value;
        self.time = SystemTime::now();
    }

    /// Keeps whichever write happened last.
    pub(crate) fn merge(&mut self, other: &Self) {
        if other.time >= self.time {
            *self = *other;
        }
    }

    /// Delta is not meaningful for a last value, the newer one is reported as is.
    pub(crate) fn diff(&self, _older: &Self) -> Self {
        *self
    }
}
