use super::Number;

/// Running total of a sum aggregation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct SumState<T> {
    pub(crate) total: T,
}

impl<T: Number> SumState<T> {
    pub(crate) fn update(&mut self, value: T) {
        self.total = self.total.wrapping_add(value);
    }

    /// Replaces the total with an observed cumulative value.
    pub(crate) fn assign(&mut self, value: T) {
        self.total = value;
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        self.total = self.total.wrapping_add(other.total);
    }

    /// A monotonic total that went down was reset, so the newer total is the
    /// whole delta.
    pub(crate) fn diff(&self, older: &Self, monotonic: bool) -> Self {
        if monotonic && self.total < older.total {
            return *self;
        }
        SumState {
            total: self.total.saturating_delta(older.total),
        }
    }
}
