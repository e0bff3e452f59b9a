use super::Number;

/// Count, sum, min and max without any buckets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct SummaryState<T> {
    pub(crate) count: u64,
    pub(crate) sum: T,
    pub(crate) min: T,
    pub(crate) max: T,
}

impl<T: Number> Default for SummaryState<T> {
    fn default() -> Self {
        SummaryState {
            count: 0,
            sum: T::default(),
            min: T::max(),
            max: T::min(),
        }
    }
}

impl<T: Number> SummaryState<T> {
    pub(crate) fn update(&mut self, value: T) {
        self.count += 1;
        self.sum = self.sum.wrapping_add(value);
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        self.count += other.count;
        self.sum = self.sum.wrapping_add(other.sum);
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
    }

    /// Extremes cannot be subtracted; the newer ones are kept.
    pub(crate) fn diff(&self, older: &Self) -> Self {
        SummaryState {
            count: self.count.saturating_sub(older.count),
            sum: self.sum.saturating_delta(older.sum),
            min: self.min,
            max: self.max,
        }
    }
}
