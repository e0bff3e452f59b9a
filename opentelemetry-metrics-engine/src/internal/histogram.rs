use std::sync::Arc;

use super::Number;

/// Parameters shared by every accumulation of one explicit bucket histogram stream.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct HistogramConfig {
    pub(crate) bounds: Arc<[f64]>,
    pub(crate) record_min_max: bool,
    pub(crate) record_sum: bool,
}

impl HistogramConfig {
    pub(crate) fn new(mut bounds: Vec<f64>, record_min_max: bool, record_sum: bool) -> Self {
        bounds.retain(|v| !v.is_nan());
        bounds.sort_by(|a, b| a.total_cmp(b));
        bounds.dedup();
        HistogramConfig {
            bounds: bounds.into(),
            record_min_max,
            record_sum,
        }
    }

    /// The bucket `value` falls in.
    ///
    /// This search returns an index in the range `[0, bounds.len()]`, where it
    /// returns `bounds.len()` if value is greater than the last element of
    /// `bounds`. This aligns with the buckets in that the length of buckets is
    /// `bounds.len()+1`, with the last bucket representing
    /// `(bounds[bounds.len()-1], +∞)`.
    pub(crate) fn bucket_index(&self, value: f64) -> usize {
        self.bounds.partition_point(|&x| x < value)
    }
}

/// Count, sum, extremes and per-bucket counts, updated together.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Buckets<T> {
    pub(crate) counts: Vec<u64>,
    pub(crate) count: u64,
    pub(crate) total: T,
    pub(crate) min: T,
    pub(crate) max: T,
}

impl<T: Number> Buckets<T> {
    /// returns buckets with `n` bins.
    pub(crate) fn new(n: usize) -> Buckets<T> {
        Buckets {
            counts: vec![0; n],
            count: 0,
            total: T::default(),
            min: T::max(),
            max: T::min(),
        }
    }

    pub(crate) fn update(&mut self, value: T, config: &HistogramConfig) {
        let idx = config.bucket_index(value.into_float());
        self.counts[idx] += 1;
        self.count += 1;
        if config.record_sum {
            self.total = self.total.wrapping_add(value);
        }
        if config.record_min_max {
            if value < self.min {
                self.min = value;
            }
            if value > self.max {
                self.max = value;
            }
        }
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        for (c, o) in self.counts.iter_mut().zip(&other.counts) {
            *c += o;
        }
        self.count += other.count;
        self.total = self.total.wrapping_add(other.total);
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
    }

    pub(crate) fn diff(&self, older: &Self) -> Self {
        Buckets {
            counts: self
                .counts
                .iter()
                .zip(older.counts.iter().chain(std::iter::repeat(&0)))
                .map(|(n, o)| n.saturating_sub(*o))
                .collect(),
            count: self.count.saturating_sub(older.count),
            total: self.total.saturating_delta(older.total),
            min: self.min,
            max: self.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    fn config(bounds: &[f64]) -> HistogramConfig {
        HistogramConfig::new(bounds.to_vec(), true, true)
    }

    #[test]
    fn bucket_upper_bounds_are_inclusive() {
        let cfg = config(&[10.0, 25.0, 50.0]);
        let mut buckets = Buckets::new(cfg.bounds.len() + 1);
        for v in [5u64, 15, 25, 35] {
            buckets.update(v, &cfg);
        }

        assert_eq!(buckets.counts, vec![1, 2, 1, 0]);
        assert_eq!(buckets.count, 4);
        assert_eq!(buckets.total, 80);
        assert_eq!(buckets.min, 5);
        assert_eq!(buckets.max, 35);
    }

    #[test]
    fn out_of_range_values_use_edge_buckets() {
        let cfg = config(&[0.0, 10.0]);
        assert_eq!(cfg.bucket_index(f64::NEG_INFINITY), 0);
        assert_eq!(cfg.bucket_index(0.0), 0);
        assert_eq!(cfg.bucket_index(0.1), 1);
        assert_eq!(cfg.bucket_index(10.0), 1);
        assert_eq!(cfg.bucket_index(f64::INFINITY), 2);
    }

    #[test]
    fn unsorted_bounds_are_normalized() {
        let cfg = HistogramConfig::new(vec![25.0, f64::NAN, 10.0, 10.0], false, true);
        assert_eq!(&*cfg.bounds, &[10.0, 25.0]);
    }

    #[test]
    fn record_sum_disabled_keeps_zero_total() {
        let cfg = HistogramConfig::new(vec![1.0], true, false);
        let mut buckets = Buckets::new(2);
        buckets.update(-4i64, &cfg);
        assert_eq!(buckets.total, 0);
        assert_eq!(buckets.min, -4);
    }

    #[test]
    fn bucket_count_matches_bounds_for_random_values() {
        let cfg = config(&[1.0, 2.0, 5.0, 10.0, 100.0]);
        let mut buckets = Buckets::new(cfg.bounds.len() + 1);
        let mut rng = rand::rng();
        let values: Vec<f64> = (0..1000).map(|_| rng.random_range(-10.0..200.0)).collect();
        for v in &values {
            buckets.update(*v, &cfg);
        }

        for (i, count) in buckets.counts.iter().enumerate() {
            let lower = if i == 0 { f64::NEG_INFINITY } else { cfg.bounds[i - 1] };
            let upper = cfg.bounds.get(i).copied().unwrap_or(f64::INFINITY);
            let expected = values.iter().filter(|v| **v > lower && **v <= upper).count();
            assert_eq!(*count as usize, expected, "bucket {i}");
        }
        assert_eq!(buckets.count, 1000);
    }

    #[test]
    fn merge_then_diff_recovers_the_newer_part() {
        let cfg = config(&[10.0, 20.0]);
        let mut older = Buckets::new(3);
        older.update(5.0, &cfg);
        older.update(15.0, &cfg);
        let mut recent = Buckets::new(3);
        recent.update(25.0, &cfg);
        recent.update(5.0, &cfg);

        let mut newer = older.clone();
        newer.merge(&recent);
        let delta = newer.diff(&older);
        assert_eq!(delta.counts, vec![1, 0, 1]);
        assert_eq!(delta.count, 2);
        assert_eq!(delta.total, 30.0);
    }
}
