use std::f64::consts::LOG2_E;

use once_cell::sync::Lazy;
use opentelemetry::otel_warn;

use super::Number;

pub(crate) const EXPO_MAX_SCALE: i8 = 20;
pub(crate) const EXPO_MIN_SCALE: i8 = -10;

/// Parameters shared by every accumulation of one exponential histogram stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ExpoConfig {
    pub(crate) max_size: i32,
    pub(crate) max_scale: i8,
    pub(crate) record_min_max: bool,
    pub(crate) record_sum: bool,
}

/// The accumulation of one exponential histogram series.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ExpoHistogramDataPoint<T> {
    pub(crate) count: usize,
    pub(crate) min: T,
    pub(crate) max: T,
    pub(crate) sum: T,

    pub(crate) max_size: i32,
    pub(crate) record_min_max: bool,
    pub(crate) record_sum: bool,

    pub(crate) scale: i8,

    pub(crate) pos_buckets: ExpoBuckets,
    pub(crate) neg_buckets: ExpoBuckets,
    pub(crate) zero_count: u64,
}

impl<T: Number> ExpoHistogramDataPoint<T> {
    pub(crate) fn new(config: &ExpoConfig) -> Self {
        ExpoHistogramDataPoint {
            count: 0,
            min: T::max(),
            max: T::min(),
            sum: T::default(),
            max_size: config.max_size,
            record_min_max: config.record_min_max,
            record_sum: config.record_sum,
            scale: config.max_scale,
            pos_buckets: ExpoBuckets::default(),
            neg_buckets: ExpoBuckets::default(),
            zero_count: 0,
        }
    }

    /// Adds a new measurement to the histogram, rescaling the buckets if needed.
    ///
    /// Callers filter out NaN and infinite values.
    pub(crate) fn record(&mut self, v: T) {
        self.count += 1;

        if self.record_min_max {
            if v < self.min {
                self.min = v;
            }
            if v > self.max {
                self.max = v;
            }
        }
        if self.record_sum {
            self.sum = self.sum.wrapping_add(v);
        }

        let abs_v = v.into_float().abs();

        if abs_v == 0.0 {
            self.zero_count += 1;
            return;
        }

        let mut bin = self.get_bin(abs_v);

        let v_is_negative = v.is_negative();

        // If the new bin would make the counts larger than `max_size`, the
        // current measurements are downscaled first.
        let scale_delta = {
            let bucket = if v_is_negative {
                &self.neg_buckets
            } else {
                &self.pos_buckets
            };

            scale_change(
                self.max_size,
                bin,
                bucket.start_bin,
                bucket.counts.len() as i32,
            )
        };
        if scale_delta > 0 {
            if !self.downscale(scale_delta) {
                return;
            }
            bin = self.get_bin(abs_v);
        }

        if v_is_negative {
            self.neg_buckets.record(bin)
        } else {
            self.pos_buckets.record(bin)
        }
    }

    /// Lowers the scale by `delta`, returning `false` if that would go below the
    /// minimum scale.
    fn downscale(&mut self, delta: u32) -> bool {
        if (self.scale as i32 - delta as i32) < EXPO_MIN_SCALE as i32 {
            // With a scale of -10 there are only two buckets for the whole range of f64 values.
            // This can only happen if there is a max size of 1.
            otel_warn!(
                name: "ExponentialHistogram.ScaleUnderflow",
                message = "exponential histogram scale underflow, measurement dropped",
                scale = self.scale as i64,
                delta = delta as u64,
            );
            return false;
        }
        self.scale -= delta as i8;
        self.pos_buckets.downscale(delta);
        self.neg_buckets.downscale(delta);
        true
    }

    /// the bin `v` should be recorded into.
    fn get_bin(&self, v: f64) -> i32 {
        let (frac, exp) = frexp(v);
        if self.scale <= 0 {
            // With negative scale `frac` is always 1 power of two higher than we want.
            let mut correction = 1;
            if frac == 0.5 {
                // If `v` is an exact power of two, `frac` will be `0.5` and the exp
                // will be then be two higher than we want.
                correction = 2;
            }
            return (exp - correction) >> -self.scale;
        }
        (exp << self.scale) + (frac.ln() * SCALE_FACTORS[self.scale as usize]) as i32 - 1
    }

    /// Folds `other` in, first bringing both to a scale that holds the union
    /// of their bucket ranges within `max_size`.
    pub(crate) fn merge(&mut self, other: &Self) {
        if other.count == 0 {
            return;
        }
        let mut other = other.clone();
        if other.scale > self.scale {
            other.downscale((other.scale - self.scale) as u32);
        } else if self.scale > other.scale && !self.downscale((self.scale - other.scale) as u32) {
            return;
        }

        let delta = range_scale_change(self.max_size, &self.pos_buckets, &other.pos_buckets).max(
            range_scale_change(self.max_size, &self.neg_buckets, &other.neg_buckets),
        );
        if delta > 0 && !(self.downscale(delta) && other.downscale(delta)) {
            return;
        }

        self.pos_buckets.merge(&other.pos_buckets);
        self.neg_buckets.merge(&other.neg_buckets);
        self.zero_count += other.zero_count;
        self.count += other.count;
        self.sum = self.sum.wrapping_add(other.sum);
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
    }

    /// Subtracts an earlier state of the same series. The result has the
    /// newer scale; min and max are the newer ones.
    pub(crate) fn diff(&self, older: &Self) -> Self {
        let mut out = self.clone();
        let mut older = older.clone();
        if older.scale > out.scale {
            older.downscale((older.scale - out.scale) as u32);
        } else if out.scale > older.scale {
            out.downscale((out.scale - older.scale) as u32);
        }
        out.pos_buckets.subtract(&older.pos_buckets);
        out.neg_buckets.subtract(&older.neg_buckets);
        out.zero_count = out.zero_count.saturating_sub(older.zero_count);
        out.count = out.count.saturating_sub(older.count);
        out.sum = out.sum.saturating_delta(older.sum);
        out
    }
}

/// The magnitude of the scale change needed to fit bin in the bucket.
///
/// If no scale change is needed 0 is returned.
fn scale_change(max_size: i32, bin: i32, start_bin: i32, length: i32) -> u32 {
    if length == 0 {
        // No need to rescale if there are no buckets.
        return 0;
    }

    let mut low = start_bin;
    let mut high = bin;
    if start_bin >= bin {
        low = bin;
        high = start_bin + length - 1;
    }

    shrink_until_fits(max_size, low, high)
}

/// The scale change needed for one bucket range to cover both `a` and `b`.
fn range_scale_change(max_size: i32, a: &ExpoBuckets, b: &ExpoBuckets) -> u32 {
    match (a.end_bin(), b.end_bin()) {
        (Some(a_end), Some(b_end)) => shrink_until_fits(
            max_size,
            a.start_bin.min(b.start_bin),
            a_end.max(b_end),
        ),
        _ => 0,
    }
}

fn shrink_until_fits(max_size: i32, mut low: i32, mut high: i32) -> u32 {
    let mut count = 0u32;
    while high - low >= max_size {
        low >>= 1;
        high >>= 1;
        count += 1;

        if count > (EXPO_MAX_SCALE - EXPO_MIN_SCALE) as u32 {
            return count;
        }
    }
    count
}

/// Constants used in calculating the logarithm index.
static SCALE_FACTORS: Lazy<[f64; 21]> =
    Lazy::new(|| std::array::from_fn(|scale| LOG2_E * 2f64.powi(scale as i32)));

/// Breaks the number into a normalized fraction and a base-2 exponent.
///
/// std does not expose `frexp`.
#[inline(always)]
fn frexp(x: f64) -> (f64, i32) {
    let mut y = x.to_bits();
    let ee = ((y >> 52) & 0x7ff) as i32;

    if ee == 0 {
        if x != 0.0 {
            let x1p64 = f64::from_bits(0x43f0000000000000);
            let (x, e) = frexp(x * x1p64);
            return (x, e - 64);
        }
        return (x, 0);
    } else if ee == 0x7ff {
        return (x, 0);
    }

    let e = ee - 0x3fe;
    y &= 0x800fffffffffffff;
    y |= 0x3fe0000000000000;

    (f64::from_bits(y), e)
}

/// A contiguous run of bucket counts starting at `start_bin`.
#[derive(Clone, Default, Debug, PartialEq)]
pub(crate) struct ExpoBuckets {
    pub(crate) start_bin: i32,
    pub(crate) counts: Vec<u64>,
}

impl ExpoBuckets {
    fn end_bin(&self) -> Option<i32> {
        if self.counts.is_empty() {
            None
        } else {
            Some(self.start_bin + self.counts.len() as i32 - 1)
        }
    }

    /// Increments the count for the given bin, and expands the buckets if needed.
    ///
    /// Size changes must be done before calling this function.
    fn record(&mut self, bin: i32) {
        self.add(bin, 1);
    }

    fn add(&mut self, bin: i32, n: u64) {
        let Some(end_bin) = self.end_bin() else {
            self.counts = vec![n];
            self.start_bin = bin;
            return;
        };

        if bin < self.start_bin {
            let mut grown = vec![0; (end_bin - bin + 1) as usize];
            let shift = (self.start_bin - bin) as usize;
            grown[shift..].copy_from_slice(&self.counts);
            self.counts = grown;
            self.start_bin = bin;
        } else if bin > end_bin {
            self.counts.resize((bin - self.start_bin + 1) as usize, 0);
        }
        self.counts[(bin - self.start_bin) as usize] += n;
    }

    fn merge(&mut self, other: &ExpoBuckets) {
        for (i, n) in other.counts.iter().enumerate() {
            if *n > 0 {
                self.add(other.start_bin + i as i32, *n);
            }
        }
    }

    fn subtract(&mut self, other: &ExpoBuckets) {
        for (i, n) in other.counts.iter().enumerate() {
            let idx = other.start_bin + i as i32 - self.start_bin;
            if idx >= 0 {
                if let Some(count) = self.counts.get_mut(idx as usize) {
                    *count = count.saturating_sub(*n);
                }
            }
        }

        let leading = self.counts.iter().take_while(|c| **c == 0).count();
        if leading == self.counts.len() {
            self.counts.clear();
            return;
        }
        let trailing = self.counts.iter().rev().take_while(|c| **c == 0).count();
        self.counts.truncate(self.counts.len() - trailing);
        self.counts.drain(..leading);
        self.start_bin += leading as i32;
    }

    /// Shrinks a bucket by a factor of 2*s.
    ///
    /// It will sum counts into the correct lower resolution bucket.
    fn downscale(&mut self, delta: u32) {
        // Example
        // delta = 2
        // original offset: -6
        // counts: [ 3,  1,  2,  3,  4,  5, 6, 7, 8, 9, 10]
        // bins:    -6  -5, -4, -3, -2, -1, 0, 1, 2, 3, 4
        // new bins:-2, -2, -1, -1, -1, -1, 0, 0, 0, 0, 1
        // new offset: -2
        // new counts: [4, 14, 30, 10]

        if self.counts.len() <= 1 || delta < 1 {
            self.start_bin >>= delta;
            return;
        }

        let steps = 1 << delta;
        let mut offset = self.start_bin % steps;
        offset = (offset + steps) % steps; // to make offset positive
        for i in 1..self.counts.len() {
            let idx = i + offset as usize;
            if idx % steps as usize == 0 {
                self.counts[idx / steps as usize] = self.counts[i];
                continue;
            }
            self.counts[idx / steps as usize] += self.counts[i];
        }

        let last_idx = (self.counts.len() as i32 - 1 + offset) / steps;
        self.counts.truncate(last_idx as usize + 1);
        self.start_bin >>= delta;
    }
}
