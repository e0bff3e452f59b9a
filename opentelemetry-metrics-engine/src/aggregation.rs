use std::fmt;

use crate::error::{MetricError, MetricResult};
use crate::instrument::{validate_bucket_boundaries, InstrumentKind};
use crate::internal::{EXPO_MAX_SCALE, EXPO_MIN_SCALE};

/// The bucket ladder used when neither a view, a reader nor advice supplies
/// boundaries and the provider was not configured with its own.
pub const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// The way recorded measurements are summarized.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Aggregation {
    /// An aggregation that drops all recorded data.
    Drop,

    /// An aggregation that uses the default instrument kind selection mapping to
    /// select another aggregation.
    ///
    /// A reader returning this from its aggregation selector leaves the choice
    /// to views, advice and the kind default.
    Default,

    /// An aggregation that summarizes a set of measurements as their arithmetic
    /// sum.
    Sum,

    /// An aggregation that summarizes a set of measurements as the last one made.
    LastValue,

    /// An aggregation that summarizes a set of measurements as a histogram with
    /// explicitly defined buckets.
    ExplicitBucketHistogram {
        /// The increasing bucket boundary values.
        ///
        /// Boundary values define bucket upper bounds. Buckets are exclusive of their
        /// lower boundary and inclusive of their upper bound (except at positive
        /// infinity). Boundaries defined as `vec![0.0, 5.0, 10.0]` define these
        /// buckets:
        ///
        /// (-∞, 0], (0, 5.0], (5.0, 10.0], (10.0, +∞)
        boundaries: Vec<f64>,

        /// Whether to record the min and max of the distribution.
        record_min_max: bool,
    },

    /// An aggregation that summarizes a set of measurements as a histogram with
    /// bucket widths that grow exponentially.
    Base2ExponentialHistogram {
        /// The maximum number of buckets to use for the histogram.
        max_size: u32,

        /// The maximum resolution scale to use for the histogram.
        ///
        /// The maximum value is `20`, the minimum value is `-10` in which case
        /// only two buckets cover the whole `f64` range.
        max_scale: i8,

        /// Whether to record the min and max of the distribution.
        record_min_max: bool,
    },

    /// Count, sum, min and max of the measurements, without buckets.
    Summary,
}

impl Aggregation {
    /// Exponential histogram with 160 buckets and the maximum scale.
    pub fn base2_exponential_histogram() -> Self {
        Aggregation::Base2ExponentialHistogram {
            max_size: 160,
            max_scale: EXPO_MAX_SCALE,
            record_min_max: true,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Aggregation::Drop => "Drop",
            Aggregation::Default => "Default",
            Aggregation::Sum => "Sum",
            Aggregation::LastValue => "LastValue",
            Aggregation::ExplicitBucketHistogram { .. } => "ExplicitBucketHistogram",
            Aggregation::Base2ExponentialHistogram { .. } => "Base2ExponentialHistogram",
            Aggregation::Summary => "Summary",
        }
    }

    /// Validate that this aggregation has correct configuration
    pub fn validate(&self) -> MetricResult<()> {
        match self {
            Aggregation::Drop
            | Aggregation::Default
            | Aggregation::Sum
            | Aggregation::LastValue
            | Aggregation::Summary => Ok(()),
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                validate_bucket_boundaries(boundaries).map_err(|err| {
                    MetricError::Config(format!(
                        "aggregation: explicit bucket histogram: {boundaries:?}: {err}"
                    ))
                })
            }
            Aggregation::Base2ExponentialHistogram {
                max_size,
                max_scale,
                ..
            } => {
                if *max_scale > EXPO_MAX_SCALE {
                    return Err(MetricError::Config(format!(
                        "aggregation: exponential histogram: max scale ({max_scale}) is greater than {EXPO_MAX_SCALE}"
                    )));
                }
                if *max_scale < EXPO_MIN_SCALE {
                    return Err(MetricError::Config(format!(
                        "aggregation: exponential histogram: max scale ({max_scale}) is less than {EXPO_MIN_SCALE}"
                    )));
                }
                if *max_size < 2 {
                    return Err(MetricError::Config(format!(
                        "aggregation: exponential histogram: max size ({max_size}) must be at least 2"
                    )));
                }

                Ok(())
            }
        }
    }

    /// Checks if the aggregation can be used by an instrument of `kind`.
    ///
    /// | Instrument Kind          | Drop | LastValue | Sum | Histograms | Summary |
    /// |--------------------------|------|-----------|-----|------------|---------|
    /// | Counter                  | ✓    |           | ✓   | ✓          | ✓       |
    /// | UpDownCounter            | ✓    |           | ✓   | ✓          | ✓       |
    /// | Histogram                | ✓    |           | ✓   | ✓          | ✓       |
    /// | Observable Counter       | ✓    |           | ✓   | ✓          | ✓       |
    /// | Observable UpDownCounter | ✓    |           | ✓   | ✓          | ✓       |
    /// | Gauge                    | ✓    | ✓         |     |            |         |
    /// | Observable Gauge         | ✓    | ✓         |     |            |         |
    pub(crate) fn is_compatible(&self, kind: InstrumentKind) -> bool {
        let gauge = matches!(kind, InstrumentKind::Gauge | InstrumentKind::ObservableGauge);
        match self {
            Aggregation::Drop | Aggregation::Default => true,
            Aggregation::LastValue => gauge,
            Aggregation::Sum
            | Aggregation::ExplicitBucketHistogram { .. }
            | Aggregation::Base2ExponentialHistogram { .. }
            | Aggregation::Summary => !gauge,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // used for stream id comparisons
        f.write_str(self.name())
    }
}
