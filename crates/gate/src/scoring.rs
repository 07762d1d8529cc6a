//! Range-checked weighted score aggregation.
//!
//! The ordering here is the whole point: every component is validated against
//! the declared range *before* any arithmetic happens, and the aggregate is
//! re-validated afterwards. Aggregating first and discovering an out-of-range
//! result after the fact is the defect class this module exists to prevent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------

/// The inclusive range every subscore and the aggregate must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
}

impl ScoreRange {
    /// Creates a range, returning `None` unless `min <= max` and both are finite.
    #[must_use]
    pub fn new(min: f64, max: f64) -> Option<Self> {
        if min.is_finite() && max.is_finite() && min <= max {
            Some(Self { min, max })
        } else {
            None
        }
    }

    /// Returns `true` if `value` is finite and within the range.
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// One `(weight, subscore)` input pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedScore {
    /// Non-negative weight. Weights need not sum to one; the mean divides by
    /// the actual total.
    pub weight: f64,
    /// The component score, which must lie in the aggregator's range.
    pub score: f64,
}

// ---------------------------------------------------------------------------

/// Errors from [`ScoringAggregator::aggregate`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// At least one subscore lies outside the declared range. Reported
    /// *before* any aggregation; `offenders` lists every out-of-range
    /// component by input index.
    #[error("{} subscore(s) outside [{min}, {max}]: {offenders:?}", .offenders.len())]
    ComponentOutOfRange {
        /// `(index, value)` for every offending component.
        offenders: Vec<(usize, f64)>,
        /// Declared lower bound.
        min: f64,
        /// Declared upper bound.
        max: f64,
    },

    /// A weight is negative or non-finite.
    #[error("invalid weight {weight} at index {index}")]
    InvalidWeight {
        /// Input index of the offending pair.
        index: usize,
        /// The offending weight.
        weight: f64,
    },

    /// No components, or all weights are zero; there is nothing to average.
    #[error("total weight is zero")]
    ZeroTotalWeight,

    /// The weighted mean itself fell outside the range. With in-range
    /// components and non-negative weights this indicates a logic error, but
    /// it is still re-checked rather than assumed.
    #[error("aggregate {value} outside [{min}, {max}]")]
    AggregateOutOfRange {
        /// The computed aggregate.
        value: f64,
        /// Declared lower bound.
        min: f64,
        /// Declared upper bound.
        max: f64,
    },
}

// ---------------------------------------------------------------------------

/// Computes range-validated weighted means.
#[derive(Debug, Clone, Copy)]
pub struct ScoringAggregator {
    range: ScoreRange,
}

impl ScoringAggregator {
    /// Creates an aggregator over the given valid range.
    pub fn new(range: ScoreRange) -> Self {
        Self { range }
    }

    /// Validates every component, then computes the weighted mean, then
    /// validates the result — in that order, unconditionally.
    pub fn aggregate(&self, components: &[WeightedScore]) -> Result<f64, ScoringError> {
        // 1. Reject bad inputs outright, before computing anything.
        let offenders: Vec<(usize, f64)> = components
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.range.contains(c.score))
            .map(|(i, c)| (i, c.score))
            .collect();
        if !offenders.is_empty() {
            return Err(ScoringError::ComponentOutOfRange {
                offenders,
                min: self.range.min,
                max: self.range.max,
            });
        }
        for (index, c) in components.iter().enumerate() {
            if !c.weight.is_finite() || c.weight < 0.0 {
                return Err(ScoringError::InvalidWeight {
                    index,
                    weight: c.weight,
                });
            }
        }

        // 2. Aggregate.
        let total_weight: f64 = components.iter().map(|c| c.weight).sum();
        if total_weight <= 0.0 {
            return Err(ScoringError::ZeroTotalWeight);
        }
        let value = components
            .iter()
            .map(|c| c.weight * c.score)
            .sum::<f64>()
            / total_weight;

        // 3. Re-validate the aggregate.
        if !self.range.contains(value) {
            return Err(ScoringError::AggregateOutOfRange {
                value,
                min: self.range.min,
                max: self.range.max,
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percent() -> ScoringAggregator {
        ScoringAggregator::new(ScoreRange::new(0.0, 100.0).unwrap())
    }

    fn pairs(raw: &[(f64, f64)]) -> Vec<WeightedScore> {
        raw.iter()
            .map(|&(weight, score)| WeightedScore { weight, score })
            .collect()
    }

    #[test]
    fn equal_weights_average_to_the_mean() {
        let value = percent().aggregate(&pairs(&[(0.5, 80.0), (0.5, 60.0)])).unwrap();
        assert!((value - 70.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_subscore_is_rejected_before_aggregation() {
        let err = percent()
            .aggregate(&pairs(&[(0.5, 150.0), (0.5, 60.0)]))
            .unwrap_err();
        match err {
            ScoringError::ComponentOutOfRange { offenders, .. } => {
                assert_eq!(offenders, vec![(0, 150.0)]);
            }
            other => panic!("expected component rejection, got {other}"),
        }
    }

    #[test]
    fn every_offending_component_is_reported() {
        let err = percent()
            .aggregate(&pairs(&[(1.0, -3.0), (1.0, 50.0), (1.0, 101.0)]))
            .unwrap_err();
        match err {
            ScoringError::ComponentOutOfRange { offenders, .. } => {
                assert_eq!(offenders, vec![(0, -3.0), (2, 101.0)]);
            }
            other => panic!("expected component rejection, got {other}"),
        }
    }

    #[test]
    fn weights_need_not_sum_to_one() {
        let value = percent().aggregate(&pairs(&[(2.0, 90.0), (6.0, 50.0)])).unwrap();
        assert!((value - 60.0).abs() < 1e-9);
    }

    #[test]
    fn negative_weight_is_rejected() {
        let err = percent()
            .aggregate(&pairs(&[(-1.0, 50.0), (2.0, 50.0)]))
            .unwrap_err();
        assert!(matches!(err, ScoringError::InvalidWeight { index: 0, .. }));
    }

    #[test]
    fn empty_or_zero_weighted_input_is_rejected() {
        assert!(matches!(
            percent().aggregate(&[]),
            Err(ScoringError::ZeroTotalWeight)
        ));
        assert!(matches!(
            percent().aggregate(&pairs(&[(0.0, 50.0)])),
            Err(ScoringError::ZeroTotalWeight)
        ));
    }

    #[test]
    fn nan_score_never_reaches_arithmetic() {
        let err = percent()
            .aggregate(&pairs(&[(1.0, f64::NAN)]))
            .unwrap_err();
        assert!(matches!(err, ScoringError::ComponentOutOfRange { .. }));
    }
}
