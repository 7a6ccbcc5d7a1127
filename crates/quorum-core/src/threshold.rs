//! Threshold fractions and quorum math

use serde::{Deserialize, Serialize};

use crate::error::{QuorumError, Result};

/// A fraction `numerator / denominator` in `(0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub numerator: u64,
    pub denominator: u64,
}

impl Threshold {
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.denominator == 0 {
            return Err(QuorumError::Validation(
                "threshold denominator must be >0".to_string(),
            ));
        }
        if self.numerator == 0 || self.numerator > self.denominator {
            return Err(QuorumError::Validation(format!(
                "threshold {} must be in (0, 1]",
                self
            )));
        }
        Ok(())
    }

    /// `weight` strictly passes this threshold of `total`
    pub fn is_met(&self, weight: u64, total: u64) -> bool {
        weight as u128 * self.denominator as u128 > total as u128 * self.numerator as u128
    }

    /// Smallest weight `w` with `w / total >= numerator / denominator`
    pub fn min_passing_weight(&self, total: u64) -> u64 {
        let scaled = total as u128 * self.numerator as u128;
        let denominator = self.denominator.max(1) as u128;
        let min = scaled.div_ceil(denominator);
        u64::try_from(min).unwrap_or(u64::MAX)
    }

    /// Compare the fractions, not their representations
    pub fn less_than(&self, other: &Threshold) -> bool {
        (self.numerator as u128 * other.denominator as u128)
            < (other.numerator as u128 * self.denominator as u128)
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_passing_weight_rounds_up() {
        let two_thirds = Threshold::new(2, 3);
        assert_eq!(two_thirds.min_passing_weight(6), 4);
        assert_eq!(two_thirds.min_passing_weight(7), 5);
        assert_eq!(Threshold::new(1, 2).min_passing_weight(10), 5);
    }

    #[test]
    fn test_is_met_is_strict() {
        let half = Threshold::new(1, 2);
        assert!(!half.is_met(5, 10));
        assert!(half.is_met(6, 10));
    }

    #[test]
    fn test_ordering_across_denominators() {
        assert!(Threshold::new(60, 100).less_than(&Threshold::new(80, 100)));
        assert!(Threshold::new(60, 100).less_than(&Threshold::new(2, 3)));
        assert!(!Threshold::new(3, 5).less_than(&Threshold::new(6, 10)));
    }

    #[test]
    fn test_validate() {
        assert!(Threshold::new(0, 1).validate().is_err());
        assert!(Threshold::new(2, 1).validate().is_err());
        assert!(Threshold::new(1, 0).validate().is_err());
        assert!(Threshold::new(1, 1).validate().is_ok());
    }
}
