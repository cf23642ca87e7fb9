//! Batch sizing by raster pixel count.

use serde::{Deserialize, Serialize};

use crate::ZonalError;

/// Rasters with more than `min_pixels` pixels use `batch_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchThreshold {
    /// Exclusive lower bound on the pixel count.
    pub min_pixels: u64,
    /// Regions per batch above that bound.
    pub batch_size: usize,
}

/// How regions are partitioned and how often scratch memory is reclaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPolicy {
    /// Pixel-count thresholds, any order.
    pub thresholds: Vec<BatchThreshold>,
    /// Batch size when no threshold is exceeded.
    pub default_batch_size: usize,
    /// Reclaim after this many regions within a batch.
    pub reclaim_every: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            thresholds: vec![
                BatchThreshold {
                    min_pixels: 1_000_000_000,
                    batch_size: 2,
                },
                BatchThreshold {
                    min_pixels: 500_000_000,
                    batch_size: 3,
                },
                BatchThreshold {
                    min_pixels: 100_000_000,
                    batch_size: 5,
                },
            ],
            default_batch_size: 10,
            reclaim_every: 3,
        }
    }
}

impl BatchPolicy {
    /// Checks that every size is positive and that larger rasters never get
    /// larger batches.
    ///
    /// # Errors
    ///
    /// Returns [`ZonalError::InvalidPolicy`] describing the first violation.
    pub fn validate(&self) -> Result<(), ZonalError> {
        if self.default_batch_size == 0 || self.thresholds.iter().any(|t| t.batch_size == 0) {
            return Err(ZonalError::InvalidPolicy {
                message: "batch sizes must be at least 1".to_string(),
            });
        }
        if self.reclaim_every == 0 {
            return Err(ZonalError::InvalidPolicy {
                message: "reclaim_every must be at least 1".to_string(),
            });
        }

        let sorted = self.sorted_thresholds();
        let mut previous = self.default_batch_size;
        for threshold in sorted.iter().rev() {
            if threshold.batch_size > previous {
                return Err(ZonalError::InvalidPolicy {
                    message: format!(
                        "batch size {} above {} pixels exceeds batch size {previous} for smaller rasters",
                        threshold.batch_size, threshold.min_pixels
                    ),
                });
            }
            previous = threshold.batch_size;
        }

        Ok(())
    }

    /// Regions per batch for a raster with `pixel_count` pixels.
    #[must_use]
    pub fn batch_size_for(&self, pixel_count: u64) -> usize {
        self.sorted_thresholds()
            .into_iter()
            .find(|t| pixel_count > t.min_pixels)
            .map_or(self.default_batch_size, |t| t.batch_size)
            .max(1)
    }

    /// Thresholds from the largest bound to the smallest.
    fn sorted_thresholds(&self) -> Vec<BatchThreshold> {
        let mut sorted = self.thresholds.clone();
        sorted.sort_by(|a, b| b.min_pixels.cmp(&a.min_pixels));
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_size_tiers() {
        let policy = BatchPolicy::default();
        assert_eq!(policy.batch_size_for(1_000_000_001), 2);
        assert_eq!(policy.batch_size_for(1_000_000_000), 3);
        assert_eq!(policy.batch_size_for(500_000_001), 3);
        assert_eq!(policy.batch_size_for(500_000_000), 5);
        assert_eq!(policy.batch_size_for(100_000_001), 5);
        assert_eq!(policy.batch_size_for(100_000_000), 10);
        assert_eq!(policy.batch_size_for(0), 10);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn batch_size_is_monotonic_non_increasing() {
        let policy = BatchPolicy::default();
        let counts = [0, 1, 99_999_999, 100_000_001, 700_000_000, 2_000_000_000, u64::MAX];
        let sizes: Vec<usize> = counts.iter().map(|&c| policy.batch_size_for(c)).collect();
        assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn threshold_order_does_not_matter() {
        let mut policy = BatchPolicy::default();
        policy.thresholds.reverse();
        assert_eq!(policy.batch_size_for(2_000_000_000), 2);
        assert_eq!(policy.batch_size_for(200_000_000), 5);
    }

    #[test]
    fn rejects_non_monotonic_or_zero_sizes() {
        let mut policy = BatchPolicy::default();
        policy.thresholds[0].batch_size = 20;
        assert!(matches!(policy.validate(), Err(ZonalError::InvalidPolicy { .. })));

        let zero = BatchPolicy {
            default_batch_size: 0,
            ..BatchPolicy::default()
        };
        assert!(zero.validate().is_err());

        let never = BatchPolicy {
            reclaim_every: 0,
            ..BatchPolicy::default()
        };
        assert!(never.validate().is_err());
    }
}
