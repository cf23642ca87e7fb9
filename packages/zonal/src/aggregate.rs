//! Batched per-region aggregation.

use built_surface_regions::Region;

use crate::{BatchPolicy, RegionOutcome, ZonalStatistics};

/// Outcome of one [`aggregate`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalRun {
    /// One outcome per region, in input order.
    pub outcomes: Vec<RegionOutcome>,
    /// Regions per batch that was used.
    pub batch_size: usize,
    /// Number of batches processed.
    pub batches: usize,
    /// Number of reclamation passes performed.
    pub reclaims: usize,
}

impl ZonalRun {
    /// Sums as `Option<f64>`, in input order.
    #[must_use]
    pub fn values(&self) -> Vec<Option<f64>> {
        self.outcomes.iter().map(RegionOutcome::value).collect()
    }

    /// Number of regions with a value.
    #[must_use]
    pub fn with_value(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RegionOutcome::Value(_)))
            .count()
    }

    /// Number of regions whose summation failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }
}

/// Sums `zonal`'s raster over every region, one region at a time, in
/// batches sized by `policy` from the raster's pixel count.
///
/// Per-region errors are logged and recorded as [`RegionOutcome::Failed`];
/// they never abort the run. `on_region` is called after each region with
/// the number of regions done so far.
pub fn aggregate<Z: ZonalStatistics + ?Sized>(
    zonal: &mut Z,
    regions: &[Region],
    policy: &BatchPolicy,
    mut on_region: impl FnMut(usize),
) -> ZonalRun {
    let pixels = zonal.pixel_count();
    let batch_size = policy.batch_size_for(pixels);
    let reclaim_every = policy.reclaim_every.max(1);
    let total_batches = regions.len().div_ceil(batch_size);

    log::info!(
        "Summing {} regions over {} pixels in {total_batches} batches of {batch_size}",
        regions.len(),
        pixels
    );

    let mut outcomes = Vec::with_capacity(regions.len());
    let mut reclaims = 0;

    for (batch_index, batch) in regions.chunks(batch_size).enumerate() {
        let first = batch_index * batch_size;
        log::info!(
            "Processing batch {}/{total_batches} (regions {}-{})",
            batch_index + 1,
            first + 1,
            first + batch.len()
        );

        for (i, region) in batch.iter().enumerate() {
            let outcome = match zonal.sum(&region.geometry) {
                Ok(Some(sum)) => {
                    log::debug!("Region {}: {sum}", region.id);
                    RegionOutcome::Value(sum)
                }
                Ok(None) => {
                    log::debug!("Region {}: no coverage", region.id);
                    RegionOutcome::NoCoverage
                }
                Err(e) => {
                    log::warn!("Error processing region {}: {e}", region.id);
                    RegionOutcome::Failed(e.to_string())
                }
            };
            outcomes.push(outcome);
            on_region(outcomes.len());

            if (i + 1) % reclaim_every == 0 {
                zonal.reclaim();
                reclaims += 1;
            }
        }

        zonal.reclaim();
        reclaims += 1;
    }

    let run = ZonalRun {
        outcomes,
        batch_size,
        batches: total_batches,
        reclaims,
    };

    log::info!(
        "Zonal summation done: {} with value, {} without coverage, {} failed",
        run.with_value(),
        run.outcomes.len() - run.with_value() - run.failed(),
        run.failed()
    );

    run
}

#[cfg(test)]
mod tests {
    use geo::MultiPolygon;

    use super::*;
    use crate::{BatchThreshold, ZonalError};

    /// Returns a scripted result per region, keyed by the number of calls.
    struct Scripted {
        results: Vec<Result<Option<f64>, ZonalError>>,
        pixels: u64,
        calls: usize,
        reclaims_seen: usize,
    }

    impl Scripted {
        fn new(results: Vec<Result<Option<f64>, ZonalError>>) -> Self {
            Self {
                results,
                pixels: 1,
                calls: 0,
                reclaims_seen: 0,
            }
        }
    }

    impl ZonalStatistics for Scripted {
        fn pixel_count(&self) -> u64 {
            self.pixels
        }

        fn sum(&mut self, _geometry: &MultiPolygon<f64>) -> Result<Option<f64>, ZonalError> {
            let result = self.results[self.calls].clone();
            self.calls += 1;
            result
        }

        fn reclaim(&mut self) {
            self.reclaims_seen += 1;
        }
    }

    fn regions(n: usize) -> Vec<Region> {
        (0..n)
            .map(|i| Region::new(format!("R{i}"), None, Vec::new(), MultiPolygon(Vec::new())))
            .collect()
    }

    fn policy(batch_size: usize) -> BatchPolicy {
        BatchPolicy {
            thresholds: vec![BatchThreshold {
                min_pixels: 0,
                batch_size,
            }],
            default_batch_size: batch_size,
            reclaim_every: 3,
        }
    }

    #[test]
    fn output_matches_region_order_for_any_batch_size() {
        let n = 11;
        #[allow(clippy::cast_precision_loss)]
        let expected: Vec<Option<f64>> = (0..n).map(|i| Some(i as f64)).collect();

        for batch_size in 1..=n + 2 {
            let mut zonal = Scripted::new(expected.iter().map(|v| Ok(*v)).collect());
            let run = aggregate(&mut zonal, &regions(n), &policy(batch_size), |_| {});
            assert_eq!(run.outcomes.len(), n);
            assert_eq!(run.values(), expected);
            assert_eq!(run.batches, n.div_ceil(batch_size));
        }
    }

    #[test]
    fn zero_and_missing_stay_distinct() {
        let mut zonal = Scripted::new(vec![Ok(Some(0.0)), Ok(None)]);
        let run = aggregate(&mut zonal, &regions(2), &BatchPolicy::default(), |_| {});
        assert_eq!(run.outcomes, vec![RegionOutcome::Value(0.0), RegionOutcome::NoCoverage]);
        assert_eq!(run.values(), vec![Some(0.0), None]);
    }

    #[test]
    fn failures_are_isolated() {
        let mut zonal = Scripted::new(vec![
            Ok(Some(1.0)),
            Err(ZonalError::NonFiniteGeometry),
            Ok(Some(3.0)),
        ]);
        let run = aggregate(&mut zonal, &regions(3), &BatchPolicy::default(), |_| {});

        assert_eq!(zonal.calls, 3);
        assert_eq!(run.values(), vec![Some(1.0), None, Some(3.0)]);
        assert!(run.outcomes[1].is_failed());
        assert_eq!(run.failed(), 1);
        assert_eq!(run.with_value(), 2);
    }

    #[test]
    fn reclaims_on_cadence_and_after_each_batch() {
        // Batches of 5 over 7 regions: [5, 2]. First batch reclaims after
        // region 3 and at its end; second batch only at its end.
        let mut zonal = Scripted::new(vec![Ok(Some(1.0)); 7]);
        let run = aggregate(&mut zonal, &regions(7), &policy(5), |_| {});
        assert_eq!(run.reclaims, 3);
        assert_eq!(zonal.reclaims_seen, 3);
    }

    #[test]
    fn progress_reports_every_region() {
        let mut zonal = Scripted::new(vec![Ok(None); 4]);
        let mut seen = Vec::new();
        let _ = aggregate(&mut zonal, &regions(4), &policy(3), |done| seen.push(done));
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn batch_size_follows_raster_pixel_count() {
        let policy = BatchPolicy {
            thresholds: vec![
                BatchThreshold {
                    min_pixels: 100,
                    batch_size: 2,
                },
                BatchThreshold {
                    min_pixels: 0,
                    batch_size: 4,
                },
            ],
            default_batch_size: 4,
            reclaim_every: 10,
        };

        let mut small = Scripted::new(vec![Ok(None); 4]);
        assert_eq!(aggregate(&mut small, &regions(4), &policy, |_| {}).batches, 1);

        let mut large = Scripted::new(vec![Ok(None); 4]);
        large.pixels = 1_000;
        let run = aggregate(&mut large, &regions(4), &policy, |_| {});
        assert_eq!(run.batch_size, 2);
        assert_eq!(run.batches, 2);
    }

    #[test]
    fn empty_region_list_yields_empty_run() {
        let mut zonal = Scripted::new(Vec::new());
        let run = aggregate(&mut zonal, &[], &BatchPolicy::default(), |_| {});
        assert!(run.outcomes.is_empty());
        assert_eq!(run.batches, 0);
        assert_eq!(run.reclaims, 0);
    }
}
