//! Descriptive summaries logged after each table is produced.

use serde::Serialize;

use built_surface_models::YearTable;

use crate::ZonalTable;

/// Mean, maximum and minimum of a set of values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueRange {
    /// Number of values.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Largest value.
    pub max: f64,
    /// Smallest value.
    pub min: f64,
}

impl ValueRange {
    /// Range of the given values, `None` when empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut count = 0;
        let mut sum = 0.0;
        let mut max = f64::NEG_INFINITY;
        let mut min = f64::INFINITY;
        for v in values {
            count += 1;
            sum += v;
            max = max.max(v);
            min = min.min(v);
        }
        (count > 0).then(|| Self {
            count,
            mean: sum / count as f64,
            max,
            min,
        })
    }
}

/// Summary of a per-year, merged or re-aggregated table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    /// Number of rows.
    pub records: usize,
    /// Number of distinct regions.
    pub regions: usize,
    /// Distinct years, ascending.
    pub years: Vec<i32>,
    /// Positive building heights.
    pub building_height: Option<ValueRange>,
    /// Positive derived surface areas.
    pub total_surface_area: Option<ValueRange>,
    /// Positive surface sums from the raster-first path.
    pub total_surface: Option<ValueRange>,
}

impl MetricSummary {
    /// Summarizes `table`.
    #[must_use]
    pub fn of(table: &YearTable) -> Self {
        let positive = |f: fn(&built_surface_models::YearRecord) -> Option<f64>| {
            ValueRange::of(table.records.iter().filter_map(f).filter(|v| *v > 0.0))
        };
        Self {
            records: table.len(),
            regions: table.region_count(),
            years: table.years(),
            building_height: positive(|r| r.derived.building_height),
            total_surface_area: positive(|r| r.derived.total_surface_area),
            total_surface: positive(|r| r.base.total_surface),
        }
    }

    /// Logs the summary at `info` under `label`.
    pub fn log(&self, label: &str) {
        log::info!(
            "{label}: {} records, {} regions, years {:?}",
            self.records,
            self.regions,
            self.years
        );
        log_range("building height", self.building_height.as_ref());
        log_range("total surface area", self.total_surface_area.as_ref());
        log_range("total surface", self.total_surface.as_ref());
    }
}

/// Summary of one zonal table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZonalSummary {
    /// Number of regions.
    pub regions: usize,
    /// Regions with a value.
    pub with_value: usize,
    /// Region with the largest value.
    pub max: Option<(String, f64)>,
    /// Region with the smallest value.
    pub min: Option<(String, f64)>,
}

impl ZonalSummary {
    /// Summarizes `table`.
    #[must_use]
    pub fn of(table: &ZonalTable) -> Self {
        let mut max: Option<(String, f64)> = None;
        let mut min: Option<(String, f64)> = None;
        for record in &table.records {
            let Some(v) = record.value else { continue };
            if max.as_ref().is_none_or(|(_, m)| v > *m) {
                max = Some((record.region_id.clone(), v));
            }
            if min.as_ref().is_none_or(|(_, m)| v < *m) {
                min = Some((record.region_id.clone(), v));
            }
        }
        Self {
            regions: table.len(),
            with_value: table.with_value(),
            max,
            min,
        }
    }

    /// Logs the summary at `info` under `label`.
    pub fn log(&self, label: &str) {
        log::info!(
            "{label}: {} of {} regions have a value",
            self.with_value,
            self.regions
        );
        if let (Some((max_id, max)), Some((min_id, min))) = (&self.max, &self.min) {
            log::info!("{label}: max {max_id} = {max:.2}, min {min_id} = {min:.2}");
        }
    }
}

fn log_range(label: &str, range: Option<&ValueRange>) {
    if let Some(r) = range {
        log::info!(
            "  {label}: mean {:.2}, max {:.2}, min {:.2} over {} values",
            r.mean,
            r.max,
            r.min,
            r.count
        );
    }
}
