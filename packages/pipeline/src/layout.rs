//! On-disk artifact layout under the output directory.
//!
//! ```text
//! <output_dir>/
//!   zonal/<kind>_statistics_<year>.csv
//!   rasters/surface_<year>.tif
//!   <metric_path>/surface_statistics_<year>.csv
//!   <metric_path>/surface_statistics_all_years.csv
//!   <metric_path>/surface_statistics_iso_summary.csv
//!   run_report.json
//! ```
//!
//! `<metric_path>` is `volume_footprint` or `direct_surface`, so the two
//! ways of computing surface area never overwrite each other.

use std::path::{Path, PathBuf};

use built_surface_models::{BaseMetric, MetricPath};

/// Paths of every artifact the pipeline reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Zonal statistic table for one raster kind and year.
    #[must_use]
    pub fn zonal_table(&self, kind: BaseMetric, year: i32) -> PathBuf {
        self.root
            .join("zonal")
            .join(format!("{kind}_statistics_{year}.csv"))
    }

    /// Generated surface raster for one year.
    #[must_use]
    pub fn surface_raster(&self, year: i32) -> PathBuf {
        self.root.join("rasters").join(format!("surface_{year}.tif"))
    }

    /// Per-year statistic table.
    #[must_use]
    pub fn year_table(&self, path: MetricPath, year: i32) -> PathBuf {
        self.tables_dir(path)
            .join(format!("surface_statistics_{year}.csv"))
    }

    /// Merged multi-year table.
    #[must_use]
    pub fn merged_table(&self, path: MetricPath) -> PathBuf {
        self.tables_dir(path).join("surface_statistics_all_years.csv")
    }

    /// Re-aggregated ISO summary table.
    #[must_use]
    pub fn iso_summary(&self, path: MetricPath) -> PathBuf {
        self.tables_dir(path)
            .join("surface_statistics_iso_summary.csv")
    }

    /// Run report.
    #[must_use]
    pub fn run_report(&self) -> PathBuf {
        self.root.join("run_report.json")
    }

    fn tables_dir(&self, path: MetricPath) -> PathBuf {
        self.root.join(path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names() {
        let layout = ArtifactLayout::new("out");
        assert_eq!(
            layout.zonal_table(BaseMetric::Footprint, 2020),
            Path::new("out/zonal/footprint_statistics_2020.csv")
        );
        assert_eq!(
            layout.zonal_table(BaseMetric::Volume, 1975),
            Path::new("out/zonal/volume_statistics_1975.csv")
        );
        assert_eq!(
            layout.surface_raster(2000),
            Path::new("out/rasters/surface_2000.tif")
        );
        assert_eq!(
            layout.year_table(MetricPath::VolumeFootprint, 2020),
            Path::new("out/volume_footprint/surface_statistics_2020.csv")
        );
        assert_eq!(
            layout.merged_table(MetricPath::DirectSurface),
            Path::new("out/direct_surface/surface_statistics_all_years.csv")
        );
        assert_eq!(
            layout.iso_summary(MetricPath::VolumeFootprint),
            Path::new("out/volume_footprint/surface_statistics_iso_summary.csv")
        );
    }
}
