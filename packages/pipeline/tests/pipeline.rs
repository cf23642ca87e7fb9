use std::path::Path;
use std::sync::Arc;

use approx::assert_relative_eq;
use built_surface_models::{BaseMetric, MetricPath};
use built_surface_pipeline::{
    PipelineConfig, PipelineContext, run_all, run_combine, run_surface, run_zonal, save_reports,
};
use built_surface_raster::{GeoReference, RasterGrid, geotiff};
use built_surface_stats::table_io::{self, ZonalColumns};

const REGIONS: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "properties": {"ISO_A3": "AAA", "NAM_0": "Alpha"},
      "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}
    },
    {
      "type": "Feature",
      "properties": {"ISO_A3": "BBB", "NAM_0": "Beta"},
      "geometry": {"type": "Polygon", "coordinates": [[[1,0],[2,0],[2,1],[1,1],[1,0]]]}
    }
  ]
}"#;

/// Writes a 2x1 raster whose pixels fall in regions `AAA` and `BBB`.
fn write_raster(path: &Path, values: [f32; 2]) {
    let grid = RasterGrid::new(2, 1, values.to_vec(), Some(-1.0), GeoReference::unit(1)).unwrap();
    geotiff::write(path, &grid).unwrap();
}

/// Inputs for 2020 only; 2025 is configured but absent.
fn setup(dir: &Path) -> Arc<PipelineContext> {
    let data = dir.join("data");
    std::fs::create_dir_all(&data).unwrap();
    write_raster(&data.join("vol_2020.tif"), [1000.0, 1500.0]);
    write_raster(&data.join("fp_2020.tif"), [200.0, 300.0]);
    std::fs::write(data.join("regions.geojson"), REGIONS).unwrap();

    let mut config = PipelineConfig {
        years: vec![2020, 2025],
        output_dir: dir.join("out"),
        pause_secs: 0.0,
        ..PipelineConfig::default()
    };
    config.inputs.volume = data.join("vol_{year}.tif").display().to_string();
    config.inputs.footprint = data.join("fp_{year}.tif").display().to_string();
    config.inputs.boundaries = data.join("regions.geojson");
    config.validate().unwrap();

    Arc::new(PipelineContext::new(config))
}

#[tokio::test]
async fn full_run_produces_tables_and_reports_missing_year() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = setup(dir.path());

    let reports = run_all(Arc::clone(&ctx)).await.unwrap();
    save_reports(&ctx, &reports).unwrap();

    let stages: Vec<&str> = reports.iter().map(|r| r.stage.as_str()).collect();
    assert_eq!(stages, vec!["footprint", "volume", "combine"]);
    for report in &reports[..2] {
        assert_eq!(report.processed, vec![2020]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].year, 2025);
    }
    assert_eq!(reports[2].processed, vec![2020]);
    assert_eq!(reports[2].skipped.len(), 1);
    assert_eq!(reports[2].skipped[0].year, 2025);

    let footprint = table_io::read_zonal_table(
        &ctx.layout.zonal_table(BaseMetric::Footprint, 2020),
        BaseMetric::Footprint,
        2020,
        ZonalColumns::default(),
    )
    .unwrap();
    assert_eq!(footprint.records[0].region_id, "AAA");
    assert_relative_eq!(footprint.records[0].value.unwrap(), 200.0);
    assert_relative_eq!(footprint.records[1].value.unwrap(), 300.0);

    let merged =
        table_io::read_year_table(&ctx.layout.merged_table(MetricPath::VolumeFootprint)).unwrap();
    assert_eq!(merged.path, MetricPath::VolumeFootprint);
    assert_eq!(merged.len(), 2);
    let alpha = &merged.records[0];
    assert_eq!(alpha.region_id, "AAA");
    assert_eq!(alpha.name.as_deref(), Some("Alpha"));
    assert_relative_eq!(alpha.derived.building_height.unwrap(), 5.0, epsilon = 1e-9);
    assert_relative_eq!(alpha.derived.total_surface_area.unwrap(), 482.842_712, epsilon = 1e-5);
    let beta = &merged.records[1];
    assert_relative_eq!(beta.derived.building_height.unwrap(), 5.0, epsilon = 1e-9);
    assert_relative_eq!(beta.derived.total_surface_area.unwrap(), 646.410_161, epsilon = 1e-5);

    let summary =
        table_io::read_year_table(&ctx.layout.iso_summary(MetricPath::VolumeFootprint)).unwrap();
    assert_eq!(summary.len(), 2);
    assert_relative_eq!(
        summary.records[1].derived.total_surface_area.unwrap(),
        646.410_161,
        epsilon = 1e-5
    );

    let report_text = std::fs::read_to_string(ctx.layout.run_report()).unwrap();
    assert!(report_text.contains("\"combine\""));
}

#[tokio::test]
async fn surface_path_matches_combined_path() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = setup(dir.path());

    let report = run_surface(Arc::clone(&ctx)).await.unwrap();
    assert_eq!(report.processed, vec![2020]);
    assert_eq!(report.failed.len(), 1);
    assert!(ctx.layout.surface_raster(2020).exists());

    let raster = geotiff::read(&ctx.layout.surface_raster(2020), usize::MAX).unwrap();
    assert_relative_eq!(f64::from(raster.data()[0]), 482.842_712, epsilon = 1e-3);

    let table =
        table_io::read_year_table(&ctx.layout.year_table(MetricPath::DirectSurface, 2020)).unwrap();
    assert_eq!(table.path, MetricPath::DirectSurface);
    assert_relative_eq!(table.records[0].base.total_surface.unwrap(), 482.842_712, epsilon = 1e-3);
    assert_relative_eq!(table.records[1].base.total_surface.unwrap(), 646.410_161, epsilon = 1e-3);
    assert!(table.records[0].derived.building_height.is_none());

    assert!(ctx.layout.iso_summary(MetricPath::DirectSurface).exists());
    assert!(!ctx.layout.merged_table(MetricPath::VolumeFootprint).exists());
}

#[tokio::test]
async fn missing_boundaries_fail_every_year() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = setup(dir.path());
    std::fs::remove_file(&ctx.config.inputs.boundaries).unwrap();

    let report = run_zonal(Arc::clone(&ctx), BaseMetric::Volume).await.unwrap();
    assert!(report.processed.is_empty());
    assert_eq!(report.failed.len(), 2);
    assert!(!report.is_success());
}

#[tokio::test]
async fn combine_without_zonal_tables_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = setup(dir.path());

    let report = run_combine(Arc::clone(&ctx)).await.unwrap();
    assert!(report.processed.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert!(report.is_success());
    assert!(!ctx.layout.merged_table(MetricPath::VolumeFootprint).exists());
}

#[tokio::test]
async fn surface_is_not_a_zonal_input() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = setup(dir.path());
    assert!(run_zonal(ctx, BaseMetric::Surface).await.is_err());
}
