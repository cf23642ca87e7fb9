//! Synchronous per-year stages.
//!
//! Every function here runs on a blocking thread and owns the grids it
//! reads; they are dropped before the function returns. Zonal sums read
//! rasters window by window, so only the input pair of the surface stage
//! is ever held whole.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use built_surface_models::{BaseMetric, Crs, MetricPath, YearTable};
use built_surface_raster::{RasterGrid, SurfaceOptions, WindowReader, calculate_surface, geotiff};
use built_surface_regions::{IdentityReprojector, RegionCollection, Reprojector, check_overlap};
use built_surface_stats::table_io::{self, ZonalColumns};
use built_surface_stats::{
    MetricSummary, ZonalRecord, ZonalSummary, ZonalTable, build_direct_surface,
    build_volume_footprint, merge_years, reaggregate_by_region,
};
use built_surface_zonal::{WindowedZonalSum, ZonalRun, aggregate};

use crate::progress::{ProgressCallback, null_progress};
use crate::{ArtifactLayout, PipelineConfig, PipelineError, Result};

/// Everything a stage needs besides the regions.
pub struct PipelineContext {
    /// Validated configuration.
    pub config: PipelineConfig,
    /// Output locations.
    pub layout: ArtifactLayout,
    /// Brings regions into each raster's CRS.
    pub reprojector: Arc<dyn Reprojector>,
    /// Year-level progress.
    pub year_progress: Arc<dyn ProgressCallback>,
    /// Region-level progress within a year.
    pub region_progress: Arc<dyn ProgressCallback>,
}

impl PipelineContext {
    /// Context with the identity reprojector and no progress output.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let layout = ArtifactLayout::new(config.output_dir.clone());
        Self {
            config,
            layout,
            reprojector: Arc::new(IdentityReprojector),
            year_progress: null_progress(),
            region_progress: null_progress(),
        }
    }

    /// Replaces both progress reporters.
    #[must_use]
    pub fn with_progress(
        mut self,
        years: Arc<dyn ProgressCallback>,
        regions: Arc<dyn ProgressCallback>,
    ) -> Self {
        self.year_progress = years;
        self.region_progress = regions;
        self
    }

    /// Loads the configured region boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Regions`] if the file is missing or invalid.
    pub fn load_regions(&self) -> Result<RegionCollection> {
        Ok(RegionCollection::load(
            &self.config.inputs.boundaries,
            &self.config.region_fields(),
        )?)
    }

    fn zonal_columns(&self) -> ZonalColumns<'_> {
        ZonalColumns {
            id: &self.config.fields.id,
            name: &self.config.fields.name,
        }
    }
}

/// Sums the `kind` input raster for `year` over every region and writes
/// the zonal table.
///
/// # Errors
///
/// Fails if the raster is missing or unreadable, the CRSs cannot be
/// harmonized, or the table cannot be written.
pub fn zonal_year(
    ctx: &PipelineContext,
    regions: &RegionCollection,
    kind: BaseMetric,
    year: i32,
) -> Result<ZonalTable> {
    let path = ctx
        .config
        .raster_path(kind, year)
        .ok_or_else(|| PipelineError::Config {
            message: format!("{kind} is not an input raster"),
        })?;

    zonal_table_for_raster(ctx, regions, kind, year, &path)
}

/// Raster-first path for `year`: surface raster, zonal sum of it, and the
/// per-year table carrying `total_surface` unchanged.
///
/// # Errors
///
/// Fails if an input raster is missing, the grids are not aligned, or an
/// output cannot be written.
pub fn surface_year(ctx: &PipelineContext, regions: &RegionCollection, year: i32) -> Result<YearTable> {
    let surface = {
        let volume = read_input(ctx, BaseMetric::Volume, year)?;
        let footprint = read_input(ctx, BaseMetric::Footprint, year)?;
        let options = SurfaceOptions {
            compactness: ctx.config.compactness,
            output_nodata: ctx.config.output_nodata,
        };
        calculate_surface(&volume, &footprint, &options)?
    };

    let surface_path = ctx.layout.surface_raster(year);
    geotiff::write(&surface_path, &surface)?;
    drop(surface);

    let zonal = zonal_table_for_raster(ctx, regions, BaseMetric::Surface, year, &surface_path)?;

    let table = build_direct_surface(&zonal, year)?;
    table_io::write_year_table(&ctx.layout.year_table(MetricPath::DirectSurface, year), &table)?;
    MetricSummary::of(&table).log(&format!("Surface {year}"));
    Ok(table)
}

/// Joins the stored volume and footprint zonal tables of `year` into the
/// per-year table with derived metrics.
///
/// # Errors
///
/// Fails if either zonal table cannot be read or the output cannot be
/// written.
pub fn combine_year(ctx: &PipelineContext, year: i32) -> Result<YearTable> {
    let volume = table_io::read_zonal_table(
        &ctx.layout.zonal_table(BaseMetric::Volume, year),
        BaseMetric::Volume,
        year,
        ctx.zonal_columns(),
    )?;
    let footprint = table_io::read_zonal_table(
        &ctx.layout.zonal_table(BaseMetric::Footprint, year),
        BaseMetric::Footprint,
        year,
        ctx.zonal_columns(),
    )?;
    log::info!(
        "Combining {year}: {} volume rows, {} footprint rows",
        volume.len(),
        footprint.len()
    );

    let table = build_volume_footprint(&volume, &footprint, year, ctx.config.compactness)?;
    table_io::write_year_table(
        &ctx.layout.year_table(MetricPath::VolumeFootprint, year),
        &table,
    )?;
    MetricSummary::of(&table).log(&format!("Combined {year}"));
    Ok(table)
}

/// Merges the per-year tables of `years` that exist on disk and writes the
/// multi-year table.
///
/// # Errors
///
/// Returns [`built_surface_stats::StatsError::NoTables`] (wrapped) when none
/// exist, or a read/write error.
pub fn merge_tables(ctx: &PipelineContext, path: MetricPath, years: &[i32]) -> Result<YearTable> {
    let mut tables = Vec::new();
    for &year in years {
        let table_path = ctx.layout.year_table(path, year);
        if table_path.exists() {
            tables.push(table_io::read_year_table(&table_path)?);
        } else {
            log::debug!("No {path} table for {year} at {}", table_path.display());
        }
    }

    let merged = merge_years(tables)?;
    table_io::write_year_table(&ctx.layout.merged_table(path), &merged)?;
    MetricSummary::of(&merged).log("All years");
    Ok(merged)
}

/// Re-aggregates the stored multi-year table by region and year and writes
/// the ISO summary.
///
/// # Errors
///
/// Fails if the merged table cannot be read or the summary cannot be
/// written.
pub fn summarize_table(ctx: &PipelineContext, path: MetricPath) -> Result<YearTable> {
    let merged = table_io::read_year_table(&ctx.layout.merged_table(path))?;
    let summary = reaggregate_by_region(&merged, ctx.config.compactness);
    table_io::write_year_table(&ctx.layout.iso_summary(path), &summary)?;
    MetricSummary::of(&summary).log("ISO summary");
    Ok(summary)
}

fn read_input(ctx: &PipelineContext, kind: BaseMetric, year: i32) -> Result<RasterGrid> {
    let path = ctx
        .config
        .raster_path(kind, year)
        .ok_or_else(|| PipelineError::Config {
            message: format!("{kind} is not an input raster"),
        })?;
    Ok(geotiff::read(&path, ctx.config.max_decode_bytes)?)
}

fn zonal_table_for_raster(
    ctx: &PipelineContext,
    regions: &RegionCollection,
    kind: BaseMetric,
    year: i32,
    path: &Path,
) -> Result<ZonalTable> {
    let reader = WindowReader::open(path, ctx.config.max_decode_bytes)?;
    let info = reader.info();
    log::info!(
        "{kind} {year}: {} ({}x{}, {} pixels, {}, nodata={:?}, crs={})",
        path.display(),
        info.width,
        info.height,
        info.pixel_count(),
        info.color_type,
        info.nodata,
        info.georef.crs
    );

    let regions = harmonize(regions, &info.georef.crs, ctx.reprojector.as_ref())?;
    let overlap = check_overlap(&regions, info.extent());
    log::debug!(
        "{} of {} regions intersect the {kind} {year} raster",
        overlap.intersecting,
        regions.len()
    );

    let progress = &ctx.region_progress;
    progress.restart(regions.len() as u64, format!("{kind} {year}"));

    let mut zonal = WindowedZonalSum::new(reader);
    let run = aggregate(
        &mut zonal,
        &regions.regions,
        &ctx.config.batching,
        |done| progress.set_position(done as u64),
    );

    let table = to_zonal_table(&regions, kind, year, &run);
    table_io::write_zonal_table(&ctx.layout.zonal_table(kind, year), &table)?;
    ZonalSummary::of(&table).log(&format!("{kind} {year}"));
    Ok(table)
}

/// Regions in the raster's CRS, borrowed when no change is needed.
fn harmonize<'r>(
    regions: &'r RegionCollection,
    target: &Crs,
    reprojector: &dyn Reprojector,
) -> Result<Cow<'r, RegionCollection>> {
    if regions.crs.is_equivalent(target) {
        return Ok(Cow::Borrowed(regions));
    }
    log::info!("Reprojecting regions from {} to {target}", regions.crs);
    Ok(Cow::Owned(reprojector.reproject(regions.clone(), target)?))
}

fn to_zonal_table(regions: &RegionCollection, kind: BaseMetric, year: i32, run: &ZonalRun) -> ZonalTable {
    let columns = regions.attribute_columns();
    let mut table = ZonalTable::new(kind, year, columns.clone());

    for (region, outcome) in regions.iter().zip(&run.outcomes) {
        let attributes = columns
            .iter()
            .map(|column| {
                region
                    .attributes
                    .iter()
                    .find(|(key, _)| key == column)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .collect();

        table.push(ZonalRecord {
            region_id: region.id.clone(),
            name: region.name.clone(),
            attributes,
            value: outcome.value(),
        });
    }

    table
}
