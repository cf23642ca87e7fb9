//! Async multi-year drivers.
//!
//! Each year runs inside [`tokio::task::spawn_blocking`] and the next year
//! only starts once the previous one has returned, so at most one year's
//! grids are resident at a time.

use std::sync::Arc;
use std::time::Instant;

use built_surface_models::{BaseMetric, MetricPath, YearTable};

use crate::report::{RunReport, write_reports};
use crate::steps::{self, PipelineContext};
use crate::{PipelineError, Result};

/// Zonal sums of the `kind` input raster for every configured year.
///
/// If the boundaries cannot be loaded, every year is reported as failed
/// with that reason.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] when `kind` is not an input raster.
pub async fn run_zonal(ctx: Arc<PipelineContext>, kind: BaseMetric) -> Result<RunReport> {
    if kind == BaseMetric::Surface {
        return Err(PipelineError::Config {
            message: "surface rasters are summed by the surface stage".to_string(),
        });
    }

    let started = Instant::now();
    let years = ctx.config.years.clone();

    let regions = match ctx.load_regions() {
        Ok(regions) => Arc::new(regions),
        Err(e) => return Ok(fail_all(kind.to_string(), &years, &e, started)),
    };
    log::info!(
        "Loaded {} regions from {}",
        regions.len(),
        ctx.config.inputs.boundaries.display()
    );

    let mut report = run_years(&ctx, kind.to_string(), years, move |ctx, year| {
        steps::zonal_year(ctx, &regions, kind, year).map(|_| ())
    })
    .await;
    report.set_elapsed(started.elapsed());
    report.log();
    Ok(report)
}

/// Joins the stored zonal tables for every configured year, then merges the
/// per-year tables and writes the ISO summary.
///
/// Years without both zonal tables are skipped. No pause is inserted since
/// no raster is read.
///
/// # Errors
///
/// Returns an error only if the merge or summary of processed years fails.
pub async fn run_combine(ctx: Arc<PipelineContext>) -> Result<RunReport> {
    let started = Instant::now();
    let mut report = RunReport::new("combine");

    let mut years = Vec::new();
    for &year in &ctx.config.years {
        let missing: Vec<String> = [BaseMetric::Volume, BaseMetric::Footprint]
            .into_iter()
            .map(|kind| ctx.layout.zonal_table(kind, year))
            .filter(|path| !path.exists())
            .map(|path| path.display().to_string())
            .collect();
        if missing.is_empty() {
            years.push(year);
        } else {
            log::warn!("Skipping {year}: missing {}", missing.join(", "));
            report.skip(year, format!("Missing zonal tables: {}", missing.join(", ")));
        }
    }

    let combined = run_years_with_pause(&ctx, "combine", years, false, |ctx, year| {
        steps::combine_year(ctx, year).map(|_| ())
    })
    .await;
    report.processed = combined.processed;
    report.failed = combined.failed;

    finalize(&ctx, MetricPath::VolumeFootprint, &report.processed).await?;

    report.set_elapsed(started.elapsed());
    report.log();
    Ok(report)
}

/// Raster-first path: a surface raster per year, its zonal sum and the
/// per-year table, followed by the merge and ISO summary.
///
/// # Errors
///
/// Returns an error only if the merge or summary of processed years fails.
pub async fn run_surface(ctx: Arc<PipelineContext>) -> Result<RunReport> {
    let started = Instant::now();
    let years = ctx.config.years.clone();

    let regions = match ctx.load_regions() {
        Ok(regions) => Arc::new(regions),
        Err(e) => return Ok(fail_all("surface".to_string(), &years, &e, started)),
    };

    let mut report = run_years(&ctx, "surface".to_string(), years, move |ctx, year| {
        steps::surface_year(ctx, &regions, year).map(|_| ())
    })
    .await;

    finalize(&ctx, MetricPath::DirectSurface, &report.processed).await?;

    report.set_elapsed(started.elapsed());
    report.log();
    Ok(report)
}

/// Merges every per-year table of `path` found on disk for the configured
/// years.
///
/// # Errors
///
/// Fails if no table exists or a table cannot be read or written.
pub async fn run_merge(ctx: Arc<PipelineContext>, path: MetricPath) -> Result<YearTable> {
    let years = ctx.config.years.clone();
    blocking(move || steps::merge_tables(&ctx, path, &years)).await
}

/// Re-aggregates the merged table of `path` by region and year.
///
/// # Errors
///
/// Fails if the merged table is missing or the summary cannot be written.
pub async fn run_summarize(ctx: Arc<PipelineContext>, path: MetricPath) -> Result<YearTable> {
    blocking(move || steps::summarize_table(&ctx, path)).await
}

/// Footprint, volume and combine stages in order.
///
/// # Errors
///
/// Propagates the first stage-level error.
pub async fn run_all(ctx: Arc<PipelineContext>) -> Result<Vec<RunReport>> {
    let footprint = run_zonal(Arc::clone(&ctx), BaseMetric::Footprint).await?;
    let volume = run_zonal(Arc::clone(&ctx), BaseMetric::Volume).await?;
    let combine = run_combine(ctx).await?;
    Ok(vec![footprint, volume, combine])
}

/// Logs `reports` and writes them to the run report file.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] or [`PipelineError::Report`].
pub fn save_reports(ctx: &PipelineContext, reports: &[RunReport]) -> Result<()> {
    write_reports(&ctx.layout.run_report(), reports)
}

async fn run_years<F>(ctx: &Arc<PipelineContext>, stage: String, years: Vec<i32>, step: F) -> RunReport
where
    F: Fn(&PipelineContext, i32) -> Result<()> + Send + Sync + 'static,
{
    run_years_with_pause(ctx, &stage, years, true, step).await
}

async fn run_years_with_pause<F>(
    ctx: &Arc<PipelineContext>,
    stage: &str,
    years: Vec<i32>,
    pause: bool,
    step: F,
) -> RunReport
where
    F: Fn(&PipelineContext, i32) -> Result<()> + Send + Sync + 'static,
{
    let mut report = RunReport::new(stage);
    let step = Arc::new(step);
    let delay = if pause { ctx.config.pause() } else { std::time::Duration::ZERO };

    let progress = Arc::clone(&ctx.year_progress);
    progress.restart(years.len() as u64, stage.to_string());

    for (i, &year) in years.iter().enumerate() {
        progress.set_message(format!("{stage} {year}"));
        log::info!("{stage}: processing {year}");

        let task_ctx = Arc::clone(ctx);
        let task_step = Arc::clone(&step);
        let outcome = tokio::task::spawn_blocking(move || task_step(&task_ctx, year)).await;

        match outcome {
            Ok(Ok(())) => report.processed.push(year),
            Ok(Err(e)) => {
                log::error!("{stage} {year} failed: {e}");
                report.fail(year, e.to_string());
            }
            Err(e) => {
                log::error!("{stage} {year} aborted: {e}");
                report.fail(year, format!("Worker task aborted: {e}"));
            }
        }
        progress.inc(1);

        if i + 1 < years.len() && !delay.is_zero() {
            log::debug!("Pausing {:.1}s before the next year", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
    }

    progress.finish(format!(
        "{stage}: {}/{} years",
        report.processed.len(),
        years.len()
    ));
    report
}

/// Merge and summary over the years a stage just produced.
async fn finalize(ctx: &Arc<PipelineContext>, path: MetricPath, years: &[i32]) -> Result<()> {
    if years.is_empty() {
        log::warn!("No {path} tables were produced; skipping merge and summary");
        return Ok(());
    }
    let ctx = Arc::clone(ctx);
    let years = years.to_vec();
    blocking(move || {
        steps::merge_tables(&ctx, path, &years)?;
        steps::summarize_table(&ctx, path).map(|_| ())
    })
    .await
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::Task {
            message: e.to_string(),
        })?
}

fn fail_all(stage: String, years: &[i32], error: &PipelineError, started: Instant) -> RunReport {
    log::error!("{stage}: cannot load regions: {error}");
    let mut report = RunReport::new(stage);
    for &year in years {
        report.fail(year, error.to_string());
    }
    report.set_elapsed(started.elapsed());
    report.log();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineConfig;
    use crate::progress::RecordingProgress;

    #[tokio::test]
    async fn year_loop_reports_progress_and_isolates_failures() {
        let years = Arc::new(RecordingProgress::default());
        let ctx = Arc::new(
            PipelineContext::new(PipelineConfig::default())
                .with_progress(years.clone(), crate::null_progress()),
        );

        let report = run_years_with_pause(&ctx, "volume", vec![2020, 2025], false, |_, year| {
            if year == 2025 {
                Err(PipelineError::Task {
                    message: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(report.processed, vec![2020]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].year, 2025);
        assert_eq!(
            years.events(),
            vec![
                "message volume",
                "total 2",
                "position 0",
                "message volume 2020",
                "inc 1",
                "message volume 2025",
                "inc 1",
                "finish volume: 1/2 years",
            ]
        );
    }
}
