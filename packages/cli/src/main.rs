#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line driver for the built-surface toolchain.
//!
//! Every stage is a subcommand; running without one opens an interactive
//! menu. Log output goes through `indicatif-log-bridge` (via
//! [`built_surface_cli_utils::init_logger`]) so it never tears a progress
//! bar.

mod interactive;

use std::path::PathBuf;
use std::sync::Arc;

use built_surface_cli_utils::{IndicatifProgress, MultiProgress};
use built_surface_models::{BaseMetric, Compactness, MetricPath};
use built_surface_pipeline::{
    PipelineConfig, PipelineContext, RunReport, run_all, run_combine, run_merge, run_summarize,
    run_surface, run_zonal, save_reports,
};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "built_surface",
    about = "Building height and built-up surface area per region and year"
)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Flags layered on top of the configuration file.
#[derive(Args, Default)]
struct Overrides {
    /// TOML configuration file (the embedded defaults are used otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Comma-separated years to process (e.g. `1975,2020`)
    #[arg(long, global = true, value_delimiter = ',')]
    years: Option<Vec<i32>>,
    /// Root directory for every output artifact
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    /// Region boundaries `GeoJSON`
    #[arg(long, global = true)]
    boundaries: Option<PathBuf>,
    /// Compactness coefficient of the surface-area formula
    #[arg(long, global = true)]
    compactness: Option<f64>,
    /// Seconds to wait between consecutive years
    #[arg(long, global = true)]
    pause_secs: Option<f64>,
}

impl Overrides {
    fn load(&self) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
        let mut config = PipelineConfig::load(self.config.as_deref())?;
        if let Some(years) = &self.years {
            config.years.clone_from(years);
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(boundaries) = &self.boundaries {
            config.inputs.boundaries.clone_from(boundaries);
        }
        if let Some(value) = self.compactness {
            config.compactness = Compactness::new(value);
        }
        if let Some(secs) = self.pause_secs {
            config.pause_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Zonal sums of the built-footprint raster for every year
    Footprint,
    /// Zonal sums of the built-volume raster for every year
    Volume,
    /// Join stored volume and footprint sums, then merge and summarize
    Combine,
    /// Raster-first path: surface raster per year, summed per region
    Surface,
    /// Merge the per-year tables already on disk
    Merge {
        /// Which per-year tables to merge
        #[arg(long, value_enum, default_value_t = TableSet::VolumeFootprint)]
        tables: TableSet,
    },
    /// Re-aggregate the merged table by region and year
    Summarize {
        /// Which merged table to summarize
        #[arg(long, value_enum, default_value_t = TableSet::VolumeFootprint)]
        tables: TableSet,
    },
    /// Footprint, volume and combine stages in order
    Run,
    /// Print the effective configuration as TOML
    ShowConfig,
}

/// Table family selected on the command line.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TableSet {
    /// Tables built from volume and footprint sums
    VolumeFootprint,
    /// Tables built from generated surface rasters
    DirectSurface,
}

impl From<TableSet> for MetricPath {
    fn from(set: TableSet) -> Self {
        match set {
            TableSet::VolumeFootprint => Self::VolumeFootprint,
            TableSet::DirectSurface => Self::DirectSurface,
        }
    }
}

/// A stage to execute against a loaded configuration.
#[derive(Clone, Copy)]
enum Stage {
    Zonal(BaseMetric),
    Combine,
    Surface,
    Merge(MetricPath),
    Summarize(MetricPath),
    All,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = built_surface_cli_utils::init_logger();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return interactive::run(&multi, &cli.overrides).await;
    };

    let config = cli.overrides.load()?;
    let stage = match command {
        Commands::Footprint => Stage::Zonal(BaseMetric::Footprint),
        Commands::Volume => Stage::Zonal(BaseMetric::Volume),
        Commands::Combine => Stage::Combine,
        Commands::Surface => Stage::Surface,
        Commands::Merge { tables } => Stage::Merge(tables.into()),
        Commands::Summarize { tables } => Stage::Summarize(tables.into()),
        Commands::Run => Stage::All,
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
    };

    execute(&multi, config, stage).await
}

/// Runs `stage`, writes the run report for multi-year stages and fails
/// the process if any year failed.
async fn execute(
    multi: &MultiProgress,
    config: PipelineConfig,
    stage: Stage,
) -> Result<(), Box<dyn std::error::Error>> {
    log::info!(
        "Years {:?}, compactness {}, output {}",
        config.years,
        config.compactness.value(),
        config.output_dir.display()
    );

    let years_bar = IndicatifProgress::steps_bar(multi, "Years");
    let regions_bar = IndicatifProgress::batch_bar(multi, "Regions");
    let ctx = Arc::new(PipelineContext::new(config).with_progress(years_bar, Arc::clone(&regions_bar)));

    let reports: Vec<RunReport> = match stage {
        Stage::Zonal(kind) => vec![run_zonal(Arc::clone(&ctx), kind).await?],
        Stage::Combine => vec![run_combine(Arc::clone(&ctx)).await?],
        Stage::Surface => vec![run_surface(Arc::clone(&ctx)).await?],
        Stage::All => run_all(Arc::clone(&ctx)).await?,
        Stage::Merge(path) => {
            let table = run_merge(Arc::clone(&ctx), path).await?;
            log::info!("Merged {} records across {} years", table.len(), table.years().len());
            Vec::new()
        }
        Stage::Summarize(path) => {
            let table = run_summarize(Arc::clone(&ctx), path).await?;
            log::info!("Summarized {} region-years", table.len());
            Vec::new()
        }
    };
    regions_bar.finish_and_clear();

    if reports.is_empty() {
        return Ok(());
    }
    save_reports(&ctx, &reports)?;

    let failed: usize = reports.iter().map(|r| r.failed.len()).sum();
    if failed > 0 {
        return Err(format!("{failed} year(s) failed, see {}", ctx.layout.run_report().display()).into());
    }
    Ok(())
}
