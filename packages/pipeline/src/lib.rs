#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Year-by-year orchestration of the built-surface toolchain.
//!
//! Each stage persists its output under the configured output directory
//! ([`layout::ArtifactLayout`]) so any stage can be rerun on its own:
//!
//! 1. zonal sums of the volume and footprint rasters per year
//!    ([`run_zonal`]);
//! 2. the per-year join with derived metrics, the multi-year merge and the
//!    ISO re-aggregation ([`run_combine`]);
//! 3. or, raster-first, a surface raster per year summed directly
//!    ([`run_surface`]).
//!
//! Years run strictly one after another on a blocking thread, separated by a
//! configurable pause. A failing year is recorded in the [`RunReport`] and
//! the run moves on.

pub mod config;
pub mod layout;
pub mod progress;
pub mod report;
pub mod runner;
pub mod steps;

pub use config::PipelineConfig;
pub use layout::ArtifactLayout;
pub use progress::{NullProgress, ProgressCallback, null_progress};
pub use report::{RunReport, YearFailure};
pub use runner::{
    run_all, run_combine, run_merge, run_summarize, run_surface, run_zonal, save_reports,
};
pub use steps::PipelineContext;

use built_surface_raster::RasterError;
use built_surface_regions::RegionError;
use built_surface_stats::StatsError;
use built_surface_zonal::ZonalError;
use thiserror::Error;

/// Errors that can occur while running a pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration is invalid.
    #[error("Invalid configuration: {message}")]
    Config {
        /// What is wrong.
        message: String,
    },

    /// A configuration file could not be parsed.
    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        /// Path (or `<embedded>`) of the config.
        path: String,
        /// Underlying TOML error.
        source: Box<toml::de::Error>,
    },

    /// I/O error outside the raster and table layers.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Raster read, write or arithmetic failed.
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// Region loading or reprojection failed.
    #[error(transparent)]
    Regions(#[from] RegionError),

    /// Zonal summation could not start.
    #[error(transparent)]
    Zonal(#[from] ZonalError),

    /// Table building or persistence failed.
    #[error(transparent)]
    Stats(#[from] StatsError),

    /// A blocking worker task panicked or was cancelled.
    #[error("Worker task failed: {message}")]
    Task {
        /// Join error description.
        message: String,
    },

    /// The run report could not be serialized.
    #[error("Failed to serialize run report: {0}")]
    Report(#[from] serde_json::Error),
}

/// Convenience result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
