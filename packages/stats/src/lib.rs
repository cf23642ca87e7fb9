#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Regional statistic tables.
//!
//! Turns per-region zonal sums into per-year [`YearTable`]s
//! ([`builder`]), concatenates years ([`merge`]), and re-aggregates by
//! region and year with derived metrics recomputed from the summed bases
//! ([`reaggregate`]). [`table_io`] persists both zonal and per-year tables as
//! UTF-8 CSV with a byte-order mark.

pub mod builder;
pub mod merge;
pub mod reaggregate;
pub mod summary;
pub mod table_io;
pub mod zonal_table;

pub use builder::{build_direct_surface, build_volume_footprint};
pub use merge::merge_years;
pub use reaggregate::reaggregate_by_region;
pub use summary::{MetricSummary, ValueRange, ZonalSummary};
pub use zonal_table::{ZonalRecord, ZonalTable};

use built_surface_models::{BaseMetric, MetricPath, YearTable};
use thiserror::Error;

/// Errors that can occur while building, merging or persisting tables.
#[derive(Debug, Error)]
pub enum StatsError {
    /// CSV reading or writing failed.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// Path of the table.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// I/O error reading or writing a table.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path of the table.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A required column is absent from a table.
    #[error("Column '{column}' missing from {path}")]
    MissingColumn {
        /// Column that was required.
        column: String,
        /// Path of the table.
        path: String,
    },

    /// A cell could not be parsed.
    #[error("Invalid value '{value}' in column '{column}' of {path}")]
    InvalidValue {
        /// Offending cell text.
        value: String,
        /// Column of the cell.
        column: String,
        /// Path of the table.
        path: String,
    },

    /// Tables of different metric paths were combined.
    #[error("Cannot combine a {expected} table with a {found} table")]
    PathMismatch {
        /// Path of the first table.
        expected: MetricPath,
        /// Path of the offending table.
        found: MetricPath,
    },

    /// A zonal table of the wrong metric was supplied.
    #[error("Expected a {expected} zonal table, found {found}")]
    KindMismatch {
        /// Metric that was required.
        expected: BaseMetric,
        /// Metric that was supplied.
        found: BaseMetric,
    },

    /// Nothing to merge.
    #[error("No per-year tables to merge")]
    NoTables,
}

/// Convenience result alias for table operations.
pub type Result<T> = std::result::Result<T, StatsError>;

/// Sorts a table by region then year and returns it.
#[must_use]
pub(crate) fn sorted(mut table: YearTable) -> YearTable {
    table.sort_by_region_year();
    table
}
