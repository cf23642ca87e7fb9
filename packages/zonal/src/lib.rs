#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Zonal summation of a raster over region polygons.
//!
//! [`aggregate`] walks regions in bounded batches whose size shrinks as the
//! raster grows ([`BatchPolicy`]), asks a [`ZonalStatistics`] implementation
//! for one sum per region, and turns every per-region error into a
//! [`RegionOutcome::Failed`] so a single bad geometry never aborts a year.
//! Both shipped implementations use pixel-centre inclusion:
//! [`ScanlineZonalSum`] over a grid already in memory, and
//! [`WindowedZonalSum`] over a GeoTIFF on disk, decoding only the chunks
//! under each region and releasing them on [`ZonalStatistics::reclaim`].

pub mod aggregate;
pub mod batch;
pub mod scanline;
pub mod windowed;

pub use aggregate::{ZonalRun, aggregate};
pub use batch::{BatchPolicy, BatchThreshold};
pub use scanline::ScanlineZonalSum;
pub use windowed::WindowedZonalSum;

use geo::MultiPolygon;
use thiserror::Error;

/// Errors raised while summing a single region, or by an invalid batch
/// policy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ZonalError {
    /// The region geometry is structurally invalid.
    #[error("Invalid geometry: {message}")]
    InvalidGeometry {
        /// What is wrong with the geometry.
        message: String,
    },

    /// The region geometry contains NaN or infinite coordinates.
    #[error("Geometry contains non-finite coordinates")]
    NonFiniteGeometry,

    /// Pixels under the region could not be read.
    #[error("Raster read failed: {message}")]
    Raster {
        /// Underlying raster error.
        message: String,
    },

    /// A batch policy violates its constraints.
    #[error("Invalid batch policy: {message}")]
    InvalidPolicy {
        /// Which constraint was violated.
        message: String,
    },
}

/// Result of summing one region.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionOutcome {
    /// At least one valid pixel fell inside the region.
    Value(f64),
    /// No valid pixel fell inside the region.
    NoCoverage,
    /// Summation failed; the reason is kept for reporting.
    Failed(String),
}

impl RegionOutcome {
    /// The sum, or `None` for both no coverage and failure.
    #[must_use]
    pub const fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::NoCoverage | Self::Failed(_) => None,
        }
    }

    /// Whether summation failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Computes the sum of valid pixels of one raster inside a geometry.
pub trait ZonalStatistics {
    /// Pixel count of the raster being summed, used to size batches.
    fn pixel_count(&self) -> u64;

    /// Sums every pixel whose centre lies inside `geometry` and whose value
    /// is finite and not the raster's nodata. Returns `Ok(None)` when no
    /// pixel qualifies.
    ///
    /// # Errors
    ///
    /// Returns a [`ZonalError`] when the geometry cannot be processed or
    /// its pixels cannot be read.
    fn sum(&mut self, geometry: &MultiPolygon<f64>) -> Result<Option<f64>, ZonalError>;

    /// Releases memory held between calls.
    fn reclaim(&mut self) {}
}
