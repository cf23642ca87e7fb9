#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Single-band raster grids for the built-surface toolchain.
//!
//! Provides the in-memory [`RasterGrid`] type, GeoTIFF reading and writing
//! ([`geotiff`]), and the masked surface-area calculator ([`surface`]) that
//! combines a built-volume grid with a built-footprint grid.

pub mod geotiff;
pub mod grid;
pub mod surface;

pub use geotiff::{RasterInfo, WindowReader};
pub use grid::{GeoKeys, GeoReference, GeoTransform, PixelWindow, RasterGrid, is_nodata};
pub use surface::{SurfaceOptions, calculate_surface};

use thiserror::Error;

/// Errors that can occur while reading, writing or combining rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    /// A required input raster does not exist.
    #[error("Input raster not found: {path}")]
    MissingInput {
        /// Path that was expected to exist.
        path: String,
    },

    /// I/O error reading or writing a raster file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TIFF decoding or encoding failed.
    #[error("TIFF error in {path}: {source}")]
    Tiff {
        /// Path of the TIFF file.
        path: String,
        /// Underlying TIFF error.
        source: tiff::TiffError,
    },

    /// The file is a TIFF but lacks the georeferencing this toolchain needs.
    #[error("Invalid GeoTIFF {path}: {message}")]
    InvalidGeoTiff {
        /// Path of the TIFF file.
        path: String,
        /// What was missing or malformed.
        message: String,
    },

    /// The raster has a layout (band count, sample type) that is not
    /// supported.
    #[error("Unsupported raster layout in {path}: {message}")]
    UnsupportedLayout {
        /// Path of the raster file.
        path: String,
        /// Description of the layout.
        message: String,
    },

    /// Two grids that must be co-registered have different shapes.
    #[error(
        "Rasters are not aligned: {left_width}x{left_height} vs {right_width}x{right_height}"
    )]
    Alignment {
        /// Width of the first grid.
        left_width: usize,
        /// Height of the first grid.
        left_height: usize,
        /// Width of the second grid.
        right_width: usize,
        /// Height of the second grid.
        right_height: usize,
    },

    /// A pixel buffer does not match the declared grid dimensions.
    #[error("Pixel buffer of {len} values does not match a {width}x{height} grid")]
    BufferSize {
        /// Number of values supplied.
        len: usize,
        /// Declared width.
        width: usize,
        /// Declared height.
        height: usize,
    },
}

/// Convenience result alias for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
