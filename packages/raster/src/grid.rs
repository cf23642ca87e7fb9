//! In-memory raster grid and its georeference.

use built_surface_models::Crs;
use geo::{Rect, coord};

use crate::{RasterError, Result};

/// North-up affine transform from pixel to world coordinates.
///
/// Pixel `(col, row)` covers `[origin_x + col * pixel_width,
/// origin_x + (col + 1) * pixel_width]` horizontally and
/// `[origin_y - (row + 1) * pixel_height, origin_y - row * pixel_height]`
/// vertically. Row 0 is the northern edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// World X of the top-left corner.
    pub origin_x: f64,
    /// World Y of the top-left corner.
    pub origin_y: f64,
    /// Pixel size along X (positive).
    pub pixel_width: f64,
    /// Pixel size along Y (positive; rows advance southward).
    pub pixel_height: f64,
}

impl GeoTransform {
    /// World coordinates of the centre of pixel `(col, row)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            (col as f64 + 0.5).mul_add(self.pixel_width, self.origin_x),
            (row as f64 + 0.5).mul_add(-self.pixel_height, self.origin_y),
        )
    }

    /// Fractional column of world X.
    #[must_use]
    pub fn col_of(&self, x: f64) -> f64 {
        (x - self.origin_x) / self.pixel_width
    }

    /// Fractional row of world Y.
    #[must_use]
    pub fn row_of(&self, y: f64) -> f64 {
        (self.origin_y - y) / self.pixel_height
    }

    /// Smallest window of a `width` x `height` grid holding every pixel
    /// whose centre lies in `rect`. `None` when no centre does.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn window_covering(&self, rect: Rect<f64>, width: usize, height: usize) -> Option<PixelWindow> {
        // Pixel i's centre sits at fractional index i + 0.5.
        let first_col = (self.col_of(rect.min().x) - 0.5).ceil().max(0.0);
        let last_col = (self.col_of(rect.max().x) - 0.5).floor().min(width as f64 - 1.0);
        let first_row = (self.row_of(rect.max().y) - 0.5).ceil().max(0.0);
        let last_row = (self.row_of(rect.min().y) - 0.5).floor().min(height as f64 - 1.0);

        if first_col > last_col || first_row > last_row {
            return None;
        }
        Some(PixelWindow {
            col: first_col as usize,
            row: first_row as usize,
            width: (last_col - first_col) as usize + 1,
            height: (last_row - first_row) as usize + 1,
        })
    }

    /// Transform of a window whose top-left pixel is `(col, row)` of this
    /// grid.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn shifted(&self, col: usize, row: usize) -> Self {
        Self {
            origin_x: (col as f64).mul_add(self.pixel_width, self.origin_x),
            origin_y: (row as f64).mul_add(-self.pixel_height, self.origin_y),
            ..*self
        }
    }

    /// World extent of a `width` x `height` grid with this transform.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn extent(&self, width: usize, height: usize) -> Rect<f64> {
        Rect::new(
            coord! { x: self.origin_x, y: (height as f64).mul_add(-self.pixel_height, self.origin_y) },
            coord! { x: (width as f64).mul_add(self.pixel_width, self.origin_x), y: self.origin_y },
        )
    }
}

/// Raw GeoTIFF key directory, carried through unchanged when a derived
/// grid is written back out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeoKeys {
    /// `GeoKeyDirectoryTag` (34735).
    pub directory: Vec<u16>,
    /// `GeoDoubleParamsTag` (34736).
    pub doubles: Option<Vec<f64>>,
    /// `GeoAsciiParamsTag` (34737).
    pub ascii: Option<String>,
}

/// Spatial placement of a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoReference {
    /// Pixel-to-world transform.
    pub transform: GeoTransform,
    /// Coordinate reference system of the world coordinates.
    pub crs: Crs,
    /// Original GeoTIFF keys, when the grid came from a GeoTIFF.
    pub geokeys: Option<GeoKeys>,
}

impl GeoReference {
    /// Georeference of `window` within a grid placed by `self`.
    #[must_use]
    pub fn for_window(&self, window: &PixelWindow) -> Self {
        Self {
            transform: self.transform.shifted(window.col, window.row),
            ..self.clone()
        }
    }

    /// Unit-pixel WGS 84 georeference whose top-left corner sits at
    /// `(0, height)`, so pixel `(c, r)` spans `[c, c+1] x [height-r-1, height-r]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn unit(height: usize) -> Self {
        Self {
            transform: GeoTransform {
                origin_x: 0.0,
                origin_y: height as f64,
                pixel_width: 1.0,
                pixel_height: 1.0,
            },
            crs: Crs::WGS84,
            geokeys: None,
        }
    }
}

/// Whether a stored pixel is the sentinel `nodata`. Compared at `f32`
/// precision, so sentinels that `f32` cannot represent exactly (such as
/// `u32::MAX` or `-9999.9`) still match.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
pub fn is_nodata(value: f32, nodata: f64) -> bool {
    value == nodata as f32
}

#[allow(clippy::cast_possible_truncation)]
fn to_f32_precision(value: f64) -> f64 {
    f64::from(value as f32)
}

/// Rectangular block of pixels, in pixel indices of a larger grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    /// First column.
    pub col: usize,
    /// First row.
    pub row: usize,
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
}

impl PixelWindow {
    /// One past the last column.
    #[must_use]
    pub const fn col_end(&self) -> usize {
        self.col + self.width
    }

    /// One past the last row.
    #[must_use]
    pub const fn row_end(&self) -> usize {
        self.row + self.height
    }

    /// Number of pixels in the window.
    #[must_use]
    pub const fn pixel_count(&self) -> u64 {
        (self.width as u64) * (self.height as u64)
    }
}

/// A single-band `f32` raster held in memory, row-major from the north-west
/// corner.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    width: usize,
    height: usize,
    data: Vec<f32>,
    nodata: Option<f64>,
    georef: GeoReference,
}

impl RasterGrid {
    /// Creates a grid from a row-major pixel buffer.
    ///
    /// `nodata` is rounded to the nearest `f32`, the precision pixels are
    /// stored at, so [`Self::nodata`] always matches the sentinel pixels.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::BufferSize`] if `data.len() != width * height`.
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<f32>,
        nodata: Option<f64>,
        georef: GeoReference,
    ) -> Result<Self> {
        if data.len() != width * height {
            return Err(RasterError::BufferSize {
                len: data.len(),
                width,
                height,
            });
        }
        Ok(Self {
            width,
            height,
            data,
            nodata: nodata.map(to_f32_precision),
            georef,
        })
    }

    /// Grid width in pixels.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Grid height in pixels.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(&self) -> u64 {
        (self.width as u64) * (self.height as u64)
    }

    /// Declared nodata sentinel, if any.
    #[must_use]
    pub const fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// Georeference of the grid.
    #[must_use]
    pub const fn georef(&self) -> &GeoReference {
        &self.georef
    }

    /// Row-major pixel values.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// One row of pixels.
    #[must_use]
    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.width;
        &self.data[start..start + self.width]
    }

    /// Pixel value at `(col, row)`, or `None` outside the grid.
    #[must_use]
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col < self.width && row < self.height {
            Some(self.data[row * self.width + col])
        } else {
            None
        }
    }

    /// Copies `window` (clamped to the grid) into a new grid placed at the
    /// window's position.
    #[must_use]
    pub fn window(&self, window: &PixelWindow) -> Self {
        let col = window.col.min(self.width);
        let row = window.row.min(self.height);
        let clamped = PixelWindow {
            col,
            row,
            width: window.col_end().min(self.width) - col,
            height: window.row_end().min(self.height) - row,
        };

        let mut data = Vec::with_capacity(clamped.width * clamped.height);
        for r in clamped.row..clamped.row_end() {
            data.extend_from_slice(&self.row(r)[clamped.col..clamped.col_end()]);
        }

        Self {
            width: clamped.width,
            height: clamped.height,
            data,
            nodata: self.nodata,
            georef: self.georef.for_window(&clamped),
        }
    }

    /// World extent of the grid.
    #[must_use]
    pub fn extent(&self) -> Rect<f64> {
        self.georef.transform.extent(self.width, self.height)
    }

    /// Whether both grids have the same number of rows and columns.
    #[must_use]
    pub const fn same_shape(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Whether both grids share shape, transform and CRS.
    #[must_use]
    pub fn is_co_registered(&self, other: &Self) -> bool {
        self.same_shape(other)
            && self.georef.transform == other.georef.transform
            && self.georef.crs.is_equivalent(&other.georef.crs)
    }

    /// Fails with [`RasterError::Alignment`] unless both grids have the same
    /// shape.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Alignment`] on a shape mismatch.
    pub fn ensure_same_shape(&self, other: &Self) -> Result<()> {
        if self.same_shape(other) {
            Ok(())
        } else {
            Err(RasterError::Alignment {
                left_width: self.width,
                left_height: self.height,
                right_width: other.width,
                right_height: other.height,
            })
        }
    }
}
