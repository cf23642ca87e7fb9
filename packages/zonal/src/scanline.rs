//! Pixel-centre zonal summation by scanline.
//!
//! For each raster row that a polygon's bounding box covers, the row's
//! pixel-centre line is intersected with every ring edge. Sorting the
//! crossings gives even-odd spans; pixels whose centre falls in
//! `[start, end)` of a span are inside. Interior rings contribute crossings
//! too, so holes are excluded without special handling.
//!
//! The scan runs over a [`PixelWindow`] of a larger grid in the grid's own
//! pixel indices, so summing a window read from disk visits exactly the
//! pixels a scan of the whole grid would.

use built_surface_raster::{GeoTransform, PixelWindow, RasterGrid, is_nodata};
use geo::{BoundingRect, LineString, MultiPolygon, Polygon};

use crate::{ZonalError, ZonalStatistics};

/// Minimum number of coordinates in a closed ring.
const MIN_RING_COORDS: usize = 4;

/// [`ZonalStatistics`] over a grid held in memory.
#[derive(Debug)]
pub struct ScanlineZonalSum<'g> {
    grid: &'g RasterGrid,
    crossings: Vec<f64>,
}

impl<'g> ScanlineZonalSum<'g> {
    /// Creates a summer over `grid` with empty scratch buffers.
    #[must_use]
    pub const fn new(grid: &'g RasterGrid) -> Self {
        Self {
            grid,
            crossings: Vec::new(),
        }
    }

    /// Current scratch capacity, in crossings.
    #[must_use]
    pub fn scratch_capacity(&self) -> usize {
        self.crossings.capacity()
    }
}

impl ZonalStatistics for ScanlineZonalSum<'_> {
    fn pixel_count(&self) -> u64 {
        self.grid.pixel_count()
    }

    fn sum(&mut self, geometry: &MultiPolygon<f64>) -> Result<Option<f64>, ZonalError> {
        let whole = PixelWindow {
            col: 0,
            row: 0,
            width: self.grid.width(),
            height: self.grid.height(),
        };
        let pixels = Pixels {
            transform: &self.grid.georef().transform,
            window: &whole,
            data: self.grid.data(),
            nodata: self.grid.nodata(),
        };
        scanline_sum(&pixels, geometry, &mut self.crossings)
    }

    fn reclaim(&mut self) {
        self.crossings = Vec::new();
    }
}

/// Row-major `data` covering `window` of the grid placed by `transform`.
pub(crate) struct Pixels<'a> {
    pub transform: &'a GeoTransform,
    pub window: &'a PixelWindow,
    pub data: &'a [f32],
    pub nodata: Option<f64>,
}

impl Pixels<'_> {
    /// Pixels of grid row `row` from grid column `start` up to `end`.
    fn span(&self, row: usize, start: usize, end: usize) -> &[f32] {
        let base = (row - self.window.row) * self.window.width;
        &self.data[base + start - self.window.col..base + end - self.window.col]
    }
}

/// Sums the valid pixels of `pixels` whose centres lie inside `geometry`.
/// `crossings` is scratch space reused between calls.
pub(crate) fn scanline_sum(
    pixels: &Pixels<'_>,
    geometry: &MultiPolygon<f64>,
    crossings: &mut Vec<f64>,
) -> Result<Option<f64>, ZonalError> {
    validate(geometry)?;

    let mut total = 0.0_f64;
    let mut count = 0_u64;

    for polygon in geometry {
        let Some((first_row, last_row)) = row_range(pixels, polygon) else {
            continue;
        };

        for row in first_row..=last_row {
            let (_, y) = pixels.transform.pixel_center(0, row);
            collect_crossings(polygon, y, crossings);

            for span in crossings.chunks_exact(2) {
                let (start, end) = column_span(pixels, span[0], span[1]);
                for &value in pixels.span(row, start, end) {
                    let masked = pixels.nodata.is_some_and(|nd| is_nodata(value, nd));
                    if value.is_finite() && !masked {
                        total += f64::from(value);
                        count += 1;
                    }
                }
            }
        }
    }

    Ok((count > 0).then_some(total))
}

/// Fills `crossings` with the sorted X coordinates where the horizontal
/// line at `y` crosses the polygon's rings.
fn collect_crossings(polygon: &Polygon<f64>, y: f64, crossings: &mut Vec<f64>) {
    crossings.clear();
    for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
        for line in ring.lines() {
            let (a, b) = (line.start, line.end);
            if (a.y > y) != (b.y > y) {
                let t = (y - a.y) / (b.y - a.y);
                crossings.push(t.mul_add(b.x - a.x, a.x));
            }
        }
    }
    crossings.sort_by(f64::total_cmp);
}

/// Rejects non-finite coordinates and rings too short to close.
pub(crate) fn validate(geometry: &MultiPolygon<f64>) -> Result<(), ZonalError> {
    for polygon in geometry {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            validate_ring(ring)?;
        }
    }
    Ok(())
}

fn validate_ring(ring: &LineString<f64>) -> Result<(), ZonalError> {
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(ZonalError::NonFiniteGeometry);
    }
    if ring.0.len() < MIN_RING_COORDS {
        return Err(ZonalError::InvalidGeometry {
            message: format!(
                "ring has {} coordinates, at least {MIN_RING_COORDS} required",
                ring.0.len()
            ),
        });
    }
    Ok(())
}

/// Rows whose pixel centre lies within the polygon's vertical extent,
/// clamped to the window.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn row_range(pixels: &Pixels<'_>, polygon: &Polygon<f64>) -> Option<(usize, usize)> {
    let bounds = polygon.bounding_rect()?;
    let window = pixels.window;
    if window.height == 0 {
        return None;
    }
    let min_row = window.row as f64;
    let max_row = (window.row_end() - 1) as f64;

    // Row r's centre is at fractional row r + 0.5.
    let first = (pixels.transform.row_of(bounds.max().y) - 0.5).ceil().max(min_row);
    let last = (pixels.transform.row_of(bounds.min().y) - 0.5).floor();

    if last < min_row || first > max_row || first > last {
        return None;
    }
    Some((first as usize, last.min(max_row) as usize))
}

/// Columns whose pixel centre lies in `[x_start, x_end)`, as a half-open
/// range of grid columns clamped to the window.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn column_span(pixels: &Pixels<'_>, x_start: f64, x_end: f64) -> (usize, usize) {
    let (lo, hi) = (pixels.window.col as f64, pixels.window.col_end() as f64);
    let start = (pixels.transform.col_of(x_start) - 0.5).ceil().clamp(lo, hi);
    let end = (pixels.transform.col_of(x_end) - 0.5).ceil().clamp(lo, hi);
    if end <= start {
        return (pixels.window.col, pixels.window.col);
    }
    (start as usize, end as usize)
}
