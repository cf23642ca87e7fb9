//! Zonal summation straight from a GeoTIFF on disk.

use built_surface_raster::WindowReader;
use geo::{BoundingRect, MultiPolygon};

use crate::scanline::{Pixels, scanline_sum, validate};
use crate::{ZonalError, ZonalStatistics};

/// [`ZonalStatistics`] that reads only the pixels under each region's
/// bounding box.
///
/// Decoded strips and tiles are cached across regions and dropped on every
/// [`ZonalStatistics::reclaim`], so memory is bounded by the chunks touched
/// between reclaims rather than by the raster size.
#[derive(Debug)]
pub struct WindowedZonalSum {
    reader: WindowReader,
    crossings: Vec<f64>,
}

impl WindowedZonalSum {
    /// Sums over the raster `reader` has open.
    #[must_use]
    pub const fn new(reader: WindowReader) -> Self {
        Self {
            reader,
            crossings: Vec::new(),
        }
    }

    /// The underlying reader.
    #[must_use]
    pub const fn reader(&self) -> &WindowReader {
        &self.reader
    }
}

impl ZonalStatistics for WindowedZonalSum {
    fn pixel_count(&self) -> u64 {
        self.reader.info().pixel_count()
    }

    fn sum(&mut self, geometry: &MultiPolygon<f64>) -> Result<Option<f64>, ZonalError> {
        validate(geometry)?;

        let Some(bounds) = geometry.bounding_rect() else {
            return Ok(None);
        };
        let info = self.reader.info();
        let transform = info.georef.transform;
        let Some(window) = transform.window_covering(bounds, info.width, info.height) else {
            return Ok(None);
        };

        let part = self.reader.window(&window).map_err(|e| ZonalError::Raster {
            message: e.to_string(),
        })?;
        let pixels = Pixels {
            transform: &transform,
            window: &window,
            data: part.data(),
            nodata: part.nodata(),
        };
        scanline_sum(&pixels, geometry, &mut self.crossings)
    }

    fn reclaim(&mut self) {
        self.reader.clear_cache();
        self.crossings = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use built_surface_raster::{GeoReference, RasterGrid, geotiff};
    use built_surface_regions::Region;
    use geo::{Polygon, polygon};

    use super::*;
    use crate::{BatchPolicy, BatchThreshold, ScanlineZonalSum, aggregate};

    const LIMIT: usize = 64 * 1024 * 1024;

    /// Wide enough that the default encoder splits it into strips of 250
    /// rows: rows 0-249, 250-499 and 500-519. Each pixel holds its row
    /// index.
    const WIDTH: usize = 1000;
    const HEIGHT: usize = 520;

    fn rows_grid() -> RasterGrid {
        #[allow(clippy::cast_precision_loss)]
        let data = (0..WIDTH * HEIGHT).map(|i| (i / WIDTH) as f32).collect();
        RasterGrid::new(WIDTH, HEIGHT, data, Some(-9999.0), GeoReference::unit(HEIGHT)).unwrap()
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ]
    }

    /// Region covering rows `first..last` (exclusive) of columns 0-9.
    #[allow(clippy::cast_precision_loss)]
    fn rows_region(id: &str, first: usize, last: usize) -> Region {
        let top = (HEIGHT - first) as f64;
        let bottom = (HEIGHT - last) as f64;
        Region::new(
            id.to_string(),
            None,
            Vec::new(),
            MultiPolygon(vec![rect(0.0, bottom, 10.0, top)]),
        )
    }

    fn open(dir: &tempfile::TempDir, grid: &RasterGrid) -> WindowedZonalSum {
        let path = dir.path().join("rows.tif");
        geotiff::write(&path, grid).unwrap();
        WindowedZonalSum::new(WindowReader::open(&path, LIMIT).unwrap())
    }

    #[test]
    fn matches_in_memory_sums() {
        let dir = tempfile::tempdir().unwrap();
        let grid = rows_grid();
        let mut windowed = open(&dir, &grid);
        assert_eq!(windowed.pixel_count(), grid.pixel_count());

        let regions = [
            rows_region("top", 0, 5),
            rows_region("seam", 245, 255),
            rows_region("bottom", 510, 520),
        ];
        for region in &regions {
            let expected = ScanlineZonalSum::new(&grid).sum(&region.geometry).unwrap();
            let actual = windowed.sum(&region.geometry).unwrap();
            assert_eq!(actual, expected, "region {}", region.id);
        }

        // Rows 0-4 of ten columns: 10 * (0 + 1 + 2 + 3 + 4).
        let top = windowed.sum(&regions[0].geometry).unwrap();
        assert_relative_eq!(top.unwrap(), 100.0);
    }

    #[test]
    fn decodes_only_chunks_under_the_region() {
        let dir = tempfile::tempdir().unwrap();
        let mut windowed = open(&dir, &rows_grid());

        windowed.sum(&rows_region("top", 0, 5).geometry).unwrap();
        assert_eq!(windowed.reader().cached_chunks(), 1);

        windowed.sum(&rows_region("seam", 245, 255).geometry).unwrap();
        assert_eq!(windowed.reader().cached_chunks(), 2);

        windowed.reclaim();
        assert_eq!(windowed.reader().cached_chunks(), 0);
    }

    #[test]
    fn regions_off_the_raster_have_no_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let mut windowed = open(&dir, &rows_grid());

        let outside = MultiPolygon(vec![rect(-50.0, -50.0, -40.0, -40.0)]);
        assert_eq!(windowed.sum(&outside).unwrap(), None);
        assert_eq!(windowed.sum(&MultiPolygon(Vec::new())).unwrap(), None);
        assert_eq!(windowed.reader().cached_chunks(), 0);

        let nan = MultiPolygon(vec![rect(f64::NAN, 0.0, 1.0, 1.0)]);
        assert_eq!(windowed.sum(&nan).unwrap_err(), ZonalError::NonFiniteGeometry);
    }

    #[test]
    fn aggregate_reclaim_empties_chunk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut windowed = open(&dir, &rows_grid());
        let regions = [
            rows_region("a", 0, 5),
            rows_region("b", 300, 305),
            rows_region("c", 510, 515),
        ];
        let policy = BatchPolicy {
            thresholds: vec![BatchThreshold {
                min_pixels: 0,
                batch_size: 2,
            }],
            default_batch_size: 2,
            reclaim_every: 10,
        };

        let run = aggregate(&mut windowed, &regions, &policy, |_| {});

        assert_eq!(run.with_value(), 3);
        assert_eq!(run.reclaims, 2);
        assert_eq!(windowed.reader().cached_chunks(), 0);
    }
}
