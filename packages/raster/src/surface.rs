//! Masked surface-area raster arithmetic.
//!
//! For every pixel where both the volume and the footprint are valid,
//! `surface = C * volume / sqrt(footprint) + footprint`. All other pixels
//! receive the output nodata value.

use built_surface_models::{Compactness, DEFAULT_NODATA};

use crate::grid::{RasterGrid, is_nodata};
use crate::Result;

/// Options for [`calculate_surface`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SurfaceOptions {
    /// Compactness coefficient `C`.
    pub compactness: Compactness,
    /// Nodata value written to invalid pixels. Falls back to the volume
    /// grid's nodata, then to `-9999`.
    pub output_nodata: Option<f64>,
}

impl SurfaceOptions {
    /// Nodata value that will be written for a given volume grid.
    #[must_use]
    pub fn resolve_nodata(&self, volume: &RasterGrid) -> f64 {
        self.output_nodata
            .or_else(|| volume.nodata())
            .unwrap_or(DEFAULT_NODATA)
    }
}

/// Computes a surface-area grid from co-registered volume and footprint
/// grids.
///
/// A pixel is valid when its footprint is `> 0`, its volume is `> 0`, and
/// neither equals its grid's nodata (`-9999` when undeclared). Nodata is
/// matched at the `f32` precision pixels are stored at. The output inherits
/// the volume grid's georeference.
///
/// # Errors
///
/// Returns [`crate::RasterError::Alignment`] if the grids differ in shape.
#[allow(clippy::cast_possible_truncation)]
pub fn calculate_surface(
    volume: &RasterGrid,
    footprint: &RasterGrid,
    options: &SurfaceOptions,
) -> Result<RasterGrid> {
    volume.ensure_same_shape(footprint)?;

    if !volume.is_co_registered(footprint) {
        log::warn!(
            "Volume and footprint grids share a shape but not a georeference; \
             combining pixel-by-pixel"
        );
    }

    let vol_nodata = volume.nodata().unwrap_or(DEFAULT_NODATA);
    let fp_nodata = footprint.nodata().unwrap_or(DEFAULT_NODATA);
    let out_nodata = options.resolve_nodata(volume);
    let c = options.compactness.value();

    let mut valid = 0_u64;
    let data: Vec<f32> = volume
        .data()
        .iter()
        .zip(footprint.data())
        .map(|(&vol, &fp)| {
            let ok = fp > 0.0
                && vol > 0.0
                && !is_nodata(vol, vol_nodata)
                && !is_nodata(fp, fp_nodata);
            if ok {
                valid += 1;
                let (vol, fp) = (f64::from(vol), f64::from(fp));
                (c * vol / fp.sqrt() + fp) as f32
            } else {
                out_nodata as f32
            }
        })
        .collect();

    log::info!(
        "Surface raster: {valid} of {} pixels valid (C={c}, nodata={out_nodata})",
        volume.pixel_count()
    );

    RasterGrid::new(
        volume.width(),
        volume.height(),
        data,
        Some(out_nodata),
        volume.georef().clone(),
    )
}
