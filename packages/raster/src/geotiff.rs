//! Single-band GeoTIFF reading and writing.
//!
//! Georeferencing is taken from `ModelPixelScale` + `ModelTiepoint` (or a
//! non-rotated `ModelTransformation`), the CRS from the GeoKey directory,
//! and nodata from the `GDAL_NODATA` ASCII tag. Every integer or float
//! sample type is narrowed to `f32` on read, with the nodata test done on
//! the native sample so sentinels `f32` cannot hold exactly still mask.
//! Writes are always deflate-compressed `f32`.
//!
//! [`read`] decodes a whole band. [`WindowReader`] decodes only the strips
//! or tiles a pixel window touches and caches them until told to drop them.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use built_surface_models::Crs;
use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::compression::Deflate;
use tiff::encoder::{TiffEncoder, TiffKind, colortype};
use tiff::tags::Tag;

use crate::grid::{GeoKeys, GeoReference, GeoTransform, PixelWindow, RasterGrid};
use crate::{RasterError, Result};

/// GeoKey holding a geographic CRS EPSG code.
const GEOGRAPHIC_TYPE_GEOKEY: u16 = 2048;

/// GeoKey holding a projected CRS EPSG code.
const PROJECTED_CS_TYPE_GEOKEY: u16 = 3072;

/// GeoKey value meaning "user-defined" (no EPSG code).
const USER_DEFINED: u16 = 32767;

/// Above this many bytes of pixel data the output is written as `BigTIFF`.
const BIGTIFF_THRESHOLD: u64 = 3 * 1024 * 1024 * 1024;

/// Header-level facts about a raster file, read without decoding pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Sample layout as reported by the decoder (e.g. `Gray(16)`).
    pub color_type: String,
    /// Declared nodata sentinel.
    pub nodata: Option<f64>,
    /// Spatial placement.
    pub georef: GeoReference,
}

impl RasterInfo {
    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(&self) -> u64 {
        (self.width as u64) * (self.height as u64)
    }

    /// World extent of the raster.
    #[must_use]
    pub fn extent(&self) -> geo::Rect<f64> {
        self.georef.transform.extent(self.width, self.height)
    }
}

/// Reads a GeoTIFF header (size, sample type, nodata, georeference).
///
/// # Errors
///
/// Returns [`RasterError::MissingInput`] if the file does not exist, or a
/// TIFF/georeferencing error if the header cannot be interpreted.
pub fn read_header(path: &Path, max_decode_bytes: usize) -> Result<RasterInfo> {
    let mut decoder = open_decoder(path, max_decode_bytes)?;
    read_info(&mut decoder, path)
}

/// Reads the first band of a GeoTIFF into memory.
///
/// `max_decode_bytes` bounds the decoder's buffers; a global 30 arc-second
/// grid needs several gigabytes.
///
/// # Errors
///
/// Returns [`RasterError::MissingInput`] if the file does not exist,
/// [`RasterError::UnsupportedLayout`] for multi-band images, or a
/// TIFF/georeferencing error.
pub fn read(path: &Path, max_decode_bytes: usize) -> Result<RasterGrid> {
    let mut decoder = open_decoder(path, max_decode_bytes)?;
    ensure_single_band(&mut decoder, path)?;
    let info = read_info(&mut decoder, path)?;

    log::debug!(
        "Decoding {} ({}x{}, nodata={:?}, crs={})",
        path.display(),
        info.width,
        info.height,
        info.nodata,
        info.georef.crs
    );

    let samples = decoder.read_image().map_err(|e| tiff_err(path, e))?;
    let data = narrow_samples(samples, info.nodata);

    RasterGrid::new(info.width, info.height, data, info.nodata, info.georef)
}

/// One decoded strip or tile.
#[derive(Debug)]
struct Chunk {
    width: usize,
    rows: usize,
    data: Vec<f32>,
}

/// Reads pixel windows of a single-band GeoTIFF, decoding only the strips
/// or tiles each window intersects.
///
/// Decoded chunks stay cached so neighbouring windows do not decode them
/// again; [`WindowReader::clear_cache`] releases them.
pub struct WindowReader {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    info: RasterInfo,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    cache: BTreeMap<u32, Chunk>,
}

impl std::fmt::Debug for WindowReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowReader")
            .field("path", &self.path)
            .field("info", &self.info)
            .field("chunk_width", &self.chunk_width)
            .field("chunk_height", &self.chunk_height)
            .field("cached_chunks", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl WindowReader {
    /// Opens `path` and reads its header. No pixels are decoded yet.
    ///
    /// `max_decode_bytes` bounds the decoder's buffers for a single chunk.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::MissingInput`] if the file does not exist,
    /// [`RasterError::UnsupportedLayout`] for multi-band images, or a
    /// TIFF/georeferencing error.
    pub fn open(path: &Path, max_decode_bytes: usize) -> Result<Self> {
        let mut decoder = open_decoder(path, max_decode_bytes)?;
        ensure_single_band(&mut decoder, path)?;
        let info = read_info(&mut decoder, path)?;

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let (chunk_width, chunk_height) = (chunk_width as usize, chunk_height as usize);
        if chunk_width == 0 || chunk_height == 0 {
            return Err(RasterError::UnsupportedLayout {
                path: path.display().to_string(),
                message: format!("empty {chunk_width}x{chunk_height} chunks"),
            });
        }

        log::debug!(
            "Opened {} ({}x{}, {chunk_width}x{chunk_height} chunks)",
            path.display(),
            info.width,
            info.height
        );

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            chunks_across: info.width.div_ceil(chunk_width),
            info,
            chunk_width,
            chunk_height,
            cache: BTreeMap::new(),
        })
    }

    /// Header of the open raster.
    #[must_use]
    pub const fn info(&self) -> &RasterInfo {
        &self.info
    }

    /// Number of decoded chunks currently held.
    #[must_use]
    pub fn cached_chunks(&self) -> usize {
        self.cache.len()
    }

    /// Drops every decoded chunk.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Pixels of `window`, clamped to the raster, as a grid placed at the
    /// window's world position.
    ///
    /// # Errors
    ///
    /// Returns a TIFF error if a chunk cannot be decoded.
    pub fn window(&mut self, window: &PixelWindow) -> Result<RasterGrid> {
        let (width, height) = (self.info.width, self.info.height);
        let col = window.col.min(width);
        let row = window.row.min(height);
        let clamped = PixelWindow {
            col,
            row,
            width: window.col_end().min(width) - col,
            height: window.row_end().min(height) - row,
        };

        let (cw, ch) = (self.chunk_width, self.chunk_height);
        let mut data = vec![0.0_f32; clamped.width * clamped.height];

        if clamped.pixel_count() > 0 {
            for cy in clamped.row / ch..=(clamped.row_end() - 1) / ch {
                for cx in clamped.col / cw..=(clamped.col_end() - 1) / cw {
                    let (x0, y0) = (cx * cw, cy * ch);
                    let index = u32::try_from(cy * self.chunks_across + cx).map_err(|_| {
                        RasterError::UnsupportedLayout {
                            path: self.path.display().to_string(),
                            message: format!("chunk ({cx}, {cy}) out of range"),
                        }
                    })?;
                    let chunk = load_chunk(
                        &mut self.decoder,
                        &mut self.cache,
                        &self.path,
                        index,
                        ch.min(height - y0),
                        self.info.nodata,
                    )?;

                    let start = clamped.col.max(x0);
                    let end = clamped.col_end().min(x0 + chunk.width);
                    if start >= end {
                        continue;
                    }
                    for r in clamped.row.max(y0)..clamped.row_end().min(y0 + chunk.rows) {
                        let src = (r - y0) * chunk.width + (start - x0);
                        let dst = (r - clamped.row) * clamped.width + (start - clamped.col);
                        data[dst..dst + end - start]
                            .copy_from_slice(&chunk.data[src..src + end - start]);
                    }
                }
            }
        }

        RasterGrid::new(
            clamped.width,
            clamped.height,
            data,
            self.info.nodata,
            self.info.georef.for_window(&clamped),
        )
    }
}

/// Decodes chunk `index` unless it is already cached. `rows` is the number
/// of image rows the chunk holds.
fn load_chunk<'c>(
    decoder: &mut Decoder<BufReader<File>>,
    cache: &'c mut BTreeMap<u32, Chunk>,
    path: &Path,
    index: u32,
    rows: usize,
    nodata: Option<f64>,
) -> Result<&'c Chunk> {
    match cache.entry(index) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let samples = decoder.read_chunk(index).map_err(|e| tiff_err(path, e))?;
            let data = narrow_samples(samples, nodata);
            // Edge tiles come back trimmed to the image.
            let width = data.len() / rows.max(1);
            Ok(entry.insert(Chunk { width, rows, data }))
        }
    }
}

/// Writes a grid as a single-band `f32` GeoTIFF, creating the parent
/// directory if needed.
///
/// # Errors
///
/// Returns an I/O or TIFF error if the file cannot be written.
pub fn write(path: &Path, grid: &RasterGrid) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let writer = BufWriter::new(file);

    if grid.pixel_count() * 4 > BIGTIFF_THRESHOLD {
        let mut encoder = TiffEncoder::new_big(writer).map_err(|e| tiff_err(path, e))?;
        write_image(&mut encoder, grid, path)?;
    } else {
        let mut encoder = TiffEncoder::new(writer).map_err(|e| tiff_err(path, e))?;
        write_image(&mut encoder, grid, path)?;
    }

    log::info!("Surface raster saved to {}", path.display());
    Ok(())
}

fn write_image<W: Write + Seek, K: TiffKind>(
    encoder: &mut TiffEncoder<W, K>,
    grid: &RasterGrid,
    path: &Path,
) -> Result<()> {
    let width = u32::try_from(grid.width()).map_err(|_| too_large(path, grid))?;
    let height = u32::try_from(grid.height()).map_err(|_| too_large(path, grid))?;

    let mut image = encoder
        .new_image_with_compression::<colortype::Gray32Float, _>(width, height, Deflate::default())
        .map_err(|e| tiff_err(path, e))?;

    let georef = grid.georef();
    let transform = georef.transform;
    {
        let dir = image.encoder();
        dir.write_tag(
            Tag::ModelPixelScaleTag,
            &[transform.pixel_width, transform.pixel_height, 0.0][..],
        )
        .map_err(|e| tiff_err(path, e))?;
        dir.write_tag(
            Tag::ModelTiepointTag,
            &[0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0][..],
        )
        .map_err(|e| tiff_err(path, e))?;

        let geokeys = georef
            .geokeys
            .clone()
            .unwrap_or_else(|| geokeys_for(&georef.crs));
        if !geokeys.directory.is_empty() {
            dir.write_tag(Tag::GeoKeyDirectoryTag, &geokeys.directory[..])
                .map_err(|e| tiff_err(path, e))?;
        }
        if let Some(doubles) = &geokeys.doubles {
            dir.write_tag(Tag::GeoDoubleParamsTag, &doubles[..])
                .map_err(|e| tiff_err(path, e))?;
        }
        if let Some(ascii) = &geokeys.ascii {
            dir.write_tag(Tag::GeoAsciiParamsTag, ascii.as_str())
                .map_err(|e| tiff_err(path, e))?;
        }

        if let Some(nodata) = grid.nodata() {
            // Shortest text that parses back to the stored f32 sentinel.
            #[allow(clippy::cast_possible_truncation)]
            let text = (nodata as f32).to_string();
            dir.write_tag(Tag::GdalNodata, text.as_str())
                .map_err(|e| tiff_err(path, e))?;
        }
    }

    image.write_data(grid.data()).map_err(|e| tiff_err(path, e))?;
    Ok(())
}

fn open_decoder(path: &Path, max_decode_bytes: usize) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RasterError::MissingInput {
                path: path.display().to_string(),
            }
        } else {
            io_err(path, e)
        }
    })?;

    let mut limits = Limits::default();
    limits.decoding_buffer_size = max_decode_bytes;
    limits.intermediate_buffer_size = max_decode_bytes;
    limits.ifd_value_size = max_decode_bytes;

    Ok(Decoder::new(BufReader::new(file))
        .map_err(|e| tiff_err(path, e))?
        .with_limits(limits))
}

fn ensure_single_band<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<()> {
    match decoder.colortype().map_err(|e| tiff_err(path, e))? {
        ColorType::Gray(_) => Ok(()),
        other => Err(RasterError::UnsupportedLayout {
            path: path.display().to_string(),
            message: format!("expected a single-band image, found {other:?}"),
        }),
    }
}

fn read_info<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<RasterInfo> {
    let (width, height) = decoder.dimensions().map_err(|e| tiff_err(path, e))?;
    let color_type = decoder.colortype().map_err(|e| tiff_err(path, e))?;
    let georef = read_georeference(decoder, path)?;
    let nodata = read_nodata(decoder);

    Ok(RasterInfo {
        width: width as usize,
        height: height as usize,
        color_type: format!("{color_type:?}"),
        nodata,
        georef,
    })
}

fn read_georeference<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<GeoReference> {
    let transform = read_transform(decoder, path)?;
    let geokeys = read_geokeys(decoder);
    let crs = geokeys
        .as_ref()
        .map_or_else(|| Crs::Unknown("unspecified".to_string()), crs_from_geokeys);

    Ok(GeoReference {
        transform,
        crs,
        geokeys,
    })
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<GeoTransform> {
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
    let pixel_scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);

    if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale)
        && tiepoint.len() >= 6
        && scale.len() >= 2
    {
        // Tiepoint: [i, j, k, x, y, z] maps pixel (i, j) to world (x, y).
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        return Ok(GeoTransform {
            origin_x: i.mul_add(-scale[0], x),
            origin_y: j.mul_add(scale[1], y),
            pixel_width: scale[0],
            pixel_height: scale[1],
        });
    }

    if let Ok(matrix) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag)
        && matrix.len() >= 16
    {
        if matrix[1] != 0.0 || matrix[4] != 0.0 {
            return Err(RasterError::UnsupportedLayout {
                path: path.display().to_string(),
                message: "rotated model transformation".to_string(),
            });
        }
        return Ok(GeoTransform {
            origin_x: matrix[3],
            origin_y: matrix[7],
            pixel_width: matrix[0],
            pixel_height: -matrix[5],
        });
    }

    Err(RasterError::InvalidGeoTiff {
        path: path.display().to_string(),
        message: "no ModelTiepoint/ModelPixelScale or ModelTransformation tags".to_string(),
    })
}

fn read_geokeys<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoKeys> {
    let directory = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).ok()?;
    Some(GeoKeys {
        directory,
        doubles: decoder.get_tag_f64_vec(Tag::GeoDoubleParamsTag).ok(),
        ascii: decoder.get_tag_ascii_string(Tag::GeoAsciiParamsTag).ok(),
    })
}

/// Extracts the EPSG code from a GeoKey directory. Projected codes win
/// over geographic ones.
fn crs_from_geokeys(keys: &GeoKeys) -> Crs {
    let dir = &keys.directory;
    if dir.len() < 4 {
        return Crs::Unknown("malformed GeoKey directory".to_string());
    }

    let count = usize::from(dir[3]);
    let mut geographic = None;
    let mut projected = None;

    for entry in dir[4..].chunks_exact(4).take(count) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key {
            GEOGRAPHIC_TYPE_GEOKEY => geographic = Some(value),
            PROJECTED_CS_TYPE_GEOKEY => projected = Some(value),
            _ => {}
        }
    }

    match projected.or(geographic) {
        Some(USER_DEFINED) => Crs::Unknown("user-defined".to_string()),
        Some(code) => Crs::Epsg(u32::from(code)),
        None => Crs::Unknown("no EPSG GeoKey".to_string()),
    }
}

/// Minimal GeoKey directory for an EPSG code, used when a grid did not come
/// from a GeoTIFF.
fn geokeys_for(crs: &Crs) -> GeoKeys {
    // GTModelTypeGeoKey (1024): 1 = projected, 2 = geographic.
    // GTRasterTypeGeoKey (1025): 1 = PixelIsArea.
    let epsg = match crs {
        Crs::Epsg(code) => u16::try_from(*code).ok(),
        Crs::Crs84 => Some(4326),
        Crs::Unknown(_) => None,
    };
    let Some(code) = epsg else {
        return GeoKeys::default();
    };

    let geographic = (4000..5000).contains(&code);
    let (model_type, crs_key) = if geographic {
        (2, GEOGRAPHIC_TYPE_GEOKEY)
    } else {
        (1, PROJECTED_CS_TYPE_GEOKEY)
    };

    GeoKeys {
        directory: vec![
            1, 1, 0, 3, //
            1024, 0, 1, model_type, //
            1025, 0, 1, 1, //
            crs_key, 0, 1, code,
        ],
        doubles: None,
        ascii: None,
    }
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse().ok())
}

/// Converts decoded samples to `f32`. Samples equal to `nodata` in their
/// own type become the `f32` sentinel; other samples that would round onto
/// the sentinel are nudged one step off it.
#[allow(clippy::cast_precision_loss)]
fn narrow_samples(samples: DecodingResult, nodata: Option<f64>) -> Vec<f32> {
    match samples {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => narrow(data, |v| v, nodata),
        DecodingResult::I8(data) => narrow(data, f64::from, nodata),
        DecodingResult::I16(data) => narrow(data, f64::from, nodata),
        DecodingResult::I32(data) => narrow(data, f64::from, nodata),
        DecodingResult::I64(data) => narrow(data, |v| v as f64, nodata),
        DecodingResult::U8(data) => narrow(data, f64::from, nodata),
        DecodingResult::U16(data) => narrow(data, f64::from, nodata),
        DecodingResult::U32(data) => narrow(data, f64::from, nodata),
        DecodingResult::U64(data) => narrow(data, |v| v as f64, nodata),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn narrow<T>(data: Vec<T>, widen: impl Fn(T) -> f64, nodata: Option<f64>) -> Vec<f32> {
    let Some(nodata) = nodata else {
        return data.into_iter().map(|v| widen(v) as f32).collect();
    };
    let sentinel = nodata as f32;

    data.into_iter()
        .map(|v| {
            let wide = widen(v);
            if wide == nodata {
                return sentinel;
            }
            let narrowed = wide as f32;
            if narrowed != sentinel {
                narrowed
            } else if wide < nodata {
                narrowed.next_down()
            } else {
                narrowed.next_up()
            }
        })
        .collect()
}

fn tiff_err(path: &Path, source: tiff::TiffError) -> RasterError {
    RasterError::Tiff {
        path: path.display().to_string(),
        source,
    }
}

fn io_err(path: &Path, source: std::io::Error) -> RasterError {
    RasterError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn too_large(path: &Path, grid: &RasterGrid) -> RasterError {
    RasterError::UnsupportedLayout {
        path: path.display().to_string(),
        message: format!("{}x{} exceeds TIFF dimensions", grid.width(), grid.height()),
    }
}
