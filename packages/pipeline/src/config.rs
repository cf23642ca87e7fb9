//! Pipeline configuration.
//!
//! The default configuration is baked into the binary from
//! `config/default.toml` via [`include_str!`]. A user config is parsed on
//! top of the same defaults, so it only needs the keys it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use built_surface_models::{BaseMetric, Compactness, NAME_COLUMN, REGION_ID_COLUMN};
use built_surface_regions::RegionFields;
use built_surface_zonal::BatchPolicy;
use serde::{Deserialize, Serialize};

use crate::{PipelineError, Result};

/// The embedded default configuration.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

/// Placeholder replaced by the year in input path templates.
pub const YEAR_PLACEHOLDER: &str = "{year}";

/// Input locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    /// Built-volume raster path template.
    pub volume: String,
    /// Built-footprint raster path template.
    pub footprint: String,
    /// Region boundaries (`GeoJSON`), shared by every year.
    pub boundaries: PathBuf,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            volume: "data/GHS_BUILT_V_E{year}_GLOBE_R2023A_4326_30ss_V1_0/GHS_BUILT_V_E{year}_GLOBE_R2023A_4326_30ss_V1_0.tif".to_string(),
            footprint: "data/GHS_BUILT_S_E{year}_GLOBE_R2023A_4326_30ss_V1_0/GHS_BUILT_S_E{year}_GLOBE_R2023A_4326_30ss_V1_0.tif".to_string(),
            boundaries: PathBuf::from("data/WB_GAD_ADM0_complete.geojson"),
        }
    }
}

/// Region property names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    /// Identifier property.
    pub id: String,
    /// Display-name property.
    pub name: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            id: REGION_ID_COLUMN.to_string(),
            name: NAME_COLUMN.to_string(),
        }
    }
}

impl From<&FieldNames> for RegionFields {
    fn from(fields: &FieldNames) -> Self {
        Self {
            id: fields.id.clone(),
            name: fields.name.clone(),
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Years to process, in order.
    pub years: Vec<i32>,
    /// Root of every output artifact.
    pub output_dir: PathBuf,
    /// Compactness coefficient used by every derivation.
    pub compactness: Compactness,
    /// Nodata value for generated surface rasters.
    pub output_nodata: Option<f64>,
    /// Pause between consecutive years, in seconds.
    pub pause_secs: f64,
    /// Upper bound on GeoTIFF decoder buffers, in bytes.
    pub max_decode_bytes: usize,
    /// Input locations.
    pub inputs: InputPaths,
    /// Region property names.
    pub fields: FieldNames,
    /// Zonal batch sizing.
    pub batching: BatchPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            years: vec![
                1975, 1980, 1985, 1990, 1995, 2000, 2005, 2010, 2015, 2020, 2025, 2030,
            ],
            output_dir: PathBuf::from("surface_results"),
            compactness: Compactness::default(),
            output_nodata: None,
            pause_secs: 3.0,
            max_decode_bytes: 16 * 1024 * 1024 * 1024,
            inputs: InputPaths::default(),
            fields: FieldNames::default(),
            batching: BatchPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads `path`, or the embedded default when `None`, and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`], [`PipelineError::ConfigParse`] or
    /// [`PipelineError::Config`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| PipelineError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?;
                let config = Self::from_toml_str(&text, &path.display().to_string())?;
                log::info!("Loaded config from {}", path.display());
                config
            }
            None => Self::from_toml_str(DEFAULT_CONFIG_TOML, "<embedded>")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document. Missing keys take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigParse`] on malformed TOML.
    pub fn from_toml_str(text: &str, source: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipelineError::ConfigParse {
            path: source.to_string(),
            source: Box::new(e),
        })
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(PipelineError::Config { message });

        if self.years.is_empty() {
            return invalid("no years configured".to_string());
        }
        if !self.compactness.value().is_finite() || self.compactness.value() <= 0.0 {
            return invalid(format!(
                "compactness must be a positive number, got {}",
                self.compactness.value()
            ));
        }
        if !self.pause_secs.is_finite() || self.pause_secs < 0.0 {
            return invalid(format!(
                "pause_secs must be zero or positive, got {}",
                self.pause_secs
            ));
        }
        if self.output_nodata.is_some_and(|v| !v.is_finite()) {
            return invalid("output_nodata must be finite".to_string());
        }
        self.batching.validate()?;
        Ok(())
    }

    /// Pause between consecutive years.
    #[must_use]
    pub fn pause(&self) -> Duration {
        Duration::from_secs_f64(self.pause_secs.max(0.0))
    }

    /// Input raster of `kind` for `year`. Surface rasters are pipeline
    /// outputs, see [`crate::ArtifactLayout::surface_raster`].
    #[must_use]
    pub fn raster_path(&self, kind: BaseMetric, year: i32) -> Option<PathBuf> {
        let template = match kind {
            BaseMetric::Volume => &self.inputs.volume,
            BaseMetric::Footprint => &self.inputs.footprint,
            BaseMetric::Surface => return None,
        };
        Some(fill_year(template, year))
    }

    /// Region property names for the regions loader.
    #[must_use]
    pub fn region_fields(&self) -> RegionFields {
        RegionFields::from(&self.fields)
    }
}

/// Substitutes `year` for every `{year}` in `template`.
#[must_use]
pub fn fill_year(template: &str, year: i32) -> PathBuf {
    PathBuf::from(template.replace(YEAR_PLACEHOLDER, &year.to_string()))
}
