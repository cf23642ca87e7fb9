#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Administrative region boundaries.
//!
//! Loads a `GeoJSON` `FeatureCollection` into an ordered
//! [`RegionCollection`], resolves its CRS from the legacy `crs` member,
//! harmonizes it with a raster's CRS through a [`Reprojector`], and checks
//! how many regions overlap a raster's extent using an R-tree.

pub mod overlap;

use std::path::Path;

use built_surface_models::{Crs, NAME_COLUMN, REGION_ID_COLUMN};
use geo::{BoundingRect, MultiPolygon, Rect, coord};
use geojson::{FeatureCollection, GeoJson, JsonObject, JsonValue};
use thiserror::Error;

pub use overlap::{OverlapReport, check_overlap};

/// Errors that can occur while loading or harmonizing regions.
#[derive(Debug, Error)]
pub enum RegionError {
    /// The boundaries file does not exist.
    #[error("Boundaries file not found: {path}")]
    MissingInput {
        /// Path that was expected to exist.
        path: String,
    },

    /// I/O error reading the boundaries file.
    #[error("I/O error reading {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid `GeoJSON`.
    #[error("Invalid GeoJSON in {path}: {source}")]
    GeoJson {
        /// Path of the boundaries file.
        path: String,
        /// Underlying parse error.
        source: Box<geojson::Error>,
    },

    /// The `GeoJSON` document is not a `FeatureCollection`.
    #[error("Expected a FeatureCollection in {path}")]
    NotFeatureCollection {
        /// Path of the boundaries file.
        path: String,
    },

    /// The regions cannot be brought into the raster's CRS.
    #[error("Cannot reproject regions from {from} to {to}")]
    CoordinateSystem {
        /// CRS of the regions.
        from: Crs,
        /// CRS that was requested.
        to: Crs,
    },
}

/// Convenience result alias for region operations.
pub type Result<T> = std::result::Result<T, RegionError>;

/// Property names used to identify and label regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionFields {
    /// Property holding the stable region identifier.
    pub id: String,
    /// Property holding the display name.
    pub name: String,
}

impl Default for RegionFields {
    fn default() -> Self {
        Self {
            id: REGION_ID_COLUMN.to_string(),
            name: NAME_COLUMN.to_string(),
        }
    }
}

/// One administrative region.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Stable identifier (e.g. an ISO 3166 alpha-3 code).
    pub id: String,
    /// Display name, if the feature carries one.
    pub name: Option<String>,
    /// Every feature property, stringified, in input order.
    pub attributes: Vec<(String, String)>,
    /// Polygon geometry. Empty for features that are not polygonal.
    pub geometry: MultiPolygon<f64>,
    /// Bounding box of `geometry`, `None` when it is empty.
    pub bounds: Option<Rect<f64>>,
}

impl Region {
    /// Creates a region and computes its bounds.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        attributes: Vec<(String, String)>,
        geometry: MultiPolygon<f64>,
    ) -> Self {
        let bounds = geometry.bounding_rect();
        Self {
            id: id.into(),
            name,
            attributes,
            geometry,
            bounds,
        }
    }
}

/// Ordered regions sharing one CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionCollection {
    /// Regions in file order.
    pub regions: Vec<Region>,
    /// CRS of every geometry in `regions`.
    pub crs: Crs,
}

impl RegionCollection {
    /// Loads a `GeoJSON` `FeatureCollection` from disk.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::MissingInput`] if the file does not exist, or
    /// a parse error if it is not a valid `FeatureCollection` whose features
    /// all carry the identifier property.
    pub fn load(path: &Path, fields: &RegionFields) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RegionError::MissingInput {
                    path: path.display().to_string(),
                }
            } else {
                RegionError::Io {
                    path: path.display().to_string(),
                    source: e,
                }
            }
        })?;

        let collection = Self::from_geojson_str(&text, fields, &path.display().to_string())?;
        log::info!(
            "Loaded {} regions from {} (crs={})",
            collection.len(),
            path.display(),
            collection.crs
        );
        Ok(collection)
    }

    /// Parses a `GeoJSON` `FeatureCollection`. `source` names the input in
    /// error messages.
    ///
    /// A feature without the identifier property is kept with an empty id
    /// and a warning, so its row still appears in every table.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::GeoJson`] or
    /// [`RegionError::NotFeatureCollection`].
    pub fn from_geojson_str(text: &str, fields: &RegionFields, source: &str) -> Result<Self> {
        let geojson: GeoJson = text.parse().map_err(|e| RegionError::GeoJson {
            path: source.to_string(),
            source: Box::new(e),
        })?;

        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(RegionError::NotFeatureCollection {
                path: source.to_string(),
            });
        };

        let crs = collection_crs(&collection);
        let mut regions = Vec::with_capacity(collection.features.len());

        for (index, feature) in collection.features.into_iter().enumerate() {
            let properties = feature.properties.unwrap_or_default();

            let id = properties
                .get(&fields.id)
                .filter(|v| !v.is_null())
                .map(property_to_string)
                .unwrap_or_else(|| {
                    log::warn!(
                        "Feature {index} in {source} has no '{}' property; keeping it with an empty id",
                        fields.id
                    );
                    String::new()
                });

            let name = properties
                .get(&fields.name)
                .filter(|v| !v.is_null())
                .map(property_to_string);

            let attributes = properties
                .iter()
                .map(|(key, value)| (key.clone(), property_to_string(value)))
                .collect();

            let geometry = feature
                .geometry
                .map_or_else(|| MultiPolygon(Vec::new()), |g| to_multipolygon(g, &id));

            regions.push(Region::new(id, name, attributes, geometry));
        }

        Ok(Self { regions, crs })
    }

    /// Number of regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Iterates regions in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    /// Union of all region bounds, `None` when no region has geometry.
    #[must_use]
    pub fn total_bounds(&self) -> Option<Rect<f64>> {
        self.regions
            .iter()
            .filter_map(|r| r.bounds)
            .reduce(|a, b| {
                Rect::new(
                    coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                    coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
                )
            })
    }

    /// Attribute column names in the order of the first region. Regions with
    /// additional properties append them after.
    #[must_use]
    pub fn attribute_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for region in &self.regions {
            for (key, _) in &region.attributes {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }
}

impl<'a> IntoIterator for &'a RegionCollection {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}

/// Brings a region collection into a target CRS.
pub trait Reprojector: Send + Sync {
    /// Returns `regions` expressed in `target`.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::CoordinateSystem`] when the transformation is
    /// not supported.
    fn reproject(&self, regions: RegionCollection, target: &Crs) -> Result<RegionCollection>;
}

/// Accepts only CRSs equivalent to the source (EPSG:4326 and CRS84 are
/// interchangeable) and relabels the collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityReprojector;

impl Reprojector for IdentityReprojector {
    fn reproject(&self, mut regions: RegionCollection, target: &Crs) -> Result<RegionCollection> {
        if regions.crs == *target {
            return Ok(regions);
        }
        if regions.crs.is_equivalent(target) {
            log::debug!("Treating {} as equivalent to {target}", regions.crs);
            regions.crs = target.clone();
            return Ok(regions);
        }
        Err(RegionError::CoordinateSystem {
            from: regions.crs,
            to: target.clone(),
        })
    }
}

/// Reads the legacy `crs` member, e.g.
/// `{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::4326"}}`.
/// Defaults to WGS 84, as RFC 7946 prescribes.
fn collection_crs(collection: &FeatureCollection) -> Crs {
    collection
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(JsonValue::as_object)
        .and_then(|crs: &JsonObject| crs.get("properties"))
        .and_then(|props| props.get("name"))
        .and_then(JsonValue::as_str)
        .map_or(Crs::WGS84, Crs::parse)
}

fn property_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn to_multipolygon(geometry: geojson::Geometry, id: &str) -> MultiPolygon<f64> {
    match geo::Geometry::<f64>::try_from(geometry) {
        Ok(geo::Geometry::MultiPolygon(mp)) => mp,
        Ok(geo::Geometry::Polygon(p)) => MultiPolygon(vec![p]),
        Ok(other) => {
            log::warn!("Region {id} has non-polygonal geometry ({other:?}); it will have no coverage");
            MultiPolygon(Vec::new())
        }
        Err(e) => {
            log::warn!("Region {id} geometry could not be converted: {e}");
            MultiPolygon(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" } },
        "features": [
            {
                "type": "Feature",
                "properties": { "NAM_0": "Atlantis", "ISO_A3": "ATL", "POP": 12 },
                "geometry": { "type": "Polygon", "coordinates": [[[0,0],[2,0],[2,2],[0,2],[0,0]]] }
            },
            {
                "type": "Feature",
                "properties": { "ISO_A3": "LEM", "NAM_0": null },
                "geometry": { "type": "MultiPolygon", "coordinates": [[[[5,5],[6,5],[6,6],[5,5]]]] }
            },
            {
                "type": "Feature",
                "properties": { "ISO_A3": "PNT", "NAM_0": "Point Nemo" },
                "geometry": { "type": "Point", "coordinates": [1, 1] }
            }
        ]
    }"#;

    #[test]
    fn loads_regions_in_order_with_attributes() {
        let regions =
            RegionCollection::from_geojson_str(SAMPLE, &RegionFields::default(), "sample").unwrap();

        assert_eq!(regions.len(), 3);
        assert_eq!(regions.crs, Crs::Crs84);

        let first = &regions.regions[0];
        assert_eq!(first.id, "ATL");
        assert_eq!(first.name.as_deref(), Some("Atlantis"));
        assert_eq!(
            first.attributes,
            vec![
                ("NAM_0".to_string(), "Atlantis".to_string()),
                ("ISO_A3".to_string(), "ATL".to_string()),
                ("POP".to_string(), "12".to_string()),
            ]
        );

        assert_eq!(regions.regions[1].name, None);
        assert_eq!(regions.regions[1].geometry.0.len(), 1);
    }

    #[test]
    fn non_polygonal_features_are_kept_without_geometry() {
        let regions =
            RegionCollection::from_geojson_str(SAMPLE, &RegionFields::default(), "sample").unwrap();
        let point = &regions.regions[2];
        assert_eq!(point.id, "PNT");
        assert!(point.geometry.0.is_empty());
        assert!(point.bounds.is_none());
    }

    #[test]
    fn total_bounds_spans_all_geometries() {
        let regions =
            RegionCollection::from_geojson_str(SAMPLE, &RegionFields::default(), "sample").unwrap();
        let bounds = regions.total_bounds().unwrap();
        assert!((bounds.min().x - 0.0).abs() < f64::EPSILON);
        assert!((bounds.max().x - 6.0).abs() < f64::EPSILON);
        assert!((bounds.max().y - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn attribute_columns_union_in_first_seen_order() {
        let regions =
            RegionCollection::from_geojson_str(SAMPLE, &RegionFields::default(), "sample").unwrap();
        assert_eq!(regions.attribute_columns(), vec!["NAM_0", "ISO_A3", "POP"]);
    }

    #[test]
    fn missing_identifier_keeps_feature_with_empty_id() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"NAM_0":"Nowhere"},"geometry":null},
            {"type":"Feature","properties":{"ISO_A3":null,"NAM_0":"Null"},"geometry":null},
            {"type":"Feature","properties":{"ISO_A3":"AAA","NAM_0":"Alpha"},"geometry":null}
        ]}"#;
        let regions = RegionCollection::from_geojson_str(text, &RegionFields::default(), "t").unwrap();

        let ids: Vec<&str> = regions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["", "", "AAA"]);
        assert_eq!(regions.regions[0].name.as_deref(), Some("Nowhere"));
    }

    #[test]
    fn crs_defaults_to_wgs84_and_reads_epsg_urns() {
        let bare = r#"{"type":"FeatureCollection","features":[]}"#;
        let regions = RegionCollection::from_geojson_str(bare, &RegionFields::default(), "t").unwrap();
        assert_eq!(regions.crs, Crs::WGS84);

        let projected = r#"{"type":"FeatureCollection",
            "crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:EPSG::3857"}},
            "features":[]}"#;
        let regions =
            RegionCollection::from_geojson_str(projected, &RegionFields::default(), "t").unwrap();
        assert_eq!(regions.crs, Crs::Epsg(3857));
    }

    #[test]
    fn custom_fields_select_identifier_and_name() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"code":7,"label":"Seven"},"geometry":null}
        ]}"#;
        let fields = RegionFields {
            id: "code".to_string(),
            name: "label".to_string(),
        };
        let regions = RegionCollection::from_geojson_str(text, &fields, "t").unwrap();
        assert_eq!(regions.regions[0].id, "7");
        assert_eq!(regions.regions[0].name.as_deref(), Some("Seven"));
    }

    #[test]
    fn identity_reprojector_accepts_equivalent_crs_only() {
        let regions =
            RegionCollection::from_geojson_str(SAMPLE, &RegionFields::default(), "sample").unwrap();

        let same = IdentityReprojector
            .reproject(regions.clone(), &Crs::WGS84)
            .unwrap();
        assert_eq!(same.crs, Crs::WGS84);
        assert_eq!(same.regions, regions.regions);

        let err = IdentityReprojector
            .reproject(regions, &Crs::Epsg(54009))
            .unwrap_err();
        assert!(matches!(err, RegionError::CoordinateSystem { .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RegionCollection::load(&dir.path().join("none.geojson"), &RegionFields::default())
            .unwrap_err();
        assert!(matches!(err, RegionError::MissingInput { .. }));
    }
}
