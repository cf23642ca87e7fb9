#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared statistic types for the built-surface toolchain.
//!
//! Defines the per-region base statistics (summed built volume, footprint
//! and surface), the nonlinear metrics derived from them (building height
//! and total building surface area), and the row/table types that flow
//! between pipeline stages.
//!
//! Derived metrics are never summed or averaged. Every aggregation level
//! sums the base statistics and then calls [`DerivedMetric::derive`] on the
//! result, so the formulas here are the single source of truth.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Compactness coefficient used by the surface-area formula when none is
/// configured (a compact rectangular building).
pub const DEFAULT_COMPACTNESS: f64 = 4.0;

/// Nodata sentinel used when a raster declares none.
pub const DEFAULT_NODATA: f64 = -9999.0;

/// Column holding the stable region identifier.
pub const REGION_ID_COLUMN: &str = "ISO_A3";

/// Column holding the region display name.
pub const NAME_COLUMN: &str = "NAM_0";

/// Column holding the year label.
pub const YEAR_COLUMN: &str = "year";

/// Column holding the derived building height.
pub const BUILDING_HEIGHT_COLUMN: &str = "building_height";

/// Column holding the derived total building surface area.
pub const TOTAL_SURFACE_AREA_COLUMN: &str = "total_surface_area";

/// Compactness coefficient `C` in `S = C * V / sqrt(A) + A`.
///
/// Threaded explicitly into every derivation so the raster calculator, the
/// per-year builder and the re-aggregation engine always agree.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Compactness(f64);

impl Compactness {
    /// Wraps a compactness coefficient.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Returns the raw coefficient.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl Default for Compactness {
    fn default() -> Self {
        Self(DEFAULT_COMPACTNESS)
    }
}

/// Average building height: `total_vol / total_fp`, or `0` when the
/// footprint is not positive.
#[must_use]
pub fn building_height(total_vol: f64, total_fp: f64) -> f64 {
    if total_fp > 0.0 {
        total_vol / total_fp
    } else {
        0.0
    }
}

/// Total building surface area: `C * total_vol / sqrt(total_fp) + total_fp`,
/// or `0` when the footprint is not positive.
#[must_use]
pub fn total_surface_area(total_vol: f64, total_fp: f64, compactness: Compactness) -> f64 {
    if total_fp > 0.0 {
        compactness.value() * total_vol / total_fp.sqrt() + total_fp
    } else {
        0.0
    }
}

/// A directly summed base quantity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BaseMetric {
    /// Built volume (`total_vol`).
    Volume,
    /// Built footprint area (`total_fp`).
    Footprint,
    /// Surface area summed straight from a surface raster (`total_surface`).
    Surface,
}

impl BaseMetric {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Volume, Self::Footprint, Self::Surface]
    }

    /// Name of the table column holding this statistic.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Volume => "total_vol",
            Self::Footprint => "total_fp",
            Self::Surface => "total_surface",
        }
    }

    /// Looks up a metric by its table column name.
    #[must_use]
    pub fn from_column(column: &str) -> Option<Self> {
        Self::all().iter().copied().find(|m| m.column() == column)
    }
}

/// Per-region, per-year summed quantities.
///
/// `None` means the value is missing (no raster coverage, failed region,
/// or not produced by this path); `Some(0.0)` is a genuine zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseStatistic {
    /// Summed built volume.
    pub total_vol: Option<f64>,
    /// Summed built footprint area.
    pub total_fp: Option<f64>,
    /// Summed surface area from the raster-first path.
    pub total_surface: Option<f64>,
}

impl BaseStatistic {
    /// Returns the value of one base metric.
    #[must_use]
    pub const fn get(&self, metric: BaseMetric) -> Option<f64> {
        match metric {
            BaseMetric::Volume => self.total_vol,
            BaseMetric::Footprint => self.total_fp,
            BaseMetric::Surface => self.total_surface,
        }
    }

    /// Sets the value of one base metric.
    pub const fn set(&mut self, metric: BaseMetric, value: Option<f64>) {
        match metric {
            BaseMetric::Volume => self.total_vol = value,
            BaseMetric::Footprint => self.total_fp = value,
            BaseMetric::Surface => self.total_surface = value,
        }
    }

    /// Adds `other` into `self`, column by column.
    ///
    /// Present values are summed and missing values are skipped; a column
    /// stays missing only if it is missing on both sides.
    pub fn accumulate(&mut self, other: &Self) {
        self.total_vol = add_present(self.total_vol, other.total_vol);
        self.total_fp = add_present(self.total_fp, other.total_fp);
        self.total_surface = add_present(self.total_surface, other.total_surface);
    }
}

const fn add_present(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x + y),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

/// Nonlinear metrics computed from a [`BaseStatistic`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetric {
    /// `total_vol / total_fp`.
    pub building_height: Option<f64>,
    /// `C * total_vol / sqrt(total_fp) + total_fp`.
    pub total_surface_area: Option<f64>,
}

impl DerivedMetric {
    /// Derives height and surface area from the given bases.
    ///
    /// Both metrics are missing unless volume and footprint are both
    /// present. The `total_fp <= 0 → 0` guard only applies to a present
    /// footprint.
    #[must_use]
    pub fn derive(base: &BaseStatistic, compactness: Compactness) -> Self {
        match (base.total_vol, base.total_fp) {
            (Some(vol), Some(fp)) => Self {
                building_height: Some(building_height(vol, fp)),
                total_surface_area: Some(total_surface_area(vol, fp, compactness)),
            },
            _ => Self::default(),
        }
    }
}

/// Which set of base statistics a table carries.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetricPath {
    /// Volume and footprint sums joined per region; derived metrics computed.
    VolumeFootprint,
    /// A surface sum from the surface raster, carried through as is.
    DirectSurface,
}

impl MetricPath {
    /// Base metrics present in tables of this path, in column order.
    #[must_use]
    pub const fn base_metrics(self) -> &'static [BaseMetric] {
        match self {
            Self::VolumeFootprint => &[BaseMetric::Volume, BaseMetric::Footprint],
            Self::DirectSurface => &[BaseMetric::Surface],
        }
    }

    /// Whether tables of this path carry derived metric columns.
    #[must_use]
    pub const fn has_derived(self) -> bool {
        matches!(self, Self::VolumeFootprint)
    }

    /// Full column list of a table of this path.
    #[must_use]
    pub fn columns(self) -> Vec<&'static str> {
        let mut columns = vec![REGION_ID_COLUMN, NAME_COLUMN, YEAR_COLUMN];
        columns.extend(self.base_metrics().iter().map(|m| m.column()));
        if self.has_derived() {
            columns.push(BUILDING_HEIGHT_COLUMN);
            columns.push(TOTAL_SURFACE_AREA_COLUMN);
        }
        columns
    }
}

/// One region's statistics for one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearRecord {
    /// Region identifier (ISO 3166-1 alpha-3 for countries).
    pub region_id: String,
    /// Display name, if known.
    pub name: Option<String>,
    /// Year label.
    pub year: i32,
    /// Summed base quantities.
    pub base: BaseStatistic,
    /// Metrics derived from `base`.
    pub derived: DerivedMetric,
}

impl YearRecord {
    /// Builds a record whose derived metrics match `base` for the given
    /// path.
    #[must_use]
    pub fn new(
        region_id: String,
        name: Option<String>,
        year: i32,
        base: BaseStatistic,
        path: MetricPath,
        compactness: Compactness,
    ) -> Self {
        let derived = if path.has_derived() {
            DerivedMetric::derive(&base, compactness)
        } else {
            DerivedMetric::default()
        };
        Self {
            region_id,
            name,
            year,
            base,
            derived,
        }
    }

    /// Sort key: region identifier, then year.
    #[must_use]
    pub fn sort_key(&self) -> (&str, i32) {
        (&self.region_id, self.year)
    }
}

/// An ordered table of [`YearRecord`]s sharing one [`MetricPath`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearTable {
    /// Which base statistics the rows carry.
    pub path: MetricPath,
    /// Table rows.
    pub records: Vec<YearRecord>,
}

impl YearTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new(path: MetricPath) -> Self {
        Self {
            path,
            records: Vec::new(),
        }
    }

    /// Stable sort by region identifier then year.
    pub fn sort_by_region_year(&mut self) {
        self.records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    /// Distinct years present, ascending.
    #[must_use]
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.records.iter().map(|r| r.year).collect();
        years.sort_unstable();
        years.dedup();
        years
    }

    /// Number of distinct region identifiers.
    #[must_use]
    pub fn region_count(&self) -> usize {
        let mut ids: Vec<&str> = self.records.iter().map(|r| r.region_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Coordinate reference system, as far as this toolchain needs to know it.
///
/// Only identity matters here: the I/O layer compares the raster's CRS
/// with the regions' CRS and reprojects (or fails) on mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// An EPSG code.
    Epsg(u32),
    /// OGC CRS84 (WGS 84 with longitude/latitude axis order).
    Crs84,
    /// Anything else, kept verbatim.
    Unknown(String),
}

impl Crs {
    /// WGS 84 geographic coordinates.
    pub const WGS84: Self = Self::Epsg(4326);

    /// Parses `EPSG:4326`, `urn:ogc:def:crs:EPSG::4326`, `OGC:CRS84` and
    /// `urn:ogc:def:crs:OGC:1.3:CRS84` style identifiers.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper.ends_with("CRS84") {
            return Self::Crs84;
        }

        if let Some(idx) = upper.rfind("EPSG") {
            let code = upper[idx + 4..].trim_start_matches(':');
            let code = code.rsplit(':').next().unwrap_or(code);
            if let Ok(code) = code.parse::<u32>() {
                return Self::Epsg(code);
            }
        }

        Self::Unknown(trimmed.to_string())
    }

    /// Whether two CRSs describe the same coordinates (EPSG:4326 and CRS84
    /// are treated as interchangeable, matching common GIS practice for
    /// longitude/latitude data).
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        let normalize = |crs: &Self| match crs {
            Self::Crs84 => Self::WGS84,
            other => other.clone(),
        };
        normalize(self) == normalize(other)
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Epsg(code) => write!(f, "EPSG:{code}"),
            Self::Crs84 => f.write_str("OGC:CRS84"),
            Self::Unknown(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn height_and_surface_formulas() {
        let c = Compactness::default();
        assert_relative_eq!(building_height(1000.0, 200.0), 5.0);
        assert_relative_eq!(
            total_surface_area(1000.0, 200.0, c),
            482.842_712_474_619,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            total_surface_area(1500.0, 300.0, c),
            646.410_161_513_775_4,
            epsilon = 1e-9
        );
    }

    #[test]
    fn footprint_guard_yields_zero() {
        let c = Compactness::default();
        assert_eq!(building_height(10.0, 0.0), 0.0);
        assert_eq!(building_height(10.0, -3.0), 0.0);
        assert_eq!(total_surface_area(10.0, 0.0, c), 0.0);
    }

    #[test]
    fn derive_requires_both_bases() {
        let c = Compactness::default();
        let only_vol = BaseStatistic {
            total_vol: Some(10.0),
            ..BaseStatistic::default()
        };
        assert_eq!(DerivedMetric::derive(&only_vol, c), DerivedMetric::default());

        let zero_fp = BaseStatistic {
            total_vol: Some(10.0),
            total_fp: Some(0.0),
            total_surface: None,
        };
        let derived = DerivedMetric::derive(&zero_fp, c);
        assert_eq!(derived.building_height, Some(0.0));
        assert_eq!(derived.total_surface_area, Some(0.0));
    }

    #[test]
    fn accumulate_skips_missing_but_keeps_zero() {
        let mut a = BaseStatistic {
            total_vol: Some(1.0),
            total_fp: None,
            total_surface: None,
        };
        let b = BaseStatistic {
            total_vol: Some(2.0),
            total_fp: Some(0.0),
            total_surface: None,
        };
        a.accumulate(&b);
        assert_eq!(a.total_vol, Some(3.0));
        assert_eq!(a.total_fp, Some(0.0));
        assert_eq!(a.total_surface, None);
    }

    #[test]
    fn direct_surface_records_carry_no_derived_metrics() {
        let base = BaseStatistic {
            total_surface: Some(42.0),
            ..BaseStatistic::default()
        };
        let record = YearRecord::new(
            "AAA".to_string(),
            None,
            2000,
            base,
            MetricPath::DirectSurface,
            Compactness::default(),
        );
        assert_eq!(record.derived, DerivedMetric::default());
        assert_eq!(record.base.total_surface, Some(42.0));
    }

    #[test]
    fn path_columns() {
        assert_eq!(
            MetricPath::VolumeFootprint.columns(),
            vec![
                "ISO_A3",
                "NAM_0",
                "year",
                "total_vol",
                "total_fp",
                "building_height",
                "total_surface_area"
            ]
        );
        assert_eq!(
            MetricPath::DirectSurface.columns(),
            vec!["ISO_A3", "NAM_0", "year", "total_surface"]
        );
    }

    #[test]
    fn base_metric_column_lookup() {
        for metric in BaseMetric::all() {
            assert_eq!(BaseMetric::from_column(metric.column()), Some(*metric));
        }
        assert_eq!(BaseMetric::from_column("building_height"), None);
        assert_eq!(BaseMetric::Footprint.to_string(), "footprint");
    }

    #[test]
    fn crs_parsing_and_equivalence() {
        assert_eq!(Crs::parse("EPSG:4326"), Crs::Epsg(4326));
        assert_eq!(Crs::parse("urn:ogc:def:crs:EPSG::3857"), Crs::Epsg(3857));
        assert_eq!(Crs::parse("urn:ogc:def:crs:OGC:1.3:CRS84"), Crs::Crs84);
        assert!(Crs::Crs84.is_equivalent(&Crs::WGS84));
        assert!(!Crs::Epsg(3857).is_equivalent(&Crs::WGS84));
        assert!(matches!(Crs::parse("LOCAL_CS"), Crs::Unknown(_)));
    }

    #[test]
    fn table_sort_is_by_region_then_year() {
        let c = Compactness::default();
        let mut table = YearTable::new(MetricPath::DirectSurface);
        for (id, year) in [("BBB", 2000), ("AAA", 2005), ("AAA", 1990)] {
            table.records.push(YearRecord::new(
                id.to_string(),
                None,
                year,
                BaseStatistic::default(),
                MetricPath::DirectSurface,
                c,
            ));
        }
        table.sort_by_region_year();
        let keys: Vec<(&str, i32)> = table.records.iter().map(YearRecord::sort_key).collect();
        assert_eq!(keys, vec![("AAA", 1990), ("AAA", 2005), ("BBB", 2000)]);
        assert_eq!(table.years(), vec![1990, 2000, 2005]);
        assert_eq!(table.region_count(), 2);
    }
}
