//! Per-region zonal sums for one raster and one year.

use built_surface_models::BaseMetric;

/// One region's zonal sum plus its pass-through attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalRecord {
    /// Region identifier.
    pub region_id: String,
    /// Display name, if known.
    pub name: Option<String>,
    /// Attribute values aligned with [`ZonalTable::columns`].
    pub attributes: Vec<String>,
    /// Zonal sum; `None` for no coverage or a failed region.
    pub value: Option<f64>,
}

/// Zonal sums of one metric for one year, in region order.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalTable {
    /// Which base quantity was summed.
    pub kind: BaseMetric,
    /// Year label.
    pub year: i32,
    /// Attribute column names, in input order.
    pub columns: Vec<String>,
    /// One record per region.
    pub records: Vec<ZonalRecord>,
}

impl ZonalTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new(kind: BaseMetric, year: i32, columns: Vec<String>) -> Self {
        Self {
            kind,
            year,
            columns,
            records: Vec::new(),
        }
    }

    /// Appends a record.
    pub fn push(&mut self, record: ZonalRecord) {
        self.records.push(record);
    }

    /// Number of records with a value.
    #[must_use]
    pub fn with_value(&self) -> usize {
        self.records.iter().filter(|r| r.value.is_some()).count()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
