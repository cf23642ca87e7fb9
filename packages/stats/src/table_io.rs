//! CSV persistence for zonal and per-year tables.
//!
//! Every table is UTF-8 with a leading byte-order mark. Missing values are
//! empty cells. Zonal tables carry the region attributes in input order,
//! then the statistic column, then `year`; per-year tables have the fixed
//! column set of their [`MetricPath`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use built_surface_models::{
    BUILDING_HEIGHT_COLUMN, BaseMetric, BaseStatistic, DerivedMetric, MetricPath, NAME_COLUMN,
    REGION_ID_COLUMN, TOTAL_SURFACE_AREA_COLUMN, YEAR_COLUMN, YearRecord, YearTable,
};

use crate::{Result, StatsError, ZonalRecord, ZonalTable};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Column names identifying regions in a zonal table.
#[derive(Debug, Clone, Copy)]
pub struct ZonalColumns<'a> {
    /// Region identifier column.
    pub id: &'a str,
    /// Display name column.
    pub name: &'a str,
}

impl Default for ZonalColumns<'_> {
    fn default() -> Self {
        Self {
            id: REGION_ID_COLUMN,
            name: NAME_COLUMN,
        }
    }
}

/// Writes a zonal table.
///
/// # Errors
///
/// Returns an I/O or CSV error if the file cannot be written.
pub fn write_zonal_table(path: &Path, table: &ZonalTable) -> Result<()> {
    let mut writer = create_writer(path)?;

    let mut header: Vec<&str> = table.columns.iter().map(String::as_str).collect();
    header.push(table.kind.column());
    header.push(YEAR_COLUMN);
    writer.write_record(&header).map_err(|e| csv_err(path, e))?;

    let year = table.year.to_string();
    for record in &table.records {
        let mut row: Vec<String> = record.attributes.clone();
        row.resize(table.columns.len(), String::new());
        row.push(format_value(record.value));
        row.push(year.clone());
        writer.write_record(&row).map_err(|e| csv_err(path, e))?;
    }

    writer.flush().map_err(|e| io_err(path, e))?;
    log::info!(
        "Wrote {} {} statistics for {} to {}",
        table.len(),
        table.kind,
        table.year,
        path.display()
    );
    Ok(())
}

/// Reads a zonal table written by [`write_zonal_table`].
///
/// # Errors
///
/// Returns [`StatsError::MissingColumn`] if the identifier or statistic
/// column is absent, or a parse/I/O error.
pub fn read_zonal_table(
    path: &Path,
    kind: BaseMetric,
    year: i32,
    columns: ZonalColumns<'_>,
) -> Result<ZonalTable> {
    let mut reader = open_reader(path)?;
    let headers = reader.headers().map_err(|e| csv_err(path, e))?.clone();
    let index = header_index(&headers);

    let id_col = require(&index, columns.id, path)?;
    let value_col = require(&index, kind.column(), path)?;
    let name_col = index.get(columns.name).copied();
    let year_col = index.get(YEAR_COLUMN).copied();

    let attribute_cols: Vec<usize> = (0..headers.len())
        .filter(|&i| i != value_col && Some(i) != year_col)
        .collect();

    let mut table = ZonalTable::new(
        kind,
        year,
        attribute_cols.iter().map(|&i| headers[i].to_string()).collect(),
    );

    for row in reader.records() {
        let row = row.map_err(|e| csv_err(path, e))?;
        let cell = |i: usize| row.get(i).unwrap_or_default();

        table.push(ZonalRecord {
            region_id: cell(id_col).to_string(),
            name: name_col.map(cell).filter(|n| !n.is_empty()).map(str::to_string),
            attributes: attribute_cols.iter().map(|&i| cell(i).to_string()).collect(),
            value: parse_value(cell(value_col), kind.column(), path)?,
        });
    }

    log::debug!("Read {} {kind} records from {}", table.len(), path.display());
    Ok(table)
}

/// Writes a per-year, merged, or re-aggregated table.
///
/// # Errors
///
/// Returns an I/O or CSV error if the file cannot be written.
pub fn write_year_table(path: &Path, table: &YearTable) -> Result<()> {
    let mut writer = create_writer(path)?;
    writer
        .write_record(table.path.columns())
        .map_err(|e| csv_err(path, e))?;

    for record in &table.records {
        let mut row = vec![
            record.region_id.clone(),
            record.name.clone().unwrap_or_default(),
            record.year.to_string(),
        ];
        row.extend(
            table
                .path
                .base_metrics()
                .iter()
                .map(|&m| format_value(record.base.get(m))),
        );
        if table.path.has_derived() {
            row.push(format_value(record.derived.building_height));
            row.push(format_value(record.derived.total_surface_area));
        }
        writer.write_record(&row).map_err(|e| csv_err(path, e))?;
    }

    writer.flush().map_err(|e| io_err(path, e))?;
    log::info!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Reads a table written by [`write_year_table`]. The metric path is
/// inferred from the header; derived values are read as stored.
///
/// # Errors
///
/// Returns [`StatsError::MissingColumn`] for an unrecognized header, or a
/// parse/I/O error.
pub fn read_year_table(path: &Path) -> Result<YearTable> {
    let mut reader = open_reader(path)?;
    let headers = reader.headers().map_err(|e| csv_err(path, e))?.clone();
    let index = header_index(&headers);

    let metric_path = if index.contains_key(BaseMetric::Volume.column()) {
        MetricPath::VolumeFootprint
    } else if index.contains_key(BaseMetric::Surface.column()) {
        MetricPath::DirectSurface
    } else {
        return Err(StatsError::MissingColumn {
            column: BaseMetric::Volume.column().to_string(),
            path: path.display().to_string(),
        });
    };

    let id_col = require(&index, REGION_ID_COLUMN, path)?;
    let year_col = require(&index, YEAR_COLUMN, path)?;
    let name_col = index.get(NAME_COLUMN).copied();
    let base_cols = metric_path
        .base_metrics()
        .iter()
        .map(|&m| require(&index, m.column(), path).map(|i| (m, i)))
        .collect::<Result<Vec<_>>>()?;
    let height_col = index.get(BUILDING_HEIGHT_COLUMN).copied();
    let area_col = index.get(TOTAL_SURFACE_AREA_COLUMN).copied();

    let mut table = YearTable::new(metric_path);
    for row in reader.records() {
        let row = row.map_err(|e| csv_err(path, e))?;
        let cell = |i: usize| row.get(i).unwrap_or_default();

        let year_text = cell(year_col).trim();
        let year = year_text.parse().map_err(|_| StatsError::InvalidValue {
            value: year_text.to_string(),
            column: YEAR_COLUMN.to_string(),
            path: path.display().to_string(),
        })?;

        let mut base = BaseStatistic::default();
        for &(metric, i) in &base_cols {
            base.set(metric, parse_value(cell(i), metric.column(), path)?);
        }

        let optional = |col: Option<usize>, name: &str| -> Result<Option<f64>> {
            col.map_or(Ok(None), |i| parse_value(cell(i), name, path))
        };
        let derived = DerivedMetric {
            building_height: optional(height_col, BUILDING_HEIGHT_COLUMN)?,
            total_surface_area: optional(area_col, TOTAL_SURFACE_AREA_COLUMN)?,
        };

        table.records.push(YearRecord {
            region_id: cell(id_col).to_string(),
            name: name_col.map(cell).filter(|n| !n.is_empty()).map(str::to_string),
            year,
            base,
            derived,
        });
    }

    Ok(table)
}

fn create_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut file = BufWriter::new(File::create(path).map_err(|e| io_err(path, e))?);
    file.write_all(BOM).map_err(|e| io_err(path, e))?;
    Ok(csv::Writer::from_writer(file))
}

fn open_reader(path: &Path) -> Result<csv::Reader<Cursor<Vec<u8>>>> {
    let mut bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    if bytes.starts_with(BOM) {
        bytes.drain(..BOM.len());
    }
    Ok(csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(Cursor::new(bytes)))
}

fn header_index(headers: &csv::StringRecord) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (i, name) in headers.iter().enumerate() {
        index.entry(name.trim().to_string()).or_insert(i);
    }
    index
}

fn require(index: &HashMap<String, usize>, column: &str, path: &Path) -> Result<usize> {
    index
        .get(column)
        .copied()
        .ok_or_else(|| StatsError::MissingColumn {
            column: column.to_string(),
            path: path.display().to_string(),
        })
}

fn format_value(value: Option<f64>) -> String {
    value.map_or_else(String::new, |v| v.to_string())
}

fn parse_value(text: &str, column: &str, path: &Path) -> Result<Option<f64>> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    text.parse().map(Some).map_err(|_| StatsError::InvalidValue {
        value: text.to_string(),
        column: column.to_string(),
        path: path.display().to_string(),
    })
}

fn csv_err(path: &Path, source: csv::Error) -> StatsError {
    StatsError::Csv {
        path: path.display().to_string(),
        source,
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StatsError {
    StatsError::Io {
        path: path.display().to_string(),
        source,
    }
}
