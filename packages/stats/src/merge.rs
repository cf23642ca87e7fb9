//! Multi-year merge.

use built_surface_models::YearTable;

use crate::{Result, StatsError, sorted};

/// Concatenates per-year tables, keeping every row, sorted by region then
/// year. Any subset of years may be supplied.
///
/// # Errors
///
/// Returns [`StatsError::NoTables`] when `tables` is empty and
/// [`StatsError::PathMismatch`] when the tables carry different metrics.
pub fn merge_years(tables: Vec<YearTable>) -> Result<YearTable> {
    let mut tables = tables.into_iter();
    let Some(mut merged) = tables.next() else {
        return Err(StatsError::NoTables);
    };

    for table in tables {
        if table.path != merged.path {
            return Err(StatsError::PathMismatch {
                expected: merged.path,
                found: table.path,
            });
        }
        merged.records.extend(table.records);
    }

    let merged = sorted(merged);
    log::info!(
        "Merged {} rows covering {} regions and years {:?}",
        merged.len(),
        merged.region_count(),
        merged.years()
    );
    Ok(merged)
}
