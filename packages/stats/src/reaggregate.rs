//! Re-aggregation by region and year.
//!
//! Building height and surface area are nonlinear in volume and footprint,
//! so grouped values are always recomputed from the grouped sums. Summing
//! or averaging the per-row derived columns would be wrong.

use std::collections::{BTreeMap, HashMap};

use built_surface_models::{BaseStatistic, Compactness, YearRecord, YearTable};

use crate::sorted;

/// Collapses `table` to one row per (region, year).
///
/// Present base values are summed per group; a base that is missing on
/// every row of a group stays missing. The display name is the first
/// non-empty name seen for the region in input order, across all years.
#[must_use]
pub fn reaggregate_by_region(table: &YearTable, compactness: Compactness) -> YearTable {
    let mut names: HashMap<&str, &str> = HashMap::new();
    let mut groups: BTreeMap<(&str, i32), BaseStatistic> = BTreeMap::new();

    for record in &table.records {
        if let Some(name) = record.name.as_deref().filter(|n| !n.is_empty()) {
            names.entry(&record.region_id).or_insert(name);
        }
        groups
            .entry((&record.region_id, record.year))
            .or_default()
            .accumulate(&record.base);
    }

    let mut out = YearTable::new(table.path);
    out.records = groups
        .into_iter()
        .map(|((id, year), base)| {
            YearRecord::new(
                id.to_string(),
                names.get(id).map(|n| (*n).to_string()),
                year,
                base,
                table.path,
                compactness,
            )
        })
        .collect();

    log::info!(
        "Re-aggregated {} rows into {} region-year groups",
        table.len(),
        out.len()
    );

    sorted(out)
}
