//! Per-year statistic builder.
//!
//! The volume/footprint path inner-joins the two zonal tables on region
//! identifier. Regions that appear in only one table are dropped for that
//! year and counted in the log. When an identifier repeats, the k-th
//! volume row pairs with the k-th footprint row of that identifier.

use std::collections::BTreeMap;

use built_surface_models::{BaseMetric, BaseStatistic, Compactness, MetricPath, YearRecord, YearTable};

use crate::{Result, StatsError, ZonalTable, sorted};

/// Joins volume and footprint sums into one year's table with derived
/// metrics.
///
/// # Errors
///
/// Returns [`StatsError::KindMismatch`] if the tables are not a volume and a
/// footprint table respectively.
pub fn build_volume_footprint(
    volume: &ZonalTable,
    footprint: &ZonalTable,
    year: i32,
    compactness: Compactness,
) -> Result<YearTable> {
    ensure_kind(volume, BaseMetric::Volume)?;
    ensure_kind(footprint, BaseMetric::Footprint)?;

    let mut fp_rows: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, record) in footprint.records.iter().enumerate() {
        fp_rows.entry(&record.region_id).or_default().push(index);
    }
    let mut used: BTreeMap<&str, usize> = BTreeMap::new();

    let mut table = YearTable::new(MetricPath::VolumeFootprint);
    let mut volume_only = 0;

    for vol in &volume.records {
        let occurrence = used.entry(&vol.region_id).or_insert(0);
        let Some(&fp_index) = fp_rows
            .get(vol.region_id.as_str())
            .and_then(|rows| rows.get(*occurrence))
        else {
            volume_only += 1;
            continue;
        };
        *occurrence += 1;

        let fp = &footprint.records[fp_index];
        let base = BaseStatistic {
            total_vol: vol.value,
            total_fp: fp.value,
            total_surface: None,
        };
        let name = vol.name.clone().or_else(|| fp.name.clone());

        table.records.push(YearRecord::new(
            vol.region_id.clone(),
            name,
            year,
            base,
            MetricPath::VolumeFootprint,
            compactness,
        ));
    }

    let footprint_only = footprint.len() - table.len();
    if volume_only > 0 || footprint_only > 0 {
        log::info!(
            "Year {year}: dropped {volume_only} volume-only and {footprint_only} footprint-only regions"
        );
    }
    log::debug!("Year {year}: joined {} regions", table.len());

    Ok(sorted(table))
}

/// Carries surface sums straight into one year's table.
///
/// # Errors
///
/// Returns [`StatsError::KindMismatch`] if `surface` is not a surface table.
pub fn build_direct_surface(surface: &ZonalTable, year: i32) -> Result<YearTable> {
    ensure_kind(surface, BaseMetric::Surface)?;

    let mut table = YearTable::new(MetricPath::DirectSurface);
    table.records = surface
        .records
        .iter()
        .map(|record| {
            YearRecord::new(
                record.region_id.clone(),
                record.name.clone(),
                year,
                BaseStatistic {
                    total_surface: record.value,
                    ..BaseStatistic::default()
                },
                MetricPath::DirectSurface,
                Compactness::default(),
            )
        })
        .collect();

    Ok(sorted(table))
}

fn ensure_kind(table: &ZonalTable, expected: BaseMetric) -> Result<()> {
    if table.kind == expected {
        Ok(())
    } else {
        Err(StatsError::KindMismatch {
            expected,
            found: table.kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::ZonalRecord;

    fn zonal(kind: BaseMetric, rows: &[(&str, Option<f64>)]) -> ZonalTable {
        let mut table = ZonalTable::new(kind, 2020, vec!["ISO_A3".to_string()]);
        for (id, value) in rows {
            table.push(ZonalRecord {
                region_id: (*id).to_string(),
                name: Some(format!("{id} land")),
                attributes: vec![(*id).to_string()],
                value: *value,
            });
        }
        table
    }

    #[test]
    fn derives_height_and_surface_area() {
        let vol = zonal(BaseMetric::Volume, &[("BBB", Some(1500.0)), ("AAA", Some(1000.0))]);
        let fp = zonal(BaseMetric::Footprint, &[("AAA", Some(200.0)), ("BBB", Some(300.0))]);

        let table = build_volume_footprint(&vol, &fp, 2020, Compactness::default()).unwrap();

        assert_eq!(table.path, MetricPath::VolumeFootprint);
        let ids: Vec<&str> = table.records.iter().map(|r| r.region_id.as_str()).collect();
        assert_eq!(ids, vec!["AAA", "BBB"]);

        let a = &table.records[0];
        assert_relative_eq!(a.derived.building_height.unwrap(), 5.0);
        assert_relative_eq!(a.derived.total_surface_area.unwrap(), 482.842_712_474_619, epsilon = 1e-9);
        let b = &table.records[1];
        assert_relative_eq!(b.derived.building_height.unwrap(), 5.0);
        assert_relative_eq!(b.derived.total_surface_area.unwrap(), 646.410_161_513_775_4, epsilon = 1e-9);
        assert_eq!(a.year, 2020);
        assert_eq!(a.name.as_deref(), Some("AAA land"));
    }

    #[test]
    fn inner_join_drops_unmatched_regions() {
        let vol = zonal(BaseMetric::Volume, &[("AAA", Some(10.0)), ("VOL", Some(5.0))]);
        let fp = zonal(BaseMetric::Footprint, &[("FPO", Some(1.0)), ("AAA", Some(2.0))]);

        let table = build_volume_footprint(&vol, &fp, 2020, Compactness::default()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.records[0].region_id, "AAA");
    }

    #[test]
    fn missing_bases_propagate_and_zero_footprint_guards() {
        let vol = zonal(BaseMetric::Volume, &[("MIS", None), ("ZER", Some(50.0))]);
        let fp = zonal(BaseMetric::Footprint, &[("MIS", Some(10.0)), ("ZER", Some(0.0))]);

        let table = build_volume_footprint(&vol, &fp, 2020, Compactness::default()).unwrap();

        let missing = &table.records[0];
        assert_eq!(missing.base.total_vol, None);
        assert_eq!(missing.derived.building_height, None);
        assert_eq!(missing.derived.total_surface_area, None);

        let zero = &table.records[1];
        assert_eq!(zero.derived.building_height, Some(0.0));
        assert_eq!(zero.derived.total_surface_area, Some(0.0));
    }

    #[test]
    fn duplicate_identifiers_pair_by_occurrence() {
        let vol = zonal(BaseMetric::Volume, &[("DUP", Some(100.0)), ("DUP", Some(400.0))]);
        let fp = zonal(BaseMetric::Footprint, &[("DUP", Some(10.0)), ("DUP", Some(40.0))]);

        let table = build_volume_footprint(&vol, &fp, 2020, Compactness::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].base.total_fp, Some(10.0));
        assert_eq!(table.records[1].base.total_fp, Some(40.0));
        assert_relative_eq!(table.records[0].derived.building_height.unwrap(), 10.0);
        assert_relative_eq!(table.records[1].derived.building_height.unwrap(), 10.0);
    }

    #[test]
    fn direct_surface_is_carried_unmodified() {
        let surface = zonal(BaseMetric::Surface, &[("AAA", Some(646.21)), ("NOC", None)]);

        let table = build_direct_surface(&surface, 2020).unwrap();
        assert_eq!(table.path, MetricPath::DirectSurface);
        assert_eq!(table.records[0].base.total_surface, Some(646.21));
        assert_eq!(table.records[0].base.total_vol, None);
        assert_eq!(table.records[0].derived.total_surface_area, None);
        assert_eq!(table.records[1].base.total_surface, None);
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let fp = zonal(BaseMetric::Footprint, &[]);
        let err = build_volume_footprint(&fp, &fp, 2020, Compactness::default()).unwrap_err();
        assert!(matches!(
            err,
            StatsError::KindMismatch {
                expected: BaseMetric::Volume,
                ..
            }
        ));
        assert!(build_direct_surface(&fp, 2020).is_err());
    }
}
