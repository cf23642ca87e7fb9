//! Region/raster extent overlap check.

use geo::Rect;
use rstar::{AABB, RTree, RTreeObject};

use crate::RegionCollection;

/// A region's envelope stored in the R-tree.
struct RegionEnvelope {
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for RegionEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Result of [`check_overlap`].
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapReport {
    /// Union of all region bounds.
    pub region_bounds: Option<Rect<f64>>,
    /// Raster extent that was checked.
    pub raster_extent: Rect<f64>,
    /// Regions whose envelope intersects the raster extent.
    pub intersecting: usize,
    /// Regions that cannot receive any pixel (outside, or no geometry).
    pub outside: usize,
}

impl OverlapReport {
    /// Whether any region touches the raster.
    #[must_use]
    pub const fn has_overlap(&self) -> bool {
        self.intersecting > 0
    }
}

/// Counts regions whose envelope intersects `raster_extent` and logs a
/// warning when none do.
#[must_use]
pub fn check_overlap(regions: &RegionCollection, raster_extent: Rect<f64>) -> OverlapReport {
    let entries: Vec<RegionEnvelope> = regions
        .iter()
        .filter_map(|r| r.bounds)
        .map(|rect| RegionEnvelope {
            envelope: to_aabb(rect),
        })
        .collect();
    let tree = RTree::bulk_load(entries);

    let intersecting = tree
        .locate_in_envelope_intersecting(&to_aabb(raster_extent))
        .count();

    let report = OverlapReport {
        region_bounds: regions.total_bounds(),
        raster_extent,
        intersecting,
        outside: regions.len() - intersecting,
    };

    log::info!(
        "Region bounds {:?}, raster extent {:?}",
        report.region_bounds.map(|r| (r.min().x_y(), r.max().x_y())),
        (raster_extent.min().x_y(), raster_extent.max().x_y())
    );
    if report.has_overlap() {
        log::info!(
            "{} of {} regions overlap the raster ({} outside)",
            report.intersecting,
            regions.len(),
            report.outside
        );
    } else {
        log::warn!("No overlap between regions and raster extent");
    }

    report
}

fn to_aabb(rect: Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

#[cfg(test)]
mod tests {
    use geo::{MultiPolygon, coord, polygon};

    use super::*;
    use crate::Region;
    use built_surface_models::Crs;

    fn square(id: &str, x: f64, y: f64) -> Region {
        let poly = polygon![
            (x: x, y: y),
            (x: x + 1.0, y: y),
            (x: x + 1.0, y: y + 1.0),
            (x: x, y: y + 1.0),
            (x: x, y: y),
        ];
        Region::new(id, None, Vec::new(), MultiPolygon(vec![poly]))
    }

    #[test]
    fn counts_intersecting_and_outside_regions() {
        let regions = RegionCollection {
            regions: vec![
                square("IN", 1.0, 1.0),
                square("OUT", 50.0, 50.0),
                Region::new("EMPTY", None, Vec::new(), MultiPolygon(Vec::new())),
            ],
            crs: Crs::WGS84,
        };
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });

        let report = check_overlap(&regions, extent);
        assert!(report.has_overlap());
        assert_eq!(report.intersecting, 1);
        assert_eq!(report.outside, 2);
    }

    #[test]
    fn no_overlap_is_reported() {
        let regions = RegionCollection {
            regions: vec![square("FAR", 100.0, 100.0)],
            crs: Crs::WGS84,
        };
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });

        let report = check_overlap(&regions, extent);
        assert!(!report.has_overlap());
        assert_eq!(report.outside, 1);
    }
}
