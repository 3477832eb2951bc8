use foundation::bbox::Bbox;
use foundation::geometry::Point;
use foundation::precision::stable_total_cmp_f64;

use crate::tile::Tile;
use crate::zoom::TileZoomLevel;

/// Every tile at `level` whose resource region overlaps `bbox`.
///
/// The bbox is clamped to the image, so a viewport hanging off the edge of
/// the map never produces out-of-range tile addresses.
pub fn tiles_covering_bbox(level: TileZoomLevel, bbox: &Bbox) -> Vec<Tile> {
    if level.columns == 0 || level.rows == 0 {
        return Vec::new();
    }
    let span_x = (level.tile_width as u64 * level.scale_factor as u64) as f64;
    let span_y = (level.tile_height as u64 * level.scale_factor as u64) as f64;

    let min_x = bbox.min[0].max(0.0);
    let min_y = bbox.min[1].max(0.0);
    let max_x = bbox.max[0].min(level.image_width as f64);
    let max_y = bbox.max[1].min(level.image_height as f64);
    if min_x >= max_x || min_y >= max_y {
        return Vec::new();
    }

    let col_min = (min_x / span_x).floor() as u32;
    let row_min = (min_y / span_y).floor() as u32;
    let col_max = ((max_x / span_x).ceil() as u32).min(level.columns);
    let row_max = ((max_y / span_y).ceil() as u32).min(level.rows);

    let mut tiles = Vec::new();
    for row in row_min..row_max {
        for column in col_min..col_max {
            tiles.push(Tile::new(column, row, level));
        }
    }
    tiles
}

/// Order tiles by ascending distance of their centers to `focus`, ties
/// broken by (row, column) so the order is reproducible.
pub fn sort_center_out(tiles: &mut [Tile], focus: Point) {
    tiles.sort_by(|a, b| {
        stable_total_cmp_f64(a.center().distance(focus), b.center().distance(focus))
            .then_with(|| a.row.cmp(&b.row))
            .then_with(|| a.column.cmp(&b.column))
    });
}

#[cfg(test)]
mod tests {
    use super::{sort_center_out, tiles_covering_bbox};
    use crate::zoom::TileZoomLevel;
    use foundation::bbox::Bbox;
    use foundation::geometry::Point;

    fn level() -> TileZoomLevel {
        TileZoomLevel {
            index: 0,
            scale_factor: 1,
            tile_width: 100,
            tile_height: 100,
            columns: 10,
            rows: 8,
            image_width: 1000,
            image_height: 800,
        }
    }

    #[test]
    fn covering_tiles_cover_the_bbox() {
        let bbox = Bbox::new([150.0, 250.0], [420.0, 310.0]);
        let tiles = tiles_covering_bbox(level(), &bbox);
        assert_eq!(tiles.len(), 8); // columns 1..=4, rows 2..=3

        // Property: the union of tile regions covers the query bbox.
        let mut union = tiles[0].resource_bbox();
        for tile in &tiles[1..] {
            union = union.union(&tile.resource_bbox());
        }
        assert!(union.min[0] <= bbox.min[0] && union.min[1] <= bbox.min[1]);
        assert!(union.max[0] >= bbox.max[0] && union.max[1] >= bbox.max[1]);
    }

    #[test]
    fn bbox_outside_image_yields_nothing() {
        let tiles = tiles_covering_bbox(level(), &Bbox::new([1200.0, 0.0], [1300.0, 50.0]));
        assert!(tiles.is_empty());
    }

    #[test]
    fn bbox_partially_outside_is_clamped() {
        let tiles = tiles_covering_bbox(level(), &Bbox::new([-500.0, -500.0], [150.0, 150.0]));
        assert_eq!(tiles.len(), 4); // columns 0..=1, rows 0..=1
    }

    #[test]
    fn center_out_order_is_deterministic() {
        let bbox = Bbox::new([0.0, 0.0], [1000.0, 800.0]);
        let mut tiles = tiles_covering_bbox(level(), &bbox);
        sort_center_out(&mut tiles, Point::new(500.0, 400.0));

        // The four tiles ringing the focus come first (all equidistant),
        // tie-broken by (row, column).
        let first: Vec<(u32, u32)> = tiles[..4].iter().map(|t| (t.row, t.column)).collect();
        assert_eq!(first, vec![(3, 4), (3, 5), (4, 4), (4, 5)]);

        let d_first = tiles[0].center().distance(Point::new(500.0, 400.0));
        let d_last = tiles.last().unwrap().center().distance(Point::new(500.0, 400.0));
        assert!(d_first <= d_last);
    }
}
