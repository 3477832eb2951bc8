use foundation::bbox::Bbox;
use foundation::geometry::Point;

use crate::zoom::TileZoomLevel;

/// A tile address within one pyramid level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Tile {
    pub column: u32,
    pub row: u32,
    pub level: TileZoomLevel,
}

/// A tile's footprint in full-resolution resource pixels, clipped to the
/// image.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    pub fn new(column: u32, row: u32, level: TileZoomLevel) -> Self {
        Self { column, row, level }
    }

    pub fn resource_region(&self) -> ResourceRegion {
        let span_x = self.level.tile_width as u64 * self.level.scale_factor as u64;
        let span_y = self.level.tile_height as u64 * self.level.scale_factor as u64;
        let x = (self.column as u64 * span_x).min(self.level.image_width as u64);
        let y = (self.row as u64 * span_y).min(self.level.image_height as u64);
        let width = span_x.min(self.level.image_width as u64 - x);
        let height = span_y.min(self.level.image_height as u64 - y);
        ResourceRegion {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
        }
    }

    pub fn resource_bbox(&self) -> Bbox {
        let r = self.resource_region();
        Bbox::new(
            [r.x as f64, r.y as f64],
            [(r.x + r.width) as f64, (r.y + r.height) as f64],
        )
    }

    pub fn center(&self) -> Point {
        self.resource_bbox().center()
    }

    /// Size of the encoded tile image in scaled pixels.
    pub fn scaled_size(&self) -> (u32, u32) {
        let r = self.resource_region();
        (
            (r.width as u64).div_ceil(self.level.scale_factor as u64) as u32,
            (r.height as u64).div_ceil(self.level.scale_factor as u64) as u32,
        )
    }
}
