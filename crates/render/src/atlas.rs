//! Texture atlas for the forward-path rasterizer.
//!
//! All cached tiles of one map are shelf-packed into a single RGBA buffer.
//! Per entry the atlas records what a fragment lookup needs: atlas origin,
//! resource region, and scale factor. Dimensions are not rounded to powers
//! of two.

use streaming::{CacheableTile, DecodedTile};
use tiles::ResourceRegion;

#[derive(Debug, Clone, PartialEq)]
pub struct AtlasEntry {
    pub url: String,
    /// Top-left placement in the atlas, pixels.
    pub origin: [u32; 2],
    /// Pixel size of the packed tile.
    pub size: [u32; 2],
    pub region: ResourceRegion,
    pub scale_factor: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureAtlas {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA.
    pub pixels: Vec<u8>,
    pub entries: Vec<AtlasEntry>,
}

impl TextureAtlas {
    /// Pack the decoded tiles into one texture. Order is made deterministic
    /// by sorting on (height, url) before shelving.
    pub fn pack(tiles: &[&CacheableTile]) -> TextureAtlas {
        let mut decoded: Vec<(&CacheableTile, &DecodedTile)> = tiles
            .iter()
            .filter_map(|t| t.data.as_ref().map(|d| (*t, d)))
            .collect();
        if decoded.is_empty() {
            return TextureAtlas::default();
        }
        decoded.sort_by(|(a, da), (b, db)| {
            db.height.cmp(&da.height).then_with(|| a.url.cmp(&b.url))
        });

        let total_area: u64 = decoded
            .iter()
            .map(|(_, d)| d.width as u64 * d.height as u64)
            .sum();
        let widest = decoded.iter().map(|(_, d)| d.width).max().unwrap_or(1);
        let atlas_width = widest.max((total_area as f64).sqrt().ceil() as u32);

        // Shelf placement.
        let mut entries = Vec::with_capacity(decoded.len());
        let mut cursor_x = 0u32;
        let mut cursor_y = 0u32;
        let mut shelf_height = 0u32;
        for (tile, data) in &decoded {
            if cursor_x + data.width > atlas_width {
                cursor_x = 0;
                cursor_y += shelf_height;
                shelf_height = 0;
            }
            entries.push(AtlasEntry {
                url: tile.url.clone(),
                origin: [cursor_x, cursor_y],
                size: [data.width, data.height],
                region: tile.tile.resource_region(),
                scale_factor: tile.tile.level.scale_factor,
            });
            cursor_x += data.width;
            shelf_height = shelf_height.max(data.height);
        }
        let atlas_height = cursor_y + shelf_height;

        let mut pixels = vec![0u8; atlas_width as usize * atlas_height as usize * 4];
        for ((_, data), entry) in decoded.iter().zip(&entries) {
            for row in 0..data.height {
                let src_start = (row * data.width * 4) as usize;
                let src_end = src_start + (data.width * 4) as usize;
                let dst_start = (((entry.origin[1] + row) * atlas_width + entry.origin[0]) * 4)
                    as usize;
                pixels[dst_start..dst_start + (data.width * 4) as usize]
                    .copy_from_slice(&data.rgba[src_start..src_end]);
            }
        }

        TextureAtlas {
            width: atlas_width,
            height: atlas_height,
            pixels,
            entries,
        }
    }

    /// Fragment lookup: the entry containing the resource point, preferring
    /// the exact scale factor, then the nearest coarser one, then the
    /// sharpest finer one.
    pub fn entry_for(&self, resource: [f64; 2], preferred_scale_factor: u32) -> Option<&AtlasEntry> {
        let mut coarser: Option<&AtlasEntry> = None;
        let mut finer: Option<&AtlasEntry> = None;
        for entry in &self.entries {
            let r = entry.region;
            let inside = resource[0] >= r.x as f64
                && resource[0] < (r.x + r.width) as f64
                && resource[1] >= r.y as f64
                && resource[1] < (r.y + r.height) as f64;
            if !inside {
                continue;
            }
            if entry.scale_factor == preferred_scale_factor {
                return Some(entry);
            }
            if entry.scale_factor > preferred_scale_factor {
                if coarser.is_none_or(|b| entry.scale_factor < b.scale_factor) {
                    coarser = Some(entry);
                }
            } else if finer.is_none_or(|b| entry.scale_factor > b.scale_factor) {
                finer = Some(entry);
            }
        }
        coarser.or(finer)
    }

    /// Sample the packed pixel under `resource`, nearest neighbor.
    pub fn sample(&self, entry: &AtlasEntry, resource: [f64; 2]) -> [u8; 4] {
        let sf = entry.scale_factor as f64;
        let local_x = ((resource[0] - entry.region.x as f64) / sf).floor();
        let local_y = ((resource[1] - entry.region.y as f64) / sf).floor();
        let x = (local_x.max(0.0) as u32).min(entry.size[0].saturating_sub(1)) + entry.origin[0];
        let y = (local_y.max(0.0) as u32).min(entry.size[1].saturating_sub(1)) + entry.origin[1];
        let idx = ((y * self.width + x) * 4) as usize;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }
}
