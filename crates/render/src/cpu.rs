//! Per-pixel inverse-path rasterizer.
//!
//! For every canvas pixel the projectedGeo position is mapped through each
//! visible map's backward transform, the enclosing tile located by integer
//! division, and the decoded pixels sampled bilinearly. Maps composite in
//! painting order with plain alpha-over; a pixel nothing covers stays
//! transparent and is counted so the caller can re-fetch.

use std::collections::BTreeMap;

use foundation::geometry::{Point, point_in_ring};
use foundation::ids::MapId;
use scene::WarpedMapList;
use streaming::{DecodedTile, TileCache};
use tiles::{Tile, TileZoomLevel, tile_url};
use warp::WarpedMap;

use crate::effects::Effects;
use crate::viewport::Viewport;

#[derive(Debug, Clone, PartialEq)]
pub struct CpuRenderOutput {
    /// Canvas-sized row-major RGBA.
    pub pixels: Vec<u8>,
    /// Pixels where a map should have produced data but no tile was cached
    /// yet; they render transparent until a later pass.
    pub missing_pixels: usize,
}

#[derive(Debug, Default)]
pub struct CpuRenderer {
    pub effects: BTreeMap<MapId, Effects>,
}

impl CpuRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_effects(&mut self, map_id: MapId, effects: Effects) {
        self.effects.insert(map_id, effects);
    }

    pub fn render(
        &self,
        list: &WarpedMapList,
        viewport: &Viewport,
        cache: &TileCache,
    ) -> CpuRenderOutput {
        let [width, height] = viewport.canvas_size;
        let canvas_to_projected = viewport.canvas_to_projected();
        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        let mut missing_pixels = 0usize;

        let order = list.painting_order().to_vec();
        for row in 0..height {
            for col in 0..width {
                let canvas_point = Point::new(col as f64 + 0.5, row as f64 + 0.5);
                let geo = canvas_to_projected.apply(canvas_point);

                let mut dest = [0.0f64; 4];
                for map_id in &order {
                    if !list.is_visible(*map_id) {
                        continue;
                    }
                    let Some(map) = list.get(*map_id) else {
                        continue;
                    };
                    match sample_map(map, geo, cache) {
                        Sample::Color(rgba, resource) => {
                            let effects =
                                self.effects.get(map_id).copied().unwrap_or_default();
                            let src = effects.apply(
                                rgba,
                                [resource.x, resource.y],
                                grid_spacing(map),
                            );
                            dest = over(src, dest);
                        }
                        Sample::Missing => missing_pixels += 1,
                        Sample::Outside => {}
                    }
                }

                let idx = ((row * width + col) * 4) as usize;
                for (channel, value) in dest.iter().enumerate() {
                    pixels[idx + channel] = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            }
        }

        CpuRenderOutput {
            pixels,
            missing_pixels,
        }
    }
}

enum Sample {
    Color([f64; 4], Point),
    /// The pixel belongs to the map but its tile is not cached yet.
    Missing,
    Outside,
}

fn grid_spacing(map: &WarpedMap) -> f64 {
    map.tile_level_index
        .and_then(|i| map.pyramid.get(i))
        .map(|l| (l.tile_width * l.scale_factor) as f64)
        .unwrap_or(0.0)
}

fn sample_map(map: &WarpedMap, geo: Point, cache: &TileCache) -> Sample {
    if !map.projected_bbox.contains_point(geo) {
        return Sample::Outside;
    }
    let resource = map.transformer.backward(geo);
    // Outside the transformable domain: a designated no-data pixel.
    if !resource.is_finite() {
        return Sample::Outside;
    }
    if !point_in_ring(resource, &map.resource_mask) {
        return Sample::Outside;
    }

    let Some(level) = map.tile_level_index.and_then(|i| map.pyramid.get(i)) else {
        return Sample::Missing;
    };
    if let Some(color) = sample_level(map, *level, resource, cache) {
        return Sample::Color(color, resource);
    }
    // Detail tile not loaded yet: the overview keeps the map legible.
    if let Some(overview) = map.overview_level_index.and_then(|i| map.pyramid.get(i))
        && let Some(color) = sample_level(map, *overview, resource, cache)
    {
        return Sample::Color(color, resource);
    }
    Sample::Missing
}

fn sample_level(
    map: &WarpedMap,
    level: TileZoomLevel,
    resource: Point,
    cache: &TileCache,
) -> Option<[f64; 4]> {
    let span_x = (level.tile_width as u64 * level.scale_factor as u64) as f64;
    let span_y = (level.tile_height as u64 * level.scale_factor as u64) as f64;
    let column = ((resource.x / span_x).floor() as i64)
        .clamp(0, level.columns.saturating_sub(1) as i64) as u32;
    let row = ((resource.y / span_y).floor() as i64)
        .clamp(0, level.rows.saturating_sub(1) as i64) as u32;

    let tile = Tile::new(column, row, level);
    let url = tile_url(&map.base_id, &tile, map.api_version);
    let cached = cache.cached_tile(&url)?;
    let data = cached.data.as_ref()?;
    let region = tile.resource_region();
    Some(bilinear_sample(
        data,
        [region.x as f64, region.y as f64],
        level.scale_factor as f64,
        resource,
    ))
}

/// Bilinear sample of a decoded tile, `0..=1` channels. `resource` is in
/// full-resolution pixels; the tile covers `origin + i·sf` per texel.
fn bilinear_sample(data: &DecodedTile, origin: [f64; 2], sf: f64, resource: Point) -> [f64; 4] {
    let u = (resource.x - origin[0]) / sf - 0.5;
    let v = (resource.y - origin[1]) / sf - 0.5;
    let x0 = u.floor();
    let y0 = v.floor();
    let fx = u - x0;
    let fy = v - y0;

    let texel = |x: f64, y: f64| -> [f64; 4] {
        let xi = (x.max(0.0) as u32).min(data.width.saturating_sub(1));
        let yi = (y.max(0.0) as u32).min(data.height.saturating_sub(1));
        let idx = ((yi * data.width + xi) * 4) as usize;
        [
            data.rgba[idx] as f64 / 255.0,
            data.rgba[idx + 1] as f64 / 255.0,
            data.rgba[idx + 2] as f64 / 255.0,
            data.rgba[idx + 3] as f64 / 255.0,
        ]
    };

    let c00 = texel(x0, y0);
    let c10 = texel(x0 + 1.0, y0);
    let c01 = texel(x0, y0 + 1.0);
    let c11 = texel(x0 + 1.0, y0 + 1.0);

    let mut out = [0.0f64; 4];
    for channel in 0..4 {
        let top = c00[channel] + (c10[channel] - c00[channel]) * fx;
        let bottom = c01[channel] + (c11[channel] - c01[channel]) * fx;
        out[channel] = top + (bottom - top) * fy;
    }
    out
}

/// Non-premultiplied source-over, shared by both back-ends.
pub(crate) fn over(src: [f64; 4], dst: [f64; 4]) -> [f64; 4] {
    let sa = src[3];
    let da = dst[3];
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return [0.0; 4];
    }
    [
        (src[0] * sa + dst[0] * da * (1.0 - sa)) / out_a,
        (src[1] * sa + dst[1] * da * (1.0 - sa)) / out_a,
        (src[2] * sa + dst[2] * da * (1.0 - sa)) / out_a,
        out_a,
    ]
}
