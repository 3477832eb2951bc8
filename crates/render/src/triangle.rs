//! Forward-path rasterizer: textured triangles, software stand-in for the
//! GPU pipeline.
//!
//! Each map's triangulation is forward-transformed into clip space (f32
//! from here on, the GPU boundary), rasterized with barycentric
//! interpolation, and every fragment resolves its tile through the map's
//! texture atlas, preferring the exact zoom level and falling back to
//! coarser entries. A per-map stamp buffer gives each fragment exactly one
//! contribution even where triangles share edges. Cross-fades blend the
//! previous and current triangle placements through the map's transition
//! parameter.

use std::collections::BTreeMap;

use foundation::ids::MapId;
use foundation::precision::points_to_f32;
use foundation::time::Time;
use runtime::event_bus::{EventBus, RenderEvent};
use scene::WarpedMapList;
use streaming::TileCache;

use crate::atlas::TextureAtlas;
use crate::cpu::over;
use crate::effects::Effects;
use crate::viewport::Viewport;

#[derive(Debug, Default)]
pub struct TriangleRenderer {
    pub effects: BTreeMap<MapId, Effects>,
}

impl TriangleRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_effects(&mut self, map_id: MapId, effects: Effects) {
        self.effects.insert(map_id, effects);
    }

    /// Draw every visible map in painting order into a canvas-sized RGBA
    /// buffer.
    pub fn render(
        &self,
        list: &WarpedMapList,
        viewport: &Viewport,
        cache: &TileCache,
        now: Time,
        bus: &mut EventBus,
    ) -> Vec<u8> {
        let [width, height] = viewport.canvas_size;
        let pixel_count = width as usize * height as usize;
        let mut dest = vec![[0.0f64; 4]; pixel_count];
        let mut stamp = vec![0u32; pixel_count];
        let mut pass = 0u32;
        let to_clip = viewport.projected_to_clip();

        for map_id in list.painting_order() {
            if !list.is_visible(*map_id) {
                continue;
            }
            let Some(map) = list.get(*map_id) else {
                continue;
            };

            let cached = cache.cached_tiles_for_map(*map_id);
            let atlas = TextureAtlas::pack(&cached);
            if atlas.entries.is_empty() {
                continue;
            }
            bus.emit(RenderEvent::TexturesUpdated { map_id: *map_id });

            pass += 1;
            let t = map.transition_t(now);
            let projected = map.projected_triangles_at(t);
            let clip_points: Vec<foundation::geometry::Point> =
                projected.iter().map(|p| to_clip.apply(*p)).collect();

            // The GPU boundary: vertex buffers go to f32 here, nothing
            // upstream does.
            let clip = points_to_f32(&clip_points);
            let resource = points_to_f32(&map.resource_triangle_points);

            let effects = self.effects.get(map_id).copied().unwrap_or_default();
            let level = map
                .tile_level_index
                .and_then(|i| map.pyramid.get(i));
            let preferred_sf = level.map(|l| l.scale_factor).unwrap_or(1);
            let grid_spacing = level
                .map(|l| (l.tile_width * l.scale_factor) as f64)
                .unwrap_or(0.0);

            for triangle in clip.chunks_exact(3).zip(resource.chunks_exact(3)) {
                rasterize_triangle(
                    triangle.0,
                    triangle.1,
                    &atlas,
                    preferred_sf,
                    &effects,
                    grid_spacing,
                    [width, height],
                    pass,
                    &mut stamp,
                    &mut dest,
                );
            }
        }

        let mut pixels = vec![0u8; pixel_count * 4];
        for (i, rgba) in dest.iter().enumerate() {
            for (channel, value) in rgba.iter().enumerate() {
                pixels[i * 4 + channel] = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
        pixels
    }
}

#[allow(clippy::too_many_arguments)]
fn rasterize_triangle(
    clip: &[[f32; 2]],
    resource: &[[f32; 2]],
    atlas: &TextureAtlas,
    preferred_sf: u32,
    effects: &Effects,
    grid_spacing: f64,
    canvas: [u32; 2],
    pass: u32,
    stamp: &mut [u32],
    dest: &mut [[f64; 4]],
) {
    let [width, height] = canvas;
    let w = width as f64;
    let h = height as f64;
    // Clip → canvas pixels.
    let to_canvas =
        |c: [f32; 2]| -> [f64; 2] { [(c[0] as f64 + 1.0) * 0.5 * w, (1.0 - c[1] as f64) * 0.5 * h] };
    let a = to_canvas(clip[0]);
    let b = to_canvas(clip[1]);
    let c = to_canvas(clip[2]);

    let area = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
    if !area.is_finite() || area.abs() < 1e-12 {
        return;
    }

    let min_x = a[0].min(b[0]).min(c[0]).floor().max(0.0) as u32;
    let max_x = (a[0].max(b[0]).max(c[0]).ceil() as i64).clamp(0, width as i64 - 1) as u32;
    let min_y = a[1].min(b[1]).min(c[1]).floor().max(0.0) as u32;
    let max_y = (a[1].max(b[1]).max(c[1]).ceil() as i64).clamp(0, height as i64 - 1) as u32;
    if min_x > max_x || min_y > max_y {
        return;
    }

    const EDGE_EPS: f64 = 1e-9;
    for py in min_y..=max_y {
        for px in min_x..=max_x {
            let p = [px as f64 + 0.5, py as f64 + 0.5];
            let wa = ((b[0] - p[0]) * (c[1] - p[1]) - (b[1] - p[1]) * (c[0] - p[0])) / area;
            let wb = ((p[0] - a[0]) * (c[1] - a[1]) - (p[1] - a[1]) * (c[0] - a[0])) / area;
            let wc = 1.0 - wa - wb;
            if wa < -EDGE_EPS || wb < -EDGE_EPS || wc < -EDGE_EPS {
                continue;
            }

            let idx = (py * width + px) as usize;
            if stamp[idx] == pass {
                continue; // this map already contributed here
            }
            stamp[idx] = pass;

            let fragment_resource = [
                wa * resource[0][0] as f64
                    + wb * resource[1][0] as f64
                    + wc * resource[2][0] as f64,
                wa * resource[0][1] as f64
                    + wb * resource[1][1] as f64
                    + wc * resource[2][1] as f64,
            ];
            let Some(entry) = atlas.entry_for(fragment_resource, preferred_sf) else {
                continue; // tile not loaded yet: transparent until refetch
            };
            let rgba8 = atlas.sample(entry, fragment_resource);
            let rgba = [
                rgba8[0] as f64 / 255.0,
                rgba8[1] as f64 / 255.0,
                rgba8[2] as f64 / 255.0,
                rgba8[3] as f64 / 255.0,
            ];
            let src = effects.apply(rgba, fragment_resource, grid_spacing);
            dest[idx] = over(src, dest[idx]);
        }
    }
}
