//! The per-viewport render pipeline.
//!
//! One pass: select visible maps through the spatial index, back-project
//! the buffered viewport rectangle into each map's resource space, choose a
//! tile zoom level from the sampled transform scale, request tiles
//! center-out, pump the cache, and prune everything no longer needed.
//! Passes are throttled leading+trailing so bursts of viewport changes
//! collapse into at most one pass per wait window, with the trailing pass
//! seeing the latest viewport.

use std::collections::BTreeSet;

use foundation::bbox::Bbox;
use foundation::geometry::{Point, ring_centroid};
use foundation::ids::MapId;
use foundation::precision::stable_total_cmp_f64;
use runtime::event_bus::EventBus;
use runtime::frame::Frame;
use runtime::throttle::Throttle;
use scene::WarpedMapList;
use streaming::{FetchBudget, FetchableTile, TileCache, TileDecoder, TileFetcher};
use tiles::{
    TileZoomLevel, level_for_resolution, overview_level, sort_center_out, tile_url,
    tiles_covering_bbox,
};
use tracing::{debug, warn};
use warp::WarpedMap;

use crate::viewport::Viewport;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RendererOptions {
    /// Ratio by which the viewport rectangle is grown before tile
    /// selection, pre-warming the edges.
    pub viewport_buffer_ratio: f64,
    /// Back-projection refinement stops once a segment's midpoint deviates
    /// by less than this fraction of the segment length.
    pub max_offset_ratio: f64,
    pub max_refinement_depth: u32,
    /// Leading+trailing throttle window for render passes (seconds).
    pub render_wait_s: f64,
    /// Fetch work units spent per pass.
    pub fetch_units_per_pass: u32,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            viewport_buffer_ratio: 0.25,
            max_offset_ratio: 0.025,
            max_refinement_depth: 6,
            render_wait_s: 0.1,
            fetch_units_per_pass: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    /// Maps that took part in this pass, painting order.
    pub selected: Vec<MapId>,
    /// Tiles requested this pass (detail + overview, before dedup).
    pub requested_tiles: usize,
    /// Fetches settled by the cache pump.
    pub settled_fetches: usize,
}

#[derive(Debug)]
pub struct BaseRenderer {
    pub options: RendererOptions,
    pub cache: TileCache,
    throttle: Throttle<Viewport>,
}

impl BaseRenderer {
    pub fn new(options: RendererOptions) -> Self {
        Self {
            options,
            cache: TileCache::new(),
            throttle: Throttle::new(options.render_wait_s),
        }
    }

    /// Throttled render. Returns `None` when the call was coalesced into
    /// the trailing edge; `poll` will run it once the window elapses.
    pub fn render(
        &mut self,
        list: &mut WarpedMapList,
        viewport: &Viewport,
        frame: Frame,
        fetcher: &dyn TileFetcher,
        decoder: &dyn TileDecoder,
        bus: &mut EventBus,
    ) -> Option<RenderSummary> {
        let viewport = self.throttle.submit(frame.time, viewport.clone())?;
        Some(self.render_pass(list, &viewport, frame, fetcher, decoder, bus))
    }

    /// Run the trailing render once the throttle window has elapsed.
    pub fn poll(
        &mut self,
        list: &mut WarpedMapList,
        frame: Frame,
        fetcher: &dyn TileFetcher,
        decoder: &dyn TileDecoder,
        bus: &mut EventBus,
    ) -> Option<RenderSummary> {
        let viewport = self.throttle.poll(frame.time)?;
        Some(self.render_pass(list, &viewport, frame, fetcher, decoder, bus))
    }

    fn render_pass(
        &mut self,
        list: &mut WarpedMapList,
        viewport: &Viewport,
        frame: Frame,
        fetcher: &dyn TileFetcher,
        decoder: &dyn TileDecoder,
        bus: &mut EventBus,
    ) -> RenderSummary {
        let buffered_rectangle =
            buffer_rectangle(&viewport.projected_rectangle, self.options.viewport_buffer_ratio);
        let buffered_bbox = Bbox::from_points(&buffered_rectangle)
            .unwrap_or(viewport.projected_bbox());

        let selected = list.maps_intersecting(&buffered_bbox);
        let mut fetchable: Vec<FetchableTile> = Vec::new();
        let mut keep: BTreeSet<String> = BTreeSet::new();

        for map_id in &selected {
            let Some(map) = list.get_mut(*map_id) else {
                continue;
            };
            map.finish_transition_if_done(frame.time);

            let ring = resource_viewport_ring(map, &buffered_rectangle, &self.options);
            let Some(ring_bbox) = Bbox::from_points(&ring) else {
                continue;
            };

            let resolution = resource_per_viewport_pixel(
                map,
                &ring_bbox,
                viewport.projected_per_viewport_scale,
            );
            let level = match level_for_resolution(&map.pyramid, resolution) {
                Ok(level) => *level,
                Err(e) => {
                    warn!(map_id = map_id.0, "{e}, skipping map");
                    map.tile_level_index = None;
                    map.overview_level_index = None;
                    map.fetchable_tiles.clear();
                    continue;
                }
            };
            let overview = overview_level(&map.pyramid, &level).copied();

            let focus = ring_centroid(&ring);
            let mut detail_tiles = tiles_covering_bbox(level, &ring_bbox);
            sort_center_out(&mut detail_tiles, focus);

            let mut tiles = detail_tiles.clone();
            if let Some(overview) = overview {
                let mut overview_tiles = tiles_covering_bbox(overview, &ring_bbox);
                sort_center_out(&mut overview_tiles, focus);
                tiles.extend(overview_tiles);
            }

            map.resource_viewport_ring = ring;
            map.tile_level_index = Some(level.index);
            map.overview_level_index = overview.map(|l| l.index);
            map.fetchable_tiles = detail_tiles;

            for tile in tiles {
                let url = tile_url(&map.base_id, &tile, map.api_version);
                keep.insert(url.clone());
                fetchable.push(FetchableTile {
                    map_id: *map_id,
                    tile,
                    url,
                });
            }
        }

        let requested_tiles = fetchable.len();
        self.cache.request_fetchable_tiles(fetchable);
        let mut budget = FetchBudget::new(self.options.fetch_units_per_pass);
        let settled_fetches = self.cache.process(fetcher, decoder, &mut budget, bus);

        // Tiles outside the union of this pass's needs are dropped; their
        // in-flight fetches abort first.
        self.cache.prune(&keep);

        debug!(
            maps = selected.len(),
            requested = requested_tiles,
            settled = settled_fetches,
            "render pass"
        );
        RenderSummary {
            selected,
            requested_tiles,
            settled_fetches,
        }
    }
}

/// Scale a (possibly rotated) rectangle about its center so each side gains
/// `ratio` of padding.
fn buffer_rectangle(corners: &[Point; 4], ratio: f64) -> [Point; 4] {
    let center = ring_centroid(corners);
    let grow = 1.0 + 2.0 * ratio;
    [
        center + (corners[0] - center) * grow,
        center + (corners[1] - center) * grow,
        center + (corners[2] - center) * grow,
        center + (corners[3] - center) * grow,
    ]
}

/// Back-project the buffered rectangle into resource space, refining each
/// edge until the straight resource segment tracks the projectedGeo edge.
fn resource_viewport_ring(
    map: &WarpedMap,
    rectangle: &[Point; 4],
    options: &RendererOptions,
) -> Vec<Point> {
    let corners: Vec<Point> = rectangle
        .iter()
        .map(|geo| map.transformer.backward(*geo))
        .collect();
    if corners.iter().any(|p| !p.is_finite()) {
        // Outside the transformable domain: fall back to the whole mask.
        return map.resource_mask.clone();
    }

    let mut ring = Vec::with_capacity(8);
    for i in 0..4 {
        let a_geo = rectangle[i];
        let b_geo = rectangle[(i + 1) % 4];
        ring.push(corners[i]);
        refine_edge(
            map,
            a_geo,
            b_geo,
            corners[i],
            corners[(i + 1) % 4],
            options.max_refinement_depth,
            options.max_offset_ratio,
            &mut ring,
        );
    }
    ring
}

#[allow(clippy::too_many_arguments)]
fn refine_edge(
    map: &WarpedMap,
    a_geo: Point,
    b_geo: Point,
    a_res: Point,
    b_res: Point,
    depth: u32,
    max_offset_ratio: f64,
    ring: &mut Vec<Point>,
) {
    if depth == 0 {
        return;
    }
    let mid_geo = a_geo.lerp(b_geo, 0.5);
    let mid_res = map.transformer.backward(mid_geo);
    if !mid_res.is_finite() {
        return;
    }

    // Where would the straight resource segment land in projectedGeo?
    let straight_mid = map.transformer.forward(a_res.lerp(b_res, 0.5));
    let deviation = straight_mid.distance(mid_geo);
    if !deviation.is_finite() || deviation <= max_offset_ratio * a_geo.distance(b_geo) {
        return;
    }

    refine_edge(map, a_geo, mid_geo, a_res, mid_res, depth - 1, max_offset_ratio, ring);
    ring.push(mid_res);
    refine_edge(map, mid_geo, b_geo, mid_res, b_res, depth - 1, max_offset_ratio, ring);
}

/// Median of the forward-Jacobian-derived resolution over a 3×3 sample of
/// the resource ring's bbox: resource pixels per viewport pixel.
fn resource_per_viewport_pixel(
    map: &WarpedMap,
    ring_bbox: &Bbox,
    projected_per_viewport_scale: f64,
) -> f64 {
    let mut samples = Vec::with_capacity(9);
    for i in 0..3 {
        for j in 0..3 {
            let p = Point::new(
                ring_bbox.min[0] + ring_bbox.width() * (i as f64 + 0.5) / 3.0,
                ring_bbox.min[1] + ring_bbox.height() * (j as f64 + 0.5) / 3.0,
            );
            let forward_scale = map.transformer.forward_scale(p);
            if forward_scale.is_finite() && forward_scale > 0.0 {
                samples.push(projected_per_viewport_scale / forward_scale);
            }
        }
    }
    if samples.is_empty() {
        return 1.0;
    }
    samples.sort_by(|a, b| stable_total_cmp_f64(*a, *b));
    samples[samples.len() / 2]
}

/// Check that the union of a map's selected tile regions covers a bbox
/// (clamped to the image). Exposed for tests of the coverage property.
pub fn tiles_cover_bbox(tiles: &[tiles::Tile], level: &TileZoomLevel, bbox: &Bbox) -> bool {
    let clamped = Bbox::new(
        [bbox.min[0].max(0.0), bbox.min[1].max(0.0)],
        [
            bbox.max[0].min(level.image_width as f64),
            bbox.max[1].min(level.image_height as f64),
        ],
    );
    if clamped.width() <= 0.0 || clamped.height() <= 0.0 {
        return true;
    }
    // Probe a dense grid; every probe must fall in some tile region.
    for i in 0..=16 {
        for j in 0..=16 {
            let p = Point::new(
                clamped.min[0] + clamped.width() * i as f64 / 16.0,
                clamped.min[1] + clamped.height() * j as f64 / 16.0,
            );
            // Points exactly on the clamped max edge belong to the last tile.
            let probe = Point::new(
                p.x.min(clamped.max[0] - 1e-9),
                p.y.min(clamped.max[1] - 1e-9),
            );
            if !tiles.iter().any(|t| t.resource_bbox().contains_point(probe)) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::{BaseRenderer, RendererOptions, tiles_cover_bbox};
    use crate::cpu::CpuRenderer;
    use crate::effects::Effects;
    use crate::viewport::Viewport;
    use foundation::bbox::Bbox;
    use foundation::geometry::Point;
    use foundation::ids::MapId;
    use foundation::projection::IdentityProjection;
    use foundation::time::Time;
    use runtime::event_bus::EventBus;
    use runtime::frame::Frame;
    use scene::WarpedMapList;
    use streaming::{AbortToken, DecodedTile, FetchError, TileDecoder, TileFetcher};
    use warp::{ImageInfoLoadError, ImageInfoLoader, WarpOptions};

    /// Serves a synthetic source image whose pixel (x, y) is
    /// (x as u8, y as u8, 0, 255). The fetcher encodes the requested region
    /// into the payload; the decoder synthesizes the pixels.
    struct PatternFetcher;

    impl TileFetcher for PatternFetcher {
        fn fetch(&self, url: &str, _abort: &AbortToken) -> Result<Vec<u8>, FetchError> {
            let segments: Vec<&str> = url.split('/').collect();
            let n = segments.len();
            let region = segments[n - 4];
            let size = segments[n - 3];
            let parts: Vec<u32> = region
                .split(',')
                .filter_map(|v| v.parse().ok())
                .collect();
            if parts.len() != 4 {
                return Err(FetchError::Network {
                    reason: format!("unsupported region {region:?}"),
                });
            }
            let scaled_width: u32 = size
                .split(',')
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or(FetchError::Network {
                    reason: format!("unsupported size {size:?}"),
                })?;
            let sf = (parts[2] / scaled_width.max(1)).max(1);
            Ok(format!("{},{},{},{},{sf}", parts[0], parts[1], parts[2], parts[3]).into_bytes())
        }
    }

    struct PatternDecoder;

    impl TileDecoder for PatternDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<DecodedTile, FetchError> {
            let text = String::from_utf8_lossy(bytes);
            let v: Vec<u32> = text.split(',').filter_map(|p| p.parse().ok()).collect();
            let &[x, y, w, h, sf] = v.as_slice() else {
                return Err(FetchError::Decode {
                    reason: format!("bad payload {text:?}"),
                });
            };
            let width = w.div_ceil(sf);
            let height = h.div_ceil(sf);
            let mut rgba = Vec::with_capacity((width * height * 4) as usize);
            for j in 0..height {
                for i in 0..width {
                    rgba.extend([(x + i * sf) as u8, (y + j * sf) as u8, 0, 255]);
                }
            }
            Ok(DecodedTile {
                width,
                height,
                rgba,
            })
        }
    }

    struct StaticLoader;

    impl ImageInfoLoader for StaticLoader {
        fn load_image_info(
            &self,
            resource_id: &str,
        ) -> Result<formats::ImageInfo, ImageInfoLoadError> {
            formats::ImageInfo::from_json(&format!(
                r#"{{
                    "id": "{resource_id}",
                    "type": "ImageService3",
                    "width": 100,
                    "height": 100,
                    "tiles": [{{ "width": 64, "scaleFactors": [1] }}]
                }}"#
            ))
            .map_err(|e| ImageInfoLoadError {
                resource_id: resource_id.to_string(),
                reason: e.to_string(),
            })
        }
    }

    /// A 100×100 map whose georeference is the identity up to raster row
    /// direction: resource (x, y) ↔ geo (x + offset, −y).
    fn annotation(offset: f64) -> formats::Annotation {
        formats::Annotation::from_json(&format!(
            r#"{{
                "type": "GeoreferencedMap",
                "resource": {{ "id": "https://iiif.example.org/map-{offset}", "type": "ImageService3", "width": 100, "height": 100 }},
                "gcps": [
                    {{ "resource": [0, 0], "geo": [{0}, 0] }},
                    {{ "resource": [100, 0], "geo": [{1}, 0] }},
                    {{ "resource": [100, 100], "geo": [{1}, -100] }},
                    {{ "resource": [0, 100], "geo": [{0}, -100] }}
                ],
                "resourceMask": [[0, 0], [100, 0], [100, 100], [0, 100]]
            }}"#,
            offset,
            offset + 100.0
        ))
        .unwrap()
    }

    fn scene_with(offsets: &[f64]) -> (WarpedMapList, EventBus) {
        let mut list = WarpedMapList::new();
        let mut bus = EventBus::new();
        for (i, offset) in offsets.iter().enumerate() {
            list.add(
                MapId(i as u64 + 1),
                &annotation(*offset),
                &IdentityProjection,
                &StaticLoader,
                WarpOptions::default(),
                &mut bus,
            )
            .unwrap();
        }
        (list, bus)
    }

    fn render_once(
        list: &mut WarpedMapList,
        viewport: &Viewport,
        bus: &mut EventBus,
    ) -> BaseRenderer {
        let mut renderer = BaseRenderer::new(RendererOptions::default());
        renderer
            .render(list, viewport, Frame::at(0, Time(0.0)), &PatternFetcher, &PatternDecoder, bus)
            .expect("leading render runs");
        renderer
    }

    #[test]
    fn identity_map_renders_the_source_pixels() {
        let (mut list, mut bus) = scene_with(&[0.0]);
        let viewport =
            Viewport::new([100, 100], Point::new(50.0, -50.0), 1.0, 0.0, 1.0).unwrap();
        let renderer = render_once(&mut list, &viewport, &mut bus);

        let output = CpuRenderer::new().render(&list, &viewport, &renderer.cache);
        assert_eq!(output.missing_pixels, 0);
        for v in 0..100u32 {
            for u in 0..100u32 {
                let idx = ((v * 100 + u) * 4) as usize;
                assert_eq!(
                    &output.pixels[idx..idx + 4],
                    &[u as u8, v as u8, 0, 255],
                    "pixel ({u}, {v})"
                );
            }
        }
    }

    #[test]
    fn identical_renders_are_byte_identical() {
        let (mut list, mut bus) = scene_with(&[0.0]);
        let viewport =
            Viewport::new([100, 100], Point::new(50.0, -50.0), 1.0, 0.0, 1.0).unwrap();
        let renderer = render_once(&mut list, &viewport, &mut bus);

        let cpu = CpuRenderer::new();
        let first = cpu.render(&list, &viewport, &renderer.cache);
        let second = cpu.render(&list, &viewport, &renderer.cache);
        assert_eq!(first.pixels, second.pixels);
    }

    #[test]
    fn quarter_turn_viewport_rotates_the_source() {
        let (mut list, mut bus) = scene_with(&[0.0]);
        let viewport = Viewport::new(
            [100, 100],
            Point::new(50.0, -50.0),
            1.0,
            std::f64::consts::FRAC_PI_2,
            1.0,
        )
        .unwrap();
        let renderer = render_once(&mut list, &viewport, &mut bus);

        let output = CpuRenderer::new().render(&list, &viewport, &renderer.cache);
        assert_eq!(output.missing_pixels, 0);
        for v in 0..100u32 {
            for u in 0..100u32 {
                let idx = ((v * 100 + u) * 4) as usize;
                assert_eq!(
                    &output.pixels[idx..idx + 4],
                    &[v as u8, (99 - u) as u8, 0, 255],
                    "pixel ({u}, {v})"
                );
            }
        }
    }

    #[test]
    fn overlapping_maps_compose_with_opacity() {
        let (mut list, mut bus) = scene_with(&[0.0, 50.0]);
        let viewport =
            Viewport::new([150, 100], Point::new(75.0, -50.0), 1.0, 0.0, 1.0).unwrap();
        let renderer = render_once(&mut list, &viewport, &mut bus);

        let mut cpu = CpuRenderer::new();
        cpu.set_effects(
            MapId(2),
            Effects {
                opacity: 0.5,
                ..Effects::default()
            },
        );
        let output = cpu.render(&list, &viewport, &renderer.cache);

        let pixel = |u: u32, v: u32| {
            let idx = ((v * 150 + u) * 4) as usize;
            [
                output.pixels[idx],
                output.pixels[idx + 1],
                output.pixels[idx + 2],
                output.pixels[idx + 3],
            ]
        };

        // Only the bottom map: its own color.
        assert_eq!(pixel(25, 40), [25, 40, 0, 255]);
        // Overlap: half top, half bottom.
        assert_eq!(pixel(75, 40), [50, 40, 0, 255]);
        // Only the half-transparent top map over background.
        assert_eq!(pixel(125, 40), [75, 40, 0, 128]);
    }

    #[test]
    fn selected_tiles_cover_the_viewport_ring() {
        let (mut list, mut bus) = scene_with(&[0.0]);
        let viewport =
            Viewport::new([80, 60], Point::new(40.0, -30.0), 1.0, 0.2, 1.0).unwrap();
        let summary_renderer = render_once(&mut list, &viewport, &mut bus);
        drop(summary_renderer);

        let map = list.get(MapId(1)).unwrap();
        let level_index = map.tile_level_index.unwrap();
        let level = map.pyramid[level_index];
        let ring_bbox = Bbox::from_points(&map.resource_viewport_ring).unwrap();
        assert!(tiles_cover_bbox(&map.fetchable_tiles, &level, &ring_bbox));
    }

    #[test]
    fn renders_inside_the_wait_window_collapse() {
        let (mut list, mut bus) = scene_with(&[0.0]);
        let v1 = Viewport::new([100, 100], Point::new(50.0, -50.0), 1.0, 0.0, 1.0).unwrap();
        let v2 = Viewport::new([100, 100], Point::new(60.0, -50.0), 1.0, 0.0, 1.0).unwrap();

        let mut renderer = BaseRenderer::new(RendererOptions::default());
        let f0 = Frame::at(0, Time(0.0));
        assert!(
            renderer
                .render(&mut list, &v1, f0, &PatternFetcher, &PatternDecoder, &mut bus)
                .is_some()
        );
        // Second call lands inside the 100 ms window.
        let f1 = Frame::at(1, Time(0.01));
        assert!(
            renderer
                .render(&mut list, &v2, f1, &PatternFetcher, &PatternDecoder, &mut bus)
                .is_none()
        );
        // Trailing pass runs with the latest viewport once the window ends.
        let f12 = Frame::at(12, Time(0.12));
        let summary = renderer
            .poll(&mut list, f12, &PatternFetcher, &PatternDecoder, &mut bus)
            .expect("trailing render");
        assert_eq!(summary.selected, vec![MapId(1)]);
        assert!(
            renderer
                .poll(
                    &mut list,
                    Frame::at(13, Time(0.13)),
                    &PatternFetcher,
                    &PatternDecoder,
                    &mut bus
                )
                .is_none()
        );
    }

    #[test]
    fn prune_drops_tiles_for_maps_out_of_view() {
        let (mut list, mut bus) = scene_with(&[0.0, 500.0]);
        let near = Viewport::new([100, 100], Point::new(50.0, -50.0), 1.0, 0.0, 1.0).unwrap();
        let mut renderer = BaseRenderer::new(RendererOptions::default());
        renderer
            .render(&mut list, &near, Frame::at(0, Time(0.0)), &PatternFetcher, &PatternDecoder, &mut bus)
            .unwrap();
        let urls_near: Vec<String> = renderer.cache.urls().map(str::to_string).collect();
        assert!(!urls_near.is_empty());
        assert!(urls_near.iter().all(|u| u.contains("map-0")));

        // Pan to the far map: the first map's tiles are pruned.
        let far = Viewport::new([100, 100], Point::new(550.0, -50.0), 1.0, 0.0, 1.0).unwrap();
        renderer
            .render(&mut list, &far, Frame::at(60, Time(0.6)), &PatternFetcher, &PatternDecoder, &mut bus)
            .unwrap();
        let urls_far: Vec<String> = renderer.cache.urls().map(str::to_string).collect();
        assert!(!urls_far.is_empty());
        assert!(urls_far.iter().all(|u| u.contains("map-500")));
    }

    #[test]
    fn empty_pyramid_skips_the_map_without_failing() {
        struct NoTilesLoader;

        impl ImageInfoLoader for NoTilesLoader {
            fn load_image_info(
                &self,
                resource_id: &str,
            ) -> Result<formats::ImageInfo, ImageInfoLoadError> {
                formats::ImageInfo::from_json(&format!(
                    r#"{{ "id": "{resource_id}", "type": "ImageService3", "width": 100, "height": 100 }}"#
                ))
                .map_err(|e| ImageInfoLoadError {
                    resource_id: resource_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }

        let mut list = WarpedMapList::new();
        let mut bus = EventBus::new();
        list.add(
            MapId(1),
            &annotation(0.0),
            &IdentityProjection,
            &NoTilesLoader,
            WarpOptions::default(),
            &mut bus,
        )
        .unwrap();

        let viewport =
            Viewport::new([100, 100], Point::new(50.0, -50.0), 1.0, 0.0, 1.0).unwrap();
        let summary = render_once(&mut list, &viewport, &mut bus);
        assert!(summary.cache.is_empty());
    }
}
