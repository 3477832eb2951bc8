//! The viewport value type and its cascade of transforms.
//!
//! A viewport is immutable: every derived transform is computed once at
//! construction. Four planar spaces are involved:
//!
//! - projectedGeo: the projection plane (y grows north)
//! - viewport: device-independent output pixels (y grows down)
//! - canvas: physical pixels, viewport · devicePixelRatio
//! - clip: `[−1, 1]²` for the triangle rasterizer

use foundation::bbox::Bbox;
use foundation::geometry::Point;
use foundation::ids::MapId;
use foundation::transform::Affine;
use scene::WarpedMapList;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fit {
    /// The polygon fits entirely inside the viewport.
    Contain,
    /// The viewport is fully covered by the polygon's bbox.
    Cover,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewportError {
    /// Factory was given no maps or an empty polygon.
    EmptyInput,
    InvalidSize { width: u32, height: u32 },
    InvalidScale { scale: f64 },
    InvalidDevicePixelRatio { dpr: f64 },
}

impl std::fmt::Display for ViewportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewportError::EmptyInput => write!(f, "no maps or polygon to fit"),
            ViewportError::InvalidSize { width, height } => {
                write!(f, "viewport size {width}x{height} is degenerate")
            }
            ViewportError::InvalidScale { scale } => {
                write!(f, "projectedGeo-per-viewport scale {scale} is degenerate")
            }
            ViewportError::InvalidDevicePixelRatio { dpr } => {
                write!(f, "device pixel ratio {dpr} must be >= 1")
            }
        }
    }
}

impl std::error::Error for ViewportError {}

#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    pub viewport_size: [u32; 2],
    pub projected_center: Point,
    /// ProjectedGeo units covered by one viewport pixel.
    pub projected_per_viewport_scale: f64,
    /// Counter-clockwise rotation of the viewport relative to projectedGeo
    /// (radians).
    pub rotation: f64,
    pub device_pixel_ratio: f64,

    pub canvas_size: [u32; 2],
    /// The viewport's footprint on the projection plane: a rotated
    /// rectangle, counter-clockwise from the corner that maps to the
    /// viewport origin.
    pub projected_rectangle: [Point; 4],

    projected_to_viewport: Affine,
    viewport_to_projected: Affine,
    projected_to_canvas: Affine,
    canvas_to_projected: Affine,
    projected_to_clip: Affine,
    viewport_to_clip: Affine,
}

impl Viewport {
    pub fn new(
        viewport_size: [u32; 2],
        projected_center: Point,
        projected_per_viewport_scale: f64,
        rotation: f64,
        device_pixel_ratio: f64,
    ) -> Result<Viewport, ViewportError> {
        let [width, height] = viewport_size;
        if width == 0 || height == 0 {
            return Err(ViewportError::InvalidSize { width, height });
        }
        if !(projected_per_viewport_scale.is_finite() && projected_per_viewport_scale > 0.0) {
            return Err(ViewportError::InvalidScale {
                scale: projected_per_viewport_scale,
            });
        }
        if !(device_pixel_ratio.is_finite() && device_pixel_ratio >= 1.0) {
            return Err(ViewportError::InvalidDevicePixelRatio {
                dpr: device_pixel_ratio,
            });
        }

        let w = width as f64;
        let h = height as f64;
        let scale = projected_per_viewport_scale;
        let canvas_size = [
            (w * device_pixel_ratio).round() as u32,
            (h * device_pixel_ratio).round() as u32,
        ];

        // translate(−center) → rotate(−rotation) → scale(1/s, −1/s) →
        // translate(viewportCenter). The y negation flips between the
        // north-up plane and screen rows.
        let center_out = Affine::translation(-projected_center.x, -projected_center.y)
            .then(&Affine::rotation(-rotation));
        let projected_to_viewport = center_out
            .then(&Affine::scaling(1.0 / scale, -1.0 / scale))
            .then(&Affine::translation(w * 0.5, h * 0.5));
        let dpr = device_pixel_ratio;
        let projected_to_canvas = center_out
            .then(&Affine::scaling(dpr / scale, -dpr / scale))
            .then(&Affine::translation(
                canvas_size[0] as f64 * 0.5,
                canvas_size[1] as f64 * 0.5,
            ));

        // Viewport onto [−1, 1]², y negated.
        let viewport_to_clip = Affine::new(2.0 / w, 0.0, -1.0, 0.0, -2.0 / h, 1.0);
        let projected_to_clip = projected_to_viewport.then(&viewport_to_clip);

        // Degenerate scale was rejected above, so inversion cannot fail.
        let viewport_to_projected = projected_to_viewport
            .invert()
            .map_err(|_| ViewportError::InvalidScale { scale })?;
        let canvas_to_projected = projected_to_canvas
            .invert()
            .map_err(|_| ViewportError::InvalidScale { scale })?;

        let projected_rectangle = [
            viewport_to_projected.apply(Point::new(0.0, 0.0)),
            viewport_to_projected.apply(Point::new(w, 0.0)),
            viewport_to_projected.apply(Point::new(w, h)),
            viewport_to_projected.apply(Point::new(0.0, h)),
        ];

        Ok(Viewport {
            viewport_size,
            projected_center,
            projected_per_viewport_scale,
            rotation,
            device_pixel_ratio,
            canvas_size,
            projected_rectangle,
            projected_to_viewport,
            viewport_to_projected,
            projected_to_canvas,
            canvas_to_projected,
            projected_to_clip,
            viewport_to_clip,
        })
    }

    pub fn projected_to_viewport(&self) -> Affine {
        self.projected_to_viewport
    }

    pub fn viewport_to_projected(&self) -> Affine {
        self.viewport_to_projected
    }

    pub fn projected_to_canvas(&self) -> Affine {
        self.projected_to_canvas
    }

    pub fn canvas_to_projected(&self) -> Affine {
        self.canvas_to_projected
    }

    pub fn projected_to_clip(&self) -> Affine {
        self.projected_to_clip
    }

    pub fn viewport_to_clip(&self) -> Affine {
        self.viewport_to_clip
    }

    pub fn projected_bbox(&self) -> Bbox {
        Bbox::from_points(&self.projected_rectangle)
            .unwrap_or(Bbox::new([0.0, 0.0], [0.0, 0.0]))
    }

    /// Fit a polygon into a viewport of the given size.
    pub fn from_size_and_polygon(
        viewport_size: [u32; 2],
        polygon: &[Point],
        fit: Fit,
        rotation: f64,
        device_pixel_ratio: f64,
    ) -> Result<Viewport, ViewportError> {
        let (center, scale) = fit_polygon(viewport_size, polygon, fit, rotation)?;
        Viewport::new(
            viewport_size,
            center,
            scale,
            rotation,
            device_pixel_ratio,
        )
    }

    /// Fit the convex hull of the selected maps (all maps when `None`).
    /// `zoom` scales the fitted view: 1 is the exact fit, 2 shows the maps
    /// at twice the size.
    pub fn from_size_and_maps(
        viewport_size: [u32; 2],
        list: &WarpedMapList,
        map_ids: Option<&[MapId]>,
        fit: Fit,
        rotation: f64,
        device_pixel_ratio: f64,
        zoom: f64,
    ) -> Result<Viewport, ViewportError> {
        if !(zoom.is_finite() && zoom > 0.0) {
            return Err(ViewportError::InvalidScale { scale: zoom });
        }
        let hull = list
            .convex_hull(map_ids)
            .ok_or(ViewportError::EmptyInput)?;
        let (center, scale) = fit_polygon(viewport_size, &hull, fit, rotation)?;
        Viewport::new(
            viewport_size,
            center,
            scale / zoom,
            rotation,
            device_pixel_ratio,
        )
    }

    /// Size a viewport around a polygon at a fixed scale.
    pub fn from_scale_and_polygon(
        projected_per_viewport_scale: f64,
        polygon: &[Point],
        rotation: f64,
        device_pixel_ratio: f64,
    ) -> Result<Viewport, ViewportError> {
        if polygon.is_empty() {
            return Err(ViewportError::EmptyInput);
        }
        if !(projected_per_viewport_scale.is_finite() && projected_per_viewport_scale > 0.0) {
            return Err(ViewportError::InvalidScale {
                scale: projected_per_viewport_scale,
            });
        }
        let (bbox, center) = rotated_frame_bbox(polygon, rotation)?;
        let size = [
            (bbox.width() / projected_per_viewport_scale).ceil().max(1.0) as u32,
            (bbox.height() / projected_per_viewport_scale).ceil().max(1.0) as u32,
        ];
        Viewport::new(
            size,
            center,
            projected_per_viewport_scale,
            rotation,
            device_pixel_ratio,
        )
    }

    pub fn from_scale_and_maps(
        projected_per_viewport_scale: f64,
        list: &WarpedMapList,
        map_ids: Option<&[MapId]>,
        rotation: f64,
        device_pixel_ratio: f64,
        zoom: f64,
    ) -> Result<Viewport, ViewportError> {
        if !(zoom.is_finite() && zoom > 0.0) {
            return Err(ViewportError::InvalidScale { scale: zoom });
        }
        let hull = list
            .convex_hull(map_ids)
            .ok_or(ViewportError::EmptyInput)?;
        Viewport::from_scale_and_polygon(
            projected_per_viewport_scale / zoom,
            &hull,
            rotation,
            device_pixel_ratio,
        )
    }
}

/// The polygon's bbox in the rotated (viewport-aligned) frame, and its
/// center mapped back to projectedGeo.
fn rotated_frame_bbox(
    polygon: &[Point],
    rotation: f64,
) -> Result<(Bbox, Point), ViewportError> {
    let rotate_back = Affine::rotation(-rotation);
    let rotated: Vec<Point> = polygon.iter().map(|p| rotate_back.apply(*p)).collect();
    let bbox = Bbox::from_points(&rotated).ok_or(ViewportError::EmptyInput)?;
    let center = Affine::rotation(rotation).apply(bbox.center());
    Ok((bbox, center))
}

fn fit_polygon(
    viewport_size: [u32; 2],
    polygon: &[Point],
    fit: Fit,
    rotation: f64,
) -> Result<(Point, f64), ViewportError> {
    let [width, height] = viewport_size;
    if width == 0 || height == 0 {
        return Err(ViewportError::InvalidSize { width, height });
    }
    let (bbox, center) = rotated_frame_bbox(polygon, rotation)?;

    let sx = bbox.width() / width as f64;
    let sy = bbox.height() / height as f64;
    let scale = match fit {
        Fit::Contain => sx.max(sy),
        Fit::Cover => sx.min(sy),
    };
    if !(scale.is_finite() && scale > 0.0) {
        return Err(ViewportError::InvalidScale { scale });
    }
    Ok((center, scale))
}

#[cfg(test)]
mod tests {
    use super::{Fit, Viewport, ViewportError};
    use foundation::geometry::Point;
    use foundation::ids::MapId;
    use foundation::projection::IdentityProjection;
    use runtime::event_bus::EventBus;
    use scene::WarpedMapList;
    use warp::{ImageInfoLoadError, ImageInfoLoader, WarpOptions};

    fn assert_close(a: Point, b: Point, eps: f64) {
        assert!(a.distance(b) <= eps, "expected {a:?} ~= {b:?}");
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

    /// One 100×100 map with an identity georeference.
    fn single_map_list() -> WarpedMapList {
        let annotation = formats::Annotation::from_json(
            r#"{
                "type": "GeoreferencedMap",
                "resource": { "id": "https://iiif.example.org/map", "type": "ImageService3", "width": 100, "height": 100 },
                "gcps": [
                    { "resource": [0, 0], "geo": [0, 0] },
                    { "resource": [100, 0], "geo": [100, 0] },
                    { "resource": [100, 100], "geo": [100, 100] },
                    { "resource": [0, 100], "geo": [0, 100] }
                ],
                "resourceMask": [[0, 0], [100, 0], [100, 100], [0, 100]]
            }"#,
        )
        .unwrap();
        let mut list = WarpedMapList::new();
        list.add(
            MapId(1),
            &annotation,
            &IdentityProjection,
            &StaticLoader,
            WarpOptions::default(),
            &mut EventBus::new(),
        )
        .unwrap();
        list
    }

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ]
    }

    #[test]
    fn center_maps_to_viewport_center() {
        let v = Viewport::new([800, 600], Point::new(1000.0, -500.0), 2.0, 0.3, 1.0).unwrap();
        assert_close(
            v.projected_to_viewport().apply(v.projected_center),
            Point::new(400.0, 300.0),
            1e-9,
        );
    }

    #[test]
    fn viewport_transform_round_trips() {
        let v = Viewport::new([800, 600], Point::new(1000.0, -500.0), 2.0, 0.3, 2.0).unwrap();
        let to = v.projected_to_viewport();
        let back = v.viewport_to_projected();
        for p in [
            Point::new(0.0, 0.0),
            Point::new(812.0, -33.5),
            Point::new(1500.0, -900.0),
        ] {
            assert_close(back.apply(to.apply(p)), p, 1e-9);
        }

        let canvas_rt = v.canvas_to_projected().apply(
            v.projected_to_canvas().apply(Point::new(1000.0, -500.0)),
        );
        assert_close(canvas_rt, Point::new(1000.0, -500.0), 1e-9);
    }

    #[test]
    fn clip_space_pins_the_projected_rectangle() {
        let v = Viewport::new([200, 100], Point::new(50.0, 50.0), 1.0, 0.0, 1.0).unwrap();
        let to_clip = v.projected_to_clip();
        // Corner that maps to the viewport origin lands at clip (−1, 1).
        assert_close(to_clip.apply(v.projected_rectangle[0]), Point::new(-1.0, 1.0), 1e-9);
        assert_close(to_clip.apply(v.projected_rectangle[2]), Point::new(1.0, -1.0), 1e-9);
        assert_close(to_clip.apply(Point::new(50.0, 50.0)), Point::new(0.0, 0.0), 1e-9);

        let vp_clip = v.viewport_to_clip();
        assert_close(vp_clip.apply(Point::new(0.0, 0.0)), Point::new(-1.0, 1.0), 1e-9);
        assert_close(vp_clip.apply(Point::new(200.0, 100.0)), Point::new(1.0, -1.0), 1e-9);
    }

    #[test]
    fn contain_fits_the_square_by_height() {
        // Scenario: 200×100 viewport, unit-100 square, contain.
        let v =
            Viewport::from_size_and_polygon([200, 100], &square(), Fit::Contain, 0.0, 1.0)
                .unwrap();
        assert_close(v.projected_center, Point::new(50.0, 50.0), 1e-9);
        assert!((v.projected_per_viewport_scale - 1.0).abs() < 1e-12);

        // Contain: the projected rectangle encloses the polygon.
        let bbox = v.projected_bbox();
        for p in square() {
            assert!(bbox.contains_point(p));
        }
    }

    #[test]
    fn cover_is_enclosed_by_the_polygon_bbox() {
        let v = Viewport::from_size_and_polygon([200, 100], &square(), Fit::Cover, 0.0, 1.0)
            .unwrap();
        // Cover: scale is min(100/200, 100/100) = 0.5.
        assert!((v.projected_per_viewport_scale - 0.5).abs() < 1e-12);
        let bbox = v.projected_bbox();
        assert!(bbox.min[0] >= -1e-9 && bbox.max[0] <= 100.0 + 1e-9);
        assert!(bbox.min[1] >= -1e-9 && bbox.max[1] <= 100.0 + 1e-9);
        assert_close(v.projected_center, Point::new(50.0, 50.0), 1e-9);
    }

    #[test]
    fn rotated_fit_still_encloses() {
        let v = Viewport::from_size_and_polygon(
            [300, 200],
            &square(),
            Fit::Contain,
            std::f64::consts::FRAC_PI_4,
            1.0,
        )
        .unwrap();
        let to_viewport = v.projected_to_viewport();
        for p in square() {
            let q = to_viewport.apply(p);
            assert!(q.x >= -1e-6 && q.x <= 300.0 + 1e-6);
            assert!(q.y >= -1e-6 && q.y <= 200.0 + 1e-6);
        }
    }

    #[test]
    fn scale_factory_sizes_the_viewport() {
        let v = Viewport::from_scale_and_polygon(0.5, &square(), 0.0, 1.0).unwrap();
        assert_eq!(v.viewport_size, [200, 200]);
        assert_close(v.projected_center, Point::new(50.0, 50.0), 1e-9);
    }

    #[test]
    fn map_factories_fit_the_hull_and_apply_zoom() {
        let list = single_map_list();

        let v = Viewport::from_size_and_maps([200, 100], &list, None, Fit::Contain, 0.0, 1.0, 1.0)
            .unwrap();
        assert_close(v.projected_center, Point::new(50.0, 50.0), 1e-6);
        assert!((v.projected_per_viewport_scale - 1.0).abs() < 1e-6);

        let zoomed =
            Viewport::from_size_and_maps([200, 100], &list, None, Fit::Contain, 0.0, 1.0, 2.0)
                .unwrap();
        assert!((zoomed.projected_per_viewport_scale - 0.5).abs() < 1e-6);

        let sized = Viewport::from_scale_and_maps(0.5, &list, None, 0.0, 1.0, 1.0).unwrap();
        assert_eq!(sized.viewport_size, [200, 200]);

        assert_eq!(
            Viewport::from_size_and_maps(
                [200, 100],
                &WarpedMapList::new(),
                None,
                Fit::Contain,
                0.0,
                1.0,
                1.0
            )
            .unwrap_err(),
            ViewportError::EmptyInput
        );
    }

    #[test]
    fn empty_inputs_and_degenerate_parameters_fail() {
        assert_eq!(
            Viewport::from_size_and_polygon([100, 100], &[], Fit::Contain, 0.0, 1.0)
                .unwrap_err(),
            ViewportError::EmptyInput
        );
        assert!(matches!(
            Viewport::new([0, 100], Point::new(0.0, 0.0), 1.0, 0.0, 1.0).unwrap_err(),
            ViewportError::InvalidSize { .. }
        ));
        assert!(matches!(
            Viewport::new([100, 100], Point::new(0.0, 0.0), 0.0, 0.0, 1.0).unwrap_err(),
            ViewportError::InvalidScale { .. }
        ));
        assert!(matches!(
            Viewport::new([100, 100], Point::new(0.0, 0.0), 1.0, 0.0, 0.5).unwrap_err(),
            ViewportError::InvalidDevicePixelRatio { .. }
        ));

        // A single point has no extent to derive a scale from.
        assert!(matches!(
            Viewport::from_size_and_polygon(
                [100, 100],
                &[Point::new(5.0, 5.0)],
                Fit::Contain,
                0.0,
                1.0
            )
            .unwrap_err(),
            ViewportError::InvalidScale { .. }
        ));
    }
}
