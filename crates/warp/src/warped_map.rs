//! The transform-ready form of one georeferenced map.

use foundation::bbox::Bbox;
use foundation::geometry::{Point, convex_hull, ring_is_simple};
use foundation::ids::MapId;
use foundation::projection::Projection;
use foundation::time::Time;
use formats::{
    Annotation, AnnotationError, AnnotationGcp, AnnotationResource, ImageApiVersion, ImageInfo,
    TransformationKind,
};
use tiles::{Tile, TileZoomLevel, pyramid_from_info};
use tracing::debug;

use crate::transformer::{TransformError, Transformer};
use crate::triangulate::{TriangulationError, triangulate_mask};

/// Warped-map lifecycle:
///
/// Created → ImageInfoLoading → Ready ⇄ Changing → Removed
///
/// `Changing` is entered by every setter and left once the cross-fade
/// window has elapsed.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum MapState {
    Created,
    ImageInfoLoading,
    Ready,
    Changing { since: Time },
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfoLoadError {
    pub resource_id: String,
    pub reason: String,
}

impl std::fmt::Display for ImageInfoLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to load image info for {}: {}",
            self.resource_id, self.reason
        )
    }
}

impl std::error::Error for ImageInfoLoadError {}

/// Resolves a IIIF resource id to its `info.json`. Injected so the core
/// never performs IO itself.
pub trait ImageInfoLoader {
    fn load_image_info(&self, resource_id: &str) -> Result<ImageInfo, ImageInfoLoadError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum WarpedMapError {
    Annotation(AnnotationError),
    ImageInfo(ImageInfoLoadError),
    Transform(TransformError),
    Triangulation(TriangulationError),
}

impl std::fmt::Display for WarpedMapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarpedMapError::Annotation(e) => write!(f, "invalid annotation: {e}"),
            WarpedMapError::ImageInfo(e) => write!(f, "{e}"),
            WarpedMapError::Transform(e) => write!(f, "transform fit failed: {e}"),
            WarpedMapError::Triangulation(e) => write!(f, "mask triangulation failed: {e}"),
        }
    }
}

impl std::error::Error for WarpedMapError {}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WarpOptions {
    /// Longest allowed mesh edge in resource pixels. `None` derives one
    /// tenth of the mask bbox's larger side.
    pub max_triangulation_edge: Option<f64>,
    pub compute_distortion: bool,
    /// Cross-fade window for setter transitions (seconds).
    pub transition_duration_s: f64,
}

impl Default for WarpOptions {
    fn default() -> Self {
        Self {
            max_triangulation_edge: None,
            compute_distortion: true,
            transition_duration_s: 0.2,
        }
    }
}

/// One annotation, parsed and carrying every piece of derived state the
/// renderer needs: projected control points, a fitted bidirectional
/// transformer, matching resource/projectedGeo triangulations, distortion,
/// and the projectedGeo bbox/convex hull.
#[derive(Debug, Clone)]
pub struct WarpedMap {
    pub map_id: MapId,
    pub resource: AnnotationResource,
    pub gcps: Vec<AnnotationGcp>,
    pub resource_mask: Vec<Point>,
    pub transformation_kind: TransformationKind,

    /// `(resource, projectedGeo)` pairs the transformer was fitted to.
    pub projected_gcps: Vec<(Point, Point)>,
    pub transformer: Transformer,

    pub pyramid: Vec<TileZoomLevel>,
    pub api_version: ImageApiVersion,
    pub base_id: String,

    /// Flat vertex lists, three consecutive points per triangle; the two
    /// lists pair up index by index.
    pub resource_triangle_points: Vec<Point>,
    pub projected_triangle_points: Vec<Point>,
    /// Set while `Changing`; same length as the current list.
    pub previous_projected_triangle_points: Option<Vec<Point>>,
    /// Per-vertex log area ratio; empty when distortion is disabled.
    pub distortion: Vec<f64>,

    pub projected_bbox: Bbox,
    pub projected_hull: Vec<Point>,

    // Per-viewport scratch, written by the renderer on every pass.
    pub tile_level_index: Option<usize>,
    pub overview_level_index: Option<usize>,
    pub fetchable_tiles: Vec<Tile>,
    pub resource_viewport_ring: Vec<Point>,

    state: MapState,
    options: WarpOptions,
}

impl WarpedMap {
    /// Build the full derived state for an annotation. Errors surface in
    /// the add result; a map that fails here never exists.
    pub fn from_annotation(
        map_id: MapId,
        annotation: &Annotation,
        projection: &dyn Projection,
        loader: &dyn ImageInfoLoader,
        options: WarpOptions,
    ) -> Result<WarpedMap, WarpedMapError> {
        annotation.validate().map_err(WarpedMapError::Annotation)?;
        let transformation_kind = annotation
            .transformation_kind()
            .map_err(WarpedMapError::Annotation)?;

        debug!(map_id = map_id.0, "loading image info");
        let info = loader
            .load_image_info(&annotation.resource.id)
            .map_err(WarpedMapError::ImageInfo)?;
        let base_id = info
            .base_id()
            .map_err(|e| {
                WarpedMapError::ImageInfo(ImageInfoLoadError {
                    resource_id: annotation.resource.id.clone(),
                    reason: e.to_string(),
                })
            })?
            .to_string();

        let gcps = annotation.gcps.clone();
        let projected_gcps = project_gcps(&gcps, projection);
        let transformer = Transformer::fit(transformation_kind, &projected_gcps)
            .map_err(WarpedMapError::Transform)?;

        let mut map = WarpedMap {
            map_id,
            resource: annotation.resource.clone(),
            gcps,
            resource_mask: annotation.mask_ring(),
            transformation_kind,
            projected_gcps,
            transformer,
            pyramid: pyramid_from_info(&info),
            api_version: info.api_version(),
            base_id,
            resource_triangle_points: Vec::new(),
            projected_triangle_points: Vec::new(),
            previous_projected_triangle_points: None,
            distortion: Vec::new(),
            projected_bbox: Bbox::new([0.0, 0.0], [0.0, 0.0]),
            projected_hull: Vec::new(),
            tile_level_index: None,
            overview_level_index: None,
            fetchable_tiles: Vec::new(),
            resource_viewport_ring: Vec::new(),
            state: MapState::ImageInfoLoading,
            options,
        };
        map.recompute_derived()?;
        map.state = MapState::Ready;
        debug!(map_id = map_id.0, "warped map ready");
        Ok(map)
    }

    pub fn state(&self) -> MapState {
        self.state
    }

    pub fn mark_removed(&mut self) {
        self.state = MapState::Removed;
    }

    fn max_triangulation_edge(&self) -> f64 {
        if let Some(edge) = self.options.max_triangulation_edge {
            return edge;
        }
        match Bbox::from_points(&self.resource_mask) {
            Some(bbox) => (bbox.width().max(bbox.height()) / 10.0).max(1.0),
            None => 1.0,
        }
    }

    /// Rebuild triangulations and everything downstream of the transformer.
    fn recompute_derived(&mut self) -> Result<(), WarpedMapError> {
        let resource_points =
            triangulate_mask(&self.resource_mask, self.max_triangulation_edge())
                .map_err(WarpedMapError::Triangulation)?;
        let projected_points: Vec<Point> = resource_points
            .iter()
            .map(|p| self.transformer.forward(*p))
            .collect();

        self.distortion = if self.options.compute_distortion {
            resource_points
                .iter()
                .map(|p| self.transformer.log_distortion(*p))
                .collect()
        } else {
            Vec::new()
        };

        self.projected_bbox = Bbox::from_points(&projected_points)
            .unwrap_or(Bbox::new([0.0, 0.0], [0.0, 0.0]));
        self.projected_hull = convex_hull(&projected_points);
        self.resource_triangle_points = resource_points;
        self.projected_triangle_points = projected_points;
        Ok(())
    }

    /// Replace the resource mask and recompute the triangulation suffix.
    pub fn set_resource_mask(
        &mut self,
        mask: Vec<Point>,
        now: Time,
    ) -> Result<(), WarpedMapError> {
        if mask.len() < 3 {
            return Err(WarpedMapError::Annotation(AnnotationError::MaskTooSmall {
                vertices: mask.len(),
            }));
        }
        if !ring_is_simple(&mask) {
            return Err(WarpedMapError::Annotation(
                AnnotationError::MaskSelfIntersects,
            ));
        }

        let previous_transformer = self.transformer.clone();
        self.resource_mask = mask;
        self.recompute_derived()?;
        self.begin_transition(&previous_transformer, now);
        Ok(())
    }

    /// Replace the control points; refits the transformer and recomputes
    /// the projected triangulation.
    pub fn set_gcps(
        &mut self,
        gcps: Vec<AnnotationGcp>,
        projection: &dyn Projection,
        now: Time,
    ) -> Result<(), WarpedMapError> {
        let projected_gcps = project_gcps(&gcps, projection);
        let transformer = Transformer::fit(self.transformation_kind, &projected_gcps)
            .map_err(WarpedMapError::Transform)?;

        let previous_transformer =
            std::mem::replace(&mut self.transformer, transformer);
        self.gcps = gcps;
        self.projected_gcps = projected_gcps;
        self.recompute_derived()?;
        self.begin_transition(&previous_transformer, now);
        Ok(())
    }

    /// Switch the transform family; refits on the existing control points.
    pub fn set_transformation_kind(
        &mut self,
        kind: TransformationKind,
        now: Time,
    ) -> Result<(), WarpedMapError> {
        let transformer =
            Transformer::fit(kind, &self.projected_gcps).map_err(WarpedMapError::Transform)?;

        let previous_transformer =
            std::mem::replace(&mut self.transformer, transformer);
        self.transformation_kind = kind;
        self.recompute_derived()?;
        self.begin_transition(&previous_transformer, now);
        Ok(())
    }

    /// Stash where the *new* resource triangulation used to land, so the
    /// previous/current arrays always pair up vertex for vertex.
    fn begin_transition(&mut self, previous_transformer: &Transformer, now: Time) {
        self.previous_projected_triangle_points = Some(
            self.resource_triangle_points
                .iter()
                .map(|p| previous_transformer.forward(*p))
                .collect(),
        );
        self.state = MapState::Changing { since: now };
        debug!(map_id = self.map_id.0, "transition started");
    }

    /// Cross-fade progress in `[0, 1]`; 1 outside a transition.
    pub fn transition_t(&self, now: Time) -> f64 {
        match self.state {
            MapState::Changing { since } => {
                if self.options.transition_duration_s <= 0.0 {
                    return 1.0;
                }
                (now.elapsed_since(since) / self.options.transition_duration_s).clamp(0.0, 1.0)
            }
            _ => 1.0,
        }
    }

    /// Projected triangle points blended between the previous and current
    /// placement.
    pub fn projected_triangles_at(&self, t: f64) -> Vec<Point> {
        match &self.previous_projected_triangle_points {
            Some(previous) if previous.len() == self.projected_triangle_points.len() => previous
                .iter()
                .zip(&self.projected_triangle_points)
                .map(|(a, b)| a.lerp(*b, t.clamp(0.0, 1.0)))
                .collect(),
            _ => self.projected_triangle_points.clone(),
        }
    }

    /// Leave `Changing` once the window has elapsed; clears the previous
    /// arrays. Returns `true` on the transition's final frame.
    pub fn finish_transition_if_done(&mut self, now: Time) -> bool {
        if let MapState::Changing { .. } = self.state
            && self.transition_t(now) >= 1.0
        {
            self.previous_projected_triangle_points = None;
            self.state = MapState::Ready;
            return true;
        }
        false
    }
}

fn project_gcps(gcps: &[AnnotationGcp], projection: &dyn Projection) -> Vec<(Point, Point)> {
    gcps.iter()
        .map(|gcp| {
            (
                Point::new(gcp.resource[0], gcp.resource[1]),
                projection.project(Point::new(gcp.geo[0], gcp.geo[1])),
            )
        })
        .collect()
}
