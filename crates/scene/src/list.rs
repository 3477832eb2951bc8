//! Ordered, spatially indexed collection of warped maps.
//!
//! The list is the single owner of all map state. Insertion order doubles
//! as z-order (later maps paint on top), visibility is a per-map bit, and
//! an R-tree over projectedGeo bboxes answers viewport queries.

use std::collections::BTreeMap;

use foundation::bbox::Bbox;
use foundation::geometry::{Point, convex_hull};
use foundation::ids::MapId;
use foundation::projection::Projection;
use foundation::time::Time;
use formats::{Annotation, AnnotationGcp, TransformationKind};
use runtime::event_bus::{EventBus, RenderEvent};
use tracing::debug;
use warp::{ImageInfoLoader, WarpOptions, WarpedMap, WarpedMapError};

use crate::spatial::{Item, SpatialIndex};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ZOrderOp {
    ToFront,
    ToBack,
    Forward,
    Backward,
}

#[derive(Debug)]
pub enum AddError {
    DuplicateMapId(MapId),
    Map(WarpedMapError),
}

impl std::fmt::Display for AddError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddError::DuplicateMapId(id) => write!(f, "map id {} already present", id.0),
            AddError::Map(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AddError {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnknownMapId(pub MapId);

impl std::fmt::Display for UnknownMapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown map id {}", self.0.0)
    }
}

impl std::error::Error for UnknownMapId {}

#[derive(Debug)]
pub enum UpdateError {
    UnknownMapId(MapId),
    Map(WarpedMapError),
}

impl std::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateError::UnknownMapId(id) => write!(f, "unknown map id {}", id.0),
            UpdateError::Map(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for UpdateError {}

#[derive(Debug)]
struct Entry {
    map: WarpedMap,
    visible: bool,
}

#[derive(Debug, Default)]
pub struct WarpedMapList {
    entries: BTreeMap<MapId, Entry>,
    z_order: Vec<MapId>,
    index: SpatialIndex,
}

impl WarpedMapList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a warped map from an annotation and insert it on top of the
    /// stack. Failures surface here and leave the list untouched.
    pub fn add(
        &mut self,
        map_id: MapId,
        annotation: &Annotation,
        projection: &dyn Projection,
        loader: &dyn ImageInfoLoader,
        options: WarpOptions,
        bus: &mut EventBus,
    ) -> Result<&WarpedMap, AddError> {
        if self.entries.contains_key(&map_id) {
            return Err(AddError::DuplicateMapId(map_id));
        }

        let map = WarpedMap::from_annotation(map_id, annotation, projection, loader, options)
            .map_err(AddError::Map)?;
        self.entries.insert(map_id, Entry { map, visible: true });
        self.z_order.push(map_id);
        self.rebuild_index();
        bus.emit(RenderEvent::WarpedMapAdded { map_id });
        debug!(map_id = map_id.0, "map added");
        Ok(&self.entries[&map_id].map)
    }

    pub fn remove(&mut self, map_id: MapId, bus: &mut EventBus) -> Result<WarpedMap, UnknownMapId> {
        let mut entry = self.entries.remove(&map_id).ok_or(UnknownMapId(map_id))?;
        self.z_order.retain(|id| *id != map_id);
        self.rebuild_index();
        entry.map.mark_removed();
        bus.emit(RenderEvent::WarpedMapRemoved { map_id });
        debug!(map_id = map_id.0, "map removed");
        Ok(entry.map)
    }

    pub fn get(&self, map_id: MapId) -> Option<&WarpedMap> {
        self.entries.get(&map_id).map(|e| &e.map)
    }

    pub fn get_mut(&mut self, map_id: MapId) -> Option<&mut WarpedMap> {
        self.entries.get_mut(&map_id).map(|e| &mut e.map)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Back-to-front painting order.
    pub fn painting_order(&self) -> &[MapId] {
        &self.z_order
    }

    pub fn set_z_order(&mut self, map_id: MapId, op: ZOrderOp) -> Result<(), UnknownMapId> {
        let pos = self
            .z_order
            .iter()
            .position(|id| *id == map_id)
            .ok_or(UnknownMapId(map_id))?;
        let last = self.z_order.len() - 1;
        match op {
            ZOrderOp::ToFront => {
                let id = self.z_order.remove(pos);
                self.z_order.push(id);
            }
            ZOrderOp::ToBack => {
                let id = self.z_order.remove(pos);
                self.z_order.insert(0, id);
            }
            ZOrderOp::Forward => {
                if pos < last {
                    self.z_order.swap(pos, pos + 1);
                }
            }
            ZOrderOp::Backward => {
                if pos > 0 {
                    self.z_order.swap(pos, pos - 1);
                }
            }
        }
        Ok(())
    }

    pub fn show(&mut self, map_id: MapId) -> Result<(), UnknownMapId> {
        self.entries
            .get_mut(&map_id)
            .map(|e| e.visible = true)
            .ok_or(UnknownMapId(map_id))
    }

    pub fn hide(&mut self, map_id: MapId) -> Result<(), UnknownMapId> {
        self.entries
            .get_mut(&map_id)
            .map(|e| e.visible = false)
            .ok_or(UnknownMapId(map_id))
    }

    pub fn is_visible(&self, map_id: MapId) -> bool {
        self.entries.get(&map_id).is_some_and(|e| e.visible)
    }

    /// ProjectedGeo bbox over the selected maps, or all maps when `None`.
    pub fn bbox(&self, map_ids: Option<&[MapId]>) -> Option<Bbox> {
        let mut result: Option<Bbox> = None;
        for map in self.select(map_ids) {
            result = Some(match result {
                Some(b) => b.union(&map.projected_bbox),
                None => map.projected_bbox,
            });
        }
        result
    }

    /// ProjectedGeo convex hull over the selected maps.
    pub fn convex_hull(&self, map_ids: Option<&[MapId]>) -> Option<Vec<Point>> {
        let mut points = Vec::new();
        for map in self.select(map_ids) {
            points.extend_from_slice(&map.projected_hull);
        }
        if points.is_empty() {
            return None;
        }
        Some(convex_hull(&points))
    }

    /// Visible maps whose projected bbox intersects `bbox`, in painting
    /// order.
    pub fn maps_intersecting(&self, bbox: &Bbox) -> Vec<MapId> {
        let hits = self.index.query_bbox(bbox);
        self.z_order
            .iter()
            .filter(|id| hits.contains(*id) && self.is_visible(**id))
            .copied()
            .collect()
    }

    pub fn set_resource_mask(
        &mut self,
        map_id: MapId,
        mask: Vec<Point>,
        now: Time,
        bus: &mut EventBus,
    ) -> Result<(), UpdateError> {
        let entry = self
            .entries
            .get_mut(&map_id)
            .ok_or(UpdateError::UnknownMapId(map_id))?;
        entry
            .map
            .set_resource_mask(mask, now)
            .map_err(UpdateError::Map)?;
        self.rebuild_index();
        bus.emit(RenderEvent::ResourceMaskUpdated { map_id });
        Ok(())
    }

    pub fn set_gcps(
        &mut self,
        map_id: MapId,
        gcps: Vec<AnnotationGcp>,
        projection: &dyn Projection,
        now: Time,
        bus: &mut EventBus,
    ) -> Result<(), UpdateError> {
        let entry = self
            .entries
            .get_mut(&map_id)
            .ok_or(UpdateError::UnknownMapId(map_id))?;
        entry
            .map
            .set_gcps(gcps, projection, now)
            .map_err(UpdateError::Map)?;
        self.rebuild_index();
        bus.emit(RenderEvent::GcpsUpdated { map_id });
        Ok(())
    }

    pub fn set_transformation_kind(
        &mut self,
        map_id: MapId,
        kind: TransformationKind,
        now: Time,
        bus: &mut EventBus,
    ) -> Result<(), UpdateError> {
        let entry = self
            .entries
            .get_mut(&map_id)
            .ok_or(UpdateError::UnknownMapId(map_id))?;
        entry
            .map
            .set_transformation_kind(kind, now)
            .map_err(UpdateError::Map)?;
        self.rebuild_index();
        bus.emit(RenderEvent::TransformationChanged { map_id });
        Ok(())
    }

    fn select<'a>(&'a self, map_ids: Option<&'a [MapId]>) -> impl Iterator<Item = &'a WarpedMap> {
        self.entries
            .iter()
            .filter(move |(id, _)| map_ids.is_none_or(|ids| ids.contains(*id)))
            .map(|(_, e)| &e.map)
    }

    fn rebuild_index(&mut self) {
        let items: Vec<Item> = self
            .entries
            .iter()
            .map(|(id, e)| Item {
                map_id: *id,
                bounds: e.map.projected_bbox,
            })
            .collect();
        self.index = SpatialIndex::build(items);
    }
}
