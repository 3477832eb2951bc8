use foundation::ids::MapId;

/// Everything observable about the engine, as a stable event enum.
///
/// Components record onto the bus instead of inheriting an event-target
/// base; observers read or drain between frames.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    WarpedMapAdded { map_id: MapId },
    WarpedMapRemoved { map_id: MapId },
    ResourceMaskUpdated { map_id: MapId },
    GcpsUpdated { map_id: MapId },
    TransformationChanged { map_id: MapId },
    TileFetched { url: String },
    TileFetchError { url: String, reason: String },
    AllRequestedTilesLoaded,
    TexturesUpdated { map_id: MapId },
}

#[derive(Debug, Default)]
pub struct EventBus {
    events: Vec<RenderEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: RenderEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[RenderEvent] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<RenderEvent> {
        std::mem::take(&mut self.events)
    }
}
