/// Stable integer key for a warped map.
///
/// The map list is the single owner of map state; every other component
/// (cache, renderer, spatial index) refers to maps through this id, which
/// avoids reference cycles between them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapId(pub u64);

impl MapId {
    pub fn new(n: u64) -> Self {
        MapId(n)
    }
}
