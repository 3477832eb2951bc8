//! Content-addressed tile cache.
//!
//! Entries are keyed by request URL in a `BTreeMap` for stable traversal
//! order. The cache guarantees at most one concurrent fetch per URL: a
//! request for a URL that is queued, fetching or cached is a no-op, so
//! every caller observes the same entry. Failed and aborted entries may be
//! re-requested.
//!
//! Entry lifecycle:
//!
//! Queued → Fetching → Cached | Failed | Aborted
//!
//! Fetch and decode are injected; `process` is the single suspension point
//! that runs them under a work budget and applies completions. A completion
//! observed after its abort token fired never mutates the entry to
//! `Cached`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use foundation::ids::MapId;
use runtime::event_bus::{EventBus, RenderEvent};
use tiles::Tile;
use tracing::debug;

use crate::queue::{FetchBudget, FetchQueue, FetchQueueFull};

/// Cancellation flag shared between the cache and an in-flight fetch.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    Network { reason: String },
    Decode { reason: String },
    Aborted,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Network { reason } => write!(f, "fetch failed: {reason}"),
            FetchError::Decode { reason } => write!(f, "decode failed: {reason}"),
            FetchError::Aborted => write!(f, "fetch aborted"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Fetches a tile's bytes. Implementations should poll the token and bail
/// out with `FetchError::Aborted` when it fires.
pub trait TileFetcher {
    fn fetch(&self, url: &str, abort: &AbortToken) -> Result<Vec<u8>, FetchError>;
}

/// Decodes fetched bytes into pixels.
pub trait TileDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedTile, FetchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTile {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA, `width · height · 4` bytes.
    pub rgba: Vec<u8>,
}

/// One tile the renderer wants, already resolved to its request URL.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchableTile {
    pub map_id: MapId,
    pub tile: Tile,
    pub url: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TileState {
    Queued,
    Fetching,
    Cached,
    Failed,
    Aborted,
}

#[derive(Debug)]
pub struct CacheableTile {
    pub map_id: MapId,
    pub tile: Tile,
    pub url: String,
    pub state: TileState,
    pub abort: AbortToken,
    /// Present iff `state == Cached`.
    pub data: Option<DecodedTile>,
}

#[derive(Debug, Default)]
pub struct TileCache {
    entries: BTreeMap<String, CacheableTile>,
    queue: FetchQueue,
}

impl TileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            queue: FetchQueue::with_max_len(max_pending),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue fetches for every tile not already present. The list order is
    /// the dispatch priority, so callers submit center-out. Requests beyond
    /// the queue's backpressure limit are dropped (the next render pass
    /// re-requests them).
    pub fn request_fetchable_tiles(&mut self, fetchable: Vec<FetchableTile>) {
        for (rank, wanted) in fetchable.into_iter().enumerate() {
            match self.entries.get(&wanted.url).map(|e| e.state) {
                Some(TileState::Queued) | Some(TileState::Fetching) | Some(TileState::Cached) => {
                    continue; // single flight per URL
                }
                Some(TileState::Failed) | Some(TileState::Aborted) | None => {}
            }

            match self.queue.try_push(rank as u32, wanted.url.clone()) {
                Ok(_) => {
                    self.entries.insert(
                        wanted.url.clone(),
                        CacheableTile {
                            map_id: wanted.map_id,
                            tile: wanted.tile,
                            url: wanted.url,
                            state: TileState::Queued,
                            abort: AbortToken::new(),
                            data: None,
                        },
                    );
                }
                Err(FetchQueueFull { max_len }) => {
                    debug!(max_len, url = wanted.url.as_str(), "fetch queue full, dropping");
                }
            }
        }
    }

    /// Signal cancellation for one URL. Queued entries are unqueued; a
    /// fetch already running sees its token and must not write back.
    pub fn abort(&mut self, url: &str) {
        self.queue.cancel_url(url);
        if let Some(entry) = self.entries.get_mut(url) {
            entry.abort.abort();
            if matches!(entry.state, TileState::Queued | TileState::Fetching) {
                entry.state = TileState::Aborted;
            }
        }
    }

    /// Drop every entry whose URL is outside `keep`, aborting in-flight
    /// fetches first.
    pub fn prune(&mut self, keep: &BTreeSet<String>) {
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|url| !keep.contains(*url))
            .cloned()
            .collect();
        for url in &doomed {
            self.abort(url);
            self.entries.remove(url);
        }
        if !doomed.is_empty() {
            debug!(pruned = doomed.len(), kept = self.entries.len(), "cache pruned");
        }
    }

    /// Drain queued fetches under `budget`: run fetch + decode and apply
    /// completions. Emits `TileFetched`/`TileFetchError` per tile and
    /// `AllRequestedTilesLoaded` when the last outstanding request settles.
    pub fn process(
        &mut self,
        fetcher: &dyn TileFetcher,
        decoder: &dyn TileDecoder,
        budget: &mut FetchBudget,
        bus: &mut EventBus,
    ) -> usize {
        let mut settled = 0;
        while let Some((_, url)) = self.queue.pop_next(budget) {
            let Some(entry) = self.entries.get_mut(&url) else {
                continue;
            };
            if entry.abort.is_aborted() {
                entry.state = TileState::Aborted;
                settled += 1;
                continue;
            }

            entry.state = TileState::Fetching;
            let result = fetcher
                .fetch(&url, &entry.abort)
                .and_then(|bytes| decoder.decode(&bytes));
            settled += 1;

            // An abort that raced the completion wins: the entry must not
            // become Cached afterwards.
            if entry.abort.is_aborted() {
                entry.state = TileState::Aborted;
                bus.emit(RenderEvent::TileFetchError {
                    url: url.clone(),
                    reason: FetchError::Aborted.to_string(),
                });
                continue;
            }

            match result {
                Ok(data) => {
                    entry.data = Some(data);
                    entry.state = TileState::Cached;
                    bus.emit(RenderEvent::TileFetched { url: url.clone() });
                }
                Err(error) => {
                    entry.state = match error {
                        FetchError::Aborted => TileState::Aborted,
                        _ => TileState::Failed,
                    };
                    bus.emit(RenderEvent::TileFetchError {
                        url: url.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        if settled > 0 && self.all_requested_tiles_loaded() {
            bus.emit(RenderEvent::AllRequestedTilesLoaded);
        }
        settled
    }

    /// `true` when no request is queued or in flight.
    pub fn all_requested_tiles_loaded(&self) -> bool {
        self.entries
            .values()
            .all(|e| !matches!(e.state, TileState::Queued | TileState::Fetching))
    }

    pub fn cacheable_tile(&self, url: &str) -> Option<&CacheableTile> {
        self.entries.get(url)
    }

    /// The decoded tile for `url`, when its fetch has succeeded.
    pub fn cached_tile(&self, url: &str) -> Option<&CacheableTile> {
        self.entries
            .get(url)
            .filter(|e| e.state == TileState::Cached)
    }

    pub fn cached_tiles_for_map(&self, map_id: MapId) -> Vec<&CacheableTile> {
        self.entries
            .values()
            .filter(|e| e.map_id == map_id && e.state == TileState::Cached)
            .collect()
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AbortToken, DecodedTile, FetchError, FetchableTile, TileCache, TileDecoder, TileFetcher,
        TileState,
    };
    use crate::queue::FetchBudget;
    use foundation::ids::MapId;
    use runtime::event_bus::{EventBus, RenderEvent};
    use std::cell::RefCell;
    use std::collections::{BTreeMap, BTreeSet};
    use tiles::{Tile, TileZoomLevel};

    fn level() -> TileZoomLevel {
        TileZoomLevel {
            index: 0,
            scale_factor: 1,
            tile_width: 10,
            tile_height: 10,
            columns: 100,
            rows: 1,
            image_width: 1000,
            image_height: 10,
        }
    }

    fn fetchable(n: usize) -> Vec<FetchableTile> {
        (0..n)
            .map(|i| FetchableTile {
                map_id: MapId(1),
                tile: Tile::new(i as u32, 0, level()),
                url: format!("https://tiles.example.org/{i}"),
            })
            .collect()
    }

    /// Counts fetch invocations per URL.
    #[derive(Default)]
    struct CountingFetcher {
        calls: RefCell<BTreeMap<String, usize>>,
        abort_self: bool,
        fail: bool,
    }

    impl TileFetcher for CountingFetcher {
        fn fetch(&self, url: &str, abort: &AbortToken) -> Result<Vec<u8>, FetchError> {
            *self.calls.borrow_mut().entry(url.to_string()).or_insert(0) += 1;
            if self.abort_self {
                abort.abort();
                return Err(FetchError::Aborted);
            }
            if self.fail {
                return Err(FetchError::Network {
                    reason: "boom".to_string(),
                });
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    struct OnePixelDecoder;

    impl TileDecoder for OnePixelDecoder {
        fn decode(&self, _bytes: &[u8]) -> Result<DecodedTile, FetchError> {
            Ok(DecodedTile {
                width: 1,
                height: 1,
                rgba: vec![255, 0, 0, 255],
            })
        }
    }

    #[test]
    fn single_flight_per_url() {
        let mut cache = TileCache::new();
        cache.request_fetchable_tiles(fetchable(3));
        cache.request_fetchable_tiles(fetchable(3)); // same URLs again

        let fetcher = CountingFetcher::default();
        let mut bus = EventBus::new();
        cache.process(
            &fetcher,
            &OnePixelDecoder,
            &mut FetchBudget::unlimited(),
            &mut bus,
        );

        for (_, count) in fetcher.calls.borrow().iter() {
            assert_eq!(*count, 1);
        }
        assert!(cache.cached_tile("https://tiles.example.org/0").is_some());
        assert!(cache.all_requested_tiles_loaded());

        // Every caller observes the same cached entry; a later request for
        // a cached URL stays a no-op.
        cache.request_fetchable_tiles(fetchable(3));
        cache.process(
            &fetcher,
            &OnePixelDecoder,
            &mut FetchBudget::unlimited(),
            &mut bus,
        );
        assert_eq!(fetcher.calls.borrow()["https://tiles.example.org/0"], 1);
    }

    #[test]
    fn fetches_resolve_in_center_out_priority_order() {
        let mut cache = TileCache::new();
        cache.request_fetchable_tiles(fetchable(4));

        let fetcher = CountingFetcher::default();
        let mut bus = EventBus::new();
        cache.process(&fetcher, &OnePixelDecoder, &mut FetchBudget::new(2), &mut bus);

        // Only the first two ranks ran under the budget.
        assert!(cache.cached_tile("https://tiles.example.org/0").is_some());
        assert!(cache.cached_tile("https://tiles.example.org/1").is_some());
        assert!(cache.cached_tile("https://tiles.example.org/2").is_none());
        assert!(!cache.all_requested_tiles_loaded());
    }

    #[test]
    fn prune_aborts_in_flight_and_restricts_to_keep_set() {
        let mut cache = TileCache::new();
        cache.request_fetchable_tiles(fetchable(4));

        let keep: BTreeSet<String> = ["https://tiles.example.org/1".to_string()].into();
        cache.prune(&keep);

        let urls: Vec<&str> = cache.urls().collect();
        assert_eq!(urls, ["https://tiles.example.org/1"]);

        // The pruned queue entries never reach the fetcher.
        let fetcher = CountingFetcher::default();
        let mut bus = EventBus::new();
        cache.process(
            &fetcher,
            &OnePixelDecoder,
            &mut FetchBudget::unlimited(),
            &mut bus,
        );
        assert_eq!(fetcher.calls.borrow().len(), 1);
    }

    #[test]
    fn failure_emits_error_and_allows_re_request() {
        let mut cache = TileCache::new();
        cache.request_fetchable_tiles(fetchable(1));

        let failing = CountingFetcher {
            fail: true,
            ..Default::default()
        };
        let mut bus = EventBus::new();
        cache.process(
            &failing,
            &OnePixelDecoder,
            &mut FetchBudget::unlimited(),
            &mut bus,
        );

        let url = "https://tiles.example.org/0";
        assert!(bus.events().iter().any(|e| matches!(
            e,
            RenderEvent::TileFetchError { url: u, .. } if u == url
        )));
        assert_eq!(cache.cacheable_tile(url).unwrap().state, TileState::Failed);
        assert!(cache.cached_tile(url).is_none());

        // No automatic retry, but the caller may re-request.
        let fetcher = CountingFetcher::default();
        cache.request_fetchable_tiles(fetchable(1));
        cache.process(
            &fetcher,
            &OnePixelDecoder,
            &mut FetchBudget::unlimited(),
            &mut bus,
        );
        assert!(cache.cached_tile(url).is_some());
    }

    #[test]
    fn aborted_fetches_never_cache_and_emit_cancellations() {
        // Twenty requested; the first five start and get aborted in flight.
        let mut cache = TileCache::new();
        cache.request_fetchable_tiles(fetchable(20));

        let aborting = CountingFetcher {
            abort_self: true,
            ..Default::default()
        };
        let mut bus = EventBus::new();
        cache.process(
            &aborting,
            &OnePixelDecoder,
            &mut FetchBudget::new(5),
            &mut bus,
        );

        let cancellations = bus
            .events()
            .iter()
            .filter(|e| matches!(e, RenderEvent::TileFetchError { .. }))
            .count();
        assert_eq!(cancellations, 5);
        assert_eq!(aborting.calls.borrow().len(), 5);

        for i in 0..5 {
            let url = format!("https://tiles.example.org/{i}");
            assert!(cache.cached_tile(&url).is_none());
            assert_eq!(cache.cacheable_tile(&url).unwrap().state, TileState::Aborted);
        }
        // The other fifteen are still queued, untouched.
        assert_eq!(
            cache
                .cacheable_tile("https://tiles.example.org/5")
                .unwrap()
                .state,
            TileState::Queued
        );
    }

    #[test]
    fn all_requested_tiles_loaded_fires_once_everything_settled() {
        let mut cache = TileCache::new();
        cache.request_fetchable_tiles(fetchable(3));

        let fetcher = CountingFetcher::default();
        let mut bus = EventBus::new();
        cache.process(&fetcher, &OnePixelDecoder, &mut FetchBudget::new(2), &mut bus);
        assert!(
            !bus.events()
                .contains(&RenderEvent::AllRequestedTilesLoaded)
        );

        cache.process(&fetcher, &OnePixelDecoder, &mut FetchBudget::new(2), &mut bus);
        assert!(
            bus.events()
                .contains(&RenderEvent::AllRequestedTilesLoaded)
        );
    }
}
