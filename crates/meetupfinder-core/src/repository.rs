//! Nearby-event lookups with a per-location cache in front of the directory API.
//!
//! `EventRepository::fetch_nearby` derives the geo cache key for a coordinate,
//! then either hydrates the result set from the cache store (hit) or fetches it
//! from the event source, indexes every event and caches the set (miss).
//!
//! Lookups are single-flight per repository: a call for the key currently being
//! fetched joins that fetch, a call for another key waits for it to finish and
//! then runs. Results are published as immutable snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::EventSource;
use crate::cache::CacheStore;
use crate::geo::{CacheKey, GeoKeyError, GeoKeyer};
use crate::models::{Coordinate, Event};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("Could not generate cache key from coordinate: {0}")]
    InvalidCoordinate(#[from] GeoKeyError),
}

/// Where the events in a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// Nothing fetched yet.
    Empty,
    /// Hydrated from the location cache.
    Cache,
    /// Fetched from the event source.
    Remote,
    /// The event source failed; these are the previous results.
    Stale,
}

/// Result of one lookup: every event found plus the ones still open.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSnapshot {
    pub key: Option<CacheKey>,
    pub all_events: Vec<Event>,
    pub open_events: Vec<Event>,
    pub origin: SnapshotOrigin,
}

impl EventSnapshot {
    pub fn empty() -> Self {
        Self {
            key: None,
            all_events: Vec::new(),
            open_events: Vec::new(),
            origin: SnapshotOrigin::Empty,
        }
    }

    fn from_events(key: &CacheKey, all_events: Vec<Event>, origin: SnapshotOrigin) -> Self {
        let open_events = all_events.iter().filter(|e| e.is_open()).cloned().collect();
        Self {
            key: Some(key.clone()),
            all_events,
            open_events,
            origin,
        }
    }
}

type CycleFuture = Shared<BoxFuture<'static, Arc<EventSnapshot>>>;

/// The running lookup. Only a weak handle is kept so that dropping every
/// caller drops the lookup too.
struct InFlight {
    id: u64,
    key: CacheKey,
    future: WeakShared<BoxFuture<'static, Arc<EventSnapshot>>>,
}

/// Frees the in-flight slot when a lookup ends, however it ends: completion,
/// cancellation or panic.
struct CycleGuard<S, C> {
    inner: Arc<Inner<S, C>>,
    id: u64,
}

impl<S, C> Drop for CycleGuard<S, C> {
    fn drop(&mut self) {
        self.inner.finish(self.id);
    }
}

enum Claim {
    /// A fetch for the same key is running.
    Join(CycleFuture),
    /// A fetch for another key is running; wait, then try again.
    Wait(CycleFuture),
    /// This call started the fetch.
    Start(CycleFuture),
}

struct Inner<S, C> {
    source: S,
    cache: C,
    keyer: GeoKeyer,
    views: RwLock<Arc<EventSnapshot>>,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

/// Cache-or-fetch orchestrator for nearby events.
///
/// Clone is cheap and clones share state, including the in-flight fetch.
pub struct EventRepository<S, C> {
    inner: Arc<Inner<S, C>>,
}

impl<S, C> Clone for EventRepository<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, C> EventRepository<S, C>
where
    S: EventSource + Send + Sync + 'static,
    C: CacheStore + Send + Sync + 'static,
{
    pub fn new(source: S, cache: C, keyer: GeoKeyer) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                cache,
                keyer,
                views: RwLock::new(Arc::new(EventSnapshot::empty())),
                in_flight: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Latest published results.
    pub fn snapshot(&self) -> Arc<EventSnapshot> {
        self.inner.snapshot()
    }

    pub fn all_events(&self) -> Vec<Event> {
        self.snapshot().all_events.clone()
    }

    pub fn open_events(&self) -> Vec<Event> {
        self.snapshot().open_events.clone()
    }

    pub fn cache(&self) -> &C {
        &self.inner.cache
    }

    /// Look up events near `coord`, from the cache when the location is cached.
    ///
    /// Fails only when no cache key can be derived from `coord`, in which case
    /// no I/O happens. Source and cache failures degrade to empty or previous
    /// results instead.
    pub async fn fetch_nearby(&self, coord: Coordinate) -> Result<Arc<EventSnapshot>, RepositoryError> {
        let key = match self.inner.keyer.derive_key(coord) {
            Ok(key) => key,
            Err(e) => {
                warn!(%coord, error = %e, "Could not generate cache key from coordinate");
                return Err(e.into());
            }
        };

        loop {
            match self.claim(&key, coord) {
                Claim::Join(future) => {
                    debug!(key = %key, "Joining in-flight lookup");
                    return Ok(future.await);
                }
                Claim::Wait(future) => {
                    debug!(key = %key, "Waiting for in-flight lookup of another location");
                    future.await;
                }
                Claim::Start(future) => return Ok(future.await),
            }
        }
    }

    /// Like [`fetch_nearby`](Self::fetch_nearby), calling `on_complete` once the
    /// lookup finishes. `on_complete` is never called for an invalid coordinate.
    pub async fn fetch_nearby_with<F>(
        &self,
        coord: Coordinate,
        on_complete: F,
    ) -> Result<Arc<EventSnapshot>, RepositoryError>
    where
        F: FnOnce(),
    {
        let snapshot = self.fetch_nearby(coord).await?;
        on_complete();
        Ok(snapshot)
    }

    fn claim(&self, key: &CacheKey, coord: Coordinate) -> Claim {
        let mut slot = self.inner.lock_in_flight();
        if let Some(running) = slot.as_ref() {
            if let Some(future) = running.future.upgrade() {
                return if running.key == *key {
                    Claim::Join(future)
                } else {
                    Claim::Wait(future)
                };
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = CycleGuard {
            inner: Arc::clone(&self.inner),
            id,
        };
        let cycle_key = key.clone();
        let future = async move {
            guard.inner.run_cycle(&cycle_key, coord).await
        }
        .boxed()
        .shared();

        let weak = match future.downgrade() {
            Some(weak) => weak,
            // Only fails once the future has completed, and it has not been polled.
            None => return Claim::Start(future),
        };
        *slot = Some(InFlight {
            id,
            key: key.clone(),
            future: weak,
        });
        Claim::Start(future)
    }
}

impl<S, C> Inner<S, C> {
    fn lock_in_flight(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, id: u64) {
        let mut slot = self.lock_in_flight();
        if slot.as_ref().is_some_and(|running| running.id == id) {
            *slot = None;
        }
    }
}

impl<S, C> Inner<S, C>
where
    S: EventSource + Send + Sync + 'static,
    C: CacheStore + Send + Sync + 'static,
{
    fn snapshot(&self) -> Arc<EventSnapshot> {
        Arc::clone(&self.views.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, snapshot: EventSnapshot) -> Arc<EventSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.views.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        snapshot
    }

    async fn run_cycle(&self, key: &CacheKey, coord: Coordinate) -> Arc<EventSnapshot> {
        let cached = match self.cache.exists(key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache check failed, treating as miss");
                false
            }
        };

        if cached {
            self.hydrate(key).await
        } else {
            self.fetch_remote(key, coord).await
        }
    }

    /// Cache hit: rebuild both views from the cached records. A location that
    /// exists but yields nothing usable gives empty views; the source is not
    /// consulted.
    async fn hydrate(&self, key: &CacheKey) -> Arc<EventSnapshot> {
        let records = match self.cache.read(key).await {
            Ok(records) => records,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cached location");
                Vec::new()
            }
        };

        let events: Vec<Event> = records.iter().filter_map(Event::from_cache_record).collect();
        info!(
            key = %key,
            events = events.len(),
            skipped = records.len() - events.len(),
            "Loaded nearby events from cache"
        );

        self.publish(EventSnapshot::from_events(key, events, SnapshotOrigin::Cache))
    }

    /// Cache miss: fetch, index every valid event, then cache the set.
    async fn fetch_remote(&self, key: &CacheKey, coord: Coordinate) -> Arc<EventSnapshot> {
        let records = match self.source.fetch(coord).await {
            Ok(records) => records,
            Err(e) => {
                warn!(key = %key, error = %e, "Event lookup failed, keeping previous results");
                let previous = self.snapshot();
                return Arc::new(EventSnapshot {
                    origin: SnapshotOrigin::Stale,
                    ..(*previous).clone()
                });
            }
        };

        let mut all_events = Vec::with_capacity(records.len());
        for raw in &records {
            let Some(event) = Event::from_api_record(raw) else {
                continue;
            };
            if let Err(e) = self.cache.write_single(&event).await {
                warn!(id = %event.id, error = %e, "Failed to index event");
            }
            all_events.push(event);
        }

        if let Err(e) = self.cache.write(key, &all_events).await {
            warn!(key = %key, error = %e, "Failed to cache location");
        }

        let skipped = records.len() - all_events.len();
        let snapshot = EventSnapshot::from_events(key, all_events, SnapshotOrigin::Remote);
        info!(
            key = %key,
            events = snapshot.all_events.len(),
            open = snapshot.open_events.len(),
            skipped,
            "Fetched nearby events"
        );

        self.publish(snapshot)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::cache::{CacheError, MemoryStats, MemoryStore};
    use futures::FutureExt;
    use serde_json::{json, Value};
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct FakeSource {
        records: Vec<Value>,
        fail: bool,
        yields: usize,
        panic_next: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn returning(records: Vec<Value>) -> Self {
            Self {
                records,
                fail: false,
                yields: 0,
                panic_next: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::returning(Vec::new())
            }
        }

        fn slow(records: Vec<Value>) -> Self {
            Self {
                yields: 5,
                ..Self::returning(records)
            }
        }

        /// Panics on the first fetch, then behaves like `returning`.
        fn panicking_once(records: Vec<Value>) -> Self {
            Self {
                panic_next: AtomicBool::new(true),
                ..Self::returning(records)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl EventSource for FakeSource {
        async fn fetch(&self, _coord: Coordinate) -> Result<Vec<Value>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for _ in 0..self.yields {
                tokio::task::yield_now().await;
            }
            if self.panic_next.swap(false, Ordering::SeqCst) {
                panic!("event source exploded");
            }
            if self.fail {
                return Err(ApiError::ServerError("boom".to_string()));
            }
            Ok(self.records.clone())
        }
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    impl CacheStore for BrokenStore {
        async fn exists(&self, _key: &CacheKey) -> Result<bool, CacheError> {
            Err(CacheError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        }

        async fn read(&self, _key: &CacheKey) -> Result<Vec<Value>, CacheError> {
            Err(CacheError::InvalidUrl("unreachable".to_string()))
        }

        async fn write(&self, _key: &CacheKey, _events: &[Event]) -> Result<(), CacheError> {
            Err(CacheError::InvalidUrl("unreachable".to_string()))
        }

        async fn write_single(&self, event: &Event) -> Result<(), CacheError> {
            Err(CacheError::InvalidEventId(event.id.clone()))
        }
    }

    fn api_event(id: &str, rsvp_count: u32, rsvp_limit: u32, lat: f64) -> Value {
        json!({
            "id": id,
            "name": format!("Event {}", id),
            "time": 1500681600000.0,
            "link": format!("https://www.meetup.com/g/events/{}/", id),
            "yes_rsvp_count": rsvp_count,
            "rsvp_limit": rsvp_limit,
            "venue": { "lat": lat, "lon": -74.0 },
            "group": { "name": "Group", "category": { "name": "Social" } }
        })
    }

    fn three_valid_one_malformed() -> Vec<Value> {
        vec![
            api_event("1", 5, 10, 40.0),
            api_event("2", 10, 10, 40.0),
            json!({ "id": "3", "name": "No group", "time": 1.0, "link": "x" }),
            api_event("4", 0, 20, 0.0),
        ]
    }

    fn nyc() -> Coordinate {
        Coordinate::new(40.7128, -74.006)
    }

    fn ids(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_cache_miss_fetches_indexes_and_caches() {
        let store = MemoryStore::new();
        let repo = EventRepository::new(
            FakeSource::returning(three_valid_one_malformed()),
            store.clone(),
            GeoKeyer::default(),
        );

        let snapshot = repo.fetch_nearby(nyc()).await.unwrap();

        assert_eq!(snapshot.origin, SnapshotOrigin::Remote);
        assert_eq!(ids(&snapshot.all_events), vec!["1", "2", "4"]);
        assert_eq!(ids(&snapshot.open_events), vec!["1"]);
        assert_eq!(repo.all_events().len(), 3);

        let stats = store.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.single_writes, 3);
        assert_eq!(store.indexed_event_count(), 3);

        let key = GeoKeyer::default().derive_key(nyc()).unwrap();
        let cached = store.location(&key).unwrap();
        let cached: Vec<Event> = cached.iter().filter_map(Event::from_cache_record).collect();
        assert_eq!(cached, snapshot.all_events);
    }

    #[tokio::test]
    async fn test_cache_hit_never_calls_source() {
        let store = MemoryStore::new();
        let key = GeoKeyer::default().derive_key(nyc()).unwrap();
        let events: Vec<Event> = three_valid_one_malformed()
            .iter()
            .filter_map(Event::from_api_record)
            .collect();
        let mut records: Vec<Value> = events.iter().map(Event::to_cache_record).collect();
        records.push(json!({ "id": "broken" }));
        store.insert_location(&key, records);

        let repo = EventRepository::new(
            FakeSource::returning(three_valid_one_malformed()),
            store.clone(),
            GeoKeyer::default(),
        );
        let snapshot = repo.fetch_nearby(nyc()).await.unwrap();

        assert_eq!(repo.inner.source.calls(), 0);
        assert_eq!(snapshot.origin, SnapshotOrigin::Cache);
        assert_eq!(snapshot.all_events, events);
        assert_eq!(ids(&snapshot.open_events), vec!["1"]);
        assert_eq!(store.stats().single_writes, 0);
        assert_eq!(store.stats().writes, 0);
    }

    #[tokio::test]
    async fn test_second_lookup_in_same_bucket_hits_cache() {
        let repo = EventRepository::new(
            FakeSource::returning(three_valid_one_malformed()),
            MemoryStore::new(),
            GeoKeyer::default(),
        );

        let first = repo.fetch_nearby(nyc()).await.unwrap();
        let second = repo.fetch_nearby(Coordinate::new(40.7149, -74.0051)).await.unwrap();

        assert_eq!(repo.inner.source.calls(), 1);
        assert_eq!(second.origin, SnapshotOrigin::Cache);
        assert_eq!(second.all_events, first.all_events);
        assert_eq!(second.open_events, first.open_events);
    }

    #[tokio::test]
    async fn test_cache_hit_with_unusable_records_gives_empty_views() {
        let store = MemoryStore::new();
        let key = GeoKeyer::default().derive_key(nyc()).unwrap();
        store.insert_location(&key, vec![json!({ "name": "no id" })]);

        let repo = EventRepository::new(
            FakeSource::returning(three_valid_one_malformed()),
            store,
            GeoKeyer::default(),
        );
        let mut completed = 0;
        let snapshot = repo.fetch_nearby_with(nyc(), || completed += 1).await.unwrap();

        assert_eq!(completed, 1);
        assert!(snapshot.all_events.is_empty());
        assert!(snapshot.open_events.is_empty());
        assert_eq!(repo.inner.source.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_coordinate_skips_io_and_completion() {
        let store = MemoryStore::new();
        let repo = EventRepository::new(
            FakeSource::returning(three_valid_one_malformed()),
            store.clone(),
            GeoKeyer::default(),
        );

        let mut completed = false;
        let result = repo
            .fetch_nearby_with(Coordinate::new(f64::NAN, 10.0), || completed = true)
            .await;

        assert!(matches!(result, Err(RepositoryError::InvalidCoordinate(_))));
        assert!(!completed);
        assert_eq!(repo.inner.source.calls(), 0);
        assert_eq!(store.stats(), MemoryStats::default());
        assert_eq!(repo.snapshot().origin, SnapshotOrigin::Empty);
    }

    #[tokio::test]
    async fn test_source_failure_still_completes() {
        let repo = EventRepository::new(FakeSource::failing(), MemoryStore::new(), GeoKeyer::default());
        let mut completed = false;
        let snapshot = repo.fetch_nearby_with(nyc(), || completed = true).await.unwrap();

        assert!(completed);
        assert_eq!(snapshot.origin, SnapshotOrigin::Stale);
        assert!(snapshot.all_events.is_empty());
        assert_eq!(repo.cache().stats().writes, 0);
        assert_eq!(repo.snapshot().origin, SnapshotOrigin::Empty);
    }

    #[tokio::test]
    async fn test_source_failure_after_success_returns_previous_events() {
        let store = MemoryStore::new();
        let key = GeoKeyer::default().derive_key(nyc()).unwrap();
        let events: Vec<Event> = three_valid_one_malformed()
            .iter()
            .filter_map(Event::from_api_record)
            .collect();
        store.insert_location(&key, events.iter().map(Event::to_cache_record).collect());

        let repo = EventRepository::new(FakeSource::failing(), store, GeoKeyer::default());
        repo.fetch_nearby(nyc()).await.unwrap();

        let elsewhere = repo.fetch_nearby(Coordinate::new(51.5074, -0.1278)).await.unwrap();
        assert_eq!(elsewhere.origin, SnapshotOrigin::Stale);
        assert_eq!(elsewhere.all_events, events);
        assert_eq!(repo.snapshot().origin, SnapshotOrigin::Cache);
    }

    #[tokio::test]
    async fn test_empty_result_replaces_views_and_caches_empty_set() {
        let repo = EventRepository::new(
            FakeSource::returning(Vec::new()),
            MemoryStore::new(),
            GeoKeyer::default(),
        );
        let snapshot = repo.fetch_nearby(nyc()).await.unwrap();

        assert_eq!(snapshot.origin, SnapshotOrigin::Remote);
        assert!(snapshot.all_events.is_empty());
        assert_eq!(repo.cache().stats().writes, 1);
    }

    #[tokio::test]
    async fn test_cache_failures_are_not_surfaced() {
        let repo = EventRepository::new(
            FakeSource::returning(three_valid_one_malformed()),
            BrokenStore,
            GeoKeyer::default(),
        );

        let snapshot = repo.fetch_nearby(nyc()).await.unwrap();

        assert_eq!(repo.inner.source.calls(), 1);
        assert_eq!(snapshot.origin, SnapshotOrigin::Remote);
        assert_eq!(snapshot.all_events.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_for_same_key_share_one_fetch() {
        let repo = EventRepository::new(
            FakeSource::slow(three_valid_one_malformed()),
            MemoryStore::new(),
            GeoKeyer::default(),
        );

        let (a, b) = tokio::join!(
            repo.fetch_nearby(nyc()),
            repo.fetch_nearby(Coordinate::new(40.7149, -74.0051)),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(repo.inner.source.calls(), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(repo.cache().stats().writes, 1);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_for_different_keys_are_queued() {
        let repo = EventRepository::new(
            FakeSource::slow(three_valid_one_malformed()),
            MemoryStore::new(),
            GeoKeyer::default(),
        );
        let london = Coordinate::new(51.5074, -0.1278);

        let (a, b) = tokio::join!(repo.fetch_nearby(nyc()), repo.fetch_nearby(london));
        let (a, b) = (a.unwrap(), b.unwrap());

        let london_key = GeoKeyer::default().derive_key(london).unwrap();
        assert_eq!(repo.inner.source.calls(), 2);
        assert_eq!(repo.cache().stats().writes, 2);
        assert_ne!(a.key, b.key);
        assert_eq!(repo.snapshot().key, Some(london_key));
    }

    #[tokio::test]
    async fn test_cancelled_lookup_frees_repository() {
        let repo = EventRepository::new(
            FakeSource::slow(three_valid_one_malformed()),
            MemoryStore::new(),
            GeoKeyer::default(),
        );
        let inner = Arc::downgrade(&repo.inner);

        assert!(repo.fetch_nearby(nyc()).now_or_never().is_none());
        drop(repo);

        assert!(inner.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_lookup_after_cancellation_starts_fresh_fetch() {
        let repo = EventRepository::new(
            FakeSource::slow(three_valid_one_malformed()),
            MemoryStore::new(),
            GeoKeyer::default(),
        );

        assert!(repo.fetch_nearby(nyc()).now_or_never().is_none());
        assert!(repo.inner.lock_in_flight().is_none());

        let snapshot = repo.fetch_nearby(nyc()).await.unwrap();
        assert_eq!(repo.inner.source.calls(), 2);
        assert_eq!(snapshot.origin, SnapshotOrigin::Remote);
        assert_eq!(snapshot.all_events.len(), 3);
    }

    #[tokio::test]
    async fn test_panicked_lookup_does_not_block_later_lookups() {
        let repo = EventRepository::new(
            FakeSource::panicking_once(three_valid_one_malformed()),
            MemoryStore::new(),
            GeoKeyer::default(),
        );

        let crashed = AssertUnwindSafe(repo.fetch_nearby(nyc())).catch_unwind().await;
        assert!(crashed.is_err());
        assert!(repo.inner.lock_in_flight().is_none());

        let london = repo.fetch_nearby(Coordinate::new(51.5074, -0.1278)).await.unwrap();
        assert_eq!(london.origin, SnapshotOrigin::Remote);

        let retried = repo.fetch_nearby(nyc()).await.unwrap();
        assert_eq!(retried.origin, SnapshotOrigin::Remote);
        assert_eq!(repo.inner.source.calls(), 3);
    }
}
