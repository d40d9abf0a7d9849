//! In-process cache backend.
//!
//! Thread-safe maps behind `Arc<Mutex<..>>`; clones share the same data. It
//! also counts calls, which makes it a convenient stand-in for a remote store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::geo::CacheKey;
use crate::models::Event;

use super::{CacheError, CacheStore};

/// Call counters for a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub exists_calls: usize,
    pub reads: usize,
    pub writes: usize,
    pub single_writes: usize,
}

#[derive(Debug, Default)]
struct MemoryInner {
    locations: HashMap<String, Vec<Value>>,
    events: HashMap<String, Value>,
    stats: MemoryStats,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        // The maps stay consistent even if a holder panicked mid-call.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a location with raw records.
    pub fn insert_location(&self, key: &CacheKey, records: Vec<Value>) {
        self.lock().locations.insert(key.to_string(), records);
    }

    /// Raw records stored for a location.
    pub fn location(&self, key: &CacheKey) -> Option<Vec<Value>> {
        self.lock().locations.get(key.as_str()).cloned()
    }

    /// Event stored in the global index.
    pub fn event(&self, id: &str) -> Option<Event> {
        self.lock().events.get(id).and_then(Event::from_cache_record)
    }

    pub fn indexed_event_count(&self) -> usize {
        self.lock().events.len()
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }
}

impl CacheStore for MemoryStore {
    async fn exists(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut inner = self.lock();
        inner.stats.exists_calls += 1;
        Ok(inner.locations.contains_key(key.as_str()))
    }

    async fn read(&self, key: &CacheKey) -> Result<Vec<Value>, CacheError> {
        let mut inner = self.lock();
        inner.stats.reads += 1;
        Ok(inner.locations.get(key.as_str()).cloned().unwrap_or_default())
    }

    async fn write(&self, key: &CacheKey, events: &[Event]) -> Result<(), CacheError> {
        let records = events.iter().map(Event::to_cache_record).collect();
        let mut inner = self.lock();
        inner.stats.writes += 1;
        inner.locations.insert(key.to_string(), records);
        Ok(())
    }

    async fn write_single(&self, event: &Event) -> Result<(), CacheError> {
        let mut inner = self.lock();
        inner.stats.single_writes += 1;
        inner.events.insert(event.id.clone(), event.to_cache_record());
        Ok(())
    }
}
