//! Local JSON file cache.
//!
//! Each location lives in `cachedEvents/<key>.json` and each indexed event in
//! `events/<id>.json` under the cache directory. Files are wrapped in
//! `CachedData` so the write time is available for display; it is never used
//! to expire anything.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::geo::CacheKey;
use crate::models::Event;

use super::{is_valid_event_id, CacheError, CacheStore, CACHED_EVENTS_COLLECTION, EVENTS_COLLECTION};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Includes clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

pub struct FileStore {
    cache_dir: PathBuf,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(cache_dir.join(CACHED_EVENTS_COLLECTION))?;
        std::fs::create_dir_all(cache_dir.join(EVENTS_COLLECTION))?;
        Ok(Self { cache_dir })
    }

    fn location_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(CACHED_EVENTS_COLLECTION)
            .join(format!("{}.json", key))
    }

    fn event_path(&self, id: &str) -> Result<PathBuf, CacheError> {
        if !is_valid_event_id(id) {
            return Err(CacheError::InvalidEventId(id.to_string()));
        }
        Ok(self
            .cache_dir
            .join(EVENTS_COLLECTION)
            .join(format!("{}.json", id)))
    }

    fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<CachedData<T>>, CacheError> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path)?;
        let cached: CachedData<T> = serde_json::from_str(&contents)?;
        Ok(Some(cached))
    }

    fn save<T: Serialize>(path: &Path, data: &T) -> Result<(), CacheError> {
        let cached = CachedData::new(data);
        let contents = serde_json::to_string_pretty(&cached)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load a single indexed event.
    pub fn load_event(&self, id: &str) -> Result<Option<Event>, CacheError> {
        let path = self.event_path(id)?;
        Ok(Self::load::<Value>(&path)?.and_then(|cached| Event::from_cache_record(&cached.data)))
    }
}

impl CacheStore for FileStore {
    async fn exists(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.location_path(key).exists())
    }

    async fn read(&self, key: &CacheKey) -> Result<Vec<Value>, CacheError> {
        match Self::load::<Vec<Value>>(&self.location_path(key))? {
            Some(cached) => {
                debug!(key = %key, age = %cached.age_display(), "Read cached location");
                Ok(cached.data)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn write(&self, key: &CacheKey, events: &[Event]) -> Result<(), CacheError> {
        let records: Vec<Value> = events.iter().map(Event::to_cache_record).collect();
        Self::save(&self.location_path(key), &records)
    }

    async fn write_single(&self, event: &Event) -> Result<(), CacheError> {
        let path = self.event_path(&event.id)?;
        Self::save(&path, &event.to_cache_record())
    }
}

// ============================================================================
// Tests
// ============================================================================
