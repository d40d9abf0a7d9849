//! Location cache module.
//!
//! This module provides the `CacheStore` port and its backends. A store keeps
//! two collections:
//!
//! - `cachedEvents/<geo key>`: the event records found around one location
//! - `events/<event id>`: every event ever fetched from the directory API
//!
//! A cached location never expires; its presence alone means it is valid.
//!
//! Backends:
//! - `FirebaseStore`: Firebase Realtime Database over its REST API
//! - `FileStore`: JSON files in a local cache directory
//! - `MemoryStore`: in-process maps

pub mod error;
pub mod file;
pub mod firebase;
pub mod memory;

use std::future::Future;

use serde_json::Value;

use crate::geo::CacheKey;
use crate::models::Event;

pub use error::CacheError;
pub use file::{CachedData, FileStore};
pub use firebase::FirebaseStore;
pub use memory::{MemoryStats, MemoryStore};

/// Collection holding one record list per geo key.
pub const CACHED_EVENTS_COLLECTION: &str = "cachedEvents";

/// Collection holding every event seen on a cache miss, keyed by id.
pub const EVENTS_COLLECTION: &str = "events";

/// Storage for per-location event lists and the global event index.
pub trait CacheStore {
    /// Whether a result set is cached under `key`. Does not read the payload.
    fn exists(&self, key: &CacheKey) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Raw cache records stored under `key`, empty when nothing is stored.
    fn read(&self, key: &CacheKey) -> impl Future<Output = Result<Vec<Value>, CacheError>> + Send;

    /// Replace the result set stored under `key`.
    fn write(
        &self,
        key: &CacheKey,
        events: &[Event],
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Store one event in the global event index.
    fn write_single(&self, event: &Event) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Whether an event id can be used as a single path segment / file name.
///
/// Rejects the characters Firebase forbids in keys plus path separators.
pub(crate) fn is_valid_event_id(id: &str) -> bool {
    !id.is_empty()
        && !id
            .chars()
            .any(|c| matches!(c, '.' | '$' | '#' | '[' | ']' | '/' | '\\') || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_event_id() {
        assert!(is_valid_event_id("243156290"));
        assert!(is_valid_event_id("qxbkdlywkbwb"));
        assert!(is_valid_event_id("event-1_a"));

        assert!(!is_valid_event_id(""));
        assert!(!is_valid_event_id(".."));
        assert!(!is_valid_event_id("a/b"));
        assert!(!is_valid_event_id("a.b"));
        assert!(!is_valid_event_id("a#b"));
        assert!(!is_valid_event_id("a\nb"));
    }
}
