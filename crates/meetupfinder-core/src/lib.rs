//! Core library for meetupfinder.
//!
//! Finds meetup events around a coordinate, keeping one cached result set per
//! geo bucket so repeated lookups nearby skip the directory API.
//!
//! - `geo`: geo cache key derivation
//! - `models`: canonical `Event` and its two source shapes
//! - `api`: `EventSource` port and the Meetup API client
//! - `cache`: `CacheStore` port and its backends
//! - `repository`: the cache-or-fetch orchestrator
//! - `config`, `auth`: settings and API key storage

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod geo;
pub mod models;
pub mod repository;

pub use api::{ApiError, EventSource, MeetupClient};
pub use cache::{CacheError, CacheStore, FileStore, FirebaseStore, MemoryStore};
pub use config::{CacheBackend, Config};
pub use geo::{derive_key, CacheKey, GeoKeyError, GeoKeyer};
pub use models::{Coordinate, Event, EventBuilder, RequiredFields};
pub use repository::{EventRepository, EventSnapshot, RepositoryError, SnapshotOrigin};
