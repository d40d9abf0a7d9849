//! Firebase Realtime Database backend.
//!
//! Talks to the database's REST API: every node is addressable as
//! `<database url>/<path>.json`, `GET` reads it (a missing node reads as
//! `null`) and `PUT` replaces it.

use std::cmp::Ordering;
use std::time::Duration;

use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::geo::CacheKey;
use crate::models::Event;

use super::{is_valid_event_id, CacheError, CacheStore, CACHED_EVENTS_COLLECTION, EVENTS_COLLECTION};

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct FirebaseStore {
    client: Client,
    database_url: Url,
    auth: Option<String>,
}

impl FirebaseStore {
    /// Create a store for the database at `database_url`
    /// (e.g. `https://my-project.firebaseio.com`). `timeout` bounds each request.
    pub fn new(database_url: &str, auth: Option<String>, timeout: Duration) -> Result<Self, CacheError> {
        let database_url = Url::parse(database_url)
            .map_err(|e| CacheError::InvalidUrl(format!("{}: {}", database_url, e)))?;
        if database_url.cannot_be_a_base() {
            return Err(CacheError::InvalidUrl(database_url.to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            database_url,
            auth,
        })
    }

    /// REST URL of the node at `collection/name`.
    pub fn node_url(&self, collection: &str, name: &str, shallow: bool) -> Result<Url, CacheError> {
        let mut url = self.database_url.clone();
        url.path_segments_mut()
            .map_err(|_| CacheError::InvalidUrl(self.database_url.to_string()))?
            .pop_if_empty()
            .push(collection)
            .push(&format!("{}.json", name));

        {
            let mut query = url.query_pairs_mut();
            query.clear();
            if let Some(ref auth) = self.auth {
                query.append_pair("auth", auth);
            }
            if shallow {
                query.append_pair("shallow", "true");
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url)
    }

    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, CacheError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY_LENGTH {
                let cut = (0..=MAX_ERROR_BODY_LENGTH)
                    .rev()
                    .find(|&i| body.is_char_boundary(i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            Err(CacheError::Status { status, body })
        }
    }

    async fn get(&self, url: Url) -> Result<Value, CacheError> {
        let response = self.client.get(url).send().await?;
        let response = Self::check_response(response).await?;
        Ok(response.json().await?)
    }

    async fn put<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<(), CacheError> {
        let response = self.client.put(url).json(body).send().await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Flatten a node's value into its records.
    ///
    /// Lists written with `PUT` come back as arrays, but the database may also
    /// return them as objects keyed by index; both are accepted. Object
    /// entries come back in index order, with any non-numeric keys last.
    pub fn node_records(node: Value) -> Vec<Value> {
        match node {
            Value::Array(records) => records.into_iter().filter(|r| !r.is_null()).collect(),
            Value::Object(map) => {
                let mut entries: Vec<(String, Value)> = map.into_iter().collect();
                entries.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
                    (Ok(a), Ok(b)) => a.cmp(&b),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => a.cmp(b),
                });
                entries
                    .into_iter()
                    .map(|(_, record)| record)
                    .filter(|r| !r.is_null())
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

impl CacheStore for FirebaseStore {
    async fn exists(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let url = self.node_url(CACHED_EVENTS_COLLECTION, key.as_str(), true)?;
        let node = self.get(url).await?;
        Ok(!node.is_null())
    }

    async fn read(&self, key: &CacheKey) -> Result<Vec<Value>, CacheError> {
        let url = self.node_url(CACHED_EVENTS_COLLECTION, key.as_str(), false)?;
        let records = Self::node_records(self.get(url).await?);
        debug!(key = %key, count = records.len(), "Read cached location");
        Ok(records)
    }

    async fn write(&self, key: &CacheKey, events: &[Event]) -> Result<(), CacheError> {
        let url = self.node_url(CACHED_EVENTS_COLLECTION, key.as_str(), false)?;
        let records: Vec<Value> = events.iter().map(Event::to_cache_record).collect();
        self.put(url, &records).await
    }

    async fn write_single(&self, event: &Event) -> Result<(), CacheError> {
        if !is_valid_event_id(&event.id) {
            return Err(CacheError::InvalidEventId(event.id.clone()));
        }
        let url = self.node_url(EVENTS_COLLECTION, &event.id, false)?;
        self.put(url, &event.to_cache_record()).await
    }
}
