//! API client for the Meetup directory API.
//!
//! This module provides the `MeetupClient` struct, which looks up upcoming
//! events around a coordinate and hands back the raw JSON records.

use std::time::Duration;

use reqwest::{header, Client, Url};
use serde_json::Value;
use tracing::debug;

use crate::models::Coordinate;

use super::{ApiError, EventSource};

// ============================================================================
// Constants
// ============================================================================

/// Base URL for the directory API
pub const DEFAULT_BASE_URL: &str = "https://api.meetup.com";

/// Method path for the event search
pub const DEFAULT_FIND_EVENTS_METHOD: &str = "/find/events";

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Let the API pick a radius based on event density around the point.
const SEARCH_RADIUS: &str = "smart";

/// Extra fields requested on every event.
const REQUESTED_FIELDS: &str = "group_category,group_photo,featured_photo";

/// API client for the Meetup directory.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct MeetupClient {
    client: Client,
    api_key: String,
    base_url: String,
    find_events_method: String,
}

impl MeetupClient {
    /// Create a new API client with the default endpoint and timeout
    pub fn new(api_key: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            find_events_method: DEFAULT_FIND_EVENTS_METHOD.to_string(),
        })
    }

    /// Point the client at a different base URL and search method.
    pub fn with_endpoint(
        mut self,
        base_url: impl Into<String>,
        find_events_method: impl Into<String>,
    ) -> Self {
        self.base_url = base_url.into();
        self.find_events_method = find_events_method.into();
        self
    }

    /// Build the search URL for a coordinate.
    pub fn build_url(&self, coord: Coordinate) -> Result<Url, ApiError> {
        let endpoint = format!("{}{}", self.base_url, self.find_events_method);
        Url::parse_with_params(
            &endpoint,
            &[
                ("key", self.api_key.clone()),
                ("sign", "true".to_string()),
                ("photo-host", "public".to_string()),
                ("lon", coord.longitude.to_string()),
                ("radius", SEARCH_RADIUS.to_string()),
                ("fields", REQUESTED_FIELDS.to_string()),
                ("lat", coord.latitude.to_string()),
            ],
        )
        .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", endpoint, e)))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Split a search response into its event records.
    pub fn event_records(body: Value) -> Result<Vec<Value>, ApiError> {
        match body {
            Value::Array(records) => Ok(records),
            other => Err(ApiError::InvalidResponse(format!(
                "Expected an array of events, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl EventSource for MeetupClient {
    async fn fetch(&self, coord: Coordinate) -> Result<Vec<Value>, ApiError> {
        let url = self.build_url(coord)?;
        debug!(%coord, "Requesting nearby events");

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let body: Value = response.json().await?;
        let records = Self::event_records(body)?;

        debug!(%coord, count = records.len(), "Nearby events received");
        Ok(records)
    }
}
