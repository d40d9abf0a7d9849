use std::future::Future;

use serde_json::Value;

use crate::models::Coordinate;

use super::ApiError;

/// Source of raw event listings for a coordinate.
pub trait EventSource {
    /// Fetch the raw event records near `coord`, one JSON object per event.
    fn fetch(&self, coord: Coordinate) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send;
}
