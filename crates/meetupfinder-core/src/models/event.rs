use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// A meetup event in canonical form.
///
/// The serialized form (camelCase keys) is exactly the cache record shape, so
/// `Event::from_cache_record(&serde_json::to_value(&event)?)` gives the event back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    pub description: String,
    pub group_name: String,
    pub category: String,
    pub rsvp_count: u32,
    pub rsvp_limit: u32,
    pub latitude: f64,
    pub longitude: f64,
    /// Start time, epoch milliseconds.
    pub time: f64,
    pub link: String,
    pub group_photo_url: String,
}

/// Fields every source record must carry for an event to be built.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredFields {
    pub id: String,
    pub name: String,
    pub group_name: String,
    pub category: String,
    pub time: f64,
    pub link: String,
}

/// Builds an [`Event`] from its required block, with optional fields layered on.
///
/// Every `with_*` step takes an `Option` and is a no-op on `None`, so a missing
/// optional field never aborts the build.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    pub fn new(required: RequiredFields) -> Self {
        Self {
            event: Event {
                id: required.id,
                name: required.name,
                description: String::new(),
                group_name: required.group_name,
                category: required.category,
                rsvp_count: 0,
                rsvp_limit: 0,
                latitude: 0.0,
                longitude: 0.0,
                time: required.time,
                link: required.link,
                group_photo_url: String::new(),
            },
        }
    }

    /// Set `(rsvp_count, rsvp_limit)`.
    pub fn with_rsvp(mut self, rsvp: Option<(u32, u32)>) -> Self {
        if let Some((count, limit)) = rsvp {
            self.event.rsvp_count = count;
            self.event.rsvp_limit = limit;
        }
        self
    }

    /// Set `(latitude, longitude)` of the venue.
    pub fn with_venue(mut self, venue: Option<(f64, f64)>) -> Self {
        if let Some((lat, lon)) = venue {
            self.event.latitude = lat;
            self.event.longitude = lon;
        }
        self
    }

    pub fn with_group_photo(mut self, url: Option<&str>) -> Self {
        if let Some(url) = url {
            self.event.group_photo_url = url.to_string();
        }
        self
    }

    pub fn with_description(mut self, description: Option<&str>) -> Self {
        if let Some(description) = description {
            self.event.description = description.to_string();
        }
        self
    }

    pub fn build(self) -> Event {
        self.event
    }
}

// ===== Field extraction =====

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    lookup(value, path).and_then(Value::as_str)
}

fn f64_at(value: &Value, path: &[&str]) -> Option<f64> {
    lookup(value, path).and_then(Value::as_f64)
}

fn u32_at(value: &Value, path: &[&str]) -> Option<u32> {
    lookup(value, path)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

fn pair<A, B>(a: Option<A>, b: Option<B>) -> Option<(A, B)> {
    a.zip(b)
}

/// Pull the required block out of a record, naming the first missing field on failure.
fn required_fields(
    value: &Value,
    paths: &RequiredPaths<'_>,
) -> Result<RequiredFields, &'static str> {
    Ok(RequiredFields {
        id: str_at(value, paths.id).ok_or("id")?.to_string(),
        name: str_at(value, paths.name).ok_or("name")?.to_string(),
        group_name: str_at(value, paths.group_name).ok_or("groupName")?.to_string(),
        category: str_at(value, paths.category).ok_or("category")?.to_string(),
        time: f64_at(value, paths.time).ok_or("time")?,
        link: str_at(value, paths.link).ok_or("link")?.to_string(),
    })
}

struct RequiredPaths<'a> {
    id: &'a [&'a str],
    name: &'a [&'a str],
    group_name: &'a [&'a str],
    category: &'a [&'a str],
    time: &'a [&'a str],
    link: &'a [&'a str],
}

const API_PATHS: RequiredPaths<'static> = RequiredPaths {
    id: &["id"],
    name: &["name"],
    group_name: &["group", "name"],
    category: &["group", "category", "name"],
    time: &["time"],
    link: &["link"],
};

const CACHE_PATHS: RequiredPaths<'static> = RequiredPaths {
    id: &["id"],
    name: &["name"],
    group_name: &["groupName"],
    category: &["category"],
    time: &["time"],
    link: &["link"],
};

impl Event {
    /// Parse an event as returned by the directory API.
    ///
    /// Returns `None` (and the caller skips the record) when any required
    /// field is missing or has the wrong type.
    pub fn from_api_record(raw: &Value) -> Option<Self> {
        let required = match required_fields(raw, &API_PATHS) {
            Ok(required) => required,
            Err(field) => {
                debug!(field, "Skipping API event record with missing field");
                return None;
            }
        };

        Some(
            EventBuilder::new(required)
                .with_rsvp(pair(
                    u32_at(raw, &["yes_rsvp_count"]),
                    u32_at(raw, &["rsvp_limit"]),
                ))
                .with_venue(pair(
                    f64_at(raw, &["venue", "lat"]),
                    f64_at(raw, &["venue", "lon"]),
                ))
                .with_group_photo(str_at(raw, &["group", "photo", "photo_link"]))
                .with_description(str_at(raw, &["description"]))
                .build(),
        )
    }

    /// Parse an event previously written to the location cache.
    pub fn from_cache_record(raw: &Value) -> Option<Self> {
        let required = match required_fields(raw, &CACHE_PATHS) {
            Ok(required) => required,
            Err(field) => {
                debug!(field, "Skipping cached event record with missing field");
                return None;
            }
        };

        Some(
            EventBuilder::new(required)
                .with_rsvp(pair(u32_at(raw, &["rsvpCount"]), u32_at(raw, &["rsvpLimit"])))
                .with_venue(pair(f64_at(raw, &["latitude"]), f64_at(raw, &["longitude"])))
                .with_group_photo(str_at(raw, &["groupPhotoUrl"]))
                .with_description(str_at(raw, &["description"]))
                .build(),
        )
    }

    /// Serialize into the cache record shape.
    pub fn to_cache_record(&self) -> Value {
        // Plain strings, integers and finite floats always serialize.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Whether the event still accepts RSVPs and has a known venue.
    pub fn is_open(&self) -> bool {
        self.rsvp_limit != self.rsvp_count && self.has_venue()
    }

    /// A latitude of exactly 0 is the "no venue" sentinel.
    pub fn has_venue(&self) -> bool {
        self.latitude != 0.0
    }

    /// Remaining RSVP capacity. `None` when the event has no limit.
    pub fn spots_left(&self) -> Option<u32> {
        if self.rsvp_limit == 0 {
            None
        } else {
            Some(self.rsvp_limit.saturating_sub(self.rsvp_count))
        }
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.time as i64)
    }

    /// Compact date/time for list output: "Jul 21 18:30"
    pub fn formatted_start(&self) -> String {
        match self.start_time() {
            Some(dt) => dt.format("%b %d %H:%M").to_string(),
            None => "TBD".to_string(),
        }
    }
}
