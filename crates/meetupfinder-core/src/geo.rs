//! Geographic cache keys.
//!
//! Nearby coordinates are bucketed by rounding to a fixed number of decimal
//! places, so every location inside one bucket shares a cached result set.
//! Keys look like `N4071_W7401` and only contain `[NSEW0-9_]`, which keeps
//! them safe as path segments in every cache backend.

use std::fmt;

use thiserror::Error;

use crate::models::Coordinate;

/// Default number of decimal places kept when bucketing (~1.1 km at the equator).
pub const DEFAULT_PRECISION: u8 = 2;

/// Highest supported precision. Beyond this the scaled value stops being useful
/// as a bucket and starts tracking GPS noise.
pub const MAX_PRECISION: u8 = 6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoKeyError {
    #[error("Latitude is not a finite number in [-90, 90]: {0}")]
    InvalidLatitude(f64),

    #[error("Longitude is not a finite number in [-180, 180]: {0}")]
    InvalidLongitude(f64),

    #[error("Precision {0} is out of range (max {MAX_PRECISION})")]
    InvalidPrecision(u8),
}

/// Cache identifier derived from a coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives cache keys at a fixed precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoKeyer {
    precision: u8,
}

impl Default for GeoKeyer {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
        }
    }
}

impl GeoKeyer {
    pub fn new(precision: u8) -> Result<Self, GeoKeyError> {
        if precision > MAX_PRECISION {
            return Err(GeoKeyError::InvalidPrecision(precision));
        }
        Ok(Self { precision })
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn derive_key(&self, coord: Coordinate) -> Result<CacheKey, GeoKeyError> {
        derive_key(coord.latitude, coord.longitude, self.precision)
    }
}

/// Derive the cache key for a latitude/longitude pair.
pub fn derive_key(lat: f64, lon: f64, precision: u8) -> Result<CacheKey, GeoKeyError> {
    if precision > MAX_PRECISION {
        return Err(GeoKeyError::InvalidPrecision(precision));
    }
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(GeoKeyError::InvalidLatitude(lat));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(GeoKeyError::InvalidLongitude(lon));
    }

    let scale = 10f64.powi(i32::from(precision));
    let lat_bucket = (lat * scale).round() as i64;
    let lon_bucket = (lon * scale).round() as i64;

    Ok(CacheKey(format!(
        "{}{}_{}{}",
        if lat_bucket < 0 { 'S' } else { 'N' },
        lat_bucket.unsigned_abs(),
        if lon_bucket < 0 { 'W' } else { 'E' },
        lon_bucket.unsigned_abs(),
    )))
}
