//! Application configuration management.
//!
//! This module handles loading the application configuration:
//! API endpoint, cache backend selection, geo key precision and logging.
//!
//! Configuration is stored at `~/.config/meetupfinder/config.json`. A few
//! settings can be overridden from the environment (see [`Config::apply_env`]).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::{DEFAULT_BASE_URL, DEFAULT_FIND_EVENTS_METHOD, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::geo::DEFAULT_PRECISION;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "meetupfinder";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable holding the directory API key
pub const API_KEY_ENV: &str = "MEETUP_API_KEY";

const FIREBASE_URL_ENV: &str = "MEETUPFINDER_FIREBASE_URL";
const CACHE_BACKEND_ENV: &str = "MEETUPFINDER_CACHE_BACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Firebase,
    #[default]
    File,
    Memory,
}

impl std::str::FromStr for CacheBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firebase" => Ok(CacheBackend::Firebase),
            "file" => Ok(CacheBackend::File),
            "memory" => Ok(CacheBackend::Memory),
            other => bail!("Unknown cache backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub find_events_method: String,
    pub cache_backend: CacheBackend,
    pub firebase_url: Option<String>,
    pub firebase_auth: Option<String>,
    pub key_precision: u8,
    pub request_timeout_secs: u64,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            find_events_method: DEFAULT_FIND_EVENTS_METHOD.to_string(),
            cache_backend: CacheBackend::default(),
            firebase_url: None,
            firebase_auth: None,
            key_precision: DEFAULT_PRECISION,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_dir: None,
        }
    }
}

impl Config {
    /// Load the config file (defaults when absent), then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_json(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse config file")
    }

    /// Override settings from `MEETUPFINDER_FIREBASE_URL` and
    /// `MEETUPFINDER_CACHE_BACKEND`. Setting a Firebase URL without choosing
    /// a backend selects Firebase.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var(FIREBASE_URL_ENV).filter(|v| !v.is_empty()) {
            self.firebase_url = Some(url);
            self.cache_backend = CacheBackend::Firebase;
        }
        if let Some(backend) = var(CACHE_BACKEND_ENV).filter(|v| !v.is_empty()) {
            self.cache_backend = backend
                .parse()
                .with_context(|| format!("Invalid {}", CACHE_BACKEND_ENV))?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
