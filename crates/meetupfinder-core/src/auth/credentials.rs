use anyhow::{anyhow, Context, Result};
use keyring::Entry;

use crate::config::{API_KEY_ENV, APP_NAME};

/// Keychain account the API key is stored under
const API_KEY_ACCOUNT: &str = "meetup-api-key";

pub struct CredentialStore;

impl CredentialStore {
    fn entry() -> Result<Entry> {
        Entry::new(APP_NAME, API_KEY_ACCOUNT).context("Failed to create keyring entry")
    }

    /// Store the API key in the OS keychain
    pub fn store_api_key(api_key: &str) -> Result<()> {
        Self::entry()?
            .set_password(api_key)
            .context("Failed to store API key in keychain")
    }

    /// Retrieve the API key from the OS keychain
    pub fn get_api_key() -> Result<String> {
        Self::entry()?
            .get_password()
            .context("Failed to retrieve API key from keychain")
    }

    /// Delete the stored API key
    pub fn delete_api_key() -> Result<()> {
        Self::entry()?
            .delete_credential()
            .context("Failed to delete API key from keychain")
    }
}

/// Find the API key: environment first, then the keychain.
pub fn resolve_api_key(env_value: Option<String>) -> Result<String> {
    if let Some(key) = env_value.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
        return Ok(key);
    }
    CredentialStore::get_api_key().map_err(|e| {
        anyhow!(
            "No API key found. Set {} or run `meetupfinder --store-key <key>` ({})",
            API_KEY_ENV,
            e
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key_wins() {
        let key = resolve_api_key(Some("  abc123 \n".to_string())).unwrap();
        assert_eq!(key, "abc123");
    }
}
