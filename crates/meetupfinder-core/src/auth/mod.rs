//! API key storage.
//!
//! The directory API key comes from the `MEETUP_API_KEY` environment variable
//! (a `.env` file works too) or, failing that, from the OS keychain via
//! `CredentialStore`.

pub mod credentials;

pub use credentials::{resolve_api_key, CredentialStore};
