use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cache store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid cache URL: {0}")]
    InvalidUrl(String),

    #[error("Event id cannot be used as a cache path: {0:?}")]
    InvalidEventId(String),
}
