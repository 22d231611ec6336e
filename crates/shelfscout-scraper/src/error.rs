use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid gateway settings: {0}")]
    InvalidSettings(String),

    #[error("session {operation} failed: {reason}")]
    Session {
        operation: &'static str,
        reason: String,
    },

    #[error("session does not support {operation}")]
    Unsupported { operation: &'static str },

    #[error("no page loaded")]
    NoPage,
}
