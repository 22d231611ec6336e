use std::path::PathBuf;

use thiserror::Error;

/// Failures of the on-disk cooldown, policy and run-record stores.
///
/// Callers in the run path log these and carry on with defaults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid site code for storage: {0:?}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("operator unlock failed: {0}")]
    Operator(String),

    #[error("operator did not respond within {0:?}")]
    OperatorTimeout(std::time::Duration),

    #[error(transparent)]
    Store(#[from] StoreError),
}
