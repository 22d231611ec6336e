use shelfscout_core::FailureReason;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{index} query failed: {reason}")]
    Index {
        index: &'static str,
        reason: FailureReason,
    },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}
