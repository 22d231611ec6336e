//! Human-assisted unlock.
//!
//! The controller hands the blocked URL to an [`OperatorUnlock`] and waits
//! for it to report completion, bounded by its own timeout.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{RecoveryError, StoreError};
use crate::persist::{site_file, write_json_atomic};

#[async_trait]
pub trait OperatorUnlock: Send + Sync {
    /// Resolves once the operator has cleared the block for `site`.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Operator`] when the hand-off itself fails.
    async fn unlock(&self, site: &str, url: &str) -> Result<(), RecoveryError>;
}

#[derive(Debug, Serialize)]
struct UnlockRequest<'a> {
    site: &'a str,
    url: &'a str,
    requested_at: chrono::DateTime<chrono::Utc>,
}

/// Signals through files in a shared directory.
///
/// Writes `<dir>/<site>.request.json` naming the blocked URL, then polls for
/// `<dir>/<site>.done`. Both files are removed once the operator is done.
/// The operator works in the same browser profile the automated session
/// uses, so cleared challenges and accepted consent carry over.
#[derive(Debug, Clone)]
pub struct FileSignalUnlock {
    dir: PathBuf,
    poll: Duration,
}

impl FileSignalUnlock {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }
}

#[async_trait]
impl OperatorUnlock for FileSignalUnlock {
    async fn unlock(&self, site: &str, url: &str) -> Result<(), RecoveryError> {
        let request = site_file(&self.dir, site, ".request.json")?;
        let done = site_file(&self.dir, site, ".done")?;

        // A stale done-file from an earlier run must not count.
        let _ = tokio::fs::remove_file(&done).await;
        write_json_atomic(
            &request,
            "unlock request",
            &UnlockRequest {
                site,
                url,
                requested_at: chrono::Utc::now(),
            },
        )
        .await?;
        tracing::info!(site, url, done = %done.display(), "waiting for operator unlock");

        loop {
            match tokio::fs::try_exists(&done).await {
                Ok(true) => break,
                Ok(false) => tokio::time::sleep(self.poll).await,
                Err(source) => {
                    return Err(StoreError::Io { path: done, source }.into());
                }
            }
        }

        let _ = tokio::fs::remove_file(&done).await;
        let _ = tokio::fs::remove_file(&request).await;
        Ok(())
    }
}
