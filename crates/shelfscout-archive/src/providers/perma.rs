//! Perma.cc placeholder.
//!
//! Creating a Perma link needs an authenticated POST and a paid account, so
//! the adapter only reports why it cannot help.

use std::time::Duration;

use async_trait::async_trait;
use shelfscout_core::FailureReason;

use super::ArchiveProvider;
use crate::types::FetchResult;

const NAME: &str = "perma";

pub struct Perma {
    api_key: Option<String>,
}

impl Perma {
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }
}

#[async_trait]
impl ArchiveProvider for Perma {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, _target: &str, _timeout: Duration) -> FetchResult {
        let reason = if self.api_key.is_some() {
            FailureReason::NotImplemented
        } else {
            FailureReason::NotConfigured
        };
        FetchResult::failed(NAME, None, reason)
    }
}
