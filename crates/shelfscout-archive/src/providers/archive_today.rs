//! archive.today: the newest capture redirect for the target.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shelfscout_core::ensure_scheme;
use shelfscout_scraper::RateLimitedGateway;

use super::{from_gateway, ArchiveProvider};
use crate::types::FetchResult;

const NAME: &str = "archivetoday";

pub struct ArchiveToday {
    gateway: Arc<RateLimitedGateway>,
    base: String,
}

impl ArchiveToday {
    #[must_use]
    pub fn new(gateway: Arc<RateLimitedGateway>, base: &str) -> Self {
        Self {
            gateway,
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ArchiveProvider for ArchiveToday {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, target: &str, timeout: Duration) -> FetchResult {
        // The service takes the raw URL as its path.
        let lookup = format!("{}/{}", self.base, ensure_scheme(target));
        from_gateway(NAME, self.gateway.fetch(&lookup, timeout).await)
    }
}
