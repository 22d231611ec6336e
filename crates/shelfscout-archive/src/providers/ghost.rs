use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shelfscout_core::{host_of, FailureReason};
use shelfscout_scraper::RateLimitedGateway;

use super::{from_gateway, quote, ArchiveProvider};
use crate::types::FetchResult;

const NAME: &str = "ghost";

/// ghostarchive.org host search.
pub struct Ghost {
    gateway: Arc<RateLimitedGateway>,
    base: String,
}

impl Ghost {
    #[must_use]
    pub fn new(gateway: Arc<RateLimitedGateway>, base: &str) -> Self {
        Self {
            gateway,
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ArchiveProvider for Ghost {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, target: &str, timeout: Duration) -> FetchResult {
        let Some(host) = host_of(target) else {
            return FetchResult::failed(NAME, None, FailureReason::DecodeError);
        };
        let search = format!("{}/search?term={}", self.base, quote(&host));
        from_gateway(NAME, self.gateway.fetch(&search, timeout).await)
    }
}
