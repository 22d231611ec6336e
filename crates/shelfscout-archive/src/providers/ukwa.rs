use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shelfscout_core::ensure_scheme;
use shelfscout_scraper::RateLimitedGateway;

use super::{from_gateway, quote, ArchiveProvider};
use crate::types::FetchResult;

const NAME: &str = "ukwa";

/// UK Web Archive target lookup.
pub struct Ukwa {
    gateway: Arc<RateLimitedGateway>,
    base: String,
}

impl Ukwa {
    #[must_use]
    pub fn new(gateway: Arc<RateLimitedGateway>, base: &str) -> Self {
        Self {
            gateway,
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ArchiveProvider for Ukwa {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, target: &str, timeout: Duration) -> FetchResult {
        let lookup = format!(
            "{}/ukwa/target/{}",
            self.base,
            quote(&ensure_scheme(target))
        );
        from_gateway(NAME, self.gateway.fetch(&lookup, timeout).await)
    }
}
