//! Internet Archive: availability API, then the closest snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use shelfscout_core::{ensure_scheme, FailureReason};
use shelfscout_scraper::RateLimitedGateway;

use super::{from_gateway, quote, ArchiveProvider};
use crate::types::FetchResult;

const NAME: &str = "wayback";

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    archived_snapshots: ArchivedSnapshots,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivedSnapshots {
    closest: Option<Snapshot>,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    url: Option<String>,
    #[serde(default = "default_available")]
    available: bool,
}

fn default_available() -> bool {
    true
}

pub struct Wayback {
    gateway: Arc<RateLimitedGateway>,
    api_base: String,
}

impl Wayback {
    #[must_use]
    pub fn new(gateway: Arc<RateLimitedGateway>, api_base: &str) -> Self {
        Self {
            gateway,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ArchiveProvider for Wayback {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, target: &str, timeout: Duration) -> FetchResult {
        let started = Instant::now();
        let target = ensure_scheme(target);
        let api = format!("{}/wayback/available?url={}", self.api_base, quote(&target));

        let response = self.gateway.fetch(&api, timeout).await;
        let Some(body) = response.ok_body() else {
            return FetchResult::failed(
                NAME,
                response.meta.status,
                response
                    .meta
                    .reason
                    .unwrap_or(FailureReason::BudgetExhausted),
            );
        };

        let parsed: AvailabilityResponse = match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(target, error = %e, "wayback availability response did not parse");
                return FetchResult::failed(NAME, response.meta.status, FailureReason::DecodeError);
            }
        };

        let Some(snapshot_url) = parsed
            .archived_snapshots
            .closest
            .filter(|s| s.available)
            .and_then(|s| s.url)
        else {
            return FetchResult::failed(NAME, Some(404), FailureReason::NoSnapshot);
        };

        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return FetchResult::failed(NAME, None, FailureReason::Timeout);
        }
        from_gateway(NAME, self.gateway.fetch(&snapshot_url, remaining).await)
    }
}
