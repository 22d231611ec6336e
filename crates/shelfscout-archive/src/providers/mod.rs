//! Archive provider adapters.
//!
//! Every adapter answers `fetch(target, timeout)` with exactly one
//! [`FetchResult`]; there is no error path. All network access goes through
//! the shared [`RateLimitedGateway`].

mod archive_today;
mod arquivo;
mod ghost;
mod memento;
mod perma;
mod ukwa;
mod wayback;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use shelfscout_core::ProviderName;
use shelfscout_scraper::{GatewayResponse, RateLimitedGateway};

use crate::types::FetchResult;

pub use archive_today::ArchiveToday;
pub use arquivo::Arquivo;
pub use ghost::Ghost;
pub use memento::Memento;
pub use perma::Perma;
pub use ukwa::Ukwa;
pub use wayback::Wayback;

#[async_trait]
pub trait ArchiveProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, target: &str, timeout: Duration) -> FetchResult;
}

/// Base URLs of the public archive services. Overridable so tests can point
/// every adapter at a mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub wayback_api: String,
    pub wayback_web: String,
    pub archive_today: String,
    pub ghost: String,
    pub memento: String,
    pub arquivo: String,
    pub ukwa: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            wayback_api: "https://archive.org".to_string(),
            wayback_web: "https://web.archive.org".to_string(),
            archive_today: "https://archive.today".to_string(),
            ghost: "https://ghostarchive.org".to_string(),
            memento: "https://timetravel.mementoweb.org".to_string(),
            arquivo: "https://arquivo.pt".to_string(),
            ukwa: "https://www.webarchive.org.uk".to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Every service rooted at `base` (one mock server for all of them).
    #[must_use]
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            wayback_api: base.clone(),
            wayback_web: base.clone(),
            archive_today: base.clone(),
            ghost: base.clone(),
            memento: base.clone(),
            arquivo: base.clone(),
            ukwa: base,
        }
    }
}

/// Builds the full adapter set in [`ProviderName::DEFAULT_ORDER`].
#[must_use]
pub fn build_providers(
    gateway: &Arc<RateLimitedGateway>,
    endpoints: &ProviderEndpoints,
    perma_api_key: Option<String>,
) -> Vec<Arc<dyn ArchiveProvider>> {
    ProviderName::DEFAULT_ORDER
        .iter()
        .map(|name| -> Arc<dyn ArchiveProvider> {
            let gw = Arc::clone(gateway);
            match name {
                ProviderName::Wayback => Arc::new(Wayback::new(
                    gw,
                    &endpoints.wayback_api,
                )),
                ProviderName::Ghost => Arc::new(Ghost::new(gw, &endpoints.ghost)),
                ProviderName::Memento => Arc::new(Memento::new(gw, &endpoints.memento)),
                ProviderName::Arquivo => Arc::new(Arquivo::new(gw, &endpoints.arquivo)),
                ProviderName::Ukwa => Arc::new(Ukwa::new(gw, &endpoints.ukwa)),
                ProviderName::ArchiveToday => {
                    Arc::new(ArchiveToday::new(gw, &endpoints.archive_today))
                }
                ProviderName::Perma => Arc::new(Perma::new(perma_api_key.clone())),
            }
        })
        .collect()
}

/// Everything but RFC 3986 unreserved characters, i.e. a fully quoted URL
/// suitable as a path segment or query value.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub(crate) fn quote(raw: &str) -> String {
    utf8_percent_encode(raw, COMPONENT).to_string()
}

/// Converts a gateway response into a provider result.
pub(crate) fn from_gateway(provider: &str, response: GatewayResponse) -> FetchResult {
    let GatewayResponse { body, meta } = response;
    if meta.ok {
        return FetchResult::ok(provider, &meta.url, body.unwrap_or_default());
    }
    let reason = meta
        .reason
        .unwrap_or(shelfscout_core::FailureReason::BudgetExhausted);
    tracing::debug!(provider, url = %meta.url, reason = %reason, "archive provider miss");
    FetchResult::failed(provider, meta.status, reason)
}
