//! Product-page rescue from Wayback captures.
//!
//! When a listing yields too little, archived product detail pages under the
//! site's usual product paths are looked up through the CDX prefix API and
//! run through the extractor. Everything found is tagged stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shelfscout_core::{host_of, Item, ItemOrigin};
use shelfscout_scraper::{Extractor, RateLimitedGateway};
use tokio_util::sync::CancellationToken;

use crate::cdx::{CdxRow, WaybackCdx};

#[derive(Debug, Clone)]
pub struct RescueConfig {
    /// Path segments that usually hold product pages.
    pub path_hints: Vec<String>,
    pub max_items: usize,
    /// Pause between requests, drawn uniformly from this range.
    pub jitter: (Duration, Duration),
    pub timeout: Duration,
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self {
            path_hints: ["producten", "product", "p"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_items: 20,
            jitter: (Duration::from_millis(150), Duration::from_millis(300)),
            timeout: Duration::from_secs(20),
        }
    }
}

pub struct PdpRescue {
    gateway: Arc<RateLimitedGateway>,
    cdx: WaybackCdx,
    web_base: String,
    config: RescueConfig,
}

impl PdpRescue {
    /// `web_base` is the Wayback web host serving both CDX and replays.
    #[must_use]
    pub fn new(gateway: Arc<RateLimitedGateway>, web_base: &str, config: RescueConfig) -> Self {
        let web_base = web_base.trim_end_matches('/').to_string();
        Self {
            cdx: WaybackCdx::new(Arc::clone(&gateway), &web_base, config.timeout),
            gateway,
            web_base,
            config,
        }
    }

    /// Archived product items for the site behind `category_url`.
    ///
    /// Failures of single lookups or snapshots are skipped; the result may be
    /// empty but never errors.
    pub async fn rescue(
        &self,
        category_url: &str,
        extractor: &dyn Extractor,
        cancel: &CancellationToken,
    ) -> Vec<Item> {
        let Some(host) = host_of(category_url) else {
            return Vec::new();
        };
        let captures = self.newest_captures(&host, cancel).await;
        tracing::debug!(host = %host, captures = captures.len(), "rescue candidates");

        let mut items = Vec::new();
        for capture in captures {
            if cancel.is_cancelled() || items.len() >= self.config.max_items {
                break;
            }
            let snapshot = format!("{}/web/{}/{}", self.web_base, capture.timestamp, capture.original);
            let response = self.gateway.fetch(&snapshot, self.config.timeout).await;
            let Some(body) = response.ok_body() else {
                tracing::debug!(url = %snapshot, reason = ?response.meta.reason, "rescue snapshot unavailable");
                continue;
            };

            // A product page describes one product; related-product blocks follow it.
            if let Some(mut item) = extractor.extract(body, &capture.original).into_iter().next() {
                item.source_url.clone_from(&capture.original);
                item.origin = ItemOrigin::Rescue;
                item.stale = true;
                items.push(item);
            }
            self.pause().await;
        }

        tracing::info!(host = %host, items = items.len(), "archive rescue finished");
        items
    }

    /// Newest capture per original URL across all path hints, newest first.
    async fn newest_captures(&self, host: &str, cancel: &CancellationToken) -> Vec<CdxRow> {
        let wanted = self.config.max_items * 2;
        let mut rows: Vec<CdxRow> = Vec::new();

        for (index, hint) in self.config.path_hints.iter().enumerate() {
            if cancel.is_cancelled() || rows.len() >= wanted {
                break;
            }
            if index > 0 {
                self.pause().await;
            }
            match self.cdx.prefix_query(host, hint, self.config.max_items * 4).await {
                Ok(found) => rows.extend(found.into_iter().filter(|r| !r.original.is_empty())),
                Err(e) => tracing::warn!(host, hint = %hint, error = %e, "rescue cdx lookup failed"),
            }
        }
        rows.truncate(wanted);

        let mut newest: HashMap<String, CdxRow> = HashMap::new();
        for row in rows {
            match newest.get(&row.original) {
                Some(existing) if existing.timestamp >= row.timestamp => {}
                _ => {
                    newest.insert(row.original.clone(), row);
                }
            }
        }
        let mut captures: Vec<CdxRow> = newest.into_values().collect();
        captures.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.original.cmp(&b.original))
        });
        captures.truncate(self.config.max_items);
        captures
    }

    async fn pause(&self) {
        let (low, high) = self.config.jitter;
        if high.is_zero() {
            return;
        }
        let spread = high.saturating_sub(low);
        let wait = low + spread.mul_f64(rand::random::<f64>());
        tokio::time::sleep(wait).await;
    }
}
