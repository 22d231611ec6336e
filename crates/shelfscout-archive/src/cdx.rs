//! CDX snapshot indexes (Wayback Machine and Arquivo.pt).
//!
//! Both speak the pywb CDX dialect. Wayback answers `output=json` with an
//! array of rows whose first row is a header; Arquivo.pt may answer with one
//! JSON object per line instead. [`parse_cdx_rows`] accepts either.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use shelfscout_core::FailureReason;
use shelfscout_scraper::RateLimitedGateway;

use crate::error::ArchiveError;
use crate::providers::quote;

#[async_trait]
pub trait CdxIndex: Send + Sync {
    fn name(&self) -> &'static str;

    /// Timestamps (`YYYYMMDDhhmmss`) of successful captures of exactly `url`
    /// between `year_from` and `year_to`, inclusive.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Index`] when the index cannot be reached and
    /// [`ArchiveError::Deserialize`] when its answer is not CDX JSON.
    async fn query(
        &self,
        url: &str,
        year_from: i32,
        year_to: i32,
    ) -> Result<Vec<String>, ArchiveError>;
}

/// One capture from a CDX answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdxRow {
    pub timestamp: String,
    pub original: String,
}

/// Parses a CDX JSON answer into rows.
///
/// # Errors
///
/// Returns [`ArchiveError::Deserialize`] when the body is neither a JSON
/// array of rows nor newline-delimited JSON objects.
pub fn parse_cdx_rows(context: &str, body: &str) -> Result<Vec<CdxRow>, ArchiveError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let to_err = |source| ArchiveError::Deserialize {
        context: context.to_string(),
        source,
    };

    if trimmed.starts_with('[') {
        let rows: Vec<Vec<Value>> = serde_json::from_str(trimmed).map_err(to_err)?;
        // Row 0 is the field header: urlkey, timestamp, original, ...
        return Ok(rows
            .iter()
            .skip(1)
            .filter_map(|row| {
                let timestamp = row.get(1)?.as_str()?.to_string();
                let original = row
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some(CdxRow {
                    timestamp,
                    original,
                })
            })
            .collect());
    }

    let mut rows = Vec::new();
    for line in trimmed.lines().filter(|l| !l.trim().is_empty()) {
        let object: Value = serde_json::from_str(line).map_err(to_err)?;
        let Some(timestamp) = object.get("timestamp").and_then(Value::as_str) else {
            continue;
        };
        let original = object
            .get("url")
            .or_else(|| object.get("original"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        rows.push(CdxRow {
            timestamp: timestamp.to_string(),
            original: original.to_string(),
        });
    }
    Ok(rows)
}

async fn fetch_rows(
    gateway: &RateLimitedGateway,
    index: &'static str,
    api: &str,
    timeout: Duration,
) -> Result<Vec<CdxRow>, ArchiveError> {
    let response = gateway.fetch(api, timeout).await;
    match response.ok_body() {
        Some(body) => parse_cdx_rows(index, body),
        None => Err(ArchiveError::Index {
            index,
            reason: response
                .meta
                .reason
                .unwrap_or(FailureReason::BudgetExhausted),
        }),
    }
}

pub struct WaybackCdx {
    gateway: Arc<RateLimitedGateway>,
    base: String,
    timeout: Duration,
}

impl WaybackCdx {
    /// `base` is the Wayback web host, e.g. `https://web.archive.org`.
    #[must_use]
    pub fn new(gateway: Arc<RateLimitedGateway>, base: &str, timeout: Duration) -> Self {
        Self {
            gateway,
            base: base.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Captures under `<host>*/<hint>/*`, used to find archived product pages.
    ///
    /// # Errors
    ///
    /// Same as [`CdxIndex::query`].
    pub async fn prefix_query(
        &self,
        host: &str,
        hint: &str,
        limit: usize,
    ) -> Result<Vec<CdxRow>, ArchiveError> {
        let pattern = format!("{host}*/{hint}/*");
        let api = format!(
            "{}/cdx/search/cdx?url={}&output=json&filter=statuscode:200&collapse=digest&limit={limit}",
            self.base,
            quote(&pattern),
        );
        fetch_rows(&self.gateway, "wayback", &api, self.timeout).await
    }
}

#[async_trait]
impl CdxIndex for WaybackCdx {
    fn name(&self) -> &'static str {
        "wayback"
    }

    async fn query(
        &self,
        url: &str,
        year_from: i32,
        year_to: i32,
    ) -> Result<Vec<String>, ArchiveError> {
        let api = format!(
            "{}/cdx/search/cdx?url={}&output=json&filter=statuscode:200&from={year_from}&to={year_to}&collapse=digest",
            self.base,
            quote(url),
        );
        let rows = fetch_rows(&self.gateway, self.name(), &api, self.timeout).await?;
        Ok(rows.into_iter().map(|r| r.timestamp).collect())
    }
}

pub struct ArquivoCdx {
    gateway: Arc<RateLimitedGateway>,
    base: String,
    timeout: Duration,
}

impl ArquivoCdx {
    /// `base` is the Arquivo.pt host, e.g. `https://arquivo.pt`.
    #[must_use]
    pub fn new(gateway: Arc<RateLimitedGateway>, base: &str, timeout: Duration) -> Self {
        Self {
            gateway,
            base: base.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl CdxIndex for ArquivoCdx {
    fn name(&self) -> &'static str {
        "arquivo"
    }

    async fn query(
        &self,
        url: &str,
        year_from: i32,
        year_to: i32,
    ) -> Result<Vec<String>, ArchiveError> {
        let api = format!(
            "{}/wayback/cdx?url={}&output=json&filter=status:200&from={year_from}&to={year_to}",
            self.base,
            quote(url),
        );
        let rows = fetch_rows(&self.gateway, self.name(), &api, self.timeout).await?;
        Ok(rows.into_iter().map(|r| r.timestamp).collect())
    }
}
