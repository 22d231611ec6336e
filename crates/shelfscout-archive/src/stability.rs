//! Snapshot coverage of a URL across CDX indexes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Datelike;
use futures::future::join_all;
use serde::Serialize;
use shelfscout_core::{clean_url, parent_urls};

use crate::cdx::CdxIndex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSample {
    pub name: String,
    pub hits: usize,
    pub months: usize,
}

/// Coverage of one URL level. Indexes are never blended across levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StabilitySample {
    /// The normalized input URL.
    pub url: String,
    /// Level the counts belong to; `None` when no level had any capture.
    pub level_url: Option<String>,
    pub indexes: Vec<IndexSample>,
    pub months_with_snapshots: usize,
    pub total_hits: usize,
}

impl StabilitySample {
    fn from_level(url: String, level_url: Option<String>, indexes: Vec<IndexSample>) -> Self {
        let months_with_snapshots = indexes.iter().map(|i| i.months).max().unwrap_or(0);
        let total_hits = indexes.iter().map(|i| i.hits).sum();
        Self {
            url,
            level_url,
            indexes,
            months_with_snapshots,
            total_hits,
        }
    }

    #[must_use]
    pub fn hits_for(&self, index: &str) -> usize {
        self.indexes
            .iter()
            .find(|i| i.name == index)
            .map_or(0, |i| i.hits)
    }
}

pub struct StabilitySampler {
    indexes: Vec<Arc<dyn CdxIndex>>,
}

impl StabilitySampler {
    #[must_use]
    pub fn new(indexes: Vec<Arc<dyn CdxIndex>>) -> Self {
        Self { indexes }
    }

    /// Samples `url`, climbing to parent paths while a level has no captures.
    /// An index that errors counts as zero for that level.
    pub async fn sample(&self, url: &str, since_year: i32) -> StabilitySample {
        let cleaned = clean_url(url);
        let until_year = chrono::Utc::now().year().max(since_year);

        for level in parent_urls(&cleaned) {
            let indexes = self.sample_level(&level, since_year, until_year).await;
            if indexes.iter().any(|i| i.hits > 0) {
                tracing::debug!(url = %cleaned, level = %level, "stability level found");
                return StabilitySample::from_level(cleaned, Some(level), indexes);
            }
        }

        let empty = self
            .indexes
            .iter()
            .map(|index| IndexSample {
                name: index.name().to_string(),
                hits: 0,
                months: 0,
            })
            .collect();
        StabilitySample::from_level(cleaned, None, empty)
    }

    async fn sample_level(&self, level: &str, from: i32, to: i32) -> Vec<IndexSample> {
        let queries = self.indexes.iter().map(|index| async move {
            let stamps = match index.query(level, from, to).await {
                Ok(stamps) => stamps,
                Err(e) => {
                    tracing::warn!(index = index.name(), url = level, error = %e, "cdx index failed; counting zero");
                    Vec::new()
                }
            };
            IndexSample {
                name: index.name().to_string(),
                hits: stamps.len(),
                months: distinct_months(&stamps),
            }
        });
        join_all(queries).await
    }
}

/// Unique `YYYY-MM` values among timestamps of at least eight digits.
#[must_use]
pub fn distinct_months(stamps: &[String]) -> usize {
    stamps
        .iter()
        .filter(|ts| ts.len() >= 8)
        .filter_map(|ts| ts.get(..6))
        .collect::<HashSet<_>>()
        .len()
}
