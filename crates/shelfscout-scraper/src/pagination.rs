//! Stall detection for listing page walks.
//!
//! A page walk (query-parameter pages, offsets, infinite scroll, "load more"
//! clicks) feeds each batch of item fingerprints to a [`PaginationTracker`]
//! and stops as soon as [`PaginationTracker::should_stop`] says so. Page and
//! round caps are only safety ceilings on top of that.

use std::collections::HashSet;

use shelfscout_core::PageWalk;

#[derive(Debug, Clone)]
pub struct PaginationTracker {
    seen: HashSet<String>,
    stalls: u32,
    min_growth: usize,
    max_stalls: u32,
}

impl Default for PaginationTracker {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl PaginationTracker {
    /// `min_growth` new fingerprints make a batch count as growth;
    /// `max_stalls` consecutive non-growing batches end the walk.
    #[must_use]
    pub fn new(min_growth: usize, max_stalls: u32) -> Self {
        Self {
            seen: HashSet::new(),
            stalls: 0,
            min_growth: min_growth.max(1),
            max_stalls: max_stalls.max(1),
        }
    }

    /// Records a batch. Returns `true` if it grew the seen set by at least
    /// `min_growth`.
    pub fn add_batch<I, S>(&mut self, fingerprints: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for fp in fingerprints {
            if self.seen.insert(fp.into()) {
                added += 1;
            }
        }
        let grew = added >= self.min_growth;
        if grew {
            self.stalls = 0;
        } else {
            self.stalls += 1;
        }
        grew
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stalls >= self.max_stalls
    }

    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn stalls(&self) -> u32 {
        self.stalls
    }
}

/// URL of page `index` (0-based) of a listing.
///
/// Returns `None` when the walk has no page at that index or the base URL
/// does not parse. `Single` and the in-place walks (scroll, load more) only
/// have page 0; they grow that page instead of loading another URL.
#[must_use]
pub fn page_url(walk: &PageWalk, base_url: &str, index: u32) -> Option<String> {
    match walk {
        PageWalk::Single | PageWalk::Scroll { .. } | PageWalk::LoadMore { .. } => {
            (index == 0).then(|| base_url.to_string())
        }
        PageWalk::PageParam { param, start, extra } => {
            with_query(base_url, param, start.saturating_add(index), extra)
        }
        PageWalk::Offset {
            param,
            page_size,
            extra,
        } => with_query(base_url, param, index.saturating_mul(*page_size), extra),
    }
}

fn with_query(base_url: &str, param: &str, value: u32, extra: &[(String, String)]) -> Option<String> {
    let mut url = reqwest::Url::parse(base_url).ok()?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != param && !extra.iter().any(|(ek, _)| ek == k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        for (k, v) in extra {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(param, &value.to_string());
    }
    Some(url.to_string())
}
