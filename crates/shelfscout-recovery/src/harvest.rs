//! One site, end to end: recover a usable listing, walk its pages, rescue
//! product pages from the archive when the listing is thin, fall back to the
//! last good listing, dedupe once and let the selector policy score the
//! strategies.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shelfscout_archive::PdpRescue;
use shelfscout_core::{dedupe, Item, ItemOrigin, PageWalk, SiteProfile};
use shelfscout_scraper::{page_url, Extractor, FrameScope, PaginationTracker, Session};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::controller::{ContentSource, RecoveryController, RecoveryOutcome, RunMode, RunReason};
use crate::selector_policy::{EvalMetrics, Explanation, Round, SelectorCandidate, SelectorPolicy};
use crate::snapshot::{ListingSnapshot, SnapshotStore};

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    /// Fewer recovered items than this triggers the archive rescue and the
    /// snapshot fallback; at least this many on a live run refreshes the
    /// snapshot.
    pub rescue_below: usize,
    pub min_growth: usize,
    pub max_stalls: u32,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            rescue_below: 5,
            min_growth: 1,
            max_stalls: 1,
        }
    }
}

/// Why the page walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkStop {
    /// Content was not a clean live listing; nothing to walk.
    NotWalked,
    SinglePage,
    Stalled,
    PageCeiling,
    NoMorePages,
    PageFailed,
    BudgetExhausted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemCounts {
    pub live: usize,
    pub archive: usize,
    pub rescue: usize,
    pub snapshot: usize,
    pub unique: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Harvest {
    pub outcome: RecoveryOutcome,
    pub extractor: String,
    pub pages: usize,
    pub walk_stop: WalkStop,
    pub counts: ItemCounts,
    pub items: Vec<Item>,
    pub selector: Option<Explanation>,
    pub snapshot_saved: bool,
}

pub struct Harvester {
    controller: Arc<RecoveryController>,
    baseline: Arc<dyn Extractor>,
    challengers: Vec<Arc<dyn Extractor>>,
    rescue: Option<Arc<PdpRescue>>,
    policy: Option<Arc<SelectorPolicy>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    settings: HarvestSettings,
}

impl Harvester {
    #[must_use]
    pub fn new(controller: Arc<RecoveryController>, baseline: Arc<dyn Extractor>) -> Self {
        Self {
            controller,
            baseline,
            challengers: Vec::new(),
            rescue: None,
            policy: None,
            snapshots: None,
            settings: HarvestSettings::default(),
        }
    }

    #[must_use]
    pub fn with_challengers(mut self, challengers: Vec<Arc<dyn Extractor>>) -> Self {
        self.challengers = challengers;
        self
    }

    #[must_use]
    pub fn with_rescue(mut self, rescue: Arc<PdpRescue>) -> Self {
        self.rescue = Some(rescue);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<SelectorPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: HarvestSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn harvest(
        &self,
        site: &SiteProfile,
        session: &mut dyn Session,
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> Harvest {
        let deadline = Instant::now() + site.run_budget();
        let active = self.active_extractor(site).await;
        let outcome = self
            .controller
            .run(site, session, active.as_ref(), mode, cancel)
            .await;

        let mut live = Vec::new();
        let mut archive = Vec::new();
        let mut pages = 0;
        let mut walk_stop = WalkStop::NotWalked;

        if let Some(content) = outcome.content.as_deref() {
            match &outcome.source {
                ContentSource::Live { url } => {
                    let first = active.extract(content, url);
                    if outcome.reason == RunReason::LiveOk {
                        (live, pages, walk_stop) = self
                            .walk(site, session, active.as_ref(), first, deadline, cancel)
                            .await;
                    } else {
                        live = first;
                        pages = 1;
                    }
                }
                ContentSource::Archive { origin_url, .. } => {
                    archive = mark_stale(active.extract(content, origin_url), ItemOrigin::Archive);
                    pages = 1;
                }
                ContentSource::None => {}
            }
        }

        let selector = self.score_strategies(site, &outcome).await;

        let mut rescued = Vec::new();
        if let Some(rescue) = &self.rescue {
            let found = live.len() + archive.len();
            if found < self.settings.rescue_below
                && mode != RunMode::LiveOnly
                && !cancel.is_cancelled()
            {
                tracing::info!(site = %site.code, found, "listing thin; rescuing product pages from the archive");
                rescued = rescue
                    .rescue(&site.target_url, active.as_ref(), cancel)
                    .await;
            }
        }

        let mut all = live;
        let live_count = all.len();
        all.extend(archive);
        let archive_count = all.len() - live_count;
        let rescue_count = rescued.len();
        all.extend(rescued);

        let mut snapshot_items = Vec::new();
        if distinct(&all) < self.settings.rescue_below && !cancel.is_cancelled() {
            snapshot_items = self.reread_snapshot(site, active.as_ref()).await;
        }
        let snapshot_count = snapshot_items.len();
        all.extend(snapshot_items);

        let items = dedupe(all);
        let counts = ItemCounts {
            live: live_count,
            archive: archive_count,
            rescue: rescue_count,
            snapshot: snapshot_count,
            unique: items.len(),
        };

        let snapshot_saved = counts.snapshot == 0
            && counts.unique >= self.settings.rescue_below
            && self.save_snapshot(site, &outcome).await;

        tracing::info!(
            site = %site.code,
            reason = %outcome.reason,
            pages,
            live = counts.live,
            archive = counts.archive,
            rescue = counts.rescue,
            snapshot = counts.snapshot,
            unique = counts.unique,
            "harvest finished"
        );

        Harvest {
            outcome,
            extractor: active.id().to_string(),
            pages,
            walk_stop,
            counts,
            items,
            selector,
            snapshot_saved,
        }
    }

    /// The policy's active strategy when it is one we have, else the baseline.
    async fn active_extractor(&self, site: &SiteProfile) -> Arc<dyn Extractor> {
        let Some(policy) = &self.policy else {
            return Arc::clone(&self.baseline);
        };
        let Some(active) = policy.active_id(&site.code).await else {
            return Arc::clone(&self.baseline);
        };
        if let Some(found) = std::iter::once(&self.baseline)
            .chain(&self.challengers)
            .find(|e| e.id() == active)
        {
            return Arc::clone(found);
        }
        tracing::warn!(site = %site.code, active = %active, "active selector is not registered; using baseline");
        Arc::clone(&self.baseline)
    }

    /// Walks the listing past its first page until the tracker stalls, a
    /// ceiling is hit or the run's deadline passes.
    async fn walk(
        &self,
        site: &SiteProfile,
        session: &mut dyn Session,
        extractor: &dyn Extractor,
        first: Vec<Item>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> (Vec<Item>, usize, WalkStop) {
        let mut tracker = PaginationTracker::new(self.settings.min_growth, self.settings.max_stalls);
        tracker.add_batch(first.iter().map(Item::fingerprint));
        let mut known: HashSet<String> = first.iter().map(Item::fingerprint).collect();
        let mut items = first;
        let mut pages = 1;

        let ceiling = match &site.page_walk {
            PageWalk::Single => return (items, pages, WalkStop::SinglePage),
            PageWalk::Scroll { max_rounds } => rounds_ceiling(*max_rounds),
            PageWalk::LoadMore { max_clicks, .. } => rounds_ceiling(*max_clicks),
            PageWalk::PageParam { .. } | PageWalk::Offset { .. } => site.max_pages,
        };
        let in_place = site.page_walk.is_in_place();
        let nav_timeout = self.controller.settings().navigation_timeout;

        let stop = loop {
            if tracker.should_stop() {
                break WalkStop::Stalled;
            }
            if pages >= ceiling {
                break WalkStop::PageCeiling;
            }
            if cancel.is_cancelled() {
                break WalkStop::Cancelled;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break WalkStop::BudgetExhausted;
            }

            let step = self.next_batch(
                site,
                session,
                extractor,
                pages,
                nav_timeout.min(remaining),
            );
            let batch = match tokio::time::timeout(remaining, step).await {
                Ok(Ok(batch)) => batch,
                Ok(Err(stop)) => break stop,
                Err(_) => {
                    tracing::warn!(site = %site.code, page = pages, "run budget exhausted during page walk");
                    break WalkStop::BudgetExhausted;
                }
            };

            let grew = tracker.add_batch(batch.iter().map(Item::fingerprint));
            tracing::debug!(site = %site.code, page = pages, found = batch.len(), grew, "listing batch consumed");
            if in_place {
                // The page keeps everything already seen; keep only the new cards.
                items.extend(
                    batch
                        .into_iter()
                        .filter(|item| known.insert(item.fingerprint())),
                );
            } else {
                items.extend(batch);
            }
            pages += 1;
        };

        (items, pages, stop)
    }

    /// Loads listing batch `index` (1-based past the target page).
    async fn next_batch(
        &self,
        site: &SiteProfile,
        session: &mut dyn Session,
        extractor: &dyn Extractor,
        index: usize,
        nav_timeout: Duration,
    ) -> Result<Vec<Item>, WalkStop> {
        let settings = self.controller.settings();
        match &site.page_walk {
            PageWalk::Scroll { .. } => {
                if let Err(e) = session.scroll().await {
                    tracing::warn!(site = %site.code, error = %e, "scroll failed");
                    return Err(WalkStop::PageFailed);
                }
            }
            PageWalk::LoadMore { selector, .. } => match session.click(selector, FrameScope::Page).await {
                Ok(true) => {}
                Ok(false) => return Err(WalkStop::NoMorePages),
                Err(e) => {
                    tracing::warn!(site = %site.code, selector = %selector, error = %e, "load more click failed");
                    return Err(WalkStop::PageFailed);
                }
            },
            PageWalk::Single | PageWalk::PageParam { .. } | PageWalk::Offset { .. } => {
                let Some(url) = u32::try_from(index)
                    .ok()
                    .and_then(|idx| page_url(&site.page_walk, &site.target_url, idx))
                else {
                    return Err(WalkStop::NoMorePages);
                };
                match session.navigate(&url, settings.wait, nav_timeout).await {
                    Ok(nav) if nav.reason.is_none() => {}
                    Ok(nav) => {
                        tracing::debug!(site = %site.code, url = %url, reason = ?nav.reason, "listing page not served");
                        return Err(WalkStop::PageFailed);
                    }
                    Err(e) => {
                        tracing::warn!(site = %site.code, url = %url, error = %e, "listing page navigation failed");
                        return Err(WalkStop::PageFailed);
                    }
                }
            }
        }

        if !settings.settle.is_zero() {
            session
                .wait(u64::try_from(settings.settle.as_millis()).unwrap_or(u64::MAX))
                .await;
        }
        let content = match session.content().await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(site = %site.code, page = index, error = %e, "listing page unreadable");
                return Err(WalkStop::PageFailed);
            }
        };
        let base_url = session
            .current_url()
            .unwrap_or_else(|| site.target_url.clone());
        Ok(extractor.extract(&content, &base_url))
    }

    /// Shadow-scores every strategy on the recovered listing and feeds the
    /// round to the policy. Blocked or empty outcomes are not scored: their
    /// content is a challenge or error page, not a listing.
    async fn score_strategies(
        &self,
        site: &SiteProfile,
        outcome: &RecoveryOutcome,
    ) -> Option<Explanation> {
        let policy = self.policy.as_ref()?;
        if self.challengers.is_empty() {
            return None;
        }
        if !matches!(
            outcome.reason,
            RunReason::LiveOk | RunReason::ArchiveFirst | RunReason::ArchiveFallback
        ) {
            tracing::debug!(site = %site.code, reason = %outcome.reason, "no listing to score");
            return None;
        }
        let content = outcome.content.as_deref()?;
        let base_url = outcome.content_url().unwrap_or(&site.target_url);

        let score = |extractor: &Arc<dyn Extractor>| {
            SelectorCandidate::new(
                extractor.id(),
                EvalMetrics::from_items(&extractor.extract(content, base_url)),
            )
        };
        let round = Round {
            baseline: score(&self.baseline),
            challengers: self.challengers.iter().map(score).collect(),
        };
        Some(policy.decide(&site.code, &round).await)
    }

    /// Items from the last good listing, tagged stale.
    async fn reread_snapshot(&self, site: &SiteProfile, extractor: &dyn Extractor) -> Vec<Item> {
        let Some(store) = &self.snapshots else {
            return Vec::new();
        };
        match store.load(&site.code).await {
            Ok(Some(snapshot)) => {
                let items = mark_stale(
                    extractor.extract(&snapshot.content, &snapshot.url),
                    ItemOrigin::Snapshot,
                );
                tracing::info!(
                    site = %site.code,
                    saved_at = %snapshot.saved_at,
                    found = items.len(),
                    "listing thin; re-read last good snapshot"
                );
                items
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(site = %site.code, error = %e, "listing snapshot unreadable");
                Vec::new()
            }
        }
    }

    /// Keeps the listing of a healthy live run. Returns `true` once stored.
    async fn save_snapshot(&self, site: &SiteProfile, outcome: &RecoveryOutcome) -> bool {
        let Some(store) = &self.snapshots else {
            return false;
        };
        let (RunReason::LiveOk, ContentSource::Live { url }, Some(content)) =
            (outcome.reason, &outcome.source, outcome.content.as_deref())
        else {
            return false;
        };
        let snapshot = ListingSnapshot {
            site: site.code.clone(),
            url: url.clone(),
            saved_at: chrono::Utc::now(),
            content: content.to_string(),
        };
        match store.save(&snapshot).await {
            Ok(()) => {
                tracing::debug!(site = %site.code, url = %url, "listing snapshot refreshed");
                true
            }
            Err(e) => {
                tracing::warn!(site = %site.code, error = %e, "failed to save listing snapshot");
                false
            }
        }
    }
}

fn mark_stale(items: Vec<Item>, origin: ItemOrigin) -> Vec<Item> {
    items
        .into_iter()
        .map(|mut item| {
            item.origin = origin;
            item.stale = true;
            item
        })
        .collect()
}

fn distinct(items: &[Item]) -> usize {
    items.iter().map(Item::fingerprint).collect::<HashSet<_>>().len()
}

/// Target page plus `rounds` extra batches.
fn rounds_ceiling(rounds: u32) -> usize {
    usize::try_from(rounds).unwrap_or(usize::MAX).saturating_add(1)
}
