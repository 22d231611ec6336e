//! The recovery state machine.
//!
//! One run walks `Fetching → Classifying → … → Done` for a single site. Each
//! state has its own handler returning the next [`Step`]; every move goes
//! through the run's [`TransitionLog`], which also refuses loops. Collaborators
//! (session, extractor, ladder, cooldown store, clock, operator) are injected,
//! so a run against fakes is fully deterministic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use shelfscout_archive::{ArchiveLadder, FetchResult, LadderOutcome};
use shelfscout_core::{AppConfig, SiteProfile};
use shelfscout_scraper::{
    classify, dismiss_cookies, probe_signals, select_store, BlockerKind, BlockerVerdict,
    ClassifierThresholds, Extractor, RenderSignals, Session, WaitCondition,
};
use tokio_util::sync::CancellationToken;

use crate::cooldown::{self, Clock, CooldownKind, CooldownStore};
use crate::operator::OperatorUnlock;
use crate::state::{RecoveryState, Transition, TransitionLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Live first, archives when blocked.
    #[default]
    Live,
    /// Never touch the archives.
    LiveOnly,
    /// Archives before any navigation; live only if they come up empty.
    ArchiveFirst,
}

/// Why a run ended. Serialized as the taxonomy code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    LiveOk,
    ArchiveFirst,
    ArchiveFallback,
    ArchiveExhausted,
    LiveOnlyBlocked,
    RunBudgetExhausted,
    Cancelled,
    LoopGuard,
}

impl RunReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LiveOk => "live_ok",
            Self::ArchiveFirst => "archive_first",
            Self::ArchiveFallback => "archive_fallback",
            Self::ArchiveExhausted => "archive_exhausted",
            Self::LiveOnlyBlocked => "live_only_blocked",
            Self::RunBudgetExhausted => "run_budget_exhausted",
            Self::Cancelled => "cancelled",
            Self::LoopGuard => "loop_guard",
        }
    }
}

impl std::fmt::Display for RunReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentSource {
    None,
    Live { url: String },
    Archive { provider: String, origin_url: String },
}

#[derive(Debug, Clone)]
pub struct Screenshot {
    pub label: &'static str,
    pub png: Vec<u8>,
}

/// Result of one recovery run. Never an error: an exhausted run carries no
/// content and an explicit reason.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOutcome {
    pub site: String,
    pub mode: RunMode,
    pub target_url: String,
    #[serde(skip)]
    pub content: Option<String>,
    pub source: ContentSource,
    /// `true` when the content came from an archive.
    pub stale: bool,
    pub reason: RunReason,
    pub verdicts: Vec<BlockerVerdict>,
    pub transitions: Vec<Transition>,
    pub ladder: Option<LadderOutcome>,
    #[serde(skip)]
    pub screenshots: Vec<Screenshot>,
    #[serde(with = "shelfscout_core::duration_ms")]
    pub elapsed: Duration,
}

impl RecoveryOutcome {
    #[must_use]
    pub fn reasons(&self) -> Vec<&str> {
        self.transitions.iter().map(|t| t.reason.as_str()).collect()
    }

    #[must_use]
    pub fn content_url(&self) -> Option<&str> {
        match &self.source {
            ContentSource::None => None,
            ContentSource::Live { url } => Some(url),
            ContentSource::Archive { origin_url, .. } => Some(origin_url),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub thresholds: ClassifierThresholds,
    pub navigation_timeout: Duration,
    pub operator_wait: Duration,
    pub wait: WaitCondition,
    /// Pause after each navigation so late-rendering listings settle.
    pub settle: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            thresholds: ClassifierThresholds::default(),
            navigation_timeout: Duration::from_secs(45),
            operator_wait: Duration::from_secs(900),
            wait: WaitCondition::DomContentLoaded,
            settle: Duration::from_millis(2500),
        }
    }
}

impl ControllerSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            navigation_timeout: config.gateway.default_budget,
            operator_wait: config.operator_wait,
            ..Self::default()
        }
    }
}

enum Step {
    Enter(RecoveryState, String),
    Finish(RunReason),
}

/// Mutable bookkeeping of one run.
struct Run<'a> {
    site: &'a SiteProfile,
    mode: RunMode,
    started: Instant,
    log: TransitionLog,
    verdicts: Vec<BlockerVerdict>,
    live: Option<(String, String)>,
    archived: Option<FetchResult>,
    ladder: Option<LadderOutcome>,
    screenshots: Vec<Screenshot>,
    prewarmed: bool,
    store_attempted: bool,
    store_failed: bool,
    dismiss_attempted: bool,
    operator_attempted: bool,
    reason: Option<RunReason>,
}

impl<'a> Run<'a> {
    fn new(site: &'a SiteProfile, mode: RunMode) -> Self {
        let started = Instant::now();
        Self {
            site,
            mode,
            started,
            log: TransitionLog::new(started),
            verdicts: Vec::new(),
            live: None,
            archived: None,
            ladder: None,
            screenshots: Vec::new(),
            prewarmed: false,
            store_attempted: false,
            store_failed: false,
            dismiss_attempted: false,
            operator_attempted: false,
            reason: None,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.site
            .run_budget()
            .checked_sub(self.started.elapsed())
            .filter(|d| !d.is_zero())
    }

    fn into_outcome(self) -> RecoveryOutcome {
        let archived = self.archived.and_then(|r| match r {
            FetchResult::Ok {
                content,
                origin_url,
                provider,
            } => Some((content, origin_url, provider)),
            FetchResult::Failed { .. } => None,
        });
        let (content, source, stale) = match (archived, self.live) {
            (Some((content, origin_url, provider)), _) => (
                Some(content),
                ContentSource::Archive {
                    provider,
                    origin_url,
                },
                true,
            ),
            (None, Some((url, content))) => (Some(content), ContentSource::Live { url }, false),
            (None, None) => (None, ContentSource::None, false),
        };

        RecoveryOutcome {
            site: self.site.code.clone(),
            mode: self.mode,
            target_url: self.site.target_url.clone(),
            content,
            source,
            stale,
            reason: self.reason.unwrap_or(RunReason::LoopGuard),
            verdicts: self.verdicts,
            transitions: self.log.into_entries(),
            ladder: self.ladder,
            screenshots: self.screenshots,
            elapsed: self.started.elapsed(),
        }
    }
}

pub struct RecoveryController {
    ladder: Arc<ArchiveLadder>,
    cooldowns: Arc<dyn CooldownStore>,
    clock: Arc<dyn Clock>,
    operator: Option<Arc<dyn OperatorUnlock>>,
    settings: ControllerSettings,
}

impl RecoveryController {
    #[must_use]
    pub fn new(
        ladder: Arc<ArchiveLadder>,
        cooldowns: Arc<dyn CooldownStore>,
        clock: Arc<dyn Clock>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            ladder,
            cooldowns,
            clock,
            operator: None,
            settings,
        }
    }

    #[must_use]
    pub fn with_operator(mut self, operator: Arc<dyn OperatorUnlock>) -> Self {
        self.operator = Some(operator);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Runs the recovery state machine for `site`.
    ///
    /// Stops at the site's wall-clock budget and on cancellation, keeping
    /// whatever content was obtained so far.
    pub async fn run(
        &self,
        site: &SiteProfile,
        session: &mut dyn Session,
        extractor: &dyn Extractor,
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> RecoveryOutcome {
        let mut run = Run::new(site, mode);
        tracing::info!(site = %site.code, ?mode, url = %site.target_url, "recovery run started");

        let mut step = match mode {
            RunMode::ArchiveFirst => {
                Step::Enter(RecoveryState::FallingBackToArchive, "archive_first".to_string())
            }
            RunMode::Live | RunMode::LiveOnly => {
                Step::Enter(RecoveryState::Fetching, "start".to_string())
            }
        };

        loop {
            let (state, reason) = match step {
                Step::Finish(reason) => {
                    run.log.enter(RecoveryState::Done, reason.as_str());
                    run.reason = Some(reason);
                    break;
                }
                Step::Enter(state, reason) => (state, reason),
            };

            if cancel.is_cancelled() {
                step = Step::Finish(RunReason::Cancelled);
                continue;
            }
            let Some(remaining) = run.remaining() else {
                step = Step::Finish(RunReason::RunBudgetExhausted);
                continue;
            };
            if !run.log.enter(state, reason) {
                tracing::warn!(site = %site.code, state = %state, "refusing to re-enter recovery state");
                step = Step::Finish(RunReason::LoopGuard);
                continue;
            }

            let handler = self.handle(state, &mut run, session, extractor, cancel);
            step = if let Ok(next) = tokio::time::timeout(remaining, handler).await {
                next
            } else {
                tracing::warn!(site = %site.code, state = %state, "run budget exhausted");
                Step::Finish(RunReason::RunBudgetExhausted)
            };
        }

        let outcome = run.into_outcome();
        tracing::info!(
            site = %site.code,
            reason = %outcome.reason,
            stale = outcome.stale,
            elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            "recovery run finished"
        );
        outcome
    }

    async fn handle(
        &self,
        state: RecoveryState,
        run: &mut Run<'_>,
        session: &mut dyn Session,
        extractor: &dyn Extractor,
        cancel: &CancellationToken,
    ) -> Step {
        match state {
            RecoveryState::Fetching => self.on_fetching(run, session).await,
            RecoveryState::Classifying => self.on_classifying(run, session, extractor).await,
            RecoveryState::AutoDismissing => self.on_auto_dismissing(run, session, extractor).await,
            RecoveryState::AwaitingOperator => self.on_awaiting_operator(run, cancel).await,
            RecoveryState::FallingBackToArchive => self.on_archive(run, cancel).await,
            RecoveryState::Done => Step::Finish(RunReason::LoopGuard),
        }
    }

    // -----------------------------------------------------------------------
    // State handlers
    // -----------------------------------------------------------------------

    async fn on_fetching(&self, run: &mut Run<'_>, session: &mut dyn Session) -> Step {
        if !run.prewarmed {
            run.prewarmed = true;
            self.prewarm(run.site, session).await;
        }

        let reason = self.navigate_target(run, session).await;
        let label = if run.operator_attempted {
            "listing_after_unlock"
        } else {
            "listing"
        };
        match session.screenshot().await {
            Ok(png) => run.screenshots.push(Screenshot { label, png }),
            Err(e) => tracing::debug!(site = %run.site.code, error = %e, "no screenshot"),
        }
        Step::Enter(RecoveryState::Classifying, reason)
    }

    async fn on_classifying(
        &self,
        run: &mut Run<'_>,
        session: &mut dyn Session,
        extractor: &dyn Extractor,
    ) -> Step {
        let site = run.site;
        let mut signals = self.probe(run, session, extractor).await;

        if self.should_select_store(run, &signals).await {
            run.store_attempted = true;
            if let Some(store) = site.store.as_ref() {
                if select_store(session, store).await {
                    tracing::info!(site = %site.code, store = %store.name, "store context selected");
                    cooldown::record(
                        self.cooldowns.as_ref(),
                        self.clock.as_ref(),
                        &site.code,
                        CooldownKind::StoreSelection,
                    )
                    .await;
                    self.navigate_target(run, session).await;
                    signals = self.probe(run, session, extractor).await;
                } else {
                    run.store_failed = true;
                    signals.store_context_failed = true;
                }
            }
        }

        let verdict = self.judge(run, session, &signals).await;
        self.after_verdict(run, verdict).await
    }

    async fn on_auto_dismissing(
        &self,
        run: &mut Run<'_>,
        session: &mut dyn Session,
        extractor: &dyn Extractor,
    ) -> Step {
        run.dismiss_attempted = true;
        let Some(strategy) = dismiss_cookies(session).await else {
            tracing::info!(site = %run.site.code, "no consent control found");
            return self
                .escalate_or_fallback(run, BlockerKind::CookieWall.as_str())
                .await;
        };
        tracing::info!(site = %run.site.code, strategy = %strategy, "consent dismissed");

        self.navigate_target(run, session).await;
        let signals = self.probe(run, session, extractor).await;
        let verdict = self.judge(run, session, &signals).await;
        if verdict.is_clear() {
            return Step::Finish(RunReason::LiveOk);
        }
        self.escalate_or_fallback(run, verdict.kind.as_str()).await
    }

    async fn on_awaiting_operator(&self, run: &mut Run<'_>, cancel: &CancellationToken) -> Step {
        run.operator_attempted = true;
        let Some(operator) = self.operator.as_ref() else {
            return fallback_or_finish(run, "operator_unavailable");
        };

        let site = run.site;
        let wait = self.settings.operator_wait;
        let waited = tokio::select! {
            () = cancel.cancelled() => None,
            result = tokio::time::timeout(wait, operator.unlock(&site.code, &site.target_url)) => Some(result),
        };
        let Some(result) = waited else {
            return Step::Finish(RunReason::Cancelled);
        };

        match result {
            Ok(Ok(())) => {
                cooldown::record(
                    self.cooldowns.as_ref(),
                    self.clock.as_ref(),
                    &site.code,
                    CooldownKind::OperatorUnlock,
                )
                .await;
                run.log.arm_retry();
                Step::Enter(RecoveryState::Fetching, "operator_unlocked".to_string())
            }
            Ok(Err(e)) => {
                tracing::warn!(site = %site.code, error = %e, "operator unlock failed");
                fallback_or_finish(run, "operator_failed")
            }
            Err(_) => {
                tracing::warn!(site = %site.code, ?wait, "operator did not respond in time");
                fallback_or_finish(run, "operator_timeout")
            }
        }
    }

    async fn on_archive(&self, run: &mut Run<'_>, cancel: &CancellationToken) -> Step {
        let site = run.site;
        let outcome = self
            .ladder
            .resolve(site, &site.target_url, None, None, cancel)
            .await;
        let hit = outcome.best.clone();
        let cancelled = outcome.cancelled;
        if let Some(failure) = outcome.final_failure() {
            tracing::info!(site = %site.code, reason = %failure, "archive ladder came up empty");
        }
        run.ladder = Some(outcome);

        let live_attempted = run.log.visited(RecoveryState::Fetching);
        match hit {
            Some(result) if result.is_ok() => {
                run.archived = Some(result);
                Step::Finish(if live_attempted {
                    RunReason::ArchiveFallback
                } else {
                    RunReason::ArchiveFirst
                })
            }
            _ if cancelled => Step::Finish(RunReason::Cancelled),
            _ if !live_attempted => {
                Step::Enter(RecoveryState::Fetching, "archive_empty".to_string())
            }
            _ => Step::Finish(RunReason::ArchiveExhausted),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn nav_timeout(&self, run: &Run<'_>) -> Duration {
        run.remaining()
            .map_or(Duration::ZERO, |left| left.min(self.settings.navigation_timeout))
    }

    /// Navigates to the target and returns a reason code for the log.
    async fn navigate_target(&self, run: &Run<'_>, session: &mut dyn Session) -> String {
        let site = run.site;
        let reason = match session
            .navigate(&site.target_url, self.settings.wait, self.nav_timeout(run))
            .await
        {
            Ok(nav) => match nav.reason {
                Some(reason) => {
                    tracing::debug!(site = %site.code, status = ?nav.status, reason = %reason, "navigation not clean");
                    reason.code()
                }
                None => "navigated".to_string(),
            },
            Err(e) => {
                tracing::warn!(site = %site.code, error = %e, "navigation failed");
                "navigation_failed".to_string()
            }
        };
        if !self.settings.settle.is_zero() {
            session
                .wait(u64::try_from(self.settings.settle.as_millis()).unwrap_or(u64::MAX))
                .await;
        }
        reason
    }

    async fn prewarm(&self, site: &SiteProfile, session: &mut dyn Session) {
        let Some(home) = site.home_url.as_deref() else {
            return;
        };
        if self
            .cooldown_active(site, CooldownKind::Prewarm, site.cooldowns.prewarm())
            .await
        {
            tracing::debug!(site = %site.code, "prewarm skipped; cooldown active");
            return;
        }

        match session
            .navigate(home, self.settings.wait, self.settings.navigation_timeout)
            .await
        {
            Ok(nav) if nav.reason.is_none() => {
                if let Some(strategy) = dismiss_cookies(session).await {
                    tracing::debug!(site = %site.code, strategy = %strategy, "consent dismissed during prewarm");
                }
                cooldown::record(
                    self.cooldowns.as_ref(),
                    self.clock.as_ref(),
                    &site.code,
                    CooldownKind::Prewarm,
                )
                .await;
                tracing::info!(site = %site.code, url = home, "session prewarmed");
            }
            Ok(nav) => {
                tracing::debug!(site = %site.code, reason = ?nav.reason, "prewarm navigation not clean");
            }
            Err(e) => tracing::warn!(site = %site.code, error = %e, "prewarm failed"),
        }
    }

    async fn probe(
        &self,
        run: &Run<'_>,
        session: &mut dyn Session,
        extractor: &dyn Extractor,
    ) -> RenderSignals {
        let recent_unlock = self
            .cooldown_active(run.site, CooldownKind::OperatorUnlock, run.site.cooldowns.unlock())
            .await;
        probe_signals(session, extractor, run.store_failed, recent_unlock).await
    }

    /// Classifies, records the verdict and keeps the page as the latest live
    /// content.
    async fn judge(
        &self,
        run: &mut Run<'_>,
        session: &mut dyn Session,
        signals: &RenderSignals,
    ) -> BlockerVerdict {
        let verdict = classify(signals, &self.settings.thresholds);
        tracing::info!(
            site = %run.site.code,
            verdict = %verdict.kind,
            visible = verdict.visible_items,
            structured = verdict.structured_products,
            recent_unlock = signals.recent_unlock,
            "page classified"
        );
        run.verdicts.push(verdict);

        if let Ok(content) = session.content().await {
            let url = session
                .current_url()
                .unwrap_or_else(|| run.site.target_url.clone());
            run.live = Some((url, content));
        }
        verdict
    }

    async fn after_verdict(&self, run: &mut Run<'_>, verdict: BlockerVerdict) -> Step {
        if verdict.is_clear() {
            return Step::Finish(RunReason::LiveOk);
        }
        if verdict.kind == BlockerKind::CookieWall && !run.dismiss_attempted {
            return Step::Enter(
                RecoveryState::AutoDismissing,
                BlockerKind::CookieWall.as_str().to_string(),
            );
        }
        self.escalate_or_fallback(run, verdict.kind.as_str()).await
    }

    async fn escalate_or_fallback(&self, run: &mut Run<'_>, reason: &str) -> Step {
        if !run.operator_attempted && self.operator.is_some() {
            if self
                .cooldown_active(run.site, CooldownKind::OperatorUnlock, run.site.cooldowns.unlock())
                .await
            {
                tracing::info!(site = %run.site.code, "operator unlock suppressed; cooldown active");
            } else {
                return Step::Enter(RecoveryState::AwaitingOperator, reason.to_string());
            }
        }
        fallback_or_finish(run, reason)
    }

    async fn should_select_store(&self, run: &Run<'_>, signals: &RenderSignals) -> bool {
        if run.store_attempted
            || run.site.store.is_none()
            || signals.visible_items >= self.settings.thresholds.min_visible_items
        {
            return false;
        }
        !self
            .cooldown_active(run.site, CooldownKind::StoreSelection, run.site.cooldowns.store())
            .await
    }

    async fn cooldown_active(&self, site: &SiteProfile, kind: CooldownKind, window: Duration) -> bool {
        cooldown::is_active(
            self.cooldowns.as_ref(),
            self.clock.as_ref(),
            &site.code,
            kind,
            window,
        )
        .await
    }
}

fn fallback_or_finish(run: &Run<'_>, reason: &str) -> Step {
    if run.mode == RunMode::LiveOnly {
        return Step::Finish(RunReason::LiveOnlyBlocked);
    }
    if run.log.visited(RecoveryState::FallingBackToArchive) {
        return Step::Finish(RunReason::ArchiveExhausted);
    }
    Step::Enter(RecoveryState::FallingBackToArchive, reason.to_string())
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;
