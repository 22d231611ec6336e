use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeZone;
use shelfscout_archive::{ArchiveProvider, LadderConfig};
use shelfscout_core::{FailureReason, ProviderName, StoreSelection};
use shelfscout_scraper::blocker::contains_any_marker;
use shelfscout_scraper::{FrameScope, JsonLdExtractor, Navigation, ScraperError};

use super::*;
use crate::cooldown::{ManualClock, MemoryCooldownStore};
use crate::error::RecoveryError;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const TARGET: &str = "https://shop.example/aanbiedingen";
const HOME: &str = "https://shop.example/";
const CHALLENGE: &str = "<html><title>Just a moment...</title></html>";
const COOKIE_WALL: &str = r#"<html><div id="onetrust-banner-sdk">Alles accepteren</div></html>"#;

fn listing(n: usize) -> String {
    let products: Vec<String> = (0..n)
        .map(|i| {
            format!(
                r#"{{"@type":"Product","name":"Olie {i}","size":"1 L","url":"/p/{i}","offers":{{"price":"{i}.99"}}}}"#
            )
        })
        .collect();
    format!(
        r#"<html><script type="application/ld+json">{{"@graph":[{}]}}</script></html>"#,
        products.join(",")
    )
}

/// Session scripted by a queue of bodies, one per navigation to the target.
/// The last body repeats once the queue runs dry.
#[derive(Default)]
struct ScriptedSession {
    pages: VecDeque<String>,
    home: Option<String>,
    clickable: Vec<&'static str>,
    url: Option<String>,
    body: Option<String>,
    navigations: Vec<String>,
    clicks: Vec<String>,
}

impl ScriptedSession {
    fn new(pages: &[&str]) -> Self {
        Self {
            pages: pages.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    fn target_navigations(&self) -> usize {
        self.navigations.iter().filter(|u| u.as_str() == TARGET).count()
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn navigate(
        &mut self,
        url: &str,
        _wait: WaitCondition,
        _timeout: Duration,
    ) -> Result<Navigation, ScraperError> {
        self.navigations.push(url.to_string());
        self.url = Some(url.to_string());
        self.body = if url == TARGET {
            if self.pages.len() > 1 {
                self.pages.pop_front()
            } else {
                self.pages.front().cloned()
            }
        } else {
            self.home.clone()
        };
        Ok(Navigation {
            final_url: url.to_string(),
            status: Some(200),
            reason: None,
        })
    }

    fn current_url(&self) -> Option<String> {
        self.url.clone()
    }

    async fn content(&mut self) -> Result<String, ScraperError> {
        self.body.clone().ok_or(ScraperError::NoPage)
    }

    async fn find_markers(&mut self, patterns: &[&str]) -> Result<bool, ScraperError> {
        Ok(self
            .body
            .as_deref()
            .is_some_and(|b| contains_any_marker(b, patterns)))
    }

    async fn click(&mut self, selector: &str, _scope: FrameScope) -> Result<bool, ScraperError> {
        let hit = self.clickable.iter().any(|c| *c == selector);
        if hit {
            self.clicks.push(selector.to_string());
        }
        Ok(hit)
    }

    async fn click_text(&mut self, text: &str, _scope: FrameScope) -> Result<bool, ScraperError> {
        let hit = self.clickable.iter().any(|c| *c == text);
        if hit {
            self.clicks.push(text.to_string());
        }
        Ok(hit)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, ScraperError> {
        Ok(b"png".to_vec())
    }

    async fn wait(&mut self, _ms: u64) {}
}

struct StaticProvider {
    name: &'static str,
    content: Option<&'static str>,
    calls: AtomicUsize,
}

#[async_trait]
impl ArchiveProvider for StaticProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, target: &str, _timeout: Duration) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.content {
            Some(body) => FetchResult::ok(self.name, target, body.to_string()),
            None => FetchResult::failed(self.name, Some(404), FailureReason::NoSnapshot),
        }
    }
}

struct ScriptedOperator {
    outcome: Option<bool>,
    calls: AtomicUsize,
}

#[async_trait]
impl OperatorUnlock for ScriptedOperator {
    async fn unlock(&self, _site: &str, _url: &str) -> Result<(), RecoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            Some(true) => Ok(()),
            Some(false) => Err(RecoveryError::Operator("window closed".to_string())),
            None => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }
    }
}

struct Harness {
    controller: RecoveryController,
    cooldowns: Arc<MemoryCooldownStore>,
    clock: Arc<ManualClock>,
    archive: Arc<StaticProvider>,
    operator: Option<Arc<ScriptedOperator>>,
}

impl Harness {
    fn new(archive: Option<&'static str>, operator: Option<Option<bool>>) -> Self {
        let archive = Arc::new(StaticProvider {
            name: "wayback",
            content: archive,
            calls: AtomicUsize::new(0),
        });
        let ladder = ArchiveLadder::new(
            vec![Arc::clone(&archive) as Arc<dyn ArchiveProvider>],
            LadderConfig {
                default_order: vec![ProviderName::Wayback],
                timeout: Duration::from_millis(200),
                delay: Duration::ZERO,
            },
        );
        let cooldowns = Arc::new(MemoryCooldownStore::new());
        let clock = Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap(),
        ));
        let settings = ControllerSettings {
            navigation_timeout: Duration::from_secs(5),
            operator_wait: Duration::from_millis(100),
            settle: Duration::ZERO,
            ..ControllerSettings::default()
        };
        let mut controller = RecoveryController::new(
            Arc::new(ladder),
            Arc::clone(&cooldowns) as Arc<dyn CooldownStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            settings,
        );
        let operator = operator.map(|outcome| {
            Arc::new(ScriptedOperator {
                outcome,
                calls: AtomicUsize::new(0),
            })
        });
        if let Some(op) = &operator {
            controller = controller.with_operator(Arc::clone(op) as Arc<dyn OperatorUnlock>);
        }
        Self {
            controller,
            cooldowns,
            clock,
            archive,
            operator,
        }
    }

    async fn run(&self, site: &SiteProfile, session: &mut ScriptedSession, mode: RunMode) -> RecoveryOutcome {
        self.controller
            .run(site, session, &JsonLdExtractor, mode, &CancellationToken::new())
            .await
    }

    fn operator_calls(&self) -> usize {
        self.operator
            .as_ref()
            .map_or(0, |op| op.calls.load(Ordering::SeqCst))
    }

    async fn stamp(&self, kind: CooldownKind) {
        cooldown::record(self.cooldowns.as_ref(), self.clock.as_ref(), "shop", kind).await;
    }

    async fn stamped(&self, kind: CooldownKind) -> bool {
        self.cooldowns.last_success("shop", kind).await.unwrap().is_some()
    }
}

fn site() -> SiteProfile {
    SiteProfile::adhoc("shop", TARGET)
}

// ---------------------------------------------------------------------------
// Live paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_listing_finishes_live() {
    let h = Harness::new(Some("<html>old</html>"), Some(Some(true)));
    let page = listing(8);
    let mut session = ScriptedSession::new(&[&page]);

    let outcome = h.run(&site(), &mut session, RunMode::Live).await;

    assert_eq!(outcome.reason, RunReason::LiveOk);
    assert_eq!(outcome.reasons(), vec!["start", "navigated", "live_ok"]);
    assert!(!outcome.stale);
    assert_eq!(outcome.content.as_deref(), Some(page.as_str()));
    assert_eq!(outcome.source, ContentSource::Live { url: TARGET.to_string() });
    assert_eq!(h.archive.calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.screenshots.len(), 1);
    assert_eq!(outcome.screenshots[0].label, "listing");
}

#[tokio::test]
async fn cookie_wall_dismissed_then_clean() {
    let h = Harness::new(None, None);
    let page = listing(6);
    let mut session = ScriptedSession::new(&[COOKIE_WALL, &page]);
    session.clickable = vec!["#onetrust-accept-btn-handler"];

    let outcome = h.run(&site(), &mut session, RunMode::Live).await;

    assert_eq!(outcome.reason, RunReason::LiveOk);
    assert_eq!(
        outcome.reasons(),
        vec!["start", "navigated", "cookie_wall", "live_ok"]
    );
    assert_eq!(session.clicks, vec!["#onetrust-accept-btn-handler"]);
    assert_eq!(session.target_navigations(), 2);
    assert_eq!(outcome.verdicts[0].kind, BlockerKind::CookieWall);
    assert_eq!(outcome.verdicts[1].kind, BlockerKind::None);
}

#[tokio::test]
async fn cookie_wall_without_control_falls_back_to_archive() {
    let h = Harness::new(Some("<html>archived listing</html>"), None);
    let mut session = ScriptedSession::new(&[COOKIE_WALL]);

    let outcome = h.run(&site(), &mut session, RunMode::Live).await;

    assert_eq!(outcome.reason, RunReason::ArchiveFallback);
    assert_eq!(
        outcome.reasons(),
        vec!["start", "navigated", "cookie_wall", "cookie_wall", "archive_fallback"]
    );
    assert!(outcome.stale);
}

// ---------------------------------------------------------------------------
// Operator escalation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn operator_unlock_retries_once_and_stamps_cooldown() {
    let h = Harness::new(None, Some(Some(true)));
    let page = listing(7);
    let mut session = ScriptedSession::new(&[CHALLENGE, &page]);

    let outcome = h.run(&site(), &mut session, RunMode::Live).await;

    assert_eq!(outcome.reason, RunReason::LiveOk);
    assert_eq!(
        outcome.reasons(),
        vec![
            "start",
            "navigated",
            "challenge_detected",
            "operator_unlocked",
            "navigated",
            "live_ok"
        ]
    );
    assert_eq!(h.operator_calls(), 1);
    assert!(h.stamped(CooldownKind::OperatorUnlock).await);
    assert_eq!(outcome.screenshots.last().map(|s| s.label), Some("listing_after_unlock"));
}

#[tokio::test]
async fn still_blocked_after_unlock_falls_through_to_archive() {
    let h = Harness::new(Some("<html>archived</html>"), Some(Some(true)));
    let mut session = ScriptedSession::new(&[CHALLENGE]);

    let outcome = h.run(&site(), &mut session, RunMode::Live).await;

    assert_eq!(outcome.reason, RunReason::ArchiveFallback);
    assert_eq!(h.operator_calls(), 1);
    assert_eq!(session.target_navigations(), 2);
    assert_eq!(outcome.content.as_deref(), Some("<html>archived</html>"));
    assert_eq!(
        outcome.source,
        ContentSource::Archive {
            provider: "wayback".to_string(),
            origin_url: TARGET.to_string()
        }
    );
}

#[tokio::test]
async fn active_unlock_cooldown_skips_operator() {
    let h = Harness::new(Some("<html>archived</html>"), Some(Some(true)));
    h.stamp(CooldownKind::OperatorUnlock).await;
    h.clock.advance(Duration::from_secs(3600));
    let mut session = ScriptedSession::new(&[CHALLENGE]);

    let outcome = h.run(&site(), &mut session, RunMode::Live).await;

    assert_eq!(h.operator_calls(), 0);
    assert_eq!(outcome.reason, RunReason::ArchiveFallback);
    let reasons = outcome.reasons();
    let challenge = reasons.iter().position(|r| *r == "challenge_detected");
    let fallback = reasons.iter().position(|r| *r == "archive_fallback");
    assert!(
        matches!((challenge, fallback), (Some(c), Some(f)) if c < f),
        "unexpected transition log: {reasons:?}"
    );
}

#[tokio::test]
async fn expired_unlock_cooldown_escalates_again() {
    let h = Harness::new(None, Some(Some(true)));
    h.stamp(CooldownKind::OperatorUnlock).await;
    h.clock.advance(Duration::from_secs(13 * 3600));
    let page = listing(5);
    let mut session = ScriptedSession::new(&[CHALLENGE, &page]);

    let outcome = h.run(&site(), &mut session, RunMode::Live).await;

    assert_eq!(h.operator_calls(), 1);
    assert_eq!(outcome.reason, RunReason::LiveOk);
}

#[tokio::test]
async fn operator_timeout_goes_to_archive() {
    let h = Harness::new(Some("<html>archived</html>"), Some(None));
    let mut session = ScriptedSession::new(&[CHALLENGE]);

    let outcome = h.run(&site(), &mut session, RunMode::Live).await;

    assert_eq!(outcome.reason, RunReason::ArchiveFallback);
    assert!(outcome.reasons().contains(&"operator_timeout"));
    assert!(!h.stamped(CooldownKind::OperatorUnlock).await);
}

#[tokio::test]
async fn operator_failure_goes_to_archive() {
    let h = Harness::new(Some("<html>archived</html>"), Some(Some(false)));
    let mut session = ScriptedSession::new(&[CHALLENGE]);

    let outcome = h.run(&site(), &mut session, RunMode::Live).await;

    assert!(outcome.reasons().contains(&"operator_failed"));
    assert_eq!(outcome.reason, RunReason::ArchiveFallback);
}

// ---------------------------------------------------------------------------
// Modes and exhaustion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_only_never_touches_archives() {
    let h = Harness::new(Some("<html>archived</html>"), None);
    let mut session = ScriptedSession::new(&[CHALLENGE]);

    let outcome = h.run(&site(), &mut session, RunMode::LiveOnly).await;

    assert_eq!(outcome.reason, RunReason::LiveOnlyBlocked);
    assert_eq!(h.archive.calls.load(Ordering::SeqCst), 0);
    assert!(outcome.ladder.is_none());
    assert_eq!(outcome.content.as_deref(), Some(CHALLENGE));
    assert!(!outcome.stale);
}

#[tokio::test]
async fn exhausted_archives_return_live_content_with_reason() {
    let h = Harness::new(None, None);
    let mut session = ScriptedSession::new(&[CHALLENGE]);

    let outcome = h.run(&site(), &mut session, RunMode::Live).await;

    assert_eq!(outcome.reason, RunReason::ArchiveExhausted);
    assert_eq!(outcome.content.as_deref(), Some(CHALLENGE));
    assert_eq!(
        outcome
            .ladder
            .as_ref()
            .and_then(LadderOutcome::final_failure)
            .map(|r| r.to_string())
            .as_deref(),
        Some("all_failed; last=no_snapshot")
    );
}

#[tokio::test]
async fn archive_first_hit_never_navigates() {
    let h = Harness::new(Some("<html>archived</html>"), None);
    let mut session = ScriptedSession::new(&[CHALLENGE]);

    let outcome = h.run(&site(), &mut session, RunMode::ArchiveFirst).await;

    assert_eq!(outcome.reason, RunReason::ArchiveFirst);
    assert!(session.navigations.is_empty());
    assert!(outcome.stale);
}

#[tokio::test]
async fn archive_first_miss_continues_live_without_second_ladder() {
    let h = Harness::new(None, None);
    let mut session = ScriptedSession::new(&[CHALLENGE]);

    let outcome = h.run(&site(), &mut session, RunMode::ArchiveFirst).await;

    assert_eq!(
        outcome.reasons(),
        vec!["archive_first", "archive_empty", "navigated", "archive_exhausted"]
    );
    assert_eq!(h.archive.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_run_stops_before_fetching() {
    let h = Harness::new(None, None);
    let mut session = ScriptedSession::new(&[CHALLENGE]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h
        .controller
        .run(&site(), &mut session, &JsonLdExtractor, RunMode::Live, &cancel)
        .await;

    assert_eq!(outcome.reason, RunReason::Cancelled);
    assert!(session.navigations.is_empty());
    assert!(outcome.content.is_none());
}

// ---------------------------------------------------------------------------
// Prewarm and store context
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prewarm_visits_home_once_per_window() {
    let h = Harness::new(None, None);
    let mut profile = site();
    profile.home_url = Some(HOME.to_string());
    let page = listing(5);

    let mut first = ScriptedSession::new(&[&page]);
    first.home = Some("<html>home</html>".to_string());
    h.run(&profile, &mut first, RunMode::Live).await;
    assert_eq!(first.navigations[0], HOME);
    assert!(h.stamped(CooldownKind::Prewarm).await);

    let mut second = ScriptedSession::new(&[&page]);
    h.run(&profile, &mut second, RunMode::Live).await;
    assert!(!second.navigations.iter().any(|u| u == HOME));
}

#[tokio::test]
async fn failed_store_selection_is_classified() {
    let h = Harness::new(None, None);
    let mut profile = site();
    profile.store = Some(StoreSelection {
        name: "Halle".to_string(),
        open_selector: Some(".store-picker".to_string()),
        confirm_selector: None,
    });
    let thin = listing(2);
    let mut session = ScriptedSession::new(&[&thin]);

    let outcome = h.run(&profile, &mut session, RunMode::LiveOnly).await;

    assert_eq!(outcome.verdicts[0].kind, BlockerKind::StoreContextFailed);
    assert!(!h.stamped(CooldownKind::StoreSelection).await);
}

#[tokio::test]
async fn successful_store_selection_reloads_and_stamps() {
    let h = Harness::new(None, None);
    let mut profile = site();
    profile.store = Some(StoreSelection {
        name: "Halle".to_string(),
        open_selector: Some(".store-picker".to_string()),
        confirm_selector: Some(".confirm-store".to_string()),
    });
    let thin = listing(1);
    let full = listing(9);
    let mut session = ScriptedSession::new(&[&thin, &full]);
    session.clickable = vec![".store-picker", "Halle", ".confirm-store"];

    let outcome = h.run(&profile, &mut session, RunMode::LiveOnly).await;

    assert_eq!(outcome.reason, RunReason::LiveOk);
    assert_eq!(outcome.verdicts.len(), 1);
    assert_eq!(outcome.verdicts[0].visible_items, 9);
    assert!(h.stamped(CooldownKind::StoreSelection).await);
}
