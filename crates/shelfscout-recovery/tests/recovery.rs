//! End-to-end harvests over plain HTTP against a mock retailer and archive.

use std::sync::Arc;
use std::time::Duration;

use shelfscout_archive::{
    build_providers, ArchiveLadder, LadderConfig, PdpRescue, ProviderEndpoints, RescueConfig,
};
use shelfscout_core::{GatewaySettings, ItemOrigin, ProviderName, SiteProfile};
use shelfscout_recovery::cooldown;
use shelfscout_recovery::{
    Clock, ControllerSettings, CooldownKind, CooldownStore, EvalMetrics, FileCooldownStore,
    FilePolicyStore, FileSignalUnlock, Harvester, PolicyStore, QualityGates, RecoveryController,
    Round, RunLog, RunMode, RunReason, SelectorCandidate, SelectorPolicy, SiteLocks, SystemClock,
};
use shelfscout_scraper::{HttpSession, JsonLdExtractor, RateLimitedGateway};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const CHALLENGE: &str = r#"<html><head><title>Just a moment...</title></head>
<body><div id="cf-chl-widget"></div></body></html>"#;

const OLIE: &str = r#"{"@type":"Product","name":"Olijfolie 1 L","size":"1 L","url":"https://shop.example/producten/olie","offers":{"price":"7.99"}}"#;

fn listing(products: &[String]) -> String {
    format!(
        r#"<html><script type="application/ld+json">[{}]</script></html>"#,
        products.join(",")
    )
}

fn archived_listing() -> String {
    let products: Vec<String> = (0..6)
        .map(|i| {
            format!(
                r#"{{"@type":"Product","name":"Pasta {i}","size":"500 g","url":"/producten/pasta-{i}","offers":{{"price":"1.{i}9"}}}}"#
            )
        })
        .collect();
    listing(&products)
}

fn test_gateway() -> Arc<RateLimitedGateway> {
    let settings = GatewaySettings {
        user_agent: "shelfscout-test/0.1".to_string(),
        requests_per_sec: 100.0,
        burst: 20,
        request_timeout: Duration::from_secs(2),
        default_budget: Duration::from_secs(5),
        retry_sleep: Duration::from_millis(20),
        respect_robots: false,
    };
    Arc::new(RateLimitedGateway::new(settings).expect("test gateway"))
}

fn quick_settings() -> ControllerSettings {
    ControllerSettings {
        navigation_timeout: Duration::from_secs(3),
        operator_wait: Duration::from_millis(200),
        settle: Duration::ZERO,
        ..ControllerSettings::default()
    }
}

fn wayback_ladder(gateway: &Arc<RateLimitedGateway>, server: &MockServer) -> Arc<ArchiveLadder> {
    let providers = build_providers(gateway, &ProviderEndpoints::all_at(&server.uri()), None);
    Arc::new(ArchiveLadder::new(
        providers,
        LadderConfig {
            default_order: vec![ProviderName::Wayback],
            timeout: Duration::from_secs(2),
            delay: Duration::ZERO,
        },
    ))
}

// ---------------------------------------------------------------------------
// Challenge with an active unlock cooldown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn challenge_with_recent_unlock_falls_back_to_archive() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/aanbiedingen"))
        .respond_with(ResponseTemplate::new(403).set_body_string(CHALLENGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wayback/available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "archived_snapshots": {
                "closest": {
                    "available": true,
                    "url": format!("{}/web/20240301000000/{}/aanbiedingen", server.uri(), server.uri()),
                }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/web/20240301000000/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(archived_listing()))
        .mount(&server)
        .await;

    let state = tempfile::tempdir().unwrap();
    let operator_dir = state.path().join("operator");
    let locks = SiteLocks::new();
    let cooldowns = Arc::new(FileCooldownStore::new(state.path().join("cooldowns"), locks));
    cooldown::record(cooldowns.as_ref(), &SystemClock, "shop", CooldownKind::OperatorUnlock).await;

    let gateway = test_gateway();
    let controller = RecoveryController::new(
        wayback_ladder(&gateway, &server),
        Arc::clone(&cooldowns) as Arc<dyn CooldownStore>,
        Arc::new(SystemClock) as Arc<dyn Clock>,
        quick_settings(),
    )
    .with_operator(Arc::new(FileSignalUnlock::new(&operator_dir)));
    let harvester = Harvester::new(Arc::new(controller), Arc::new(JsonLdExtractor));

    let site = SiteProfile::adhoc("shop", &format!("{}/aanbiedingen", server.uri()));
    let mut session = HttpSession::new(Arc::clone(&gateway));
    let started = chrono::Utc::now();

    let harvest = harvester
        .harvest(&site, &mut session, RunMode::Live, &CancellationToken::new())
        .await;

    let outcome = &harvest.outcome;
    assert_eq!(outcome.reason, RunReason::ArchiveFallback);
    assert!(outcome.stale);
    let reasons = outcome.reasons();
    let challenge = reasons.iter().position(|r| *r == "challenge_detected");
    let fallback = reasons.iter().position(|r| *r == "archive_fallback");
    assert!(
        matches!((challenge, fallback), (Some(c), Some(f)) if c < f),
        "expected challenge_detected before archive_fallback, got: {reasons:?}"
    );
    assert!(!operator_dir.join("shop.request.json").exists());

    assert_eq!(harvest.counts.archive, 6);
    assert!(harvest
        .items
        .iter()
        .all(|i| i.origin == ItemOrigin::Archive && i.stale));

    let record = RunLog::new(state.path())
        .write(&harvest, started)
        .await
        .unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(record).unwrap()).unwrap();
    assert_eq!(json["outcome"]["reason"], "archive_fallback");
    assert_eq!(json["outcome"]["ladder"]["attempts"][0]["result"]["provider"], "wayback");
}

// ---------------------------------------------------------------------------
// Thin live listing plus rescue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rescued_duplicate_of_live_item_is_kept_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/aanbiedingen"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[OLIE.to_string()])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            ["urlkey", "timestamp", "original", "mimetype", "statuscode", "digest", "length"],
            ["example,shop)/producten/olie", "20240601000000", "https://shop.example/producten/olie", "text/html", "200", "B", "1"],
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/web/20240601000000/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[OLIE.to_string()])))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = test_gateway();
    let controller = RecoveryController::new(
        wayback_ladder(&gateway, &server),
        Arc::new(shelfscout_recovery::MemoryCooldownStore::new()) as Arc<dyn CooldownStore>,
        Arc::new(SystemClock) as Arc<dyn Clock>,
        quick_settings(),
    );
    let rescue = PdpRescue::new(
        Arc::clone(&gateway),
        &server.uri(),
        RescueConfig {
            jitter: (Duration::ZERO, Duration::ZERO),
            timeout: Duration::from_secs(2),
            ..RescueConfig::default()
        },
    );
    let harvester =
        Harvester::new(Arc::new(controller), Arc::new(JsonLdExtractor)).with_rescue(Arc::new(rescue));

    let site = SiteProfile::adhoc("shop", &format!("{}/aanbiedingen", server.uri()));
    let mut session = HttpSession::new(gateway);

    let harvest = harvester
        .harvest(&site, &mut session, RunMode::Live, &CancellationToken::new())
        .await;

    assert_eq!(harvest.outcome.reason, RunReason::LiveOk);
    assert_eq!(harvest.counts.live, 1);
    assert_eq!(harvest.counts.rescue, 1);
    assert_eq!(harvest.items.len(), 1);
    assert_eq!(harvest.items[0].origin, ItemOrigin::Live);
}

#[tokio::test]
async fn live_only_never_rescues() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/aanbiedingen"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[OLIE.to_string()])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = test_gateway();
    let controller = RecoveryController::new(
        wayback_ladder(&gateway, &server),
        Arc::new(shelfscout_recovery::MemoryCooldownStore::new()) as Arc<dyn CooldownStore>,
        Arc::new(SystemClock) as Arc<dyn Clock>,
        quick_settings(),
    );
    let rescue = PdpRescue::new(Arc::clone(&gateway), &server.uri(), RescueConfig::default());
    let harvester =
        Harvester::new(Arc::new(controller), Arc::new(JsonLdExtractor)).with_rescue(Arc::new(rescue));

    let site = SiteProfile::adhoc("shop", &format!("{}/aanbiedingen", server.uri()));
    let mut session = HttpSession::new(gateway);

    let harvest = harvester
        .harvest(&site, &mut session, RunMode::LiveOnly, &CancellationToken::new())
        .await;

    assert_eq!(harvest.counts.rescue, 0);
    assert_eq!(harvest.items.len(), 1);
}

// ---------------------------------------------------------------------------
// Selector policy on disk
// ---------------------------------------------------------------------------

fn metrics(price: f64, qty: f64) -> EvalMetrics {
    EvalMetrics {
        cards: 24,
        price_ok_rate: price,
        qty_ok_rate: qty,
        dup_rate: 0.0,
    }
}

fn round(challenger: EvalMetrics) -> Round {
    Round {
        baseline: SelectorCandidate::new("jsonld", metrics(0.80, 0.80)),
        challengers: vec![SelectorCandidate::new("microdata", challenger)],
    }
}

fn file_policy(dir: &std::path::Path) -> SelectorPolicy {
    SelectorPolicy::new(
        Arc::new(FilePolicyStore::new(dir)) as Arc<dyn PolicyStore>,
        SiteLocks::new(),
        QualityGates::default(),
    )
}

#[tokio::test]
async fn selector_promotion_survives_restart_and_rolls_back() {
    let dir = tempfile::tempdir().unwrap();

    file_policy(dir.path()).decide("shop", &round(metrics(0.86, 0.86))).await;
    let second = file_policy(dir.path())
        .decide("shop", &round(metrics(0.86, 0.86)))
        .await;
    assert!(second.promoted);
    assert_eq!(
        file_policy(dir.path()).active_id("shop").await.as_deref(),
        Some("microdata")
    );

    let regression = file_policy(dir.path())
        .decide("shop", &round(metrics(0.60, 0.90)))
        .await;
    assert!(regression.rolled_back);

    let doc = file_policy(dir.path())
        .document("shop")
        .await
        .unwrap()
        .expect("policy document");
    assert_eq!(doc.state.active.as_deref(), Some("jsonld"));
    assert_eq!(doc.state.wins.get("microdata"), Some(&0));
    assert_eq!(
        doc.last_explanation.map(|e| e.active_before),
        Some(Some("microdata".to_string()))
    );
}

#[tokio::test]
async fn single_win_then_failure_is_not_promoted() {
    let dir = tempfile::tempdir().unwrap();
    let policy = file_policy(dir.path());

    policy.decide("shop", &round(metrics(0.86, 0.86))).await;
    let failing = EvalMetrics {
        cards: 2,
        ..metrics(0.95, 0.95)
    };
    let explanation = policy.decide("shop", &round(failing)).await;

    assert!(!explanation.promoted);
    assert_eq!(explanation.wins.get("microdata"), Some(&0));
    assert_eq!(policy.active_id("shop").await.as_deref(), Some("jsonld"));
}
