//! Self-tuning choice of the trusted extraction strategy.
//!
//! Every run shadow-scores the baseline and its challengers on the same
//! content. [`apply_round`] is the whole promotion algorithm as a pure
//! function; [`SelectorPolicy`] wraps it with per-site locking and atomic
//! persistence of the state plus an explanation record.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shelfscout_core::Item;

use crate::error::StoreError;
use crate::persist::{read_json, site_file, write_json_atomic, SiteLocks};

/// Absorbs float noise when comparing a score gap against the margin.
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityGates {
    pub min_cards: usize,
    pub min_price_ok: f64,
    pub min_qty_ok: f64,
    pub max_dup: f64,
    /// Required score lead over the baseline.
    pub promote_margin: f64,
    /// Consecutive qualifying rounds before promotion.
    pub required_wins: u32,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            min_cards: 5,
            min_price_ok: 0.70,
            min_qty_ok: 0.50,
            max_dup: 0.20,
            promote_margin: 0.05,
            required_wins: 2,
        }
    }
}

/// Quality of one strategy's output on one page.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub cards: usize,
    pub price_ok_rate: f64,
    pub qty_ok_rate: f64,
    pub dup_rate: f64,
}

impl EvalMetrics {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_items(items: &[Item]) -> Self {
        if items.is_empty() {
            return Self::default();
        }
        let total = items.len() as f64;
        let price_ok = items
            .iter()
            .filter(|i| i.price.is_some_and(|p| p.is_finite() && p > 0.0))
            .count();
        let qty_ok = items
            .iter()
            .filter(|i| i.quantity.as_deref().is_some_and(|q| !q.trim().is_empty()))
            .count();
        let unique: HashSet<String> = items.iter().map(Item::fingerprint).collect();

        Self {
            cards: items.len(),
            price_ok_rate: price_ok as f64 / total,
            qty_ok_rate: qty_ok as f64 / total,
            dup_rate: (items.len() - unique.len()) as f64 / total,
        }
    }

    #[must_use]
    pub fn score(&self) -> f64 {
        0.5 * self.price_ok_rate + 0.5 * self.qty_ok_rate
    }

    #[must_use]
    pub fn gates(&self, gates: &QualityGates) -> GateResults {
        GateResults {
            cards: self.cards >= gates.min_cards,
            price_ok: self.price_ok_rate >= gates.min_price_ok,
            qty_ok: self.qty_ok_rate >= gates.min_qty_ok,
            dup: self.dup_rate <= gates.max_dup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct GateResults {
    pub cards: bool,
    pub price_ok: bool,
    pub qty_ok: bool,
    pub dup: bool,
}

impl GateResults {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.cards && self.price_ok && self.qty_ok && self.dup
    }
}

/// A strategy and how it did this round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorCandidate {
    pub id: String,
    pub metrics: EvalMetrics,
}

impl SelectorCandidate {
    #[must_use]
    pub fn new(id: impl Into<String>, metrics: EvalMetrics) -> Self {
        Self {
            id: id.into(),
            metrics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub baseline: SelectorCandidate,
    pub challengers: Vec<SelectorCandidate>,
}

/// Persisted per-site state. Win entries are only ever reset, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyState {
    pub active: Option<String>,
    pub wins: BTreeMap<String, u32>,
}

impl PolicyState {
    /// Active strategy id, falling back to `baseline` before any decision.
    #[must_use]
    pub fn active_or<'a>(&'a self, baseline: &'a str) -> &'a str {
        self.active.as_deref().unwrap_or(baseline)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub id: String,
    pub score: f64,
    pub lead: f64,
    pub gates: GateResults,
    pub qualified: bool,
}

/// Audit record of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub baseline: String,
    pub baseline_score: f64,
    pub candidates: Vec<CandidateReport>,
    pub round_winner: Option<String>,
    pub active_before: Option<String>,
    pub active_after: String,
    pub promoted: bool,
    pub rolled_back: bool,
    pub wins: BTreeMap<String, u32>,
}

/// Applies one shadow-scoring round to `state`.
///
/// The best qualifying challenger gains a win and every other candidate drops
/// to zero. Reaching `required_wins` promotes it. A round without any
/// qualifier puts the baseline back in charge and zeroes every counter.
#[must_use]
pub fn apply_round(
    state: &PolicyState,
    round: &Round,
    gates: &QualityGates,
) -> (PolicyState, Explanation) {
    let baseline_id = round.baseline.id.as_str();
    let baseline_score = round.baseline.metrics.score();

    let candidates: Vec<CandidateReport> = round
        .challengers
        .iter()
        .filter(|c| c.id != baseline_id)
        .map(|c| {
            let score = c.metrics.score();
            let lead = score - baseline_score;
            let results = c.metrics.gates(gates);
            CandidateReport {
                id: c.id.clone(),
                score,
                lead,
                gates: results,
                qualified: results.passed() && lead + SCORE_EPSILON >= gates.promote_margin,
            }
        })
        .collect();

    let mut winner: Option<&CandidateReport> = None;
    for report in candidates.iter().filter(|r| r.qualified) {
        if winner.is_none_or(|best| report.score > best.score) {
            winner = Some(report);
        }
    }

    let mut next = state.clone();
    next.wins.entry(baseline_id.to_string()).or_insert(0);
    for report in &candidates {
        next.wins.entry(report.id.clone()).or_insert(0);
    }

    let mut promoted = false;
    let mut rolled_back = false;
    match winner {
        Some(best) => {
            for (id, wins) in &mut next.wins {
                if *id == best.id {
                    *wins = wins.saturating_add(1);
                } else {
                    *wins = 0;
                }
            }
            let wins = next.wins.get(&best.id).copied().unwrap_or(0);
            if wins >= gates.required_wins && next.active.as_deref() != Some(best.id.as_str()) {
                next.active = Some(best.id.clone());
                promoted = true;
            }
        }
        None => {
            for wins in next.wins.values_mut() {
                *wins = 0;
            }
            rolled_back = next.active.as_deref().is_some_and(|a| a != baseline_id);
            next.active = Some(baseline_id.to_string());
        }
    }

    let explanation = Explanation {
        baseline: baseline_id.to_string(),
        baseline_score,
        round_winner: winner.map(|w| w.id.clone()),
        candidates,
        active_before: state.active.clone(),
        active_after: next.active_or(baseline_id).to_string(),
        promoted,
        rolled_back,
        wins: next.wins.clone(),
    };
    (next, explanation)
}

/// What is stored per site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub site: String,
    pub state: PolicyState,
    pub last_explanation: Option<Explanation>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// # Errors
    ///
    /// Storage or decode failures.
    async fn load(&self, site: &str) -> Result<Option<PolicyDocument>, StoreError>;

    /// # Errors
    ///
    /// Storage or encode failures.
    async fn save(&self, document: &PolicyDocument) -> Result<(), StoreError>;
}

/// `<dir>/<site>.json`, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FilePolicyStore {
    dir: PathBuf,
}

impl FilePolicyStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl PolicyStore for FilePolicyStore {
    async fn load(&self, site: &str) -> Result<Option<PolicyDocument>, StoreError> {
        let path = site_file(&self.dir, site, ".json")?;
        read_json(&path).await
    }

    async fn save(&self, document: &PolicyDocument) -> Result<(), StoreError> {
        let path = site_file(&self.dir, &document.site, ".json")?;
        write_json_atomic(&path, "selector policy", document).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    documents: Mutex<HashMap<String, PolicyDocument>>,
}

impl MemoryPolicyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn load(&self, site: &str) -> Result<Option<PolicyDocument>, StoreError> {
        Ok(self
            .documents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&site.to_ascii_lowercase())
            .cloned())
    }

    async fn save(&self, document: &PolicyDocument) -> Result<(), StoreError> {
        self.documents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(document.site.to_ascii_lowercase(), document.clone());
        Ok(())
    }
}

pub struct SelectorPolicy {
    store: Arc<dyn PolicyStore>,
    locks: SiteLocks,
    gates: QualityGates,
}

impl SelectorPolicy {
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>, locks: SiteLocks, gates: QualityGates) -> Self {
        Self {
            store,
            locks,
            gates,
        }
    }

    #[must_use]
    pub fn gates(&self) -> &QualityGates {
        &self.gates
    }

    /// Loads the site's state, applies `round` and persists the result.
    ///
    /// A store that cannot be read starts from an empty state; a failed save
    /// is logged. The explanation is returned either way.
    pub async fn decide(&self, site: &str, round: &Round) -> Explanation {
        let _guard = self.locks.lock(site).await;

        let state = match self.store.load(site).await {
            Ok(doc) => doc.map(|d| d.state).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(site, error = %e, "selector policy unreadable; starting fresh");
                PolicyState::default()
            }
        };

        let (next, explanation) = apply_round(&state, round, &self.gates);
        if explanation.promoted {
            tracing::info!(site, active = %explanation.active_after, "selector promoted");
        } else if explanation.rolled_back {
            tracing::info!(
                site,
                from = ?explanation.active_before,
                to = %explanation.active_after,
                "selector rolled back to baseline"
            );
        } else {
            tracing::debug!(site, winner = ?explanation.round_winner, wins = ?explanation.wins, "selector round applied");
        }

        let document = PolicyDocument {
            site: site.to_string(),
            state: next,
            last_explanation: Some(explanation.clone()),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.store.save(&document).await {
            tracing::warn!(site, error = %e, "failed to persist selector policy");
        }
        explanation
    }

    /// Currently trusted strategy for `site`, if a decision was ever made.
    pub async fn active_id(&self, site: &str) -> Option<String> {
        match self.store.load(site).await {
            Ok(doc) => doc.and_then(|d| d.state.active),
            Err(e) => {
                tracing::warn!(site, error = %e, "selector policy unreadable");
                None
            }
        }
    }

    /// # Errors
    ///
    /// Storage or decode failures.
    pub async fn document(&self, site: &str) -> Result<Option<PolicyDocument>, StoreError> {
        self.store.load(site).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(cards: usize, price: f64, qty: f64, dup: f64) -> EvalMetrics {
        EvalMetrics {
            cards,
            price_ok_rate: price,
            qty_ok_rate: qty,
            dup_rate: dup,
        }
    }

    fn round(challenger: EvalMetrics) -> Round {
        Round {
            baseline: SelectorCandidate::new("jsonld", metrics(20, 0.80, 0.80, 0.0)),
            challengers: vec![SelectorCandidate::new("microdata", challenger)],
        }
    }

    fn strong() -> EvalMetrics {
        metrics(20, 0.86, 0.86, 0.0)
    }

    // -----------------------------------------------------------------------
    // apply_round
    // -----------------------------------------------------------------------

    #[test]
    fn promotes_after_two_consecutive_wins() {
        let gates = QualityGates::default();
        let (once, first) = apply_round(&PolicyState::default(), &round(strong()), &gates);
        assert_eq!(first.round_winner.as_deref(), Some("microdata"));
        assert!(!first.promoted);
        assert_eq!(once.active, None);
        assert_eq!(once.wins.get("microdata"), Some(&1));

        let (twice, second) = apply_round(&once, &round(strong()), &gates);
        assert!(second.promoted);
        assert_eq!(twice.active.as_deref(), Some("microdata"));
        assert_eq!(second.active_after, "microdata");
        assert_eq!(twice.wins.get("microdata"), Some(&2));
    }

    #[test]
    fn win_then_failed_gates_resets_without_promotion() {
        let gates = QualityGates::default();
        let (once, _) = apply_round(&PolicyState::default(), &round(strong()), &gates);
        let failing = metrics(3, 0.90, 0.90, 0.0);

        let (after, explanation) = apply_round(&once, &round(failing), &gates);

        assert!(!explanation.promoted);
        assert_eq!(explanation.round_winner, None);
        assert_eq!(after.wins.get("microdata"), Some(&0));
        assert_eq!(after.active.as_deref(), Some("jsonld"));
        assert!(!explanation.candidates[0].gates.cards);
    }

    #[test]
    fn single_regression_rolls_back_promoted_selector() {
        let gates = QualityGates::default();
        let promoted = PolicyState {
            active: Some("microdata".to_string()),
            wins: BTreeMap::from([("microdata".to_string(), 2), ("jsonld".to_string(), 0)]),
        };

        let (after, explanation) =
            apply_round(&promoted, &round(metrics(20, 0.81, 0.81, 0.0)), &gates);

        assert!(explanation.rolled_back);
        assert_eq!(after.active.as_deref(), Some("jsonld"));
        assert!(after.wins.values().all(|w| *w == 0));
        assert_eq!(after.wins.len(), 2, "entries are reset, never removed");
    }

    #[test]
    fn lead_below_margin_does_not_qualify() {
        let (_, explanation) = apply_round(
            &PolicyState::default(),
            &round(metrics(20, 0.84, 0.84, 0.0)),
            &QualityGates::default(),
        );
        assert!(!explanation.candidates[0].qualified);
        assert!(explanation.candidates[0].gates.passed());
    }

    #[test]
    fn duplicate_heavy_output_fails_gates() {
        let (_, explanation) = apply_round(
            &PolicyState::default(),
            &round(metrics(20, 0.95, 0.95, 0.25)),
            &QualityGates::default(),
        );
        assert!(!explanation.candidates[0].gates.dup);
        assert!(!explanation.candidates[0].qualified);
    }

    #[test]
    fn only_the_best_qualifier_keeps_its_streak() {
        let gates = QualityGates::default();
        let start = PolicyState {
            active: None,
            wins: BTreeMap::from([("a".to_string(), 1), ("b".to_string(), 1)]),
        };
        let round = Round {
            baseline: SelectorCandidate::new("jsonld", metrics(20, 0.5, 0.5, 0.0)),
            challengers: vec![
                SelectorCandidate::new("a", metrics(20, 0.80, 0.80, 0.0)),
                SelectorCandidate::new("b", metrics(20, 0.90, 0.90, 0.0)),
            ],
        };

        let (after, explanation) = apply_round(&start, &round, &gates);

        assert_eq!(explanation.round_winner.as_deref(), Some("b"));
        assert_eq!(after.wins.get("a"), Some(&0));
        assert_eq!(after.wins.get("b"), Some(&2));
        assert_eq!(after.active.as_deref(), Some("b"));
    }

    #[test]
    fn metrics_from_items() {
        let item = |name: &str, qty: Option<&str>, price: Option<f64>| Item {
            name: name.to_string(),
            quantity: qty.map(str::to_string),
            price,
            source_url: "https://shop.example/p".to_string(),
            origin: shelfscout_core::ItemOrigin::Live,
            stale: false,
        };
        let items = vec![
            item("Olie", Some("1 L"), Some(7.99)),
            item("Olie", Some("1 L"), Some(7.99)),
            item("Azijn", None, Some(2.49)),
            item("Zout", Some("500 g"), None),
        ];

        let m = EvalMetrics::from_items(&items);

        assert_eq!(m.cards, 4);
        assert!((m.price_ok_rate - 0.75).abs() < 1e-9);
        assert!((m.qty_ok_rate - 0.75).abs() < 1e-9);
        assert!((m.dup_rate - 0.25).abs() < 1e-9);
        assert!((m.score() - 0.75).abs() < 1e-9);
        assert_eq!(EvalMetrics::from_items(&[]), EvalMetrics::default());
    }

    // -----------------------------------------------------------------------
    // SelectorPolicy
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn decide_persists_state_and_explanation() {
        let store = Arc::new(MemoryPolicyStore::new());
        let policy = SelectorPolicy::new(
            Arc::clone(&store) as Arc<dyn PolicyStore>,
            SiteLocks::new(),
            QualityGates::default(),
        );

        policy.decide("Shop", &round(strong())).await;
        assert_eq!(policy.active_id("shop").await, None);
        policy.decide("shop", &round(strong())).await;

        assert_eq!(policy.active_id("shop").await.as_deref(), Some("microdata"));
        let doc = policy.document("shop").await.unwrap().unwrap();
        assert!(doc.last_explanation.is_some_and(|e| e.promoted));
    }
}
