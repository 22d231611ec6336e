//! Recovery states and the single transition log of a run.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Fetching,
    Classifying,
    AutoDismissing,
    AwaitingOperator,
    FallingBackToArchive,
    Done,
}

impl RecoveryState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Classifying => "classifying",
            Self::AutoDismissing => "auto_dismissing",
            Self::AwaitingOperator => "awaiting_operator",
            Self::FallingBackToArchive => "falling_back_to_archive",
            Self::Done => "done",
        }
    }

    /// Whether `next` may directly follow `self`. `Done` is reachable from
    /// everywhere (budget, cancellation).
    #[must_use]
    pub fn can_enter(self, next: Self) -> bool {
        use RecoveryState::{
            AutoDismissing, AwaitingOperator, Classifying, Done, FallingBackToArchive, Fetching,
        };
        if next == Done {
            return self != Done;
        }
        matches!(
            (self, next),
            (Fetching, Classifying)
                | (Classifying, AutoDismissing | AwaitingOperator | FallingBackToArchive)
                | (AutoDismissing, AwaitingOperator | FallingBackToArchive)
                | (AwaitingOperator, Fetching | FallingBackToArchive)
                // Archive-first runs continue live when the archives are empty.
                | (FallingBackToArchive, Fetching)
        )
    }
}

impl std::fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub state: RecoveryState,
    pub reason: String,
    #[serde(with = "shelfscout_core::duration_ms")]
    pub elapsed: Duration,
}

/// Ordered record of every state entered during one run.
///
/// Enforces the loop guard: each state is entered at most once, except that
/// `Fetching` and `Classifying` may be entered a second time after
/// [`TransitionLog::arm_retry`] (the post-unlock retry).
#[derive(Debug, Clone)]
pub struct TransitionLog {
    started: Instant,
    entries: Vec<Transition>,
    visits: HashMap<RecoveryState, u8>,
    retry_armed: bool,
}

impl TransitionLog {
    #[must_use]
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            entries: Vec::new(),
            visits: HashMap::new(),
            retry_armed: false,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<RecoveryState> {
        self.entries.last().map(|t| t.state)
    }

    #[must_use]
    pub fn visited(&self, state: RecoveryState) -> bool {
        self.visits.get(&state).copied().unwrap_or(0) > 0
    }

    /// Allows one more pass through `Fetching` and `Classifying`.
    pub fn arm_retry(&mut self) {
        self.retry_armed = true;
    }

    /// Records entry into `state`. Returns `false`, recording nothing, when
    /// the move is not a legal edge or would revisit a state.
    pub fn enter(&mut self, state: RecoveryState, reason: impl Into<String>) -> bool {
        if let Some(current) = self.current() {
            if !current.can_enter(state) {
                return false;
            }
        } else if !matches!(
            state,
            RecoveryState::Fetching | RecoveryState::FallingBackToArchive | RecoveryState::Done
        ) {
            return false;
        }

        let visits = self.visits.get(&state).copied().unwrap_or(0);
        let retryable = matches!(state, RecoveryState::Fetching | RecoveryState::Classifying);
        let allowed = visits == 0 || (visits == 1 && retryable && self.retry_armed);
        if !allowed {
            return false;
        }
        if visits == 1 && state == RecoveryState::Classifying {
            self.retry_armed = false;
        }

        let reason = reason.into();
        tracing::info!(state = %state, reason = %reason, "recovery transition");
        self.visits.insert(state, visits + 1);
        self.entries.push(Transition {
            state,
            reason,
            elapsed: self.started.elapsed(),
        });
        true
    }

    #[must_use]
    pub fn entries(&self) -> &[Transition] {
        &self.entries
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<Transition> {
        self.entries
    }

    /// Reason codes in order, for audit and assertions.
    #[must_use]
    pub fn reasons(&self) -> Vec<&str> {
        self.entries.iter().map(|t| t.reason.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::RecoveryState::*;
    use super::*;

    #[test]
    fn happy_path() {
        let mut log = TransitionLog::new(Instant::now());
        assert!(log.enter(Fetching, "start"));
        assert!(log.enter(Classifying, "navigated"));
        assert!(log.enter(Done, "live_ok"));
        assert_eq!(log.reasons(), vec!["start", "navigated", "live_ok"]);
    }

    #[test]
    fn fetching_twice_needs_the_operator_retry() {
        let mut log = TransitionLog::new(Instant::now());
        assert!(log.enter(Fetching, "start"));
        assert!(log.enter(Classifying, "navigated"));
        assert!(log.enter(AwaitingOperator, "challenge_detected"));
        assert!(!log.enter(Fetching, "retry"), "retry not armed yet");

        log.arm_retry();
        assert!(log.enter(Fetching, "operator_unlocked"));
        assert!(log.enter(Classifying, "navigated"));
        assert!(!log.enter(AwaitingOperator, "challenge_detected"));
        assert!(log.enter(FallingBackToArchive, "challenge_detected"));
        assert!(log.enter(Done, "archive_fallback"));
    }

    #[test]
    fn no_third_pass_even_if_armed_again() {
        let mut log = TransitionLog::new(Instant::now());
        log.arm_retry();
        assert!(log.enter(Fetching, "start"));
        assert!(log.enter(Classifying, "navigated"));
        assert!(log.enter(AwaitingOperator, "auth_redirect"));
        assert!(log.enter(Fetching, "operator_unlocked"));
        assert!(log.enter(Classifying, "navigated"));
        log.arm_retry();
        assert!(!log.enter(Fetching, "again"));
    }

    #[test]
    fn illegal_edges_are_refused() {
        let mut log = TransitionLog::new(Instant::now());
        assert!(!log.enter(Classifying, "skip fetch"));
        assert!(log.enter(Fetching, "start"));
        assert!(!log.enter(AwaitingOperator, "too early"));
        assert!(log.enter(Done, "cancelled"));
        assert!(!log.enter(Done, "twice"));
    }

    #[test]
    fn done_reachable_from_any_state() {
        for state in [Fetching, FallingBackToArchive] {
            let mut log = TransitionLog::new(Instant::now());
            assert!(log.enter(state, "start"));
            assert!(log.enter(Done, "run_budget_exhausted"));
        }
    }
}
