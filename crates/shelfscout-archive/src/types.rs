use std::time::Duration;

use serde::Serialize;
use shelfscout_core::FailureReason;

/// Outcome of one provider call: usable content or a structured failure.
///
/// `Ok` always carries non-blank content; [`FetchResult::ok`] turns a blank
/// body into `Failed(empty_body)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchResult {
    Ok {
        #[serde(skip)]
        content: String,
        origin_url: String,
        provider: String,
    },
    Failed {
        provider: String,
        status: Option<u16>,
        reason: FailureReason,
    },
}

impl FetchResult {
    #[must_use]
    pub fn ok(provider: &str, origin_url: &str, content: String) -> Self {
        if content.trim().is_empty() {
            return Self::failed(provider, Some(200), FailureReason::EmptyBody);
        }
        Self::Ok {
            content,
            origin_url: origin_url.to_string(),
            provider: provider.to_string(),
        }
    }

    #[must_use]
    pub fn failed(provider: &str, status: Option<u16>, reason: FailureReason) -> Self {
        Self::Failed {
            provider: provider.to_string(),
            status,
            reason,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Ok { provider, .. } | Self::Failed { provider, .. } => provider,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Ok { content, .. } => Some(content),
            Self::Failed { .. } => None,
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            Self::Ok { .. } => None,
            Self::Failed { reason, .. } => Some(reason),
        }
    }
}

/// One provider call as recorded by the ladder.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub result: FetchResult,
    #[serde(with = "shelfscout_core::duration_ms")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LadderOutcome {
    /// First successful result, if any.
    #[serde(skip)]
    pub best: Option<FetchResult>,
    pub attempts: Vec<Attempt>,
    /// Names dropped from the requested order because no such provider exists.
    pub rejected: Vec<String>,
    pub cancelled: bool,
}

impl LadderOutcome {
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.best.as_ref().and_then(FetchResult::content)
    }

    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        self.best.as_ref().map(FetchResult::provider)
    }

    #[must_use]
    pub fn attempted_providers(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.result.provider()).collect()
    }

    /// Why the ladder produced nothing. `None` on success.
    #[must_use]
    pub fn final_failure(&self) -> Option<FailureReason> {
        if self.best.is_some() {
            return None;
        }
        if self.cancelled {
            return Some(FailureReason::Cancelled);
        }
        match self.attempts.last().and_then(|a| a.result.reason()) {
            Some(last) => Some(FailureReason::AllFailed {
                last: Box::new(last.clone()),
            }),
            None => Some(FailureReason::NoProviders),
        }
    }
}
