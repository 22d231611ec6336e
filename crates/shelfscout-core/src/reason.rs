//! Structured failure reasons shared by the gateway, the archive ladder and
//! the recovery controller.
//!
//! Every failure that leaves a component boundary is one of these codes. Raw
//! error messages stay in logs; callers only ever see the code.

use serde::{Serialize, Serializer};

/// Coarse transport error classes, recorded as `http_error:<class>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Timeout,
    Connect,
    Body,
    Decode,
    Redirect,
    Request,
}

impl ErrorClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Body => "body",
            Self::Decode => "decode",
            Self::Redirect => "redirect",
            Self::Request => "request",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// robots.txt forbids the path; the network was never touched.
    RobotsDisallow,
    UnknownProvider(String),
    /// Non-success HTTP status. 403 and 429 are hard stops.
    HttpStatus(u16),
    HttpError(ErrorClass),
    BudgetExhausted,
    Timeout,
    NoSnapshot,
    EmptyBody,
    DecodeError,
    NotConfigured,
    NotImplemented,
    Cancelled,
    NoProviders,
    AllFailed { last: Box<FailureReason> },
}

impl FailureReason {
    /// 403/429: the origin is actively refusing us, so retrying would only
    /// amplify the block.
    #[must_use]
    pub fn is_hard_stop(&self) -> bool {
        matches!(self, Self::HttpStatus(403 | 429))
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpStatus(code) => (500..600).contains(code),
            Self::HttpError(_) | Self::Timeout => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            Self::RobotsDisallow | Self::UnknownProvider(_) | Self::NotConfigured
        )
    }

    #[must_use]
    pub fn code(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RobotsDisallow => f.write_str("robots_disallow"),
            Self::UnknownProvider(name) => write!(f, "unknown_provider:{name}"),
            Self::HttpStatus(code) => write!(f, "http_{code}"),
            Self::HttpError(class) => write!(f, "http_error:{}", class.as_str()),
            Self::BudgetExhausted => f.write_str("budget_exhausted"),
            Self::Timeout => f.write_str("timeout"),
            Self::NoSnapshot => f.write_str("no_snapshot"),
            Self::EmptyBody => f.write_str("empty_body"),
            Self::DecodeError => f.write_str("decode_error"),
            Self::NotConfigured => f.write_str("not_configured"),
            Self::NotImplemented => f.write_str("not_implemented"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::NoProviders => f.write_str("no_providers"),
            Self::AllFailed { last } => write!(f, "all_failed; last={last}"),
        }
    }
}

impl Serialize for FailureReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
