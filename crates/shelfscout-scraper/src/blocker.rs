//! Classification of unusable page loads.
//!
//! [`classify`] is a pure function over [`RenderSignals`]; gathering the
//! signals from a live session is [`crate::session::probe_signals`].

use serde::{Deserialize, Serialize};

/// URL fragments that mean we were bounced to a login or identity provider.
pub const AUTH_URL_NEEDLES: &[&str] = &["/login", "/signin", "/identity", "auth."];

/// Text and markup left behind by bot challenges.
pub const CHALLENGE_MARKERS: &[&str] = &[
    "checking your browser",
    "verify you are human",
    "attention required! | cloudflare",
    "/cdn-cgi/challenge-platform/",
    "challenges.cloudflare.com",
    "cf-chl-",
    "just a moment...",
];

/// Consent banner markers: known CMP element ids and common button text.
pub const COOKIE_MARKERS: &[&str] = &[
    "onetrust-accept-btn-handler",
    "onetrust-banner-sdk",
    "cybotcookiebotdialog",
    "didomi-notice",
    "alles accepteren",
    "alle cookies accepteren",
    "tout accepter",
    "accept all cookies",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerKind {
    None,
    AuthRedirect,
    ChallengeDetected,
    CookieWall,
    EmptyRender,
    StoreContextFailed,
}

impl BlockerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AuthRedirect => "auth_redirect",
            Self::ChallengeDetected => "challenge_detected",
            Self::CookieWall => "cookie_wall",
            Self::EmptyRender => "empty_render",
            Self::StoreContextFailed => "store_context_failed",
        }
    }
}

impl std::fmt::Display for BlockerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the classifier is allowed to look at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSignals {
    pub url: String,
    /// `false` when the content itself could not be read.
    pub has_content: bool,
    pub visible_items: usize,
    pub structured_products: usize,
    pub challenge_markers: bool,
    pub cookie_markers: bool,
    pub store_context_failed: bool,
    /// Carried for diagnostics; does not affect the verdict.
    pub recent_unlock: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierThresholds {
    pub min_visible_items: usize,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            min_visible_items: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockerVerdict {
    pub kind: BlockerKind,
    pub visible_items: usize,
    pub structured_products: usize,
}

impl BlockerVerdict {
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.kind == BlockerKind::None
    }
}

/// Returns the single verdict for `signals`. First match wins:
/// auth redirect, challenge, cookie wall, store context, empty render.
#[must_use]
pub fn classify(signals: &RenderSignals, thresholds: &ClassifierThresholds) -> BlockerVerdict {
    let kind = if is_auth_redirect(&signals.url) {
        BlockerKind::AuthRedirect
    } else if signals.challenge_markers {
        BlockerKind::ChallengeDetected
    } else if signals.cookie_markers
        && signals.visible_items == 0
        && signals.structured_products == 0
    {
        BlockerKind::CookieWall
    } else if signals.store_context_failed {
        BlockerKind::StoreContextFailed
    } else if !signals.has_content
        || (signals.visible_items < thresholds.min_visible_items
            && signals.structured_products == 0)
    {
        BlockerKind::EmptyRender
    } else {
        BlockerKind::None
    };

    BlockerVerdict {
        kind,
        visible_items: signals.visible_items,
        structured_products: signals.structured_products,
    }
}

#[must_use]
pub fn is_auth_redirect(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    AUTH_URL_NEEDLES.iter().any(|needle| lowered.contains(needle))
}

/// Case-insensitive marker scan over raw markup.
#[must_use]
pub fn contains_any_marker(body: &str, markers: &[&str]) -> bool {
    let lowered = body.to_lowercase();
    markers
        .iter()
        .any(|marker| lowered.contains(&marker.to_lowercase()))
}
