//! Interactive session capability and the recovery helpers built on it.
//!
//! The engine never drives a browser directly. It talks to a [`Session`],
//! which may be a real automation backend or the plain-HTTP
//! [`crate::HttpSession`].

use std::time::Duration;

use async_trait::async_trait;
use shelfscout_core::{FailureReason, StoreSelection};

use crate::blocker::{contains_any_marker, RenderSignals, CHALLENGE_MARKERS, COOKIE_MARKERS};
use crate::error::ScraperError;
use crate::extract::{count_structured_products, Extractor};

/// Consent buttons by element id or attribute, most specific first.
pub const COOKIE_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll",
    "#CybotCookiebotDialogBodyButtonAccept",
    "button#didomi-notice-agree-button",
    "[data-test='accept-all']",
    ".cookie-accept, .consent-accept, .btn-accept",
    "button[class*='accept' i], a[class*='accept' i]",
];

/// Consent button labels (Dutch, French, English), longest first so
/// "Alles accepteren" is preferred over a bare "Accepteren".
pub const COOKIE_TEXTS: &[&str] = &[
    "Alles accepteren",
    "Alle cookies",
    "Ik ga akkoord",
    "Accepteren",
    "Akkoord",
    "Tout accepter",
    "Accepter",
    "J'accepte",
    "Accept all",
    "Accept",
    "Agree",
    "Allow all",
    "Allow",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitCondition {
    #[default]
    DomContentLoaded,
    Load,
    NetworkIdle,
}

/// Where a click is aimed: the top-level page or the n-th embedded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameScope {
    Page,
    Frame(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub final_url: String,
    pub status: Option<u16>,
    /// Set when the load did not succeed; the page may still hold a body
    /// worth classifying.
    pub reason: Option<FailureReason>,
}

#[async_trait]
pub trait Session: Send {
    /// # Errors
    ///
    /// Backend failures. An HTTP error page is not an error.
    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitCondition,
        timeout: Duration,
    ) -> Result<Navigation, ScraperError>;

    fn current_url(&self) -> Option<String>;

    /// # Errors
    ///
    /// [`ScraperError::NoPage`] before the first navigation, or backend failures.
    async fn content(&mut self) -> Result<String, ScraperError>;

    /// `true` if any pattern appears in the page or one of its frames.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn find_markers(&mut self, patterns: &[&str]) -> Result<bool, ScraperError>;

    /// # Errors
    ///
    /// Backend failures.
    async fn frame_count(&mut self) -> Result<usize, ScraperError> {
        Ok(0)
    }

    /// Clicks the first visible element matching `selector`. `Ok(false)` when
    /// nothing matched.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn click(&mut self, selector: &str, scope: FrameScope) -> Result<bool, ScraperError>;

    /// Clicks the first button or link whose label matches `text`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn click_text(&mut self, text: &str, scope: FrameScope) -> Result<bool, ScraperError>;

    /// Scrolls toward the end of the page so a lazy listing loads its next
    /// batch.
    ///
    /// # Errors
    ///
    /// [`ScraperError::Unsupported`] for backends without rendering.
    async fn scroll(&mut self) -> Result<(), ScraperError> {
        Err(ScraperError::Unsupported {
            operation: "scroll",
        })
    }

    /// # Errors
    ///
    /// [`ScraperError::Unsupported`] for backends without rendering.
    async fn screenshot(&mut self) -> Result<Vec<u8>, ScraperError>;

    async fn wait(&mut self, ms: u64);
}

/// Reads classifier signals from the current page.
///
/// A page whose content cannot be read yields zero counts, which the
/// classifier turns into `EmptyRender`.
pub async fn probe_signals(
    session: &mut dyn Session,
    extractor: &dyn Extractor,
    store_context_failed: bool,
    recent_unlock: bool,
) -> RenderSignals {
    let url = session.current_url().unwrap_or_default();

    let content = match session.content().await {
        Ok(content) => Some(content),
        Err(e) => {
            tracing::debug!(url, error = %e, "page content unavailable");
            None
        }
    };

    let challenge_markers = match session.find_markers(CHALLENGE_MARKERS).await {
        Ok(found) => found,
        Err(_) => content
            .as_deref()
            .is_some_and(|c| contains_any_marker(c, CHALLENGE_MARKERS)),
    };
    let cookie_markers = match session.find_markers(COOKIE_MARKERS).await {
        Ok(found) => found,
        Err(_) => content
            .as_deref()
            .is_some_and(|c| contains_any_marker(c, COOKIE_MARKERS)),
    };

    let (visible_items, structured_products) = content.as_deref().map_or((0, 0), |c| {
        (extractor.extract(c, &url).len(), count_structured_products(c))
    });

    RenderSignals {
        url,
        has_content: content.as_deref().is_some_and(|c| !c.trim().is_empty()),
        visible_items,
        structured_products,
        challenge_markers,
        cookie_markers,
        store_context_failed,
        recent_unlock,
    }
}

/// Tries every consent strategy in order: selectors on the page, button text
/// on the page, then the same two for each embedded frame. Stops at the first
/// click and returns a label for the strategy that worked.
pub async fn dismiss_cookies(session: &mut dyn Session) -> Option<String> {
    if let Some(hit) = try_scope(session, FrameScope::Page).await {
        return Some(hit);
    }

    let frames = session.frame_count().await.unwrap_or(0);
    for idx in 0..frames {
        if let Some(hit) = try_scope(session, FrameScope::Frame(idx)).await {
            return Some(hit);
        }
    }
    None
}

async fn try_scope(session: &mut dyn Session, scope: FrameScope) -> Option<String> {
    for selector in COOKIE_SELECTORS {
        match session.click(selector, scope).await {
            Ok(true) => return Some(format!("selector:{selector}@{scope:?}")),
            Ok(false) => {}
            Err(e) => tracing::debug!(selector, error = %e, "consent click failed"),
        }
    }
    for text in COOKIE_TEXTS {
        match session.click_text(text, scope).await {
            Ok(true) => return Some(format!("text:{text}@{scope:?}")),
            Ok(false) => {}
            Err(e) => tracing::debug!(text, error = %e, "consent click failed"),
        }
    }
    None
}

/// Opens the store picker, chooses `store.name` and confirms. Returns `true`
/// only if every configured step clicked something.
pub async fn select_store(session: &mut dyn Session, store: &StoreSelection) -> bool {
    if let Some(open) = store.open_selector.as_deref() {
        if !matches!(session.click(open, FrameScope::Page).await, Ok(true)) {
            tracing::info!(selector = open, "store picker not found");
            return false;
        }
        session.wait(800).await;
    }

    if !matches!(
        session.click_text(&store.name, FrameScope::Page).await,
        Ok(true)
    ) {
        tracing::info!(store = %store.name, "store entry not found in picker");
        return false;
    }

    if let Some(confirm) = store.confirm_selector.as_deref() {
        if !matches!(session.click(confirm, FrameScope::Page).await, Ok(true)) {
            tracing::info!(selector = confirm, "store confirm button not found");
            return false;
        }
    }
    session.wait(1000).await;
    true
}
