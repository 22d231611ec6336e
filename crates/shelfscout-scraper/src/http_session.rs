//! [`Session`] over the plain gateway: no script execution, no clicks.
//!
//! Enough to run the whole recovery engine against static listings and
//! archive snapshots. Consent dismissal and store selection always report
//! "nothing clicked", so those recovery stages fall through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::blocker::contains_any_marker;
use crate::error::ScraperError;
use crate::gateway::RateLimitedGateway;
use crate::session::{FrameScope, Navigation, Session, WaitCondition};

pub struct HttpSession {
    gateway: Arc<RateLimitedGateway>,
    url: Option<String>,
    body: Option<String>,
}

impl HttpSession {
    #[must_use]
    pub fn new(gateway: Arc<RateLimitedGateway>) -> Self {
        Self {
            gateway,
            url: None,
            body: None,
        }
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn navigate(
        &mut self,
        url: &str,
        _wait: WaitCondition,
        timeout: Duration,
    ) -> Result<Navigation, ScraperError> {
        let response = self.gateway.fetch(url, timeout).await;
        self.url = Some(url.to_string());
        self.body = response.body;
        Ok(Navigation {
            final_url: url.to_string(),
            status: response.meta.status,
            reason: response.meta.reason,
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
            .is_some_and(|body| contains_any_marker(body, patterns)))
    }

    async fn click(&mut self, _selector: &str, _scope: FrameScope) -> Result<bool, ScraperError> {
        Ok(false)
    }

    async fn click_text(&mut self, _text: &str, _scope: FrameScope) -> Result<bool, ScraperError> {
        Ok(false)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, ScraperError> {
        Err(ScraperError::Unsupported {
            operation: "screenshot",
        })
    }

    async fn wait(&mut self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
