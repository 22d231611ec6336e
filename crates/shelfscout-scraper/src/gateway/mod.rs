//! Rate-limited, robots-aware HTTP fetch primitive.
//!
//! [`RateLimitedGateway::fetch`] never returns an error: every outcome is a
//! [`FetchMeta`] carrying a structured [`FailureReason`] when the fetch did
//! not succeed. Callers decide what to do with the body; the gateway only
//! decides whether to keep trying.

mod origin;
mod robots;

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Serialize;
use shelfscout_core::{ErrorClass, FailureReason, GatewaySettings};

use crate::error::ScraperError;
use crate::rate_limit::OriginLimiter;
use robots::RobotsCache;

pub use origin::extract_origin;
use origin::extract_domain;

/// Outcome details of one gateway call.
#[derive(Debug, Clone, Serialize)]
pub struct FetchMeta {
    pub url: String,
    pub ok: bool,
    pub status: Option<u16>,
    pub reason: Option<FailureReason>,
    #[serde(with = "shelfscout_core::duration_ms")]
    pub elapsed: Duration,
    pub attempts: u32,
}

/// Body plus meta. On failure the body is kept only when the origin answered
/// with a refusal page (403/429 and friends), since those pages carry the
/// challenge markers the blocker classifier looks for.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub body: Option<String>,
    pub meta: FetchMeta,
}

impl GatewayResponse {
    #[must_use]
    pub fn ok_body(&self) -> Option<&str> {
        if self.meta.ok {
            self.body.as_deref()
        } else {
            None
        }
    }
}

pub struct RateLimitedGateway {
    client: Client,
    limiter: OriginLimiter,
    robots: RobotsCache,
    settings: GatewaySettings,
}

impl RateLimitedGateway {
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidSettings`] for an unusable rate or burst,
    /// or [`ScraperError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(settings: GatewaySettings) -> Result<Self, ScraperError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&settings.user_agent)
            .build()?;
        let limiter = OriginLimiter::new(settings.requests_per_sec, settings.burst)?;
        let robots = RobotsCache::new(&settings.user_agent);
        Ok(Self {
            client,
            limiter,
            robots,
            settings,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Fetches `url` within `budget` using the configured default budget
    /// when the caller has none.
    pub async fn fetch_default(&self, url: &str) -> GatewayResponse {
        self.fetch(url, self.settings.default_budget).await
    }

    /// Fetches `url`, returning within `budget` plus at most one sleep
    /// increment.
    ///
    /// - robots.txt disallow: `robots_disallow`, no request to `url` is made.
    /// - 200: success.
    /// - 403 / 429: immediate stop.
    /// - 5xx and transport errors: retried until the budget runs out.
    /// - any other status: immediate stop with `http_<code>`.
    pub async fn fetch(&self, url: &str, budget: Duration) -> GatewayResponse {
        let started = Instant::now();
        let deadline = started + budget;

        let Some(origin) = extract_origin(url) else {
            return failure(
                url,
                None,
                FailureReason::HttpError(ErrorClass::Request),
                started,
                0,
                None,
            );
        };

        if self.settings.respect_robots {
            let robots_timeout = self.settings.request_timeout.min(budget);
            if !self
                .robots
                .allowed(&self.client, &origin, url, robots_timeout)
                .await
            {
                tracing::info!(url, origin, "robots.txt disallows fetch");
                return failure(url, None, FailureReason::RobotsDisallow, started, 0, None);
            }
        }

        let mut attempts = 0u32;
        let mut last_status: Option<u16> = None;
        let mut last_reason: Option<FailureReason> = None;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;

            if !self.limiter.try_acquire(&origin) {
                tokio::time::sleep(self.settings.retry_sleep.min(remaining)).await;
                continue;
            }

            attempts += 1;
            let request_timeout = self.settings.request_timeout.min(remaining);
            let request = self
                .client
                .get(url)
                .timeout(request_timeout)
                .header(
                    reqwest::header::ACCEPT,
                    "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
                )
                .header(reqwest::header::ACCEPT_LANGUAGE, "nl-NL,nl;q=0.9,en;q=0.8");

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    last_status = Some(status);

                    if status == 200 {
                        match response.text().await {
                            Ok(body) => {
                                tracing::debug!(url, attempts, "gateway fetch ok");
                                return GatewayResponse {
                                    body: Some(body),
                                    meta: FetchMeta {
                                        url: url.to_string(),
                                        ok: true,
                                        status: Some(status),
                                        reason: None,
                                        elapsed: started.elapsed(),
                                        attempts,
                                    },
                                };
                            }
                            Err(e) => {
                                last_reason = Some(FailureReason::HttpError(classify_error(&e)));
                            }
                        }
                    } else if (500..600).contains(&status) {
                        last_reason = Some(FailureReason::HttpStatus(status));
                    } else {
                        let reason = FailureReason::HttpStatus(status);
                        if reason.is_hard_stop() {
                            tracing::warn!(
                                domain = %extract_domain(url),
                                status,
                                "origin refused request; not retrying"
                            );
                        }
                        let body = response.text().await.ok();
                        return failure(url, Some(status), reason, started, attempts, body);
                    }
                }
                Err(e) => {
                    last_reason = Some(FailureReason::HttpError(classify_error(&e)));
                }
            }

            tracing::debug!(
                url,
                attempt = attempts,
                reason = ?last_reason,
                "gateway attempt failed; retrying within budget"
            );

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.settings.retry_sleep.min(remaining)).await;
        }

        let reason = last_reason.unwrap_or(FailureReason::BudgetExhausted);
        tracing::warn!(url, attempts, reason = %reason, "gateway budget exhausted");
        failure(url, last_status, reason, started, attempts, None)
    }
}

fn failure(
    url: &str,
    status: Option<u16>,
    reason: FailureReason,
    started: Instant,
    attempts: u32,
    body: Option<String>,
) -> GatewayResponse {
    GatewayResponse {
        body,
        meta: FetchMeta {
            url: url.to_string(),
            ok: false,
            status,
            reason: Some(reason),
            elapsed: started.elapsed(),
            attempts,
        },
    }
}

/// Maps a transport error to its coarse class.
#[must_use]
pub fn classify_error(err: &reqwest::Error) -> ErrorClass {
    if err.is_timeout() {
        ErrorClass::Timeout
    } else if err.is_connect() {
        ErrorClass::Connect
    } else if err.is_redirect() {
        ErrorClass::Redirect
    } else if err.is_decode() {
        ErrorClass::Decode
    } else if err.is_body() {
        ErrorClass::Body
    } else {
        ErrorClass::Request
    }
}
