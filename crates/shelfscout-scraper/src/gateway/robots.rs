//! Per-origin robots.txt cache.
//!
//! Each origin's robots.txt is fetched at most once per gateway, even under
//! concurrent callers: the first caller initializes the origin's cell while
//! the others await it. Only answers the origin actually gave are cached; a
//! fetch that timed out or never connected allows that one request and is
//! tried again by the next caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use texting_robots::Robot;
use tokio::sync::OnceCell;

enum RobotsPolicy {
    AllowAll,
    DisallowAll,
    Rules(Box<Robot>),
}

impl RobotsPolicy {
    fn allows(&self, url: &str) -> bool {
        match self {
            Self::AllowAll => true,
            Self::DisallowAll => false,
            Self::Rules(robot) => robot.allowed(url),
        }
    }
}

/// robots.txt could not be fetched this time.
struct Unfetched;

pub(crate) struct RobotsCache {
    agent: String,
    entries: Mutex<HashMap<String, Arc<OnceCell<RobotsPolicy>>>>,
}

impl RobotsCache {
    /// `user_agent` is reduced to its product token (`shelfscout/0.1 (...)`
    /// matches `User-agent: shelfscout`).
    pub(crate) fn new(user_agent: &str) -> Self {
        let agent = user_agent
            .split(['/', ' '])
            .next()
            .filter(|token| !token.is_empty())
            .unwrap_or("*")
            .to_string();
        Self {
            agent,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn allowed(
        &self,
        client: &reqwest::Client,
        origin: &str,
        url: &str,
        timeout: Duration,
    ) -> bool {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(origin.to_string()).or_default())
        };

        match cell
            .get_or_try_init(|| self.load(client, origin, timeout))
            .await
        {
            Ok(policy) => policy.allows(url),
            Err(Unfetched) => true,
        }
    }

    async fn load(
        &self,
        client: &reqwest::Client,
        origin: &str,
        timeout: Duration,
    ) -> Result<RobotsPolicy, Unfetched> {
        let robots_url = format!("{origin}/robots.txt");
        let response = match client.get(&robots_url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(origin, error = %e, timed_out = e.is_timeout(), "robots.txt unreachable; allowing this request");
                return Err(Unfetched);
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            tracing::info!(origin, status = status.as_u16(), "robots.txt forbidden; disallowing origin");
            return Ok(RobotsPolicy::DisallowAll);
        }
        if !status.is_success() {
            tracing::debug!(origin, status = status.as_u16(), "no usable robots.txt; allowing");
            return Ok(RobotsPolicy::AllowAll);
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(origin, error = %e, "robots.txt body unreadable; allowing this request");
                return Err(Unfetched);
            }
        };

        Ok(match Robot::new(&self.agent, &body) {
            Ok(robot) => RobotsPolicy::Rules(Box::new(robot)),
            Err(e) => {
                tracing::warn!(origin, error = %e, "robots.txt did not parse; allowing");
                RobotsPolicy::AllowAll
            }
        })
    }
}
