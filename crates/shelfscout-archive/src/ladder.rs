//! Ordered archive fallback.
//!
//! Providers are tried one at a time in the effective order until one yields
//! non-blank content. Attempts are separated by a fixed politeness delay and
//! are never run in parallel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use shelfscout_core::{AppConfig, FailureReason, OrderedSet, ProviderName, SiteProfile};
use tokio_util::sync::CancellationToken;

use crate::providers::ArchiveProvider;
use crate::types::{Attempt, FetchResult, LadderOutcome};

/// Grace on top of the per-provider timeout before the ladder gives up on it.
const PROVIDER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct LadderConfig {
    pub default_order: Vec<ProviderName>,
    pub timeout: Duration,
    pub delay: Duration,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            default_order: ProviderName::DEFAULT_ORDER.to_vec(),
            timeout: Duration::from_millis(5000),
            delay: Duration::from_millis(150),
        }
    }
}

impl LadderConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            default_order: config.archive_priority.clone(),
            timeout: config.archive_timeout,
            delay: config.archive_delay,
        }
    }
}

pub struct ArchiveLadder {
    providers: Vec<Arc<dyn ArchiveProvider>>,
    config: LadderConfig,
}

impl ArchiveLadder {
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn ArchiveProvider>>, config: LadderConfig) -> Self {
        Self { providers, config }
    }

    #[must_use]
    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    fn provider(&self, name: &str) -> Option<&Arc<dyn ArchiveProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Effective provider order for `site`, plus the requested names that were
    /// dropped because they are unknown or not registered.
    ///
    /// Explicit `order` wins over the site preference, which wins over the
    /// configured default. Duplicates keep their first position. When the site
    /// prefers archives, its preferred providers move to the front.
    #[must_use]
    pub fn effective_order(
        &self,
        site: &SiteProfile,
        order: Option<&[String]>,
    ) -> (Vec<String>, Vec<String>) {
        let requested: Vec<String> = match order {
            Some(names) if !names.is_empty() => names.to_vec(),
            _ if !site.archive_providers.is_empty() => site
                .archive_providers
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            _ => self
                .config
                .default_order
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
        };

        let mut names = OrderedSet::new();
        let mut rejected = Vec::new();
        for raw in requested {
            let known = ProviderName::parse(&raw)
                .map(ProviderName::as_str)
                .filter(|name| self.provider(name).is_some());
            match known {
                Some(name) => {
                    names.insert(name.to_string());
                }
                None => {
                    let reason = FailureReason::UnknownProvider(raw.trim().to_string());
                    tracing::warn!(site = %site.code, reason = %reason, "dropping archive provider");
                    rejected.push(raw);
                }
            }
        }

        if site.prefer_archive {
            let preferred: Vec<&str> = site.archive_providers.iter().map(|p| p.as_str()).collect();
            names = names.front_loaded(|name| preferred.contains(&name.as_str()));
        }

        (names.into_vec(), rejected)
    }

    /// Walks the ladder for `url` and returns the first usable result with the
    /// full attempt log.
    pub async fn resolve(
        &self,
        site: &SiteProfile,
        url: &str,
        order: Option<&[String]>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> LadderOutcome {
        let (names, rejected) = self.effective_order(site, order);
        let timeout = timeout.unwrap_or(self.config.timeout);
        let mut outcome = LadderOutcome {
            rejected,
            ..LadderOutcome::default()
        };

        for (index, name) in names.iter().enumerate() {
            if index > 0 && !self.config.delay.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(self.config.delay) => {}
                }
            }
            if cancel.is_cancelled() {
                tracing::info!(site = %site.code, "archive ladder cancelled");
                outcome.cancelled = true;
                break;
            }
            let Some(provider) = self.provider(name) else {
                continue;
            };

            let started = Instant::now();
            let result =
                match tokio::time::timeout(timeout + PROVIDER_GRACE, provider.fetch(url, timeout))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => FetchResult::failed(name, None, FailureReason::Timeout),
                };
            let elapsed = started.elapsed();

            match result.reason() {
                None => tracing::info!(site = %site.code, provider = %name, ?elapsed, "archive hit"),
                Some(reason) => {
                    tracing::debug!(site = %site.code, provider = %name, reason = %reason, "archive miss");
                }
            }

            let hit = result.is_ok();
            outcome.attempts.push(Attempt {
                result: result.clone(),
                elapsed,
            });
            if hit {
                outcome.best = Some(result);
                break;
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl ArchiveProvider for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn fetch(&self, _target: &str, _timeout: Duration) -> FetchResult {
            FetchResult::failed(self.0, Some(404), FailureReason::NoSnapshot)
        }
    }

    fn ladder(names: &[&'static str]) -> ArchiveLadder {
        let providers = names
            .iter()
            .map(|n| Arc::new(Named(n)) as Arc<dyn ArchiveProvider>)
            .collect();
        ArchiveLadder::new(providers, LadderConfig::default())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn default_order_restricted_to_registered() {
        let ladder = ladder(&["memento", "wayback"]);
        let site = SiteProfile::adhoc("x", "https://x.example/");
        let (order, rejected) = ladder.effective_order(&site, None);
        assert_eq!(order, names(&["wayback", "memento"]));
        assert_eq!(rejected, names(&["ghost", "arquivo", "ukwa", "archivetoday", "perma"]));
    }

    #[test]
    fn explicit_order_dedups_and_rejects_unknown() {
        let ladder = ladder(&["wayback", "ghost", "archivetoday"]);
        let site = SiteProfile::adhoc("x", "https://x.example/");
        let order = names(&["ghost", "bogus", "archive-today", "ghost", "wayback"]);
        let (effective, rejected) = ladder.effective_order(&site, Some(&order));
        assert_eq!(effective, names(&["ghost", "archivetoday", "wayback"]));
        assert_eq!(rejected, names(&["bogus"]));
    }

    #[test]
    fn site_preference_beats_default() {
        let ladder = ladder(&["wayback", "ghost", "memento"]);
        let mut site = SiteProfile::adhoc("x", "https://x.example/");
        site.archive_providers = vec![ProviderName::Memento, ProviderName::Wayback];
        let (order, _) = ladder.effective_order(&site, None);
        assert_eq!(order, names(&["memento", "wayback"]));
    }

    #[test]
    fn prefer_archive_moves_site_providers_to_front_of_override() {
        let ladder = ladder(&["wayback", "ghost", "memento", "ukwa"]);
        let mut site = SiteProfile::adhoc("x", "https://x.example/");
        site.archive_providers = vec![ProviderName::Ukwa, ProviderName::Ghost];
        site.prefer_archive = true;
        let order = names(&["wayback", "ghost", "memento", "ukwa"]);
        let (effective, _) = ladder.effective_order(&site, Some(&order));
        assert_eq!(effective, names(&["ghost", "ukwa", "wayback", "memento"]));
    }
}
