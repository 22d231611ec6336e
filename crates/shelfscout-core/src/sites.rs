//! Site profiles loaded from `config/sites.yaml`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, ProviderName};

fn default_max_pages() -> usize {
    20
}

fn default_run_budget_secs() -> u64 {
    300
}

/// Recovery cooldown windows, in hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownWindows {
    pub prewarm_hours: u64,
    pub unlock_hours: u64,
    pub store_hours: u64,
}

impl Default for CooldownWindows {
    fn default() -> Self {
        Self {
            prewarm_hours: 6,
            unlock_hours: 12,
            store_hours: 24 * 30,
        }
    }
}

impl CooldownWindows {
    #[must_use]
    pub fn prewarm(&self) -> Duration {
        hours(self.prewarm_hours)
    }

    #[must_use]
    pub fn unlock(&self) -> Duration {
        hours(self.unlock_hours)
    }

    #[must_use]
    pub fn store(&self) -> Duration {
        hours(self.store_hours)
    }
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(3600))
}

/// How successive listing pages are addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageWalk {
    /// The target URL is the whole listing.
    #[default]
    Single,
    /// `?<param>=<n>` starting at `start`, optionally with extra fixed query pairs.
    PageParam {
        param: String,
        #[serde(default = "one")]
        start: u32,
        #[serde(default)]
        extra: Vec<(String, String)>,
    },
    /// `?<param>=<page * page_size>`.
    Offset {
        param: String,
        page_size: u32,
        #[serde(default)]
        extra: Vec<(String, String)>,
    },
    /// Infinite scroll on the target page: scroll, re-read, repeat.
    Scroll {
        #[serde(default = "default_walk_rounds")]
        max_rounds: u32,
    },
    /// A "load more" control on the target page, clicked up to `max_clicks` times.
    LoadMore {
        selector: String,
        #[serde(default = "default_walk_rounds")]
        max_clicks: u32,
    },
}

impl PageWalk {
    /// Walks that grow the already loaded page instead of loading new URLs.
    #[must_use]
    pub fn is_in_place(&self) -> bool {
        matches!(self, Self::Scroll { .. } | Self::LoadMore { .. })
    }
}

fn one() -> u32 {
    1
}

fn default_walk_rounds() -> u32 {
    10
}

/// Store-context selection for retailers that only show a listing after a
/// physical store is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSelection {
    /// Visible store name typed or clicked in the picker.
    pub name: String,
    pub open_selector: Option<String>,
    pub confirm_selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub code: String,
    pub name: Option<String>,
    pub target_url: String,
    /// Landing page visited to warm cookies before the listing.
    pub home_url: Option<String>,
    #[serde(default)]
    pub archive_providers: Vec<ProviderName>,
    #[serde(default)]
    pub prefer_archive: bool,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_run_budget_secs")]
    pub run_budget_secs: u64,
    #[serde(default)]
    pub cooldowns: CooldownWindows,
    #[serde(default)]
    pub page_walk: PageWalk,
    pub store: Option<StoreSelection>,
}

impl SiteProfile {
    /// Minimal profile for ad-hoc runs against a single URL.
    #[must_use]
    pub fn adhoc(code: &str, target_url: &str) -> Self {
        Self {
            code: code.to_string(),
            name: None,
            target_url: target_url.to_string(),
            home_url: None,
            archive_providers: Vec::new(),
            prefer_archive: false,
            max_pages: default_max_pages(),
            run_budget_secs: default_run_budget_secs(),
            cooldowns: CooldownWindows::default(),
            page_walk: PageWalk::Single,
            store: None,
        }
    }

    #[must_use]
    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.code)
    }
}

#[derive(Debug, Deserialize)]
pub struct SitesFile {
    pub sites: Vec<SiteProfile>,
}

impl SitesFile {
    #[must_use]
    pub fn find(&self, code: &str) -> Option<&SiteProfile> {
        self.sites
            .iter()
            .find(|site| site.code.eq_ignore_ascii_case(code))
    }
}

/// Load and validate site profiles from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_sites(path: &Path) -> Result<SitesFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SitesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let sites_file: SitesFile =
        serde_yaml::from_str(&content).map_err(ConfigError::SitesFileParse)?;

    validate_sites(&sites_file)?;

    Ok(sites_file)
}

fn validate_sites(sites_file: &SitesFile) -> Result<(), ConfigError> {
    let mut seen_codes = HashSet::new();

    for site in &sites_file.sites {
        if site.code.trim().is_empty() {
            return Err(ConfigError::Validation(
                "site code must be non-empty".to_string(),
            ));
        }

        if !site
            .code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Validation(format!(
                "site code '{}' may only contain ASCII letters, digits, '-' and '_'",
                site.code
            )));
        }

        if !seen_codes.insert(site.code.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site code: '{}'",
                site.code
            )));
        }

        for (field, raw) in [
            ("target_url", Some(site.target_url.as_str())),
            ("home_url", site.home_url.as_deref()),
        ] {
            if let Some(raw) = raw {
                url::Url::parse(raw).map_err(|e| {
                    ConfigError::Validation(format!(
                        "site '{}' has invalid {field} '{raw}': {e}",
                        site.code
                    ))
                })?;
            }
        }

        if site.max_pages == 0 {
            return Err(ConfigError::Validation(format!(
                "site '{}' has max_pages 0; must be at least 1",
                site.code
            )));
        }

        if site.run_budget_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "site '{}' has run_budget_secs 0; must be positive",
                site.code
            )));
        }

        match &site.page_walk {
            PageWalk::Offset { page_size: 0, .. } => {
                return Err(ConfigError::Validation(format!(
                    "site '{}' uses offset paging with page_size 0",
                    site.code
                )));
            }
            PageWalk::LoadMore { selector, .. } if selector.trim().is_empty() => {
                return Err(ConfigError::Validation(format!(
                    "site '{}' uses load_more paging without a selector",
                    site.code
                )));
            }
            _ => {}
        }

        if site.prefer_archive && site.archive_providers.is_empty() {
            return Err(ConfigError::Validation(format!(
                "site '{}' sets prefer_archive but lists no archive_providers",
                site.code
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "sites_test.rs"]
mod tests;
