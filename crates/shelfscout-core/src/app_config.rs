use std::path::PathBuf;
use std::time::Duration;

use crate::ProviderName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Settings for the rate-limited gateway, grouped so the scraper crate can
/// take them without depending on the whole `AppConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub user_agent: String,
    pub requests_per_sec: f64,
    pub burst: u32,
    pub request_timeout: Duration,
    pub default_budget: Duration,
    pub retry_sleep: Duration,
    pub respect_robots: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            requests_per_sec: 0.7,
            burst: 4,
            request_timeout: Duration::from_secs(20),
            default_budget: Duration::from_secs(120),
            retry_sleep: Duration::from_millis(300),
            respect_robots: true,
        }
    }
}

pub const DEFAULT_USER_AGENT: &str = "shelfscout/0.1 (+listing-monitor)";

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub log_level: String,
    pub sites_path: PathBuf,
    pub state_dir: PathBuf,
    pub gateway: GatewaySettings,
    pub archive_timeout: Duration,
    pub archive_delay: Duration,
    pub archive_priority: Vec<ProviderName>,
    pub operator_wait: Duration,
    pub max_concurrent_sites: usize,
    pub perma_api_key: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("sites_path", &self.sites_path)
            .field("state_dir", &self.state_dir)
            .field("gateway", &self.gateway)
            .field("archive_timeout", &self.archive_timeout)
            .field("archive_delay", &self.archive_delay)
            .field("archive_priority", &self.archive_priority)
            .field("operator_wait", &self.operator_wait)
            .field("max_concurrent_sites", &self.max_concurrent_sites)
            .field(
                "perma_api_key",
                &self.perma_api_key.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}
