pub mod app_config;
pub mod config;
pub mod duration_ms;
pub mod items;
pub mod ordered_set;
pub mod providers;
pub mod reason;
pub mod sites;
pub mod urls;

pub use app_config::{AppConfig, Environment, GatewaySettings};
pub use config::{load_app_config, load_app_config_from_env};
pub use items::{dedupe, fingerprint, Item, ItemOrigin};
pub use ordered_set::OrderedSet;
pub use providers::ProviderName;
pub use reason::{ErrorClass, FailureReason};
pub use sites::{load_sites, CooldownWindows, PageWalk, SiteProfile, SitesFile, StoreSelection};
pub use urls::{clean_url, ensure_scheme, host_of, parent_urls};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read sites file {path}: {source}")]
    SitesFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse sites file: {0}")]
    SitesFileParse(#[from] serde_yaml::Error),

    #[error("sites config validation error: {0}")]
    Validation(String),
}
