//! Wiring of the engine components from `AppConfig`.
//!
//! State directory layout: `cooldowns/`, `policy/`, `snapshots/`,
//! `operator/` and `runs/` under `SHELFSCOUT_STATE_DIR`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use shelfscout_archive::{
    build_providers, ArchiveLadder, ArquivoCdx, CdxIndex, LadderConfig, PdpRescue,
    ProviderEndpoints, RescueConfig, StabilitySampler, WaybackCdx,
};
use shelfscout_core::{ensure_scheme, host_of, load_sites, AppConfig, SiteProfile, SitesFile};
use shelfscout_recovery::{
    Clock, ControllerSettings, CooldownStore, FileCooldownStore, FilePolicyStore,
    FileSignalUnlock, FileSnapshotStore, PolicyStore, QualityGates, RecoveryController,
    SelectorPolicy, SiteLocks, SnapshotStore, SystemClock,
};
use shelfscout_scraper::RateLimitedGateway;

pub(crate) struct Engine {
    pub gateway: Arc<RateLimitedGateway>,
    pub endpoints: ProviderEndpoints,
    pub ladder: Arc<ArchiveLadder>,
    locks: SiteLocks,
    state_dir: PathBuf,
}

impl Engine {
    pub(crate) fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let gateway = Arc::new(
            RateLimitedGateway::new(config.gateway.clone())
                .context("failed to build the HTTP gateway")?,
        );
        let endpoints = ProviderEndpoints::default();
        let providers = build_providers(&gateway, &endpoints, config.perma_api_key.clone());
        let ladder = Arc::new(ArchiveLadder::new(
            providers,
            LadderConfig::from_app_config(config),
        ));

        Ok(Self {
            gateway,
            endpoints,
            ladder,
            locks: SiteLocks::new(),
            state_dir: config.state_dir.clone(),
        })
    }

    pub(crate) fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub(crate) fn policy(&self) -> Arc<SelectorPolicy> {
        Arc::new(SelectorPolicy::new(
            Arc::new(FilePolicyStore::new(self.state_dir.join("policy"))) as Arc<dyn PolicyStore>,
            self.locks.clone(),
            QualityGates::default(),
        ))
    }

    pub(crate) fn snapshots(&self) -> Arc<dyn SnapshotStore> {
        Arc::new(FileSnapshotStore::new(
            self.state_dir.join("snapshots"),
            self.locks.clone(),
        ))
    }

    pub(crate) fn controller(&self, config: &AppConfig, with_operator: bool) -> RecoveryController {
        let cooldowns = FileCooldownStore::new(self.state_dir.join("cooldowns"), self.locks.clone());
        let controller = RecoveryController::new(
            Arc::clone(&self.ladder),
            Arc::new(cooldowns) as Arc<dyn CooldownStore>,
            Arc::new(SystemClock) as Arc<dyn Clock>,
            ControllerSettings::from_app_config(config),
        );
        if with_operator {
            let dir = self.state_dir.join("operator");
            tracing::info!(dir = %dir.display(), "operator hand-off enabled");
            controller.with_operator(Arc::new(FileSignalUnlock::new(dir)))
        } else {
            controller
        }
    }

    pub(crate) fn rescue(&self) -> PdpRescue {
        PdpRescue::new(
            Arc::clone(&self.gateway),
            &self.endpoints.wayback_web,
            RescueConfig::default(),
        )
    }

    pub(crate) fn stability_sampler(&self, config: &AppConfig) -> StabilitySampler {
        let timeout = config.gateway.default_budget;
        let indexes: Vec<Arc<dyn CdxIndex>> = vec![
            Arc::new(WaybackCdx::new(
                Arc::clone(&self.gateway),
                &self.endpoints.wayback_web,
                timeout,
            )),
            Arc::new(ArquivoCdx::new(
                Arc::clone(&self.gateway),
                &self.endpoints.arquivo,
                timeout,
            )),
        ];
        StabilitySampler::new(indexes)
    }
}

pub(crate) fn load_site_file(config: &AppConfig) -> anyhow::Result<SitesFile> {
    load_sites(&config.sites_path)
        .with_context(|| format!("failed to load {}", config.sites_path.display()))
}

/// The named profile, or an ad-hoc one for `url` when no code is given.
pub(crate) fn site_or_adhoc(
    config: &AppConfig,
    code: Option<&str>,
    url: &str,
) -> anyhow::Result<SiteProfile> {
    let Some(code) = code else {
        return Ok(SiteProfile::adhoc(&adhoc_code(url), url));
    };
    let sites = load_site_file(config)?;
    let mut site = sites
        .find(code)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("site '{code}' not found in {}", config.sites_path.display()))?;
    site.target_url = url.to_string();
    Ok(site)
}

/// Site code for an unlisted URL: its host with anything outside
/// `[A-Za-z0-9_-]` replaced by `_`, so per-site state never collides
/// across hosts.
pub(crate) fn adhoc_code(url: &str) -> String {
    host_of(&ensure_scheme(url))
        .filter(|host| !host.is_empty())
        .map_or_else(
            || "adhoc".to_string(),
            |host| {
                host.chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                            c
                        } else {
                            '_'
                        }
                    })
                    .collect()
            },
        )
}
