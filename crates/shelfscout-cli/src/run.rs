//! `run`: harvest configured sites, several at a time.

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use shelfscout_core::{AppConfig, SiteProfile, SitesFile};
use shelfscout_recovery::{Harvest, Harvester, RunLog, RunMode};
use shelfscout_scraper::{HttpSession, JsonLdExtractor, MicrodataExtractor};
use tokio_util::sync::CancellationToken;

use crate::engine::{load_site_file, Engine};

pub(crate) fn mode_from_flags(archive_first: bool, live_only: bool) -> RunMode {
    if archive_first {
        RunMode::ArchiveFirst
    } else if live_only {
        RunMode::LiveOnly
    } else {
        RunMode::Live
    }
}

/// Resolves the requested codes against the sites file, in request order.
pub(crate) fn select_sites(
    file: &SitesFile,
    codes: &[String],
    all: bool,
) -> anyhow::Result<Vec<SiteProfile>> {
    if all {
        if file.sites.is_empty() {
            anyhow::bail!("no sites configured");
        }
        return Ok(file.sites.clone());
    }
    codes
        .iter()
        .map(|code| {
            file.find(code)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("site '{code}' not found"))
        })
        .collect()
}

pub(crate) async fn run_sites(
    config: &AppConfig,
    codes: &[String],
    all: bool,
    mode: RunMode,
    with_operator: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let sites = select_sites(&load_site_file(config)?, codes, all)?;
    let engine = Engine::new(config)?;
    let harvester = Harvester::new(
        Arc::new(engine.controller(config, with_operator)),
        Arc::new(JsonLdExtractor),
    )
    .with_challengers(vec![Arc::new(MicrodataExtractor)])
    .with_rescue(Arc::new(engine.rescue()))
    .with_policy(engine.policy())
    .with_snapshots(engine.snapshots());
    let run_log = RunLog::new(engine.state_dir());
    tracing::info!(run_id = %run_log.run_id(), sites = sites.len(), ?mode, "run started");

    let max_concurrent = config.max_concurrent_sites.max(1);
    let results: Vec<(&SiteProfile, Harvest, Option<PathBuf>)> = stream::iter(&sites)
        .map(|site| {
            let harvester = &harvester;
            let run_log = &run_log;
            let gateway = Arc::clone(&engine.gateway);
            async move {
                let started = chrono::Utc::now();
                let mut session = HttpSession::new(gateway);
                let harvest = harvester.harvest(site, &mut session, mode, cancel).await;
                let record = match run_log.write(&harvest, started).await {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::error!(site = %site.code, error = %e, "failed to write run record");
                        None
                    }
                };
                (site, harvest, record)
            }
        })
        .buffer_unordered(max_concurrent)
        .collect()
        .await;

    let mut empty_sites = 0;
    for (site, harvest, record) in &results {
        if harvest.outcome.content.is_none() {
            empty_sites += 1;
        }
        println!(
            "{:<16} {:<22} stale={:<5} items={:<4} pages={:<3} {}",
            site.code,
            harvest.outcome.reason.as_str(),
            harvest.outcome.stale,
            harvest.counts.unique,
            harvest.pages,
            record
                .as_ref()
                .map_or_else(String::new, |p| p.display().to_string()),
        );
    }

    if empty_sites == results.len() {
        anyhow::bail!("no content recovered for any of {empty_sites} sites");
    }
    if empty_sites > 0 {
        tracing::warn!(empty_sites, total_sites = results.len(), "some sites produced no content");
    }
    Ok(())
}
