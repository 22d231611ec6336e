//! `stability` and `archive` command handlers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use shelfscout_core::AppConfig;
use tokio_util::sync::CancellationToken;

use crate::engine::{site_or_adhoc, Engine};

pub(crate) async fn run_stability(config: &AppConfig, url: &str, since: i32) -> anyhow::Result<()> {
    let engine = Engine::new(config)?;
    let sample = engine.stability_sampler(config).sample(url, since).await;
    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}

#[derive(Debug, Default)]
pub(crate) struct ArchiveOptions {
    pub site: Option<String>,
    pub providers: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub out: Option<PathBuf>,
}

/// Walks the ladder for `url` and prints the attempt log.
///
/// # Errors
///
/// Returns an error when the site profile cannot be loaded, the content
/// cannot be written, or no provider produced content.
pub(crate) async fn run_archive(
    config: &AppConfig,
    url: &str,
    options: &ArchiveOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let engine = Engine::new(config)?;
    let site = site_or_adhoc(config, options.site.as_deref(), url)?;
    let order = (!options.providers.is_empty()).then_some(options.providers.as_slice());

    let outcome = engine
        .ladder
        .resolve(
            &site,
            url,
            order,
            options.timeout_ms.map(Duration::from_millis),
            cancel,
        )
        .await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let Some(failure) = outcome.final_failure() {
        anyhow::bail!("no archive produced content: {failure}");
    }
    if let (Some(path), Some(content)) = (options.out.as_ref(), outcome.content()) {
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("content written to {}", path.display());
    }
    Ok(())
}
