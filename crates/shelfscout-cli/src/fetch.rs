//! `fetch`: one gateway call, printed as its meta record.

use std::time::Duration;

use shelfscout_core::AppConfig;
use shelfscout_scraper::RateLimitedGateway;

pub(crate) async fn run_fetch(
    config: &AppConfig,
    url: &str,
    budget_secs: Option<u64>,
    print_body: bool,
) -> anyhow::Result<()> {
    let gateway = RateLimitedGateway::new(config.gateway.clone())?;
    let budget = budget_secs.map_or(config.gateway.default_budget, Duration::from_secs);

    let response = gateway.fetch(url, budget).await;
    println!("{}", serde_json::to_string_pretty(&response.meta)?);
    let bytes = response.body.as_deref().map_or(0, str::len);
    println!("body: {bytes} bytes");
    if print_body {
        if let Some(body) = response.body {
            println!("{body}");
        }
    }

    if !response.meta.ok {
        anyhow::bail!(
            "fetch failed: {}",
            response
                .meta
                .reason
                .map_or_else(|| "unknown".to_string(), |r| r.code())
        );
    }
    Ok(())
}
