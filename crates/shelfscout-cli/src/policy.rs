use shelfscout_core::AppConfig;

use crate::engine::Engine;

/// Prints the stored selector policy document for `site`.
pub(crate) async fn run_policy(config: &AppConfig, site: &str) -> anyhow::Result<()> {
    let engine = Engine::new(config)?;
    match engine.policy().document(site).await? {
        Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
        None => println!("no selector policy recorded for '{site}'; baseline is active"),
    }
    Ok(())
}
