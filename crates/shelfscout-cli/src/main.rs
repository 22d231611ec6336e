mod archive;
mod engine;
mod fetch;
mod policy;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "shelfscout")]
#[command(about = "Resilient listing retrieval with archive fallback")]
struct Cli {
    /// Site profiles file (overrides SHELFSCOUT_SITES_PATH)
    #[arg(long, global = true)]
    sites: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch one URL through the rate-limited gateway
    Fetch {
        url: String,
        /// Overall budget in seconds
        #[arg(long)]
        budget_secs: Option<u64>,
        /// Print the body after the fetch summary
        #[arg(long)]
        body: bool,
    },
    /// Measure archive snapshot coverage of a URL
    Stability {
        url: String,
        /// First year to count captures from
        #[arg(long, default_value_t = 2018)]
        since: i32,
    },
    /// Resolve a URL through the archive ladder
    Archive {
        url: String,
        /// Use the provider preference of this site profile
        #[arg(long)]
        site: Option<String>,
        /// Explicit provider order, comma-separated
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
        /// Per-provider timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Write the recovered content to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Harvest one or more configured sites
    Run {
        /// Site codes to harvest
        #[arg(id = "site", long = "site", required_unless_present = "all")]
        sites: Vec<String>,
        /// Harvest every configured site
        #[arg(long, conflicts_with = "site")]
        all: bool,
        /// Try the archives before any live navigation
        #[arg(long, conflicts_with = "live_only")]
        archive_first: bool,
        /// Never fall back to the archives
        #[arg(long)]
        live_only: bool,
        /// Hand blocked pages to an operator through the state directory
        #[arg(long)]
        operator: bool,
    },
    /// Show the stored selector policy of a site
    Policy { site: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut config = shelfscout_core::load_app_config_from_env()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    if let Some(sites) = cli.sites {
        config.sites_path = sites;
    }
    tracing::debug!(?config, "configuration loaded");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing current step");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Fetch {
            url,
            budget_secs,
            body,
        } => fetch::run_fetch(&config, &url, budget_secs, body).await,
        Commands::Stability { url, since } => archive::run_stability(&config, &url, since).await,
        Commands::Archive {
            url,
            site,
            providers,
            timeout_ms,
            out,
        } => {
            let options = archive::ArchiveOptions {
                site,
                providers,
                timeout_ms,
                out,
            };
            archive::run_archive(&config, &url, &options, &cancel).await
        }
        Commands::Run {
            sites,
            all,
            archive_first,
            live_only,
            operator,
        } => {
            let mode = run::mode_from_flags(archive_first, live_only);
            run::run_sites(&config, &sites, all, mode, operator, &cancel).await
        }
        Commands::Policy { site } => policy::run_policy(&config, &site).await,
    }
}
