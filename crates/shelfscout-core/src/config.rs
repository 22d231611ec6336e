use std::path::PathBuf;
use std::time::Duration;

use crate::app_config::{AppConfig, Environment, GatewaySettings, DEFAULT_USER_AGENT};
use crate::providers::parse_provider_list;
use crate::{ConfigError, ProviderName};

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Every variable has a default, so an empty environment yields a usable
/// development config.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        match or_default(var, default).to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(invalid(var, format!("expected a boolean, got '{other}'"))),
        }
    };

    let env = parse_environment(&or_default("SHELFSCOUT_ENV", "development"));
    let log_level = or_default("SHELFSCOUT_LOG_LEVEL", "info");
    let sites_path = PathBuf::from(or_default("SHELFSCOUT_SITES_PATH", "./config/sites.yaml"));
    let state_dir = PathBuf::from(or_default("SHELFSCOUT_STATE_DIR", "./state"));

    let requests_per_sec = or_default("SHELFSCOUT_GATEWAY_RPS", "0.7")
        .parse::<f64>()
        .map_err(|e| invalid("SHELFSCOUT_GATEWAY_RPS", e.to_string()))?;
    if !(requests_per_sec.is_finite() && requests_per_sec > 0.0) {
        return Err(invalid(
            "SHELFSCOUT_GATEWAY_RPS",
            "must be a positive number".to_string(),
        ));
    }

    let burst = parse_u32("SHELFSCOUT_GATEWAY_BURST", "4")?;
    if burst == 0 {
        return Err(invalid(
            "SHELFSCOUT_GATEWAY_BURST",
            "must be at least 1".to_string(),
        ));
    }

    let gateway = GatewaySettings {
        user_agent: or_default("SHELFSCOUT_USER_AGENT", DEFAULT_USER_AGENT),
        requests_per_sec,
        burst,
        request_timeout: Duration::from_secs(parse_u64(
            "SHELFSCOUT_GATEWAY_REQUEST_TIMEOUT_SECS",
            "20",
        )?),
        default_budget: Duration::from_secs(parse_u64("SHELFSCOUT_GATEWAY_BUDGET_SECS", "120")?),
        retry_sleep: Duration::from_millis(parse_u64("SHELFSCOUT_GATEWAY_RETRY_SLEEP_MS", "300")?),
        respect_robots: parse_bool("SHELFSCOUT_RESPECT_ROBOTS", "true")?,
    };

    let archive_timeout = Duration::from_millis(parse_u64("SHELFSCOUT_ARCHIVE_TIMEOUT_MS", "5000")?);
    let archive_delay = Duration::from_millis(parse_u64("SHELFSCOUT_ARCHIVE_DELAY_MS", "150")?);

    let archive_priority = match lookup("SHELFSCOUT_ARCHIVE_PRIORITY") {
        Ok(raw) => {
            let (known, unknown) = parse_provider_list(&raw);
            if !unknown.is_empty() {
                return Err(invalid(
                    "SHELFSCOUT_ARCHIVE_PRIORITY",
                    format!("unknown providers: {}", unknown.join(", ")),
                ));
            }
            if known.is_empty() {
                ProviderName::DEFAULT_ORDER.to_vec()
            } else {
                known
            }
        }
        Err(_) => ProviderName::DEFAULT_ORDER.to_vec(),
    };

    let operator_wait = Duration::from_secs(parse_u64("SHELFSCOUT_OPERATOR_WAIT_SECS", "900")?);
    let max_concurrent_sites = parse_usize("SHELFSCOUT_MAX_CONCURRENT_SITES", "1")?.max(1);
    let perma_api_key = lookup("PERMA_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty());

    Ok(AppConfig {
        env,
        log_level,
        sites_path,
        state_dir,
        gateway,
        archive_timeout,
        archive_delay,
        archive_priority,
        operator_wait,
        max_concurrent_sites,
        perma_api_key,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
