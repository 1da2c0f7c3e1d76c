use std::env;

use anyhow::{Context, Result};

/// Process-level configuration (§C). Per-connector rate limits, the job
/// list, and indicator overrides are data rows, not process config; they
/// live in the `connectors`/`jobs` tables and are loaded through the
/// repositories instead of through environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub tick_interval_ms: u64,
    pub worker_pool_size: usize,
    pub fetch_timeout_secs: u64,
    pub lock_ttl_multiplier: u64,
    pub shutdown_drain_secs: u64,
    pub default_fetch_limit: u32,
    pub binance_base_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://candleward.db".to_string());

        let tick_interval_ms = env::var("TICK_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse::<u64>()
            .context("failed to parse TICK_INTERVAL_MS")?;

        let worker_pool_size = env::var("WORKER_POOL_SIZE")
            .unwrap_or_else(|_| "4".to_string())
            .parse::<usize>()
            .context("failed to parse WORKER_POOL_SIZE")?;

        let fetch_timeout_secs = env::var("FETCH_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("failed to parse FETCH_TIMEOUT_SECS")?;

        let lock_ttl_multiplier = env::var("LOCK_TTL_MULTIPLIER")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u64>()
            .context("failed to parse LOCK_TTL_MULTIPLIER")?;

        let shutdown_drain_secs = env::var("SHUTDOWN_DRAIN_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("failed to parse SHUTDOWN_DRAIN_SECS")?;

        let default_fetch_limit = env::var("DEFAULT_FETCH_LIMIT")
            .unwrap_or_else(|_| "500".to_string())
            .parse::<u32>()
            .context("failed to parse DEFAULT_FETCH_LIMIT")?;

        let binance_base_url = env::var("BINANCE_BASE_URL")
            .unwrap_or_else(|_| "https://api.binance.com".to_string());

        Ok(Self {
            database_url,
            tick_interval_ms,
            worker_pool_size,
            fetch_timeout_secs,
            lock_ttl_multiplier,
            shutdown_drain_secs,
            default_fetch_limit,
            binance_base_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        // SAFETY: test-only env mutation, single-threaded test in this module.
        unsafe {
            env::remove_var("TICK_INTERVAL_MS");
            env::remove_var("WORKER_POOL_SIZE");
        }
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.worker_pool_size, 4);
    }
}
