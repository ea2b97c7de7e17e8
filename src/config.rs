//! `RuntimeConfig`: the only values the core consumes from the environment (SPEC_FULL §6).
//!
//! No config-file format; configuration loading beyond these scalars is explicitly an external
//! concern (§1). `dotenvy` loads a local `.env` in development, mirroring how the teacher wires
//! environment-driven construction through an explicit struct rather than scattered
//! `std::env::var` calls at each call site.

use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub database_url: String,
    /// The queue is embedded in the Job Store's own table (SPEC_FULL §4.8's resolved open
    /// question); this connection string is kept distinct so a future standalone broker can be
    /// swapped in without touching the rest of the config surface.
    pub queue_url: String,
    pub worker_timeout: Duration,
    pub progress_throttle: Duration,
    pub heartbeat_interval: Duration,
    pub reaper_interval: Duration,
    pub stale_threshold: Duration,
    pub log_retention_days: u32,
    pub log_retention_count: u64,
    pub bind_addr: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let queue_url = std::env::var("QUEUE_URL").unwrap_or_else(|_| database_url.clone());

        let worker_timeout = Duration::from_secs(env_u64("WORKER_TIMEOUT_SECONDS", 30 * 60)?);
        let progress_throttle = Duration::from_millis(env_u64("PROGRESS_THROTTLE_MS", 500)?);
        let heartbeat_interval = Duration::from_secs(env_u64("HEARTBEAT_INTERVAL_SECONDS", 10)?);
        let reaper_interval = Duration::from_secs(env_u64("REAPER_INTERVAL_SECONDS", 60)?);
        let stale_threshold = Duration::from_secs(heartbeat_interval.as_secs().saturating_mul(
            env_u64("STALE_THRESHOLD_HEARTBEATS", 3)?,
        ));
        let log_retention_days = env_u64("LOG_RETENTION_DAYS", 30)? as u32;
        let log_retention_count = env_u64("LOG_RETENTION_COUNT", 100_000)?;
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        Ok(Self {
            database_url,
            queue_url,
            worker_timeout,
            progress_throttle,
            heartbeat_interval,
            reaper_interval,
            stale_threshold,
            log_retention_days,
            log_retention_count,
            bind_addr,
        })
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(v) => v.parse::<u64>().with_context(|| format!("{name} must be an integer")),
        Err(_) => Ok(default),
    }
}
