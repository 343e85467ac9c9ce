use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::{env, sync::Arc, time::Duration};

use crate::{Bucket, Daemon, Flags};

/// Settings for one bucket and the daemon driving it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub designation: String,
    pub capacity: u64,
    pub rate: u64,
    pub rate_duration_ms: u64,
    pub refill_interval_ms: Option<u64>,
    pub initial_tokens: Option<u64>,
    pub retryable: bool,
    pub forgiving: bool,
    pub retry_window_ms: u64,
    pub enable_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            designation: "default".to_string(),
            capacity: 10,
            rate: 1,
            rate_duration_ms: 1000,
            refill_interval_ms: None,
            initial_tokens: None,
            retryable: false,
            forgiving: false,
            retry_window_ms: 5000,
            enable_metrics: false,
        }
    }
}

static CONFIG: OnceCell<Config> = OnceCell::new();

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) if !v.is_empty() => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid {key}={v:?}: {e}")),
        _ => Ok(None),
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl Config {
    /// Read `TOKENBUCKET_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        let designation = env::var("TOKENBUCKET_DESIGNATION")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.designation);
        let capacity = env_parse("TOKENBUCKET_CAPACITY")?.unwrap_or(defaults.capacity);
        let rate = env_parse("TOKENBUCKET_RATE")?.unwrap_or(defaults.rate);
        let rate_duration_ms =
            env_parse("TOKENBUCKET_RATE_DURATION_MS")?.unwrap_or(defaults.rate_duration_ms);
        let refill_interval_ms = env_parse("TOKENBUCKET_REFILL_INTERVAL_MS")?;
        let initial_tokens = env_parse("TOKENBUCKET_INITIAL_TOKENS")?;
        let retryable = env_flag("TOKENBUCKET_RETRYABLE").unwrap_or(defaults.retryable);
        let forgiving = env_flag("TOKENBUCKET_FORGIVING").unwrap_or(defaults.forgiving);
        let retry_window_ms =
            env_parse("TOKENBUCKET_RETRY_WINDOW_MS")?.unwrap_or(defaults.retry_window_ms);
        let enable_metrics =
            env_flag("TOKENBUCKET_ENABLE_METRICS").unwrap_or(defaults.enable_metrics);

        Ok(Config {
            designation,
            capacity,
            rate,
            rate_duration_ms,
            refill_interval_ms,
            initial_tokens,
            retryable,
            forgiving,
            retry_window_ms,
            enable_metrics,
        })
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing tokenbucket config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.designation.trim().is_empty() {
            return Err(anyhow!("designation cannot be empty"));
        }
        if self.capacity == 0 {
            return Err(anyhow!("capacity must be greater than zero"));
        }
        if self.rate == 0 || self.rate_duration_ms == 0 {
            return Err(anyhow!("rate values must be greater than zero"));
        }
        if self.refill_interval_ms == Some(0) {
            return Err(anyhow!("refill_interval_ms must be greater than zero"));
        }
        if self.retry_window_ms == 0 {
            return Err(anyhow!("retry_window_ms must be greater than zero"));
        }
        if matches!(self.initial_tokens, Some(n) if n > self.capacity) {
            return Err(anyhow!("initial_tokens cannot exceed capacity"));
        }
        Ok(())
    }

    pub fn flags(&self) -> Flags {
        let mut flags = Flags::NONE;
        if self.retryable {
            flags |= Flags::RETRYABLE;
        }
        if self.forgiving {
            flags |= Flags::FORGIVING;
        }
        flags
    }

    pub fn build_bucket(&self) -> Bucket {
        let bucket = Bucket::new(
            self.designation.clone(),
            self.capacity,
            self.rate,
            Duration::from_millis(self.rate_duration_ms),
        );
        match self.initial_tokens {
            Some(tokens) => bucket.with_tokens(tokens),
            None => bucket,
        }
    }

    /// Build a stopped daemon over a fresh bucket.
    pub fn build_daemon(&self) -> Daemon {
        let bucket = Arc::new(self.build_bucket());
        let daemon = match self.refill_interval_ms {
            Some(ms) => Daemon::with_interval(bucket, self.flags(), Duration::from_millis(ms)),
            None => Daemon::new(bucket, self.flags()),
        };
        daemon.with_retry_window(Duration::from_millis(self.retry_window_ms))
    }
}

pub fn load() -> Result<&'static Config> {
    let cfg = Config::from_env()?;
    cfg.validate()?;
    if cfg.enable_metrics {
        crate::metrics::init_exporter().context("installing metrics exporter")?;
    }
    Ok(CONFIG.get_or_init(|| cfg))
}

/// The config installed by [`load`], if any.
pub fn get() -> Option<&'static Config> {
    CONFIG.get()
}

/// Whether hit and refill metrics are emitted; off until [`load`] runs with
/// `enable_metrics` set.
pub fn metrics_enabled() -> bool {
    CONFIG.get().map(|c| c.enable_metrics).unwrap_or(false)
}
