//! Process configuration from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `PORT` | `8080` |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `REDIS_ADDR` / `REDIS_PASSWORD` / `REDIS_DB` | used when `REDIS_URL` is unset |
//! | `USE_PERSISTENT_STORES` | `true` (Redis); `false` keeps everything in memory |
//! | `CHRONOS_WORKERS` | `4` |
//! | `CHRONOS_QUEUE_CAPACITY` | `100` |
//! | `CHRONOS_CACHE_TTL_SECS` | `3600` |

use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::RunnerConfig;

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChronosConfig {
    pub port: u16,
    pub redis_url: String,
    pub use_persistent_stores: bool,
    pub workers: usize,
    pub queue_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for ChronosConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            use_persistent_stores: true,
            workers: 4,
            queue_capacity: 100,
            cache_ttl: crate::aggregation::DEFAULT_TTL,
        }
    }
}

impl ChronosConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let workers = parse_or(&var, "CHRONOS_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ConfigError::Invalid {
                name: "CHRONOS_WORKERS",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        Ok(Self {
            port: parse_or(&var, "PORT", defaults.port)?,
            redis_url: redis_url(&var)?,
            use_persistent_stores: parse_or(
                &var,
                "USE_PERSISTENT_STORES",
                defaults.use_persistent_stores,
            )?,
            workers,
            queue_capacity: parse_or(&var, "CHRONOS_QUEUE_CAPACITY", defaults.queue_capacity)?,
            cache_ttl: Duration::from_secs(parse_or(
                &var,
                "CHRONOS_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::default()
            .with_workers(self.workers)
            .with_queue_capacity(self.queue_capacity)
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

/// `REDIS_URL` wins; otherwise compose one from `REDIS_ADDR`, `REDIS_PASSWORD`
/// and `REDIS_DB`. The password is percent-encoded into the userinfo.
fn redis_url<F>(var: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = var("REDIS_URL") {
        return Ok(url);
    }

    let Some(addr) = var("REDIS_ADDR") else {
        return Ok(DEFAULT_REDIS_URL.to_string());
    };

    let db: u32 = parse_or(var, "REDIS_DB", 0)?;
    let auth = var("REDIS_PASSWORD")
        .map(|password| format!(":{}@", urlencoding::encode(&password)))
        .unwrap_or_default();

    Ok(format!("redis://{auth}{addr}/{db}"))
}
