//! Configuration for the review server
//!
//! Every value has a compile-time default and an `ANALYSIS_*` environment
//! override. The engine path falls back to probing common install
//! locations when unset.

use std::path::PathBuf;
use std::str::FromStr;

use engine::{AnalysisContempt, EngineOptions};
use tokio::time::Duration;

use crate::rate_guard::{EndpointQuota, RateQuotas};

pub const DEFAULT_POOL_SIZE: usize = 2;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DEPTH: u32 = 12;
pub const DEFAULT_MAX_DEPTH: u32 = 30;
pub const DEFAULT_TIME_MS: u64 = 1000;
pub const DEFAULT_MAX_TIME_MS: u64 = 30_000;
pub const DEFAULT_MULTI_PV: u32 = 2;
pub const DEFAULT_MAX_MULTI_PV: u32 = 5;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_JOB_TTL_SECS: u64 = 3600;
pub const DEFAULT_JOB_MAX_ENTRIES: usize = 500;
pub const DEFAULT_RATE_MAX_CLIENTS: usize = 10_000;
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// None means probe for Stockfish at startup
    pub engine_path: Option<PathBuf>,
    pub pool_size: usize,
    pub acquire_timeout: Duration,
    pub default_depth: u32,
    pub max_depth: u32,
    pub default_time_ms: u64,
    pub max_time_ms: u64,
    pub default_multi_pv: u32,
    pub max_multi_pv: u32,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub job_ttl: Duration,
    pub job_max_entries: usize,
    pub rate_quotas: RateQuotas,
    pub rate_max_clients: usize,
    pub maintenance_interval: Duration,
    pub engine_options: EngineOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            engine_path: None,
            pool_size: DEFAULT_POOL_SIZE,
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            default_depth: DEFAULT_DEPTH,
            max_depth: DEFAULT_MAX_DEPTH,
            default_time_ms: DEFAULT_TIME_MS,
            max_time_ms: DEFAULT_MAX_TIME_MS,
            default_multi_pv: DEFAULT_MULTI_PV,
            max_multi_pv: DEFAULT_MAX_MULTI_PV,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            job_ttl: Duration::from_secs(DEFAULT_JOB_TTL_SECS),
            job_max_entries: DEFAULT_JOB_MAX_ENTRIES,
            rate_quotas: RateQuotas::default(),
            rate_max_clients: DEFAULT_RATE_MAX_CLIENTS,
            maintenance_interval: Duration::from_secs(DEFAULT_MAINTENANCE_INTERVAL_SECS),
            engine_options: EngineOptions::default(),
        }
    }
}

impl ServerConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        let options = &defaults.engine_options;

        let quota = |per_hour: &'static str, burst: &'static str, d: EndpointQuota| -> Result<EndpointQuota, ConfigError> {
            let capacity: u32 = parse_or(burst, get(burst), d.burst)?;
            // an empty bucket never refills past its capacity
            if capacity == 0 {
                return Err(ConfigError::Invalid {
                    name: burst,
                    value: "0".into(),
                });
            }
            Ok(EndpointQuota::new(parse_or(per_hour, get(per_hour), d.per_hour)?, capacity))
        };
        let rate_defaults = RateQuotas::default();

        let engine_options = EngineOptions {
            threads: parse_or("ANALYSIS_ENGINE_THREADS", get("ANALYSIS_ENGINE_THREADS"), options.threads)?,
            hash_mb: parse_or("ANALYSIS_ENGINE_HASH_MB", get("ANALYSIS_ENGINE_HASH_MB"), options.hash_mb)?,
            contempt: parse_or("ANALYSIS_ENGINE_CONTEMPT", get("ANALYSIS_ENGINE_CONTEMPT"), options.contempt)?,
            analysis_contempt: match get("ANALYSIS_ENGINE_ANALYSIS_CONTEMPT") {
                Some(v) => AnalysisContempt::from_str(v.trim()).map_err(|_| ConfigError::Invalid {
                    name: "ANALYSIS_ENGINE_ANALYSIS_CONTEMPT",
                    value: v,
                })?,
                None => options.analysis_contempt,
            },
        };

        let config = Self {
            engine_path: get("ANALYSIS_ENGINE_PATH").map(PathBuf::from),
            pool_size: parse_or("ANALYSIS_POOL_SIZE", get("ANALYSIS_POOL_SIZE"), defaults.pool_size)?,
            acquire_timeout: Duration::from_millis(parse_or(
                "ANALYSIS_ACQUIRE_TIMEOUT_MS",
                get("ANALYSIS_ACQUIRE_TIMEOUT_MS"),
                DEFAULT_ACQUIRE_TIMEOUT_MS,
            )?),
            default_depth: parse_or("ANALYSIS_DEFAULT_DEPTH", get("ANALYSIS_DEFAULT_DEPTH"), defaults.default_depth)?,
            max_depth: parse_or("ANALYSIS_MAX_DEPTH", get("ANALYSIS_MAX_DEPTH"), defaults.max_depth)?,
            default_time_ms: parse_or("ANALYSIS_DEFAULT_TIME_MS", get("ANALYSIS_DEFAULT_TIME_MS"), defaults.default_time_ms)?,
            max_time_ms: parse_or("ANALYSIS_MAX_TIME_MS", get("ANALYSIS_MAX_TIME_MS"), defaults.max_time_ms)?,
            default_multi_pv: parse_or("ANALYSIS_DEFAULT_MULTI_PV", get("ANALYSIS_DEFAULT_MULTI_PV"), defaults.default_multi_pv)?,
            max_multi_pv: parse_or("ANALYSIS_MAX_MULTI_PV", get("ANALYSIS_MAX_MULTI_PV"), defaults.max_multi_pv)?,
            cache_ttl: Duration::from_secs(parse_or(
                "ANALYSIS_CACHE_TTL_SECS",
                get("ANALYSIS_CACHE_TTL_SECS"),
                DEFAULT_CACHE_TTL_SECS,
            )?),
            cache_max_entries: parse_or("ANALYSIS_CACHE_MAX_ENTRIES", get("ANALYSIS_CACHE_MAX_ENTRIES"), defaults.cache_max_entries)?,
            job_ttl: Duration::from_secs(parse_or(
                "ANALYSIS_JOB_TTL_SECS",
                get("ANALYSIS_JOB_TTL_SECS"),
                DEFAULT_JOB_TTL_SECS,
            )?),
            job_max_entries: parse_or("ANALYSIS_JOB_MAX_ENTRIES", get("ANALYSIS_JOB_MAX_ENTRIES"), defaults.job_max_entries)?,
            rate_quotas: RateQuotas {
                game_analysis: quota(
                    "ANALYSIS_RATE_GAME_PER_HOUR",
                    "ANALYSIS_RATE_GAME_BURST",
                    rate_defaults.game_analysis,
                )?,
                position_analysis: quota(
                    "ANALYSIS_RATE_POSITION_PER_HOUR",
                    "ANALYSIS_RATE_POSITION_BURST",
                    rate_defaults.position_analysis,
                )?,
                job_status: quota(
                    "ANALYSIS_RATE_STATUS_PER_HOUR",
                    "ANALYSIS_RATE_STATUS_BURST",
                    rate_defaults.job_status,
                )?,
                engine_config: quota(
                    "ANALYSIS_RATE_CONFIG_PER_HOUR",
                    "ANALYSIS_RATE_CONFIG_BURST",
                    rate_defaults.engine_config,
                )?,
            },
            rate_max_clients: parse_or("ANALYSIS_RATE_MAX_CLIENTS", get("ANALYSIS_RATE_MAX_CLIENTS"), defaults.rate_max_clients)?,
            maintenance_interval: Duration::from_secs(parse_or(
                "ANALYSIS_MAINTENANCE_INTERVAL_SECS",
                get("ANALYSIS_MAINTENANCE_INTERVAL_SECS"),
                DEFAULT_MAINTENANCE_INTERVAL_SECS,
            )?),
            engine_options,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, value: String| Err(ConfigError::Invalid { name, value });
        if self.pool_size == 0 {
            return invalid("ANALYSIS_POOL_SIZE", "0".into());
        }
        if self.default_depth > self.max_depth {
            return invalid("ANALYSIS_DEFAULT_DEPTH", self.default_depth.to_string());
        }
        if self.default_time_ms > self.max_time_ms {
            return invalid("ANALYSIS_DEFAULT_TIME_MS", self.default_time_ms.to_string());
        }
        if self.default_multi_pv == 0 || self.default_multi_pv > self.max_multi_pv {
            return invalid("ANALYSIS_DEFAULT_MULTI_PV", self.default_multi_pv.to_string());
        }
        Ok(())
    }

    /// Path of the engine binary: the configured one, else the first
    /// Stockfish found in common locations.
    pub fn resolve_engine_path(&self) -> Option<PathBuf> {
        self.engine_path.clone().or_else(engine::find_engine_binary)
    }
}

fn parse_or<T: FromStr>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        None => Ok(default),
    }
}
