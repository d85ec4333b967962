use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};

pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 5;
pub const DEFAULT_QUEUE_TICK_MS: u64 = 1_000; // queue processor cadence
pub const DEFAULT_OFF_PEAK_TICK_SECS: u64 = 60; // off-peak reorder cadence
pub const DEFAULT_HISTORY_LIMIT: usize = 500; // finished executions kept in memory
pub const DEFAULT_OFF_PEAK_START_HOUR: u32 = 22;
pub const DEFAULT_OFF_PEAK_END_HOUR: u32 = 6;
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Top-level config (cadence.toml + CADENCE_* env overrides).
///
/// Nested keys use a double underscore in env vars, e.g.
/// `CADENCE_SCHEDULER__MAX_CONCURRENT_EXECUTIONS=8`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Execution queue and tick tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Global cap on concurrently running executions, across all tenants.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
    #[serde(default = "default_queue_tick_ms")]
    pub queue_tick_ms: u64,
    #[serde(default = "default_off_peak_tick_secs")]
    pub off_peak_tick_secs: u64,
    /// When false, a timer or event fire is skipped while the same schedule
    /// still has a pending or running execution.
    #[serde(default)]
    pub allow_overlap: bool,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub off_peak: OffPeakConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            queue_tick_ms: DEFAULT_QUEUE_TICK_MS,
            off_peak_tick_secs: DEFAULT_OFF_PEAK_TICK_SECS,
            allow_overlap: false,
            history_limit: DEFAULT_HISTORY_LIMIT,
            off_peak: OffPeakConfig::default(),
        }
    }
}

/// Off-peak window: local hour strictly after `start_hour` or strictly
/// before `end_hour`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffPeakConfig {
    #[serde(default = "default_off_peak_start")]
    pub start_hour: u32,
    #[serde(default = "default_off_peak_end")]
    pub end_hour: u32,
    /// IANA zone the hours are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for OffPeakConfig {
    fn default() -> Self {
        Self {
            start_hour: DEFAULT_OFF_PEAK_START_HOUR,
            end_hour: DEFAULT_OFF_PEAK_END_HOUR,
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where the daemon sends report execution requests. `endpoint` is the
/// service base URL; the per-report path is appended to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional bearer token sent with every request.
    pub token: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: default_engine_endpoint(),
            timeout_secs: default_engine_timeout_secs(),
            token: None,
        }
    }
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_EXECUTIONS
}
fn default_queue_tick_ms() -> u64 {
    DEFAULT_QUEUE_TICK_MS
}
fn default_off_peak_tick_secs() -> u64 {
    DEFAULT_OFF_PEAK_TICK_SECS
}
fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}
fn default_off_peak_start() -> u32 {
    DEFAULT_OFF_PEAK_START_HOUR
}
fn default_off_peak_end() -> u32 {
    DEFAULT_OFF_PEAK_END_HOUR
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_engine_endpoint() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_engine_timeout_secs() -> u64 {
    300
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// A missing file is not an error: every field has a default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| CadenceError::Config(e.to_string()))?;

        config.validate()?;
        tracing::debug!(path = %path, "configuration loaded");
        Ok(config)
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: CadenceConfig = Figment::from(Toml::string(toml))
            .extract()
            .map_err(|e| CadenceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_executions == 0 {
            return Err(CadenceError::Config(
                "scheduler.max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        let off_peak = &self.scheduler.off_peak;
        if off_peak.start_hour > 23 || off_peak.end_hour > 23 {
            return Err(CadenceError::Config(
                "scheduler.off_peak hours must be within 0-23".to_string(),
            ));
        }
        crate::tz::parse_timezone(&off_peak.timezone)?;
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
