use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::CadenceError;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Interval given to a subscriber on first `/start`.
pub const DEFAULT_INTERVAL_SECS: u32 = 5;
pub const DEFAULT_MESSAGE_TEXT: &str = "Hello from DB";
/// Fleet inspection and cancel calls are abandoned after this long.
pub const DEFAULT_INSPECT_TIMEOUT_MS: u64 = 2_000;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
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

/// Scheduling subsystem configuration: beat polling, subscriber defaults and
/// the local worker fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Beat engine tick in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u32,
    #[serde(default = "default_message_text")]
    pub default_message_text: String,
    /// Timeout applied to each fleet inspection or cancel call.
    #[serde(default = "default_inspect_timeout_ms")]
    pub inspect_timeout_ms: u64,
    /// Broadcast a worker-pool restart after a subscriber is rescheduled.
    #[serde(default = "bool_true")]
    pub restart_pool_on_update: bool,
    /// Number of tasks the local fleet runs at once.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            default_interval_secs: DEFAULT_INTERVAL_SECS,
            default_message_text: DEFAULT_MESSAGE_TEXT.to_string(),
            inspect_timeout_ms: DEFAULT_INSPECT_TIMEOUT_MS,
            restart_pool_on_update: true,
            worker_concurrency: default_worker_concurrency(),
            worker_name: default_worker_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_interval_secs() -> u32 {
    DEFAULT_INTERVAL_SECS
}
fn default_message_text() -> String {
    DEFAULT_MESSAGE_TEXT.to_string()
}
fn default_inspect_timeout_ms() -> u64 {
    DEFAULT_INSPECT_TIMEOUT_MS
}
fn default_worker_concurrency() -> usize {
    4
}
fn default_worker_name() -> String {
    "local".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CADENCE_SCHEDULER__POLL_INTERVAL_MS=500`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: Self = Self::figment(&path)
            .extract()
            .map_err(|e| CadenceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.scheduler.poll_interval_ms == 0 {
            return Err(CadenceError::Config(
                "scheduler.poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.scheduler.default_interval_secs == 0 {
            return Err(CadenceError::Config(
                "scheduler.default_interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CADENCE_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
