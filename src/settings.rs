use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String, // e.g. 0.0.0.0:3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

/// Dual-bucket admission limits applied per connection.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    #[serde(default = "default_minute_capacity")]
    pub minute_capacity: u32,
    /// Tokens leaked per minute from the coarse tier.
    #[serde(default = "default_minute_leak_rate")]
    pub minute_leak_rate: f64,
    #[serde(default = "default_second_capacity")]
    pub second_capacity: u32,
    /// Tokens leaked per second from the fine tier.
    #[serde(default = "default_second_leak_rate")]
    pub second_leak_rate: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            minute_capacity: default_minute_capacity(),
            minute_leak_rate: default_minute_leak_rate(),
            second_capacity: default_second_capacity(),
            second_leak_rate: default_second_leak_rate(),
        }
    }
}

fn default_minute_capacity() -> u32 {
    18
}

fn default_minute_leak_rate() -> f64 {
    12.0
}

fn default_second_capacity() -> u32 {
    3
}

fn default_second_leak_rate() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// Connections with no admitted activity for this long are closed.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

fn default_idle_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Sleep between claim attempts when the queue is idle.
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    /// Simulated processing delay of the stub executor.
    #[serde(default = "default_echo_delay_ms")]
    pub echo_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_sleep_ms: default_idle_sleep_ms(),
            echo_delay_ms: default_echo_delay_ms(),
        }
    }
}

fn default_idle_sleep_ms() -> u64 {
    10
}

fn default_echo_delay_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}
