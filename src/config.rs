use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "NETDOG_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default = "default_reverse_lookup_timeout_ms")]
    pub reverse_lookup_timeout_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_alpn")]
    pub alpn: Vec<String>,
    /// Cap on concurrently running probes and lookups; unbounded when unset.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_dial_timeout_ms() -> u64 {
    5_000
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_lookup_timeout_ms() -> u64 {
    5_000
}

fn default_reverse_lookup_timeout_ms() -> u64 {
    3_000 // advisory, kept shorter than the forward lookup
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_alpn() -> Vec<String> {
    vec!["h2".to_string(), "http/1.1".to_string()]
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: default_dial_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            reverse_lookup_timeout_ms: default_reverse_lookup_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            alpn: default_alpn(),
            max_in_flight: None,
            log_level: default_log_level(),
        }
    }
}

/// Deadlines for each kind of network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub dial: Duration,
    pub handshake: Duration,
    pub lookup: Duration,
    pub reverse_lookup: Duration,
    pub fetch: Duration,
}

impl ProbeConfig {
    /// Load from `path`, or from the file named by `NETDOG_CONFIG`, or fall
    /// back to defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV);
        let path = path.or(from_env.as_deref().map(Path::new));
        let config = match path {
            Some(p) => Self::load_file(p).await?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: ProbeConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_log_level()?;
        let timeouts = [
            ("dial_timeout_ms", self.dial_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("lookup_timeout_ms", self.lookup_timeout_ms),
            ("reverse_lookup_timeout_ms", self.reverse_lookup_timeout_ms),
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("tick_interval_ms", self.tick_interval_ms),
        ];
        for (name, value) in timeouts {
            anyhow::ensure!(value > 0, "{} must be greater than zero", name);
        }
        anyhow::ensure!(self.max_in_flight != Some(0), "max_in_flight must be greater than zero");
        Ok(())
    }

    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" | "warning" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            _ => Err(anyhow::anyhow!("Invalid log level: {}. Valid levels are: trace, debug, info, warn, error", self.log_level))
        }
    }

    /// Validate the log level is one of the supported values
    pub fn validate_log_level(&self) -> Result<()> {
        self.get_tracing_level().map(|_| ())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            dial: Duration::from_millis(self.dial_timeout_ms),
            handshake: Duration::from_millis(self.handshake_timeout_ms),
            lookup: Duration::from_millis(self.lookup_timeout_ms),
            reverse_lookup: Duration::from_millis(self.reverse_lookup_timeout_ms),
            fetch: Duration::from_millis(self.fetch_timeout_ms),
        }
    }
}
