//! Bridge configuration.
//!
//! Behavior is fixed at deploy time by a TOML file. Every field is optional
//! and falls back to the defaults below.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SHELL_BRIDGE_CONFIG";

/// Config file looked up in the working directory when `CONFIG_ENV` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "shell-bridge.toml";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Controller host name or address.
    pub server_host: String,
    /// Controller port.
    pub server_port: u16,
    /// Use `wss://` instead of `ws://`.
    pub use_secure_transport: bool,
    /// Base reconnect delay.
    pub reconnect_delay_ms: u64,
    /// Give up after this many consecutive failed attempts (0 = never).
    pub max_reconnect_attempts: u32,
    /// Upper bound for the exponential delay.
    pub backoff_max_ms: u64,
    /// Double the delay on each consecutive failure.
    pub use_exponential_backoff: bool,
    /// Interval between keep-alive pings.
    pub keep_alive_interval_ms: u64,
    /// Interval between telemetry samples.
    pub metrics_interval_ms: u64,
    /// How often the heartbeat task checks its timers.
    pub heartbeat_tick_ms: u64,
    /// Sleep between output polls when the shell has nothing to say.
    ///
    /// Lower values reduce output latency at the cost of wakeups.
    pub poll_interval_ms: u64,
    /// Largest chunk read from the shell in one go.
    pub output_chunk_bytes: usize,
    pub terminal_columns: u16,
    pub terminal_rows: u16,
    /// Shell to launch instead of the detected interactive shell.
    pub shell: Option<PathBuf>,
    pub app_version: String,
    /// Dashboard user the device belongs to (empty = none).
    pub user_id: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: 9991,
            use_secure_transport: false,
            reconnect_delay_ms: 5000,
            max_reconnect_attempts: 0,
            backoff_max_ms: 60_000,
            use_exponential_backoff: true,
            keep_alive_interval_ms: 30_000,
            metrics_interval_ms: 2000,
            heartbeat_tick_ms: 1000,
            poll_interval_ms: 50,
            output_chunk_bytes: 8192,
            terminal_columns: 120,
            terminal_rows: 30,
            shell: None,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            user_id: String::new(),
        }
    }
}

impl BridgeConfig {
    /// Load the configuration for this process.
    ///
    /// Uses the file named by `SHELL_BRIDGE_CONFIG` if set, otherwise
    /// `shell-bridge.toml` in the working directory if it exists, otherwise
    /// the defaults. The result is validated.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = if let Some(path) = std::env::var_os(CONFIG_ENV) {
            Self::load_from_file(PathBuf::from(path))?
        } else if Path::new(DEFAULT_CONFIG_FILE).is_file() {
            Self::load_from_file(DEFAULT_CONFIG_FILE)?
        } else {
            tracing::debug!("No config file found, using defaults");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    /// Returns error if the text is not valid TOML for this schema.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check the settings for values the bridge cannot run with.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.server_host.trim().is_empty() {
            return invalid("server_host must not be empty");
        }
        if self.server_port == 0 {
            return invalid("server_port must not be 0");
        }
        if self.reconnect_delay_ms == 0 {
            return invalid("reconnect_delay_ms must be positive");
        }
        if self.backoff_max_ms < self.reconnect_delay_ms {
            return invalid("backoff_max_ms must be at least reconnect_delay_ms");
        }
        if self.keep_alive_interval_ms == 0
            || self.metrics_interval_ms == 0
            || self.heartbeat_tick_ms == 0
            || self.poll_interval_ms == 0
        {
            return invalid("intervals must be positive");
        }
        if self.output_chunk_bytes == 0 {
            return invalid("output_chunk_bytes must be positive");
        }
        if self.terminal_columns == 0 || self.terminal_rows == 0 {
            return invalid("terminal geometry must be non-zero");
        }
        Ok(())
    }

    /// WebSocket scheme for the configured transport.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        if self.use_secure_transport { "wss" } else { "ws" }
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[must_use]
    pub const fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    #[must_use]
    pub const fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    #[must_use]
    pub const fn heartbeat_tick(&self) -> Duration {
        Duration::from_millis(self.heartbeat_tick_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
