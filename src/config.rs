//! Configuration for the orchestration backend.
//!
//! Read from a TOML file (default `changescribe.toml`) with sensible
//! defaults for every field, then layered with environment overrides
//! (`CHANGESCRIBE_PORT`) and CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 7045
//! dev_mode = false
//!
//! [handoff]
//! scheme = "changescribe"
//!
//! [timeouts]
//! fast_fail_secs = 20
//! long_deadline_secs = 600
//! sweep_interval_ms = 1000
//! terminal_grace_secs = 300
//! abandoned_after_secs = 1800
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// HTTP server settings for the callback gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the gateway listens on. 0 picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Dev mode binds 0.0.0.0 and enables permissive CORS; otherwise the
    /// gateway stays on localhost, where the analyzer lives anyway.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_port() -> u16 {
    7045
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            dev_mode: false,
        }
    }
}

/// Deep-link settings for the handoff encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// URL scheme the OS routes to the installed analyzer.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Base URL the analyzer calls back on. Defaults to localhost with the
    /// configured port; overridden once the listener knows its real address.
    #[serde(default)]
    pub callback_base: Option<String>,
}

fn default_scheme() -> String {
    "changescribe".to_string()
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            callback_base: None,
        }
    }
}

/// Deadlines enforced by the timeout supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// "Is anyone even running" window: a session with no first progress
    /// report inside this window fails fast as analyzer-not-launched.
    #[serde(default = "default_fast_fail_secs")]
    pub fast_fail_secs: u64,
    /// Full budget for a launched analyzer: long enough for an LLM call
    /// plus document generation.
    #[serde(default = "default_long_deadline_secs")]
    pub long_deadline_secs: u64,
    /// How often the supervisor sweeps the store.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// How long terminal sessions stay around for late subscribers.
    #[serde(default = "default_terminal_grace_secs")]
    pub terminal_grace_secs: u64,
    /// Backstop: non-terminal sessions older than this are reaped outright.
    #[serde(default = "default_abandoned_after_secs")]
    pub abandoned_after_secs: u64,
}

fn default_fast_fail_secs() -> u64 {
    20
}

fn default_long_deadline_secs() -> u64 {
    600
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_terminal_grace_secs() -> u64 {
    300
}

fn default_abandoned_after_secs() -> u64 {
    1800
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fast_fail_secs: default_fast_fail_secs(),
            long_deadline_secs: default_long_deadline_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
            terminal_grace_secs: default_terminal_grace_secs(),
            abandoned_after_secs: default_abandoned_after_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn fast_fail_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.fast_fail_secs as i64)
    }

    pub fn long_deadline(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.long_deadline_secs as i64)
    }

    pub fn terminal_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.terminal_grace_secs as i64)
    }

    pub fn abandoned_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.abandoned_after_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub handoff: HandoffConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Config {
    /// Load from a TOML file, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides, applied after the file layer.
    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("CHANGESCRIBE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(scheme) = std::env::var("CHANGESCRIBE_SCHEME") {
            if !scheme.is_empty() {
                self.handoff.scheme = scheme;
            }
        }
    }

    /// Reject configurations that would break the two-tier timeout model.
    pub fn validate(&self) -> Result<()> {
        if self.timeouts.fast_fail_secs == 0 {
            bail!("timeouts.fast_fail_secs must be > 0");
        }
        if self.timeouts.long_deadline_secs <= self.timeouts.fast_fail_secs {
            bail!(
                "timeouts.long_deadline_secs ({}) must exceed fast_fail_secs ({})",
                self.timeouts.long_deadline_secs,
                self.timeouts.fast_fail_secs
            );
        }
        if self.timeouts.abandoned_after_secs <= self.timeouts.long_deadline_secs {
            bail!(
                "timeouts.abandoned_after_secs ({}) must exceed long_deadline_secs ({})",
                self.timeouts.abandoned_after_secs,
                self.timeouts.long_deadline_secs
            );
        }
        if self.handoff.scheme.is_empty()
            || !self
                .handoff
                .scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            bail!("handoff.scheme '{}' is not a valid URL scheme", self.handoff.scheme);
        }
        Ok(())
    }
}
