//! Configuration system for the Area window server
//!
//! Loads configuration from TOML file at `~/.config/area-ws/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("area-ws");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    pub fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Event dispatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How long a client may take to ack an event. Unset picks 100ms for
    /// release builds and 1000ms for debug builds.
    pub ack_timeout_ms: Option<u64>,
    /// Never time out while a debugger is attached to the server
    pub unbounded_when_debugged: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: None,
            unbounded_when_debugged: true,
        }
    }
}

impl DispatchConfig {
    pub const RELEASE_ACK_TIMEOUT: Duration = Duration::from_millis(100);
    pub const DEBUG_ACK_TIMEOUT: Duration = Duration::from_millis(1000);

    /// Ack timeout to use; `None` waits forever
    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_with(debugger_attached())
    }

    fn ack_timeout_with(&self, debugger_attached: bool) -> Option<Duration> {
        if self.unbounded_when_debugged && debugger_attached {
            info!("Debugger attached, event acks never time out");
            return None;
        }
        let timeout = match self.ack_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None if cfg!(debug_assertions) => Self::DEBUG_ACK_TIMEOUT,
            None => Self::RELEASE_ACK_TIMEOUT,
        };
        Some(timeout)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "area_ws=debug,info".into(),
        }
    }
}

/// Returns true if a tracer (debugger) is attached to this process
pub fn debugger_attached() -> bool {
    fs::read_to_string("/proc/self/status")
        .map(|status| tracer_pid(&status).is_some_and(|pid| pid != 0))
        .unwrap_or(false)
}

fn tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::save_default(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[dispatch]\nack_timeout_ms = 250\nunbounded_when_debugged = false\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.dispatch.ack_timeout_ms, Some(250));
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.dispatch.ack_timeout_with(true), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[dispatch\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_debugger_makes_timeout_unbounded() {
        let config = DispatchConfig::default();
        assert_eq!(config.ack_timeout_with(true), None);
        let expected = if cfg!(debug_assertions) {
            DispatchConfig::DEBUG_ACK_TIMEOUT
        } else {
            DispatchConfig::RELEASE_ACK_TIMEOUT
        };
        assert_eq!(config.ack_timeout_with(false), Some(expected));
    }

    #[test]
    fn test_tracer_pid_parsing() {
        let status = "Name:\tarea-ws\nState:\tR (running)\nTracerPid:\t4242\nUid:\t1000\n";
        assert_eq!(tracer_pid(status), Some(4242));
        assert_eq!(tracer_pid("TracerPid:\t0\n"), Some(0));
        assert_eq!(tracer_pid("Name:\tx\n"), None);
    }
}
