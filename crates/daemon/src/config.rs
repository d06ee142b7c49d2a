//! Configuration management for the ptylink daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/ptylink/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::shell::{DEFAULT_SHELL_CANDIDATES, FALLBACK_SHELL};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("read_chunk_size must be between 1 and 65536 bytes, got {0}")]
    InvalidChunkSize(usize),

    #[error("terminal size must be at least 1x1, got {0}x{1}")]
    InvalidTerminalSize(u16, u16),

    #[error("fallback_shell must not be empty")]
    EmptyFallbackShell,

    #[error("reaper interval_secs must be greater than 0, got {0}")]
    InvalidReaperInterval(u64),

    #[error("idle_timeout_secs must be greater than 0, got {0}")]
    InvalidIdleTimeout(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the ptylink daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Terminal session configuration.
    pub session: SessionConfig,

    /// Idle-session reaper configuration.
    pub reaper: ReaperConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Terminal session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell executables tried in order; the first one present is used.
    pub shell_candidates: Vec<String>,

    /// Bare command name used when no candidate exists, resolved via `PATH`.
    pub fallback_shell: String,

    /// Initial terminal width in columns.
    pub cols: u16,

    /// Initial terminal height in rows.
    pub rows: u16,

    /// Size of each PTY read, and so the largest output frame, in bytes.
    pub read_chunk_size: usize,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,
}

/// Idle-session reaper configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReaperConfig {
    /// Seconds between two sweeps.
    pub interval_secs: u64,

    /// Sessions without traffic for longer than this are evicted.
    pub idle_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell_candidates: DEFAULT_SHELL_CANDIDATES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fallback_shell: FALLBACK_SHELL.to_string(),
            cols: 80,
            rows: 24,
            read_chunk_size: 512,
            max_sessions: 32,
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            idle_timeout_secs: 180,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ptylink")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PTYLINK_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - PTYLINK_SHELL: Use this shell instead of the candidate list
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("PTYLINK_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(shell) = std::env::var("PTYLINK_SHELL") {
            if !shell.is_empty() {
                tracing::info!("Overriding shell_candidates from environment: {}", shell);
                self.session.shell_candidates = vec![shell];
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;

        if session.max_sessions < 1 || session.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(session.max_sessions));
        }

        if session.read_chunk_size == 0 || session.read_chunk_size > 64 * 1024 {
            return Err(ConfigError::InvalidChunkSize(session.read_chunk_size));
        }

        if session.cols == 0 || session.rows == 0 {
            return Err(ConfigError::InvalidTerminalSize(session.cols, session.rows));
        }

        if session.fallback_shell.trim().is_empty() {
            return Err(ConfigError::EmptyFallbackShell);
        }

        if self.reaper.interval_secs == 0 {
            return Err(ConfigError::InvalidReaperInterval(self.reaper.interval_secs));
        }

        if self.reaper.idle_timeout_secs == 0 {
            return Err(ConfigError::InvalidIdleTimeout(self.reaper.idle_timeout_secs));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
