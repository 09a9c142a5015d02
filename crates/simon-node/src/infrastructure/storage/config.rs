//! TOML configuration of a scripted bus exchange.
//!
//! One file describes the bus, the nodes attached to it and the messages to
//! deliver, in order:
//!
//! ```toml
//! [bus]
//! half_period_us = 50
//! payload_capacity = 100
//! poll_cost_us = 1
//! watchdog_ms = 5000
//! log_level = "info"
//!
//! [[nodes]]
//! name = "alpha"
//! address = 5
//!
//! [[nodes]]
//! name = "beta"
//! address = 9
//! payload_capacity = 32   # optional per-node override
//!
//! [[messages]]
//! from = "alpha"
//! to = "beta"
//! text = "PING"
//! ```
//!
//! Every `[bus]` field has a default, so a file may contain only nodes and
//! messages.  A missing file loads as [`AppConfig::default`], which has no
//! nodes and therefore exchanges nothing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use simon_core::{DEFAULT_HALF_PERIOD_US, DEFAULT_PAYLOAD_CAPACITY};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
    #[serde(default)]
    pub messages: Vec<MessageEntry>,
}

/// Timing shared by every node plus simulation and supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusConfig {
    /// Half-period `T` in microseconds.
    #[serde(default = "default_half_period_us")]
    pub half_period_us: u32,
    /// Payload capacity of nodes without their own override.
    #[serde(default = "default_payload_capacity")]
    pub payload_capacity: usize,
    /// Virtual microseconds one line sample costs on the simulated bus.
    #[serde(default = "default_poll_cost_us")]
    pub poll_cost_us: u64,
    /// Wall-clock budget for the whole exchange before the bus is closed.
    #[serde(default = "default_watchdog_ms")]
    pub watchdog_ms: u64,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// One node on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeEntry {
    /// Name used by `[[messages]]` to refer to this node.
    pub name: String,
    /// Bus address, 0–255.
    pub address: u8,
    /// Overrides `bus.payload_capacity` for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_capacity: Option<usize>,
}

/// One message to deliver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEntry {
    pub from: String,
    pub to: String,
    pub text: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_half_period_us() -> u32 {
    DEFAULT_HALF_PERIOD_US
}
fn default_payload_capacity() -> usize {
    DEFAULT_PAYLOAD_CAPACITY
}
fn default_poll_cost_us() -> u64 {
    1
}
fn default_watchdog_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            half_period_us: default_half_period_us(),
            payload_capacity: default_payload_capacity(),
            poll_cost_us: default_poll_cost_us(),
            watchdog_ms: default_watchdog_ms(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// A small ping/pong exchange between two nodes, written by `--init`.
    pub fn sample() -> Self {
        let node = |name: &str, address| NodeEntry {
            name: name.to_string(),
            address,
            payload_capacity: None,
        };
        let message = |from: &str, to: &str, text: &str| MessageEntry {
            from: from.to_string(),
            to: to.to_string(),
            text: text.to_string(),
        };
        Self {
            bus: BusConfig::default(),
            nodes: vec![node("alpha", 5), node("beta", 9)],
            messages: vec![
                message("alpha", "beta", "PING"),
                message("beta", "alpha", "PONG"),
            ],
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
