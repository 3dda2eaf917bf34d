//! Daemon and push settings, optionally read from a TOML file

use crate::protocol::{timeouts, DEFAULT_BIND, DEFAULT_PORT};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Receiver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// host:port to listen on
    pub bind: String,
    /// When set, requests may only touch paths under this directory
    pub root: Option<PathBuf>,
    /// Handle each connection on its own task instead of one at a time
    pub concurrent: bool,
    pub io_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            root: None,
            concurrent: false,
            io_timeout_ms: timeouts::IO_IDLE_MS,
        }
    }
}

/// Everything one push needs, fixed for the whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub local_root: PathBuf,
    pub remote_host: String,
    pub remote_port: u16,
    /// Absolute folder on the receiver
    pub remote_root: String,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::new(),
            remote_host: "127.0.0.1".to_string(),
            remote_port: DEFAULT_PORT,
            remote_root: String::new(),
            connect_timeout_ms: timeouts::CONNECT_MS,
            io_timeout_ms: timeouts::IO_IDLE_MS,
        }
    }
}

impl PushConfig {
    pub fn new(
        local_root: impl Into<PathBuf>,
        remote_host: impl Into<String>,
        remote_port: u16,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            local_root: local_root.into(),
            remote_host: remote_host.into(),
            remote_port,
            remote_root: remote_root.into(),
            ..Self::default()
        }
    }

    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

/// On-disk layout: optional `[daemon]` and `[push]` tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub daemon: DaemonConfig,
    pub push: PushConfig,
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("dirpush");
        }
    }
    // Unix-like default
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("dirpush");
    }
    PathBuf::from(".dirpush")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("dirpush.toml")
}

pub fn parse_config(data: &str) -> Result<ConfigFile> {
    toml::from_str(data).context("parse config")
}

/// Load `path`, or the default location when `path` is None.
/// A missing default file yields defaults; a missing explicit file is an error.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile> {
    match path {
        Some(p) => {
            let data = std::fs::read_to_string(p)
                .with_context(|| format!("read config {}", p.display()))?;
            parse_config(&data)
        }
        None => load_optional_config(&default_config_path()),
    }
}

// Only a file that does not exist falls back to defaults
fn load_optional_config(path: &Path) -> Result<ConfigFile> {
    match std::fs::read_to_string(path) {
        Ok(data) => parse_config(&data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(e).with_context(|| format!("read config {}", path.display())),
    }
}
