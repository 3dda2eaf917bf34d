//! Clap option structs for both binaries, merged over the config file

use crate::config::{load_config, DaemonConfig, PushConfig};
use crate::url::parse_remote_url;
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

/// Receiver daemon options
#[derive(Clone, Debug, Parser)]
#[command(
    name = "dirpushd",
    version,
    about = "dirpush receiver - applies pushed files and answers checksum requests"
)]
pub struct DaemonOpts {
    /// Bind address (host:port) [default: 0.0.0.0:65432]
    #[arg(long)]
    pub bind: Option<String>,

    /// Refuse any request path outside this directory
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Handle connections concurrently instead of one at a time
    #[arg(long)]
    pub concurrent: bool,

    /// Per-frame I/O timeout in milliseconds
    #[arg(long)]
    pub io_timeout_ms: Option<u64>,

    /// TOML config file (default: ~/.config/dirpush/dirpush.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl DaemonOpts {
    /// Config file values with command-line flags layered on top
    pub fn resolve(&self) -> Result<DaemonConfig> {
        let mut cfg = load_config(self.config.as_deref())?.daemon;
        if let Some(ref bind) = self.bind {
            cfg.bind = bind.clone();
        }
        if let Some(ref root) = self.root {
            cfg.root = Some(root.clone());
        }
        if self.concurrent {
            cfg.concurrent = true;
        }
        if let Some(ms) = self.io_timeout_ms {
            cfg.io_timeout_ms = ms;
        }
        Ok(cfg)
    }
}

/// Initiator options
#[derive(Clone, Debug, Parser)]
#[command(
    name = "dirpush",
    version,
    about = "Push a folder to a dirpush receiver, sending only files whose checksums differ"
)]
pub struct PushOpts {
    /// Local folder to push
    pub source: Option<PathBuf>,

    /// Remote folder: dirpush://host[:port]/abs/path, or an absolute path used with --host
    pub destination: Option<String>,

    /// Receiver host when the destination is a plain path
    #[arg(long)]
    pub host: Option<String>,

    /// Receiver port when the destination is a plain path
    #[arg(long)]
    pub port: Option<u16>,

    /// Show every sent and skipped file
    #[arg(short, long)]
    pub verbose: bool,

    /// Append a text log of the push to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Connect timeout in milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Per-frame I/O timeout in milliseconds
    #[arg(long)]
    pub io_timeout_ms: Option<u64>,

    /// TOML config file (default: ~/.config/dirpush/dirpush.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl PushOpts {
    pub fn resolve(&self) -> Result<PushConfig> {
        let base = load_config(self.config.as_deref())?.push;
        self.apply(base)
    }

    fn apply(&self, mut cfg: PushConfig) -> Result<PushConfig> {
        if let Some(ref src) = self.source {
            cfg.local_root = src.clone();
        }
        if let Some(ref host) = self.host {
            cfg.remote_host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.remote_port = port;
        }
        if let Some(ref dest) = self.destination {
            match parse_remote_url(dest) {
                Some(remote) => {
                    cfg.remote_host = remote.host;
                    cfg.remote_port = remote.port;
                    cfg.remote_root = remote.path;
                }
                None => cfg.remote_root = dest.clone(),
            }
        }
        if let Some(ms) = self.connect_timeout_ms {
            cfg.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.io_timeout_ms {
            cfg.io_timeout_ms = ms;
        }

        if cfg.local_root.as_os_str().is_empty() {
            bail!("source folder required (argument or [push].local_root)");
        }
        if cfg.remote_root.is_empty() {
            bail!("destination required (argument or [push].remote_root)");
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_url_destination() {
        let opts =
            PushOpts::try_parse_from(["dirpush", "/src", "dirpush://box:7000/srv/dst"]).unwrap();
        let cfg = opts.apply(PushConfig::default()).unwrap();
        assert_eq!(cfg.local_root, PathBuf::from("/src"));
        assert_eq!(cfg.remote_addr(), "box:7000");
        assert_eq!(cfg.remote_root, "/srv/dst");
    }

    #[test]
    fn test_push_plain_destination_with_host() {
        let opts =
            PushOpts::try_parse_from(["dirpush", "/src", "/srv/dst", "--host", "10.1.1.1"]).unwrap();
        let cfg = opts.apply(PushConfig::default()).unwrap();
        assert_eq!(cfg.remote_addr(), "10.1.1.1:65432");
        assert_eq!(cfg.remote_root, "/srv/dst");
    }

    #[test]
    fn test_push_falls_back_to_file_values() {
        let opts = PushOpts::try_parse_from(["dirpush"]).unwrap();
        let base = PushConfig::new("/from/file", "filehost", 9000, "/remote/file");
        let cfg = opts.apply(base.clone()).unwrap();
        assert_eq!(cfg, base);
    }

    #[test]
    fn test_push_requires_destination() {
        let opts = PushOpts::try_parse_from(["dirpush", "/src"]).unwrap();
        assert!(opts.apply(PushConfig::default()).is_err());
    }

    #[test]
    fn test_daemon_flags_override_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("d.toml");
        std::fs::write(&file, "[daemon]\nbind = \"127.0.0.1:1\"\nio_timeout_ms = 10\n").unwrap();
        let opts = DaemonOpts::try_parse_from([
            "dirpushd",
            "--config",
            file.to_str().unwrap(),
            "--bind",
            "127.0.0.1:2",
            "--concurrent",
        ])
        .unwrap();
        let cfg = opts.resolve().unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:2");
        assert_eq!(cfg.io_timeout_ms, 10);
        assert!(cfg.concurrent);
    }
}
