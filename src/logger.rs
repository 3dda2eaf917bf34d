use crate::progress::{ProgressEvent, PushSummary};
use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the stderr tracing subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()?;
    Ok(())
}

/// Sink for a push's audit trail
pub trait PushLogger: Send + Sync {
    fn start(&self, _local_root: &str, _remote: &str) {}
    fn sent(&self, _path: &str, _bytes: u64) {}
    fn skipped(&self, _path: &str) {}
    fn error(&self, _context: &str, _path: &str, _msg: &str) {}
    fn done(&self, _status: &str, _summary: &PushSummary, _seconds: f64) {}

    /// Dispatch a progress event to the matching hook
    fn record(&self, event: &ProgressEvent, seconds: f64) {
        match event {
            ProgressEvent::Started { local_root, remote } => self.start(local_root, remote),
            ProgressEvent::Sent { path, bytes } => self.sent(path, *bytes),
            ProgressEvent::Skipping { path } => self.skipped(path),
            ProgressEvent::FileError { path, message } => self.error("file", path, message),
            ProgressEvent::Failed { message } => self.error("push", "-", message),
            ProgressEvent::Completed(s) => self.done("completed", s, seconds),
            ProgressEvent::Cancelled(s) => self.done("cancelled", s, seconds),
            ProgressEvent::ReceivedChecksums { .. } | ProgressEvent::Syncing { .. } => {}
        }
    }
}

pub struct NoopLogger;
impl PushLogger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl PushLogger for TextLogger {
    fn start(&self, local_root: &str, remote: &str) {
        self.line(&format!("START src={} dst={}", local_root, remote));
    }
    fn sent(&self, path: &str, bytes: u64) {
        self.line(&format!("SENT path={} bytes={}", path, bytes));
    }
    fn skipped(&self, path: &str) {
        self.line(&format!("SKIP path={}", path));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} path={} msg={}", context, path, msg));
    }
    fn done(&self, status: &str, s: &PushSummary, seconds: f64) {
        self.line(&format!(
            "DONE status={status} synced={} skipped={} failed={} bytes={} seconds={seconds:.3}",
            s.synced, s.skipped, s.failed, s.bytes_sent
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_logger_appends_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/push.log");
        let logger = TextLogger::new(&path).unwrap();
        logger.record(
            &ProgressEvent::Sent {
                path: "a.txt".into(),
                bytes: 2,
            },
            0.0,
        );
        logger.record(
            &ProgressEvent::Syncing {
                path: "a.txt".into(),
            },
            0.0,
        );
        logger.record(&ProgressEvent::Completed(PushSummary::default()), 1.5);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("SENT path=a.txt bytes=2"));
        assert!(lines[1].contains("DONE status=completed"));
    }
}
