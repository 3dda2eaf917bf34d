//! Push progress events and their terminal rendering
//!
//! A push reports everything it does as a finite stream of `ProgressEvent`s
//! ending in exactly one terminal event. The CLI renders them cargo-style:
//! per-file lines scroll above a spinner that holds the current status.

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-push counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub synced: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started { local_root: String, remote: String },
    ReceivedChecksums { count: usize },
    Syncing { path: String },
    Sent { path: String, bytes: u64 },
    Skipping { path: String },
    /// A single file could not be hashed or transferred; the push goes on
    FileError { path: String, message: String },
    Completed(PushSummary),
    Failed { message: String },
    Cancelled(PushSummary),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed(_) | ProgressEvent::Failed { .. } | ProgressEvent::Cancelled(_)
        )
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Started { local_root, remote } => {
                write!(f, "Syncing from {} to {}", local_root, remote)
            }
            ProgressEvent::ReceivedChecksums { count } => {
                write!(f, "Received listener checksums ({} entries)", count)
            }
            ProgressEvent::Syncing { path } => write!(f, "Syncing {}...", path),
            ProgressEvent::Sent { path, bytes } => write!(f, "Sent {} ({} bytes)", path, bytes),
            ProgressEvent::Skipping { path } => write!(f, "Skipping {} (unchanged)", path),
            ProgressEvent::FileError { path, message } => {
                write!(f, "Error syncing {}: {}", path, message)
            }
            ProgressEvent::Completed(s) => write!(
                f,
                "Folders synced successfully. {} synced, {} unchanged, {} failed ({} bytes)",
                s.synced, s.skipped, s.failed, s.bytes_sent
            ),
            ProgressEvent::Failed { message } => write!(f, "Error: {}", message),
            ProgressEvent::Cancelled(s) => write!(
                f,
                "Sync cancelled after {} synced, {} unchanged, {} failed",
                s.synced, s.skipped, s.failed
            ),
        }
    }
}

/// Cooperative cancellation, checked between files
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Spinner with file operations printed above it
pub struct PushProgress {
    spinner: ProgressBar,
    start_time: Instant,
    show_files: bool,
}

impl PushProgress {
    pub fn new(verbose: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        Self {
            spinner,
            start_time: Instant::now(),
            show_files: verbose,
        }
    }

    /// Route one event to the scrollback or the status line
    pub fn handle(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Syncing { path } => self.set_status(&format!("Syncing {}", path)),
            ProgressEvent::Sent { .. } | ProgressEvent::Skipping { .. } => {
                if self.show_files {
                    self.print_line(&event.to_string());
                }
            }
            ProgressEvent::FileError { .. } | ProgressEvent::Started { .. } => {
                self.print_line(&event.to_string())
            }
            ProgressEvent::ReceivedChecksums { .. } => self.set_status(&event.to_string()),
            ProgressEvent::Completed(_)
            | ProgressEvent::Failed { .. }
            | ProgressEvent::Cancelled(_) => self.finish(&event.to_string()),
        }
    }

    fn print_line(&self, line: &str) {
        self.spinner.suspend(|| println!("  {}", line));
    }

    fn set_status(&self, msg: &str) {
        self.spinner.set_message(format!(
            "{} ({:.1}s)",
            msg,
            self.start_time.elapsed().as_secs_f64()
        ));
    }

    fn finish(&self, msg: &str) {
        self.spinner.finish_with_message(format!(
            "{} in {:.1}s",
            msg,
            self.start_time.elapsed().as_secs_f64()
        ));
    }
}
