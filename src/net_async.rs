//! Async (Tokio) transport for the dirpush receiver and initiator.
//!
//! Every request travels on its own TCP connection: one frame in, at most one
//! frame out, then close. The receiver keeps no state between connections.

use crate::error::{Result, SyncError};
use std::future::Future;
use tokio::io::AsyncRead;
use tokio::time::{timeout, Duration};

#[inline]
async fn with_timeout<T, F>(ms: u64, what: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(Duration::from_millis(ms), fut).await {
        Ok(res) => res,
        Err(_) => Err(SyncError::Timeout { what, ms }),
    }
}

/// Run blocking filesystem work off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::Transport(std::io::Error::other(e)))?
}

pub mod server {
    use super::*;
    use crate::checksum::checksum_folder;
    use crate::config::DaemonConfig;
    use crate::error::ProtocolError;
    use crate::protocol_core::{confine_to_root, decode, ensure_parent_exists, write_message, Command};
    use anyhow::Context;
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tokio::io::AsyncWrite;
    use tokio::net::TcpListener;
    use tracing::{debug, error, info, warn};

    pub async fn bind(config: &DaemonConfig) -> anyhow::Result<TcpListener> {
        TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("bind {}", config.bind))
    }

    /// Accept connections forever on an already bound listener.
    ///
    /// Sequential by default: the next connection is accepted only after the
    /// previous one is closed. With `concurrent` each connection gets a task.
    pub async fn serve_listener(listener: TcpListener, config: DaemonConfig) -> anyhow::Result<()> {
        let local = listener.local_addr().context("listener address")?;
        info!(
            "Listening on {} (root={}, mode={})",
            local,
            config
                .root
                .as_ref()
                .map(|r| r.display().to_string())
                .unwrap_or_else(|| "unrestricted".into()),
            if config.concurrent { "concurrent" } else { "sequential" }
        );
        let config = Arc::new(config);
        loop {
            let (mut stream, peer) = listener.accept().await.context("accept")?;
            let _ = stream.set_nodelay(true);
            info!("Connected by {}", peer);
            if config.concurrent {
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    finish_connection(handle_connection(&mut stream, &config).await, peer);
                });
            } else {
                finish_connection(handle_connection(&mut stream, &config).await, peer);
            }
        }
    }

    /// Serve until `shutdown` resolves. Returns Ok on shutdown and the accept
    /// loop's error otherwise.
    pub async fn serve_until<F>(
        listener: TcpListener,
        config: DaemonConfig,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            res = serve_listener(listener, config) => res,
            _ = shutdown => Ok(()),
        }
    }

    fn finish_connection(res: Result<()>, peer: SocketAddr) {
        match res {
            Ok(()) => debug!("closed connection from {}", peer),
            Err(SyncError::Protocol(e)) => warn!("dropping connection from {}: {}", peer, e),
            Err(e) => error!("connection from {} failed: {}", peer, e),
        }
    }

    /// Read one command, apply it, reply if it asks for data. The caller
    /// closes the stream afterwards.
    pub async fn handle_connection<S>(stream: &mut S, config: &DaemonConfig) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle = Some(config.io_timeout_ms);
        let cmd: Command = decode(stream, idle).await?;
        debug!(command = cmd.tag(), "dispatching");
        match cmd {
            Command::SyncFile {
                dest_path,
                file_data,
            } => {
                let dest = resolve(config, &dest_path)?;
                let bytes = file_data.len();
                let shown = dest.clone();
                blocking(move || store_file(&dest, &file_data)).await?;
                info!("Synced file to {} ({} bytes)", shown.display(), bytes);
            }
            Command::GetChecksums { folder } => {
                let dir = resolve(config, &folder)?;
                info!("Calculating checksums for folder: {}", dir.display());
                let map = blocking(move || Ok(checksum_folder(&dir))).await?;
                write_message(stream, &map, idle).await?;
                info!("Sent {} checksums", map.len());
            }
        }
        Ok(())
    }

    // Requests carry absolute paths; with a root configured they must stay under it
    fn resolve(config: &DaemonConfig, requested: &str) -> Result<PathBuf> {
        let p = Path::new(requested);
        match &config.root {
            Some(root) => confine_to_root(root, p),
            None if p.is_absolute() => Ok(p.to_path_buf()),
            None => Err(ProtocolError::MalformedPayload(format!(
                "path must be absolute: {}",
                requested
            ))
            .into()),
        }
    }

    /// Replace `dest` in full with `data`, creating missing parents
    pub fn store_file(dest: &Path, data: &[u8]) -> Result<()> {
        ensure_parent_exists(dest)?;
        std::fs::write(dest, data).map_err(|e| SyncError::io(dest, e))
    }
}

pub mod client {
    use super::*;
    use crate::checksum::{checksum_file, relative_key, ChecksumMap};
    use crate::config::PushConfig;
    use crate::progress::{CancelFlag, ProgressEvent, PushSummary};
    use crate::protocol_core::{decode, join_remote, write_message, Command};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tracing::{debug, info, warn};
    use walkdir::WalkDir;

    pub async fn connect(config: &PushConfig) -> Result<TcpStream> {
        let addr = config.remote_addr();
        let stream = with_timeout(config.connect_timeout_ms, "connect", async {
            TcpStream::connect(&addr)
                .await
                .map_err(|e| SyncError::connection(addr.clone(), e))
        })
        .await?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// Ask the receiver for the checksum map of `remote_root`
    pub async fn fetch_checksums(config: &PushConfig) -> Result<ChecksumMap> {
        let mut stream = connect(config).await?;
        let cmd = Command::GetChecksums {
            folder: config.remote_root.clone(),
        };
        let idle = Some(config.io_timeout_ms);
        write_message(&mut stream, &cmd, idle).await?;
        decode::<ChecksumMap, _>(&mut stream, idle).await
    }

    /// Send one file on a fresh connection and wait for the receiver to close it
    pub async fn send_file(config: &PushConfig, dest_path: String, file_data: Vec<u8>) -> Result<()> {
        let mut stream = connect(config).await?;
        let cmd = Command::SyncFile {
            dest_path,
            file_data,
        };
        write_message(&mut stream, &cmd, Some(config.io_timeout_ms)).await?;
        let _ = stream.shutdown().await;
        // No reply is defined; the receiver closing the connection means done
        with_timeout(config.io_timeout_ms, "close wait", async {
            let mut sink = Vec::new();
            stream
                .read_to_end(&mut sink)
                .await
                .map_err(SyncError::Transport)?;
            Ok::<(), SyncError>(())
        })
        .await
    }

    async fn emit(tx: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) {
        debug!("{}", event);
        // A dropped receiver only means nobody is watching
        let _ = tx.send(event).await;
    }

    /// Push `local_root` to the receiver, reporting through `tx`.
    ///
    /// Ends with exactly one terminal event. Only the initial checksum fetch
    /// is fatal; per-file failures are reported and skipped. `cancel` is
    /// checked before each file, never in the middle of a transfer.
    pub async fn push_folder(
        config: &PushConfig,
        cancel: &CancelFlag,
        tx: &mpsc::Sender<ProgressEvent>,
    ) -> PushSummary {
        let mut summary = PushSummary::default();
        let local_root = config.local_root.clone();

        if !local_root.is_dir() {
            emit(
                tx,
                ProgressEvent::Failed {
                    message: format!("local folder is not a directory: {}", local_root.display()),
                },
            )
            .await;
            return summary;
        }

        emit(
            tx,
            ProgressEvent::Started {
                local_root: local_root.display().to_string(),
                remote: format!("{}:{}", config.remote_addr(), config.remote_root),
            },
        )
        .await;

        let remote = match fetch_checksums(config).await {
            Ok(map) => map,
            Err(e) => {
                warn!("checksum fetch from {} failed: {}", config.remote_addr(), e);
                emit(
                    tx,
                    ProgressEvent::Failed {
                        message: format!("could not get checksums from listener: {}", e),
                    },
                )
                .await;
                return summary;
            }
        };
        emit(tx, ProgressEvent::ReceivedChecksums { count: remote.len() }).await;

        for entry in WalkDir::new(&local_root).follow_links(false).sort_by_file_name() {
            if cancel.is_cancelled() {
                info!("push cancelled");
                emit(tx, ProgressEvent::Cancelled(summary)).await;
                return summary;
            }
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e
                        .path()
                        .and_then(|p| relative_key(&local_root, p))
                        .unwrap_or_else(|| local_root.display().to_string());
                    summary.failed += 1;
                    emit(
                        tx,
                        ProgressEvent::FileError {
                            path,
                            message: e.to_string(),
                        },
                    )
                    .await;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = relative_key(&local_root, entry.path()) else {
                continue;
            };
            let path = entry.path().to_path_buf();

            let local = {
                let path = path.clone();
                blocking(move || checksum_file(&path)).await
            };
            let local = match local {
                Ok(sum) => sum,
                Err(e) => {
                    summary.failed += 1;
                    emit(
                        tx,
                        ProgressEvent::FileError {
                            path: key,
                            message: e.to_string(),
                        },
                    )
                    .await;
                    continue;
                }
            };

            if remote.get(&key) == Some(&local) {
                summary.skipped += 1;
                emit(tx, ProgressEvent::Skipping { path: key }).await;
                continue;
            }

            emit(tx, ProgressEvent::Syncing { path: key.clone() }).await;
            let sent = async {
                let data = tokio::fs::read(&path)
                    .await
                    .map_err(|e| SyncError::io(&path, e))?;
                let bytes = data.len() as u64;
                send_file(config, join_remote(&config.remote_root, &key), data).await?;
                Ok::<u64, SyncError>(bytes)
            }
            .await;
            match sent {
                Ok(bytes) => {
                    summary.synced += 1;
                    summary.bytes_sent += bytes;
                    emit(tx, ProgressEvent::Sent { path: key, bytes }).await;
                }
                Err(e) => {
                    summary.failed += 1;
                    emit(
                        tx,
                        ProgressEvent::FileError {
                            path: key,
                            message: e.to_string(),
                        },
                    )
                    .await;
                }
            }
        }

        info!(
            "push finished: {} synced, {} unchanged, {} failed",
            summary.synced, summary.skipped, summary.failed
        );
        emit(tx, ProgressEvent::Completed(summary)).await;
        summary
    }

    /// A push running on its own task
    pub struct PushHandle {
        pub events: mpsc::Receiver<ProgressEvent>,
        pub task: JoinHandle<PushSummary>,
    }

    impl PushHandle {
        /// Drain events until the push ends
        pub async fn collect_events(mut self) -> Vec<ProgressEvent> {
            let mut out = Vec::new();
            while let Some(ev) = self.events.recv().await {
                out.push(ev);
            }
            let _ = self.task.await;
            out
        }
    }

    /// Start `push_folder` in the background; events arrive on the handle
    pub fn spawn_push(config: PushConfig, cancel: CancelFlag) -> PushHandle {
        let (tx, events) = mpsc::channel(64);
        let task = tokio::spawn(async move { push_folder(&config, &cancel, &tx).await });
        PushHandle { events, task }
    }
}
