//! Error taxonomy shared by the receiver and the initiator

use std::path::PathBuf;

/// Failures while reading or interpreting one frame
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("incomplete frame: expected {expected} bytes, received {received}")]
    IncompleteFrame { expected: usize, received: usize },
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("frame payload too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: usize },
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("connection error ({addr}): {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),
    #[error("{what} timed out after {ms} ms")]
    Timeout { what: &'static str, ms: u64 },
    #[error("path {} is outside the served root", .0.display())]
    OutsideRoot(PathBuf),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn connection(addr: impl Into<String>, source: std::io::Error) -> Self {
        SyncError::Connection {
            addr: addr.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
