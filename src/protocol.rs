//! Shared protocol constants for the dirpush framed transport

/// Receiver port used when none is configured
pub const DEFAULT_PORT: u16 = 65432;

pub const DEFAULT_BIND: &str = "0.0.0.0:65432";

/// Every frame starts with a big-endian u32 payload length
pub const LEN_PREFIX: usize = 4;

// Maximum frame payload size (1GiB) - prevents DoS via memory exhaustion.
// File data travels hex-encoded, so this caps a single file near 512MiB.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024 * 1024;

/// Values of the "command" key in request payloads
pub mod command {
    pub const SYNC_FILE: &str = "sync_file";
    pub const GET_CHECKSUMS: &str = "get_checksums";
}

// Centralized timeout constants for the client and the daemon
pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // Longest a single read or write may make no progress (ms).
    // Applied per chunk, so large frames on slow links are not cut off.
    pub const IO_IDLE_MS: u64 = 30_000;
}

/// Largest slice moved by one socket read or write
pub const IO_CHUNK: usize = 64 * 1024;
