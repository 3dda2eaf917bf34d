//! dirpush library
//!
//! One-way folder push over TCP: the initiator compares content checksums
//! with the receiver and sends only files that differ.

pub mod checksum;
pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod net_async;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod url;
