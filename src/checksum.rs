//! Content checksums for single files and whole folders

use crate::error::{Result, SyncError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use std::str::FromStr;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Read granularity when hashing files
pub const CHUNK_SIZE: usize = 8 * 1024;

/// 128-bit MD5 digest of a file's bytes.
///
/// Used only to tell whether two files differ; not an integrity guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 16]);

impl Checksum {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Digest of an in-memory buffer
    pub fn of(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut out = [0u8; 16];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Relative path (forward slashes) to checksum, for one folder snapshot
pub type ChecksumMap = BTreeMap<String, Checksum>;

/// Hash a file in `CHUNK_SIZE` reads so large files never sit in memory whole
pub fn checksum_file(path: &Path) -> Result<Checksum> {
    let mut file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    let mut ctx = md5::Context::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| SyncError::io(path, e))?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(Checksum(ctx.compute().0))
}

/// Build the map key for `path` under `root`: components joined with '/'.
/// Returns None when `path` is not under `root` or names the root itself.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Checksum every regular file under `root`.
///
/// Symlinks are neither followed nor hashed. Unreadable files and walk errors
/// are logged and left out of the map. A missing `root` yields an empty map.
pub fn checksum_folder(root: &Path) -> ChecksumMap {
    let mut map = ChecksumMap::new();
    if !root.exists() {
        debug!(root = %root.display(), "checksum root does not exist; returning empty map");
        return map;
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(root = %root.display(), "skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(key) = relative_key(root, entry.path()) else {
            continue;
        };
        match checksum_file(entry.path()) {
            Ok(sum) => {
                debug!("File: {}, Checksum: {}", key, sum);
                map.insert(key, sum);
            }
            Err(e) => warn!("Error calculating checksum: {}", e),
        }
    }

    map
}
