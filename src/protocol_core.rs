//! Framed message codec and destination path helpers
//!
//! A frame is a big-endian u32 length followed by that many bytes of JSON.
//! Payloads are parsed as data only; nothing in a frame is ever evaluated.

use crate::checksum::ChecksumMap;
use crate::error::{ProtocolError, Result, SyncError};
use crate::protocol::{command, IO_CHUNK, LEN_PREFIX, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

/// One request, carried by exactly one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Store raw bytes at an absolute path, creating missing parents
    SyncFile {
        dest_path: String,
        #[serde(with = "hex_data")]
        file_data: Vec<u8>,
    },
    /// Ask for the checksum map of an absolute folder
    GetChecksums { folder: String },
}

impl Command {
    pub fn tag(&self) -> &'static str {
        match self {
            Command::SyncFile { .. } => command::SYNC_FILE,
            Command::GetChecksums { .. } => command::GET_CHECKSUMS,
        }
    }
}

// Binary file contents travel as lowercase hex text
mod hex_data {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// A value that can be parsed out of a frame payload
pub trait FramePayload: Sized {
    fn from_payload(bytes: &[u8]) -> std::result::Result<Self, ProtocolError>;
}

impl FramePayload for Command {
    fn from_payload(bytes: &[u8]) -> std::result::Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
        let tag = value
            .get("command")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ProtocolError::MalformedPayload("missing \"command\" key".into()))?;
        if tag != command::SYNC_FILE && tag != command::GET_CHECKSUMS {
            return Err(ProtocolError::UnknownCommand(tag.to_string()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }
}

impl FramePayload for ChecksumMap {
    fn from_payload(bytes: &[u8]) -> std::result::Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }
}

/// Validate frame payload size against MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> std::result::Result<(), ProtocolError> {
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            len: size,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

/// Build the 4-byte big-endian length prefix
pub fn build_frame_header(payload_len: u32) -> [u8; LEN_PREFIX] {
    payload_len.to_be_bytes()
}

/// Parse the length prefix and check it against the size limit
pub fn parse_frame_header(header: &[u8; LEN_PREFIX]) -> std::result::Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(*header) as usize;
    validate_frame_size(len)?;
    Ok(len)
}

/// Serialize `payload` and prepend its length
pub fn encode<T: Serialize>(payload: &T) -> std::result::Result<Vec<u8>, ProtocolError> {
    let body =
        serde_json::to_vec(payload).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
    validate_frame_size(body.len())?;
    let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
    frame.extend_from_slice(&build_frame_header(body.len() as u32));
    frame.extend_from_slice(&body);
    Ok(frame)
}

// Run one socket operation, failing if it makes no progress within `idle_ms`
async fn within<T, F>(idle_ms: Option<u64>, what: &'static str, op: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    let Some(ms) = idle_ms else {
        return op.await.map_err(SyncError::Transport);
    };
    match timeout(Duration::from_millis(ms), op).await {
        Ok(res) => res.map_err(SyncError::Transport),
        Err(_) => Err(SyncError::Timeout { what, ms }),
    }
}

/// Read the length prefix of the next frame
pub async fn read_frame_header<R>(reader: &mut R, idle_ms: Option<u64>) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; LEN_PREFIX];
    let mut filled = 0;
    while filled < LEN_PREFIX {
        let n = within(idle_ms, "frame header read", reader.read(&mut hdr[filled..])).await?;
        if n == 0 {
            return Err(ProtocolError::IncompleteFrame {
                expected: LEN_PREFIX,
                received: filled,
            }
            .into());
        }
        filled += n;
    }
    Ok(parse_frame_header(&hdr)?)
}

/// Read exactly `len` payload bytes following a header.
///
/// The buffer grows with the bytes actually received, so a peer that only
/// announces a large frame pins no memory. `idle_ms` bounds each read, not
/// the whole body.
pub async fn read_frame_body<R>(reader: &mut R, len: usize, idle_ms: Option<u64>) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut payload = Vec::with_capacity(len.min(IO_CHUNK));
    let mut chunk = vec![0u8; len.min(IO_CHUNK)];
    while payload.len() < len {
        let want = (len - payload.len()).min(chunk.len());
        let n = within(idle_ms, "frame body read", reader.read(&mut chunk[..want])).await?;
        if n == 0 {
            return Err(ProtocolError::IncompleteFrame {
                expected: len,
                received: payload.len(),
            }
            .into());
        }
        payload.extend_from_slice(&chunk[..n]);
    }
    Ok(payload)
}

/// Read one frame and return its raw payload bytes
pub async fn read_frame<R>(reader: &mut R, idle_ms: Option<u64>) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = read_frame_header(reader, idle_ms).await?;
    read_frame_body(reader, len, idle_ms).await
}

/// Read one frame and parse it as `T`
pub async fn decode<T, R>(reader: &mut R, idle_ms: Option<u64>) -> Result<T>
where
    T: FramePayload,
    R: AsyncRead + Unpin,
{
    let payload = read_frame(reader, idle_ms).await?;
    Ok(T::from_payload(&payload)?)
}

/// Write an encoded frame in `IO_CHUNK` slices, each bounded by `idle_ms`
pub async fn write_frame<W>(writer: &mut W, frame: &[u8], idle_ms: Option<u64>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for chunk in frame.chunks(IO_CHUNK) {
        within(idle_ms, "frame write", writer.write_all(chunk)).await?;
    }
    within(idle_ms, "frame flush", writer.flush()).await
}

/// Encode `payload` and write it as one frame
pub async fn write_message<T, W>(writer: &mut W, payload: &T, idle_ms: Option<u64>) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let frame = encode(payload)?;
    write_frame(writer, &frame, idle_ms).await
}

/// Join a forward-slash relative key onto a remote root, wire style
pub fn join_remote(remote_root: &str, relative: &str) -> String {
    if remote_root.ends_with('/') || remote_root.ends_with('\\') {
        format!("{}{}", remote_root, relative)
    } else {
        format!("{}/{}", remote_root, relative)
    }
}

/// Resolve an absolute request path and require it to stay under `root`.
///
/// Rejects NUL bytes, relative paths and `..` components. The deepest
/// existing ancestor is canonicalized so symlinks cannot lead outside.
pub fn confine_to_root(root: &Path, p: &Path) -> Result<PathBuf> {
    if p.to_string_lossy().contains('\0')
        || !p.is_absolute()
        || p.components().any(|c| matches!(c, Component::ParentDir))
    {
        return Err(SyncError::OutsideRoot(p.to_path_buf()));
    }
    let canon_root = root.canonicalize().map_err(|e| SyncError::io(root, e))?;

    let mut ancestor = p;
    let anchor = loop {
        if ancestor.symlink_metadata().is_ok() {
            // A dangling symlink fails here and is refused
            break ancestor
                .canonicalize()
                .map_err(|_| SyncError::OutsideRoot(p.to_path_buf()))?;
        }
        match ancestor.parent() {
            Some(parent) => ancestor = parent,
            None => return Err(SyncError::OutsideRoot(p.to_path_buf())),
        }
    };
    if !anchor.starts_with(&canon_root) {
        return Err(SyncError::OutsideRoot(p.to_path_buf()));
    }
    let rest = p.strip_prefix(ancestor).unwrap_or_else(|_| Path::new(""));
    Ok(anchor.join(rest))
}

/// Create directory with parent creation
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| SyncError::io(path, e))?;
    }
    Ok(())
}

/// Create parent directory if needed
pub fn ensure_parent_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir_exists(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sync_file_wire_shape() {
        let cmd = Command::SyncFile {
            dest_path: "/dst/a.txt".into(),
            file_data: b"hi".to_vec(),
        };
        let frame = encode(&cmd).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&frame[LEN_PREFIX..]).unwrap();
        assert_eq!(body["command"], "sync_file");
        assert_eq!(body["dest_path"], "/dst/a.txt");
        assert_eq!(body["file_data"], "6869");
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let cmd = Command::GetChecksums {
            folder: "/srv".into(),
        };
        let frame = encode(&cmd).unwrap();
        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(declared, frame.len() - LEN_PREFIX);
    }

    #[tokio::test]
    async fn test_command_round_trip_with_binary_data() {
        let cmd = Command::SyncFile {
            dest_path: "/dst/blob.bin".into(),
            file_data: (0..=255u8).collect(),
        };
        let frame = encode(&cmd).unwrap();
        let decoded: Command = decode(&mut frame.as_slice(), None).await.unwrap();
        assert_eq!(decoded, cmd);
    }

    #[tokio::test]
    async fn test_checksum_map_round_trip() {
        let mut map = ChecksumMap::new();
        map.insert("a.txt".into(), Checksum::of(b"hi"));
        map.insert("dir/b.txt".into(), Checksum::of(b"bye"));
        let frame = encode(&map).unwrap();
        let decoded: ChecksumMap = decode(&mut frame.as_slice(), None).await.unwrap();
        assert_eq!(decoded, map);
    }

    #[tokio::test]
    async fn test_short_reads_are_reassembled() {
        let cmd = Command::GetChecksums {
            folder: "/some/where".into(),
        };
        let frame = encode(&cmd).unwrap();
        let mut reader = chunked_reader(&frame, 3);
        let decoded: Command = decode(&mut reader, None).await.unwrap();
        assert_eq!(decoded, cmd);
    }

    // Reader that hands out at most `step` bytes per read
    fn chunked_reader(data: &[u8], step: usize) -> impl AsyncRead + Unpin {
        let (client, mut server) = tokio::io::duplex(step);
        let data = data.to_vec();
        tokio::spawn(async move {
            for chunk in data.chunks(step) {
                if server.write_all(chunk).await.is_err() {
                    break;
                }
            }
        });
        client
    }

    #[tokio::test]
    async fn test_truncated_body_is_incomplete_frame() {
        let mut frame = build_frame_header(100).to_vec();
        frame.extend_from_slice(b"{\"command\":");
        let err = read_frame(&mut frame.as_slice(), None).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Protocol(ProtocolError::IncompleteFrame {
                expected: 100,
                received: 11
            })
        ));
    }

    #[tokio::test]
    async fn test_truncated_header_is_incomplete_frame() {
        let err = read_frame(&mut &[0u8, 0][..], None).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Protocol(ProtocolError::IncompleteFrame { expected: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_announced_body_without_data_is_incomplete() {
        let mut frame = build_frame_header(MAX_FRAME_SIZE as u32).to_vec();
        frame.extend_from_slice(b"{}");
        let err = read_frame(&mut frame.as_slice(), None).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Protocol(ProtocolError::IncompleteFrame { expected, received: 2 })
                if expected == MAX_FRAME_SIZE
        ));
    }

    #[tokio::test]
    async fn test_stalled_body_hits_idle_timeout() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(&build_frame_header(10)).await.unwrap();
        tx.write_all(b"{\"a").await.unwrap();
        let err = read_frame(&mut rx, Some(50)).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Timeout {
                what: "frame body read",
                ms: 50
            }
        ));
        drop(tx);
    }

    #[tokio::test]
    async fn test_write_message_in_chunks() {
        let cmd = Command::SyncFile {
            dest_path: "/dst/big.bin".into(),
            file_data: vec![7u8; IO_CHUNK * 2],
        };
        let sent = cmd.clone();
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let writer = tokio::spawn(async move { write_message(&mut tx, &sent, Some(1_000)).await });
        let decoded: Command = decode(&mut rx, Some(1_000)).await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_garbage_is_malformed() {
        for garbage in [
            &b"__import__('os').system('rm -rf /')"[..],
            &[0xff, 0xfe, 0x00, 0x13][..],
            &b"{'command': 'sync_file'}"[..],
            &b"[1,2,3]"[..],
        ] {
            let err = Command::from_payload(garbage).unwrap_err();
            assert!(matches!(err, ProtocolError::MalformedPayload(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_bad_hex_is_malformed() {
        let body = br#"{"command":"sync_file","dest_path":"/x","file_data":"zz"}"#;
        assert!(matches!(
            Command::from_payload(body),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let body = br#"{"command":"get_checksums"}"#;
        assert!(matches!(
            Command::from_payload(body),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_unknown_tag_is_reported() {
        let body = br#"{"command":"launch_editor","path":"/x"}"#;
        match Command::from_payload(body) {
            Err(ProtocolError::UnknownCommand(tag)) => assert_eq!(tag, "launch_editor"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_oversized_header_rejected() {
        let hdr = build_frame_header(u32::MAX);
        assert!(matches!(
            parse_frame_header(&hdr),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_validate_frame_size_edge_cases() {
        assert!(validate_frame_size(0).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE + 1).is_err());
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/srv/dst", "a/b.txt"), "/srv/dst/a/b.txt");
        assert_eq!(join_remote("/srv/dst/", "a.txt"), "/srv/dst/a.txt");
    }

    #[test]
    fn test_confine_accepts_new_nested_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("new/nested/file.txt");
        let resolved = confine_to_root(tmp.path(), &target).unwrap();
        assert!(resolved.starts_with(tmp.path().canonicalize().unwrap()));
        assert!(resolved.ends_with("new/nested/file.txt"));
    }

    #[test]
    fn test_confine_rejects_escapes() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir(&root).unwrap();
        assert!(confine_to_root(&root, &root.join("../x")).is_err());
        assert!(confine_to_root(&root, &tmp.path().join("sibling.txt")).is_err());
        assert!(confine_to_root(&root, Path::new("relative.txt")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_confine_rejects_symlink_escape() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("link")).unwrap();
        assert!(confine_to_root(tmp.path(), &tmp.path().join("link/evil.txt")).is_err());
    }

    #[test]
    fn test_ensure_parent_exists() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("new").join("nested").join("file.txt");

        assert!(!file_path.parent().unwrap().exists());
        ensure_parent_exists(&file_path).unwrap();
        assert!(file_path.parent().unwrap().is_dir());
        // Should be idempotent
        ensure_parent_exists(&file_path).unwrap();
    }
}
