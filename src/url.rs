//! URL parsing for dirpush:// remote destinations

use crate::protocol::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDest {
    pub host: String,
    pub port: u16,
    /// Absolute folder on the receiver, always starting with '/'
    pub path: String,
}

/// Parse `dirpush://host[:port]/abs/path`. Returns None for anything else.
pub fn parse_remote_url(s: &str) -> Option<RemoteDest> {
    let s_trim = s.trim();
    let lower = s_trim.to_ascii_lowercase();
    let scheme_end = lower.find(':')?;
    if &lower[..=scheme_end] != "dirpush:" {
        return None;
    }
    let mut rest = &s_trim[scheme_end + 1..];
    if let Some(r) = rest.strip_prefix("//") {
        rest = r;
    }
    let (hp, p) = rest.split_once('/').unwrap_or((rest, ""));
    if hp.is_empty() {
        return None;
    }
    let (host, port) = match hp.rsplit_once(':') {
        Some((h, pr)) => (h.to_string(), pr.parse().ok()?),
        None => (hp.to_string(), DEFAULT_PORT),
    };
    if host.is_empty() {
        return None;
    }
    Some(RemoteDest {
        host,
        port,
        path: format!("/{}", p),
    })
}
