// Helpers shared by the prober, resolver and coordinator: deadlines,
// host/port parsing and input reading.

use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::NetError;

/// Run one network operation with its own deadline.
///
/// Every dial, lookup and handshake goes through here so that a timeout is
/// always reported the same way, tagged with the operation name.
pub async fn with_deadline<T, E, F>(op: &'static str, timeout: Duration, fut: F) -> Result<T, NetError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<NetError>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res.map_err(Into::into),
        Err(_elapsed) => Err(NetError::Timeout { op, timeout }),
    }
}

/// Split `host:port` into its parts. IPv6 hosts must be bracketed
/// (`[::1]:443`); the brackets are stripped from the returned host.
pub fn split_host_port(s: &str) -> Option<(&str, u16)> {
    let (host, port) = s.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']')?,
        None if host.contains(':') => return None,
        None => host,
    };
    if host.is_empty() {
        return None;
    }
    Some((host, port))
}

/// Read newline-delimited records, trimming whitespace and skipping blanks.
pub async fn read_lines<R>(input: R) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            out.push(line.to_string());
        }
    }
    Ok(out)
}

static IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("IPv4 pattern is valid")
});

/// Pull every IPv4-looking token out of free-form text records.
pub fn grep_ipv4<S: AsRef<str>>(records: &[S]) -> Vec<String> {
    let joined = records.iter().map(|r| r.as_ref()).collect::<Vec<&str>>().join(" ");
    IPV4.find_iter(&joined).map(|m| m.as_str().to_string()).collect()
}
