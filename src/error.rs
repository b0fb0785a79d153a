use std::time::Duration;

use thiserror::Error;
use trust_dns_resolver::error::ResolveError;

/// Failure of a single network operation (dial, lookup, handshake).
#[derive(Debug, Error)]
pub enum NetError {
    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("no addresses found for {0}")]
    NoAddresses(String),

    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    #[error("unix sockets are not supported on this platform")]
    UnixUnsupported,
}

impl NetError {
    pub fn is_timeout(&self) -> bool {
        match self {
            NetError::Timeout { .. } => true,
            NetError::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

/// What went wrong for one target or one of its addresses.
///
/// `Resolution` and `InvalidTarget` take down the whole target group and are
/// reported on the diagnostic stream. `Dial` and `Handshake` only affect the
/// address they happened on and are rendered as error rows.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid target {0:?}: expected host:port")]
    InvalidTarget(String),

    #[error("error resolving {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: NetError,
    },

    #[error("error connecting: {0}")]
    Dial(#[source] NetError),

    #[error("tls handshake failed: {0}")]
    Handshake(#[source] NetError),
}
