use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::ProbeError;
use crate::resolver::Resolve;
use crate::target::ResolvedAddress;

pub mod tcp_connect;
pub mod tls;

use tls::TlsMetadata;

/// Time spent in each phase of a probe. `handshake` is only set when a TLS
/// handshake was attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    pub connect: Duration,
    pub handshake: Option<Duration>,
    pub total: Duration,
}

/// Outcome of probing one address.
#[derive(Debug)]
pub struct ProbeResult {
    pub address: ResolvedAddress,
    pub timings: PhaseTimings,
    pub peer_ip: Option<IpAddr>,
    pub tls: Option<TlsMetadata>,
    pub names: Vec<String>,
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    fn new(address: ResolvedAddress) -> Self {
        Self {
            address,
            timings: PhaseTimings::default(),
            peer_ip: None,
            tls: None,
            names: Vec::new(),
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Dials addresses, optionally layers TLS on top, and looks up the peer.
pub struct Prober {
    resolver: Arc<dyn Resolve>,
    tls: Option<TlsConnector>,
    dial_timeout: Duration,
    handshake_timeout: Duration,
}

impl Prober {
    pub fn new(resolver: Arc<dyn Resolve>, dial_timeout: Duration, handshake_timeout: Duration) -> Self {
        Self {
            resolver,
            tls: None,
            dial_timeout,
            handshake_timeout,
        }
    }

    pub fn with_tls(mut self, connector: TlsConnector) -> Self {
        self.tls = Some(connector);
        self
    }

    pub async fn probe(&self, address: ResolvedAddress) -> ProbeResult {
        let network = address.target.network();
        let mut result = ProbeResult::new(address);

        let start = Instant::now();
        let dialed = tcp_connect::dial(network, &result.address.dial, self.dial_timeout).await;
        let connected = Instant::now();
        result.timings.connect = connected - start;
        result.timings.total = result.timings.connect;

        let transport = match dialed {
            Ok(t) => t,
            Err(e) => {
                if e.is_timeout() {
                    debug!("dial {} gave up after {:?}", result.address.dial, result.timings.connect);
                } else {
                    debug!("dial {} failed after {:?}: {}", result.address.dial, result.timings.connect, e);
                }
                result.error = Some(ProbeError::Dial(e));
                return result;
            }
        };
        result.peer_ip = transport.peer_ip();
        debug!("dial {} connected in {:?}", result.address.dial, result.timings.connect);

        match &self.tls {
            None => drop(transport),
            Some(connector) => {
                let sni = result.address.target.server_name();
                let shaken = tls::handshake(connector, &sni, transport, self.handshake_timeout).await;
                let done = Instant::now();
                result.timings.handshake = Some(done - connected);
                result.timings.total = done - start;

                match shaken {
                    Ok(mut stream) => {
                        result.tls = Some(TlsMetadata::from_connection(stream.get_ref().1, &sni));
                        // close_notify, then the socket goes with the stream
                        let _ = tokio::time::timeout(self.handshake_timeout, stream.shutdown()).await;
                    }
                    Err(e) => {
                        debug!("tls handshake with {} failed: {}", result.address.dial, e);
                        result.error = Some(ProbeError::Handshake(e));
                    }
                }
            }
        }

        // Names are cosmetic: any failure leaves the list empty. Error rows
        // have no name column.
        if let Some(ip) = result.peer_ip.filter(|_| result.is_ok()) {
            result.names = self.resolver.lookup_addr(ip).await.unwrap_or_else(|e| {
                debug!("reverse lookup of {} failed: {}", ip, e);
                Vec::new()
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use crate::target::{Network, Target};
    use tokio::net::TcpListener;

    fn prober(resolver: StaticResolver) -> Prober {
        Prober::new(Arc::new(resolver), Duration::from_secs(5), Duration::from_secs(5))
    }

    async fn listener() -> (TcpListener, String) {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = l.local_addr().unwrap().to_string();
        (l, addr)
    }

    #[tokio::test]
    async fn plain_probe_records_connect_time_peer_and_names() {
        let (l, addr) = listener().await;
        tokio::spawn(async move {
            let _ = l.accept().await;
        });
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let p = prober(StaticResolver::default().with_names(ip, vec!["localhost."]));

        let target = Target::parse(&addr, Network::Tcp).unwrap();
        let res = p.probe(ResolvedAddress::direct(&target)).await;

        assert!(res.is_ok(), "{:?}", res.error);
        assert_eq!(res.peer_ip, Some(ip));
        assert_eq!(res.names, vec!["localhost.".to_string()]);
        assert_eq!(res.timings.handshake, None);
        assert_eq!(res.timings.total, res.timings.connect);
        assert!(res.tls.is_none());
    }

    #[tokio::test]
    async fn reverse_lookup_failure_keeps_the_row() {
        let (l, addr) = listener().await;
        tokio::spawn(async move {
            let _ = l.accept().await;
        });
        let p = prober(StaticResolver::default());

        let target = Target::parse(&addr, Network::Tcp).unwrap();
        let res = p.probe(ResolvedAddress::direct(&target)).await;

        assert!(res.is_ok());
        assert!(res.names.is_empty());
        assert!(res.peer_ip.is_some());
    }

    #[tokio::test]
    async fn failed_dial_skips_later_phases() {
        let port = {
            let (l, _) = listener().await;
            l.local_addr().unwrap().port()
        };
        let resolver = Arc::new(StaticResolver::default());
        let p = Prober::new(resolver.clone(), Duration::from_secs(5), Duration::from_secs(5));

        let target = Target::parse(&format!("127.0.0.1:{port}"), Network::Tcp).unwrap();
        let res = p.probe(ResolvedAddress::direct(&target)).await;

        assert!(matches!(res.error, Some(ProbeError::Dial(_))));
        assert_eq!(res.peer_ip, None);
        assert!(res.names.is_empty());
        assert_eq!(resolver.lookups(), 0);
    }
}
