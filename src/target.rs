use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::debug;

use crate::error::ProbeError;
use crate::resolver::Resolve;
use crate::util::split_host_port;

/// Transport used to reach a target. Chosen by the caller, never guessed
/// from the target string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Network {
    #[default]
    Tcp,
    Unix,
}

/// An endpoint as the user wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Tcp { raw: String, host: String, port: u16 },
    Unix { path: PathBuf },
}

impl Target {
    pub fn parse(raw: &str, network: Network) -> Result<Self, ProbeError> {
        let raw = raw.trim();
        match network {
            Network::Unix if !raw.is_empty() => Ok(Target::Unix {
                path: PathBuf::from(raw),
            }),
            Network::Unix => Err(ProbeError::InvalidTarget(raw.to_string())),
            Network::Tcp => {
                let (host, port) =
                    split_host_port(raw).ok_or_else(|| ProbeError::InvalidTarget(raw.to_string()))?;
                Ok(Target::Tcp {
                    raw: raw.to_string(),
                    host: host.to_string(),
                    port,
                })
            }
        }
    }

    pub fn network(&self) -> Network {
        match self {
            Target::Tcp { .. } => Network::Tcp,
            Target::Unix { .. } => Network::Unix,
        }
    }

    /// The name sent as TLS SNI: the host part, or the socket path.
    pub fn server_name(&self) -> String {
        match self {
            Target::Tcp { host, .. } => host.clone(),
            Target::Unix { path } => path.display().to_string(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tcp { raw, .. } => f.write_str(raw),
            Target::Unix { path } => write!(f, "{}", path.display()),
        }
    }
}

/// A concrete address to dial, tied to the target it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub target: Target,
    pub dial: String,
}

impl ResolvedAddress {
    /// Dial the target as written and let the dialer resolve it.
    pub fn direct(target: &Target) -> Self {
        Self {
            dial: target.to_string(),
            target: target.clone(),
        }
    }
}

/// Turn one target into the addresses to probe.
///
/// Without fan-out (and always for unix sockets) the target is returned as
/// is. With fan-out the host is resolved once and every IP gets its own
/// address with the original port; a failed lookup fails the whole target.
pub async fn expand(
    target: &Target,
    fan_out: bool,
    resolver: &dyn Resolve,
) -> Result<Vec<ResolvedAddress>, ProbeError> {
    let (host, port) = match target {
        Target::Tcp { host, port, .. } if fan_out => (host, *port),
        _ => return Ok(vec![ResolvedAddress::direct(target)]),
    };

    let ips = resolver
        .lookup_host(host)
        .await
        .map_err(|source| ProbeError::Resolution {
            host: host.clone(),
            source,
        })?;
    debug!("{} fans out to {} address(es)", target, ips.len());

    Ok(ips
        .into_iter()
        .map(|ip| ResolvedAddress {
            target: target.clone(),
            dial: SocketAddr::new(ip, port).to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetError;
    use crate::resolver::StaticResolver;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn parses_tcp_targets() {
        let t = Target::parse("example.com:443", Network::Tcp).unwrap();
        assert_eq!(t.server_name(), "example.com");
        assert_eq!(t.to_string(), "example.com:443");
        assert_eq!(t.network(), Network::Tcp);
    }

    #[test]
    fn rejects_tcp_target_without_port() {
        let err = Target::parse("example.com", Network::Tcp).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidTarget(_)));
    }

    #[test]
    fn unix_targets_are_paths() {
        let t = Target::parse("/run/app.sock", Network::Unix).unwrap();
        assert_eq!(t, Target::Unix { path: "/run/app.sock".into() });
        assert_eq!(t.to_string(), "/run/app.sock");
    }

    #[tokio::test]
    async fn without_fan_out_target_is_dialed_verbatim() {
        let resolver = StaticResolver::default();
        let t = Target::parse("example.com:80", Network::Tcp).unwrap();
        let addrs = expand(&t, false, &resolver).await.unwrap();
        assert_eq!(addrs, vec![ResolvedAddress::direct(&t)]);
        assert_eq!(addrs[0].dial, "example.com:80");
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn fan_out_yields_one_address_per_ip_with_original_port() {
        let resolver = StaticResolver::default()
            .with_host("multi.test", vec![ip("192.0.2.1"), ip("192.0.2.2"), ip("2001:db8::1")]);
        let t = Target::parse("multi.test:8443", Network::Tcp).unwrap();
        let addrs = expand(&t, true, &resolver).await.unwrap();
        let dials: Vec<_> = addrs.iter().map(|a| a.dial.as_str()).collect();
        assert_eq!(dials, vec!["192.0.2.1:8443", "192.0.2.2:8443", "[2001:db8::1]:8443"]);
        assert!(addrs.iter().all(|a| a.target == t));
    }

    #[tokio::test]
    async fn fan_out_failure_fails_the_whole_target() {
        let resolver = StaticResolver::default();
        let t = Target::parse("missing.test:80", Network::Tcp).unwrap();
        match expand(&t, true, &resolver).await {
            Err(ProbeError::Resolution { host, source }) => {
                assert_eq!(host, "missing.test");
                assert!(matches!(source, NetError::NoAddresses(_)));
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unix_targets_bypass_fan_out() {
        let resolver = StaticResolver::default();
        let t = Target::parse("/tmp/x.sock", Network::Unix).unwrap();
        let addrs = expand(&t, true, &resolver).await.unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(resolver.lookups(), 0);
    }
}
