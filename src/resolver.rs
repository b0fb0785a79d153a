//! Forward and reverse name resolution with bounded deadlines.
//!
//! [`DnsResolver`] is the production implementation on top of
//! `trust-dns-resolver`. [`StaticResolver`] answers from an in-memory table
//! and is used to drive fan-out deterministically.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};

use crate::error::NetError;
use crate::util::with_deadline;

/// Name resolution as seen by the expander, prober and coordinator.
///
/// Implementations hold no per-call mutable state, so one instance is
/// shared by every concurrent unit of a run.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolve a host name to all of its addresses.
    async fn lookup_host(&self, name: &str) -> Result<Vec<IpAddr>, NetError>;

    /// Resolve an address back to its names.
    async fn lookup_addr(&self, ip: IpAddr) -> Result<Vec<String>, NetError>;
}

pub struct DnsResolver {
    inner: TokioAsyncResolver,
    lookup_timeout: Duration,
    reverse_timeout: Duration,
}

impl DnsResolver {
    /// Build from the system resolver configuration, falling back to the
    /// library defaults when it can't be read.
    pub fn from_system_conf(lookup_timeout: Duration, reverse_timeout: Duration) -> Self {
        let inner = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!("reading system resolver configuration failed, using defaults: {}", e);
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self {
            inner,
            lookup_timeout,
            reverse_timeout,
        }
    }
}

#[async_trait]
impl Resolve for DnsResolver {
    async fn lookup_host(&self, name: &str) -> Result<Vec<IpAddr>, NetError> {
        if let Ok(ip) = name.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let lookup = with_deadline("lookup", self.lookup_timeout, self.inner.lookup_ip(name)).await?;
        let ips: Vec<IpAddr> = lookup.iter().collect();
        debug!("lookup {} -> {:?}", name, ips);
        if ips.is_empty() {
            return Err(NetError::NoAddresses(name.to_string()));
        }
        Ok(ips)
    }

    async fn lookup_addr(&self, ip: IpAddr) -> Result<Vec<String>, NetError> {
        let lookup = with_deadline("reverse lookup", self.reverse_timeout, self.inner.reverse_lookup(ip)).await?;
        Ok(lookup.iter().map(|name| name.to_string()).collect())
    }
}

/// Resolver answering from fixed tables, with an optional artificial delay
/// applied to every call.
#[derive(Debug, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
    names: HashMap<IpAddr, Vec<String>>,
    delay: Option<Duration>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    pub fn with_host(mut self, name: &str, ips: Vec<IpAddr>) -> Self {
        self.hosts.insert(name.to_string(), ips);
        self
    }

    pub fn with_names(mut self, ip: IpAddr, names: Vec<&str>) -> Self {
        self.names.insert(ip, names.into_iter().map(String::from).collect());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of forward and reverse lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    async fn pause(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Resolve for StaticResolver {
    async fn lookup_host(&self, name: &str) -> Result<Vec<IpAddr>, NetError> {
        self.pause().await;
        match self.hosts.get(name) {
            Some(ips) if !ips.is_empty() => Ok(ips.clone()),
            _ => Err(NetError::NoAddresses(name.to_string())),
        }
    }

    async fn lookup_addr(&self, ip: IpAddr) -> Result<Vec<String>, NetError> {
        self.pause().await;
        self.names.get(&ip).cloned().ok_or_else(|| {
            NetError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no names found for {ip}"),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_answers_from_tables() {
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        let r = StaticResolver::default()
            .with_host("svc.test", vec![ip])
            .with_names(ip, vec!["svc.test."]);

        assert_eq!(r.lookup_host("svc.test").await.unwrap(), vec![ip]);
        assert_eq!(r.lookup_addr(ip).await.unwrap(), vec!["svc.test.".to_string()]);
        assert!(r.lookup_host("other.test").await.is_err());
        assert_eq!(r.lookups(), 3);
    }

    #[tokio::test]
    async fn dns_resolver_short_circuits_ip_literals() {
        let r = DnsResolver::from_system_conf(Duration::from_secs(5), Duration::from_secs(3));
        let ips = r.lookup_host("127.0.0.1").await.unwrap();
        assert_eq!(ips, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn dns_resolver_resolves_public_names() {
        let r = DnsResolver::from_system_conf(Duration::from_secs(5), Duration::from_secs(3));
        let ips = r.lookup_host("one.one.one.one").await.unwrap();
        assert!(!ips.is_empty());
        let names = r.lookup_addr("1.1.1.1".parse().unwrap()).await.unwrap();
        assert!(names.iter().any(|n| n.contains("one.one.one.one")));
    }
}
