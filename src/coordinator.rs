//! Fans targets out into concurrent units and hands finished groups to the
//! sink.
//!
//! One task per target; inside it, one task per resolved address (dial) or
//! per resolved IP (lookup). A target's group is written only after all of
//! its children have joined. Nothing orders groups of different targets.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::{NetError, ProbeError};
use crate::output::{TableSink, fetch_row, lookup_rows, probe_row};
use crate::prober::{ProbeResult, Prober, tcp_connect};
use crate::resolver::Resolve;
use crate::scheduler::Scheduler;
use crate::target::{Network, ResolvedAddress, Target, expand};

/// Optional cap on concurrently running leaf units. Unbounded by default.
#[derive(Debug, Clone, Default)]
pub struct Admission(Option<Arc<Semaphore>>);

impl Admission {
    pub fn unbounded() -> Self {
        Self(None)
    }

    pub fn limited(max_in_flight: usize) -> Self {
        Self(Some(Arc::new(Semaphore::new(max_in_flight.max(1)))))
    }

    pub fn from_limit(limit: Option<usize>) -> Self {
        limit.map_or_else(Self::unbounded, Self::limited)
    }

    /// Wait for a slot. The slot is held until the permit is dropped.
    pub async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        match &self.0 {
            Some(sem) => sem.clone().acquire_owned().await.ok(),
            None => None,
        }
    }
}

/// Forward lookup of one name and, optionally, the reverse lookup of each
/// address it resolved to.
#[derive(Debug)]
pub struct LookupResult {
    pub name: String,
    pub elapsed: Duration,
    pub entries: Vec<LookupEntry>,
}

#[derive(Debug)]
pub struct LookupEntry {
    pub ip: IpAddr,
    /// `None` when reverse lookups were not requested.
    pub names: Option<Result<Vec<String>, NetError>>,
}

/// Per-batch tally of targets and of those that failed as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub targets: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn absorb(&mut self, other: BatchReport) {
        self.targets += other.targets;
        self.failed += other.failed;
    }
}

#[derive(Clone)]
pub struct Coordinator {
    network: Network,
    prober: Arc<Prober>,
    resolver: Arc<dyn Resolve>,
    sink: Arc<TableSink>,
    admission: Admission,
    fan_out: bool,
    fetch_timeout: Duration,
}

impl Coordinator {
    pub fn new(network: Network, prober: Prober, resolver: Arc<dyn Resolve>, sink: Arc<TableSink>) -> Self {
        Self {
            network,
            prober: Arc::new(prober),
            resolver,
            sink,
            admission: Admission::unbounded(),
            fan_out: false,
            fetch_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_fan_out(mut self, fan_out: bool) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn with_admission(mut self, admission: Admission) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Probe every target once, then flush the table.
    pub async fn dial(&self, targets: Vec<String>) -> BatchReport {
        let (parsed, mut report) = self.parse_targets(targets).await;

        let mut units = JoinSet::new();
        for target in parsed {
            let this = self.clone();
            units.spawn(async move { this.dial_target(&target).await });
        }
        report.absorb(collect(units).await);

        self.flush().await;
        report
    }

    /// Probe every target on a fixed tick, flushing after each round of a
    /// target. Runs until the process is stopped.
    pub async fn ping(&self, targets: Vec<String>, scheduler: Scheduler) -> BatchReport {
        let (parsed, mut report) = self.parse_targets(targets).await;
        self.flush().await;

        let mut units = JoinSet::new();
        for target in parsed {
            let this = self.clone();
            units.spawn(async move {
                let (this, target) = (&this, &target);
                scheduler
                    .run(move || async move {
                        let _ = this.dial_target(target).await;
                        this.flush().await;
                    })
                    .await;
                Ok::<(), ProbeError>(())
            });
        }
        report.absorb(collect(units).await);
        report
    }

    /// Expand one target, probe all of its addresses in parallel and write
    /// the group once every address is done.
    pub async fn dial_target(&self, target: &Target) -> Result<Vec<ProbeResult>, ProbeError> {
        let addresses = {
            let _permit = self.admission.admit().await;
            expand(target, self.fan_out, self.resolver.as_ref()).await
        };
        let addresses = match addresses {
            Ok(a) => a,
            Err(e) => {
                self.diagnose(&e.to_string()).await;
                return Err(e);
            }
        };

        let results = self.probe_all(addresses).await;
        self.sink.write_group(results.iter().map(probe_row).collect()).await;
        Ok(results)
    }

    async fn probe_all(&self, addresses: Vec<ResolvedAddress>) -> Vec<ProbeResult> {
        let mut units = JoinSet::new();
        for (i, address) in addresses.into_iter().enumerate() {
            let prober = self.prober.clone();
            let admission = self.admission.clone();
            units.spawn(async move {
                let _permit = admission.admit().await;
                (i, prober.probe(address).await)
            });
        }

        let mut results = Vec::with_capacity(units.len());
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(r) => results.push(r),
                Err(e) => error!("probe unit aborted: {}", e),
            }
        }
        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, r)| r).collect()
    }

    /// Resolve every name, optionally reverse-resolving each address, then
    /// flush the table.
    pub async fn lookup(&self, names: Vec<String>, with_names: bool) -> BatchReport {
        let mut units = JoinSet::new();
        for name in names {
            let this = self.clone();
            units.spawn(async move { this.lookup_name(&name, with_names).await.map(|_| ()) });
        }
        let report = collect(units).await;

        self.flush().await;
        report
    }

    pub async fn lookup_name(&self, name: &str, with_names: bool) -> Result<LookupResult, ProbeError> {
        let start = Instant::now();
        let looked = {
            let _permit = self.admission.admit().await;
            self.resolver.lookup_host(name).await
        };
        let elapsed = start.elapsed();

        let ips = match looked {
            Ok(ips) => ips,
            Err(source) => {
                self.diagnose(&format!("{name}\t{elapsed:?}\terror resolving: {source}"))
                    .await;
                return Err(ProbeError::Resolution {
                    host: name.to_string(),
                    source,
                });
            }
        };
        debug!("{} resolved to {} address(es) in {:?}", name, ips.len(), elapsed);

        let mut entries: Vec<LookupEntry> = ips.iter().map(|&ip| LookupEntry { ip, names: None }).collect();
        if with_names {
            let mut units = JoinSet::new();
            for (i, ip) in ips.into_iter().enumerate() {
                let resolver = self.resolver.clone();
                let admission = self.admission.clone();
                units.spawn(async move {
                    let _permit = admission.admit().await;
                    (i, resolver.lookup_addr(ip).await)
                });
            }
            while let Some(joined) = units.join_next().await {
                match joined {
                    Ok((i, names)) => entries[i].names = Some(names),
                    Err(e) => error!("reverse lookup unit aborted: {}", e),
                }
            }
        }

        let result = LookupResult {
            name: name.to_string(),
            elapsed,
            entries,
        };
        self.sink.write_group(lookup_rows(&result)).await;
        Ok(result)
    }

    /// Time a bare connect to every target, then flush the table.
    pub async fn fetch(&self, targets: Vec<String>) -> BatchReport {
        let (parsed, mut report) = self.parse_targets(targets).await;

        let mut units = JoinSet::new();
        for target in parsed {
            let this = self.clone();
            units.spawn(async move { this.fetch_target(&target).await });
        }
        report.absorb(collect(units).await);

        self.flush().await;
        report
    }

    async fn fetch_target(&self, target: &Target) -> Result<Duration, ProbeError> {
        let _permit = self.admission.admit().await;
        let start = Instant::now();
        let conn = tcp_connect::dial(self.network, &target.to_string(), self.fetch_timeout).await;
        let elapsed = start.elapsed();

        match conn {
            Ok(conn) => {
                drop(conn);
                self.sink.write_group(vec![fetch_row(target, elapsed)]).await;
                Ok(elapsed)
            }
            Err(e) => {
                self.diagnose(&format!("{target}\terror connecting: {e}")).await;
                Err(ProbeError::Dial(e))
            }
        }
    }

    async fn parse_targets(&self, raw: Vec<String>) -> (Vec<Target>, BatchReport) {
        let mut report = BatchReport::default();
        let mut parsed = Vec::with_capacity(raw.len());
        for r in raw {
            match Target::parse(&r, self.network) {
                Ok(t) => parsed.push(t),
                Err(e) => {
                    report.targets += 1;
                    report.failed += 1;
                    self.diagnose(&e.to_string()).await;
                }
            }
        }
        (parsed, report)
    }

    async fn diagnose(&self, line: &str) {
        if let Err(e) = self.sink.report(line).await {
            error!("writing diagnostics failed: {}", e);
        }
    }

    async fn flush(&self) {
        if let Err(e) = self.sink.flush().await {
            error!("writing output failed: {}", e);
        }
    }
}

async fn collect<T>(mut units: JoinSet<Result<T, ProbeError>>) -> BatchReport
where
    T: Send + 'static,
{
    let mut report = BatchReport::default();
    while let Some(joined) = units.join_next().await {
        report.targets += 1;
        match joined {
            Ok(Ok(_)) => {}
            // already written to the diagnostic stream by the unit itself
            Ok(Err(e)) => {
                debug!("target failed: {}", e);
                report.failed += 1;
            }
            Err(e) => {
                error!("target unit aborted: {}", e);
                report.failed += 1;
            }
        }
    }
    report
}
