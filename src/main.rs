mod cli;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use cli::{CommandLine, Commands, RelayArgs, TlsArgs};
use netdog::config::ProbeConfig;
use netdog::coordinator::{Admission, Coordinator};
use netdog::output::TableSink;
use netdog::prober::Prober;
use netdog::prober::tls::TlsSettings;
use netdog::relay;
use netdog::resolver::{DnsResolver, Resolve};
use netdog::scheduler::Scheduler;
use netdog::target::{Network, Target};
use netdog::util::{grep_ipv4, read_lines};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run(CommandLine::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("netdog: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Ok(false) when the command ran but some target failed.
async fn run(cli: CommandLine) -> Result<bool> {
    let mut config = ProbeConfig::load(cli.config.as_deref()).await?;
    let network = if cli.unix_socket { Network::Unix } else { Network::Tcp };

    match cli.command {
        None => {
            init_tracing(&config)?;
            relay_input(&config, network, cli.relay).await
        }
        Some(Commands::Dial(args)) => {
            if args.max_in_flight.is_some() {
                config.max_in_flight = args.max_in_flight;
            }
            config.validate()?;
            init_tracing(&config)?;

            let coordinator = coordinator(&config, network, Some(&args.tls), args.sniff)?;
            let targets = targets_or_stdin(args.targets).await?;
            Ok(coordinator.dial(targets).await.is_success())
        }
        Some(Commands::Ping(args)) => {
            if let Some(ms) = args.interval_ms {
                config.tick_interval_ms = ms;
            }
            config.validate()?;
            init_tracing(&config)?;

            let scheduler = Scheduler::new(config.tick_interval_ms)?;
            let coordinator = coordinator(&config, network, Some(&args.tls), args.sniff)?;
            let targets = targets_or_stdin(args.targets).await?;
            info!("pinging {} target(s) every {:?}", targets.len(), scheduler.interval());
            Ok(coordinator.ping(targets, scheduler).await.is_success())
        }
        Some(Commands::Lookup(args)) => {
            if args.max_in_flight.is_some() {
                config.max_in_flight = args.max_in_flight;
            }
            config.validate()?;
            init_tracing(&config)?;

            let mut names = targets_or_stdin(args.addresses).await?;
            if args.grep {
                names = grep_ipv4(&names);
                debug!("grep found {} address(es)", names.len());
            }
            let coordinator = coordinator(&config, network, None, false)?;
            Ok(coordinator.lookup(names, args.name).await.is_success())
        }
        Some(Commands::Fetch(args)) => {
            init_tracing(&config)?;

            let coordinator = coordinator(&config, network, None, false)?;
            let targets = targets_or_stdin(args.targets).await?;
            Ok(coordinator.fetch(targets).await.is_success())
        }
    }
}

fn init_tracing(config: &ProbeConfig) -> Result<()> {
    let log_level = config.get_tracing_level()?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("netdog={}", log_level.as_str().to_lowercase()).parse()?),
        )
        .init();
    Ok(())
}

fn coordinator(config: &ProbeConfig, network: Network, tls: Option<&TlsArgs>, fan_out: bool) -> Result<Coordinator> {
    let timeouts = config.timeouts();
    let resolver: Arc<dyn Resolve> = Arc::new(DnsResolver::from_system_conf(timeouts.lookup, timeouts.reverse_lookup));

    let mut prober = Prober::new(resolver.clone(), timeouts.dial, timeouts.handshake);
    if let Some(connector) = tls_connector(config, tls)? {
        prober = prober.with_tls(connector);
    }

    Ok(Coordinator::new(network, prober, resolver, Arc::new(TableSink::stdio()))
        .with_fan_out(fan_out)
        .with_admission(Admission::from_limit(config.max_in_flight))
        .with_fetch_timeout(timeouts.fetch))
}

/// None unless `--tls` was given; `--rootca` and `-k` alone do not turn TLS on.
fn tls_connector(config: &ProbeConfig, args: Option<&TlsArgs>) -> Result<Option<TlsConnector>> {
    match args {
        Some(args) if args.tls => {
            let settings = TlsSettings::from_flags(args.insecure, args.rootca.as_deref(), config.alpn.clone());
            Ok(Some(settings.connector()?))
        }
        _ => Ok(None),
    }
}

async fn targets_or_stdin(args: Vec<String>) -> Result<Vec<String>> {
    if !args.is_empty() {
        return Ok(args);
    }
    read_lines(tokio::io::stdin()).await.context("reading targets from stdin")
}

async fn relay_input(config: &ProbeConfig, network: Network, args: RelayArgs) -> Result<bool> {
    let raw = args.target.context("missing target, see --help")?;
    let target = Target::parse(&raw, network)?;
    let connector = tls_connector(config, Some(&args.tls))?;
    let timeouts = config.timeouts();

    let input = open_inputs(&args.inputs).await?;
    let relayed = relay::relay(
        &target,
        connector.as_ref(),
        timeouts.dial,
        timeouts.handshake,
        input,
        tokio::io::stdout(),
    )
    .await
    .with_context(|| format!("relaying to {target}"))?;

    debug!("sent {} byte(s), received {} byte(s)", relayed.sent, relayed.received);
    Ok(true)
}

/// Files are sent back to back in the order given; stdin when there are none.
async fn open_inputs(paths: &[PathBuf]) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if paths.is_empty() {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let mut input: Box<dyn AsyncRead + Unpin + Send> = Box::new(tokio::io::empty());
    for path in paths {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("invalid input {}", path.display()))?;
        input = Box::new(input.chain(file));
    }
    Ok(input)
}
