use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "netdog", version)]
#[command(about = "netdog is a reader/writer for TCP/unix socket")]
#[command(long_about = "the default behavior is to read from stdin (or the given files) and write to <target>, then print the reply")]
#[command(args_conflicts_with_subcommands = true)]
pub struct CommandLine {
    /// The target is a unix socket path
    #[arg(long, global = true)]
    pub unix_socket: bool,

    /// JSON config file (defaults to $NETDOG_CONFIG when set)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub relay: RelayArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open a connection to each target and time the tcp (and tls) handshake
    #[command(alias = "d")]
    Dial(DialArgs),
    /// Dial the targets on a fixed interval until interrupted
    #[command(alias = "p")]
    Ping(PingArgs),
    /// Look up names to IP address(es), and optionally back to names
    #[command(alias = "l")]
    Lookup(LookupArgs),
    /// Time a bare connect to each target
    #[command(alias = "f")]
    Fetch(FetchArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct TlsArgs {
    /// Dial using TLS
    #[arg(long)]
    pub tls: bool,

    /// Root CA file; "skip" disables verification
    #[arg(long, value_name = "FILE")]
    pub rootca: Option<String>,

    /// Skip TLS verification
    #[arg(short = 'k', long)]
    pub insecure: bool,
}

#[derive(Args)]
pub struct RelayArgs {
    #[command(flatten)]
    pub tls: TlsArgs,

    /// host:port, or a socket path with --unix-socket
    pub target: Option<String>,

    /// Files to send instead of stdin
    pub inputs: Vec<PathBuf>,
}

#[derive(Args)]
pub struct DialArgs {
    #[command(flatten)]
    pub tls: TlsArgs,

    /// Dial every IP behind the host name
    #[arg(long)]
    pub sniff: bool,

    /// Limit the number of probes in flight
    #[arg(long, value_name = "N")]
    pub max_in_flight: Option<usize>,

    /// host:port targets; read one per line from stdin when omitted
    pub targets: Vec<String>,
}

#[derive(Args)]
pub struct PingArgs {
    #[command(flatten)]
    pub tls: TlsArgs,

    /// Dial every IP behind the host name
    #[arg(long)]
    pub sniff: bool,

    /// Milliseconds between rounds
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// host:port targets; read one per line from stdin when omitted
    pub targets: Vec<String>,
}

#[derive(Args)]
pub struct LookupArgs {
    /// Look up names of the IP address(es)
    #[arg(short = 'n', long)]
    pub name: bool,

    /// Grep IPv4 addresses from the input instead of reading names
    #[arg(short = 'g', long)]
    pub grep: bool,

    /// Limit the number of lookups in flight
    #[arg(long, value_name = "N")]
    pub max_in_flight: Option<usize>,

    /// Names or addresses; read from stdin when omitted
    pub addresses: Vec<String>,
}

#[derive(Args)]
pub struct FetchArgs {
    /// host:port targets; read one per line from stdin when omitted
    pub targets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        CommandLine::command().debug_assert();
    }

    #[test]
    fn bare_target_means_relay() {
        let cli = CommandLine::try_parse_from(["netdog", "--tls", "example.com:443", "req.txt"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.relay.tls.tls);
        assert_eq!(cli.relay.target.as_deref(), Some("example.com:443"));
        assert_eq!(cli.relay.inputs, vec![PathBuf::from("req.txt")]);
    }

    #[test]
    fn dial_flags_parse() {
        let cli = CommandLine::try_parse_from([
            "netdog", "dial", "--tls", "-k", "--sniff", "--max-in-flight", "8", "a:1", "b:2",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Dial(args)) => {
                assert!(args.tls.tls && args.tls.insecure && args.sniff);
                assert_eq!(args.max_in_flight, Some(8));
                assert_eq!(args.targets, vec!["a:1", "b:2"]);
            }
            _ => panic!("expected dial"),
        }
    }

    #[test]
    fn unix_socket_flag_is_global() {
        let cli = CommandLine::try_parse_from(["netdog", "ping", "--unix-socket", "/tmp/s.sock"]).unwrap();
        assert!(cli.unix_socket);
        assert!(matches!(cli.command, Some(Commands::Ping(_))));
    }

    #[test]
    fn lookup_short_flags() {
        let cli = CommandLine::try_parse_from(["netdog", "lookup", "-n", "-g"]).unwrap();
        match cli.command {
            Some(Commands::Lookup(args)) => assert!(args.name && args.grep && args.addresses.is_empty()),
            _ => panic!("expected lookup"),
        }
    }
}
