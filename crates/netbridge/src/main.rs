mod cmd;
mod config;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::config::CliConfig;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "netbridge",
    version,
    about = "Reliable UDP datagrams and same-host process relay"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "NETBRIDGE_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    /// JSON file with `transport` and `relay` settings.
    #[arg(long, value_name = "FILE", env = "NETBRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = CliConfig::load(cli.config.as_deref())
        .and_then(|config| cmd::run(cli.command, &config, format));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "netbridge",
            "send",
            "127.0.0.1:7000",
            "--op",
            "42",
            "--data",
            "hello",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "netbridge",
            "send",
            "127.0.0.1:7000",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_bad_destination() {
        let err = Cli::try_parse_from(["netbridge", "send", "not-an-address", "--data", "x"])
            .expect_err("destination must be a socket address");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_relay_subcommand_with_global_config() {
        let cli = Cli::try_parse_from([
            "netbridge",
            "relay",
            "secondary",
            "demo",
            "--dir",
            "/tmp",
            "--config",
            "/tmp/netbridge.json",
        ])
        .expect("relay args should parse");

        assert!(matches!(cli.command, Command::Relay(_)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/netbridge.json")));
    }
}
