use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use netbridge_frame::is_reserved;
use netbridge_relay::RelayRole;

use crate::config::CliConfig;
use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod relay;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server transport and print received datagrams.
    Serve(ServeArgs),
    /// Connect to a server and send a single datagram.
    Send(SendArgs),
    /// Run one end of a same-host process relay.
    Relay(RelayArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, config: &CliConfig, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, config, format),
        Command::Send(args) => send::run(args, config, format),
        Command::Relay(args) => relay::run(args, config, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (e.g. 0.0.0.0:7000).
    pub bind: SocketAddr,
    /// Send every received datagram back to its sender.
    #[arg(long)]
    pub echo: bool,
    /// Exit after receiving N datagrams.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server address to connect to.
    pub destination: SocketAddr,
    /// Application op-code (below 0xFF00).
    #[arg(long, default_value = "1", value_parser = parse_op_code)]
    pub op: u16,
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Wait for one reply datagram and print it.
    #[arg(long)]
    pub wait: bool,
    /// Longest wait for the handshake and for the acknowledgement (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,
    /// Longest wait for a reply when --wait is set.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub wait_timeout: Duration,
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Which end to run: primary or secondary.
    pub role: RelayRole,
    /// Socket base name shared by both ends.
    pub name: String,
    /// Directory holding the relay sockets.
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,
    /// Primary only: bridge the relay to a server transport bound here.
    #[arg(long, value_name = "ADDR")]
    pub bridge: Option<SocketAddr>,
    /// Op-code for the datagram sent once the pair completes.
    #[arg(long, default_value = "1", value_parser = parse_op_code)]
    pub op: u16,
    /// Sender id stamped on the datagram sent once the pair completes.
    #[arg(long, default_value = "0")]
    pub sender: u32,
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Exit after printing N datagrams (and sending the payload, if any).
    #[arg(long)]
    pub count: Option<usize>,
}

/// Payload source shared by commands that send one datagram.
#[derive(Args, Debug, Default)]
pub struct PayloadArgs {
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
}

impl PayloadArgs {
    pub fn is_set(&self) -> bool {
        self.json.is_some() || self.data.is_some() || self.file.is_some()
    }

    /// The payload bytes; empty when no source was given.
    pub fn resolve(&self) -> CliResult<Vec<u8>> {
        if let Some(json) = &self.json {
            serde_json::from_str::<serde_json::Value>(json)
                .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
            return Ok(json.as_bytes().to_vec());
        }
        if let Some(data) = &self.data {
            return Ok(data.as_bytes().to_vec());
        }
        if let Some(path) = &self.file {
            return fs::read(path).map_err(|err| {
                crate::exit::io_error(&format!("failed reading {}", path.display()), err)
            });
        }
        Ok(Vec::new())
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_op_code(input: &str) -> Result<u16, String> {
    let input = input.trim();
    let op = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse(),
    }
    .map_err(|_| format!("invalid op-code: {input}"))?;

    if is_reserved(op) {
        return Err(format!("op-code {op:#06x} is reserved for protocol control"));
    }
    Ok(op)
}

fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration value: {input}"))?;

    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Cleared by Ctrl-C.
fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn op_codes_accept_decimal_and_hex_but_not_reserved() {
        assert_eq!(parse_op_code("42").unwrap(), 42);
        assert_eq!(parse_op_code("0x10").unwrap(), 16);
        assert!(parse_op_code("0xFF03").is_err());
        assert!(parse_op_code("70000").is_err());
    }

    #[test]
    fn payload_defaults_to_empty() {
        let payload = PayloadArgs::default();
        assert!(!payload.is_set());
        assert!(payload.resolve().expect("empty payload").is_empty());
    }

    #[test]
    fn invalid_json_payload_is_a_usage_error() {
        let payload = PayloadArgs {
            json: Some("{not json".to_string()),
            ..PayloadArgs::default()
        };
        let err = payload.resolve().expect_err("invalid json should fail");
        assert_eq!(err.code, USAGE);
    }
}
