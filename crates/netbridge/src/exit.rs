use std::fmt;
use std::io;

use netbridge_frame::FrameError;
use netbridge_relay::RelayError;
use netbridge_socket::SocketError;
use netbridge_transport::TransportError;

// sysexits-style process exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn socket_error(context: &str, err: SocketError) -> CliError {
    match err {
        SocketError::Bind { addr, source } | SocketError::Connect { addr, source } => {
            io_error(&format!("{context} ({addr})"), source)
        }
        SocketError::Io(source) => io_error(context, source),
        SocketError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Socket(err) => socket_error(context, err),
        TransportError::Frame(err) => frame_error(context, err),
        TransportError::InvalidConfig(_) | TransportError::UnknownPeer(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        TransportError::NotActive => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn relay_error(context: &str, err: RelayError) -> CliError {
    match err {
        RelayError::Socket(err) => socket_error(context, err),
        RelayError::Frame(err) => frame_error(context, err),
        RelayError::InvalidName(_) => CliError::new(USAGE, format!("{context}: {err}")),
        RelayError::NotPaired | RelayError::NotActive => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_conflict_is_a_transport_error() {
        let err = transport_error(
            "start failed",
            TransportError::Socket(SocketError::Bind {
                addr: "127.0.0.1:9".to_string(),
                source: io::Error::from(io::ErrorKind::AddrInUse),
            }),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.contains("127.0.0.1:9"));
    }

    #[test]
    fn oversized_relay_payload_is_data_invalid() {
        let err = relay_error(
            "send failed",
            RelayError::Frame(FrameError::PayloadTooLarge {
                size: 9000,
                max: 8176,
            }),
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn config_problems_are_usage_errors() {
        let err = transport_error(
            "start failed",
            TransportError::InvalidConfig("max_packet_size too small".to_string()),
        );
        assert_eq!(err.code, USAGE);
        assert_eq!(
            relay_error("start failed", RelayError::InvalidName("a/b".to_string())).code,
            USAGE
        );
    }

    #[test]
    fn permission_denied_keeps_its_code() {
        let err = socket_error(
            "bind failed",
            SocketError::Io(io::Error::from(io::ErrorKind::PermissionDenied)),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
        assert!(err.to_string().starts_with("bind failed: "));
    }
}
