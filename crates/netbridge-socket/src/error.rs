use std::path::PathBuf;

/// Errors that can occur in socket operations.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the socket.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The kernel accepted fewer bytes than requested.
    #[error("partial write ({written} of {expected} bytes)")]
    PartialWrite { written: usize, expected: usize },

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The operation needs a peer address but none was configured.
    #[error("no remote address configured")]
    NoRemote,

    /// The socket is not open.
    #[error("socket closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SocketError>;
