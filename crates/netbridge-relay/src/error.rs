/// Errors that can occur in relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A relay socket could not be opened or written.
    #[error("socket error: {0}")]
    Socket(#[from] netbridge_socket::SocketError),

    /// A frame could not be built, typically because it is too large.
    #[error("frame error: {0}")]
    Frame(#[from] netbridge_frame::FrameError),

    /// No write socket: the pair is incomplete or was torn down.
    #[error("relay is not paired")]
    NotPaired,

    /// The relay has been shut down.
    #[error("relay is not active")]
    NotActive,

    /// The socket base name cannot be used in a path.
    #[error("invalid relay name {0:?}")]
    InvalidName(String),

    /// The poll worker could not be spawned.
    #[error("failed to spawn relay worker: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
