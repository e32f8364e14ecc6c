/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket could not be opened or used.
    #[error("socket error: {0}")]
    Socket(#[from] netbridge_socket::SocketError),

    /// A packet could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] netbridge_frame::FrameError),

    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} worker: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The transport has been shut down.
    #[error("transport is not active")]
    NotActive,

    /// No accepted peer has this id.
    #[error("unknown peer {0}")]
    UnknownPeer(u32),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
