/// Errors that can occur while decoding or encoding packets and relay frames.
///
/// None of these are fatal: inbound data that fails a check is dropped by the
/// layer that received it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// The packet identifier does not match the configured protocol magic.
    #[error("invalid packet magic (expected {expected:02x?}, got {actual:02x?})")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    /// The packet was produced by a different protocol version.
    #[error("protocol version mismatch (expected {expected}, got {actual})")]
    VersionMismatch { expected: u16, actual: u16 },

    /// The packet checksum does not match its contents.
    #[error("checksum mismatch (header {expected:#010x}, computed {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Fewer bytes than the header or declared payload length require.
    #[error("truncated frame ({len} bytes, need {needed})")]
    Truncated { len: usize, needed: usize },

    /// More bytes than the header and declared payload length account for.
    #[error("trailing bytes after frame ({len} bytes, expected {expected})")]
    TrailingBytes { len: usize, expected: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
