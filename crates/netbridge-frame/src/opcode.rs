//! Reserved op-codes.
//!
//! Op-codes 0xFF00-0xFFFF are reserved for protocol control.
//! Every other value is an application-defined payload code.

/// Client asks a server to open a connection.
pub const CONNECTION_REQUEST: u16 = 0xFF00;

/// Server accepts a connection. Payload: assigned peer id (u32).
pub const CONNECTION_ACCEPTED: u16 = 0xFF01;

/// Either side closes the connection.
pub const CONNECTION_DISCONNECT: u16 = 0xFF02;

/// Receiver has assembled every packet of a sequence.
pub const ACK: u16 = 0xFF03;

/// Receiver asks for one packet of a sequence again.
pub const RETRANSMISSION_REQUEST: u16 = 0xFF04;

/// Sender has re-sent the requested packet.
pub const RETRANSMISSION_ACK: u16 = 0xFF05;

/// Sender no longer holds the requested packet.
pub const RETRANSMISSION_IMPOSSIBLE: u16 = 0xFF06;

/// Liveness check.
pub const KEEP_ALIVE: u16 = 0xFF07;

/// Relay identity exchange. Payload: unique id (u32).
pub const IPC_DATA: u16 = 0xFF08;

/// First reserved op-code.
pub const RESERVED_START: u16 = 0xFF00;

/// Returns a human-readable name for an op-code.
pub fn opcode_name(op: u16) -> &'static str {
    match op {
        CONNECTION_REQUEST => "CONNECTION_REQUEST",
        CONNECTION_ACCEPTED => "CONNECTION_ACCEPTED",
        CONNECTION_DISCONNECT => "CONNECTION_DISCONNECT",
        ACK => "ACK",
        RETRANSMISSION_REQUEST => "RETRANSMISSION_REQUEST",
        RETRANSMISSION_ACK => "RETRANSMISSION_ACK",
        RETRANSMISSION_IMPOSSIBLE => "RETRANSMISSION_IMPOSSIBLE",
        KEEP_ALIVE => "KEEP_ALIVE",
        IPC_DATA => "IPC_DATA",
        RESERVED_START..=u16::MAX => "RESERVED",
        _ => "APPLICATION",
    }
}

/// Returns true if the op-code is in the reserved range.
pub fn is_reserved(op: u16) -> bool {
    op >= RESERVED_START
}

/// Returns true for op-codes that carry application payloads.
pub fn is_application(op: u16) -> bool {
    !is_reserved(op)
}
