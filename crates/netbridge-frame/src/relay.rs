use bytes::Bytes;

use crate::buffer::WireBuffer;
use crate::datagram::Datagram;
use crate::error::{FrameError, Result};

/// Relay frame header: op-code (2) + timestamp (8) + sender (4) + length (2) = 16 bytes.
pub const RELAY_HEADER_SIZE: usize = 16;

/// Largest relay frame (header + payload) in bytes.
pub const MAX_RELAY_FRAME_SIZE: usize = 8192;

/// Largest payload a relay frame can carry.
pub const MAX_RELAY_PAYLOAD: usize = MAX_RELAY_FRAME_SIZE - RELAY_HEADER_SIZE;

/// A framed message on the same-host relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPacket {
    op_code: u16,
    timestamp: u64,
    sender_id: u32,
    payload: Bytes,
}

impl RelayPacket {
    /// Build a frame, refusing payloads that would exceed [`MAX_RELAY_FRAME_SIZE`].
    pub fn new(op_code: u16, timestamp: u64, sender_id: u32, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_RELAY_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_RELAY_PAYLOAD,
            });
        }
        Ok(Self {
            op_code,
            timestamp,
            sender_id,
            payload,
        })
    }

    /// Frame a datagram, taking ownership of its payload.
    pub fn from_datagram(datagram: Datagram, timestamp: u64) -> Result<Self> {
        let (op_code, sender_id, payload) = datagram.into_parts();
        Self::new(op_code, timestamp, sender_id, payload)
    }

    pub fn op_code(&self) -> u16 {
        self.op_code
    }

    /// Milliseconds since the Unix epoch at which the frame was built.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sender_id(&self) -> u32 {
        self.sender_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Encoded size of the frame.
    pub fn wire_size(&self) -> usize {
        RELAY_HEADER_SIZE + self.payload.len()
    }

    /// Encode into the relay wire format.
    ///
    /// ```text
    /// ┌─────────┬───────────────┬────────────┬──────────┬─────────┐
    /// │ Op (2)  │ Timestamp (8) │ Sender (4) │ Len (2)  │ Payload │
    /// └─────────┴───────────────┴────────────┴──────────┴─────────┘
    /// ```
    pub fn serialize(&self) -> Bytes {
        let mut buf = WireBuffer::with_size(self.wire_size());
        buf.write_u16(self.op_code);
        buf.write_u64(self.timestamp);
        buf.write_u32(self.sender_id);
        buf.write_u16(self.payload.len() as u16);
        buf.write_bytes(&self.payload);
        buf.into_bytes()
    }

    /// Decode one received relay frame.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_RELAY_FRAME_SIZE {
            return Err(FrameError::PayloadTooLarge {
                size: bytes.len().saturating_sub(RELAY_HEADER_SIZE),
                max: MAX_RELAY_PAYLOAD,
            });
        }
        if bytes.len() < RELAY_HEADER_SIZE {
            return Err(FrameError::Truncated {
                len: bytes.len(),
                needed: RELAY_HEADER_SIZE,
            });
        }

        let mut buf = WireBuffer::from_vec(bytes.to_vec());
        let op_code = buf.read_u16();
        let timestamp = buf.read_u64();
        let sender_id = buf.read_u32();
        let payload_len = buf.read_u16() as usize;

        if payload_len > buf.remaining_read() {
            return Err(FrameError::Truncated {
                len: bytes.len(),
                needed: RELAY_HEADER_SIZE + payload_len,
            });
        }
        if payload_len < buf.remaining_read() {
            return Err(FrameError::TrailingBytes {
                len: bytes.len(),
                expected: RELAY_HEADER_SIZE + payload_len,
            });
        }
        let payload = Bytes::copy_from_slice(buf.read_bytes(payload_len));

        Self::new(op_code, timestamp, sender_id, payload)
    }

    /// Convert into an inbound datagram.
    pub fn into_datagram(self) -> Datagram {
        Datagram::new(self.op_code, self.sender_id, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let frame = RelayPacket::new(42, 1_700_000_000_123, 7, vec![0x01, 0x02, 0x03]).unwrap();
        let wire = frame.serialize();
        assert_eq!(wire.len(), RELAY_HEADER_SIZE + 3);

        let decoded = RelayPacket::deserialize(&wire).unwrap();
        assert_eq!(decoded.op_code(), 42);
        assert_eq!(decoded.timestamp(), 1_700_000_000_123);
        assert_eq!(decoded.sender_id(), 7);
        assert_eq!(decoded.payload().as_ref(), &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_max_payload_accepted() {
        let frame = RelayPacket::new(1, 0, 0, vec![0xAB; MAX_RELAY_PAYLOAD]).unwrap();
        assert_eq!(frame.wire_size(), MAX_RELAY_FRAME_SIZE);
        let decoded = RelayPacket::deserialize(&frame.serialize()).unwrap();
        assert_eq!(decoded.payload().len(), MAX_RELAY_PAYLOAD);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let result = RelayPacket::new(1, 0, 0, vec![0u8; MAX_RELAY_PAYLOAD + 1]);
        assert_eq!(
            result.unwrap_err(),
            FrameError::PayloadTooLarge {
                size: MAX_RELAY_PAYLOAD + 1,
                max: MAX_RELAY_PAYLOAD
            }
        );
    }

    #[test]
    fn test_oversized_frame_rejected_on_receive() {
        let bytes = vec![0u8; MAX_RELAY_FRAME_SIZE + 1];
        let result = RelayPacket::deserialize(&bytes);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_truncated_frames_rejected() {
        assert!(matches!(
            RelayPacket::deserialize(&[0u8; 10]),
            Err(FrameError::Truncated { .. })
        ));

        let wire = RelayPacket::new(5, 1, 2, vec![9u8; 8]).unwrap().serialize();
        assert!(matches!(
            RelayPacket::deserialize(&wire[..wire.len() - 1]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut wire = RelayPacket::new(5, 1, 2, vec![9u8; 8]).unwrap().serialize().to_vec();
        wire.push(0xEE);
        assert_eq!(
            RelayPacket::deserialize(&wire).unwrap_err(),
            FrameError::TrailingBytes {
                len: RELAY_HEADER_SIZE + 9,
                expected: RELAY_HEADER_SIZE + 8
            }
        );

        // A header claiming no payload, followed by stray bytes.
        let mut empty = RelayPacket::new(5, 1, 2, Vec::<u8>::new()).unwrap().serialize().to_vec();
        empty.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            RelayPacket::deserialize(&empty),
            Err(FrameError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn test_datagram_conversion_moves_payload() {
        let datagram = Datagram::new(9, 3, vec![4u8, 5]);
        let frame = RelayPacket::from_datagram(datagram, 55).unwrap();
        let back = frame.into_datagram();
        assert_eq!(back.op_code(), 9);
        assert_eq!(back.sender_id(), 3);
        assert_eq!(back.payload().as_ref(), &[4, 5]);
    }
}
