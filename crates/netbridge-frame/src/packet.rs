use std::time::Instant;

use bytes::Bytes;
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};

use crate::buffer::WireBuffer;
use crate::error::{FrameError, Result};

/// Packet header size in bytes.
pub const HEADER_SIZE: usize = 26;

/// Default protocol magic: "NBRG".
pub const DEFAULT_MAGIC: [u8; 4] = *b"NBRG";

/// Default protocol version.
pub const DEFAULT_VERSION: u16 = 1;

/// Default maximum encoded packet size, chosen to fit a typical Ethernet MTU.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1400;

const MAGIC_LEN: usize = 4;
const CHECKSUM_OFFSET: usize = 8;

pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Identity and size limits every packet is checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Identifier bytes every packet must start with.
    pub magic: [u8; 4],
    /// Protocol version; packets from other versions are discarded.
    pub version: u16,
    /// Largest encoded packet (header + payload) in bytes.
    pub max_packet_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            magic: DEFAULT_MAGIC,
            version: DEFAULT_VERSION,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl ProtocolConfig {
    /// Largest payload a single packet can carry under this config.
    pub fn max_payload(&self) -> usize {
        self.max_packet_size
            .saturating_sub(HEADER_SIZE)
            .min(u16::MAX as usize)
    }
}

/// One validated datagram on the network wire.
///
/// Data packets carry one slice of a sequence (`index` of `count`). Control
/// packets use `sequence_id`/`index` to name the sequence or packet they
/// refer to and leave `count` at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub op_code: u16,
    pub sequence_id: u32,
    pub index: u32,
    pub count: u32,
    pub payload: Bytes,
    /// Set by [`Packet::decode`]; `None` for locally built packets.
    pub received_at: Option<Instant>,
}

impl Packet {
    /// A packet carrying part `index` of `count` of a sequence.
    pub fn data(
        op_code: u16,
        sequence_id: u32,
        index: u32,
        count: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            op_code,
            sequence_id,
            index,
            count,
            payload: payload.into(),
            received_at: None,
        }
    }

    /// A payload-less control packet referring to `sequence_id`/`index`.
    pub fn control(op_code: u16, sequence_id: u32, index: u32) -> Self {
        Self::data(op_code, sequence_id, index, 0, Bytes::new())
    }

    /// The encoded size of this packet.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode into the wire format.
    ///
    /// Wire format (little-endian):
    /// ```text
    /// ┌───────────┬─────────┬────────┬──────────┬──────────┬─────────┬─────────┬─────────┬─────────┐
    /// │ Magic (4) │ Ver (2) │ Op (2) │ CRC (4)  │ Seq (4)  │ Idx (4) │ Cnt (4) │ Len (2) │ Payload │
    /// └───────────┴─────────┴────────┴──────────┴──────────┴─────────┴─────────┴─────────┴─────────┘
    /// ```
    /// The CRC-32 covers the whole packet with the CRC field zeroed.
    pub fn encode(&self, config: &ProtocolConfig) -> Result<Bytes> {
        let size = self.wire_size();
        let max = config.max_packet_size.min(HEADER_SIZE + u16::MAX as usize);
        if size > max {
            return Err(FrameError::PayloadTooLarge {
                size: self.payload.len(),
                max: config.max_payload(),
            });
        }

        let mut buf = WireBuffer::with_size(size);
        buf.write_bytes(&config.magic);
        buf.write_u16(config.version);
        buf.write_u16(self.op_code);
        buf.write_u32(0);
        buf.write_u32(self.sequence_id);
        buf.write_u32(self.index);
        buf.write_u32(self.count);
        buf.write_u16(self.payload.len() as u16);
        buf.write_bytes(&self.payload);

        let checksum = CRC32.checksum(buf.written());
        buf.patch_bytes(CHECKSUM_OFFSET, &checksum.to_le_bytes());

        Ok(buf.into_bytes())
    }

    /// Decode and validate one received datagram.
    ///
    /// Checks run in a fixed order: length, magic, version, declared payload
    /// length, checksum. The op-code is only looked at once all of them pass.
    pub fn decode(bytes: &[u8], config: &ProtocolConfig) -> Result<Packet> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                len: bytes.len(),
                needed: HEADER_SIZE,
            });
        }

        if bytes[..MAGIC_LEN] != config.magic {
            let mut actual = [0u8; MAGIC_LEN];
            actual.copy_from_slice(&bytes[..MAGIC_LEN]);
            return Err(FrameError::InvalidMagic {
                expected: config.magic,
                actual,
            });
        }

        let mut buf = WireBuffer::from_vec(bytes[..HEADER_SIZE].to_vec());
        let _magic = buf.read_array::<MAGIC_LEN>();
        let version = buf.read_u16();
        if version != config.version {
            return Err(FrameError::VersionMismatch {
                expected: config.version,
                actual: version,
            });
        }

        let op_code = buf.read_u16();
        let checksum = buf.read_u32();
        let sequence_id = buf.read_u32();
        let index = buf.read_u32();
        let count = buf.read_u32();
        let payload_len = buf.read_u16() as usize;

        let total = HEADER_SIZE + payload_len;
        if bytes.len() < total {
            return Err(FrameError::Truncated {
                len: bytes.len(),
                needed: total,
            });
        }
        if bytes.len() > total {
            return Err(FrameError::TrailingBytes {
                len: bytes.len(),
                expected: total,
            });
        }

        let computed = checksum_with_zeroed_field(&bytes[..total]);
        if computed != checksum {
            return Err(FrameError::ChecksumMismatch {
                expected: checksum,
                actual: computed,
            });
        }

        Ok(Packet {
            op_code,
            sequence_id,
            index,
            count,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..total]),
            received_at: Some(Instant::now()),
        })
    }
}

fn checksum_with_zeroed_field(bytes: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&bytes[..CHECKSUM_OFFSET]);
    digest.update(&[0u8; 4]);
    digest.update(&bytes[CHECKSUM_OFFSET + 4..]);
    digest.finalize()
}
