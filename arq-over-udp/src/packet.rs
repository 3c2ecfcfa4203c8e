//! Wire-format definitions for data packets and acknowledgements.
//!
//! Every datagram travelling sender → receiver is a [`DataPacket`]; every
//! datagram travelling receiver → sender is an ack.  This module is
//! responsible for:
//! - Defining the on-wire binary layout of a data packet.
//! - Serialising a packet into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a packet, returning a tagged
//!   [`PacketError`] for malformed, truncated, or corrupted input.
//! - Encoding acks as decimal ASCII sequence numbers.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  The payload is
//! length-prefixed, so any byte value may appear in it.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Payload Length        |         Checksum (hi)         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Checksum (lo)         |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 10 bytes.
//! seq(4) + payload_len(2) + checksum(4)
//!
//! # Ack format
//!
//! An ack is the acknowledged sequence number in decimal ASCII with no
//! further framing, e.g. `b"17"`.

use thiserror::Error;

/// Sequence number of a logical packet.
///
/// The sequence space of a session is `[0, total)` with `total <= u32::MAX`.
/// Numbers never wrap: the sender refuses to admit anything at or past
/// `total`, so no modular comparison is needed anywhere.
pub type Seq = u32;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 10;

/// Largest payload a single packet can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Largest datagram either side ever needs to read.
pub const MAX_DATAGRAM: usize = HEADER_LEN + MAX_PAYLOAD;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_PAYLOAD_LEN: usize = 4;
const OFF_CHECKSUM: usize = 6;

/// Longest decimal rendering of a `u32`.
const MAX_ACK_DIGITS: usize = 10;

/// A data packet: sequence number, opaque payload, integrity checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub seq: Seq,
    pub payload: Vec<u8>,
    /// Arithmetic sum of the payload bytes, see [`checksum`].
    pub checksum: u32,
}

impl DataPacket {
    /// Build a packet, computing its checksum from `payload`.
    pub fn new(seq: Seq, payload: Vec<u8>) -> Self {
        let checksum = checksum(&payload);
        Self {
            seq,
            payload,
            checksum,
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Returns [`PacketError::PayloadTooLarge`] when the payload length does
    /// not fit the 16-bit length field.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload_len));
        }

        let mut buf = vec![0u8; HEADER_LEN + payload_len];
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&self.checksum.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse a [`DataPacket`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the `payload_len` field disagrees with `buf.len()`, or
    /// - the checksum recomputed over the payload does not match.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let seq = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let payload_len = u16::from_be_bytes([buf[OFF_PAYLOAD_LEN], buf[OFF_PAYLOAD_LEN + 1]]);
        let stored = u32::from_be_bytes([
            buf[OFF_CHECKSUM],
            buf[OFF_CHECKSUM + 1],
            buf[OFF_CHECKSUM + 2],
            buf[OFF_CHECKSUM + 3],
        ]);

        if buf.len() != HEADER_LEN + payload_len as usize {
            return Err(PacketError::LengthMismatch);
        }

        let payload = &buf[HEADER_LEN..];
        if checksum(payload) != stored {
            return Err(PacketError::ChecksumFailed);
        }

        Ok(Self {
            seq,
            payload: payload.to_vec(),
            checksum: stored,
        })
    }
}

/// Encode `seq` as an ack datagram.
pub fn encode_ack(seq: Seq) -> Vec<u8> {
    seq.to_string().into_bytes()
}

/// Parse an ack datagram.
///
/// Only ASCII digits are accepted; anything else, an empty buffer, or a value
/// overflowing `u32` is a [`PacketError::MalformedAck`].
pub fn decode_ack(buf: &[u8]) -> Result<Seq, PacketError> {
    if buf.is_empty() || buf.len() > MAX_ACK_DIGITS || !buf.iter().all(u8::is_ascii_digit) {
        return Err(PacketError::MalformedAck);
    }
    buf.iter().try_fold(0u32, |acc, &d| {
        acc.checked_mul(10)
            .and_then(|v| v.checked_add(u32::from(d - b'0')))
            .ok_or(PacketError::MalformedAck)
    })
}

/// Errors that can arise when building or parsing a datagram.
///
/// Every decode failure is treated by the receiver as corruption: the
/// datagram is dropped and the sender's timer recovers it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    #[error("payload_len field does not match remaining bytes")]
    LengthMismatch,
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("payload of {0} bytes does not fit in one packet")]
    PayloadTooLarge(usize),
    #[error("ack is not a decimal sequence number")]
    MalformedAck,
}

/// Arithmetic sum of `data`'s byte values, wrapping at `u32::MAX`.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
}
