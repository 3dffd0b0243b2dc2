//! Envelope serialization and parsing.
//!
//! Every message travels as one envelope: a fixed header followed by the raw
//! payload bytes. The header tells the receiver how many payload bytes
//! belong to the envelope, so a reader always consumes whole envelopes.
//!
//! # Envelope Format
//!
//! ```text
//! +--------------------+
//! | Magic (4 bytes)    |  0x4C 0x4D 0x50 0x54 ("LMPT")
//! +--------------------+
//! | kind (1)           |  u8 message kind code (0..=8)
//! +--------------------+
//! | payload_len (2)    |  u16 host byte order, <= MAX_PAYLOAD_LEN
//! +--------------------+
//! | timestamp (4)      |  i32 host byte order, sender's Lamport time
//! +--------------------+
//! | payload            |  payload_len bytes
//! | (variable)         |
//! +--------------------+
//! ```
//!
//! # Byte Order
//!
//! All numeric fields use host-native byte order. Both ends of a channel
//! always live on the same host.

use crate::error::{FramingError, Result};
use crate::message::MessageKind;
use crate::Timestamp;

/// Magic number for envelopes: "LMPT"
pub const MAGIC: [u8; 4] = [0x4C, 0x4D, 0x50, 0x54];

/// Size of the envelope header in bytes
pub const HEADER_SIZE: usize = 11;

/// Largest envelope (header + payload) a channel carries
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Largest payload that fits in one envelope
pub const MAX_PAYLOAD_LEN: usize = MAX_MESSAGE_LEN - HEADER_SIZE;

/// A decoded envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// What the payload contains
    pub kind: MessageKind,

    /// Number of payload bytes following the header
    pub payload_len: u16,

    /// Sender's logical time when the envelope was built
    pub timestamp: Timestamp,
}

/// A header plus its raw payload bytes.
///
/// # Invariant
/// `header.payload_len as usize == payload.len()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    header: Header,
    payload: Vec<u8>,
}

impl Envelope {
    /// Build an envelope, validating the payload size.
    ///
    /// # Errors
    /// `FramingError::PayloadTooLarge` if the payload exceeds `MAX_PAYLOAD_LEN`.
    pub fn new(kind: MessageKind, timestamp: Timestamp, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FramingError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_LEN,
            }
            .into());
        }

        Ok(Self {
            header: Header {
                kind,
                payload_len: payload.len() as u16,
                timestamp,
            },
            payload,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn kind(&self) -> MessageKind {
        self.header.kind
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize into the wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.payload.len());

        // Write header
        bytes.extend_from_slice(&MAGIC);
        bytes.push(self.header.kind.code());
        bytes.extend_from_slice(&self.header.payload_len.to_ne_bytes());
        bytes.extend_from_slice(&self.header.timestamp.to_ne_bytes());

        // Write payload
        bytes.extend_from_slice(&self.payload);

        bytes
    }

    /// Parse a complete envelope (header and declared payload).
    ///
    /// # Errors
    /// - `FramingError::ShortHeader` if fewer than `HEADER_SIZE` bytes arrived
    /// - `FramingError::InvalidMagic` if the magic number doesn't match
    /// - `FramingError::UnknownKind` if the kind byte is out of range
    /// - `FramingError::PayloadLengthMismatch` if the body is not exactly
    ///   `payload_len` bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let header = parse_header(bytes)?;

        // Validate body length
        let body = &bytes[HEADER_SIZE..];
        if body.len() != header.payload_len as usize {
            return Err(FramingError::PayloadLengthMismatch {
                expected: header.payload_len as usize,
                actual: body.len(),
            }
            .into());
        }

        Ok(Self {
            header,
            payload: body.to_vec(),
        })
    }
}

/// Parse just the header from the front of `bytes`.
///
/// A partial header is a hard error, never retried.
pub fn parse_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_SIZE {
        return Err(FramingError::ShortHeader {
            required: HEADER_SIZE,
            actual: bytes.len(),
        }
        .into());
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[0..4]);
    if magic != MAGIC {
        return Err(FramingError::InvalidMagic {
            expected: MAGIC,
            actual: magic,
        }
        .into());
    }

    let kind = MessageKind::from_code(bytes[4])?;

    let mut len_bytes = [0u8; 2];
    len_bytes.copy_from_slice(&bytes[5..7]);
    let payload_len = u16::from_ne_bytes(len_bytes);

    let mut ts_bytes = [0u8; 4];
    ts_bytes.copy_from_slice(&bytes[7..11]);
    let timestamp = Timestamp::from_ne_bytes(ts_bytes);

    if payload_len as usize > MAX_PAYLOAD_LEN {
        return Err(FramingError::PayloadTooLarge {
            size: payload_len as usize,
            max: MAX_PAYLOAD_LEN,
        }
        .into());
    }

    Ok(Header {
        kind,
        payload_len,
        timestamp,
    })
}
