//! Error types for the lamport-sim system.
//!
//! Transient channel conditions (full on send, empty on receive) never show
//! up here; the messaging layer waits them out. Everything in this module is
//! fatal to the node that hits it.

use crate::message::MessageKind;
use crate::ProcessId;
use thiserror::Error;

/// Top-level error type for all operations in the system.
///
/// Each variant corresponds to a specific failure domain:
/// - Framing: envelope header or payload could not be decoded
/// - Protocol: a node received something its current state does not allow
/// - Channel: the transport lost a peer (hard failure)
/// - Config: invalid run parameters
#[derive(Debug, Error)]
pub enum Error {
    /// Envelope encode/decode error
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Protocol violation observed by a node
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Channel communication error (peer gone, mesh torn down)
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Envelope framing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// Invalid magic number in header
    #[error("invalid magic number: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    /// Fewer bytes than a full header were read
    #[error("short header: need {required} bytes, got {actual}")]
    ShortHeader { required: usize, actual: usize },

    /// Payload length differs from the header
    #[error("payload length mismatch: header says {expected}, got {actual}")]
    PayloadLengthMismatch { expected: usize, actual: usize },

    /// Payload would not fit in one envelope
    #[error("payload of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Kind byte outside the known set
    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    /// Payload ended before a field could be read
    #[error("truncated {kind} payload: needed {needed} more bytes at offset {offset}")]
    TruncatedPayload {
        kind: MessageKind,
        offset: usize,
        needed: usize,
    },

    /// History entries are not one per timestamp starting at 0
    #[error("history of process {owner} breaks at entry {index}")]
    HistoryGap { owner: ProcessId, index: usize },

    /// Bytes left over after the payload was fully decoded
    #[error("{kind} payload has {extra} trailing bytes")]
    TrailingBytes { kind: MessageKind, extra: usize },
}

/// Protocol violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A message kind the current state does not accept
    #[error("process {local} in state {state} got unexpected {kind} from process {from}")]
    UnexpectedMessage {
        local: ProcessId,
        state: &'static str,
        from: ProcessId,
        kind: MessageKind,
    },

    /// A transfer delivered to a node that is neither endpoint
    #[error("process {local} is neither source {src} nor destination {dst} of transfer")]
    MisroutedTransfer {
        local: ProcessId,
        src: ProcessId,
        dst: ProcessId,
    },

    /// A transfer order whose endpoints coincide
    #[error("transfer from process {0} to itself")]
    SelfTransfer(ProcessId),

    /// Attempt to unicast to (or receive from) the local node
    #[error("process {0} cannot message itself")]
    SelfAddressed(ProcessId),

    /// Peer id not present in the mesh
    #[error("process {local} has no channel to process {peer}")]
    UnknownPeer { local: ProcessId, peer: ProcessId },

    /// History cannot be shipped in a single envelope
    #[error("history of process {owner} has {entries} entries, at most {max} fit in one message")]
    HistoryTooLong {
        owner: ProcessId,
        entries: usize,
        max: usize,
    },
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;
