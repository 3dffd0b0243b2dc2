//! Protocol messages and their payload encodings.
//!
//! Raw envelopes are decoded into [`Message`] exactly once, at the
//! messaging boundary. Everything above that boundary pattern-matches on
//! the variant instead of inspecting kind codes and payload bytes.
//!
//! # Payload Formats
//!
//! All integers use host byte order.
//!
//! ```text
//! Started         id u8 | os_pid u32 | parent_pid u32 | balance i32
//! Done            id u8 | balance i32
//! Transfer        src u8 | dst u8 | amount i32
//! BalanceHistory  owner u8 | len u16 | len x (time i32 | balance i32 | pending_in i32)
//! Stop, Ack, CsRequest, CsReply, CsRelease    (empty)
//! ```

use crate::error::{FramingError, ProtocolError, Result};
use crate::framing::{Envelope, MAX_PAYLOAD_LEN};
use crate::ledger::{BalanceHistory, BalanceState};
use crate::{Balance, ProcessId, Timestamp};
use std::fmt;

/// Closed set of message kinds, with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Started,
    Done,
    Stop,
    Transfer,
    Ack,
    BalanceHistory,
    CsRequest,
    CsReply,
    CsRelease,
}

impl MessageKind {
    /// Every kind, in wire-code order.
    pub const ALL: [MessageKind; 9] = [
        MessageKind::Started,
        MessageKind::Done,
        MessageKind::Stop,
        MessageKind::Transfer,
        MessageKind::Ack,
        MessageKind::BalanceHistory,
        MessageKind::CsRequest,
        MessageKind::CsReply,
        MessageKind::CsRelease,
    ];

    /// Wire code of this kind.
    pub fn code(self) -> u8 {
        match self {
            MessageKind::Started => 0,
            MessageKind::Done => 1,
            MessageKind::Stop => 2,
            MessageKind::Transfer => 3,
            MessageKind::Ack => 4,
            MessageKind::BalanceHistory => 5,
            MessageKind::CsRequest => 6,
            MessageKind::CsReply => 7,
            MessageKind::CsRelease => 8,
        }
    }

    /// Kind for a wire code.
    ///
    /// # Errors
    /// `FramingError::UnknownKind` for codes above 8.
    pub fn from_code(code: u8) -> Result<Self> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| FramingError::UnknownKind(code).into())
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Started => "STARTED",
            MessageKind::Done => "DONE",
            MessageKind::Stop => "STOP",
            MessageKind::Transfer => "TRANSFER",
            MessageKind::Ack => "ACK",
            MessageKind::BalanceHistory => "BALANCE_HISTORY",
            MessageKind::CsRequest => "CS_REQUEST",
            MessageKind::CsReply => "CS_REPLY",
            MessageKind::CsRelease => "CS_RELEASE",
        };
        f.write_str(name)
    }
}

/// An order to move `amount` from worker `src` to worker `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOrder {
    pub src: ProcessId,
    pub dst: ProcessId,
    pub amount: Balance,
}

impl TransferOrder {
    /// Build an order, rejecting `src == dst`.
    pub fn new(src: ProcessId, dst: ProcessId, amount: Balance) -> Result<Self> {
        if src == dst {
            return Err(ProtocolError::SelfTransfer(src).into());
        }
        Ok(Self { src, dst, amount })
    }
}

/// Audit data announced by a node when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedInfo {
    pub id: ProcessId,
    pub os_pid: u32,
    pub parent_pid: u32,
    pub balance: Balance,
}

/// Audit data announced by a node when it finishes its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoneInfo {
    pub id: ProcessId,
    pub balance: Balance,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Started(StartedInfo),
    Done(DoneInfo),
    Stop,
    Transfer(TransferOrder),
    Ack,
    BalanceHistory(BalanceHistory),
    CsRequest,
    CsReply,
    CsRelease,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Started(_) => MessageKind::Started,
            Message::Done(_) => MessageKind::Done,
            Message::Stop => MessageKind::Stop,
            Message::Transfer(_) => MessageKind::Transfer,
            Message::Ack => MessageKind::Ack,
            Message::BalanceHistory(_) => MessageKind::BalanceHistory,
            Message::CsRequest => MessageKind::CsRequest,
            Message::CsReply => MessageKind::CsReply,
            Message::CsRelease => MessageKind::CsRelease,
        }
    }

    /// Encode into an envelope stamped with `timestamp`.
    ///
    /// # Errors
    /// `ProtocolError::HistoryTooLong` if a history does not fit in one envelope.
    pub fn to_envelope(&self, timestamp: Timestamp) -> Result<Envelope> {
        let mut w = PayloadWriter::new();

        match self {
            Message::Started(info) => {
                w.put_u8(info.id);
                w.put_u32(info.os_pid);
                w.put_u32(info.parent_pid);
                w.put_i32(info.balance);
            }
            Message::Done(info) => {
                w.put_u8(info.id);
                w.put_i32(info.balance);
            }
            Message::Transfer(order) => {
                w.put_u8(order.src);
                w.put_u8(order.dst);
                w.put_i32(order.amount);
            }
            Message::BalanceHistory(history) => {
                let max = max_history_entries();
                if history.len() > max {
                    return Err(ProtocolError::HistoryTooLong {
                        owner: history.owner(),
                        entries: history.len(),
                        max,
                    }
                    .into());
                }

                w.put_u8(history.owner());
                w.put_u16(history.len() as u16);
                for state in history.entries() {
                    w.put_i32(state.time);
                    w.put_i32(state.balance);
                    w.put_i32(state.pending_in);
                }
            }
            Message::Stop | Message::Ack | Message::CsRequest | Message::CsReply | Message::CsRelease => {}
        }

        Envelope::new(self.kind(), timestamp, w.finish())
    }

    /// Decode the payload of an envelope.
    ///
    /// # Errors
    /// - `FramingError::TruncatedPayload` if a field runs past the payload
    /// - `FramingError::TrailingBytes` if bytes remain after the last field
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let kind = envelope.kind();
        let mut r = PayloadReader::new(kind, envelope.payload());

        let message = match kind {
            MessageKind::Started => Message::Started(StartedInfo {
                id: r.get_u8()?,
                os_pid: r.get_u32()?,
                parent_pid: r.get_u32()?,
                balance: r.get_i32()?,
            }),
            MessageKind::Done => Message::Done(DoneInfo {
                id: r.get_u8()?,
                balance: r.get_i32()?,
            }),
            MessageKind::Transfer => Message::Transfer(TransferOrder {
                src: r.get_u8()?,
                dst: r.get_u8()?,
                amount: r.get_i32()?,
            }),
            MessageKind::BalanceHistory => {
                let owner = r.get_u8()?;
                let len = r.get_u16()? as usize;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    entries.push(BalanceState {
                        time: r.get_i32()?,
                        balance: r.get_i32()?,
                        pending_in: r.get_i32()?,
                    });
                }

                let history = BalanceHistory::from_entries(owner, entries)
                    .map_err(|index| FramingError::HistoryGap { owner, index })?;
                Message::BalanceHistory(history)
            }
            MessageKind::Stop => Message::Stop,
            MessageKind::Ack => Message::Ack,
            MessageKind::CsRequest => Message::CsRequest,
            MessageKind::CsReply => Message::CsReply,
            MessageKind::CsRelease => Message::CsRelease,
        };

        r.finish()?;
        Ok(message)
    }
}

/// Most history entries one envelope can carry.
pub fn max_history_entries() -> usize {
    (MAX_PAYLOAD_LEN - 3) / 12
}

/// Appends host-order integers to a payload buffer.
#[derive(Debug, Default)]
struct PayloadWriter {
    bytes: Vec<u8>,
}

impl PayloadWriter {
    fn new() -> Self {
        Self::default()
    }

    fn put_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_ne_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_ne_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_ne_bytes());
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Reads host-order integers from a payload, tracking the offset.
struct PayloadReader<'a> {
    kind: MessageKind,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(kind: MessageKind, bytes: &'a [u8]) -> Self {
        Self {
            kind,
            bytes,
            offset: 0,
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.offset + N;
        if end > self.bytes.len() {
            return Err(FramingError::TruncatedPayload {
                kind: self.kind,
                offset: self.offset,
                needed: end - self.bytes.len(),
            }
            .into());
        }

        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.offset..end]);
        self.offset = end;
        Ok(out)
    }

    fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn get_u16(&mut self) -> Result<u16> {
        self.take().map(u16::from_ne_bytes)
    }

    fn get_u32(&mut self) -> Result<u32> {
        self.take().map(u32::from_ne_bytes)
    }

    fn get_i32(&mut self) -> Result<i32> {
        self.take().map(i32::from_ne_bytes)
    }

    fn finish(self) -> Result<()> {
        let extra = self.bytes.len() - self.offset;
        if extra > 0 {
            return Err(FramingError::TrailingBytes {
                kind: self.kind,
                extra,
            }
            .into());
        }
        Ok(())
    }
}
