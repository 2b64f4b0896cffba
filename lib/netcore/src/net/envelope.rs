//! The 5-byte envelope that precedes every payload on the wire, the message-type registry,
//! and the sequence tracker used to order messages per direction (section 4.2).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use corenet::shared::{ErrorType, NetworkError, NetworkResult};
use corenet::PROTOCOL_VERSION;
use std::collections::HashMap;

use crate::net::buffer::ByteBuffer;
use crate::net::compress::{compress, decompress, COMPRESSION_THRESHOLD};
use crate::net::messages::Message;

pub const ENVELOPE_SIZE: usize = 5;
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// High bit of the version byte flags a compressed payload; the remaining 7 bits are the
/// actual protocol version (section 4.3's `[ADDED]` compression note).
const COMPRESSED_FLAG: u8 = 0b1000_0000;
const VERSION_MASK: u8 = !COMPRESSED_FLAG;

/// Message-type identifiers, stable and part of the wire format (section 3 / 4.3). System
/// messages occupy 1-99, gameplay 100-199, 200+ is reserved for future use.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u16)]
pub enum MessageType {
    Join = 1,
    JoinAccept = 2,
    JoinReject = 3,
    Reconnect = 4,
    Disconnect = 5,
    Heartbeat = 6,
    HeartbeatResponse = 7,
    Kick = 8,
    ServerStatus = 9,
    PlayerList = 10,
    Chat = 11,
    SnapshotStart = 12,
    SnapshotChunk = 13,
    SnapshotEnd = 14,
    TerrainSync = 15,
    TerrainSyncVerify = 16,
    TerrainSyncComplete = 17,
    SnapshotRequest = 18,
    Input = 100,
    InputAck = 101,
    Rejection = 102,
    StateUpdate = 103,
    TerrainModifiedEvent = 104,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Option<MessageType> {
        use MessageType::*;

        Some(match value {
            1 => Join,
            2 => JoinAccept,
            3 => JoinReject,
            4 => Reconnect,
            5 => Disconnect,
            6 => Heartbeat,
            7 => HeartbeatResponse,
            8 => Kick,
            9 => ServerStatus,
            10 => PlayerList,
            11 => Chat,
            12 => SnapshotStart,
            13 => SnapshotChunk,
            14 => SnapshotEnd,
            15 => TerrainSync,
            16 => TerrainSyncVerify,
            17 => TerrainSyncComplete,
            18 => SnapshotRequest,
            100 => Input,
            101 => InputAck,
            102 => Rejection,
            103 => StateUpdate,
            104 => TerrainModifiedEvent,
            _ => return None,
        })
    }
}

/// Parsed envelope header, or `Invalid` for a window/type that doesn't pass raw validation.
#[derive(Debug, Eq, PartialEq)]
pub enum EnvelopeHeader {
    Valid {
        version: u8,
        compressed: bool,
        msg_type: u16,
        payload_length: u16,
    },
    Invalid,
}

/// Writes version, type, payload-length, then the payload itself.
#[inline]
pub fn serialize_with_envelope(
    out: &mut ByteBuffer,
    msg_type: MessageType,
    payload: &[u8],
    compressed: bool,
) -> NetworkResult<()> {
    if payload.len() > u16::max_value() as usize {
        return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
    }

    let version = if compressed {
        PROTOCOL_VERSION | COMPRESSED_FLAG
    } else {
        PROTOCOL_VERSION
    };

    out.write_u8(version)?;
    out.write_u16::<LittleEndian>(msg_type as u16)?;
    out.write_u16::<LittleEndian>(payload.len() as u16)?;
    out.write_bytes(payload);
    Ok(())
}

/// Reads five bytes and returns a header, or `Invalid` if the version window or the type is
/// not acceptable. Does not consume the payload.
#[inline]
pub fn parse_envelope(buffer: &mut ByteBuffer) -> EnvelopeHeader {
    if buffer.remaining() < ENVELOPE_SIZE {
        return EnvelopeHeader::Invalid;
    }

    let raw_version = match buffer.read_u8() {
        Ok(v) => v,
        Err(_) => return EnvelopeHeader::Invalid,
    };
    let msg_type = match buffer.read_u16::<LittleEndian>() {
        Ok(v) => v,
        Err(_) => return EnvelopeHeader::Invalid,
    };
    let payload_length = match buffer.read_u16::<LittleEndian>() {
        Ok(v) => v,
        Err(_) => return EnvelopeHeader::Invalid,
    };

    let version = raw_version & VERSION_MASK;
    let compressed = raw_version & COMPRESSED_FLAG != 0;

    if version != PROTOCOL_VERSION {
        return EnvelopeHeader::Invalid;
    }

    if MessageType::from_u16(msg_type).is_none() {
        return EnvelopeHeader::Invalid;
    }

    EnvelopeHeader::Valid {
        version,
        compressed,
        msg_type,
        payload_length,
    }
}

/// Serializes a typed message and wraps it in its envelope in one step — the common case
/// for every caller that just wants bytes ready to hand to the I/O worker.
pub fn frame_message<M: Message>(message: &M) -> NetworkResult<Vec<u8>> {
    let mut payload = ByteBuffer::new();
    message.write_payload(&mut payload)?;

    let mut framed = ByteBuffer::new();
    serialize_with_envelope(&mut framed, message.message_type(), payload.data(), false)?;
    Ok(framed.into_vec())
}

/// Like `frame_message`, but compresses the payload and sets the envelope's compressed flag
/// once it grows past `COMPRESSION_THRESHOLD` (section 4.3's `[ADDED]` compression note).
/// Used for the one message type large enough to need it, `StateUpdate`.
pub fn frame_message_auto<M: Message>(message: &M) -> NetworkResult<Vec<u8>> {
    let mut payload = ByteBuffer::new();
    message.write_payload(&mut payload)?;
    let raw = payload.into_vec();

    let mut framed = ByteBuffer::new();
    if raw.len() >= COMPRESSION_THRESHOLD {
        let compressed = compress(&raw)?;
        serialize_with_envelope(&mut framed, message.message_type(), &compressed, true)?;
    } else {
        serialize_with_envelope(&mut framed, message.message_type(), &raw, false)?;
    }
    Ok(framed.into_vec())
}

/// Wraps a just-read payload slice in a `ByteBuffer`, decompressing first if the envelope's
/// compressed flag was set. The counterpart readers use for any message framed with
/// `frame_message_auto` (and the one accepted from a client, should one ever compress).
pub fn payload_buffer(compressed: bool, bytes: Vec<u8>, size_hint: usize) -> NetworkResult<ByteBuffer> {
    if compressed {
        let data = decompress(&bytes, size_hint)?;
        Ok(ByteBuffer::from_vec(data))
    } else {
        Ok(ByteBuffer::from_vec(bytes))
    }
}

/// Advances past a malformed or unknown payload so the datagram stream stays in sync.
#[inline]
pub fn skip_payload(buffer: &mut ByteBuffer, payload_length: u16) -> NetworkResult<()> {
    buffer
        .read_bytes(payload_length as usize)
        .map(|_| ())
        .map_err(|_| NetworkError::Fatal(ErrorType::PayloadTooLarge))
}

type MessageCreator = fn() -> Box<dyn Message>;

/// Registry from message type to a constructor for a fresh, default-valued payload.
/// Registration happens once, at startup.
#[derive(Default)]
pub struct MessageFactory {
    creators: HashMap<u16, MessageCreator>,
}

impl MessageFactory {
    pub fn new() -> MessageFactory {
        MessageFactory {
            creators: HashMap::new(),
        }
    }

    pub fn register(&mut self, msg_type: MessageType, creator: MessageCreator) {
        self.creators.insert(msg_type as u16, creator);
    }

    pub fn is_registered(&self, msg_type: u16) -> bool {
        self.creators.contains_key(&msg_type)
    }

    pub fn create(&self, msg_type: u16) -> Option<Box<dyn Message>> {
        self.creators.get(&msg_type).map(|creator| creator())
    }
}

/// Tracks monotonic outbound sequence numbers and judges inbound ones against wraparound.
#[derive(Default)]
pub struct SequenceTracker {
    outbound: u32,
    last_inbound: Option<u32>,
}

impl SequenceTracker {
    pub fn new() -> SequenceTracker {
        SequenceTracker {
            outbound: 0,
            last_inbound: None,
        }
    }

    /// Returns the next outbound sequence number, advancing the counter (wraps on overflow).
    pub fn next_outbound(&mut self) -> u32 {
        let seq = self.outbound;
        self.outbound = self.outbound.wrapping_add(1);
        seq
    }

    /// Wraparound-aware "is newer" predicate: `a` is newer than `b` iff the signed
    /// difference `a - b` (wrapping 32-bit arithmetic) is positive. This is the standard
    /// sequence-comparison trick used for TCP sequence numbers.
    pub fn is_newer(a: u32, b: u32) -> bool {
        (a.wrapping_sub(b) as i32) > 0
    }

    /// Records an inbound sequence number, returning whether it was newer than anything
    /// seen before (and therefore worth acting on in an ordering-sensitive handler).
    pub fn record_inbound(&mut self, seq: u32) -> bool {
        match self.last_inbound {
            None => {
                self.last_inbound = Some(seq);
                true
            }
            Some(last) if Self::is_newer(seq, last) => {
                self.last_inbound = Some(seq);
                true
            }
            _ => false,
        }
    }
}
