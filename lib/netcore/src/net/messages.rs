//! Message payloads (section 4.3): the `Message` trait dyn-dispatched through
//! `envelope::MessageFactory`, and one concrete type per `MessageType` variant.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use corenet::shared::{ErrorType, NetworkError, NetworkResult};

use crate::net::buffer::ByteBuffer;
use crate::net::envelope::MessageType;
use crate::net::types::{
    ChangeKind, ComponentMask, EntityId, GridRect, JoinRejectReason, KickReason, MapSizeTier,
    PlayerId, PlayerStatus, RejectionReason, SequenceNumber, ServerState, SnapshotRequestReason, Tick,
    TerrainOperation,
};

/// Longest string accepted on the wire (player names, chat text): bounds how much an
/// attacker can make us allocate from a single length prefix before we've even looked at
/// the content (section 4.9, raw validation).
pub const MAX_STRING_LEN: u32 = 4096;

fn write_string(out: &mut ByteBuffer, value: &str) -> NetworkResult<()> {
    let bytes = value.as_bytes();
    if bytes.len() as u64 > MAX_STRING_LEN as u64 {
        return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
    }
    out.write_u32::<LittleEndian>(bytes.len() as u32)?;
    out.write_bytes(bytes);
    Ok(())
}

fn read_string(buf: &mut ByteBuffer) -> NetworkResult<String> {
    let len = buf.read_u32::<LittleEndian>()?;
    if len > MAX_STRING_LEN {
        return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
    }
    let bytes = buf.read_bytes(len as usize)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| NetworkError::Fatal(ErrorType::DeserializationFailed))
}

fn write_bytes_framed(out: &mut ByteBuffer, value: &[u8]) -> NetworkResult<()> {
    out.write_u32::<LittleEndian>(value.len() as u32)?;
    out.write_bytes(value);
    Ok(())
}

fn read_bytes_framed(buf: &mut ByteBuffer) -> NetworkResult<Vec<u8>> {
    let len = buf.read_u32::<LittleEndian>()?;
    if len as usize > crate::net::envelope::MAX_MESSAGE_SIZE {
        return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
    }
    Ok(buf.read_bytes(len as usize)?.to_vec())
}

/// A payload capable of (de)serializing itself against a `ByteBuffer`. Object-safe so the
/// `MessageFactory` can hand out `Box<dyn Message>` and dispatch on it without knowing the
/// concrete type ahead of time.
pub trait Message: std::fmt::Debug {
    fn message_type(&self) -> MessageType;
    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()>;
    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct Join {
    pub client_version: u8,
    pub player_name: String,
    /// Present when resuming a previously issued session; absent for a fresh join.
    pub session_token: Option<[u8; corenet::crypto::SESSION_TOKEN_SIZE]>,
}

impl Message for Join {
    fn message_type(&self) -> MessageType {
        MessageType::Join
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u8(self.client_version)?;
        write_string(out, &self.player_name)?;
        match self.session_token {
            Some(token) => {
                out.write_u8(1)?;
                out.write_bytes(&token);
            }
            None => out.write_u8(0)?,
        }
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.client_version = buf.read_u8()?;
        self.player_name = read_string(buf)?;
        self.session_token = match buf.read_u8()? {
            0 => None,
            _ => {
                let bytes = buf.read_bytes(corenet::crypto::SESSION_TOKEN_SIZE)?;
                let mut token = [0u8; corenet::crypto::SESSION_TOKEN_SIZE];
                token.copy_from_slice(bytes);
                Some(token)
            }
        };
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct JoinAccept {
    pub player_id: PlayerId,
    pub session_token: [u8; corenet::crypto::SESSION_TOKEN_SIZE],
    pub tick: Tick,
    pub map_size: u8,
}

impl Message for JoinAccept {
    fn message_type(&self) -> MessageType {
        MessageType::JoinAccept
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u8(self.player_id)?;
        out.write_bytes(&self.session_token);
        out.write_u64::<LittleEndian>(self.tick)?;
        out.write_u8(self.map_size)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.player_id = buf.read_u8()?;
        let bytes = buf.read_bytes(corenet::crypto::SESSION_TOKEN_SIZE)?;
        self.session_token.copy_from_slice(bytes);
        self.tick = buf.read_u64::<LittleEndian>()?;
        self.map_size = buf.read_u8()?;
        Ok(())
    }
}

impl JoinAccept {
    pub fn map_size_tier(&self) -> Option<MapSizeTier> {
        MapSizeTier::from_u8(self.map_size)
    }
}

#[derive(Debug, Clone, Default)]
pub struct JoinReject {
    pub reason: u8,
}

impl JoinReject {
    pub fn reason(&self) -> JoinRejectReason {
        JoinRejectReason::from_u8(self.reason)
    }
}

impl Message for JoinReject {
    fn message_type(&self) -> MessageType {
        MessageType::JoinReject
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u8(self.reason)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.reason = buf.read_u8()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconnect {
    pub player_id: PlayerId,
    pub session_token: [u8; corenet::crypto::SESSION_TOKEN_SIZE],
}

impl Message for Reconnect {
    fn message_type(&self) -> MessageType {
        MessageType::Reconnect
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u8(self.player_id)?;
        out.write_bytes(&self.session_token);
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.player_id = buf.read_u8()?;
        let bytes = buf.read_bytes(corenet::crypto::SESSION_TOKEN_SIZE)?;
        self.session_token.copy_from_slice(bytes);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Disconnect {
    pub reason: u8,
}

impl Message for Disconnect {
    fn message_type(&self) -> MessageType {
        MessageType::Disconnect
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u8(self.reason)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.reason = buf.read_u8()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    pub sequence: SequenceNumber,
}

impl Message for Heartbeat {
    fn message_type(&self) -> MessageType {
        MessageType::Heartbeat
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u32::<LittleEndian>(self.sequence)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.sequence = buf.read_u32::<LittleEndian>()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeartbeatResponse {
    pub sequence: SequenceNumber,
}

impl Message for HeartbeatResponse {
    fn message_type(&self) -> MessageType {
        MessageType::HeartbeatResponse
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u32::<LittleEndian>(self.sequence)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.sequence = buf.read_u32::<LittleEndian>()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Kick {
    pub reason: u8,
}

impl Kick {
    pub fn reason(&self) -> KickReason {
        KickReason::from_u8(self.reason)
    }
}

impl Message for Kick {
    fn message_type(&self) -> MessageType {
        MessageType::Kick
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u8(self.reason)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.reason = buf.read_u8()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerStatus {
    pub state: u8,
    pub player_count: u8,
    pub max_players: u8,
    pub tick: Tick,
}

impl ServerStatus {
    pub fn state(&self) -> Option<ServerState> {
        ServerState::from_u8(self.state)
    }
}

impl Message for ServerStatus {
    fn message_type(&self) -> MessageType {
        MessageType::ServerStatus
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u8(self.state)?;
        out.write_u8(self.player_count)?;
        out.write_u8(self.max_players)?;
        out.write_u64::<LittleEndian>(self.tick)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.state = buf.read_u8()?;
        self.player_count = buf.read_u8()?;
        self.max_players = buf.read_u8()?;
        self.tick = buf.read_u64::<LittleEndian>()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlayerListEntry {
    pub player_id: PlayerId,
    pub name: String,
    pub status: u8,
}

#[derive(Debug, Clone, Default)]
pub struct PlayerList {
    pub players: Vec<PlayerListEntry>,
}

impl Message for PlayerList {
    fn message_type(&self) -> MessageType {
        MessageType::PlayerList
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u16::<LittleEndian>(self.players.len() as u16)?;
        for entry in &self.players {
            out.write_u8(entry.player_id)?;
            write_string(out, &entry.name)?;
            out.write_u8(entry.status)?;
        }
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        let count = buf.read_u16::<LittleEndian>()?;
        let mut players = Vec::with_capacity(count as usize);
        for _ in 0..count {
            players.push(PlayerListEntry {
                player_id: buf.read_u8()?,
                name: read_string(buf)?,
                status: buf.read_u8()?,
            });
        }
        self.players = players;
        Ok(())
    }
}

impl PlayerListEntry {
    pub fn status(&self) -> Option<PlayerStatus> {
        PlayerStatus::from_u8(self.status)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chat {
    pub player_id: PlayerId,
    pub text: String,
}

impl Message for Chat {
    fn message_type(&self) -> MessageType {
        MessageType::Chat
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u8(self.player_id)?;
        write_string(out, &self.text)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.player_id = buf.read_u8()?;
        self.text = read_string(buf)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotStart {
    pub tick: Tick,
    pub total_chunks: u32,
}

impl Message for SnapshotStart {
    fn message_type(&self) -> MessageType {
        MessageType::SnapshotStart
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u64::<LittleEndian>(self.tick)?;
        out.write_u32::<LittleEndian>(self.total_chunks)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.tick = buf.read_u64::<LittleEndian>()?;
        self.total_chunks = buf.read_u32::<LittleEndian>()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotChunk {
    pub index: u32,
    pub data: Vec<u8>,
}

impl Message for SnapshotChunk {
    fn message_type(&self) -> MessageType {
        MessageType::SnapshotChunk
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u32::<LittleEndian>(self.index)?;
        write_bytes_framed(out, &self.data)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.index = buf.read_u32::<LittleEndian>()?;
        self.data = read_bytes_framed(buf)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotEnd {
    pub total_bytes: u32,
    pub total_chunks: u32,
    pub entity_count: u32,
    pub checksum: u32,
}

impl Message for SnapshotEnd {
    fn message_type(&self) -> MessageType {
        MessageType::SnapshotEnd
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u32::<LittleEndian>(self.total_bytes)?;
        out.write_u32::<LittleEndian>(self.total_chunks)?;
        out.write_u32::<LittleEndian>(self.entity_count)?;
        out.write_u32::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.total_bytes = buf.read_u32::<LittleEndian>()?;
        self.total_chunks = buf.read_u32::<LittleEndian>()?;
        self.entity_count = buf.read_u32::<LittleEndian>()?;
        self.checksum = buf.read_u32::<LittleEndian>()?;
        Ok(())
    }
}

/// A client's request for a full snapshot instead of continuing the transfer or delta stream
/// it currently has (section 4.12's failure table: checksum mismatch or delta-buffer overflow
/// during a transfer both fall back to this instead of limping along on bad state).
#[derive(Debug, Clone, Default)]
pub struct SnapshotRequest {
    pub reason: u8,
}

impl SnapshotRequest {
    pub fn reason(&self) -> SnapshotRequestReason {
        SnapshotRequestReason::from_u8(self.reason)
    }
}

impl Message for SnapshotRequest {
    fn message_type(&self) -> MessageType {
        MessageType::SnapshotRequest
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u8(self.reason)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.reason = buf.read_u8()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TerrainSync {
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub data: Vec<u8>,
}

impl Message for TerrainSync {
    fn message_type(&self) -> MessageType {
        MessageType::TerrainSync
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u32::<LittleEndian>(self.chunk_index)?;
        out.write_u32::<LittleEndian>(self.total_chunks)?;
        write_bytes_framed(out, &self.data)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.chunk_index = buf.read_u32::<LittleEndian>()?;
        self.total_chunks = buf.read_u32::<LittleEndian>()?;
        self.data = read_bytes_framed(buf)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TerrainSyncVerify {
    pub checksum: u32,
}

impl Message for TerrainSyncVerify {
    fn message_type(&self) -> MessageType {
        MessageType::TerrainSyncVerify
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u32::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.checksum = buf.read_u32::<LittleEndian>()?;
        Ok(())
    }
}

/// Carries no data; its arrival alone signals that terrain sync finished (section 4.13).
#[derive(Debug, Clone, Default)]
pub struct TerrainSyncComplete;

impl Message for TerrainSyncComplete {
    fn message_type(&self) -> MessageType {
        MessageType::TerrainSyncComplete
    }

    fn write_payload(&self, _out: &mut ByteBuffer) -> NetworkResult<()> {
        Ok(())
    }

    fn read_payload(&mut self, _buf: &mut ByteBuffer) -> NetworkResult<()> {
        Ok(())
    }
}

/// Fixed 30-byte gameplay command (section 6): the one payload whose size is a wire
/// invariant rather than a consequence of its contents, which the rate limiter and
/// validator both lean on to reject malformed frames before touching the simulation.
pub const INPUT_PAYLOAD_SIZE: usize = 30;

#[derive(Debug, Clone, Copy, Default)]
pub struct Input {
    pub tick: Tick,
    pub player_id: PlayerId,
    pub input_type: u8,
    pub sequence: SequenceNumber,
    pub target_x: i16,
    pub target_y: i16,
    pub param1: u32,
    pub param2: u32,
    pub value: i32,
}

impl Message for Input {
    fn message_type(&self) -> MessageType {
        MessageType::Input
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u64::<LittleEndian>(self.tick)?;
        out.write_u8(self.player_id)?;
        out.write_u8(self.input_type)?;
        out.write_u32::<LittleEndian>(self.sequence)?;
        out.write_i16::<LittleEndian>(self.target_x)?;
        out.write_i16::<LittleEndian>(self.target_y)?;
        out.write_u32::<LittleEndian>(self.param1)?;
        out.write_u32::<LittleEndian>(self.param2)?;
        out.write_i32::<LittleEndian>(self.value)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        if buf.remaining() != INPUT_PAYLOAD_SIZE {
            return Err(NetworkError::Fatal(ErrorType::LengthMismatch));
        }
        self.tick = buf.read_u64::<LittleEndian>()?;
        self.player_id = buf.read_u8()?;
        self.input_type = buf.read_u8()?;
        self.sequence = buf.read_u32::<LittleEndian>()?;
        self.target_x = buf.read_i16::<LittleEndian>()?;
        self.target_y = buf.read_i16::<LittleEndian>()?;
        self.param1 = buf.read_u32::<LittleEndian>()?;
        self.param2 = buf.read_u32::<LittleEndian>()?;
        self.value = buf.read_i32::<LittleEndian>()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InputAck {
    pub sequence: SequenceNumber,
    pub tick: Tick,
}

impl Message for InputAck {
    fn message_type(&self) -> MessageType {
        MessageType::InputAck
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u32::<LittleEndian>(self.sequence)?;
        out.write_u64::<LittleEndian>(self.tick)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.sequence = buf.read_u32::<LittleEndian>()?;
        self.tick = buf.read_u64::<LittleEndian>()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Rejection {
    pub sequence: SequenceNumber,
    pub reason: u8,
    pub tick: Tick,
    pub message: String,
}

impl Rejection {
    pub fn reason(&self) -> RejectionReason {
        RejectionReason::from_u8(self.reason)
    }
}

impl Message for Rejection {
    fn message_type(&self) -> MessageType {
        MessageType::Rejection
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u32::<LittleEndian>(self.sequence)?;
        out.write_u8(self.reason)?;
        out.write_u64::<LittleEndian>(self.tick)?;
        write_string(out, &self.message)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.sequence = buf.read_u32::<LittleEndian>()?;
        self.reason = buf.read_u8()?;
        self.tick = buf.read_u64::<LittleEndian>()?;
        self.message = read_string(buf)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityChange {
    pub entity_id: EntityId,
    pub kind: u8,
    pub component_mask: ComponentMask,
    pub data: Vec<u8>,
}

impl EntityChange {
    pub fn kind(&self) -> Option<ChangeKind> {
        ChangeKind::from_u8(self.kind)
    }

    fn write(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u32::<LittleEndian>(self.entity_id)?;
        out.write_u8(self.kind)?;
        out.write_u32::<LittleEndian>(self.component_mask)?;
        write_bytes_framed(out, &self.data)?;
        Ok(())
    }

    fn read(buf: &mut ByteBuffer) -> NetworkResult<EntityChange> {
        Ok(EntityChange {
            entity_id: buf.read_u32::<LittleEndian>()?,
            kind: buf.read_u8()?,
            component_mask: buf.read_u32::<LittleEndian>()?,
            data: read_bytes_framed(buf)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub tick: Tick,
    pub changes: Vec<EntityChange>,
}

impl Message for StateUpdate {
    fn message_type(&self) -> MessageType {
        MessageType::StateUpdate
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u64::<LittleEndian>(self.tick)?;
        out.write_u16::<LittleEndian>(self.changes.len() as u16)?;
        for change in &self.changes {
            change.write(out)?;
        }
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.tick = buf.read_u64::<LittleEndian>()?;
        let count = buf.read_u16::<LittleEndian>()?;
        let mut changes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            changes.push(EntityChange::read(buf)?);
        }
        self.changes = changes;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TerrainModifiedEvent {
    pub tick: Tick,
    pub rect: GridRect,
    pub operation: u8,
}

impl TerrainModifiedEvent {
    pub fn operation(&self) -> TerrainOperation {
        TerrainOperation::from_u8(self.operation)
    }
}

impl Message for TerrainModifiedEvent {
    fn message_type(&self) -> MessageType {
        MessageType::TerrainModifiedEvent
    }

    fn write_payload(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_u64::<LittleEndian>(self.tick)?;
        self.rect.write(out)?;
        out.write_u8(self.operation)?;
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut ByteBuffer) -> NetworkResult<()> {
        self.tick = buf.read_u64::<LittleEndian>()?;
        self.rect = GridRect::read(buf)?;
        self.operation = buf.read_u8()?;
        Ok(())
    }
}

/// Registers every payload type's default constructor with a fresh factory. Called once at
/// startup by both the server and client cores (section 4.3's "one factory, shared table").
pub fn register_all(factory: &mut crate::net::envelope::MessageFactory) {
    factory.register(MessageType::Join, || Box::new(Join::default()));
    factory.register(MessageType::JoinAccept, || Box::new(JoinAccept::default()));
    factory.register(MessageType::JoinReject, || Box::new(JoinReject::default()));
    factory.register(MessageType::Reconnect, || Box::new(Reconnect::default()));
    factory.register(MessageType::Disconnect, || Box::new(Disconnect::default()));
    factory.register(MessageType::Heartbeat, || Box::new(Heartbeat::default()));
    factory.register(MessageType::HeartbeatResponse, || {
        Box::new(HeartbeatResponse::default())
    });
    factory.register(MessageType::Kick, || Box::new(Kick::default()));
    factory.register(MessageType::ServerStatus, || Box::new(ServerStatus::default()));
    factory.register(MessageType::PlayerList, || Box::new(PlayerList::default()));
    factory.register(MessageType::Chat, || Box::new(Chat::default()));
    factory.register(MessageType::SnapshotStart, || Box::new(SnapshotStart::default()));
    factory.register(MessageType::SnapshotChunk, || Box::new(SnapshotChunk::default()));
    factory.register(MessageType::SnapshotEnd, || Box::new(SnapshotEnd::default()));
    factory.register(MessageType::SnapshotRequest, || Box::new(SnapshotRequest::default()));
    factory.register(MessageType::TerrainSync, || Box::new(TerrainSync::default()));
    factory.register(MessageType::TerrainSyncVerify, || {
        Box::new(TerrainSyncVerify::default())
    });
    factory.register(MessageType::TerrainSyncComplete, || {
        Box::new(TerrainSyncComplete::default())
    });
    factory.register(MessageType::Input, || Box::new(Input::default()));
    factory.register(MessageType::InputAck, || Box::new(InputAck::default()));
    factory.register(MessageType::Rejection, || Box::new(Rejection::default()));
    factory.register(MessageType::StateUpdate, || Box::new(StateUpdate::default()));
    factory.register(MessageType::TerrainModifiedEvent, || {
        Box::new(TerrainModifiedEvent::default())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_roundtrip_without_token() {
        let join = Join {
            client_version: 1,
            player_name: "Mayor".to_string(),
            session_token: None,
        };

        let mut buf = ByteBuffer::new();
        join.write_payload(&mut buf).unwrap();

        let mut decoded = Join::default();
        decoded.read_payload(&mut buf).unwrap();

        assert_eq!(decoded.client_version, 1);
        assert_eq!(decoded.player_name, "Mayor");
        assert_eq!(decoded.session_token, None);
    }

    #[test]
    fn test_join_roundtrip_with_token() {
        let join = Join {
            client_version: 1,
            player_name: "Mayor".to_string(),
            session_token: Some([7u8; corenet::crypto::SESSION_TOKEN_SIZE]),
        };

        let mut buf = ByteBuffer::new();
        join.write_payload(&mut buf).unwrap();

        let mut decoded = Join::default();
        decoded.read_payload(&mut buf).unwrap();

        assert_eq!(decoded.session_token, Some([7u8; corenet::crypto::SESSION_TOKEN_SIZE]));
    }

    #[test]
    fn test_input_is_exactly_thirty_bytes() {
        let input = Input {
            tick: 42,
            player_id: 3,
            input_type: 0,
            sequence: 99,
            target_x: -10,
            target_y: 20,
            param1: 5,
            param2: 6,
            value: -1,
        };

        let mut buf = ByteBuffer::new();
        input.write_payload(&mut buf).unwrap();
        assert_eq!(buf.size(), INPUT_PAYLOAD_SIZE);

        let mut decoded = Input::default();
        decoded.read_payload(&mut buf).unwrap();
        assert_eq!(decoded.target_x, -10);
        assert_eq!(decoded.value, -1);
    }

    #[test]
    fn test_input_rejects_wrong_length() {
        let mut buf = ByteBuffer::new();
        buf.write_bytes(&[0u8; 10]);

        let mut decoded = Input::default();
        assert!(decoded.read_payload(&mut buf).is_err());
    }

    #[test]
    fn test_state_update_roundtrip_with_multiple_changes() {
        let update = StateUpdate {
            tick: 7,
            changes: vec![
                EntityChange {
                    entity_id: 1,
                    kind: ChangeKind::Created.to_u8(),
                    component_mask: 0b11,
                    data: vec![1, 2, 3],
                },
                EntityChange {
                    entity_id: 2,
                    kind: ChangeKind::Destroyed.to_u8(),
                    component_mask: 0,
                    data: vec![],
                },
            ],
        };

        let mut buf = ByteBuffer::new();
        update.write_payload(&mut buf).unwrap();

        let mut decoded = StateUpdate::default();
        decoded.read_payload(&mut buf).unwrap();

        assert_eq!(decoded.changes.len(), 2);
        assert_eq!(decoded.changes[0].kind(), Some(ChangeKind::Created));
        assert_eq!(decoded.changes[1].kind(), Some(ChangeKind::Destroyed));
    }

    #[test]
    fn test_chat_rejects_oversized_string_length_prefix() {
        let mut buf = ByteBuffer::new();
        buf.write_u8(1).unwrap();
        buf.write_u32::<LittleEndian>(MAX_STRING_LEN + 1).unwrap();

        let mut decoded = Chat::default();
        assert!(decoded.read_payload(&mut buf).is_err());
    }

    #[test]
    fn test_rejection_roundtrips_tick_and_message() {
        let rejection = Rejection {
            sequence: 5,
            reason: RejectionReason::CannotAfford.to_u8(),
            tick: 77,
            message: "insufficient funds".to_string(),
        };

        let mut buf = ByteBuffer::new();
        rejection.write_payload(&mut buf).unwrap();

        let mut decoded = Rejection::default();
        decoded.read_payload(&mut buf).unwrap();

        assert_eq!(decoded.tick, 77);
        assert_eq!(decoded.message, "insufficient funds");
        assert_eq!(decoded.reason(), RejectionReason::CannotAfford);
    }

    #[test]
    fn test_snapshot_end_roundtrips_size_and_counts() {
        let end = SnapshotEnd {
            total_bytes: 4096,
            total_chunks: 3,
            entity_count: 120,
            checksum: 0xdead_beef,
        };

        let mut buf = ByteBuffer::new();
        end.write_payload(&mut buf).unwrap();

        let mut decoded = SnapshotEnd::default();
        decoded.read_payload(&mut buf).unwrap();

        assert_eq!(decoded.total_bytes, 4096);
        assert_eq!(decoded.total_chunks, 3);
        assert_eq!(decoded.entity_count, 120);
        assert_eq!(decoded.checksum, 0xdead_beef);
    }

    #[test]
    fn test_snapshot_request_roundtrips_reason() {
        let request = SnapshotRequest {
            reason: SnapshotRequestReason::ChecksumMismatch.to_u8(),
        };

        let mut buf = ByteBuffer::new();
        request.write_payload(&mut buf).unwrap();

        let mut decoded = SnapshotRequest::default();
        decoded.read_payload(&mut buf).unwrap();

        assert_eq!(decoded.reason(), SnapshotRequestReason::ChecksumMismatch);
    }

    #[test]
    fn test_register_all_covers_every_type() {
        let mut factory = crate::net::envelope::MessageFactory::new();
        register_all(&mut factory);

        for &msg_type in &[
            MessageType::Join,
            MessageType::JoinAccept,
            MessageType::JoinReject,
            MessageType::Reconnect,
            MessageType::Disconnect,
            MessageType::Heartbeat,
            MessageType::HeartbeatResponse,
            MessageType::Kick,
            MessageType::ServerStatus,
            MessageType::PlayerList,
            MessageType::Chat,
            MessageType::SnapshotStart,
            MessageType::SnapshotChunk,
            MessageType::SnapshotEnd,
            MessageType::SnapshotRequest,
            MessageType::TerrainSync,
            MessageType::TerrainSyncVerify,
            MessageType::TerrainSyncComplete,
            MessageType::Input,
            MessageType::InputAck,
            MessageType::Rejection,
            MessageType::StateUpdate,
            MessageType::TerrainModifiedEvent,
        ] {
            assert!(factory.is_registered(msg_type as u16), "{:?} not registered", msg_type);
        }
    }
}
