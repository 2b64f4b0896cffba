//! Client core (section 4.10's "C10"): the application-level counterpart to `servercore`'s
//! `ServerCore`. Owns every piece of client-side protocol state except the transport itself
//! — exactly like the server half, the main context only ever exchanges `ClientWorkerEvent`/
//! `ClientWorkerCommand` values with whoever owns the `ClientIoWorker` (typically the
//! binary's tick loop), so this is exercisable in tests without a real socket.

use std::collections::VecDeque;

use corenet::logging::{debug, info, warn, Logger};
use corenet::time::timestamp_millis;

use netcore::ioworker::{ClientRawMessage, ClientWorkerEvent};
use netcore::net::buffer::ByteBuffer;
use netcore::net::envelope::{self, EnvelopeHeader, MessageType, SequenceTracker};
use netcore::net::messages::{
    Chat, Disconnect, Heartbeat, HeartbeatResponse, Input, InputAck, Join, JoinAccept, JoinReject,
    Kick, Message, PlayerListEntry, Reconnect, Rejection, ServerStatus, SnapshotRequest, StateUpdate,
    TerrainModifiedEvent, TerrainSync, TerrainSyncVerify,
};
use netcore::net::transport::Channel;
use netcore::net::types::{
    InputType, JoinRejectReason, KickReason, MapSizeTier, PlayerId, SequenceNumber, ServerState,
    SnapshotRequestReason, Tick,
};

use registry::Registry;

use crate::backoff::ReconnectBackoff;
use crate::config::ClientConfig;
use crate::delta::DeltaApplier;
use crate::pending::PendingActionTracker;
use crate::rtt::RttTracker;
use crate::snapshot::{SnapshotApplyError, SnapshotProgress, SnapshotReceiver};
use crate::terrain::{TerrainState, TerrainSyncReceiver};
use crate::timeout::{self, TimeoutLevel};

const CHAT_LOG_CAPACITY: usize = 200;

/// One outbound datagram the core wants sent, addressed to the single connection
/// `ClientIoWorker` owns (there is no peer id on the client side, unlike `servercore`'s
/// `OutboundQueue`).
pub type OutboundQueue = Vec<ClientRawMessage>;

fn queue_send(outbound: &mut OutboundQueue, channel: Channel, bytes: Vec<u8>) {
    outbound.push(ClientRawMessage { channel, bytes });
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerStatusSnapshot {
    pub state: Option<ServerState>,
    pub player_count: u8,
    pub max_players: u8,
    pub tick: Tick,
}

pub struct ClientCore {
    state: ClientState,
    config: ClientConfig,
    log: Logger,

    player_id: Option<PlayerId>,
    session_token: Option<[u8; corenet::crypto::SESSION_TOKEN_SIZE]>,
    map_size: Option<MapSizeTier>,
    join_reject_reason: Option<JoinRejectReason>,
    kick_reason: Option<KickReason>,

    server_status: Option<ServerStatusSnapshot>,
    players: Vec<PlayerListEntry>,
    chat_log: VecDeque<Chat>,

    sequence: SequenceTracker,
    next_heartbeat_seq: u32,
    last_heartbeat_sent_ms: u64,
    last_heartbeat_seq_sent: u32,
    last_message_at_ms: u64,
    connect_sent_at_ms: u64,
    reconnect_delay_ms: Option<u64>,

    backoff: ReconnectBackoff,
    rtt: RttTracker,
    pending: PendingActionTracker,
    delta_applier: DeltaApplier,
    snapshot: SnapshotReceiver,
    terrain: TerrainSyncReceiver,
    terrain_state: Option<TerrainState>,
    terrain_total_chunks: Option<u32>,
    terrain_chunks_received: u32,
    terrain_verified: bool,
}

impl ClientCore {
    pub fn new(config: ClientConfig, log: Logger) -> ClientCore {
        let backoff = ReconnectBackoff::new(config.initial_reconnect_delay_ms, config.max_reconnect_delay_ms);
        let buffer_capacity = config.snapshot_delta_buffer_capacity;

        ClientCore {
            state: ClientState::Disconnected,
            player_id: None,
            session_token: None,
            map_size: None,
            join_reject_reason: None,
            kick_reason: None,
            server_status: None,
            players: Vec::new(),
            chat_log: VecDeque::new(),
            sequence: SequenceTracker::new(),
            next_heartbeat_seq: 0,
            last_heartbeat_sent_ms: 0,
            last_heartbeat_seq_sent: 0,
            last_message_at_ms: timestamp_millis(),
            connect_sent_at_ms: 0,
            reconnect_delay_ms: None,
            backoff,
            rtt: RttTracker::new(),
            pending: PendingActionTracker::new(),
            delta_applier: DeltaApplier::new(),
            snapshot: SnapshotReceiver::new(buffer_capacity),
            terrain: TerrainSyncReceiver::new(),
            terrain_state: None,
            terrain_total_chunks: None,
            terrain_chunks_received: 0,
            terrain_verified: false,
            config,
            log,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn map_size(&self) -> Option<MapSizeTier> {
        self.map_size
    }

    pub fn join_reject_reason(&self) -> Option<JoinRejectReason> {
        self.join_reject_reason
    }

    pub fn kick_reason(&self) -> Option<KickReason> {
        self.kick_reason
    }

    pub fn server_status(&self) -> Option<ServerStatusSnapshot> {
        self.server_status
    }

    pub fn players(&self) -> &[PlayerListEntry] {
        &self.players
    }

    pub fn chat_log(&self) -> &VecDeque<Chat> {
        &self.chat_log
    }

    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt.smoothed_ms()
    }

    pub fn pending_actions(&self) -> &PendingActionTracker {
        &self.pending
    }

    pub fn terrain_state(&self) -> Option<&TerrainState> {
        self.terrain_state.as_ref()
    }

    pub fn terrain_verified(&self) -> bool {
        self.terrain_verified
    }

    /// How worried the UI should look, derived from wall-clock silence since the last
    /// message actually received from the server (section 4.10's staged degradation).
    pub fn timeout_level(&self) -> TimeoutLevel {
        let since = timestamp_millis().saturating_sub(self.last_message_at_ms);
        timeout::derive(since, &self.config)
    }

    /// Takes the reconnect delay the last transport disconnect computed, if any — the
    /// binary is expected to wait this long before rebuilding the transport and retrying
    /// (section 4.10: exponential backoff governs *how often the client tries*, not whether
    /// the transport itself reconnects).
    pub fn take_reconnect_delay_ms(&mut self) -> Option<u64> {
        self.reconnect_delay_ms.take()
    }

    /// Sends a fresh `Join` once the transport is up. Call this after observing
    /// `ClientWorkerEvent::Connected` with no prior session (a first-time connect, not a
    /// resume).
    pub fn connect(&mut self, outbound: &mut OutboundQueue) {
        let join = Join {
            client_version: self.config.client_version,
            player_name: self.config.player_name.clone(),
            session_token: None,
        };
        self.state = ClientState::Connecting;
        self.connect_sent_at_ms = timestamp_millis();
        self.send_framed(&join, outbound);
        info!(self.log, "sending join"; "name" => self.config.player_name.as_str());
    }

    pub fn handle_worker_event(&mut self, event: ClientWorkerEvent, registry: &mut Registry, outbound: &mut OutboundQueue) {
        match event {
            ClientWorkerEvent::Connected => self.on_transport_connected(outbound),
            ClientWorkerEvent::Disconnected => self.on_transport_disconnected(),
            ClientWorkerEvent::Message(ClientRawMessage { channel: _, bytes }) => {
                self.on_receive(bytes, registry, outbound);
            }
        }
    }

    /// A previously joined session resumes automatically the moment the transport reconnects;
    /// a brand new session needs an explicit `connect()` call from the binary, since only it
    /// knows the player name to offer.
    fn on_transport_connected(&mut self, outbound: &mut OutboundQueue) {
        if let (Some(player_id), Some(token)) = (self.player_id, self.session_token) {
            debug!(self.log, "transport reconnected, resuming session"; "player" => player_id);
            self.state = ClientState::Connecting;
            self.connect_sent_at_ms = timestamp_millis();
            let reconnect = Reconnect { player_id, session_token: token };
            self.send_framed(&reconnect, outbound);
        }
    }

    /// Transient transport loss: if a session is known, it survives and a reconnect is
    /// scheduled (section 4.10's "exponential backoff"); otherwise there is nothing to
    /// resume and the client simply goes idle.
    fn on_transport_disconnected(&mut self) {
        if self.session_token.is_some() {
            self.state = ClientState::Reconnecting;
            self.reconnect_delay_ms = Some(self.backoff.next_delay_ms());
            warn!(self.log, "transport disconnected, scheduling reconnect");
        } else {
            self.state = ClientState::Disconnected;
        }
    }

    /// Per-tick housekeeping: heartbeat cadence, connect-attempt timeout, pending-action
    /// sweep (section 4.10).
    pub fn tick(&mut self, outbound: &mut OutboundQueue) {
        let now = timestamp_millis();

        if self.state == ClientState::Connecting && now.saturating_sub(self.connect_sent_at_ms) >= self.config.connect_timeout_ms {
            warn!(self.log, "connect attempt timed out");
            if self.session_token.is_some() {
                self.state = ClientState::Reconnecting;
                self.reconnect_delay_ms = Some(self.backoff.next_delay_ms());
            } else {
                self.state = ClientState::Disconnected;
            }
        }

        if self.state == ClientState::Connected && now.saturating_sub(self.last_heartbeat_sent_ms) >= self.config.heartbeat_interval_ms {
            self.send_heartbeat(outbound);
        }

        self.pending.sweep(self.config.pending_action_timeout_ms, self.config.pending_action_retention_ms);
    }

    fn send_heartbeat(&mut self, outbound: &mut OutboundQueue) {
        let seq = self.next_heartbeat_seq;
        self.next_heartbeat_seq = self.next_heartbeat_seq.wrapping_add(1);
        self.last_heartbeat_sent_ms = timestamp_millis();
        self.last_heartbeat_seq_sent = seq;
        self.send_framed(&Heartbeat { sequence: seq }, outbound);
    }

    /// Assigns the next outbound sequence number, tracks it as a pending action, and sends
    /// the `Input` (section 3's "Pending action (client)"). Returns the sequence so the
    /// caller can correlate UI state with `pending_actions()`.
    pub fn submit_input(
        &mut self,
        tick: Tick,
        input_type: InputType,
        target_x: i16,
        target_y: i16,
        param1: u32,
        param2: u32,
        value: i32,
        outbound: &mut OutboundQueue,
    ) -> SequenceNumber {
        let sequence = self.sequence.next_outbound();
        let input = Input {
            tick,
            player_id: self.player_id.unwrap_or(0),
            input_type: input_type.to_u8(),
            sequence,
            target_x,
            target_y,
            param1,
            param2,
            value,
        };
        self.pending.track(sequence, input_type.to_u8());
        self.send_framed(&input, outbound);
        sequence
    }

    pub fn send_chat(&mut self, text: String, outbound: &mut OutboundQueue) {
        let chat = Chat {
            player_id: self.player_id.unwrap_or(0),
            text,
        };
        self.send_framed(&chat, outbound);
    }

    fn on_receive(&mut self, bytes: Vec<u8>, registry: &mut Registry, outbound: &mut OutboundQueue) {
        let mut buffer = ByteBuffer::from_vec(bytes);
        let header = envelope::parse_envelope(&mut buffer);

        let (compressed, msg_type, payload_length) = match header {
            EnvelopeHeader::Valid { compressed, msg_type, payload_length, .. } => (compressed, msg_type, payload_length),
            EnvelopeHeader::Invalid => return,
        };

        let raw_payload = match buffer.read_bytes(payload_length as usize) {
            Ok(bytes) => bytes.to_vec(),
            Err(_) => return,
        };

        let mut payload = match envelope::payload_buffer(compressed, raw_payload, payload_length as usize) {
            Ok(buf) => buf,
            Err(_) => return,
        };

        self.last_message_at_ms = timestamp_millis();

        match MessageType::from_u16(msg_type) {
            Some(MessageType::JoinAccept) => self.handle_join_accept(&mut payload),
            Some(MessageType::JoinReject) => self.handle_join_reject(&mut payload),
            Some(MessageType::Kick) => self.handle_kick(&mut payload),
            Some(MessageType::Disconnect) => self.handle_disconnect(&mut payload),
            Some(MessageType::Heartbeat) => self.handle_heartbeat(&mut payload, outbound),
            Some(MessageType::HeartbeatResponse) => self.handle_heartbeat_response(&mut payload),
            Some(MessageType::ServerStatus) => self.handle_server_status(&mut payload),
            Some(MessageType::PlayerList) => self.handle_player_list(&mut payload),
            Some(MessageType::Chat) => self.handle_chat(&mut payload),
            Some(MessageType::SnapshotStart) => self.handle_snapshot_start(&mut payload),
            Some(MessageType::SnapshotChunk) => self.handle_snapshot_chunk(&mut payload),
            Some(MessageType::SnapshotEnd) => self.handle_snapshot_end(&mut payload, registry, outbound),
            Some(MessageType::TerrainSync) => self.handle_terrain_sync(&mut payload, outbound),
            Some(MessageType::TerrainSyncComplete) => self.handle_terrain_sync_complete(),
            Some(MessageType::TerrainModifiedEvent) => self.handle_terrain_modified(&mut payload),
            Some(MessageType::InputAck) => self.handle_input_ack(&mut payload),
            Some(MessageType::Rejection) => self.handle_rejection(&mut payload),
            Some(MessageType::StateUpdate) => self.handle_state_update(&mut payload, registry, outbound),
            // Join/Reconnect/Input/TerrainSyncVerify are client-to-server only.
            _ => {}
        }
    }

    fn handle_join_accept(&mut self, payload: &mut ByteBuffer) {
        let mut accept = JoinAccept::default();
        if accept.read_payload(payload).is_err() {
            return;
        }

        self.player_id = Some(accept.player_id);
        self.session_token = Some(accept.session_token);
        self.map_size = accept.map_size_tier();
        self.join_reject_reason = None;
        self.kick_reason = None;
        self.state = ClientState::Connected;
        self.backoff.reset();

        info!(self.log, "join accepted"; "player" => accept.player_id);
    }

    fn handle_join_reject(&mut self, payload: &mut ByteBuffer) {
        let mut reject = JoinReject::default();
        if reject.read_payload(payload).is_err() {
            return;
        }

        self.join_reject_reason = Some(reject.reason());
        self.session_token = None;
        self.state = ClientState::Disconnected;

        warn!(self.log, "join rejected"; "reason" => ?reject.reason());
    }

    fn handle_kick(&mut self, payload: &mut ByteBuffer) {
        let mut kick = Kick::default();
        if kick.read_payload(payload).is_err() {
            return;
        }

        self.kick_reason = Some(kick.reason());
        self.session_token = None;
        self.state = ClientState::Disconnected;

        warn!(self.log, "kicked by server"; "reason" => ?kick.reason());
    }

    fn handle_disconnect(&mut self, payload: &mut ByteBuffer) {
        let mut disconnect = Disconnect::default();
        let _ = disconnect.read_payload(payload);

        self.session_token = None;
        self.state = ClientState::Disconnected;

        info!(self.log, "server disconnected");
    }

    fn handle_heartbeat(&mut self, payload: &mut ByteBuffer, outbound: &mut OutboundQueue) {
        let mut heartbeat = Heartbeat::default();
        if heartbeat.read_payload(payload).is_err() {
            return;
        }
        self.send_framed(&HeartbeatResponse { sequence: heartbeat.sequence }, outbound);
    }

    fn handle_heartbeat_response(&mut self, payload: &mut ByteBuffer) {
        let mut response = HeartbeatResponse::default();
        if response.read_payload(payload).is_err() {
            return;
        }

        if response.sequence == self.last_heartbeat_seq_sent {
            let rtt_ms = timestamp_millis().saturating_sub(self.last_heartbeat_sent_ms) as f64;
            self.rtt.sample(rtt_ms);
        }
    }

    fn handle_server_status(&mut self, payload: &mut ByteBuffer) {
        let mut status = ServerStatus::default();
        if status.read_payload(payload).is_err() {
            return;
        }

        self.server_status = Some(ServerStatusSnapshot {
            state: status.state(),
            player_count: status.player_count,
            max_players: status.max_players,
            tick: status.tick,
        });
    }

    fn handle_player_list(&mut self, payload: &mut ByteBuffer) {
        let mut list = netcore::net::messages::PlayerList::default();
        if list.read_payload(payload).is_err() {
            return;
        }
        self.players = list.players;
    }

    fn handle_chat(&mut self, payload: &mut ByteBuffer) {
        let mut chat = Chat::default();
        if chat.read_payload(payload).is_err() {
            return;
        }
        if self.chat_log.len() >= CHAT_LOG_CAPACITY {
            self.chat_log.pop_front();
        }
        self.chat_log.push_back(chat);
    }

    fn handle_snapshot_start(&mut self, payload: &mut ByteBuffer) {
        let mut start = netcore::net::messages::SnapshotStart::default();
        if start.read_payload(payload).is_err() {
            return;
        }
        debug!(self.log, "snapshot transfer starting"; "tick" => start.tick, "chunks" => start.total_chunks);
        self.snapshot.begin(start.tick, start.total_chunks);
    }

    fn handle_snapshot_chunk(&mut self, payload: &mut ByteBuffer) {
        let mut chunk = netcore::net::messages::SnapshotChunk::default();
        if chunk.read_payload(payload).is_err() {
            return;
        }
        self.snapshot.push_chunk(chunk.index, chunk.data);
    }

    fn handle_snapshot_end(&mut self, payload: &mut ByteBuffer, registry: &mut Registry, outbound: &mut OutboundQueue) {
        let mut end = netcore::net::messages::SnapshotEnd::default();
        if end.read_payload(payload).is_err() {
            return;
        }

        match self
            .snapshot
            .finish(end.checksum, end.total_bytes, end.entity_count, registry, &mut self.delta_applier)
        {
            Ok(tick) => info!(self.log, "snapshot applied"; "tick" => tick),
            Err(err) => {
                warn!(self.log, "snapshot rejected"; "reason" => ?err);
                if err == SnapshotApplyError::ChecksumMismatch {
                    self.request_snapshot_fallback(SnapshotRequestReason::ChecksumMismatch, outbound);
                }
            }
        }
    }

    /// Asks the server for a brand new full snapshot instead of trusting the current transfer
    /// (section 4.12's failure table: checksum mismatch or buffered-delta overflow).
    fn request_snapshot_fallback(&mut self, reason: SnapshotRequestReason, outbound: &mut OutboundQueue) {
        warn!(self.log, "requesting fallback snapshot"; "reason" => ?reason);
        self.send_framed(&SnapshotRequest { reason: reason.to_u8() }, outbound);
    }

    fn handle_terrain_sync(&mut self, payload: &mut ByteBuffer, outbound: &mut OutboundQueue) {
        let mut chunk = TerrainSync::default();
        if chunk.read_payload(payload).is_err() {
            return;
        }

        if self.terrain_total_chunks.is_none() {
            self.terrain.begin(chunk.total_chunks);
            self.terrain_total_chunks = Some(chunk.total_chunks);
            self.terrain_chunks_received = 0;
            self.terrain_verified = false;
        }

        self.terrain.push_chunk(chunk.chunk_index, chunk.data);
        self.terrain_chunks_received += 1;

        if Some(self.terrain_chunks_received) == self.terrain_total_chunks {
            self.terrain_total_chunks = None;
            match self.terrain.finish() {
                Ok((state, checksum)) => {
                    self.terrain_state = Some(state);
                    self.send_framed(&TerrainSyncVerify { checksum }, outbound);
                }
                Err(err) => warn!(self.log, "terrain sync decode failed"; "reason" => ?err),
            }
        }
    }

    fn handle_terrain_sync_complete(&mut self) {
        self.terrain_verified = true;
        info!(self.log, "terrain sync verified by server");
    }

    fn handle_terrain_modified(&mut self, payload: &mut ByteBuffer) {
        let mut event = TerrainModifiedEvent::default();
        if event.read_payload(payload).is_err() {
            return;
        }
        if let Some(state) = &mut self.terrain_state {
            crate::terrain::append_live_modification(state, event.tick, event.rect, event.operation);
        }
    }

    fn handle_input_ack(&mut self, payload: &mut ByteBuffer) {
        let mut ack = InputAck::default();
        if ack.read_payload(payload).is_err() {
            return;
        }
        self.pending.confirm(ack.sequence, ack.tick);
    }

    fn handle_rejection(&mut self, payload: &mut ByteBuffer) {
        let mut rejection = Rejection::default();
        if rejection.read_payload(payload).is_err() {
            return;
        }
        self.pending.reject(rejection.sequence, rejection.reason(), rejection.message.clone());
    }

    fn handle_state_update(&mut self, payload: &mut ByteBuffer, registry: &mut Registry, outbound: &mut OutboundQueue) {
        let mut update = StateUpdate::default();
        if update.read_payload(payload).is_err() {
            return;
        }

        if self.snapshot.progress() == SnapshotProgress::Receiving || self.snapshot.progress() == SnapshotProgress::Applying {
            self.snapshot.buffer_delta_if_receiving(update);
            if self.snapshot.take_fallback_request() {
                self.request_snapshot_fallback(SnapshotRequestReason::DeltaBufferOverflow, outbound);
            }
        } else {
            self.delta_applier.apply(&update, registry);
        }
    }

    fn send_framed<M: Message>(&mut self, message: &M, outbound: &mut OutboundQueue) {
        if let Ok(bytes) = envelope::frame_message(message) {
            queue_send(outbound, Channel::Reliable, bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corenet::crypto::SESSION_TOKEN_SIZE;
    use netcore::net::types::{GridPosition, RejectionReason};

    fn core() -> ClientCore {
        ClientCore::new(ClientConfig::default(), corenet::logging::discard())
    }

    fn framed<M: Message>(message: &M) -> Vec<u8> {
        envelope::frame_message(message).unwrap()
    }

    #[test]
    fn test_connect_sends_a_join_and_enters_connecting() {
        let mut client = core();
        let mut outbound = Vec::new();

        client.connect(&mut outbound);

        assert_eq!(client.state(), ClientState::Connecting);
        assert_eq!(outbound.len(), 1);

        let mut buf = ByteBuffer::from_vec(outbound[0].bytes.clone());
        match envelope::parse_envelope(&mut buf) {
            EnvelopeHeader::Valid { msg_type, .. } => assert_eq!(msg_type, MessageType::Join as u16),
            EnvelopeHeader::Invalid => panic!("expected a valid header"),
        }
    }

    #[test]
    fn test_join_accept_moves_to_connected_and_records_session() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let accept = JoinAccept {
            player_id: 3,
            session_token: [7u8; SESSION_TOKEN_SIZE],
            tick: 0,
            map_size: MapSizeTier::Medium.to_u8(),
        };

        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&accept) }),
            &mut registry,
            &mut outbound,
        );

        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(client.player_id(), Some(3));
        assert_eq!(client.map_size(), Some(MapSizeTier::Medium));
    }

    #[test]
    fn test_transport_disconnect_without_session_drops_straight_to_disconnected() {
        let mut client = core();
        let mut outbound = Vec::new();
        client.connect(&mut outbound);

        client.handle_worker_event(ClientWorkerEvent::Disconnected, &mut Registry::new(), &mut outbound);

        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(client.take_reconnect_delay_ms().is_none());
    }

    #[test]
    fn test_transport_disconnect_with_session_schedules_a_reconnect() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let accept = JoinAccept {
            player_id: 1,
            session_token: [1u8; SESSION_TOKEN_SIZE],
            tick: 0,
            map_size: MapSizeTier::Small.to_u8(),
        };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&accept) }),
            &mut registry,
            &mut outbound,
        );

        client.handle_worker_event(ClientWorkerEvent::Disconnected, &mut registry, &mut outbound);

        assert_eq!(client.state(), ClientState::Reconnecting);
        assert_eq!(client.take_reconnect_delay_ms(), Some(client.config.initial_reconnect_delay_ms));
    }

    #[test]
    fn test_reconnecting_transport_resumes_session_automatically() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let accept = JoinAccept {
            player_id: 5,
            session_token: [2u8; SESSION_TOKEN_SIZE],
            tick: 0,
            map_size: MapSizeTier::Small.to_u8(),
        };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&accept) }),
            &mut registry,
            &mut outbound,
        );
        client.handle_worker_event(ClientWorkerEvent::Disconnected, &mut registry, &mut outbound);

        outbound.clear();
        client.handle_worker_event(ClientWorkerEvent::Connected, &mut registry, &mut outbound);

        assert_eq!(client.state(), ClientState::Connecting);
        assert_eq!(outbound.len(), 1);
        let mut buf = ByteBuffer::from_vec(outbound[0].bytes.clone());
        match envelope::parse_envelope(&mut buf) {
            EnvelopeHeader::Valid { msg_type, .. } => assert_eq!(msg_type, MessageType::Reconnect as u16),
            EnvelopeHeader::Invalid => panic!("expected a valid header"),
        }
    }

    #[test]
    fn test_heartbeat_from_server_is_echoed_as_a_response() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let heartbeat = Heartbeat { sequence: 42 };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&heartbeat) }),
            &mut registry,
            &mut outbound,
        );

        assert_eq!(outbound.len(), 1);
        let mut buf = ByteBuffer::from_vec(outbound[0].bytes.clone());
        match envelope::parse_envelope(&mut buf) {
            EnvelopeHeader::Valid { msg_type, .. } => assert_eq!(msg_type, MessageType::HeartbeatResponse as u16),
            EnvelopeHeader::Invalid => panic!("expected a valid header"),
        }
    }

    #[test]
    fn test_heartbeat_response_matching_last_sent_samples_rtt() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        client.send_heartbeat(&mut outbound);
        let sent_seq = client.last_heartbeat_seq_sent;

        let response = HeartbeatResponse { sequence: sent_seq };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&response) }),
            &mut registry,
            &mut outbound,
        );

        assert!(client.rtt_ms().is_some());
    }

    #[test]
    fn test_submit_input_tracks_a_pending_action() {
        let mut client = core();
        let mut outbound = Vec::new();

        let seq = client.submit_input(1, InputType::PlaceBuilding, 0, 0, 0, 0, 0, &mut outbound);

        assert_eq!(outbound.len(), 1);
        assert!(client.pending_actions().get(seq).is_some());
    }

    #[test]
    fn test_input_ack_confirms_the_matching_pending_action() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let seq = client.submit_input(1, InputType::PlaceBuilding, 0, 0, 0, 0, 0, &mut outbound);

        let ack = InputAck { sequence: seq, tick: 9 };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&ack) }),
            &mut registry,
            &mut outbound,
        );

        let action = client.pending_actions().get(seq).unwrap();
        assert_eq!(action.state, crate::pending::PendingActionState::Confirmed);
        assert_eq!(action.confirmed_tick, Some(9));
    }

    #[test]
    fn test_join_reject_clears_session_and_goes_disconnected() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let reject = JoinReject { reason: JoinRejectReason::Full.to_u8() };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&reject) }),
            &mut registry,
            &mut outbound,
        );

        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.join_reject_reason(), Some(JoinRejectReason::Full));
    }

    #[test]
    fn test_state_update_applies_directly_when_no_snapshot_in_flight() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let update = StateUpdate { tick: 1, changes: vec![] };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&update) }),
            &mut registry,
            &mut outbound,
        );

        assert_eq!(client.delta_applier.last_applied_tick(), Some(1));
    }

    #[test]
    fn test_state_update_is_buffered_while_a_snapshot_transfer_is_in_flight() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let start = netcore::net::messages::SnapshotStart { tick: 10, total_chunks: 2 };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&start) }),
            &mut registry,
            &mut outbound,
        );

        let update = StateUpdate { tick: 11, changes: vec![] };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&update) }),
            &mut registry,
            &mut outbound,
        );

        // Buffered rather than applied: the delta applier must not have moved yet.
        assert_eq!(client.delta_applier.last_applied_tick(), None);
    }

    #[test]
    fn test_terrain_sync_completes_after_every_chunk_and_sends_verify() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let mut journal = servercore::terrain::TerrainJournal::new(99, MapSizeTier::Small);
        journal.record(
            netcore::net::types::GridRect { min: GridPosition { x: 0, y: 0 }, max: GridPosition { x: 1, y: 1 } },
            0,
        );

        for chunk in journal.sync_chunks() {
            client.handle_worker_event(
                ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&chunk) }),
                &mut registry,
                &mut outbound,
            );
        }

        assert!(client.terrain_state().is_some());
        assert_eq!(outbound.len(), 1);
        let mut buf = ByteBuffer::from_vec(outbound[0].bytes.clone());
        match envelope::parse_envelope(&mut buf) {
            EnvelopeHeader::Valid { msg_type, .. } => assert_eq!(msg_type, MessageType::TerrainSyncVerify as u16),
            EnvelopeHeader::Invalid => panic!("expected a valid header"),
        }
    }

    #[test]
    fn test_rejection_records_reason_and_message_on_pending_action() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let seq = client.submit_input(1, InputType::PlaceBuilding, 0, 0, 0, 0, 0, &mut outbound);

        let rejection = Rejection {
            sequence: seq,
            reason: RejectionReason::CannotAfford.to_u8(),
            tick: 4,
            message: "insufficient funds".to_string(),
        };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&rejection) }),
            &mut registry,
            &mut outbound,
        );

        let action = client.pending_actions().get(seq).unwrap();
        assert_eq!(action.state, crate::pending::PendingActionState::Rejected);
        assert_eq!(action.rejection_reason, Some(RejectionReason::CannotAfford));
        assert_eq!(action.rejection_message.as_deref(), Some("insufficient funds"));
    }

    #[test]
    fn test_snapshot_checksum_mismatch_requests_a_fallback_snapshot() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let start = netcore::net::messages::SnapshotStart { tick: 10, total_chunks: 1 };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&start) }),
            &mut registry,
            &mut outbound,
        );

        let chunk = netcore::net::messages::SnapshotChunk { index: 0, data: vec![1, 2, 3] };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&chunk) }),
            &mut registry,
            &mut outbound,
        );

        outbound.clear();
        let end = netcore::net::messages::SnapshotEnd {
            total_bytes: 3,
            total_chunks: 1,
            entity_count: 0,
            checksum: 0xDEAD_BEEF,
        };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&end) }),
            &mut registry,
            &mut outbound,
        );

        assert_eq!(outbound.len(), 1);
        let mut buf = ByteBuffer::from_vec(outbound[0].bytes.clone());
        match envelope::parse_envelope(&mut buf) {
            EnvelopeHeader::Valid { msg_type, .. } => assert_eq!(msg_type, MessageType::SnapshotRequest as u16),
            EnvelopeHeader::Invalid => panic!("expected a valid header"),
        }
    }

    #[test]
    fn test_kick_clears_session_and_records_reason() {
        let mut client = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        let kick = Kick { reason: KickReason::AdminAction.to_u8() };
        client.handle_worker_event(
            ClientWorkerEvent::Message(ClientRawMessage { channel: Channel::Reliable, bytes: framed(&kick) }),
            &mut registry,
            &mut outbound,
        );

        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.kick_reason(), Some(KickReason::AdminAction));
    }
}
