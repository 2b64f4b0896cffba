//! Server core (section 4.8's "C8"): connection table, session tokens and grace, heartbeat,
//! handler routing and broadcast. Owns every piece of server-side application state *except*
//! the transport itself — section 5's concurrency model keeps the transport on the I/O
//! worker's thread and has the main context exchange only `WorkerEvent`/`WorkerCommand`
//! values with it, so `ServerCore` is built to be driven by whoever owns the `IoWorker`
//! (typically the binary's tick loop) rather than owning one itself. That also makes it
//! exercisable in tests without a real socket: feed `WorkerEvent`s in, read the outbound
//! `Vec` back out.

use std::collections::VecDeque;

use hashbrown::HashSet;

use corenet::logging::{debug, info, warn, Logger};
use corenet::shared::NetworkResult;
use corenet::time::timestamp_millis;

use netcore::ioworker::{RawMessage, WorkerEvent};
use netcore::net::buffer::ByteBuffer;
use netcore::net::envelope::{self, EnvelopeHeader, MessageType};
use netcore::net::messages::{
    Chat, Disconnect, Join, JoinAccept, JoinReject, Kick as KickMsg, Message, PlayerList,
    PlayerListEntry, Reconnect, ServerStatus, SnapshotRequest, TerrainSyncVerify,
};
use netcore::net::transport::Channel;
use netcore::net::types::{
    InputType, JoinRejectReason, KickReason, MapSizeTier, PeerId, PlayerId, PlayerStatus,
    ServerState, Tick,
};
use netcore::ratelimit::RateLimiter;
use netcore::validator::{RejectCause, Validator, WorldBounds};

use registry::Registry;

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionTable};
use crate::delta::DeltaGenerator;
use crate::handler::{NetworkHandler, Outbox};
use crate::session::{ReconnectOutcome, SessionTable};
use crate::snapshot::SnapshotEngine;
use crate::terrain::{TerrainJournal, TerrainSyncTracker, VerifyOutcome};

/// Startup- or process-level failures (section 6's `[ADDED]` error taxonomy): these abort
/// the binary rather than being absorbed as a per-message or per-connection condition.
#[derive(Debug)]
pub enum ServerError {
    ConfigLoad(String),
    TransportInit(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::ConfigLoad(msg) => write!(f, "failed to load server configuration: {}", msg),
            ServerError::TransportInit(msg) => write!(f, "failed to initialize transport: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

/// One outbound datagram the core wants sent, addressed by `PeerId` (the main context never
/// touches the transport; it only ever produces these for whoever owns the `IoWorker`).
pub type OutboundQueue = Vec<RawMessage>;

fn queue_send(outbound: &mut OutboundQueue, peer: PeerId, channel: Channel, bytes: Vec<u8>) {
    outbound.push(RawMessage { peer, channel, bytes });
}

/// Roughly-once-per-second cadence for heartbeats, timeout detection and session GC
/// (section 4.8: "roughly once per second, emit server-initiated heartbeats").
const HOUSEKEEPING_INTERVAL_MS: u64 = 1000;

/// A player whose claimed `PlayerId` mismatches its connection's bound one this many times
/// is kicked rather than merely having the message dropped (section 4.7's failure table:
/// "PlayerID mismatch -> drop, count; repeated -> kick").
const IDENTITY_MISMATCH_KICK_THRESHOLD: u32 = 3;

pub struct ServerCore {
    state: ServerState,
    config: ServerConfig,
    connections: ConnectionTable,
    sessions: SessionTable,
    /// Transport-connected peers that haven't completed `Join` yet (section 4.8's
    /// provisional peer): we know the `PeerId` exists so we can still answer it, but it has
    /// no `Connection` record until it joins.
    pending_peers: HashSet<PeerId>,
    handlers: Vec<Box<dyn NetworkHandler>>,
    rate_limiter: RateLimiter,
    validator: Validator,
    delta_generator: DeltaGenerator,
    snapshot: SnapshotEngine,
    snapshot_target: Option<PeerId>,
    snapshot_queue: VecDeque<PeerId>,
    terrain: TerrainJournal,
    terrain_sync: TerrainSyncTracker,
    last_housekeeping_ms: u64,
    next_heartbeat_seq: u32,
    log: Logger,
}

impl ServerCore {
    pub fn new(config: ServerConfig, terrain_seed: u64, log: Logger) -> ServerCore {
        let bounds = world_bounds(config.map_size_tier.into());

        ServerCore {
            delta_generator: DeltaGenerator::new(crate::delta::DEFAULT_MAX_DELTA_BYTES),
            terrain: TerrainJournal::new(terrain_seed, config.map_size_tier.into()),
            terrain_sync: TerrainSyncTracker::new(),
            rate_limiter: RateLimiter::with_abuse_threshold(config.rate_limits.abuse_threshold),
            validator: Validator::new(bounds),
            state: ServerState::Initializing,
            connections: ConnectionTable::new(),
            sessions: SessionTable::new(),
            pending_peers: HashSet::new(),
            handlers: Vec::new(),
            snapshot: SnapshotEngine::new(),
            snapshot_target: None,
            snapshot_queue: VecDeque::new(),
            last_housekeeping_ms: timestamp_millis(),
            next_heartbeat_seq: 0,
            config,
            log,
        }
    }

    pub fn register_handler(&mut self, handler: Box<dyn NetworkHandler>) {
        self.handlers.push(handler);
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// `Initializing -> Loading -> Ready` (section 4.8's Lifecycle).
    pub fn start(&mut self) {
        info!(self.log, "server starting"; "map_size" => ?self.terrain.tier());
        self.state = ServerState::Loading;
        self.state = ServerState::Ready;
    }

    /// `Ready -> Running`, once gameplay begins.
    pub fn set_running(&mut self) {
        self.state = ServerState::Running;
    }

    /// Broadcasts a graceful disconnect and clears all connection state. The caller is
    /// still responsible for joining the I/O worker thread; this only touches main-context
    /// state (section 4.8).
    pub fn stop(&mut self, registry: &mut Registry, outbound: &mut OutboundQueue) {
        info!(self.log, "server stopping");
        let disconnect = Disconnect { reason: 0 };
        if let Ok(bytes) = frame(&disconnect) {
            for peer in self.connections.peers().collect::<Vec<_>>() {
                queue_send(outbound, peer, Channel::Reliable, bytes.clone());
            }
        }
        let players: Vec<PlayerId> = self.sessions.iter().map(|s| s.player_id).collect();
        for handler in &mut self.handlers {
            for player in &players {
                handler.on_disconnect(*player, registry);
            }
        }
        self.connections = ConnectionTable::new();
        self.sessions = SessionTable::new();
        self.pending_peers.clear();
    }

    /// Consumes one `WorkerEvent` from the I/O worker's inbound queue (section 5: the only
    /// channel between the main context and the network thread).
    pub fn handle_worker_event(
        &mut self,
        event: WorkerEvent,
        registry: &mut Registry,
        tick: Tick,
        outbound: &mut OutboundQueue,
    ) {
        match event {
            WorkerEvent::Connected(peer) => {
                debug!(self.log, "peer connected at transport level"; "peer" => peer);
                self.pending_peers.insert(peer);
            }
            WorkerEvent::Disconnected(peer) => {
                self.on_transport_disconnect(peer, outbound);
            }
            WorkerEvent::Message(RawMessage { peer, channel: _, bytes }) => {
                self.on_receive(peer, bytes, registry, tick, outbound);
            }
        }
    }

    /// Per-tick housekeeping independent of any inbound message: heartbeats, timeout
    /// detection, session GC, and handing off any snapshot the background thread finished
    /// (section 4.8 / 4.12).
    pub fn tick(&mut self, registry: &mut Registry, tick: Tick, outbound: &mut OutboundQueue) {
        let now = timestamp_millis();
        if now.saturating_sub(self.last_housekeeping_ms) >= HOUSEKEEPING_INTERVAL_MS {
            self.last_housekeeping_ms = now;
            self.send_heartbeats(outbound);
            self.advance_timeouts(outbound);
            self.garbage_collect_sessions(registry);
        }

        if let Some(result) = self.snapshot.poll() {
            if let Some(target) = self.snapshot_target.take() {
                let (start, chunks, end) = crate::snapshot::snapshot_messages(&result);
                self.send_framed(&start, target, Channel::Reliable, outbound);
                for chunk in &chunks {
                    self.send_framed(chunk, target, Channel::Reliable, outbound);
                }
                self.send_framed(&end, target, Channel::Reliable, outbound);
            }
            self.start_next_queued_snapshot(registry, tick);
        }

        self.tick_delta(registry, tick, outbound);
    }

    /// Drains the registry's dirty set into a `StateUpdate` and broadcasts it on the
    /// reliable channel (section 4.11). A no-op if nothing is dirty.
    fn tick_delta(&mut self, registry: &mut Registry, tick: Tick, outbound: &mut OutboundQueue) {
        if registry.dirty().is_empty() {
            return;
        }

        let draft = self.delta_generator.generate(registry, tick);
        if draft.changes.is_empty() {
            return;
        }

        if draft.deferred > 0 {
            debug!(self.log, "delta exceeded byte budget, deferring remainder"; "deferred" => draft.deferred, "tick" => tick);
        }

        let update = netcore::net::messages::StateUpdate {
            tick: draft.tick,
            changes: draft.changes,
        };

        if let Ok(bytes) = envelope::frame_message_auto(&update) {
            self.broadcast_bytes(bytes, Channel::Reliable, outbound);
        }
    }

    fn on_receive(
        &mut self,
        peer: PeerId,
        bytes: Vec<u8>,
        registry: &mut Registry,
        tick: Tick,
        outbound: &mut OutboundQueue,
    ) {
        let mut buffer = ByteBuffer::from_vec(bytes);
        let header = envelope::parse_envelope(&mut buffer);

        if self.validator.validate_raw(&header, u16::max_value()).is_err() {
            return;
        }

        let (compressed, msg_type, payload_length) = match header {
            EnvelopeHeader::Valid {
                compressed,
                msg_type,
                payload_length,
                ..
            } => (compressed, msg_type, payload_length),
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

        match MessageType::from_u16(msg_type) {
            Some(MessageType::Join) => self.handle_join(peer, &mut payload, outbound),
            Some(MessageType::Reconnect) => self.handle_reconnect(peer, &mut payload, outbound),
            Some(MessageType::Heartbeat) => self.handle_heartbeat(peer, &mut payload, outbound),
            Some(MessageType::Disconnect) => self.on_transport_disconnect(peer, outbound),
            Some(MessageType::Chat) => self.handle_chat(peer, &mut payload, outbound),
            Some(MessageType::TerrainSyncVerify) => self.handle_terrain_verify(peer, &mut payload, tick, outbound),
            Some(MessageType::SnapshotRequest) => self.handle_snapshot_request(peer, &mut payload),
            Some(msg_type) => self.route_to_handler(peer, msg_type, &mut payload, registry, tick, outbound),
            None => {}
        }
    }

    fn route_to_handler(
        &mut self,
        peer: PeerId,
        msg_type: MessageType,
        payload: &mut ByteBuffer,
        registry: &mut Registry,
        tick: Tick,
        outbound: &mut OutboundQueue,
    ) {
        let player_id = match self.connections.get(peer) {
            Some(connection) => connection.player_id,
            None => return,
        };

        if let Some(claimed) = claimed_player_id(msg_type, payload) {
            if self.validator.validate_identity(claimed, player_id).is_err() {
                warn!(self.log, "player id mismatch on gameplay message"; "peer" => peer, "claimed" => claimed, "bound" => player_id);
                if self.connections.record_identity_mismatch(peer) >= IDENTITY_MISMATCH_KICK_THRESHOLD {
                    self.kick(player_id, KickReason::ProtocolViolation, outbound);
                }
                return;
            }
        }

        if let Some(category) = input_category(msg_type, payload) {
            if !self.rate_limiter.try_acquire(player_id as PeerId, category) {
                return;
            }
        }

        if let Some(connection) = self.connections.get_mut(peer) {
            connection.touch_activity();
        }

        let mut outbox = Outbox::new();
        let mut handled = false;
        for handler in &mut self.handlers {
            if handler.handles(msg_type) {
                handled = true;
                if handler
                    .handle(player_id, msg_type, payload, registry, tick, &mut outbox)
                    .is_err()
                {
                    warn!(self.log, "handler failed to process message"; "msg_type" => ?msg_type, "player" => player_id);
                }
                break;
            }
        }

        if !handled {
            debug!(self.log, "no handler registered for message type"; "msg_type" => ?msg_type);
        }

        for (target_player, channel, bytes) in outbox.drain() {
            if let Some(connection) = self.connections.find_by_player(target_player) {
                queue_send(outbound, connection.peer, channel, bytes);
            }
        }
    }

    fn handle_join(&mut self, peer: PeerId, payload: &mut ByteBuffer, outbound: &mut OutboundQueue) {
        let mut join = Join::default();
        if join.read_payload(payload).is_err() {
            return;
        }

        if join.client_version != corenet::PROTOCOL_VERSION {
            self.reject_join(peer, JoinRejectReason::WrongVersion, outbound);
            return;
        }

        if self.sessions.connected_count() >= self.config.max_players as usize {
            self.reject_join(peer, JoinRejectReason::Full, outbound);
            return;
        }

        if self.connections.iter().any(|c| c.player_name == join.player_name) {
            self.reject_join(peer, JoinRejectReason::NameTaken, outbound);
            return;
        }

        let player_id = match self.sessions.allocate_player_id(self.config.max_players) {
            Some(id) => id,
            None => {
                self.reject_join(peer, JoinRejectReason::Full, outbound);
                return;
            }
        };

        let token = self.sessions.create(player_id, join.player_name.clone());
        self.pending_peers.remove(&peer);
        self.connections
            .insert(Connection::new(peer, player_id, join.player_name.clone(), token));
        self.rate_limiter.register_peer(player_id as PeerId);

        info!(self.log, "player joined"; "player" => player_id, "name" => join.player_name.as_str(), "peer" => peer);

        self.send_join_accept(peer, player_id, token, outbound);
        self.broadcast_player_list(outbound);
        self.begin_terrain_sync(peer, outbound);
        self.queue_snapshot_for(peer);
    }

    fn handle_reconnect(&mut self, peer: PeerId, payload: &mut ByteBuffer, outbound: &mut OutboundQueue) {
        let mut reconnect = Reconnect::default();
        if reconnect.read_payload(payload).is_err() {
            return;
        }

        match self.sessions.is_valid_for_reconnect(&reconnect.session_token, self.config.session_grace_period_ms) {
            ReconnectOutcome::InvalidToken => {
                self.reject_join(peer, JoinRejectReason::InvalidToken, outbound);
            }
            ReconnectOutcome::Expired => {
                self.sessions.remove_by_token(&reconnect.session_token);
                self.reject_join(peer, JoinRejectReason::SessionExpired, outbound);
            }
            ReconnectOutcome::Valid => {
                // Newer credential wins: if this token is already bound to a live peer,
                // disconnect the incumbent first (section 4.8).
                if self.sessions.is_in_use(&reconnect.session_token) {
                    let incumbent_player = self
                        .sessions
                        .lookup(&reconnect.session_token)
                        .map(|s| s.player_id);
                    if let Some(incumbent_player) = incumbent_player {
                        if let Some(incumbent) = self.connections.find_by_player(incumbent_player) {
                            let incumbent_peer = incumbent.peer;
                            self.connections.remove(incumbent_peer);
                            self.send_framed(&Disconnect { reason: 0 }, incumbent_peer, Channel::Reliable, outbound);
                        }
                    }
                }

                let session = self
                    .sessions
                    .lookup(&reconnect.session_token)
                    .map(|s| (s.player_id, s.player_name.clone()));
                if let Some((player_id, name)) = session {
                    self.sessions.mark_reconnected(&reconnect.session_token);
                    self.pending_peers.remove(&peer);
                    self.connections
                        .insert(Connection::new(peer, player_id, name, reconnect.session_token));
                    self.rate_limiter.register_peer(player_id as PeerId);

                    info!(self.log, "player reconnected"; "player" => player_id, "peer" => peer);

                    self.send_join_accept(peer, player_id, reconnect.session_token, outbound);
                    self.broadcast_player_list(outbound);
                    self.begin_terrain_sync(peer, outbound);
                    self.queue_snapshot_for(peer);
                } else {
                    self.reject_join(peer, JoinRejectReason::InvalidToken, outbound);
                }
            }
        }
    }

    fn handle_heartbeat(&mut self, peer: PeerId, payload: &mut ByteBuffer, outbound: &mut OutboundQueue) {
        let mut heartbeat = netcore::net::messages::Heartbeat::default();
        if heartbeat.read_payload(payload).is_err() {
            return;
        }

        if let Some(connection) = self.connections.get_mut(peer) {
            connection.touch_activity();
        }

        let response = netcore::net::messages::HeartbeatResponse {
            sequence: heartbeat.sequence,
        };
        self.send_framed(&response, peer, Channel::Reliable, outbound);
    }

    fn handle_chat(&mut self, peer: PeerId, payload: &mut ByteBuffer, outbound: &mut OutboundQueue) {
        // Resolved Open Question (DESIGN.md): chat is a system message, not subject to the
        // per-input rate limiter.
        let mut chat = Chat::default();
        if chat.read_payload(payload).is_err() {
            return;
        }

        let player_id = match self.connections.get(peer) {
            Some(c) => c.player_id,
            None => return,
        };

        if chat.player_id != player_id {
            return;
        }

        if let Some(connection) = self.connections.get_mut(peer) {
            connection.touch_activity();
        }

        if let Ok(bytes) = frame(&chat) {
            self.broadcast_bytes(bytes, Channel::Reliable, outbound);
        }
    }

    fn handle_terrain_verify(&mut self, peer: PeerId, payload: &mut ByteBuffer, tick: Tick, outbound: &mut OutboundQueue) {
        let mut verify = TerrainSyncVerify::default();
        if verify.read_payload(payload).is_err() {
            return;
        }

        match crate::terrain::verify_checksum(&self.terrain, verify.checksum, tick) {
            (VerifyOutcome::Matched, _) => {
                self.terrain_sync.complete(peer);
                self.send_framed(&netcore::net::messages::TerrainSyncComplete, peer, Channel::Reliable, outbound);
            }
            (VerifyOutcome::Mismatched, _) => {
                warn!(self.log, "terrain checksum mismatch, resending journal"; "peer" => peer);
                for chunk in self.terrain.sync_chunks() {
                    self.send_framed(&chunk, peer, Channel::Reliable, outbound);
                }
            }
        }
    }

    fn begin_terrain_sync(&mut self, peer: PeerId, outbound: &mut OutboundQueue) {
        self.terrain_sync.begin(peer);
        for chunk in self.terrain.sync_chunks() {
            self.send_framed(&chunk, peer, Channel::Reliable, outbound);
        }
    }

    /// Appends and broadcasts a new terrain modification (section 4.13): the journal is
    /// updated first so any client that joins after this point receives it as part of its
    /// initial sync, and already-synced clients are told about it immediately.
    pub fn record_terrain_modification(
        &mut self,
        rect: netcore::net::types::GridRect,
        operation: u8,
        tick: Tick,
        outbound: &mut OutboundQueue,
    ) {
        self.terrain.record(rect, operation);
        let event = netcore::net::messages::TerrainModifiedEvent { tick, rect, operation };
        if let Ok(bytes) = frame(&event) {
            self.broadcast_bytes(bytes, Channel::Reliable, outbound);
        }
    }

    fn queue_snapshot_for(&mut self, peer: PeerId) {
        self.snapshot_queue.push_back(peer);
    }

    /// A client asked for a fresh full snapshot instead of continuing to trust its current
    /// state (section 4.12's failure table: checksum mismatch or delta-buffer overflow
    /// during a transfer). Simply re-queues it like a fresh join; there's nothing else to
    /// validate since the request carries no player-identifying data worth checking.
    fn handle_snapshot_request(&mut self, peer: PeerId, payload: &mut ByteBuffer) {
        let mut request = SnapshotRequest::default();
        if request.read_payload(payload).is_err() {
            return;
        }
        debug!(self.log, "client requested a fallback snapshot"; "peer" => peer, "reason" => ?request.reason());
        self.queue_snapshot_for(peer);
    }

    fn start_next_queued_snapshot(&mut self, registry: &Registry, tick: Tick) {
        if self.snapshot.is_in_flight() || self.snapshot_target.is_some() {
            return;
        }
        if let Some(peer) = self.snapshot_queue.pop_front() {
            if self.snapshot.start(registry, tick).is_ok() {
                self.snapshot_target = Some(peer);
            } else {
                self.snapshot_queue.push_front(peer);
            }
        }
    }

    fn send_join_accept(&mut self, peer: PeerId, player_id: PlayerId, token: crate::session::SessionToken, outbound: &mut OutboundQueue) {
        let accept = JoinAccept {
            player_id,
            session_token: token,
            tick: 0,
            map_size: self.terrain.tier().to_u8(),
        };
        self.send_framed(&accept, peer, Channel::Reliable, outbound);
    }

    fn reject_join(&mut self, peer: PeerId, reason: JoinRejectReason, outbound: &mut OutboundQueue) {
        let reject = JoinReject { reason: reason.to_u8() };
        self.send_framed(&reject, peer, Channel::Reliable, outbound);
    }

    fn broadcast_player_list(&mut self, outbound: &mut OutboundQueue) {
        let players = self
            .sessions
            .iter()
            .map(|s| PlayerListEntry {
                player_id: s.player_id,
                name: s.player_name.clone(),
                status: if s.is_connected() {
                    PlayerStatus::Connected.to_u8()
                } else {
                    PlayerStatus::Disconnected.to_u8()
                },
            })
            .collect();

        let message = PlayerList { players };
        if let Ok(bytes) = frame(&message) {
            self.broadcast_bytes(bytes, Channel::Reliable, outbound);
        }
    }

    /// Sends a `ServerStatus` to every connected peer (section 4.8's broadcast layer).
    pub fn broadcast_server_status(&mut self, tick: Tick, outbound: &mut OutboundQueue) {
        let status = ServerStatus {
            state: self.state.to_u8(),
            player_count: self.sessions.connected_count() as u8,
            max_players: self.config.max_players,
            tick,
        };
        if let Ok(bytes) = frame(&status) {
            self.broadcast_bytes(bytes, Channel::Reliable, outbound);
        }
    }

    fn send_heartbeats(&mut self, outbound: &mut OutboundQueue) {
        let seq = self.next_heartbeat_seq;
        self.next_heartbeat_seq = self.next_heartbeat_seq.wrapping_add(1);
        let heartbeat = netcore::net::messages::Heartbeat { sequence: seq };
        if let Ok(bytes) = frame(&heartbeat) {
            let peers: Vec<PeerId> = self.connections.peers().collect();
            for peer in peers {
                queue_send(outbound, peer, Channel::Reliable, bytes.clone());
                if let Some(connection) = self.connections.get_mut(peer) {
                    connection.last_heartbeat_sent_ms = timestamp_millis();
                    connection.last_sent_heartbeat_seq = seq;
                }
            }
        }
    }

    /// Real-wall-clock heartbeat timeout detection (section 4.8: "the timer is real-wall
    /// time, not simulation tick, because a paused simulation must not mask dead peers").
    fn advance_timeouts(&mut self, outbound: &mut OutboundQueue) {
        let warning_ms = self.config.heartbeat_warning_misses as u64 * HOUSEKEEPING_INTERVAL_MS;
        let timeout_ms = self.config.heartbeat_timeout_misses as u64 * HOUSEKEEPING_INTERVAL_MS;
        let timed_out = self.connections.advance_timeouts(warning_ms, timeout_ms);

        for peer in timed_out {
            warn!(self.log, "peer timed out"; "peer" => peer);
            self.on_transport_disconnect(peer, outbound);
        }
    }

    /// Transient disconnect (transport drop, explicit quit or timeout): the session starts
    /// its grace period but is not yet rolled back — a reconnect within the window resumes
    /// it exactly where it left off (section 3/8's reconnect scenarios).
    fn on_transport_disconnect(&mut self, peer: PeerId, outbound: &mut OutboundQueue) {
        self.pending_peers.remove(&peer);
        if let Some(connection) = self.connections.remove(peer) {
            self.sessions.mark_disconnected(&connection.session_token);
            self.rate_limiter.remove_peer(connection.player_id as PeerId);
            self.terrain_sync.complete(peer);
            info!(self.log, "peer disconnected, grace period started"; "peer" => peer, "player" => connection.player_id);
            self.broadcast_player_list(outbound);
        }
    }

    /// Kicks a connected player: sends the reason, then treats it the same as any other
    /// disconnect — a grace period starts rather than an immediate rollback (section 4.8).
    pub fn kick(&mut self, player_id: PlayerId, reason: KickReason, outbound: &mut OutboundQueue) {
        if let Some(connection) = self.connections.find_by_player(player_id) {
            let peer = connection.peer;
            let kick = KickMsg { reason: reason.to_u8() };
            self.send_framed(&kick, peer, Channel::Reliable, outbound);
            self.on_transport_disconnect(peer, outbound);
        }
    }

    /// Expires sessions past their grace window, permanently releasing the `PlayerId` and
    /// rolling back any pending actions (section 4.8: "garbage-collected").
    fn garbage_collect_sessions(&mut self, registry: &mut Registry) {
        let expired = self.sessions.garbage_collect(self.config.session_grace_period_ms);
        for player_id in expired {
            info!(self.log, "session expired, rolling back pending actions"; "player" => player_id);
            for handler in &mut self.handlers {
                handler.on_disconnect(player_id, registry);
            }
        }
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    pub fn validator_count(&self, cause: RejectCause) -> u64 {
        self.validator.count(cause)
    }

    pub fn abuse_event_count(&self) -> u64 {
        self.rate_limiter.abuse_event_count()
    }

    fn broadcast_bytes(&mut self, bytes: Vec<u8>, channel: Channel, outbound: &mut OutboundQueue) {
        let peers: Vec<PeerId> = self.connections.peers().collect();
        for peer in peers {
            queue_send(outbound, peer, channel, bytes.clone());
        }
    }

    fn send_framed<M: netcore::net::messages::Message>(
        &mut self,
        message: &M,
        peer: PeerId,
        channel: Channel,
        outbound: &mut OutboundQueue,
    ) {
        if let Ok(bytes) = frame(message) {
            queue_send(outbound, peer, channel, bytes);
        }
    }
}

fn frame<M: netcore::net::messages::Message>(message: &M) -> NetworkResult<Vec<u8>> {
    envelope::frame_message(message)
}

fn world_bounds(tier: MapSizeTier) -> WorldBounds {
    match tier {
        MapSizeTier::Small => WorldBounds { width: 128, height: 128 },
        MapSizeTier::Medium => WorldBounds { width: 256, height: 256 },
        MapSizeTier::Large => WorldBounds { width: 512, height: 512 },
    }
}

/// Maps an `Input`'s `input_type` byte to the rate-limiter category it should be charged
/// against (section 4.6). Peeks the payload without consuming the buffer's read cursor so
/// the handler still sees a pristine payload afterward.
fn input_category(msg_type: MessageType, payload: &ByteBuffer) -> Option<netcore::ratelimit::Category> {
    if msg_type != MessageType::Input {
        return None;
    }
    let bytes = payload.data();
    // Input's wire layout (section 6) puts `input_type` at byte offset 9 (after an 8-byte
    // tick and a 1-byte player id).
    let input_type = *bytes.get(9)?;
    InputType::from_u8(input_type).map(InputType::category)
}

/// Peeks the `PlayerId` a gameplay payload claims, without consuming the buffer's read
/// cursor, for the identity check in `route_to_handler` (section 4.7). Only `Input` carries
/// one in this protocol version.
fn claimed_player_id(msg_type: MessageType, payload: &ByteBuffer) -> Option<PlayerId> {
    if msg_type != MessageType::Input {
        return None;
    }
    // Input's wire layout (section 6) puts `player_id` at byte offset 8, right after the
    // 8-byte tick.
    payload.data().get(8).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcore::net::messages::{Input, Message};

    fn core() -> ServerCore {
        let config = ServerConfig {
            max_players: 2,
            ..ServerConfig::default()
        };
        ServerCore::new(config, 1234, corenet::logging::discard())
    }

    fn join_bytes(name: &str) -> Vec<u8> {
        let join = Join {
            client_version: corenet::PROTOCOL_VERSION,
            player_name: name.to_string(),
            session_token: None,
        };
        envelope::frame_message(&join).unwrap()
    }

    #[test]
    fn test_join_full_server_is_rejected() {
        let mut server = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        server.handle_worker_event(WorkerEvent::Connected(1), &mut registry, 0, &mut outbound);
        server.handle_worker_event(
            WorkerEvent::Message(RawMessage {
                peer: 1,
                channel: Channel::Reliable,
                bytes: join_bytes("a"),
            }),
            &mut registry,
            0,
            &mut outbound,
        );

        server.handle_worker_event(WorkerEvent::Connected(2), &mut registry, 0, &mut outbound);
        server.handle_worker_event(
            WorkerEvent::Message(RawMessage {
                peer: 2,
                channel: Channel::Reliable,
                bytes: join_bytes("b"),
            }),
            &mut registry,
            0,
            &mut outbound,
        );

        assert_eq!(server.connected_count(), 2);

        outbound.clear();
        server.handle_worker_event(WorkerEvent::Connected(3), &mut registry, 0, &mut outbound);
        server.handle_worker_event(
            WorkerEvent::Message(RawMessage {
                peer: 3,
                channel: Channel::Reliable,
                bytes: join_bytes("c"),
            }),
            &mut registry,
            0,
            &mut outbound,
        );

        assert_eq!(server.connected_count(), 2);
        let sent_to_peer3: Vec<_> = outbound.iter().filter(|m| m.peer == 3).collect();
        assert_eq!(sent_to_peer3.len(), 1);

        let mut buf = ByteBuffer::from_vec(sent_to_peer3[0].bytes.clone());
        let header = envelope::parse_envelope(&mut buf);
        match header {
            EnvelopeHeader::Valid { msg_type, .. } => {
                assert_eq!(msg_type, MessageType::JoinReject as u16);
            }
            EnvelopeHeader::Invalid => panic!("expected a valid header"),
        }
    }

    #[test]
    fn test_join_assigns_lowest_free_player_id_and_broadcasts_list() {
        let mut server = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        server.handle_worker_event(WorkerEvent::Connected(1), &mut registry, 0, &mut outbound);
        server.handle_worker_event(
            WorkerEvent::Message(RawMessage {
                peer: 1,
                channel: Channel::Reliable,
                bytes: join_bytes("mayor"),
            }),
            &mut registry,
            0,
            &mut outbound,
        );

        assert_eq!(server.connected_count(), 1);
        assert!(outbound.iter().any(|m| m.peer == 1));
    }

    #[test]
    fn test_rate_limited_input_is_silently_dropped() {
        let mut server = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        server.handle_worker_event(WorkerEvent::Connected(1), &mut registry, 0, &mut outbound);
        server.handle_worker_event(
            WorkerEvent::Message(RawMessage {
                peer: 1,
                channel: Channel::Reliable,
                bytes: join_bytes("mayor"),
            }),
            &mut registry,
            0,
            &mut outbound,
        );

        let input = Input {
            tick: 0,
            player_id: 1,
            input_type: InputType::PlaceBuilding.to_u8(),
            sequence: 1,
            target_x: 1,
            target_y: 1,
            param1: 0,
            param2: 0,
            value: 0,
        };

        outbound.clear();
        for i in 0..40u32 {
            let mut seq_input = input;
            seq_input.sequence = i;
            let framed = envelope::frame_message(&seq_input).unwrap();
            server.handle_worker_event(
                WorkerEvent::Message(RawMessage {
                    peer: 1,
                    channel: Channel::Reliable,
                    bytes: framed,
                }),
                &mut registry,
                0,
                &mut outbound,
            );
        }

        // No handler is registered for Input in this test, so nothing is routed either way,
        // but the rate limiter's drop counter must still reflect the burst being exceeded.
        assert!(server.rate_limiter.total_dropped(1u8 as PeerId) > 0);
    }

    #[test]
    fn test_repeated_player_id_mismatch_kicks_the_connection() {
        let mut server = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        server.handle_worker_event(WorkerEvent::Connected(1), &mut registry, 0, &mut outbound);
        server.handle_worker_event(
            WorkerEvent::Message(RawMessage {
                peer: 1,
                channel: Channel::Reliable,
                bytes: join_bytes("mayor"),
            }),
            &mut registry,
            0,
            &mut outbound,
        );
        assert_eq!(server.connected_count(), 1);

        let mismatched = Input {
            tick: 0,
            player_id: 99,
            input_type: InputType::PlaceBuilding.to_u8(),
            sequence: 0,
            target_x: 1,
            target_y: 1,
            param1: 0,
            param2: 0,
            value: 0,
        };

        for i in 0..IDENTITY_MISMATCH_KICK_THRESHOLD {
            let mut seq_input = mismatched;
            seq_input.sequence = i;
            let framed = envelope::frame_message(&seq_input).unwrap();
            server.handle_worker_event(
                WorkerEvent::Message(RawMessage {
                    peer: 1,
                    channel: Channel::Reliable,
                    bytes: framed,
                }),
                &mut registry,
                0,
                &mut outbound,
            );
        }

        assert_eq!(server.connected_count(), 0);
        assert!(server.validator_count(RejectCause::IdentityMismatch) >= IDENTITY_MISMATCH_KICK_THRESHOLD as u64);
    }

    #[test]
    fn test_disconnect_then_timely_reconnect_preserves_player_id() {
        let mut server = core();
        let mut registry = Registry::new();
        let mut outbound = Vec::new();

        server.handle_worker_event(WorkerEvent::Connected(1), &mut registry, 0, &mut outbound);
        server.handle_worker_event(
            WorkerEvent::Message(RawMessage {
                peer: 1,
                channel: Channel::Reliable,
                bytes: join_bytes("mayor"),
            }),
            &mut registry,
            0,
            &mut outbound,
        );

        let token = server.connections.get(1).unwrap().session_token;

        server.handle_worker_event(WorkerEvent::Disconnected(1), &mut registry, 0, &mut outbound);
        assert_eq!(server.connected_count(), 0);

        outbound.clear();
        let reconnect = Reconnect {
            player_id: 1,
            session_token: token,
        };
        let bytes = envelope::frame_message(&reconnect).unwrap();
        server.handle_worker_event(
            WorkerEvent::Connected(2),
            &mut registry,
            0,
            &mut outbound,
        );
        server.handle_worker_event(
            WorkerEvent::Message(RawMessage {
                peer: 2,
                channel: Channel::Reliable,
                bytes,
            }),
            &mut registry,
            0,
            &mut outbound,
        );

        assert_eq!(server.connected_count(), 1);
        assert_eq!(server.connections.get(2).unwrap().player_id, 1);
    }
}
