//! Connection table (section 3's "Connection"): one record per active `PeerId`, holding
//! everything the server needs to route, heartbeat and time out a peer. `PlayerId` is
//! unique across active connections and never 0 (section 3's invariant).

use hashbrown::HashMap;

use corenet::time::timestamp_millis;
use netcore::net::types::{PeerId, PlayerId};

use crate::session::SessionToken;

#[derive(Debug, Clone)]
pub struct Connection {
    pub peer: PeerId,
    pub player_id: PlayerId,
    pub player_name: String,
    pub session_token: SessionToken,
    pub last_heartbeat_received_ms: u64,
    pub last_heartbeat_sent_ms: u64,
    pub missed_heartbeats: u32,
    pub last_sent_heartbeat_seq: u32,
    pub last_activity_ms: u64,
    pub smoothed_rtt_ms: f64,
    pub identity_mismatches: u32,
}

impl Connection {
    pub fn new(peer: PeerId, player_id: PlayerId, player_name: String, session_token: SessionToken) -> Connection {
        let now = timestamp_millis();
        Connection {
            peer,
            player_id,
            player_name,
            session_token,
            last_heartbeat_received_ms: now,
            last_heartbeat_sent_ms: 0,
            missed_heartbeats: 0,
            last_sent_heartbeat_seq: 0,
            last_activity_ms: now,
            smoothed_rtt_ms: 0.0,
            identity_mismatches: 0,
        }
    }

    pub fn touch_activity(&mut self) {
        self.last_activity_ms = timestamp_millis();
        self.last_heartbeat_received_ms = self.last_activity_ms;
        self.missed_heartbeats = 0;
    }
}

/// Warning/disconnect thresholds from section 5: at a 1 s heartbeat interval, 5 missed
/// beats is the warning point and 10 missed is the hard timeout (10 s of silence).
pub const HEARTBEAT_WARNING_MISSES: u32 = 5;
pub const HEARTBEAT_TIMEOUT_MISSES: u32 = 10;

#[derive(Default)]
pub struct ConnectionTable {
    peers: HashMap<PeerId, Connection>,
}

impl ConnectionTable {
    pub fn new() -> ConnectionTable {
        ConnectionTable { peers: HashMap::new() }
    }

    pub fn insert(&mut self, connection: Connection) {
        self.peers.insert(connection.peer, connection);
    }

    pub fn get(&self, peer: PeerId) -> Option<&Connection> {
        self.peers.get(&peer)
    }

    pub fn get_mut(&mut self, peer: PeerId) -> Option<&mut Connection> {
        self.peers.get_mut(&peer)
    }

    pub fn remove(&mut self, peer: PeerId) -> Option<Connection> {
        self.peers.remove(&peer)
    }

    pub fn find_by_player(&self, player_id: PlayerId) -> Option<&Connection> {
        self.peers.values().find(|c| c.player_id == player_id)
    }

    /// Bumps `peer`'s identity-mismatch counter and returns the new total, or 0 if the peer
    /// is no longer connected (section 4.7's validator, repeated-offense escalation).
    pub fn record_identity_mismatch(&mut self, peer: PeerId) -> u32 {
        match self.peers.get_mut(&peer) {
            Some(connection) => {
                connection.identity_mismatches = connection.identity_mismatches.saturating_add(1);
                connection.identity_mismatches
            }
            None => 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.peers.values()
    }

    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Real-wall-time heartbeat bookkeeping (section 4.8: "the timer is real-wall time, not
    /// simulation tick, because a paused simulation must not mask dead peers"). Returns the
    /// peers that just crossed the hard timeout threshold.
    pub fn advance_timeouts(&mut self, warning_ms: u64, timeout_ms: u64) -> Vec<PeerId> {
        let now = timestamp_millis();
        let mut timed_out = Vec::new();

        for connection in self.peers.values_mut() {
            let silence = now.saturating_sub(connection.last_activity_ms);
            if silence >= timeout_ms {
                timed_out.push(connection.peer);
            } else if silence >= warning_ms {
                connection.missed_heartbeats = connection.missed_heartbeats.saturating_add(1);
            }
        }

        timed_out
    }
}
