//! Session table (section 3's "Session"): independent of any particular `PeerId`, a session
//! is keyed by its 128-bit token and survives across a reconnect. A session is valid for
//! reconnection iff it's currently disconnected and still inside the grace window.

use hashbrown::HashMap;

use corenet::crypto::{session_token, SESSION_TOKEN_SIZE};
use corenet::time::timestamp_millis;
use netcore::net::types::PlayerId;

pub type SessionToken = [u8; SESSION_TOKEN_SIZE];

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub player_id: PlayerId,
    pub player_name: String,
    pub created_at_ms: u64,
    /// 0 while connected; set to the disconnect timestamp otherwise (section 3).
    pub disconnected_at_ms: u64,
    pub connected: bool,
}

impl Session {
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Default)]
pub struct SessionTable {
    by_token: HashMap<SessionToken, Session>,
    by_player: HashMap<PlayerId, SessionToken>,
}

impl SessionTable {
    pub fn new() -> SessionTable {
        SessionTable {
            by_token: HashMap::new(),
            by_player: HashMap::new(),
        }
    }

    /// Mints a fresh session for a just-accepted join. Tokens come from a cryptographic RNG
    /// (section 5: "predictability would let attackers hijack sessions").
    pub fn create(&mut self, player_id: PlayerId, player_name: String) -> SessionToken {
        let token = session_token();
        let now = timestamp_millis();
        self.by_token.insert(
            token,
            Session {
                token,
                player_id,
                player_name,
                created_at_ms: now,
                disconnected_at_ms: 0,
                connected: true,
            },
        );
        self.by_player.insert(player_id, token);
        token
    }

    pub fn lookup(&self, token: &SessionToken) -> Option<&Session> {
        self.by_token.get(token)
    }

    pub fn lookup_by_player(&self, player_id: PlayerId) -> Option<&Session> {
        self.by_player.get(&player_id).and_then(|token| self.by_token.get(token))
    }

    /// Whether `token` names a currently-connected session (used to detect the "incumbent"
    /// case on reconnect: section 4.8's "newer credential wins").
    pub fn is_in_use(&self, token: &SessionToken) -> bool {
        self.by_token.get(token).map(|s| s.connected).unwrap_or(false)
    }

    pub fn mark_disconnected(&mut self, token: &SessionToken) {
        if let Some(session) = self.by_token.get_mut(token) {
            session.connected = false;
            session.disconnected_at_ms = timestamp_millis();
        }
    }

    pub fn mark_reconnected(&mut self, token: &SessionToken) {
        if let Some(session) = self.by_token.get_mut(token) {
            session.connected = true;
            session.disconnected_at_ms = 0;
        }
    }

    /// Section 8's testable property: valid within the grace window with a matching token,
    /// `SessionExpired` outside it, `InvalidToken` for anything not on file.
    pub fn is_valid_for_reconnect(&self, token: &SessionToken, grace_ms: u64) -> ReconnectOutcome {
        match self.by_token.get(token) {
            None => ReconnectOutcome::InvalidToken,
            Some(session) if session.connected => ReconnectOutcome::Valid,
            Some(session) => {
                let now = timestamp_millis();
                if now.saturating_sub(session.disconnected_at_ms) <= grace_ms {
                    ReconnectOutcome::Valid
                } else {
                    ReconnectOutcome::Expired
                }
            }
        }
    }

    /// Removes every session whose grace period has elapsed, returning their player ids so
    /// the caller can roll back pending actions and free the id (section 4.8: "Expired
    /// sessions past the grace period are garbage-collected").
    pub fn garbage_collect(&mut self, grace_ms: u64) -> Vec<PlayerId> {
        let now = timestamp_millis();
        let expired: Vec<SessionToken> = self
            .by_token
            .iter()
            .filter(|(_, s)| !s.connected && now.saturating_sub(s.disconnected_at_ms) > grace_ms)
            .map(|(&token, _)| token)
            .collect();

        let mut freed = Vec::with_capacity(expired.len());
        for token in expired {
            if let Some(session) = self.by_token.remove(&token) {
                self.by_player.remove(&session.player_id);
                freed.push(session.player_id);
            }
        }
        freed
    }

    pub fn remove_by_token(&mut self, token: &SessionToken) -> Option<Session> {
        if let Some(session) = self.by_token.remove(token) {
            self.by_player.remove(&session.player_id);
            Some(session)
        } else {
            None
        }
    }

    /// Lowest free `PlayerId` in `[1, max_players]`, considering both live connections and
    /// sessions still inside their grace window (those ids are reserved, not free).
    pub fn allocate_player_id(&self, max_players: u8) -> Option<PlayerId> {
        for candidate in 1..=max_players {
            if !self.by_player.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    pub fn connected_count(&self) -> usize {
        self.by_token.values().filter(|s| s.connected).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.by_token.values()
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum ReconnectOutcome {
    Valid,
    Expired,
    InvalidToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_lowest_free_player_id() {
        let mut table = SessionTable::new();
        table.create(1, "a".to_string());
        table.create(3, "b".to_string());
        assert_eq!(table.allocate_player_id(4), Some(2));
    }

    #[test]
    fn test_full_server_has_no_free_id() {
        let mut table = SessionTable::new();
        table.create(1, "a".to_string());
        table.create(2, "b".to_string());
        assert_eq!(table.allocate_player_id(2), None);
    }

    #[test]
    fn test_reconnect_within_grace_succeeds() {
        let mut table = SessionTable::new();
        let token = table.create(1, "a".to_string());
        table.mark_disconnected(&token);
        assert_eq!(table.is_valid_for_reconnect(&token, 30_000), ReconnectOutcome::Valid);
    }

    #[test]
    fn test_unknown_token_is_invalid() {
        let table = SessionTable::new();
        assert_eq!(
            table.is_valid_for_reconnect(&[9u8; SESSION_TOKEN_SIZE], 30_000),
            ReconnectOutcome::InvalidToken
        );
    }

    #[test]
    fn test_connected_session_reports_as_in_use() {
        let mut table = SessionTable::new();
        let token = table.create(1, "a".to_string());
        assert!(table.is_in_use(&token));
        table.mark_disconnected(&token);
        assert!(!table.is_in_use(&token));
    }
}
