//! Server-side pending-action bookkeeping (section 3's "Pending action (server)"): every
//! accepted input is tracked until it is confirmed, rejected, or the owning player
//! disconnects, at which point any still-pending entries are rolled back in reverse order.

use hashbrown::HashMap;

use netcore::net::types::{EntityId, GridPosition, PlayerId, SequenceNumber, Tick, INVALID_ENTITY_ID};

#[derive(Debug, Clone)]
pub struct PendingAction {
    pub sequence: SequenceNumber,
    pub input_type: u8,
    pub target: GridPosition,
    pub param1: u32,
    pub param2: u32,
    pub value: i32,
    /// Entity the applicator created for this action, if any (section 3: "created-entity").
    pub created_entity: EntityId,
    pub tick: Tick,
    pub applied: bool,
}

#[derive(Default)]
pub struct PendingActionTable {
    by_player: HashMap<PlayerId, Vec<PendingAction>>,
}

impl PendingActionTable {
    pub fn new() -> PendingActionTable {
        PendingActionTable {
            by_player: HashMap::new(),
        }
    }

    pub fn track(&mut self, player: PlayerId, action: PendingAction) {
        self.by_player.entry(player).or_insert_with(Vec::new).push(action);
    }

    /// Removes and returns the entry matching `sequence` for a player, used by both the
    /// confirm and reject paths (section 3's Lifecycle).
    pub fn take(&mut self, player: PlayerId, sequence: SequenceNumber) -> Option<PendingAction> {
        let list = self.by_player.get_mut(&player)?;
        let idx = list.iter().position(|a| a.sequence == sequence)?;
        Some(list.remove(idx))
    }

    pub fn for_player(&self, player: PlayerId) -> &[PendingAction] {
        self.by_player.get(&player).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Removes every pending entry for a disconnecting player, in reverse (most recent
    /// first) order — the order the rollback callback (typically "destroy the created
    /// entity") should be invoked in (section 4.9).
    pub fn drain_for_rollback(&mut self, player: PlayerId) -> Vec<PendingAction> {
        let mut list = self.by_player.remove(&player).unwrap_or_default();
        list.reverse();
        list
    }
}

impl PendingAction {
    pub fn has_created_entity(&self) -> bool {
        self.created_entity != INVALID_ENTITY_ID
    }
}
