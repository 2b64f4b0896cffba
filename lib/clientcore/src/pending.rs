//! Client-side pending-action tracking (section 3's "Pending action (client)"): the client's
//! own record of inputs it has sent but not yet heard confirmed or rejected, so the UI can
//! show an optimistic result and then reconcile it against `InputAck`/`Rejection` — or give
//! up and mark it timed out if neither ever arrives.

use hashbrown::HashMap;

use corenet::time::timestamp_millis;
use netcore::net::types::{RejectionReason, SequenceNumber, Tick};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PendingActionState {
    Pending,
    Confirmed,
    Rejected,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ClientPendingAction {
    pub sequence: SequenceNumber,
    pub input_type: u8,
    pub sent_at_ms: u64,
    pub state: PendingActionState,
    pub confirmed_tick: Option<Tick>,
    pub rejection_reason: Option<RejectionReason>,
    pub rejection_message: Option<String>,
    pub resolved_at_ms: Option<u64>,
}

impl ClientPendingAction {
    fn new(sequence: SequenceNumber, input_type: u8) -> ClientPendingAction {
        ClientPendingAction {
            sequence,
            input_type,
            sent_at_ms: timestamp_millis(),
            state: PendingActionState::Pending,
            confirmed_tick: None,
            rejection_reason: None,
            rejection_message: None,
            resolved_at_ms: None,
        }
    }
}

/// Tracks every in-flight input by sequence number and ages out resolved entries after a
/// retention window so the table doesn't grow without bound over a long session.
#[derive(Default)]
pub struct PendingActionTracker {
    by_sequence: HashMap<SequenceNumber, ClientPendingAction>,
}

impl PendingActionTracker {
    pub fn new() -> PendingActionTracker {
        PendingActionTracker::default()
    }

    pub fn track(&mut self, sequence: SequenceNumber, input_type: u8) {
        self.by_sequence.insert(sequence, ClientPendingAction::new(sequence, input_type));
    }

    pub fn confirm(&mut self, sequence: SequenceNumber, tick: Tick) {
        if let Some(action) = self.by_sequence.get_mut(&sequence) {
            action.state = PendingActionState::Confirmed;
            action.confirmed_tick = Some(tick);
            action.resolved_at_ms = Some(timestamp_millis());
        }
    }

    pub fn reject(&mut self, sequence: SequenceNumber, reason: RejectionReason, message: String) {
        if let Some(action) = self.by_sequence.get_mut(&sequence) {
            action.state = PendingActionState::Rejected;
            action.rejection_reason = Some(reason);
            action.rejection_message = Some(message);
            action.resolved_at_ms = Some(timestamp_millis());
        }
    }

    /// Moves any action older than `timeout_ms` and still `Pending` into `TimedOut`, and
    /// drops anything resolved longer than `retention_ms` ago (section 3's lifecycle: a
    /// pending action that never gets an ack is not pending forever).
    pub fn sweep(&mut self, timeout_ms: u64, retention_ms: u64) {
        let now = timestamp_millis();
        let mut to_remove = Vec::new();

        for (sequence, action) in self.by_sequence.iter_mut() {
            match action.state {
                PendingActionState::Pending => {
                    if now.saturating_sub(action.sent_at_ms) >= timeout_ms {
                        action.state = PendingActionState::TimedOut;
                        action.resolved_at_ms = Some(now);
                    }
                }
                _ => {
                    if let Some(resolved_at) = action.resolved_at_ms {
                        if now.saturating_sub(resolved_at) >= retention_ms {
                            to_remove.push(*sequence);
                        }
                    }
                }
            }
        }

        for sequence in to_remove {
            self.by_sequence.remove(&sequence);
        }
    }

    pub fn get(&self, sequence: SequenceNumber) -> Option<&ClientPendingAction> {
        self.by_sequence.get(&sequence)
    }

    pub fn len(&self) -> usize {
        self.by_sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sequence.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_resolves_a_tracked_action() {
        let mut tracker = PendingActionTracker::new();
        tracker.track(1, 0);
        tracker.confirm(1, 42);

        let action = tracker.get(1).unwrap();
        assert_eq!(action.state, PendingActionState::Confirmed);
        assert_eq!(action.confirmed_tick, Some(42));
    }

    #[test]
    fn test_reject_records_the_reason() {
        let mut tracker = PendingActionTracker::new();
        tracker.track(1, 0);
        tracker.reject(1, RejectionReason::CannotAfford, RejectionReason::CannotAfford.message().to_string());

        let action = tracker.get(1).unwrap();
        assert_eq!(action.state, PendingActionState::Rejected);
        assert_eq!(action.rejection_reason, Some(RejectionReason::CannotAfford));
        assert_eq!(action.rejection_message.as_deref(), Some(RejectionReason::CannotAfford.message()));
    }

    #[test]
    fn test_sweep_times_out_a_stale_pending_action() {
        let mut tracker = PendingActionTracker::new();
        tracker.track(1, 0);
        if let Some(action) = tracker.by_sequence.get_mut(&1) {
            action.sent_at_ms = 0;
        }

        tracker.sweep(1, 60_000);
        assert_eq!(tracker.get(1).unwrap().state, PendingActionState::TimedOut);
    }

    #[test]
    fn test_sweep_evicts_resolved_entries_past_retention() {
        let mut tracker = PendingActionTracker::new();
        tracker.track(1, 0);
        tracker.confirm(1, 1);
        if let Some(action) = tracker.by_sequence.get_mut(&1) {
            action.resolved_at_ms = Some(0);
        }

        tracker.sweep(60_000, 1);
        assert!(tracker.is_empty());
    }
}
