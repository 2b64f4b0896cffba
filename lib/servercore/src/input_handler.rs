//! Input handler (section 4.9's "C9"): the one `NetworkHandler` specialization this core
//! ships for gameplay messages. Validates, applies, tracks and (on disconnect) rolls back
//! every `Input` a player sends.

use hashbrown::HashMap;

use corenet::shared::NetworkResult;
use netcore::net::buffer::ByteBuffer;
use netcore::net::envelope::MessageType;
use netcore::net::messages::{Input, InputAck, Message, Rejection};
use netcore::net::transport::Channel;
use netcore::net::types::{EntityId, GridPosition, PlayerId, RejectionReason, Tick, INVALID_ENTITY_ID};

use registry::Registry;

use crate::handler::{NetworkHandler, Outbox};
use crate::pending::{PendingAction, PendingActionTable};

/// A category-specific acceptance check (section 4.9: "affordability and ownership
/// callbacks"). Returns `Ok(())` if the input is acceptable, or the reason to reject it.
pub type InputValidator = Box<dyn Fn(&Registry, PlayerId, &Input) -> Result<(), RejectionReason> + Send>;

/// Applies an accepted input to the registry, optionally creating an entity (returned, or
/// `INVALID_ENTITY_ID` if none was created) that the pending-action tracker records for
/// later rollback.
pub type InputApplicator = Box<dyn FnMut(&mut Registry, PlayerId, &Input) -> EntityId + Send>;

/// Invoked once per rolled-back pending action, in reverse order, on disconnect (section
/// 4.9). The default meaning is "destroy the created entity", but is left to the caller so
/// a kind with side effects beyond entity creation can undo those too.
pub type RollbackCallback = Box<dyn FnMut(&mut Registry, &PendingAction) + Send>;

#[derive(Default, Debug, Clone, Copy)]
pub struct InputStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
}

pub struct InputHandler {
    bounds_width: i16,
    bounds_height: i16,
    validators: HashMap<u8, InputValidator>,
    applicators: HashMap<u8, InputApplicator>,
    rollback: Option<RollbackCallback>,
    pending: PendingActionTable,
    stats: InputStats,
}

impl InputHandler {
    pub fn new(bounds_width: i16, bounds_height: i16) -> InputHandler {
        InputHandler {
            bounds_width,
            bounds_height,
            validators: HashMap::new(),
            applicators: HashMap::new(),
            rollback: None,
            pending: PendingActionTable::new(),
            stats: InputStats::default(),
        }
    }

    pub fn register_validator(&mut self, input_type: u8, validator: InputValidator) {
        self.validators.insert(input_type, validator);
    }

    pub fn register_applicator(&mut self, input_type: u8, applicator: InputApplicator) {
        self.applicators.insert(input_type, applicator);
    }

    pub fn set_rollback(&mut self, rollback: RollbackCallback) {
        self.rollback = Some(rollback);
    }

    pub fn stats(&self) -> InputStats {
        self.stats
    }

    fn in_bounds(&self, pos: GridPosition) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.bounds_width && pos.y < self.bounds_height
    }

    /// The full pipeline for one accepted, rate-limited, identity-checked `Input` (section
    /// 4.9). Returns the pending action recorded if the input was accepted.
    pub fn process(
        &mut self,
        player_id: PlayerId,
        input: &Input,
        tick: Tick,
        registry: &mut Registry,
        outbox: &mut Outbox,
    ) {
        self.stats.received += 1;

        let target = GridPosition {
            x: input.target_x,
            y: input.target_y,
        };

        let rejection = if !self.in_bounds(target) {
            Some(RejectionReason::OutOfBounds)
        } else {
            self.validators
                .get(&input.input_type)
                .and_then(|validate| validate(registry, player_id, input).err())
        };

        if let Some(reason) = rejection {
            self.stats.rejected += 1;
            let rejection_msg = Rejection {
                sequence: input.sequence,
                reason: reason.to_u8(),
                tick,
                message: reason.message().to_string(),
            };
            if let Ok(bytes) = encode(&rejection_msg) {
                outbox.send_to(player_id, Channel::Reliable, bytes);
            }
            return;
        }

        let created_entity = match self.applicators.get_mut(&input.input_type) {
            Some(apply) => apply(registry, player_id, input),
            None => INVALID_ENTITY_ID,
        };

        self.stats.accepted += 1;

        self.pending.track(
            player_id,
            PendingAction {
                sequence: input.sequence,
                input_type: input.input_type,
                target,
                param1: input.param1,
                param2: input.param2,
                value: input.value,
                created_entity,
                tick,
                applied: true,
            },
        );

        let ack = InputAck { sequence: input.sequence, tick };
        if let Ok(bytes) = encode(&ack) {
            outbox.send_to(player_id, Channel::Reliable, bytes);
        }
    }

    /// Walks `player_id`'s pending-action list in reverse, invoking the rollback callback
    /// for each, then clears it (section 4.9: called on disconnect).
    pub fn rollback_player(&mut self, player_id: PlayerId, registry: &mut Registry) {
        let actions = self.pending.drain_for_rollback(player_id);
        if let Some(rollback) = self.rollback.as_mut() {
            for action in &actions {
                rollback(registry, action);
            }
        }
    }

    pub fn pending_for(&self, player_id: PlayerId) -> &[PendingAction] {
        self.pending.for_player(player_id)
    }
}

fn encode<M: Message>(message: &M) -> NetworkResult<Vec<u8>> {
    let mut payload = ByteBuffer::new();
    message.write_payload(&mut payload)?;

    let mut framed = ByteBuffer::new();
    netcore::net::envelope::serialize_with_envelope(&mut framed, message.message_type(), payload.data(), false)?;
    Ok(framed.into_vec())
}

impl NetworkHandler for InputHandler {
    fn handled_types(&self) -> &'static [MessageType] {
        &[MessageType::Input]
    }

    fn handle(
        &mut self,
        player_id: PlayerId,
        _msg_type: MessageType,
        payload: &mut ByteBuffer,
        registry: &mut Registry,
        tick: Tick,
        outbox: &mut Outbox,
    ) -> NetworkResult<()> {
        let mut input = Input::default();
        input.read_payload(payload)?;
        self.process(player_id, &input, tick, registry, outbox);
        Ok(())
    }

    fn on_disconnect(&mut self, player_id: PlayerId, registry: &mut Registry) {
        self.rollback_player(player_id, registry);
    }
}
