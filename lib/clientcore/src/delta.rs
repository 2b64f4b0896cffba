//! Client-side delta application (section 4.11's "C11", client half): turns a received
//! `StateUpdate` into registry mutations, enforcing the same strictly-increasing tick
//! ordering the server's own dirty-set precedence rule assumes the client honors.

use byteorder::{LittleEndian, ReadBytesExt};

use netcore::net::buffer::ByteBuffer;
use netcore::net::messages::{EntityChange, StateUpdate};
use netcore::net::types::{ChangeKind, Tick};

use registry::Registry;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ApplyOutcome {
    Applied,
    /// Already-processed tick arriving again (e.g. a retransmit); harmless, nothing to do.
    Duplicate,
    /// Older than the last tick already applied; the update is stale, the registry is
    /// already ahead of it.
    OutOfOrder,
    /// The payload didn't decode; the registry is left untouched.
    Error,
}

/// One component's id and already-encoded bytes, decoded out of an `EntityChange`'s `data`
/// blob (the same `{id:u8, len:u16, bytes}*` layout `servercore::delta` writes).
fn decode_components(data: &[u8]) -> Option<Vec<(registry::ComponentId, Vec<u8>)>> {
    let mut buf = ByteBuffer::from_vec(data.to_vec());
    let mut out = Vec::new();
    while buf.remaining() > 0 {
        let id = buf.read_u8().ok()?;
        let len = buf.read_u16::<LittleEndian>().ok()?;
        let bytes = buf.read_bytes(len as usize).ok()?.to_vec();
        out.push((id, bytes));
    }
    Some(out)
}

/// Tracks the last tick successfully applied and rejects anything not strictly newer
/// (section 4.11: the client is never asked to merge two deltas out of order).
#[derive(Default)]
pub struct DeltaApplier {
    last_applied_tick: Option<Tick>,
}

impl DeltaApplier {
    pub fn new() -> DeltaApplier {
        DeltaApplier::default()
    }

    pub fn last_applied_tick(&self) -> Option<Tick> {
        self.last_applied_tick
    }

    /// Applies every change in `update` to `registry`, in Created/Updated/Destroyed order so
    /// a just-created entity's initial components land before any same-tick update to it.
    pub fn apply(&mut self, update: &StateUpdate, registry: &mut Registry) -> ApplyOutcome {
        if let Some(last) = self.last_applied_tick {
            if update.tick == last {
                return ApplyOutcome::Duplicate;
            }
            if update.tick < last {
                return ApplyOutcome::OutOfOrder;
            }
        }

        let mut decoded: Vec<(&EntityChange, Option<Vec<(registry::ComponentId, Vec<u8>)>>)> = Vec::new();
        for change in &update.changes {
            match change.kind() {
                Some(ChangeKind::Destroyed) => decoded.push((change, None)),
                Some(_) => match decode_components(&change.data) {
                    Some(components) => decoded.push((change, Some(components))),
                    None => return ApplyOutcome::Error,
                },
                None => return ApplyOutcome::Error,
            }
        }

        for (change, components) in &decoded {
            if change.kind() == Some(ChangeKind::Created) {
                registry.upsert_entity(change.entity_id);
                for (id, bytes) in components.clone().unwrap_or_default() {
                    registry.set_component_raw(change.entity_id, id, bytes);
                }
            }
        }
        for (change, components) in &decoded {
            if change.kind() == Some(ChangeKind::Updated) {
                registry.upsert_entity(change.entity_id);
                for (id, bytes) in components.clone().unwrap_or_default() {
                    registry.set_component_raw(change.entity_id, id, bytes);
                }
            }
        }
        for (change, _) in &decoded {
            if change.kind() == Some(ChangeKind::Destroyed) {
                registry.remove_entity(change.entity_id);
            }
        }

        self.last_applied_tick = Some(update.tick);
        ApplyOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcore::net::types::ComponentMask;
    use registry::{Component, ComponentId};
    use corenet::shared::NetworkResult;

    struct Position {
        x: i32,
    }

    impl Component for Position {
        const ID: ComponentId = 0;

        fn encode(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
            use byteorder::WriteBytesExt;
            out.write_i32::<LittleEndian>(self.x)?;
            Ok(())
        }

        fn decode(buf: &mut ByteBuffer) -> NetworkResult<Position> {
            Ok(Position { x: buf.read_i32::<LittleEndian>()? })
        }
    }

    fn encode_change(entity_id: u32, kind: ChangeKind, x: i32) -> EntityChange {
        let mut payload = ByteBuffer::new();
        Position { x }.encode(&mut payload).unwrap();
        let bytes = payload.into_vec();

        let mut data = ByteBuffer::new();
        use byteorder::WriteBytesExt;
        data.write_u8(Position::ID).unwrap();
        data.write_u16::<LittleEndian>(bytes.len() as u16).unwrap();
        data.write_bytes(&bytes);

        EntityChange {
            entity_id,
            kind: kind.to_u8(),
            component_mask: 1 as ComponentMask,
            data: data.into_vec(),
        }
    }

    #[test]
    fn test_created_entity_lands_with_its_component() {
        let mut applier = DeltaApplier::new();
        let mut registry = Registry::new();

        let update = StateUpdate {
            tick: 1,
            changes: vec![encode_change(5, ChangeKind::Created, 10)],
        };

        assert_eq!(applier.apply(&update, &mut registry), ApplyOutcome::Applied);
        let decoded: Position = registry.get_component(5).unwrap().unwrap();
        assert_eq!(decoded.x, 10);
    }

    #[test]
    fn test_duplicate_tick_is_a_no_op() {
        let mut applier = DeltaApplier::new();
        let mut registry = Registry::new();
        let update = StateUpdate {
            tick: 1,
            changes: vec![encode_change(5, ChangeKind::Created, 10)],
        };

        applier.apply(&update, &mut registry);
        assert_eq!(applier.apply(&update, &mut registry), ApplyOutcome::Duplicate);
    }

    #[test]
    fn test_stale_tick_is_rejected_as_out_of_order() {
        let mut applier = DeltaApplier::new();
        let mut registry = Registry::new();

        applier.apply(
            &StateUpdate {
                tick: 5,
                changes: vec![],
            },
            &mut registry,
        );

        let outcome = applier.apply(
            &StateUpdate {
                tick: 3,
                changes: vec![],
            },
            &mut registry,
        );

        assert_eq!(outcome, ApplyOutcome::OutOfOrder);
    }

    #[test]
    fn test_destroyed_entity_is_removed() {
        let mut applier = DeltaApplier::new();
        let mut registry = Registry::new();

        applier.apply(
            &StateUpdate {
                tick: 1,
                changes: vec![encode_change(5, ChangeKind::Created, 1)],
            },
            &mut registry,
        );
        applier.apply(
            &StateUpdate {
                tick: 2,
                changes: vec![EntityChange {
                    entity_id: 5,
                    kind: ChangeKind::Destroyed.to_u8(),
                    component_mask: 0,
                    data: vec![],
                }],
            },
            &mut registry,
        );

        assert!(!registry.contains(5));
    }

    #[test]
    fn test_malformed_component_data_is_reported_as_error() {
        let mut applier = DeltaApplier::new();
        let mut registry = Registry::new();

        let update = StateUpdate {
            tick: 1,
            changes: vec![EntityChange {
                entity_id: 5,
                kind: ChangeKind::Created.to_u8(),
                component_mask: 1,
                data: vec![9, 9],
            }],
        };

        assert_eq!(applier.apply(&update, &mut registry), ApplyOutcome::Error);
        assert_eq!(applier.last_applied_tick(), None);
    }
}
