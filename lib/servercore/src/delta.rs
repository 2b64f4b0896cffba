//! Server-side delta generation (section 4.11's "C11"): turns a registry's dirty set into a
//! `StateUpdate` for one tick. Created entities serialize every syncable component they
//! carry; Updated entities serialize only the components named by their dirty mask;
//! Destroyed entities carry their id alone. The payload is bounded in size — whatever
//! doesn't fit stays dirty for a later tick.

use netcore::net::messages::EntityChange;
use netcore::net::types::{ChangeKind, ComponentMask, Tick};

use registry::Registry;

/// Conservative default so a single tick's delta stays well clear of `MAX_MESSAGE_SIZE`
/// (section 4.11: "the payload is bounded in size").
pub const DEFAULT_MAX_DELTA_BYTES: usize = 32 * 1024;

/// Rough per-entry overhead (entity id + kind byte + mask + length prefix) used for the
/// byte-budget estimate; exactness doesn't matter, staying under `MAX_MESSAGE_SIZE` does.
const ENTRY_OVERHEAD: usize = 4 + 1 + 4 + 2;

pub struct DeltaGenerator {
    max_bytes: usize,
}

impl DeltaGenerator {
    pub fn new(max_bytes: usize) -> DeltaGenerator {
        DeltaGenerator { max_bytes }
    }

    /// Drains the registry's dirty set (up to the byte budget) into a tick-stamped
    /// `StateUpdate`. Entries that don't fit are requeued so they remain dirty (section
    /// 4.11: "deferred entities remain dirty"). The caller is responsible for invoking
    /// `registry.flush_dirty()`-equivalent semantics — here that's implicit: only the
    /// entries actually consumed are removed, so callers should *not* call `flush_dirty`
    /// after generation, only after the whole dirty set has been successfully transmitted.
    pub fn generate(&self, registry: &mut Registry, tick: Tick) -> StateUpdateDraft {
        let dirty = registry.drain_dirty(usize::max_value());
        let mut changes = Vec::with_capacity(dirty.len());
        let mut budget = self.max_bytes;
        let mut deferred = 0usize;

        for (entity, entry) in dirty {
            let change = match entry.kind {
                ChangeKind::Created => EntityChange {
                    entity_id: entity,
                    kind: ChangeKind::Created.to_u8(),
                    component_mask: full_mask(registry, entity),
                    data: serialize_components(registry, entity, full_mask(registry, entity)),
                },
                ChangeKind::Updated => EntityChange {
                    entity_id: entity,
                    kind: ChangeKind::Updated.to_u8(),
                    component_mask: entry.mask,
                    data: serialize_components(registry, entity, entry.mask),
                },
                ChangeKind::Destroyed => EntityChange {
                    entity_id: entity,
                    kind: ChangeKind::Destroyed.to_u8(),
                    component_mask: 0,
                    data: Vec::new(),
                },
            };

            let cost = ENTRY_OVERHEAD + change.data.len();
            if cost > budget && !changes.is_empty() {
                registry.requeue_dirty(entity, entry);
                deferred += 1;
                continue;
            }
            budget = budget.saturating_sub(cost);
            changes.push(change);
        }

        StateUpdateDraft {
            tick,
            changes,
            deferred,
        }
    }
}

/// A generated delta plus bookkeeping the caller needs (section 4.11: chunking leaves
/// `deferred` entities dirty for the next tick).
pub struct StateUpdateDraft {
    pub tick: Tick,
    pub changes: Vec<EntityChange>,
    pub deferred: usize,
}

fn full_mask(registry: &Registry, entity: u32) -> ComponentMask {
    registry
        .component_ids(entity)
        .into_iter()
        .fold(0u32, |mask, id| mask | (1u32 << (id as u32)))
}

fn serialize_components(registry: &Registry, entity: u32, mask: ComponentMask) -> Vec<u8> {
    use byteorder::{LittleEndian, WriteBytesExt};
    use netcore::net::buffer::ByteBuffer;

    let mut out = ByteBuffer::new();
    for id in 0u8..32 {
        if mask & (1u32 << id as u32) == 0 {
            continue;
        }
        if let Some(bytes) = registry.get_component_bytes(entity, id) {
            let _ = out.write_u8(id);
            let _ = out.write_u16::<LittleEndian>(bytes.len() as u16);
            out.write_bytes(bytes);
        }
    }
    out.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry::{Component, ComponentId};
    use netcore::net::buffer::ByteBuffer;
    use corenet::shared::NetworkResult;

    struct Position {
        x: i32,
    }

    impl Component for Position {
        const ID: ComponentId = 0;

        fn encode(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
            use byteorder::{LittleEndian, WriteBytesExt};
            out.write_i32::<LittleEndian>(self.x)?;
            Ok(())
        }

        fn decode(buf: &mut ByteBuffer) -> NetworkResult<Position> {
            use byteorder::{LittleEndian, ReadBytesExt};
            Ok(Position { x: buf.read_i32::<LittleEndian>()? })
        }
    }

    #[test]
    fn test_created_entity_emits_single_change_with_full_mask() {
        let mut registry = Registry::new();
        let e = registry.spawn();
        registry.set_component(e, &Position { x: 5 }).unwrap();

        let generator = DeltaGenerator::new(DEFAULT_MAX_DELTA_BYTES);
        let draft = generator.generate(&mut registry, 1);

        assert_eq!(draft.changes.len(), 1);
        assert_eq!(draft.changes[0].kind, ChangeKind::Created.to_u8());
        assert_eq!(draft.changes[0].component_mask, 1);
        assert_eq!(draft.deferred, 0);
    }

    #[test]
    fn test_destroyed_entity_carries_no_payload() {
        let mut registry = Registry::new();
        let e = registry.spawn();
        registry.flush_dirty();
        registry.destroy(e);

        let generator = DeltaGenerator::new(DEFAULT_MAX_DELTA_BYTES);
        let draft = generator.generate(&mut registry, 1);

        assert_eq!(draft.changes.len(), 1);
        assert_eq!(draft.changes[0].kind, ChangeKind::Destroyed.to_u8());
        assert!(draft.changes[0].data.is_empty());
    }

    #[test]
    fn test_oversized_tick_defers_remainder_and_keeps_it_dirty() {
        let mut registry = Registry::new();
        let mut entities = Vec::new();
        for i in 0..5 {
            let e = registry.spawn();
            registry.set_component(e, &Position { x: i }).unwrap();
            entities.push(e);
        }

        // Budget for roughly one entry's worth of overhead + payload.
        let generator = DeltaGenerator::new(ENTRY_OVERHEAD + 4);
        let draft = generator.generate(&mut registry, 1);

        assert_eq!(draft.changes.len(), 1);
        assert_eq!(draft.deferred, 4);
        assert_eq!(registry.dirty().len(), 4);
    }
}
