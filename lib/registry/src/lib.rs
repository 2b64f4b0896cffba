//! The narrow, explicit entity/component store (A4 in the expanded spec) that stands in for
//! a full ECS in this repo. Addressed by `EntityId`, typed storage per component, no implicit
//! signals: callers that mutate a component call `mark_component_dirty` themselves at the
//! point of mutation (section 9's "fully explicit caller reports changes" mode, the one this
//! repo picked over a signal/slot ECS).
//!
//! Components are stored pre-serialized (as the bytes their `Component::encode` produced)
//! rather than as `Box<dyn Any>`, so the change-detection and delta/snapshot machinery in
//! `servercore`/`clientcore` never needs to know a component's Rust type to replicate it —
//! only its `ComponentId` and the bytes the owning system already produced.

use hashbrown::HashMap;

use corenet::shared::NetworkResult;
use netcore::net::buffer::ByteBuffer;
use netcore::net::types::{ChangeKind, ComponentMask, EntityId, INVALID_ENTITY_ID};

pub type ComponentId = u8;

/// One bit per component type in a `ComponentMask` (section 6's "Constants").
pub const MAX_COMPONENT_TYPES: ComponentId = 32;

/// A component type that can be replicated. `ID` must be stable and unique within
/// `0..MAX_COMPONENT_TYPES`; it is part of the wire format the moment any peer syncs it.
pub trait Component: Sized {
    const ID: ComponentId;

    /// Components that opt out of replication entirely (section 4.11's "no-sync policy")
    /// override this to `false`; `mark_component_dirty` becomes a no-op for them.
    const SYNCABLE: bool = true;

    fn encode(&self, out: &mut ByteBuffer) -> NetworkResult<()>;
    fn decode(buf: &mut ByteBuffer) -> NetworkResult<Self>;
}

#[inline]
fn bit(id: ComponentId) -> ComponentMask {
    1u32 << (id as u32)
}

/// Per-entity change record (section 3's "Dirty set"): the precedence rule is `Created`
/// absorbs further `Updated`s, and `Destroyed` overrides both and clears the mask.
#[derive(Debug, Clone, Copy)]
pub struct DirtyEntry {
    pub kind: ChangeKind,
    pub mask: ComponentMask,
}

#[derive(Default)]
pub struct DirtyTracker {
    entries: HashMap<EntityId, DirtyEntry>,
}

impl DirtyTracker {
    pub fn new() -> DirtyTracker {
        DirtyTracker { entries: HashMap::new() }
    }

    pub fn mark_created(&mut self, entity: EntityId) {
        self.entries.insert(
            entity,
            DirtyEntry {
                kind: ChangeKind::Created,
                mask: 0,
            },
        );
    }

    pub fn mark_updated(&mut self, entity: EntityId, component: ComponentId) {
        let entry = self.entries.entry(entity).or_insert(DirtyEntry {
            kind: ChangeKind::Updated,
            mask: 0,
        });
        entry.kind = ChangeKind::merge(entry.kind, ChangeKind::Updated);
        if entry.kind != ChangeKind::Destroyed {
            entry.mask |= bit(component);
        } else {
            entry.mask = 0;
        }
    }

    pub fn mark_destroyed(&mut self, entity: EntityId) {
        self.entries.insert(
            entity,
            DirtyEntry {
                kind: ChangeKind::Destroyed,
                mask: 0,
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &DirtyEntry)> {
        self.entries.iter().map(|(&id, entry)| (id, entry))
    }

    pub fn get(&self, entity: EntityId) -> Option<&DirtyEntry> {
        self.entries.get(&entity)
    }

    /// Removes and returns up to `limit` entries, for callers that chunk a delta across
    /// multiple ticks (section 4.11: "deferred entities remain dirty").
    pub fn drain_up_to(&mut self, limit: usize) -> Vec<(EntityId, DirtyEntry)> {
        let keys: Vec<EntityId> = self.entries.keys().copied().take(limit).collect();
        keys.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Re-inserts an entry exactly as drained, for a delta producer that chunks a tick's
    /// output by byte budget rather than count and must put back what didn't fit (section
    /// 4.11: "deferred entities remain dirty").
    pub fn requeue(&mut self, entity: EntityId, entry: DirtyEntry) {
        self.entries.insert(entity, entry);
    }
}

/// Id-keyed component storage plus the dirty tracker systems report into explicitly. Entity
/// ids start at 1; 0 is the reserved sentinel, matching `PeerId`/`PlayerId`.
pub struct Registry {
    components: HashMap<EntityId, HashMap<ComponentId, Vec<u8>>>,
    next_entity: EntityId,
    dirty: DirtyTracker,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            components: HashMap::new(),
            next_entity: 1,
            dirty: DirtyTracker::new(),
        }
    }

    /// Allocates a fresh entity id and marks it `Created`. Callers attach components with
    /// `set_component` immediately afterward.
    pub fn spawn(&mut self) -> EntityId {
        let id = self.next_entity;
        self.next_entity = self.next_entity.wrapping_add(1);
        if self.next_entity == INVALID_ENTITY_ID {
            self.next_entity = 1;
        }
        self.components.insert(id, HashMap::new());
        self.dirty.mark_created(id);
        id
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.components.contains_key(&entity)
    }

    pub fn entity_count(&self) -> usize {
        self.components.len()
    }

    pub fn iter_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.components.keys().copied()
    }

    /// Encodes and stores a component, marking it dirty unless it opted out of sync.
    pub fn set_component<C: Component>(&mut self, entity: EntityId, value: &C) -> NetworkResult<()> {
        let mut out = ByteBuffer::new();
        value.encode(&mut out)?;
        self.components
            .entry(entity)
            .or_insert_with(HashMap::new)
            .insert(C::ID, out.into_vec());

        if C::SYNCABLE && self.dirty.get(entity).map(|e| e.kind) != Some(ChangeKind::Created) {
            self.dirty.mark_updated(entity, C::ID);
        }
        Ok(())
    }

    pub fn get_component<C: Component>(&self, entity: EntityId) -> NetworkResult<Option<C>> {
        match self.components.get(&entity).and_then(|m| m.get(&C::ID)) {
            Some(bytes) => {
                let mut buf = ByteBuffer::from_vec(bytes.clone());
                Ok(Some(C::decode(&mut buf)?))
            }
            None => Ok(None),
        }
    }

    pub fn get_component_bytes(&self, entity: EntityId, component: ComponentId) -> Option<&[u8]> {
        self.components.get(&entity).and_then(|m| m.get(&component)).map(|v| v.as_slice())
    }

    pub fn component_ids(&self, entity: EntityId) -> Vec<ComponentId> {
        self.components
            .get(&entity)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn remove_component(&mut self, entity: EntityId, component: ComponentId) {
        if let Some(map) = self.components.get_mut(&entity) {
            map.remove(&component);
        }
        self.dirty.mark_updated(entity, component);
    }

    /// Tears down an entity's storage and marks it `Destroyed` (dominates any prior entry).
    pub fn destroy(&mut self, entity: EntityId) {
        self.components.remove(&entity);
        self.dirty.mark_destroyed(entity);
    }

    /// Explicit entry point for systems that mutate a component in place (e.g. through a
    /// mutable borrow) rather than calling `set_component`.
    pub fn mark_component_dirty(&mut self, entity: EntityId, component: ComponentId) {
        self.dirty.mark_updated(entity, component);
    }

    pub fn mark_dirty(&mut self, entity: EntityId, kind: ChangeKind) {
        match kind {
            ChangeKind::Created => self.dirty.mark_created(entity),
            ChangeKind::Destroyed => self.dirty.mark_destroyed(entity),
            ChangeKind::Updated => {
                let entry = self.dirty.entries.entry(entity).or_insert(DirtyEntry {
                    kind: ChangeKind::Updated,
                    mask: 0,
                });
                entry.kind = ChangeKind::merge(entry.kind, ChangeKind::Updated);
            }
        }
    }

    pub fn dirty(&self) -> &DirtyTracker {
        &self.dirty
    }

    pub fn flush_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Pulls up to `limit` dirty entries out for a delta producer to consume.
    pub fn drain_dirty(&mut self, limit: usize) -> Vec<(EntityId, DirtyEntry)> {
        self.dirty.drain_up_to(limit)
    }

    /// Puts a dirty entry back (section 4.11: a size-bounded delta producer defers whatever
    /// didn't fit in this tick's payload).
    pub fn requeue_dirty(&mut self, entity: EntityId, entry: DirtyEntry) {
        self.dirty.requeue(entity, entry);
    }

    /// A point-in-time, owned clone of every entity's component bytes, used by the snapshot
    /// engine (C12) to serialize a consistent view off the main thread without holding a
    /// reference into live registry state.
    pub fn clone_snapshot_view(&self) -> Vec<(EntityId, Vec<(ComponentId, Vec<u8>)>)> {
        self.components
            .iter()
            .map(|(&id, comps)| (id, comps.iter().map(|(&cid, bytes)| (cid, bytes.clone())).collect()))
            .collect()
    }

    /// Replaces all registry contents with a decoded snapshot (section 4.12: "prior state is
    /// cleared" before applying). Used by the client after a snapshot verifies.
    pub fn replace_all(&mut self, entities: Vec<(EntityId, Vec<(ComponentId, Vec<u8>)>)>) {
        self.components.clear();
        self.dirty.clear();
        let mut max_id = 0;
        for (id, comps) in entities {
            max_id = max_id.max(id);
            let map = comps.into_iter().collect::<HashMap<_, _>>();
            self.components.insert(id, map);
        }
        self.next_entity = max_id.wrapping_add(1).max(1);
    }

    /// Ensures storage exists for an entity id the caller already knows (a server-assigned
    /// id arriving over the wire) without allocating a fresh one and without touching the
    /// dirty set — used by a delta/snapshot consumer applying someone else's authoritative
    /// state rather than originating changes of its own.
    pub fn upsert_entity(&mut self, entity: EntityId) {
        self.components.entry(entity).or_insert_with(HashMap::new);
        if entity >= self.next_entity {
            self.next_entity = entity.wrapping_add(1).max(1);
        }
    }

    /// Stores a component's already-encoded bytes directly, bypassing `Component::encode`.
    /// For a replicated peer applying wire bytes it has no concrete `Component` impl to
    /// decode through on its way to storage (it only decodes on actual read access).
    pub fn set_component_raw(&mut self, entity: EntityId, component: ComponentId, bytes: Vec<u8>) {
        self.components
            .entry(entity)
            .or_insert_with(HashMap::new)
            .insert(component, bytes);
    }

    /// Tears down an entity's storage without marking it `Destroyed` — the caller already
    /// knows the entity is gone (e.g. a `ChangeKind::Destroyed` delta entry) and has no use
    /// for re-deriving that fact from the dirty set.
    pub fn remove_entity(&mut self, entity: EntityId) {
        self.components.remove(&entity);
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position {
        x: i32,
        y: i32,
    }

    impl Component for Position {
        const ID: ComponentId = 0;

        fn encode(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
            use byteorder::{LittleEndian, WriteBytesExt};
            out.write_i32::<LittleEndian>(self.x)?;
            out.write_i32::<LittleEndian>(self.y)?;
            Ok(())
        }

        fn decode(buf: &mut ByteBuffer) -> NetworkResult<Position> {
            use byteorder::{LittleEndian, ReadBytesExt};
            Ok(Position {
                x: buf.read_i32::<LittleEndian>()?,
                y: buf.read_i32::<LittleEndian>()?,
            })
        }
    }

    struct Transient;

    impl Component for Transient {
        const ID: ComponentId = 1;
        const SYNCABLE: bool = false;

        fn encode(&self, _out: &mut ByteBuffer) -> NetworkResult<()> {
            Ok(())
        }

        fn decode(_buf: &mut ByteBuffer) -> NetworkResult<Transient> {
            Ok(Transient)
        }
    }

    #[test]
    fn test_created_absorbs_updates() {
        let mut reg = Registry::new();
        let e = reg.spawn();
        reg.set_component(e, &Position { x: 1, y: 2 }).unwrap();
        reg.set_component(e, &Position { x: 3, y: 4 }).unwrap();

        let entry = reg.dirty().get(e).unwrap();
        assert_eq!(entry.kind, ChangeKind::Created);
    }

    #[test]
    fn test_destroyed_overrides_and_clears_mask() {
        let mut reg = Registry::new();
        let e = reg.spawn();
        reg.flush_dirty();
        reg.set_component(e, &Position { x: 1, y: 2 }).unwrap();
        reg.destroy(e);

        let entry = reg.dirty().get(e).unwrap();
        assert_eq!(entry.kind, ChangeKind::Destroyed);
        assert_eq!(entry.mask, 0);
    }

    #[test]
    fn test_component_roundtrip() {
        let mut reg = Registry::new();
        let e = reg.spawn();
        reg.set_component(e, &Position { x: 10, y: -5 }).unwrap();

        let decoded: Position = reg.get_component(e).unwrap().unwrap();
        assert_eq!(decoded.x, 10);
        assert_eq!(decoded.y, -5);
    }

    #[test]
    fn test_non_syncable_component_never_marks_dirty() {
        let mut reg = Registry::new();
        let e = reg.spawn();
        reg.flush_dirty();
        reg.set_component(e, &Transient).unwrap();

        assert!(reg.dirty().get(e).is_none());
    }

    #[test]
    fn test_entity_ids_never_reuse_sentinel() {
        let mut reg = Registry::new();
        for _ in 0..5 {
            assert_ne!(reg.spawn(), INVALID_ENTITY_ID);
        }
    }

    #[test]
    fn test_snapshot_view_and_restore_roundtrip() {
        let mut reg = Registry::new();
        let e = reg.spawn();
        reg.set_component(e, &Position { x: 7, y: 8 }).unwrap();

        let view = reg.clone_snapshot_view();

        let mut restored = Registry::new();
        restored.replace_all(view);

        let decoded: Position = restored.get_component(e).unwrap().unwrap();
        assert_eq!(decoded.x, 7);
        assert_eq!(decoded.y, 8);
    }

    #[test]
    fn test_upsert_entity_adopts_a_foreign_id_without_dirtying_it() {
        let mut reg = Registry::new();
        reg.upsert_entity(50);

        assert!(reg.contains(50));
        assert!(reg.dirty().get(50).is_none());
        // The next locally-originated spawn must not collide with the adopted id.
        assert!(reg.spawn() > 50);
    }

    #[test]
    fn test_set_component_raw_is_readable_through_the_typed_accessor() {
        let mut reg = Registry::new();
        reg.upsert_entity(1);

        let mut encoded = ByteBuffer::new();
        Position { x: 3, y: 4 }.encode(&mut encoded).unwrap();
        reg.set_component_raw(1, Position::ID, encoded.into_vec());

        let decoded: Position = reg.get_component(1).unwrap().unwrap();
        assert_eq!(decoded.x, 3);
        assert_eq!(decoded.y, 4);
    }

    #[test]
    fn test_remove_entity_drops_storage_without_touching_dirty_set() {
        let mut reg = Registry::new();
        reg.upsert_entity(5);
        reg.remove_entity(5);

        assert!(!reg.contains(5));
        assert!(reg.dirty().is_empty());
    }
}
