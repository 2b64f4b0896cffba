//! Client-side snapshot reassembly (section 4.12's "C12", client half): buffers
//! `SnapshotChunk`s behind a `SnapshotStart`/`SnapshotEnd` pair, verifies the checksum, then
//! replaces the registry wholesale and replays whatever deltas arrived mid-transfer.

use byteorder::{LittleEndian, ReadBytesExt};

use netcore::net::buffer::ByteBuffer;
use netcore::net::compress::{checksum, decompress};
use netcore::net::messages::StateUpdate;
use netcore::net::types::Tick;

use registry::{ComponentId, EntityId, Registry};

use crate::delta::DeltaApplier;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SnapshotProgress {
    Idle,
    Receiving,
    Applying,
    Complete,
}

#[derive(Debug, Eq, PartialEq)]
pub enum SnapshotApplyError {
    ChecksumMismatch,
    MalformedPayload,
    Incomplete,
}

/// One in-flight transfer: chunks may arrive out of order (section 4.12), so they're kept
/// indexed rather than appended, and concatenated only once every index is present.
pub struct SnapshotReceiver {
    tick: Tick,
    total_chunks: Option<u32>,
    chunks: hashbrown::HashMap<u32, Vec<u8>>,
    progress: SnapshotProgress,
    /// Deltas that arrived while a snapshot transfer was in flight, held back so they can be
    /// replayed in order once the snapshot lands rather than discarded or misapplied against
    /// a registry that doesn't reflect the snapshot's tick yet (section 4.12's "buffered
    /// delta replay").
    buffered_deltas: std::collections::VecDeque<StateUpdate>,
    buffer_capacity: usize,
    total_bytes: u32,
    entity_count: u32,
    /// Set when a condition in section 4.12's failure table (checksum mismatch, buffered-delta
    /// overflow) means the current transfer can't be trusted and a fallback snapshot should be
    /// requested instead. Drained by `take_fallback_request`.
    fallback_requested: bool,
}

impl SnapshotReceiver {
    pub fn new(buffer_capacity: usize) -> SnapshotReceiver {
        SnapshotReceiver {
            tick: 0,
            total_chunks: None,
            chunks: hashbrown::HashMap::new(),
            progress: SnapshotProgress::Idle,
            buffered_deltas: std::collections::VecDeque::new(),
            buffer_capacity,
            total_bytes: 0,
            entity_count: 0,
            fallback_requested: false,
        }
    }

    pub fn progress(&self) -> SnapshotProgress {
        self.progress
    }

    /// Uncompressed size of the last snapshot whose `SnapshotEnd` was processed (section 6's
    /// observable progress counters).
    pub fn total_bytes(&self) -> u32 {
        self.total_bytes
    }

    pub fn entity_count(&self) -> u32 {
        self.entity_count
    }

    /// Returns and clears the pending fallback-request flag. Called once per receive loop so a
    /// single failure produces a single request.
    pub fn take_fallback_request(&mut self) -> bool {
        std::mem::take(&mut self.fallback_requested)
    }

    pub fn begin(&mut self, tick: Tick, total_chunks: u32) {
        self.tick = tick;
        self.total_chunks = Some(total_chunks);
        self.chunks.clear();
        self.buffered_deltas.clear();
        self.progress = SnapshotProgress::Receiving;
    }

    pub fn push_chunk(&mut self, index: u32, data: Vec<u8>) {
        if self.progress == SnapshotProgress::Receiving {
            self.chunks.insert(index, data);
        }
    }

    /// Holds a delta for later replay if a transfer is in progress; returns `false` (and
    /// drops nothing) when no transfer is in flight, telling the caller to apply it normally
    /// instead (section 4.12: buffering only applies while `Receiving`/`Applying`). Overflowing
    /// the buffer means deltas are being lost, so the transfer can no longer be trusted to
    /// reconstruct an accurate state and a fallback snapshot is requested (section 4.12's
    /// failure table).
    pub fn buffer_delta_if_receiving(&mut self, update: StateUpdate) -> bool {
        if self.progress == SnapshotProgress::Idle || self.progress == SnapshotProgress::Complete {
            return false;
        }
        if self.buffered_deltas.len() >= self.buffer_capacity {
            self.buffered_deltas.pop_front();
            self.fallback_requested = true;
        }
        self.buffered_deltas.push_back(update);
        true
    }

    /// Concatenates chunks in index order, decompresses, verifies the checksum against
    /// `SnapshotEnd`, and on success replaces the registry and replays every buffered delta
    /// whose tick is newer than the snapshot (section 4.12: older buffered deltas are
    /// superseded by the snapshot itself and dropped).
    pub fn finish(
        &mut self,
        claimed_checksum: u32,
        total_bytes: u32,
        entity_count: u32,
        registry: &mut Registry,
        delta_applier: &mut DeltaApplier,
    ) -> Result<Tick, SnapshotApplyError> {
        self.progress = SnapshotProgress::Applying;
        self.total_bytes = total_bytes;
        self.entity_count = entity_count;

        let total = self.total_chunks.ok_or(SnapshotApplyError::Incomplete)?;
        let mut raw_compressed = Vec::new();
        for index in 0..total {
            match self.chunks.get(&index) {
                Some(chunk) => raw_compressed.extend_from_slice(chunk),
                None => return Err(SnapshotApplyError::Incomplete),
            }
        }

        let raw = if raw_compressed.is_empty() {
            Vec::new()
        } else {
            decompress(&raw_compressed, raw_compressed.len() * 4).map_err(|_| SnapshotApplyError::MalformedPayload)?
        };

        if checksum(&raw) != claimed_checksum {
            self.progress = SnapshotProgress::Idle;
            self.fallback_requested = true;
            return Err(SnapshotApplyError::ChecksumMismatch);
        }

        let entities = decode_entities(&raw).ok_or(SnapshotApplyError::MalformedPayload)?;
        registry.replace_all(entities);

        let snapshot_tick = self.tick;
        let mut replayed = std::mem::take(&mut self.buffered_deltas);
        // StateUpdate ticks only ever grow across a session, so a plain stable sort by tick
        // is enough to restore the order they should have been applied in.
        replayed.make_contiguous().sort_by_key(|u| u.tick);

        *delta_applier = DeltaApplier::new();
        for update in replayed {
            if update.tick > snapshot_tick {
                let _ = delta_applier.apply(&update, registry);
            }
        }

        self.progress = SnapshotProgress::Complete;
        Ok(snapshot_tick)
    }
}

fn decode_entities(raw: &[u8]) -> Option<Vec<(EntityId, Vec<(ComponentId, Vec<u8>)>)>> {
    let mut buf = ByteBuffer::from_vec(raw.to_vec());
    let mut entities = Vec::new();

    while buf.remaining() > 0 {
        let entity_id = buf.read_u32::<LittleEndian>().ok()?;
        let component_count = buf.read_u16::<LittleEndian>().ok()?;
        let mut components = Vec::with_capacity(component_count as usize);
        for _ in 0..component_count {
            let component_id = buf.read_u8().ok()?;
            let len = buf.read_u16::<LittleEndian>().ok()?;
            let bytes = buf.read_bytes(len as usize).ok()?.to_vec();
            components.push((component_id, bytes));
        }
        entities.push((entity_id, components));
    }

    Some(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corenet::shared::NetworkResult;
    use netcore::net::compress::compress;
    use registry::Component;

    struct Marker;

    impl Component for Marker {
        const ID: ComponentId = 0;

        fn encode(&self, _out: &mut ByteBuffer) -> NetworkResult<()> {
            Ok(())
        }

        fn decode(_buf: &mut ByteBuffer) -> NetworkResult<Marker> {
            Ok(Marker)
        }
    }

    fn build_snapshot_bytes(entity_ids: &[u32]) -> (Vec<u8>, u32) {
        use byteorder::WriteBytesExt;
        let mut raw = ByteBuffer::new();
        for &id in entity_ids {
            raw.write_u32::<LittleEndian>(id).unwrap();
            raw.write_u16::<LittleEndian>(0).unwrap();
        }
        let raw_bytes = raw.into_vec();
        let crc = checksum(&raw_bytes);
        (raw_bytes, crc)
    }

    #[test]
    fn test_single_chunk_snapshot_applies_and_replaces_registry() {
        let (raw, crc) = build_snapshot_bytes(&[1, 2, 3]);
        let compressed = compress(&raw).unwrap();

        let mut receiver = SnapshotReceiver::new(16);
        receiver.begin(10, 1);
        receiver.push_chunk(0, compressed);

        let mut registry = Registry::new();
        let mut applier = DeltaApplier::new();
        let tick = receiver.finish(crc, raw.len() as u32, 3, &mut registry, &mut applier).unwrap();

        assert_eq!(tick, 10);
        assert_eq!(registry.entity_count(), 3);
        assert_eq!(receiver.progress(), SnapshotProgress::Complete);
        assert_eq!(receiver.total_bytes(), raw.len() as u32);
        assert_eq!(receiver.entity_count(), 3);
        assert!(!receiver.take_fallback_request());
    }

    #[test]
    fn test_checksum_mismatch_is_reported_and_registry_untouched() {
        let (raw, _crc) = build_snapshot_bytes(&[1]);
        let compressed = compress(&raw).unwrap();

        let mut receiver = SnapshotReceiver::new(16);
        receiver.begin(1, 1);
        receiver.push_chunk(0, compressed);

        let mut registry = Registry::new();
        registry.spawn();
        let mut applier = DeltaApplier::new();

        let result = receiver.finish(0xDEAD_BEEF, raw.len() as u32, 1, &mut registry, &mut applier);
        assert_eq!(result, Err(SnapshotApplyError::ChecksumMismatch));
        assert_eq!(registry.entity_count(), 1);
        assert!(receiver.take_fallback_request());
    }

    #[test]
    fn test_missing_chunk_is_reported_as_incomplete() {
        let mut receiver = SnapshotReceiver::new(16);
        receiver.begin(1, 2);
        receiver.push_chunk(0, vec![1, 2, 3]);

        let mut registry = Registry::new();
        let mut applier = DeltaApplier::new();
        assert_eq!(
            receiver.finish(0, 0, 0, &mut registry, &mut applier),
            Err(SnapshotApplyError::Incomplete)
        );
    }

    #[test]
    fn test_deltas_buffered_during_transfer_replay_after_newer_than_snapshot() {
        let (raw, crc) = build_snapshot_bytes(&[1]);
        let compressed = compress(&raw).unwrap();

        let mut receiver = SnapshotReceiver::new(16);
        receiver.begin(10, 1);

        assert!(receiver.buffer_delta_if_receiving(StateUpdate { tick: 11, changes: vec![] }));
        assert!(receiver.buffer_delta_if_receiving(StateUpdate { tick: 5, changes: vec![] }));

        receiver.push_chunk(0, compressed);

        let mut registry = Registry::new();
        let mut applier = DeltaApplier::new();
        receiver.finish(crc, raw.len() as u32, 1, &mut registry, &mut applier).unwrap();

        // Only the tick-11 delta is newer than the snapshot's tick 10; the stale tick-5
        // delta must not move the applier's cursor backward.
        assert_eq!(applier.last_applied_tick(), Some(11));
    }

    #[test]
    fn test_delta_buffering_is_a_noop_when_idle() {
        let mut receiver = SnapshotReceiver::new(16);
        assert!(!receiver.buffer_delta_if_receiving(StateUpdate { tick: 1, changes: vec![] }));
    }

    #[test]
    fn test_buffer_overflow_requests_a_fallback_snapshot() {
        let mut receiver = SnapshotReceiver::new(1);
        receiver.begin(10, 1);

        assert!(receiver.buffer_delta_if_receiving(StateUpdate { tick: 11, changes: vec![] }));
        assert!(!receiver.take_fallback_request());
        assert!(receiver.buffer_delta_if_receiving(StateUpdate { tick: 12, changes: vec![] }));
        assert!(receiver.take_fallback_request());
    }
}
