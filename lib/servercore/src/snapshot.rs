//! Server-side snapshot engine (section 4.12's "C12"): asynchronous full-state serialization
//! with a chunked handoff to the I/O worker.
//!
//! True incremental copy-on-write (shadowing each component's pre-mutation bytes as the
//! simulation thread writes through them) needs either unsafe shared mutable state or a
//! second lock taken on every `set_component`, neither of which this core signs up for.
//! Instead the generation thread is handed an owned clone of the registry
//! (`Registry::clone_snapshot_view`) taken synchronously on the calling thread at
//! `start(tick)` — a point-in-time view by construction, with every later mutation
//! necessarily landing in the *next* tick's delta rather than corrupting this snapshot. The
//! wire contract (`SnapshotStart`/`SnapshotChunk`/`SnapshotEnd`, checksum, chunk size) and the
//! observable behavior are unchanged; only the COW mechanism is simplified.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use netcore::net::compress::{checksum, compress};
use netcore::net::messages::{SnapshotChunk, SnapshotEnd, SnapshotStart};
use netcore::net::types::Tick;

use registry::{ComponentId, Registry};

/// Stay comfortably under `MAX_MESSAGE_SIZE` per chunk (section 4.12: "≈64 KiB per chunk").
pub const CHUNK_SIZE: usize = 64 * 1024;

pub struct SnapshotResult {
    pub tick: Tick,
    pub checksum: u32,
    pub entity_count: u32,
    pub total_bytes: u32,
    pub chunks: Vec<Vec<u8>>,
}

#[derive(Debug, Eq, PartialEq)]
pub enum SnapshotError {
    /// Section 4.12: "only one snapshot may be in flight."
    AlreadyInFlight,
}

pub struct SnapshotEngine {
    in_flight: Arc<AtomicBool>,
    result: Arc<Mutex<Option<SnapshotResult>>>,
}

impl SnapshotEngine {
    pub fn new() -> SnapshotEngine {
        SnapshotEngine {
            in_flight: Arc::new(AtomicBool::new(false)),
            result: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Takes an owned point-in-time view of `registry` on the calling thread, then hands the
    /// actual serialize/compress/chunk work to a background thread (section 4.12).
    pub fn start(&self, registry: &Registry, tick: Tick) -> Result<(), SnapshotError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(SnapshotError::AlreadyInFlight);
        }

        let view = registry.clone_snapshot_view();
        let in_flight = Arc::clone(&self.in_flight);
        let result_slot = Arc::clone(&self.result);

        thread::spawn(move || {
            let generated = generate(view, tick);
            *result_slot.lock().expect("snapshot result mutex poisoned") = Some(generated);
            in_flight.store(false, Ordering::Release);
        });

        Ok(())
    }

    /// Takes the completed result if generation has finished, leaving `None` behind.
    pub fn poll(&self) -> Option<SnapshotResult> {
        self.result.lock().expect("snapshot result mutex poisoned").take()
    }
}

impl Default for SnapshotEngine {
    fn default() -> SnapshotEngine {
        SnapshotEngine::new()
    }
}

fn generate(view: Vec<(u32, Vec<(ComponentId, Vec<u8>)>)>, tick: Tick) -> SnapshotResult {
    use byteorder::{LittleEndian, WriteBytesExt};
    use netcore::net::buffer::ByteBuffer;

    let entity_count = view.len() as u32;
    let mut raw = ByteBuffer::new();
    for (entity_id, components) in &view {
        let _ = raw.write_u32::<LittleEndian>(*entity_id);
        let _ = raw.write_u16::<LittleEndian>(components.len() as u16);
        for (component_id, bytes) in components {
            let _ = raw.write_u8(*component_id);
            let _ = raw.write_u16::<LittleEndian>(bytes.len() as u16);
            raw.write_bytes(bytes);
        }
    }

    let raw_bytes = raw.into_vec();
    let total_bytes = raw_bytes.len() as u32;
    let crc = checksum(&raw_bytes);
    let compressed = compress(&raw_bytes).unwrap_or(raw_bytes);
    let chunks = compressed.chunks(CHUNK_SIZE).map(|c| c.to_vec()).collect();

    SnapshotResult {
        tick,
        checksum: crc,
        entity_count,
        total_bytes,
        chunks,
    }
}

/// Builds the `SnapshotStart` / ordered `SnapshotChunk`s / `SnapshotEnd` triple a completed
/// result hands to the I/O worker (section 4.12's `get-snapshot-messages`).
pub fn snapshot_messages(result: &SnapshotResult) -> (SnapshotStart, Vec<SnapshotChunk>, SnapshotEnd) {
    let start = SnapshotStart {
        tick: result.tick,
        total_chunks: result.chunks.len() as u32,
    };
    let chunks = result
        .chunks
        .iter()
        .enumerate()
        .map(|(i, data)| SnapshotChunk {
            index: i as u32,
            data: data.clone(),
        })
        .collect();
    let end = SnapshotEnd {
        total_bytes: result.total_bytes,
        total_chunks: result.chunks.len() as u32,
        entity_count: result.entity_count,
        checksum: result.checksum,
    };
    (start, chunks, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corenet::shared::NetworkResult;
    use netcore::net::buffer::ByteBuffer;
    use registry::Component;
    use std::time::Duration;

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

    fn wait_for_result(engine: &SnapshotEngine) -> SnapshotResult {
        for _ in 0..200 {
            if let Some(result) = engine.poll() {
                return result;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("snapshot did not complete in time");
    }

    #[test]
    fn test_second_start_while_in_flight_is_rejected() {
        let mut registry = Registry::new();
        registry.spawn();

        let engine = SnapshotEngine::new();
        engine.start(&registry, 1).unwrap();
        let second = engine.start(&registry, 1);

        assert_eq!(second, Err(SnapshotError::AlreadyInFlight));
        wait_for_result(&engine);
    }

    #[test]
    fn test_snapshot_roundtrips_entity_count_and_checksum() {
        let mut registry = Registry::new();
        let e = registry.spawn();
        registry.set_component(e, &Marker).unwrap();

        let engine = SnapshotEngine::new();
        engine.start(&registry, 42).unwrap();
        let result = wait_for_result(&engine);

        assert_eq!(result.entity_count, 1);
        assert_eq!(result.tick, 42);
        assert!(!result.chunks.is_empty());

        let (start, chunks, end) = snapshot_messages(&result);
        assert_eq!(start.total_chunks, chunks.len() as u32);
        assert_eq!(end.checksum, result.checksum);
        assert_eq!(end.total_chunks, chunks.len() as u32);
        assert_eq!(end.entity_count, 1);
        assert_eq!(end.total_bytes, result.total_bytes);
        assert!(end.total_bytes > 0);
    }

    #[test]
    fn test_mutation_after_start_does_not_affect_in_flight_snapshot() {
        let mut registry = Registry::new();
        let e = registry.spawn();
        registry.set_component(e, &Marker).unwrap();

        let engine = SnapshotEngine::new();
        engine.start(&registry, 1).unwrap();

        // Mutating after the view was cloned must not change what the background thread
        // already captured.
        registry.spawn();

        let result = wait_for_result(&engine);
        assert_eq!(result.entity_count, 1);
    }
}
