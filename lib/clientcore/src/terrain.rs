//! Client-side terrain sync (section 4.13's "C13", client half): reassembles the chunked
//! `TerrainSync` journal, hands the decoded seed/tier/modifications to the terrain generator
//! (outside this crate's scope) and reports back the checksum of the exact bytes it received
//! so the server can confirm the client is now in sync.

use byteorder::{LittleEndian, ReadBytesExt};

use netcore::net::buffer::ByteBuffer;
use netcore::net::compress::{checksum, decompress};
use netcore::net::types::{GridRect, MapSizeTier, Tick};

#[derive(Debug, Clone, Copy)]
pub struct TerrainModificationRecord {
    pub sequence: u32,
    pub rect: GridRect,
    pub operation: u8,
}

/// The decoded contents of a terrain journal transfer: enough for a terrain generation
/// system to regenerate the map from `seed` and replay `modifications` in order. What to do
/// with them (building a heightmap, a tile grid, whatever the simulation actually renders)
/// is outside this crate's scope.
#[derive(Debug, Clone)]
pub struct TerrainState {
    pub seed: u64,
    pub tier: MapSizeTier,
    pub modifications: Vec<TerrainModificationRecord>,
}

#[derive(Debug, Eq, PartialEq)]
pub enum TerrainSyncError {
    MalformedPayload,
    Incomplete,
    UnknownMapSizeTier,
}

/// Reassembles one terrain sync transfer's chunks, exactly mirroring `SnapshotReceiver`'s
/// index-keyed buffering (chunks may arrive out of order).
#[derive(Default)]
pub struct TerrainSyncReceiver {
    total_chunks: Option<u32>,
    chunks: hashbrown::HashMap<u32, Vec<u8>>,
}

impl TerrainSyncReceiver {
    pub fn new() -> TerrainSyncReceiver {
        TerrainSyncReceiver::default()
    }

    pub fn begin(&mut self, total_chunks: u32) {
        self.total_chunks = Some(total_chunks);
        self.chunks.clear();
    }

    pub fn push_chunk(&mut self, index: u32, data: Vec<u8>) {
        self.chunks.insert(index, data);
    }

    pub fn is_in_progress(&self) -> bool {
        self.total_chunks.is_some()
    }

    /// Concatenates and decompresses the buffered chunks, parses the journal, and returns
    /// both the decoded state and the checksum of the raw bytes — the same checksum the
    /// server computed over its own journal encoding, which the caller echoes back in a
    /// `TerrainSyncVerify` (section 4.13: "client ... computes its own checksum").
    pub fn finish(&mut self) -> Result<(TerrainState, u32), TerrainSyncError> {
        let total = self.total_chunks.take().ok_or(TerrainSyncError::Incomplete)?;

        let mut compressed = Vec::new();
        for index in 0..total {
            match self.chunks.remove(&index) {
                Some(chunk) => compressed.extend_from_slice(&chunk),
                None => return Err(TerrainSyncError::Incomplete),
            }
        }

        let raw = if compressed.is_empty() {
            Vec::new()
        } else {
            decompress(&compressed, compressed.len() * 4).map_err(|_| TerrainSyncError::MalformedPayload)?
        };

        let crc = checksum(&raw);
        let state = decode_state(&raw)?;
        Ok((state, crc))
    }
}

fn decode_state(raw: &[u8]) -> Result<TerrainState, TerrainSyncError> {
    let mut buf = ByteBuffer::from_vec(raw.to_vec());

    let seed = buf.read_u64::<LittleEndian>().map_err(|_| TerrainSyncError::MalformedPayload)?;
    let tier_byte = buf.read_u8().map_err(|_| TerrainSyncError::MalformedPayload)?;
    let tier = MapSizeTier::from_u8(tier_byte).ok_or(TerrainSyncError::UnknownMapSizeTier)?;
    let count = buf.read_u32::<LittleEndian>().map_err(|_| TerrainSyncError::MalformedPayload)?;

    let mut modifications = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let sequence = buf.read_u32::<LittleEndian>().map_err(|_| TerrainSyncError::MalformedPayload)?;
        let rect = GridRect::read(&mut buf).map_err(|_| TerrainSyncError::MalformedPayload)?;
        let operation = buf.read_u8().map_err(|_| TerrainSyncError::MalformedPayload)?;
        modifications.push(TerrainModificationRecord { sequence, rect, operation });
    }

    Ok(TerrainState { seed, tier, modifications })
}

/// Applies one live `TerrainModifiedEvent` (received after the initial sync completed) to an
/// already-synced `TerrainState`, keeping it consistent with what a fresh resync would yield.
pub fn append_live_modification(state: &mut TerrainState, tick: Tick, rect: GridRect, operation: u8) {
    let _ = tick;
    let next_sequence = state.modifications.last().map(|m| m.sequence + 1).unwrap_or(1);
    state.modifications.push(TerrainModificationRecord {
        sequence: next_sequence,
        rect,
        operation,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcore::net::compress::compress;
    use netcore::net::types::GridPosition;
    use servercore::terrain::TerrainJournal;

    fn rect(x: i16, y: i16) -> GridRect {
        GridRect {
            min: GridPosition { x, y },
            max: GridPosition { x: x + 1, y: y + 1 },
        }
    }

    #[test]
    fn test_reassembled_journal_checksum_matches_the_server_authoritative_one() {
        let mut journal = TerrainJournal::new(1234, MapSizeTier::Medium);
        journal.record(rect(0, 0), 0);
        journal.record(rect(5, 5), 1);

        let chunks = journal.sync_chunks();
        let mut receiver = TerrainSyncReceiver::new();
        receiver.begin(chunks[0].total_chunks);
        for chunk in &chunks {
            receiver.push_chunk(chunk.chunk_index, chunk.data.clone());
        }

        let (state, crc) = receiver.finish().unwrap();
        assert_eq!(state.seed, 1234);
        assert_eq!(state.modifications.len(), 2);
        assert_eq!(crc, journal.checksum());
    }

    #[test]
    fn test_missing_chunk_is_reported_as_incomplete() {
        let mut receiver = TerrainSyncReceiver::new();
        receiver.begin(2);
        receiver.push_chunk(0, compress(&[1, 2, 3]).unwrap());

        assert_eq!(receiver.finish(), Err(TerrainSyncError::Incomplete));
    }

    #[test]
    fn test_live_modification_gets_the_next_sequence_number() {
        let mut state = TerrainState {
            seed: 1,
            tier: MapSizeTier::Small,
            modifications: vec![TerrainModificationRecord {
                sequence: 1,
                rect: rect(0, 0),
                operation: 0,
            }],
        };

        append_live_modification(&mut state, 1, rect(9, 9), 1);
        assert_eq!(state.modifications.last().unwrap().sequence, 2);
    }
}
