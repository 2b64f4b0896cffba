//! Server-side terrain sync (section 4.13's "C13"): sent on join in place of a full terrain
//! snapshot. The payload is the map seed, size tier, and an ordered journal of modifications
//! since generation, covered by a single authoritative checksum; the client regenerates
//! terrain from the seed, replays the journal, and verifies its own checksum against it.

use netcore::net::compress::{checksum, compress};
use netcore::net::messages::TerrainSync;
use netcore::net::types::{GridRect, MapSizeTier, Tick};

/// Same chunk budget as the snapshot engine (section 4.12) — terrain sync reuses the exact
/// chunked-transport mechanism rather than inventing a second one.
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ModificationRecord {
    pub sequence: u32,
    pub rect: GridRect,
    pub operation: u8,
}

/// The append-only log of terrain edits since world generation (section 4.13: "an ordered
/// list of modification records since generation").
pub struct TerrainJournal {
    seed: u64,
    tier: MapSizeTier,
    modifications: Vec<ModificationRecord>,
    next_sequence: u32,
}

impl TerrainJournal {
    pub fn new(seed: u64, tier: MapSizeTier) -> TerrainJournal {
        TerrainJournal {
            seed,
            tier,
            modifications: Vec::new(),
            next_sequence: 1,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn tier(&self) -> MapSizeTier {
        self.tier
    }

    pub fn modifications(&self) -> &[ModificationRecord] {
        &self.modifications
    }

    /// Appends one modification and returns its sequence number, used to stamp the
    /// `TerrainModifiedEvent` broadcast to already-synced clients.
    pub fn record(&mut self, rect: GridRect, operation: u8) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);
        self.modifications.push(ModificationRecord { sequence, rect, operation });
        sequence
    }

    fn encode(&self) -> Vec<u8> {
        use byteorder::{LittleEndian, WriteBytesExt};
        use netcore::net::buffer::ByteBuffer;

        let mut out = ByteBuffer::new();
        let _ = out.write_u64::<LittleEndian>(self.seed);
        let _ = out.write_u8(self.tier.to_u8());
        let _ = out.write_u32::<LittleEndian>(self.modifications.len() as u32);
        for modification in &self.modifications {
            let _ = out.write_u32::<LittleEndian>(modification.sequence);
            let _ = modification.rect.write(&mut out);
            let _ = out.write_u8(modification.operation);
        }
        out.into_vec()
    }

    /// The checksum clients must reproduce after regenerating terrain and replaying the
    /// journal (section 4.13).
    pub fn checksum(&self) -> u32 {
        checksum(&self.encode())
    }

    pub fn verify(&self, claimed_checksum: u32) -> bool {
        self.checksum() == claimed_checksum
    }

    /// Builds the chunked `TerrainSync` sequence a newly-joined (or re-synced) peer receives
    /// in place of a full snapshot.
    pub fn sync_chunks(&self) -> Vec<TerrainSync> {
        let raw = self.encode();
        let compressed = compress(&raw).unwrap_or(raw);
        let pieces: Vec<&[u8]> = compressed.chunks(CHUNK_SIZE).collect();
        let total_chunks = pieces.len().max(1) as u32;

        if pieces.is_empty() {
            return vec![TerrainSync {
                chunk_index: 0,
                total_chunks,
                data: Vec::new(),
            }];
        }

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, data)| TerrainSync {
                chunk_index: index as u32,
                total_chunks,
                data: data.to_vec(),
            })
            .collect()
    }
}

/// Tracks which connected peers are still mid-terrain-sync, so the server knows whether a
/// `TerrainModifiedEvent` should be withheld (not yet applicable — the peer hasn't regenerated
/// terrain yet) or broadcast immediately.
#[derive(Default)]
pub struct TerrainSyncTracker {
    in_progress: hashbrown::HashSet<u32>,
}

impl TerrainSyncTracker {
    pub fn new() -> TerrainSyncTracker {
        TerrainSyncTracker::default()
    }

    pub fn begin(&mut self, peer: u32) {
        self.in_progress.insert(peer);
    }

    pub fn complete(&mut self, peer: u32) {
        self.in_progress.remove(&peer);
    }

    pub fn is_syncing(&self, peer: u32) -> bool {
        self.in_progress.contains(&peer)
    }
}

/// The outcome of comparing a client's `TerrainSyncVerify.checksum` against the journal's
/// authoritative value (section 4.13: mismatch triggers the snapshot fallback path).
pub enum VerifyOutcome {
    Matched,
    Mismatched,
}

pub fn verify_checksum(journal: &TerrainJournal, claimed: u32, tick: Tick) -> (VerifyOutcome, Tick) {
    if journal.verify(claimed) {
        (VerifyOutcome::Matched, tick)
    } else {
        (VerifyOutcome::Mismatched, tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcore::net::types::GridPosition;

    fn rect(x: i16, y: i16) -> GridRect {
        GridRect {
            min: GridPosition { x, y },
            max: GridPosition { x: x + 1, y: y + 1 },
        }
    }

    #[test]
    fn test_matching_checksum_verifies() {
        let mut journal = TerrainJournal::new(1234, MapSizeTier::Medium);
        journal.record(rect(0, 0), 0);
        journal.record(rect(5, 5), 1);

        let client_checksum = journal.checksum();
        assert!(journal.verify(client_checksum));
    }

    #[test]
    fn test_divergent_journal_fails_checksum() {
        let mut server_journal = TerrainJournal::new(1234, MapSizeTier::Medium);
        server_journal.record(rect(0, 0), 0);

        let mut client_journal = TerrainJournal::new(1234, MapSizeTier::Medium);
        client_journal.record(rect(1, 1), 0);

        assert!(!server_journal.verify(client_journal.checksum()));
    }

    #[test]
    fn test_sync_chunks_report_consistent_total() {
        let mut journal = TerrainJournal::new(42, MapSizeTier::Large);
        for i in 0..50 {
            journal.record(rect(i, i), 0);
        }

        let chunks = journal.sync_chunks();
        let total = chunks[0].total_chunks;
        assert_eq!(chunks.len() as u32, total);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
        }
    }

    #[test]
    fn test_modification_sequence_numbers_are_monotonic() {
        let mut journal = TerrainJournal::new(1, MapSizeTier::Small);
        let a = journal.record(rect(0, 0), 0);
        let b = journal.record(rect(1, 1), 0);
        assert!(b > a);
    }

    #[test]
    fn test_tracker_marks_and_clears_in_progress_sync() {
        let mut tracker = TerrainSyncTracker::new();
        tracker.begin(7);
        assert!(tracker.is_syncing(7));
        tracker.complete(7);
        assert!(!tracker.is_syncing(7));
    }
}
