//! Two-pass message validation (section 4.9's "C7"): a cheap raw pass that rejects
//! malformed envelopes before any payload is parsed, and a payload pass that checks
//! deserialized fields against world bounds the wire format alone can't express (a grid
//! coordinate is a valid `i16` long before it's a valid in-bounds tile).

use std::collections::HashMap;

use corenet::shared::ErrorType;

use crate::net::envelope::EnvelopeHeader;
use crate::net::messages::Input;
use crate::net::types::{GridRect, PlayerId};

/// World bounds the payload pass checks inputs against. Constructed once from the active
/// map size and handed to the validator at startup.
#[derive(Debug, Copy, Clone)]
pub struct WorldBounds {
    pub width: i16,
    pub height: i16,
}

impl WorldBounds {
    pub fn contains(&self, x: i16, y: i16) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }
}

/// Causes tracked by the per-cause counters (section 4.9's "diagnosability" requirement):
/// an operator watching these can tell a version-skewed client apart from an active probe.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RejectCause {
    MalformedEnvelope,
    UnknownType,
    VersionMismatch,
    PayloadTooLarge,
    OutOfBounds,
    WrongLength,
    IdentityMismatch,
}

#[derive(Default)]
pub struct Validator {
    bounds: Option<WorldBounds>,
    counters: HashMap<RejectCause, u64>,
}

impl Validator {
    pub fn new(bounds: WorldBounds) -> Validator {
        Validator {
            bounds: Some(bounds),
            counters: HashMap::new(),
        }
    }

    fn record(&mut self, cause: RejectCause) {
        *self.counters.entry(cause).or_insert(0) += 1;
    }

    pub fn count(&self, cause: RejectCause) -> u64 {
        *self.counters.get(&cause).unwrap_or(&0)
    }

    /// Raw pass: the envelope parsed cleanly, named a type we know, and isn't claiming a
    /// payload larger than we're willing to buffer.
    pub fn validate_raw(&mut self, header: &EnvelopeHeader, max_payload: u16) -> Result<(), ErrorType> {
        match header {
            EnvelopeHeader::Invalid => {
                self.record(RejectCause::MalformedEnvelope);
                Err(ErrorType::UnknownType)
            }
            EnvelopeHeader::Valid { payload_length, .. } if *payload_length > max_payload => {
                self.record(RejectCause::PayloadTooLarge);
                Err(ErrorType::PayloadTooLarge)
            }
            EnvelopeHeader::Valid { .. } => Ok(()),
        }
    }

    /// Payload pass for `Input`: the target tile must fall within the active map, and a
    /// command for a future tick (one the server hasn't simulated yet) is never valid.
    pub fn validate_input(&mut self, input: &Input, current_tick: u64) -> Result<(), RejectCause> {
        if input.tick > current_tick {
            self.record(RejectCause::OutOfBounds);
            return Err(RejectCause::OutOfBounds);
        }

        if let Some(bounds) = self.bounds {
            if !bounds.contains(input.target_x, input.target_y) {
                self.record(RejectCause::OutOfBounds);
                return Err(RejectCause::OutOfBounds);
            }
        }

        Ok(())
    }

    /// Payload pass's declared-length check (section 4.7): the envelope's `payload_length`
    /// must match exactly how many bytes deserialization actually consumed. A mismatch
    /// either means trailing garbage was appended, or the payload was truncated in a way
    /// that still happened to deserialize (e.g. a short string at the very end).
    pub fn validate_consumed_length(&mut self, declared: u16, consumed: usize) -> Result<(), RejectCause> {
        if declared as usize != consumed {
            self.record(RejectCause::WrongLength);
            return Err(RejectCause::WrongLength);
        }
        Ok(())
    }

    /// Identity-binding pass (section 4.7): a message carrying a `PlayerId` must match the
    /// id the connection it arrived on was assigned. Repeated mismatches are the caller's
    /// cue to kick (section 4's failure table); this function only counts and reports.
    pub fn validate_identity(&mut self, claimed: PlayerId, bound: PlayerId) -> Result<(), RejectCause> {
        if claimed != bound {
            self.record(RejectCause::IdentityMismatch);
            return Err(RejectCause::IdentityMismatch);
        }
        Ok(())
    }

    /// Payload pass for a terrain modification rectangle: both corners must be in bounds and
    /// correctly ordered.
    pub fn validate_rect(&mut self, rect: &GridRect) -> Result<(), RejectCause> {
        let ordered = rect.min.x <= rect.max.x && rect.min.y <= rect.max.y;
        let in_bounds = self
            .bounds
            .map(|b| b.contains(rect.min.x, rect.min.y) && b.contains(rect.max.x, rect.max.y))
            .unwrap_or(true);

        if !ordered || !in_bounds {
            self.record(RejectCause::OutOfBounds);
            return Err(RejectCause::OutOfBounds);
        }

        Ok(())
    }
}
