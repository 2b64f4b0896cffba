//! Reconnect backoff (section 4.10: "exponential backoff, capped, reset on success"). A
//! small standalone piece of arithmetic rather than a timer: the caller decides when "now"
//! is and asks this for how long to wait before the next attempt.

#[derive(Debug, Clone, Copy)]
pub struct ReconnectBackoff {
    initial_ms: u64,
    max_ms: u64,
    current_ms: u64,
}

impl ReconnectBackoff {
    pub fn new(initial_ms: u64, max_ms: u64) -> ReconnectBackoff {
        ReconnectBackoff {
            initial_ms,
            max_ms,
            current_ms: initial_ms,
        }
    }

    /// The delay to wait before the next attempt, doubling it for the attempt after that.
    pub fn next_delay_ms(&mut self) -> u64 {
        let delay = self.current_ms;
        self.current_ms = (self.current_ms.saturating_mul(2)).min(self.max_ms);
        delay
    }

    /// Back to the initial delay, called the moment a connect attempt actually succeeds
    /// (section 4.10: a long string of failures must not linger into the next outage).
    pub fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }
}
