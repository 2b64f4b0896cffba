//! Round-trip time smoothing (section 4.10). An exponentially weighted moving average with
//! the same 1/8 gain TCP's RTT estimator uses: responsive enough to track real drift,
//! damped enough that one slow heartbeat doesn't swing the estimate wildly.

const SMOOTHING_GAIN: f64 = 1.0 / 8.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct RttTracker {
    smoothed_ms: Option<f64>,
}

impl RttTracker {
    pub fn new() -> RttTracker {
        RttTracker { smoothed_ms: None }
    }

    /// Folds in one observed round-trip sample (the elapsed time between sending a
    /// `Heartbeat` and receiving its `HeartbeatResponse`).
    pub fn sample(&mut self, rtt_ms: f64) {
        self.smoothed_ms = Some(match self.smoothed_ms {
            None => rtt_ms,
            Some(previous) => previous + SMOOTHING_GAIN * (rtt_ms - previous),
        });
    }

    pub fn smoothed_ms(&self) -> Option<f64> {
        self.smoothed_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_is_taken_verbatim() {
        let mut rtt = RttTracker::new();
        rtt.sample(100.0);
        assert_eq!(rtt.smoothed_ms(), Some(100.0));
    }

    #[test]
    fn test_later_samples_move_the_average_toward_them_gradually() {
        let mut rtt = RttTracker::new();
        rtt.sample(100.0);
        rtt.sample(900.0);

        let smoothed = rtt.smoothed_ms().unwrap();
        assert!(smoothed > 100.0 && smoothed < 900.0);
        // One sample at 1/8 gain should land close to 200, nowhere near the new sample.
        assert!(smoothed < 300.0);
    }
}
