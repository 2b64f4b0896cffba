use std::time::SystemTime;

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01)
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// Returns the current unix timestamp in milliseconds. Heartbeat and backoff timers on the
/// wire use millisecond resolution (section 6's configuration surface), while session grace
/// windows are checked in seconds.
#[inline]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_millis() as u64
}
