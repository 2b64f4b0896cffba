//! Client configuration (A1 in the expanded spec): a TOML-loadable, fully-defaulted struct
//! covering section 4.10's timing surface (reconnect backoff, heartbeat cadence, timeout
//! thresholds) for the client binary.

use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client_version: u8,
    pub player_name: String,
    pub heartbeat_interval_ms: u64,
    /// First reconnect attempt waits this long after a transient disconnect (section 4.10's
    /// "exponential backoff").
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// How long a `Join`/`Reconnect` is given to be answered before the attempt is abandoned.
    pub connect_timeout_ms: u64,
    /// Silence thresholds driving `TimeoutLevel` (section 4.10's staged degradation, not an
    /// immediate disconnect — that's the server's call via `Kick`/transport loss).
    pub timeout_indicator_ms: u64,
    pub timeout_banner_ms: u64,
    pub timeout_full_ui_ms: u64,
    /// How long a pending action waits for `InputAck`/`Rejection` before it's considered
    /// timed out (section 3's "Pending action (client)").
    pub pending_action_timeout_ms: u64,
    /// How long a resolved (confirmed/rejected/timed-out) pending action is kept around so
    /// the UI has a chance to observe its outcome before it's swept.
    pub pending_action_retention_ms: u64,
    /// Deltas buffered while a snapshot is in flight (section 4.12's "bounded buffer");
    /// beyond this, the client gives up waiting and falls back to re-requesting the sync.
    pub snapshot_delta_buffer_capacity: usize,
    pub logging: corenet::logging::LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            client_version: corenet::PROTOCOL_VERSION,
            player_name: "Mayor".to_string(),
            heartbeat_interval_ms: 1_000,
            initial_reconnect_delay_ms: 2_000,
            max_reconnect_delay_ms: 30_000,
            connect_timeout_ms: 10_000,
            timeout_indicator_ms: 2_000,
            timeout_banner_ms: 5_000,
            timeout_full_ui_ms: 15_000,
            pending_action_timeout_ms: 5_000,
            pending_action_retention_ms: 5_000,
            snapshot_delta_buffer_capacity: 256,
            logging: corenet::logging::LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_orders_timeout_thresholds_sensibly() {
        let config = ClientConfig::default();
        assert!(config.timeout_indicator_ms < config.timeout_banner_ms);
        assert!(config.timeout_banner_ms < config.timeout_full_ui_ms);
        assert!(config.initial_reconnect_delay_ms < config.max_reconnect_delay_ms);
    }
}
