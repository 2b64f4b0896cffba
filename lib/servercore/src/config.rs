//! Server configuration (A1 in the expanded spec): a TOML-loadable, fully-defaulted struct
//! covering everything section 6's configuration surface names for the server binary.

use serde_derive::{Deserialize, Serialize};

use netcore::net::types::MapSizeTier;
use netcore::ratelimit::{BucketConfig, Category};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_port: u16,
    pub max_players: u8,
    pub map_size_tier: MapSizeTierConfig,
    pub tick_rate: u32,
    pub server_name: String,
    pub session_grace_period_ms: u64,
    pub heartbeat_warning_misses: u32,
    pub heartbeat_timeout_misses: u32,
    pub rate_limits: RateLimitConfig,
    pub logging: corenet::logging::LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            listen_port: 7777,
            max_players: 4,
            map_size_tier: MapSizeTierConfig::Medium,
            tick_rate: 20,
            server_name: "city-sim server".to_string(),
            session_grace_period_ms: 30_000,
            heartbeat_warning_misses: crate::connection::HEARTBEAT_WARNING_MISSES,
            heartbeat_timeout_misses: crate::connection::HEARTBEAT_TIMEOUT_MISSES,
            rate_limits: RateLimitConfig::default(),
            logging: corenet::logging::LoggingConfig::default(),
        }
    }
}

/// Serde-friendly mirror of `netcore::net::types::MapSizeTier` (that enum carries no serde
/// derives since it's part of the wire format, not the config format).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum MapSizeTierConfig {
    Small,
    Medium,
    Large,
}

impl From<MapSizeTierConfig> for MapSizeTier {
    fn from(value: MapSizeTierConfig) -> MapSizeTier {
        match value {
            MapSizeTierConfig::Small => MapSizeTier::Small,
            MapSizeTierConfig::Medium => MapSizeTier::Medium,
            MapSizeTierConfig::Large => MapSizeTier::Large,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub building: BucketSetting,
    pub zoning: BucketSetting,
    pub infrastructure: BucketSetting,
    pub economy: BucketSetting,
    pub game_control: BucketSetting,
    pub abuse_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> RateLimitConfig {
        RateLimitConfig {
            building: BucketSetting::from(Category::Building.default_config()),
            zoning: BucketSetting::from(Category::Zoning.default_config()),
            infrastructure: BucketSetting::from(Category::Infrastructure.default_config()),
            economy: BucketSetting::from(Category::Economy.default_config()),
            game_control: BucketSetting::from(Category::GameControl.default_config()),
            abuse_threshold: netcore::ratelimit::DEFAULT_ABUSE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketSetting {
    pub max_tokens: f64,
    pub refill_per_sec: f64,
}

impl From<BucketConfig> for BucketSetting {
    fn from(value: BucketConfig) -> BucketSetting {
        BucketSetting {
            max_tokens: value.max_tokens,
            refill_per_sec: value.refill_per_sec,
        }
    }
}

impl From<BucketSetting> for BucketConfig {
    fn from(value: BucketSetting) -> BucketConfig {
        BucketConfig {
            max_tokens: value.max_tokens,
            refill_per_sec: value.refill_per_sec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_spec_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_port, 7777);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.session_grace_period_ms, 30_000);
        assert_eq!(config.rate_limits.abuse_threshold, 100);
    }
}
