//! Top-level config for the `gamerunner` binary: the network-facing `ServerConfig` (owned
//! by `servercore`) plus the handful of settings that belong to the simulation side the
//! network core treats as an external collaborator (section 1: "ECS components for
//! population/terrain/economy ... is treated here as an external collaborator").

use serde_derive::{Deserialize, Serialize};
use std::path::Path;

use servercore::config::{MapSizeTierConfig, ServerConfig};

pub const DEFAULT_PORT: u16 = 7777;

/// Tile bounds for `InputHandler`'s range check (section 4.9), mirroring the
/// `(width, height)` pairs `servercore::server::world_bounds` uses internally for the
/// validator.
pub fn world_bounds_tiles(tier: MapSizeTierConfig) -> (i16, i16) {
    match tier {
        MapSizeTierConfig::Small => (128, 128),
        MapSizeTierConfig::Medium => (256, 256),
        MapSizeTierConfig::Large => (512, 512),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Simulation ticks advanced per second; independent of `ServerConfig::tick_rate`,
    /// which only governs housekeeping cadence, in case the two ever need to diverge.
    pub fps: u64,
    pub terrain_seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> SimulationConfig {
        SimulationConfig { fps: 20, terrain_seed: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GameConfig {
    pub server: ServerConfig,
    pub simulation: SimulationConfig,
}

impl GameConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> GameConfig {
        serdeconv::from_toml_file(path.as_ref()).unwrap_or_else(|err| {
            panic!("error loading game configuration file {:?}: {}", path.as_ref(), err)
        })
    }
}
