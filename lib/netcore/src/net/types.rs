//! Core wire-level identifiers and small enums shared across message payloads (section 3).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use corenet::shared::NetworkResult;

use crate::net::buffer::ByteBuffer;

/// Transport-level connection identifier. 0 is the reserved sentinel; never reused across
/// reconnects even when the `PlayerId` bound to it is preserved.
pub type PeerId = u32;
pub const INVALID_PEER_ID: PeerId = 0;

/// Logical participant identifier, in `[1, maxPlayers]`. 0 is reserved.
pub type PlayerId = u8;
pub const INVALID_PLAYER_ID: PlayerId = 0;

/// Per-direction monotonic message ordering counter.
pub type SequenceNumber = u32;

/// Discrete simulation step counter.
pub type Tick = u64;

/// ECS entity identifier. 0 is reserved as a null/sentinel value.
pub type EntityId = u32;
pub const INVALID_ENTITY_ID: EntityId = 0;

/// Up to 32 syncable component types, one bit per type (section 6's "Constants").
pub type ComponentMask = u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct GridPosition {
    pub x: i16,
    pub y: i16,
}

impl GridPosition {
    pub fn write(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        out.write_i16::<LittleEndian>(self.x)?;
        out.write_i16::<LittleEndian>(self.y)?;
        Ok(())
    }

    pub fn read(buf: &mut ByteBuffer) -> NetworkResult<GridPosition> {
        Ok(GridPosition {
            x: buf.read_i16::<LittleEndian>()?,
            y: buf.read_i16::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChangeKind {
    Created,
    Updated,
    Destroyed,
}

impl ChangeKind {
    pub fn to_u8(self) -> u8 {
        match self {
            ChangeKind::Created => 0,
            ChangeKind::Updated => 1,
            ChangeKind::Destroyed => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<ChangeKind> {
        match value {
            0 => Some(ChangeKind::Created),
            1 => Some(ChangeKind::Updated),
            2 => Some(ChangeKind::Destroyed),
            _ => None,
        }
    }

    /// Precedence rule from section 3/4.11: `Created` absorbs `Updated`; `Destroyed`
    /// overrides both and clears the mask.
    pub fn merge(existing: ChangeKind, incoming: ChangeKind) -> ChangeKind {
        match (existing, incoming) {
            (ChangeKind::Destroyed, _) => ChangeKind::Destroyed,
            (_, ChangeKind::Destroyed) => ChangeKind::Destroyed,
            (ChangeKind::Created, _) => ChangeKind::Created,
            (_, incoming) => incoming,
        }
    }
}

/// Input kinds. The precise gameplay vocabulary lives with the simulation; the network
/// core only needs the discriminant and its rate-limiter category (see `net::ratelimit`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InputType {
    PlaceBuilding,
    RemoveBuilding,
    ZoneTiles,
    UnzoneTiles,
    BuildInfrastructure,
    RemoveInfrastructure,
    SetTaxRate,
    SetBudgetAllocation,
    PauseSimulation,
    ResumeSimulation,
    SetSimulationSpeed,
}

impl InputType {
    pub fn to_u8(self) -> u8 {
        use InputType::*;
        match self {
            PlaceBuilding => 0,
            RemoveBuilding => 1,
            ZoneTiles => 2,
            UnzoneTiles => 3,
            BuildInfrastructure => 4,
            RemoveInfrastructure => 5,
            SetTaxRate => 6,
            SetBudgetAllocation => 7,
            PauseSimulation => 8,
            ResumeSimulation => 9,
            SetSimulationSpeed => 10,
        }
    }

    pub fn from_u8(value: u8) -> Option<InputType> {
        use InputType::*;
        Some(match value {
            0 => PlaceBuilding,
            1 => RemoveBuilding,
            2 => ZoneTiles,
            3 => UnzoneTiles,
            4 => BuildInfrastructure,
            5 => RemoveInfrastructure,
            6 => SetTaxRate,
            7 => SetBudgetAllocation,
            8 => PauseSimulation,
            9 => ResumeSimulation,
            10 => SetSimulationSpeed,
            _ => return None,
        })
    }

    /// The rate-limiter bucket (section 4.6) this input is charged against.
    pub fn category(self) -> crate::ratelimit::Category {
        use crate::ratelimit::Category;
        use InputType::*;
        match self {
            PlaceBuilding | RemoveBuilding => Category::Building,
            ZoneTiles | UnzoneTiles => Category::Zoning,
            BuildInfrastructure | RemoveInfrastructure => Category::Infrastructure,
            SetTaxRate | SetBudgetAllocation => Category::Economy,
            PauseSimulation | ResumeSimulation | SetSimulationSpeed => Category::GameControl,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JoinRejectReason {
    Full,
    NameTaken,
    WrongVersion,
    SessionExpired,
    InvalidToken,
    Other(u8),
}

impl JoinRejectReason {
    pub fn to_u8(self) -> u8 {
        match self {
            JoinRejectReason::Full => 0,
            JoinRejectReason::NameTaken => 1,
            JoinRejectReason::WrongVersion => 2,
            JoinRejectReason::SessionExpired => 3,
            JoinRejectReason::InvalidToken => 4,
            JoinRejectReason::Other(code) => code,
        }
    }

    pub fn from_u8(value: u8) -> JoinRejectReason {
        match value {
            0 => JoinRejectReason::Full,
            1 => JoinRejectReason::NameTaken,
            2 => JoinRejectReason::WrongVersion,
            3 => JoinRejectReason::SessionExpired,
            4 => JoinRejectReason::InvalidToken,
            other => JoinRejectReason::Other(other),
        }
    }
}

/// Kick reason codes. Open on the wire (section 9's resolved Open Question): an
/// unrecognized numeric reason decodes to `Other` instead of failing deserialization.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum KickReason {
    Idle,
    AdminAction,
    ProtocolViolation,
    Other(u8),
}

impl KickReason {
    pub fn to_u8(self) -> u8 {
        match self {
            KickReason::Idle => 0,
            KickReason::AdminAction => 1,
            KickReason::ProtocolViolation => 2,
            KickReason::Other(code) => code,
        }
    }

    pub fn from_u8(value: u8) -> KickReason {
        match value {
            0 => KickReason::Idle,
            1 => KickReason::AdminAction,
            2 => KickReason::ProtocolViolation,
            other => KickReason::Other(other),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RejectionReason {
    OutOfBounds,
    CannotAfford,
    NotOwned,
    InvalidState,
    Other(u8),
}

impl RejectionReason {
    pub fn to_u8(self) -> u8 {
        match self {
            RejectionReason::OutOfBounds => 0,
            RejectionReason::CannotAfford => 1,
            RejectionReason::NotOwned => 2,
            RejectionReason::InvalidState => 3,
            RejectionReason::Other(code) => code,
        }
    }

    pub fn from_u8(value: u8) -> RejectionReason {
        match value {
            0 => RejectionReason::OutOfBounds,
            1 => RejectionReason::CannotAfford,
            2 => RejectionReason::NotOwned,
            3 => RejectionReason::InvalidState,
            other => RejectionReason::Other(other),
        }
    }

    /// Default human-readable text for the `Rejection` message field (section 4.3). A
    /// gameplay-specific validator can still supply its own string; this only covers the
    /// reasons the network core itself knows about.
    pub fn message(self) -> &'static str {
        match self {
            RejectionReason::OutOfBounds => "target is outside the playable area",
            RejectionReason::CannotAfford => "insufficient funds",
            RejectionReason::NotOwned => "not owned by this player",
            RejectionReason::InvalidState => "invalid for the current simulation state",
            RejectionReason::Other(_) => "rejected",
        }
    }
}

/// Why a client asked for a fallback snapshot instead of continuing the transfer in flight
/// (section 4.12's failure table).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SnapshotRequestReason {
    ChecksumMismatch,
    DeltaBufferOverflow,
    Other(u8),
}

impl SnapshotRequestReason {
    pub fn to_u8(self) -> u8 {
        match self {
            SnapshotRequestReason::ChecksumMismatch => 0,
            SnapshotRequestReason::DeltaBufferOverflow => 1,
            SnapshotRequestReason::Other(code) => code,
        }
    }

    pub fn from_u8(value: u8) -> SnapshotRequestReason {
        match value {
            0 => SnapshotRequestReason::ChecksumMismatch,
            1 => SnapshotRequestReason::DeltaBufferOverflow,
            other => SnapshotRequestReason::Other(other),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ServerState {
    Initializing,
    Loading,
    Ready,
    Running,
}

impl ServerState {
    pub fn to_u8(self) -> u8 {
        match self {
            ServerState::Initializing => 0,
            ServerState::Loading => 1,
            ServerState::Ready => 2,
            ServerState::Running => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<ServerState> {
        Some(match value {
            0 => ServerState::Initializing,
            1 => ServerState::Loading,
            2 => ServerState::Ready,
            3 => ServerState::Running,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MapSizeTier {
    Small,
    Medium,
    Large,
}

impl MapSizeTier {
    pub fn to_u8(self) -> u8 {
        match self {
            MapSizeTier::Small => 0,
            MapSizeTier::Medium => 1,
            MapSizeTier::Large => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<MapSizeTier> {
        Some(match value {
            0 => MapSizeTier::Small,
            1 => MapSizeTier::Medium,
            2 => MapSizeTier::Large,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlayerStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

impl PlayerStatus {
    pub fn to_u8(self) -> u8 {
        match self {
            PlayerStatus::Connected => 0,
            PlayerStatus::Disconnected => 1,
            PlayerStatus::Reconnecting => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<PlayerStatus> {
        Some(match value {
            0 => PlayerStatus::Connected,
            1 => PlayerStatus::Disconnected,
            2 => PlayerStatus::Reconnecting,
            _ => return None,
        })
    }
}

/// Terrain modification kinds (section 3's terrain modification record).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TerrainOperation {
    Clear,
    Level,
    Grade,
    Other(u8),
}

impl TerrainOperation {
    pub fn to_u8(self) -> u8 {
        match self {
            TerrainOperation::Clear => 0,
            TerrainOperation::Level => 1,
            TerrainOperation::Grade => 2,
            TerrainOperation::Other(code) => code,
        }
    }

    pub fn from_u8(value: u8) -> TerrainOperation {
        match value {
            0 => TerrainOperation::Clear,
            1 => TerrainOperation::Level,
            2 => TerrainOperation::Grade,
            other => TerrainOperation::Other(other),
        }
    }
}

/// An axis-aligned rectangle of tiles, used by terrain modification records and events.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct GridRect {
    pub min: GridPosition,
    pub max: GridPosition,
}

impl GridRect {
    pub fn write(&self, out: &mut ByteBuffer) -> NetworkResult<()> {
        self.min.write(out)?;
        self.max.write(out)
    }

    pub fn read(buf: &mut ByteBuffer) -> NetworkResult<GridRect> {
        Ok(GridRect {
            min: GridPosition::read(buf)?,
            max: GridPosition::read(buf)?,
        })
    }
}
