//! Type definitions shared across the radio core.
//!
//! Contains the data structures every component reads or mutates:
//! - Identities for radios and players
//! - Block and continuous positions tagged with their world
//! - The `Radio` record owned by the external store
//! - Disable reasons, structure block kinds and fuel items

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest selectable range step (one fifth of the structural maximum).
pub const MIN_RANGE_STEP: u8 = 1;
/// Highest selectable range step (the full structural maximum).
pub const MAX_RANGE_STEP: u8 = 5;

/// Opaque identity of a placed radio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RadioId(pub u32);

impl fmt::Display for RadioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "radio#{}", self.0)
    }
}

/// Opaque identity of a connected player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

/// Integer block coordinates inside a named world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self { world: world.into(), x, y, z }
    }

    /// Center of the block in continuous coordinates.
    pub fn center(&self) -> WorldPos {
        WorldPos {
            world: self.world.clone(),
            x: self.x as f64 + 0.5,
            y: self.y as f64 + 0.5,
            z: self.z as f64 + 0.5,
        }
    }
}

/// Continuous coordinates inside a named world (players, audio sinks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldPos {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl WorldPos {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self { world: world.into(), x, y, z }
    }
}

/// Radio record as stored by the external radio store.
///
/// The core never creates or deletes radios. It only mutates the
/// `enabled`, `transmit_channel`, `operator`, `fuel_seconds`,
/// `antenna_count` and `max_range` fields (plus the operator-driven
/// listen channel, range step and fuel counters) and saves the record back.
///
/// Channel value `0` means "none" for both transmit and listen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Radio {
    pub id: RadioId,
    pub position: BlockPos,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub transmit_channel: u16,
    #[serde(default)]
    pub listen_channel: u16,
    #[serde(default)]
    pub operator: Option<PlayerId>,
    /// Remaining fuel in seconds of operation at burn rate 1.
    #[serde(default)]
    pub fuel_seconds: u64,
    /// Lifetime fuel ever added, in seconds.
    #[serde(default)]
    pub total_fuel_added: u64,
    #[serde(default)]
    pub antenna_count: u32,
    /// Structural maximum range in blocks.
    #[serde(default)]
    pub max_range: u32,
    #[serde(default = "default_range_step")]
    pub range_step: u8,
}

fn default_range_step() -> u8 {
    MAX_RANGE_STEP
}

impl Radio {
    /// A freshly placed, disabled radio with no channels and no fuel.
    pub fn placed(id: RadioId, position: BlockPos) -> Self {
        Self {
            id,
            position,
            enabled: false,
            transmit_channel: 0,
            listen_channel: 0,
            operator: None,
            fuel_seconds: 0,
            total_fuel_added: 0,
            antenna_count: 0,
            max_range: 0,
            range_step: MAX_RANGE_STEP,
        }
    }

    /// Operator-selected share of the structural maximum range, in blocks.
    pub fn final_range(&self) -> u32 {
        crate::range::final_range(self.range_step, self.max_range)
    }

    /// True when this radio is enabled and owns a transmit channel.
    pub fn is_transmitting(&self) -> bool {
        self.enabled && self.transmit_channel > 0
    }
}

/// Why a radio was forced out of the enabled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisableReason {
    /// Operator disconnected, changed world or walked out of range.
    OperatorLost,
    /// Explicit admin action or structural invalidation.
    Admin,
    /// Fuel reached zero.
    Fuel,
    /// Server shutting down.
    ServerStop,
    /// The radio block was removed from the world.
    BlockBroken,
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisableReason::OperatorLost => "OPERATOR_LOST",
            DisableReason::Admin => "ADMIN",
            DisableReason::Fuel => "FUEL",
            DisableReason::ServerStop => "SERVER_STOP",
            DisableReason::BlockBroken => "BLOCK_BROKEN",
        };
        f.write_str(name)
    }
}

/// Block kinds that matter to the antenna scan. Everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Terminator block of the antenna sandwich.
    Cap,
    /// One antenna element of the vertical run.
    Antenna,
    Other,
}

/// Items accepted as radio fuel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelItem {
    Ingot,
    Block,
}

/// Operator-facing notices. Formatting and localisation belong to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Enabled { radio: RadioId, channel: u16 },
    Disabled { radio: RadioId, reason: DisableReason },
    NoAntenna { radio: RadioId },
    ChannelBusy { channel: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placed_radio_starts_disabled_at_full_step() {
        let radio = Radio::placed(RadioId(7), BlockPos::new("overworld", 1, 64, 1));
        assert!(!radio.enabled);
        assert!(!radio.is_transmitting());
        assert_eq!(radio.range_step, MAX_RANGE_STEP);
        assert_eq!(radio.operator, None);
    }

    #[test]
    fn block_center_is_offset_by_half() {
        let center = BlockPos::new("w", -1, 10, 3).center();
        assert_eq!((center.x, center.y, center.z), (-0.5, 10.5, 3.5));
        assert_eq!(center.world, "w");
    }

    #[test]
    fn radio_deserializes_with_defaults() {
        let json = r#"{"id": 3, "position": {"world": "w", "x": 0, "y": 70, "z": 0}}"#;
        let radio: Radio = serde_json::from_str(json).unwrap();
        assert_eq!(radio.id, RadioId(3));
        assert_eq!(radio.range_step, MAX_RANGE_STEP);
        assert_eq!(radio.transmit_channel, 0);
        assert_eq!(radio.fuel_seconds, 0);
    }

    #[test]
    fn disable_reason_display_matches_wire_name() {
        assert_eq!(DisableReason::OperatorLost.to_string(), "OPERATOR_LOST");
        let encoded = serde_json::to_string(&DisableReason::ServerStop).unwrap();
        assert_eq!(encoded, "\"SERVER_STOP\"");
    }
}
