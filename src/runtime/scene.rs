//! Scene loading, parsing, and validation.
//!
//! A scene describes the starting state of a headless run:
//! - radios with their position, channels, fuel and antenna column
//! - online players and where they stand
//! - talkers, the players that send voice traffic for the whole run
//!
//! Radios that name an operator and a transmit channel are enabled through
//! `RadioControl::enable` when the scene is applied, so they go through the
//! same checks a real operator would.

use anyhow::{Context, bail};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use super::RadioSystem;
use super::voice::Talker;
use super::world::ColumnWorld;
use crate::control::EnableError;
use crate::types::{BlockKind, BlockPos, MAX_RANGE_STEP, MIN_RANGE_STEP, PlayerId, Radio, RadioId, WorldPos};

fn default_range_step() -> u8 {
    MAX_RANGE_STEP
}

fn default_tone() -> f64 {
    440.0
}

fn default_amplitude() -> i16 {
    8000
}

/// One radio block and its starting state.
#[derive(Debug, Clone, Deserialize)]
pub struct SceneRadio {
    pub id: u32,
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Transmit channel to enable on; 0 leaves the radio disabled.
    #[serde(default)]
    pub transmit: u16,
    #[serde(default)]
    pub listen: u16,
    #[serde(default)]
    pub operator: Option<u32>,
    /// Starting fuel in seconds.
    #[serde(default)]
    pub fuel: u64,
    #[serde(default = "default_range_step")]
    pub range_step: u8,
    /// Build a well-formed antenna structure with this many elements.
    #[serde(default)]
    pub antennas: Option<u32>,
    /// Explicit blocks above the radio, bottom first. Wins over `antennas`.
    #[serde(default)]
    pub column: Option<Vec<BlockKind>>,
}

impl SceneRadio {
    pub fn position(&self) -> BlockPos {
        BlockPos::new(self.world.clone(), self.x, self.y, self.z)
    }

    /// The radio record as it sits in the store before anything is enabled.
    pub fn to_radio(&self) -> Radio {
        let mut radio = Radio::placed(RadioId(self.id), self.position());
        radio.listen_channel = self.listen;
        radio.fuel_seconds = self.fuel;
        radio.total_fuel_added = self.fuel;
        radio.range_step = self.range_step;
        radio
    }

    fn column_blocks(&self) -> Option<Vec<BlockKind>> {
        self.column.clone().or_else(|| self.antennas.map(ColumnWorld::sandwich))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenePlayer {
    pub id: u32,
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ScenePlayer {
    pub fn position(&self) -> WorldPos {
        WorldPos::new(self.world.clone(), self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneTalker {
    pub player: u32,
    #[serde(default = "default_tone")]
    pub tone_hz: f64,
    #[serde(default = "default_amplitude")]
    pub amplitude: i16,
}

/// Root structure of a scene file.
#[derive(Debug, Clone, Deserialize)]
pub struct Scene {
    pub radios: Vec<SceneRadio>,
    #[serde(default)]
    pub players: Vec<ScenePlayer>,
    #[serde(default)]
    pub talkers: Vec<SceneTalker>,
}

/// What happened when a scene was applied to a system.
#[derive(Debug, Default)]
pub struct SceneStart {
    pub enabled: Vec<RadioId>,
    pub rejected: Vec<(RadioId, EnableError)>,
    /// Scene radios the system's store does not know.
    pub missing: Vec<RadioId>,
}

/// Load and validate a scene from a JSON file.
pub fn load_scene(path: &Path) -> anyhow::Result<Scene> {
    let data = fs::read_to_string(path).with_context(|| format!("Failed to read scene file: {}", path.display()))?;
    Scene::from_json_str(&data).with_context(|| format!("Invalid scene file: {}", path.display()))
}

impl Scene {
    pub fn from_json_str(data: &str) -> anyhow::Result<Self> {
        let scene: Scene = serde_json::from_str(data).context("Failed to parse scene JSON")?;
        scene.validate()?;
        Ok(scene)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut radio_ids = HashSet::new();
        for radio in &self.radios {
            if !radio_ids.insert(radio.id) {
                bail!("duplicate radio id {}", radio.id);
            }
            if !(MIN_RANGE_STEP..=MAX_RANGE_STEP).contains(&radio.range_step) {
                bail!("radio {}: range_step {} outside {MIN_RANGE_STEP}..={MAX_RANGE_STEP}", radio.id, radio.range_step);
            }
        }

        let mut player_ids = HashSet::new();
        for player in &self.players {
            if !player_ids.insert(player.id) {
                bail!("duplicate player id {}", player.id);
            }
        }
        for radio in &self.radios {
            if let Some(operator) = radio.operator {
                if !player_ids.contains(&operator) {
                    bail!("radio {}: operator {} is not a scene player", radio.id, operator);
                }
            }
        }
        for talker in &self.talkers {
            if !player_ids.contains(&talker.player) {
                bail!("talker {} is not a scene player", talker.player);
            }
            if !(talker.tone_hz > 0.0) {
                bail!("talker {}: tone_hz must be positive", talker.player);
            }
        }
        Ok(())
    }

    /// Radio records for the store, all disabled.
    pub fn radios(&self) -> Vec<Radio> {
        self.radios.iter().map(SceneRadio::to_radio).collect()
    }

    pub fn talkers(&self) -> Vec<Talker> {
        self.talkers
            .iter()
            .map(|talker| Talker {
                player: PlayerId(talker.player),
                tone_hz: talker.tone_hz,
                amplitude: talker.amplitude,
            })
            .collect()
    }

    /// Build the world, place the players and enable operated radios.
    ///
    /// `system` must have been created from `self.radios()`.
    pub fn apply(&self, system: &RadioSystem) -> SceneStart {
        for radio in &self.radios {
            if let Some(column) = radio.column_blocks() {
                system.world.set_column(&radio.position(), column);
            }
        }
        for player in &self.players {
            system.players.place(PlayerId(player.id), player.position());
        }

        let mut start = SceneStart::default();
        for radio in &self.radios {
            let id = RadioId(radio.id);
            let Some(range) = system.control.refresh_range(id) else {
                warn!("Scene radio {id} is not in the radio store");
                start.missing.push(id);
                continue;
            };
            debug!("{id}: {} antenna(s), max range {}", range.antenna_count, range.max_range);
            let Some(operator) = radio.operator else {
                continue;
            };
            if radio.transmit == 0 {
                continue;
            }
            match system.control.enable(id, PlayerId(operator), radio.transmit) {
                Ok(()) => start.enabled.push(id),
                Err(err) => {
                    warn!("Scene radio {id} not enabled: {err}");
                    start.rejected.push((id, err));
                }
            }
        }
        info!(
            "Scene applied: {} radio(s), {} enabled, {} missing, {} player(s)",
            self.radios.len(),
            start.enabled.len(),
            start.missing.len(),
            self.players.len()
        );
        start
    }
}
