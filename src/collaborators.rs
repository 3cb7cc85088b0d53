//! Interfaces to the systems the radio core depends on but does not own.
//!
//! The host (game server, voice-chat transport, scheduler) implements these
//! traits. `MemoryRadioStore` is the in-process store used by the headless
//! runner and tests.

use anyhow::Context;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::types::{BlockKind, BlockPos, Notice, PlayerId, Radio, RadioId, WorldPos};

/// Source of truth for radio records.
///
/// Every call returns owned snapshots; `save` is treated as fire-and-forget
/// by the core.
pub trait RadioStore: Send + Sync {
    fn all(&self) -> Vec<Radio>;
    fn get(&self, id: RadioId) -> Option<Radio>;
    fn save(&self, radio: &Radio);
    fn listeners_on(&self, channel: u16) -> Vec<Radio>;
    /// The enabled radio operated by `operator`. Disabled records that still
    /// name the player are ignored.
    fn by_operator(&self, operator: PlayerId) -> Option<Radio>;
}

/// Read-only view of the block world.
pub trait WorldView: Send + Sync {
    /// Kind of the block `offset` blocks above `position`, or `None` when the
    /// world or column is not available.
    fn block_above(&self, position: &BlockPos, offset: u32) -> Option<BlockKind>;
}

/// Online players and the channel used to tell them things.
pub trait PlayerDirectory: Send + Sync {
    /// Current location of an online player, `None` when offline.
    fn locate(&self, player: PlayerId) -> Option<WorldPos>;
    fn notify(&self, player: PlayerId, notice: Notice);
}

/// Audio output endpoint placed in the world.
pub trait AudioSink: Send + Sync {
    fn send(&self, frame: &[u8]);
    fn close(&self);
}

/// Voice transport: creates sinks and manages operator voice groups.
pub trait AudioTransport: Send + Sync {
    fn create_sink(&self, position: &WorldPos, radius: u32) -> Box<dyn AudioSink>;
    /// Isolate `operator` into the voice group of `channel` so nearby players
    /// only hear the radio, not the operator directly.
    fn bind_operator(&self, operator: PlayerId, channel: u16);
    fn unbind_operator(&self, operator: PlayerId);
}

/// A frame waiting to be written to a receiver's sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receiver: RadioId,
    pub channel: u16,
    pub frame: Vec<u8>,
}

/// Scheduler for deliveries that must wait a number of game ticks.
pub trait DelayedDispatch: Send + Sync {
    fn dispatch_after(&self, delay_ticks: u32, delivery: Delivery);
}

/// Radio store held in memory, ordered by id for deterministic iteration.
#[derive(Default)]
pub struct MemoryRadioStore {
    radios: Mutex<BTreeMap<RadioId, Radio>>,
}

impl MemoryRadioStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_radios(radios: impl IntoIterator<Item = Radio>) -> Self {
        let store = Self::new();
        for radio in radios {
            store.save(&radio);
        }
        store
    }

    /// Write every radio as a JSON array.
    pub fn write_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        let radios = self.all();
        let data = serde_json::to_string_pretty(&radios).context("Failed to encode radios")?;
        std::fs::write(path, data).with_context(|| format!("Failed to write radio snapshot: {}", path.display()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<RadioId, Radio>> {
        self.radios.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RadioStore for MemoryRadioStore {
    fn all(&self) -> Vec<Radio> {
        self.lock().values().cloned().collect()
    }

    fn get(&self, id: RadioId) -> Option<Radio> {
        self.lock().get(&id).cloned()
    }

    fn save(&self, radio: &Radio) {
        self.lock().insert(radio.id, radio.clone());
    }

    fn listeners_on(&self, channel: u16) -> Vec<Radio> {
        self.lock().values().filter(|r| r.listen_channel == channel).cloned().collect()
    }

    fn by_operator(&self, operator: PlayerId) -> Option<Radio> {
        self.lock().values().find(|r| r.enabled && r.operator == Some(operator)).cloned()
    }
}
