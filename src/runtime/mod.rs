//! Headless runtime: in-memory collaborators, the scalable clock, the delayed
//! delivery queue and scene-driven voice traffic.
//!
//! `RadioSystem` wires the core components to in-memory stand-ins so the
//! whole radio stack can run without a game server:
//! - `MemoryRadioStore` for radio records
//! - `ColumnWorld` for the blocks above each radio
//! - `PlayerRoster` for operator positions and notices
//! - `RecordingTransport` for proximity sinks

pub mod clock;
pub mod delivery;
pub mod players;
pub mod scene;
pub mod transport;
pub mod voice;
pub mod world;

use std::sync::Arc;

use crate::audio::codec::CodecSupport;
use crate::audio::router::AudioRouter;
use crate::collaborators::{DelayedDispatch, MemoryRadioStore};
use crate::config::{ConfigHandle, RadioConfig};
use crate::control::RadioControl;
use crate::registry::ChannelRegistry;
use crate::supervisor::Supervisor;
use crate::types::Radio;
use delivery::RecordingDispatch;
use players::PlayerRoster;
use transport::RecordingTransport;
use world::ColumnWorld;

/// Every component of a running radio stack, backed by in-memory state.
pub struct RadioSystem {
    pub config: Arc<ConfigHandle>,
    pub store: Arc<MemoryRadioStore>,
    pub world: Arc<ColumnWorld>,
    pub players: Arc<PlayerRoster>,
    pub transport: Arc<RecordingTransport>,
    pub registry: Arc<ChannelRegistry>,
    pub router: Arc<AudioRouter>,
    pub control: Arc<RadioControl>,
    pub supervisor: Supervisor,
}

impl RadioSystem {
    pub fn new(config: Arc<ConfigHandle>, radios: Vec<Radio>, dispatcher: Arc<dyn DelayedDispatch>, codec: CodecSupport) -> Self {
        let store = Arc::new(MemoryRadioStore::with_radios(radios));
        let world = Arc::new(ColumnWorld::default());
        let players = Arc::new(PlayerRoster::new());
        let transport = Arc::new(RecordingTransport::new());
        let registry = Arc::new(ChannelRegistry::new(config.snapshot().max_channels()));
        let router = Arc::new(AudioRouter::new(store.clone(), transport.clone(), dispatcher, config.clone(), codec));
        let control = Arc::new(RadioControl::new(
            store.clone(),
            world.clone(),
            players.clone(),
            registry.clone(),
            router.clone(),
            config.clone(),
        ));
        let supervisor = Supervisor::new(control.clone());
        Self {
            config,
            store,
            world,
            players,
            transport,
            registry,
            router,
            control,
            supervisor,
        }
    }

    /// A system whose delayed frames are recorded instead of scheduled.
    ///
    /// The returned dispatcher holds every `(delay_ticks, delivery)` pair the
    /// router asked for; feed them to `router.deliver` to play them out.
    pub fn in_memory(config: RadioConfig, radios: Vec<Radio>) -> (Self, Arc<RecordingDispatch>) {
        let dispatch = Arc::new(RecordingDispatch::new());
        let system = Self::new(Arc::new(ConfigHandle::new(config)), radios, dispatch.clone(), CodecSupport::pcm16());
        (system, dispatch)
    }
}
