//! Operator and admin operations on radios, and the shared disable path.
//!
//! Every state-changing operation runs under one mutation lock so that an
//! enable racing a supervisor disable can never leave the store and the
//! channel registry disagreeing. The supervisor takes the same lock through
//! `RadioControl::begin` for each radio it evaluates.
//!
//! The audio router never takes this lock; it only reads store snapshots.

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::audio::router::AudioRouter;
use crate::collaborators::{PlayerDirectory, RadioStore, WorldView};
use crate::config::{ChannelMode, ConfigHandle, RadioConfig, SLIDER_CHANNEL_CAP};
use crate::range::{self, RangeSnapshot};
use crate::registry::ChannelRegistry;
use crate::types::{DisableReason, FuelItem, MAX_RANGE_STEP, MIN_RANGE_STEP, Notice, PlayerId, RadioId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnableError {
    #[error("{0} does not exist")]
    RadioNotFound(RadioId),
    #[error("{0} is not online")]
    OperatorOffline(PlayerId),
    #[error("radio is in world {radio_world} but the operator is in {operator_world}")]
    WorldMismatch { radio_world: String, operator_world: String },
    #[error("channel {channel} is outside 1..={max}")]
    ChannelOutOfRange { channel: u16, max: u16 },
    #[error("{operator} already operates {radio}")]
    OperatorBusy { operator: PlayerId, radio: RadioId },
    #[error("{radio} is already operated by {operator}")]
    RadioOperated { radio: RadioId, operator: PlayerId },
    #[error("channel {0} is in use")]
    ChannelBusy(u16),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("{0} does not exist")]
    RadioNotFound(RadioId),
    #[error("channel {channel} is outside {min}..={max}")]
    OutOfRange { channel: u16, min: u16, max: u16 },
    #[error("channel {0} is in use")]
    InUse(u16),
}

/// One occupied transmit channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveChannel {
    pub channel: u16,
    pub radio: RadioId,
    pub operator: Option<PlayerId>,
    pub world: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelOverview {
    pub total: u16,
    pub active: Vec<ActiveChannel>,
    pub available: u16,
}

/// Proof that the caller holds the mutation lock.
pub struct MutationGuard<'a> {
    _lock: MutexGuard<'a, ()>,
}

pub struct RadioControl {
    store: Arc<dyn RadioStore>,
    world: Arc<dyn WorldView>,
    players: Arc<dyn PlayerDirectory>,
    registry: Arc<ChannelRegistry>,
    router: Arc<AudioRouter>,
    config: Arc<ConfigHandle>,
    mutation: Mutex<()>,
}

impl RadioControl {
    /// Wire up the control surface and seed the registry from the store.
    pub fn new(
        store: Arc<dyn RadioStore>,
        world: Arc<dyn WorldView>,
        players: Arc<dyn PlayerDirectory>,
        registry: Arc<ChannelRegistry>,
        router: Arc<AudioRouter>,
        config: Arc<ConfigHandle>,
    ) -> Self {
        registry.resize(config.snapshot().max_channels(), &store.all());
        Self {
            store,
            world,
            players,
            registry,
            router,
            config,
            mutation: Mutex::new(()),
        }
    }

    /// Take the mutation lock for a sequence of operations.
    pub fn begin(&self) -> MutationGuard<'_> {
        MutationGuard {
            _lock: self.mutation.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn store(&self) -> &dyn RadioStore {
        self.store.as_ref()
    }

    pub fn world(&self) -> &dyn WorldView {
        self.world.as_ref()
    }

    pub fn players(&self) -> &dyn PlayerDirectory {
        self.players.as_ref()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn router(&self) -> &AudioRouter {
        &self.router
    }

    pub fn config(&self) -> Arc<RadioConfig> {
        self.config.snapshot()
    }

    fn rebuild_registry(&self) {
        self.registry.rebuild(&self.store.all());
    }

    /// Put `operator` in charge of `radio_id`, transmitting on `channel`.
    pub fn enable(&self, radio_id: RadioId, operator: PlayerId, channel: u16) -> Result<(), EnableError> {
        let _guard = self.begin();
        let config = self.config.snapshot();

        let mut radio = self.store.get(radio_id).ok_or(EnableError::RadioNotFound(radio_id))?;
        let location = self.players.locate(operator).ok_or(EnableError::OperatorOffline(operator))?;
        if config.restrict_to_world && location.world != radio.position.world {
            return Err(EnableError::WorldMismatch {
                radio_world: radio.position.world.clone(),
                operator_world: location.world,
            });
        }

        let max = self.registry.max_channels();
        if channel < 1 || channel > max {
            return Err(EnableError::ChannelOutOfRange { channel, max });
        }
        if let Some(other) = self.store.by_operator(operator) {
            if other.id != radio_id {
                return Err(EnableError::OperatorBusy { operator, radio: other.id });
            }
        }
        if let Some(current) = radio.operator {
            if radio.enabled && current != operator {
                return Err(EnableError::RadioOperated { radio: radio_id, operator: current });
            }
        }

        if self.registry.is_in_use(channel, radio_id) || !self.registry.claim(channel, radio_id) {
            debug!("{radio_id} could not claim channel {channel}");
            self.players.notify(operator, Notice::ChannelBusy { channel });
            return Err(EnableError::ChannelBusy(channel));
        }
        if radio.enabled && radio.transmit_channel != channel {
            self.registry.release(radio.transmit_channel, radio_id);
        }

        radio.transmit_channel = channel;
        radio.operator = Some(operator);
        radio.enabled = true;
        self.store.save(&radio);
        self.rebuild_registry();

        self.router.bind_operator(operator, channel);
        self.players.notify(operator, Notice::Enabled { radio: radio_id, channel });
        info!("{radio_id} enabled on channel {channel} by {operator}");
        Ok(())
    }

    /// Force `radio_id` out of the enabled state. No-op when already disabled.
    pub fn disable(&self, radio_id: RadioId, reason: DisableReason) -> bool {
        let guard = self.begin();
        self.disable_with(&guard, radio_id, reason)
    }

    /// Disable path for callers already holding the mutation lock.
    ///
    /// Releases the channel, unbinds the operator's voice group, removes the
    /// radio's sink, clears `enabled` and `operator`, persists, rebuilds the
    /// registry and tells the former operator why.
    pub fn disable_with(&self, _guard: &MutationGuard<'_>, radio_id: RadioId, reason: DisableReason) -> bool {
        let Some(mut radio) = self.store.get(radio_id) else {
            return false;
        };
        if !radio.enabled {
            return false;
        }

        if radio.transmit_channel > 0 {
            self.registry.release(radio.transmit_channel, radio_id);
        }
        let operator = radio.operator.take();
        if let Some(operator) = operator {
            self.router.unbind_operator(operator);
        }
        self.router.remove_sink(radio_id);

        radio.enabled = false;
        self.store.save(&radio);
        self.rebuild_registry();

        if let Some(operator) = operator {
            self.players.notify(operator, Notice::Disabled { radio: radio_id, reason });
        }
        info!("{radio_id} disabled: {reason}");
        true
    }

    /// Change the transmit channel.
    ///
    /// An enabled radio must keep a channel, so `0` is only accepted while
    /// disabled. For an enabled radio the new channel is claimed before the
    /// old one is released, and the operator follows to the new voice group.
    pub fn set_transmit_channel(&self, radio_id: RadioId, channel: u16) -> Result<(), ChannelError> {
        let _guard = self.begin();
        let mut radio = self.store.get(radio_id).ok_or(ChannelError::RadioNotFound(radio_id))?;
        let max = self.registry.max_channels();
        let min = if radio.enabled { 1 } else { 0 };
        if channel < min || channel > max {
            return Err(ChannelError::OutOfRange { channel, min, max });
        }
        if channel == radio.transmit_channel {
            return Ok(());
        }
        if channel > 0 && self.registry.is_in_use(channel, radio_id) {
            return Err(ChannelError::InUse(channel));
        }

        if radio.enabled {
            if !self.registry.claim(channel, radio_id) {
                return Err(ChannelError::InUse(channel));
            }
            self.registry.release(radio.transmit_channel, radio_id);
        }
        let previous = radio.transmit_channel;
        radio.transmit_channel = channel;
        self.store.save(&radio);

        if radio.enabled {
            self.rebuild_registry();
            if let Some(operator) = radio.operator {
                self.router.unbind_operator(operator);
                self.router.bind_operator(operator, channel);
            }
            info!("{radio_id} moved from channel {previous} to {channel}");
        }
        Ok(())
    }

    /// Change the listen channel. `0` stops listening and removes the sink.
    pub fn set_listen_channel(&self, radio_id: RadioId, channel: u16) -> Result<(), ChannelError> {
        let _guard = self.begin();
        let mut radio = self.store.get(radio_id).ok_or(ChannelError::RadioNotFound(radio_id))?;
        let max = self.registry.max_channels();
        if channel > max {
            return Err(ChannelError::OutOfRange { channel, min: 0, max });
        }
        radio.listen_channel = channel;
        self.store.save(&radio);
        if channel == 0 {
            self.router.remove_sink(radio_id);
        }
        Ok(())
    }

    /// Set the range step, clamped to `1..=5`. Returns the stored step.
    pub fn set_range_step(&self, radio_id: RadioId, step: u8) -> Option<u8> {
        let _guard = self.begin();
        let mut radio = self.store.get(radio_id)?;
        radio.range_step = step.clamp(MIN_RANGE_STEP, MAX_RANGE_STEP);
        self.store.save(&radio);
        Some(radio.range_step)
    }

    /// Add `count` fuel items. Returns the new fuel level in seconds.
    pub fn add_fuel(&self, radio_id: RadioId, item: FuelItem, count: u32) -> Option<u64> {
        let _guard = self.begin();
        let mut radio = self.store.get(radio_id)?;
        let config = self.config.snapshot();
        let per_item = match item {
            FuelItem::Ingot => config.fuel_per_ingot,
            FuelItem::Block => config.fuel_per_block,
        };
        let seconds = per_item.saturating_mul(count as u64);
        radio.fuel_seconds = radio.fuel_seconds.saturating_add(seconds);
        radio.total_fuel_added = radio.total_fuel_added.saturating_add(seconds);
        self.store.save(&radio);
        debug!("{radio_id} fuelled with {count} x {item:?} (+{seconds} s)");
        Some(radio.fuel_seconds)
    }

    /// Rescan the antenna structure of `radio_id` and persist the result.
    pub fn refresh_range(&self, radio_id: RadioId) -> Option<RangeSnapshot> {
        let _guard = self.begin();
        let mut radio = self.store.get(radio_id)?;
        let snapshot = range::recompute(self.world.as_ref(), &mut radio, self.config.snapshot().max_antenna_scan);
        self.store.save(&radio);
        Some(snapshot)
    }

    /// Disable every enabled radio transmitting on `channel`. Returns how many.
    pub fn free_channel(&self, channel: u16) -> usize {
        let guard = self.begin();
        let holders: Vec<RadioId> = self.store.all().into_iter().filter(|r| r.enabled && r.transmit_channel == channel).map(|r| r.id).collect();
        holders.into_iter().filter(|id| self.disable_with(&guard, *id, DisableReason::Admin)).count()
    }

    /// Switch channel mode. `slider_channels` applies to slider mode and is
    /// clamped to `1..=1024`. Returns how many radios were disabled.
    pub fn set_channel_mode(&self, mode: ChannelMode, slider_channels: Option<u16>) -> usize {
        let mut next = RadioConfig::clone(&self.config.snapshot());
        next.channel_mode = mode;
        if let (ChannelMode::Slider, Some(channels)) = (mode, slider_channels) {
            next.slider_channels = channels.clamp(1, SLIDER_CHANNEL_CAP);
        }
        self.apply_config(next)
    }

    /// Swap in a new configuration.
    ///
    /// Radios transmitting above the new channel ceiling are disabled with
    /// `Admin` first, then the registry is resized and rebuilt. Returns how
    /// many radios were disabled.
    pub fn apply_config(&self, config: RadioConfig) -> usize {
        let guard = self.begin();
        let max = config.max_channels();
        let over: Vec<RadioId> = self.store.all().into_iter().filter(|r| r.enabled && r.transmit_channel > max).map(|r| r.id).collect();
        let disabled = over.into_iter().filter(|id| self.disable_with(&guard, *id, DisableReason::Admin)).count();

        self.config.replace(config);
        self.registry.resize(max, &self.store.all());
        if disabled > 0 {
            warn!("Channel ceiling now {max}, {disabled} radio(s) disabled");
        } else {
            info!("Channel ceiling now {max}");
        }
        disabled
    }

    pub fn channel_overview(&self) -> ChannelOverview {
        let total = self.registry.max_channels();
        let active: Vec<ActiveChannel> = self
            .registry
            .occupied()
            .into_iter()
            .map(|(channel, radio_id)| {
                let radio = self.store.get(radio_id);
                ActiveChannel {
                    channel,
                    radio: radio_id,
                    operator: radio.as_ref().and_then(|r| r.operator),
                    world: radio.map(|r| r.position.world).unwrap_or_default(),
                }
            })
            .collect();
        let available = total.saturating_sub(active.len() as u16);
        ChannelOverview { total, active, available }
    }

    /// Close every sink and disable every enabled radio with `ServerStop`.
    pub fn shutdown(&self) -> usize {
        let guard = self.begin();
        let closed = self.router.close_all_sinks();
        let enabled: Vec<RadioId> = self.store.all().into_iter().filter(|r| r.enabled).map(|r| r.id).collect();
        let disabled = enabled.into_iter().filter(|id| self.disable_with(&guard, *id, DisableReason::ServerStop)).count();
        info!("Shutdown: {closed} sink(s) closed, {disabled} radio(s) disabled");
        disabled
    }

    /// The radio block was broken.
    pub fn radio_removed(&self, radio_id: RadioId) -> bool {
        let guard = self.begin();
        let disabled = self.disable_with(&guard, radio_id, DisableReason::BlockBroken);
        self.router.remove_sink(radio_id);
        disabled
    }
}
