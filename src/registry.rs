//! Exclusive transmit-channel bookkeeping.
//!
//! At most one radio may transmit on a channel. Claims come from the
//! supervisor/control path while the audio path queries occupancy from
//! another thread, so every operation takes the same lock.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{Radio, RadioId};

#[derive(Debug)]
struct RegistryState {
    max_channels: u16,
    holders: BTreeMap<u16, RadioId>,
}

/// Channel number → holding radio, bounded by `max_channels`.
#[derive(Debug)]
pub struct ChannelRegistry {
    state: Mutex<RegistryState>,
}

impl ChannelRegistry {
    pub fn new(max_channels: u16) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                max_channels,
                holders: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_channels(&self) -> u16 {
        self.lock().max_channels
    }

    /// Record `channel -> radio`.
    ///
    /// Returns `false` without mutating when the channel is outside
    /// `1..=max_channels` or held by a different radio. Claiming a channel the
    /// radio already holds succeeds.
    pub fn claim(&self, channel: u16, radio: RadioId) -> bool {
        let mut state = self.lock();
        if channel < 1 || channel > state.max_channels {
            return false;
        }
        match state.holders.get(&channel) {
            Some(holder) if *holder != radio => false,
            _ => {
                state.holders.insert(channel, radio);
                true
            }
        }
    }

    /// Drop the mapping only if `radio` currently holds `channel`.
    pub fn release(&self, channel: u16, radio: RadioId) {
        let mut state = self.lock();
        if state.holders.get(&channel) == Some(&radio) {
            state.holders.remove(&channel);
        }
    }

    /// True iff `channel` is held by a radio other than `requester`.
    pub fn is_in_use(&self, channel: u16, requester: RadioId) -> bool {
        matches!(self.lock().holders.get(&channel), Some(holder) if *holder != requester)
    }

    pub fn holder(&self, channel: u16) -> Option<RadioId> {
        self.lock().holders.get(&channel).copied()
    }

    /// Clear and repopulate from the enabled radios whose transmit channel
    /// lies in range.
    pub fn rebuild<'a>(&self, radios: impl IntoIterator<Item = &'a Radio>) {
        let mut state = self.lock();
        Self::refill(&mut state, radios);
    }

    /// Change the channel ceiling and rebuild under the same lock.
    pub fn resize<'a>(&self, max_channels: u16, radios: impl IntoIterator<Item = &'a Radio>) {
        let mut state = self.lock();
        state.max_channels = max_channels;
        Self::refill(&mut state, radios);
    }

    /// Occupied channels in ascending order.
    pub fn occupied(&self) -> Vec<(u16, RadioId)> {
        self.lock().holders.iter().map(|(channel, radio)| (*channel, *radio)).collect()
    }

    fn refill<'a>(state: &mut RegistryState, radios: impl IntoIterator<Item = &'a Radio>) {
        state.holders.clear();
        for radio in radios {
            let tx = radio.transmit_channel;
            if radio.enabled && tx >= 1 && tx <= state.max_channels {
                state.holders.insert(tx, radio.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockPos;

    fn transmitter(id: u32, tx: u16, enabled: bool) -> Radio {
        let mut radio = Radio::placed(RadioId(id), BlockPos::new("w", 0, 64, 0));
        radio.transmit_channel = tx;
        radio.enabled = enabled;
        radio
    }

    #[test]
    fn claim_is_exclusive_until_release() {
        let registry = ChannelRegistry::new(9);
        assert!(registry.claim(3, RadioId(1)));
        assert!(!registry.claim(3, RadioId(2)));
        assert!(registry.is_in_use(3, RadioId(2)));
        assert!(!registry.is_in_use(3, RadioId(1)));

        registry.release(3, RadioId(1));
        assert!(registry.claim(3, RadioId(2)));
    }

    #[test]
    fn claim_is_idempotent_for_same_radio() {
        let registry = ChannelRegistry::new(9);
        assert!(registry.claim(4, RadioId(1)));
        assert!(registry.claim(4, RadioId(1)));
        assert_eq!(registry.occupied(), vec![(4, RadioId(1))]);
    }

    #[test]
    fn claim_rejects_out_of_range_channels() {
        let registry = ChannelRegistry::new(9);
        assert!(!registry.claim(0, RadioId(1)));
        assert!(!registry.claim(10, RadioId(1)));
        assert!(registry.occupied().is_empty());
    }

    #[test]
    fn release_by_non_holder_is_noop() {
        let registry = ChannelRegistry::new(9);
        registry.claim(2, RadioId(1));
        registry.release(2, RadioId(5));
        assert_eq!(registry.holder(2), Some(RadioId(1)));
        registry.release(7, RadioId(1));
        assert_eq!(registry.holder(2), Some(RadioId(1)));
    }

    #[test]
    fn rebuild_reflects_only_enabled_in_range_radios() {
        let registry = ChannelRegistry::new(9);
        registry.claim(1, RadioId(99)); // stale entry
        let radios = vec![
            transmitter(1, 2, true),
            transmitter(2, 3, false),
            transmitter(3, 12, true),
            transmitter(4, 0, true),
            transmitter(5, 9, true),
        ];
        registry.rebuild(&radios);

        assert_eq!(registry.occupied(), vec![(2, RadioId(1)), (9, RadioId(5))]);
        assert!(!registry.is_in_use(1, RadioId(0)));
        assert!(!registry.is_in_use(3, RadioId(0)));
        assert!(registry.is_in_use(9, RadioId(0)));
    }

    #[test]
    fn rebuild_excluding_holder_frees_channel() {
        let registry = ChannelRegistry::new(9);
        assert!(registry.claim(5, RadioId(1)));
        registry.rebuild(&[transmitter(1, 5, false)]);
        assert!(registry.claim(5, RadioId(2)));
    }

    #[test]
    fn resize_drops_channels_above_new_ceiling() {
        let registry = ChannelRegistry::new(128);
        let radios = vec![transmitter(1, 100, true), transmitter(2, 4, true)];
        registry.rebuild(&radios);
        assert_eq!(registry.occupied().len(), 2);

        registry.resize(9, &radios);
        assert_eq!(registry.max_channels(), 9);
        assert_eq!(registry.occupied(), vec![(4, RadioId(2))]);
        assert!(!registry.claim(100, RadioId(1)));
    }
}
