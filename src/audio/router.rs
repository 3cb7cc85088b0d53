//! Per-frame fan-out from a transmitting operator to every tuned receiver.
//!
//! Each inbound voice frame:
//! 1) resolves the sender's enabled, channel-holding radio (or is ignored),
//! 2) enumerates the other radios listening on that channel,
//! 3) per receiver: places the sink, measures the link, draws the drop,
//!    mixes noise when far enough and schedules or performs delivery.
//!
//! A failure for one receiver never affects the others. Codec failures fall
//! back to the clean frame.

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::codec::{CodecError, CodecSupport, VoiceCodec};
use super::noise::NoiseSynthesizer;
use super::profile::{delay_ticks, drop_probability, target_snr_db};
use super::sinks::SinkRegistry;
use crate::collaborators::{AudioTransport, DelayedDispatch, Delivery, RadioStore};
use crate::config::ConfigHandle;
use crate::geometry::link_distance;
use crate::types::{PlayerId, Radio, RadioId};

/// Router counters, all monotonically increasing.
#[derive(Debug, Default)]
struct RouterCounters {
    frames: AtomicU64,
    delivered: AtomicU64,
    delayed: AtomicU64,
    dropped: AtomicU64,
    degraded: AtomicU64,
    codec_fallbacks: AtomicU64,
    discarded_stale: AtomicU64,
}

/// Point-in-time copy of the router counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    /// Frames from an operator of a transmitting radio.
    pub frames: u64,
    /// Frames written to a sink, immediately or after a delay.
    pub delivered: u64,
    /// Per-receiver copies handed to the delayed dispatcher.
    pub delayed: u64,
    /// Per-receiver copies lost to the drop draw.
    pub dropped: u64,
    /// Per-receiver copies with noise mixed in.
    pub degraded: u64,
    /// Copies sent clean because decoding or encoding failed.
    pub codec_fallbacks: u64,
    /// Delayed copies whose receiver or sink was gone when they fell due.
    pub discarded_stale: u64,
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// The transmitting radio, `None` when the sender operates nothing.
    pub transmitter: Option<RadioId>,
    pub channel: u16,
    pub delivered: Vec<RadioId>,
    pub delayed: Vec<(RadioId, u32)>,
    pub dropped: Vec<RadioId>,
}

pub struct AudioRouter {
    store: Arc<dyn RadioStore>,
    transport: Arc<dyn AudioTransport>,
    dispatcher: Arc<dyn DelayedDispatch>,
    config: Arc<ConfigHandle>,
    codec: CodecSupport,
    sinks: SinkRegistry,
    /// Operator → voice group channel, for operators this router isolated.
    bindings: Mutex<BTreeMap<PlayerId, u16>>,
    rng: Mutex<StdRng>,
    counters: RouterCounters,
}

impl AudioRouter {
    /// Build a router. The RNG is seeded from `[audio] seed` when set.
    pub fn new(
        store: Arc<dyn RadioStore>,
        transport: Arc<dyn AudioTransport>,
        dispatcher: Arc<dyn DelayedDispatch>,
        config: Arc<ConfigHandle>,
        codec: CodecSupport,
    ) -> Self {
        let rng = match config.snapshot().audio.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            transport,
            dispatcher,
            config,
            codec,
            sinks: SinkRegistry::new(),
            bindings: Mutex::new(BTreeMap::new()),
            rng: Mutex::new(rng),
            counters: RouterCounters::default(),
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The enabled, channel-holding radio operated by `sender`.
    fn transmitter_of(&self, sender: PlayerId) -> Option<Radio> {
        self.store.by_operator(sender).filter(|radio| radio.is_transmitting() && radio.operator == Some(sender))
    }

    /// Route one inbound voice frame from `sender`.
    ///
    /// Frames from players who are not operating a transmitting radio are
    /// ignored without touching any state.
    pub fn handle_frame(&self, sender: PlayerId, frame: &[u8]) -> FrameReport {
        let Some(transmitter) = self.transmitter_of(sender) else {
            return FrameReport::default();
        };
        let channel = transmitter.transmit_channel;
        self.counters.frames.fetch_add(1, Ordering::Relaxed);

        let mut report = FrameReport {
            transmitter: Some(transmitter.id),
            channel,
            ..FrameReport::default()
        };

        let receivers: Vec<Radio> = self.store.listeners_on(channel).into_iter().filter(|radio| radio.id != transmitter.id).collect();
        if receivers.is_empty() {
            return report;
        }

        let config = self.config.snapshot();
        let profile = &config.audio;
        let synth = NoiseSynthesizer::new(profile.sample_rate, profile.noise_high_pass_hz, profile.noise_low_pass_hz);

        for receiver in receivers {
            self.sinks.ensure(receiver.id, &receiver.position.center(), config.speaker_radius, self.transport.as_ref());

            let distance = link_distance(&transmitter.position, &receiver.position, profile.cross_world_distance);
            let delay = delay_ticks(profile, distance);
            let probability = drop_probability(profile, distance);

            if probability > 0.0 && self.rng().gen_range(0.0..1.0) < probability {
                trace!("Frame from {} dropped for {} at {distance:.0} blocks", transmitter.id, receiver.id);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                report.dropped.push(receiver.id);
                continue;
            }

            let snr_db = target_snr_db(profile, distance);
            let payload = if profile.interference_enabled && snr_db.is_finite() {
                self.degrade(frame, snr_db, &synth)
            } else {
                frame.to_vec()
            };

            let delivery = Delivery {
                receiver: receiver.id,
                channel,
                frame: payload,
            };
            if delay == 0 {
                if self.deliver(delivery) {
                    report.delivered.push(receiver.id);
                }
            } else {
                self.counters.delayed.fetch_add(1, Ordering::Relaxed);
                self.dispatcher.dispatch_after(delay, delivery);
                report.delayed.push((receiver.id, delay));
            }
        }
        report
    }

    /// Noise-mixed copy of `frame`, or the clean frame when no codec is
    /// available or it fails.
    fn degrade(&self, frame: &[u8], snr_db: f64, synth: &NoiseSynthesizer) -> Vec<u8> {
        let Some(codec) = self.codec.codec() else {
            return frame.to_vec();
        };
        match self.mix_through(codec, frame, snr_db, synth) {
            Ok(Some(noisy)) => {
                self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                noisy
            }
            Ok(None) => frame.to_vec(),
            Err(err) => {
                debug!("Noise mixing failed, sending clean frame: {err}");
                self.counters.codec_fallbacks.fetch_add(1, Ordering::Relaxed);
                frame.to_vec()
            }
        }
    }

    fn mix_through(&self, codec: &dyn VoiceCodec, frame: &[u8], snr_db: f64, synth: &NoiseSynthesizer) -> Result<Option<Vec<u8>>, CodecError> {
        let mut samples = codec.decode(frame)?;
        if !synth.mix(&mut samples, snr_db, &mut *self.rng()) {
            return Ok(None);
        }
        codec.encode(&samples).map(Some)
    }

    /// Write a (possibly delayed) frame to its receiver's sink.
    ///
    /// Discards silently when the receiver no longer exists, is no longer
    /// tuned to the channel or has no sink. Returns whether it was written.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        let listening = self.store.get(delivery.receiver).is_some_and(|radio| radio.listen_channel == delivery.channel);
        let sink = if listening { self.sinks.get(delivery.receiver) } else { None };
        match sink {
            Some(sink) => {
                sink.send(&delivery.frame);
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                trace!("Stale delivery for {} discarded", delivery.receiver);
                self.counters.discarded_stale.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Put `operator` into the voice group of `channel` when isolation is on.
    pub fn bind_operator(&self, operator: PlayerId, channel: u16) {
        if !self.config.snapshot().isolate_operator {
            return;
        }
        self.transport.bind_operator(operator, channel);
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner).insert(operator, channel);
    }

    /// Release `operator` from any voice group this router put them in.
    pub fn unbind_operator(&self, operator: PlayerId) {
        if self.bindings.lock().unwrap_or_else(PoisonError::into_inner).remove(&operator).is_some() {
            self.transport.unbind_operator(operator);
        }
    }

    pub fn bound_channel(&self, operator: PlayerId) -> Option<u16> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner).get(&operator).copied()
    }

    pub fn remove_sink(&self, radio: RadioId) -> bool {
        self.sinks.remove(radio)
    }

    pub fn has_sink(&self, radio: RadioId) -> bool {
        self.sinks.get(radio).is_some()
    }

    /// Close every sink and drop every voice-group binding.
    pub fn close_all_sinks(&self) -> usize {
        let operators: Vec<PlayerId> = std::mem::take(&mut *self.bindings.lock().unwrap_or_else(PoisonError::into_inner)).into_keys().collect();
        for operator in operators {
            self.transport.unbind_operator(operator);
        }
        self.sinks.close_all()
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            frames: c.frames.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            delayed: c.delayed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            degraded: c.degraded.load(Ordering::Relaxed),
            codec_fallbacks: c.codec_fallbacks.load(Ordering::Relaxed),
            discarded_stale: c.discarded_stale.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryRadioStore;
    use crate::config::RadioConfig;
    use crate::runtime::delivery::RecordingDispatch;
    use crate::runtime::transport::RecordingTransport;
    use crate::types::BlockPos;

    struct Fixture {
        store: Arc<MemoryRadioStore>,
        transport: Arc<RecordingTransport>,
        dispatch: Arc<RecordingDispatch>,
        router: AudioRouter,
    }

    fn radio(id: u32, x: i32, tx: u16, listen: u16, operator: Option<u32>) -> Radio {
        let mut radio = Radio::placed(RadioId(id), BlockPos::new("w", x, 64, 0));
        radio.enabled = operator.is_some();
        radio.transmit_channel = tx;
        radio.listen_channel = listen;
        radio.operator = operator.map(PlayerId);
        radio
    }

    fn fixture(config: RadioConfig, radios: Vec<Radio>, codec: CodecSupport) -> Fixture {
        let store = Arc::new(MemoryRadioStore::with_radios(radios));
        let transport = Arc::new(RecordingTransport::new());
        let dispatch = Arc::new(RecordingDispatch::new());
        let router = AudioRouter::new(store.clone(), transport.clone(), dispatch.clone(), Arc::new(ConfigHandle::new(config)), codec);
        Fixture {
            store,
            transport,
            dispatch,
            router,
        }
    }

    fn seeded() -> RadioConfig {
        let mut config = RadioConfig::default();
        config.audio.seed = Some(11);
        config
    }

    fn tone() -> Vec<u8> {
        (0..960).flat_map(|i| (((i as f64 * 0.13).sin() * 6000.0) as i16).to_le_bytes()).collect()
    }

    fn sink_frames(f: &Fixture, radio: &Radio) -> Vec<Vec<u8>> {
        f.transport.sink_at(&radio.position.center()).map(|sink| sink.frames()).unwrap_or_default()
    }

    #[test]
    fn non_operator_frames_are_ignored() {
        let f = fixture(seeded(), vec![radio(1, 0, 5, 0, Some(1)), radio(2, 10, 0, 5, None)], CodecSupport::pcm16());
        let report = f.router.handle_frame(PlayerId(9), &tone());
        assert_eq!(report, FrameReport::default());
        assert_eq!(f.transport.created_count(), 0);
        assert_eq!(f.router.stats().frames, 0);
    }

    #[test]
    fn disabled_record_with_same_operator_does_not_hide_transmitter() {
        let mut stale = radio(1, 0, 3, 0, Some(1));
        stale.enabled = false;
        let f = fixture(seeded(), vec![stale, radio(2, 0, 5, 0, Some(1)), radio(3, 10, 0, 5, None)], CodecSupport::pcm16());

        let report = f.router.handle_frame(PlayerId(1), &tone());
        assert_eq!(report.transmitter, Some(RadioId(2)));
        assert_eq!(report.channel, 5);
        assert_eq!(report.delivered, vec![RadioId(3)]);
    }

    #[test]
    fn disabled_or_channelless_transmitter_is_ignored() {
        let mut idle = radio(1, 0, 5, 0, Some(1));
        idle.enabled = false;
        let f = fixture(seeded(), vec![idle, radio(2, 10, 0, 5, None)], CodecSupport::pcm16());
        assert_eq!(f.router.handle_frame(PlayerId(1), &tone()).transmitter, None);

        let f = fixture(seeded(), vec![radio(1, 0, 0, 0, Some(1)), radio(2, 10, 0, 5, None)], CodecSupport::pcm16());
        assert_eq!(f.router.handle_frame(PlayerId(1), &tone()).transmitter, None);
    }

    #[test]
    fn close_receiver_gets_identical_frame_immediately() {
        let rx = radio(2, 50, 0, 5, None);
        let f = fixture(seeded(), vec![radio(1, 0, 5, 0, Some(1)), rx.clone()], CodecSupport::pcm16());
        let frame = tone();

        let report = f.router.handle_frame(PlayerId(1), &frame);
        assert_eq!(report.delivered, vec![RadioId(2)]);
        assert!(f.dispatch.is_empty());
        assert_eq!(sink_frames(&f, &rx), vec![frame]);
        assert_eq!(f.transport.sink_at(&rx.position.center()).map(|s| s.radius()), Some(30));
    }

    #[test]
    fn transmitter_does_not_hear_itself() {
        let f = fixture(seeded(), vec![radio(1, 0, 5, 5, Some(1))], CodecSupport::pcm16());
        let report = f.router.handle_frame(PlayerId(1), &tone());
        assert_eq!(report.transmitter, Some(RadioId(1)));
        assert!(report.delivered.is_empty());
        assert_eq!(f.transport.created_count(), 0);
    }

    #[test]
    fn other_channels_hear_nothing() {
        let f = fixture(seeded(), vec![radio(1, 0, 5, 0, Some(1)), radio(2, 10, 0, 6, None)], CodecSupport::pcm16());
        let report = f.router.handle_frame(PlayerId(1), &tone());
        assert!(report.delivered.is_empty() && report.dropped.is_empty() && report.delayed.is_empty());
    }

    #[test]
    fn far_receiver_gets_delayed_noisy_copy() {
        let mut config = seeded();
        config.audio.drop_curve = vec![(0.0, 0.0)];
        let rx = radio(2, 2000, 0, 5, None);
        let f = fixture(config, vec![radio(1, 0, 5, 0, Some(1)), rx.clone()], CodecSupport::pcm16());
        let frame = tone();

        let report = f.router.handle_frame(PlayerId(1), &frame);
        // (2000 - 80) * 0.005 = 9.6
        assert_eq!(report.delayed, vec![(RadioId(2), 9)]);
        assert!(sink_frames(&f, &rx).is_empty());

        let scheduled = f.dispatch.take();
        assert_eq!(scheduled.len(), 1);
        let (_, delivery) = scheduled.into_iter().next().unwrap();
        assert_eq!(delivery.frame.len(), frame.len());
        assert_ne!(delivery.frame, frame);
        assert_eq!(f.router.stats().degraded, 1);

        assert!(f.router.deliver(delivery.clone()));
        assert_eq!(sink_frames(&f, &rx), vec![delivery.frame]);
    }

    #[test]
    fn interference_off_keeps_frames_clean() {
        let mut config = seeded();
        config.audio.drop_curve = vec![(0.0, 0.0)];
        config.audio.interference_enabled = false;
        config.audio.delay_ticks_per_block = 0.0;
        let rx = radio(2, 2080, 0, 5, None);
        let f = fixture(config, vec![radio(1, 0, 5, 0, Some(1)), rx.clone()], CodecSupport::pcm16());
        let frame = tone();
        f.router.handle_frame(PlayerId(1), &frame);
        assert_eq!(sink_frames(&f, &rx), vec![frame]);
    }

    #[test]
    fn codec_failure_falls_back_to_clean_frame() {
        let mut config = seeded();
        config.audio.drop_curve = vec![(0.0, 0.0)];
        config.audio.delay_ticks_per_block = 0.0;
        let rx = radio(2, 3000, 0, 5, None);
        let f = fixture(config, vec![radio(1, 0, 5, 0, Some(1)), rx.clone()], CodecSupport::pcm16());

        // Odd length cannot be decoded as 16-bit PCM
        let frame = vec![1u8, 2, 3];
        let report = f.router.handle_frame(PlayerId(1), &frame);
        assert_eq!(report.delivered, vec![RadioId(2)]);
        assert_eq!(sink_frames(&f, &rx), vec![frame]);
        assert_eq!(f.router.stats().codec_fallbacks, 1);
    }

    #[test]
    fn passthrough_never_mixes_noise() {
        let mut config = seeded();
        config.audio.drop_curve = vec![(0.0, 0.0)];
        config.audio.delay_ticks_per_block = 0.0;
        let rx = radio(2, 3000, 0, 5, None);
        let f = fixture(config, vec![radio(1, 0, 5, 0, Some(1)), rx.clone()], CodecSupport::Passthrough);
        let frame = tone();
        f.router.handle_frame(PlayerId(1), &frame);
        assert_eq!(sink_frames(&f, &rx), vec![frame]);
        assert_eq!(f.router.stats().degraded, 0);
    }

    #[test]
    fn drops_are_independent_per_receiver() {
        let mut config = seeded();
        config.audio.drop_curve = vec![(0.0, 0.5), (10.0, 0.5)];
        config.audio.max_drop_probability = 0.5;
        config.audio.delay_ticks_per_block = 0.0;
        config.audio.interference_enabled = false;
        let f = fixture(config, vec![radio(1, 0, 5, 0, Some(1)), radio(2, 10, 0, 5, None), radio(3, -10, 0, 5, None)], CodecSupport::Passthrough);

        let mut split = 0;
        for _ in 0..200 {
            let report = f.router.handle_frame(PlayerId(1), &[0, 0]);
            assert_eq!(report.delivered.len() + report.dropped.len(), 2);
            if report.delivered.len() == 1 {
                split += 1;
            }
        }
        // Shared draws would never split a frame between receivers
        assert!(split > 50, "split {split}");
    }

    #[test]
    fn stale_delivery_is_discarded() {
        let mut config = seeded();
        config.audio.drop_curve = vec![(0.0, 0.0)];
        config.audio.interference_enabled = false;
        let rx = radio(2, 2080, 0, 5, None);
        let f = fixture(config, vec![radio(1, 0, 5, 0, Some(1)), rx.clone()], CodecSupport::Passthrough);
        f.router.handle_frame(PlayerId(1), &[1, 2]);
        let (_, delivery) = f.dispatch.take().remove(0);

        // Receiver retuned before the delay elapsed
        let mut retuned = rx.clone();
        retuned.listen_channel = 6;
        f.store.save(&retuned);
        assert!(!f.router.deliver(delivery.clone()));

        // Back on channel but the sink was removed
        f.store.save(&rx);
        f.router.remove_sink(rx.id);
        assert!(!f.router.deliver(delivery));
        assert_eq!(f.router.stats().discarded_stale, 2);
        assert!(sink_frames(&f, &rx).is_empty());
    }

    #[test]
    fn operator_binding_respects_isolation_setting() {
        let f = fixture(seeded(), vec![], CodecSupport::Passthrough);
        f.router.bind_operator(PlayerId(1), 5);
        assert_eq!(f.transport.group_of(PlayerId(1)), Some(5));
        assert_eq!(f.router.bound_channel(PlayerId(1)), Some(5));
        f.router.unbind_operator(PlayerId(1));
        assert_eq!(f.transport.group_of(PlayerId(1)), None);

        let mut config = seeded();
        config.isolate_operator = false;
        let f = fixture(config, vec![], CodecSupport::Passthrough);
        f.router.bind_operator(PlayerId(1), 5);
        assert_eq!(f.transport.group_of(PlayerId(1)), None);
    }

    #[test]
    fn close_all_sinks_unbinds_and_closes() {
        let f = fixture(seeded(), vec![radio(1, 0, 5, 0, Some(1)), radio(2, 10, 0, 5, None)], CodecSupport::Passthrough);
        f.router.bind_operator(PlayerId(1), 5);
        f.router.handle_frame(PlayerId(1), &[0, 0]);
        assert_eq!(f.transport.open_count(), 1);

        assert_eq!(f.router.close_all_sinks(), 1);
        assert_eq!(f.transport.open_count(), 0);
        assert_eq!(f.transport.group_of(PlayerId(1)), None);
        assert!(!f.router.has_sink(RadioId(2)));
    }
}
