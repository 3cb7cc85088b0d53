//! Synthetic voice traffic for scripted talkers.
//!
//! Runs on its own std thread, the way a voice server delivers packets from
//! its network threads: every 20 ms each talker emits one frame of a sine
//! tone, encoded as 16-bit PCM, straight into `AudioRouter::handle_frame`.

use log::{debug, info};
use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::codec::{Pcm16Codec, VoiceCodec};
use crate::audio::router::AudioRouter;
use crate::types::PlayerId;

pub const FRAME_MILLIS: u64 = 20;
const FRAME_PERIOD: Duration = Duration::from_millis(FRAME_MILLIS);

/// A player who keeps talking for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct Talker {
    pub player: PlayerId,
    pub tone_hz: f64,
    pub amplitude: i16,
}

pub fn samples_per_frame(sample_rate: u32) -> usize {
    (sample_rate as u64 * FRAME_MILLIS / 1000) as usize
}

/// Phase-continuous sine source cut into fixed-size frames.
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    phase: f64,
    step: f64,
    amplitude: f64,
    frame_len: usize,
}

impl ToneGenerator {
    pub fn new(tone_hz: f64, amplitude: i16, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * tone_hz / sample_rate as f64,
            amplitude: amplitude as f64,
            frame_len: samples_per_frame(sample_rate),
        }
    }

    pub fn next_frame(&mut self) -> Vec<i16> {
        let mut frame = Vec::with_capacity(self.frame_len);
        for _ in 0..self.frame_len {
            frame.push((self.phase.sin() * self.amplitude).round() as i16);
            self.phase = (self.phase + self.step) % TAU;
        }
        frame
    }
}

/// Handle to the running traffic thread.
pub struct VoiceTraffic {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<u64>,
}

impl VoiceTraffic {
    /// Start generating frames for `talkers` until `stop` is called.
    pub fn spawn(router: Arc<AudioRouter>, talkers: Vec<Talker>, sample_rate: u32) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new().name("fieldradio-voice".into()).spawn(move || run(&router, &talkers, sample_rate, &flag))?;
        Ok(Self { stop, handle })
    }

    /// Stop the thread and return how many frames it sent.
    pub fn stop(self) -> u64 {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().unwrap_or(0)
    }
}

fn run(router: &AudioRouter, talkers: &[Talker], sample_rate: u32, stop: &AtomicBool) -> u64 {
    let codec = Pcm16Codec;
    let mut generators: Vec<(PlayerId, ToneGenerator)> = talkers
        .iter()
        .map(|talker| (talker.player, ToneGenerator::new(talker.tone_hz, talker.amplitude, sample_rate)))
        .collect();
    info!("Voice traffic started for {} talker(s)", generators.len());

    let mut sent = 0u64;
    let mut next = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        for (player, generator) in generators.iter_mut() {
            let Ok(frame) = codec.encode(&generator.next_frame()) else {
                continue;
            };
            if router.handle_frame(*player, &frame).transmitter.is_some() {
                sent += 1;
            }
        }
        next += FRAME_PERIOD;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            // Fell behind; don't try to catch up with a burst
            next = now;
        }
    }
    debug!("Voice traffic stopped after {sent} routed frames");
    sent
}
