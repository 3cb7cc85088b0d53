//! Configuration loading and the shared configuration snapshot.

use anyhow::{Context, bail};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Hard ceiling for slider mode regardless of configuration.
pub const SLIDER_CHANNEL_CAP: u16 = 1024;

/// How operators pick channels; decides the channel ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// A small fixed set of channels.
    Simple,
    /// A numeric slider over a large range.
    Slider,
}

/// Core configuration. Every field has a default so partial files load.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub channel_mode: ChannelMode,
    pub simple_channels: u16,
    pub slider_channels: u16,
    /// Maximum distance in blocks between operator and radio.
    pub operator_radius: f64,
    /// Operators must stand in the radio's world to enable it.
    pub restrict_to_world: bool,
    /// Audible radius of each receiver's sink, in blocks.
    pub speaker_radius: u32,
    /// Length of one game tick in milliseconds.
    pub tick_millis: u64,
    /// Highest offset scanned above a radio for the antenna sandwich.
    pub max_antenna_scan: u32,
    /// Put operators into their channel's voice group while enabled.
    pub isolate_operator: bool,
    pub fuel_per_ingot: u64,
    pub fuel_per_block: u64,
    pub audio: AudioProfile,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel_mode: ChannelMode::Simple,
            simple_channels: 9,
            slider_channels: 128,
            operator_radius: 24.0,
            restrict_to_world: true,
            speaker_radius: 30,
            tick_millis: 50,
            max_antenna_scan: 320,
            isolate_operator: true,
            fuel_per_ingot: 3,
            fuel_per_block: 27,
            audio: AudioProfile::default(),
        }
    }
}

/// Distance-driven degradation parameters for the audio path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioProfile {
    /// Within this distance frames are never delayed.
    pub clear_range: f64,
    /// Within this distance no noise is mixed.
    pub noise_free_range: f64,
    /// Delay ticks added per block beyond `clear_range`.
    pub delay_ticks_per_block: f64,
    pub max_delay_ticks: u32,
    /// `(distance, probability)` breakpoints, linear in between.
    pub drop_curve: Vec<(f64, f64)>,
    /// Ceiling applied to every interpolated drop probability.
    pub max_drop_probability: f64,
    /// `(distance, snr_db)` breakpoints, linear in between.
    pub snr_curve: Vec<(f64, f64)>,
    /// Distance used for transmitter/receiver pairs in different worlds.
    pub cross_world_distance: f64,
    pub interference_enabled: bool,
    pub sample_rate: u32,
    pub noise_high_pass_hz: f64,
    pub noise_low_pass_hz: f64,
    /// Fixed RNG seed for reproducible drops and noise.
    pub seed: Option<u64>,
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            clear_range: 80.0,
            noise_free_range: 80.0,
            delay_ticks_per_block: 0.005,
            max_delay_ticks: 40,
            drop_curve: vec![(80.0, 0.0), (500.0, 0.02), (1500.0, 0.08), (3000.0, 0.15), (5000.0, 0.25), (8000.0, 0.30)],
            max_drop_probability: 0.35,
            snr_curve: vec![(80.0, 30.0), (500.0, 24.0), (1500.0, 15.0), (3000.0, 9.0), (5000.0, 4.0), (8000.0, 0.0)],
            cross_world_distance: 1_000_000.0,
            interference_enabled: true,
            sample_rate: 48_000,
            noise_high_pass_hz: 300.0,
            noise_low_pass_hz: 3400.0,
            seed: None,
        }
    }
}

impl RadioConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path).with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: RadioConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Effective channel ceiling for the configured mode.
    pub fn max_channels(&self) -> u16 {
        match self.channel_mode {
            ChannelMode::Simple => self.simple_channels,
            ChannelMode::Slider => self.slider_channels.min(SLIDER_CHANNEL_CAP),
        }
    }

    /// Reject configurations that would break the core's invariants.
    ///
    /// Checks:
    /// - At least one channel in the active mode
    /// - Non-negative radii, ranges and coefficients
    /// - Curves sorted by strictly increasing distance
    /// - Drop probabilities in `[0, 1]` and non-decreasing
    /// - SNR values non-increasing with distance
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_channels() == 0 {
            bail!("channel ceiling must be at least 1 in {:?} mode", self.channel_mode);
        }
        if !(self.operator_radius >= 0.0) {
            bail!("operator_radius must be non-negative, got {}", self.operator_radius);
        }
        if self.tick_millis == 0 {
            bail!("tick_millis must be positive");
        }
        self.audio.validate()
    }
}

impl AudioProfile {
    fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("clear_range", self.clear_range),
            ("noise_free_range", self.noise_free_range),
            ("delay_ticks_per_block", self.delay_ticks_per_block),
            ("cross_world_distance", self.cross_world_distance),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                bail!("{name} must be a non-negative number, got {value}");
            }
        }
        if !(0.0..=1.0).contains(&self.max_drop_probability) {
            bail!("max_drop_probability must be within [0, 1], got {}", self.max_drop_probability);
        }
        if self.sample_rate == 0 {
            bail!("sample_rate must be positive");
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if !(self.noise_high_pass_hz > 0.0 && self.noise_high_pass_hz < self.noise_low_pass_hz && self.noise_low_pass_hz < nyquist) {
            bail!(
                "noise band {}..{} Hz must be increasing and below Nyquist ({} Hz)",
                self.noise_high_pass_hz, self.noise_low_pass_hz, nyquist
            );
        }

        validate_curve("drop_curve", &self.drop_curve)?;
        validate_curve("snr_curve", &self.snr_curve)?;

        for window in self.drop_curve.windows(2) {
            if window[1].1 < window[0].1 {
                bail!("drop_curve probabilities must be non-decreasing ({} after {})", window[1].1, window[0].1);
            }
        }
        for (distance, probability) in &self.drop_curve {
            if !(0.0..=1.0).contains(probability) {
                bail!("drop_curve probability {probability} at distance {distance} outside [0, 1]");
            }
        }
        for window in self.snr_curve.windows(2) {
            if window[1].1 > window[0].1 {
                bail!("snr_curve values must be non-increasing ({} dB after {} dB)", window[1].1, window[0].1);
            }
        }
        Ok(())
    }
}

fn validate_curve(name: &str, curve: &[(f64, f64)]) -> anyhow::Result<()> {
    if curve.is_empty() {
        bail!("{name} needs at least one breakpoint");
    }
    if curve.iter().any(|(d, v)| !d.is_finite() || !v.is_finite()) {
        bail!("{name} contains a non-finite breakpoint");
    }
    for window in curve.windows(2) {
        if window[1].0 <= window[0].0 {
            bail!("{name} distances must be strictly increasing ({} after {})", window[1].0, window[0].0);
        }
    }
    Ok(())
}

/// Shared, atomically replaced configuration snapshot.
///
/// Readers take one `Arc` per tick or frame and never observe a partially
/// updated configuration.
#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<RadioConfig>>,
}

impl ConfigHandle {
    pub fn new(config: RadioConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<RadioConfig> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn replace(&self, config: RadioConfig) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    /// Copy the current snapshot, apply `change`, then swap it in.
    pub fn update(&self, change: impl FnOnce(&mut RadioConfig)) -> Arc<RadioConfig> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RadioConfig::clone(&guard);
        change(&mut next);
        let next = Arc::new(next);
        *guard = next.clone();
        next
    }
}
