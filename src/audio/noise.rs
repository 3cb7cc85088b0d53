//! Telephone-band noise synthesis and SNR-targeted mixing.
//!
//! White Gaussian noise is shaped by a first-order high-pass (~300 Hz)
//! cascaded with a first-order low-pass (~3400 Hz) and scaled so that the
//! mixed result sits at a requested signal-to-noise ratio relative to the
//! speech actually present in the frame.

use rand::Rng;
use rand_distr::StandardNormal;

/// Single-pole IIR section.
///
/// ```text
/// y[n] = a0 × x[n] + a1 × x[n−1] + b1 × y[n−1]
/// ```
#[derive(Debug, Clone, Copy)]
struct OnePole {
    a0: f64,
    a1: f64,
    b1: f64,
    x1: f64,
    y1: f64,
}

impl OnePole {
    fn decay(cutoff_hz: f64, sample_rate: f64) -> f64 {
        (-2.0 * std::f64::consts::PI * cutoff_hz / sample_rate).exp()
    }

    fn low_pass(cutoff_hz: f64, sample_rate: f64) -> Self {
        let x = Self::decay(cutoff_hz, sample_rate);
        Self {
            a0: 1.0 - x,
            a1: 0.0,
            b1: x,
            x1: 0.0,
            y1: 0.0,
        }
    }

    fn high_pass(cutoff_hz: f64, sample_rate: f64) -> Self {
        let x = Self::decay(cutoff_hz, sample_rate);
        Self {
            a0: (1.0 + x) / 2.0,
            a1: -(1.0 + x) / 2.0,
            b1: x,
            x1: 0.0,
            y1: 0.0,
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let output = self.a0 * input + self.a1 * self.x1 + self.b1 * self.y1;
        self.x1 = input;
        self.y1 = output;
        output
    }
}

/// Root-mean-square amplitude of a sample buffer.
pub fn rms<T: Copy + Into<f64>>(samples: &[T]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|s| {
        let v: f64 = (*s).into();
        v * v
    }).sum();
    (energy / samples.len() as f64).sqrt()
}

/// Band-limited noise generator for 16-bit PCM speech.
#[derive(Debug, Clone)]
pub struct NoiseSynthesizer {
    sample_rate: f64,
    high_pass_hz: f64,
    low_pass_hz: f64,
}

impl NoiseSynthesizer {
    pub fn new(sample_rate: u32, high_pass_hz: f64, low_pass_hz: f64) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            high_pass_hz,
            low_pass_hz,
        }
    }

    /// `len` samples of white noise passed through the HP→LP cascade.
    ///
    /// Filter state starts at rest for every burst.
    pub fn band_limited_noise<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> Vec<f64> {
        let mut high_pass = OnePole::high_pass(self.high_pass_hz, self.sample_rate);
        let mut low_pass = OnePole::low_pass(self.low_pass_hz, self.sample_rate);
        (0..len)
            .map(|_| {
                let white: f64 = rng.sample(StandardNormal);
                low_pass.process(high_pass.process(white))
            })
            .collect()
    }

    /// Mix noise into `samples` in place at `snr_db` relative to the speech.
    ///
    /// # Formula
    ///
    /// ```text
    /// gain = rms(speech) / (rms(noise) × 10^(snr_db / 20))
    /// out  = clamp(speech + gain × noise, i16::MIN, i16::MAX)
    /// ```
    ///
    /// A non-finite `snr_db` (the clear-range case) leaves the buffer
    /// untouched, as does silent speech: there is no loudness to be
    /// relative to.
    ///
    /// # Returns
    ///
    /// `true` if noise was mixed.
    pub fn mix<R: Rng + ?Sized>(&self, samples: &mut [i16], snr_db: f64, rng: &mut R) -> bool {
        if !snr_db.is_finite() || samples.is_empty() {
            return false;
        }
        let speech_rms = rms(&*samples);
        if speech_rms == 0.0 {
            return false;
        }

        let noise = self.band_limited_noise(samples.len(), rng);
        let noise_rms = rms(&noise);
        if noise_rms == 0.0 {
            return false;
        }

        let gain = speech_rms / (noise_rms * 10f64.powf(snr_db / 20.0));
        for (sample, n) in samples.iter_mut().zip(noise) {
            let mixed = *sample as f64 + gain * n;
            *sample = mixed.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn sine(len: usize, freq: f64, amplitude: f64) -> Vec<i16> {
        (0..len)
            .map(|i| (amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / 48_000.0).sin()) as i16)
            .collect()
    }

    fn synth() -> NoiseSynthesizer {
        NoiseSynthesizer::new(48_000, 300.0, 3400.0)
    }

    #[test]
    fn infinite_snr_is_a_no_op() {
        let mut rng = StdRng::seed_from_u64(1);
        let original = sine(960, 1000.0, 8000.0);
        let mut samples = original.clone();
        assert!(!synth().mix(&mut samples, f64::INFINITY, &mut rng));
        assert_eq!(samples, original);
    }

    #[test]
    fn silence_stays_silent() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut samples = vec![0i16; 960];
        assert!(!synth().mix(&mut samples, 5.0, &mut rng));
        assert!(samples.iter().all(|s| *s == 0));
    }

    #[test]
    fn mixed_noise_hits_target_snr() {
        let mut rng = StdRng::seed_from_u64(3);
        let synth = synth();
        for target in [20.0, 10.0, 3.0] {
            let original = sine(960, 1000.0, 8000.0);
            let mut samples = original.clone();
            assert!(synth.mix(&mut samples, target, &mut rng));

            let residual: Vec<f64> = samples.iter().zip(&original).map(|(m, o)| *m as f64 - *o as f64).collect();
            let measured = 20.0 * (rms(&original) / rms(&residual)).log10();
            assert!((measured - target).abs() < 1.0, "target {target} dB, measured {measured} dB");
        }
    }

    #[test]
    fn loud_mix_clamps_instead_of_wrapping() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut samples = vec![i16::MAX; 480];
        samples.extend(vec![i16::MIN; 480]);
        assert!(synth().mix(&mut samples, 20.0, &mut rng));
        assert!(samples[..480].iter().all(|s| *s > 0));
        assert!(samples[480..].iter().all(|s| *s < 0));
        assert!(samples[..480].contains(&i16::MAX));
        assert!(samples[480..].contains(&i16::MIN));
    }

    #[test]
    fn high_pass_removes_dc() {
        let mut filter = OnePole::high_pass(300.0, 48_000.0);
        let mut last = 0.0_f64;
        for _ in 0..4800 {
            last = filter.process(1.0);
        }
        assert!(last.abs() < 1e-6);
    }

    #[test]
    fn low_pass_attenuates_nyquist() {
        let mut filter = OnePole::low_pass(3400.0, 48_000.0);
        let mut peak: f64 = 0.0;
        for i in 0..4800 {
            let input = if i % 2 == 0 { 1.0 } else { -1.0 };
            let out = filter.process(input);
            if i > 100 {
                peak = peak.max(out.abs());
            }
        }
        assert!(peak < 0.3, "peak {peak}");
    }
}
