//! Distance → degradation parameters.
//!
//! Contains the three pure mappings used for every (frame, receiver) pair:
//! - Delay in game ticks (deterministic, so frames never reorder)
//! - Drop probability from a piecewise-linear breakpoint table
//! - Target signal-to-noise ratio from a non-increasing breakpoint curve
//!
//! Randomness lives in the router (drop draw) and the noise synthesizer,
//! never here.

use crate::config::AudioProfile;

/// Delivery delay in game ticks for a link of the given length.
///
/// # Formula
///
/// ```text
/// delay(d) = 0                                               for d ≤ clear_range
/// delay(d) = min(max_delay, floor((d − clear_range) × k))    otherwise
/// ```
///
/// Where `k` is `delay_ticks_per_block`.
pub fn delay_ticks(profile: &AudioProfile, distance: f64) -> u32 {
    if !(distance > profile.clear_range) {
        return 0;
    }
    let ticks = ((distance - profile.clear_range) * profile.delay_ticks_per_block).floor();
    if ticks >= profile.max_delay_ticks as f64 { profile.max_delay_ticks } else { ticks.max(0.0) as u32 }
}

/// Probability that a frame is lost on a link of the given length.
///
/// Linear between breakpoints, flat beyond both ends, never above
/// `max_drop_probability`.
pub fn drop_probability(profile: &AudioProfile, distance: f64) -> f64 {
    let probability = interpolate(&profile.drop_curve, distance).unwrap_or(0.0);
    probability.clamp(0.0, profile.max_drop_probability.clamp(0.0, 1.0))
}

/// Target SNR in dB for a link of the given length.
///
/// Returns `f64::INFINITY` (no noise) within `noise_free_range`.
pub fn target_snr_db(profile: &AudioProfile, distance: f64) -> f64 {
    if !(distance > profile.noise_free_range) {
        return f64::INFINITY;
    }
    interpolate(&profile.snr_curve, distance).unwrap_or(f64::INFINITY)
}

/// Piecewise-linear lookup over `(x, y)` breakpoints sorted by `x`.
///
/// Values left of the first breakpoint take its `y`, values right of the
/// last take the last `y`. `None` for an empty table.
pub fn interpolate(curve: &[(f64, f64)], x: f64) -> Option<f64> {
    let (first, last) = (curve.first()?, curve.last()?);
    if x <= first.0 {
        return Some(first.1);
    }
    if x >= last.0 {
        return Some(last.1);
    }
    // First breakpoint strictly to the right of x; index >= 1 after the checks above
    let upper = curve.partition_point(|(bx, _)| *bx <= x);
    let (x0, y0) = curve[upper - 1];
    let (x1, y1) = curve[upper];
    if x1 <= x0 {
        return Some(y1);
    }
    let t = (x - x0) / (x1 - x0);
    Some(y0 + t * (y1 - y0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> AudioProfile {
        AudioProfile::default()
    }

    #[test]
    fn no_delay_inside_clear_range() {
        let p = profile();
        for d in [0.0, 10.0, 50.0, 79.9, 80.0] {
            assert_eq!(delay_ticks(&p, d), 0);
        }
    }

    #[test]
    fn delay_grows_linearly_then_caps() {
        let p = AudioProfile {
            delay_ticks_per_block: 0.25,
            max_delay_ticks: 40,
            ..profile()
        };
        assert_eq!(delay_ticks(&p, 84.0), 1);
        assert_eq!(delay_ticks(&p, 120.0), 10);
        assert_eq!(delay_ticks(&p, 1e6), 40);

        let mut last = 0;
        for step in 0..200 {
            let d = step as f64 * 50.0;
            let ticks = delay_ticks(&p, d);
            assert!(ticks >= last);
            last = ticks;
        }
    }

    #[test]
    fn drop_probability_is_monotone_and_bounded() {
        let p = AudioProfile {
            max_drop_probability: 0.2,
            ..profile()
        };
        let mut last = 0.0;
        for step in 0..400 {
            let d = step as f64 * 25.0;
            let probability = drop_probability(&p, d);
            assert!(probability >= last);
            assert!(probability <= 0.2);
            last = probability;
        }
        assert_eq!(drop_probability(&p, 1e6), 0.2);
    }

    #[test]
    fn drop_probability_hits_breakpoints() {
        let p = profile();
        assert_eq!(drop_probability(&p, 50.0), 0.0);
        assert!((drop_probability(&p, 5000.0) - 0.25).abs() < 1e-12);
        // Halfway between 3000 (0.15) and 5000 (0.25)
        assert!((drop_probability(&p, 4000.0) - 0.20).abs() < 1e-12);
    }

    #[test]
    fn snr_is_infinite_when_close_and_falls_with_distance() {
        let p = profile();
        assert!(target_snr_db(&p, 10.0).is_infinite());
        assert!(target_snr_db(&p, 80.0).is_infinite());

        let mut last = f64::INFINITY;
        for step in 4..400 {
            let d = step as f64 * 25.0;
            let snr = target_snr_db(&p, d);
            assert!(snr.is_finite());
            assert!(snr <= last);
            last = snr;
        }
        assert_eq!(target_snr_db(&p, 20_000.0), 0.0);
    }

    #[test]
    fn interpolate_edges() {
        assert_eq!(interpolate(&[], 3.0), None);
        let curve = [(10.0, 1.0), (20.0, 3.0)];
        assert_eq!(interpolate(&curve, 0.0), Some(1.0));
        assert_eq!(interpolate(&curve, 15.0), Some(2.0));
        assert_eq!(interpolate(&curve, 20.0), Some(3.0));
        assert_eq!(interpolate(&curve, 99.0), Some(3.0));
        assert_eq!(interpolate(&[(5.0, 7.0)], 100.0), Some(7.0));
    }
}
