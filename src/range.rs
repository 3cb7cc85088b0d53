//! Structural range model.
//!
//! Contains helpers for:
//! - Scanning the vertical antenna sandwich above a radio
//! - Converting antenna count and altitude into a maximum range
//! - Selecting the operator's share of that range
//! - Converting the selected range into a fuel burn rate
//!
//! Units:
//! - Distance: blocks
//! - Fuel: seconds of operation at burn rate 1

use crate::collaborators::WorldView;
use crate::types::{BlockKind, MAX_RANGE_STEP, MIN_RANGE_STEP, Radio};

/// Number of capping blocks required directly above the antenna run.
pub const TOP_CAP_BLOCKS: u32 = 3;

/// Range contribution per antenna element under the square root.
const ANTENNA_WEIGHT: f64 = 30000.0;
/// Range gained per block of altitude.
const ALTITUDE_WEIGHT: f64 = 4.687;
/// Constant offset that sets the minimum usable structure.
const RANGE_OFFSET: f64 = 200.0;
/// Base of the exponential fuel curve.
const BURN_BASE: f64 = 1.002;

/// Result of a structural recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSnapshot {
    pub antenna_count: u32,
    pub max_range: u32,
}

impl RangeSnapshot {
    /// A radio with this snapshot may stay enabled.
    pub fn is_operational(&self) -> bool {
        self.antenna_count > 0 && self.max_range > 0
    }
}

/// Count the antenna elements of the sandwich directly above the radio.
///
/// The column above the radio must read, bottom to top:
///
/// ```text
/// offset 1            : Cap
/// offset 2 ..= 1+n    : Antenna (n >= 1)
/// offset 2+n ..= 4+n  : Cap, Cap, Cap
/// offset 5+n          : anything but Cap
/// ```
///
/// Any deviation, an unloaded column (`None` from the world) or a run that
/// reaches `max_scan` yields `0`.
pub fn scan_antenna_count(world: &dyn WorldView, radio: &Radio, max_scan: u32) -> u32 {
    let block = |offset: u32| world.block_above(&radio.position, offset);

    if block(1) != Some(BlockKind::Cap) {
        return 0;
    }

    let mut count = 0u32;
    let mut offset = 2u32;
    while offset <= max_scan && block(offset) == Some(BlockKind::Antenna) {
        count += 1;
        offset += 1;
    }
    if count == 0 || offset > max_scan {
        return 0;
    }

    for cap in 0..TOP_CAP_BLOCKS {
        if block(offset + cap) != Some(BlockKind::Cap) {
            return 0;
        }
    }

    // Exactly three: a fourth cap breaks the sandwich
    if block(offset + TOP_CAP_BLOCKS) == Some(BlockKind::Cap) {
        return 0;
    }

    count
}

/// Maximum range in blocks for a given antenna count and altitude.
///
/// # Formula
///
/// ```text
/// R_max = floor(max(0, sqrt(30000 × a) + 4.687 × y − 200))
/// ```
///
/// Where:
/// - `a`: antenna count from the sandwich scan
/// - `y`: block altitude of the radio
///
/// The square root gives a sub-linear antenna bonus while altitude
/// contributes linearly. Below the threshold set by the `-200` offset the
/// range is clamped to zero.
pub fn max_range(antenna_count: u32, altitude: i32) -> u32 {
    let antenna_part = (ANTENNA_WEIGHT * antenna_count as f64).sqrt();
    let altitude_part = ALTITUDE_WEIGHT * altitude as f64 - RANGE_OFFSET;
    let total = (antenna_part + altitude_part).floor().max(0.0);
    total.min(u32::MAX as f64) as u32
}

/// Operator-selected share of the maximum range.
///
/// `R_final = floor(step / 5 × R_max)` with `step` clamped to `1..=5`.
pub fn final_range(range_step: u8, max_range: u32) -> u32 {
    let step = range_step.clamp(MIN_RANGE_STEP, MAX_RANGE_STEP) as u64;
    (step * max_range as u64 / MAX_RANGE_STEP as u64) as u32
}

/// Whole fuel-seconds consumed per real second at the given final range.
///
/// # Formula
///
/// ```text
/// burn(R) = ceil(1.002^R − 1)      for R > 0
/// burn(R) = 0                      for R = 0
/// ```
///
/// The supervisor drains at least one unit per tick regardless (see
/// `tick_drain`), so zero-range radios still run out.
pub fn burn_per_second(final_range: u32) -> u64 {
    if final_range == 0 {
        return 0;
    }
    let burn = BURN_BASE.powf(final_range as f64) - 1.0;
    burn.ceil().min(u64::MAX as f64) as u64
}

/// Fuel drained by one supervisor tick: the burn rate, never less than one.
pub fn tick_drain(final_range: u32) -> u64 {
    burn_per_second(final_range).max(1)
}

/// Rescan the structure and recompute the range of `radio` in place.
pub fn recompute(world: &dyn WorldView, radio: &mut Radio, max_scan: u32) -> RangeSnapshot {
    let antenna_count = scan_antenna_count(world, radio, max_scan);
    let snapshot = RangeSnapshot {
        antenna_count,
        max_range: max_range(antenna_count, radio.position.y),
    };
    radio.antenna_count = snapshot.antenna_count;
    radio.max_range = snapshot.max_range;
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::world::ColumnWorld;
    use crate::types::{BlockPos, RadioId};

    fn radio_at(y: i32) -> Radio {
        Radio::placed(RadioId(1), BlockPos::new("w", 0, y, 0))
    }

    fn world_with(radio: &Radio, column: Vec<BlockKind>) -> ColumnWorld {
        let world = ColumnWorld::default();
        world.set_column(&radio.position, column);
        world
    }

    #[test]
    fn sandwich_counts_antenna_run() {
        let radio = radio_at(64);
        let world = world_with(&radio, ColumnWorld::sandwich(4));
        assert_eq!(scan_antenna_count(&world, &radio, 320), 4);
    }

    #[test]
    fn sandwich_rejects_missing_bottom_cap() {
        let radio = radio_at(64);
        let mut column = ColumnWorld::sandwich(3);
        column[0] = BlockKind::Other;
        let world = world_with(&radio, column);
        assert_eq!(scan_antenna_count(&world, &radio, 320), 0);
    }

    #[test]
    fn sandwich_rejects_double_bottom_cap() {
        let radio = radio_at(64);
        let mut column = vec![BlockKind::Cap];
        column.extend(ColumnWorld::sandwich(2));
        let world = world_with(&radio, column);
        assert_eq!(scan_antenna_count(&world, &radio, 320), 0);
    }

    #[test]
    fn sandwich_requires_exactly_three_top_caps() {
        let radio = radio_at(64);

        let mut short = ColumnWorld::sandwich(2);
        short.pop();
        assert_eq!(scan_antenna_count(&world_with(&radio, short), &radio, 320), 0);

        let mut tall = ColumnWorld::sandwich(2);
        tall.push(BlockKind::Cap);
        assert_eq!(scan_antenna_count(&world_with(&radio, tall), &radio, 320), 0);
    }

    #[test]
    fn sandwich_without_antennas_is_zero() {
        let radio = radio_at(64);
        let world = world_with(&radio, vec![BlockKind::Cap; 4]);
        assert_eq!(scan_antenna_count(&world, &radio, 320), 0);
    }

    #[test]
    fn unloaded_column_is_zero() {
        let radio = radio_at(64);
        let world = ColumnWorld::default();
        assert_eq!(scan_antenna_count(&world, &radio, 320), 0);
    }

    #[test]
    fn scan_is_bounded_by_max_height() {
        let radio = radio_at(64);
        let world = world_with(&radio, ColumnWorld::sandwich(50));
        assert_eq!(scan_antenna_count(&world, &radio, 20), 0);
        assert_eq!(scan_antenna_count(&world, &radio, 320), 50);
    }

    #[test]
    fn max_range_matches_formula() {
        assert_eq!(max_range(0, 0), 0);
        assert_eq!(max_range(0, 42), 0); // 196.85 - 200 < 0
        // sqrt(30000) + 4.687*60 - 200 = 173.205 + 281.22 - 200 = 254.425
        assert_eq!(max_range(1, 60), 254);
        // sqrt(120000) + 4.687*100 - 200 = 346.41 + 268.7 = 615.11
        assert_eq!(max_range(4, 100), 615);
        assert_eq!(max_range(0, -64), 0);
    }

    #[test]
    fn final_range_is_monotone_in_step() {
        let max = 617;
        let mut last = 0;
        for step in 1..=5 {
            let range = final_range(step, max);
            assert!(range >= last);
            last = range;
        }
        assert_eq!(final_range(5, max), max);
        assert_eq!(final_range(1, max), 123);
        // Out-of-range steps clamp
        assert_eq!(final_range(0, max), final_range(1, max));
        assert_eq!(final_range(9, max), max);
    }

    #[test]
    fn burn_rate_is_zero_at_zero_and_increasing() {
        assert_eq!(burn_per_second(0), 0);
        assert_eq!(burn_per_second(1), 1);
        assert_eq!(burn_per_second(254), 1);
        assert_eq!(burn_per_second(1000), 7); // 1.002^1000 - 1 = 6.37
        let mut last = 0.0;
        for range in [1u32, 10, 100, 500, 1000, 2000, 3000] {
            let raw = BURN_BASE.powf(range as f64) - 1.0;
            assert!(raw > last);
            assert!(burn_per_second(range) as f64 >= raw);
            last = raw;
        }
        assert!(burn_per_second(3000) > burn_per_second(2000));
    }

    #[test]
    fn tick_drain_has_floor_of_one() {
        assert_eq!(tick_drain(0), 1);
        assert_eq!(tick_drain(254), 1);
        assert_eq!(tick_drain(1000), 7);
    }

    #[test]
    fn recompute_updates_radio_fields() {
        let mut radio = radio_at(60);
        let world = world_with(&radio, ColumnWorld::sandwich(1));
        let snapshot = recompute(&world, &mut radio, 320);
        assert_eq!(snapshot, RangeSnapshot { antenna_count: 1, max_range: 254 });
        assert_eq!(radio.antenna_count, 1);
        assert_eq!(radio.max_range, 254);
        assert!(snapshot.is_operational());
    }
}
