//! Distance helpers for radio links and operator range checks.
//!
//! Contains helper functions for:
//! - Squared distance between two continuous positions (no sqrt for range checks)
//! - Link distance between two radios, with a fixed stand-in for cross-world pairs

use crate::types::{BlockPos, WorldPos};

/// Squared Euclidean distance in blocks, or `None` when the positions are in
/// different worlds.
///
/// Comparing `d²` against `r²` avoids the square root in the per-tick
/// operator range check.
pub fn distance2(a: &WorldPos, b: &WorldPos) -> Option<f64> {
    if a.world != b.world {
        return None;
    }
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    Some(dx * dx + dy * dy + dz * dz)
}

/// True when `b` lies in the same world as `a` and within `radius` blocks.
pub fn within_radius(a: &WorldPos, b: &WorldPos, radius: f64) -> bool {
    matches!(distance2(a, b), Some(d2) if d2 <= radius * radius)
}

/// Scalar distance between two radios, measured between block centers.
///
/// # Parameters
///
/// * `a` - Transmitter block
/// * `b` - Receiver block
/// * `cross_world_distance` - Value used when the blocks are in different worlds
///
/// # Returns
///
/// The distance in blocks. Cross-world pairs get `cross_world_distance`,
/// which is large enough to push every profile curve to its far end.
pub fn link_distance(a: &BlockPos, b: &BlockPos, cross_world_distance: f64) -> f64 {
    match distance2(&a.center(), &b.center()) {
        Some(d2) => d2.sqrt(),
        None => cross_world_distance,
    }
}
