//! Voice path: distance profile, noise synthesis, codec capability, sinks and
//! the per-frame router.

pub mod codec;
pub mod noise;
pub mod profile;
pub mod router;
pub mod sinks;
