//! Half-duplex game radio core.
//!
//! Radios transmit on one numeric channel and listen on another. The crate
//! covers exclusive transmit-channel claims (`registry`), the antenna and
//! fuel range model (`range`), the once-per-second supervision of enabled
//! radios (`supervisor`) and the per-frame voice pipeline that delays, drops
//! and noises audio with distance (`audio`). Hosts plug in through the
//! traits in `collaborators`; `runtime` provides in-memory implementations
//! and the headless scene runner's plumbing.

pub mod audio;
pub mod collaborators;
pub mod config;
pub mod control;
pub mod geometry;
pub mod range;
pub mod registry;
pub mod runtime;
pub mod supervisor;
pub mod types;
