//! In-process voice transport that records what the core sends.
//!
//! The headless runner logs per-sink traffic from it and tests inspect the
//! exact frames each receiver heard. Each sink keeps only its most recent
//! frames; the total count keeps growing for the whole run.

use log::trace;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::collaborators::{AudioSink, AudioTransport};
use crate::types::{PlayerId, WorldPos};

/// Frames a sink remembers before the oldest is dropped.
pub const FRAME_HISTORY: usize = 64;

/// Sink that keeps the last `FRAME_HISTORY` frames written to it.
#[derive(Debug)]
pub struct RecordingSink {
    position: WorldPos,
    radius: u32,
    frames: Mutex<VecDeque<Vec<u8>>>,
    frame_count: AtomicU64,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn position(&self) -> &WorldPos {
        &self.position
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Recent frames, oldest first.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    /// Frames written over the sink's lifetime.
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl AudioSink for Arc<RecordingSink> {
    fn send(&self, frame: &[u8]) {
        if self.is_closed() {
            trace!("Frame written to closed sink at {:?}", self.position);
            return;
        }
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        if frames.len() == FRAME_HISTORY {
            frames.pop_front();
        }
        frames.push_back(frame.to_vec());
        drop(frames);
        self.frame_count.fetch_add(1, Ordering::Relaxed);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    sinks: Mutex<Vec<Arc<RecordingSink>>>,
    groups: Mutex<BTreeMap<PlayerId, u16>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sinks(&self) -> MutexGuard<'_, Vec<Arc<RecordingSink>>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every sink ever created, closed ones included.
    pub fn all_sinks(&self) -> Vec<Arc<RecordingSink>> {
        self.sinks().clone()
    }

    /// The open sink placed at `position`, if any.
    pub fn sink_at(&self, position: &WorldPos) -> Option<Arc<RecordingSink>> {
        self.sinks().iter().rev().find(|sink| !sink.is_closed() && sink.position == *position).cloned()
    }

    pub fn created_count(&self) -> usize {
        self.sinks().len()
    }

    pub fn open_count(&self) -> usize {
        self.sinks().iter().filter(|sink| !sink.is_closed()).count()
    }

    /// Voice group the operator is currently bound to.
    pub fn group_of(&self, player: PlayerId) -> Option<u16> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner).get(&player).copied()
    }
}

impl AudioTransport for RecordingTransport {
    fn create_sink(&self, position: &WorldPos, radius: u32) -> Box<dyn AudioSink> {
        let sink = Arc::new(RecordingSink {
            position: position.clone(),
            radius,
            frames: Mutex::new(VecDeque::with_capacity(FRAME_HISTORY)),
            frame_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.sinks().push(sink.clone());
        Box::new(sink)
    }

    fn bind_operator(&self, operator: PlayerId, channel: u16) {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner).insert(operator, channel);
    }

    fn unbind_operator(&self, operator: PlayerId) {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner).remove(&operator);
    }
}
