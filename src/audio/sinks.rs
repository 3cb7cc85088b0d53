//! Active output sinks, one per receiving radio.
//!
//! Lookups come from the frame path and the delivery loop concurrently, while
//! enable/disable transitions add and remove entries, so the map sits behind
//! an `RwLock` and hands out `Arc` clones of the sinks.

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::collaborators::{AudioSink, AudioTransport};
use crate::types::{RadioId, WorldPos};

struct SinkEntry {
    sink: Arc<dyn AudioSink>,
    position: WorldPos,
    radius: u32,
}

/// Receiver radio id → sink placed at that radio.
#[derive(Default)]
pub struct SinkRegistry {
    entries: RwLock<HashMap<RadioId, SinkEntry>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the sink for `radio`, creating it or replacing it when the
    /// receiver moved or the audible radius changed.
    pub fn ensure(&self, radio: RadioId, position: &WorldPos, radius: u32, transport: &dyn AudioTransport) -> Arc<dyn AudioSink> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(&radio) {
                if entry.position == *position && entry.radius == radius {
                    return entry.sink.clone();
                }
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have placed it between the two locks
        if let Some(entry) = entries.get(&radio) {
            if entry.position == *position && entry.radius == radius {
                return entry.sink.clone();
            }
        }

        let sink: Arc<dyn AudioSink> = Arc::from(transport.create_sink(position, radius));
        if let Some(previous) = entries.insert(
            radio,
            SinkEntry {
                sink: sink.clone(),
                position: position.clone(),
                radius,
            },
        ) {
            debug!("Repositioned sink for {radio}");
            previous.sink.close();
        }
        sink
    }

    pub fn get(&self, radio: RadioId) -> Option<Arc<dyn AudioSink>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).get(&radio).map(|entry| entry.sink.clone())
    }

    /// Close and forget the sink for `radio`. Returns whether one existed.
    pub fn remove(&self, radio: RadioId) -> bool {
        let removed = self.entries.write().unwrap_or_else(PoisonError::into_inner).remove(&radio);
        match removed {
            Some(entry) => {
                entry.sink.close();
                true
            }
            None => false,
        }
    }

    /// Close every sink. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<SinkEntry> = self.entries.write().unwrap_or_else(PoisonError::into_inner).drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.sink.close();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::transport::RecordingTransport;

    #[test]
    fn ensure_reuses_sink_until_moved() {
        let transport = RecordingTransport::new();
        let sinks = SinkRegistry::new();
        let here = WorldPos::new("w", 0.5, 64.5, 0.5);

        sinks.ensure(RadioId(1), &here, 30, &transport);
        sinks.ensure(RadioId(1), &here, 30, &transport);
        assert_eq!(transport.created_count(), 1);

        let there = WorldPos::new("w", 10.5, 64.5, 0.5);
        sinks.ensure(RadioId(1), &there, 30, &transport);
        assert_eq!(transport.created_count(), 2);
        assert!(transport.sink_at(&here).is_none());
        assert!(transport.sink_at(&there).is_some());
        assert_eq!(sinks.len(), 1);
    }

    #[test]
    fn radius_change_replaces_sink() {
        let transport = RecordingTransport::new();
        let sinks = SinkRegistry::new();
        let here = WorldPos::new("w", 0.5, 64.5, 0.5);
        sinks.ensure(RadioId(1), &here, 30, &transport);
        sinks.ensure(RadioId(1), &here, 48, &transport);
        assert_eq!(transport.created_count(), 2);
        assert_eq!(transport.sink_at(&here).map(|s| s.radius()), Some(48));
    }

    #[test]
    fn remove_and_close_all_close_sinks() {
        let transport = RecordingTransport::new();
        let sinks = SinkRegistry::new();
        sinks.ensure(RadioId(1), &WorldPos::new("w", 0.5, 64.5, 0.5), 30, &transport);
        sinks.ensure(RadioId(2), &WorldPos::new("w", 5.5, 64.5, 0.5), 30, &transport);

        assert!(sinks.remove(RadioId(1)));
        assert!(!sinks.remove(RadioId(1)));
        assert!(sinks.get(RadioId(1)).is_none());
        assert_eq!(transport.open_count(), 1);

        assert_eq!(sinks.close_all(), 1);
        assert!(sinks.is_empty());
        assert_eq!(transport.open_count(), 0);
    }
}
