//! Delayed frame delivery.
//!
//! The router hands delayed frames to `DeliveryQueue::dispatch_after` from
//! the voice thread. The due instant is fixed at dispatch time and the frame
//! crosses into the async side over a bounded embassy channel.
//! `delivery_loop` keeps the pending frames ordered by due instant and wakes
//! with `Timer::at` for the earliest one.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};
use log::{trace, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::audio::router::AudioRouter;
use crate::collaborators::{DelayedDispatch, Delivery};
use crate::config::ConfigHandle;

pub const DELIVERY_QUEUE_SIZE: usize = 1024;
/// Wake period of the loop while nothing is pending.
const IDLE_WAKE: Duration = Duration::from_millis(250);

/// A delivery stamped with the instant it becomes due.
#[derive(Debug, Clone)]
pub struct TimedDelivery {
    pub due: Instant,
    pub delivery: Delivery,
}

pub type DeliveryChannel = Channel<CriticalSectionRawMutex, TimedDelivery, DELIVERY_QUEUE_SIZE>;

/// Producer side of the delayed delivery path.
pub struct DeliveryQueue {
    channel: DeliveryChannel,
    config: Arc<ConfigHandle>,
    overflowed: AtomicU64,
}

impl DeliveryQueue {
    pub fn new(config: Arc<ConfigHandle>) -> Self {
        Self {
            channel: DeliveryChannel::new(),
            config,
            overflowed: AtomicU64::new(0),
        }
    }

    /// Frames discarded because the channel was full.
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    pub fn channel(&self) -> &DeliveryChannel {
        &self.channel
    }
}

impl DelayedDispatch for DeliveryQueue {
    fn dispatch_after(&self, delay_ticks: u32, delivery: Delivery) {
        let tick = Duration::from_millis(self.config.snapshot().tick_millis);
        let due = Instant::now() + tick * delay_ticks;
        if self.channel.try_send(TimedDelivery { due, delivery }).is_err() {
            let total = self.overflowed.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("Delivery queue full, frame discarded ({total} so far)");
        }
    }
}

/// Pending deliveries ordered by due instant, FIFO among equal instants.
#[derive(Debug, Default)]
pub struct PendingDeliveries {
    queue: BTreeMap<(Instant, u64), Delivery>,
    next_seq: u64,
}

impl PendingDeliveries {
    pub fn push(&mut self, due: Instant, delivery: Delivery) {
        self.queue.insert((due, self.next_seq), delivery);
        self.next_seq = self.next_seq.wrapping_add(1);
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(due, _)| *due)
    }

    /// Remove and return every delivery due at or before `now`, in order.
    pub fn drain_due(&mut self, now: Instant) -> Vec<Delivery> {
        let later = self.queue.split_off(&(now, u64::MAX));
        std::mem::replace(&mut self.queue, later).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Deliver delayed frames to the router as they fall due. Never returns.
pub async fn delivery_loop(queue: &DeliveryQueue, router: &AudioRouter) {
    let mut pending = PendingDeliveries::default();
    loop {
        let deadline = pending.next_due().unwrap_or_else(|| Instant::now() + IDLE_WAKE);
        match select(queue.channel.receive(), Timer::at(deadline)).await {
            Either::First(TimedDelivery { due, delivery }) => pending.push(due, delivery),
            Either::Second(()) => {}
        }
        // Pick up everything else already queued before delivering
        while let Ok(TimedDelivery { due, delivery }) = queue.channel.try_receive() {
            pending.push(due, delivery);
        }
        for delivery in pending.drain_due(Instant::now()) {
            trace!("Delayed frame due for {}", delivery.receiver);
            router.deliver(delivery);
        }
    }
}

/// Dispatcher that only records what it is asked to schedule.
///
/// Tests and single-step drivers flush it by hand with `take`.
#[derive(Debug, Default)]
pub struct RecordingDispatch {
    scheduled: Mutex<Vec<(u32, Delivery)>>,
}

impl RecordingDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(u32, Delivery)> {
        std::mem::take(&mut *self.scheduled.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.scheduled.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DelayedDispatch for RecordingDispatch {
    fn dispatch_after(&self, delay_ticks: u32, delivery: Delivery) {
        self.scheduled.lock().unwrap_or_else(PoisonError::into_inner).push((delay_ticks, delivery));
    }
}
