//! Scalable std time driver for embassy-time.
//!
//! The headless runner can play a scene faster or slower than real time: the
//! supervisor's one-second ticks and the delivery queue's tick delays are
//! all measured on this virtual clock. A background thread parks until the
//! earliest registered deadline and wakes the waiting futures.

use core::task::Waker;
use embassy_time_driver::{Driver, TICK_HZ, time_driver_impl};
use log::error;
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant as StdInstant};

/// Fixed-point Q32.32 scale, 1.0 == 1 << 32.
const ONE_Q32: u64 = 1u64 << 32;
/// Longest single park so a scale change is picked up promptly.
const MAX_PARK: Duration = Duration::from_millis(25);

pub const MIN_SCALE_PERCENT: u32 = 1;
pub const MAX_SCALE_PERCENT: u32 = 10_000;

#[derive(Debug)]
struct VirtualClock {
    origin_real: StdInstant,
    origin_ticks: u64,
    scale_q32: u64,
    percent: u32,
}

/// Virtual tick → wakers due at that tick.
#[derive(Default)]
struct WakeQueue {
    due: BTreeMap<u64, Vec<Waker>>,
}

static CLOCK: OnceLock<Mutex<VirtualClock>> = OnceLock::new();
static QUEUE: OnceLock<Mutex<WakeQueue>> = OnceLock::new();
static SIGNAL: OnceLock<Condvar> = OnceLock::new();
static WAKER_THREAD: OnceLock<()> = OnceLock::new();

fn clock() -> MutexGuard<'static, VirtualClock> {
    CLOCK
        .get_or_init(|| {
            Mutex::new(VirtualClock {
                origin_real: StdInstant::now(),
                origin_ticks: 0,
                scale_q32: ONE_Q32,
                percent: 100,
            })
        })
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn queue() -> MutexGuard<'static, WakeQueue> {
    QUEUE.get_or_init(|| Mutex::new(WakeQueue::default())).lock().unwrap_or_else(PoisonError::into_inner)
}

fn signal() -> &'static Condvar {
    SIGNAL.get_or_init(Condvar::new)
}

fn real_to_virtual(real: StdInstant) -> u64 {
    let clock = clock();
    let real_ns = real.saturating_duration_since(clock.origin_real).as_nanos();
    let real_ticks = real_ns * TICK_HZ as u128 / 1_000_000_000u128;
    let scaled = real_ticks * clock.scale_q32 as u128 / ONE_Q32 as u128;
    clock.origin_ticks.wrapping_add(scaled.min(u64::MAX as u128) as u64)
}

fn virtual_to_real(target: u64) -> StdInstant {
    let clock = clock();
    // Targets before the origin are already due
    let Some(virtual_dt) = target.checked_sub(clock.origin_ticks) else {
        return clock.origin_real;
    };
    let real_ticks = virtual_dt as u128 * ONE_Q32 as u128 / clock.scale_q32 as u128;
    let real_ns = real_ticks * 1_000_000_000u128 / TICK_HZ as u128;
    clock.origin_real + Duration::from_nanos(real_ns.min(u64::MAX as u128) as u64)
}

fn ensure_waker_thread() {
    WAKER_THREAD.get_or_init(|| {
        if let Err(err) = std::thread::Builder::new().name("fieldradio-clock".into()).spawn(waker_thread) {
            error!("Failed to start clock thread: {err}");
        }
    });
}

fn waker_thread() {
    loop {
        // Snapshot the earliest deadline without touching the clock lock
        let next_at = {
            let mut guard = queue();
            loop {
                if let Some((&at, _)) = guard.due.iter().next() {
                    break at;
                }
                guard = signal().wait(guard).unwrap_or_else(PoisonError::into_inner);
            }
        };

        let target = virtual_to_real(next_at);
        let now = StdInstant::now();
        if target > now {
            // A new earlier deadline or a scale change notifies; otherwise re-check after the park
            let park = (target - now).min(MAX_PARK);
            drop(signal().wait_timeout(queue(), park).unwrap_or_else(PoisonError::into_inner));
            continue;
        }

        let now_ticks = real_to_virtual(StdInstant::now());
        let ready: Vec<Waker> = {
            let mut guard = queue();
            let later = guard.due.split_off(&now_ticks.saturating_add(1));
            let ready = std::mem::replace(&mut guard.due, later);
            ready.into_values().flatten().collect()
        };
        for waker in ready {
            waker.wake();
        }
    }
}

struct ScaledDriver;

impl Driver for ScaledDriver {
    fn now(&self) -> u64 {
        real_to_virtual(StdInstant::now())
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        ensure_waker_thread();
        queue().due.entry(at).or_default().push(waker.clone());
        signal().notify_all();
    }
}

time_driver_impl!(static DRIVER: ScaledDriver = ScaledDriver);

/// Run the virtual clock at `percent` of real time.
///
/// The current virtual instant is preserved across the change so pending
/// deadlines never jump into the past.
pub fn set_time_scale_percent(percent: u32) {
    let percent = percent.clamp(MIN_SCALE_PERCENT, MAX_SCALE_PERCENT);
    if time_scale_percent() == percent {
        return;
    }
    let real_now = StdInstant::now();
    let virtual_now = real_to_virtual(real_now);
    let scale_q32 = (percent as u128 * ONE_Q32 as u128 / 100u128) as u64;
    {
        let mut clock = clock();
        // Keep origin_ticks fixed and move origin_real so virtual_now maps to real_now
        let elapsed_ticks = virtual_now.saturating_sub(clock.origin_ticks) as u128;
        let elapsed_real_ticks = elapsed_ticks * ONE_Q32 as u128 / scale_q32 as u128;
        let elapsed_ns = elapsed_real_ticks * 1_000_000_000u128 / TICK_HZ as u128;
        let elapsed = Duration::from_nanos(elapsed_ns.min(u64::MAX as u128) as u64);
        clock.origin_real = real_now.checked_sub(elapsed).unwrap_or(real_now);
        clock.scale_q32 = scale_q32;
        clock.percent = percent;
    }
    signal().notify_all();
}

pub fn time_scale_percent() -> u32 {
    clock().percent
}
