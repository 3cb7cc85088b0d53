//! Once-per-second supervision of every enabled radio.
//!
//! Per radio, in order, the first failing check disables it and ends its
//! evaluation for this tick:
//! 1) operator presence: online, same world, within `operator_radius`
//! 2) structure: the antenna sandwich still yields a positive range
//! 3) fuel drain: subtract the burn rate (at least one unit)
//! 4) fuel exhaustion
//!
//! Each radio is evaluated under the control mutation lock, so the tick
//! never interleaves with an operator's enable or channel change.

use embassy_time::{Duration, Ticker};
use log::{debug, trace};
use std::sync::Arc;

use crate::control::{MutationGuard, RadioControl};
use crate::geometry::within_radius;
use crate::range;
use crate::types::{DisableReason, Notice, RadioId};

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Outcome of one supervisor tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Enabled radios looked at.
    pub evaluated: usize,
    pub disabled: Vec<(RadioId, DisableReason)>,
    /// Fuel seconds consumed across all radios.
    pub fuel_burned: u64,
}

pub struct Supervisor {
    control: Arc<RadioControl>,
}

impl Supervisor {
    pub fn new(control: Arc<RadioControl>) -> Self {
        Self { control }
    }

    /// Evaluate every enabled radio once.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let enabled: Vec<RadioId> = self.control.store().all().into_iter().filter(|radio| radio.enabled).map(|radio| radio.id).collect();

        for radio_id in enabled {
            let guard = self.control.begin();
            if let Some(reason) = self.evaluate(&guard, radio_id, &mut report) {
                if self.control.disable_with(&guard, radio_id, reason) {
                    report.disabled.push((radio_id, reason));
                }
            }
        }

        if !report.disabled.is_empty() {
            debug!("Supervisor tick: {} evaluated, disabled {:?}", report.evaluated, report.disabled);
        }
        report
    }

    /// Run the checks for one radio. Returns the disable reason of the first
    /// failing check.
    fn evaluate(&self, _guard: &MutationGuard<'_>, radio_id: RadioId, report: &mut TickReport) -> Option<DisableReason> {
        let store = self.control.store();
        // Re-read under the lock: an operator may have disabled it meanwhile
        let mut radio = store.get(radio_id).filter(|radio| radio.enabled)?;
        report.evaluated += 1;
        let config = self.control.config();

        let Some(operator) = radio.operator else {
            return Some(DisableReason::OperatorLost);
        };
        let present = self
            .control
            .players()
            .locate(operator)
            .is_some_and(|location| within_radius(&location, &radio.position.center(), config.operator_radius));
        if !present {
            trace!("{radio_id}: {operator} lost");
            return Some(DisableReason::OperatorLost);
        }

        let snapshot = range::recompute(self.control.world(), &mut radio, config.max_antenna_scan);
        if !snapshot.is_operational() {
            store.save(&radio);
            self.control.players().notify(operator, Notice::NoAntenna { radio: radio_id });
            return Some(DisableReason::Admin);
        }

        if radio.fuel_seconds > 0 {
            let drain = range::tick_drain(radio.final_range()).min(radio.fuel_seconds);
            radio.fuel_seconds -= drain;
            report.fuel_burned += drain;
        }
        store.save(&radio);

        if radio.fuel_seconds == 0 {
            return Some(DisableReason::Fuel);
        }
        None
    }
}

/// Tick the supervisor every `TICK_PERIOD`. Never returns.
pub async fn supervisor_loop(supervisor: &Supervisor) {
    let mut ticker = Ticker::every(TICK_PERIOD);
    loop {
        ticker.next().await;
        supervisor.tick();
    }
}
