//! 1p/3p switching decisions
//!
//! Only decides; the loadpoint executes a requested switch through the ramp
//! so that the charger is disabled while the phase count changes.

use super::timer::{Timer, TimerAction};
use crate::api::power_to_current;
use crate::clock::Clock;
use crate::logging::StructuredLogger;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Phase currents at or above this count as an active phase
pub const MIN_ACTIVE_CURRENT: f64 = 1.0;

/// Warnings about phase inconsistency are rate limited to this period
pub const INCONSISTENCY_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseConfig {
    /// 0 automatic, 1 or 3 fixed
    pub configured: u8,
    pub min_current: f64,
    pub max_current: f64,
    /// Continuous surplus before scaling up
    pub enable_delay: Duration,
    /// Continuous deficit before scaling down
    pub disable_delay: Duration,
}

pub struct PhaseController {
    config: PhaseConfig,
    switchable: bool,
    /// Phases enabled at the charger, 0 if unknown
    phases: u8,
    /// Phases drawing current while charging, 0 if unknown
    measured: u8,
    /// Phases of the vehicle's onboard charger, 0 if unknown
    vehicle: u8,
    timer: Timer,
    action: TimerAction,
    pending: Option<u8>,
    last_warning: Option<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
    pub(super) logger: StructuredLogger,
}

impl PhaseController {
    pub fn new(
        config: PhaseConfig,
        switchable: bool,
        clock: Arc<dyn Clock>,
        logger: StructuredLogger,
    ) -> Self {
        // A fixed charger has exactly the configured phases
        let phases = if switchable { 0 } else { config.configured };
        Self {
            config,
            switchable,
            phases,
            measured: 0,
            vehicle: 0,
            timer: Timer::Inactive,
            action: TimerAction::Inactive,
            pending: None,
            last_warning: None,
            clock,
            logger,
        }
    }

    pub const fn switchable(&self) -> bool {
        self.switchable
    }

    pub const fn configured(&self) -> u8 {
        self.config.configured
    }

    pub const fn phases(&self) -> u8 {
        self.phases
    }

    pub const fn measured(&self) -> u8 {
        self.measured
    }

    pub const fn pending(&self) -> Option<u8> {
        self.pending
    }

    pub const fn timer(&self) -> Timer {
        self.timer
    }

    pub fn set_limits(&mut self, min_current: f64, max_current: f64) {
        self.config.min_current = min_current;
        self.config.max_current = max_current;
    }

    pub fn set_vehicle_phases(&mut self, phases: u8) {
        self.vehicle = phases;
    }

    pub fn reset_measured(&mut self) {
        self.measured = 0;
    }

    /// Record phase currents observed while charging
    pub fn set_measured_currents(&mut self, currents: (f64, f64, f64)) {
        let (l1, l2, l3) = currents;
        let active = [l1, l2, l3]
            .iter()
            .filter(|i| **i >= MIN_ACTIVE_CURRENT)
            .count();
        if active > 0 {
            self.measured = u8::try_from(active).unwrap_or(3);
        }
    }

    /// Phases used for power/current conversion
    pub fn active_phases(&self) -> u8 {
        [self.phases, self.measured, self.vehicle]
            .into_iter()
            .filter(|p| (1..=3).contains(p))
            .min()
            .unwrap_or(3)
    }

    /// Most phases the setup could use after switching
    pub fn max_active_phases(&self) -> u8 {
        if !self.switchable {
            return self.active_phases();
        }
        let mut max = match self.config.configured {
            1 => 1,
            _ => 3,
        };
        if (1..=3).contains(&self.vehicle) {
            max = max.min(self.vehicle);
        }
        // Measuring fewer phases than enabled reveals the vehicle's limit
        if self.phases == 3 && (1..=3).contains(&self.measured) {
            max = max.min(self.measured);
        }
        max
    }

    /// Reset measured phases if they contradict the enabled phases
    pub fn check_consistency(&mut self) {
        if self.phases > 0 && self.phases < self.measured {
            let now = self.clock.now();
            let due = self
                .last_warning
                .is_none_or(|at| self.clock.since(at) >= INCONSISTENCY_GRACE_PERIOD);
            if due {
                self.logger.warn(&format!(
                    "inconsistent phases: enabled {}p < measured {}p",
                    self.phases, self.measured
                ));
                self.last_warning = Some(now);
            }
            self.measured = 0;
        }
    }

    /// A fixed configuration on a switchable charger that is not applied yet
    pub const fn required_switch(&self) -> Option<u8> {
        if self.switchable && self.config.configured > 0 && self.phases != self.config.configured
        {
            return Some(self.config.configured);
        }
        None
    }

    /// Ask for `phases` when the charger can switch and is not already there
    pub fn request(&mut self, phases: u8) -> bool {
        if !self.switchable || phases == self.phases || self.pending == Some(phases) {
            return false;
        }
        self.logger.info(&format!("switching phases: {}p -> {phases}p", self.phases));
        self.pending = Some(phases);
        true
    }

    /// Switch to all available phases, honouring a fixed configuration
    pub fn request_max(&mut self) -> bool {
        let target = match self.config.configured {
            0 => 3,
            fixed => fixed,
        };
        self.request(target)
    }

    /// The charger now uses `phases`
    pub fn complete_switch(&mut self, phases: u8) {
        self.phases = phases;
        self.measured = 0;
        self.pending = None;
        self.timer.reset();
        self.action = TimerAction::Inactive;
    }

    pub fn reset_timer(&mut self) {
        self.timer.reset();
        self.action = TimerAction::Inactive;
    }

    /// Running action and time left
    pub fn status(&self) -> (TimerAction, Duration) {
        let delay = match self.action {
            TimerAction::Scale1p => self.config.disable_delay,
            TimerAction::Scale3p => self.config.enable_delay,
            _ => Duration::ZERO,
        };
        (self.action, self.timer.remaining(self.clock.now(), delay))
    }

    fn run_timer(&mut self, action: TimerAction, delay: Duration) -> bool {
        if self.action != action {
            self.timer.reset();
            self.action = action;
        }
        let now = self.clock.now();
        if self.timer.start(now) {
            self.logger
                .debug(&format!("phase {action:?} timer start: {}s", delay.as_secs()));
        }
        self.timer.is_elapsed(now, delay)
    }

    /// Evaluate automatic switching for `available_power` (W).
    /// Returns the phase count to switch to once its delay elapsed.
    pub fn evaluate(&mut self, available_power: f64) -> Option<u8> {
        if !self.switchable || self.pending.is_some() {
            return None;
        }
        self.check_consistency();

        let active = self.active_phases();
        let max_phases = self.max_active_phases();
        let min = self.config.min_current;
        let max = self.config.max_current;
        let mut waiting = false;

        if power_to_current(available_power, active) < min
            && active > 1
            && self.config.configured < 3
        {
            if self.run_timer(TimerAction::Scale1p, self.config.disable_delay) {
                return Some(1);
            }
            waiting = true;
        }

        if !waiting
            && max_phases > 1
            && self.phases < max_phases
            && power_to_current(available_power, 1) > max
            && power_to_current(available_power, max_phases) >= min
        {
            if self.run_timer(TimerAction::Scale3p, self.config.enable_delay) {
                return Some(max_phases);
            }
            waiting = true;
        }

        if !waiting {
            self.reset_timer();
        }
        None
    }
}
