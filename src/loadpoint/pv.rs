//! PV surplus controller
//!
//! Turns site power into a desired charge current with enable/disable
//! hysteresis. A result of 0 means "charging should be off".

use super::timer::{Timer, TimerAction};
use crate::api::{ChargeMode, power_to_current};
use crate::clock::Clock;
use crate::config::ThresholdConfig;
use crate::logging::StructuredLogger;
use std::sync::Arc;
use std::time::Duration;

/// Per-cycle inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PvInputs {
    pub mode: ChargeMode,
    /// Grid + battery + residual (W); negative means surplus
    pub site_power: f64,
    pub enabled: bool,
    /// Current the vehicle is drawing (A)
    pub effective_current: f64,
    pub active_phases: u8,
    /// A phase switch timer is running
    pub phase_timer_active: bool,
    /// Vehicle is drawing current
    pub charging: bool,
    /// Site battery may support a running charge
    pub battery_buffered: bool,
    /// Site battery may support starting a charge
    pub battery_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PvConfig {
    pub min_current: f64,
    pub max_current: f64,
    pub enable: ThresholdConfig,
    pub disable: ThresholdConfig,
}

pub struct PvController {
    config: PvConfig,
    timer: Timer,
    action: TimerAction,
    clock: Arc<dyn Clock>,
    pub(super) logger: StructuredLogger,
}

impl PvController {
    pub fn new(config: PvConfig, clock: Arc<dyn Clock>, logger: StructuredLogger) -> Self {
        Self {
            config,
            timer: Timer::Inactive,
            action: TimerAction::Inactive,
            clock,
            logger,
        }
    }

    pub const fn config(&self) -> &PvConfig {
        &self.config
    }

    pub fn set_limits(&mut self, min_current: f64, max_current: f64) {
        self.config.min_current = min_current;
        self.config.max_current = max_current;
    }

    pub const fn timer(&self) -> Timer {
        self.timer
    }

    pub fn reset_timer(&mut self) {
        if !self.timer.is_inactive() {
            self.logger.debug("pv timer reset");
        }
        self.timer.reset();
        self.action = TimerAction::Inactive;
    }

    /// Let the next decision act without waiting for a delay
    pub fn elapse_timer(&mut self) {
        self.logger.debug("pv timer elapse");
        self.timer.elapse();
    }

    /// Reset unless forced elapsed (after connect or a phase switch)
    pub fn reset_unless_elapsed(&mut self) {
        if !self.timer.is_forced_elapsed() {
            self.reset_timer();
        }
    }

    /// Running action and time left
    pub fn status(&self) -> (TimerAction, Duration) {
        let delay = match self.action {
            TimerAction::Enable => self.config.enable.delay(),
            TimerAction::Disable => self.config.disable.delay(),
            _ => Duration::ZERO,
        };
        (self.action, self.timer.remaining(self.clock.now(), delay))
    }

    /// Desired current (A), 0 meaning off
    pub fn target_current(&mut self, inputs: &PvInputs) -> f64 {
        let min = self.config.min_current;
        let max = self.config.max_current;

        match inputs.mode {
            ChargeMode::Off => {
                self.reset_timer();
                return 0.0;
            }
            ChargeMode::Now => return max,
            ChargeMode::MinPv | ChargeMode::Pv => {}
        }

        let delta = power_to_current(-inputs.site_power, inputs.active_phases);
        let target = (inputs.effective_current + delta).max(0.0);
        self.logger.debug(&format!(
            "pv charge current: {target:.3}A = {:.3}A + {delta:.3}A ({:.0}W @ {}p)",
            inputs.effective_current, inputs.site_power, inputs.active_phases
        ));

        let floor = inputs.mode == ChargeMode::MinPv
            || inputs.battery_start
            || (inputs.battery_buffered && inputs.charging);
        if floor && target < min {
            return min;
        }

        let now = self.clock.now();

        if inputs.mode == ChargeMode::Pv && inputs.enabled && target < min {
            let disable = self.config.disable;
            if inputs.site_power >= disable.threshold && !inputs.phase_timer_active {
                if self.timer.start(now) || self.action != TimerAction::Disable {
                    self.logger.debug(&format!(
                        "pv disable timer start: {}s",
                        disable.delay_seconds
                    ));
                }
                self.action = TimerAction::Disable;
                if self.timer.is_elapsed(now, disable.delay()) {
                    self.logger.debug("pv disable timer elapsed");
                    return 0.0;
                }
                return min;
            }
            self.reset_timer();
            return min;
        }

        if inputs.mode == ChargeMode::Pv && !inputs.enabled {
            let enable = self.config.enable;
            let wants_on = if enable.threshold == 0.0 {
                target >= min
            } else {
                inputs.site_power <= enable.threshold
            };
            if wants_on {
                if self.timer.start(now) || self.action != TimerAction::Enable {
                    self.logger.debug(&format!(
                        "pv enable timer start: {}s",
                        enable.delay_seconds
                    ));
                }
                self.action = TimerAction::Enable;
                if self.timer.is_elapsed(now, enable.delay()) {
                    self.logger.debug("pv enable timer elapsed");
                    return min;
                }
            } else {
                self.reset_timer();
            }
            return 0.0;
        }

        self.reset_timer();
        target.min(max)
    }
}
