//! Enable/disable guard and current ramping
//!
//! This is the only place that drives `Charger::enable` and
//! `Charger::max_current`. Two invariants hold at all times:
//! the charger is enabled and disabled only while the current is at the
//! minimum, and no two toggles happen within the guard duration.

use crate::api::Charger;
use crate::clock::Clock;
use crate::error::{HelionError, Result};
use crate::logging::StructuredLogger;
use crate::publish::{Publisher, publish_value};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Toggles within this period after the last one do not warn about sync drift
pub const GUARD_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Current limits and timing of the ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampConfig {
    pub min_current: i64,
    pub max_current: i64,
    pub sensitivity: i64,
    pub guard_duration: Duration,
}

/// Whether enable/disable may be called right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    /// Current above the minimum, must settle first
    Settling,
    /// Current at 0 or the minimum
    ReadyToToggle,
}

pub struct RampController {
    charger: Arc<dyn Charger>,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn Publisher>,
    loadpoint: String,
    config: RampConfig,
    enabled: bool,
    target_current: i64,
    toggle: ToggleState,
    guard_updated: Option<DateTime<Utc>>,
    pub(super) logger: StructuredLogger,
}

impl RampController {
    pub fn new(
        charger: Arc<dyn Charger>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn Publisher>,
        loadpoint: &str,
        config: RampConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            charger,
            clock,
            publisher,
            loadpoint: loadpoint.to_string(),
            config,
            enabled: false,
            target_current: 0,
            toggle: ToggleState::ReadyToToggle,
            guard_updated: None,
            logger,
        }
    }

    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    pub const fn target_current(&self) -> i64 {
        self.target_current
    }

    pub const fn toggle_state(&self) -> ToggleState {
        self.toggle
    }

    pub const fn config(&self) -> &RampConfig {
        &self.config
    }

    /// Replace the current limits; the charger follows on the next set
    pub fn set_limits(&mut self, min_current: i64, max_current: i64) {
        self.config.min_current = min_current;
        self.config.max_current = max_current;
        // A raised minimum can reach the applied current
        self.toggle = if self.target_current <= min_current {
            ToggleState::ReadyToToggle
        } else {
            ToggleState::Settling
        };
    }

    /// Read the initial charger state and settle at the minimum current
    pub async fn prepare(&mut self, retry: &RetryPolicy) -> Result<()> {
        let charger = Arc::clone(&self.charger);
        self.enabled = retry.execute("enabled", || charger.enabled()).await?;
        if self.enabled {
            // Avoid disabling right after startup
            self.guard_updated = Some(self.clock.now());
        }
        self.set_target_current(self.config.min_current).await
    }

    /// Time until the next toggle is allowed
    pub fn guard_remaining(&self) -> Duration {
        self.guard_updated.map_or(Duration::ZERO, |updated| {
            self.config
                .guard_duration
                .saturating_sub(self.clock.since(updated))
        })
    }

    /// Allow the next toggle immediately
    pub fn elapse_guard(&mut self) {
        self.guard_updated = None;
    }

    fn grace_period_elapsed(&self) -> bool {
        self.guard_updated
            .is_none_or(|updated| self.clock.since(updated) > GUARD_GRACE_PERIOD)
    }

    /// Re-apply the cached enabled state if the charger drifted
    pub async fn sync(&mut self, retry: &RetryPolicy) -> Result<()> {
        let charger = Arc::clone(&self.charger);
        let enabled = retry.execute("enabled", || charger.enabled()).await?;
        if enabled == self.enabled {
            return Ok(());
        }
        if self.grace_period_elapsed() {
            self.logger.warn(&format!(
                "charger out of sync: expected {}, got {}",
                status_word(self.enabled),
                status_word(enabled)
            ));
        }
        self.charger.enable(self.enabled).await
    }

    /// Clamp and apply a current; the charger is only called on change
    pub async fn set_target_current(&mut self, current: i64) -> Result<()> {
        let current = current.clamp(self.config.min_current, self.config.max_current);
        if current != self.target_current {
            self.logger.debug(&format!("max charge current: {current}A"));
            self.charger.max_current(current).await?;
        }
        self.target_current = current;
        self.toggle = if current == self.config.min_current {
            ToggleState::ReadyToToggle
        } else {
            ToggleState::Settling
        };
        self.publish_current();
        Ok(())
    }

    /// Enable or disable charging, respecting the guard duration
    pub async fn charger_enable(&mut self, enable: bool) -> Result<()> {
        if self.enabled == enable {
            self.logger
                .debug(&format!("charger already {}", status_word(enable)));
            return Ok(());
        }

        if self.toggle != ToggleState::ReadyToToggle {
            let message = format!(
                "charger {} at {}A; current must be 0 or {}A",
                if enable { "enable" } else { "disable" },
                self.target_current,
                self.config.min_current
            );
            self.logger.error(&message);
            return Err(HelionError::generic(message));
        }

        let remaining = self.guard_remaining();
        if !remaining.is_zero() {
            self.logger.debug(&format!(
                "charger {}: contactor delay {}s",
                if enable { "enable" } else { "disable" },
                remaining.as_secs()
            ));
            return Ok(());
        }

        self.charger.enable(enable).await?;
        self.enabled = enable;
        self.guard_updated = Some(self.clock.now());
        self.logger.info(&format!("charger {}", status_word(enable)));
        publish_value(
            self.publisher.as_ref(),
            Some(&self.loadpoint),
            "enabled",
            enable,
        );
        self.publish_current();
        Ok(())
    }

    /// Move towards `target` by at most the sensitivity
    pub async fn ramp_up_down(&mut self, target: i64) -> Result<()> {
        let current = self.target_current;
        if current == target {
            return Ok(());
        }
        let step = if target > current {
            (current + self.config.sensitivity).min(target)
        } else {
            (current - self.config.sensitivity).max(target)
        };
        self.set_target_current(step).await
    }

    /// Lower to the minimum first, disable on a later call
    pub async fn ramp_off(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.target_current <= self.config.min_current {
            return self.charger_enable(false).await;
        }
        self.set_target_current(self.config.min_current).await
    }

    /// Enable at the minimum if disabled, otherwise apply `target`
    pub async fn ramp_on(&mut self, target: i64) -> Result<()> {
        if self.enabled {
            return self.set_target_current(target).await;
        }
        self.set_target_current(self.config.min_current).await?;
        self.charger_enable(true).await
    }

    fn publish_current(&self) {
        let value = if self.enabled { self.target_current } else { 0 };
        publish_value(
            self.publisher.as_ref(),
            Some(&self.loadpoint),
            "chargeCurrent",
            value,
        );
    }
}

const fn status_word(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}
