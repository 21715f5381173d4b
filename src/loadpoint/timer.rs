use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Hysteresis timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timer {
    /// Not running
    #[default]
    Inactive,
    /// Condition holding since the given instant
    Running(DateTime<Utc>),
    /// Treated as expired regardless of delay
    Elapsed,
}

/// Published state of a running timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerAction {
    Inactive,
    Enable,
    Disable,
    Scale1p,
    Scale3p,
}

impl Timer {
    /// Start unless already running or elapsed
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if matches!(self, Self::Inactive) {
            *self = Self::Running(now);
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        *self = Self::Inactive;
    }

    pub fn elapse(&mut self) {
        *self = Self::Elapsed;
    }

    pub const fn is_inactive(&self) -> bool {
        matches!(self, Self::Inactive)
    }

    pub const fn is_forced_elapsed(&self) -> bool {
        matches!(self, Self::Elapsed)
    }

    /// Whether `delay` has passed since the timer started
    pub fn is_elapsed(&self, now: DateTime<Utc>, delay: Duration) -> bool {
        match self {
            Self::Inactive => false,
            Self::Elapsed => true,
            Self::Running(since) => (now - *since).to_std().is_ok_and(|d| d >= delay),
        }
    }

    /// Time left until elapsed, zero when inactive or elapsed
    pub fn remaining(&self, now: DateTime<Utc>, delay: Duration) -> Duration {
        match self {
            Self::Running(since) => {
                let passed = (now - *since).to_std().unwrap_or(Duration::ZERO);
                delay.saturating_sub(passed)
            }
            Self::Inactive | Self::Elapsed => Duration::ZERO,
        }
    }
}
