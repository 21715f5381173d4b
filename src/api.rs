//! Device capability interfaces
//!
//! Chargers and meters are modelled as a mandatory base trait plus optional
//! capabilities. A capability is available when its accessor returns `Some`.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nominal grid voltage used for power/current conversion
pub const VOLTAGE: f64 = 230.0;

/// Connector status as defined by IEC 61851
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargeStatus {
    /// Not connected
    A,
    /// Connected, not charging
    B,
    /// Charging
    C,
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        };
        f.write_str(s)
    }
}

/// Charging strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeMode {
    #[default]
    Off,
    Now,
    #[serde(rename = "minpv")]
    MinPv,
    Pv,
}

impl fmt::Display for ChargeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Off => "off",
            Self::Now => "now",
            Self::MinPv => "minpv",
            Self::Pv => "pv",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ChargeMode {
    type Err = crate::error::HelionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "now" => Ok(Self::Now),
            "minpv" => Ok(Self::MinPv),
            "pv" => Ok(Self::Pv),
            _ => Err(crate::error::HelionError::validation(
                "mode",
                &format!("Unknown charge mode '{s}'"),
            )),
        }
    }
}

/// Charging demand of an external energy manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RemoteDemand {
    #[default]
    #[serde(rename = "enable")]
    Enable,
    /// Charging is off whatever the mode
    #[serde(rename = "hard")]
    HardDisable,
    /// Surplus charging is off; `now`, min SoC and plans still charge
    #[serde(rename = "soft")]
    SoftDisable,
}

impl fmt::Display for RemoteDemand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Enable => "enable",
            Self::HardDisable => "hard",
            Self::SoftDisable => "soft",
        })
    }
}

/// EV charger base capabilities
#[async_trait]
pub trait Charger: Send + Sync {
    /// Connector status
    async fn status(&self) -> Result<ChargeStatus>;

    /// Whether the charger currently allows charging
    async fn enabled(&self) -> Result<bool>;

    /// Allow or stop charging
    async fn enable(&self, enable: bool) -> Result<()>;

    /// Set the maximum charge current per phase (A)
    async fn max_current(&self, current: i64) -> Result<()>;

    /// 1p/3p switching, if supported
    fn phase_switcher(&self) -> Option<&dyn PhaseSwitcher> {
        None
    }

    /// Hardware current limits, if reported
    fn current_limiter(&self) -> Option<&dyn CurrentLimiter> {
        None
    }

    /// Vehicle identification (RFID, ISO 15118), if supported
    fn identifier(&self) -> Option<&dyn Identifier> {
        None
    }

    /// Wake-up of a sleeping vehicle, if supported
    fn resurrector(&self) -> Option<&dyn Resurrector> {
        None
    }
}

#[async_trait]
pub trait PhaseSwitcher: Send + Sync {
    async fn set_phases(&self, phases: u8) -> Result<()>;
}

#[async_trait]
pub trait CurrentLimiter: Send + Sync {
    /// Hardware (min, max) current in A
    async fn min_max_current(&self) -> Result<(f64, f64)>;
}

#[async_trait]
pub trait Identifier: Send + Sync {
    /// Identifier of the connected vehicle, empty if unknown
    async fn identify(&self) -> Result<String>;
}

#[async_trait]
pub trait Resurrector: Send + Sync {
    async fn wake_up(&self) -> Result<()>;
}

/// Power meter
#[async_trait]
pub trait Meter: Send + Sync {
    /// Current power (W); for grid meters negative means export
    async fn current_power(&self) -> Result<f64>;

    fn energy(&self) -> Option<&dyn MeterEnergy> {
        None
    }

    fn phase_currents(&self) -> Option<&dyn PhaseCurrents> {
        None
    }

    /// State of charge, for battery meters
    fn battery(&self) -> Option<&dyn Battery> {
        None
    }
}

#[async_trait]
pub trait Battery: Send + Sync {
    /// State of charge (%)
    async fn soc(&self) -> Result<f64>;
}

#[async_trait]
pub trait MeterEnergy: Send + Sync {
    /// Total imported energy (kWh)
    async fn total_energy(&self) -> Result<f64>;
}

/// Per-phase current measurement
#[async_trait]
pub trait PhaseCurrents: Send + Sync {
    /// Currents L1, L2, L3 (A)
    async fn currents(&self) -> Result<(f64, f64, f64)>;
}

/// Optional charge planner
pub trait Planner: Send + Sync {
    /// Whether a plan demands charging at full power right now
    fn active(&self, now: chrono::DateTime<chrono::Utc>) -> bool;

    /// Planned end of charging, if any
    fn plan(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        None
    }
}

/// Optional vehicle state of charge estimator
pub trait SocEstimator: Send + Sync {
    /// Remaining time to reach `target_soc` (%) at `charge_power` (W)
    fn remaining_charge_duration(
        &self,
        soc: f64,
        charge_power: f64,
        target_soc: f64,
    ) -> Option<std::time::Duration>;
}

/// Current needed to transport `power` over `phases` phases
pub fn power_to_current(power: f64, phases: u8) -> f64 {
    power / (VOLTAGE * f64::from(phases.max(1)))
}

/// Power transported by `current` over `phases` phases
pub fn current_to_power(current: f64, phases: u8) -> f64 {
    current * VOLTAGE * f64::from(phases.max(1))
}
