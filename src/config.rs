//! Configuration management for Helion
//!
//! This module handles loading, validation, and management of the controller
//! configuration from YAML files. Device drivers are out of scope: chargers,
//! meters and vehicles are referenced by name and bound at startup.

mod defaults;

use crate::api::ChargeMode;
use crate::error::{HelionError, Result};
use crate::logging::parse_log_level;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "HELION_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Site-wide settings
    #[serde(default)]
    pub site: SiteConfig,

    /// Circuit tree (top-level entries are roots)
    #[serde(default)]
    pub circuits: Vec<CircuitConfig>,

    /// Charge points
    #[serde(default)]
    pub loadpoints: Vec<LoadpointConfig>,

    /// Known vehicles
    #[serde(default)]
    pub vehicles: Vec<VehicleConfig>,

    /// Simulated devices used by the bundled binary
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Console-specific level, falls back to `level`
    pub console_level: Option<String>,

    /// File-specific level, falls back to `level`
    pub file_level: Option<String>,

    /// Path to log file (or directory)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Site-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Display title
    pub title: String,

    /// Scheduler tick; one loadpoint is updated per tick
    pub poll_interval_ms: u64,

    /// Constant offset added to measured site power (W)
    pub residual_power: f64,

    /// Total time budget for retrying a failed device read
    pub retry_budget_ms: u64,

    /// Pause between retry attempts
    pub retry_delay_ms: u64,

    /// Below this battery SoC (%) a charging battery takes precedence; 0 disables
    pub priority_soc: f64,

    /// Above this battery SoC (%) a charging vehicle may discharge the battery; 0 disables
    pub buffer_soc: f64,

    /// Above this battery SoC (%) PV charging may start from the battery; 0 disables
    pub buffer_start_soc: f64,
}

/// One node of the circuit tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Unique circuit name
    pub name: String,

    /// Maximum current per phase (A)
    pub max_current: f64,

    /// Physical meter name; without one the circuit sums its consumers
    #[serde(default)]
    pub meter: Option<String>,

    /// Subcircuits
    #[serde(default)]
    pub circuits: Vec<CircuitConfig>,
}

/// Enable/disable hysteresis settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Site power threshold (W); negative values mean export
    pub threshold: f64,

    /// Time the condition must hold continuously
    pub delay_seconds: u64,
}

/// Loadpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadpointConfig {
    /// Unique loadpoint name
    pub name: String,

    /// Display title
    pub title: String,

    /// Charger device name
    pub charger: String,

    /// Optional charge meter device name
    pub meter: Option<String>,

    /// Default vehicle title
    pub vehicle: Option<String>,

    /// Circuit this loadpoint draws from
    pub circuit: Option<String>,

    /// Mode applied at startup (and after disconnect when resetting)
    pub mode: ChargeMode,

    /// Minimum charge current (A)
    pub min_current: i64,

    /// Maximum charge current (A)
    pub max_current: i64,

    /// Configured phases: 0 automatic, 1 or 3 fixed
    pub phases: u8,

    /// Maximum current change per cycle when ramping (A)
    pub sensitivity: i64,

    /// Minimum time between enable/disable toggles
    pub guard_duration_seconds: u64,

    /// Hysteresis for switching on
    pub enable: ThresholdConfig,

    /// Hysteresis for switching off
    pub disable: ThresholdConfig,

    /// Restore mode and currents to configured values on disconnect
    pub reset_on_disconnect: bool,

    /// Vehicle SoC poll interval while connected but not charging
    pub soc_poll_interval_seconds: u64,

    /// Charge at maximum current below this vehicle SoC (%); 0 disables
    pub min_soc: u8,

    /// Stop charging at this vehicle SoC (%); 0 or 100 disables
    pub limit_soc: u8,

    /// Stop charging after this session energy (kWh) when the SoC is unknown; 0 disables
    pub limit_energy: f64,
}

/// Vehicle description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// Vehicle title, unique
    pub title: String,

    /// Battery capacity (kWh)
    pub capacity_kwh: f64,

    /// RFID tags or charger-reported ids; `*` acts as wildcard
    pub identifiers: Vec<String>,

    /// Phases the onboard charger uses, 0 if unknown
    pub phases: u8,
}

/// Simulated site for the bundled binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// PV peak power (W)
    pub pv_peak_power: f64,

    /// Constant household consumption (W)
    pub base_load: f64,

    /// Minutes for one simulated day
    pub day_length_minutes: u64,

    /// Vehicle plugged in at start, by title
    pub connected_vehicle: Option<String>,
}

impl ThresholdConfig {
    /// Delay as a duration
    pub const fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

impl SiteConfig {
    /// Scheduler interval
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry budget
    pub const fn retry_budget(&self) -> Duration {
        Duration::from_millis(self.retry_budget_ms)
    }

    /// Pause between retries
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl LoadpointConfig {
    /// Contactor guard duration
    pub const fn guard_duration(&self) -> Duration {
        Duration::from_secs(self.guard_duration_seconds)
    }

    /// Vehicle SoC poll interval
    pub const fn soc_poll_interval(&self) -> Duration {
        Duration::from_secs(self.soc_poll_interval_seconds)
    }

    fn validate(&self, index: usize, circuits: &HashSet<&str>) -> Result<()> {
        let field = |name: &str| format!("loadpoints[{index}].{name}");

        if self.name.trim().is_empty() {
            return Err(HelionError::validation(field("name").as_str(), "Cannot be empty"));
        }
        if self.charger.trim().is_empty() {
            return Err(HelionError::validation(
                field("charger").as_str(),
                "Cannot be empty",
            ));
        }
        if self.min_current <= 0 {
            return Err(HelionError::validation(
                field("min_current").as_str(),
                "Must be positive",
            ));
        }
        if self.max_current < self.min_current {
            return Err(HelionError::validation(
                field("max_current").as_str(),
                "Must not be below min_current",
            ));
        }
        if !matches!(self.phases, 0 | 1 | 3) {
            return Err(HelionError::validation(
                field("phases").as_str(),
                "Must be 0 (automatic), 1 or 3",
            ));
        }
        if self.sensitivity <= 0 {
            return Err(HelionError::validation(
                field("sensitivity").as_str(),
                "Must be positive",
            ));
        }
        if self.min_soc > 100 {
            return Err(HelionError::validation(
                field("min_soc").as_str(),
                "Must be within 0..=100",
            ));
        }
        if self.limit_soc > 100 {
            return Err(HelionError::validation(
                field("limit_soc").as_str(),
                "Must be within 0..=100",
            ));
        }
        if !self.limit_energy.is_finite() || self.limit_energy < 0.0 {
            return Err(HelionError::validation(
                field("limit_energy").as_str(),
                "Must not be negative",
            ));
        }
        if let Some(circuit) = &self.circuit
            && !circuits.contains(circuit.as_str())
        {
            return Err(HelionError::validation(
                field("circuit").as_str(),
                &format!("Unknown circuit '{circuit}'"),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Parse configuration from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Load configuration from the environment override or default locations
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Self::from_file(path);
        }

        let default_paths = [
            "helion_config.yaml",
            "/data/helion_config.yaml",
            "/etc/helion/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Self::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.logging.level)
            .map_err(|_| HelionError::validation("logging.level", "Unknown log level"))?;

        if self.site.poll_interval_ms == 0 {
            return Err(HelionError::validation(
                "site.poll_interval_ms",
                "Must be greater than 0",
            ));
        }

        for (field, soc) in [
            ("site.priority_soc", self.site.priority_soc),
            ("site.buffer_soc", self.site.buffer_soc),
            ("site.buffer_start_soc", self.site.buffer_start_soc),
        ] {
            if !(0.0..=100.0).contains(&soc) {
                return Err(HelionError::validation(field, "Must be within 0..=100"));
            }
        }

        let mut circuit_names = HashSet::new();
        let mut stack: Vec<&CircuitConfig> = self.circuits.iter().collect();
        while let Some(circuit) = stack.pop() {
            if circuit.name.trim().is_empty() {
                return Err(HelionError::validation("circuits.name", "Cannot be empty"));
            }
            if !circuit_names.insert(circuit.name.as_str()) {
                return Err(HelionError::validation(
                    "circuits.name",
                    &format!("Duplicate circuit '{}'", circuit.name),
                ));
            }
            if !circuit.max_current.is_finite() || circuit.max_current <= 0.0 {
                return Err(HelionError::validation(
                    "circuits.max_current",
                    &format!("Circuit '{}' needs a positive limit", circuit.name),
                ));
            }
            stack.extend(circuit.circuits.iter());
        }

        let mut loadpoint_names = HashSet::new();
        for (index, loadpoint) in self.loadpoints.iter().enumerate() {
            loadpoint.validate(index, &circuit_names)?;
            if !loadpoint_names.insert(loadpoint.name.as_str()) {
                return Err(HelionError::validation(
                    "loadpoints.name",
                    &format!("Duplicate loadpoint '{}'", loadpoint.name),
                ));
            }
            if let Some(vehicle) = &loadpoint.vehicle
                && !self.vehicles.iter().any(|v| &v.title == vehicle)
            {
                return Err(HelionError::validation(
                    format!("loadpoints[{index}].vehicle").as_str(),
                    &format!("Unknown vehicle '{vehicle}'"),
                ));
            }
        }

        let mut vehicle_titles = HashSet::new();
        for vehicle in &self.vehicles {
            if !vehicle_titles.insert(vehicle.title.as_str()) {
                return Err(HelionError::validation(
                    "vehicles.title",
                    &format!("Duplicate vehicle '{}'", vehicle.title),
                ));
            }
        }

        Ok(())
    }
}
