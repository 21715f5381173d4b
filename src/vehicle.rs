//! Vehicle integrations
//!
//! Vehicles are reported by external APIs; only the interface the control
//! engine needs is modelled here, plus a statically configured vehicle.

use crate::api::{ChargeStatus, Resurrector};
use crate::config::VehicleConfig;
use crate::error::{HelionError, Result};
use async_trait::async_trait;

/// Vehicle client trait
#[async_trait]
pub trait Vehicle: Send + Sync {
    /// Unique title
    fn title(&self) -> &str;

    /// Battery capacity (kWh)
    fn capacity(&self) -> f64;

    /// Identifiers reported by chargers (RFID tags, MAC, VIN)
    fn identifiers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Onboard charger phases, 0 if unknown
    fn phases(&self) -> u8 {
        0
    }

    /// State of charge (%)
    async fn soc(&self) -> Result<f64>;

    /// Charge status as seen by the vehicle, if its API reports one
    fn charge_state(&self) -> Option<&dyn VehicleChargeState> {
        None
    }

    fn resurrector(&self) -> Option<&dyn Resurrector> {
        None
    }
}

#[async_trait]
pub trait VehicleChargeState: Send + Sync {
    async fn status(&self) -> Result<ChargeStatus>;
}

/// Vehicle without an API, described by configuration only
#[derive(Debug, Clone)]
pub struct ConfiguredVehicle {
    config: VehicleConfig,
}

impl ConfiguredVehicle {
    pub const fn new(config: VehicleConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Vehicle for ConfiguredVehicle {
    fn title(&self) -> &str {
        &self.config.title
    }

    fn capacity(&self) -> f64 {
        self.config.capacity_kwh
    }

    fn identifiers(&self) -> Vec<String> {
        self.config.identifiers.clone()
    }

    fn phases(&self) -> u8 {
        self.config.phases
    }

    async fn soc(&self) -> Result<f64> {
        Err(HelionError::not_supported(format!(
            "{} has no SoC source",
            self.config.title
        )))
    }
}

/// Match a charger-reported id against a vehicle identifier.
///
/// Comparison is case-insensitive; a trailing or leading `*` in the
/// identifier matches any suffix or prefix.
pub fn identifier_matches(pattern: &str, id: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let id = id.to_ascii_lowercase();
    if pattern == "*" {
        return !id.is_empty();
    }
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(suffix), _) if !suffix.contains('*') => id.ends_with(suffix),
        (_, Some(prefix)) if !prefix.contains('*') => id.starts_with(prefix),
        _ => pattern == id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_exact_is_case_insensitive() {
        assert!(identifier_matches("04AB12", "04ab12"));
        assert!(!identifier_matches("04ab12", "04ab13"));
    }

    #[test]
    fn test_identifier_wildcards() {
        assert!(identifier_matches("04ab*", "04AB99"));
        assert!(identifier_matches("*:9f", "aa:bb:9F"));
        assert!(identifier_matches("*", "anything"));
        assert!(!identifier_matches("*", ""));
        assert!(!identifier_matches("04ab*", "05ab99"));
    }

    #[tokio::test]
    async fn test_configured_vehicle_has_no_soc() {
        let vehicle = ConfiguredVehicle::new(VehicleConfig {
            title: "Zoe".to_string(),
            ..VehicleConfig::default()
        });
        assert_eq!(vehicle.title(), "Zoe");
        assert!(vehicle.soc().await.is_err());
    }
}
