use super::timer::TimerAction;
use crate::api::{ChargeMode, ChargeStatus, RemoteDemand};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// State of a loadpoint after its last cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadpointSnapshot {
    pub name: String,
    pub title: String,
    pub mode: ChargeMode,
    pub status: Option<ChargeStatus>,
    pub connected: bool,
    pub charging: bool,
    pub enabled: bool,
    pub target_current: i64,
    pub effective_current: f64,
    pub charge_power: f64,
    /// Wh since connect
    pub charged_energy: f64,
    pub charge_duration_secs: u64,
    pub phases_configured: u8,
    pub phases_enabled: u8,
    pub phases_active: u8,
    pub phases_measured: u8,
    pub pv_action: TimerAction,
    pub pv_remaining_secs: u64,
    pub phase_action: TimerAction,
    pub phase_remaining_secs: u64,
    pub guard_remaining_secs: u64,
    pub vehicle_title: Option<String>,
    pub vehicle_soc: Option<f64>,
    pub min_soc: u8,
    pub limit_soc: u8,
    /// kWh
    pub limit_energy: f64,
    pub remote_demand: RemoteDemand,
    pub session_id: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl LoadpointSnapshot {
    /// Placeholder before the first cycle
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            title: String::new(),
            mode: ChargeMode::Off,
            status: None,
            connected: false,
            charging: false,
            enabled: false,
            target_current: 0,
            effective_current: 0.0,
            charge_power: 0.0,
            charged_energy: 0.0,
            charge_duration_secs: 0,
            phases_configured: 0,
            phases_enabled: 0,
            phases_active: 0,
            phases_measured: 0,
            pv_action: TimerAction::Inactive,
            pv_remaining_secs: 0,
            phase_action: TimerAction::Inactive,
            phase_remaining_secs: 0,
            guard_remaining_secs: 0,
            vehicle_title: None,
            vehicle_soc: None,
            min_soc: 0,
            limit_soc: 0,
            limit_energy: 0.0,
            remote_demand: RemoteDemand::Enable,
            session_id: None,
            connected_at: None,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_serializes() {
        let snapshot = LoadpointSnapshot::empty("garage");
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["name"], "garage");
        assert_eq!(json["mode"], "off");
        assert_eq!(json["pv_action"], "inactive");
        assert!(json["status"].is_null());
    }
}
