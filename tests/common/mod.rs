//! Recording devices shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use helion::api::{ChargeStatus, Charger, Identifier, Meter, PhaseCurrents, PhaseSwitcher};
use helion::config::{Config, LoadpointConfig, VehicleConfig};
use helion::error::{HelionError, Result};
use helion::vehicle::{Vehicle, VehicleChargeState};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Enable(bool),
    MaxCurrent(i64),
    Phases(u8),
}

struct ChargerState {
    status: ChargeStatus,
    enabled: bool,
    id: String,
    calls: Vec<Call>,
}

pub struct TestCharger {
    state: Mutex<ChargerState>,
    switchable: bool,
}

impl TestCharger {
    pub fn new(status: ChargeStatus) -> Self {
        Self {
            state: Mutex::new(ChargerState {
                status,
                enabled: false,
                id: String::new(),
                calls: Vec::new(),
            }),
            switchable: false,
        }
    }

    pub fn switchable(status: ChargeStatus) -> Self {
        Self {
            switchable: true,
            ..Self::new(status)
        }
    }

    pub fn set_status(&self, status: ChargeStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub fn set_id(&self, id: &str) {
        self.state.lock().unwrap().id = id.to_string();
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.state.lock().unwrap().calls)
    }
}

#[async_trait]
impl Charger for TestCharger {
    async fn status(&self) -> Result<ChargeStatus> {
        Ok(self.state.lock().unwrap().status)
    }

    async fn enabled(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().enabled)
    }

    async fn enable(&self, enable: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.enabled = enable;
        state.calls.push(Call::Enable(enable));
        Ok(())
    }

    async fn max_current(&self, current: i64) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::MaxCurrent(current));
        Ok(())
    }

    fn phase_switcher(&self) -> Option<&dyn PhaseSwitcher> {
        if self.switchable { Some(self) } else { None }
    }

    fn identifier(&self) -> Option<&dyn Identifier> {
        Some(self)
    }
}

#[async_trait]
impl PhaseSwitcher for TestCharger {
    async fn set_phases(&self, phases: u8) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        assert!(!state.enabled, "phases switched while enabled");
        state.calls.push(Call::Phases(phases));
        Ok(())
    }
}

#[async_trait]
impl Identifier for TestCharger {
    async fn identify(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().id.clone())
    }
}

/// Meter with settable power and optional phase currents
pub struct TestMeter {
    power: Mutex<Option<f64>>,
    currents: Mutex<(f64, f64, f64)>,
}

impl TestMeter {
    pub fn new(power: f64) -> Self {
        Self {
            power: Mutex::new(Some(power)),
            currents: Mutex::new((0.0, 0.0, 0.0)),
        }
    }

    pub fn set_power(&self, power: f64) {
        *self.power.lock().unwrap() = Some(power);
    }

    pub fn fail(&self) {
        *self.power.lock().unwrap() = None;
    }

    pub fn set_currents(&self, currents: (f64, f64, f64)) {
        *self.currents.lock().unwrap() = currents;
    }
}

#[async_trait]
impl Meter for TestMeter {
    async fn current_power(&self) -> Result<f64> {
        self.power
            .lock()
            .unwrap()
            .ok_or_else(|| HelionError::config("meter offline"))
    }

    fn phase_currents(&self) -> Option<&dyn PhaseCurrents> {
        Some(self)
    }
}

#[async_trait]
impl PhaseCurrents for TestMeter {
    async fn currents(&self) -> Result<(f64, f64, f64)> {
        Ok(*self.currents.lock().unwrap())
    }
}

/// Vehicle with a settable charge status
pub struct TestVehicle {
    config: VehicleConfig,
    status: Mutex<ChargeStatus>,
}

impl TestVehicle {
    pub fn new(title: &str, identifiers: &[&str]) -> Self {
        Self {
            config: VehicleConfig {
                title: title.to_string(),
                capacity_kwh: 50.0,
                identifiers: identifiers.iter().map(|s| (*s).to_string()).collect(),
                phases: 0,
            },
            status: Mutex::new(ChargeStatus::A),
        }
    }

    pub fn set_status(&self, status: ChargeStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl Vehicle for TestVehicle {
    fn title(&self) -> &str {
        &self.config.title
    }

    fn capacity(&self) -> f64 {
        self.config.capacity_kwh
    }

    fn identifiers(&self) -> Vec<String> {
        self.config.identifiers.clone()
    }

    async fn soc(&self) -> Result<f64> {
        Ok(42.0)
    }

    fn charge_state(&self) -> Option<&dyn VehicleChargeState> {
        Some(self)
    }
}

#[async_trait]
impl VehicleChargeState for TestVehicle {
    async fn status(&self) -> Result<ChargeStatus> {
        Ok(*self.status.lock().unwrap())
    }
}

/// Site configuration without retries and one loadpoint per charger name
pub fn config(loadpoints: Vec<LoadpointConfig>) -> Config {
    let mut config = Config::default();
    config.site.retry_budget_ms = 0;
    config.site.residual_power = 0.0;
    config.loadpoints = loadpoints;
    config
}

pub fn loadpoint(name: &str) -> LoadpointConfig {
    LoadpointConfig {
        name: name.to_string(),
        charger: name.to_string(),
        ..LoadpointConfig::default()
    }
}
