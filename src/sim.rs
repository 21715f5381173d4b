//! Simulated devices for running without hardware
//!
//! A day of PV production is compressed into `day_length_minutes`. The grid
//! meter balances PV against the household base load and all simulated
//! chargers, so loadpoints in PV mode follow the simulated sun.

use crate::api::{
    ChargeStatus, Charger, Identifier, Meter, MeterEnergy, PhaseCurrents, PhaseSwitcher,
    VOLTAGE, current_to_power,
};
use crate::clock::Clock;
use crate::config::{Config, SimulationConfig, VehicleConfig};
use crate::error::{HelionError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::site::SiteDevices;
use crate::vehicle::{Vehicle, VehicleChargeState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

fn lock_error<T>(_: T) -> HelionError {
    HelionError::device("simulated device state poisoned")
}

/// Vehicle whose SoC follows the energy delivered by a simulated charger
pub struct SimVehicle {
    config: VehicleConfig,
    soc: Mutex<f64>,
    status: Mutex<ChargeStatus>,
}

impl SimVehicle {
    pub fn new(config: VehicleConfig, soc: f64) -> Self {
        Self {
            config,
            soc: Mutex::new(soc.clamp(0.0, 100.0)),
            status: Mutex::new(ChargeStatus::A),
        }
    }

    fn add_energy(&self, kwh: f64) {
        if self.config.capacity_kwh <= 0.0 {
            return;
        }
        if let Ok(mut soc) = self.soc.lock() {
            *soc = (*soc + kwh / self.config.capacity_kwh * 100.0).min(100.0);
        }
    }

    fn set_status(&self, status: ChargeStatus) {
        if let Ok(mut s) = self.status.lock() {
            *s = status;
        }
    }
}

#[async_trait]
impl Vehicle for SimVehicle {
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
        self.soc.lock().map(|soc| *soc).map_err(lock_error)
    }

    fn charge_state(&self) -> Option<&dyn VehicleChargeState> {
        Some(self)
    }
}

#[async_trait]
impl VehicleChargeState for SimVehicle {
    async fn status(&self) -> Result<ChargeStatus> {
        self.status.lock().map(|s| *s).map_err(lock_error)
    }
}

struct ChargerState {
    vehicle: Option<Arc<SimVehicle>>,
    enabled: bool,
    current: i64,
    phases: u8,
    energy_kwh: f64,
    updated: DateTime<Utc>,
}

/// Charger with built-in meter; switchable when created with `phases == 0`
pub struct SimCharger {
    state: Mutex<ChargerState>,
    switchable: bool,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
}

impl SimCharger {
    pub fn new(name: &str, phases: u8, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            state: Mutex::new(ChargerState {
                vehicle: None,
                enabled: false,
                current: 0,
                phases: if phases == 0 { 3 } else { phases },
                energy_kwh: 0.0,
                updated: now,
            }),
            switchable: phases == 0,
            clock,
            logger: get_logger(&format!("sim.{name}")),
        }
    }

    /// Plug a vehicle in, or unplug with `None`
    pub fn plug(&self, vehicle: Option<Arc<SimVehicle>>) {
        self.integrate();
        if let Ok(mut state) = self.state.lock() {
            if let Some(old) = &state.vehicle {
                old.set_status(ChargeStatus::A);
            }
            match &vehicle {
                Some(v) => self.logger.info(&format!("vehicle {} plugged in", v.title())),
                None => self.logger.info("vehicle unplugged"),
            }
            state.vehicle = vehicle;
        }
    }

    fn derive_status(state: &ChargerState) -> ChargeStatus {
        match &state.vehicle {
            None => ChargeStatus::A,
            Some(v) if state.enabled && state.current > 0 => {
                if v.soc.lock().is_ok_and(|soc| *soc >= 100.0) {
                    ChargeStatus::B
                } else {
                    ChargeStatus::C
                }
            }
            Some(_) => ChargeStatus::B,
        }
    }

    fn draw(state: &ChargerState) -> f64 {
        if Self::derive_status(state) != ChargeStatus::C {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let current = state.current as f64;
        current_to_power(current, state.phases)
    }

    /// Account energy delivered since the last call
    fn integrate(&self) {
        let now = self.clock.now();
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        #[allow(clippy::cast_precision_loss)]
        let hours = (now - state.updated).num_milliseconds().max(0) as f64 / 3_600_000.0;
        let kwh = Self::draw(&state) * hours / 1000.0;
        state.updated = now;
        state.energy_kwh += kwh;
        if let Some(v) = &state.vehicle {
            v.add_energy(kwh);
            v.set_status(Self::derive_status(&state));
        }
    }

    /// Power currently drawn (W)
    pub fn power(&self) -> f64 {
        self.integrate();
        self.state.lock().map(|s| Self::draw(&s)).unwrap_or_default()
    }
}

#[async_trait]
impl Charger for SimCharger {
    async fn status(&self) -> Result<ChargeStatus> {
        self.integrate();
        self.state
            .lock()
            .map(|s| Self::derive_status(&s))
            .map_err(lock_error)
    }

    async fn enabled(&self) -> Result<bool> {
        self.state.lock().map(|s| s.enabled).map_err(lock_error)
    }

    async fn enable(&self, enable: bool) -> Result<()> {
        self.integrate();
        self.state.lock().map_err(lock_error)?.enabled = enable;
        Ok(())
    }

    async fn max_current(&self, current: i64) -> Result<()> {
        self.integrate();
        self.state.lock().map_err(lock_error)?.current = current;
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
impl PhaseSwitcher for SimCharger {
    async fn set_phases(&self, phases: u8) -> Result<()> {
        self.integrate();
        let mut state = self.state.lock().map_err(lock_error)?;
        if state.enabled {
            return Err(HelionError::device("phase switch while enabled"));
        }
        state.phases = phases;
        Ok(())
    }
}

#[async_trait]
impl Identifier for SimCharger {
    async fn identify(&self) -> Result<String> {
        let state = self.state.lock().map_err(lock_error)?;
        Ok(state
            .vehicle
            .as_ref()
            .and_then(|v| v.identifiers().into_iter().next())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Meter for SimCharger {
    async fn current_power(&self) -> Result<f64> {
        Ok(self.power())
    }

    fn energy(&self) -> Option<&dyn MeterEnergy> {
        Some(self)
    }

    fn phase_currents(&self) -> Option<&dyn PhaseCurrents> {
        Some(self)
    }
}

#[async_trait]
impl MeterEnergy for SimCharger {
    async fn total_energy(&self) -> Result<f64> {
        self.integrate();
        self.state.lock().map(|s| s.energy_kwh).map_err(lock_error)
    }
}

#[async_trait]
impl PhaseCurrents for SimCharger {
    async fn currents(&self) -> Result<(f64, f64, f64)> {
        let state = self.state.lock().map_err(lock_error)?;
        let current = Self::draw(&state) / VOLTAGE / f64::from(state.phases.max(1));
        Ok(match state.phases {
            1 => (current, 0.0, 0.0),
            2 => (current, current, 0.0),
            _ => (current, current, current),
        })
    }
}

/// Grid connection point balancing PV, base load and chargers
pub struct SimGrid {
    config: SimulationConfig,
    start: DateTime<Utc>,
    chargers: Vec<Arc<SimCharger>>,
    clock: Arc<dyn Clock>,
}

impl SimGrid {
    pub fn new(config: SimulationConfig, chargers: Vec<Arc<SimCharger>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            start: clock.now(),
            chargers,
            clock,
        }
    }

    /// PV production at `now`: half a sine over the first half of each day
    pub fn pv_power(&self, now: DateTime<Utc>) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let day_ms = (self.config.day_length_minutes.max(1) * 60_000) as f64;
        #[allow(clippy::cast_precision_loss)]
        let elapsed = (now - self.start).num_milliseconds().max(0) as f64;
        let phase = (elapsed % day_ms) / day_ms;
        (self.config.pv_peak_power * (2.0 * PI * phase).sin()).max(0.0)
    }
}

#[async_trait]
impl Meter for SimGrid {
    async fn current_power(&self) -> Result<f64> {
        let charging: f64 = self.chargers.iter().map(|c| c.power()).sum();
        Ok(self.config.base_load + charging - self.pv_power(self.clock.now()))
    }
}

/// Devices for every configured loadpoint and vehicle
pub fn build_devices(config: &Config, clock: &Arc<dyn Clock>) -> Result<SiteDevices> {
    let logger = get_logger("sim");
    let mut devices = SiteDevices::default();

    let vehicles: Vec<Arc<SimVehicle>> = config
        .vehicles
        .iter()
        .map(|vc| Arc::new(SimVehicle::new(vc.clone(), 30.0)))
        .collect();

    let mut chargers = Vec::with_capacity(config.loadpoints.len());
    for lp in &config.loadpoints {
        let charger = Arc::new(SimCharger::new(&lp.charger, lp.phases, Arc::clone(clock)));
        devices
            .chargers
            .insert(lp.charger.clone(), Arc::clone(&charger) as Arc<dyn Charger>);
        if let Some(meter) = &lp.meter {
            devices
                .meters
                .insert(meter.clone(), Arc::clone(&charger) as Arc<dyn Meter>);
        }
        chargers.push(charger);
    }

    if let Some(title) = &config.simulation.connected_vehicle {
        let vehicle = vehicles
            .iter()
            .find(|v| v.title() == title)
            .ok_or_else(|| HelionError::config(format!("simulation: unknown vehicle '{title}'")))?;
        let charger = chargers
            .first()
            .ok_or_else(|| HelionError::config("simulation: no loadpoint to connect to"))?;
        charger.plug(Some(Arc::clone(vehicle)));
    }

    devices.vehicles = vehicles
        .into_iter()
        .map(|v| v as Arc<dyn Vehicle>)
        .collect();
    devices.grid = Some(Arc::new(SimGrid::new(
        config.simulation.clone(),
        chargers,
        Arc::clone(clock),
    )));

    logger.info(&format!(
        "simulating {} charger(s), {:.0}W peak PV, {:.0}W base load",
        config.loadpoints.len(),
        config.simulation.pv_peak_power,
        config.simulation.base_load
    ));
    Ok(devices)
}
