//! Recording devices for unit tests

use crate::api::{
    Battery, ChargeStatus, Charger, CurrentLimiter, Meter, PhaseCurrents, PhaseSwitcher,
    Resurrector,
};
use crate::error::{HelionError, Result};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Enable(bool),
    MaxCurrent(i64),
    Phases(u8),
    WakeUp,
}

#[derive(Debug)]
struct State {
    status: ChargeStatus,
    enabled: bool,
    fail_status: bool,
    calls: Vec<Call>,
}

pub struct MockCharger {
    state: Mutex<State>,
    switchable: bool,
    limits: Option<(f64, f64)>,
    wakes: bool,
}

impl MockCharger {
    pub fn new(status: ChargeStatus, enabled: bool) -> Self {
        Self {
            state: Mutex::new(State {
                status,
                enabled,
                fail_status: false,
                calls: Vec::new(),
            }),
            switchable: false,
            limits: None,
            wakes: false,
        }
    }

    pub fn switchable(mut self) -> Self {
        self.switchable = true;
        self
    }

    pub fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.limits = Some((min, max));
        self
    }

    pub fn with_wake_up(mut self) -> Self {
        self.wakes = true;
        self
    }

    pub fn set_status(&self, status: ChargeStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().enabled = enabled;
    }

    pub fn fail_status(&self, fail: bool) {
        self.state.lock().unwrap().fail_status = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.state.lock().unwrap().calls)
    }

    pub fn enable_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Enable(_)))
            .count()
    }
}

#[async_trait]
impl Charger for MockCharger {
    async fn status(&self) -> Result<ChargeStatus> {
        let state = self.state.lock().unwrap();
        if state.fail_status {
            return Err(HelionError::device("status unavailable"));
        }
        Ok(state.status)
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

    fn current_limiter(&self) -> Option<&dyn CurrentLimiter> {
        if self.limits.is_some() { Some(self) } else { None }
    }

    fn resurrector(&self) -> Option<&dyn Resurrector> {
        if self.wakes { Some(self) } else { None }
    }
}

#[async_trait]
impl Resurrector for MockCharger {
    async fn wake_up(&self) -> Result<()> {
        self.state.lock().unwrap().calls.push(Call::WakeUp);
        Ok(())
    }
}

#[async_trait]
impl CurrentLimiter for MockCharger {
    async fn min_max_current(&self) -> Result<(f64, f64)> {
        self.limits
            .ok_or_else(|| HelionError::not_supported("current limits"))
    }
}

#[async_trait]
impl PhaseSwitcher for MockCharger {
    async fn set_phases(&self, phases: u8) -> Result<()> {
        self.state.lock().unwrap().calls.push(Call::Phases(phases));
        Ok(())
    }
}

/// Meter with settable power and phase currents
pub struct MockMeter {
    power: Mutex<Result<f64>>,
    currents: Mutex<Option<(f64, f64, f64)>>,
    soc: Option<f64>,
}

impl MockMeter {
    pub fn new(power: f64) -> Self {
        Self {
            power: Mutex::new(Ok(power)),
            currents: Mutex::new(None),
            soc: None,
        }
    }

    pub fn with_battery(power: f64, soc: f64) -> Self {
        Self {
            soc: Some(soc),
            ..Self::new(power)
        }
    }

    pub fn set_power(&self, power: f64) {
        *self.power.lock().unwrap() = Ok(power);
    }

    pub fn fail(&self) {
        *self.power.lock().unwrap() = Err(HelionError::device("meter offline"));
    }

    pub fn set_currents(&self, currents: (f64, f64, f64)) {
        *self.currents.lock().unwrap() = Some(currents);
    }
}

#[async_trait]
impl Meter for MockMeter {
    async fn current_power(&self) -> Result<f64> {
        match &*self.power.lock().unwrap() {
            Ok(p) => Ok(*p),
            Err(e) => Err(HelionError::device(e.to_string())),
        }
    }

    fn phase_currents(&self) -> Option<&dyn PhaseCurrents> {
        Some(self)
    }

    fn battery(&self) -> Option<&dyn Battery> {
        if self.soc.is_some() { Some(self) } else { None }
    }
}

#[async_trait]
impl Battery for MockMeter {
    async fn soc(&self) -> Result<f64> {
        self.soc.ok_or_else(|| HelionError::not_supported("battery soc"))
    }
}

#[async_trait]
impl PhaseCurrents for MockMeter {
    async fn currents(&self) -> Result<(f64, f64, f64)> {
        self.currents
            .lock()
            .unwrap()
            .ok_or_else(|| HelionError::device("no currents"))
    }
}
