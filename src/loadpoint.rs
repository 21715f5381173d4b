//! Loadpoint: one charger and the controllers driving it
//!
//! A loadpoint is updated once per scheduler tick. Within one update the
//! connector status is read, events are dispatched, a target current is
//! computed for the active mode and finally applied through the ramp.

mod cycle;
pub mod events;
mod handlers;
pub mod phases;
pub mod pv;
pub mod ramp;
pub mod snapshot;
pub mod status;
pub mod timer;

#[cfg(test)]
pub(crate) mod mock;

use crate::api::{
    ChargeMode, ChargeStatus, Charger, Meter, Planner, RemoteDemand, SocEstimator,
};
use crate::circuit::{Circuit, CircuitLoad, Consumer};
use crate::clock::Clock;
use crate::config::LoadpointConfig;
use crate::coordinator::{Coordinator, VehicleSlot};
use crate::error::{HelionError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::publish::{Publisher, publish_value};
use crate::retry::RetryPolicy;
use crate::vehicle::Vehicle;
use chrono::{DateTime, Utc};
use events::{ChargeRater, ChargeTimer, EventDispatcher, LoadpointObserver};
use phases::{PhaseConfig, PhaseController};
use pv::{PvConfig, PvController};
use ramp::{RampConfig, RampController};
use serde::Serialize;
use snapshot::LoadpointSnapshot;
use std::sync::Arc;
use timer::Timer;
use tokio::sync::{mpsc, watch};

pub use status::LoadpointEvent;

/// Devices bound to a loadpoint
pub struct LoadpointDevices {
    pub charger: Arc<dyn Charger>,
    pub meter: Option<Arc<dyn Meter>>,
    pub default_vehicle: Option<Arc<dyn Vehicle>>,
}

/// Site battery state handed to a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatteryBuffer {
    /// A running charge may draw from the battery
    pub buffered: bool,
    /// A PV charge may start from the battery
    pub start: bool,
}

/// Site-wide services shared by all loadpoints
#[derive(Clone)]
pub struct LoadpointContext {
    pub clock: Arc<dyn Clock>,
    pub publisher: Arc<dyn Publisher>,
    pub retry: RetryPolicy,
    pub coordinator: Arc<Coordinator>,
}

pub struct Loadpoint {
    index: usize,
    config: LoadpointConfig,

    charger: Arc<dyn Charger>,
    meter: Option<Arc<dyn Meter>>,
    default_vehicle: Option<Arc<dyn Vehicle>>,

    clock: Arc<dyn Clock>,
    publisher: Arc<dyn Publisher>,
    retry: RetryPolicy,
    coordinator: Arc<Coordinator>,
    circuit: Option<Arc<Circuit>>,
    load: Arc<CircuitLoad>,
    planner: Option<Arc<dyn Planner>>,
    soc_estimator: Option<Arc<dyn SocEstimator>>,
    vehicle: Arc<VehicleSlot>,

    ramp: RampController,
    pv: PvController,
    phases: PhaseController,
    events: EventDispatcher,
    charge_timer: ChargeTimer,
    charge_rater: ChargeRater,

    mode: ChargeMode,
    min_soc: u8,
    limit_soc: u8,
    limit_energy: f64,
    remote_demand: RemoteDemand,
    status: Option<ChargeStatus>,
    charge_power: f64,
    charge_currents: Option<(f64, f64, f64)>,
    session_id: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    detection_until: Option<DateTime<Utc>>,
    vehicle_id: String,
    wake_up_timer: Timer,
    vehicle_soc: Option<f64>,
    soc_updated: Option<DateTime<Utc>>,
    published_vehicle: Option<String>,

    update_tx: Option<mpsc::UnboundedSender<usize>>,
    snapshot_tx: watch::Sender<LoadpointSnapshot>,
    logger: StructuredLogger,
}

impl Loadpoint {
    pub fn new(
        index: usize,
        config: LoadpointConfig,
        devices: LoadpointDevices,
        ctx: LoadpointContext,
    ) -> Self {
        let logger = get_logger_with_context(
            LogContext::new("loadpoint").with_loadpoint(&config.name),
        );
        let switchable = devices.charger.phase_switcher().is_some();
        #[allow(clippy::cast_precision_loss)]
        let (min, max) = (config.min_current as f64, config.max_current as f64);

        let ramp = RampController::new(
            Arc::clone(&devices.charger),
            Arc::clone(&ctx.clock),
            Arc::clone(&ctx.publisher),
            &config.name,
            RampConfig {
                min_current: config.min_current,
                max_current: config.max_current,
                sensitivity: config.sensitivity,
                guard_duration: config.guard_duration(),
            },
            logger.clone(),
        );
        let pv = PvController::new(
            PvConfig {
                min_current: min,
                max_current: max,
                enable: config.enable,
                disable: config.disable,
            },
            Arc::clone(&ctx.clock),
            logger.clone(),
        );
        let phases = PhaseController::new(
            PhaseConfig {
                configured: config.phases,
                min_current: min,
                max_current: max,
                enable_delay: config.enable.delay(),
                disable_delay: config.disable.delay(),
            },
            switchable,
            Arc::clone(&ctx.clock),
            logger.clone(),
        );

        let charge_timer = ChargeTimer::new();
        let charge_rater = ChargeRater::new();
        let mut events = EventDispatcher::new();
        events.add_metering(Box::new(charge_timer.clone()));
        events.add_metering(Box::new(charge_rater.clone()));

        let (snapshot_tx, _) = watch::channel(LoadpointSnapshot::empty(&config.name));

        Self {
            index,
            mode: config.mode,
            min_soc: config.min_soc,
            limit_soc: config.limit_soc,
            limit_energy: config.limit_energy,
            remote_demand: RemoteDemand::Enable,
            vehicle: VehicleSlot::new(&config.name),
            charger: devices.charger,
            meter: devices.meter,
            default_vehicle: devices.default_vehicle,
            clock: ctx.clock,
            publisher: ctx.publisher,
            retry: ctx.retry,
            coordinator: ctx.coordinator,
            circuit: None,
            load: Arc::new(CircuitLoad::new()),
            planner: None,
            soc_estimator: None,
            ramp,
            pv,
            phases,
            events,
            charge_timer,
            charge_rater,
            status: None,
            charge_power: 0.0,
            charge_currents: None,
            session_id: None,
            connected_at: None,
            detection_until: None,
            vehicle_id: String::new(),
            wake_up_timer: Timer::Inactive,
            vehicle_soc: None,
            soc_updated: None,
            published_vehicle: None,
            update_tx: None,
            snapshot_tx,
            logger,
            config,
        }
    }

    /// Draw from `circuit`; the loadpoint reports its load to it every cycle
    pub fn set_circuit(&mut self, circuit: Arc<Circuit>) -> Result<()> {
        let consumer: Arc<dyn Consumer> = self.load.clone();
        circuit.register_consumer(&consumer)?;
        self.circuit = Some(circuit);
        Ok(())
    }

    pub fn set_planner(&mut self, planner: Arc<dyn Planner>) {
        self.planner = Some(planner);
    }

    pub fn set_soc_estimator(&mut self, estimator: Arc<dyn SocEstimator>) {
        self.soc_estimator = Some(estimator);
    }

    /// Add a notification observer; runs after metering and internal handlers
    pub fn add_observer(&mut self, observer: Box<dyn LoadpointObserver>) {
        self.events.add_notification(observer);
    }

    /// Channel used to ask the scheduler for an immediate update
    pub fn set_update_channel(&mut self, tx: mpsc::UnboundedSender<usize>) {
        self.update_tx = Some(tx);
    }

    /// Read the initial charger state and publish configuration
    pub async fn prepare(&mut self) -> Result<()> {
        self.apply_charger_limits().await;
        self.ramp.prepare(&self.retry).await?;
        self.publish("mode", self.mode);
        self.publish("minCurrent", self.ramp.config().min_current);
        self.publish("maxCurrent", self.ramp.config().max_current);
        self.publish("minSoc", self.min_soc);
        self.publish("limitSoc", self.limit_soc);
        self.publish("limitEnergy", self.limit_energy);
        self.publish("phasesConfigured", self.phases.configured());
        self.publish("phasesEnabled", self.phases.phases());
        self.publish("enabled", self.ramp.enabled());
        self.logger.info(&format!(
            "prepared: mode {}, {}-{}A, {}",
            self.mode,
            self.ramp.config().min_current,
            self.ramp.config().max_current,
            if self.phases.switchable() {
                "1p/3p switchable"
            } else {
                "fixed phases"
            }
        ));
        Ok(())
    }

    /// Narrow the configured current range to what the charger supports
    async fn apply_charger_limits(&mut self) {
        let charger = Arc::clone(&self.charger);
        let Some(limiter) = charger.current_limiter() else {
            return;
        };
        let (charger_min, charger_max) = match limiter.min_max_current().await {
            Ok(limits) => limits,
            Err(e) => {
                self.logger.warn(&format!("charger current limits: {e}"));
                return;
            }
        };
        #[allow(clippy::cast_possible_truncation)]
        let (charger_min, charger_max) = (charger_min.ceil() as i64, charger_max.floor() as i64);
        let config = *self.ramp.config();
        let min = config.min_current.max(charger_min);
        let max = config.max_current.min(charger_max);
        if min > max {
            self.logger.warn(&format!(
                "charger limits {charger_min}-{charger_max}A do not overlap {}-{}A, keeping configuration",
                config.min_current, config.max_current
            ));
            return;
        }
        self.set_limits(min, max);
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub const fn mode(&self) -> ChargeMode {
        self.mode
    }

    pub const fn min_soc(&self) -> u8 {
        self.min_soc
    }

    pub const fn limit_soc(&self) -> u8 {
        self.limit_soc
    }

    pub const fn limit_energy(&self) -> f64 {
        self.limit_energy
    }

    pub const fn remote_demand(&self) -> RemoteDemand {
        self.remote_demand
    }

    pub const fn status(&self) -> Option<ChargeStatus> {
        self.status
    }

    pub fn connected(&self) -> bool {
        matches!(self.status, Some(ChargeStatus::B | ChargeStatus::C))
    }

    pub fn charging(&self) -> bool {
        self.status == Some(ChargeStatus::C)
    }

    pub const fn enabled(&self) -> bool {
        self.ramp.enabled()
    }

    pub const fn target_current(&self) -> i64 {
        self.ramp.target_current()
    }

    pub const fn charge_power(&self) -> f64 {
        self.charge_power
    }

    pub fn vehicle_title(&self) -> Option<String> {
        self.vehicle.title()
    }

    /// Handle shared with the coordinator
    pub fn vehicle_slot(&self) -> Arc<VehicleSlot> {
        Arc::clone(&self.vehicle)
    }

    pub const fn phases(&self) -> &PhaseController {
        &self.phases
    }

    pub const fn pv_controller(&self) -> &PvController {
        &self.pv
    }

    pub const fn ramp(&self) -> &RampController {
        &self.ramp
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<LoadpointSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn set_mode(&mut self, mode: ChargeMode) {
        if self.mode == mode {
            return;
        }
        self.logger.info(&format!("set charge mode: {mode}"));
        self.mode = mode;
        self.publish("mode", mode);
        // Hysteresis state belongs to the previous mode
        self.pv.reset_timer();
        self.phases.reset_timer();
        self.request_update();
    }

    /// Charge at maximum current while the vehicle SoC is below `soc`
    pub fn set_min_soc(&mut self, soc: u8) -> Result<()> {
        if soc > 100 {
            return Err(HelionError::validation("min_soc", &format!("{soc}% above 100%")));
        }
        if self.min_soc != soc {
            self.logger.info(&format!("set min soc: {soc}%"));
            self.min_soc = soc;
            self.publish("minSoc", soc);
            self.request_update();
        }
        Ok(())
    }

    /// Stop charging once the vehicle SoC reaches `soc`; 0 or 100 disables
    pub fn set_limit_soc(&mut self, soc: u8) -> Result<()> {
        if soc > 100 {
            return Err(HelionError::validation("limit_soc", &format!("{soc}% above 100%")));
        }
        if self.limit_soc != soc {
            self.logger.info(&format!("set limit soc: {soc}%"));
            self.limit_soc = soc;
            self.publish("limitSoc", soc);
            self.request_update();
        }
        Ok(())
    }

    /// Stop charging after `energy` kWh in this session; 0 disables
    pub fn set_limit_energy(&mut self, energy: f64) -> Result<()> {
        if !energy.is_finite() || energy < 0.0 {
            return Err(HelionError::validation(
                "limit_energy",
                &format!("{energy}kWh is not a valid limit"),
            ));
        }
        if (self.limit_energy - energy).abs() > f64::EPSILON {
            self.logger.info(&format!("set limit energy: {energy:.1}kWh"));
            self.limit_energy = energy;
            self.publish("limitEnergy", energy);
            self.request_update();
        }
        Ok(())
    }

    /// Apply the demand of an external energy manager
    pub fn set_remote_demand(&mut self, demand: RemoteDemand, source: &str) {
        if self.remote_demand == demand {
            return;
        }
        self.logger
            .info(&format!("remote demand from {source}: {demand}"));
        self.remote_demand = demand;
        self.publish("remoteDisabled", demand);
        self.publish("remoteDisabledSource", source);
        self.request_update();
    }

    pub fn set_min_current(&mut self, current: i64) -> Result<()> {
        let max = self.ramp.config().max_current;
        if current <= 0 || current > max {
            return Err(HelionError::validation(
                "min_current",
                &format!("{current}A outside 1..={max}A"),
            ));
        }
        self.set_limits(current, max);
        self.publish("minCurrent", current);
        Ok(())
    }

    pub fn set_max_current(&mut self, current: i64) -> Result<()> {
        let min = self.ramp.config().min_current;
        if current < min {
            return Err(HelionError::validation(
                "max_current",
                &format!("{current}A below minimum {min}A"),
            ));
        }
        self.set_limits(min, current);
        self.publish("maxCurrent", current);
        Ok(())
    }

    fn set_limits(&mut self, min: i64, max: i64) {
        if (min, max) == (self.ramp.config().min_current, self.ramp.config().max_current) {
            return;
        }
        self.logger.info(&format!("set current limits: {min}-{max}A"));
        self.ramp.set_limits(min, max);
        #[allow(clippy::cast_precision_loss)]
        let (min_f, max_f) = (min as f64, max as f64);
        self.pv.set_limits(min_f, max_f);
        self.phases.set_limits(min_f, max_f);
        self.request_update();
    }

    /// Assign a vehicle by title, taking it from another loadpoint if needed
    pub fn set_vehicle(&mut self, title: &str) -> Result<()> {
        let vehicle = self
            .coordinator
            .find(title)
            .ok_or_else(|| HelionError::vehicle(format!("unknown vehicle '{title}'")))?;
        self.assign_vehicle(vehicle);
        self.detection_until = None;
        self.request_update();
        Ok(())
    }

    /// Ask the scheduler to run this loadpoint ahead of its turn
    pub fn request_update(&self) {
        if let Some(tx) = &self.update_tx
            && tx.send(self.index).is_err()
        {
            self.logger.debug("update request dropped: scheduler stopped");
        }
    }

    fn publish<T: Serialize>(&self, key: &str, value: T) {
        publish_value(
            self.publisher.as_ref(),
            Some(&self.config.name),
            key,
            value,
        );
    }
}
