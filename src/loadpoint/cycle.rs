use super::pv::PvInputs;
use super::snapshot::LoadpointSnapshot;
use super::{BatteryBuffer, Loadpoint};
use crate::api::{ChargeMode, RemoteDemand, current_to_power};
use crate::error::Result;
use std::sync::Arc;

impl Loadpoint {
    /// Run one control cycle without site battery support.
    ///
    /// `site_power` is grid plus battery plus residual power in W, `None`
    /// when it could not be measured; PV modes then keep their last state.
    pub async fn update(&mut self, site_power: Option<f64>) -> Result<()> {
        self.update_with_battery(site_power, BatteryBuffer::default())
            .await
    }

    /// Run one control cycle; `battery` lets PV modes charge from the site battery
    pub async fn update_with_battery(
        &mut self,
        site_power: Option<f64>,
        battery: BatteryBuffer,
    ) -> Result<()> {
        let now = self.clock.now();

        let charger = Arc::clone(&self.charger);
        let status = match self.retry.execute("charger status", || charger.status()).await {
            Ok(status) => status,
            Err(e) => {
                self.logger.error(&format!("charger status: {e}"));
                return Err(e);
            }
        };
        self.update_status(status);
        self.publish("connected", self.connected());
        self.publish("charging", self.charging());

        self.update_charge_power().await;
        self.update_charge_currents().await;

        if self.connected() {
            self.identify_vehicle(now).await;
            self.update_vehicle_soc(now).await;
        }
        self.publish_vehicle_change();

        if let Err(e) = self.ramp.sync(&self.retry).await {
            self.logger.error(&format!("charger sync: {e}"));
        }

        let result = self.apply_strategy(site_power, battery).await;
        if let Err(e) = &result {
            self.logger.error(&format!("charger control: {e}"));
        }

        self.wake_up_if_needed(now).await;
        self.update_circuit_load();
        self.publish_cycle();
        result
    }

    async fn update_charge_power(&mut self) {
        let power = if let Some(meter) = self.meter.clone() {
            match self.retry.execute("charge power", || meter.current_power()).await {
                Ok(power) => power,
                Err(e) => {
                    self.logger.error(&format!("charge meter: {e}"));
                    return;
                }
            }
        } else if self.ramp.enabled() && self.charging() {
            #[allow(clippy::cast_precision_loss)]
            let current = self.ramp.target_current() as f64;
            current_to_power(current, self.phases.active_phases())
        } else {
            0.0
        };

        if power < -1.0 {
            self.logger
                .warn(&format!("charge power must not be negative: {power:.0}W"));
        }
        self.charge_power = power;
        self.charge_rater
            .set_charge_power(power, self.clock.now());

        if let Some(meter) = self.meter.clone()
            && let Some(energy) = meter.energy()
        {
            match energy.total_energy().await {
                Ok(total) => self.charge_rater.set_meter_energy(total),
                Err(e) => self.logger.debug(&format!("charge energy: {e}")),
            }
        }
    }

    async fn update_charge_currents(&mut self) {
        self.charge_currents = None;
        let Some(meter) = self.meter.clone() else {
            return;
        };
        let Some(currents) = meter.phase_currents() else {
            return;
        };
        match currents.currents().await {
            Ok(values) => {
                self.charge_currents = Some(values);
                if self.charging() {
                    self.phases.set_measured_currents(values);
                }
            }
            Err(e) => self.logger.debug(&format!("charge currents: {e}")),
        }
    }

    /// Current the vehicle actually draws, bounded by the target
    pub fn effective_current(&self) -> f64 {
        if !self.charging() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let target = self.ramp.target_current() as f64;
        match self.charge_currents {
            Some((l1, l2, l3)) => (l1.max(l2).max(l3) + 2.0).min(target),
            None => target,
        }
    }

    async fn apply_strategy(
        &mut self,
        site_power: Option<f64>,
        battery: BatteryBuffer,
    ) -> Result<()> {
        if !self.connected() {
            self.pv.reset_timer();
            self.phases.reset_timer();
            return self.ramp.ramp_off().await;
        }

        if let Some(phases) = self.phases.pending() {
            return self.execute_phase_switch(phases).await;
        }
        if let Some(phases) = self.phases.required_switch()
            && self.phases.request(phases)
        {
            return self.execute_phase_switch(phases).await;
        }

        if self.limit_energy_reached() {
            self.logger.debug(&format!(
                "limit energy reached: {:.1}kWh >= {:.1}kWh",
                self.charge_rater.charged_energy() / 1e3,
                self.limit_energy
            ));
            return self.force_off().await;
        }
        if self.limit_soc_reached() {
            self.logger.debug(&format!(
                "limit soc reached: {:.1}% >= {}%",
                self.vehicle_soc.unwrap_or_default(),
                self.limit_soc
            ));
            return self.force_off().await;
        }
        if self.remote_demand == RemoteDemand::HardDisable {
            self.logger.debug("remote hard disable");
            return self.force_off().await;
        }
        if self.mode == ChargeMode::Off {
            return self.force_off().await;
        }

        let min_soc_pending = self.min_soc_not_reached();
        let planner_active = self
            .planner
            .as_ref()
            .is_some_and(|p| p.active(self.clock.now()));

        if min_soc_pending || planner_active || self.mode == ChargeMode::Now {
            if min_soc_pending {
                self.logger.debug(&format!(
                    "min soc not reached: {:.1}% < {}%",
                    self.vehicle_soc.unwrap_or_default(),
                    self.min_soc
                ));
                // PV modes may disable right after reaching the minimum
                self.pv.elapse_timer();
            } else if planner_active {
                self.logger.debug("planner active");
            }
            if self.phases.request_max() {
                return self
                    .execute_phase_switch(self.phases.pending().unwrap_or(3))
                    .await;
            }
            #[allow(clippy::cast_precision_loss)]
            let max = self.ramp.config().max_current as f64;
            return self.apply_target(max, false).await;
        }

        if self.remote_demand == RemoteDemand::SoftDisable {
            self.logger.debug("remote soft disable");
            return self.force_off().await;
        }

        let Some(site_power) = site_power else {
            self.logger
                .debug("site power unavailable, keeping charger state");
            return Ok(());
        };

        if self.phases.switchable() {
            let available = -site_power + self.charge_power;
            if let Some(phases) = self.phases.evaluate(available)
                && self.phases.request(phases)
            {
                return self.execute_phase_switch(phases).await;
            }
        }

        let inputs = PvInputs {
            mode: self.mode,
            site_power,
            enabled: self.ramp.enabled(),
            effective_current: self.effective_current(),
            active_phases: self.phases.active_phases(),
            phase_timer_active: !self.phases.timer().is_inactive(),
            charging: self.charging(),
            battery_buffered: battery.buffered,
            battery_start: battery.start,
        };
        let target = self.pv.target_current(&inputs);
        self.apply_target(target, true).await
    }

    /// Switch off without waiting for the guard
    async fn force_off(&mut self) -> Result<()> {
        self.pv.reset_timer();
        self.ramp.elapse_guard();
        self.ramp.ramp_off().await
    }

    /// Session energy limit, for vehicles without a known SoC
    fn limit_energy_reached(&self) -> bool {
        self.limit_energy > 0.0
            && self.vehicle_soc.is_none()
            && self.charge_rater.charged_energy() / 1e3 >= self.limit_energy
    }

    fn limit_soc_reached(&self) -> bool {
        self.vehicle.vehicle().is_some()
            && self.limit_soc > 0
            && self.limit_soc < 100
            && self
                .vehicle_soc
                .is_some_and(|soc| soc >= f64::from(self.limit_soc))
    }

    fn min_soc_not_reached(&self) -> bool {
        self.vehicle.vehicle().is_some()
            && self.min_soc > 0
            && self
                .vehicle_soc
                .is_some_and(|soc| soc < f64::from(self.min_soc))
    }

    /// Cap `target` by the circuit and hand it to the ramp
    async fn apply_target(&mut self, target: f64, ramp: bool) -> Result<()> {
        #[allow(clippy::cast_precision_loss)]
        let min = self.ramp.config().min_current as f64;
        let mut target = target;

        if target > 0.0
            && let Some(circuit) = &self.circuit
        {
            #[allow(clippy::cast_precision_loss)]
            let old = if self.ramp.enabled() {
                self.ramp.target_current() as f64
            } else {
                0.0
            };
            let capped = circuit.validate_current(old, target).await;
            if capped < target {
                self.logger.debug(&format!(
                    "circuit {} limits current: {target:.1}A -> {capped:.1}A",
                    circuit.name()
                ));
            }
            target = if capped < min { 0.0 } else { capped };
        }

        #[allow(clippy::cast_possible_truncation)]
        let amps = target.floor() as i64;
        if amps <= 0 {
            return self.ramp.ramp_off().await;
        }
        if ramp && self.ramp.enabled() {
            return self.ramp.ramp_up_down(amps).await;
        }
        self.ramp.ramp_on(amps).await
    }

    /// Drive the charger off, then switch phases once it is disabled
    async fn execute_phase_switch(&mut self, phases: u8) -> Result<()> {
        let charger = Arc::clone(&self.charger);
        let Some(switcher) = charger.phase_switcher() else {
            self.phases.complete_switch(phases);
            return Ok(());
        };

        self.ramp.elapse_guard();
        if self.ramp.enabled() {
            self.ramp.ramp_off().await?;
            if self.ramp.enabled() {
                self.logger.debug("phase switch: waiting for charger to disable");
                return Ok(());
            }
        }

        switcher.set_phases(phases).await?;
        self.logger.info(&format!("switched phases: {phases}p"));
        self.phases.complete_switch(phases);
        self.publish("phasesEnabled", phases);

        // Re-enable without waiting on the next cycle
        self.pv.elapse_timer();
        self.ramp.elapse_guard();
        Ok(())
    }

    fn update_circuit_load(&self) {
        #[allow(clippy::cast_precision_loss)]
        let load = match self.charge_currents {
            Some((l1, l2, l3)) => l1.max(l2).max(l3),
            None if self.ramp.enabled() => self.ramp.target_current() as f64,
            None => 0.0,
        };
        self.load.set(load);
    }

    fn publish_cycle(&self) {
        let now = self.clock.now();
        let (pv_action, pv_remaining) = self.pv.status();
        let (phase_action, phase_remaining) = self.phases.status();

        self.publish("chargePower", self.charge_power);
        self.publish("chargedEnergy", self.charge_rater.charged_energy());
        self.publish("chargeDuration", self.charge_timer.duration(now).as_secs());
        self.publish("effectiveCurrent", self.effective_current());
        self.publish("phasesActive", self.phases.active_phases());
        self.publish("pvAction", pv_action);
        self.publish("pvRemaining", pv_remaining.as_secs());
        self.publish("phaseAction", phase_action);
        self.publish("phaseRemaining", phase_remaining.as_secs());

        let snapshot = LoadpointSnapshot {
            name: self.config.name.clone(),
            title: self.config.title.clone(),
            mode: self.mode,
            status: self.status,
            connected: self.connected(),
            charging: self.charging(),
            enabled: self.ramp.enabled(),
            target_current: self.ramp.target_current(),
            effective_current: self.effective_current(),
            charge_power: self.charge_power,
            charged_energy: self.charge_rater.charged_energy(),
            charge_duration_secs: self.charge_timer.duration(now).as_secs(),
            phases_configured: self.phases.configured(),
            phases_enabled: self.phases.phases(),
            phases_active: self.phases.active_phases(),
            phases_measured: self.phases.measured(),
            pv_action,
            pv_remaining_secs: pv_remaining.as_secs(),
            phase_action,
            phase_remaining_secs: phase_remaining.as_secs(),
            guard_remaining_secs: self.ramp.guard_remaining().as_secs(),
            vehicle_title: self.vehicle.title(),
            vehicle_soc: self.vehicle_soc,
            min_soc: self.min_soc,
            limit_soc: self.limit_soc,
            limit_energy: self.limit_energy,
            remote_demand: self.remote_demand,
            session_id: self.session_id.clone(),
            connected_at: self.connected_at,
            updated_at: now,
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}
