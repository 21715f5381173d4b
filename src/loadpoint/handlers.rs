use super::Loadpoint;
use super::status::{LoadpointEvent, status_events};
use crate::api::ChargeStatus;
use crate::vehicle::Vehicle;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// How long after connecting a vehicle is searched for
pub const VEHICLE_DETECTION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Enabled but not charging for this long triggers a wake-up
pub const WAKE_UP_TIMEOUT: Duration = Duration::from_secs(30);

impl Loadpoint {
    /// Apply a new connector status and dispatch the implied events
    pub(super) fn update_status(&mut self, status: ChargeStatus) {
        let previous = self.status;
        if previous == Some(status) {
            return;
        }
        match previous {
            Some(prev) => self
                .logger
                .info(&format!("charger status: {prev}->{status}")),
            None => self.logger.debug(&format!("charger status: {status}")),
        }
        self.status = Some(status);

        let now = self.clock.now();
        for event in status_events(previous, status) {
            self.events.dispatch_metering(event, now);
            self.handle_event(event, now);
            // Nothing actually changed at startup
            let startup = previous.is_none()
                && matches!(event, LoadpointEvent::Connect | LoadpointEvent::Disconnect);
            if !startup {
                self.events.dispatch_notification(event, now);
            }
        }
    }

    fn handle_event(&mut self, event: LoadpointEvent, now: DateTime<Utc>) {
        match event {
            LoadpointEvent::Connect => self.on_connect(now),
            LoadpointEvent::ChargeStart => {
                self.logger.info("start charging ->");
                self.wake_up_timer.reset();
            }
            LoadpointEvent::ChargeStop => {
                self.logger.info("stop charging <-");
                self.pv.reset_unless_elapsed();
            }
            LoadpointEvent::Disconnect => self.on_disconnect(),
        }
    }

    fn on_connect(&mut self, now: DateTime<Utc>) {
        let session = uuid::Uuid::new_v4().to_string();
        self.logger.set_session_id(Some(session.clone()));
        self.ramp.logger.set_session_id(Some(session.clone()));
        self.pv.logger.set_session_id(Some(session.clone()));
        self.phases.logger.set_session_id(Some(session.clone()));
        self.session_id = Some(session);
        self.logger.info("car connected");

        self.connected_at = Some(now);
        self.wake_up_timer.reset();
        // Act on the current surplus without waiting for a delay
        self.pv.elapse_timer();
        self.ramp.elapse_guard();

        if let Some(vehicle) = self.default_vehicle.clone() {
            self.assign_vehicle(vehicle);
        } else if !self.coordinator.vehicles().is_empty() {
            self.detection_until = Some(
                now + chrono::Duration::from_std(VEHICLE_DETECTION_TIMEOUT)
                    .unwrap_or_else(|_| chrono::Duration::zero()),
            );
            self.logger.debug("vehicle detection started");
        }
    }

    fn on_disconnect(&mut self) {
        self.logger.info("car disconnected");

        self.phases.reset_measured();
        self.detection_until = None;
        if !self.vehicle_id.is_empty() {
            self.vehicle_id.clear();
            self.publish("vehicleIdentity", "");
        }
        self.connected_at = None;
        self.wake_up_timer.reset();
        self.vehicle_soc = None;
        self.soc_updated = None;

        let is_default = match (self.vehicle.vehicle(), &self.default_vehicle) {
            (Some(current), Some(default)) => current.title() == default.title(),
            _ => false,
        };
        if !is_default {
            self.coordinator.release(&self.vehicle);
            self.phases.set_vehicle_phases(0);
        }

        if self.config.reset_on_disconnect {
            self.set_mode(self.config.mode);
            self.set_limits(self.config.min_current, self.config.max_current);
            self.min_soc = self.config.min_soc;
            self.limit_soc = self.config.limit_soc;
            self.limit_energy = self.config.limit_energy;
        }

        self.session_id = None;
        self.logger.set_session_id(None);
        self.ramp.logger.set_session_id(None);
        self.pv.logger.set_session_id(None);
        self.phases.logger.set_session_id(None);
    }

    pub(super) fn assign_vehicle(&mut self, vehicle: Arc<dyn Vehicle>) {
        if self.vehicle.title().as_deref() == Some(vehicle.title()) {
            return;
        }
        self.logger.info(&format!("vehicle updated: {}", vehicle.title()));
        self.phases.set_vehicle_phases(vehicle.phases());
        self.vehicle_soc = None;
        self.soc_updated = None;
        self.coordinator.acquire(&self.vehicle, vehicle);
    }

    /// Identify the connected vehicle by charger id, then by vehicle status
    pub(super) async fn identify_vehicle(&mut self, now: DateTime<Utc>) {
        let charger = Arc::clone(&self.charger);
        if let Some(identifier) = charger.identifier() {
            match identifier.identify().await {
                Ok(id) if id != self.vehicle_id => {
                    self.publish("vehicleIdentity", &id);
                    self.vehicle_id.clone_from(&id);
                    if !id.is_empty() {
                        self.logger.debug(&format!("charger vehicle id: {id}"));
                        if let Some(vehicle) = self.coordinator.identify_by_id(&id) {
                            self.detection_until = None;
                            self.assign_vehicle(vehicle);
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => self.logger.error(&format!("charger vehicle id: {e}")),
            }
        }

        let Some(until) = self.detection_until else {
            return;
        };
        if now > until {
            self.logger.debug("vehicle detection timed out");
            self.detection_until = None;
            return;
        }
        if let Some(vehicle) = self.coordinator.identify_by_status(&self.vehicle).await {
            self.assign_vehicle(vehicle);
            self.detection_until = None;
        }
    }

    /// Refresh the vehicle SoC: every cycle while charging, else per interval
    pub(super) async fn update_vehicle_soc(&mut self, now: DateTime<Utc>) {
        let Some(vehicle) = self.vehicle.vehicle() else {
            return;
        };
        let due = self.charging()
            || self.soc_updated.is_none_or(|at| {
                (now - at)
                    .to_std()
                    .is_ok_and(|d| d >= self.config.soc_poll_interval())
            });
        if !due {
            return;
        }
        self.soc_updated = Some(now);

        match self
            .retry
            .execute("vehicle soc", || vehicle.soc())
            .await
        {
            Ok(soc) => {
                self.vehicle_soc = Some(soc);
                self.publish("vehicleSoc", soc);
                if self.charging()
                    && let Some(estimator) = &self.soc_estimator
                {
                    let remaining =
                        estimator.remaining_charge_duration(soc, self.charge_power, 100.0);
                    self.publish("chargeRemainingDuration", remaining.map(|d| d.as_secs()));
                }
            }
            Err(e) => self.logger.debug(&format!("vehicle soc: {e}")),
        }
    }

    /// Wake a sleeping vehicle that does not start charging after enable
    pub(super) async fn wake_up_if_needed(&mut self, now: DateTime<Utc>) {
        if !(self.ramp.enabled() && self.status == Some(ChargeStatus::B)) {
            self.wake_up_timer.reset();
            return;
        }
        self.wake_up_timer.start(now);
        if !self.wake_up_timer.is_elapsed(now, WAKE_UP_TIMEOUT) {
            return;
        }
        self.wake_up_timer.reset();

        let charger = Arc::clone(&self.charger);
        let result = if let Some(resurrector) = charger.resurrector() {
            self.logger.info("wake-up charger");
            resurrector.wake_up().await
        } else if let Some(vehicle) = self.vehicle.vehicle()
            && let Some(resurrector) = vehicle.resurrector()
        {
            self.logger.info(&format!("wake-up vehicle {}", vehicle.title()));
            resurrector.wake_up().await
        } else {
            Ok(())
        };
        if let Err(e) = result {
            self.logger.error(&format!("wake-up: {e}"));
        }
    }

    /// Publish the vehicle title when the coordinator moved it
    pub(super) fn publish_vehicle_change(&mut self) {
        let title = self.vehicle.title();
        if title != self.published_vehicle {
            if title.is_none() {
                self.phases.set_vehicle_phases(0);
            }
            self.publish("vehicleTitle", title.clone());
            self.published_vehicle = title;
        }
    }
}
