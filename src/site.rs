//! Site: grid metering, circuits, vehicles and loadpoints
//!
//! The site owns everything shared between loadpoints and computes the power
//! balance handed to each loadpoint cycle. Loadpoints are driven by the
//! [`Scheduler`] one at a time.

mod scheduler;

pub use scheduler::{Scheduler, ShutdownHandle};

use crate::api::{Charger, Meter};
use crate::circuit::{CircuitStatus, CircuitTree, build_circuits_with_meters};
use crate::clock::Clock;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::{HelionError, Result};
use crate::loadpoint::{BatteryBuffer, Loadpoint, LoadpointContext, LoadpointDevices};
use crate::logging::{StructuredLogger, get_logger};
use crate::publish::{Publisher, publish_value};
use crate::retry::RetryPolicy;
use crate::vehicle::{ConfiguredVehicle, Vehicle};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// Devices available to the site, resolved by name from the configuration
#[derive(Default)]
pub struct SiteDevices {
    /// Grid meter; positive values are import
    pub grid: Option<Arc<dyn Meter>>,
    /// Battery meters; positive values are discharge
    pub batteries: Vec<Arc<dyn Meter>>,
    pub chargers: HashMap<String, Arc<dyn Charger>>,
    pub meters: HashMap<String, Arc<dyn Meter>>,
    /// Vehicles with live data; configured vehicles without one are static
    pub vehicles: Vec<Arc<dyn Vehicle>>,
}

/// Power balance of one measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SitePower {
    pub grid: f64,
    pub battery: f64,
    pub residual: f64,
    /// Average state of charge of the batteries reporting one
    pub battery_soc: Option<f64>,
}

impl SitePower {
    /// Grid plus battery plus residual power; negative means surplus
    pub fn total(&self) -> f64 {
        self.grid + self.battery + self.residual
    }
}

pub struct Site {
    title: String,
    poll_interval: Duration,
    residual_power: f64,
    priority_soc: f64,
    buffer_soc: f64,
    buffer_start_soc: f64,
    grid: Option<Arc<dyn Meter>>,
    batteries: Vec<Arc<dyn Meter>>,
    circuits: CircuitTree,
    coordinator: Arc<Coordinator>,
    loadpoints: Vec<Arc<Mutex<Loadpoint>>>,
    publisher: Arc<dyn Publisher>,
    retry: RetryPolicy,
    update_rx: Option<mpsc::UnboundedReceiver<usize>>,
    logger: StructuredLogger,
}

impl Site {
    /// Wire circuits, vehicles and loadpoints from `config`.
    ///
    /// Loadpoints still need [`Site::prepare`] before the first cycle.
    pub fn from_config(
        config: &Config,
        devices: SiteDevices,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self> {
        let logger = get_logger("site");
        let retry = RetryPolicy::from_site(&config.site);
        let circuits = build_circuits_with_meters(&config.circuits, &devices.meters)?;

        let mut vehicles: Vec<Arc<dyn Vehicle>> = config
            .vehicles
            .iter()
            .map(|vc| {
                devices
                    .vehicles
                    .iter()
                    .find(|v| v.title() == vc.title)
                    .cloned()
                    .unwrap_or_else(|| -> Arc<dyn Vehicle> {
                        Arc::new(ConfiguredVehicle::new(vc.clone()))
                    })
            })
            .collect();
        for vehicle in &devices.vehicles {
            if !vehicles.iter().any(|v| v.title() == vehicle.title()) {
                vehicles.push(Arc::clone(vehicle));
            }
        }
        let coordinator = Arc::new(Coordinator::new(vehicles));

        let ctx = LoadpointContext {
            clock,
            publisher: Arc::clone(&publisher),
            retry,
            coordinator: Arc::clone(&coordinator),
        };
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let mut loadpoints = Vec::with_capacity(config.loadpoints.len());
        for (index, lp_config) in config.loadpoints.iter().enumerate() {
            let charger = devices.chargers.get(&lp_config.charger).cloned().ok_or_else(|| {
                HelionError::config(format!(
                    "loadpoint '{}': unknown charger '{}'",
                    lp_config.name, lp_config.charger
                ))
            })?;
            let meter = match &lp_config.meter {
                Some(name) => Some(devices.meters.get(name).cloned().ok_or_else(|| {
                    HelionError::config(format!(
                        "loadpoint '{}': unknown meter '{name}'",
                        lp_config.name
                    ))
                })?),
                None => None,
            };
            let default_vehicle = match &lp_config.vehicle {
                Some(title) => Some(coordinator.find(title).ok_or_else(|| {
                    HelionError::config(format!(
                        "loadpoint '{}': unknown vehicle '{title}'",
                        lp_config.name
                    ))
                })?),
                None => None,
            };

            let mut lp = Loadpoint::new(
                index,
                lp_config.clone(),
                LoadpointDevices {
                    charger,
                    meter,
                    default_vehicle,
                },
                ctx.clone(),
            );
            if let Some(name) = &lp_config.circuit {
                let circuit = circuits.find(name).ok_or_else(|| {
                    HelionError::config(format!(
                        "loadpoint '{}': unknown circuit '{name}'",
                        lp_config.name
                    ))
                })?;
                lp.set_circuit(circuit)?;
            }
            lp.set_update_channel(update_tx.clone());
            loadpoints.push(Arc::new(Mutex::new(lp)));
        }

        logger.info(&format!(
            "site '{}': {} loadpoint(s), {} circuit(s), {} vehicle(s)",
            config.site.title,
            loadpoints.len(),
            circuits.len(),
            coordinator.vehicles().len()
        ));

        Ok(Self {
            title: config.site.title.clone(),
            poll_interval: config.site.poll_interval(),
            residual_power: config.site.residual_power,
            priority_soc: config.site.priority_soc,
            buffer_soc: config.site.buffer_soc,
            buffer_start_soc: config.site.buffer_start_soc,
            grid: devices.grid,
            batteries: devices.batteries,
            circuits,
            coordinator,
            loadpoints,
            publisher,
            retry,
            update_rx: Some(update_rx),
            logger,
        })
    }

    /// Prepare every loadpoint; a loadpoint that fails keeps its defaults
    pub async fn prepare(&self) {
        publish_value(self.publisher.as_ref(), None, "siteTitle", &self.title);
        for lp in &self.loadpoints {
            let mut lp = lp.lock().await;
            if let Err(e) = lp.prepare().await {
                self.logger
                    .error(&format!("loadpoint '{}': prepare failed: {e}", lp.name()));
            }
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn loadpoints(&self) -> &[Arc<Mutex<Loadpoint>>] {
        &self.loadpoints
    }

    /// Loadpoint by name
    pub async fn loadpoint(&self, name: &str) -> Option<Arc<Mutex<Loadpoint>>> {
        for lp in &self.loadpoints {
            if lp.lock().await.name() == name {
                return Some(Arc::clone(lp));
            }
        }
        None
    }

    pub const fn circuits(&self) -> &CircuitTree {
        &self.circuits
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    pub(crate) fn take_update_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<usize>> {
        self.update_rx.take()
    }

    /// Measure the power balance; `None` when the grid meter fails
    pub async fn measure_power(&self) -> Option<SitePower> {
        let grid = match &self.grid {
            Some(meter) => {
                let meter = Arc::clone(meter);
                match self
                    .retry
                    .execute("grid power", || meter.current_power())
                    .await
                {
                    Ok(power) => power,
                    Err(e) => {
                        self.logger.error(&format!("grid meter: {e}"));
                        return None;
                    }
                }
            }
            None => 0.0,
        };

        let mut battery = 0.0;
        let mut socs = Vec::new();
        for meter in &self.batteries {
            let meter = Arc::clone(meter);
            match self
                .retry
                .execute("battery power", || meter.current_power())
                .await
            {
                Ok(power) => battery += power,
                Err(e) => self.logger.error(&format!("battery meter: {e}")),
            }
            if let Some(b) = meter.battery() {
                match b.soc().await {
                    Ok(soc) => socs.push(soc),
                    Err(e) => self.logger.error(&format!("battery soc: {e}")),
                }
            }
        }
        let battery_soc =
            (!socs.is_empty()).then(|| socs.iter().sum::<f64>() / socs.len() as f64);

        Some(SitePower {
            grid,
            battery,
            residual: self.residual_power,
            battery_soc,
        })
    }

    /// Apply the home battery policy to a measurement.
    ///
    /// Below the priority SoC a charging battery keeps its power, so it is not
    /// counted as surplus. Above the buffer thresholds the battery may back
    /// PV charging.
    pub fn battery_policy(&self, power: &mut SitePower) -> BatteryBuffer {
        let Some(soc) = power.battery_soc else {
            return BatteryBuffer::default();
        };
        if soc < self.priority_soc {
            if power.battery < 0.0 {
                self.logger.debug(&format!(
                    "battery soc {soc:.0}% below priority {:.0}%, ignoring charge power",
                    self.priority_soc
                ));
                power.battery = 0.0;
            }
            return BatteryBuffer::default();
        }
        BatteryBuffer {
            buffered: self.buffer_soc > 0.0 && soc > self.buffer_soc,
            start: self.buffer_start_soc > 0.0 && soc > self.buffer_start_soc,
        }
    }

    /// Site power in W as seen by the loadpoints, with the battery buffer state
    pub async fn site_power(&self) -> Option<(f64, BatteryBuffer)> {
        let mut power = self.measure_power().await?;
        if let Some(soc) = power.battery_soc {
            self.publish("batterySoc", soc);
        }
        self.publish("gridPower", power.grid);
        self.publish("batteryPower", power.battery);
        let buffer = self.battery_policy(&mut power);
        self.publish("batteryBuffered", buffer.buffered);
        self.publish("residualPower", power.residual);
        self.publish("sitePower", power.total());
        Some((power.total(), buffer))
    }

    /// Run one cycle of the loadpoint at `index`
    pub async fn update(&self, index: usize) {
        let Some(lp) = self.loadpoints.get(index) else {
            self.logger
                .warn(&format!("update requested for unknown loadpoint {index}"));
            return;
        };

        let (site_power, buffer) = match self.site_power().await {
            Some((power, buffer)) => (Some(power), buffer),
            None => (None, BatteryBuffer::default()),
        };
        {
            let mut lp = lp.lock().await;
            if let Err(e) = lp.update_with_battery(site_power, buffer).await {
                self.logger
                    .warn(&format!("loadpoint '{}': cycle failed: {e}", lp.name()));
            }
        }
        self.publish_circuits().await;
    }

    /// Status of all circuits
    pub async fn circuit_status(&self) -> Vec<CircuitStatus> {
        let mut status = Vec::with_capacity(self.circuits.len());
        for circuit in self.circuits.iter() {
            let s = circuit.status().await;
            if s.remaining <= 0.0 && s.current.is_some_and(|c| c > s.max_current) {
                self.logger.warn(&format!(
                    "circuit {} overloaded: {:.1}A > {:.1}A",
                    s.name,
                    s.current.unwrap_or_default(),
                    s.max_current
                ));
            }
            status.push(s);
        }
        status
    }

    async fn publish_circuits(&self) {
        if self.circuits.is_empty() {
            return;
        }
        let status = self.circuit_status().await;
        self.publish("circuits", status);
    }

    fn publish<T: Serialize>(&self, key: &str, value: T) {
        publish_value(self.publisher.as_ref(), None, key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChargeMode, ChargeStatus};
    use crate::clock::MockClock;
    use crate::config::{CircuitConfig, LoadpointConfig, VehicleConfig};
    use crate::loadpoint::mock::{MockCharger, MockMeter};
    use crate::publish::RecordingPublisher;

    fn config() -> Config {
        let mut config = Config::default();
        config.site.residual_power = 100.0;
        config.site.retry_budget_ms = 0;
        config.circuits = vec![CircuitConfig {
            name: "main".to_string(),
            max_current: 32.0,
            meter: None,
            circuits: Vec::new(),
        }];
        config.vehicles = vec![VehicleConfig {
            title: "Zoe".to_string(),
            ..VehicleConfig::default()
        }];
        config.loadpoints = vec![LoadpointConfig {
            name: "garage".to_string(),
            charger: "wallbox".to_string(),
            circuit: Some("main".to_string()),
            vehicle: Some("Zoe".to_string()),
            mode: ChargeMode::Now,
            ..LoadpointConfig::default()
        }];
        config
    }

    fn devices(grid: &Arc<MockMeter>) -> SiteDevices {
        let mut devices = SiteDevices {
            grid: Some(grid.clone()),
            batteries: vec![Arc::new(MockMeter::new(-500.0))],
            ..SiteDevices::default()
        };
        devices.chargers.insert(
            "wallbox".to_string(),
            Arc::new(MockCharger::new(ChargeStatus::B, false)),
        );
        devices
    }

    #[tokio::test]
    async fn test_site_power_sums_sources() {
        let grid = Arc::new(MockMeter::new(-2000.0));
        let publisher = Arc::new(RecordingPublisher::new());
        let site = Site::from_config(&config(), devices(&grid), MockClock::shared(), publisher.clone())
            .unwrap();

        assert_eq!(site.site_power().await.map(|(p, _)| p), Some(-2400.0));
        assert_eq!(publisher.last("gridPower"), Some(serde_json::json!(-2000.0)));

        grid.fail();
        assert_eq!(site.site_power().await, None);
    }

    fn battery_site(soc: f64, battery_power: f64) -> Site {
        let mut config = config();
        config.site.residual_power = 0.0;
        config.site.priority_soc = 50.0;
        config.site.buffer_soc = 80.0;
        config.site.buffer_start_soc = 90.0;
        let grid = Arc::new(MockMeter::new(-1000.0));
        let mut devices = devices(&grid);
        devices.batteries = vec![Arc::new(MockMeter::with_battery(battery_power, soc))];
        Site::from_config(
            &config,
            devices,
            MockClock::shared(),
            Arc::new(RecordingPublisher::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_priority_soc_keeps_battery_charge_power() {
        let site = battery_site(30.0, -2000.0);
        let (power, buffer) = site.site_power().await.unwrap();
        assert_eq!(power, -1000.0);
        assert_eq!(buffer, BatteryBuffer::default());

        // above priority the charge power counts as surplus
        let site = battery_site(60.0, -2000.0);
        let (power, buffer) = site.site_power().await.unwrap();
        assert_eq!(power, -3000.0);
        assert!(!buffer.buffered);
        assert!(!buffer.start);
    }

    #[tokio::test]
    async fn test_buffer_thresholds_are_exclusive() {
        let (_, buffer) = battery_site(80.0, 0.0).site_power().await.unwrap();
        assert!(!buffer.buffered);

        let (_, buffer) = battery_site(85.0, 0.0).site_power().await.unwrap();
        assert!(buffer.buffered);
        assert!(!buffer.start);

        let (_, buffer) = battery_site(95.0, 0.0).site_power().await.unwrap();
        assert!(buffer.buffered);
        assert!(buffer.start);
    }

    #[tokio::test]
    async fn test_battery_without_soc_has_no_buffer() {
        let grid = Arc::new(MockMeter::new(-1000.0));
        let mut config = config();
        config.site.buffer_soc = 10.0;
        let site = Site::from_config(
            &config,
            devices(&grid),
            MockClock::shared(),
            Arc::new(RecordingPublisher::new()),
        )
        .unwrap();
        let (_, buffer) = site.site_power().await.unwrap();
        assert_eq!(buffer, BatteryBuffer::default());
    }

    #[tokio::test]
    async fn test_from_config_resolves_references() {
        let grid = Arc::new(MockMeter::new(0.0));
        let site = Site::from_config(
            &config(),
            devices(&grid),
            MockClock::shared(),
            Arc::new(RecordingPublisher::new()),
        )
        .unwrap();
        assert_eq!(site.loadpoints().len(), 1);
        assert_eq!(site.circuits().len(), 1);
        assert!(site.coordinator().find("Zoe").is_some());
        assert!(site.loadpoint("garage").await.is_some());

        let mut bad = config();
        bad.loadpoints[0].charger = "missing".to_string();
        assert!(
            Site::from_config(
                &bad,
                devices(&grid),
                MockClock::shared(),
                Arc::new(RecordingPublisher::new())
            )
            .is_err()
        );
    }

    #[tokio::test]
    async fn test_update_runs_loadpoint_and_publishes_circuits() {
        let grid = Arc::new(MockMeter::new(0.0));
        let publisher = Arc::new(RecordingPublisher::new());
        let site = Site::from_config(&config(), devices(&grid), MockClock::shared(), publisher.clone())
            .unwrap();
        site.prepare().await;
        site.update(0).await;

        let lp = site.loadpoints()[0].lock().await;
        assert!(lp.connected());
        assert!(lp.enabled());
        assert_eq!(lp.vehicle_title().as_deref(), Some("Zoe"));
        drop(lp);

        let circuits = publisher.last("circuits").unwrap();
        assert_eq!(circuits[0]["name"], "main");
        assert_eq!(circuits[0]["current"], 6.0);
    }
}
