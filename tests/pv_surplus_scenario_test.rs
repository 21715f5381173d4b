mod common;

use common::{Call, TestCharger, TestMeter};
use helion::api::{ChargeMode, ChargeStatus};
use helion::clock::MockClock;
use helion::config::ThresholdConfig;
use helion::publish::RecordingPublisher;
use helion::site::{Site, SiteDevices};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    site: Site,
    charger: Arc<TestCharger>,
    grid: Arc<TestMeter>,
    clock: Arc<MockClock>,
    publisher: Arc<RecordingPublisher>,
}

impl Harness {
    async fn new(charger: TestCharger, phases: u8) -> Self {
        let mut lp = common::loadpoint("garage");
        lp.mode = ChargeMode::Pv;
        lp.phases = phases;
        lp.enable = ThresholdConfig {
            threshold: 0.0,
            delay_seconds: 60,
        };
        lp.disable = ThresholdConfig {
            threshold: 0.0,
            delay_seconds: 180,
        };
        let config = common::config(vec![lp]);

        let charger = Arc::new(charger);
        let grid = Arc::new(TestMeter::new(0.0));
        let clock = MockClock::shared();
        let publisher = Arc::new(RecordingPublisher::new());
        let mut devices = SiteDevices {
            grid: Some(grid.clone()),
            ..SiteDevices::default()
        };
        devices
            .chargers
            .insert("garage".to_string(), charger.clone());

        let site = Site::from_config(&config, devices, clock.clone(), publisher.clone()).unwrap();
        site.prepare().await;
        charger.take_calls();
        Self {
            site,
            charger,
            grid,
            clock,
            publisher,
        }
    }

    async fn cycle(&self, grid_power: f64) -> Vec<Call> {
        self.grid.set_power(grid_power);
        self.site.update(0).await;
        self.charger.take_calls()
    }

    fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }
}

#[tokio::test]
async fn disable_timer_restarts_after_reversal() {
    let h = Harness::new(TestCharger::new(ChargeStatus::B), 3).await;

    // Connect elapses the enable timer: 4.5kW surplus switches on at once
    assert_eq!(h.cycle(-4500.0).await, vec![Call::Enable(true)]);
    h.charger.set_status(ChargeStatus::C);
    assert!(h.cycle(-360.0).await.is_empty());

    // Import starts the disable timer; charging continues at minimum
    assert!(h.cycle(1000.0).await.is_empty());
    assert_eq!(
        h.publisher.last("pvAction"),
        Some(serde_json::json!("disable"))
    );
    h.advance(179);
    assert!(h.cycle(1000.0).await.is_empty());

    // One cycle of surplus resets the timer
    assert!(h.cycle(-360.0).await.is_empty());
    assert_eq!(
        h.publisher.last("pvAction"),
        Some(serde_json::json!("inactive"))
    );
    assert!(h.cycle(1000.0).await.is_empty());
    h.advance(179);
    assert!(h.cycle(1000.0).await.is_empty());

    h.advance(1);
    assert_eq!(h.cycle(1000.0).await, vec![Call::Enable(false)]);
}

#[tokio::test]
async fn surplus_ramps_within_limits() {
    let h = Harness::new(TestCharger::new(ChargeStatus::B), 3).await;
    assert_eq!(h.cycle(-4500.0).await, vec![Call::Enable(true)]);
    h.charger.set_status(ChargeStatus::C);

    // 6A charging plus 3A surplus
    assert_eq!(h.cycle(-2070.0).await, vec![Call::MaxCurrent(9)]);
    // Surplus beyond the maximum is capped
    assert_eq!(h.cycle(-20000.0).await, vec![Call::MaxCurrent(16)]);
    assert_eq!(
        h.publisher.last("chargeCurrent"),
        Some(serde_json::json!(16))
    );
}

#[tokio::test]
async fn missing_grid_reading_keeps_charger_state() {
    let h = Harness::new(TestCharger::new(ChargeStatus::B), 3).await;
    assert_eq!(h.cycle(-4500.0).await, vec![Call::Enable(true)]);

    h.grid.fail();
    h.site.update(0).await;
    h.advance(3600);
    h.site.update(0).await;
    assert!(h.charger.take_calls().is_empty());
    assert!(h.charger.is_enabled());
}

#[tokio::test]
async fn automatic_phases_scale_down_and_up() {
    let h = Harness::new(TestCharger::switchable(ChargeStatus::B), 0).await;

    // Unknown phases with 4.5kW surplus: charge at once, 3p after the delay
    assert_eq!(h.cycle(-4500.0).await, vec![Call::Enable(true)]);
    h.charger.set_status(ChargeStatus::C);
    assert!(h.cycle(-360.0).await.is_empty());
    h.advance(60);
    assert_eq!(
        h.cycle(-360.0).await,
        vec![Call::Enable(false), Call::Phases(3)]
    );

    // Switching re-enables without waiting for the guard
    h.charger.set_status(ChargeStatus::B);
    assert_eq!(h.cycle(-4500.0).await, vec![Call::Enable(true)]);

    // 1.5kW surplus is too little for 3p: the phase timer suppresses a disable
    h.charger.set_status(ChargeStatus::C);
    assert!(h.cycle(2640.0).await.is_empty());
    assert_eq!(
        h.publisher.last("phaseAction"),
        Some(serde_json::json!("scale1p"))
    );
    h.advance(180);
    assert_eq!(
        h.cycle(2640.0).await,
        vec![Call::Enable(false), Call::Phases(1)]
    );

    h.charger.set_status(ChargeStatus::B);
    assert_eq!(h.cycle(-1500.0).await, vec![Call::Enable(true)]);
    let lp = h.site.loadpoints()[0].lock().await;
    assert_eq!(lp.phases().phases(), 1);
    assert_eq!(lp.phases().active_phases(), 1);
}
