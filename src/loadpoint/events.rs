//! Ordered, synchronous event dispatch
//!
//! Metering observers run before the loadpoint's own handler, notification
//! observers run last. All of them run on the calling task.

use super::status::LoadpointEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Receives lifecycle events of one loadpoint
pub trait LoadpointObserver: Send {
    fn on_event(&mut self, event: LoadpointEvent, now: DateTime<Utc>);
}

/// Observer lists in dispatch order
#[derive(Default)]
pub struct EventDispatcher {
    metering: Vec<Box<dyn LoadpointObserver>>,
    notification: Vec<Box<dyn LoadpointObserver>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_metering(&mut self, observer: Box<dyn LoadpointObserver>) {
        self.metering.push(observer);
    }

    pub fn add_notification(&mut self, observer: Box<dyn LoadpointObserver>) {
        self.notification.push(observer);
    }

    pub fn dispatch_metering(&mut self, event: LoadpointEvent, now: DateTime<Utc>) {
        for observer in &mut self.metering {
            observer.on_event(event, now);
        }
    }

    pub fn dispatch_notification(&mut self, event: LoadpointEvent, now: DateTime<Utc>) {
        for observer in &mut self.notification {
            observer.on_event(event, now);
        }
    }
}

#[derive(Debug, Default)]
struct ChargeTimerState {
    started: Option<DateTime<Utc>>,
    accumulated: Duration,
}

/// Charge duration of the current connection
#[derive(Debug, Clone, Default)]
pub struct ChargeTimer {
    state: Arc<Mutex<ChargeTimerState>>,
}

impl ChargeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.state.lock().map_or(Duration::ZERO, |s| {
            let running = s
                .started
                .and_then(|t| (now - t).to_std().ok())
                .unwrap_or(Duration::ZERO);
            s.accumulated + running
        })
    }
}

impl LoadpointObserver for ChargeTimer {
    fn on_event(&mut self, event: LoadpointEvent, now: DateTime<Utc>) {
        let Ok(mut s) = self.state.lock() else {
            return;
        };
        match event {
            LoadpointEvent::Connect => *s = ChargeTimerState::default(),
            LoadpointEvent::ChargeStart => s.started = Some(now),
            LoadpointEvent::ChargeStop => {
                if let Some(start) = s.started.take() {
                    s.accumulated += (now - start).to_std().unwrap_or(Duration::ZERO);
                }
            }
            LoadpointEvent::Disconnect => {}
        }
    }
}

#[derive(Debug, Default)]
struct ChargeRaterState {
    charging: bool,
    charged_energy: f64,
    start_energy: Option<f64>,
    session_base: f64,
    last_power: Option<(DateTime<Utc>, f64)>,
}

/// Energy charged during the current connection (Wh).
///
/// Uses meter totals when available, otherwise integrates charge power.
#[derive(Debug, Clone, Default)]
pub struct ChargeRater {
    state: Arc<Mutex<ChargeRaterState>>,
}

impl ChargeRater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn charged_energy(&self) -> f64 {
        self.state.lock().map_or(0.0, |s| s.charged_energy)
    }

    /// Integrate power over the time since the previous sample
    pub fn set_charge_power(&self, power: f64, now: DateTime<Utc>) {
        let Ok(mut s) = self.state.lock() else {
            return;
        };
        if s.charging
            && let Some((at, last)) = s.last_power
        {
            let hours = (now - at).num_milliseconds().max(0) as f64 / 3_600_000.0;
            s.charged_energy += last * hours;
        }
        s.last_power = s.charging.then_some((now, power.max(0.0)));
    }

    /// Track a meter's total energy reading (kWh)
    pub fn set_meter_energy(&self, total_kwh: f64) {
        let Ok(mut s) = self.state.lock() else {
            return;
        };
        if !s.charging {
            return;
        }
        let start = *s.start_energy.get_or_insert(total_kwh);
        s.charged_energy = s.session_base + (total_kwh - start).max(0.0) * 1000.0;
    }
}

impl LoadpointObserver for ChargeRater {
    fn on_event(&mut self, event: LoadpointEvent, now: DateTime<Utc>) {
        let Ok(mut s) = self.state.lock() else {
            return;
        };
        match event {
            LoadpointEvent::Connect => *s = ChargeRaterState::default(),
            LoadpointEvent::ChargeStart => {
                s.charging = true;
                s.start_energy = None;
                s.session_base = s.charged_energy;
                s.last_power = Some((now, 0.0));
            }
            LoadpointEvent::ChargeStop => {
                s.charging = false;
                s.last_power = None;
            }
            LoadpointEvent::Disconnect => {}
        }
    }
}

/// Event as seen by external listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventMessage {
    pub loadpoint: String,
    pub event: LoadpointEvent,
    pub at: DateTime<Utc>,
}

/// Forwards events to a broadcast channel
pub struct ChannelNotifier {
    loadpoint: String,
    tx: broadcast::Sender<EventMessage>,
}

impl ChannelNotifier {
    pub fn new(loadpoint: &str, tx: broadcast::Sender<EventMessage>) -> Self {
        Self {
            loadpoint: loadpoint.to_string(),
            tx,
        }
    }
}

impl LoadpointObserver for ChannelNotifier {
    fn on_event(&mut self, event: LoadpointEvent, now: DateTime<Utc>) {
        let _ = self.tx.send(EventMessage {
            loadpoint: self.loadpoint.clone(),
            event,
            at: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs)
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl LoadpointObserver for Recorder {
        fn on_event(&mut self, event: LoadpointEvent, _now: DateTime<Utc>) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{event:?}", self.name));
        }
    }

    #[test]
    fn test_metering_runs_before_notification() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        // Registered in reverse to prove order comes from the list kind
        dispatcher.add_notification(Box::new(Recorder {
            name: "push",
            log: log.clone(),
        }));
        dispatcher.add_metering(Box::new(Recorder {
            name: "meter",
            log: log.clone(),
        }));

        dispatcher.dispatch_metering(LoadpointEvent::Connect, at(0));
        dispatcher.dispatch_notification(LoadpointEvent::Connect, at(0));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["meter:Connect".to_string(), "push:Connect".to_string()]
        );
    }

    #[test]
    fn test_charge_timer_accumulates_sessions() {
        let timer = ChargeTimer::new();
        let mut observer = timer.clone();
        observer.on_event(LoadpointEvent::Connect, at(0));
        observer.on_event(LoadpointEvent::ChargeStart, at(10));
        observer.on_event(LoadpointEvent::ChargeStop, at(70));
        observer.on_event(LoadpointEvent::ChargeStart, at(100));
        assert_eq!(timer.duration(at(130)), Duration::from_secs(90));

        observer.on_event(LoadpointEvent::Connect, at(200));
        assert_eq!(timer.duration(at(300)), Duration::ZERO);
    }

    #[test]
    fn test_charge_rater_integrates_power() {
        let rater = ChargeRater::new();
        let mut observer = rater.clone();
        observer.on_event(LoadpointEvent::Connect, at(0));
        observer.on_event(LoadpointEvent::ChargeStart, at(0));
        rater.set_charge_power(3600.0, at(0));
        rater.set_charge_power(3600.0, at(3600));
        assert!((rater.charged_energy() - 3600.0).abs() < 1e-6);

        observer.on_event(LoadpointEvent::ChargeStop, at(3600));
        rater.set_charge_power(3600.0, at(7200));
        assert!((rater.charged_energy() - 3600.0).abs() < 1e-6);
    }

    #[test]
    fn test_charge_rater_uses_meter_totals() {
        let rater = ChargeRater::new();
        let mut observer = rater.clone();
        observer.on_event(LoadpointEvent::Connect, at(0));
        observer.on_event(LoadpointEvent::ChargeStart, at(0));
        rater.set_meter_energy(100.0);
        rater.set_meter_energy(101.5);
        assert!((rater.charged_energy() - 1500.0).abs() < 1e-6);

        observer.on_event(LoadpointEvent::ChargeStop, at(10));
        observer.on_event(LoadpointEvent::ChargeStart, at(20));
        rater.set_meter_energy(102.0);
        rater.set_meter_energy(102.5);
        assert!((rater.charged_energy() - 2000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (tx, mut rx) = broadcast::channel(4);
        let mut notifier = ChannelNotifier::new("lp1", tx);
        notifier.on_event(LoadpointEvent::ChargeStart, at(5));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.loadpoint, "lp1");
        assert_eq!(msg.event, LoadpointEvent::ChargeStart);
    }
}
