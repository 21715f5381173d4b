//! Observability sink for loadpoint and site values

use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// One published value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    /// Loadpoint name, `None` for site values
    pub loadpoint: Option<String>,
    pub key: String,
    pub value: Value,
}

/// One-way `publish(key, value)` sink
pub trait Publisher: Send + Sync {
    fn publish(&self, param: Param);
}

/// Serialize `value` and publish it; values that do not serialize become null
pub fn publish_value<T: Serialize>(
    publisher: &dyn Publisher,
    loadpoint: Option<&str>,
    key: &str,
    value: T,
) {
    publisher.publish(Param {
        loadpoint: loadpoint.map(str::to_string),
        key: key.to_string(),
        value: serde_json::to_value(value).unwrap_or(Value::Null),
    });
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _param: Param) {}
}

/// Fans values out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Param>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Param> {
        self.tx.subscribe()
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, param: Param) {
        // No subscribers is not an error
        let _ = self.tx.send(param);
    }
}

/// Keeps every published value, for tests and diagnostics
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    params: Mutex<Vec<Param>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(&self) -> Vec<Param> {
        self.params.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Last value published for `key`
    pub fn last(&self, key: &str) -> Option<Value> {
        self.params()
            .into_iter()
            .rev()
            .find(|p| p.key == key)
            .map(|p| p.value)
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, param: Param) {
        if let Ok(mut params) = self.params.lock() {
            params.push(param);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_publisher_delivers() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        publish_value(&publisher, Some("lp1"), "chargeCurrent", 6);
        let param = rx.recv().await.unwrap();
        assert_eq!(param.loadpoint.as_deref(), Some("lp1"));
        assert_eq!(param.key, "chargeCurrent");
        assert_eq!(param.value, serde_json::json!(6));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = BroadcastPublisher::new(1);
        publish_value(&publisher, None, "gridPower", -1200.5);
    }

    #[test]
    fn test_recording_publisher_last() {
        let publisher = RecordingPublisher::new();
        publish_value(&publisher, None, "mode", "pv");
        publish_value(&publisher, None, "mode", "now");
        assert_eq!(publisher.last("mode"), Some(serde_json::json!("now")));
        assert_eq!(publisher.last("other"), None);
    }
}
