use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Anything drawing current from a circuit
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Highest phase current (A)
    async fn max_phases_current(&self) -> Result<f64>;
}

/// Virtual meter summing its consumers
#[derive(Default)]
pub struct VMeter {
    consumers: RwLock<Vec<Weak<dyn Consumer>>>,
}

impl VMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_consumer(&self, consumer: &Arc<dyn Consumer>) {
        if let Ok(mut consumers) = self.consumers.write() {
            consumers.push(Arc::downgrade(consumer));
        }
    }

    /// Number of live consumers
    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self) -> Vec<Arc<dyn Consumer>> {
        let Ok(mut consumers) = self.consumers.write() else {
            return Vec::new();
        };
        consumers.retain(|c| c.strong_count() > 0);
        consumers.iter().filter_map(Weak::upgrade).collect()
    }

    /// Sum of the consumers' highest phase currents
    pub async fn max_phases_current(&self) -> Result<f64> {
        let mut total = 0.0;
        for consumer in self.live() {
            total += consumer.max_phases_current().await?;
        }
        Ok(total)
    }
}

/// Lock-free last known load of a loadpoint, updated once per cycle
#[derive(Debug, Default)]
pub struct CircuitLoad {
    current_bits: AtomicU64,
}

impl CircuitLoad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, current: f64) {
        self.current_bits.store(current.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.current_bits.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl Consumer for CircuitLoad {
    async fn max_phases_current(&self) -> Result<f64> {
        Ok(self.get())
    }
}
