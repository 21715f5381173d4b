//! Hierarchical current budgets
//!
//! Circuits form a tree. Each node has a configured maximum current per phase
//! and a meter; the remaining budget of a node is the minimum of its own
//! headroom and the remaining budget of its parent.

mod vmeter;

pub use vmeter::{CircuitLoad, Consumer, VMeter};

use crate::api::Meter;
use crate::config::CircuitConfig;
use crate::error::{HelionError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

/// How a circuit learns its consumption
pub enum CircuitMeter {
    /// Physical meter reporting phase currents
    Physical(Arc<dyn Meter>),
    /// Sum of registered consumers
    Virtual(VMeter),
}

/// One node of the circuit tree
pub struct Circuit {
    name: String,
    max_current: RwLock<f64>,
    meter: CircuitMeter,
    parent: Option<Weak<Circuit>>,
    children: RwLock<Vec<Arc<Circuit>>>,
    logger: StructuredLogger,
}

/// Point-in-time view of a circuit, published by the site
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub max_current: f64,
    pub current: Option<f64>,
    pub remaining: f64,
}

impl Circuit {
    /// Create a circuit; a physical meter must report phase currents
    pub fn new(
        name: &str,
        max_current: f64,
        meter: CircuitMeter,
        parent: Option<&Arc<Self>>,
    ) -> Result<Arc<Self>> {
        if let CircuitMeter::Physical(m) = &meter
            && m.phase_currents().is_none()
        {
            return Err(HelionError::circuit(format!(
                "circuit '{name}': meter does not report phase currents"
            )));
        }

        let circuit = Arc::new(Self {
            name: name.to_string(),
            max_current: RwLock::new(max_current),
            meter,
            parent: parent.map(Arc::downgrade),
            children: RwLock::new(Vec::new()),
            logger: get_logger_with_context(
                LogContext::new("circuit").with_field("circuit", name.to_string()),
            ),
        });

        if let Some(parent) = parent {
            if let Ok(mut children) = parent.children.write() {
                children.push(Arc::clone(&circuit));
            }
            // A metered parent already sees the child's load
            if let CircuitMeter::Virtual(vmeter) = &parent.meter {
                let consumer: Arc<dyn Consumer> = circuit.clone();
                vmeter.add_consumer(&consumer);
            }
        }

        Ok(circuit)
    }

    /// Circuit without physical meter
    pub fn new_virtual(
        name: &str,
        max_current: f64,
        parent: Option<&Arc<Self>>,
    ) -> Result<Arc<Self>> {
        Self::new(name, max_current, CircuitMeter::Virtual(VMeter::new()), parent)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<Arc<Self>> {
        self.children.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn max_current(&self) -> f64 {
        self.max_current.read().map_or(0.0, |m| *m)
    }

    /// Change the configured limit at runtime
    pub fn set_max_current(&self, current: f64) {
        if let Ok(mut max) = self.max_current.write() {
            *max = current;
        }
        self.logger.info(&format!("max current: {current:.1}A"));
    }

    /// Register a loadpoint (or other consumer) on a virtual circuit
    pub fn register_consumer(&self, consumer: &Arc<dyn Consumer>) -> Result<()> {
        match &self.meter {
            CircuitMeter::Virtual(vmeter) => {
                vmeter.add_consumer(consumer);
                Ok(())
            }
            // Consumption is measured directly
            CircuitMeter::Physical(_) => Ok(()),
        }
    }

    /// Current consumption of this circuit (A, highest phase)
    pub async fn current(&self) -> Result<f64> {
        match &self.meter {
            CircuitMeter::Physical(meter) => {
                let currents = meter
                    .phase_currents()
                    .ok_or_else(|| HelionError::not_supported("phase currents"))?;
                let (l1, l2, l3) = currents.currents().await?;
                Ok(l1.max(l2).max(l3))
            }
            CircuitMeter::Virtual(vmeter) => vmeter.max_phases_current().await,
        }
    }

    /// Headroom of this node alone; a meter error leaves no headroom
    async fn local_remaining(&self) -> f64 {
        match self.current().await {
            Ok(current) => {
                let remaining = self.max_current() - current;
                if remaining < 0.0 {
                    self.logger.warn(&format!(
                        "overload: {current:.1}A > {:.1}A",
                        self.max_current()
                    ));
                }
                remaining
            }
            Err(e) => {
                self.logger.error(&format!("meter: {e}"));
                0.0
            }
        }
    }

    /// Remaining budget, bounded by every ancestor
    pub async fn remaining_current(&self) -> f64 {
        let mut remaining = self.local_remaining().await;
        let mut next = self.parent();
        while let Some(node) = next {
            remaining = remaining.min(node.local_remaining().await);
            next = node.parent();
        }
        remaining
    }

    /// Cap a requested change from `old` to `new` to what the tree can supply.
    /// An overloaded tree pushes the result below `old`.
    pub async fn validate_current(&self, old: f64, new: f64) -> f64 {
        let delta = (new - old).max(0.0);
        let potential = self.remaining_current().await;
        if delta > potential {
            let capped = (old + potential).max(0.0).min(new);
            self.logger.debug(&format!(
                "validate current: {new:.1}A -> {capped:.1}A (remaining {potential:.1}A)"
            ));
            return capped;
        }
        new
    }

    pub async fn status(&self) -> CircuitStatus {
        CircuitStatus {
            name: self.name.clone(),
            max_current: self.max_current(),
            current: self.current().await.ok(),
            remaining: self.remaining_current().await,
        }
    }
}

#[async_trait]
impl Consumer for Circuit {
    async fn max_phases_current(&self) -> Result<f64> {
        self.current().await
    }
}

/// All circuits of a site, addressable by name
#[derive(Default, Clone)]
pub struct CircuitTree {
    circuits: Vec<Arc<Circuit>>,
}

impl CircuitTree {
    pub fn find(&self, name: &str) -> Option<Arc<Circuit>> {
        self.circuits.iter().find(|c| c.name() == name).cloned()
    }

    pub fn roots(&self) -> impl Iterator<Item = &Arc<Circuit>> {
        self.circuits.iter().filter(|c| c.parent.is_none())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Circuit>> {
        self.circuits.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }
}

/// Build a tree of virtual circuits; a configured meter is an error
pub fn build_circuits(configs: &[CircuitConfig]) -> Result<CircuitTree> {
    build_circuits_with_meters(configs, &HashMap::new())
}

/// Build the circuit tree, resolving physical meters by name
pub fn build_circuits_with_meters(
    configs: &[CircuitConfig],
    meters: &HashMap<String, Arc<dyn Meter>>,
) -> Result<CircuitTree> {
    let mut tree = CircuitTree::default();
    let mut pending: Vec<(&CircuitConfig, Option<Arc<Circuit>>)> =
        configs.iter().map(|c| (c, None)).collect();

    while let Some((config, parent)) = pending.pop() {
        if tree.find(&config.name).is_some() {
            return Err(HelionError::circuit(format!(
                "duplicate circuit '{}'",
                config.name
            )));
        }
        let meter = match &config.meter {
            Some(name) => CircuitMeter::Physical(meters.get(name).cloned().ok_or_else(|| {
                HelionError::circuit(format!("circuit '{}': unknown meter '{name}'", config.name))
            })?),
            None => CircuitMeter::Virtual(VMeter::new()),
        };
        let circuit = Circuit::new(&config.name, config.max_current, meter, parent.as_ref())?;
        pending.extend(config.circuits.iter().map(|c| (c, Some(Arc::clone(&circuit)))));
        tree.circuits.push(circuit);
    }

    Ok(tree)
}
