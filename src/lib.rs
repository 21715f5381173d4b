//! # Helion - PV-surplus EV charging controller
//!
//! Decides every control cycle how much current each charger may draw, given
//! fluctuating solar and grid power, while respecting contactor cycling
//! limits, ramp rates and shared electrical capacity.
//!
//! ## Features
//!
//! - **Charge modes**: off, immediate, minimum plus PV, PV surplus only
//! - **Hysteresis**: enable/disable thresholds with continuous delays
//! - **Contactor guard**: bounded enable/disable frequency
//! - **Phase switching**: automatic 1p/3p scaling on switchable chargers
//! - **Circuits**: hierarchical current budgets shared by loadpoints
//! - **Vehicles**: identification and exclusive assignment across loadpoints
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `api`: Charger, meter and capability traits
//! - `clock`: Injectable time source
//! - `retry`: Bounded retry around device I/O
//! - `publish`: Observability sink for published values
//! - `circuit`: Hierarchical current limiter
//! - `coordinator`: Vehicle ownership across loadpoints
//! - `loadpoint`: Per-charger control engine
//! - `site`: Site power, loadpoint wiring and the scheduler
//! - `sim`: Simulated devices
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing

pub mod api;
pub mod circuit;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod loadpoint;
pub mod logging;
pub mod publish;
pub mod retry;
pub mod sim;
pub mod site;
pub mod vehicle;


// Re-export commonly used types
pub use config::Config;
pub use error::{HelionError, Result};
pub use loadpoint::Loadpoint;
pub use site::{Scheduler, Site};
