use super::*;

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/helion.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Home".to_string(),
            poll_interval_ms: 10_000,
            residual_power: 0.0,
            retry_budget_ms: 1_000,
            retry_delay_ms: 100,
            priority_soc: 0.0,
            buffer_soc: 0.0,
            buffer_start_soc: 0.0,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            delay_seconds: 60,
        }
    }
}

impl Default for LoadpointConfig {
    fn default() -> Self {
        Self {
            name: "lp1".to_string(),
            title: "Carport".to_string(),
            charger: "charger".to_string(),
            meter: None,
            vehicle: None,
            circuit: None,
            mode: ChargeMode::Off,
            min_current: 6,
            max_current: 16,
            phases: 3,
            sensitivity: 10,
            guard_duration_seconds: 300,
            enable: ThresholdConfig::default(),
            disable: ThresholdConfig {
                threshold: 0.0,
                delay_seconds: 180,
            },
            reset_on_disconnect: false,
            soc_poll_interval_seconds: 3600,
            min_soc: 0,
            limit_soc: 0,
            limit_energy: 0.0,
        }
    }
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            title: "Vehicle".to_string(),
            capacity_kwh: 50.0,
            identifiers: Vec::new(),
            phases: 0,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pv_peak_power: 8_000.0,
            base_load: 400.0,
            day_length_minutes: 60,
            connected_vehicle: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            site: SiteConfig::default(),
            circuits: Vec::new(),
            loadpoints: vec![LoadpointConfig::default()],
            vehicles: Vec::new(),
            simulation: SimulationConfig::default(),
        }
    }
}
