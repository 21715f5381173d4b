//! Vehicle to loadpoint assignment
//!
//! A vehicle is owned by at most one loadpoint. Each loadpoint holds a
//! [`VehicleSlot`]; acquiring a vehicle clears the slot of its previous owner.

use crate::api::ChargeStatus;
use crate::logging::{StructuredLogger, get_logger};
use crate::vehicle::{Vehicle, identifier_matches};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// A loadpoint's active vehicle
pub struct VehicleSlot {
    owner: String,
    vehicle: Mutex<Option<Arc<dyn Vehicle>>>,
}

impl VehicleSlot {
    pub fn new(owner: &str) -> Arc<Self> {
        Arc::new(Self {
            owner: owner.to_string(),
            vehicle: Mutex::new(None),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn vehicle(&self) -> Option<Arc<dyn Vehicle>> {
        self.vehicle.lock().ok().and_then(|v| v.clone())
    }

    pub fn title(&self) -> Option<String> {
        self.vehicle().map(|v| v.title().to_string())
    }

    fn set(&self, vehicle: Option<Arc<dyn Vehicle>>) {
        if let Ok(mut slot) = self.vehicle.lock() {
            *slot = vehicle;
        }
    }

    fn clear_if(&self, title: &str) {
        if let Ok(mut slot) = self.vehicle.lock()
            && slot.as_ref().is_some_and(|v| v.title() == title)
        {
            *slot = None;
        }
    }
}

pub struct Coordinator {
    vehicles: Vec<Arc<dyn Vehicle>>,
    owners: Mutex<HashMap<String, Weak<VehicleSlot>>>,
    logger: StructuredLogger,
}

impl Coordinator {
    pub fn new(vehicles: Vec<Arc<dyn Vehicle>>) -> Self {
        Self {
            vehicles,
            owners: Mutex::new(HashMap::new()),
            logger: get_logger("coordinator"),
        }
    }

    pub fn vehicles(&self) -> &[Arc<dyn Vehicle>] {
        &self.vehicles
    }

    pub fn find(&self, title: &str) -> Option<Arc<dyn Vehicle>> {
        self.vehicles.iter().find(|v| v.title() == title).cloned()
    }

    /// Current owner of a vehicle
    pub fn owner_of(&self, title: &str) -> Option<String> {
        let owners = self.owners.lock().ok()?;
        owners
            .get(title)
            .and_then(Weak::upgrade)
            .map(|slot| slot.owner().to_string())
    }

    /// Vehicles not owned by another loadpoint
    pub fn available_vehicles(&self, owner: &Arc<VehicleSlot>) -> Vec<Arc<dyn Vehicle>> {
        let Ok(owners) = self.owners.lock() else {
            return Vec::new();
        };
        self.vehicles
            .iter()
            .filter(|v| {
                owners
                    .get(v.title())
                    .and_then(Weak::upgrade)
                    .is_none_or(|slot| Arc::ptr_eq(&slot, owner))
            })
            .cloned()
            .collect()
    }

    /// Assign `vehicle` to `owner`, taking it away from any other loadpoint
    pub fn acquire(&self, owner: &Arc<VehicleSlot>, vehicle: Arc<dyn Vehicle>) {
        let title = vehicle.title().to_string();
        {
            let Ok(mut owners) = self.owners.lock() else {
                return;
            };
            if let Some(previous) = owners.get(&title).and_then(Weak::upgrade)
                && !Arc::ptr_eq(&previous, owner)
            {
                self.logger.info(&format!(
                    "vehicle {title} moves from {} to {}",
                    previous.owner(),
                    owner.owner()
                ));
                previous.clear_if(&title);
            }
            // The owner's former vehicle becomes available
            if let Some(former) = owner.title()
                && former != title
            {
                owners.remove(&former);
            }
            owners.insert(title, Arc::downgrade(owner));
        }
        owner.set(Some(vehicle));
    }

    /// Give up ownership of `owner`'s vehicle
    pub fn release(&self, owner: &Arc<VehicleSlot>) {
        let Some(title) = owner.title() else {
            return;
        };
        if let Ok(mut owners) = self.owners.lock()
            && owners
                .get(&title)
                .and_then(Weak::upgrade)
                .is_some_and(|slot| Arc::ptr_eq(&slot, owner))
        {
            owners.remove(&title);
        }
        owner.set(None);
    }

    /// Vehicle whose identifiers match a charger-reported id.
    /// A vehicle owned elsewhere matches too; the id proves where it is.
    pub fn identify_by_id(&self, id: &str) -> Option<Arc<dyn Vehicle>> {
        if id.is_empty() {
            return None;
        }
        // Exact matches win over wildcard patterns
        self.vehicles
            .iter()
            .find(|v| v.identifiers().iter().any(|i| i.eq_ignore_ascii_case(id)))
            .or_else(|| {
                self.vehicles
                    .iter()
                    .find(|v| v.identifiers().iter().any(|i| identifier_matches(i, id)))
            })
            .cloned()
    }

    /// The single available vehicle reporting itself connected or charging.
    /// Ambiguous results select nothing.
    pub async fn identify_by_status(&self, owner: &Arc<VehicleSlot>) -> Option<Arc<dyn Vehicle>> {
        let mut found: Vec<Arc<dyn Vehicle>> = Vec::new();
        for vehicle in self.available_vehicles(owner) {
            let Some(state) = vehicle.charge_state() else {
                continue;
            };
            match state.status().await {
                Ok(ChargeStatus::B | ChargeStatus::C) => found.push(Arc::clone(&vehicle)),
                Ok(ChargeStatus::A) => {}
                Err(e) => self
                    .logger
                    .debug(&format!("vehicle {} status: {e}", vehicle.title())),
            }
        }

        match found.len() {
            1 => found.pop(),
            0 => None,
            _ => {
                let titles: Vec<&str> = found.iter().map(|v| v.title()).collect();
                self.logger.warn(&format!(
                    "{}: ambiguous vehicle status: {}",
                    owner.owner(),
                    titles.join(", ")
                ));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::vehicle::VehicleChargeState;
    use async_trait::async_trait;

    struct TestVehicle {
        title: String,
        ids: Vec<String>,
        status: Option<ChargeStatus>,
    }

    fn vehicle(title: &str, ids: &[&str], status: Option<ChargeStatus>) -> Arc<dyn Vehicle> {
        Arc::new(TestVehicle {
            title: title.to_string(),
            ids: ids.iter().map(ToString::to_string).collect(),
            status,
        })
    }

    #[async_trait]
    impl Vehicle for TestVehicle {
        fn title(&self) -> &str {
            &self.title
        }
        fn capacity(&self) -> f64 {
            50.0
        }
        fn identifiers(&self) -> Vec<String> {
            self.ids.clone()
        }
        async fn soc(&self) -> Result<f64> {
            Ok(50.0)
        }
        fn charge_state(&self) -> Option<&dyn VehicleChargeState> {
            self.status.map(|_| self as &dyn VehicleChargeState)
        }
    }

    #[async_trait]
    impl VehicleChargeState for TestVehicle {
        async fn status(&self) -> Result<ChargeStatus> {
            Ok(self.status.unwrap_or(ChargeStatus::A))
        }
    }

    #[test]
    fn test_acquire_moves_vehicle() {
        let coordinator = Coordinator::new(vec![vehicle("Zoe", &[], None)]);
        let garage = VehicleSlot::new("garage");
        let street = VehicleSlot::new("street");
        let zoe = coordinator.find("Zoe").unwrap();

        coordinator.acquire(&garage, zoe.clone());
        assert_eq!(coordinator.owner_of("Zoe").as_deref(), Some("garage"));
        assert!(coordinator.available_vehicles(&street).is_empty());
        assert_eq!(coordinator.available_vehicles(&garage).len(), 1);

        coordinator.acquire(&street, zoe);
        assert_eq!(garage.title(), None);
        assert_eq!(street.title().as_deref(), Some("Zoe"));
        assert_eq!(coordinator.owner_of("Zoe").as_deref(), Some("street"));
    }

    #[test]
    fn test_release_frees_vehicle() {
        let coordinator = Coordinator::new(vec![vehicle("Zoe", &[], None)]);
        let garage = VehicleSlot::new("garage");
        let street = VehicleSlot::new("street");
        coordinator.acquire(&garage, coordinator.find("Zoe").unwrap());
        coordinator.release(&garage);
        assert_eq!(garage.title(), None);
        assert_eq!(coordinator.available_vehicles(&street).len(), 1);
    }

    #[test]
    fn test_dropped_owner_frees_vehicle() {
        let coordinator = Coordinator::new(vec![vehicle("Zoe", &[], None)]);
        let street = VehicleSlot::new("street");
        {
            let garage = VehicleSlot::new("garage");
            coordinator.acquire(&garage, coordinator.find("Zoe").unwrap());
        }
        assert_eq!(coordinator.available_vehicles(&street).len(), 1);
    }

    #[test]
    fn test_identify_by_id_prefers_exact() {
        let coordinator = Coordinator::new(vec![
            vehicle("Any", &["*"], None),
            vehicle("Zoe", &["04AB12"], None),
        ]);
        let found = coordinator.identify_by_id("04ab12").unwrap();
        assert_eq!(found.title(), "Zoe");
        let fallback = coordinator.identify_by_id("ffff").unwrap();
        assert_eq!(fallback.title(), "Any");
        assert!(coordinator.identify_by_id("").is_none());

        // Owned vehicles are still found by id
        let carport = VehicleSlot::new("carport");
        coordinator.acquire(&carport, found);
        assert_eq!(
            coordinator.identify_by_id("04AB12").map(|v| v.title().to_string()),
            Some("Zoe".to_string())
        );
    }

    #[tokio::test]
    async fn test_identify_by_status_single_match() {
        let coordinator = Coordinator::new(vec![
            vehicle("Zoe", &[], Some(ChargeStatus::B)),
            vehicle("Ioniq", &[], Some(ChargeStatus::A)),
            vehicle("Van", &[], None),
        ]);
        let garage = VehicleSlot::new("garage");
        let found = coordinator.identify_by_status(&garage).await.unwrap();
        assert_eq!(found.title(), "Zoe");
    }

    #[tokio::test]
    async fn test_identify_by_status_ambiguous_selects_none() {
        let coordinator = Coordinator::new(vec![
            vehicle("Zoe", &[], Some(ChargeStatus::B)),
            vehicle("Ioniq", &[], Some(ChargeStatus::C)),
        ]);
        let garage = VehicleSlot::new("garage");
        assert!(coordinator.identify_by_status(&garage).await.is_none());
    }

    #[tokio::test]
    async fn test_identify_by_status_skips_owned() {
        let coordinator = Coordinator::new(vec![
            vehicle("Zoe", &[], Some(ChargeStatus::B)),
            vehicle("Ioniq", &[], Some(ChargeStatus::C)),
        ]);
        let garage = VehicleSlot::new("garage");
        let street = VehicleSlot::new("street");
        coordinator.acquire(&street, coordinator.find("Ioniq").unwrap());
        let found = coordinator.identify_by_status(&garage).await.unwrap();
        assert_eq!(found.title(), "Zoe");
    }
}
