use dashmap::DashMap;
use log::info;

use super::instances_model::{HealthStatus, Instance, MarketDataRole, NewInstance};
use crate::errors::{Error, Result};

/// Owned, concurrency-safe store of instance records.
///
/// Mutated by registration, mode toggles and health checks; read-shared by
/// every other subsystem. Registering a second instance with the same host
/// URL is a conflict.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: DashMap<String, Instance>,
}

/// Host comparison ignores scheme case and trailing slashes.
fn normalize_host(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_lowercase()
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new instance, active by default.
    pub fn register(&self, new_instance: NewInstance) -> Result<Instance> {
        new_instance.validate()?;

        let host = normalize_host(&new_instance.base_url);
        let duplicate = self
            .instances
            .iter()
            .any(|entry| normalize_host(&entry.base_url) == host);
        if duplicate {
            return Err(Error::Conflict(format!(
                "instance host '{}' is already registered",
                new_instance.base_url
            )));
        }

        let instance = new_instance.into_instance();
        info!(
            "Registered instance '{}' ({}) analyzer={}",
            instance.name, instance.id, instance.analyzer_mode
        );
        self.instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    pub fn get(&self, instance_id: &str) -> Result<Instance> {
        self.instances
            .get(instance_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("instance '{}'", instance_id)))
    }

    pub fn remove(&self, instance_id: &str) -> Result<Instance> {
        self.instances
            .remove(instance_id)
            .map(|(_, instance)| instance)
            .ok_or_else(|| Error::NotFound(format!("instance '{}'", instance_id)))
    }

    pub fn list(&self) -> Vec<Instance> {
        self.instances.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Instances eligible for feed refreshes and monitoring.
    pub fn list_active(&self) -> Vec<Instance> {
        self.instances
            .iter()
            .filter(|entry| entry.is_active)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Active instances eligible to serve quotes, primaries first, then
    /// secondaries, then the rest. Unhealthy instances are excluded; an
    /// instance with unknown health stays in the pool (it may simply not
    /// have been probed yet).
    pub fn market_data_pool(&self) -> Vec<Instance> {
        let mut pool: Vec<Instance> = self
            .instances
            .iter()
            .filter(|entry| entry.is_active && entry.health != HealthStatus::Unhealthy)
            .map(|entry| entry.value().clone())
            .collect();
        pool.sort_by_key(|instance| (instance.market_data_role.rank(), instance.id.clone()));
        pool
    }

    pub fn set_active(&self, instance_id: &str, active: bool) -> Result<()> {
        self.update(instance_id, |instance| instance.is_active = active)
    }

    pub fn set_analyzer_mode(&self, instance_id: &str, analyzer: bool) -> Result<()> {
        self.update(instance_id, |instance| instance.analyzer_mode = analyzer)
    }

    pub fn set_health(&self, instance_id: &str, health: HealthStatus) -> Result<()> {
        self.update(instance_id, |instance| instance.health = health)
    }

    pub fn set_market_data_role(&self, instance_id: &str, role: MarketDataRole) -> Result<()> {
        self.update(instance_id, |instance| instance.market_data_role = role)
    }

    fn update(&self, instance_id: &str, apply: impl FnOnce(&mut Instance)) -> Result<()> {
        let mut entry = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| Error::NotFound(format!("instance '{}'", instance_id)))?;
        apply(entry.value_mut());
        Ok(())
    }
}
