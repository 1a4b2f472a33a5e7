//! In-process `BrokerStore` used when no database is configured, and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{
    Agent, BrokerCerts, Heartbeat, ImageDefinition, PortAllocations, ServiceBinding,
    ServiceInstance,
};
use crate::error::{BrokerError, Result};
use crate::persistence::BrokerStore;

#[derive(Default)]
struct Inner {
    agents: HashMap<String, Agent>,
    instances: HashMap<String, ServiceInstance>,
    bindings: BTreeMap<(String, String), ServiceBinding>,
    images: BTreeMap<String, ImageDefinition>,
    certs: BTreeMap<String, BrokerCerts>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with image definitions.
    pub fn with_images(images: impl IntoIterator<Item = ImageDefinition>) -> Self {
        let inner = Inner {
            images: images.into_iter().map(|i| (i.name.clone(), i)).collect(),
            ..Default::default()
        };
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Number of bindings recorded for an instance.
    pub async fn binding_count(&self, instance_id: &str) -> usize {
        self.inner
            .read()
            .await
            .bindings
            .keys()
            .filter(|(iid, _)| iid == instance_id)
            .count()
    }
}

#[async_trait]
impl BrokerStore for MemoryStore {
    async fn upsert_agent(&self, heartbeat: &Heartbeat, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .agents
            .entry(heartbeat.docker_host.clone())
            .and_modify(|agent| agent.apply_heartbeat(heartbeat, now))
            .or_insert_with(|| Agent::from_heartbeat(heartbeat, now));
        debug!(docker_host = %heartbeat.docker_host, "agent heartbeat recorded");
        Ok(())
    }

    async fn live_agents(&self, now: DateTime<Utc>) -> Result<Vec<Agent>> {
        let inner = self.inner.read().await;
        let mut agents: Vec<Agent> = inner
            .agents
            .values()
            .filter(|agent| agent.is_live(now))
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.docker_host.cmp(&b.docker_host));
        Ok(agents)
    }

    async fn get_agent(&self, docker_host: &str) -> Result<Option<Agent>> {
        Ok(self.inner.read().await.agents.get(docker_host).cloned())
    }

    async fn agent_for_instance(&self, instance_id: &str) -> Result<Option<String>> {
        Ok(self
            .inner
            .read()
            .await
            .instances
            .get(instance_id)
            .map(|instance| instance.agent_host.clone()))
    }

    async fn port_allocations(&self, docker_host: &str) -> Result<Option<PortAllocations>> {
        Ok(self
            .inner
            .read()
            .await
            .agents
            .get(docker_host)
            .map(|agent| PortAllocations {
                range: agent.port_range,
                allocated: agent.allocated_ports.clone(),
            }))
    }

    async fn swap_port_allocations(
        &self,
        docker_host: &str,
        expected: &BTreeSet<u16>,
        updated: &BTreeSet<u16>,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.agents.get_mut(docker_host) {
            Some(agent) if agent.allocated_ports == *expected => {
                agent.allocated_ports = updated.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<ServiceInstance>> {
        Ok(self.inner.read().await.instances.get(instance_id).cloned())
    }

    async fn add_instance(&self, instance: &ServiceInstance) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.instances.contains_key(&instance.instance_id) {
            return Err(BrokerError::InstanceExists(instance.instance_id.clone()));
        }
        inner
            .instances
            .insert(instance.instance_id.clone(), instance.clone());
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        inner.bindings.retain(|(iid, _), _| iid != instance_id);
        Ok(inner.instances.remove(instance_id).is_some())
    }

    async fn add_binding(&self, binding: &ServiceBinding) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (binding.instance_id.clone(), binding.binding_id.clone());
        if inner.bindings.contains_key(&key) {
            return Err(BrokerError::BindingExists {
                instance_id: key.0,
                binding_id: key.1,
            });
        }
        inner.bindings.insert(key, binding.clone());
        Ok(())
    }

    async fn delete_binding(&self, instance_id: &str, binding_id: &str) -> Result<bool> {
        let key = (instance_id.to_string(), binding_id.to_string());
        Ok(self.inner.write().await.bindings.remove(&key).is_some())
    }

    async fn list_image_definitions(&self) -> Result<Vec<ImageDefinition>> {
        Ok(self.inner.read().await.images.values().cloned().collect())
    }

    async fn get_image_definition(&self, name: &str) -> Result<Option<ImageDefinition>> {
        Ok(self.inner.read().await.images.get(name).cloned())
    }

    async fn upsert_image_definition(&self, image: &ImageDefinition) -> Result<()> {
        self.inner
            .write()
            .await
            .images
            .insert(image.name.clone(), image.clone());
        Ok(())
    }

    async fn delete_image_definition(&self, name: &str) -> Result<bool> {
        Ok(self.inner.write().await.images.remove(name).is_some())
    }

    async fn add_certs(&self, certs: &BrokerCerts) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.certs.contains_key(&certs.host) {
            return Err(BrokerError::CertificateExists(certs.host.clone()));
        }
        inner.certs.insert(certs.host.clone(), certs.clone());
        Ok(())
    }

    async fn list_certs(&self) -> Result<Vec<BrokerCerts>> {
        Ok(self.inner.read().await.certs.values().cloned().collect())
    }

    async fn get_certs(&self, host: &str) -> Result<Option<BrokerCerts>> {
        Ok(self.inner.read().await.certs.get(host).cloned())
    }

    async fn delete_certs(&self, host: &str) -> Result<bool> {
        Ok(self.inner.write().await.certs.remove(host).is_some())
    }
}
