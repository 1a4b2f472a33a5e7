use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::domain::{
    Agent, BrokerCerts, Heartbeat, ImageDefinition, PortAllocations, ServiceBinding,
    ServiceInstance,
};
use crate::error::Result;

/// Durable broker state: agents, instances, bindings, catalog and agent certificates.
///
/// Lookups return `Ok(None)` / `Ok(false)` on a miss; callers decide which
/// broker error a miss becomes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerStore: Send + Sync {
    // Agents

    /// Register or refresh an agent from its heartbeat, keeping its port allocations.
    async fn upsert_agent(&self, heartbeat: &Heartbeat, now: DateTime<Utc>) -> Result<()>;

    /// Agents whose last ping is within their liveness window at `now`.
    async fn live_agents(&self, now: DateTime<Utc>) -> Result<Vec<Agent>>;

    async fn get_agent(&self, docker_host: &str) -> Result<Option<Agent>>;

    /// Docker host of the agent owning an instance.
    async fn agent_for_instance(&self, instance_id: &str) -> Result<Option<String>>;

    async fn port_allocations(&self, docker_host: &str) -> Result<Option<PortAllocations>>;

    /// Replace the allocation set only if it still equals `expected`.
    async fn swap_port_allocations(
        &self,
        docker_host: &str,
        expected: &BTreeSet<u16>,
        updated: &BTreeSet<u16>,
    ) -> Result<bool>;

    // Instances and bindings

    async fn get_instance(&self, instance_id: &str) -> Result<Option<ServiceInstance>>;

    async fn add_instance(&self, instance: &ServiceInstance) -> Result<()>;

    /// Deletes the instance together with its bindings.
    async fn delete_instance(&self, instance_id: &str) -> Result<bool>;

    async fn add_binding(&self, binding: &ServiceBinding) -> Result<()>;

    async fn delete_binding(&self, instance_id: &str, binding_id: &str) -> Result<bool>;

    // Catalog

    async fn list_image_definitions(&self) -> Result<Vec<ImageDefinition>>;

    async fn get_image_definition(&self, name: &str) -> Result<Option<ImageDefinition>>;

    async fn upsert_image_definition(&self, image: &ImageDefinition) -> Result<()>;

    async fn delete_image_definition(&self, name: &str) -> Result<bool>;

    // Agent certificates

    async fn add_certs(&self, certs: &BrokerCerts) -> Result<()>;

    async fn list_certs(&self) -> Result<Vec<BrokerCerts>>;

    async fn get_certs(&self, host: &str) -> Result<Option<BrokerCerts>>;

    async fn delete_certs(&self, host: &str) -> Result<bool>;
}
