//! Lifecycle orchestration of service instances on one agent
//!
//! Every operation re-derives its state from the store and the agent's
//! container runtime; nothing is cached between requests.

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    Agent, BindResult, BindingRequest, Credentials, PortAllocations, ProvisioningRequest,
    ServiceBinding, ServiceInstance,
};
use crate::error::{BrokerError, Result, RuntimeError};
use crate::persistence::BrokerStore;
use crate::runtime::{
    container_port, find_image, ContainerExec, ContainerRuntime, ContainerSpec, HostConfig,
    PortBinding,
};

use super::ports::{release_port, reserve_ports};
use super::strategy::{Strategy, Verb};
use super::templater::{self, HostBindings};

/// Lost compare-and-swap rounds tolerated before a port update gives up.
const PORT_SWAP_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct ProvisionerSettings {
    /// Grace period handed to the runtime when stopping a container
    pub stop_timeout_secs: u64,
}

/// Where an instance runs.
#[derive(Debug, Clone, Default)]
struct Placement {
    container_id: String,
    container_name: String,
    /// Host ports reserved for the container
    allocated: Vec<u16>,
    /// Exposed container port specs, sorted
    exposed: Vec<String>,
    dedicated: bool,
    /// Container found under the instance name instead of created by this call
    recovered: bool,
}

/// Drives provision/bind/unbind/deprovision against one agent.
pub struct Provisioner {
    agent: Agent,
    runtime: Arc<dyn ContainerRuntime>,
    exec: Arc<dyn ContainerExec>,
    store: Arc<dyn BrokerStore>,
    settings: ProvisionerSettings,
}

impl Provisioner {
    pub fn new(
        agent: Agent,
        runtime: Arc<dyn ContainerRuntime>,
        exec: Arc<dyn ContainerExec>,
        store: Arc<dyn BrokerStore>,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            agent,
            runtime,
            exec,
            store,
            settings,
        }
    }

    /// Provision a new instance and return its dashboard URL.
    #[instrument(skip(self, request), fields(instance_id = %request.instance_id, agent = %self.agent.docker_host))]
    pub async fn provision(&self, request: &ProvisioningRequest) -> Result<String> {
        let images = self.runtime.list_images().await?;
        let summary = find_image(&images, &request.service_id)
            .ok_or_else(|| BrokerError::ImageNotFound(request.service_id.clone()))?;
        let repository = summary
            .repository()
            .ok_or_else(|| BrokerError::ImageNotFound(request.service_id.clone()))?
            .to_string();
        let image = self
            .store
            .get_image_definition(&repository)
            .await?
            .ok_or_else(|| BrokerError::ImageNotFound(repository.clone()))?;
        let strategy = Strategy::select(&image, &self.agent)?;

        let placement = if image.is_shared() {
            debug!(container = %image.container_name, "reusing shared container");
            Placement {
                container_id: image.container_name.clone(),
                container_name: image.container_name.clone(),
                ..Default::default()
            }
        } else {
            self.launch(&request.instance_id, &repository, &summary.id)
                .await?
        };

        let response = match strategy
            .run(
                self.exec.as_ref(),
                &self.agent,
                &placement.container_id,
                &Verb::Provision,
            )
            .await
        {
            Ok(response) => response.unwrap_or_default(),
            Err(e) => {
                self.rollback(&placement).await;
                return Err(e.into());
            }
        };

        let bindings = self.discover_bindings(&placement.container_id).await;
        let fields = templater::rewrite(&response, &bindings, &self.agent.service_host);
        let url = match dashboard_url(&fields) {
            Ok(url) => url,
            Err(e) => {
                self.rollback(&placement).await;
                return Err(e);
            }
        };

        let service_port = placement.exposed.first().and_then(|spec| container_port(spec));
        let instance = ServiceInstance {
            instance_id: request.instance_id.clone(),
            service_name: request.service_id.clone(),
            image_name: repository,
            agent_host: self.agent.docker_host.clone(),
            container_id: placement.container_id.clone(),
            container_name: placement.container_name.clone(),
            service_port,
            host_port: service_port.and_then(|port| bindings.host_port_for(port)),
            allocated_ports: placement.allocated.clone(),
            service_url: url.clone(),
            plan_id: request.plan_id.clone(),
            org_id: request.org_id.clone(),
            space_id: request.space_id.clone(),
            started_at: chrono::Utc::now(),
        };

        if let Err(e) = self.store.add_instance(&instance).await {
            self.rollback(&placement).await;
            return Err(e);
        }

        info!(container = %instance.container_id, "service instance provisioned");
        Ok(url)
    }

    /// Tear an instance down. Record deletion always happens; ports are
    /// released only by the call that deleted the record.
    #[instrument(skip(self, request), fields(instance_id = %request.instance_id, agent = %self.agent.docker_host))]
    pub async fn deprovision(&self, request: &ProvisioningRequest) -> Result<()> {
        let instance = self
            .store
            .get_instance(&request.instance_id)
            .await?
            .ok_or_else(|| BrokerError::InstanceGone(request.instance_id.clone()))?;

        let teardown = self.teardown(&instance).await;

        if !self.store.delete_instance(&instance.instance_id).await? {
            debug!("instance removed concurrently, leaving its ports alone");
            return Err(BrokerError::InstanceGone(instance.instance_id));
        }
        if let Err(e) = self.release_ports(&instance.allocated_ports).await {
            warn!(error = %e, ports = ?instance.allocated_ports, "failed to release host ports");
        }
        teardown?;

        info!(container = %instance.container_id, "service instance deprovisioned");
        Ok(())
    }

    #[instrument(skip(self, request), fields(instance_id = %request.instance_id, binding_id = %request.binding_id))]
    pub async fn bind(&self, request: &BindingRequest) -> Result<BindResult> {
        let Some(instance) = self.store.get_instance(&request.instance_id).await? else {
            return bind_without_instance(self.store.as_ref(), request).await;
        };
        let image = self
            .store
            .get_image_definition(&instance.image_name)
            .await?
            .ok_or_else(|| BrokerError::ImageNotFound(instance.image_name.clone()))?;
        let strategy = Strategy::select(&image, &self.agent)?;

        self.store
            .add_binding(&ServiceBinding::from_request(request))
            .await?;

        let credentials = match self.bind_credentials(&strategy, &instance).await {
            Ok(credentials) => credentials,
            Err(e) => {
                if let Err(cleanup) = self
                    .store
                    .delete_binding(&request.instance_id, &request.binding_id)
                    .await
                {
                    warn!(error = %cleanup, "failed to remove binding after bind failure");
                }
                return Err(e);
            }
        };

        info!("service binding created");
        Ok(BindResult {
            binding_ref: request.binding_id.clone(),
            credentials,
            drain_url: None,
        })
    }

    /// Release a binding. The record is deleted even if the unbind script fails.
    #[instrument(skip(self, request), fields(instance_id = %request.instance_id, binding_id = %request.binding_id))]
    pub async fn unbind(&self, request: &BindingRequest) -> Result<()> {
        let instance = self
            .store
            .get_instance(&request.instance_id)
            .await?
            .ok_or_else(|| BrokerError::InstanceGone(request.instance_id.clone()))?;

        let step = self.unbind_step(&instance).await;
        let deleted = self
            .store
            .delete_binding(&request.instance_id, &request.binding_id)
            .await?;
        step?;

        if !deleted {
            return Err(BrokerError::BindingNotFound {
                instance_id: request.instance_id.clone(),
                binding_id: request.binding_id.clone(),
            });
        }
        info!("service binding removed");
        Ok(())
    }

    /// Create (or recover) and start a dedicated container for an instance.
    async fn launch(&self, instance_id: &str, repository: &str, image_id: &str) -> Result<Placement> {
        let exposed = self.runtime.inspect_image(image_id).await?.exposed_ports();
        let reserved = if self.agent.port_range.is_some() && !exposed.is_empty() {
            self.reserve_ports(exposed.len()).await?
        } else {
            Vec::new()
        };

        let port_bindings: BTreeMap<String, Vec<PortBinding>> = exposed
            .iter()
            .zip(&reserved)
            .map(|(spec, port)| {
                (
                    spec.clone(),
                    vec![PortBinding {
                        host_ip: String::new(),
                        host_port: port.to_string(),
                    }],
                )
            })
            .collect();
        let spec = ContainerSpec {
            image: repository.to_string(),
            hostname: instance_id.to_string(),
            exposed_ports: exposed.iter().map(|p| (p.clone(), json!({}))).collect(),
            host_config: HostConfig::bridge(port_bindings),
        };

        let placement = match self.runtime.create_container(instance_id, &spec).await {
            Ok(created) => {
                for warning in &created.warnings {
                    warn!(container = %created.id, "{}", warning);
                }
                Placement {
                    container_id: created.id,
                    container_name: instance_id.to_string(),
                    allocated: reserved,
                    exposed,
                    dedicated: true,
                    recovered: false,
                }
            }
            Err(RuntimeError::Conflict(_)) => {
                info!("container already exists, recovering it");
                self.release_ports_quietly(&reserved).await;
                let existing = self.runtime.inspect_container(instance_id).await?;
                let bound = existing
                    .host_config
                    .as_ref()
                    .map(HostConfig::bound_host_ports)
                    .unwrap_or_default();
                let allocated = self.claim_ports(&bound).await?;
                let name = match existing.display_name() {
                    "" => instance_id.to_string(),
                    name => name.to_string(),
                };
                Placement {
                    container_id: existing.id,
                    container_name: name,
                    allocated,
                    exposed,
                    dedicated: true,
                    recovered: true,
                }
            }
            Err(e) => {
                self.release_ports_quietly(&reserved).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.runtime.start_container(&placement.container_id).await {
            if !placement.recovered {
                self.release_ports_quietly(&placement.allocated).await;
            }
            return Err(e.into());
        }
        debug!(container = %placement.container_id, ports = ?placement.allocated, "container started");
        Ok(placement)
    }

    /// Undo a launch whose provisioning did not complete.
    ///
    /// A recovered container and its ports may already back a recorded
    /// instance, so they are left in place.
    async fn rollback(&self, placement: &Placement) {
        if placement.recovered {
            debug!(container = %placement.container_id, "keeping recovered container");
            return;
        }
        if placement.dedicated {
            self.remove_container_quietly(&placement.container_id).await;
        }
        self.release_ports_quietly(&placement.allocated).await;
    }

    async fn teardown(&self, instance: &ServiceInstance) -> Result<()> {
        match self.store.get_image_definition(&instance.image_name).await {
            Ok(Some(image)) => match Strategy::select(&image, &self.agent) {
                Ok(strategy) => {
                    if let Err(e) = strategy
                        .run(
                            self.exec.as_ref(),
                            &self.agent,
                            &instance.container_id,
                            &Verb::Deprovision,
                        )
                        .await
                    {
                        warn!(error = %e, "deprovision step failed, continuing cleanup");
                    }
                }
                Err(e) => warn!(error = %e, "no deprovision step available"),
            },
            Ok(None) => warn!(image = %instance.image_name, "image definition missing, skipping deprovision step"),
            Err(e) => warn!(error = %e, "failed to load image definition"),
        }

        if !instance.owns_container() {
            return Ok(());
        }
        match self
            .runtime
            .stop_container(&instance.container_id, self.settings.stop_timeout_secs)
            .await
        {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => {
                debug!(container = %instance.container_id, "container already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        match self.runtime.remove_container(&instance.container_id).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn bind_credentials(
        &self,
        strategy: &Strategy,
        instance: &ServiceInstance,
    ) -> Result<Credentials> {
        if let Strategy::Static { credentials, .. } = strategy {
            return Ok(credentials.clone());
        }
        let response = strategy
            .run(
                self.exec.as_ref(),
                &self.agent,
                &instance.container_id,
                &Verb::Bind,
            )
            .await?
            .unwrap_or_default();
        let bindings = self.discover_bindings(&instance.container_id).await;
        Ok(templater::rewrite(
            &response,
            &bindings,
            &self.agent.service_host,
        ))
    }

    async fn unbind_step(&self, instance: &ServiceInstance) -> Result<()> {
        let Some(image) = self.store.get_image_definition(&instance.image_name).await? else {
            warn!(image = %instance.image_name, "image definition missing, skipping unbind step");
            return Ok(());
        };
        let strategy = Strategy::select(&image, &self.agent)?;
        if strategy.is_static() {
            return Ok(());
        }
        let verb = Verb::Unbind {
            service_url: instance.service_url.clone(),
        };
        strategy
            .run(
                self.exec.as_ref(),
                &self.agent,
                &instance.container_id,
                &verb,
            )
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::UnbindFailed(e.to_string()))
    }

    /// Published ports of a container; templating degrades to `$HOST` only on failure.
    async fn discover_bindings(&self, container: &str) -> HostBindings {
        match self.runtime.inspect_container(container).await {
            Ok(inspect) => HostBindings::from_port_map(
                &inspect.network_settings.ports,
                &self.agent.service_host,
            ),
            Err(e) => {
                warn!(container, error = %e, "could not inspect container, ports left unresolved");
                HostBindings::default()
            }
        }
    }

    async fn remove_container_quietly(&self, container: &str) {
        if let Err(e) = self.runtime.stop_container(container, 0).await {
            debug!(container, error = %e, "stop during rollback failed");
        }
        if let Err(e) = self.runtime.remove_container(container).await {
            warn!(container, error = %e, "failed to remove container during rollback");
        }
    }

    async fn reserve_ports(&self, count: usize) -> Result<Vec<u16>> {
        self.update_allocations(|current| match current.range {
            Some(range) => reserve_ports(&current.allocated, range.min, range.max, count),
            None => Ok((current.allocated.clone(), Vec::new())),
        })
        .await
    }

    /// Record ports already bound by a recovered container. Returns those inside the range.
    async fn claim_ports(&self, ports: &[u16]) -> Result<Vec<u16>> {
        if ports.is_empty() {
            return Ok(Vec::new());
        }
        self.update_allocations(|current| {
            let claimed: Vec<u16> = match current.range {
                Some(range) => ports.iter().copied().filter(|p| range.contains(*p)).collect(),
                None => Vec::new(),
            };
            let mut updated = current.allocated.clone();
            updated.extend(claimed.iter().copied());
            Ok((updated, claimed))
        })
        .await
    }

    async fn release_ports(&self, ports: &[u16]) -> Result<()> {
        if ports.is_empty() {
            return Ok(());
        }
        self.update_allocations(|current| {
            let mut updated = current.allocated.clone();
            for port in ports {
                release_port(&mut updated, *port);
            }
            Ok((updated, ()))
        })
        .await
    }

    async fn release_ports_quietly(&self, ports: &[u16]) {
        if let Err(e) = self.release_ports(ports).await {
            warn!(error = %e, ?ports, "failed to release host ports");
        }
    }

    /// Read-modify-write of the agent's allocation set, retried on a lost swap.
    async fn update_allocations<F, T>(&self, mut apply: F) -> Result<T>
    where
        F: FnMut(&PortAllocations) -> Result<(BTreeSet<u16>, T)>,
    {
        let host = &self.agent.docker_host;
        for attempt in 1..=PORT_SWAP_ATTEMPTS {
            let current = self
                .store
                .port_allocations(host)
                .await?
                .ok_or_else(|| BrokerError::AgentGone(host.clone()))?;
            let (updated, out) = apply(&current)?;
            if updated == current.allocated
                || self
                    .store
                    .swap_port_allocations(host, &current.allocated, &updated)
                    .await?
            {
                return Ok(out);
            }
            debug!(attempt, "port allocations changed concurrently, retrying");
        }
        Err(BrokerError::ProvisioningFailed(format!(
            "port allocations on {} kept changing",
            host
        )))
    }
}

/// Bind when no instance is recorded: only static images can answer.
///
/// No binding record is written since there is no instance to own it.
pub async fn bind_without_instance(
    store: &dyn BrokerStore,
    request: &BindingRequest,
) -> Result<BindResult> {
    let name = catalog_name(&request.service_id);
    let image = store
        .get_image_definition(name)
        .await?
        .ok_or_else(|| BrokerError::ImageNotFound(request.service_id.clone()))?;
    if !image.is_static() {
        return Err(BrokerError::InstanceGone(request.instance_id.clone()));
    }
    debug!(instance_id = %request.instance_id, "binding static image without instance record");
    Ok(BindResult {
        binding_ref: request.binding_id.clone(),
        credentials: image.credentials,
        drain_url: None,
    })
}

/// Image definition name for a service id (`mysql:latest` → `mysql`).
pub fn catalog_name(service_id: &str) -> &str {
    service_id.split(':').next().unwrap_or(service_id)
}

/// `dashboard_url` if present, otherwise the whole response as JSON.
fn dashboard_url(fields: &Credentials) -> Result<String> {
    if let Some(url) = fields.get("dashboard_url") {
        return Ok(url.clone());
    }
    if fields.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_json::to_string(fields)?)
}
