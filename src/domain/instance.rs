use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat key/value connection data handed to applications.
pub type Credentials = BTreeMap<String, String>;

/// Provision/deprovision request as received from the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    #[serde(skip)]
    pub instance_id: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
    #[serde(rename = "organization_guid", default)]
    pub org_id: String,
    #[serde(rename = "space_guid", default)]
    pub space_id: String,
}

/// Bind/unbind request as received from the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRequest {
    #[serde(skip)]
    pub instance_id: String,
    #[serde(skip)]
    pub binding_id: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
    #[serde(rename = "app_guid", default)]
    pub app_id: String,
}

/// A provisioned service deployment on one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub service_name: String,
    pub image_name: String,
    /// Docker host of the owning agent
    pub agent_host: String,
    pub container_id: String,
    pub container_name: String,
    /// Container-internal port of the primary exposed service
    pub service_port: Option<u16>,
    /// Externally reachable host port mapped to `service_port`
    pub host_port: Option<u16>,
    /// Every host port reserved for this instance
    pub allocated_ports: Vec<u16>,
    pub service_url: String,
    pub plan_id: String,
    pub org_id: String,
    pub space_id: String,
    pub started_at: DateTime<Utc>,
}

impl ServiceInstance {
    /// Dedicated containers are named after the instance; shared ones are not.
    pub fn owns_container(&self) -> bool {
        self.container_name == self.instance_id
    }
}

/// A credential grant for one application on one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceBinding {
    pub instance_id: String,
    pub binding_id: String,
    pub app_id: String,
    pub started_at: DateTime<Utc>,
}

/// Outcome of a successful bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindResult {
    pub binding_ref: String,
    pub credentials: Credentials,
    pub drain_url: Option<String>,
}

impl ServiceBinding {
    pub fn from_request(request: &BindingRequest) -> Self {
        Self {
            instance_id: request.instance_id.clone(),
            binding_id: request.binding_id.clone(),
            app_id: request.app_id.clone(),
            started_at: Utc::now(),
        }
    }
}
