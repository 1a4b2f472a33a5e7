//! Container runtime model
//!
//! Wire types for the subset of the docker remote API the broker drives, plus
//! the collaborator traits the lifecycle orchestrator is written against.

pub mod traits;

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub use traits::{ContainerExec, ContainerRuntime, RuntimeConnector};

/// Published ports keyed by container port spec (`"3306/tcp"`).
pub type PortMap = BTreeMap<String, Option<Vec<PortBinding>>>;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    #[serde(default, deserialize_with = "null_as_default")]
    pub host_ip: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub host_port: String,
}

/// Entry of `GET /images/json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageSummary {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub repo_tags: Vec<String>,
}

impl ImageSummary {
    /// Repository part of the first tag (`mysql:latest` → `mysql`).
    pub fn repository(&self) -> Option<&str> {
        self.repo_tags
            .first()
            .and_then(|tag| tag.split(':').next())
            .filter(|repo| !repo.is_empty())
    }
}

/// First image with a repo tag equal to `tag` or whose repository equals `tag`.
pub fn find_image<'a>(images: &'a [ImageSummary], tag: &str) -> Option<&'a ImageSummary> {
    images.iter().find(|image| {
        image
            .repo_tags
            .iter()
            .any(|repo_tag| repo_tag == tag || repo_tag.split(':').next() == Some(tag))
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub exposed_ports: BTreeMap<String, serde_json::Value>,
}

/// Response of `GET /images/{id}/json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInspect {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub config: Option<ImageConfig>,
    #[serde(default)]
    pub container_config: Option<ImageConfig>,
}

impl ImageInspect {
    /// Exposed container ports in sorted order, as `"3306/tcp"` specs.
    pub fn exposed_ports(&self) -> Vec<String> {
        let from = |config: &Option<ImageConfig>| {
            config
                .as_ref()
                .map(|c| c.exposed_ports.keys().cloned().collect::<Vec<_>>())
                .unwrap_or_default()
        };
        let ports = from(&self.config);
        if ports.is_empty() {
            from(&self.container_config)
        } else {
            ports
        }
    }
}

/// Host-side settings applied when a container is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(default)]
    pub publish_all_ports: bool,
    #[serde(default)]
    pub network_mode: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
}

impl HostConfig {
    pub fn bridge(port_bindings: BTreeMap<String, Vec<PortBinding>>) -> Self {
        Self {
            publish_all_ports: true,
            network_mode: "bridge".to_string(),
            port_bindings,
        }
    }

    /// Host ports named by explicit bindings.
    pub fn bound_host_ports(&self) -> Vec<u16> {
        self.port_bindings
            .values()
            .flatten()
            .filter_map(|binding| binding.host_port.parse().ok())
            .collect()
    }
}

/// Body of `POST /containers/create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    pub image: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_ports: BTreeMap<String, serde_json::Value>,
    pub host_config: HostConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreatedContainer {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    #[serde(default, deserialize_with = "null_as_default")]
    pub ports: PortMap,
}

/// Response of `GET /containers/{id}/json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network_settings: NetworkSettings,
    #[serde(default)]
    pub host_config: Option<HostConfig>,
}

impl ContainerInspect {
    /// Container name without docker's leading slash.
    pub fn display_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }
}

/// Parse the numeric part of a `"3306/tcp"` port spec.
pub fn container_port(spec: &str) -> Option<u16> {
    spec.split('/').next().and_then(|port| port.parse().ok())
}

/// Raw result of running a program against a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}
