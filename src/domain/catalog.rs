use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::instance::Credentials;

/// Catalog entry describing how one docker image is offered as a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    #[serde(alias = "Name", default)]
    pub name: String,
    #[serde(alias = "Plan", default)]
    pub plan: String,
    /// Preconfigured provision response (usually a `dashboard_url` key)
    #[serde(alias = "DashBoardUrl", default)]
    pub dashboard_url: Credentials,
    /// Preconfigured bind response
    #[serde(alias = "Credentials", default)]
    pub credentials: Credentials,
    /// 0 means every instance shares the container named by `container_name`
    #[serde(alias = "Numinstances", default)]
    pub num_instances: u32,
    #[serde(alias = "Containername", default)]
    pub container_name: String,
}

impl ImageDefinition {
    /// Static images carry their connection data; everything else runs scripts.
    pub fn is_static(&self) -> bool {
        !self.dashboard_url.is_empty() || !self.credentials.is_empty()
    }

    pub fn is_shared(&self) -> bool {
        self.num_instances == 0
    }

    pub fn plan_id(&self) -> String {
        format!("{}_{}", self.name, self.plan)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    pub plans: Vec<Plan>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl From<&ImageDefinition> for Service {
    fn from(image: &ImageDefinition) -> Self {
        let metadata = json!({
            "displayName": "docker image",
            "imageUrl": null,
            "longDescription": "Docker container with chosen functionality",
            "providerDisplayName": "docker",
            "documentationUrl": null,
            "supportUrl": null,
        });

        Self {
            id: image.name.clone(),
            name: image.name.clone(),
            description: format!("{} docker service", image.name),
            bindable: true,
            tags: vec!["docker".to_string()],
            requires: Vec::new(),
            plans: vec![Plan {
                id: image.plan_id(),
                name: image.plan.clone(),
                description: "Service plan".to_string(),
                metadata: Map::new(),
            }],
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }
}

impl Catalog {
    pub fn from_images(images: &[ImageDefinition]) -> Self {
        Self {
            services: images.iter().map(Service::from).collect(),
        }
    }
}
