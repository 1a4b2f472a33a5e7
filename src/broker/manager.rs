//! Request routing between the HTTP surface and per-agent provisioners.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::{
    BindResult, BindingRequest, BrokerCerts, Catalog, Heartbeat, ImageDefinition,
    ProvisioningRequest,
};
use crate::error::{BrokerError, Result};
use crate::persistence::BrokerStore;
use crate::runtime::{ContainerExec, RuntimeConnector};

use super::dispatcher::Dispatcher;
use super::orchestrator::{bind_without_instance, Provisioner, ProvisionerSettings};

pub struct BrokerManager {
    store: Arc<dyn BrokerStore>,
    connector: Arc<dyn RuntimeConnector>,
    exec: Arc<dyn ContainerExec>,
    dispatcher: Dispatcher,
    settings: ProvisionerSettings,
    catalog_name: String,
}

impl BrokerManager {
    pub fn new(
        store: Arc<dyn BrokerStore>,
        connector: Arc<dyn RuntimeConnector>,
        exec: Arc<dyn ContainerExec>,
        settings: ProvisionerSettings,
        catalog_name: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(store.clone()),
            store,
            connector,
            exec,
            settings,
            catalog_name: catalog_name.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn BrokerStore> {
        &self.store
    }

    pub fn catalog_name(&self) -> &str {
        &self.catalog_name
    }

    /// Record an agent heartbeat.
    pub async fn ping(&self, heartbeat: &Heartbeat) -> Result<()> {
        if heartbeat.docker_host.trim().is_empty() {
            return Err(BrokerError::Validation(
                "heartbeat without docker host".to_string(),
            ));
        }
        self.store.upsert_agent(heartbeat, Utc::now()).await
    }

    pub async fn catalog(&self) -> Result<Catalog> {
        let images = self.store.list_image_definitions().await?;
        Ok(Catalog::from_images(&images))
    }

    /// Seed the catalog from configuration unless the store already has one.
    pub async fn seed_catalog(&self, images: &[ImageDefinition]) -> Result<usize> {
        if images.is_empty() || !self.store.list_image_definitions().await?.is_empty() {
            return Ok(0);
        }
        for image in images {
            self.store.upsert_image_definition(image).await?;
        }
        info!(count = images.len(), "catalog seeded from configuration");
        Ok(images.len())
    }

    #[instrument(skip(self, request), fields(instance_id = %request.instance_id))]
    pub async fn provision(&self, request: &ProvisioningRequest) -> Result<String> {
        if self.store.get_instance(&request.instance_id).await?.is_some() {
            return Err(BrokerError::InstanceExists(request.instance_id.clone()));
        }
        let agent = self.dispatcher.select_agent().await?;
        let runtime = self.connector.connect(&agent).await?;
        let provisioner = Provisioner::new(
            agent,
            runtime,
            self.exec.clone(),
            self.store.clone(),
            self.settings.clone(),
        );
        provisioner.provision(request).await
    }

    pub async fn deprovision(&self, request: &ProvisioningRequest) -> Result<()> {
        self.provisioner_for_instance(&request.instance_id)
            .await?
            .deprovision(request)
            .await
    }

    pub async fn bind(&self, request: &BindingRequest) -> Result<BindResult> {
        match self.store.agent_for_instance(&request.instance_id).await? {
            Some(host) => self.provisioner(&host).await?.bind(request).await,
            None => bind_without_instance(self.store.as_ref(), request).await,
        }
    }

    pub async fn unbind(&self, request: &BindingRequest) -> Result<()> {
        self.provisioner_for_instance(&request.instance_id)
            .await?
            .unbind(request)
            .await
    }

    async fn provisioner_for_instance(&self, instance_id: &str) -> Result<Provisioner> {
        let host = self
            .store
            .agent_for_instance(instance_id)
            .await?
            .ok_or_else(|| BrokerError::InstanceGone(instance_id.to_string()))?;
        self.provisioner(&host).await
    }

    async fn provisioner(&self, docker_host: &str) -> Result<Provisioner> {
        let agent = self
            .store
            .get_agent(docker_host)
            .await?
            .ok_or_else(|| BrokerError::AgentGone(docker_host.to_string()))?;
        if !agent.is_live(Utc::now()) {
            warn!(docker_host, "agent owning the instance has not pinged recently");
        }
        let runtime = self.connector.connect(&agent).await?;
        Ok(Provisioner::new(
            agent,
            runtime,
            self.exec.clone(),
            self.store.clone(),
            self.settings.clone(),
        ))
    }

    // Catalog administration

    fn check_catalog(&self, catalog: &str) -> Result<()> {
        if catalog != self.catalog_name {
            return Err(BrokerError::UnknownCatalog(catalog.to_string()));
        }
        Ok(())
    }

    pub async fn put_image(&self, catalog: &str, name: &str, mut image: ImageDefinition) -> Result<()> {
        self.check_catalog(catalog)?;
        image.name = name.to_string();
        if image.name.trim().is_empty() {
            return Err(BrokerError::Validation("image name is empty".to_string()));
        }
        self.store.upsert_image_definition(&image).await?;
        info!(image = %image.name, "image definition stored");
        Ok(())
    }

    pub async fn get_image(&self, catalog: &str, name: &str) -> Result<ImageDefinition> {
        self.check_catalog(catalog)?;
        self.store
            .get_image_definition(name)
            .await?
            .ok_or_else(|| BrokerError::ImageNotFound(name.to_string()))
    }

    pub async fn delete_image(&self, catalog: &str, name: &str) -> Result<()> {
        self.check_catalog(catalog)?;
        if !self.store.delete_image_definition(name).await? {
            return Err(BrokerError::ImageNotFound(name.to_string()));
        }
        info!(image = name, "image definition deleted");
        Ok(())
    }

    pub async fn list_images(&self, catalog: &str) -> Result<Vec<ImageDefinition>> {
        self.check_catalog(catalog)?;
        self.store.list_image_definitions().await
    }

    // Agent certificates

    pub async fn add_certs(&self, host: &str, mut certs: BrokerCerts) -> Result<()> {
        certs.host = host.to_string();
        self.store.add_certs(&certs).await?;
        info!(host, "agent certificates stored");
        Ok(())
    }

    pub async fn get_certs(&self, host: &str) -> Result<BrokerCerts> {
        self.store
            .get_certs(host)
            .await?
            .map(|certs| certs.masked())
            .ok_or_else(|| BrokerError::AgentGone(host.to_string()))
    }

    pub async fn delete_certs(&self, host: &str) -> Result<()> {
        if !self.store.delete_certs(host).await? {
            return Err(BrokerError::AgentGone(host.to_string()));
        }
        Ok(())
    }

    pub async fn list_certs(&self) -> Result<Vec<BrokerCerts>> {
        Ok(self
            .store
            .list_certs()
            .await?
            .iter()
            .map(BrokerCerts::masked)
            .collect())
    }
}
