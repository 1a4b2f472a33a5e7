use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::Agent;
use crate::error::{ExecError, Result, RuntimeError};

use super::{
    ContainerInspect, ContainerSpec, CreatedContainer, ExecOutput, ImageInspect, ImageSummary,
};

/// Container runtime of one agent.
///
/// Failures keep the runtime's own classification so callers can react to
/// `NotFound` and `Conflict` separately.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_images(&self) -> std::result::Result<Vec<ImageSummary>, RuntimeError>;

    async fn inspect_image(&self, id: &str) -> std::result::Result<ImageInspect, RuntimeError>;

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> std::result::Result<CreatedContainer, RuntimeError>;

    async fn start_container(&self, id: &str) -> std::result::Result<(), RuntimeError>;

    async fn stop_container(
        &self,
        id: &str,
        timeout_secs: u64,
    ) -> std::result::Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str) -> std::result::Result<(), RuntimeError>;

    async fn inspect_container(
        &self,
        id_or_name: &str,
    ) -> std::result::Result<ContainerInspect, RuntimeError>;
}

/// Opens a runtime client for an agent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    async fn connect(&self, agent: &Agent) -> Result<Arc<dyn ContainerRuntime>>;
}

/// Runs a program against a running container on an agent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerExec: Send + Sync {
    async fn exec(
        &self,
        agent: &Agent,
        container_id: &str,
        argv: &[String],
    ) -> std::result::Result<ExecOutput, ExecError>;
}
