//! Docker remote API client used to drive containers on an agent.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::domain::{Agent, BrokerCerts};
use crate::error::{BrokerError, Result, RuntimeError};
use crate::persistence::BrokerStore;
use crate::runtime::{
    ContainerInspect, ContainerRuntime, ContainerSpec, CreatedContainer, ImageInspect,
    ImageSummary, RuntimeConnector,
};

/// HTTP client settings toward agents.
#[derive(Debug, Clone)]
pub struct DockerClientSettings {
    pub request_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for DockerClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            accept_invalid_certs: false,
        }
    }
}

#[derive(Clone)]
pub struct DockerClient {
    http: Client,
    base_url: Url,
}

impl DockerClient {
    /// Plain HTTP client for `http://host:port`.
    pub fn new(host: &str, port: u16, settings: &DockerClientSettings) -> Result<Self> {
        let http = Client::builder()
            .user_agent("docker-broker/0.1")
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url("http", host, port)?,
        })
    }

    /// HTTPS client authenticating with an agent's client certificate.
    pub fn with_tls(
        host: &str,
        port: u16,
        certs: &BrokerCerts,
        settings: &DockerClientSettings,
    ) -> Result<Self> {
        let mut pem = certs.client_cert.clone();
        pem.push(b'\n');
        pem.extend_from_slice(&certs.client_key);
        let identity = reqwest::Identity::from_pem(&pem)?;

        let mut builder = Client::builder()
            .use_rustls_tls()
            .user_agent("docker-broker/0.1")
            .timeout(settings.request_timeout)
            .identity(identity)
            .danger_accept_invalid_certs(settings.accept_invalid_certs);
        if !certs.ca.is_empty() {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&certs.ca)?);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: base_url("https", host, port)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> std::result::Result<String, RuntimeError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| RuntimeError::Api {
                status: 0,
                body: format!("invalid path {}: {}", path, e),
            })?;

        let mut req = self.http.request(method.clone(), url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(%method, path, status = status.as_u16(), "docker api call");

        if status == StatusCode::NOT_MODIFIED || status.is_success() {
            return Ok(text);
        }
        Err(classify(status, &text))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> std::result::Result<T, RuntimeError> {
        let text = self.request(Method::GET, path, &[], None).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn base_url(scheme: &str, host: &str, port: u16) -> Result<Url> {
    Url::parse(&format!("{}://{}:{}/", scheme, host, port))
        .map_err(|e| BrokerError::Validation(format!("invalid docker host {}: {}", host, e)))
}

/// Map a failed docker response onto the runtime error kinds.
fn classify(status: StatusCode, body: &str) -> RuntimeError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::NOT_FOUND => RuntimeError::NotFound(message),
        StatusCode::CONFLICT => RuntimeError::Conflict(message),
        _ => RuntimeError::Api {
            status: status.as_u16(),
            body: message,
        },
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn list_images(&self) -> std::result::Result<Vec<ImageSummary>, RuntimeError> {
        self.get_json("images/json").await
    }

    async fn inspect_image(&self, id: &str) -> std::result::Result<ImageInspect, RuntimeError> {
        self.get_json(&format!("images/{}/json", id)).await
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> std::result::Result<CreatedContainer, RuntimeError> {
        let text = self
            .request(
                Method::POST,
                "containers/create",
                &[("name", name.to_string())],
                Some(serde_json::to_value(spec)?),
            )
            .await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn start_container(&self, id: &str) -> std::result::Result<(), RuntimeError> {
        self.request(Method::POST, &format!("containers/{}/start", id), &[], None)
            .await
            .map(|_| ())
    }

    async fn stop_container(
        &self,
        id: &str,
        timeout_secs: u64,
    ) -> std::result::Result<(), RuntimeError> {
        self.request(
            Method::POST,
            &format!("containers/{}/stop", id),
            &[("t", timeout_secs.to_string())],
            None,
        )
        .await
        .map(|_| ())
    }

    async fn remove_container(&self, id: &str) -> std::result::Result<(), RuntimeError> {
        self.request(Method::DELETE, &format!("containers/{}", id), &[], None)
            .await
            .map(|_| ())
    }

    async fn inspect_container(
        &self,
        id_or_name: &str,
    ) -> std::result::Result<ContainerInspect, RuntimeError> {
        self.get_json(&format!("containers/{}/json", id_or_name))
            .await
    }
}

/// Opens `DockerClient`s, using HTTPS when certificates are registered for the agent.
pub struct DockerConnector {
    store: Arc<dyn BrokerStore>,
    settings: DockerClientSettings,
}

impl DockerConnector {
    pub fn new(store: Arc<dyn BrokerStore>, settings: DockerClientSettings) -> Self {
        Self { store, settings }
    }
}

#[async_trait]
impl RuntimeConnector for DockerConnector {
    async fn connect(&self, agent: &Agent) -> Result<Arc<dyn ContainerRuntime>> {
        let certs = match self.store.get_certs(&agent.docker_host).await {
            Ok(certs) => certs,
            Err(e) => {
                warn!(docker_host = %agent.docker_host, error = %e, "could not load agent certificates");
                None
            }
        };

        let client = match certs {
            Some(certs) if certs.has_identity() => {
                DockerClient::with_tls(&agent.docker_host, agent.docker_port, &certs, &self.settings)?
            }
            _ => DockerClient::new(&agent.docker_host, agent.docker_port, &self.settings)?,
        };
        debug!(base_url = %client.base_url(), "connected to agent runtime");
        Ok(Arc::new(client))
    }
}
