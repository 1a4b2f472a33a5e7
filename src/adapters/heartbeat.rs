//! Agent-side heartbeat: registers this docker host with every configured broker.

use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::auth::API_VERSION_HEADER;
use crate::config::{AgentConfig, BrokerEndpoint, TlsFiles};
use crate::domain::{BrokerCerts, Heartbeat};
use crate::error::{BrokerError, Result};

/// Version header value sent with every heartbeat.
pub const HEARTBEAT_API_VERSION: &str = "1.1";

/// Remembers the last failure per broker so repeated errors are logged once.
#[derive(Debug, Default)]
struct LinkState {
    last_error: Option<String>,
}

impl LinkState {
    /// Returns the message to log, if the outcome differs from the previous one.
    fn observe(&mut self, outcome: &std::result::Result<(), String>) -> Option<String> {
        match outcome {
            Ok(()) => self
                .last_error
                .take()
                .map(|_| "connection to broker recovered".to_string()),
            Err(e) if self.last_error.as_deref() == Some(e.as_str()) => None,
            Err(e) => {
                self.last_error = Some(e.clone());
                Some(e.clone())
            }
        }
    }
}

pub struct HeartbeatClient {
    http: Client,
    heartbeat: Heartbeat,
    brokers: Vec<BrokerEndpoint>,
    tls: Option<TlsFiles>,
}

impl HeartbeatClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("docker-broker-agent/0.1")
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            heartbeat: config.agent.clone(),
            brokers: config.brokers.clone(),
            tls: config.tls.clone(),
        })
    }

    pub async fn ping(&self, broker: &BrokerEndpoint) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/ping", broker.base_url()))
            .basic_auth(&broker.username, Some(&broker.password))
            .header(API_VERSION_HEADER, HEARTBEAT_API_VERSION)
            .json(&self.heartbeat)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::Internal(format!(
                "broker {} rejected heartbeat: status={} body={}",
                broker.base_url(),
                status,
                body
            )));
        }
        Ok(())
    }

    /// Upload this agent's TLS material. An existing registration is left alone.
    pub async fn upload_certs(&self, broker: &BrokerEndpoint, certs: &BrokerCerts) -> Result<()> {
        let resp = self
            .http
            .put(format!("{}/certificate/{}", broker.base_url(), certs.host))
            .basic_auth(&broker.username, Some(&broker.password))
            .header(API_VERSION_HEADER, HEARTBEAT_API_VERSION)
            .json(certs)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => {
                info!(broker = %broker.base_url(), "agent certificates uploaded");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(broker = %broker.base_url(), "broker already holds certificates");
                Ok(())
            }
            s => Err(BrokerError::Internal(format!(
                "certificate upload to {} failed: status={}",
                broker.base_url(),
                s
            ))),
        }
    }

    /// Ping every broker each `keep_alive` seconds until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Some(tls) = &self.tls {
            let certs = load_certs(tls, &self.heartbeat.docker_host).await?;
            for broker in &self.brokers {
                if let Err(e) = self.upload_certs(broker, &certs).await {
                    warn!(error = %e, "certificate upload failed");
                }
            }
        }

        let period = Duration::from_secs(u64::try_from(self.heartbeat.keep_alive.max(1)).unwrap_or(1));
        let mut ticker = tokio::time::interval(period);
        let mut links: Vec<LinkState> = self.brokers.iter().map(|_| LinkState::default()).collect();
        info!(
            docker_host = %self.heartbeat.docker_host,
            brokers = self.brokers.len(),
            interval_secs = period.as_secs(),
            "heartbeat started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("heartbeat stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    for (broker, link) in self.brokers.iter().zip(links.iter_mut()) {
                        let outcome = self.ping(broker).await.map_err(|e| e.to_string());
                        match (link.observe(&outcome), outcome.is_ok()) {
                            (Some(msg), true) => info!(broker = %broker.base_url(), "{}", msg),
                            (Some(msg), false) => warn!(broker = %broker.base_url(), "{}", msg),
                            (None, _) => {}
                        }
                    }
                }
            }
        }
    }
}

pub async fn load_certs(tls: &TlsFiles, host: &str) -> Result<BrokerCerts> {
    let ca = match &tls.ca_cert {
        Some(path) => tokio::fs::read(path).await?,
        None => Vec::new(),
    };
    Ok(BrokerCerts {
        host: host.to_string(),
        client_cert: tokio::fs::read(&tls.client_cert).await?,
        client_key: tokio::fs::read(&tls.client_key).await?,
        ca,
    })
}
