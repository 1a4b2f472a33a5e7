use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::docker_rest::DockerClientSettings;
use crate::broker::ProvisionerSettings;
use crate::domain::{Heartbeat, ImageDefinition};

/// Broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub catalog: CatalogConfig,
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Basic-auth credentials the platform uses toward the broker
    pub username: String,
    pub password: String,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the in-memory store is used when unset
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Catalog name accepted by the image admin routes
    pub name: String,
    /// Seeds an empty store at startup
    #[serde(default)]
    pub images: Vec<ImageDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// HTTP timeout toward agent docker APIs
    pub request_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl RuntimeConfig {
    pub fn client_settings(&self) -> DockerClientSettings {
        DockerClientSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }

    pub fn provisioner_settings(&self) -> ProvisionerSettings {
        ProvisionerSettings {
            stop_timeout_secs: self.stop_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info,docker_broker=debug,sqlx=warn".to_string()
}

fn env_name(var: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| "development".to_string())
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.username", "admin")?
            .set_default("server.password", "admin")?
            .set_default("database.max_connections", 5)?
            .set_default("catalog.name", "docker-broker")?
            .set_default("runtime.request_timeout_secs", 60)?
            .set_default("runtime.stop_timeout_secs", 0)?
            .set_default("runtime.accept_invalid_certs", false)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(File::from(config_dir.join(env_name("DOCKER_BROKER_ENV"))).required(false))
            // DOCKER_BROKER__SERVER__PORT, DOCKER_BROKER__DATABASE__URL, ...
            .add_source(
                Environment::with_prefix("DOCKER_BROKER")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.apply_platform_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Host and port assigned by the hosting platform win over files.
    pub fn apply_platform_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("VCAP_APP_HOST").filter(|h| !h.is_empty()) {
            self.server.host = host;
        }
        if let Some(port) = lookup("VCAP_APP_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.server.username.is_empty() || self.server.password.is_empty() {
            errors.push("server.username and server.password must be set".to_string());
        }
        if self.catalog.name.trim().is_empty() {
            errors.push("catalog.name must be set".to_string());
        }
        for (idx, image) in self.catalog.images.iter().enumerate() {
            if image.name.trim().is_empty() {
                errors.push(format!("catalog.images[{}] has an empty name", idx));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration of the `agent` heartbeat process
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub agent: Heartbeat,
    #[serde(default)]
    pub brokers: Vec<BrokerEndpoint>,
    #[serde(default)]
    pub tls: Option<TlsFiles>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl BrokerEndpoint {
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// PEM files uploaded to the broker so it can reach this agent over TLS
#[derive(Debug, Clone, Deserialize)]
pub struct TlsFiles {
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
}

impl AgentConfig {
    /// Load an agent configuration file, overridable by `DOCKER_BROKER_AGENT__*` variables
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("agent.keep_alive", 5)?
            .set_default("agent.is_active", true)?
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(
                Environment::with_prefix("DOCKER_BROKER_AGENT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.agent.docker_host.trim().is_empty() {
            errors.push("agent.docker_host must be set".to_string());
        }
        if self.agent.keep_alive <= 0 {
            errors.push("agent.keep_alive must be positive".to_string());
        }
        if self.agent.port_min > self.agent.port_max {
            errors.push("agent.port_min must not exceed agent.port_max".to_string());
        }
        if self.brokers.is_empty() {
            errors.push("at least one broker must be configured".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_load_from_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path()).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.username, "admin");
        assert!(config.database.url.is_none());
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.catalog.name, "docker-broker");
        assert_eq!(config.runtime.request_timeout_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_catalog_images_from_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
[server]
port = 9000

[[catalog.images]]
name = "mysql"
plan = "100"
num_instances = 1

[catalog.images.credentials]
uri = "mysql://$HOST:$PORT_3306"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.catalog.images.len(), 1);
        assert_eq!(config.catalog.images[0].credentials["uri"], "mysql://$HOST:$PORT_3306");
    }

    #[test]
    fn test_platform_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::load_from(dir.path()).unwrap();
        config.apply_platform_env(|key| match key {
            "VCAP_APP_HOST" => Some("127.0.0.1".to_string()),
            "VCAP_APP_PORT" => Some("61000".to_string()),
            _ => None,
        });
        assert_eq!(config.server.bind_addr(), "127.0.0.1:61000");
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::load_from(dir.path()).unwrap();
        config.server.password.clear();
        config.catalog.images.push(ImageDefinition::default());

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_agent_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        fs::write(
            &path,
            r#"
[agent]
service_host = "10.0.0.5"
docker_host = "10.0.0.5"
docker_port = 2376
perf_factor = 1.5
exec_command = "DockerCommandExec"
port_min = 49000
port_max = 49100

[[brokers]]
host = "broker.local"
port = 8080
username = "admin"
password = "admin"
"#,
        )
        .unwrap();

        let config = AgentConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.docker_port, 2376);
        assert_eq!(config.agent.keep_alive, 5);
        assert!(config.agent.is_active);
        assert_eq!(config.brokers[0].base_url(), "http://broker.local:8080");
        assert!(config.validate().is_ok());
    }
}
