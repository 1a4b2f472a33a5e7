use thiserror::Error;

/// Main error type for the broker
#[derive(Error, Debug)]
pub enum BrokerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Dispatch errors
    #[error("no agents available")]
    NoAgentsAvailable,

    // Lookup misses (reported as "gone")
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Failed to find the service instance ({0})")]
    InstanceGone(String),

    #[error("Service binding not found: instance {instance_id}, binding {binding_id}")]
    BindingNotFound {
        instance_id: String,
        binding_id: String,
    },

    #[error("can't find agent {0} - assume its already gone")]
    AgentGone(String),

    // Conflicts
    #[error("Service instance already exists: {0}")]
    InstanceExists(String),

    #[error("Service binding already exists: instance {instance_id}, binding {binding_id}")]
    BindingExists {
        instance_id: String,
        binding_id: String,
    },

    #[error("Certificate exists for this host: {0}")]
    CertificateExists(String),

    // Provisioning errors
    #[error("No free host port in range [{min}, {max})")]
    RangeExhausted { min: u16, max: u16 },

    #[error("No executor specified: {0}")]
    NoExecutor(String),

    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("Unbind failed: {0}")]
    UnbindFailed(String),

    // Catalog administration
    #[error("Catalog is not supported: {0}")]
    UnknownCatalog(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Failures reported by a container runtime (docker REST API)
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("{status}: {body}")]
    Api { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode runtime response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures of a provisioning script executed inside a container
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("script exited with status {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("malformed script output: {0}")]
    Malformed(String),
}

impl From<RuntimeError> for BrokerError {
    fn from(err: RuntimeError) -> Self {
        BrokerError::ProvisioningFailed(err.to_string())
    }
}

impl From<ExecError> for BrokerError {
    fn from(err: ExecError) -> Self {
        BrokerError::ProvisioningFailed(err.to_string())
    }
}
