use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::Credentials;
use crate::error::BrokerError;

// ============================================================================
// Broker API responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionResponse {
    pub dashboard_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindResponse {
    pub credentials: Credentials,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syslog_drain_url: Option<String>,
}

/// `{}` body for deletes and pings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub description: String,
}

// ============================================================================
// Error mapping
// ============================================================================

/// `BrokerError` rendered as `{"description": ...}` with the matching status.
#[derive(Debug)]
pub struct ApiError(pub BrokerError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BrokerError::InstanceExists(_)
            | BrokerError::BindingExists { .. }
            | BrokerError::CertificateExists(_) => StatusCode::CONFLICT,
            BrokerError::ImageNotFound(_)
            | BrokerError::InstanceGone(_)
            | BrokerError::BindingNotFound { .. }
            | BrokerError::AgentGone(_) => StatusCode::GONE,
            BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "broker request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "broker request rejected");
        }
        let body = ErrorResponse {
            description: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
