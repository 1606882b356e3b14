//! Gateway error taxonomy and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("user is not on the allow-list")]
    Unauthorized,

    #[error("request ceiling reached ({count}/{ceiling})")]
    CapacityExceeded { count: u32, ceiling: u32 },

    #[error("user {0} not found")]
    NotFound(String),

    #[error("model request failed: {0:#}")]
    Upstream(anyhow::Error),

    #[error("storage operation failed: {0:#}")]
    Storage(anyhow::Error),
}

impl GatewayError {
    pub fn missing_field(field: &str) -> Self {
        GatewayError::Validation(format!("Missing required field: {}", field))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::CapacityExceeded { .. } => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Upstream(_) | GatewayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a research subject; never carries internal detail.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Validation(msg) => msg.clone(),
            GatewayError::Unauthorized => "User ID is not authorized".to_string(),
            GatewayError::CapacityExceeded { .. } => "Request limit reached".to_string(),
            GatewayError::NotFound(_) => "User not found".to_string(),
            GatewayError::Upstream(_) => "Failed to get a response from the model".to_string(),
            GatewayError::Storage(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            GatewayError::Upstream(_) | GatewayError::Storage(_) => error!("{}", self),
            _ => warn!("Request rejected ({}): {}", status.as_u16(), self),
        }

        (
            status,
            Json(json!({
                "error": self.public_message(),
                "code": status.as_u16(),
            })),
        )
            .into_response()
    }
}
