use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Token exchange failed: {0}")]
    Auth(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Push declined by provider: {description}")]
    Rejected { code: String, description: String },

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("Unknown payment: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_code: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();

        let (status, error_code, provider_code) = match &self {
            GatewayError::InvalidPhoneNumber(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_PHONE_NUMBER", None)
            }
            GatewayError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT", None),
            GatewayError::Auth(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_AUTH_FAILED", None),
            GatewayError::Rejected { code, .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "PAYMENT_REJECTED",
                Some(code.clone()),
            ),
            GatewayError::Provider { .. }
            | GatewayError::Http(_)
            | GatewayError::InvalidResponse(_) => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", None)
            }
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "PAYMENT_NOT_FOUND", None),
            GatewayError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", None),
        };

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id,
            provider_code,
        };

        tracing::error!(
            error = ?self,
            error_code = error_code,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}
