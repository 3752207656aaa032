//! Error types and HTTP response envelope for the billing service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during billing operations
#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Visit not found: {0}")]
    VisitNotFound(Uuid),

    #[error("Billing record not found: {0}")]
    BillingNotFound(Uuid),

    #[error("Invalid payment: {0}")]
    InvalidPayment(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl BillingError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::VisitNotFound(_) | BillingError::BillingNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            BillingError::InvalidPayment(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::Validation(_) => StatusCode::BAD_REQUEST,
            BillingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            BillingError::VisitNotFound(_) => "visit_not_found",
            BillingError::BillingNotFound(_) => "billing_not_found",
            BillingError::InvalidPayment(_) => "invalid_payment",
            BillingError::Validation(_) => "validation_error",
            BillingError::Database(_) => "database_error",
        }
    }

    /// Message safe to hand back to API clients. Database details stay in logs.
    fn client_message(&self) -> String {
        match self {
            BillingError::Database(_) => "A database error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

/// Error details returned to API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error_type: String,
    pub message: String,
}

/// Helper to create a successful API response
pub fn api_success<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "billing request failed");
        } else {
            tracing::warn!(error = %self, "billing request rejected");
        }

        let body = Json(ApiErrorResponse {
            success: false,
            error_type: self.error_type().to_string(),
            message: self.client_message(),
        });

        (status, body).into_response()
    }
}
