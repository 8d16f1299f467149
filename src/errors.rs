use crate::services::{
    account_service::AccountError,
    credentials::TokenError, inventory_service::InventoryError, pipeline::PipelineError,
    storage_service::StoreError,
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Returned for any upload failure the client cannot fix; details stay in the logs.
pub const UPLOAD_FAILED: &str = "Failed to process the upload and generate access token.";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        if err.is_rejection() {
            tracing::info!(error = %err, "upload rejected");
            return AppError::bad_request(err.to_string());
        }
        tracing::error!(error = %err, "upload failed");
        AppError::internal(UPLOAD_FAILED)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ObjectNotFound { .. } => AppError::not_found(err.to_string()),
            StoreError::InvalidContainerName { .. } | StoreError::InvalidObjectKey => {
                AppError::bad_request(err.to_string())
            }
            StoreError::Timeout(_) | StoreError::Sqlx(_) | StoreError::Io(_) => {
                tracing::error!(error = %err, "object store failure");
                AppError::internal("Object store unavailable")
            }
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        tracing::debug!(error = %err, "token refused");
        AppError::new(StatusCode::FORBIDDEN, err.to_string())
    }
}

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::ItemNotFound(_) => AppError::not_found(err.to_string()),
            InventoryError::InsufficientStock { .. } => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            InventoryError::InvalidQuantity => AppError::bad_request(err.to_string()),
            InventoryError::Sqlx(_) => {
                tracing::error!(error = %err, "inventory query failed");
                AppError::internal("Inventory unavailable")
            }
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::MissingField => AppError::bad_request(err.to_string()),
            AccountError::UsernameTaken(_) => AppError::new(StatusCode::CONFLICT, err.to_string()),
            AccountError::IdsExhausted
            | AccountError::Hash(_)
            | AccountError::Join(_)
            | AccountError::Sqlx(_) => {
                tracing::error!(error = %err, "account creation failed");
                AppError::internal("Account creation failed")
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}
