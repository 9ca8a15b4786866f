use crate::db::errors::DbError;
use crate::gateway::GatewayError;
use crate::object_store::StorageError;
use crate::payment_providers::PaymentError;
use crate::prompts::PromptError;
use crate::types::{Operation, Permission};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

/// Message shown when an anonymous device has used all of its free generations.
pub const QUOTA_EXHAUSTED_MESSAGE: &str = "You have used all of your free generations. Sign up to keep creating.";

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// User lacks required permissions for the operation
    #[error("Insufficient permissions to {action} {resource}")]
    InsufficientPermissions {
        required: Permission,
        action: Operation,
        resource: String,
    },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Request body or upload exceeds the configured limit
    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Available balance (credits minus open holds) is below the feature cost
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i64, available: i64 },

    /// Anonymous device has no free generations left
    #[error("Anonymous quota exhausted")]
    QuotaExhausted,

    /// An upstream service (model, payment gateway) failed or returned something unusable
    #[error("{service} failed: {message}")]
    Upstream { service: String, message: String },

    /// Conflict, e.g. an idempotency key that is in flight or reused with a different body
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::QuotaExhausted => StatusCode::TOO_MANY_REQUESTS,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::InsufficientPermissions { action, resource, .. } => {
                format!("Insufficient permissions to {action} {resource}")
            }
            Error::BadRequest { message } | Error::PayloadTooLarge { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::InsufficientCredits { required, available } => {
                format!("This feature costs {required} credits but you only have {available} available")
            }
            Error::QuotaExhausted => QUOTA_EXHAUSTED_MESSAGE.to_string(),
            Error::Upstream { service, .. } => format!("The {service} could not complete this request. Please try again."),
            Error::Conflict { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { table, constraint, .. } => match (table.as_deref(), constraint.as_deref()) {
                    (Some("users"), Some(c)) if c.contains("email") => "An account with this email address already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Upstream { .. } => {
                tracing::error!("Upstream error: {}", self);
            }
            Error::Database(_) | Error::Conflict { .. } => {
                tracing::warn!("Conflict or constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::InsufficientPermissions { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. }
            | Error::PayloadTooLarge { .. }
            | Error::NotFound { .. }
            | Error::InsufficientCredits { .. }
            | Error::QuotaExhausted => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let message = self.user_message();

        match &self {
            Error::InsufficientCredits { required, available } => (
                status,
                Json(json!({
                    "message": message,
                    "required": required,
                    "available": available,
                })),
            )
                .into_response(),
            Error::QuotaExhausted | Error::Conflict { .. } => (status, Json(json!({ "message": message }))).into_response(),
            _ => (status, message).into_response(),
        }
    }
}

impl From<GatewayError> for Error {
    fn from(err: GatewayError) -> Self {
        Error::Upstream {
            service: "image model".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Internal {
            operation: format!("store object: {err}"),
        }
    }
}

impl From<PaymentError> for Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidData(message) => Error::BadRequest { message },
            PaymentError::ProviderApi(message) => Error::Upstream {
                service: "payment gateway".to_string(),
                message,
            },
        }
    }
}

impl From<PromptError> for Error {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::Invalid(message) => Error::BadRequest { message },
            PromptError::Template(e) => Error::Internal {
                operation: format!("render prompt: {e}"),
            },
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
