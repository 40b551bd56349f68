//! Error taxonomy for the identity subsystem.
//!
//! Authentication failures are deliberately flattened: an unknown email and a
//! wrong password produce the same error so callers cannot enumerate
//! accounts. Storage and federation failures keep their cause for the logs
//! but cross the boundary as a generic message only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: &'static str,
    },

    #[error("email already registered")]
    DuplicateEmail,

    #[error("invalid email or password")]
    AuthenticationFailed,

    #[error("missing or unknown caller identity")]
    Unauthenticated,

    #[error("invalid identity token")]
    TokenInvalid,

    #[error("required claims missing from token")]
    ClaimsMissing,

    #[error("federated sign-in failed")]
    FederationUpsertFailed(#[source] anyhow::Error),

    #[error("user not found")]
    AccountNotFound,

    #[error("storage unavailable")]
    StorageUnavailable(#[source] anyhow::Error),

    #[error("password processing failed")]
    Hashing(#[source] anyhow::Error),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(err.into())
    }
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::DuplicateEmail => StatusCode::CONFLICT,
            Self::AuthenticationFailed
            | Self::Unauthenticated
            | Self::TokenInvalid
            | Self::ClaimsMissing => StatusCode::UNAUTHORIZED,
            Self::AccountNotFound => StatusCode::NOT_FOUND,
            Self::FederationUpsertFailed(_) | Self::StorageUnavailable(_) | Self::Hashing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Internal causes are logged here and never serialized.
        match &self {
            AuthError::FederationUpsertFailed(cause) => {
                error!("federated sign-in failed: {cause:?}");
            }
            AuthError::StorageUnavailable(cause) => {
                error!("storage unavailable: {cause:?}");
            }
            AuthError::Hashing(cause) => {
                error!("password processing failed: {cause:?}");
            }
            _ => {}
        }

        let status = self.status();
        let body = match &self {
            AuthError::Validation { field, message } => json!({
                "error": message,
                "field": field,
            }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
