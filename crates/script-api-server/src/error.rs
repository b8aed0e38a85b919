// script-api-server/src/error.rs
// ============================================================================
// Module: API Error
// Description: The single point where internal errors become HTTP responses.
// Purpose: Project every failure mode to a `{detail}` JSON body and the
//          status code spec'd for its error kind.
// Dependencies: axum, script-api-auth, script-api-core
// ============================================================================

//! ## Overview
//! Every handler returns `Result<_, ApiError>`. [`ApiError`]'s [`IntoResponse`]
//! impl is the one place status codes are decided, matching the taxonomy:
//! validation → 400, not-found → 404, auth → 401, permission → 403,
//! conflict → 409, misconfiguration → 500.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use script_api_auth::AuthError;
use script_api_core::ManagerError;
use script_api_core::RegistryError;
use serde::Serialize;
use thiserror::Error;

/// Errors the HTTP surface can return, already mapped to a status code.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request body or invalid path/query parameter.
    #[error("{0}")]
    BadRequest(String),
    /// No bearer token, or it failed to verify.
    #[error("{0}")]
    Unauthorized(String),
    /// A valid token lacked the scopes the route requires.
    #[error("insufficient scopes")]
    Forbidden,
    /// The requested script or run does not exist, or a feature is disabled.
    #[error("{0}")]
    NotFound(String),
    /// Duplicate active run rejected because `duplicate=false`.
    #[error("an active run for this script already exists")]
    Conflict,
    /// The server is misconfigured for the requested operation.
    #[error("{0}")]
    ServerMisconfigured(String),
}

/// Response body for every non-2xx response: `{detail}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::Unauthorized(detail) => (StatusCode::UNAUTHORIZED, detail),
            Self::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            Self::Conflict => (StatusCode::CONFLICT, self.to_string()),
            Self::ServerMisconfigured(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated(detail) => Self::Unauthorized(detail),
            AuthError::InsufficientScopes => Self::Forbidden,
            AuthError::Misconfigured => Self::ServerMisconfigured(err.to_string()),
            AuthError::AdminExchangeDisabled => Self::NotFound(err.to_string()),
            AuthError::InvalidAdminSecret => Self::Unauthorized(err.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(script) => Self::NotFound(format!("script not found: {script}")),
            RegistryError::NotUnderRoot | RegistryError::WrongExtension => Self::BadRequest(err.to_string()),
            RegistryError::Io(_) => Self::ServerMisconfigured(err.to_string()),
        }
    }
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        Self::ServerMisconfigured(err.to_string())
    }
}
