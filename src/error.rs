//! Error taxonomy for the camera registry and its command surface

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::types::{CameraId, FieldViolation};

/// Structural errors raised by the registry. Always surfaced to callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("validation failed: {}", join_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("camera not found: {0}")]
    NotFound(CameraId),

    #[error("camera id space exhausted")]
    IdsExhausted,
}

/// Failure of a single reachability probe. Never leaves the prober.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe aborted: {0}")]
    Aborted(String),
}

/// Stable, machine-readable error kinds exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationFailed,
    NotFound,
    InvalidPayload,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidPayload => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors returned by command handlers and the HTTP layer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("camera data is invalid: {}", join_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("camera {0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidPayload(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Validation(_) => ErrorKind::ValidationFailed,
            CommandError::NotFound(_) => ErrorKind::NotFound,
            CommandError::InvalidPayload(_) => ErrorKind::InvalidPayload,
            CommandError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Names of the fields that failed validation, if any
    pub fn fields(&self) -> Vec<&str> {
        match self {
            CommandError::Validation(violations) => violations.iter().map(|v| v.field.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<RegistryError> for CommandError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(violations) => CommandError::Validation(violations),
            RegistryError::NotFound(id) => CommandError::NotFound(id.to_string()),
            exhausted @ RegistryError::IdsExhausted => CommandError::Internal(exhausted.to_string()),
        }
    }
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = kind.status_code();
        let data = match &self {
            CommandError::Validation(violations) => json!({ "violations": violations }),
            _ => serde_json::Value::Null,
        };

        let body = json!({
            "code": status.as_u16(),
            "kind": kind,
            "message": self.to_string(),
            "data": data,
        });

        (status, Json(body)).into_response()
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
