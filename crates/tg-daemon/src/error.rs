//! HTTP error mapping.
//!
//! Every component error carries an `ErrorKind`; this module renders the
//! structured body and picks the status code. Internal failures are masked
//! from callers (the audit log holds the detail); everything else surfaces
//! verbatim with a stable machine-readable kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use tg_schemas::ErrorKind;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: ErrorKind,
    pub retriable: bool,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::State | ErrorKind::Concurrency => StatusCode::CONFLICT,
            ErrorKind::Policy => StatusCode::FORBIDDEN,
            ErrorKind::Resource => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.kind {
            // Masked: detail lives in the audit log, not the wire.
            ErrorKind::Internal => {
                tracing::error!(error = %self.message, "internal error");
                "internal error".to_string()
            }
            _ => self.message,
        };
        let body = ErrorBody {
            error: message,
            kind: self.kind,
            retriable: self.kind.is_retriable(),
        };
        (status, Json(body)).into_response()
    }
}

/// Convert any component error exposing `kind()` into an `ApiError`.
macro_rules! from_component_error {
    ($ty:ty) => {
        impl From<$ty> for ApiError {
            fn from(e: $ty) -> Self {
                ApiError::new(e.kind(), e.to_string())
            }
        }
    };
}

from_component_error!(tg_schemas::IntentError);
from_component_error!(tg_schemas::TransitionError);
from_component_error!(tg_audit::AuditError);
from_component_error!(tg_killswitch::KillSwitchError);
from_component_error!(tg_broker::BrokerError);
from_component_error!(tg_approval::ApprovalError);
from_component_error!(tg_execution::SubmitError);
from_component_error!(tg_execution::MutationError);
from_component_error!(tg_gateway::GatewayError);
from_component_error!(tg_risk::PolicyError);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_expected_statuses() {
        assert_eq!(ApiError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::new(ErrorKind::Policy, "x").status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::new(ErrorKind::Concurrency, "x").status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::new(ErrorKind::Resource, "x").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
