use std::io::Error as IoError;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use vigil_service::error::{HeartbeatError, IncidentError, OperationError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error(transparent)]
    Config(#[from] vigil_service::config::Error),
    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),
    #[error(transparent)]
    Incident(#[from] IncidentError),
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Heartbeat(HeartbeatError::Unauthorized) => StatusCode::UNAUTHORIZED,
            AppError::Heartbeat(HeartbeatError::Inactive(_)) => StatusCode::FORBIDDEN,
            AppError::Incident(IncidentError::NotFound(_)) | AppError::Operation(OperationError::NotFound(..)) => {
                StatusCode::NOT_FOUND
            }
            AppError::Incident(IncidentError::IllegalTransition { .. }) => StatusCode::CONFLICT,
            AppError::Incident(IncidentError::Invalid(_))
            | AppError::Operation(OperationError::WrongKind(..))
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        HttpResponse::build(status).json(json!({ "success": false, "error": self.to_string() }))
    }
}
