use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TesseraError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("OCR engine error: {0}")]
    Engine(String),

    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl TesseraError {
    pub fn status(&self) -> StatusCode {
        match self {
            TesseraError::Decode(_) => StatusCode::BAD_REQUEST,
            TesseraError::Config(_) => StatusCode::BAD_REQUEST,
            TesseraError::Validation(_) => StatusCode::BAD_REQUEST,
            TesseraError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TesseraError::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            // Non-standard "client closed request"; nobody is listening anyway.
            TesseraError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            TesseraError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::task::JoinError> for TesseraError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            TesseraError::Cancelled
        } else {
            TesseraError::Internal(format!("OCR task panicked: {err}"))
        }
    }
}

impl IntoResponse for TesseraError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %message, "Request failed");
        } else {
            tracing::debug!(error = %message, "Request rejected");
        }

        let body = Json(json!({
            "msg": message,
            "results": []
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, TesseraError>;
