use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced to the caller of the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Upstream transport error: {0}")]
    UpstreamTransport(#[from] reqwest::Error),

    #[error("Invalid upstream payload: {0}")]
    UpstreamPayload(#[from] serde_json::Error),

    #[error("Upstream stream error: {0}")]
    UpstreamStream(String),
}

impl BridgeError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        BridgeError::MalformedRequest(msg.into())
    }

    fn error_type(&self) -> &'static str {
        match self {
            BridgeError::MalformedRequest(_) => "invalid_request_error",
            _ => "upstream_error",
        }
    }
}

impl ResponseError for BridgeError {
    fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        }))
    }
}
