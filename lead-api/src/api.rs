use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use thiserror::Error;

use lead_engine::error::EngineError;
use lead_engine::lead::{CustomerId, Lead, MatchConfidence};

/// Body of the verification endpoints.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub lead: Lead,
    pub customer_id: Option<CustomerId>,
    #[serde(default = "default_confidence")]
    pub confidence: MatchConfidence,
}

fn default_confidence() -> MatchConfidence {
    MatchConfidence::None
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] axum::extract::rejection::JsonRejection),

    #[error("customer_id is required to confirm a match")]
    MissingCustomerId,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::RequestParsingError(_) | ApiError::MissingCustomerId => {
                StatusCode::BAD_REQUEST
            }
            // An un-recorded decision violates the audit guarantee;
            // the caller should retry.
            ApiError::Engine(EngineError::AuditWrite { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
