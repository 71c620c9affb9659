use std::future::ready;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::{
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use lead_engine::lead::Lead;
use lead_engine::pipeline::{EvaluationOutcome, LeadPipeline, VerificationOutcome};

use crate::api::{ApiError, VerifyRequest};
use crate::metrics::{setup_metrics_recorder, track_metrics};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LeadPipeline>,
}

async fn index() -> &'static str {
    "lead-api"
}

/// Host trigger: evaluate a lead on creation or identifier edit.
async fn evaluate(
    State(state): State<AppState>,
    payload: Result<Json<Lead>, JsonRejection>,
) -> Result<Json<EvaluationOutcome>, ApiError> {
    let Json(lead) = payload?;
    let outcome = state.pipeline.evaluate(&lead).await?;
    Ok(Json(outcome))
}

async fn confirm_match(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerificationOutcome>, ApiError> {
    let Json(request) = payload?;
    let customer_id = request.customer_id.ok_or(ApiError::MissingCustomerId)?;
    let outcome = state
        .pipeline
        .confirm_match(&request.lead, customer_id, request.confidence)
        .await?;
    Ok(Json(outcome))
}

async fn reject_match(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerificationOutcome>, ApiError> {
    let Json(request) = payload?;
    let outcome = state
        .pipeline
        .reject_match(&request.lead, request.customer_id)
        .await?;
    Ok(Json(outcome))
}

pub fn router(pipeline: Arc<LeadPipeline>, metrics: bool) -> Router {
    let state = AppState { pipeline };

    let router = Router::new()
        .route("/", get(index))
        .route("/v1/leads/evaluate", post(evaluate))
        .route("/v1/leads/confirm-match", post(confirm_match))
        .route("/v1/leads/reject-match", post(reject_match))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to. Installing a global
    // recorder when used as a library (during tests etc) does not work
    // well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();

        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
