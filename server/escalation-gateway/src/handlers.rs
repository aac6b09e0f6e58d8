//! HTTP handlers for the escalation gateway.

use axum::{
  extract::{
    rejection::{JsonRejection, PathRejection},
    Path, State,
  },
  Json,
};
use escalation_engine::types::CandidateQuery;
use escalation_engine::{EscalationOutcome, EscalationRequest};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;
use crate::types::{ApiError, AttemptsResponse, CandidatesResponse};

pub async fn health() -> &'static str {
  "ok"
}

pub async fn candidates(
  State(state): State<Arc<AppState>>,
  body: Result<Json<CandidateQuery>, JsonRejection>,
) -> Result<Json<CandidatesResponse>, ApiError> {
  let Json(query) = body?;
  let facilities = state.engine.find_candidates(&query).await?;
  Ok(Json(CandidatesResponse {
    count: facilities.len(),
    facilities,
  }))
}

/// Runs the escalation to completion; the response carries the outcome.
pub async fn start_escalation(
  State(state): State<Arc<AppState>>,
  body: Result<Json<EscalationRequest>, JsonRejection>,
) -> Result<Json<EscalationOutcome>, ApiError> {
  let Json(req) = body?;
  match state.engine.handle(&req).await {
    Ok(outcome) => {
      info!(
        session_id = %outcome.session_id(),
        device_id = %req.incident.device_id,
        exhausted = outcome.is_exhausted(),
        "escalation settled"
      );
      Ok(Json(outcome))
    }
    Err(e) => {
      warn!(device_id = %req.incident.device_id, error = %e, "escalation rejected");
      Err(e.into())
    }
  }
}

pub async fn session_attempts(
  State(state): State<Arc<AppState>>,
  path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AttemptsResponse>, ApiError> {
  let Path(id) = path?;
  let session = state
    .engine
    .session(&id)
    .ok_or_else(|| ApiError::not_found(format!("unknown session {}", id)))?;
  Ok(Json(AttemptsResponse {
    session_id: session.id(),
    incident_id: session.incident().incident_id.clone(),
    status: session.status(),
    attempts: session.attempts(),
  }))
}
