//! Response types and the error-to-status mapping.

use axum::{
  extract::rejection::{JsonRejection, PathRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use escalation_engine::session::SessionStatus;
use escalation_engine::types::{AttemptRecord, ErrorOutput};
use escalation_engine::{EngineError, Facility};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct CandidatesResponse {
  pub count: usize,
  pub facilities: Vec<Facility>,
}

#[derive(Debug, Serialize)]
pub struct AttemptsResponse {
  pub session_id: Uuid,
  pub incident_id: String,
  pub status: SessionStatus,
  pub attempts: Vec<AttemptRecord>,
}

/// Handler failure: a status code plus the engine's error body.
#[derive(Debug)]
pub struct ApiError {
  pub status: StatusCode,
  pub body: ErrorOutput,
}

impl ApiError {
  pub fn not_found(what: impl Into<String>) -> Self {
    Self {
      status: StatusCode::NOT_FOUND,
      body: ErrorOutput::new(what),
    }
  }
}

impl From<EngineError> for ApiError {
  fn from(err: EngineError) -> Self {
    let status = match &err {
      EngineError::Validation { .. } | EngineError::Json(_) => StatusCode::BAD_REQUEST,
      EngineError::Lookup(_) => StatusCode::BAD_GATEWAY,
      EngineError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Self {
      status,
      body: ErrorOutput::from_error(&err),
    }
  }
}

/// Undecodable request bodies get the same error body as engine errors.
impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    Self {
      status: rejection.status(),
      body: ErrorOutput::new(format!("json parse: {}", rejection.body_text())),
    }
  }
}

impl From<PathRejection> for ApiError {
  fn from(rejection: PathRejection) -> Self {
    Self {
      status: rejection.status(),
      body: ErrorOutput::new(rejection.body_text()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (self.status, Json(self.body)).into_response()
  }
}
