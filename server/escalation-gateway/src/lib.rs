//! Emergency Escalation Gateway
//!
//! HTTP front door over the escalation engine: candidate lookup, escalation
//! start and per-session attempt audit. Bind to 127.0.0.1 by default (internal only).

mod handlers;
mod state;
mod types;

use std::sync::Arc;

use axum::{
  routing::{get, post},
  Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use handlers::{candidates, health, session_attempts, start_escalation};
pub use state::AppState;
pub use types::{ApiError, AttemptsResponse, CandidatesResponse};

/// All gateway routes over shared state.
pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/candidates", post(candidates))
    .route("/escalations", post(start_escalation))
    .route("/escalations/:id/attempts", get(session_attempts))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
    .with_state(state)
}
