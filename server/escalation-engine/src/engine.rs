//! Core engine: owns configuration, channels, lookup and live sessions, and
//! exposes the boundary operations.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters;
use crate::channel::ChannelSet;
use crate::config::{Config, DispatchConfig};
use crate::dispatcher;
use crate::error::EngineError;
use crate::lookup::{CachedLookup, FacilityLookup, StaticRegistry};
use crate::normalize;
use crate::ranking;
use crate::session::{EscalationSession, SessionStore};
use crate::types::*;

/// The escalation engine. Sessions are independent; the engine itself only
/// shares read-only configuration and the lookup cache between them.
pub struct Engine {
  config: Config,
  channels: Arc<ChannelSet>,
  lookup: Option<Arc<dyn FacilityLookup>>,
  registry: StaticRegistry,
  sessions: SessionStore,
}

impl Engine {
  pub fn new(config: Config, channels: ChannelSet) -> Self {
    let sessions = SessionStore::new(config.session_retention);
    Self {
      config,
      channels: Arc::new(channels),
      lookup: None,
      registry: StaticRegistry::default(),
      sessions,
    }
  }

  pub fn with_defaults(channels: ChannelSet) -> Self {
    Self::new(Config::default(), channels)
  }

  /// Engine wired from the environment: `ESCALATION_*` tunables, webhook plus
  /// `*_RELAY_URL` relays, and an optional `FACILITY_REGISTRY` JSON file that
  /// serves as both the cached lookup and its fallback.
  pub fn from_env() -> Result<Self, EngineError> {
    let config = Config::from_env()?;
    let client = reqwest::Client::builder()
      .connect_timeout(config.dispatch.per_channel_timeout)
      .build()
      .map_err(|e| EngineError::config("http client", e.to_string()))?;
    let channels = adapters::channel_set_from_env(client);

    let registry = match std::env::var("FACILITY_REGISTRY") {
      Ok(path) if !path.trim().is_empty() => StaticRegistry::from_file(path.trim())?,
      _ => StaticRegistry::default(),
    };
    info!(
      channels = ?channels.kinds(),
      registry = registry.len(),
      batch_size = config.dispatch.batch_size,
      "escalation engine configured"
    );

    let ttl = config.lookup_cache_ttl;
    Ok(
      Self::new(config, channels)
        .with_lookup(Arc::new(CachedLookup::new(registry.clone(), ttl)))
        .with_registry(registry),
    )
  }

  /// Primary facility source. Without one, the registry is queried directly.
  pub fn with_lookup(mut self, lookup: Arc<dyn FacilityLookup>) -> Self {
    self.lookup = Some(lookup);
    self
  }

  /// Pre-seeded registry used when the primary lookup fails.
  pub fn with_registry(mut self, registry: StaticRegistry) -> Self {
    self.registry = registry;
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Facilities around a coordinate. A failing primary lookup falls back to
  /// the registry; only invalid input is an error.
  pub async fn find_candidates(&self, query: &CandidateQuery) -> Result<Vec<Facility>, EngineError> {
    let origin = Coordinate::new(query.lat, query.lon)?;
    let radius_km = self.radius(query.radius_km)?;
    Ok(
      self
        .lookup_facilities(&origin, radius_km, query.required_capability.as_deref())
        .await,
    )
  }

  async fn lookup_facilities(
    &self,
    origin: &Coordinate,
    radius_km: f64,
    required_capability: Option<&str>,
  ) -> Vec<Facility> {
    if let Some(lookup) = &self.lookup {
      match lookup.find(origin, radius_km, required_capability).await {
        Ok(found) => return accept_lookup_results(found),
        Err(e) => warn!(
          error = %e,
          registry = self.registry.len(),
          "facility lookup failed, falling back to registry"
        ),
      }
    }
    self.registry.within(origin, radius_km)
  }

  fn radius(&self, requested: Option<f64>) -> Result<f64, EngineError> {
    match requested {
      Some(r) if !r.is_finite() || r <= 0.0 => {
        Err(EngineError::validation("radius_km", "must be a positive number"))
      }
      Some(r) => Ok(r),
      None => Ok(self.config.default_radius_km),
    }
  }

  /// Run one escalation over already-ranked candidates.
  pub async fn start_escalation(
    &self,
    incident: Incident,
    candidates: Vec<RankedCandidate>,
    dispatch: Option<DispatchConfig>,
  ) -> Result<EscalationOutcome, EngineError> {
    let dispatch = match dispatch {
      Some(d) => d.validated()?,
      None => self.config.dispatch.clone(),
    };

    let session = Arc::new(EscalationSession::new(incident, candidates));
    self.sessions.insert(session.clone());
    Ok(dispatcher::escalate(session, self.channels.clone(), &dispatch).await)
  }

  /// Full request path: validate, derive capability, source facilities, rank, escalate.
  pub async fn handle(&self, req: &EscalationRequest) -> Result<EscalationOutcome, EngineError> {
    let incident = normalize::incident(&req.incident)?;
    let dispatch = match &req.config {
      Some(overrides) => Some(self.config.dispatch.with_overrides(overrides)?),
      None => None,
    };

    let facilities = match &req.facilities {
      Some(raw) => normalize::facilities(raw)?,
      None => {
        let radius_km = self.radius(req.radius_km)?;
        self
          .lookup_facilities(&incident.location, radius_km, incident.required_capability.as_deref())
          .await
      }
    };

    let ranking = ranking::rank_detailed(
      &facilities,
      &incident.location,
      incident.required_capability.as_deref(),
    );
    if ranking.capability_relaxed {
      warn!(
        incident_id = %incident.incident_id,
        capability = incident.required_capability.as_deref().unwrap_or_default(),
        candidates = ranking.candidates.len(),
        "no facility has the required capability, escalating to all candidates"
      );
    }
    info!(
      incident_id = %incident.incident_id,
      device_id = %incident.device_id,
      candidates = ranking.candidates.len(),
      "incident accepted for escalation"
    );

    self.start_escalation(incident, ranking.candidates, dispatch).await
  }

  /// Audit trail of a live or recently settled session.
  pub fn session_attempts(&self, session_id: &Uuid) -> Option<Vec<AttemptRecord>> {
    self.sessions.get(session_id).map(|s| s.attempts())
  }

  pub fn session(&self, session_id: &Uuid) -> Option<Arc<EscalationSession>> {
    self.sessions.get(session_id)
  }
}

/// Lookup collaborators are untrusted: normalize their facilities the same way
/// as caller-supplied ones, dropping what does not validate.
fn accept_lookup_results(found: Vec<Facility>) -> Vec<Facility> {
  found
    .iter()
    .filter_map(|raw| match normalize::facility(raw) {
      Ok(facility) => Some(facility),
      Err(e) => {
        warn!(facility_id = %raw.id, error = %e, "dropping invalid facility from lookup");
        None
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::channel::{ChannelAdapter, ChannelOutcome};
  use async_trait::async_trait;
  use std::time::Duration;

  struct AcceptAll;

  #[async_trait]
  impl ChannelAdapter for AcceptAll {
    fn kind(&self) -> ChannelKind {
      ChannelKind::Webhook
    }

    async fn attempt_notify(&self, _: &Facility, _: &Incident, _: Duration) -> ChannelOutcome {
      ChannelOutcome::Accepted
    }
  }

  struct Down;

  #[async_trait]
  impl FacilityLookup for Down {
    async fn find(&self, _: &Coordinate, _: f64, _: Option<&str>) -> Result<Vec<Facility>, EngineError> {
      Err(EngineError::lookup("poi service unavailable"))
    }
  }

  struct Fixed(Vec<Facility>);

  #[async_trait]
  impl FacilityLookup for Fixed {
    async fn find(&self, _: &Coordinate, _: f64, _: Option<&str>) -> Result<Vec<Facility>, EngineError> {
      Ok(self.0.clone())
    }
  }

  fn facility(id: &str, lat: f64, tags: &[&str]) -> Facility {
    Facility {
      id: id.into(),
      name: id.into(),
      location: Coordinate { lat, lon: 0.0 },
      tags: tags.iter().map(|t| t.to_string()).collect(),
      channels: ContactChannels {
        webhook: Some(format!("http://{}/hook", id)),
        phone: None,
        email: None,
      },
    }
  }

  fn request() -> EscalationRequest {
    EscalationRequest {
      incident: InboundIncident {
        device_id: "wrist-7".into(),
        lat: Some(0.0),
        lon: Some(0.0),
        heart_rate: Some(185.0),
        spo2: Some(96.0),
        irregular_rhythm: false,
        waveform: None,
        timestamp: Some("2025-01-15T10:30:00Z".into()),
        required_capability: None,
      },
      facilities: None,
      radius_km: None,
      config: None,
    }
  }

  fn engine() -> Engine {
    Engine::with_defaults(ChannelSet::new().with(Arc::new(AcceptAll)))
  }

  #[tokio::test]
  async fn lookup_failure_falls_back_to_registry() {
    let engine = engine()
      .with_lookup(Arc::new(Down))
      .with_registry(StaticRegistry::new(vec![facility("seeded", 0.01, &[])]));
    let found = engine
      .find_candidates(&CandidateQuery {
        lat: 0.0,
        lon: 0.0,
        radius_km: Some(5.0),
        required_capability: None,
      })
      .await
      .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "seeded");
  }

  #[tokio::test]
  async fn handle_prefers_capable_facility() {
    let engine = engine().with_registry(StaticRegistry::new(vec![
      facility("clinic", 0.001, &[]),
      facility("heart-centre", 0.05, &["cardiac"]),
    ]));
    let outcome = engine.handle(&request()).await.unwrap();
    assert_eq!(outcome.accepted_facility().unwrap().id, "heart-centre");

    let attempts = engine.session_attempts(&outcome.session_id()).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, AttemptOutcome::Accepted);
  }

  #[tokio::test]
  async fn lookup_results_are_normalized_before_ranking() {
    let mut broken = facility("broken", 0.0, &["cardiac"]);
    broken.location.lat = 123.0;
    let engine = engine().with_lookup(Arc::new(Fixed(vec![
      facility("clinic", 0.001, &[]),
      facility("heart", 0.045, &[" Cardiac "]),
      broken,
    ])));

    let outcome = engine.handle(&request()).await.unwrap();
    assert_eq!(outcome.accepted_facility().unwrap().id, "heart");
    assert!(outcome.accepted_facility().unwrap().has_capability("cardiac"));

    let found = engine
      .find_candidates(&CandidateQuery {
        lat: 0.0,
        lon: 0.0,
        radius_km: None,
        required_capability: None,
      })
      .await
      .unwrap();
    let ids: Vec<&str> = found.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["clinic", "heart"]);
  }

  #[tokio::test]
  async fn invalid_incident_is_rejected_before_any_session() {
    let engine = engine();
    let mut req = request();
    req.incident.lat = Some(123.0);
    let err = engine.handle(&req).await.unwrap_err();
    assert!(err.is_validation());
    assert!(engine.sessions.is_empty());
  }

  #[tokio::test]
  async fn bad_overrides_are_input_errors() {
    let engine = engine();
    let mut req = request();
    req.config = Some(crate::config::DispatchOverrides {
      channel_order: Some(Vec::new()),
      ..Default::default()
    });
    let err = engine.handle(&req).await.unwrap_err();
    assert!(err.to_string().contains("channel_order"));
  }

  #[tokio::test]
  async fn no_candidates_exhausts_immediately() {
    let outcome = engine().handle(&request()).await.unwrap();
    match outcome {
      EscalationOutcome::Exhausted { attempts, .. } => assert!(attempts.is_empty()),
      other => panic!("expected exhaustion, got {:?}", other),
    }
  }

  #[test]
  fn unknown_session_has_no_attempts() {
    assert!(engine().session_attempts(&Uuid::new_v4()).is_none());
  }
}
