//! Integration tests for the escalation engine.
//!
//! Channels are scripted per facility and run under paused tokio time, so
//! timeouts and acceptance windows elapse virtually.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use escalation_engine::ranking;
use escalation_engine::types::*;
use escalation_engine::{
  normalize, ChannelAdapter, ChannelOutcome, ChannelSet, Config, DispatchConfig, Engine,
};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Step {
  delay: Duration,
  outcome: ChannelOutcome,
}

/// Replies per facility id after a fixed delay; unknown facilities decline.
struct Scripted {
  kind: ChannelKind,
  steps: HashMap<String, Step>,
  calls: AtomicUsize,
  started: Mutex<Vec<(String, Instant)>>,
}

impl Scripted {
  fn new(kind: ChannelKind) -> Self {
    Self {
      kind,
      steps: HashMap::new(),
      calls: AtomicUsize::new(0),
      started: Mutex::new(Vec::new()),
    }
  }

  fn on(mut self, facility_id: &str, delay_ms: u64, outcome: ChannelOutcome) -> Self {
    self.steps.insert(
      facility_id.to_string(),
      Step {
        delay: Duration::from_millis(delay_ms),
        outcome,
      },
    );
    self
  }

  fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Facility ids with the instant each attempt began.
  fn started(&self) -> Vec<(String, Instant)> {
    self.started.lock().unwrap().clone()
  }
}

#[async_trait]
impl ChannelAdapter for Scripted {
  fn kind(&self) -> ChannelKind {
    self.kind
  }

  async fn attempt_notify(&self, facility: &Facility, _: &Incident, _: Duration) -> ChannelOutcome {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.started.lock().unwrap().push((facility.id.clone(), Instant::now()));
    match self.steps.get(&facility.id) {
      Some(step) => {
        if !step.delay.is_zero() {
          tokio::time::sleep(step.delay).await;
        }
        step.outcome.clone()
      }
      None => ChannelOutcome::declined("scripted default"),
    }
  }
}

fn facility(id: &str, lat: f64, tags: &[&str], channels: ContactChannels) -> Facility {
  Facility {
    id: id.into(),
    name: format!("Facility {}", id),
    location: Coordinate { lat, lon: 0.0 },
    tags: tags.iter().map(|t| t.to_string()).collect(),
    channels,
  }
}

fn webhook_only(id: &str) -> ContactChannels {
  ContactChannels {
    webhook: Some(format!("http://{}/hook", id)),
    phone: None,
    email: None,
  }
}

fn all_contacts(id: &str) -> ContactChannels {
  ContactChannels {
    webhook: Some(format!("http://{}/hook", id)),
    phone: Some("+15550100".into()),
    email: Some(format!("er@{}.example", id)),
  }
}

/// F1 at ~0.5 km, F2 at ~2 km, F3 at ~10 km from the origin.
fn three_facilities(contacts: fn(&str) -> ContactChannels) -> Vec<Facility> {
  vec![
    facility("F3", 0.09, &[], contacts("F3")),
    facility("F1", 0.0045, &[], contacts("F1")),
    facility("F2", 0.018, &[], contacts("F2")),
  ]
}

fn incident() -> Incident {
  normalize::incident(&InboundIncident {
    device_id: "wrist-1".into(),
    lat: Some(0.0),
    lon: Some(0.0),
    heart_rate: Some(80.0),
    spo2: Some(97.0),
    timestamp: Some("2025-01-15T10:30:00Z".into()),
    ..Default::default()
  })
  .unwrap()
}

fn dispatch(batch_size: usize) -> DispatchConfig {
  DispatchConfig {
    batch_size,
    per_channel_timeout: Duration::from_secs(5),
    acceptance_window: Duration::from_secs(30),
    channel_order: ChannelKind::DEFAULT_ORDER.to_vec(),
  }
}

fn engine(adapters: Vec<Arc<Scripted>>) -> Engine {
  let mut channels = ChannelSet::new();
  for a in adapters {
    channels.insert(a);
  }
  Engine::new(Config::default(), channels)
}

async fn run(engine: &Engine, facilities: &[Facility], config: DispatchConfig) -> EscalationOutcome {
  let incident = incident();
  let ranked = ranking::rank(facilities, &incident.location, None);
  engine
    .start_escalation(incident, ranked, Some(config))
    .await
    .unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn closest_facility_accepts_in_first_batch() {
  let webhook = Arc::new(
    Scripted::new(ChannelKind::Webhook).on("F1", 100, ChannelOutcome::Accepted),
  );
  let engine = engine(vec![webhook.clone()]);
  let mut facilities = three_facilities(webhook_only);
  facilities.push(facility("F4", 0.2, &[], webhook_only("F4")));

  let outcome = run(&engine, &facilities, dispatch(3)).await;

  assert_eq!(outcome.accepted_facility().unwrap().id, "F1");
  let attempts = engine.session_attempts(&outcome.session_id()).unwrap();
  assert!((1..=3).contains(&attempts.len()), "{:?}", attempts);
  assert!(attempts.iter().all(|a| a.batch == 0));
  assert!(attempts.iter().all(|a| a.facility_id != "F4"));
  assert_eq!(
    attempts
      .iter()
      .filter(|a| a.outcome == AttemptOutcome::Accepted)
      .count(),
    1
  );
}

#[tokio::test(start_paused = true)]
async fn all_channels_fail_exhausts_with_full_audit() {
  let adapters = vec![
    Arc::new(Scripted::new(ChannelKind::Webhook)),
    Arc::new(
      Scripted::new(ChannelKind::Sms)
        .on("F1", 10, ChannelOutcome::error("carrier rejected"))
        .on("F2", 10, ChannelOutcome::error("carrier rejected"))
        .on("F3", 10, ChannelOutcome::error("carrier rejected")),
    ),
    Arc::new(Scripted::new(ChannelKind::Whatsapp)),
    Arc::new(
      Scripted::new(ChannelKind::Voice)
        .on("F1", 60_000, ChannelOutcome::Accepted)
        .on("F2", 60_000, ChannelOutcome::Accepted)
        .on("F3", 60_000, ChannelOutcome::Accepted),
    ),
    Arc::new(Scripted::new(ChannelKind::Email)),
  ];
  let engine = engine(adapters);

  let outcome = run(&engine, &three_facilities(all_contacts), dispatch(3)).await;

  let attempts = match outcome {
    EscalationOutcome::Exhausted { attempts, .. } => attempts,
    other => panic!("expected exhaustion, got {:?}", other),
  };
  assert_eq!(attempts.len(), 15);
  let covered: HashSet<(String, ChannelKind)> = attempts
    .iter()
    .map(|a| (a.facility_id.clone(), a.channel.unwrap()))
    .collect();
  for id in ["F1", "F2", "F3"] {
    for kind in ChannelKind::DEFAULT_ORDER {
      assert!(covered.contains(&(id.to_string(), kind)), "missing {} {}", id, kind);
    }
  }
  assert!(attempts.iter().all(|a| a.outcome != AttemptOutcome::Accepted));
  assert!(attempts
    .iter()
    .filter(|a| a.channel == Some(ChannelKind::Voice))
    .all(|a| a.outcome == AttemptOutcome::NoResponse && a.detail.contains("timed out")));
  assert!(attempts.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test(start_paused = true)]
async fn cardiac_incident_relaxes_to_unfiltered_list() {
  let webhook = Arc::new(Scripted::new(ChannelKind::Webhook));
  let engine = engine(vec![webhook.clone()]);
  let req = EscalationRequest {
    incident: InboundIncident {
      device_id: "wrist-9".into(),
      lat: Some(0.0),
      lon: Some(0.0),
      heart_rate: Some(40.0),
      spo2: Some(95.0),
      irregular_rhythm: true,
      ..Default::default()
    },
    facilities: Some(three_facilities(webhook_only)),
    radius_km: None,
    config: None,
  };

  let outcome = engine.handle(&req).await.unwrap();

  assert!(outcome.is_exhausted());
  assert_eq!(webhook.calls(), 3, "every non-cardiac facility is still contacted");
  let session = engine.session(&outcome.session_id()).unwrap();
  assert_eq!(session.incident().required_capability.as_deref(), Some("cardiac"));
  let order: Vec<&str> = session
    .candidates()
    .iter()
    .map(|c| c.facility.id.as_str())
    .collect();
  assert_eq!(order, vec!["F1", "F2", "F3"]);
}

#[tokio::test(start_paused = true)]
async fn faster_acceptance_wins_within_a_batch() {
  let webhook = Arc::new(
    Scripted::new(ChannelKind::Webhook)
      .on("F1", 500, ChannelOutcome::Accepted)
      .on("F2", 100, ChannelOutcome::Accepted),
  );
  let engine = engine(vec![webhook]);

  let outcome = run(&engine, &three_facilities(webhook_only), dispatch(3)).await;
  assert_eq!(outcome.accepted_facility().unwrap().id, "F2");

  // Let the slower acceptance land; it is logged but changes nothing.
  tokio::time::sleep(Duration::from_secs(1)).await;
  let attempts = engine.session_attempts(&outcome.session_id()).unwrap();
  let accepted: Vec<&str> = attempts
    .iter()
    .filter(|a| a.outcome == AttemptOutcome::Accepted)
    .map(|a| a.facility_id.as_str())
    .collect();
  assert_eq!(accepted, vec!["F2", "F1"]);
  let session = engine.session(&outcome.session_id()).unwrap();
  assert_eq!(
    session.outcome().unwrap().accepted_facility().unwrap().id,
    "F2"
  );
}

#[tokio::test(start_paused = true)]
async fn simultaneous_acceptance_goes_to_better_rank() {
  let webhook = Arc::new(
    Scripted::new(ChannelKind::Webhook)
      .on("F2", 0, ChannelOutcome::Accepted)
      .on("F1", 0, ChannelOutcome::Accepted),
  );
  let engine = engine(vec![webhook]);

  let outcome = run(&engine, &three_facilities(webhook_only), dispatch(3)).await;
  assert_eq!(outcome.accepted_facility().unwrap().id, "F1");
}

#[tokio::test(start_paused = true)]
async fn empty_candidates_exhaust_without_attempts() {
  let webhook = Arc::new(Scripted::new(ChannelKind::Webhook));
  let engine = engine(vec![webhook.clone()]);

  let outcome = run(&engine, &[], dispatch(3)).await;

  match outcome {
    EscalationOutcome::Exhausted { attempts, .. } => assert!(attempts.is_empty()),
    other => panic!("expected exhaustion, got {:?}", other),
  }
  assert_eq!(webhook.calls(), 0);
}

// ---------------------------------------------------------------------------
// Timing and fall-through
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn timed_out_channel_falls_through_to_next() {
  let adapters = vec![
    Arc::new(Scripted::new(ChannelKind::Webhook).on("F1", 60_000, ChannelOutcome::Accepted)),
    Arc::new(Scripted::new(ChannelKind::Sms).on("F1", 10, ChannelOutcome::Accepted)),
  ];
  let engine = engine(adapters);
  let facilities = vec![facility("F1", 0.0045, &[], all_contacts("F1"))];

  let outcome = run(&engine, &facilities, dispatch(3)).await;

  assert_eq!(outcome.accepted_facility().unwrap().id, "F1");
  let attempts = engine.session_attempts(&outcome.session_id()).unwrap();
  let trail: Vec<(Option<ChannelKind>, AttemptOutcome)> =
    attempts.iter().map(|a| (a.channel, a.outcome)).collect();
  assert_eq!(
    trail,
    vec![
      (Some(ChannelKind::Webhook), AttemptOutcome::NoResponse),
      (Some(ChannelKind::Sms), AttemptOutcome::Accepted),
    ]
  );
}

#[tokio::test(start_paused = true)]
async fn acceptance_window_moves_on_to_next_batch() {
  let webhook = Arc::new(
    Scripted::new(ChannelKind::Webhook)
      .on("F1", 120_000, ChannelOutcome::declined("busy"))
      .on("F2", 10, ChannelOutcome::Accepted),
  );
  let engine = engine(vec![webhook]);
  let config = DispatchConfig {
    batch_size: 1,
    per_channel_timeout: Duration::from_secs(300),
    acceptance_window: Duration::from_secs(10),
    ..dispatch(1)
  };

  let started = tokio::time::Instant::now();
  let outcome = run(&engine, &three_facilities(webhook_only), config).await;

  assert_eq!(outcome.accepted_facility().unwrap().id, "F2");
  assert!(started.elapsed() < Duration::from_secs(11));
  let attempts = engine.session_attempts(&outcome.session_id()).unwrap();
  assert_eq!(attempts.len(), 1);
  assert_eq!(attempts[0].batch, 1);
}

#[tokio::test(start_paused = true)]
async fn straggler_acceptance_settles_the_session() {
  let webhook = Arc::new(
    Scripted::new(ChannelKind::Webhook)
      .on("F1", 3_000, ChannelOutcome::Accepted)
      .on("F2", 5_000, ChannelOutcome::declined("no beds")),
  );
  let engine = engine(vec![webhook]);
  let config = DispatchConfig {
    batch_size: 1,
    per_channel_timeout: Duration::from_secs(10),
    acceptance_window: Duration::from_secs(2),
    ..dispatch(1)
  };

  let outcome = run(&engine, &three_facilities(webhook_only), config).await;

  // F1 answers at 3s, while batch 2 (F2) is still inside its window.
  assert_eq!(outcome.accepted_facility().unwrap().id, "F1");
  tokio::time::sleep(Duration::from_secs(10)).await;
  let attempts = engine.session_attempts(&outcome.session_id()).unwrap();
  assert!(attempts.iter().all(|a| a.facility_id != "F3"), "batch 3 must never start");
}

#[tokio::test(start_paused = true)]
async fn abandoned_batch_starts_no_further_channels() {
  let webhook = Arc::new(
    Scripted::new(ChannelKind::Webhook)
      .on("F1", 3_000, ChannelOutcome::declined("busy"))
      .on("F2", 3_000, ChannelOutcome::declined("busy")),
  );
  let sms = Arc::new(
    Scripted::new(ChannelKind::Sms)
      .on("F1", 3_000, ChannelOutcome::declined("busy"))
      .on("F2", 3_000, ChannelOutcome::declined("busy")),
  );
  let engine = engine(vec![webhook.clone(), sms.clone()]);
  let facilities = vec![
    facility("F1", 0.0045, &[], all_contacts("F1")),
    facility("F2", 0.018, &[], all_contacts("F2")),
  ];
  let config = DispatchConfig {
    batch_size: 1,
    per_channel_timeout: Duration::from_secs(10),
    acceptance_window: Duration::from_secs(2),
    channel_order: vec![ChannelKind::Webhook, ChannelKind::Sms],
  };

  let t0 = Instant::now();
  let outcome = run(&engine, &facilities, config).await;
  tokio::time::sleep(Duration::from_secs(30)).await;

  assert!(outcome.is_exhausted());
  // F1's webhook finishes at 3s, after batch 1 opened at 2s: no SMS follows.
  assert_eq!(sms.calls(), 0);
  let starts = webhook.started();
  let ids: Vec<&str> = starts.iter().map(|(id, _)| id.as_str()).collect();
  assert_eq!(ids, vec!["F1", "F2"]);
  assert!(starts[0].1 - t0 < Duration::from_millis(10));
  let batch_one_opened = starts[1].1;
  assert!(batch_one_opened - t0 >= Duration::from_secs(2));
  assert!(webhook
    .started()
    .iter()
    .chain(sms.started().iter())
    .filter(|(id, _)| id == "F1")
    .all(|(_, at)| *at < batch_one_opened));

  // In-flight attempts still land in the log.
  let attempts = engine.session_attempts(&outcome.session_id()).unwrap();
  assert_eq!(attempts.len(), 2);
  assert!(attempts.iter().all(|a| a.channel == Some(ChannelKind::Webhook)));
}

#[tokio::test(start_paused = true)]
async fn settled_session_starts_no_further_channels() {
  let webhook = Arc::new(
    Scripted::new(ChannelKind::Webhook)
      .on("F1", 10, ChannelOutcome::Accepted)
      .on("F2", 50, ChannelOutcome::declined("no beds")),
  );
  let sms = Arc::new(Scripted::new(ChannelKind::Sms));
  let engine = engine(vec![webhook, sms.clone()]);
  let facilities = vec![
    facility("F1", 0.0045, &[], webhook_only("F1")),
    facility("F2", 0.018, &[], all_contacts("F2")),
  ];

  let outcome = run(&engine, &facilities, dispatch(3)).await;
  tokio::time::sleep(Duration::from_secs(1)).await;

  assert_eq!(outcome.accepted_facility().unwrap().id, "F1");
  assert_eq!(sms.calls(), 0);
  let attempts = engine.session_attempts(&outcome.session_id()).unwrap();
  assert_eq!(attempts.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn facility_without_contacts_records_no_comm_path() {
  let webhook = Arc::new(Scripted::new(ChannelKind::Webhook));
  let engine = engine(vec![webhook]);
  let facilities = vec![facility("F1", 0.0045, &[], ContactChannels::default())];

  let outcome = run(&engine, &facilities, dispatch(3)).await;

  match outcome {
    EscalationOutcome::Exhausted { attempts, .. } => {
      assert_eq!(attempts.len(), 1);
      assert_eq!(attempts[0].outcome, AttemptOutcome::Error);
      assert_eq!(attempts[0].detail, "no-comm-path");
      assert_eq!(attempts[0].channel, None);
    }
    other => panic!("expected exhaustion, got {:?}", other),
  }
}

#[tokio::test(start_paused = true)]
async fn later_batches_run_in_rank_order() {
  let webhook = Arc::new(Scripted::new(ChannelKind::Webhook));
  let engine = engine(vec![webhook]);
  let facilities: Vec<Facility> = (0..7)
    .map(|i| {
      let id = format!("G{}", i);
      facility(&id, 0.01 * (7 - i) as f64, &[], webhook_only(&id))
    })
    .collect();

  let outcome = run(&engine, &facilities, dispatch(3)).await;

  let attempts = match outcome {
    EscalationOutcome::Exhausted { attempts, .. } => attempts,
    other => panic!("expected exhaustion, got {:?}", other),
  };
  let batches: Vec<usize> = attempts.iter().map(|a| a.batch).collect();
  assert_eq!(batches.iter().max(), Some(&2));
  assert!(batches.windows(2).all(|w| w[0] <= w[1]));
  let last_batch: HashSet<&str> = attempts
    .iter()
    .filter(|a| a.batch == 2)
    .map(|a| a.facility_id.as_str())
    .collect();
  assert_eq!(last_batch, HashSet::from(["G0"]));
}

#[tokio::test]
async fn outcome_serializes_to_boundary_shape() {
  let webhook = Arc::new(Scripted::new(ChannelKind::Webhook).on("F1", 0, ChannelOutcome::Accepted));
  let engine = engine(vec![webhook]);
  let outcome = run(&engine, &three_facilities(webhook_only), dispatch(3)).await;

  let json = serde_json::to_value(&outcome).unwrap();
  assert_eq!(json["status"], "accepted");
  assert_eq!(json["facility"]["id"], "F1");
  assert!(json["session_id"].is_string());
}
