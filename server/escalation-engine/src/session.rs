//! Escalation sessions: one incident's lifecycle and its append-only attempt log.
//!
//! Writes go through a short `std::sync::Mutex` section that never spans an
//! await. Status transitions are published on a `watch` channel so the
//! dispatcher can wait for an acceptance without polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::types::*;

/// Terminal state of a session. Leaves `Pending` exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
  Pending,
  Accepted { facility: Facility },
  Exhausted,
}

impl SessionStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, Self::Pending)
  }
}

#[derive(Debug)]
struct SessionState {
  attempts: Vec<AttemptRecord>,
  status: SessionStatus,
  settled_at: Option<DateTime<Utc>>,
}

/// State container for one escalation.
#[derive(Debug)]
pub struct EscalationSession {
  id: Uuid,
  incident: Incident,
  candidates: Vec<RankedCandidate>,
  state: Mutex<SessionState>,
  status_tx: watch::Sender<SessionStatus>,
}

impl EscalationSession {
  pub fn new(incident: Incident, candidates: Vec<RankedCandidate>) -> Self {
    let (status_tx, _) = watch::channel(SessionStatus::Pending);
    Self {
      id: Uuid::new_v4(),
      incident,
      candidates,
      state: Mutex::new(SessionState {
        attempts: Vec::new(),
        status: SessionStatus::Pending,
        settled_at: None,
      }),
      status_tx,
    }
  }

  pub fn id(&self) -> Uuid {
    self.id
  }

  pub fn incident(&self) -> &Incident {
    &self.incident
  }

  pub fn candidates(&self) -> &[RankedCandidate] {
    &self.candidates
  }

  // Poison only follows a panic mid-push; the log itself stays consistent.
  fn lock(&self) -> MutexGuard<'_, SessionState> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Append one attempt. The timestamp is clamped so the log never goes
  /// backwards even if the wall clock does.
  pub fn record(
    &self,
    facility_id: &str,
    channel: Option<ChannelKind>,
    outcome: AttemptOutcome,
    detail: impl Into<String>,
    batch: usize,
  ) -> AttemptRecord {
    let mut state = self.lock();
    append(&mut state, facility_id, channel, outcome, detail.into(), batch)
  }

  /// Append an `accepted` attempt and settle on `facility` in one critical
  /// section, so log order matches the order acceptances were decided in.
  /// Returns true only for the winning call; a loser is still logged.
  pub fn record_acceptance(
    &self,
    facility: &Facility,
    channel: ChannelKind,
    detail: impl Into<String>,
    batch: usize,
  ) -> bool {
    let terminal = SessionStatus::Accepted {
      facility: facility.clone(),
    };
    let mut state = self.lock();
    append(
      &mut state,
      &facility.id,
      Some(channel),
      AttemptOutcome::Accepted,
      detail.into(),
      batch,
    );
    let won = transition(&mut state, &terminal);
    drop(state);
    if won {
      self.status_tx.send_replace(terminal);
    }
    won
  }

  /// Settle as accepted by `facility` unless already settled.
  /// Returns true only for the winning call.
  pub fn try_accept(&self, facility: &Facility) -> bool {
    self.settle(SessionStatus::Accepted {
      facility: facility.clone(),
    })
  }

  /// Settle as exhausted unless already settled.
  pub fn exhaust(&self) -> bool {
    self.settle(SessionStatus::Exhausted)
  }

  fn settle(&self, terminal: SessionStatus) -> bool {
    let won = transition(&mut self.lock(), &terminal);
    if won {
      self.status_tx.send_replace(terminal);
    }
    won
  }

  pub fn status(&self) -> SessionStatus {
    self.lock().status.clone()
  }

  pub fn is_settled(&self) -> bool {
    self.lock().status.is_terminal()
  }

  pub fn settled_at(&self) -> Option<DateTime<Utc>> {
    self.lock().settled_at
  }

  /// Snapshot of the attempt log.
  pub fn attempts(&self) -> Vec<AttemptRecord> {
    self.lock().attempts.clone()
  }

  pub fn attempt_count(&self) -> usize {
    self.lock().attempts.len()
  }

  pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
    self.status_tx.subscribe()
  }

  /// Boundary view of the current terminal state, if any.
  pub fn outcome(&self) -> Option<EscalationOutcome> {
    let state = self.lock();
    match &state.status {
      SessionStatus::Pending => None,
      SessionStatus::Accepted { facility } => Some(EscalationOutcome::Accepted {
        session_id: self.id,
        facility: facility.clone(),
      }),
      SessionStatus::Exhausted => Some(EscalationOutcome::Exhausted {
        session_id: self.id,
        attempts: state.attempts.clone(),
      }),
    }
  }
}

fn append(
  state: &mut SessionState,
  facility_id: &str,
  channel: Option<ChannelKind>,
  outcome: AttemptOutcome,
  detail: String,
  batch: usize,
) -> AttemptRecord {
  let now = Utc::now();
  let timestamp = match state.attempts.last() {
    Some(last) if last.timestamp > now => last.timestamp,
    _ => now,
  };
  let record = AttemptRecord {
    facility_id: facility_id.to_string(),
    channel,
    outcome,
    detail,
    batch,
    timestamp,
  };
  state.attempts.push(record.clone());
  record
}

/// Leave `Pending` for `terminal`. False when already settled.
fn transition(state: &mut SessionState, terminal: &SessionStatus) -> bool {
  if state.status.is_terminal() {
    return false;
  }
  state.status = terminal.clone();
  state.settled_at = Some(Utc::now());
  true
}

/// Live and recently settled sessions, queryable by id.
#[derive(Debug)]
pub struct SessionStore {
  sessions: Mutex<HashMap<Uuid, Arc<EscalationSession>>>,
  retention: Duration,
}

impl SessionStore {
  pub fn new(retention: Duration) -> Self {
    Self {
      sessions: Mutex::new(HashMap::new()),
      retention,
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<EscalationSession>>> {
    self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Register a session, pruning expired ones first.
  pub fn insert(&self, session: Arc<EscalationSession>) {
    self.prune(Utc::now());
    self.lock().insert(session.id(), session);
  }

  pub fn get(&self, id: &Uuid) -> Option<Arc<EscalationSession>> {
    self.lock().get(id).cloned()
  }

  /// Drop settled sessions older than the retention period. Returns how many went.
  pub fn prune(&self, now: DateTime<Utc>) -> usize {
    let retention = chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::weeks(5200));
    let mut sessions = self.lock();
    let before = sessions.len();
    sessions.retain(|_, s| match s.settled_at() {
      Some(at) => now.signed_duration_since(at) < retention,
      None => true,
    });
    before - sessions.len()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
