//! Escalation dispatcher: batch-by-batch, concurrent per-facility channel
//! fall-through until one facility accepts or every candidate is exhausted.
//!
//! ```text
//! ranked candidates
//!   └─ chunks(batch_size)                       one batch at a time
//!        ├─ spawn facility task × batch          concurrent
//!        │    └─ channel_order fall-through      sequential per facility
//!        │         └─ timeout(per_channel_timeout)
//!        └─ wait: accepted | all done | acceptance_window
//! ```
//!
//! Stragglers left running when a batch ends are detached, not aborted: their
//! in-flight attempt still lands in the attempt log, but they start no further
//! channel once their batch is abandoned or the session is settled. At most one
//! batch ever starts new attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::channel::ChannelSet;
use crate::config::DispatchConfig;
use crate::session::EscalationSession;
use crate::types::{AttemptOutcome, EscalationOutcome, Facility, RankedCandidate};

/// Detail recorded for a facility with no usable channel.
pub const NO_COMM_PATH: &str = "no-comm-path";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchEnd {
  Settled,
  Drained,
  WindowElapsed,
}

/// Consecutive batches of `batch_size`, closest first. The last may be short.
pub fn batches(candidates: &[RankedCandidate], batch_size: usize) -> Vec<&[RankedCandidate]> {
  candidates.chunks(batch_size.max(1)).collect()
}

/// Drive one session to a terminal outcome.
pub async fn escalate(
  session: Arc<EscalationSession>,
  channels: Arc<ChannelSet>,
  config: &DispatchConfig,
) -> EscalationOutcome {
  let config = Arc::new(config.clone());
  let session_id = session.id();
  let plan = batches(session.candidates(), config.batch_size);

  info!(
    %session_id,
    incident_id = %session.incident().incident_id,
    candidates = session.candidates().len(),
    batches = plan.len(),
    "escalation started"
  );

  let mut status_rx = session.subscribe();

  for (batch_idx, batch) in plan.into_iter().enumerate() {
    if session.is_settled() {
      break;
    }
    debug!(%session_id, batch = batch_idx, size = batch.len(), "batch started");

    let abandoned = Arc::new(AtomicBool::new(false));
    let mut tasks: JoinSet<()> = JoinSet::new();
    for candidate in batch {
      tasks.spawn(notify_facility(
        session.clone(),
        channels.clone(),
        config.clone(),
        candidate.facility.clone(),
        batch_idx,
        abandoned.clone(),
      ));
    }

    let window = tokio::time::sleep(config.acceptance_window);
    tokio::pin!(window);

    let end = loop {
      if session.is_settled() {
        break BatchEnd::Settled;
      }
      tokio::select! {
        _ = status_rx.changed() => {}
        joined = tasks.join_next() => match joined {
          Some(Ok(())) => {}
          Some(Err(e)) => warn!(%session_id, batch = batch_idx, error = %e, "facility task failed"),
          None => break BatchEnd::Drained,
        },
        _ = &mut window => break BatchEnd::WindowElapsed,
      }
    };

    let stragglers = tasks.len();
    abandoned.store(true, Ordering::SeqCst);
    tasks.detach_all();

    match end {
      BatchEnd::WindowElapsed => warn!(
        %session_id,
        batch = batch_idx,
        stragglers,
        window_ms = config.acceptance_window.as_millis() as u64,
        "acceptance window elapsed"
      ),
      _ => debug!(%session_id, batch = batch_idx, ?end, stragglers, "batch finished"),
    }
  }

  session.exhaust();
  let outcome = session.outcome().unwrap_or_else(|| EscalationOutcome::Exhausted {
    session_id,
    attempts: session.attempts(),
  });

  match &outcome {
    EscalationOutcome::Accepted { facility, .. } => info!(
      %session_id,
      facility_id = %facility.id,
      attempts = session.attempt_count(),
      "escalation accepted"
    ),
    EscalationOutcome::Exhausted { attempts, .. } => warn!(
      %session_id,
      attempts = attempts.len(),
      "escalation exhausted without acceptance"
    ),
  }
  outcome
}

/// Try one facility's channels in priority order until one accepts, the
/// channels run out, the batch is abandoned, or the session settles elsewhere.
async fn notify_facility(
  session: Arc<EscalationSession>,
  channels: Arc<ChannelSet>,
  config: Arc<DispatchConfig>,
  facility: Facility,
  batch: usize,
  abandoned: Arc<AtomicBool>,
) {
  let session_id = session.id();
  let usable = channels.usable_for(&facility, &config.channel_order);
  if usable.is_empty() {
    warn!(%session_id, facility_id = %facility.id, "facility has no usable channel");
    session.record(&facility.id, None, AttemptOutcome::Error, NO_COMM_PATH, batch);
    return;
  }

  for kind in usable {
    if session.is_settled() {
      debug!(%session_id, facility_id = %facility.id, "session settled, remaining channels skipped");
      return;
    }
    if abandoned.load(Ordering::SeqCst) {
      debug!(%session_id, facility_id = %facility.id, batch, "batch abandoned, remaining channels skipped");
      return;
    }
    let Some(adapter) = channels.get(kind) else {
      continue;
    };

    let attempt = adapter.attempt_notify(&facility, session.incident(), config.per_channel_timeout);
    let (outcome, detail) = match tokio::time::timeout(config.per_channel_timeout, attempt).await {
      Ok(result) => result.into_record_parts(),
      Err(_) => (
        AttemptOutcome::NoResponse,
        format!("timed out after {}ms", config.per_channel_timeout.as_millis()),
      ),
    };

    debug!(
      %session_id,
      facility_id = %facility.id,
      channel = %kind,
      ?outcome,
      %detail,
      "channel attempt finished"
    );
    if outcome == AttemptOutcome::Accepted {
      if !session.record_acceptance(&facility, kind, detail, batch) {
        info!(
          %session_id,
          facility_id = %facility.id,
          "acceptance arrived after settlement, recorded only"
        );
      }
      return;
    }
    session.record(&facility.id, Some(kind), outcome, detail, batch);
  }
}
