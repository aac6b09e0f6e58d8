//! Channel adapter contract and the registry the dispatcher draws from.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::types::{AttemptOutcome, ChannelKind, Facility, Incident};

/// Result of one notification attempt. Closed so dispatcher branching is exhaustive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ChannelOutcome {
  Accepted,
  Declined(String),
  NoResponse,
  Error(String),
}

impl ChannelOutcome {
  pub fn declined(reason: impl Into<String>) -> Self {
    Self::Declined(reason.into())
  }

  pub fn error(detail: impl Into<String>) -> Self {
    Self::Error(detail.into())
  }

  pub fn is_accepted(&self) -> bool {
    matches!(self, Self::Accepted)
  }

  /// Split into the audit outcome and its detail string.
  pub fn into_record_parts(self) -> (AttemptOutcome, String) {
    match self {
      Self::Accepted => (AttemptOutcome::Accepted, "accepted".to_string()),
      Self::Declined(reason) => (AttemptOutcome::Declined, reason),
      Self::NoResponse => (AttemptOutcome::NoResponse, "no response".to_string()),
      Self::Error(detail) => (AttemptOutcome::Error, detail),
    }
  }
}

/// One notification transport.
///
/// Implementations must not panic and should honour `timeout` themselves where
/// the transport allows it; the dispatcher enforces it again from outside.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
  fn kind(&self) -> ChannelKind;

  async fn attempt_notify(
    &self,
    facility: &Facility,
    incident: &Incident,
    timeout: Duration,
  ) -> ChannelOutcome;
}

/// Adapters keyed by the channel they serve.
#[derive(Clone, Default)]
pub struct ChannelSet {
  adapters: HashMap<ChannelKind, Arc<dyn ChannelAdapter>>,
}

impl ChannelSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register an adapter under its own kind, replacing any previous one.
  pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
    self.insert(adapter);
    self
  }

  pub fn insert(&mut self, adapter: Arc<dyn ChannelAdapter>) {
    self.adapters.insert(adapter.kind(), adapter);
  }

  pub fn get(&self, kind: ChannelKind) -> Option<&Arc<dyn ChannelAdapter>> {
    self.adapters.get(&kind)
  }

  pub fn kinds(&self) -> Vec<ChannelKind> {
    let mut kinds: Vec<ChannelKind> = self.adapters.keys().copied().collect();
    kinds.sort();
    kinds
  }

  /// Channels usable for `facility`, in `order`: a contact address exists and
  /// an adapter is registered.
  pub fn usable_for(&self, facility: &Facility, order: &[ChannelKind]) -> Vec<ChannelKind> {
    order
      .iter()
      .copied()
      .filter(|k| facility.channels.address_for(*k).is_some() && self.adapters.contains_key(k))
      .collect()
  }
}

impl std::fmt::Debug for ChannelSet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ChannelSet").field("kinds", &self.kinds()).finish()
  }
}
