//! Core types for the escalation engine (JSON contracts + internal models).

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DispatchOverrides;
use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Inbound types (what callers send)
// ---------------------------------------------------------------------------

/// One detected emergency as reported by a device. Unknown fields are ignored.
///
/// Numeric fields are optional at the wire level so that a missing value is
/// reported as a validation error naming the field, not as a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundIncident {
  #[serde(default)]
  pub device_id: String,
  #[serde(default)]
  pub lat: Option<f64>,
  #[serde(default)]
  pub lon: Option<f64>,
  #[serde(default)]
  pub heart_rate: Option<f64>,
  #[serde(default)]
  pub spo2: Option<f64>,
  #[serde(default)]
  pub irregular_rhythm: bool,
  #[serde(default)]
  pub waveform: Option<Vec<f32>>,
  /// RFC3339; defaults to intake time.
  #[serde(default)]
  pub timestamp: Option<String>,
  /// Overrides the capability derived from vitals.
  #[serde(default)]
  pub required_capability: Option<String>,
}

/// One escalation request: an incident plus either explicit facilities or a
/// lookup radius.
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationRequest {
  pub incident: InboundIncident,
  #[serde(default)]
  pub facilities: Option<Vec<Facility>>,
  #[serde(default)]
  pub radius_km: Option<f64>,
  #[serde(default)]
  pub config: Option<DispatchOverrides>,
}

/// Candidate search around a coordinate.
#[derive(Debug, Clone, Deserialize)]
pub struct CandidateQuery {
  pub lat: f64,
  pub lon: f64,
  #[serde(default)]
  pub radius_km: Option<f64>,
  #[serde(default)]
  pub required_capability: Option<String>,
}

// ---------------------------------------------------------------------------
// Geography
// ---------------------------------------------------------------------------

/// Decimal-degree coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
  pub lat: f64,
  pub lon: f64,
}

impl Coordinate {
  /// Build a coordinate, rejecting non-finite or out-of-range values.
  pub fn new(lat: f64, lon: f64) -> Result<Self, EngineError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
      return Err(EngineError::validation("lat", "must be within -90..90"));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
      return Err(EngineError::validation("lon", "must be within -180..180"));
    }
    Ok(Self { lat, lon })
  }

  pub fn is_valid(&self) -> bool {
    Self::new(self.lat, self.lon).is_ok()
  }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
  Webhook,
  Sms,
  Whatsapp,
  Voice,
  Email,
}

impl ChannelKind {
  pub const DEFAULT_ORDER: [ChannelKind; 5] = [
    ChannelKind::Webhook,
    ChannelKind::Sms,
    ChannelKind::Whatsapp,
    ChannelKind::Voice,
    ChannelKind::Email,
  ];

  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "webhook" | "http" => Some(Self::Webhook),
      "sms" | "text" => Some(Self::Sms),
      "whatsapp" | "wa" => Some(Self::Whatsapp),
      "voice" | "call" | "phone" => Some(Self::Voice),
      "email" | "mail" => Some(Self::Email),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Webhook => "webhook",
      Self::Sms => "sms",
      Self::Whatsapp => "whatsapp",
      Self::Voice => "voice",
      Self::Email => "email",
    }
  }
}

impl fmt::Display for ChannelKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Contact addresses a facility can be reached on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactChannels {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub webhook: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
}

impl ContactChannels {
  /// Address used for a channel kind. Phone backs sms, whatsapp and voice.
  pub fn address_for(&self, kind: ChannelKind) -> Option<&str> {
    let addr = match kind {
      ChannelKind::Webhook => self.webhook.as_deref(),
      ChannelKind::Sms | ChannelKind::Whatsapp | ChannelKind::Voice => self.phone.as_deref(),
      ChannelKind::Email => self.email.as_deref(),
    };
    addr.filter(|a| !a.trim().is_empty())
  }

  pub fn is_empty(&self) -> bool {
    ChannelKind::DEFAULT_ORDER
      .iter()
      .all(|k| self.address_for(*k).is_none())
  }
}

// ---------------------------------------------------------------------------
// Facilities
// ---------------------------------------------------------------------------

/// A candidate responder. Serializes as `{id, name, lat, lon, tags, channels}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(flatten)]
  pub location: Coordinate,
  #[serde(default)]
  pub tags: BTreeSet<String>,
  #[serde(default)]
  pub channels: ContactChannels,
}

impl Facility {
  pub fn has_capability(&self, tag: &str) -> bool {
    self.tags.contains(&tag.to_ascii_lowercase())
  }
}

/// A facility with its distance from the incident and its 1-based rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
  pub facility: Facility,
  pub distance_km: f64,
  pub rank: usize,
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vitals {
  pub heart_rate: f64,
  pub spo2: f64,
  pub irregular_rhythm: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub waveform: Option<Vec<f32>>,
}

/// Canonical incident after validation. Immutable for one escalation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
  pub incident_id: String,
  pub device_id: String,
  pub location: Coordinate,
  pub vitals: Vitals,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub required_capability: Option<String>,
  pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Attempts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
  Accepted,
  Declined,
  NoResponse,
  Error,
}

/// Immutable audit entry for one channel attempt against one facility.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
  pub facility_id: String,
  /// `None` when the facility had no usable channel at all.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub channel: Option<ChannelKind>,
  pub outcome: AttemptOutcome,
  pub detail: String,
  /// Zero-based batch the facility was dispatched in.
  pub batch: usize,
  pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Output types (what the engine emits)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EscalationOutcome {
  Accepted {
    session_id: Uuid,
    facility: Facility,
  },
  Exhausted {
    session_id: Uuid,
    attempts: Vec<AttemptRecord>,
  },
}

impl EscalationOutcome {
  pub fn session_id(&self) -> Uuid {
    match self {
      Self::Accepted { session_id, .. } | Self::Exhausted { session_id, .. } => *session_id,
    }
  }

  pub fn accepted_facility(&self) -> Option<&Facility> {
    match self {
      Self::Accepted { facility, .. } => Some(facility),
      Self::Exhausted { .. } => None,
    }
  }

  pub fn is_exhausted(&self) -> bool {
    matches!(self, Self::Exhausted { .. })
  }
}

/// Structured error output for invalid input.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }

  pub fn from_error(err: &EngineError) -> Self {
    match err {
      EngineError::Validation { field, reason } => Self::new(reason.clone()).with_field(field.clone()),
      other => Self::new(other.to_string()),
    }
  }
}
