//! Validate inbound incidents and facilities into canonical internal models.
//!
//! Everything here runs before ranking; a failure rejects the whole request.

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::types::*;

/// Heart rate below this (bpm) needs a cardiac-capable facility.
pub const BRADYCARDIA_BPM: f64 = 40.0;
/// Heart rate above this (bpm) needs a cardiac-capable facility.
pub const TACHYCARDIA_BPM: f64 = 150.0;
/// Oxygen saturation below this (%) needs a respiratory-capable facility.
pub const HYPOXIA_SPO2: f64 = 90.0;

pub const CARDIAC: &str = "cardiac";
pub const RESPIRATORY: &str = "respiratory";

/// Parse and validate an inbound incident.
pub fn incident(raw: &InboundIncident) -> Result<Incident, EngineError> {
  let device_id = raw.device_id.trim();
  if device_id.is_empty() {
    return Err(EngineError::validation("device_id", "must not be empty"));
  }

  let lat = raw
    .lat
    .ok_or_else(|| EngineError::validation("lat", "is required"))?;
  let lon = raw
    .lon
    .ok_or_else(|| EngineError::validation("lon", "is required"))?;
  let location = Coordinate::new(lat, lon)?;

  let heart_rate = raw
    .heart_rate
    .ok_or_else(|| EngineError::validation("heart_rate", "is required"))?;
  if !heart_rate.is_finite() || !(0.0..=300.0).contains(&heart_rate) {
    return Err(EngineError::validation("heart_rate", "must be within 0..300 bpm"));
  }

  let spo2 = raw
    .spo2
    .ok_or_else(|| EngineError::validation("spo2", "is required"))?;
  if !spo2.is_finite() || !(0.0..=100.0).contains(&spo2) {
    return Err(EngineError::validation("spo2", "must be within 0..100 percent"));
  }

  if let Some(samples) = &raw.waveform {
    if samples.iter().any(|s| !s.is_finite()) {
      return Err(EngineError::validation("waveform", "samples must be finite"));
    }
  }

  let created_at: DateTime<Utc> = match &raw.timestamp {
    Some(ts) => DateTime::parse_from_rfc3339(ts)
      .map_err(|e| EngineError::validation("timestamp", &format!("invalid RFC3339: {}", e)))?
      .with_timezone(&Utc),
    None => Utc::now(),
  };

  let vitals = Vitals {
    heart_rate,
    spo2,
    irregular_rhythm: raw.irregular_rhythm,
    waveform: raw.waveform.clone(),
  };

  let required_capability = match raw.required_capability.as_deref().map(str::trim) {
    Some(tag) if !tag.is_empty() => Some(tag.to_ascii_lowercase()),
    _ => required_capability(&vitals).map(str::to_string),
  };

  Ok(Incident {
    incident_id: incident_id(device_id, &created_at),
    device_id: device_id.to_string(),
    location,
    vitals,
    required_capability,
    created_at,
  })
}

/// Capability the vitals call for. Cardiac findings take precedence.
pub fn required_capability(vitals: &Vitals) -> Option<&'static str> {
  if vitals.irregular_rhythm
    || vitals.heart_rate < BRADYCARDIA_BPM
    || vitals.heart_rate > TACHYCARDIA_BPM
  {
    Some(CARDIAC)
  } else if vitals.spo2 < HYPOXIA_SPO2 {
    Some(RESPIRATORY)
  } else {
    None
  }
}

/// Stable incident id: hash of device + alert time.
fn incident_id(device_id: &str, created_at: &DateTime<Utc>) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(device_id.as_bytes());
  hasher.update(b"|");
  hasher.update(created_at.to_rfc3339().as_bytes());
  let hex = hasher.finalize().to_hex();
  format!("inc-{}", &hex[..16])
}

/// Validate caller-supplied facilities. Tags are lower-cased and trimmed.
pub fn facilities(raw: &[Facility]) -> Result<Vec<Facility>, EngineError> {
  raw
    .iter()
    .enumerate()
    .map(|(idx, f)| facility(f).map_err(|e| prefix_field(e, &format!("facilities[{}]", idx))))
    .collect()
}

pub fn facility(raw: &Facility) -> Result<Facility, EngineError> {
  let id = raw.id.trim();
  if id.is_empty() {
    return Err(EngineError::validation("id", "must not be empty"));
  }
  let location = Coordinate::new(raw.location.lat, raw.location.lon)?;
  let name = if raw.name.trim().is_empty() {
    id.to_string()
  } else {
    raw.name.trim().to_string()
  };

  Ok(Facility {
    id: id.to_string(),
    name,
    location,
    tags: raw
      .tags
      .iter()
      .map(|t| t.trim().to_ascii_lowercase())
      .filter(|t| !t.is_empty())
      .collect(),
    channels: raw.channels.clone(),
  })
}

fn prefix_field(err: EngineError, prefix: &str) -> EngineError {
  match err {
    EngineError::Validation { field, reason } => EngineError::Validation {
      field: format!("{}.{}", prefix, field),
      reason,
    },
    other => other,
  }
}
