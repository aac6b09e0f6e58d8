//! Engine configuration with sane defaults, environment overrides, and
//! per-request dispatch overrides.

use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;
use crate::types::ChannelKind;

/// Hard ceiling on how long a batch may wait for an acceptance.
pub const MAX_ACCEPTANCE_WINDOW: Duration = Duration::from_secs(90);

/// Tunables for one escalation run.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
  /// Facilities attempted concurrently per round.
  pub batch_size: usize,
  /// Max wait for one channel attempt.
  pub per_channel_timeout: Duration,
  /// Max wait for a batch to yield an acceptance before moving on.
  pub acceptance_window: Duration,
  /// Channel priority applied per facility.
  pub channel_order: Vec<ChannelKind>,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    Self {
      batch_size: 3,
      per_channel_timeout: Duration::from_secs(5),
      acceptance_window: Duration::from_secs(30),
      channel_order: ChannelKind::DEFAULT_ORDER.to_vec(),
    }
  }
}

impl DispatchConfig {
  /// Check invariants and clamp the acceptance window to its ceiling.
  pub fn validated(mut self) -> Result<Self, EngineError> {
    if self.batch_size == 0 {
      return Err(EngineError::validation("config.batch_size", "must be at least 1"));
    }
    if self.per_channel_timeout.is_zero() {
      return Err(EngineError::validation(
        "config.per_channel_timeout_ms",
        "must be greater than 0",
      ));
    }
    if self.acceptance_window.is_zero() {
      return Err(EngineError::validation(
        "config.acceptance_window_ms",
        "must be greater than 0",
      ));
    }
    if self.channel_order.is_empty() {
      return Err(EngineError::validation("config.channel_order", "must not be empty"));
    }
    self.acceptance_window = self.acceptance_window.min(MAX_ACCEPTANCE_WINDOW);
    let mut seen = Vec::with_capacity(self.channel_order.len());
    self.channel_order.retain(|k| {
      if seen.contains(k) {
        false
      } else {
        seen.push(*k);
        true
      }
    });
    Ok(self)
  }

  /// Apply request-level overrides on top of this config.
  pub fn with_overrides(&self, overrides: &DispatchOverrides) -> Result<Self, EngineError> {
    let mut out = self.clone();
    if let Some(n) = overrides.batch_size {
      out.batch_size = n;
    }
    if let Some(ms) = overrides.per_channel_timeout_ms {
      out.per_channel_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = overrides.acceptance_window_ms {
      out.acceptance_window = Duration::from_millis(ms);
    }
    if let Some(order) = &overrides.channel_order {
      out.channel_order = order.clone();
    }
    out.validated()
  }
}

/// Request-level dispatch overrides. Durations are milliseconds on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchOverrides {
  #[serde(default)]
  pub batch_size: Option<usize>,
  #[serde(default)]
  pub per_channel_timeout_ms: Option<u64>,
  #[serde(default)]
  pub acceptance_window_ms: Option<u64>,
  #[serde(default)]
  pub channel_order: Option<Vec<ChannelKind>>,
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
  pub dispatch: DispatchConfig,
  /// Lookup radius when a request names none.
  pub default_radius_km: f64,
  /// How long a cached lookup result stays fresh.
  pub lookup_cache_ttl: Duration,
  /// How long a settled session stays queryable.
  pub session_retention: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      dispatch: DispatchConfig::default(),
      default_radius_km: 25.0,
      lookup_cache_ttl: Duration::from_secs(300),
      session_retention: Duration::from_secs(900),
    }
  }
}

impl Config {
  /// Defaults overlaid with `ESCALATION_*` environment variables.
  pub fn from_env() -> Result<Self, EngineError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Same as [`Config::from_env`] with an injectable variable source.
  pub fn from_lookup<F>(get: F) -> Result<Self, EngineError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Config::default();

    if let Some(v) = get("ESCALATION_BATCH_SIZE") {
      config.dispatch.batch_size = parse_num("ESCALATION_BATCH_SIZE", &v)?;
    }
    if let Some(v) = get("ESCALATION_CHANNEL_TIMEOUT_MS") {
      config.dispatch.per_channel_timeout =
        Duration::from_millis(parse_num("ESCALATION_CHANNEL_TIMEOUT_MS", &v)?);
    }
    if let Some(v) = get("ESCALATION_ACCEPTANCE_WINDOW_MS") {
      config.dispatch.acceptance_window =
        Duration::from_millis(parse_num("ESCALATION_ACCEPTANCE_WINDOW_MS", &v)?);
    }
    if let Some(v) = get("ESCALATION_CHANNEL_ORDER") {
      config.dispatch.channel_order = v
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
          ChannelKind::from_str_loose(s)
            .ok_or_else(|| EngineError::config("ESCALATION_CHANNEL_ORDER", format!("unknown channel {:?}", s.trim())))
        })
        .collect::<Result<Vec<_>, _>>()?;
    }
    if let Some(v) = get("ESCALATION_RADIUS_KM") {
      let radius: f64 = parse_num("ESCALATION_RADIUS_KM", &v)?;
      if !radius.is_finite() || radius <= 0.0 {
        return Err(EngineError::config("ESCALATION_RADIUS_KM", "must be a positive number"));
      }
      config.default_radius_km = radius;
    }
    if let Some(v) = get("ESCALATION_LOOKUP_TTL_SECS") {
      config.lookup_cache_ttl = Duration::from_secs(parse_num("ESCALATION_LOOKUP_TTL_SECS", &v)?);
    }
    if let Some(v) = get("ESCALATION_SESSION_RETENTION_SECS") {
      config.session_retention =
        Duration::from_secs(parse_num("ESCALATION_SESSION_RETENTION_SECS", &v)?);
    }

    config.dispatch = config
      .dispatch
      .validated()
      .map_err(|e| EngineError::config("ESCALATION_*", e.to_string()))?;
    Ok(config)
  }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, EngineError>
where
  T::Err: std::fmt::Display,
{
  raw
    .trim()
    .parse::<T>()
    .map_err(|e| EngineError::config(key, format!("{:?}: {}", raw, e)))
}
