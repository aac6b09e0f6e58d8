//! Structured error types for the escalation engine.
//!
//! Only `Validation` reaches a caller of the boundary operations. Lookup and
//! channel failures are absorbed into fallbacks and attempt records.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("lookup: {0}")]
  Lookup(String),

  #[error("config: {key}: {reason}")]
  Config { key: String, reason: String },

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl EngineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn lookup(msg: impl Into<String>) -> Self {
    Self::Lookup(msg.into())
  }

  pub fn config(key: &str, reason: impl Into<String>) -> Self {
    Self::Config {
      key: key.to_string(),
      reason: reason.into(),
    }
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, Self::Validation { .. })
  }
}
