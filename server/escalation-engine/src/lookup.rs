//! Facility lookup collaborators: the trait the engine queries, a static
//! registry that doubles as the fallback, and a TTL cache wrapper.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::error::EngineError;
use crate::geo;
use crate::normalize;
use crate::types::{Coordinate, Facility};

/// Source of candidate facilities around a coordinate.
#[async_trait]
pub trait FacilityLookup: Send + Sync {
  /// Facilities within `radius_km` of `origin`. The capability is advisory;
  /// ranking applies the filter.
  async fn find(
    &self,
    origin: &Coordinate,
    radius_km: f64,
    required_capability: Option<&str>,
  ) -> Result<Vec<Facility>, EngineError>;
}

// ---------------------------------------------------------------------------
// Static registry
// ---------------------------------------------------------------------------

/// Pre-seeded, in-memory facility list.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
  facilities: Vec<Facility>,
}

impl StaticRegistry {
  pub fn new(facilities: Vec<Facility>) -> Self {
    Self { facilities }
  }

  /// Validate and load facilities from a JSON array.
  pub fn from_json(json: &str) -> Result<Self, EngineError> {
    let raw: Vec<Facility> = serde_json::from_str(json)?;
    Ok(Self::new(normalize::facilities(&raw)?))
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
      .map_err(|e| EngineError::config("FACILITY_REGISTRY", format!("{}: {}", path.display(), e)))?;
    Self::from_json(&json)
  }

  pub fn len(&self) -> usize {
    self.facilities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.facilities.is_empty()
  }

  /// Facilities within `radius_km`, in registry order.
  pub fn within(&self, origin: &Coordinate, radius_km: f64) -> Vec<Facility> {
    self
      .facilities
      .iter()
      .filter(|f| geo::haversine_km(origin, &f.location) <= radius_km)
      .cloned()
      .collect()
  }
}

#[async_trait]
impl FacilityLookup for StaticRegistry {
  async fn find(
    &self,
    origin: &Coordinate,
    radius_km: f64,
    _required_capability: Option<&str>,
  ) -> Result<Vec<Facility>, EngineError> {
    Ok(self.within(origin, radius_km))
  }
}

// ---------------------------------------------------------------------------
// TTL cache
// ---------------------------------------------------------------------------

struct CacheEntry {
  stored_at: Instant,
  facilities: Vec<Facility>,
}

/// Caches another lookup's results per query for `ttl`. Expiry is checked at
/// read time and expired entries are swept on every insert, so the map only
/// holds queries from the last `ttl`. Failures are never cached.
pub struct CachedLookup<L> {
  inner: L,
  ttl: Duration,
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl<L: FacilityLookup> CachedLookup<L> {
  pub fn new(inner: L, ttl: Duration) -> Self {
    Self {
      inner,
      ttl,
      entries: Mutex::new(HashMap::new()),
    }
  }

  /// ~11 m grid so nearby repeat queries share an entry.
  fn key(origin: &Coordinate, radius_km: f64, required_capability: Option<&str>) -> String {
    format!(
      "{:.4}|{:.4}|{:.3}|{}",
      origin.lat,
      origin.lon,
      radius_km,
      required_capability.unwrap_or("")
    )
  }

  /// Entries currently held, expired or not.
  pub fn len(&self) -> usize {
    self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn cached(&self, key: &str) -> Option<Vec<Facility>> {
    let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    match entries.get(key) {
      Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.facilities.clone()),
      Some(_) => {
        entries.remove(key);
        None
      }
      None => None,
    }
  }
}

#[async_trait]
impl<L: FacilityLookup> FacilityLookup for CachedLookup<L> {
  async fn find(
    &self,
    origin: &Coordinate,
    radius_km: f64,
    required_capability: Option<&str>,
  ) -> Result<Vec<Facility>, EngineError> {
    let key = Self::key(origin, radius_km, required_capability);
    if let Some(hit) = self.cached(&key) {
      debug!(%key, facilities = hit.len(), "lookup cache hit");
      return Ok(hit);
    }

    let facilities = self.inner.find(origin, radius_km, required_capability).await?;
    let now = Instant::now();
    let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    entries.retain(|_, entry| now.duration_since(entry.stored_at) < self.ttl);
    entries.insert(
      key,
      CacheEntry {
        stored_at: now,
        facilities: facilities.clone(),
      },
    );
    Ok(facilities)
  }
}
