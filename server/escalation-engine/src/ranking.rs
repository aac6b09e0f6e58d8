//! Rank candidate facilities around an incident.
//!
//! Order: distance ascending, then facility id for determinism. Duplicate ids
//! collapse to their first occurrence. A capability filter that would empty the
//! list is relaxed so that any existing candidate is still reachable.

use std::collections::HashSet;

use crate::geo;
use crate::types::{Coordinate, Facility, RankedCandidate};

/// Ranked list plus whether the capability filter had to be relaxed.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
  pub candidates: Vec<RankedCandidate>,
  pub capability_relaxed: bool,
}

/// Rank facilities by distance from `origin`, optionally filtered by capability.
pub fn rank(
  candidates: &[Facility],
  origin: &Coordinate,
  required_capability: Option<&str>,
) -> Vec<RankedCandidate> {
  rank_detailed(candidates, origin, required_capability).candidates
}

pub fn rank_detailed(
  candidates: &[Facility],
  origin: &Coordinate,
  required_capability: Option<&str>,
) -> Ranking {
  let mut seen: HashSet<&str> = HashSet::with_capacity(candidates.len());
  let unique: Vec<&Facility> = candidates
    .iter()
    .filter(|f| seen.insert(f.id.as_str()))
    .collect();

  let required = required_capability
    .map(str::trim)
    .filter(|tag| !tag.is_empty());

  let (pool, capability_relaxed) = match required {
    Some(tag) => {
      let capable: Vec<&Facility> = unique
        .iter()
        .copied()
        .filter(|f| f.has_capability(tag))
        .collect();
      if capable.is_empty() && !unique.is_empty() {
        (unique, true)
      } else {
        (capable, false)
      }
    }
    None => (unique, false),
  };

  let mut ranked: Vec<RankedCandidate> = pool
    .into_iter()
    .map(|f| RankedCandidate {
      distance_km: geo::haversine_km(origin, &f.location),
      facility: f.clone(),
      rank: 0,
    })
    .collect();

  ranked.sort_by(|a, b| {
    a.distance_km
      .total_cmp(&b.distance_km)
      .then_with(|| a.facility.id.cmp(&b.facility.id))
  });
  for (idx, candidate) in ranked.iter_mut().enumerate() {
    candidate.rank = idx + 1;
  }

  Ranking {
    candidates: ranked,
    capability_relaxed,
  }
}
