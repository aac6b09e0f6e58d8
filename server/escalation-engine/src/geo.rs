//! Great-circle distance between coordinates.

use crate::types::Coordinate;

/// Mean Earth radius (IUGG), km.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Haversine distance in kilometres.
pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
  let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
  let dlat = (b.lat - a.lat).to_radians();
  let dlon = (b.lon - a.lon).to_radians();

  let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
  // Clamp guards asin against rounding just above 1.0 for antipodal points.
  2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}
