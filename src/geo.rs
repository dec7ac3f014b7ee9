//! Geometry kernel: WGS84 points, polygons, and containment.
//!
//! Pure functions only. Geometry is validated at construction
//! ([`GeoPoint::new`], [`Polygon::new`]); invalid inputs fail with
//! [`EngineError::InvalidGeometry`] instead of degrading to a default.
//! Circles are normalized to polygons ([`Polygon::from_circle`]) so the
//! containment hot path has exactly one shape to test.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters, used by haversine and destination formulas.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Vertex count for circle-to-polygon normalization.
pub const CIRCLE_VERTICES: usize = 64;

/// Tolerance for on-edge containment, in degrees of cross-product slack.
const EDGE_EPSILON: f64 = 1e-12;

/// A WGS84 coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, [-90, 90].
    pub lat: f64,
    /// Longitude in degrees, [-180, 180].
    pub lon: f64,
}

impl GeoPoint {
    /// Construct a validated point.
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` when either coordinate is non-finite or out of range.
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(EngineError::InvalidGeometry(format!(
                "latitude {lat} outside [-90, 90]"
            )));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(EngineError::InvalidGeometry(format!(
                "longitude {lon} outside [-180, 180]"
            )));
        }
        Ok(Self { lat, lon })
    }
}

/// A closed simple polygon in WGS84.
///
/// The ring repeats its first vertex last and has at least four vertices
/// (triangle plus closure). Simplicity (no self-intersection) is checked at
/// construction with the O(n²) segment test; zone rings are small.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    ring: Vec<GeoPoint>,
}

impl Polygon {
    /// Construct a validated polygon from a closed ring.
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` when the ring is open, too short, contains invalid
    /// coordinates, or self-intersects.
    pub fn new(ring: Vec<GeoPoint>) -> Result<Self> {
        if ring.len() < 4 {
            return Err(EngineError::InvalidGeometry(format!(
                "polygon ring has {} vertices, need at least 4",
                ring.len()
            )));
        }
        let first = ring[0];
        let last = ring[ring.len() - 1];
        if (first.lat - last.lat).abs() > f64::EPSILON || (first.lon - last.lon).abs() > f64::EPSILON
        {
            return Err(EngineError::InvalidGeometry(
                "polygon ring is not closed".into(),
            ));
        }
        for p in &ring {
            // Re-validate: rings may arrive via deserialization paths that
            // bypass GeoPoint::new.
            GeoPoint::new(p.lat, p.lon)?;
        }
        let polygon = Self { ring };
        if polygon.self_intersects() {
            return Err(EngineError::InvalidGeometry(
                "polygon ring self-intersects".into(),
            ));
        }
        Ok(polygon)
    }

    /// Normalize a circle (center + radius in meters) into a
    /// [`CIRCLE_VERTICES`]-gon.
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` when the center is invalid or the radius is not a
    /// positive finite number.
    pub fn from_circle(center: GeoPoint, radius_m: f64) -> Result<Self> {
        GeoPoint::new(center.lat, center.lon)?;
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(EngineError::InvalidGeometry(format!(
                "circle radius {radius_m} must be positive"
            )));
        }

        let mut ring = Vec::with_capacity(CIRCLE_VERTICES + 1);
        for i in 0..CIRCLE_VERTICES {
            #[allow(clippy::cast_precision_loss)]
            let bearing = 360.0 * (i as f64) / (CIRCLE_VERTICES as f64);
            ring.push(destination(center, bearing, radius_m));
        }
        let first = ring[0];
        ring.push(first);
        // Destination points of a proper circle cannot self-intersect;
        // construct directly so a degenerate float edge case surfaces as an
        // error instead of a panic.
        Self::new(ring)
    }

    /// The closed ring, first vertex repeated last.
    #[must_use]
    pub fn ring(&self) -> &[GeoPoint] {
        &self.ring
    }

    /// Ray-casting containment with on-edge counted as inside.
    ///
    /// On-edge inclusion keeps classification deterministic when two zones
    /// share a boundary segment.
    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        let n = self.ring.len() - 1; // last vertex repeats the first
        for i in 0..n {
            if on_segment(self.ring[i], self.ring[i + 1], point) {
                return true;
            }
        }

        let mut inside = false;
        for i in 0..n {
            let a = self.ring[i];
            let b = self.ring[i + 1];
            let crosses = (a.lat > point.lat) != (b.lat > point.lat);
            if crosses {
                let x = (b.lon - a.lon) * (point.lat - a.lat) / (b.lat - a.lat) + a.lon;
                if point.lon < x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// O(n²) proper-intersection test over non-adjacent ring segments.
    fn self_intersects(&self) -> bool {
        let n = self.ring.len() - 1;
        for i in 0..n {
            for j in (i + 1)..n {
                let adjacent = j == i + 1 || (i == 0 && j == n - 1);
                if adjacent {
                    continue;
                }
                if segments_intersect(
                    self.ring[i],
                    self.ring[i + 1],
                    self.ring[j],
                    self.ring[j + 1],
                ) {
                    return true;
                }
            }
        }
        false
    }
}

/// Great-circle distance between two points, in meters (haversine).
#[must_use]
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Forward azimuth from `a` to `b`, in degrees [0, 360).
#[must_use]
pub fn bearing_deg(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Destination point from `origin` along `bearing_deg` for `distance_m`.
fn destination(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();
    let bearing = bearing_deg.to_radians();
    let angular = distance_m / EARTH_RADIUS_M;

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos())
            .atan2(angular.cos() - lat1.sin() * lat2.sin());

    GeoPoint {
        lat: lat2.to_degrees(),
        lon: ((lon2.to_degrees() + 540.0) % 360.0) - 180.0,
    }
}

/// Signed area of the triangle (a, b, c); sign gives orientation.
fn cross(a: GeoPoint, b: GeoPoint, c: GeoPoint) -> f64 {
    (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
}

/// Whether `p` lies on the closed segment (a, b).
fn on_segment(a: GeoPoint, b: GeoPoint, p: GeoPoint) -> bool {
    if cross(a, b, p).abs() > EDGE_EPSILON {
        return false;
    }
    p.lon >= a.lon.min(b.lon) - EDGE_EPSILON
        && p.lon <= a.lon.max(b.lon) + EDGE_EPSILON
        && p.lat >= a.lat.min(b.lat) - EDGE_EPSILON
        && p.lat <= a.lat.max(b.lat) + EDGE_EPSILON
}

/// Proper or touching intersection of segments (p1, p2) and (p3, p4).
fn segments_intersect(p1: GeoPoint, p2: GeoPoint, p3: GeoPoint, p4: GeoPoint) -> bool {
    let d1 = cross(p3, p4, p1);
    let d2 = cross(p3, p4, p2);
    let d3 = cross(p1, p2, p3);
    let d4 = cross(p1, p2, p4);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1.abs() <= EDGE_EPSILON && on_segment(p3, p4, p1))
        || (d2.abs() <= EDGE_EPSILON && on_segment(p3, p4, p2))
        || (d3.abs() <= EDGE_EPSILON && on_segment(p1, p2, p3))
        || (d4.abs() <= EDGE_EPSILON && on_segment(p1, p2, p4))
}
