//! Shared builders for unit tests.

use crate::geo::{GeoPoint, Polygon};
use crate::types::{Fix, Severity, TouristState, Zone, ZoneId, ZoneVariant};
use chrono::Utc;
use std::collections::HashSet;

/// A fix at (lat, lon) with neutral derived fields.
pub(crate) fn fix_at(lat: f64, lon: f64) -> Fix {
    Fix {
        position: GeoPoint::new(lat, lon).expect("valid test point"),
        accuracy_m: Some(10.0),
        speed_mps: None,
        heading_deg: None,
        client_ts: Utc::now(),
        ingest_ts: Utc::now(),
        device: None,
        network: None,
        distance_from_prev_m: None,
        secs_from_prev: None,
        quality_score: 1.0,
        anomalous: false,
    }
}

/// Axis-aligned square ring centered at (lat, lon) with `half` degrees of
/// half-width.
pub(crate) fn square(lat: f64, lon: f64, half: f64) -> Polygon {
    Polygon::new(vec![
        GeoPoint { lat: lat - half, lon: lon - half },
        GeoPoint { lat: lat - half, lon: lon + half },
        GeoPoint { lat: lat + half, lon: lon + half },
        GeoPoint { lat: lat + half, lon: lon - half },
        GeoPoint { lat: lat - half, lon: lon - half },
    ])
    .expect("valid test square")
}

/// A tourist state with one fix and no memberships.
pub(crate) fn state_at(name: &str, lat: f64, lon: f64) -> TouristState {
    TouristState {
        name: name.to_string(),
        latest: fix_at(lat, lon),
        memberships: HashSet::new(),
        snapshot_version: 0,
        evaluated_at: Utc::now(),
        sos_active: false,
    }
}

/// A zone with a fresh id.
pub(crate) fn zone_with(
    variant: ZoneVariant,
    name: &str,
    polygon: Polygon,
    severity: Severity,
) -> Zone {
    Zone {
        id: ZoneId::new(),
        name: name.to_string(),
        variant,
        polygon,
        severity,
        active: true,
        created_at: Utc::now(),
        description: None,
    }
}
