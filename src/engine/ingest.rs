//! Ingestion validation and kinematics derivation.
//!
//! The pure half of the pipeline: everything here is a function of the
//! submission, the previous accepted fix, and the clock. The orchestration
//! (locks, consent, persistence, fan-out) lives in [`crate::engine`].

use crate::error::{EngineError, Result};
use crate::geo::{self, GeoPoint};
use crate::types::{DeviceInfo, Fix, NetworkInfo};
use chrono::{DateTime, Utc};

/// Speed treated as a sustained-speed anomaly, m/s.
const ANOMALY_SPEED_MPS: f64 = 50.0;
/// Accuracy above which a fix is anomalous, meters.
const ANOMALY_ACCURACY_M: f64 = 1000.0;
/// Jump from the previous fix treated as anomalous, meters.
const ANOMALY_JUMP_M: f64 = 10_000.0;
/// Gap from the previous fix treated as anomalous, seconds.
const ANOMALY_GAP_SECS: f64 = 3600.0;

/// 200 km/h in m/s; above this the quality score takes its speed penalty.
const QUALITY_SPEED_CAP_MPS: f64 = 200.0 / 3.6;
/// Distance beyond which the quality score takes its jump penalty, meters.
const QUALITY_JUMP_M: f64 = 50_000.0;

/// A position update as submitted by a client, before acceptance.
#[derive(Clone, Debug)]
pub struct FixSubmission {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Reported accuracy in meters.
    pub accuracy_m: Option<f64>,
    /// Reported speed in m/s.
    pub speed_mps: Option<f64>,
    /// Reported heading in degrees.
    pub heading_deg: Option<f64>,
    /// Client timestamp.
    pub timestamp: DateTime<Utc>,
    /// Optional device descriptor.
    pub device: Option<DeviceInfo>,
    /// Optional network descriptor.
    pub network: Option<NetworkInfo>,
}

/// Why a submission was silently dropped instead of accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Client timestamp regressed behind the last accepted fix.
    OutOfOrder,
}

/// Validate a submission's coordinates, accuracy, and timestamp.
///
/// Returns the validated position. Monotonicity against the previous fix is
/// checked separately under the shard lock ([`check_order`]).
///
/// # Errors
///
/// `InvalidInput` describing the first failing field.
pub fn validate(sub: &FixSubmission, now: DateTime<Utc>, max_future_skew_secs: i64) -> Result<GeoPoint> {
    let position = GeoPoint::new(sub.lat, sub.lon)
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

    if let Some(accuracy) = sub.accuracy_m {
        if !accuracy.is_finite() || accuracy < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "accuracy {accuracy} must be a non-negative number of meters"
            )));
        }
    }
    if let Some(speed) = sub.speed_mps {
        if !speed.is_finite() || speed < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "speed {speed} must be a non-negative number of m/s"
            )));
        }
    }
    if let Some(heading) = sub.heading_deg {
        if !heading.is_finite() || !(0.0..360.0).contains(&heading) {
            return Err(EngineError::InvalidInput(format!(
                "heading {heading} must be in [0, 360)"
            )));
        }
    }

    let skew = (sub.timestamp - now).num_seconds();
    if skew > max_future_skew_secs {
        return Err(EngineError::InvalidInput(format!(
            "timestamp is {skew}s in the future (limit {max_future_skew_secs}s)"
        )));
    }

    Ok(position)
}

/// Enforce per-tourist client-timestamp monotonicity.
///
/// An older-than-last timestamp is a tolerated mobile-network reorder, not a
/// client error: the fix is dropped without effects and without an error.
pub fn check_order(
    sub: &FixSubmission,
    prev: Option<&Fix>,
    max_regression_secs: i64,
) -> std::result::Result<(), DropReason> {
    let Some(prev) = prev else { return Ok(()) };
    if sub.timestamp >= prev.client_ts {
        return Ok(());
    }
    let regression = (prev.client_ts - sub.timestamp).num_seconds();
    if regression > max_regression_secs {
        tracing::warn!(
            regression_secs = regression,
            "Dropping stale fix far behind the accepted stream"
        );
    } else {
        tracing::debug!(regression_secs = regression, "Dropping reordered fix");
    }
    Err(DropReason::OutOfOrder)
}

/// Advisory quality score per accepted fix, clamped to [0, 1].
#[must_use]
pub fn quality_score(
    accuracy_m: Option<f64>,
    speed_mps: Option<f64>,
    gap_secs: Option<f64>,
    distance_m: Option<f64>,
) -> f64 {
    let mut score = 1.0_f64;
    if let Some(accuracy) = accuracy_m {
        if accuracy > 100.0 {
            score -= 0.3;
        } else if accuracy >= 50.0 {
            score -= 0.1;
        }
    }
    if speed_mps.is_some_and(|s| s > QUALITY_SPEED_CAP_MPS) {
        score -= 0.5;
    }
    if gap_secs.is_some_and(|g| g > ANOMALY_GAP_SECS) {
        score -= 0.2;
    }
    if distance_m.is_some_and(|d| d > QUALITY_JUMP_M) {
        score -= 0.4;
    }
    score.clamp(0.0, 1.0)
}

/// Build the accepted fix: fill derived kinematics, score quality, and
/// mark anomalies.
#[must_use]
pub fn derive(sub: FixSubmission, position: GeoPoint, prev: Option<&Fix>, now: DateTime<Utc>) -> Fix {
    let distance_from_prev_m = prev.map(|p| geo::distance_m(p.position, position));
    let secs_from_prev = prev.map(|p| {
        #[allow(clippy::cast_precision_loss)]
        let ms = (sub.timestamp - p.client_ts).num_milliseconds() as f64;
        ms / 1000.0
    });

    let derived_speed = match (distance_from_prev_m, secs_from_prev) {
        (Some(d), Some(dt)) if dt > 0.0 => Some(d / dt),
        _ => None,
    };
    let speed_mps = sub.speed_mps.or(derived_speed);

    let derived_heading = match (prev, distance_from_prev_m) {
        // A heading needs actual movement; bearing from a point to itself
        // is noise.
        (Some(p), Some(d)) if d > 1.0 => Some(geo::bearing_deg(p.position, position)),
        _ => None,
    };
    let heading_deg = sub.heading_deg.or(derived_heading);

    let quality = quality_score(sub.accuracy_m, speed_mps, secs_from_prev, distance_from_prev_m);

    let anomalous = speed_mps.is_some_and(|s| s > ANOMALY_SPEED_MPS)
        || sub.accuracy_m.is_some_and(|a| a > ANOMALY_ACCURACY_M)
        || distance_from_prev_m.is_some_and(|d| d > ANOMALY_JUMP_M)
        || secs_from_prev.is_some_and(|g| g > ANOMALY_GAP_SECS);

    Fix {
        position,
        accuracy_m: sub.accuracy_m,
        speed_mps,
        heading_deg,
        client_ts: sub.timestamp,
        ingest_ts: now,
        device: sub.device,
        network: sub.network,
        distance_from_prev_m,
        secs_from_prev,
        quality_score: quality,
        anomalous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn submission(lat: f64, lon: f64, ts: DateTime<Utc>) -> FixSubmission {
        FixSubmission {
            lat,
            lon,
            accuracy_m: Some(10.0),
            speed_mps: None,
            heading_deg: None,
            timestamp: ts,
            device: None,
            network: None,
        }
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let now = base_time();
        let result = validate(&submission(91.0, 0.0, now), now, 60);
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        let result = validate(&submission(0.0, -181.0, now), now, 60);
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn rejects_negative_accuracy_and_speed() {
        let now = base_time();
        let mut sub = submission(0.0, 0.0, now);
        sub.accuracy_m = Some(-1.0);
        assert!(validate(&sub, now, 60).is_err());

        let mut sub = submission(0.0, 0.0, now);
        sub.speed_mps = Some(-2.0);
        assert!(validate(&sub, now, 60).is_err());

        let mut sub = submission(0.0, 0.0, now);
        sub.heading_deg = Some(360.0);
        assert!(validate(&sub, now, 60).is_err());
    }

    #[test]
    fn rejects_far_future_timestamps() {
        let now = base_time();
        let sub = submission(0.0, 0.0, now + Duration::seconds(61));
        assert!(validate(&sub, now, 60).is_err());
        // Within the skew window is fine.
        let sub = submission(0.0, 0.0, now + Duration::seconds(59));
        assert!(validate(&sub, now, 60).is_ok());
    }

    #[test]
    fn out_of_order_fixes_drop_silently() {
        let now = base_time();
        let position = GeoPoint::new(10.0, 10.0).unwrap();
        let prev = derive(submission(10.0, 10.0, now), position, None, now);

        let older = submission(10.0, 10.0, now - Duration::seconds(5));
        assert_eq!(
            check_order(&older, Some(&prev), 60),
            Err(DropReason::OutOfOrder)
        );

        // Far behind the stream: still a silent drop, just logged louder.
        let stale = submission(10.0, 10.0, now - Duration::seconds(500));
        assert_eq!(
            check_order(&stale, Some(&prev), 60),
            Err(DropReason::OutOfOrder)
        );

        let newer = submission(10.0, 10.0, now + Duration::seconds(5));
        assert!(check_order(&newer, Some(&prev), 60).is_ok());
        // Equal timestamps satisfy the monotonic invariant.
        let equal = submission(10.0, 10.0, now);
        assert!(check_order(&equal, Some(&prev), 60).is_ok());
    }

    #[test]
    fn quality_score_penalties_accumulate() {
        assert!((quality_score(Some(10.0), Some(1.0), Some(5.0), Some(20.0)) - 1.0).abs() < 1e-9);
        assert!((quality_score(Some(75.0), None, None, None) - 0.9).abs() < 1e-9);
        assert!((quality_score(Some(150.0), None, None, None) - 0.7).abs() < 1e-9);
        assert!((quality_score(None, Some(60.0), None, None) - 0.5).abs() < 1e-9);
        assert!((quality_score(None, None, Some(4000.0), None) - 0.8).abs() < 1e-9);
        assert!((quality_score(None, None, None, Some(60_000.0)) - 0.6).abs() < 1e-9);
        // Everything at once clamps at zero.
        assert!(
            quality_score(Some(200.0), Some(100.0), Some(4000.0), Some(60_000.0)) >= 0.0
        );
        assert!(
            (quality_score(Some(200.0), Some(100.0), Some(4000.0), Some(60_000.0)) - 0.0).abs()
                < 1e-9
        );
    }

    #[test]
    fn derives_speed_and_heading_from_previous_fix() {
        let now = base_time();
        let start = GeoPoint::new(0.0, 0.0).unwrap();
        let prev = derive(submission(0.0, 0.0, now), start, None, now);
        assert!(prev.speed_mps.is_none());
        assert!(prev.heading_deg.is_none());
        assert!(prev.distance_from_prev_m.is_none());

        // 0.01 deg north is ~1112 m, covered in 100 s.
        let later = now + Duration::seconds(100);
        let position = GeoPoint::new(0.01, 0.0).unwrap();
        let next = derive(submission(0.01, 0.0, later), position, Some(&prev), later);

        let speed = next.speed_mps.expect("derived speed");
        assert!((speed - 11.12).abs() < 0.2, "got {speed}");
        let heading = next.heading_deg.expect("derived heading");
        assert!(heading < 1.0 || heading > 359.0, "got {heading}");
        assert!((next.secs_from_prev.unwrap() - 100.0).abs() < 1e-9);
        assert!(!next.anomalous);
    }

    #[test]
    fn reported_speed_wins_over_derived() {
        let now = base_time();
        let start = GeoPoint::new(0.0, 0.0).unwrap();
        let prev = derive(submission(0.0, 0.0, now), start, None, now);

        let later = now + Duration::seconds(100);
        let mut sub = submission(0.01, 0.0, later);
        sub.speed_mps = Some(3.0);
        let position = GeoPoint::new(0.01, 0.0).unwrap();
        let next = derive(sub, position, Some(&prev), later);
        assert_eq!(next.speed_mps, Some(3.0));
    }

    #[test]
    fn anomaly_heuristics() {
        let now = base_time();
        let start = GeoPoint::new(0.0, 0.0).unwrap();
        let prev = derive(submission(0.0, 0.0, now), start, None, now);

        // 1 degree (~111 km) in 10 s: jump and speed anomalies.
        let later = now + Duration::seconds(10);
        let position = GeoPoint::new(1.0, 0.0).unwrap();
        let next = derive(submission(1.0, 0.0, later), position, Some(&prev), later);
        assert!(next.anomalous);

        // Huge reported accuracy alone is an anomaly.
        let mut sub = submission(0.0, 0.0, later);
        sub.accuracy_m = Some(1500.0);
        let next = derive(sub, start, Some(&prev), later);
        assert!(next.anomalous);

        // A long quiet gap is an anomaly but not a rejection.
        let much_later = now + Duration::seconds(4000);
        let next = derive(
            submission(0.0, 0.0, much_later),
            start,
            Some(&prev),
            much_later,
        );
        assert!(next.anomalous);
        assert!((next.quality_score - 0.8).abs() < 1e-9);
    }
}
