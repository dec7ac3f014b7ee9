//! Alert materialization and the bounded alert ring.
//!
//! Candidates arrive from geofence edges and SOS injection; each accepted
//! candidate gets a server id, a timestamp, and a slot in the ring. The
//! ring is guarded by a single mutex and every operation on it is O(1)
//! amortized. Duplicate (tourist, kind, zone) candidates inside the dedup
//! window collapse into one alert to absorb GPS jitter at zone boundaries.

use crate::clock::Clock;
use crate::geo::GeoPoint;
use crate::types::{Alert, AlertId, AlertKind, Severity, TouristId, ZoneId};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

type DedupKey = (TouristId, AlertKind, Option<ZoneId>);

/// An alert before id and timestamp assignment.
#[derive(Clone, Debug)]
pub struct AlertCandidate {
    /// Alert kind.
    pub kind: AlertKind,
    /// Tourist the alert concerns.
    pub tourist_id: TouristId,
    /// Display name at emission time.
    pub tourist_name: String,
    /// Position that produced the alert.
    pub position: GeoPoint,
    /// Zone id for geofence alerts.
    pub zone_id: Option<ZoneId>,
    /// Zone name for geofence alerts.
    pub zone_name: Option<String>,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub description: String,
}

struct Inner {
    ring: VecDeque<Alert>,
    recent: HashMap<DedupKey, DateTime<Utc>>,
}

/// Bounded, deduplicating alert ring.
pub struct AlertEngine {
    clock: Arc<dyn Clock>,
    capacity: usize,
    dedup_window: Duration,
    inner: Mutex<Inner>,
}

impl AlertEngine {
    /// Create a ring holding at most `capacity` alerts, collapsing
    /// duplicates within `dedup_window_secs`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, capacity: usize, dedup_window_secs: i64) -> Self {
        Self {
            clock,
            capacity: capacity.max(1),
            dedup_window: Duration::seconds(dedup_window_secs),
            inner: Mutex::new(Inner {
                ring: VecDeque::new(),
                recent: HashMap::new(),
            }),
        }
    }

    /// Materialize a candidate unless it duplicates a recent alert.
    ///
    /// Returns the stored alert, or `None` when collapsed.
    pub fn push(&self, candidate: AlertCandidate) -> Option<Alert> {
        let now = self.clock.now();
        let key: DedupKey = (
            candidate.tourist_id.clone(),
            candidate.kind,
            candidate.zone_id,
        );

        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(last) = inner.recent.get(&key) {
            if now - *last <= self.dedup_window {
                tracing::debug!(
                    tourist_id = %candidate.tourist_id,
                    kind = ?candidate.kind,
                    "Duplicate alert collapsed"
                );
                return None;
            }
        }
        inner.recent.insert(key, now);

        // The dedup index only needs entries younger than the window; prune
        // it once it outgrows the ring rather than on every push.
        if inner.recent.len() > self.capacity * 2 {
            let window = self.dedup_window;
            inner.recent.retain(|_, t| now - *t <= window);
        }

        let alert = Alert {
            id: AlertId::new(),
            kind: candidate.kind,
            tourist_id: candidate.tourist_id,
            tourist_name: candidate.tourist_name,
            position: candidate.position,
            zone_id: candidate.zone_id,
            zone_name: candidate.zone_name,
            severity: candidate.severity,
            description: candidate.description,
            timestamp: now,
        };

        if inner.ring.len() == self.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(alert.clone());

        tracing::info!(
            alert_id = %alert.id,
            kind = ?alert.kind,
            tourist_id = %alert.tourist_id,
            severity = ?alert.severity,
            "Alert emitted"
        );
        Some(alert)
    }

    /// Most recent alerts, newest first, at most `limit`.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.ring.iter().rev().take(limit).cloned().collect()
    }

    /// Alerts currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .ring
            .len()
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
