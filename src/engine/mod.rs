//! The location-ingestion and geofencing engine.
//!
//! An [`Engine`] value owns the zone registry, the sharded tourist state
//! map, the rate limiter, the alert ring, and the room broadcaster. It is
//! created once at startup and passed explicitly to handlers; there is no
//! package-level mutable state, so parallel tests run fresh engines.
//!
//! # Ingestion data flow
//!
//! ```text
//! submission → authorize → rate limit → validate → consent
//!            → [shard lock] order check → derive → evaluate snapshot
//!            → swap state → alerts → fan-out → history/cache (degrade)
//! ```
//!
//! Everything from the shard lock onward is serialized per shard, which is
//! what gives a single tourist's fixes strict processing order while other
//! tourists proceed in parallel.

pub mod alerts;
pub mod geofence;
pub mod ingest;
pub mod state;
pub mod zones;

use crate::clock::Clock;
use crate::config::{EngineConfig, RateLimitConfig};
use crate::consent::{Anonymizer, ConsentGate};
use crate::error::{EngineError, Result};
use crate::geo::{GeoPoint, Polygon};
use crate::hub::{self, RoomBroadcaster};
use crate::limiter::{EndpointClass, RateLimiter, SlidingWindowLimiter};
use crate::stores::{HistoryRow, HistoryStore, LiveCache, LivePosition, ZoneSnapshotStore};
use crate::types::{
    Alert, AlertKind, ConsentDecision, Principal, Severity, TouristId, TouristState, Zone,
    ZoneBrief, ZoneId, ZoneSnapshot, ZoneVariant,
};
use alerts::{AlertCandidate, AlertEngine};
use chrono::{DateTime, Utc};
use ingest::{DropReason, FixSubmission};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use zones::{ZonePatch, ZoneRegistry};

/// Typed event fanned out through the subscription hub.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A tourist's position changed; sent to `watch:<tourist>`.
    #[serde(rename = "location:changed")]
    LocationChanged {
        /// Tourist id.
        tourist_id: TouristId,
        /// Display name.
        name: String,
        /// Latitude.
        lat: f64,
        /// Longitude.
        lon: f64,
        /// Reported accuracy in meters.
        accuracy: Option<f64>,
        /// Client timestamp of the fix.
        timestamp: DateTime<Utc>,
    },
    /// Zone containment status; sent to `user:<tourist>`.
    #[serde(rename = "zone_status")]
    ZoneStatus {
        /// Inside at least one restricted zone.
        in_restricted: bool,
        /// Inside at least one safe zone.
        in_safe: bool,
        /// Containing restricted zones.
        restricted_zones: Vec<ZoneBrief>,
        /// Containing safe zones.
        safe_zones: Vec<ZoneBrief>,
    },
    /// A materialized alert; sent to `authorities` and `watch:<tourist>`.
    #[serde(rename = "alert")]
    Alert(Alert),
}

/// Zone geometry as supplied at registration time.
#[derive(Clone, Debug)]
pub enum ZoneGeometry {
    /// Closed polygon ring.
    Polygon(Vec<GeoPoint>),
    /// Circle, normalized to a polygon on registration.
    Circle {
        /// Center point.
        center: GeoPoint,
        /// Radius in meters.
        radius_m: f64,
    },
}

/// Result of one ingestion attempt that did not error.
#[derive(Clone, Debug)]
pub enum IngestOutcome {
    /// The fix was accepted and processed.
    Accepted(Box<IngestAccepted>),
    /// The fix regressed behind the accepted stream and was dropped
    /// without effects; not an error to the client.
    DroppedOutOfOrder,
}

/// Details of an accepted fix.
#[derive(Clone, Debug)]
pub struct IngestAccepted {
    /// The new tourist state after evaluation.
    pub state: TouristState,
    /// Alerts emitted by this fix (after dedup).
    pub alerts: Vec<Alert>,
    /// Inside any restricted zone.
    pub in_restricted: bool,
    /// Inside any safe zone.
    pub in_safe: bool,
}

/// The real-time tracking engine.
pub struct Engine {
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    registry: ZoneRegistry,
    state: state::TouristStateStore,
    limiter: SlidingWindowLimiter,
    consent: Arc<dyn ConsentGate>,
    history: Option<Arc<dyn HistoryStore>>,
    cache: Option<Arc<dyn LiveCache>>,
    snapshot_store: Option<Arc<dyn ZoneSnapshotStore>>,
    alerts: AlertEngine,
    hub: RoomBroadcaster<EngineEvent>,
    anonymizer: Anonymizer,
    degraded: AtomicBool,
}

impl Engine {
    /// Assemble an engine from its dependencies.
    ///
    /// `history`, `cache`, and `snapshot_store` are optional: a missing
    /// history store starts the engine degraded, a missing cache or
    /// snapshot store just disables that tier.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        rate_limits: RateLimitConfig,
        consent: Arc<dyn ConsentGate>,
        history: Option<Arc<dyn HistoryStore>>,
        cache: Option<Arc<dyn LiveCache>>,
        snapshot_store: Option<Arc<dyn ZoneSnapshotStore>>,
    ) -> Arc<Self> {
        let degraded = history.is_none();
        let engine = Self {
            registry: ZoneRegistry::new(clock.clone()),
            state: state::TouristStateStore::new(config.state_shards),
            limiter: SlidingWindowLimiter::new(clock.clone(), rate_limits),
            alerts: AlertEngine::new(
                clock.clone(),
                config.alert_ring_capacity,
                config.alert_dedup_window_secs,
            ),
            hub: RoomBroadcaster::new(),
            anonymizer: Anonymizer::new(config.anonymize_salt.clone()),
            degraded: AtomicBool::new(degraded),
            clock,
            config,
            consent,
            history,
            cache,
            snapshot_store,
        };
        if degraded {
            tracing::warn!("Engine starting without a history store; analytics writes disabled");
        }
        Arc::new(engine)
    }

    /// The room broadcaster, for session wiring.
    #[must_use]
    pub const fn hub(&self) -> &RoomBroadcaster<EngineEvent> {
        &self.hub
    }

    /// Whether a persistence tier is currently failing.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Engine tuning configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Ingest one position update for `tourist` on behalf of `principal`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for cross-tourist submission without impersonation,
    /// `RateLimited` on an exhausted position bucket, `InvalidInput` on
    /// validation failure, `ConsentRequired` when consent is absent, and
    /// `DependencyUnavailable` when the consent lookup misses its deadline
    /// (fail closed).
    pub async fn ingest(
        &self,
        principal: &Principal,
        tourist: &TouristId,
        submission: FixSubmission,
    ) -> Result<IngestOutcome> {
        // 1. Only the tourist themselves, or an authority when
        // impersonation is explicitly enabled.
        let self_submission = principal.tourist_id() == *tourist;
        if !self_submission && !(principal.is_authority() && self.config.allow_impersonation) {
            return Err(EngineError::Unauthorized(
                "position updates are accepted only for the authenticated tourist".into(),
            ));
        }

        // 2. Rate limit before any expensive work.
        self.limiter
            .check_and_record(&principal.id, EndpointClass::Position)
            .await?;

        // 3. Validate coordinates and timestamps.
        let now = self.clock.now();
        let position = ingest::validate(&submission, now, self.config.max_future_skew_secs)?;

        // 4. Consent, fail closed on deadline expiry.
        let decision = self.resolve_consent(tourist).await?;

        // 5–8. Per-tourist critical section.
        let name = if self_submission {
            principal.name.clone()
        } else {
            // Impersonated submissions keep the tourist's last known name.
            self.state
                .get(tourist)
                .await
                .map_or_else(|| principal.name.clone(), |s| s.name)
        };

        let mut shard = self.state.lock_shard(tourist).await;
        let prev = shard.get(tourist);

        if let Err(DropReason::OutOfOrder) = ingest::check_order(
            &submission,
            prev.map(|s| &s.latest),
            self.config.max_regression_secs,
        ) {
            return Ok(IngestOutcome::DroppedOutOfOrder);
        }

        let fix = ingest::derive(submission, position, prev.map(|s| &s.latest), now);
        let snapshot = self.registry.snapshot();
        let prior_memberships = prev.map(|s| s.memberships.clone()).unwrap_or_default();
        let sos_active = prev.is_some_and(|s| s.sos_active);

        let eval = geofence::evaluate(&snapshot, &prior_memberships, position);

        let new_state = TouristState {
            name: name.clone(),
            latest: fix.clone(),
            memberships: eval.memberships.clone(),
            snapshot_version: snapshot.version,
            evaluated_at: now,
            sos_active,
        };
        shard.insert(tourist.clone(), new_state.clone());

        // Edge alerts, deduplicated by the ring.
        let emitted = self.edge_alerts(tourist, &name, position, &eval, &snapshot);

        // Fan-out: the position change precedes the alerts it produced.
        self.hub
            .publish(
                hub::watch_room(tourist),
                EngineEvent::LocationChanged {
                    tourist_id: tourist.clone(),
                    name: name.clone(),
                    lat: position.lat,
                    lon: position.lon,
                    accuracy: fix.accuracy_m,
                    timestamp: fix.client_ts,
                },
            )
            .await;
        self.hub
            .publish(
                hub::user_room(tourist),
                EngineEvent::ZoneStatus {
                    in_restricted: eval.in_restricted,
                    in_safe: eval.in_safe,
                    restricted_zones: eval.restricted_zones.clone(),
                    safe_zones: eval.safe_zones.clone(),
                },
            )
            .await;
        for alert in &emitted {
            self.publish_alert(alert).await;
        }

        // 9. Persistence, still under the shard lock so rows land in
        // accept order; failures degrade instead of failing the update.
        self.append_history(tourist, &name, &fix, snapshot.version, decision)
            .await;
        self.write_cache(tourist, &name, &fix, decision).await;

        drop(shard);

        Ok(IngestOutcome::Accepted(Box::new(IngestAccepted {
            state: new_state,
            alerts: emitted,
            in_restricted: eval.in_restricted,
            in_safe: eval.in_safe,
        })))
    }

    async fn resolve_consent(&self, tourist: &TouristId) -> Result<ConsentDecision> {
        let deadline = Duration::from_millis(self.config.consent_timeout_ms);
        match timeout(deadline, self.consent.allow(tourist)).await {
            Ok(decision) => decision,
            Err(_) => {
                tracing::error!(
                    tourist_id = %tourist,
                    deadline_ms = self.config.consent_timeout_ms,
                    "Consent lookup missed its deadline, rejecting update"
                );
                Err(EngineError::DependencyUnavailable(
                    "consent lookup timed out".into(),
                ))
            }
        }
    }

    fn edge_alerts(
        &self,
        tourist: &TouristId,
        name: &str,
        position: GeoPoint,
        eval: &geofence::Evaluation,
        snapshot: &ZoneSnapshot,
    ) -> Vec<Alert> {
        let mut emitted = Vec::new();

        for zone in &eval.entered {
            if zone.variant != ZoneVariant::Restricted {
                continue;
            }
            let candidate = AlertCandidate {
                kind: AlertKind::GeofenceBreach,
                tourist_id: tourist.clone(),
                tourist_name: name.to_string(),
                position,
                zone_id: Some(zone.id),
                zone_name: Some(zone.name.clone()),
                severity: zone.severity,
                description: format!("{name} entered restricted zone {}", zone.name),
            };
            if let Some(alert) = self.alerts.push(candidate) {
                emitted.push(alert);
            }
        }

        if !eval.in_safe {
            for id in &eval.exited {
                // Exited zones may have been deleted since the last fix;
                // the tombstone keeps their record resolvable.
                let Some(zone) = snapshot.zone(*id).cloned().or_else(|| self.registry.lookup(*id))
                else {
                    continue;
                };
                if zone.variant != ZoneVariant::Safe {
                    continue;
                }
                let candidate = AlertCandidate {
                    kind: AlertKind::SafeZoneExit,
                    tourist_id: tourist.clone(),
                    tourist_name: name.to_string(),
                    position,
                    zone_id: Some(zone.id),
                    zone_name: Some(zone.name.clone()),
                    severity: Severity::Medium,
                    description: format!("{name} left safe zone {}", zone.name),
                };
                if let Some(alert) = self.alerts.push(candidate) {
                    emitted.push(alert);
                }
            }
        }

        emitted
    }

    async fn publish_alert(&self, alert: &Alert) {
        self.hub
            .publish(hub::AUTHORITIES_ROOM, EngineEvent::Alert(alert.clone()))
            .await;
        self.hub
            .publish(
                hub::watch_room(&alert.tourist_id),
                EngineEvent::Alert(alert.clone()),
            )
            .await;
    }

    async fn append_history(
        &self,
        tourist: &TouristId,
        name: &str,
        fix: &crate::types::Fix,
        snapshot_version: u64,
        decision: ConsentDecision,
    ) {
        let Some(history) = &self.history else {
            return;
        };

        let row = self.build_history_row(tourist, name, fix, snapshot_version, decision);
        let deadline = Duration::from_millis(self.config.history_timeout_ms);
        let result = timeout(deadline, history.append(&row)).await;
        match result {
            Ok(Ok(())) => {
                self.degraded.store(false, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "History append failed; continuing degraded");
                self.degraded.store(true, Ordering::Relaxed);
            }
            Err(_) => {
                tracing::error!(
                    deadline_ms = self.config.history_timeout_ms,
                    "History append missed its deadline; continuing degraded"
                );
                self.degraded.store(true, Ordering::Relaxed);
            }
        }
    }

    fn build_history_row(
        &self,
        tourist: &TouristId,
        name: &str,
        fix: &crate::types::Fix,
        snapshot_version: u64,
        decision: ConsentDecision,
    ) -> HistoryRow {
        let (tourist_key, tourist_name, lat, lon) = if decision.anonymize {
            (
                self.anonymizer.hash_tourist_id(tourist),
                Anonymizer::mask_name(name),
                Anonymizer::round_coordinate(fix.position.lat),
                Anonymizer::round_coordinate(fix.position.lon),
            )
        } else {
            (
                tourist.to_string(),
                name.to_string(),
                fix.position.lat,
                fix.position.lon,
            )
        };

        HistoryRow {
            tourist_key,
            tourist_name,
            lat,
            lon,
            accuracy_m: fix.accuracy_m,
            server_ts: fix.ingest_ts,
            client_ts: fix.client_ts,
            speed_mps: fix.speed_mps,
            heading_deg: fix.heading_deg,
            distance_from_prev_m: fix.distance_from_prev_m,
            secs_from_prev: fix.secs_from_prev,
            quality_score: fix.quality_score,
            anomalous: fix.anomalous,
            snapshot_version,
            anonymized: decision.anonymize,
            retention_days: decision.retention_days,
        }
    }

    async fn write_cache(
        &self,
        tourist: &TouristId,
        name: &str,
        fix: &crate::types::Fix,
        decision: ConsentDecision,
    ) {
        let Some(cache) = &self.cache else { return };

        let record = if decision.anonymize {
            LivePosition {
                tourist_id: TouristId::new(self.anonymizer.hash_tourist_id(tourist)),
                name: Anonymizer::mask_name(name),
                lat: Anonymizer::round_coordinate(fix.position.lat),
                lon: Anonymizer::round_coordinate(fix.position.lon),
                accuracy_m: fix.accuracy_m,
                client_ts: fix.client_ts,
                ingest_ts: fix.ingest_ts,
                anonymized: true,
            }
        } else {
            LivePosition {
                tourist_id: tourist.clone(),
                name: name.to_string(),
                lat: fix.position.lat,
                lon: fix.position.lon,
                accuracy_m: fix.accuracy_m,
                client_ts: fix.client_ts,
                ingest_ts: fix.ingest_ts,
                anonymized: false,
            }
        };

        if let Err(e) = cache.put(&record).await {
            tracing::warn!(error = %e, "Hot cache write failed; live view served from memory");
        }
    }

    /// Warm in-memory state from the hot cache at startup.
    ///
    /// Anonymized records cannot be mapped back to a tourist and are
    /// skipped; a cache failure just starts the engine cold.
    pub async fn warm_from_cache(&self) {
        let Some(cache) = &self.cache else { return };

        let positions = match cache.load_all().await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::warn!(error = %e, "Hot cache unavailable at startup; starting cold");
                return;
            }
        };

        let mut warmed = 0_usize;
        for record in positions {
            if record.anonymized {
                continue;
            }
            let Ok(position) = GeoPoint::new(record.lat, record.lon) else {
                continue;
            };
            let tourist = record.tourist_id.clone();
            let mut shard = self.state.lock_shard(&tourist).await;
            if shard.contains_key(&tourist) {
                continue;
            }
            shard.insert(
                tourist,
                TouristState {
                    name: record.name,
                    latest: crate::types::Fix {
                        position,
                        accuracy_m: record.accuracy_m,
                        speed_mps: None,
                        heading_deg: None,
                        client_ts: record.client_ts,
                        ingest_ts: record.ingest_ts,
                        device: None,
                        network: None,
                        distance_from_prev_m: None,
                        secs_from_prev: None,
                        quality_score: 1.0,
                        anomalous: false,
                    },
                    // Memberships are unknown until the next fix evaluates;
                    // version 0 marks the state as pre-evaluation.
                    memberships: std::collections::HashSet::new(),
                    snapshot_version: 0,
                    evaluated_at: record.ingest_ts,
                    sos_active: false,
                },
            );
            warmed += 1;
        }
        if warmed > 0 {
            tracing::info!(count = warmed, "Warmed tourist state from hot cache");
        }
    }

    // ========================================================================
    // SOS injection (narrow interface for the external SOS subsystem)
    // ========================================================================

    /// Inject an SOS transition for `tourist`.
    ///
    /// `triggered` pins the SOS status; `false` resolves it. The alert
    /// position comes from the tourist's latest fix, or from `position`
    /// for tourists the engine has never seen.
    ///
    /// # Errors
    ///
    /// `RateLimited` on an exhausted SOS bucket; `NotFound` when the
    /// tourist is unknown and no position was supplied.
    pub async fn inject_sos(
        &self,
        tourist: &TouristId,
        triggered: bool,
        position: Option<GeoPoint>,
    ) -> Result<Option<Alert>> {
        self.limiter
            .check_and_record(tourist.as_str(), EndpointClass::Sos)
            .await?;

        let state = self.state.set_sos(tourist, triggered).await;
        let (name, alert_position) = match (&state, position) {
            (Some(s), _) => (s.name.clone(), s.latest.position),
            (None, Some(p)) => (tourist.to_string(), p),
            (None, None) => {
                return Err(EngineError::NotFound(format!(
                    "tourist {tourist} has no known position"
                )))
            }
        };

        let kind = if triggered {
            AlertKind::SosTriggered
        } else {
            AlertKind::SosResolved
        };
        let description = if triggered {
            format!("{name} triggered an SOS")
        } else {
            format!("SOS for {name} resolved")
        };

        let candidate = AlertCandidate {
            kind,
            tourist_id: tourist.clone(),
            tourist_name: name,
            position: alert_position,
            zone_id: None,
            zone_name: None,
            severity: Severity::High,
            description,
        };

        let emitted = self.alerts.push(candidate);
        if let Some(alert) = &emitted {
            self.publish_alert(alert).await;
        }
        Ok(emitted)
    }

    // ========================================================================
    // Zone management
    // ========================================================================

    /// Create a zone from wire geometry.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for non-authority principals, `RateLimited` on the
    /// admin bucket, `InvalidGeometry` for bad geometry.
    pub async fn create_zone(
        &self,
        principal: &Principal,
        variant: ZoneVariant,
        name: impl Into<String>,
        geometry: ZoneGeometry,
        severity: Severity,
        description: Option<String>,
    ) -> Result<Zone> {
        self.require_authority(principal, "zone management")?;
        self.limiter
            .check_and_record(&principal.id, EndpointClass::GeofencingAdmin)
            .await?;

        let polygon = match geometry {
            ZoneGeometry::Polygon(ring) => Polygon::new(ring)?,
            ZoneGeometry::Circle { center, radius_m } => Polygon::from_circle(center, radius_m)?,
        };

        let zone = self
            .registry
            .add(variant, name, polygon, severity, description)?;
        self.persist_zones();
        Ok(zone)
    }

    /// Patch a zone's mutable fields.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `RateLimited`, or `NotFound`.
    pub async fn update_zone(
        &self,
        principal: &Principal,
        id: ZoneId,
        patch: &ZonePatch,
    ) -> Result<Zone> {
        self.require_authority(principal, "zone management")?;
        self.limiter
            .check_and_record(&principal.id, EndpointClass::GeofencingAdmin)
            .await?;

        let zone = self.registry.update(id, patch)?;
        self.persist_zones();
        Ok(zone)
    }

    /// Delete a zone, leaving a tombstone for later exit alerts.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `RateLimited`, or `NotFound`.
    pub async fn delete_zone(&self, principal: &Principal, id: ZoneId) -> Result<Zone> {
        self.require_authority(principal, "zone management")?;
        self.limiter
            .check_and_record(&principal.id, EndpointClass::GeofencingAdmin)
            .await?;

        let zone = self.registry.delete(id)?;
        self.persist_zones();
        Ok(zone)
    }

    /// The current zone snapshot, readable by any authenticated principal.
    #[must_use]
    pub fn zones(&self) -> Arc<ZoneSnapshot> {
        self.registry.snapshot()
    }

    /// Restore the registry from the persisted snapshot document.
    pub async fn restore_zones(&self) {
        let Some(store) = &self.snapshot_store else {
            return;
        };
        match store.load().await {
            Ok(Some(snapshot)) => self.registry.restore(snapshot),
            Ok(None) => tracing::info!("No persisted zone snapshot; starting with empty registry"),
            Err(e) => {
                tracing::warn!(error = %e, "Zone snapshot unavailable; starting with empty registry");
            }
        }
    }

    /// Write-behind persistence of the current snapshot; the in-memory
    /// registry stays authoritative while the write is in flight.
    fn persist_zones(&self) {
        let Some(store) = &self.snapshot_store else {
            return;
        };
        let store = store.clone();
        let snapshot = self.registry.snapshot();
        tokio::spawn(async move {
            if let Err(e) = store.save(&snapshot).await {
                tracing::warn!(error = %e, version = snapshot.version, "Zone snapshot persistence failed");
            }
        });
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Latest state of every tracked tourist (authority live map).
    ///
    /// # Errors
    ///
    /// `Unauthorized` for non-authority principals.
    pub async fn live_positions(
        &self,
        principal: &Principal,
    ) -> Result<Vec<(TouristId, TouristState)>> {
        self.require_authority(principal, "live position map")?;
        Ok(self.state.snapshot_all().await)
    }

    /// One tourist's current state, for watch-start replay.
    pub async fn tourist_state(&self, tourist: &TouristId) -> Option<TouristState> {
        self.state.get(tourist).await
    }

    /// Most recent alerts, newest first.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for non-authority principals.
    pub fn recent_alerts(&self, principal: &Principal, limit: usize) -> Result<Vec<Alert>> {
        self.require_authority(principal, "alert history")?;
        Ok(self.alerts.recent(limit))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Purge history rows past their retention and drop zone tombstones.
    ///
    /// Returns purged row count; a missing or failing history store purges
    /// nothing.
    pub async fn run_compaction(&self) -> u64 {
        let tombstones = self.registry.compact();
        if tombstones > 0 {
            tracing::debug!(count = tombstones, "Dropped zone tombstones");
        }

        let Some(history) = &self.history else {
            return 0;
        };
        match history.purge_expired(self.clock.now()).await {
            Ok(purged) => {
                if purged > 0 {
                    tracing::info!(rows = purged, "Purged expired history rows");
                }
                purged
            }
            Err(e) => {
                tracing::warn!(error = %e, "History retention sweep failed");
                0
            }
        }
    }

    /// Probe history-store health for readiness reporting.
    pub async fn history_healthy(&self) -> bool {
        match &self.history {
            Some(history) => history.healthy().await.unwrap_or(false),
            None => false,
        }
    }

    /// Charge a rate-limit bucket outside the ingestion path (read
    /// endpoints, session handshakes).
    ///
    /// # Errors
    ///
    /// `RateLimited` when the bucket is exhausted.
    pub async fn check_rate(&self, principal_id: &str, class: EndpointClass) -> Result<()> {
        self.limiter.check_and_record(principal_id, class).await
    }

    fn require_authority(&self, principal: &Principal, what: &str) -> Result<()> {
        if principal.is_authority() {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(format!(
                "{what} requires an authority session"
            )))
        }
    }
}
