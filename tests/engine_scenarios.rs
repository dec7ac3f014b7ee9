//! End-to-end engine scenarios: consent gating, rate limits, geofence
//! edges, jitter suppression, and dependency degradation.
//!
//! Each test wires a fresh engine out of in-memory providers and a manual
//! clock, then drives it exactly like the HTTP/WebSocket layer does.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code
#![allow(clippy::too_many_lines)] // Scenario tests read top to bottom

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tourguard::clock::{Clock, ManualClock};
use tourguard::config::{EngineConfig, LimitRule, RateLimitConfig};
use tourguard::engine::ingest::FixSubmission;
use tourguard::engine::{Engine, EngineEvent, IngestOutcome, ZoneGeometry};
use tourguard::error::EngineError;
use tourguard::geo::GeoPoint;
use tourguard::hub;
use tourguard::mocks::{
    MemoryHistoryStore, MemoryLiveCache, MemoryZoneSnapshotStore, MockConsentGate,
};
use tourguard::types::{
    AlertKind, Principal, Role, Severity, TouristId, TouristStatus, ZoneVariant,
};

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    clock: Arc<ManualClock>,
    engine: Arc<Engine>,
    consent: MockConsentGate,
    history: MemoryHistoryStore,
    cache: MemoryLiveCache,
    snapshots: MemoryZoneSnapshotStore,
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        max_future_skew_secs: 60,
        max_regression_secs: 60,
        alert_ring_capacity: 1000,
        alert_dedup_window_secs: 2,
        consent_timeout_ms: 500,
        history_timeout_ms: 2000,
        compactor_interval_secs: 3600,
        state_shards: 8,
        strict_history: false,
        allow_impersonation: false,
        anonymize_salt: "test-salt".into(),
    }
}

fn rate_limits() -> RateLimitConfig {
    RateLimitConfig {
        general: LimitRule { max_requests: 2000, window_secs: 900 },
        auth: LimitRule { max_requests: 5, window_secs: 900 },
        position: LimitRule { max_requests: 20, window_secs: 60 },
        sos: LimitRule { max_requests: 10, window_secs: 300 },
        geofencing_admin: LimitRule { max_requests: 20, window_secs: 900 },
    }
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let consent = MockConsentGate::new();
    let history = MemoryHistoryStore::new();
    let cache = MemoryLiveCache::new();
    let snapshots = MemoryZoneSnapshotStore::new();

    let engine = Engine::new(
        clock.clone(),
        engine_config(),
        rate_limits(),
        Arc::new(consent.clone()),
        Some(Arc::new(history.clone())),
        Some(Arc::new(cache.clone())),
        Some(Arc::new(snapshots.clone())),
    );

    Harness {
        clock,
        engine,
        consent,
        history,
        cache,
        snapshots,
    }
}

fn tourist(id: &str, name: &str) -> Principal {
    Principal {
        id: id.to_string(),
        name: name.to_string(),
        role: Role::Tourist,
    }
}

fn authority() -> Principal {
    Principal {
        id: "op-1".to_string(),
        name: "Operator".to_string(),
        role: Role::Authority,
    }
}

fn fix(lat: f64, lon: f64, ts: DateTime<Utc>) -> FixSubmission {
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

/// The restricted polygon from the Delhi test fixture, wire order
/// `[lng, lat]` converted to points.
fn delhi_restricted_ring() -> Vec<GeoPoint> {
    [
        [77.2090, 28.6139],
        [77.2090, 28.6149],
        [77.2100, 28.6149],
        [77.2100, 28.6139],
        [77.2090, 28.6139],
    ]
    .iter()
    .map(|c| GeoPoint { lat: c[1], lon: c[0] })
    .collect()
}

async fn drain(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Scenario 1: consent-gated accept
// ============================================================================

#[tokio::test]
async fn consented_fix_inside_restricted_zone_breaches_and_persists() {
    let h = harness();
    let op = authority();

    h.engine
        .create_zone(
            &op,
            ZoneVariant::Restricted,
            "R",
            ZoneGeometry::Polygon(delhi_restricted_ring()),
            Severity::High,
            None,
        )
        .await
        .expect("restricted zone");
    h.engine
        .create_zone(
            &op,
            ZoneVariant::Safe,
            "S",
            ZoneGeometry::Circle {
                center: GeoPoint { lat: 28.6139, lon: 77.2090 },
                radius_m: 1000.0,
            },
            Severity::Medium,
            None,
        )
        .await
        .expect("safe circle");

    let t1 = tourist("t1", "Asha");
    let id = t1.tourist_id();
    h.consent.grant(&id, false, 30);

    let mut authorities = h.engine.hub().subscribe(hub::AUTHORITIES_ROOM).await;
    let mut user_room = h.engine.hub().subscribe(hub::user_room(&id)).await;
    let mut watch = h.engine.hub().subscribe(hub::watch_room(&id)).await;

    let outcome = h
        .engine
        .ingest(&t1, &id, fix(28.6142, 77.2095, h.clock.now()))
        .await
        .expect("accepted");

    let IngestOutcome::Accepted(accepted) = outcome else {
        panic!("expected acceptance");
    };
    assert!(accepted.in_restricted);
    assert!(accepted.in_safe);
    assert_eq!(accepted.alerts.len(), 1);
    let alert = &accepted.alerts[0];
    assert_eq!(alert.kind, AlertKind::GeofenceBreach);
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.zone_name.as_deref(), Some("R"));
    assert_eq!(alert.tourist_name, "Asha");

    // Authorities room observed the breach.
    let events = drain(&mut authorities).await;
    assert!(matches!(&events[..], [EngineEvent::Alert(a)] if a.kind == AlertKind::GeofenceBreach));

    // Private room observed the zone status.
    let events = drain(&mut user_room).await;
    assert!(matches!(
        &events[..],
        [EngineEvent::ZoneStatus { in_restricted: true, in_safe: true, .. }]
    ));

    // Watchers saw the position change before the alert.
    let events = drain(&mut watch).await;
    assert!(matches!(events[0], EngineEvent::LocationChanged { .. }));
    assert!(matches!(&events[1], EngineEvent::Alert(_)));

    // One history row, cleartext.
    let rows = h.history.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tourist_key, "t1");
    assert!(!rows[0].anonymized);
    assert_eq!(rows[0].snapshot_version, 2);

    // Hot cache carries the latest fix.
    let cached = h.cache.get(&id).expect("cached");
    assert!((cached.lat - 28.6142).abs() < 1e-9);
}

// ============================================================================
// Scenario 2: consent missing
// ============================================================================

#[tokio::test]
async fn missing_consent_rejects_without_effects() {
    let h = harness();
    let t2 = tourist("t2", "Ben");
    let id = t2.tourist_id();

    let mut watch = h.engine.hub().subscribe(hub::watch_room(&id)).await;

    let result = h.engine.ingest(&t2, &id, fix(28.61, 77.21, h.clock.now())).await;
    assert!(matches!(result, Err(EngineError::ConsentRequired)));

    assert!(h.history.rows().is_empty());
    assert!(drain(&mut watch).await.is_empty());
    assert!(h.engine.tourist_state(&id).await.is_none());
    assert!(h.cache.get(&id).is_none());
}

// ============================================================================
// Scenario 3: rate limit
// ============================================================================

#[tokio::test]
async fn twenty_first_fix_in_a_minute_is_rate_limited() {
    let h = harness();
    let t3 = tourist("t3", "Cai");
    let id = t3.tourist_id();
    h.consent.grant(&id, false, 30);

    let mut watch = h.engine.hub().subscribe(hub::watch_room(&id)).await;

    for i in 0..20 {
        h.clock.advance(Duration::seconds(1));
        let outcome = h
            .engine
            .ingest(&t3, &id, fix(28.61, 77.21, h.clock.now()))
            .await
            .unwrap_or_else(|e| panic!("fix {i} should be accepted: {e}"));
        assert!(matches!(outcome, IngestOutcome::Accepted(_)));
    }

    h.clock.advance(Duration::seconds(1));
    let result = h.engine.ingest(&t3, &id, fix(28.61, 77.21, h.clock.now())).await;
    let Err(EngineError::RateLimited { retry_after }) = result else {
        panic!("21st fix should be rate limited");
    };
    assert!(retry_after.as_secs() <= 60);

    // Exactly 20 rows and 20 broadcasts; the limited fix left no trace.
    assert_eq!(h.history.rows().len(), 20);
    let events = drain(&mut watch).await;
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, EngineEvent::LocationChanged { .. }))
            .count(),
        20
    );
}

// ============================================================================
// Scenario 4: exit from safe
// ============================================================================

#[tokio::test]
async fn leaving_last_safe_zone_alerts_medium() {
    let h = harness();
    let op = authority();

    h.engine
        .create_zone(
            &op,
            ZoneVariant::Safe,
            "S_safe",
            ZoneGeometry::Circle {
                center: GeoPoint { lat: 28.6139, lon: 77.2090 },
                radius_m: 1000.0,
            },
            Severity::Medium,
            None,
        )
        .await
        .expect("safe zone");

    let t4 = tourist("t4", "Dia");
    let id = t4.tourist_id();
    h.consent.grant(&id, false, 30);

    // Establish membership inside the safe circle.
    let outcome = h
        .engine
        .ingest(&t4, &id, fix(28.6139, 77.2090, h.clock.now()))
        .await
        .expect("inside accepted");
    let IngestOutcome::Accepted(inside) = outcome else {
        panic!("expected acceptance");
    };
    assert!(inside.in_safe);
    assert!(inside.alerts.is_empty(), "entering a safe zone is not an alert");

    // Move well outside every zone.
    h.clock.advance(Duration::seconds(30));
    let outcome = h
        .engine
        .ingest(&t4, &id, fix(28.70, 77.30, h.clock.now()))
        .await
        .expect("outside accepted");
    let IngestOutcome::Accepted(outside) = outcome else {
        panic!("expected acceptance");
    };

    assert_eq!(outside.alerts.len(), 1);
    assert_eq!(outside.alerts[0].kind, AlertKind::SafeZoneExit);
    assert_eq!(outside.alerts[0].severity, Severity::Medium);
    assert!(!outside.in_safe);
    assert!(!outside.in_restricted);
}

// ============================================================================
// Scenario 5: jitter suppression
// ============================================================================

#[tokio::test]
async fn boundary_jitter_collapses_to_one_breach() {
    let h = harness();
    let op = authority();

    h.engine
        .create_zone(
            &op,
            ZoneVariant::Restricted,
            "R",
            ZoneGeometry::Polygon(delhi_restricted_ring()),
            Severity::High,
            None,
        )
        .await
        .expect("restricted zone");

    let t5 = tourist("t5", "Eka");
    let id = t5.tourist_id();
    h.consent.grant(&id, false, 30);

    let mut watch = h.engine.hub().subscribe(hub::watch_room(&id)).await;

    // Enter, jitter out, jitter back in, all within the 2 s dedup window.
    let mut breaches = 0;
    for (lat, lon, offset_ms) in [
        (28.6142, 77.2095, 0),
        (28.6160, 77.2095, 700),
        (28.6142, 77.2095, 1400),
    ] {
        let ts = start_time() + Duration::milliseconds(offset_ms);
        h.clock.set(ts);
        let outcome = h
            .engine
            .ingest(&t5, &id, fix(lat, lon, ts))
            .await
            .expect("accepted");
        if let IngestOutcome::Accepted(accepted) = outcome {
            breaches += accepted
                .alerts
                .iter()
                .filter(|a| a.kind == AlertKind::GeofenceBreach)
                .count();
        }
    }
    assert_eq!(breaches, 1, "re-entry within 2 s must collapse");

    let events = drain(&mut watch).await;
    let location_changes = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::LocationChanged { .. }))
        .count();
    assert_eq!(location_changes, 3, "every accepted fix broadcasts");
    let alerts = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::Alert(_)))
        .count();
    assert_eq!(alerts, 1);
}

// ============================================================================
// Scenario 6: dependency degradation
// ============================================================================

#[tokio::test]
async fn history_outage_degrades_but_keeps_tracking() {
    let h = harness();
    let t6 = tourist("t6", "Fay");
    let id = t6.tourist_id();
    h.consent.grant(&id, false, 30);

    h.history.set_failing(true);
    let mut watch = h.engine.hub().subscribe(hub::watch_room(&id)).await;

    let outcome = h
        .engine
        .ingest(&t6, &id, fix(28.61, 77.21, h.clock.now()))
        .await
        .expect("fix accepted despite history outage");
    assert!(matches!(outcome, IngestOutcome::Accepted(_)));

    assert!(h.engine.is_degraded());
    assert!(h.history.rows().is_empty());
    let events = drain(&mut watch).await;
    assert!(matches!(events[0], EngineEvent::LocationChanged { .. }));

    // Recovery clears the degraded flag on the next successful append.
    h.history.set_failing(false);
    h.clock.advance(Duration::seconds(5));
    h.engine
        .ingest(&t6, &id, fix(28.62, 77.22, h.clock.now()))
        .await
        .expect("accepted");
    assert!(!h.engine.is_degraded());
    assert_eq!(h.history.rows().len(), 1);
}

// ============================================================================
// Invariants
// ============================================================================

#[tokio::test]
async fn membership_matches_containment_at_recorded_version() {
    let h = harness();
    let op = authority();

    let zone = h
        .engine
        .create_zone(
            &op,
            ZoneVariant::Restricted,
            "R",
            ZoneGeometry::Polygon(delhi_restricted_ring()),
            Severity::Low,
            None,
        )
        .await
        .expect("zone");

    let t = tourist("t7", "Gil");
    let id = t.tourist_id();
    h.consent.grant(&id, false, 30);

    h.engine
        .ingest(&t, &id, fix(28.6142, 77.2095, h.clock.now()))
        .await
        .expect("accepted");

    let state = h.engine.tourist_state(&id).await.expect("state");
    let snapshot = h.engine.zones();
    assert_eq!(state.snapshot_version, snapshot.version);

    let point = state.latest.position;
    for z in snapshot.zones() {
        assert_eq!(
            state.memberships.contains(&z.id),
            z.polygon.contains(point),
            "membership set must mirror containment for zone {}",
            z.id
        );
    }
    assert!(state.memberships.contains(&zone.id));
}

#[tokio::test]
async fn out_of_order_fix_drops_silently_without_effects() {
    let h = harness();
    let t = tourist("t8", "Hana");
    let id = t.tourist_id();
    h.consent.grant(&id, false, 30);

    let first_ts = h.clock.now();
    h.engine
        .ingest(&t, &id, fix(28.61, 77.21, first_ts))
        .await
        .expect("accepted");

    let mut watch = h.engine.hub().subscribe(hub::watch_room(&id)).await;

    // Clock moves on, but the client timestamp regressed.
    h.clock.advance(Duration::seconds(10));
    let outcome = h
        .engine
        .ingest(&t, &id, fix(28.62, 77.22, first_ts - Duration::seconds(5)))
        .await
        .expect("silent drop is not an error");
    assert!(matches!(outcome, IngestOutcome::DroppedOutOfOrder));

    // Nothing observable: no broadcast, no history row, state unchanged.
    assert!(drain(&mut watch).await.is_empty());
    assert_eq!(h.history.rows().len(), 1);
    let state = h.engine.tourist_state(&id).await.expect("state");
    assert_eq!(state.latest.client_ts, first_ts);
}

#[tokio::test]
async fn anonymized_rows_are_coarse_and_unlinkable() {
    let h = harness();
    let t = tourist("t9", "Indira");
    let id = t.tourist_id();
    h.consent.grant(&id, true, 7);

    h.engine
        .ingest(&t, &id, fix(28.613_901, 77.209_456, h.clock.now()))
        .await
        .expect("accepted");

    let rows = h.history.rows();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert!(row.anonymized);
    assert_ne!(row.tourist_key, "t9", "cleartext id must not appear");
    assert_eq!(row.tourist_key.len(), 64, "salted hash stands in for the id");
    assert!((row.lat - 28.61).abs() < 1e-9);
    assert!((row.lon - 77.21).abs() < 1e-9);
    assert_eq!(row.tourist_name, "I******");
    assert_eq!(row.retention_days, 7);

    // The hot-cache record is anonymized the same way.
    assert!(h.cache.get(&id).is_none(), "cleartext key must not be cached");
}

#[tokio::test]
async fn sos_pins_status_until_resolved() {
    let h = harness();
    let t = tourist("t10", "Jo");
    let id = t.tourist_id();
    h.consent.grant(&id, false, 30);

    h.engine
        .ingest(&t, &id, fix(28.61, 77.21, h.clock.now()))
        .await
        .expect("accepted");

    let mut authorities = h.engine.hub().subscribe(hub::AUTHORITIES_ROOM).await;

    let alert = h
        .engine
        .inject_sos(&id, true, None)
        .await
        .expect("sos accepted")
        .expect("alert emitted");
    assert_eq!(alert.kind, AlertKind::SosTriggered);
    assert_eq!(alert.severity, Severity::High);

    let state = h.engine.tourist_state(&id).await.expect("state");
    assert!(state.sos_active);
    assert_eq!(state.status(false), TouristStatus::Sos);

    // Status stays pinned across ordinary fixes.
    h.clock.advance(Duration::seconds(5));
    h.engine
        .ingest(&t, &id, fix(28.615, 77.215, h.clock.now()))
        .await
        .expect("accepted");
    let state = h.engine.tourist_state(&id).await.expect("state");
    assert!(state.sos_active);

    let resolved = h
        .engine
        .inject_sos(&id, false, None)
        .await
        .expect("resolution accepted")
        .expect("alert emitted");
    assert_eq!(resolved.kind, AlertKind::SosResolved);

    let state = h.engine.tourist_state(&id).await.expect("state");
    assert!(!state.sos_active);
    assert_eq!(state.status(false), TouristStatus::Safe);

    let events = drain(&mut authorities).await;
    assert_eq!(events.len(), 2, "trigger and resolve both reach authorities");
}

#[tokio::test]
async fn consent_deadline_fails_closed() {
    let clock = Arc::new(ManualClock::new(start_time()));
    let mut config = engine_config();
    config.consent_timeout_ms = 50;

    let slow_consent = MockConsentGate::new().with_delay(std::time::Duration::from_millis(500));
    let t = tourist("t11", "Kai");
    let id = t.tourist_id();
    slow_consent.grant(&id, false, 30);

    let engine = Engine::new(
        clock.clone(),
        config,
        rate_limits(),
        Arc::new(slow_consent),
        None,
        None,
        None,
    );

    let result = engine.ingest(&t, &id, fix(28.61, 77.21, clock.now())).await;
    assert!(matches!(result, Err(EngineError::DependencyUnavailable(_))));
    assert!(engine.tourist_state(&id).await.is_none());
}

#[tokio::test]
async fn cross_tourist_submission_requires_impersonation() {
    let h = harness();
    let t = tourist("t12", "Lena");
    let other = TouristId::new("someone-else");
    h.consent.grant(&other, false, 30);

    let result = h.engine.ingest(&t, &other, fix(28.61, 77.21, h.clock.now())).await;
    assert!(matches!(result, Err(EngineError::Unauthorized(_))));

    // Authorities are equally rejected while impersonation is disabled.
    let result = h
        .engine
        .ingest(&authority(), &other, fix(28.61, 77.21, h.clock.now()))
        .await;
    assert!(matches!(result, Err(EngineError::Unauthorized(_))));
}

#[tokio::test]
async fn live_map_and_alert_history_are_authority_only() {
    let h = harness();
    let t = tourist("t13", "Mo");

    assert!(matches!(
        h.engine.live_positions(&t).await,
        Err(EngineError::Unauthorized(_))
    ));
    assert!(matches!(
        h.engine.recent_alerts(&t, 50),
        Err(EngineError::Unauthorized(_))
    ));

    assert!(h.engine.live_positions(&authority()).await.is_ok());
    assert!(h.engine.recent_alerts(&authority(), 50).is_ok());
}
