//! Domain types for the tourist-safety tracking engine.
//!
//! Identifiers, position fixes, zones, alerts, consent records, and the
//! principals resolved from authenticated sessions. Associations between
//! entities are id-based; nothing here holds back-pointers.

use crate::geo::{GeoPoint, Polygon};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque tourist identifier issued by the external identity system.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TouristId(String);

impl TouristId {
    /// Wrap an opaque identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TouristId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(Uuid);

impl ZoneId {
    /// Creates a new random `ZoneId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ZoneId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ZoneId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    /// Creates a new random `AlertId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Principals
// ============================================================================

/// Role carried by an authenticated session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Mobile client streaming its own position.
    Tourist,
    /// Operator observing tourists and managing zones.
    Authority,
}

/// Identity resolved from an authenticated session.
///
/// For tourists, `id` equals the tourist id their fixes are keyed by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Opaque principal identifier.
    pub id: String,
    /// Display name at session creation time.
    pub name: String,
    /// Session role.
    pub role: Role,
}

impl Principal {
    /// The tourist id this principal submits fixes for.
    #[must_use]
    pub fn tourist_id(&self) -> TouristId {
        TouristId::new(self.id.clone())
    }

    /// Returns `true` for authority sessions.
    #[must_use]
    pub const fn is_authority(&self) -> bool {
        matches!(self.role, Role::Authority)
    }
}

// ============================================================================
// Position fixes
// ============================================================================

/// Free-form device descriptor attached to a fix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device model or platform string.
    pub model: Option<String>,
    /// OS name and version.
    pub os: Option<String>,
    /// Battery level in percent, when reported.
    pub battery: Option<f64>,
}

/// Free-form network descriptor attached to a fix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Connection type (wifi, cellular, ...).
    pub connection: Option<String>,
    /// Carrier name, when reported.
    pub carrier: Option<String>,
}

/// An accepted, immutable position fix with derived kinematics.
///
/// `speed_mps` and `heading_deg` are taken from the client when provided and
/// otherwise derived from the previous accepted fix. `distance_from_prev_m`
/// and `secs_from_prev` are `None` for a tourist's first fix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Position in WGS84.
    pub position: GeoPoint,
    /// Reported horizontal accuracy in meters.
    pub accuracy_m: Option<f64>,
    /// Speed in meters per second.
    pub speed_mps: Option<f64>,
    /// Heading in degrees, [0, 360).
    pub heading_deg: Option<f64>,
    /// Client-reported timestamp; monotonic per tourist.
    pub client_ts: DateTime<Utc>,
    /// Server clock at acceptance.
    pub ingest_ts: DateTime<Utc>,
    /// Optional device descriptor.
    pub device: Option<DeviceInfo>,
    /// Optional network descriptor.
    pub network: Option<NetworkInfo>,
    /// Meters travelled since the previous accepted fix.
    pub distance_from_prev_m: Option<f64>,
    /// Seconds elapsed since the previous accepted fix.
    pub secs_from_prev: Option<f64>,
    /// Advisory quality score in [0, 1].
    pub quality_score: f64,
    /// Set when the fix trips an anomaly heuristic.
    pub anomalous: bool,
}

// ============================================================================
// Tourist state
// ============================================================================

/// Derived safety status of a tourist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouristStatus {
    /// Not inside any restricted zone, no active SOS.
    Safe,
    /// Inside at least one restricted zone.
    Risk,
    /// Active SOS record pins the status.
    Sos,
}

/// Per-tourist live state owned by the engine.
#[derive(Clone, Debug)]
pub struct TouristState {
    /// Display name at the most recent accepted fix.
    pub name: String,
    /// Most recent accepted fix.
    pub latest: Fix,
    /// Zones containing the latest fix.
    pub memberships: HashSet<ZoneId>,
    /// Registry snapshot version `memberships` was evaluated against.
    pub snapshot_version: u64,
    /// When the membership set was last evaluated.
    pub evaluated_at: DateTime<Utc>,
    /// True while the external SOS subsystem has an active SOS.
    pub sos_active: bool,
}

impl TouristState {
    /// Derived status: SOS pins, restricted membership pins risk, else safe.
    #[must_use]
    pub fn status(&self, in_restricted: bool) -> TouristStatus {
        if self.sos_active {
            TouristStatus::Sos
        } else if in_restricted {
            TouristStatus::Risk
        } else {
            TouristStatus::Safe
        }
    }
}

// ============================================================================
// Zones
// ============================================================================

/// Zone classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneVariant {
    /// Entering fires a breach alert.
    Restricted,
    /// Leaving the last safe zone fires an exit alert.
    Safe,
}

/// Alert severity attached to zones and alerts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Low,
    /// Needs operator attention.
    Medium,
    /// Immediate response expected.
    High,
}

/// A geofenced zone.
///
/// Circles are normalized to polygons at registration; `variant` plus the
/// original shape tag are kept for reporting only, so containment always
/// runs on one geometry type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Server-assigned stable id.
    pub id: ZoneId,
    /// Human-readable name; duplicates are tolerated.
    pub name: String,
    /// Restricted or safe.
    pub variant: ZoneVariant,
    /// Closed simple polygon in WGS84.
    pub polygon: Polygon,
    /// Severity inherited by breach alerts.
    pub severity: Severity,
    /// Inactive zones are kept but not evaluated.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Optional operator description.
    pub description: Option<String>,
}

/// Compact zone reference carried by status payloads and alerts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneBrief {
    /// Zone id.
    pub id: ZoneId,
    /// Zone name.
    pub name: String,
    /// Zone severity.
    pub severity: Severity,
}

impl From<&Zone> for ZoneBrief {
    fn from(zone: &Zone) -> Self {
        Self {
            id: zone.id,
            name: zone.name.clone(),
            severity: zone.severity,
        }
    }
}

/// Immutable, versioned view of the zone registry.
///
/// The geofence evaluator reads exactly one snapshot per fix so a single
/// evaluation never observes a half-applied mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    /// Monotonic version; starts at 0 for the empty registry.
    pub version: u64,
    /// Active restricted zones.
    pub restricted: Vec<Zone>,
    /// Active safe zones.
    pub safe: Vec<Zone>,
    /// When this version was produced.
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

impl ZoneSnapshot {
    /// The empty v0 snapshot.
    #[must_use]
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: 0,
            restricted: Vec::new(),
            safe: Vec::new(),
            last_updated: now,
        }
    }

    /// Iterate all active zones, restricted first.
    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.restricted.iter().chain(self.safe.iter())
    }

    /// Look up a zone by id.
    #[must_use]
    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones().find(|z| z.id == id)
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// What fired the alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Tourist entered a restricted zone.
    GeofenceBreach,
    /// Tourist left their last containing safe zone.
    SafeZoneExit,
    /// SOS raised by the external SOS subsystem.
    SosTriggered,
    /// SOS resolved by the external SOS subsystem.
    SosResolved,
}

/// A materialized alert fanned out to authority sessions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Server-assigned id.
    pub id: AlertId,
    /// Alert kind.
    pub kind: AlertKind,
    /// Tourist the alert concerns.
    pub tourist_id: TouristId,
    /// Tourist display name at emission time.
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
    /// Server timestamp.
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Consent
// ============================================================================

/// Per-tourist consent record resolved by the consent service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Whether the tourist shares location at all.
    pub location_sharing: bool,
    /// How long history rows are kept, in days (1..=365).
    pub retention_days: u16,
    /// Whether persisted records must be anonymized.
    pub anonymize: bool,
    /// Whether consent was explicitly given.
    pub consent_given: bool,
    /// When consent was given.
    pub consent_at: Option<DateTime<Utc>>,
}

/// Outcome of a successful consent check for one update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsentDecision {
    /// Anonymize persisted records for this tourist.
    pub anonymize: bool,
    /// Retention applied to history rows.
    pub retention_days: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_pinning_order() {
        let state = TouristState {
            name: "A".into(),
            latest: crate::testutil::fix_at(0.0, 0.0),
            memberships: HashSet::new(),
            snapshot_version: 0,
            evaluated_at: Utc::now(),
            sos_active: true,
        };
        // SOS wins over restricted membership.
        assert_eq!(state.status(true), TouristStatus::Sos);

        let mut state = state;
        state.sos_active = false;
        assert_eq!(state.status(true), TouristStatus::Risk);
        assert_eq!(state.status(false), TouristStatus::Safe);
    }

    #[test]
    fn severity_orders_low_to_high() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn zone_snapshot_lookup() {
        let now = Utc::now();
        let mut snapshot = ZoneSnapshot::empty(now);
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.zones().next().is_none());

        let zone = Zone {
            id: ZoneId::new(),
            name: "old town".into(),
            variant: ZoneVariant::Restricted,
            polygon: crate::testutil::square(0.0, 0.0, 0.01),
            severity: Severity::High,
            active: true,
            created_at: now,
            description: None,
        };
        let id = zone.id;
        snapshot.restricted.push(zone);
        assert!(snapshot.zone(id).is_some());
        assert!(snapshot.zone(ZoneId::new()).is_none());
    }
}
