//! Persistence adapter traits and their backing implementations.
//!
//! Two tiers with different contracts:
//! - [`LiveCache`] is best-effort: write failures are logged and never fail
//!   ingestion; reads only warm in-memory state at startup.
//! - [`HistoryStore`] is required for analytics but optional for live
//!   tracking: when it is down the engine runs degraded and keeps alerting.
//!
//! [`ZoneSnapshotStore`] persists the zone registry document so zones
//! survive restarts; the in-memory registry stays authoritative during the
//! write-behind window.
//!
//! All traits use explicit `Pin<Box<dyn Future>>` returns so the engine can
//! hold them as trait objects.

pub mod postgres;
pub mod redis;

use crate::error::Result;
use crate::types::{TouristId, ZoneSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

pub use self::postgres::PostgresHistoryStore;
pub use self::redis::{RedisConsentGate, RedisLiveCache, RedisZoneSnapshotStore};

/// Boxed future alias used by the adapter traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Serialized latest-position record kept in the hot cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LivePosition {
    /// Tourist the record belongs to.
    pub tourist_id: TouristId,
    /// Display name at the latest fix.
    pub name: String,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
    /// Reported accuracy in meters.
    pub accuracy_m: Option<f64>,
    /// Client timestamp of the latest fix.
    pub client_ts: DateTime<Utc>,
    /// Server timestamp of the latest fix.
    pub ingest_ts: DateTime<Utc>,
    /// Whether anonymization was applied; anonymized records are skipped
    /// when warming in-memory state.
    pub anonymized: bool,
}

/// One append-only history row.
///
/// `tourist_key` is the cleartext id, or the stable salted hash when the
/// row is anonymized; a row never mixes the two forms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    /// Cleartext id or salted hash, per `anonymized`.
    pub tourist_key: String,
    /// Display name, masked when anonymized.
    pub tourist_name: String,
    /// Latitude, coarsened when anonymized.
    pub lat: f64,
    /// Longitude, coarsened when anonymized.
    pub lon: f64,
    /// Reported accuracy in meters.
    pub accuracy_m: Option<f64>,
    /// Server clock at acceptance.
    pub server_ts: DateTime<Utc>,
    /// Client-reported timestamp.
    pub client_ts: DateTime<Utc>,
    /// Speed in m/s.
    pub speed_mps: Option<f64>,
    /// Heading in degrees.
    pub heading_deg: Option<f64>,
    /// Meters from the previous accepted fix.
    pub distance_from_prev_m: Option<f64>,
    /// Seconds from the previous accepted fix.
    pub secs_from_prev: Option<f64>,
    /// Advisory quality score in [0, 1].
    pub quality_score: f64,
    /// Anomaly heuristic flag.
    pub anomalous: bool,
    /// Zone snapshot version the fix was evaluated against.
    pub snapshot_version: u64,
    /// Whether anonymization was applied to this row.
    pub anonymized: bool,
    /// Retention applied to this row, in days.
    pub retention_days: u16,
}

/// Best-effort hot cache of latest positions.
pub trait LiveCache: Send + Sync {
    /// Upsert the latest position for a tourist.
    fn put(&self, position: &LivePosition) -> StoreFuture<'_, ()>;

    /// Load every cached position, used to warm state at startup.
    fn load_all(&self) -> StoreFuture<'_, Vec<LivePosition>>;

    /// Remove a tourist's record.
    fn remove<'a>(&'a self, tourist: &'a TouristId) -> StoreFuture<'a, ()>;
}

/// Append-only history store with a minimal analytics read surface.
pub trait HistoryStore: Send + Sync {
    /// Append one accepted fix.
    fn append<'a>(&'a self, row: &'a HistoryRow) -> StoreFuture<'a, ()>;

    /// Most recent rows for one tourist key, newest first.
    fn recent_track<'a>(&'a self, tourist_key: &'a str, limit: u32)
        -> StoreFuture<'a, Vec<HistoryRow>>;

    /// Delete rows older than their own retention. Returns rows purged.
    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64>;

    /// Cheap connectivity probe for readiness checks.
    fn healthy(&self) -> StoreFuture<'_, bool>;
}

/// Durable document holding the zone registry.
pub trait ZoneSnapshotStore: Send + Sync {
    /// Persist the current snapshot (write-behind).
    fn save<'a>(&'a self, snapshot: &'a ZoneSnapshot) -> StoreFuture<'a, ()>;

    /// Load the persisted snapshot, `None` when absent.
    fn load(&self) -> StoreFuture<'_, Option<ZoneSnapshot>>;
}
