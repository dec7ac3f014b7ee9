//! Redis-backed hot cache and zone snapshot document.
//!
//! The hot cache is a projection of live positions for other processes:
//! one hash (`live_positions`) mapping tourist id to the latest-fix JSON.
//! The zone snapshot document (`geofence_zones`) holds the whole registry
//! as one JSON value, written behind the in-memory swap.
//!
//! Both stores are weak dependencies: every error maps to
//! `DependencyUnavailable` and callers decide whether to degrade.

use super::{LivePosition, StoreFuture, ZoneSnapshotStore};
use crate::consent::ConsentGate;
use crate::error::{EngineError, Result};
use crate::types::{ConsentDecision, ConsentRecord, TouristId, ZoneSnapshot};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::pin::Pin;

/// Hash key holding tourist id → latest fix JSON.
const LIVE_POSITIONS_KEY: &str = "live_positions";

/// String key holding the zone registry document.
const ZONE_SNAPSHOT_KEY: &str = "geofence_zones";

fn unavailable(context: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::DependencyUnavailable(format!("{context}: {e}"))
}

/// Redis hot cache of latest positions.
#[derive(Clone)]
pub struct RedisLiveCache {
    conn_manager: ConnectionManager,
}

impl RedisLiveCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// `DependencyUnavailable` when the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client =
            Client::open(redis_url).map_err(|e| unavailable("Failed to create Redis client", e))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| unavailable("Failed to create Redis connection manager", e))?;
        Ok(Self { conn_manager })
    }
}

impl RedisLiveCache {
    /// Share an existing connection manager.
    #[must_use]
    pub const fn from_connection(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

impl super::LiveCache for RedisLiveCache {
    fn put(&self, position: &LivePosition) -> StoreFuture<'_, ()> {
        let mut conn = self.conn_manager.clone();
        let field = position.tourist_id.to_string();
        let payload = serde_json::to_string(position);
        Box::pin(async move {
            let payload =
                payload.map_err(|e| EngineError::Internal(format!("serialize live position: {e}")))?;
            let _: () = conn
                .hset(LIVE_POSITIONS_KEY, field, payload)
                .await
                .map_err(|e| unavailable("Failed to write live position", e))?;
            Ok(())
        })
    }

    fn load_all(&self) -> StoreFuture<'_, Vec<LivePosition>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let entries: std::collections::HashMap<String, String> = conn
                .hgetall(LIVE_POSITIONS_KEY)
                .await
                .map_err(|e| unavailable("Failed to read live positions", e))?;

            let mut positions = Vec::with_capacity(entries.len());
            for (field, payload) in entries {
                match serde_json::from_str::<LivePosition>(&payload) {
                    Ok(position) => positions.push(position),
                    Err(e) => {
                        // A malformed record only loses one warm entry.
                        tracing::warn!(tourist_id = %field, error = %e, "Skipping malformed live position");
                    }
                }
            }
            Ok(positions)
        })
    }

    fn remove<'a>(&'a self, tourist: &'a TouristId) -> StoreFuture<'a, ()> {
        let mut conn = self.conn_manager.clone();
        let field = tourist.to_string();
        Box::pin(async move {
            let _: () = conn
                .hdel(LIVE_POSITIONS_KEY, field)
                .await
                .map_err(|e| unavailable("Failed to remove live position", e))?;
            Ok(())
        })
    }
}

/// Redis-backed zone snapshot document.
#[derive(Clone)]
pub struct RedisZoneSnapshotStore {
    conn_manager: ConnectionManager,
}

impl RedisZoneSnapshotStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// `DependencyUnavailable` when the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client =
            Client::open(redis_url).map_err(|e| unavailable("Failed to create Redis client", e))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| unavailable("Failed to create Redis connection manager", e))?;
        Ok(Self { conn_manager })
    }

    /// Share an existing connection manager with the live cache.
    #[must_use]
    pub const fn from_connection(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

/// Redis-backed consent gate.
///
/// The external privacy-preference surface owns these records and writes
/// them under `consent:<tourist>`; the engine only reads. Absence means no
/// consent, exactly like an explicit denial.
#[derive(Clone)]
pub struct RedisConsentGate {
    conn_manager: ConnectionManager,
}

impl RedisConsentGate {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// `DependencyUnavailable` when the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client =
            Client::open(redis_url).map_err(|e| unavailable("Failed to create Redis client", e))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| unavailable("Failed to create Redis connection manager", e))?;
        Ok(Self { conn_manager })
    }

    /// Share an existing connection manager.
    #[must_use]
    pub const fn from_connection(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    fn consent_key(tourist: &TouristId) -> String {
        format!("consent:{tourist}")
    }
}

impl ConsentGate for RedisConsentGate {
    fn allow<'a>(
        &'a self,
        tourist: &'a TouristId,
    ) -> Pin<Box<dyn Future<Output = Result<ConsentDecision>> + Send + 'a>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let payload: Option<String> = conn
                .get(Self::consent_key(tourist))
                .await
                .map_err(|e| unavailable("Consent lookup failed", e))?;

            let Some(json) = payload else {
                return Err(EngineError::ConsentRequired);
            };
            let record: ConsentRecord = serde_json::from_str(&json).map_err(|e| {
                tracing::error!(tourist_id = %tourist, error = %e, "Malformed consent record");
                EngineError::ConsentRequired
            })?;

            if record.consent_given && record.location_sharing {
                Ok(ConsentDecision {
                    anonymize: record.anonymize,
                    retention_days: record.retention_days.clamp(1, 365),
                })
            } else {
                Err(EngineError::ConsentRequired)
            }
        })
    }
}

impl ZoneSnapshotStore for RedisZoneSnapshotStore {
    fn save<'a>(&'a self, snapshot: &'a ZoneSnapshot) -> StoreFuture<'a, ()> {
        let mut conn = self.conn_manager.clone();
        let payload = serde_json::to_string(snapshot);
        Box::pin(async move {
            let payload =
                payload.map_err(|e| EngineError::Internal(format!("serialize zone snapshot: {e}")))?;
            let _: () = conn
                .set(ZONE_SNAPSHOT_KEY, payload)
                .await
                .map_err(|e| unavailable("Failed to persist zone snapshot", e))?;
            Ok(())
        })
    }

    fn load(&self) -> StoreFuture<'_, Option<ZoneSnapshot>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let payload: Option<String> = conn
                .get(ZONE_SNAPSHOT_KEY)
                .await
                .map_err(|e| unavailable("Failed to load zone snapshot", e))?;

            match payload {
                Some(json) => {
                    let snapshot = serde_json::from_str(&json).map_err(|e| {
                        EngineError::Internal(format!("deserialize zone snapshot: {e}"))
                    })?;
                    Ok(Some(snapshot))
                }
                None => Ok(None),
            }
        })
    }
}
