//! `PostgreSQL`-backed append-only history store.
//!
//! Rows land in `location_history`, indexed on (tourist key, server
//! timestamp) for track queries and on (lat, lon) for spatial reads by the
//! external analytics surface. Retention is per-row: the compactor deletes
//! rows older than their own `retention_days`.

use super::{HistoryRow, HistoryStore, StoreFuture};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

fn storage_error(context: &str, e: sqlx::Error) -> EngineError {
    EngineError::DependencyUnavailable(format!("{context}: {e}"))
}

/// Internal row shape with database-native integer types.
#[derive(sqlx::FromRow)]
struct DbRow {
    tourist_key: String,
    tourist_name: String,
    lat: f64,
    lon: f64,
    accuracy_m: Option<f64>,
    server_ts: DateTime<Utc>,
    client_ts: DateTime<Utc>,
    speed_mps: Option<f64>,
    heading_deg: Option<f64>,
    distance_from_prev_m: Option<f64>,
    secs_from_prev: Option<f64>,
    quality_score: f64,
    anomalous: bool,
    snapshot_version: i64,
    anonymized: bool,
    retention_days: i32,
}

impl From<DbRow> for HistoryRow {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn from(row: DbRow) -> Self {
        Self {
            tourist_key: row.tourist_key,
            tourist_name: row.tourist_name,
            lat: row.lat,
            lon: row.lon,
            accuracy_m: row.accuracy_m,
            server_ts: row.server_ts,
            client_ts: row.client_ts,
            speed_mps: row.speed_mps,
            heading_deg: row.heading_deg,
            distance_from_prev_m: row.distance_from_prev_m,
            secs_from_prev: row.secs_from_prev,
            quality_score: row.quality_score,
            anomalous: row.anomalous,
            snapshot_version: row.snapshot_version.max(0) as u64,
            anonymized: row.anonymized,
            retention_days: row.retention_days.clamp(1, 365) as u16,
        }
    }
}

/// `PostgreSQL` history store.
#[derive(Clone)]
pub struct PostgresHistoryStore {
    pool: Arc<PgPool>,
}

impl PostgresHistoryStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create the history table and indexes when absent.
    ///
    /// # Errors
    ///
    /// `DependencyUnavailable` when the DDL cannot be applied.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS location_history (
                 id BIGSERIAL PRIMARY KEY,
                 tourist_key TEXT NOT NULL,
                 tourist_name TEXT NOT NULL,
                 lat DOUBLE PRECISION NOT NULL,
                 lon DOUBLE PRECISION NOT NULL,
                 accuracy_m DOUBLE PRECISION,
                 server_ts TIMESTAMPTZ NOT NULL,
                 client_ts TIMESTAMPTZ NOT NULL,
                 speed_mps DOUBLE PRECISION,
                 heading_deg DOUBLE PRECISION,
                 distance_from_prev_m DOUBLE PRECISION,
                 secs_from_prev DOUBLE PRECISION,
                 quality_score DOUBLE PRECISION NOT NULL,
                 anomalous BOOLEAN NOT NULL,
                 snapshot_version BIGINT NOT NULL,
                 anonymized BOOLEAN NOT NULL,
                 retention_days INT NOT NULL
             )",
        )
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| storage_error("Failed to create location_history", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_location_history_tourist_ts
             ON location_history (tourist_key, server_ts DESC)",
        )
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| storage_error("Failed to create tourist/timestamp index", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_location_history_spatial
             ON location_history (lat, lon)",
        )
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| storage_error("Failed to create spatial index", e))?;

        Ok(())
    }
}

impl HistoryStore for PostgresHistoryStore {
    fn append<'a>(&'a self, row: &'a HistoryRow) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO location_history (
                     tourist_key, tourist_name, lat, lon, accuracy_m,
                     server_ts, client_ts, speed_mps, heading_deg,
                     distance_from_prev_m, secs_from_prev, quality_score,
                     anomalous, snapshot_version, anonymized, retention_days
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            )
            .bind(&row.tourist_key)
            .bind(&row.tourist_name)
            .bind(row.lat)
            .bind(row.lon)
            .bind(row.accuracy_m)
            .bind(row.server_ts)
            .bind(row.client_ts)
            .bind(row.speed_mps)
            .bind(row.heading_deg)
            .bind(row.distance_from_prev_m)
            .bind(row.secs_from_prev)
            .bind(row.quality_score)
            .bind(row.anomalous)
            .bind(i64::try_from(row.snapshot_version).unwrap_or(i64::MAX))
            .bind(row.anonymized)
            .bind(i32::from(row.retention_days))
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| storage_error("Failed to append history row", e))?;
            Ok(())
        })
    }

    fn recent_track<'a>(
        &'a self,
        tourist_key: &'a str,
        limit: u32,
    ) -> StoreFuture<'a, Vec<HistoryRow>> {
        Box::pin(async move {
            let rows: Vec<DbRow> = sqlx::query_as(
                "SELECT tourist_key, tourist_name, lat, lon, accuracy_m,
                        server_ts, client_ts, speed_mps, heading_deg,
                        distance_from_prev_m, secs_from_prev, quality_score,
                        anomalous, snapshot_version, anonymized, retention_days
                 FROM location_history
                 WHERE tourist_key = $1
                 ORDER BY server_ts DESC
                 LIMIT $2",
            )
            .bind(tourist_key)
            .bind(i64::from(limit))
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| storage_error("Failed to query track", e))?;

            Ok(rows.into_iter().map(HistoryRow::from).collect())
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM location_history
                 WHERE server_ts + retention_days * INTERVAL '1 day' < $1",
            )
            .bind(now)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| storage_error("Failed to purge expired history", e))?;

            Ok(result.rows_affected())
        })
    }

    fn healthy(&self) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            Ok(sqlx::query("SELECT 1")
                .execute(self.pool.as_ref())
                .await
                .is_ok())
        })
    }
}
