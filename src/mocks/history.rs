//! Mock history store.

use crate::error::{EngineError, Result};
use crate::stores::{HistoryRow, HistoryStore, StoreFuture};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory append-only history with failure injection.
#[derive(Clone, Default)]
pub struct MemoryHistoryStore {
    rows: Arc<Mutex<Vec<HistoryRow>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryHistoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `DependencyUnavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// All appended rows, oldest first.
    #[must_use]
    pub fn rows(&self) -> Vec<HistoryRow> {
        self.rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            Err(EngineError::DependencyUnavailable(
                "history store unavailable".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append<'a>(&'a self, row: &'a HistoryRow) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check()?;
            self.rows
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(row.clone());
            Ok(())
        })
    }

    fn recent_track<'a>(
        &'a self,
        tourist_key: &'a str,
        limit: u32,
    ) -> StoreFuture<'a, Vec<HistoryRow>> {
        Box::pin(async move {
            self.check()?;
            let rows = self
                .rows
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(rows
                .iter()
                .rev()
                .filter(|r| r.tourist_key == tourist_key)
                .take(limit as usize)
                .cloned()
                .collect())
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.check()?;
            let mut rows = self
                .rows
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let before = rows.len();
            rows.retain(|r| r.server_ts + Duration::days(i64::from(r.retention_days)) >= now);
            Ok((before - rows.len()) as u64)
        })
    }

    fn healthy(&self) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(!self.failing.load(Ordering::Relaxed)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, server_ts: DateTime<Utc>, retention_days: u16) -> HistoryRow {
        HistoryRow {
            tourist_key: key.into(),
            tourist_name: "A".into(),
            lat: 1.0,
            lon: 2.0,
            accuracy_m: None,
            server_ts,
            client_ts: server_ts,
            speed_mps: None,
            heading_deg: None,
            distance_from_prev_m: None,
            secs_from_prev: None,
            quality_score: 1.0,
            anomalous: false,
            snapshot_version: 1,
            anonymized: false,
            retention_days,
        }
    }

    #[tokio::test]
    async fn purge_respects_per_row_retention() {
        let store = MemoryHistoryStore::new();
        let now = Utc::now();

        store.append(&row("t1", now - Duration::days(10), 7)).await.unwrap();
        store.append(&row("t1", now - Duration::days(10), 30)).await.unwrap();
        store.append(&row("t1", now, 7)).await.unwrap();

        let purged = store.purge_expired(now).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.rows().len(), 2);
    }

    #[tokio::test]
    async fn failure_injection() {
        let store = MemoryHistoryStore::new();
        store.set_failing(true);
        let result = store.append(&row("t1", Utc::now(), 7)).await;
        assert!(matches!(result, Err(EngineError::DependencyUnavailable(_))));
        assert!(!store.healthy().await.unwrap());
    }

    #[tokio::test]
    async fn recent_track_is_newest_first() {
        let store = MemoryHistoryStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store
                .append(&row("t1", now + Duration::seconds(i), 7))
                .await
                .unwrap();
        }
        store.append(&row("t2", now, 7)).await.unwrap();

        let track = store.recent_track("t1", 3).await.unwrap();
        assert_eq!(track.len(), 3);
        assert!(track[0].server_ts > track[2].server_ts);
    }
}
