//! Mock hot cache.

use crate::error::{EngineError, Result};
use crate::stores::{LiveCache, LivePosition, StoreFuture};
use crate::types::TouristId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory latest-position cache with failure injection.
#[derive(Clone, Default)]
pub struct MemoryLiveCache {
    entries: Arc<Mutex<HashMap<String, LivePosition>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryLiveCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `DependencyUnavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Direct read of a cached record.
    #[must_use]
    pub fn get(&self, tourist: &TouristId) -> Option<LivePosition> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(tourist.as_str())
            .cloned()
    }

    /// Seed a record, for warm-start tests.
    pub fn seed(&self, position: LivePosition) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(position.tourist_id.to_string(), position);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            Err(EngineError::DependencyUnavailable(
                "hot cache unavailable".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl LiveCache for MemoryLiveCache {
    fn put(&self, position: &LivePosition) -> StoreFuture<'_, ()> {
        let position = position.clone();
        Box::pin(async move {
            self.check()?;
            self.entries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(position.tourist_id.to_string(), position);
            Ok(())
        })
    }

    fn load_all(&self) -> StoreFuture<'_, Vec<LivePosition>> {
        Box::pin(async move {
            self.check()?;
            Ok(self
                .entries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .values()
                .cloned()
                .collect())
        })
    }

    fn remove<'a>(&'a self, tourist: &'a TouristId) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check()?;
            self.entries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(tourist.as_str());
            Ok(())
        })
    }
}
