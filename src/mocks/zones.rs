//! Mock zone snapshot document.

use crate::stores::{StoreFuture, ZoneSnapshotStore};
use crate::types::ZoneSnapshot;
use std::sync::{Arc, Mutex};

/// In-memory zone snapshot document.
#[derive(Clone, Default)]
pub struct MemoryZoneSnapshotStore {
    snapshot: Arc<Mutex<Option<ZoneSnapshot>>>,
}

impl MemoryZoneSnapshotStore {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read of the persisted document.
    #[must_use]
    pub fn current(&self) -> Option<ZoneSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ZoneSnapshotStore for MemoryZoneSnapshotStore {
    fn save<'a>(&'a self, snapshot: &'a ZoneSnapshot) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            *self
                .snapshot
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(snapshot.clone());
            Ok(())
        })
    }

    fn load(&self) -> StoreFuture<'_, Option<ZoneSnapshot>> {
        Box::pin(async move {
            Ok(self
                .snapshot
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone())
        })
    }
}
