//! Sharded tourist state store.
//!
//! The map is split into shards keyed by a hash of the tourist id. Each
//! shard is guarded by an async mutex that the ingestion pipeline holds for
//! the whole per-tourist critical section (swap fix, evaluate, alert,
//! publish), which is what gives fixes for one tourist strict processing
//! order while tourists on other shards proceed in parallel.

use crate::types::{TouristId, TouristState};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

type Shard = HashMap<TouristId, TouristState>;

/// In-memory per-tourist live state, owned exclusively by the engine.
pub struct TouristStateStore {
    shards: Vec<Mutex<Shard>>,
}

impl TouristStateStore {
    /// Create a store with `shards` shards (at least one).
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1);
        Self {
            shards: (0..count).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_index(&self, tourist: &TouristId) -> usize {
        let mut hasher = DefaultHasher::new();
        tourist.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (hasher.finish() as usize) % self.shards.len();
        idx
    }

    /// Lock the shard owning `tourist` for a serialized critical section.
    pub async fn lock_shard(&self, tourist: &TouristId) -> MutexGuard<'_, Shard> {
        self.shards[self.shard_index(tourist)].lock().await
    }

    /// Clone one tourist's current state.
    pub async fn get(&self, tourist: &TouristId) -> Option<TouristState> {
        self.shards[self.shard_index(tourist)]
            .lock()
            .await
            .get(tourist)
            .cloned()
    }

    /// Snapshot every tourist's current state.
    ///
    /// Shards are visited one at a time, so the result is consistent per
    /// tourist but not across tourists; that matches the live-map read
    /// contract.
    pub async fn snapshot_all(&self) -> Vec<(TouristId, TouristState)> {
        let mut all = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock().await;
            all.extend(guard.iter().map(|(id, state)| (id.clone(), state.clone())));
        }
        all
    }

    /// Pin or release SOS status for a tourist.
    ///
    /// Returns the updated state, or `None` when the tourist has no state
    /// yet (SOS on an unknown tourist still fans out, but has nothing to pin).
    pub async fn set_sos(&self, tourist: &TouristId, active: bool) -> Option<TouristState> {
        let mut guard = self.shards[self.shard_index(tourist)].lock().await;
        let state = guard.get_mut(tourist)?;
        state.sos_active = active;
        Some(state.clone())
    }

    /// Number of tourists currently tracked.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.lock().await.len();
        }
        total
    }

    /// Whether no tourist is tracked.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
