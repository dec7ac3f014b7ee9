//! In-memory implementations of the engine's provider traits.
//!
//! Fast, deterministic, and failure-injectable. Integration tests wire a
//! full engine out of these; the dev server can run on them when no Redis
//! or `PostgreSQL` is around.

mod cache;
mod consent;
mod history;
mod sessions;
mod zones;

pub use cache::MemoryLiveCache;
pub use consent::MockConsentGate;
pub use history::MemoryHistoryStore;
pub use sessions::StaticAuthSessions;
pub use zones::MemoryZoneSnapshotStore;
