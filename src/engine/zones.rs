//! Copy-on-write zone registry.
//!
//! Mutations build a new [`ZoneSnapshot`] with a bumped version and swap it
//! behind a short write lock; readers clone the current `Arc` and evaluate
//! against a coherent zone set without ever blocking writers. Deleted zones
//! leave tombstones so later exit alerts can still resolve the zone name;
//! tombstones are dropped on [`ZoneRegistry::compact`].

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::geo::Polygon;
use crate::types::{Severity, Zone, ZoneId, ZoneSnapshot, ZoneVariant};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

/// A deleted zone retained until compaction.
#[derive(Clone, Debug)]
pub struct Tombstone {
    /// The zone as it was at deletion.
    pub zone: Zone,
    /// When it was deleted.
    pub deleted_at: DateTime<Utc>,
}

/// Mutable zone fields; geometry is replace-only via delete + create so
/// enter/exit edges stay bound to one geometry per zone id.
#[derive(Clone, Debug, Default)]
pub struct ZonePatch {
    /// New name.
    pub name: Option<String>,
    /// New severity.
    pub severity: Option<Severity>,
    /// New active flag.
    pub active: Option<bool>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
}

struct RegistryInner {
    snapshot: Arc<ZoneSnapshot>,
    tombstones: Vec<Tombstone>,
}

/// Authoritative in-process zone set.
pub struct ZoneRegistry {
    clock: Arc<dyn Clock>,
    inner: RwLock<RegistryInner>,
}

impl ZoneRegistry {
    /// Create an empty registry at version 0.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let snapshot = Arc::new(ZoneSnapshot::empty(clock.now()));
        Self {
            clock,
            inner: RwLock::new(RegistryInner {
                snapshot,
                tombstones: Vec::new(),
            }),
        }
    }

    /// Replace the current snapshot with a restored one (startup only).
    pub fn restore(&self, snapshot: ZoneSnapshot) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tracing::info!(
            version = snapshot.version,
            restricted = snapshot.restricted.len(),
            safe = snapshot.safe.len(),
            "Restored zone registry from persisted snapshot"
        );
        inner.snapshot = Arc::new(snapshot);
    }

    /// The current immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ZoneSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .snapshot
            .clone()
    }

    /// Add a zone with already-normalized polygon geometry.
    ///
    /// Duplicate names are tolerated with a warning; ids are the identity.
    ///
    /// # Errors
    ///
    /// Geometry validation happens at [`Polygon`] construction; this method
    /// itself only fails on internal lock poisoning (never in practice).
    pub fn add(
        &self,
        variant: ZoneVariant,
        name: impl Into<String>,
        polygon: Polygon,
        severity: Severity,
        description: Option<String>,
    ) -> Result<Zone> {
        let name = name.into();
        let now = self.clock.now();
        let zone = Zone {
            id: ZoneId::new(),
            name,
            variant,
            polygon,
            severity,
            active: true,
            created_at: now,
            description,
        };

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if inner.snapshot.zones().any(|z| z.name == zone.name) {
            tracing::warn!(zone_name = %zone.name, "Zone name already exists, accepting duplicate");
        }

        let mut next = (*inner.snapshot).clone();
        match variant {
            ZoneVariant::Restricted => next.restricted.push(zone.clone()),
            ZoneVariant::Safe => next.safe.push(zone.clone()),
        }
        Self::bump(&mut next, now);
        inner.snapshot = Arc::new(next);

        tracing::info!(
            zone_id = %zone.id,
            zone_name = %zone.name,
            variant = ?variant,
            severity = ?severity,
            version = inner.snapshot.version,
            "Zone created"
        );
        Ok(zone)
    }

    /// Patch mutable fields of a zone.
    ///
    /// # Errors
    ///
    /// `NotFound` when no live zone has this id.
    pub fn update(&self, id: ZoneId, patch: &ZonePatch) -> Result<Zone> {
        let now = self.clock.now();
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut next = (*inner.snapshot).clone();
        let zone = next
            .restricted
            .iter_mut()
            .chain(next.safe.iter_mut())
            .find(|z| z.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("zone {id}")))?;

        if let Some(name) = &patch.name {
            zone.name.clone_from(name);
        }
        if let Some(severity) = patch.severity {
            zone.severity = severity;
        }
        if let Some(active) = patch.active {
            zone.active = active;
        }
        if let Some(description) = &patch.description {
            zone.description.clone_from(description);
        }
        let updated = zone.clone();

        Self::bump(&mut next, now);
        inner.snapshot = Arc::new(next);

        tracing::info!(zone_id = %id, version = inner.snapshot.version, "Zone updated");
        Ok(updated)
    }

    /// Delete a zone, leaving a tombstone.
    ///
    /// # Errors
    ///
    /// `NotFound` when no live zone has this id.
    pub fn delete(&self, id: ZoneId) -> Result<Zone> {
        let now = self.clock.now();
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut next = (*inner.snapshot).clone();
        let from_restricted = next.restricted.iter().position(|z| z.id == id);
        let removed = if let Some(idx) = from_restricted {
            next.restricted.remove(idx)
        } else {
            let idx = next
                .safe
                .iter()
                .position(|z| z.id == id)
                .ok_or_else(|| EngineError::NotFound(format!("zone {id}")))?;
            next.safe.remove(idx)
        };

        Self::bump(&mut next, now);
        inner.snapshot = Arc::new(next);
        inner.tombstones.push(Tombstone {
            zone: removed.clone(),
            deleted_at: now,
        });

        tracing::info!(zone_id = %id, version = inner.snapshot.version, "Zone deleted");
        Ok(removed)
    }

    /// Resolve a zone record, falling back to tombstones for deleted zones
    /// so exit alerts can still name the zone they reference.
    #[must_use]
    pub fn lookup(&self, id: ZoneId) -> Option<Zone> {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.snapshot.zone(id).cloned().or_else(|| {
            inner
                .tombstones
                .iter()
                .rev()
                .find(|t| t.zone.id == id)
                .map(|t| t.zone.clone())
        })
    }

    /// Drop all tombstones.
    pub fn compact(&self) -> usize {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let dropped = inner.tombstones.len();
        inner.tombstones.clear();
        dropped
    }

    fn bump(snapshot: &mut ZoneSnapshot, now: DateTime<Utc>) {
        snapshot.version += 1;
        snapshot.last_updated = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testutil::square;
    use chrono::TimeZone;

    fn registry() -> ZoneRegistry {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        ZoneRegistry::new(clock)
    }

    #[test]
    fn versions_are_monotonic() {
        let registry = registry();
        assert_eq!(registry.snapshot().version, 0);

        let zone = registry
            .add(
                ZoneVariant::Restricted,
                "old town",
                square(28.61, 77.20, 0.01),
                Severity::High,
                None,
            )
            .unwrap();
        assert_eq!(registry.snapshot().version, 1);

        registry
            .update(
                zone.id,
                &ZonePatch {
                    severity: Some(Severity::Low),
                    ..ZonePatch::default()
                },
            )
            .unwrap();
        assert_eq!(registry.snapshot().version, 2);

        registry.delete(zone.id).unwrap();
        assert_eq!(registry.snapshot().version, 3);
    }

    #[test]
    fn readers_hold_sampled_version() {
        let registry = registry();
        let before = registry.snapshot();

        registry
            .add(
                ZoneVariant::Safe,
                "riverwalk",
                square(10.0, 10.0, 0.05),
                Severity::Medium,
                None,
            )
            .unwrap();

        // The earlier snapshot is unchanged; the new one sees the zone.
        assert_eq!(before.version, 0);
        assert!(before.zones().next().is_none());
        assert_eq!(registry.snapshot().safe.len(), 1);
    }

    #[test]
    fn duplicate_names_accepted() {
        let registry = registry();
        let a = registry
            .add(
                ZoneVariant::Safe,
                "plaza",
                square(0.0, 0.0, 0.01),
                Severity::Low,
                None,
            )
            .unwrap();
        let b = registry
            .add(
                ZoneVariant::Safe,
                "plaza",
                square(1.0, 1.0, 0.01),
                Severity::Low,
                None,
            )
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(registry.snapshot().safe.len(), 2);
    }

    #[test]
    fn update_missing_zone_is_not_found() {
        let registry = registry();
        let result = registry.update(ZoneId::new(), &ZonePatch::default());
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn tombstones_resolve_names_until_compaction() {
        let registry = registry();
        let zone = registry
            .add(
                ZoneVariant::Restricted,
                "quarry",
                square(5.0, 5.0, 0.01),
                Severity::High,
                None,
            )
            .unwrap();
        registry.delete(zone.id).unwrap();

        let resolved = registry.lookup(zone.id).expect("tombstone resolves");
        assert_eq!(resolved.name, "quarry");
        assert_eq!(resolved.variant, ZoneVariant::Restricted);
        assert_eq!(registry.compact(), 1);
        assert!(registry.lookup(zone.id).is_none());
    }
}
