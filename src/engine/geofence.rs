//! Geofence evaluation: membership diff and enter/exit edges.
//!
//! Pure and CPU-bound. One call evaluates one fix against one registry
//! snapshot, so the result is atomic with respect to zone mutations: a zone
//! added between two fixes produces its `enter` edge on the first fix after
//! the addition, and a deleted zone produces an `exit` edge on the first
//! fix after the deletion (the id is simply absent from the new set).

use crate::geo::GeoPoint;
use crate::types::{Zone, ZoneBrief, ZoneId, ZoneSnapshot, ZoneVariant};
use std::collections::HashSet;

/// Result of evaluating one fix against one snapshot.
#[derive(Clone, Debug)]
pub struct Evaluation {
    /// Zones containing the fix.
    pub memberships: HashSet<ZoneId>,
    /// Zones entered since the prior membership set.
    pub entered: Vec<Zone>,
    /// Zone ids exited since the prior membership set; may reference zones
    /// that no longer exist in the snapshot.
    pub exited: Vec<ZoneId>,
    /// Whether any containing zone is restricted.
    pub in_restricted: bool,
    /// Whether any containing zone is safe.
    pub in_safe: bool,
    /// Containing restricted zones, for status payloads.
    pub restricted_zones: Vec<ZoneBrief>,
    /// Containing safe zones, for status payloads.
    pub safe_zones: Vec<ZoneBrief>,
}

/// Evaluate `point` against every active zone in `snapshot`, diffing the
/// result against `prior` memberships.
#[must_use]
pub fn evaluate(snapshot: &ZoneSnapshot, prior: &HashSet<ZoneId>, point: GeoPoint) -> Evaluation {
    let mut memberships = HashSet::new();
    let mut entered = Vec::new();
    let mut restricted_zones = Vec::new();
    let mut safe_zones = Vec::new();

    for zone in snapshot.zones().filter(|z| z.active) {
        if !zone.polygon.contains(point) {
            continue;
        }
        memberships.insert(zone.id);
        match zone.variant {
            ZoneVariant::Restricted => restricted_zones.push(ZoneBrief::from(zone)),
            ZoneVariant::Safe => safe_zones.push(ZoneBrief::from(zone)),
        }
        if !prior.contains(&zone.id) {
            entered.push(zone.clone());
        }
    }

    let exited = prior
        .iter()
        .filter(|id| !memberships.contains(id))
        .copied()
        .collect();

    Evaluation {
        in_restricted: !restricted_zones.is_empty(),
        in_safe: !safe_zones.is_empty(),
        memberships,
        entered,
        exited,
        restricted_zones,
        safe_zones,
    }
}
