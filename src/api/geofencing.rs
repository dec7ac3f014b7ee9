//! Zone management and alert-history endpoints.
//!
//! Vertex order on the wire is `[lng, lat]` (GeoJSON convention); points
//! are normalized to latitude/longitude fields internally.

use crate::engine::zones::ZonePatch;
use crate::engine::ZoneGeometry;
use crate::geo::GeoPoint;
use crate::limiter::EndpointClass;
use crate::server::error::AppError;
use crate::server::middleware::Authenticated;
use crate::server::state::AppState;
use crate::types::{Alert, Severity, Zone, ZoneId, ZoneVariant};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default alert page size.
const DEFAULT_ALERT_LIMIT: usize = 50;
/// Maximum alert page size (also the ring capacity default).
const MAX_ALERT_LIMIT: usize = 1000;

// ============================================================================
// Wire types
// ============================================================================

/// Zone representation on the wire.
#[derive(Debug, Serialize)]
pub struct ZoneDto {
    /// Zone id.
    pub id: ZoneId,
    /// Zone name.
    pub name: String,
    /// `restricted` or `safe`.
    #[serde(rename = "type")]
    pub variant: ZoneVariant,
    /// Closed ring as `[lng, lat]` pairs.
    pub coordinates: Vec<[f64; 2]>,
    /// Severity.
    #[serde(rename = "alertLevel")]
    pub alert_level: Severity,
    /// Active flag.
    pub active: bool,
    /// Creation timestamp.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&Zone> for ZoneDto {
    fn from(zone: &Zone) -> Self {
        Self {
            id: zone.id,
            name: zone.name.clone(),
            variant: zone.variant,
            coordinates: zone.polygon.ring().iter().map(|p| [p.lon, p.lat]).collect(),
            alert_level: zone.severity,
            active: zone.active,
            created_at: zone.created_at,
            description: zone.description.clone(),
        }
    }
}

/// Body for polygon zone creation.
#[derive(Debug, Deserialize)]
pub struct CreatePolygonZoneRequest {
    /// Zone name.
    pub name: String,
    /// Closed ring as `[lng, lat]` pairs.
    pub coordinates: Vec<[f64; 2]>,
    /// Severity.
    #[serde(rename = "alertLevel")]
    pub alert_level: Severity,
    /// Optional description.
    pub description: Option<String>,
}

/// Body for circular zone creation.
#[derive(Debug, Deserialize)]
pub struct CreateCircularZoneRequest {
    /// Zone name.
    pub name: String,
    /// Center as `[lng, lat]`.
    pub center: [f64; 2],
    /// Radius in meters.
    pub radius: f64,
    /// `restricted` or `safe`.
    #[serde(rename = "type")]
    pub variant: ZoneVariant,
    /// Severity.
    #[serde(rename = "alertLevel")]
    pub alert_level: Severity,
    /// Optional description.
    pub description: Option<String>,
}

/// Body for zone patching.
#[derive(Debug, Deserialize)]
pub struct UpdateZoneRequest {
    /// New name.
    pub name: Option<String>,
    /// New severity.
    #[serde(rename = "alertLevel")]
    pub alert_level: Option<Severity>,
    /// New active flag.
    pub active: Option<bool>,
    /// New description.
    pub description: Option<String>,
}

/// Response of `GET /geofencing/zones`.
#[derive(Debug, Serialize)]
pub struct ZonesResponse {
    /// Restricted zones.
    pub restricted: Vec<ZoneDto>,
    /// Safe zones.
    pub safe: Vec<ZoneDto>,
}

fn ring_from_wire(coordinates: &[[f64; 2]]) -> Vec<GeoPoint> {
    coordinates
        .iter()
        .map(|c| GeoPoint { lat: c[1], lon: c[0] })
        .collect()
}

// ============================================================================
// Handlers
// ============================================================================

/// List all zones, grouped by variant. Any authenticated principal.
pub async fn list_zones(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
) -> Result<Json<ZonesResponse>, AppError> {
    state
        .engine
        .check_rate(&principal.id, EndpointClass::General)
        .await?;

    let snapshot = state.engine.zones();
    Ok(Json(ZonesResponse {
        restricted: snapshot.restricted.iter().map(ZoneDto::from).collect(),
        safe: snapshot.safe.iter().map(ZoneDto::from).collect(),
    }))
}

async fn create_polygon_zone(
    principal: crate::types::Principal,
    state: AppState,
    variant: ZoneVariant,
    request: CreatePolygonZoneRequest,
) -> Result<(StatusCode, Json<ZoneDto>), AppError> {
    let zone = state
        .engine
        .create_zone(
            &principal,
            variant,
            request.name,
            ZoneGeometry::Polygon(ring_from_wire(&request.coordinates)),
            request.alert_level,
            request.description,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ZoneDto::from(&zone))))
}

/// Create a restricted polygon zone. Authority only.
pub async fn create_restricted_zone(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    Json(request): Json<CreatePolygonZoneRequest>,
) -> Result<(StatusCode, Json<ZoneDto>), AppError> {
    create_polygon_zone(principal, state, ZoneVariant::Restricted, request).await
}

/// Create a safe polygon zone. Authority only.
pub async fn create_safe_zone(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    Json(request): Json<CreatePolygonZoneRequest>,
) -> Result<(StatusCode, Json<ZoneDto>), AppError> {
    create_polygon_zone(principal, state, ZoneVariant::Safe, request).await
}

/// Create a circular zone of either variant. Authority only.
pub async fn create_circular_zone(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    Json(request): Json<CreateCircularZoneRequest>,
) -> Result<(StatusCode, Json<ZoneDto>), AppError> {
    let zone = state
        .engine
        .create_zone(
            &principal,
            request.variant,
            request.name,
            ZoneGeometry::Circle {
                center: GeoPoint {
                    lat: request.center[1],
                    lon: request.center[0],
                },
                radius_m: request.radius,
            },
            request.alert_level,
            request.description,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ZoneDto::from(&zone))))
}

/// Patch a zone's mutable fields. Authority only; geometry is replace-only.
pub async fn update_zone(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateZoneRequest>,
) -> Result<Json<ZoneDto>, AppError> {
    let patch = ZonePatch {
        name: request.name,
        severity: request.alert_level,
        active: request.active,
        description: request.description.map(Some),
    };
    let zone = state
        .engine
        .update_zone(&principal, ZoneId::from_uuid(id), &patch)
        .await?;
    Ok(Json(ZoneDto::from(&zone)))
}

/// Deletion acknowledgement.
#[derive(Debug, Serialize)]
pub struct DeleteZoneResponse {
    /// Always true on 200.
    pub success: bool,
    /// Deleted zone id.
    pub id: ZoneId,
}

/// Delete a zone. Authority only.
pub async fn delete_zone(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteZoneResponse>, AppError> {
    let zone = state
        .engine
        .delete_zone(&principal, ZoneId::from_uuid(id))
        .await?;
    Ok(Json(DeleteZoneResponse {
        success: true,
        id: zone.id,
    }))
}

/// Query parameters for the alert page.
#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    /// Page size, default 50, max 1000.
    pub limit: Option<usize>,
}

/// Alert page.
#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    /// Alerts, newest first.
    pub alerts: Vec<Alert>,
    /// Number returned.
    pub count: usize,
}

/// Most recent alerts. Authority only.
pub async fn recent_alerts(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<AlertsResponse>, AppError> {
    state
        .engine
        .check_rate(&principal.id, EndpointClass::General)
        .await?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_ALERT_LIMIT)
        .min(MAX_ALERT_LIMIT);
    let alerts = state.engine.recent_alerts(&principal, limit)?;
    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}
