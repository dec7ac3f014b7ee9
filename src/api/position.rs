//! Position ingestion and live-map endpoints.
//!
//! - `POST /position` — ingest a single fix for the authenticated tourist
//! - `GET /position/live` — authority-only map of tourist id → latest fix

use crate::engine::ingest::FixSubmission;
use crate::engine::IngestOutcome;
use crate::server::error::AppError;
use crate::server::middleware::Authenticated;
use crate::server::state::AppState;
use crate::types::{DeviceInfo, NetworkInfo, TouristStatus};
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of `POST /position`.
#[derive(Debug, Deserialize)]
pub struct PositionRequest {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Reported accuracy in meters.
    pub accuracy: Option<f64>,
    /// Reported speed in m/s.
    pub speed: Option<f64>,
    /// Reported heading in degrees.
    pub heading: Option<f64>,
    /// Client timestamp.
    pub timestamp: DateTime<Utc>,
    /// Optional device descriptor.
    #[serde(rename = "deviceInfo")]
    pub device_info: Option<DeviceInfo>,
    /// Optional network descriptor.
    #[serde(rename = "networkInfo")]
    pub network_info: Option<NetworkInfo>,
}

impl From<PositionRequest> for FixSubmission {
    fn from(req: PositionRequest) -> Self {
        Self {
            lat: req.lat,
            lon: req.lon,
            accuracy_m: req.accuracy,
            speed_mps: req.speed,
            heading_deg: req.heading,
            timestamp: req.timestamp,
            device: req.device_info,
            network: req.network_info,
        }
    }
}

/// Response of `POST /position`.
#[derive(Debug, Serialize)]
pub struct PositionResponse {
    /// Always true on 200; reordered fixes are absorbed silently.
    pub success: bool,
    /// Derived status after evaluation, absent for absorbed fixes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TouristStatus>,
    /// Inside any restricted zone.
    pub in_restricted: bool,
    /// Inside any safe zone.
    pub in_safe: bool,
    /// Alerts this fix produced.
    pub alerts: usize,
}

/// Ingest a single position fix for the authenticated tourist.
pub async fn submit_position(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    Json(request): Json<PositionRequest>,
) -> Result<Json<PositionResponse>, AppError> {
    let tourist = principal.tourist_id();
    let outcome = state
        .engine
        .ingest(&principal, &tourist, request.into())
        .await?;

    let response = match outcome {
        IngestOutcome::Accepted(accepted) => PositionResponse {
            success: true,
            status: Some(accepted.state.status(accepted.in_restricted)),
            in_restricted: accepted.in_restricted,
            in_safe: accepted.in_safe,
            alerts: accepted.alerts.len(),
        },
        IngestOutcome::DroppedOutOfOrder => PositionResponse {
            success: true,
            status: None,
            in_restricted: false,
            in_safe: false,
            alerts: 0,
        },
    };
    Ok(Json(response))
}

/// One entry of the live position map.
#[derive(Debug, Serialize)]
pub struct LiveEntry {
    /// Display name.
    pub name: String,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
    /// Reported accuracy in meters.
    pub accuracy: Option<f64>,
    /// Derived status.
    pub status: TouristStatus,
    /// Client timestamp of the latest fix.
    pub timestamp: DateTime<Utc>,
}

/// Authority-only map of every tracked tourist's latest fix.
pub async fn live_positions(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
) -> Result<Json<HashMap<String, LiveEntry>>, AppError> {
    state
        .engine
        .check_rate(&principal.id, crate::limiter::EndpointClass::General)
        .await?;

    let snapshot = state.engine.live_positions(&principal).await?;
    let zones = state.engine.zones();

    let map = snapshot
        .into_iter()
        .map(|(id, tourist)| {
            let in_restricted = tourist
                .memberships
                .iter()
                .any(|zone_id| zones.restricted.iter().any(|z| z.id == *zone_id));
            let entry = LiveEntry {
                name: tourist.name.clone(),
                lat: tourist.latest.position.lat,
                lon: tourist.latest.position.lon,
                accuracy: tourist.latest.accuracy_m,
                status: tourist.status(in_restricted),
                timestamp: tourist.latest.client_ts,
            };
            (id.to_string(), entry)
        })
        .collect();

    Ok(Json(map))
}
