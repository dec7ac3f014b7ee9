//! Router configuration.

use super::health::{health_check, readiness_check};
use super::state::AppState;
use crate::api::{geofencing, position, ws};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::routing::{get, post, put};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_origin(Any)
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        // Health checks (no authentication)
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Position ingestion and live map
        .route("/position", post(position::submit_position))
        .route("/position/live", get(position::live_positions))
        // Zone management
        .route("/geofencing/zones", get(geofencing::list_zones))
        .route(
            "/geofencing/zones/restricted",
            post(geofencing::create_restricted_zone),
        )
        .route("/geofencing/zones/safe", post(geofencing::create_safe_zone))
        .route(
            "/geofencing/zones/circular",
            post(geofencing::create_circular_zone),
        )
        .route(
            "/geofencing/zones/:id",
            put(geofencing::update_zone).delete(geofencing::delete_zone),
        )
        .route("/geofencing/alerts", get(geofencing::recent_alerts))
        // Bidirectional sessions
        .route("/ws", get(ws::session))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
