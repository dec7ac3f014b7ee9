//! Liveness and readiness endpoints.

use super::error::AppError;
use super::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// True while a persistence tier is failing; operator UIs surface
    /// this as a stale-data banner.
    pub degraded: bool,
}

/// Liveness probe: the engine is up, possibly degraded.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        degraded: state.engine.is_degraded(),
    })
}

/// Body of `GET /ready`.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether the service accepts traffic.
    pub ready: bool,
    /// History store reachability.
    pub history: bool,
}

/// Readiness probe.
///
/// In strict mode an unreachable history store fails readiness; otherwise
/// the engine reports ready-but-degraded.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, AppError> {
    let history = state.engine.history_healthy().await;
    if state.config.engine.strict_history && !history {
        return Err(AppError::unavailable("history store unreachable"));
    }
    Ok(Json(ReadyResponse {
        ready: true,
        history,
    }))
}
