//! WebSocket sessions: the bidirectional subscription protocol.
//!
//! # Protocol
//!
//! **Client → server:**
//! ```json
//! {"type": "position:update", "lat": 28.61, "lon": 77.21, "accuracy": 10, "timestamp": "..."}
//! {"type": "watch:start", "tourist_id": "t1"}
//! {"type": "watch:stop", "tourist_id": "t1"}
//! ```
//!
//! **Server → client:** [`EngineEvent`] payloads (`location:changed`,
//! `zone_status`, `alert`) plus `{"type": "error", "message": "..."}`.
//!
//! Sessions authenticate with a bearer token in the handshake (header or
//! `token` query parameter) and are rejected with `invalid token` on
//! failure. A tourist session is auto-joined to its private `user:<id>`
//! room; an authority session joins the global `authorities` room and
//! manages `watch:<id>` rooms through the watch verbs. `watch:start`
//! immediately replays the tourist's latest position. Disconnecting drops
//! the session from every room; delivery is at-most-once.

use crate::engine::ingest::FixSubmission;
use crate::engine::{Engine, EngineEvent};
use crate::hub::{self, RoomBroadcaster};
use crate::limiter::EndpointClass;
use crate::server::error::AppError;
use crate::server::middleware::BearerToken;
use crate::server::state::AppState;
use crate::types::{DeviceInfo, NetworkInfo, Principal, TouristId};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::{stream::StreamExt, SinkExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Client → server message envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    /// Position update from a tourist session.
    #[serde(rename = "position:update")]
    PositionUpdate {
        lat: f64,
        lon: f64,
        accuracy: Option<f64>,
        speed: Option<f64>,
        heading: Option<f64>,
        timestamp: DateTime<Utc>,
        #[serde(rename = "deviceInfo")]
        device_info: Option<DeviceInfo>,
        #[serde(rename = "networkInfo")]
        network_info: Option<NetworkInfo>,
    },
    /// Start observing a tourist (authority only).
    #[serde(rename = "watch:start")]
    WatchStart { tourist_id: String },
    /// Stop observing a tourist.
    #[serde(rename = "watch:stop")]
    WatchStop { tourist_id: String },
}

/// Server → client error payload.
#[derive(Debug, Serialize)]
struct ErrorMessage<'a> {
    r#type: &'static str,
    message: &'a str,
}

fn error_frame(message: &str) -> Message {
    let payload = ErrorMessage {
        r#type: "error",
        message,
    };
    Message::Text(serde_json::to_string(&payload).unwrap_or_else(|_| {
        r#"{"type":"error","message":"internal error"}"#.to_string()
    }))
}

/// WebSocket upgrade endpoint.
///
/// Authenticates before upgrading; failed token resolution charges the
/// `auth` bucket for the offered token so token guessing gets throttled.
pub async fn session(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    token: BearerToken,
) -> Response {
    let principal = match state.sessions.resolve(&token.0).await {
        Ok(principal) => principal,
        Err(e) => {
            let _ = state
                .engine
                .check_rate(&token.0, EndpointClass::Auth)
                .await;
            debug!(error = %e, "WebSocket handshake rejected");
            return AppError::unauthorized("invalid token").into_response();
        }
    };

    let max = state.config.server.max_ws_connections;
    let current = state.ws_connections.load(Ordering::Relaxed);
    if current >= max {
        warn!(current_connections = current, "WebSocket connection limit exceeded");
        return AppError::unavailable("connection limit reached").into_response();
    }

    info!(principal_id = %principal.id, role = ?principal.role, "WebSocket session starting");
    ws.on_upgrade(move |socket| handle_session(socket, principal, state))
}

/// Per-room forwarder tasks feeding one session's outbound queue.
struct RoomForwarders {
    hub: RoomBroadcaster<EngineEvent>,
    out_tx: mpsc::Sender<Message>,
    tasks: HashMap<String, JoinHandle<()>>,
}

impl RoomForwarders {
    fn new(hub: RoomBroadcaster<EngineEvent>, out_tx: mpsc::Sender<Message>) -> Self {
        Self {
            hub,
            out_tx,
            tasks: HashMap::new(),
        }
    }

    /// Join a room: spawn a task forwarding its broadcasts to this session.
    async fn join(&mut self, room: String) {
        if self.tasks.contains_key(&room) {
            return;
        }
        let mut rx = self.hub.subscribe(room.clone()).await;
        let tx = self.out_tx.clone();
        let task_room = room.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Ok(json) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(room = %task_room, skipped, "Session lagging, dropped events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.insert(room, handle);
    }

    fn leave(&mut self, room: &str) {
        if let Some(handle) = self.tasks.remove(room) {
            handle.abort();
        }
    }

    fn leave_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

#[allow(clippy::cognitive_complexity)]
async fn handle_session(socket: WebSocket, principal: Principal, state: AppState) {
    state.ws_connections.fetch_add(1, Ordering::Relaxed);

    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
    let last_activity = Arc::new(Mutex::new(Instant::now()));

    let engine = state.engine.clone();
    let mut rooms = RoomForwarders::new(engine.hub().clone(), out_tx.clone());

    // Tourists get their private status room; authorities get the global
    // alert stream. Watch rooms are joined on demand.
    if principal.is_authority() {
        rooms.join(hub::AUTHORITIES_ROOM.to_string()).await;
    } else {
        rooms.join(hub::user_room(&principal.tourist_id())).await;
    }

    // Outbound: drain the queue, ping on an interval, close when idle.
    let ping_interval = Duration::from_secs(state.config.server.ws_ping_interval_secs);
    let idle_timeout = Duration::from_secs(state.config.server.ws_idle_timeout_secs);
    let send_activity = Arc::clone(&last_activity);
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                msg = out_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if sender.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    let idle = send_activity
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .elapsed();
                    if idle > idle_timeout {
                        debug!("Closing idle WebSocket session");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound: dispatch verbs until the client disconnects.
    let recv_principal = principal.clone();
    let recv_activity = Arc::clone(&last_activity);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            *recv_activity
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();

            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => {
                            dispatch(&engine, &recv_principal, &mut rooms, &out_tx, message).await;
                        }
                        Err(e) => {
                            debug!(error = %e, "Unparseable WebSocket message");
                            let _ = out_tx.send(error_frame("invalid message format")).await;
                        }
                    }
                }
                Message::Close(_) => {
                    info!("Client requested close");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // Keep-alive only; activity already recorded.
                }
                Message::Binary(_) => {
                    warn!("Received unexpected binary message");
                }
            }
        }
        rooms.leave_all();
    });

    // Either task ending means the connection is gone.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.ws_connections.fetch_sub(1, Ordering::Relaxed);
    info!(principal_id = %principal.id, "WebSocket session closed");
}

async fn dispatch(
    engine: &Arc<Engine>,
    principal: &Principal,
    rooms: &mut RoomForwarders,
    out_tx: &mpsc::Sender<Message>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::PositionUpdate {
            lat,
            lon,
            accuracy,
            speed,
            heading,
            timestamp,
            device_info,
            network_info,
        } => {
            let submission = FixSubmission {
                lat,
                lon,
                accuracy_m: accuracy,
                speed_mps: speed,
                heading_deg: heading,
                timestamp,
                device: device_info,
                network: network_info,
            };
            let tourist = principal.tourist_id();
            if let Err(e) = engine.ingest(principal, &tourist, submission).await {
                let _ = out_tx.send(error_frame(&e.to_string())).await;
            }
        }
        ClientMessage::WatchStart { tourist_id } => {
            if !principal.is_authority() {
                let _ = out_tx
                    .send(error_frame("watch requires an authority session"))
                    .await;
                return;
            }
            let tourist = TouristId::new(tourist_id);
            rooms.join(hub::watch_room(&tourist)).await;

            // Replay the latest position so the watcher does not wait for
            // the next fix.
            if let Some(current) = engine.tourist_state(&tourist).await {
                let event = EngineEvent::LocationChanged {
                    tourist_id: tourist.clone(),
                    name: current.name.clone(),
                    lat: current.latest.position.lat,
                    lon: current.latest.position.lon,
                    accuracy: current.latest.accuracy_m,
                    timestamp: current.latest.client_ts,
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    let _ = out_tx.send(Message::Text(json)).await;
                }
            }
            debug!(tourist_id = %tourist, "Watch started");
        }
        ClientMessage::WatchStop { tourist_id } => {
            let tourist = TouristId::new(tourist_id);
            rooms.leave(&hub::watch_room(&tourist));
            debug!(tourist_id = %tourist, "Watch stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_verbs_parse() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"position:update","lat":28.61,"lon":77.21,"accuracy":10.0,"timestamp":"2024-06-01T12:00:00Z"}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::PositionUpdate { lat, .. } if (lat - 28.61).abs() < 1e-9));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"watch:start","tourist_id":"t1"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::WatchStart { tourist_id } if tourist_id == "t1"));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"watch:stop","tourist_id":"t1"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::WatchStop { .. }));
    }

    #[test]
    fn engine_events_serialize_with_wire_tags() {
        let event = EngineEvent::ZoneStatus {
            in_restricted: true,
            in_safe: false,
            restricted_zones: vec![],
            safe_zones: vec![],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"zone_status""#));

        let event = EngineEvent::LocationChanged {
            tourist_id: TouristId::new("t1"),
            name: "Alice".into(),
            lat: 1.0,
            lon: 2.0,
            accuracy: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"location:changed""#));
    }

    #[test]
    fn error_frame_shape() {
        let Message::Text(json) = error_frame("bad input") else {
            panic!("expected text frame");
        };
        assert_eq!(json, r#"{"type":"error","message":"bad input"}"#);
    }
}
