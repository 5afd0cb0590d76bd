//! The relay that carries the shared channel between session hosts, their peers and the lobby.
//!
//! Every session gets a room keyed by its session id. The host opens it, peers join it, and lobby
//! listeners receive the announcements of all rooms. See [`protocol`] for the frame tags.

pub mod hand_shake;
pub mod lobby;
pub mod message_relay;

use crate::hand_shake::{
    DisconnectData, EndpointSpecificData, inform_endpoint_of_connection, init_and_connect,
    shutdown_connection,
};
use crate::lobby::{AppState, CONFIG_FILE, reload_config};
use crate::message_relay::{handle_host_logic, handle_lobby_logic, handle_peer_logic};
use axum::Router;
use axum::extract::ws::WebSocket;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

/// The routes of the relay: the web socket plus the two maintenance pages.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/reload", get(reload_handler))
        .route("/enlist", get(enlist_handler))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Runs the watchdog: removes rooms whose host is gone and announcements nobody refreshed.
/// This is a fallback, rooms normally get cleaned up when their host disconnects.
pub async fn run_watchdog(state: Arc<AppState>) {
    let period = state.config.read().await.watchdog_period();
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        cleanup(&state).await;
    }
}

/// One watchdog pass.
pub async fn cleanup(state: &AppState) {
    for session_id in state.drop_dead_rooms().await {
        tracing::info!(%session_id, "Removing dead room");
    }
    for session_id in state.drop_stale_announcements().await {
        tracing::debug!(%session_id, "Dropping stale announcement");
    }
}

/// Lists the current rooms with their amount of peers and if they are still alive.
async fn enlist_handler(State(state): State<Arc<AppState>>) -> String {
    let rooms = state.rooms.lock().await;
    let mut lines: Vec<String> = rooms
        .iter()
        .map(|(session_id, room)| {
            format!(
                "Session: {:<40} Peers: {:03} is alive: {}",
                session_id,
                room.amount_of_peers,
                !room.to_host_sender.is_closed()
            )
        })
        .collect();
    drop(rooms);
    let announced = state.current_announcements().await.len();
    lines.push(format!("Announced sessions: {}", announced));
    lines.join("\n")
}

/// Forces the reload of the config file and lists the content.
async fn reload_handler(State(state): State<Arc<AppState>>) -> String {
    match reload_config(&state, CONFIG_FILE).await {
        Ok(()) => {
            let config = state.config.read().await;
            format!(
                "Maximum peers per session: {}\nAnnouncement ttl: {}s\nWatchdog period: {}s",
                config.max_peers_per_session,
                config.announcement_ttl_secs,
                config.watchdog_period_secs
            )
        }
        Err(e) => format!("Config reload failed: {}", e),
    }
}

/// Upgrades the web response to a web socket.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| websocket(socket, state))
}

/// Does the whole handling from start to finish: Handshake -> Handling of logic depending on the
/// role of the endpoint -> Shut down processing.
async fn websocket(stream: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = stream.split();

    let Some(base_data) = init_and_connect(&mut sender, &mut receiver, state.clone()).await else {
        // We quit here, as the handshake did not work out.
        return;
    };

    let disconnect_data = DisconnectData::from(&base_data);
    let success = inform_endpoint_of_connection(&mut sender, &base_data).await;
    let wrapped_sender = Arc::new(Mutex::new(sender));
    let mut error_message = "Connection to relay lost";
    if success {
        error_message = match base_data.specific_data {
            EndpointSpecificData::Host(internal_receiver, internal_sender) => {
                handle_host_logic(
                    wrapped_sender.clone(),
                    receiver,
                    internal_receiver,
                    internal_sender,
                    state.clone(),
                    base_data.session_id,
                )
                .await
            }
            EndpointSpecificData::Peer(internal_receiver, internal_sender) => {
                handle_peer_logic(
                    wrapped_sender.clone(),
                    receiver,
                    internal_receiver,
                    internal_sender,
                    base_data.peer_id,
                )
                .await
            }
            EndpointSpecificData::Lobby(internal_receiver, current) => {
                handle_lobby_logic(wrapped_sender.clone(), receiver, internal_receiver, current)
                    .await
            }
        };
    }

    shutdown_connection(wrapped_sender, disconnect_data, state, error_message).await;
}
