//! This module holds the rooms the sessions run in and the discovery lobby.
//! It provides:
//! - [`Room`]: One hosted session with the host-to-peer broadcast channel
//! - [`AppState`]: Global state holding all active rooms, the latest announcements and the configuration
//! - [`reload_config`]: Hot-reloading of the relay settings from `RelayConfig.json`

use bytes::Bytes;
use protocol::CHANNEL_BUFFER_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

/// The file the configuration gets read from.
pub const CONFIG_FILE: &str = "RelayConfig.json";

/// The settings of the relay.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Where we listen. Only read on startup.
    pub bind_address: String,
    /// Announcements older than this are dropped from the lobby.
    pub announcement_ttl_secs: u64,
    /// How often the watchdog looks for dead rooms and stale announcements.
    pub watchdog_period_secs: u64,
    /// The maximum amount of peers per session (0 = no limit).
    pub max_peers_per_session: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            announcement_ttl_secs: 30,
            watchdog_period_secs: 60,
            max_peers_per_session: 0,
        }
    }
}

impl RelayConfig {
    pub fn announcement_ttl(&self) -> Duration {
        Duration::from_secs(self.announcement_ttl_secs)
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_secs(self.watchdog_period_secs.max(1))
    }
}

/// The room one session runs in.
pub struct Room {
    /// The next id a peer gets, this is consecutively counted.
    pub next_peer_id: u16,
    /// The amount of peers currently in the room, the host not included.
    pub amount_of_peers: u16,
    /// The sender to send messages to the host.
    pub to_host_sender: mpsc::Sender<Bytes>,
    /// The broadcast sender the peers subscribe to.
    pub host_to_peer_broadcaster: broadcast::Sender<Bytes>,
}

/// The last announcement frame of a session.
pub struct Announcement {
    /// The complete frame, tag included, ready to be forwarded.
    pub frame: Bytes,
    pub received: Instant,
}

/// The application state.
pub struct AppState {
    /// The rooms keyed by session id.
    pub rooms: Mutex<HashMap<String, Room>>,
    /// The latest announcement per session id, replayed to every new lobby listener.
    pub announcements: Mutex<HashMap<String, Announcement>>,
    /// Live announcements for the lobby listeners.
    pub lobby: broadcast::Sender<Bytes>,
    pub config: RwLock<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        let (lobby, _) = broadcast::channel(CHANNEL_BUFFER_SIZE);
        Self {
            rooms: Mutex::new(HashMap::new()),
            announcements: Mutex::new(HashMap::new()),
            lobby,
            config: RwLock::new(config),
        }
    }

    /// Stores the announcement and pushes it to the lobby.
    pub async fn publish_announcement(&self, session_id: &str, frame: Bytes) {
        {
            let mut announcements = self.announcements.lock().await;
            announcements.insert(
                session_id.to_string(),
                Announcement {
                    frame: frame.clone(),
                    received: Instant::now(),
                },
            );
        }
        // Nobody listening is the normal case.
        let _ = self.lobby.send(frame);
    }

    /// The stored announcements that are still fresh.
    pub async fn current_announcements(&self) -> Vec<Bytes> {
        let ttl = self.config.read().await.announcement_ttl();
        let announcements = self.announcements.lock().await;
        announcements
            .values()
            .filter(|announcement| announcement.received.elapsed() <= ttl)
            .map(|announcement| announcement.frame.clone())
            .collect()
    }

    /// Drops announcements of sessions that went silent, returns the session ids.
    pub async fn drop_stale_announcements(&self) -> Vec<String> {
        let ttl = self.config.read().await.announcement_ttl();
        let mut announcements = self.announcements.lock().await;
        let stale: Vec<String> = announcements
            .iter()
            .filter(|(_, announcement)| announcement.received.elapsed() > ttl)
            .map(|(session_id, _)| session_id.clone())
            .collect();
        for session_id in &stale {
            announcements.remove(session_id);
        }
        stale
    }

    /// Removes the rooms whose host task is gone, returns the session ids.
    pub async fn drop_dead_rooms(&self) -> Vec<String> {
        let mut rooms = self.rooms.lock().await;
        let dead: Vec<String> = rooms
            .iter()
            .filter(|(_, room)| room.to_host_sender.is_closed())
            .map(|(session_id, _)| session_id.clone())
            .collect();
        for session_id in &dead {
            rooms.remove(session_id);
        }
        drop(rooms);
        if !dead.is_empty() {
            let mut announcements = self.announcements.lock().await;
            for session_id in &dead {
                announcements.remove(session_id);
            }
        }
        dead
    }
}

/// Reads the configuration file. A missing file yields the defaults.
pub async fn read_config(path: impl AsRef<Path>) -> Result<RelayConfig, String> {
    let path = path.as_ref();
    if !fs::try_exists(path)
        .await
        .map_err(|e| format!("Failed to read file: {}", e))?
    {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(RelayConfig::default());
    }
    let json_content = fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read file: {}", e))?;
    serde_json::from_str(&json_content).map_err(|e| format!("Failed to parse JSON: {}", e))
}

/// Reloads the configuration file. The bind address only takes effect on restart.
pub async fn reload_config(state: &Arc<AppState>, path: impl AsRef<Path>) -> Result<(), String> {
    let new_config = read_config(path).await?;
    let mut config = state.config.write().await;
    *config = new_config; // Replace all.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn partial_config_files_fall_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("relay-config-{}.json", std::process::id()));
        fs::write(&path, r#"{"max_peers_per_session": 4}"#).await.unwrap();
        let config = read_config(&path).await.unwrap();
        fs::remove_file(&path).await.unwrap();

        assert_eq!(config.max_peers_per_session, 4);
        assert_eq!(config.bind_address, RelayConfig::default().bind_address);
        assert!(read_config(&path).await.is_ok());
    }

    #[tokio::test]
    async fn broken_config_is_reported() {
        let path = std::env::temp_dir().join(format!("relay-broken-{}.json", std::process::id()));
        fs::write(&path, "{ not json").await.unwrap();
        let state = Arc::new(AppState::new(RelayConfig::default()));
        let result = reload_config(&state, &path).await;
        fs::remove_file(&path).await.unwrap();

        assert!(result.unwrap_err().starts_with("Failed to parse JSON"));
        assert_eq!(*state.config.read().await, RelayConfig::default());
    }

    #[tokio::test(start_paused = true)]
    async fn announcements_expire_after_the_ttl() {
        let state = AppState::new(RelayConfig::default());
        let mut lobby = state.lobby.subscribe();
        state
            .publish_announcement("room", Bytes::from_static(&[protocol::HOST_ANNOUNCE, 1]))
            .await;
        assert_eq!(lobby.recv().await.unwrap().as_ref(), [protocol::HOST_ANNOUNCE, 1]);
        assert_eq!(state.current_announcements().await.len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(state.current_announcements().await.is_empty());
        assert_eq!(state.drop_stale_announcements().await, vec!["room".to_string()]);
        assert!(state.announcements.lock().await.is_empty());
    }

    #[tokio::test]
    async fn dead_rooms_take_their_announcement_along() {
        let state = AppState::new(RelayConfig::default());
        let (to_host_sender, to_host_receiver) = mpsc::channel(1);
        let (host_to_peer_broadcaster, _) = broadcast::channel(1);
        state.rooms.lock().await.insert(
            "room".to_string(),
            Room {
                next_peer_id: 1,
                amount_of_peers: 0,
                to_host_sender,
                host_to_peer_broadcaster,
            },
        );
        state
            .publish_announcement("room", Bytes::from_static(&[protocol::HOST_ANNOUNCE]))
            .await;
        assert!(state.drop_dead_rooms().await.is_empty());

        drop(to_host_receiver);
        assert_eq!(state.drop_dead_rooms().await, vec!["room".to_string()]);
        assert!(state.announcements.lock().await.is_empty());
    }
}
