//! An in-process stand-in for the relay server.
//!
//! Rooms are keyed by session id and work like the relay's rooms: one mpsc queue towards the host,
//! one queue per peer, consecutive peer ids with the host being 0. Announcements go to a lobby
//! broadcast and the latest one per session is retained, like `/enlist` on the relay.
//! Used by the tests and the demo, where spinning up a WebSocket server is not wanted.

use crate::channel::{ChannelEvent, HostLink, PeerEvent, PeerLink};
use crate::error::TransportError;
use bytes::Bytes;
use protocol::{CHANNEL_BUFFER_SIZE, PeerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

struct MemoryRoom {
    /// The next id a peer gets, consecutively counted.
    next_peer_id: PeerId,
    to_host_sender: mpsc::Sender<ChannelEvent>,
    peers: HashMap<PeerId, mpsc::Sender<PeerEvent>>,
}

struct HubState {
    rooms: HashMap<String, MemoryRoom>,
    announcements: HashMap<String, Bytes>,
    lobby: broadcast::Sender<Bytes>,
}

/// The hub, cheap to clone.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        let (lobby, _) = broadcast::channel(CHANNEL_BUFFER_SIZE);
        Self {
            state: Arc::new(Mutex::new(HubState {
                rooms: HashMap::new(),
                announcements: HashMap::new(),
                lobby,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the room for `session_id`. Fails if it already exists.
    pub fn open_host(
        &self,
        session_id: &str,
    ) -> Result<(MemoryHostLink, mpsc::Receiver<ChannelEvent>), TransportError> {
        let mut state = self.lock();
        if state.rooms.contains_key(session_id) {
            return Err(TransportError::Handshake(format!(
                "Room {session_id} already exists"
            )));
        }
        let (to_host_sender, to_host_receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        state.rooms.insert(
            session_id.to_string(),
            MemoryRoom {
                next_peer_id: 1,
                to_host_sender,
                peers: HashMap::new(),
            },
        );
        info!(session_id, "Opened in-process room");
        let link = MemoryHostLink {
            hub: self.clone(),
            session_id: session_id.to_string(),
            connected: Arc::new(AtomicBool::new(true)),
        };
        Ok((link, to_host_receiver))
    }

    /// Joins the room for `session_id` as a peer. The host gets informed.
    pub fn connect_peer(
        &self,
        session_id: &str,
    ) -> Result<(MemoryPeerLink, mpsc::Receiver<PeerEvent>), TransportError> {
        let mut state = self.lock();
        let room = state
            .rooms
            .get_mut(session_id)
            .ok_or_else(|| TransportError::Handshake(format!("Room {session_id} does not exist")))?;
        let peer_id = room.next_peer_id;
        room.next_peer_id = room
            .next_peer_id
            .checked_add(1)
            .ok_or_else(|| TransportError::Handshake("Peer ids exhausted".to_string()))?;
        let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        room.peers.insert(peer_id, sender);
        room.to_host_sender
            .try_send(ChannelEvent::PeerConnected(peer_id))
            .map_err(|e| TransportError::Send(e.to_string()))?;
        debug!(session_id, peer_id, "Peer joined in-process room");
        let link = MemoryPeerLink {
            hub: self.clone(),
            session_id: session_id.to_string(),
            peer_id,
            connected: Arc::new(AtomicBool::new(true)),
        };
        Ok((link, receiver))
    }

    /// Everything announced from now on.
    pub fn subscribe_lobby(&self) -> broadcast::Receiver<Bytes> {
        self.lock().lobby.subscribe()
    }

    /// The last announcement of a session.
    pub fn latest_announcement(&self, session_id: &str) -> Option<Bytes> {
        self.lock().announcements.get(session_id).cloned()
    }

    fn with_room<T>(
        &self,
        session_id: &str,
        action: impl FnOnce(&mut MemoryRoom) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut state = self.lock();
        let room = state
            .rooms
            .get_mut(session_id)
            .ok_or(TransportError::Closed)?;
        action(room)
    }
}

fn deliver(sender: &mpsc::Sender<PeerEvent>, payload: Bytes) -> Result<(), TransportError> {
    sender
        .try_send(PeerEvent::Message(payload))
        .map_err(|e| TransportError::Send(e.to_string()))
}

/// The host end of a room. Clones share the connected flag.
#[derive(Clone)]
pub struct MemoryHostLink {
    hub: MemoryHub,
    session_id: String,
    connected: Arc<AtomicBool>,
}

impl MemoryHostLink {
    /// Simulates losing and regaining the connection to the channel.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

impl HostLink for MemoryHostLink {
    fn broadcast(&self, payload: Bytes) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.hub.with_room(&self.session_id, |room| {
            // One full queue must not starve the others, the first error is reported after all got a try.
            let mut result = Ok(());
            for sender in room.peers.values() {
                if let Err(error) = deliver(sender, payload.clone()) {
                    result = result.and(Err(error));
                }
            }
            result
        })
    }

    fn send_direct(&self, peer: PeerId, payload: Bytes) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.hub.with_room(&self.session_id, |room| {
            let sender = room
                .peers
                .get(&peer)
                .ok_or_else(|| TransportError::Send(format!("Unknown peer {peer}")))?;
            deliver(sender, payload)
        })
    }

    fn announce(&self, payload: Bytes) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut state = self.hub.lock();
        state
            .announcements
            .insert(self.session_id.clone(), payload.clone());
        // Nobody listening in the lobby is fine.
        let _ = state.lobby.send(payload);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut state = self.hub.lock();
        state.announcements.remove(&self.session_id);
        if let Some(room) = state.rooms.remove(&self.session_id) {
            for sender in room.peers.values() {
                let _ = sender.try_send(PeerEvent::Closed("Host closed the session".to_string()));
            }
            info!(session_id = %self.session_id, "Closed in-process room");
        }
    }
}

/// The peer end of a room.
#[derive(Clone)]
pub struct MemoryPeerLink {
    hub: MemoryHub,
    session_id: String,
    peer_id: PeerId,
    connected: Arc<AtomicBool>,
}

impl MemoryPeerLink {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Leaves the room, the host sees the peer leave.
    pub fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.hub.with_room(&self.session_id, |room| {
            room.peers.remove(&self.peer_id);
            room.to_host_sender
                .try_send(ChannelEvent::PeerLeft(self.peer_id))
                .map_err(|e| TransportError::Send(e.to_string()))
        });
    }
}

impl PeerLink for MemoryPeerLink {
    fn send_to_host(&self, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.hub.with_room(&self.session_id, |room| {
            room.to_host_sender
                .try_send(ChannelEvent::Request(self.peer_id, payload))
                .map_err(|e| TransportError::Send(e.to_string()))
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
