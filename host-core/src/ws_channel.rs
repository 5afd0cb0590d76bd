//! The shared channel over WebSocket, talking to the relay server.
//!
//! Connecting sends the postcard encoded [`ChannelJoin`] as first binary frame and waits for the
//! handshake response with the assigned peer id. Afterwards one task writes queued frames to the
//! socket and one task turns incoming frames into channel events. The links only queue, so sending
//! never blocks the caller.

use crate::channel::{ChannelEvent, HostLink, LobbyEvent, PeerEvent, PeerLink};
use crate::error::{TransportError, WireError};
use crate::wire;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::{CHANNEL_BUFFER_SIZE, ChannelJoin, ChannelRole, PeerId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Opens the socket and runs the join handshake.
async fn open(url: &str, join: ChannelJoin) -> Result<(WsSink, WsSource, PeerId), TransportError> {
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    let (mut sender, mut receiver) = stream.split();

    let join_body = wire::encode(&join).map_err(|e| TransportError::Handshake(e.to_string()))?;
    sender
        .send(Message::Binary(join_body.to_vec()))
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    loop {
        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => {
                let peer_id = wire::parse_handshake(Bytes::from(data))
                    .map_err(|e| TransportError::Handshake(e.to_string()))?;
                info!(
                    url,
                    session_id = %join.session_id,
                    role = ?join.role,
                    peer_id,
                    "Joined channel"
                );
                return Ok((sender, receiver, peer_id));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(TransportError::Handshake(
                    "Connection closed during handshake".to_string(),
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(error)) => return Err(TransportError::Handshake(error.to_string())),
        }
    }
}

/// Writes queued frames until the queue closes or the socket fails.
fn spawn_writer(
    mut sender: WsSink,
    mut outgoing: mpsc::Receiver<Bytes>,
    connected: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            if let Err(error) = sender.send(Message::Binary(frame.to_vec())).await {
                warn!(%error, "WebSocket send failed");
                break;
            }
        }
        connected.store(false, Ordering::SeqCst);
        let _ = sender.close().await;
        debug!("Writer finished");
    });
}

/// Turns incoming frames into events. The last event is always the `closed` one.
fn spawn_reader<T: Send + 'static>(
    mut receiver: WsSource,
    events: mpsc::Sender<T>,
    parse: fn(Bytes) -> Result<T, WireError>,
    closed: fn(String) -> T,
    connected: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let reason = loop {
            match receiver.next().await {
                Some(Ok(Message::Binary(data))) => match parse(Bytes::from(data)) {
                    Ok(event) => {
                        if events.send(event).await.is_err() {
                            break "Receiver dropped".to_string();
                        }
                    }
                    Err(WireError::Server(text)) => break text,
                    Err(error) => warn!(%error, "Dropping malformed frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    break "Connection closed by relay".to_string();
                }
                Some(Ok(_)) => continue,
                Some(Err(error)) => break error.to_string(),
            }
        };
        connected.store(false, Ordering::SeqCst);
        info!(reason, "Channel connection ended");
        let _ = events.send(closed(reason)).await;
    });
}

/// Shared part of host and peer links.
struct Outgoing {
    frames: mpsc::Sender<Bytes>,
    connected: Arc<AtomicBool>,
}

impl Outgoing {
    fn queue(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.frames
            .try_send(frame)
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

pub struct WsHostLink {
    outgoing: Outgoing,
}

impl HostLink for WsHostLink {
    fn broadcast(&self, payload: Bytes) -> Result<(), TransportError> {
        self.outgoing.queue(wire::broadcast_frame(&payload))
    }

    fn send_direct(&self, peer: PeerId, payload: Bytes) -> Result<(), TransportError> {
        self.outgoing.queue(wire::direct_frame(peer, &payload))
    }

    fn announce(&self, payload: Bytes) -> Result<(), TransportError> {
        self.outgoing.queue(wire::announce_frame(&payload))
    }

    fn is_connected(&self) -> bool {
        self.outgoing.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if let Err(error) = self.outgoing.queue(wire::host_disconnect_frame()) {
            debug!(%error, "Could not announce closing");
        }
        self.outgoing.connected.store(false, Ordering::SeqCst);
    }
}

pub struct WsPeerLink {
    outgoing: Outgoing,
    peer_id: PeerId,
}

impl WsPeerLink {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Leaves the room on purpose.
    pub fn disconnect(&self) {
        if let Err(error) = self.outgoing.queue(wire::peer_disconnect_frame()) {
            debug!(%error, "Could not announce leaving");
        }
        self.outgoing.connected.store(false, Ordering::SeqCst);
    }
}

impl PeerLink for WsPeerLink {
    fn send_to_host(&self, payload: Bytes) -> Result<(), TransportError> {
        self.outgoing.queue(wire::to_host_frame(&payload))
    }

    fn is_connected(&self) -> bool {
        self.outgoing.connected.load(Ordering::SeqCst)
    }
}

fn start_writer(sender: WsSink) -> Outgoing {
    let (frames, outgoing) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let connected = Arc::new(AtomicBool::new(true));
    spawn_writer(sender, outgoing, connected.clone());
    Outgoing { frames, connected }
}

/// Opens the room for `session_id` on the relay at `url` (e.g. `ws://127.0.0.1:8080/ws`).
pub async fn connect_host(
    url: &str,
    session_id: &str,
) -> Result<(WsHostLink, mpsc::Receiver<ChannelEvent>), TransportError> {
    let join = ChannelJoin {
        session_id: session_id.to_string(),
        role: ChannelRole::Host,
    };
    let (sender, receiver, _) = open(url, join).await?;
    let outgoing = start_writer(sender);
    let (events, inbound) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    spawn_reader(
        receiver,
        events,
        wire::parse_host_frame,
        ChannelEvent::Closed,
        outgoing.connected.clone(),
    );
    Ok((WsHostLink { outgoing }, inbound))
}

/// Joins the room for `session_id` as a peer.
pub async fn connect_peer(
    url: &str,
    session_id: &str,
) -> Result<(WsPeerLink, mpsc::Receiver<PeerEvent>), TransportError> {
    let join = ChannelJoin {
        session_id: session_id.to_string(),
        role: ChannelRole::Peer,
    };
    let (sender, receiver, peer_id) = open(url, join).await?;
    let outgoing = start_writer(sender);
    let (events, inbound) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    spawn_reader(
        receiver,
        events,
        wire::parse_peer_frame,
        PeerEvent::Closed,
        outgoing.connected.clone(),
    );
    Ok((WsPeerLink { outgoing, peer_id }, inbound))
}

fn parse_lobby_frame(frame: Bytes) -> Result<LobbyEvent, WireError> {
    let body = wire::parse_announcement(frame)?;
    Ok(LobbyEvent::Announced(wire::decode(&body)?))
}

/// Listens to the announcements of all sessions. Dropping the receiver closes the socket.
pub async fn connect_lobby(url: &str) -> Result<mpsc::Receiver<LobbyEvent>, TransportError> {
    let join = ChannelJoin {
        session_id: String::new(),
        role: ChannelRole::Lobby,
    };
    let (mut sender, receiver, _) = open(url, join).await?;
    let (events, inbound) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let watcher = events.clone();
    tokio::spawn(async move {
        watcher.closed().await;
        let _ = sender.close().await;
    });
    spawn_reader(
        receiver,
        events,
        parse_lobby_frame,
        LobbyEvent::Closed,
        Arc::new(AtomicBool::new(true)),
    );
    Ok(inbound)
}
