//! This module does the whole initialization and handshake thing.
//! The general protocol of connecting is :
//! Endpoint -> Websocket: postcard serialized [`ChannelJoin`].
//! Websocket -> Endpoint: u16 peer id (0 for the host and for lobby listeners).
//!
//! A host opens the room of its session id, a peer joins an existing room and a lobby listener
//! only subscribes to the announcements.

use crate::hand_shake::DisconnectEndpointSpecification::{
    DisconnectHost, DisconnectLobby, DisconnectPeer,
};
use crate::hand_shake::EndpointSpecificData::{Host, Lobby, Peer};
use crate::lobby::{AppState, Room};
use axum::extract::ws::Message::Binary;
use axum::extract::ws::{Message, WebSocket};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{sink::SinkExt, stream::StreamExt};
use postcard::from_bytes;
use protocol::{
    CHANNEL_BUFFER_SIZE, ChannelJoin, ChannelRole, HAND_SHAKE_RESPONSE, HAND_SHAKE_RESPONSE_SIZE,
    HOST_DISCONNECTS, PEER_CONNECTED, PEER_DISCONNECTED, PEER_STATUS_MSG_SIZE, PeerId,
    SERVER_ERROR,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::{broadcast, mpsc};

/// Sends the error text as a binary frame and closes the socket.
pub async fn send_closing_message(
    sender: &mut SplitSink<WebSocket, Message>,
    closing_message: String,
) {
    let raw_data = closing_message.as_bytes();
    let mut msg = BytesMut::with_capacity(1 + raw_data.len());
    msg.put_u8(SERVER_ERROR);
    msg.put_slice(raw_data);

    let _ = sender.send(Message::Binary(msg.into())).await;
    let _ = sender.send(Message::Close(None)).await;
}

/// The handshake result we get for joining the room.
pub struct HandshakeResult {
    /// The id of the endpoint in its room.
    pub peer_id: PeerId,
    /// The session the room belongs to, empty for lobby listeners.
    pub session_id: String,
    /// The internal connection information.
    pub specific_data: EndpointSpecificData,
}

/// Contains all the channel information for internal communication.
pub enum EndpointSpecificData {
    /// In this case we are servicing the host.
    Host(Receiver<Bytes>, broadcast::Sender<Bytes>),
    /// In this case we are servicing a peer.
    Peer(broadcast::Receiver<Bytes>, Sender<Bytes>),
    /// A lobby listener, with the announcements that were current when it connected.
    Lobby(broadcast::Receiver<Bytes>, Vec<Bytes>),
}

/// This data is data we need to keep for the disconnect handling and cleanup.
pub struct DisconnectData {
    pub peer_id: PeerId,
    pub session_id: String,
    pub sender: DisconnectEndpointSpecification,
}

/// Contains the information where to send the leave notice to in case of disconnection.
pub enum DisconnectEndpointSpecification {
    /// If we are servicing the host, we broadcast the info to all peers.
    DisconnectHost(broadcast::Sender<Bytes>),
    /// If we are servicing a peer, we inform the host.
    DisconnectPeer(Sender<Bytes>),
    /// Nobody to inform.
    DisconnectLobby,
}

impl From<&HandshakeResult> for DisconnectData {
    fn from(value: &HandshakeResult) -> Self {
        let sender = match &value.specific_data {
            Host(_, internal_sender) => DisconnectHost(internal_sender.clone()),
            Peer(_, internal_sender) => DisconnectPeer(internal_sender.clone()),
            Lobby(_, _) => DisconnectLobby,
        };
        DisconnectData {
            peer_id: value.peer_id,
            session_id: value.session_id.clone(),
            sender,
        }
    }
}

/// Reads in the join request from the web socket.
async fn get_initial_query(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
) -> Option<ChannelJoin> {
    // The join request is the first binary message we receive.
    let my_data = loop {
        let Some(raw_data) = receiver.next().await else {
            tracing::warn!("WebSocket closed before handshake completed");
            send_closing_message(sender, "Initial error during handshake.".into()).await;
            return None;
        };
        match raw_data {
            Err(err) => {
                tracing::error!(?err, "Initial error during handshake.");
                send_closing_message(sender, "Initial error during handshake.".into()).await;
                return None;
            }
            Ok(Binary(data)) => {
                break data;
            }
            // We do not care about any other message like ping pong messages.
            Ok(_) => {}
        }
    };

    match from_bytes::<ChannelJoin>(&my_data) {
        Ok(join) => {
            if join.role != ChannelRole::Lobby && join.session_id.trim().is_empty() {
                send_closing_message(sender, "Session id must not be empty.".into()).await;
                return None;
            }
            Some(join)
        }
        Err(e) => {
            tracing::error!(error = ?e, "Failed to parse join request");
            send_closing_message(sender, "Failed to parse join request.".into()).await;
            None
        }
    }
}

/// Connects and eventually establishes a room.
pub async fn init_and_connect(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    state: Arc<AppState>,
) -> Option<HandshakeResult> {
    let join = get_initial_query(sender, receiver).await?;

    match join.role {
        ChannelRole::Host => process_handshake_host(sender, state, join.session_id).await,
        ChannelRole::Peer => process_handshake_peer(sender, state, join.session_id).await,
        ChannelRole::Lobby => Some(process_handshake_lobby(state).await),
    }
}

/// Does the handshake, if we are connected to a peer.
async fn process_handshake_peer(
    sender: &mut SplitSink<WebSocket, Message>,
    state: Arc<AppState>,
    session_id: String,
) -> Option<HandshakeResult> {
    let max_peers = state.config.read().await.max_peers_per_session;
    let mut rooms = state.rooms.lock().await;
    let Some(local_room) = rooms.get_mut(&session_id) else {
        drop(rooms);
        send_closing_message(sender, format!("Session {} does not exist.", &session_id)).await;
        return None;
    };

    // max_peers == 0 means "infinite".
    if max_peers != 0 && local_room.amount_of_peers >= max_peers {
        drop(rooms);
        send_closing_message(
            sender,
            format!("Session {} exceeded max amount of peers {}.", &session_id, max_peers),
        )
        .await;
        return None;
    }

    let Some(following_id) = local_room.next_peer_id.checked_add(1) else {
        drop(rooms);
        send_closing_message(sender, format!("Session {} run out of peer ids.", &session_id)).await;
        tracing::error!(%session_id, "Room run out of peer ids.");
        return None;
    };

    local_room.amount_of_peers += 1;
    let peer_id = local_room.next_peer_id;
    local_room.next_peer_id = following_id;

    let to_host_sender = local_room.to_host_sender.clone();
    let receiver = local_room.host_to_peer_broadcaster.subscribe();
    drop(rooms);

    // Here we tell the host that a new peer has joined.
    let mut msg = BytesMut::with_capacity(PEER_STATUS_MSG_SIZE);
    msg.put_u8(PEER_CONNECTED);
    msg.put_u16(peer_id);

    if let Err(error) = to_host_sender.send(msg.into()).await {
        // We have to leave the room again.
        let mut rooms = state.rooms.lock().await;
        if let Some(room) = rooms.get_mut(&session_id) {
            room.amount_of_peers -= 1;
        }
        drop(rooms);
        tracing::error!(?error, "Host unexpectedly left during handshake");
        send_closing_message(sender, "Host unexpectedly left during handshake".into()).await;
        return None;
    }

    tracing::info!(%session_id, peer_id, "Peer joined");
    Some(HandshakeResult {
        session_id,
        peer_id,
        specific_data: Peer(receiver, to_host_sender),
    })
}

/// Opens a new room and generates the handshake result for the host.
async fn process_handshake_host(
    sender: &mut SplitSink<WebSocket, Message>,
    state: Arc<AppState>,
    session_id: String,
) -> Option<HandshakeResult> {
    let mut rooms = state.rooms.lock().await;
    if rooms.contains_key(&session_id) {
        drop(rooms);
        send_closing_message(sender, format!("Session {} already exists.", &session_id)).await;
        // User error no need for error tracing.
        return None;
    }
    let (to_host_sender, to_host_receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let (to_peer_sender, _) = broadcast::channel(CHANNEL_BUFFER_SIZE);
    let new_room = Room {
        next_peer_id: 1,
        amount_of_peers: 0,
        to_host_sender,
        host_to_peer_broadcaster: to_peer_sender.clone(),
    };
    rooms.insert(session_id.clone(), new_room);
    drop(rooms);
    tracing::info!(%session_id, "Room opened");
    Some(HandshakeResult {
        session_id,
        peer_id: 0,
        specific_data: Host(to_host_receiver, to_peer_sender),
    })
}

/// Subscribes first, so no announcement between the snapshot and the subscription gets lost.
async fn process_handshake_lobby(state: Arc<AppState>) -> HandshakeResult {
    let receiver = state.lobby.subscribe();
    let current = state.current_announcements().await;
    HandshakeResult {
        session_id: String::new(),
        peer_id: 0,
        specific_data: Lobby(receiver, current),
    }
}

/// Informs the endpoint of the connection result, returns a bool as a success flag.
pub async fn inform_endpoint_of_connection(
    sender: &mut SplitSink<WebSocket, Message>,
    status: &HandshakeResult,
) -> bool {
    let mut msg = BytesMut::with_capacity(HAND_SHAKE_RESPONSE_SIZE);
    msg.put_u8(HAND_SHAKE_RESPONSE);
    msg.put_u16(status.peer_id);

    sender.send(Message::Binary(msg.into())).await.is_ok()
}

/// Performs the shutdown of the connection and sends a last message.
pub async fn shutdown_connection(
    wrapped_sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    disconnect_data: DisconnectData,
    app_state: Arc<AppState>,
    error_message: &'static str,
) {
    match disconnect_data.sender {
        DisconnectHost(sender) => {
            // Inform peers first.
            let _ = sender.send(Bytes::from_static(&[HOST_DISCONNECTS]));
            let mut rooms = app_state.rooms.lock().await;
            rooms.remove(&disconnect_data.session_id);
            drop(rooms);
            let mut announcements = app_state.announcements.lock().await;
            announcements.remove(&disconnect_data.session_id);
            drop(announcements);
            tracing::info!(
                session_id = %disconnect_data.session_id,
                reason = error_message,
                "Room closed"
            );
        }
        DisconnectPeer(sender) => {
            // Inform host first.
            let mut msg = BytesMut::with_capacity(PEER_STATUS_MSG_SIZE);
            msg.put_u8(PEER_DISCONNECTED);
            msg.put_u16(disconnect_data.peer_id);
            let _ = sender.send(msg.into()).await;
            let mut rooms = app_state.rooms.lock().await;
            // Check if the room still exists.
            if let Some(room) = rooms.get_mut(&disconnect_data.session_id) {
                room.amount_of_peers = room.amount_of_peers.saturating_sub(1);
            }
            drop(rooms);
            tracing::info!(
                session_id = %disconnect_data.session_id,
                peer_id = disconnect_data.peer_id,
                reason = error_message,
                "Peer left"
            );
        }
        DisconnectLobby => {}
    }

    let mut sender = wrapped_sender.lock().await;
    send_closing_message(&mut sender, error_message.into()).await;
}
