//! WebSocket message routing for the relay server.
//!
//! This module handles the communication between a session host, its peers and the lobby.
//! It spawns paired Tokio tasks for each room connection that:
//! - Validate and filter frames by tag (preventing illegal commands)
//! - Route host broadcasts to all peers and direct frames to the addressed peer only
//! - Forward peer requests to the host with injected peer ids
//! - Store host announcements and push them to the lobby listeners
//!
//! The relay server never interprets the session protocol, it only looks at tags and peer ids.

use crate::lobby::AppState;
use axum::extract::ws::{Message, WebSocket};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::*;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{Receiver, Sender};

/// Spawns the message handlers for a session host connection.
///
/// - **Send task**: Forwards peer frames (connects, leaves, requests) to the host
/// - **Receive task**: Routes host frames to the peers and announcements to the lobby
///
/// When either task completes the other is aborted and the room gets cleaned up by the caller.
///
/// # Returns
/// A static string describing why the connection ended.
pub async fn handle_host_logic(
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    receiver: SplitStream<WebSocket>,
    internal_receiver: Receiver<Bytes>,
    internal_sender: broadcast::Sender<Bytes>,
    state: Arc<AppState>,
    session_id: String,
) -> &'static str {
    let mut send_task =
        tokio::spawn(async move { send_logic_host(sender, internal_receiver).await });

    let mut receive_task = tokio::spawn(async move {
        receive_logic_host(receiver, internal_sender, state, session_id).await
    });

    // If any one of the tasks run to completion, we abort the other.
    let result = tokio::select! {
        res_a = &mut send_task => {receive_task.abort(); res_a},
        res_b = &mut receive_task => {send_task.abort(); res_b},
    };

    result.unwrap_or_else(|err| {
        tracing::error!(?err, "Error while handling host logic.");
        "Internal panic in host side logic."
    })
}

/// Frames coming from the host.
async fn receive_logic_host(
    mut receiver: SplitStream<WebSocket>,
    internal_sender: broadcast::Sender<Bytes>,
    state: Arc<AppState>,
    session_id: String,
) -> &'static str {
    while let Some(state_of_socket) = receiver.next().await {
        match state_of_socket {
            Ok(Message::Binary(bytes)) => {
                if bytes.is_empty() {
                    tracing::error!("Illegal empty message in receive logic host.");
                    return "Illegal empty message received.";
                }
                match bytes[0] {
                    HOST_DISCONNECTS => {
                        // The peers are informed in the clean up phase.
                        return "Host closed the session";
                    }
                    HOST_ANNOUNCE => {
                        state.publish_announcement(&session_id, bytes).await;
                    }
                    HOST_BROADCAST | HOST_DIRECT => {
                        if bytes[0] == HOST_DIRECT && bytes.len() < 1 + PEER_ID_SIZE {
                            tracing::error!("Malformed HOST_DIRECT message");
                            return "Malformed message received.";
                        }
                        // Sending fails if nobody is in the room, which is normal for a fresh session.
                        if let Err(error) = internal_sender.send(bytes) {
                            tracing::debug!(?error, "Sending to no peers.");
                        }
                    }
                    other => {
                        tracing::error!(message_type = other, "Illegal message type Host->Peer.");
                        return "Illegal Host -> Peer command.";
                    }
                }
            }
            Ok(_) => {} // We simply ignore other messages.
            Err(_) => {
                return "Connection lost.";
            }
        }
    }
    "Connection lost."
}

/// Frames for the host coming from inside.
async fn send_logic_host(
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    mut internal_receiver: Receiver<Bytes>,
) -> &'static str {
    let mut enclosed = sender.lock().await;

    while let Some(bytes) = internal_receiver.recv().await {
        if bytes.is_empty() {
            tracing::error!("Illegal internal empty message in send logic host.");
            return "Illegal empty message received.";
        }
        if (bytes[0] != PEER_CONNECTED) && (bytes[0] != PEER_DISCONNECTED) && (bytes[0] != TO_HOST)
        {
            tracing::error!(message_type = bytes[0], "Unknown internal Peer->Host command");
            return "Unknown internal Peer->Host command";
        }
        if let Err(err) = enclosed.send(Message::Binary(bytes)).await {
            tracing::error!(?err, "Error in communication with host endpoint.");
            return "Error in communication with host endpoint.";
        }
    }

    // We hold a sender in the room, so this only happens when the room got removed under us.
    tracing::error!("Internal channel on host was unexpectedly closed.");
    "Internal channel closed."
}

/// Spawns the two tokio tasks for a peer and does all the handling.
pub async fn handle_peer_logic(
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    receiver: SplitStream<WebSocket>,
    internal_receiver: broadcast::Receiver<Bytes>,
    internal_sender: Sender<Bytes>,
    peer_id: PeerId,
) -> &'static str {
    let mut send_task =
        tokio::spawn(async move { send_logic_peer(sender, internal_receiver, peer_id).await });

    let mut receive_task =
        tokio::spawn(async move { receive_logic_peer(receiver, internal_sender, peer_id).await });

    let result = tokio::select! {
        res_a = &mut send_task => {receive_task.abort(); res_a},
        res_b = &mut receive_task => {send_task.abort(); res_b},
    };

    result.unwrap_or_else(|err| {
        tracing::error!(?err, "Internal panic in peer side logic.");
        "Internal panic in peer side logic."
    })
}

/// Frames coming from the peer.
async fn receive_logic_peer(
    mut receiver: SplitStream<WebSocket>,
    internal_sender: Sender<Bytes>,
    peer_id: PeerId,
) -> &'static str {
    while let Some(state) = receiver.next().await {
        match state {
            Ok(Message::Binary(bytes)) => {
                if bytes.is_empty() {
                    tracing::error!("Illegal empty message received in receive logic peer.");
                    return "Illegal empty message received.";
                }
                match bytes[0] {
                    TO_HOST => {
                        // We need to add our peer id.
                        let mut msg = BytesMut::with_capacity(bytes.len() + PEER_ID_SIZE);
                        msg.put_u8(TO_HOST);
                        msg.put_u16(peer_id);
                        msg.put_slice(&bytes[1..]);
                        if let Err(error) = internal_sender.send(msg.into()).await {
                            tracing::error!(?error, "Error in internal send to host.");
                            return "Error in internal send to host.";
                        }
                    }
                    PEER_DISCONNECTS_SELF => {
                        return "Peer disconnected intentionally";
                    }
                    _ => {
                        tracing::error!(command = ?bytes[0], "Illegal command from peer.");
                        return "Illegal Command from peer";
                    }
                }
            }
            Ok(_) => {} // Ignore other messages
            Err(_) => {
                return "Connection lost.";
            }
        }
    }
    "Connection lost."
}

/// Host frames for this peer.
async fn send_logic_peer(
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    mut internal_receiver: broadcast::Receiver<Bytes>,
    peer_id: PeerId,
) -> &'static str {
    let mut enclosed = sender.lock().await;

    loop {
        let bytes = match internal_receiver.recv().await {
            Err(RecvError::Closed) => {
                return "Host has left the session.";
            }
            Err(RecvError::Lagged(skipped)) => {
                // The replica would miss events, the peer has to reconnect and load a snapshot.
                tracing::warn!(
                    skipped_messages = skipped,
                    peer_id,
                    "Peer lagging on internal channel."
                );
                return "Lagging on internal channel - Computer too slow.";
            }
            Ok(bytes) => bytes,
        };
        if bytes.is_empty() {
            tracing::error!("Illegal empty message received.");
            return "Illegal empty message received.";
        }
        match bytes[0] {
            HOST_DISCONNECTS => {
                return "Host has left the session.";
            }
            HOST_DIRECT => {
                let mut header = bytes.slice(1..);
                if header.remaining() < PEER_ID_SIZE {
                    return "Malformed message received.";
                }
                // Direct frames are forwarded with the id in place, only to the addressee.
                if header.get_u16() != peer_id {
                    continue;
                }
            }
            HOST_BROADCAST => {}
            _ => {
                tracing::error!(message = bytes[0], "Illegal message on peer side received.");
                return "Illegal message on peer side received.";
            }
        }
        if let Err(error) = enclosed.send(Message::Binary(bytes)).await {
            tracing::error!(?error, "Error in communication with peer endpoint.");
            return "Error in communication with peer endpoint.";
        }
    }
}

/// Serves a lobby listener: first the announcements current at connect, then the live ones.
pub async fn handle_lobby_logic(
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    mut receiver: SplitStream<WebSocket>,
    mut internal_receiver: broadcast::Receiver<Bytes>,
    current: Vec<Bytes>,
) -> &'static str {
    let mut enclosed = sender.lock().await;
    for frame in current {
        if enclosed.send(Message::Binary(frame)).await.is_err() {
            return "Error in communication with lobby endpoint.";
        }
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                // Listeners have nothing to say, we only watch for the socket going away.
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return "Lobby listener left.",
                Some(Ok(_)) => {}
            },
            announcement = internal_receiver.recv() => match announcement {
                Ok(frame) => {
                    if enclosed.send(Message::Binary(frame)).await.is_err() {
                        return "Error in communication with lobby endpoint.";
                    }
                }
                // Announcements repeat, a skipped one gets replaced by the next.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped_messages = skipped, "Lobby listener lagging.");
                }
                Err(RecvError::Closed) => return "Lobby closed.",
            },
        }
    }
}
