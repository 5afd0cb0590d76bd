//! The seam between the session logic and the shared real-time channel.
//!
//! Sending is synchronous and fire-and-forget: an implementation queues the payload and returns.
//! Receiving happens through a tokio channel of [`ChannelEvent`]s (host) or [`PeerEvent`]s (peer),
//! handed out together with the link when connecting.

use crate::error::TransportError;
use bytes::Bytes;
use protocol::{PeerId, SessionInfo};

/// The host side of a room.
pub trait HostLink: Send + Sync + 'static {
    /// Sends a message body to every peer of the room.
    fn broadcast(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Sends a message body to exactly one peer.
    fn send_direct(&self, peer: PeerId, payload: Bytes) -> Result<(), TransportError>;

    /// Publishes an encoded session info on the discovery channel.
    fn announce(&self, payload: Bytes) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Closes the room, all peers get informed.
    fn close(&self);
}

/// The peer side of a room.
pub trait PeerLink: Send + Sync + 'static {
    fn send_to_host(&self, payload: Bytes) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

/// What the channel reports to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    PeerConnected(PeerId),
    PeerLeft(PeerId),
    /// A message body sent by a peer.
    Request(PeerId, Bytes),
    /// The channel is gone, no further events follow.
    Closed(String),
}

/// What the channel reports to a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A message body sent by the host.
    Message(Bytes),
    Closed(String),
}

/// What a lobby listener gets.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    Announced(SessionInfo),
    Closed(String),
}
