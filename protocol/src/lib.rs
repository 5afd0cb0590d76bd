//! The ids for frames that we use. They will be used consistent across the relay, the host and the peers.
//! Also contains the message vocabulary of a hosted session and the join structure for the channel.
//!
//! A frame on the channel is always one tag byte followed by a body. The relay server only ever looks at
//! the tag (and the peer id right behind it for direct frames), the bodies are postcard encoded
//! [`HostBound`], [`PeerMessage`] or [`SessionInfo`] values that only the endpoints interpret.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The buffer sizes for the channels for intra relay communication.
pub const CHANNEL_BUFFER_SIZE: usize = 256;

/// Identifier the relay hands out to every connection of a room. The host always gets 0.
pub type PeerId = u16;

/// The size of a peer id on the wire. (u16)
pub const PEER_ID_SIZE: usize = 2;

// Host -> Relay (and Relay -> Peer for the first two).

/// Host -> all peers of the room, followed by the payload.
pub const HOST_BROADCAST: u8 = 0;

/// Host -> exactly one peer, followed by u16 peer id, followed by the payload.
pub const HOST_DIRECT: u8 = 1;

/// Host -> discovery channel, followed by a postcard encoded [`SessionInfo`]. Also used Relay -> Lobby.
pub const HOST_ANNOUNCE: u8 = 2;

/// The host closes the session. The room gets removed and all peers are informed with the same tag.
pub const HOST_DISCONNECTS: u8 = 3;

// Peer -> Relay -> Host.

/// Peer -> host request. From the peer it is followed by the payload, the relay injects the u16 peer id
/// in front of the payload before it reaches the host.
pub const TO_HOST: u8 = 4;

/// The peer leaves on its own, no arguments.
pub const PEER_DISCONNECTS_SELF: u8 = 5;

// Relay -> Host.

/// A peer connected to the room, followed by u16 peer id.
pub const PEER_CONNECTED: u8 = 6;

/// A peer left the room, followed by u16 peer id.
pub const PEER_DISCONNECTED: u8 = 7;

/// The message size for peer connected / disconnected (Header + Peer Id) (u8 + u16).
pub const PEER_STATUS_MSG_SIZE: usize = 3;

// Relay -> any endpoint.

/// An error text follows, the connection gets closed afterwards.
pub const SERVER_ERROR: u8 = 8;

/// The response message for the handshake, followed by the u16 peer id of the endpoint.
pub const HAND_SHAKE_RESPONSE: u8 = 9;

/// (Header + Peer Id) (u8 + u16)
pub const HAND_SHAKE_RESPONSE_SIZE: usize = 3;

/// What an endpoint wants to be in a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ChannelRole {
    /// Opens the room and acts as the authoritative host.
    Host,
    /// Joins an existing room.
    Peer,
    /// Only listens to announcements of all sessions. The session id is ignored.
    Lobby,
}

/// The join request. This is the first binary frame every endpoint sends to the relay.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChannelJoin {
    /// Which session do we want to open or join.
    pub session_id: String,
    /// The role we want to play.
    pub role: ChannelRole,
}

/// Requests a peer sends to the host. `E` is the game specific event type.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum HostRequest<E> {
    /// Fresh join during the pre-game phase.
    PlayerJoined {
        name: String,
        password_hash: Option<String>,
    },
    /// Rejoin into a started match after a disconnect.
    PlayerRejoined {
        name: String,
        password_hash: Option<String>,
    },
    ObserverJoined {
        name: String,
    },
    ObserverRejoined {
        name: String,
    },
    /// Liveness signal.
    Heartbeat {
        name: String,
    },
    ChatMessage {
        body: String,
    },
    /// A state changing game action.
    Event(E),
    /// Opaque media blob that gets relayed to all peers.
    Media {
        payload: Vec<u8>,
    },
    /// The peer lost track of the state and wants a fresh [`PeerMessage::LoadGame`].
    RequestSnapshot,
}

/// A request addressed to a specific host identity on the shared channel.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct HostBound<E> {
    pub host_id: String,
    pub request: HostRequest<E>,
}

/// An event after the host accepted it into the history.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EventEnvelope<E> {
    pub event: E,
    /// The submitting player, taken from the originating connection.
    pub player: String,
    /// Host assigned time stamp, milliseconds since the unix epoch.
    pub timestamp_ms: i64,
}

/// An approved chat line.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ChatLine {
    pub sender: String,
    pub body: String,
    pub timestamp_ms: i64,
}

/// Messages the host sends to the peers, either broadcast or direct.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum PeerMessage<E> {
    /// Answer to a join, `deny_message` is `None` on success.
    RespondPlayerJoined {
        session_id: String,
        peer_id: PeerId,
        host_id: String,
        deny_message: Option<String>,
    },
    RespondPlayerRejoined {
        session_id: String,
        peer_id: PeerId,
        host_id: String,
        deny_message: Option<String>,
    },
    RespondObserverJoined {
        session_id: String,
        peer_id: PeerId,
        host_id: String,
        deny_message: Option<String>,
    },
    /// Full state. `player_name` is `None` when every peer should load it.
    LoadGame {
        session_id: String,
        state_snapshot: String,
        player_name: Option<String>,
        config_snapshot: String,
        /// History length the snapshot corresponds to.
        event_count: usize,
        /// Undos applied to the match so far.
        undo_generation: u32,
    },
    /// An applied event. `event_count` is the history length after applying it.
    NotifyUpdate {
        session_id: String,
        event_count: usize,
        /// Undos applied before this event, a peer that missed one resyncs.
        undo_generation: u32,
        event: EventEnvelope<E>,
    },
    /// Rewind to the state after the first `to_index` events.
    Undo {
        session_id: String,
        to_index: usize,
        /// The generation after this undo.
        undo_generation: u32,
    },
    ApproveChatMessage {
        session_id: String,
        message: ChatLine,
    },
    SetTimer {
        session_id: String,
        seconds: u32,
    },
    /// Only sent to the submitter of a rejected event.
    EventRejected {
        session_id: String,
        reason: String,
    },
    RelayMedia {
        session_id: String,
        from: String,
        payload: Vec<u8>,
    },
}

impl<E> PeerMessage<E> {
    /// The session every message belongs to, used to filter on a shared channel.
    pub fn session_id(&self) -> &str {
        match self {
            PeerMessage::RespondPlayerJoined { session_id, .. }
            | PeerMessage::RespondPlayerRejoined { session_id, .. }
            | PeerMessage::RespondObserverJoined { session_id, .. }
            | PeerMessage::LoadGame { session_id, .. }
            | PeerMessage::NotifyUpdate { session_id, .. }
            | PeerMessage::Undo { session_id, .. }
            | PeerMessage::ApproveChatMessage { session_id, .. }
            | PeerMessage::SetTimer { session_id, .. }
            | PeerMessage::EventRejected { session_id, .. }
            | PeerMessage::RelayMedia { session_id, .. } => session_id,
        }
    }
}

/// Coarse phase of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum SessionPhase {
    /// Players can join, nothing has been applied yet.
    PreGame,
    /// The match runs, only rejoins are possible.
    InProgress,
}

/// The projection of a session that gets announced on the discovery channel.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub host_id: String,
    pub display_name: String,
    pub has_password: bool,
    /// Roster before the start, player list of the game state afterwards.
    pub players: Vec<String>,
    /// Player name -> faction.
    pub factions: BTreeMap<String, String>,
    pub bot_count: u32,
    pub rule_set: String,
    pub session_phase: SessionPhase,
    /// Game specific phase naming, empty before the start.
    pub phase: String,
    pub main_phase: String,
    pub turn: u32,
    /// Time stamp of the last applied event, milliseconds since the unix epoch.
    pub last_event_ms: Option<i64>,
    /// Players of a started match that are currently classified as disconnected.
    pub disconnected: Vec<String>,
    pub observer_count: u32,
}
