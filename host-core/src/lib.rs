//! Host side coordination of a hosted multiplayer match.
//!
//! One player's process runs the authoritative [`host::Host`]. It admits players and observers,
//! tracks their liveness, keeps the event history, relays accepted events to all peers, performs
//! undo by replay and announces the session on the discovery channel. Peers talk to it through a
//! [`proxy::HostProxy`] and follow the state with a [`replica::Replica`].
//!
//! The game itself plugs in through [`traits::GameRules`]. The shared channel plugs in through
//! [`channel::HostLink`] and [`channel::PeerLink`], with a WebSocket implementation talking to the
//! relay server in [`ws_channel`] and an in-process one in [`memory_channel`].

pub mod admission;
pub mod announcement;
pub mod channel;
pub mod config;
pub mod error;
pub mod event_relay;
pub mod heartbeat;
pub mod host;
pub mod identity;
pub mod memory_channel;
pub mod proxy;
pub mod replica;
pub mod session;
pub mod state_holder;
pub mod traits;
pub mod undo;
pub mod wire;
pub mod ws_channel;

#[cfg(test)]
mod test_support;

pub use config::HostConfig;
pub use error::{AdmissionError, ApplyError, HostError, TransportError, UndoError};
pub use host::{Host, HostHandle};
pub use identity::SessionIdentity;
pub use proxy::HostProxy;
pub use replica::{Replica, ReplicaUpdate};
pub use session::{Collaborators, HostNotification};
pub use traits::{ChatModerator, GameRules, JsonCodec, MatchSummary, SnapshotCodec};
