//! Core abstractions between the session coordination and the game.
//!
//! This module defines the contract between game-specific logic and the
//! host. Games implement [`GameRules`] to validate and apply events, while the
//! host takes care of admission, history, relaying and announcing.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Host process                         │
//! │  ┌──────────────┐    ┌──────────────────┐    ┌─────────────┐  │
//! │  │  HostHandle  │───►│   HostSession    │───►│  GameRules  │  │
//! │  │  (local UI)  │    │ (admission, log) │    │ (the game)  │  │
//! │  └──────────────┘    └──────────────────┘    └─────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//!                               ▲
//!                               │ shared channel (relay server or in-process hub)
//!                               ▼
//!                    ┌─────────────────────┐
//!                    │       Peers         │
//!                    │ (HostProxy+Replica) │
//!                    └─────────────────────┘
//! ```
//!
//! The state and config snapshots never get interpreted by the core, they pass through a
//! [`SnapshotCodec`] and travel as opaque strings.

use crate::error::{ApplyError, CodecError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Marker trait for types that can be serialized with postcard or serde_json.
///
/// This combines [`Serialize`] and [`DeserializeOwned`] into a single bound,
/// reducing boilerplate in generic signatures.
pub trait SerializationCap: Serialize + DeserializeOwned {}
impl<T> SerializationCap for T where T: Serialize + DeserializeOwned {}

/// What the game tells the host about a running match, used for the discovery projection
/// and for rejoin checks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchSummary {
    /// The authoritative player list embedded in the game state.
    pub players: Vec<String>,
    /// Player name -> faction.
    pub factions: BTreeMap<String, String>,
    pub bot_count: u32,
    pub phase: String,
    pub main_phase: String,
    pub turn: u32,
}

/// The game logic the host drives.
///
/// Implementations are deterministic, all replicas run exactly the same
/// `apply` calls in the same order and have to end up in the same state.
///
/// # Implementation Notes
///
/// - `apply` may leave `state` half modified when it returns an error, the
///   host only ever hands in a working copy and discards it on failure.
/// - `player` is the name the host resolved from the originating connection.
pub trait GameRules: Send + Sync + 'static {
    /// One state changing action.
    type Event: SerializationCap + Clone + Debug + Send + Sync + 'static;
    /// The complete game state.
    type State: Clone + PartialEq + Debug + Send + Sync + 'static;
    /// The configuration snapshot that accompanies the state on load.
    type Config: Clone + Send + Sync + 'static;

    /// Validates and applies one event.
    fn apply(
        &self,
        state: &mut Self::State,
        player: &str,
        event: &Self::Event,
    ) -> Result<(), ApplyError>;

    /// Summarizes the state for the projection.
    fn summary(&self, state: &Self::State) -> MatchSummary;
}

/// The serialization collaborator for snapshots.
pub trait SnapshotCodec<T>: Send + Sync + 'static {
    fn encode(&self, value: &T) -> Result<String, CodecError>;
    fn decode(&self, raw: &str) -> Result<T, CodecError>;
}

/// Default codec, plain serde_json.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl<T: SerializationCap> SnapshotCodec<T> for JsonCodec {
    fn encode(&self, value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, raw: &str) -> Result<T, CodecError> {
        serde_json::from_str(raw).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Hook every chat line passes before it gets broadcast.
pub trait ChatModerator: Send + Sync + 'static {
    /// Returns `true` if the line may be broadcast.
    fn review(&self, sender: &str, body: &str) -> bool;
}

/// Lets everything through.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApproveAll;

impl ChatModerator for ApproveAll {
    fn review(&self, _sender: &str, _body: &str) -> bool {
        true
    }
}
