//! Error taxonomy of the host core.
//!
//! Only [`AdmissionError`] and [`ApplyError`] ever reach a peer, and then only the peer that caused them,
//! as a deny message or an `EventRejected`. [`TransportError`] is logged and swallowed by every state
//! mutating caller: by the time a send fails the mutation has already been committed.

use thiserror::Error;

/// Why a join or rejoin got denied. The display text is the deny message the peer sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Wrong password")]
    WrongPassword,
    #[error("A player with that name already joined")]
    DuplicateName,
    #[error("No player with that name in the running match")]
    UnknownPlayer,
    #[error("Player is still connected")]
    NotDisconnected,
    #[error("The session has already started")]
    SessionNotJoinable,
    #[error("Name must not be empty")]
    InvalidName,
}

/// Why an event did not get applied. The game state is untouched in every case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("The match has not started yet")]
    MatchNotStarted,
    #[error("Only admitted players can act")]
    NotAPlayer,
    /// Illegal or out of turn action, the description comes from the game rules.
    #[error("{0}")]
    Rejected(String),
}

impl ApplyError {
    /// Convenience for rule implementations.
    pub fn rejected(reason: impl Into<String>) -> Self {
        ApplyError::Rejected(reason.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UndoError {
    #[error("The match has not started yet")]
    MatchNotStarted,
    #[error("There is no event to undo")]
    NothingToUndo,
    #[error("Undo index {requested} is beyond the history length {len}")]
    IndexOutOfRange { requested: usize, len: usize },
    /// Replaying the history did not reproduce it, the rules are not deterministic.
    #[error("Replay diverged at event {index}: {reason}")]
    ReplayDiverged { index: usize, reason: String },
}

/// Failures of the channel. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Channel closed")]
    Closed,
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Could not connect: {0}")]
    Connect(String),
    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Problems while turning frames into messages and back.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Empty frame")]
    Empty,
    #[error("Frame with tag {0} is truncated")]
    Truncated(u8),
    #[error("Unknown frame tag {0}")]
    UnknownTag(u8),
    #[error("Relay reported: {0}")]
    Server(String),
    #[error("Postcard failure: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Failures of the snapshot collaborator.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Snapshot encoding failed: {0}")]
    Encode(String),
    #[error("Snapshot decoding failed: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors of host-local operations.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Undo(#[from] UndoError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("The match has already started")]
    AlreadyStarted,
    #[error("The match has not started yet")]
    NotStarted,
}
