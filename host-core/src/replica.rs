//! The peer-side copy of the game state.
//!
//! A replica starts from a `LoadGame` snapshot and applies every `NotifyUpdate` exactly once, in
//! order, with the same rules the host uses. An `Undo` is answered the same way the host does it:
//! replay of the remaining prefix from the snapshot. Every message carries the undo generation of the
//! host, so an undo that never arrived shows up as a generation mismatch. Whenever the replica cannot
//! follow (a gap in the event counts or generations, an undo below its snapshot, a rejected replay) it
//! asks for a resync, after which the peer sends `RequestSnapshot`.

use crate::admission::normalize_name;
use crate::error::CodecError;
use crate::state_holder::replay;
use crate::traits::{GameRules, SnapshotCodec};
use protocol::{ChatLine, EventEnvelope, PeerMessage};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionKind {
    Join,
    Rejoin,
    Observer,
}

/// What a handled message meant for the peer.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplicaUpdate<E> {
    /// The host answered an admission request.
    Admission {
        kind: AdmissionKind,
        deny_message: Option<String>,
    },
    /// A fresh snapshot got loaded.
    Loaded { event_count: usize },
    Applied(EventEnvelope<E>),
    RolledBack { to_index: usize },
    Chat(ChatLine),
    Timer(u32),
    /// Our own event got rejected.
    Rejected(String),
    Media { from: String, payload: Vec<u8> },
    /// Not for us, or already seen.
    Ignored,
    /// The replica lost track, a snapshot has to be requested.
    NeedsResync,
}

struct Base<G: GameRules> {
    snapshot_state: G::State,
    snapshot_count: usize,
    undo_generation: u32,
    current: G::State,
    /// Events after the snapshot.
    events: Vec<EventEnvelope<G::Event>>,
    config: G::Config,
}

pub struct Replica<G: GameRules> {
    rules: Arc<G>,
    state_codec: Arc<dyn SnapshotCodec<G::State>>,
    config_codec: Arc<dyn SnapshotCodec<G::Config>>,
    session_id: String,
    /// The name this peer joined or observes under.
    name: String,
    base: Option<Base<G>>,
}

impl<G: GameRules> Replica<G> {
    pub fn new(
        rules: Arc<G>,
        state_codec: Arc<dyn SnapshotCodec<G::State>>,
        config_codec: Arc<dyn SnapshotCodec<G::Config>>,
        session_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            rules,
            state_codec,
            config_codec,
            session_id: session_id.into(),
            name: name.into(),
            base: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.base.is_some()
    }

    pub fn state(&self) -> Option<&G::State> {
        self.base.as_ref().map(|base| &base.current)
    }

    pub fn config(&self) -> Option<&G::Config> {
        self.base.as_ref().map(|base| &base.config)
    }

    /// History length this replica is at.
    pub fn event_count(&self) -> usize {
        self.base
            .as_ref()
            .map(|base| base.snapshot_count + base.events.len())
            .unwrap_or_default()
    }

    /// Only fails if a snapshot cannot be decoded.
    pub fn handle(
        &mut self,
        message: PeerMessage<G::Event>,
    ) -> Result<ReplicaUpdate<G::Event>, CodecError> {
        if message.session_id() != self.session_id {
            return Ok(ReplicaUpdate::Ignored);
        }
        let update = match message {
            PeerMessage::RespondPlayerJoined { deny_message, .. } => ReplicaUpdate::Admission {
                kind: AdmissionKind::Join,
                deny_message,
            },
            PeerMessage::RespondPlayerRejoined { deny_message, .. } => ReplicaUpdate::Admission {
                kind: AdmissionKind::Rejoin,
                deny_message,
            },
            PeerMessage::RespondObserverJoined { deny_message, .. } => ReplicaUpdate::Admission {
                kind: AdmissionKind::Observer,
                deny_message,
            },
            PeerMessage::LoadGame {
                state_snapshot,
                player_name,
                config_snapshot,
                event_count,
                undo_generation,
                ..
            } => {
                if let Some(target) = player_name
                    && normalize_name(&target) != normalize_name(&self.name)
                {
                    return Ok(ReplicaUpdate::Ignored);
                }
                let state = self.state_codec.decode(&state_snapshot)?;
                let config = self.config_codec.decode(&config_snapshot)?;
                self.base = Some(Base {
                    snapshot_state: state.clone(),
                    snapshot_count: event_count,
                    undo_generation,
                    current: state,
                    events: Vec::new(),
                    config,
                });
                debug!(event_count, "Snapshot loaded");
                ReplicaUpdate::Loaded { event_count }
            }
            PeerMessage::NotifyUpdate {
                event_count,
                undo_generation,
                event,
                ..
            } => self.apply_update(event_count, undo_generation, event),
            PeerMessage::Undo {
                to_index,
                undo_generation,
                ..
            } => self.roll_back(to_index, undo_generation),
            PeerMessage::ApproveChatMessage { message, .. } => ReplicaUpdate::Chat(message),
            PeerMessage::SetTimer { seconds, .. } => ReplicaUpdate::Timer(seconds),
            PeerMessage::EventRejected { reason, .. } => ReplicaUpdate::Rejected(reason),
            PeerMessage::RelayMedia { from, payload, .. } => ReplicaUpdate::Media { from, payload },
        };
        Ok(update)
    }

    fn apply_update(
        &mut self,
        event_count: usize,
        undo_generation: u32,
        envelope: EventEnvelope<G::Event>,
    ) -> ReplicaUpdate<G::Event> {
        let len = self.event_count();
        let Some(base) = self.base.as_mut() else {
            return ReplicaUpdate::NeedsResync;
        };
        if undo_generation != base.undo_generation {
            warn!(
                expected = base.undo_generation,
                got = undo_generation,
                "Update from another undo generation"
            );
            return ReplicaUpdate::NeedsResync;
        }
        if event_count <= len {
            return ReplicaUpdate::Ignored;
        }
        if event_count != len + 1 {
            warn!(expected = len + 1, got = event_count, "Gap in the event stream");
            return ReplicaUpdate::NeedsResync;
        }
        let mut working = base.current.clone();
        if let Err(error) = self
            .rules
            .apply(&mut working, &envelope.player, &envelope.event)
        {
            warn!(%error, event_count, "Replica diverged from the host");
            return ReplicaUpdate::NeedsResync;
        }
        base.current = working;
        base.events.push(envelope.clone());
        ReplicaUpdate::Applied(envelope)
    }

    fn roll_back(&mut self, to_index: usize, undo_generation: u32) -> ReplicaUpdate<G::Event> {
        let len = self.event_count();
        let Some(base) = self.base.as_mut() else {
            return ReplicaUpdate::NeedsResync;
        };
        if undo_generation == base.undo_generation {
            return ReplicaUpdate::Ignored;
        }
        if undo_generation != base.undo_generation.wrapping_add(1) {
            warn!(
                expected = base.undo_generation.wrapping_add(1),
                got = undo_generation,
                "Missed an undo"
            );
            return ReplicaUpdate::NeedsResync;
        }
        if to_index < base.snapshot_count || to_index > len {
            debug!(
                to_index,
                snapshot = base.snapshot_count,
                len,
                "Undo outside of the local history"
            );
            return ReplicaUpdate::NeedsResync;
        }
        let kept = to_index - base.snapshot_count;
        match replay(
            self.rules.as_ref(),
            &base.snapshot_state,
            &base.events[..kept],
        ) {
            Ok(state) => {
                base.events.truncate(kept);
                base.current = state;
                base.undo_generation = undo_generation;
                ReplicaUpdate::RolledBack { to_index }
            }
            Err(error) => {
                warn!(%error, "Replay after undo failed");
                ReplicaUpdate::NeedsResync
            }
        }
    }
}
