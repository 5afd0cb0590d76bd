//! The authoritative game state and its history.
//!
//! The holder is the only place where the game state gets mutated on the host. History is append
//! only, the single exception being the truncation of an undo. Every state the holder ever had can be
//! recomputed from the initial state and a prefix of the history, which is exactly what undo does.

use crate::error::{ApplyError, HostError, UndoError};
use crate::identity::SessionIdentity;
use crate::traits::{GameRules, MatchSummary, SnapshotCodec};
use protocol::{EventEnvelope, SessionInfo, SessionPhase};
use std::sync::Arc;

/// Replays `events` on a copy of `initial`.
///
/// Shared between the host and the peer replicas so both sides use the same replay rule.
pub fn replay<G: GameRules>(
    rules: &G,
    initial: &G::State,
    events: &[EventEnvelope<G::Event>],
) -> Result<G::State, UndoError> {
    let mut state = initial.clone();
    for (index, envelope) in events.iter().enumerate() {
        rules
            .apply(&mut state, &envelope.player, &envelope.event)
            .map_err(|error| UndoError::ReplayDiverged {
                index,
                reason: error.to_string(),
            })?;
    }
    Ok(state)
}

/// Everything that only exists once the match started.
struct MatchRecord<G: GameRules> {
    initial: G::State,
    current: G::State,
    history: Vec<EventEnvelope<G::Event>>,
    undo_generation: u32,
}

/// The pre-game side of the session the projection is built from.
pub struct LobbyView<'a> {
    pub identity: &'a SessionIdentity,
    pub display_name: &'a str,
    pub has_password: bool,
    pub rule_set: &'a str,
    pub roster: &'a [String],
    pub disconnected: Vec<String>,
    pub observer_count: u32,
}

/// Owns the authoritative game state and the history.
pub struct SessionStateHolder<G: GameRules> {
    rules: Arc<G>,
    state_codec: Arc<dyn SnapshotCodec<G::State>>,
    record: Option<MatchRecord<G>>,
}

impl<G: GameRules> SessionStateHolder<G> {
    pub fn new(rules: Arc<G>, state_codec: Arc<dyn SnapshotCodec<G::State>>) -> Self {
        Self {
            rules,
            state_codec,
            record: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.record.is_some() {
            SessionPhase::InProgress
        } else {
            SessionPhase::PreGame
        }
    }

    /// Leaves the pre-game phase with `initial` as the root of the history.
    pub fn start_match(&mut self, initial: G::State) -> Result<(), HostError> {
        if self.record.is_some() {
            return Err(HostError::AlreadyStarted);
        }
        self.record = Some(MatchRecord {
            current: initial.clone(),
            initial,
            history: Vec::new(),
            undo_generation: 0,
        });
        Ok(())
    }

    /// Applies the event on a working copy and commits it on success.
    /// Returns the history length after the append.
    pub fn apply(&mut self, envelope: EventEnvelope<G::Event>) -> Result<usize, ApplyError> {
        let Some(record) = self.record.as_mut() else {
            return Err(ApplyError::MatchNotStarted);
        };
        let mut working = record.current.clone();
        self.rules
            .apply(&mut working, &envelope.player, &envelope.event)?;
        record.current = working;
        record.history.push(envelope);
        Ok(record.history.len())
    }

    pub fn state(&self) -> Option<&G::State> {
        self.record.as_ref().map(|record| &record.current)
    }

    pub fn history(&self) -> &[EventEnvelope<G::Event>] {
        self.record
            .as_ref()
            .map(|record| record.history.as_slice())
            .unwrap_or_default()
    }

    pub fn history_len(&self) -> usize {
        self.history().len()
    }

    /// How many undos were committed since the start.
    pub fn undo_generation(&self) -> u32 {
        self.record
            .as_ref()
            .map(|record| record.undo_generation)
            .unwrap_or_default()
    }

    /// The serialized current state, enough to rebuild it without replay.
    pub fn snapshot(&self) -> Result<String, HostError> {
        let state = self.state().ok_or(HostError::NotStarted)?;
        Ok(self.state_codec.encode(state)?)
    }

    /// The state after the first `to_index` events. Does not touch the holder.
    pub fn replay(&self, to_index: usize) -> Result<G::State, UndoError> {
        let record = self.record.as_ref().ok_or(UndoError::MatchNotStarted)?;
        if to_index > record.history.len() {
            return Err(UndoError::IndexOutOfRange {
                requested: to_index,
                len: record.history.len(),
            });
        }
        replay(
            self.rules.as_ref(),
            &record.initial,
            &record.history[..to_index],
        )
    }

    /// Resolves the target (`None` is one before the most recent event) and computes the state for it.
    /// Pure, the caller commits with [`Self::commit_undo`].
    pub fn undo(&self, to_index: Option<usize>) -> Result<(usize, G::State), UndoError> {
        let len = self.record.as_ref().ok_or(UndoError::MatchNotStarted)?.history.len();
        let target = match to_index {
            Some(index) => index,
            None => len.checked_sub(1).ok_or(UndoError::NothingToUndo)?,
        };
        let state = self.replay(target)?;
        Ok((target, state))
    }

    /// Replaces the state with an undo result and truncates the history to `to_index`.
    pub fn commit_undo(&mut self, to_index: usize, state: G::State) {
        if let Some(record) = self.record.as_mut() {
            record.history.truncate(to_index);
            record.current = state;
            record.undo_generation = record.undo_generation.wrapping_add(1);
        }
    }

    pub fn summary(&self) -> Option<MatchSummary> {
        self.state().map(|state| self.rules.summary(state))
    }

    /// The player list of the running match, empty before the start.
    pub fn match_players(&self) -> Vec<String> {
        self.summary().map(|summary| summary.players).unwrap_or_default()
    }

    pub fn last_event_ms(&self) -> Option<i64> {
        self.history().last().map(|envelope| envelope.timestamp_ms)
    }

    /// Derives the discovery projection. Works in every phase.
    pub fn projection(&self, lobby: LobbyView<'_>) -> SessionInfo {
        let summary = self.summary();
        let session_phase = self.phase();
        let summary_ref = summary.as_ref();
        SessionInfo {
            session_id: lobby.identity.session_id().to_string(),
            host_id: lobby.identity.host_id().to_string(),
            display_name: lobby.display_name.to_string(),
            has_password: lobby.has_password,
            players: summary_ref
                .map(|s| s.players.clone())
                .unwrap_or_else(|| lobby.roster.to_vec()),
            factions: summary_ref.map(|s| s.factions.clone()).unwrap_or_default(),
            bot_count: summary_ref.map(|s| s.bot_count).unwrap_or_default(),
            rule_set: lobby.rule_set.to_string(),
            session_phase,
            phase: summary_ref.map(|s| s.phase.clone()).unwrap_or_default(),
            main_phase: summary_ref
                .map(|s| s.main_phase.clone())
                .unwrap_or_default(),
            turn: summary_ref.map(|s| s.turn).unwrap_or_default(),
            last_event_ms: self.last_event_ms(),
            disconnected: lobby.disconnected,
            observer_count: lobby.observer_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingGame, Tally, envelope};
    use crate::traits::JsonCodec;

    fn holder() -> SessionStateHolder<CountingGame> {
        SessionStateHolder::new(Arc::new(CountingGame), Arc::new(JsonCodec))
    }

    fn started() -> SessionStateHolder<CountingGame> {
        let mut holder = holder();
        holder
            .start_match(Tally::new(&["Alice", "Bob"]))
            .unwrap();
        holder
    }

    #[test]
    fn apply_before_start_fails() {
        let mut holder = holder();
        assert_eq!(holder.phase(), SessionPhase::PreGame);
        assert_eq!(
            holder.apply(envelope("Alice", 1)),
            Err(ApplyError::MatchNotStarted)
        );
        assert_eq!(holder.history_len(), 0);
    }

    #[test]
    fn failed_apply_leaves_state_unchanged() {
        let mut holder = started();
        holder.apply(envelope("Alice", 2)).unwrap();
        let before = holder.state().unwrap().clone();

        // Alice moved already, Bob is next.
        let result = holder.apply(envelope("Alice", 5));
        assert!(matches!(result, Err(ApplyError::Rejected(_))));
        assert_eq!(holder.state().unwrap(), &before);
        assert_eq!(holder.history_len(), 1);
    }

    #[test]
    fn full_replay_matches_direct_application() {
        let mut holder = started();
        for (player, amount) in [("Alice", 1), ("Bob", 2), ("Alice", 3), ("Bob", 4)] {
            holder.apply(envelope(player, amount)).unwrap();
        }
        let replayed = holder.replay(holder.history_len()).unwrap();
        assert_eq!(&replayed, holder.state().unwrap());
        let (target, via_undo) = holder.undo(Some(holder.history_len())).unwrap();
        assert_eq!(target, 4);
        assert_eq!(&via_undo, holder.state().unwrap());
    }

    #[test]
    fn undo_to_one_after_three_events() {
        let mut holder = started();
        holder.apply(envelope("Alice", 1)).unwrap();
        let after_first = holder.state().unwrap().clone();
        holder.apply(envelope("Bob", 2)).unwrap();
        holder.apply(envelope("Alice", 3)).unwrap();
        assert_eq!(holder.history_len(), 3);

        let (target, state) = holder.undo(Some(1)).unwrap();
        assert_eq!(holder.undo_generation(), 0);
        holder.commit_undo(target, state);
        assert_eq!(holder.state().unwrap(), &after_first);
        assert_eq!(holder.history_len(), 1);
        assert_eq!(holder.undo_generation(), 1);
    }

    #[test]
    fn undo_is_idempotent_for_same_index() {
        let mut holder = started();
        holder.apply(envelope("Alice", 1)).unwrap();
        holder.apply(envelope("Bob", 2)).unwrap();

        let (_, first) = holder.undo(Some(1)).unwrap();
        let (_, second) = holder.undo(Some(1)).unwrap();
        assert_eq!(first, second);

        holder.commit_undo(1, first.clone());
        let (_, again) = holder.undo(Some(1)).unwrap();
        assert_eq!(again, first);
        assert_eq!(holder.history_len(), 1);
    }

    #[test]
    fn undo_without_index_goes_one_back() {
        let mut holder = started();
        assert_eq!(holder.undo(None), Err(UndoError::NothingToUndo));
        holder.apply(envelope("Alice", 1)).unwrap();
        holder.apply(envelope("Bob", 2)).unwrap();
        let (target, _) = holder.undo(None).unwrap();
        assert_eq!(target, 1);
    }

    #[test]
    fn undo_beyond_history_fails() {
        let mut holder = started();
        holder.apply(envelope("Alice", 1)).unwrap();
        assert_eq!(
            holder.undo(Some(5)),
            Err(UndoError::IndexOutOfRange {
                requested: 5,
                len: 1
            })
        );
        assert_eq!(self::holder().undo(None), Err(UndoError::MatchNotStarted));
    }

    #[test]
    fn snapshot_round_trips_through_codec() {
        let mut holder = started();
        holder.apply(envelope("Alice", 7)).unwrap();
        let raw = holder.snapshot().unwrap();
        let decoded: Tally = JsonCodec.decode(&raw).unwrap();
        assert_eq!(&decoded, holder.state().unwrap());
        assert!(matches!(self::holder().snapshot(), Err(HostError::NotStarted)));
    }

    #[test]
    fn start_twice_fails() {
        let mut holder = started();
        assert!(matches!(
            holder.start_match(Tally::new(&["Carol"])),
            Err(HostError::AlreadyStarted)
        ));
    }

    #[test]
    fn projection_before_and_after_start() {
        let identity = SessionIdentity::generate();
        let roster = vec!["Alice".to_string(), "Bob".to_string()];
        let mut holder = holder();

        let lobby = |disconnected: Vec<String>| LobbyView {
            identity: &identity,
            display_name: "Friday match",
            has_password: true,
            rule_set: "standard",
            roster: &roster,
            disconnected,
            observer_count: 1,
        };

        let info = holder.projection(lobby(Vec::new()));
        assert_eq!(info.session_phase, SessionPhase::PreGame);
        assert_eq!(info.players, roster);
        assert_eq!(info.turn, 0);
        assert_eq!(info.last_event_ms, None);
        assert!(info.has_password);
        assert_eq!(info.session_id, identity.session_id());

        holder.start_match(Tally::new(&["Bob", "Alice"])).unwrap();
        holder.apply(envelope("Bob", 3)).unwrap();
        let info = holder.projection(lobby(vec!["Alice".to_string()]));
        assert_eq!(info.session_phase, SessionPhase::InProgress);
        // After the start the player list comes from the game state.
        assert_eq!(info.players, vec!["Bob".to_string(), "Alice".to_string()]);
        assert_eq!(info.turn, 1);
        assert!(info.last_event_ms.is_some());
        assert_eq!(info.disconnected, vec!["Alice".to_string()]);
        assert_eq!(info.factions.get("Bob").map(String::as_str), Some("odd"));
    }
}
