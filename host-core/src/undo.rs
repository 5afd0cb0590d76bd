//! Rewinding the authoritative history.
//!
//! An undo is not an event: it truncates the history to the target index and replaces the state with
//! the replay of the remaining prefix. Peers get the target index and run the same replay on their
//! replica.

use crate::error::UndoError;
use crate::session::{HostCommand, HostNotification, HostSession};
use crate::traits::GameRules;
use protocol::PeerMessage;
use tracing::info;

impl<G: GameRules> HostSession<G> {
    /// Rewinds to the state after the first `to_index` events, `None` meaning one before the most
    /// recent. Returns the resolved index together with the commands.
    pub fn request_undo(
        &mut self,
        to_index: Option<usize>,
    ) -> Result<(usize, Vec<HostCommand<G::Event>>), UndoError> {
        let (target, state) = self.holder.undo(to_index)?;
        let dropped = self.holder.history_len() - target;
        self.holder.commit_undo(target, state);
        info!(
            session_id = self.identity.session_id(),
            to_index = target,
            dropped,
            "Undo applied"
        );
        Ok((
            target,
            vec![
                HostCommand::Broadcast(PeerMessage::Undo {
                    session_id: self.identity.session_id().to_string(),
                    to_index: target,
                    undo_generation: self.holder.undo_generation(),
                }),
                HostCommand::Notify(HostNotification::UndoApplied { to_index: target }),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::HostConfig;
    use crate::error::UndoError;
    use crate::identity::SessionIdentity;
    use crate::session::{Collaborators, HostCommand, HostSession};
    use crate::test_support::{Add, CountingGame, Tally};
    use protocol::{HostRequest, PeerMessage};
    use tokio::time::Instant;

    fn session_with_events(amounts: &[i64]) -> HostSession<CountingGame> {
        let mut session = HostSession::new(
            SessionIdentity::generate(),
            HostConfig::default(),
            Collaborators::json(CountingGame),
        );
        let now = Instant::now();
        for (peer, name) in [(1, "Alice"), (2, "Bob")] {
            session.handle_request(
                peer,
                HostRequest::PlayerJoined {
                    name: name.to_string(),
                    password_hash: None,
                },
                now,
            );
        }
        session
            .start_match(Tally::new(&["Alice", "Bob"]), &String::new())
            .unwrap();
        for (index, amount) in amounts.iter().enumerate() {
            let peer = if index % 2 == 0 { 1 } else { 2 };
            session.handle_request(peer, HostRequest::Event(Add(*amount)), now);
        }
        session
    }

    #[test]
    fn undo_to_index_truncates_and_broadcasts() {
        let mut session = session_with_events(&[1, 2, 3]);
        assert_eq!(session.holder().history_len(), 3);

        let (target, commands) = session.request_undo(Some(1)).unwrap();
        assert_eq!(target, 1);
        assert!(matches!(
            &commands[0],
            HostCommand::Broadcast(PeerMessage::Undo { to_index: 1, .. })
        ));
        assert_eq!(session.holder().history_len(), 1);
        let state = session.holder().state().unwrap();
        assert_eq!(state.total, 1);
        assert_eq!(state.moves, 1);
    }

    #[test]
    fn undo_without_index_drops_the_latest_event() {
        let mut session = session_with_events(&[5, 6]);
        let (target, _) = session.request_undo(None).unwrap();
        assert_eq!(target, 1);
        assert_eq!(session.holder().state().unwrap().total, 5);

        // Bob is on turn again and can play a different move.
        session.handle_request(2, HostRequest::Event(Add(10)), Instant::now());
        assert_eq!(session.holder().state().unwrap().total, 15);
    }

    #[test]
    fn undo_errors() {
        let mut session = session_with_events(&[]);
        assert_eq!(session.request_undo(None), Err(UndoError::NothingToUndo));
        assert_eq!(
            session.request_undo(Some(2)),
            Err(UndoError::IndexOutOfRange {
                requested: 2,
                len: 0
            })
        );

        let mut fresh: HostSession<CountingGame> = HostSession::new(
            SessionIdentity::generate(),
            HostConfig::default(),
            Collaborators::json(CountingGame),
        );
        assert_eq!(fresh.request_undo(Some(0)), Err(UndoError::MatchNotStarted));
    }
}
