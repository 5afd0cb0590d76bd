//! Inbound game events, chat lines and media blobs.
//!
//! An event is `Received -> Applied -> Broadcast` or `Received -> Rejected -> ErrorReported`.
//! The host stamps it with the name behind the originating connection and the current time, applies
//! it through the state holder and only then republishes it, the submitter included. Peers never
//! apply their own actions ahead of that broadcast. A rejection reaches the submitter only.

use crate::error::ApplyError;
use crate::session::{HostCommand, HostNotification, HostSession, ParticipantRole};
use crate::traits::GameRules;
use chrono::Utc;
use protocol::{ChatLine, EventEnvelope, PeerId, PeerMessage};
use tracing::{debug, info, warn};

impl<G: GameRules> HostSession<G> {
    pub(crate) fn relay_event(
        &mut self,
        peer: PeerId,
        event: G::Event,
    ) -> Vec<HostCommand<G::Event>> {
        let player = match self.connections.get(&peer) {
            Some(participant) if participant.role == ParticipantRole::Player => {
                participant.name.clone()
            }
            Some(observer) => {
                let name = observer.name.clone();
                return self.reject(peer, Some(name), ApplyError::NotAPlayer);
            }
            None => return self.reject(peer, None, ApplyError::NotAPlayer),
        };

        let envelope = EventEnvelope {
            event,
            player: player.clone(),
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        match self.holder.apply(envelope.clone()) {
            Ok(event_count) => {
                debug!(peer, player = %player, event_count, "Event applied");
                vec![
                    HostCommand::Broadcast(PeerMessage::NotifyUpdate {
                        session_id: self.identity.session_id().to_string(),
                        event_count,
                        undo_generation: self.holder.undo_generation(),
                        event: envelope,
                    }),
                    HostCommand::Notify(HostNotification::EventApplied { event_count }),
                ]
            }
            Err(error) => self.reject(peer, Some(player), error),
        }
    }

    /// The local notification names the sender, unadmitted connections get none.
    fn reject(
        &self,
        peer: PeerId,
        sender: Option<String>,
        error: ApplyError,
    ) -> Vec<HostCommand<G::Event>> {
        warn!(peer, sender = ?sender, %error, "Event rejected");
        let reason = error.to_string();
        let mut commands = vec![HostCommand::Direct(
            peer,
            PeerMessage::EventRejected {
                session_id: self.identity.session_id().to_string(),
                reason: reason.clone(),
            },
        )];
        if let Some(player) = sender {
            commands.push(HostCommand::Notify(HostNotification::EventRejected {
                player,
                reason,
            }));
        }
        commands
    }

    /// Chat bypasses the history, it only has to pass the moderator.
    pub(crate) fn relay_chat(&mut self, peer: PeerId, body: String) -> Vec<HostCommand<G::Event>> {
        let Some(participant) = self.connections.get(&peer) else {
            debug!(peer, "Chat from an unadmitted connection");
            return Vec::new();
        };
        if !self.moderator.review(&participant.name, &body) {
            info!(peer, sender = %participant.name, "Chat line refused by moderation");
            return Vec::new();
        }
        let message = ChatLine {
            sender: participant.name.clone(),
            body,
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        vec![
            HostCommand::Broadcast(PeerMessage::ApproveChatMessage {
                session_id: self.identity.session_id().to_string(),
                message: message.clone(),
            }),
            HostCommand::Notify(HostNotification::ChatApproved(message)),
        ]
    }

    /// Opaque blobs from players are passed on to everyone.
    pub(crate) fn relay_media(
        &mut self,
        peer: PeerId,
        payload: Vec<u8>,
    ) -> Vec<HostCommand<G::Event>> {
        match self.connections.get(&peer) {
            Some(participant) if participant.role == ParticipantRole::Player => {
                vec![HostCommand::Broadcast(PeerMessage::RelayMedia {
                    session_id: self.identity.session_id().to_string(),
                    from: participant.name.clone(),
                    payload,
                })]
            }
            _ => {
                debug!(peer, "Media from a connection that is not a player");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::admission::hash_password;
    use crate::config::HostConfig;
    use crate::error::ApplyError;
    use crate::identity::SessionIdentity;
    use crate::session::{Collaborators, HostCommand, HostNotification, HostSession};
    use crate::test_support::{Add, CountingGame, Tally};
    use crate::traits::{ApproveAll, ChatModerator, JsonCodec};
    use protocol::{HostRequest, PeerMessage};
    use std::sync::Arc;
    use tokio::time::Instant;

    struct NoShouting;

    impl ChatModerator for NoShouting {
        fn review(&self, _sender: &str, body: &str) -> bool {
            body.to_uppercase() != body
        }
    }

    fn running_session(moderator: Arc<dyn ChatModerator>) -> HostSession<CountingGame> {
        let mut session = HostSession::new(
            SessionIdentity::generate(),
            HostConfig::default(),
            Collaborators {
                rules: Arc::new(CountingGame),
                state_codec: Arc::new(JsonCodec),
                config_codec: Arc::new(JsonCodec),
                moderator,
            },
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
            .handle_request(
                3,
                HostRequest::ObserverJoined {
                    name: "Olga".to_string(),
                },
                now,
            );
        session
            .start_match(Tally::new(&["Alice", "Bob"]), &String::new())
            .unwrap();
        session
    }

    fn event(
        session: &mut HostSession<CountingGame>,
        peer: u16,
        amount: i64,
    ) -> Vec<HostCommand<Add>> {
        session.handle_request(peer, HostRequest::Event(Add(amount)), Instant::now())
    }

    #[test]
    fn applied_event_is_broadcast_with_stamp() {
        let mut session = running_session(Arc::new(ApproveAll));
        let commands = event(&mut session, 1, 4);
        match &commands[0] {
            HostCommand::Broadcast(PeerMessage::NotifyUpdate {
                event_count, event, ..
            }) => {
                assert_eq!(*event_count, 1);
                assert_eq!(event.player, "Alice");
                assert_eq!(event.event, Add(4));
                assert!(event.timestamp_ms > 0);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(commands.contains(&HostCommand::Notify(HostNotification::EventApplied {
            event_count: 1
        })));
        assert_eq!(session.holder().history_len(), 1);
    }

    #[test]
    fn rejected_event_goes_back_to_submitter_only() {
        let mut session = running_session(Arc::new(ApproveAll));
        event(&mut session, 1, 4);
        let before = session.holder().state().unwrap().clone();

        // Out of turn.
        let commands = event(&mut session, 1, 2);
        assert!(commands.iter().all(|c| !matches!(c, HostCommand::Broadcast(_))));
        match &commands[0] {
            HostCommand::Direct(1, PeerMessage::EventRejected { reason, .. }) => {
                assert_eq!(reason, "It is Bob's turn");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(session.holder().state().unwrap(), &before);
        assert_eq!(session.holder().history_len(), 1);
    }

    #[test]
    fn non_players_cannot_act() {
        let mut session = running_session(Arc::new(ApproveAll));
        for peer in [3, 9] {
            let commands = event(&mut session, peer, 1);
            match &commands[0] {
                HostCommand::Direct(to, PeerMessage::EventRejected { reason, .. }) => {
                    assert_eq!(*to, peer);
                    assert_eq!(reason, &ApplyError::NotAPlayer.to_string());
                }
                other => panic!("unexpected command {other:?}"),
            }
            let notified: Vec<&HostNotification> = commands
                .iter()
                .filter_map(|command| match command {
                    HostCommand::Notify(notification) => Some(notification),
                    _ => None,
                })
                .collect();
            if peer == 3 {
                assert_eq!(
                    notified,
                    vec![&HostNotification::EventRejected {
                        player: "Olga".to_string(),
                        reason: ApplyError::NotAPlayer.to_string(),
                    }]
                );
            } else {
                assert!(notified.is_empty());
            }
        }
        let commands = session.handle_request(
            3,
            HostRequest::Media {
                payload: vec![1, 2, 3],
            },
            Instant::now(),
        );
        assert!(commands.is_empty());
        assert_eq!(session.holder().history_len(), 0);
    }

    #[test]
    fn events_before_start_are_rejected() {
        let mut session: HostSession<CountingGame> = HostSession::new(
            SessionIdentity::generate(),
            HostConfig {
                password: Some("pw".to_string()),
                ..HostConfig::default()
            },
            Collaborators::json(CountingGame),
        );
        session.handle_request(
            1,
            HostRequest::PlayerJoined {
                name: "Alice".to_string(),
                password_hash: Some(hash_password("pw")),
            },
            Instant::now(),
        );
        let commands = event(&mut session, 1, 1);
        assert!(matches!(
            &commands[0],
            HostCommand::Direct(1, PeerMessage::EventRejected { reason, .. })
                if reason == &ApplyError::MatchNotStarted.to_string()
        ));
    }

    #[test]
    fn chat_passes_moderation_before_broadcast() {
        let mut session = running_session(Arc::new(NoShouting));
        let commands = session.handle_request(
            3,
            HostRequest::ChatMessage {
                body: "good luck".to_string(),
            },
            Instant::now(),
        );
        match &commands[0] {
            HostCommand::Broadcast(PeerMessage::ApproveChatMessage { message, .. }) => {
                assert_eq!(message.sender, "Olga");
                assert_eq!(message.body, "good luck");
            }
            other => panic!("unexpected command {other:?}"),
        }

        let commands = session.handle_request(
            2,
            HostRequest::ChatMessage {
                body: "HURRY UP".to_string(),
            },
            Instant::now(),
        );
        assert!(commands.is_empty());
        // Chat never touches the history.
        assert_eq!(session.holder().history_len(), 0);
    }

    #[test]
    fn media_is_relayed_from_players() {
        let mut session = running_session(Arc::new(ApproveAll));
        let commands = session.handle_request(
            2,
            HostRequest::Media {
                payload: vec![7; 4],
            },
            Instant::now(),
        );
        assert!(matches!(
            &commands[0],
            HostCommand::Broadcast(PeerMessage::RelayMedia { from, payload, .. })
                if from == "Bob" && payload == &vec![7; 4]
        ));
    }
}
