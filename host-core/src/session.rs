//! The single logical actor of a hosted session.
//!
//! [`HostSession`] owns everything that gets mutated: roster, observers, heartbeat table, the state
//! holder and the mapping from connections to participants. It never touches the network itself,
//! every entry point returns a list of [`HostCommand`]s that the host dispatches in order before
//! releasing the lock. That way a state mutation always commits before anything gets sent, peers
//! see effects in commit order, and a failing send can never undo it.
//!
//! The entry points of the event relay, the undo coordinator and the announcement loop live in their
//! own modules as further `impl` blocks.

use crate::admission::{
    JoinContext, RejoinContext, evaluate_join, evaluate_observer_join, evaluate_observer_rejoin,
    evaluate_rejoin, normalize_name,
};
use crate::config::HostConfig;
use crate::error::{AdmissionError, HostError};
use crate::heartbeat::HeartbeatTracker;
use crate::identity::SessionIdentity;
use crate::state_holder::{LobbyView, SessionStateHolder};
use crate::traits::{
    ApproveAll, ChatModerator, GameRules, JsonCodec, SerializationCap, SnapshotCodec,
};
use protocol::{
    ChatLine, HostBound, HostRequest, PeerId, PeerMessage, SessionInfo, SessionPhase,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What the local collaborators (UI, storage) get told about.
#[derive(Clone, Debug, PartialEq)]
pub enum HostNotification {
    PlayerJoined(String),
    PlayerLeft(String),
    PlayerRejoined(String),
    ObserverJoined(String),
    /// The pre-game roster after a join or a prune.
    RosterChanged(Vec<String>),
    GameInfo(SessionInfo),
    /// Players of the running match that count as disconnected, sent whenever that set changes.
    PlayersDisconnected(Vec<String>),
    EventApplied {
        event_count: usize,
    },
    EventRejected {
        player: String,
        reason: String,
    },
    UndoApplied {
        to_index: usize,
    },
    ChatApproved(ChatLine),
}

/// Side effects an entry point asks for.
#[derive(Clone, Debug, PartialEq)]
pub enum HostCommand<E> {
    Broadcast(PeerMessage<E>),
    Direct(PeerId, PeerMessage<E>),
    /// Publish on the discovery channel.
    Announce(SessionInfo),
    Notify(HostNotification),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticipantRole {
    Player,
    Observer,
}

/// Who sits behind an admitted connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub name: String,
    pub role: ParticipantRole,
}

/// The collaborators a session gets constructed with.
pub struct Collaborators<G: GameRules> {
    pub rules: Arc<G>,
    pub state_codec: Arc<dyn SnapshotCodec<G::State>>,
    pub config_codec: Arc<dyn SnapshotCodec<G::Config>>,
    pub moderator: Arc<dyn ChatModerator>,
}

impl<G> Collaborators<G>
where
    G: GameRules,
    G::State: SerializationCap,
    G::Config: SerializationCap,
{
    /// JSON snapshots and a moderator that approves everything.
    pub fn json(rules: G) -> Self {
        Self {
            rules: Arc::new(rules),
            state_codec: Arc::new(JsonCodec),
            config_codec: Arc::new(JsonCodec),
            moderator: Arc::new(ApproveAll),
        }
    }
}

pub struct HostSession<G: GameRules> {
    pub(crate) identity: SessionIdentity,
    pub(crate) config: HostConfig,
    pub(crate) password_hash: Option<String>,
    /// Joined player names in join order, only changes before the start.
    pub(crate) roster: Vec<String>,
    pub(crate) observers: Vec<String>,
    pub(crate) heartbeats: HeartbeatTracker,
    pub(crate) holder: SessionStateHolder<G>,
    pub(crate) connections: HashMap<PeerId, Participant>,
    pub(crate) moderator: Arc<dyn ChatModerator>,
    config_codec: Arc<dyn SnapshotCodec<G::Config>>,
    /// Encoded match configuration, set on start.
    config_snapshot: String,
    /// The disconnected set at the last announcement.
    pub(crate) reported_disconnected: Vec<String>,
}

impl<G: GameRules> HostSession<G> {
    pub fn new(
        identity: SessionIdentity,
        config: HostConfig,
        collaborators: Collaborators<G>,
    ) -> Self {
        let password_hash = config.password_hash();
        Self {
            identity,
            config,
            password_hash,
            roster: Vec::new(),
            observers: Vec::new(),
            heartbeats: HeartbeatTracker::new(),
            holder: SessionStateHolder::new(collaborators.rules, collaborators.state_codec),
            connections: HashMap::new(),
            moderator: collaborators.moderator,
            config_codec: collaborators.config_codec,
            config_snapshot: String::new(),
            reported_disconnected: Vec::new(),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.holder.phase()
    }

    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    pub fn observers(&self) -> &[String] {
        &self.observers
    }

    pub fn holder(&self) -> &SessionStateHolder<G> {
        &self.holder
    }

    pub fn heartbeats(&self) -> &HeartbeatTracker {
        &self.heartbeats
    }

    pub fn participant(&self, peer: PeerId) -> Option<&Participant> {
        self.connections.get(&peer)
    }

    /// The names that count as players in the current phase.
    pub(crate) fn player_names(&self) -> Vec<String> {
        match self.phase() {
            SessionPhase::PreGame => self.roster.clone(),
            SessionPhase::InProgress => self.holder.match_players(),
        }
    }

    /// Players of the running match without a recent heartbeat. Empty before the start.
    pub fn disconnected_players(&self, now: Instant) -> Vec<String> {
        if self.phase() == SessionPhase::PreGame {
            return Vec::new();
        }
        let players = self.holder.match_players();
        self.heartbeats
            .list_disconnected(
                players.iter().map(String::as_str),
                now,
                self.config.disconnect_threshold(),
            )
            .map(str::to_string)
            .collect()
    }

    /// The discovery projection as of `now`.
    pub fn session_info(&self, now: Instant) -> SessionInfo {
        self.holder.projection(LobbyView {
            identity: &self.identity,
            display_name: &self.config.display_name,
            has_password: self.password_hash.is_some(),
            rule_set: &self.config.rule_set,
            roster: &self.roster,
            disconnected: self.disconnected_players(now),
            observer_count: self.observers.len() as u32,
        })
    }

    /// The full state for one peer (`Some(name)`) or everyone (`None`).
    pub fn load_game(
        &self,
        player_name: Option<String>,
    ) -> Result<PeerMessage<G::Event>, HostError> {
        Ok(PeerMessage::LoadGame {
            session_id: self.identity.session_id().to_string(),
            state_snapshot: self.holder.snapshot()?,
            player_name,
            config_snapshot: self.config_snapshot.clone(),
            event_count: self.holder.history_len(),
            undo_generation: self.holder.undo_generation(),
        })
    }

    /// Leaves the pre-game phase and sends the initial state to every peer.
    pub fn start_match(
        &mut self,
        initial: G::State,
        match_config: &G::Config,
    ) -> Result<Vec<HostCommand<G::Event>>, HostError> {
        let config_snapshot = self.config_codec.encode(match_config)?;
        self.holder.start_match(initial)?;
        self.config_snapshot = config_snapshot;
        info!(
            session_id = self.identity.session_id(),
            players = ?self.holder.match_players(),
            "Match started"
        );
        Ok(vec![
            HostCommand::Broadcast(self.load_game(None)?),
            HostCommand::Notify(HostNotification::GameInfo(self.session_info(Instant::now()))),
        ])
    }

    /// Broadcasts a turn timer.
    pub fn set_timer(&self, seconds: u32) -> Vec<HostCommand<G::Event>> {
        vec![HostCommand::Broadcast(PeerMessage::SetTimer {
            session_id: self.identity.session_id().to_string(),
            seconds,
        })]
    }

    pub fn handle_peer_connected(&mut self, peer: PeerId) -> Vec<HostCommand<G::Event>> {
        debug!(peer, "Connection opened, awaiting join");
        Vec::new()
    }

    /// Forgets the connection. Players stay in roster and match, they stop heartbeating and get
    /// classified disconnected in time.
    pub fn handle_peer_left(&mut self, peer: PeerId) -> Vec<HostCommand<G::Event>> {
        let Some(participant) = self.connections.remove(&peer) else {
            debug!(peer, "Unadmitted connection left");
            return Vec::new();
        };
        info!(peer, name = %participant.name, role = ?participant.role, "Participant left");
        match participant.role {
            ParticipantRole::Player => {
                vec![HostCommand::Notify(HostNotification::PlayerLeft(participant.name))]
            }
            ParticipantRole::Observer => {
                let name = normalize_name(&participant.name);
                self.observers.retain(|observer| normalize_name(observer) != name);
                Vec::new()
            }
        }
    }

    /// Entry point for everything arriving on the shared channel. Requests for other hosts get dropped.
    pub fn handle_bound(
        &mut self,
        peer: PeerId,
        bound: HostBound<G::Event>,
        now: Instant,
    ) -> Vec<HostCommand<G::Event>> {
        if bound.host_id != self.identity.host_id() {
            debug!(peer, host_id = %bound.host_id, "Request for another host");
            return Vec::new();
        }
        self.handle_request(peer, bound.request, now)
    }

    /// The single dispatch over all request kinds.
    pub fn handle_request(
        &mut self,
        peer: PeerId,
        request: HostRequest<G::Event>,
        now: Instant,
    ) -> Vec<HostCommand<G::Event>> {
        match request {
            HostRequest::PlayerJoined {
                name,
                password_hash,
            } => self.join_player(peer, &name, password_hash.as_deref(), now),
            HostRequest::PlayerRejoined {
                name,
                password_hash,
            } => self.rejoin_player(peer, &name, password_hash.as_deref(), now),
            HostRequest::ObserverJoined { name } => self.join_observer(peer, &name, false),
            HostRequest::ObserverRejoined { name } => self.join_observer(peer, &name, true),
            HostRequest::Heartbeat { name } => {
                self.record_heartbeat(peer, &name, now);
                Vec::new()
            }
            HostRequest::ChatMessage { body } => self.relay_chat(peer, body),
            HostRequest::Event(event) => self.relay_event(peer, event),
            HostRequest::Media { payload } => self.relay_media(peer, payload),
            HostRequest::RequestSnapshot => self.resend_snapshot(peer),
        }
    }

    fn admission_reply(
        &self,
        peer: PeerId,
        role: AdmissionReply,
        result: &Result<(), AdmissionError>,
    ) -> HostCommand<G::Event> {
        let session_id = self.identity.session_id().to_string();
        let host_id = self.identity.host_id().to_string();
        let deny_message = result.as_ref().err().map(ToString::to_string);
        let message = match role {
            AdmissionReply::Join => PeerMessage::RespondPlayerJoined {
                session_id,
                peer_id: peer,
                host_id,
                deny_message,
            },
            AdmissionReply::Rejoin => PeerMessage::RespondPlayerRejoined {
                session_id,
                peer_id: peer,
                host_id,
                deny_message,
            },
            AdmissionReply::Observer => PeerMessage::RespondObserverJoined {
                session_id,
                peer_id: peer,
                host_id,
                deny_message,
            },
        };
        HostCommand::Direct(peer, message)
    }

    fn join_player(
        &mut self,
        peer: PeerId,
        name: &str,
        password_hash: Option<&str>,
        now: Instant,
    ) -> Vec<HostCommand<G::Event>> {
        let result = evaluate_join(
            name,
            password_hash,
            &JoinContext {
                password_hash: self.password_hash.as_deref(),
                phase: self.phase(),
                roster: &self.roster,
                observers: &self.observers,
            },
        );
        let reply = self.admission_reply(peer, AdmissionReply::Join, &result);
        if let Err(error) = result {
            info!(peer, name, %error, "Join denied");
            return vec![reply];
        }

        let name = name.trim().to_string();
        self.roster.push(name.clone());
        self.heartbeats.record_heartbeat(&name, now);
        self.connections.insert(
            peer,
            Participant {
                name: name.clone(),
                role: ParticipantRole::Player,
            },
        );
        info!(peer, name = %name, "Player joined");
        vec![
            reply,
            HostCommand::Notify(HostNotification::PlayerJoined(name)),
            HostCommand::Notify(HostNotification::RosterChanged(self.roster.clone())),
        ]
    }

    fn rejoin_player(
        &mut self,
        peer: PeerId,
        name: &str,
        password_hash: Option<&str>,
        now: Instant,
    ) -> Vec<HostCommand<G::Event>> {
        let match_players = self.holder.match_players();
        let result = evaluate_rejoin(
            name,
            password_hash,
            &RejoinContext {
                password_hash: self.password_hash.as_deref(),
                phase: self.phase(),
                match_players: &match_players,
                heartbeats: &self.heartbeats,
                now,
                threshold: self.config.disconnect_threshold(),
            },
        );
        if let Err(error) = result {
            info!(peer, name, %error, "Rejoin denied");
            return vec![self.admission_reply(peer, AdmissionReply::Rejoin, &Err(error))];
        }

        // Use the spelling of the game state.
        let wanted = normalize_name(name);
        let name = match_players
            .into_iter()
            .find(|player| normalize_name(player) == wanted)
            .unwrap_or_else(|| name.trim().to_string());

        let load_game = match self.load_game(Some(name.clone())) {
            Ok(message) => message,
            Err(error) => {
                warn!(peer, name = %name, %error, "Could not build snapshot for rejoin");
                return vec![HostCommand::Direct(
                    peer,
                    PeerMessage::RespondPlayerRejoined {
                        session_id: self.identity.session_id().to_string(),
                        peer_id: peer,
                        host_id: self.identity.host_id().to_string(),
                        deny_message: Some(error.to_string()),
                    },
                )];
            }
        };

        // A stale connection of the same player must not keep acting for them.
        self.connections.retain(|_, participant| {
            participant.role != ParticipantRole::Player
                || normalize_name(&participant.name) != wanted
        });
        self.connections.insert(
            peer,
            Participant {
                name: name.clone(),
                role: ParticipantRole::Player,
            },
        );
        self.heartbeats.record_heartbeat(&name, now);
        info!(peer, name = %name, "Player rejoined");
        vec![
            self.admission_reply(peer, AdmissionReply::Rejoin, &Ok(())),
            HostCommand::Direct(peer, load_game),
            HostCommand::Notify(HostNotification::PlayerRejoined(name)),
        ]
    }

    fn join_observer(
        &mut self,
        peer: PeerId,
        name: &str,
        rejoin: bool,
    ) -> Vec<HostCommand<G::Event>> {
        let players = self.player_names();
        let result = if rejoin {
            evaluate_observer_rejoin(name, &players)
        } else {
            evaluate_observer_join(name, &self.observers, &players)
        };
        let reply = self.admission_reply(peer, AdmissionReply::Observer, &result);
        if let Err(error) = result {
            info!(peer, name, rejoin, %error, "Observer denied");
            return vec![reply];
        }

        let name = name.trim().to_string();
        let wanted = normalize_name(&name);
        if !self.observers.iter().any(|observer| normalize_name(observer) == wanted) {
            self.observers.push(name.clone());
        }
        self.connections.insert(
            peer,
            Participant {
                name: name.clone(),
                role: ParticipantRole::Observer,
            },
        );
        info!(peer, name = %name, rejoin, "Observer admitted");

        let mut commands = vec![reply];
        if self.phase() == SessionPhase::InProgress {
            match self.load_game(Some(name.clone())) {
                Ok(message) => commands.push(HostCommand::Direct(peer, message)),
                Err(error) => {
                    warn!(peer, name = %name, %error, "Could not build snapshot for observer")
                }
            }
        }
        commands.push(HostCommand::Notify(HostNotification::ObserverJoined(name)));
        commands
    }

    /// Only the connection a player got admitted on may keep that player alive.
    fn record_heartbeat(&mut self, peer: PeerId, name: &str, now: Instant) {
        match self.connections.get(&peer) {
            Some(participant)
                if participant.role == ParticipantRole::Player
                    && normalize_name(&participant.name) == normalize_name(name) =>
            {
                self.heartbeats.record_heartbeat(name, now);
            }
            _ => debug!(
                peer,
                name,
                "Ignoring heartbeat from a connection not admitted under that name"
            ),
        }
    }

    fn resend_snapshot(&self, peer: PeerId) -> Vec<HostCommand<G::Event>> {
        let Some(participant) = self.connections.get(&peer) else {
            debug!(peer, "Snapshot request from an unadmitted connection");
            return Vec::new();
        };
        if self.phase() != SessionPhase::InProgress {
            return Vec::new();
        }
        match self.load_game(Some(participant.name.clone())) {
            Ok(message) => vec![HostCommand::Direct(peer, message)],
            Err(error) => {
                warn!(peer, %error, "Could not build snapshot");
                Vec::new()
            }
        }
    }
}

#[derive(Clone, Copy)]
enum AdmissionReply {
    Join,
    Rejoin,
    Observer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::hash_password;
    use crate::test_support::{Add, CountingGame, Tally};
    use std::time::Duration;

    fn session(password: Option<&str>) -> HostSession<CountingGame> {
        let config = HostConfig {
            password: password.map(str::to_string),
            ..HostConfig::default()
        };
        HostSession::new(
            SessionIdentity::generate(),
            config,
            Collaborators::json(CountingGame),
        )
    }

    fn join(name: &str, password: Option<&str>) -> HostRequest<Add> {
        HostRequest::PlayerJoined {
            name: name.to_string(),
            password_hash: password.map(hash_password),
        }
    }

    fn rejoin(name: &str, password: Option<&str>) -> HostRequest<Add> {
        HostRequest::PlayerRejoined {
            name: name.to_string(),
            password_hash: password.map(hash_password),
        }
    }

    fn deny_message(commands: &[HostCommand<Add>]) -> Option<Option<String>> {
        commands.iter().find_map(|command| match command {
            HostCommand::Direct(
                _,
                PeerMessage::RespondPlayerJoined { deny_message, .. }
                | PeerMessage::RespondPlayerRejoined { deny_message, .. }
                | PeerMessage::RespondObserverJoined { deny_message, .. },
            ) => Some(deny_message.clone()),
            _ => None,
        })
    }

    fn has_direct_load_game(commands: &[HostCommand<Add>], peer: PeerId) -> bool {
        commands.iter().any(|command| {
            matches!(command, HostCommand::Direct(to, PeerMessage::LoadGame { .. }) if *to == peer)
        })
    }

    #[test]
    fn join_scenario_builds_roster() {
        let mut session = session(Some("abc"));
        let now = Instant::now();

        let commands = session.handle_request(1, join("Alice", Some("abc")), now);
        assert_eq!(deny_message(&commands), Some(None));
        assert!(commands.contains(&HostCommand::Notify(HostNotification::PlayerJoined(
            "Alice".to_string()
        ))));
        assert_eq!(session.roster(), ["Alice".to_string()]);

        let commands = session.handle_request(2, join("alice", Some("abc")), now);
        assert_eq!(
            deny_message(&commands),
            Some(Some(AdmissionError::DuplicateName.to_string()))
        );

        let commands = session.handle_request(3, join("Bob", Some("xyz")), now);
        assert_eq!(
            deny_message(&commands),
            Some(Some(AdmissionError::WrongPassword.to_string()))
        );
        assert_eq!(session.roster(), ["Alice".to_string()]);
        assert!(session.participant(2).is_none());
    }

    #[test]
    fn answers_go_only_to_the_requesting_peer() {
        let mut session = session(None);
        let commands = session.handle_request(4, join(" Carol ", None), Instant::now());
        for command in &commands {
            assert!(!matches!(command, HostCommand::Broadcast(_)));
        }
        match &commands[0] {
            HostCommand::Direct(4, PeerMessage::RespondPlayerJoined { peer_id, host_id, .. }) => {
                assert_eq!(*peer_id, 4);
                assert_eq!(host_id, session.identity().host_id());
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(session.roster(), ["Carol".to_string()]);
    }

    #[test]
    fn start_broadcasts_load_game_and_closes_joining() {
        let mut session = session(None);
        let now = Instant::now();
        session.handle_request(1, join("Alice", None), now);
        session.handle_request(2, join("Bob", None), now);

        let commands = session
            .start_match(Tally::new(&["Alice", "Bob"]), &"classic".to_string())
            .unwrap();
        match &commands[0] {
            HostCommand::Broadcast(PeerMessage::LoadGame {
                player_name,
                config_snapshot,
                event_count,
                ..
            }) => {
                assert_eq!(player_name, &None);
                assert_eq!(config_snapshot, "\"classic\"");
                assert_eq!(*event_count, 0);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(
            session.start_match(Tally::new(&["Alice"]), &String::new()),
            Err(HostError::AlreadyStarted)
        ));

        let commands = session.handle_request(3, join("Carol", None), now);
        assert_eq!(
            deny_message(&commands),
            Some(Some(AdmissionError::SessionNotJoinable.to_string()))
        );
    }

    #[test]
    fn rejoin_scenario() {
        let mut session = session(None);
        let start = Instant::now();
        session.handle_request(1, join("Alice", None), start);
        session.handle_request(2, join("Bob", None), start);
        session
            .start_match(Tally::new(&["Alice", "Bob"]), &String::new())
            .unwrap();

        // Alice keeps heartbeating, Bob went silent.
        let later = start + Duration::from_secs(20);
        session.handle_request(
            1,
            HostRequest::Heartbeat {
                name: "Alice".to_string(),
            },
            later,
        );
        assert_eq!(session.disconnected_players(later), vec!["Bob".to_string()]);

        let commands = session.handle_request(7, rejoin("bob", None), later);
        assert_eq!(deny_message(&commands), Some(None));
        assert!(has_direct_load_game(&commands, 7));
        assert!(commands.contains(&HostCommand::Notify(HostNotification::PlayerRejoined(
            "Bob".to_string()
        ))));
        assert_eq!(session.participant(7).map(|p| p.name.as_str()), Some("Bob"));
        // The old connection of Bob is gone.
        assert!(session.participant(2).is_none());
        assert!(session.disconnected_players(later).is_empty());

        let commands = session.handle_request(8, rejoin("Alice", None), later);
        assert_eq!(
            deny_message(&commands),
            Some(Some(AdmissionError::NotDisconnected.to_string()))
        );
        assert!(!has_direct_load_game(&commands, 8));

        let commands = session.handle_request(9, rejoin("Mallory", None), later);
        assert_eq!(
            deny_message(&commands),
            Some(Some(AdmissionError::UnknownPlayer.to_string()))
        );
    }

    #[test]
    fn heartbeats_only_count_from_the_admitted_connection() {
        let mut session = session(None);
        let start = Instant::now();
        session.handle_request(1, join("Alice", None), start);
        session
            .start_match(Tally::new(&["Alice"]), &String::new())
            .unwrap();

        let later = start + Duration::from_secs(20);
        // Another connection pretends to be Alice.
        session.handle_request(
            5,
            HostRequest::Heartbeat {
                name: "Alice".to_string(),
            },
            later,
        );
        assert_eq!(session.disconnected_players(later), vec!["Alice".to_string()]);
    }

    #[test]
    fn observers_join_any_time_and_get_the_state() {
        let mut session = session(None);
        let now = Instant::now();
        session.handle_request(1, join("Alice", None), now);

        let commands = session.handle_request(
            2,
            HostRequest::ObserverJoined {
                name: "alice".to_string(),
            },
            now,
        );
        assert_eq!(
            deny_message(&commands),
            Some(Some(AdmissionError::DuplicateName.to_string()))
        );

        let commands = session.handle_request(
            2,
            HostRequest::ObserverJoined {
                name: "Olga".to_string(),
            },
            now,
        );
        assert_eq!(deny_message(&commands), Some(None));
        assert!(!has_direct_load_game(&commands, 2));

        session
            .start_match(Tally::new(&["Alice"]), &String::new())
            .unwrap();
        let commands = session.handle_request(
            3,
            HostRequest::ObserverJoined {
                name: "Otto".to_string(),
            },
            now,
        );
        assert!(has_direct_load_game(&commands, 3));
        assert_eq!(session.session_info(now).observer_count, 2);

        // Observer connection drops and comes back.
        session.handle_peer_left(3);
        assert_eq!(session.observers(), ["Olga".to_string()]);
        let commands = session.handle_request(
            4,
            HostRequest::ObserverRejoined {
                name: "Otto".to_string(),
            },
            now,
        );
        assert_eq!(deny_message(&commands), Some(None));
        assert!(has_direct_load_game(&commands, 4));
        assert_eq!(session.observers().len(), 2);
    }

    #[test]
    fn players_and_observers_never_share_a_name() {
        let mut session = session(None);
        let now = Instant::now();
        session.handle_request(
            1,
            HostRequest::ObserverJoined {
                name: "Olga".to_string(),
            },
            now,
        );

        let commands = session.handle_request(2, join("olga", None), now);
        assert_eq!(
            deny_message(&commands),
            Some(Some(AdmissionError::DuplicateName.to_string()))
        );
        assert!(session.roster().is_empty());
        assert_eq!(session.observers(), ["Olga".to_string()]);

        // Pruning a silent player leaves the observer connections alone.
        session.handle_request(3, join("Alice", None), now);
        session.announcement_tick(now + Duration::from_secs(10), true);
        assert!(session.roster().is_empty());
        assert!(session.participant(3).is_none());
        assert_eq!(
            session.participant(1).map(|participant| participant.role),
            Some(ParticipantRole::Observer)
        );
    }

    #[test]
    fn snapshot_request_needs_admission_and_a_running_match() {
        let mut session = session(None);
        let now = Instant::now();
        assert!(session.handle_request(1, HostRequest::RequestSnapshot, now).is_empty());
        session.handle_request(1, join("Alice", None), now);
        assert!(session.handle_request(1, HostRequest::RequestSnapshot, now).is_empty());
        session
            .start_match(Tally::new(&["Alice"]), &String::new())
            .unwrap();
        let commands = session.handle_request(1, HostRequest::RequestSnapshot, now);
        assert!(has_direct_load_game(&commands, 1));
    }

    #[test]
    fn requests_for_other_hosts_are_dropped() {
        let mut session = session(None);
        let bound = HostBound {
            host_id: "someone else".to_string(),
            request: join("Alice", None),
        };
        assert!(session.handle_bound(1, bound, Instant::now()).is_empty());
        assert!(session.roster().is_empty());
    }

    #[test]
    fn leaving_player_is_reported_but_kept() {
        let mut session = session(None);
        session.handle_request(1, join("Alice", None), Instant::now());
        let commands = session.handle_peer_left(1);
        assert_eq!(
            commands,
            vec![HostCommand::Notify(HostNotification::PlayerLeft(
                "Alice".to_string()
            ))]
        );
        assert_eq!(session.roster(), ["Alice".to_string()]);
        assert!(session.handle_peer_left(1).is_empty());
    }
}
