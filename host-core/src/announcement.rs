//! The periodic discovery announcement and the pruning of silent pre-game players.
//!
//! The loop is a `tokio::time::interval` with an explicit stop signal. Each tick takes one
//! consistent look at the session under its lock, so announcement and pruning never see a half
//! applied request.
//! After `max_ticks` ticks the session counts as abandoned and the loop ends.

use crate::host::Shared;
use crate::session::{HostCommand, HostNotification, HostSession, ParticipantRole};
use crate::traits::GameRules;
use protocol::SessionPhase;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

impl<G: GameRules> HostSession<G> {
    /// One tick: announce while the transport is connected, then prune.
    ///
    /// Before the start silent players get removed from the roster for good. A running match only
    /// reports them, they stay in the match so they can rejoin.
    pub fn announcement_tick(
        &mut self,
        now: Instant,
        connected: bool,
    ) -> Vec<HostCommand<G::Event>> {
        if !connected {
            debug!("Transport not connected, skipping announcement");
            return Vec::new();
        }
        let mut commands = vec![HostCommand::Announce(self.session_info(now))];

        match self.phase() {
            SessionPhase::PreGame => {
                let threshold = self.config.disconnect_threshold();
                let silent: Vec<String> = self
                    .heartbeats
                    .list_disconnected(self.roster.iter().map(String::as_str), now, threshold)
                    .map(str::to_string)
                    .collect();
                if silent.is_empty() {
                    return commands;
                }
                for name in &silent {
                    self.heartbeats.forget(name);
                    self.connections.retain(|_, participant| {
                        participant.role != ParticipantRole::Player || &participant.name != name
                    });
                }
                self.roster.retain(|name| !silent.contains(name));
                info!(pruned = ?silent, "Removed silent players from the roster");
                commands.push(HostCommand::Notify(HostNotification::RosterChanged(
                    self.roster.clone(),
                )));
                commands.push(HostCommand::Notify(HostNotification::GameInfo(
                    self.session_info(now),
                )));
            }
            SessionPhase::InProgress => {
                let disconnected = self.disconnected_players(now);
                if disconnected != self.reported_disconnected {
                    if !disconnected.is_empty() {
                        info!(players = ?disconnected, "Players disconnected");
                    }
                    self.reported_disconnected = disconnected.clone();
                    commands.push(HostCommand::Notify(HostNotification::PlayersDisconnected(
                        disconnected,
                    )));
                }
            }
        }
        commands
    }
}

pub(crate) async fn run_announcement_loop<G: GameRules>(
    shared: Arc<Shared<G>>,
    mut stop: watch::Receiver<bool>,
    period: Duration,
    max_ticks: u64,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }
        if ticks >= max_ticks {
            warn!(ticks, "Tick cap reached, session counts as abandoned and stops announcing");
            break;
        }
        ticks += 1;

        let connected = shared.link.is_connected();
        shared
            .act(|session| session.announcement_tick(Instant::now(), connected))
            .await;
    }
    debug!(ticks, "Announcement loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::host::Host;
    use crate::identity::SessionIdentity;
    use crate::memory_channel::MemoryHub;
    use crate::session::Collaborators;
    use crate::test_support::{Add, CountingGame, Tally};
    use crate::wire;
    use protocol::{HostRequest, SessionInfo};

    fn session() -> HostSession<CountingGame> {
        HostSession::new(
            SessionIdentity::generate(),
            HostConfig::default(),
            Collaborators::json(CountingGame),
        )
    }

    fn join(session: &mut HostSession<CountingGame>, peer: u16, name: &str, now: Instant) {
        session.handle_request(
            peer,
            HostRequest::PlayerJoined {
                name: name.to_string(),
                password_hash: None,
            },
            now,
        );
    }

    fn heartbeat(session: &mut HostSession<CountingGame>, peer: u16, name: &str, now: Instant) {
        session.handle_request(
            peer,
            HostRequest::<Add>::Heartbeat {
                name: name.to_string(),
            },
            now,
        );
    }

    #[test]
    fn nothing_happens_while_disconnected() {
        let mut session = session();
        let start = Instant::now();
        join(&mut session, 1, "Alice", start);
        let commands = session.announcement_tick(start + Duration::from_secs(60), false);
        assert!(commands.is_empty());
        assert_eq!(session.roster(), ["Alice".to_string()]);
    }

    #[test]
    fn silent_pre_game_players_are_pruned_after_announcing() {
        let mut session = session();
        let start = Instant::now();
        join(&mut session, 1, "Alice", start);
        join(&mut session, 2, "Bob", start);

        let later = start + Duration::from_secs(10);
        heartbeat(&mut session, 1, "Alice", later);
        let commands = session.announcement_tick(later, true);

        // The announcement still lists Bob, the prune comes afterwards.
        match &commands[0] {
            HostCommand::Announce(info) => {
                assert_eq!(info.players, vec!["Alice".to_string(), "Bob".to_string()])
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(commands.contains(&HostCommand::Notify(HostNotification::RosterChanged(vec![
            "Alice".to_string()
        ]))));
        assert_eq!(session.roster(), ["Alice".to_string()]);
        assert!(session.participant(2).is_none());
        assert_eq!(session.heartbeats().len(), 1);

        // Bob's name is free again.
        join(&mut session, 3, "Bob", later);
        assert_eq!(session.roster().len(), 2);
    }

    #[test]
    fn running_match_only_reports_disconnects() {
        let mut session = session();
        let start = Instant::now();
        join(&mut session, 1, "Alice", start);
        join(&mut session, 2, "Bob", start);
        session
            .start_match(Tally::new(&["Alice", "Bob"]), &String::new())
            .unwrap();

        let later = start + Duration::from_secs(10);
        heartbeat(&mut session, 1, "Alice", later);
        let commands = session.announcement_tick(later, true);
        match &commands[0] {
            HostCommand::Announce(info) => assert_eq!(info.disconnected, vec!["Bob".to_string()]),
            other => panic!("unexpected command {other:?}"),
        }
        assert!(commands.contains(&HostCommand::Notify(
            HostNotification::PlayersDisconnected(vec!["Bob".to_string()])
        )));
        assert_eq!(session.holder().match_players().len(), 2);

        // Same set again, no new notification.
        let commands = session.announcement_tick(later + Duration::from_secs(1), true);
        assert_eq!(commands.len(), 1);
    }

    fn decode_info(body: &[u8]) -> SessionInfo {
        wire::decode(body).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn loop_announces_every_tick_until_the_cap() {
        let hub = MemoryHub::new();
        let mut lobby = hub.subscribe_lobby();
        let identity = SessionIdentity::generate();
        let (link, inbound) = hub.open_host(identity.session_id()).unwrap();
        let config = HostConfig {
            max_ticks: 3,
            ..HostConfig::default()
        };
        let handle = Host::start(
            identity.clone(),
            config,
            Collaborators::json(CountingGame),
            Arc::new(link),
            inbound,
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        let mut announcements = Vec::new();
        while let Ok(body) = lobby.try_recv() {
            announcements.push(decode_info(&body));
        }
        assert_eq!(announcements.len(), 3);
        assert_eq!(announcements[0].session_id, identity.session_id());
        assert_eq!(announcements[0].session_phase, SessionPhase::PreGame);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn loop_skips_while_disconnected_and_stops_on_signal() {
        let hub = MemoryHub::new();
        let mut lobby = hub.subscribe_lobby();
        let identity = SessionIdentity::generate();
        let (link, inbound) = hub.open_host(identity.session_id()).unwrap();
        link.set_connected(false);
        let handle = Host::start(
            identity,
            HostConfig::default(),
            Collaborators::json(CountingGame),
            Arc::new(link.clone()),
            inbound,
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(lobby.try_recv().is_err());

        link.set_connected(true);
        tokio::time::sleep(Duration::from_secs(9)).await;
        let mut received = 0;
        while lobby.try_recv().is_ok() {
            received += 1;
        }
        assert!(received >= 1);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(lobby.try_recv().is_err());
    }
}
