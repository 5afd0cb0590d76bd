//! The running host: the session actor behind a mutex, the task pumping inbound channel events
//! into it, the announcement task, and the handle the local collaborators drive it with.
//!
//! # Lifecycle
//!
//! 1. Generate a [`SessionIdentity`] and open the room on a channel, which yields a [`HostLink`]
//!    and the inbound event receiver.
//! 2. [`Host::start`] spawns the inbound and the announcement task and returns a [`HostHandle`].
//! 3. Peers join through the channel, the local side calls [`HostHandle::start_match`] once the
//!    roster is complete.
//! 4. [`HostHandle::stop`] ends both tasks, lets in-flight requests finish and closes the room.
//!
//! ```text
//! let identity = SessionIdentity::generate();
//! let (link, inbound) = hub.open_host(identity.session_id())?;
//! let handle = Host::start(identity, config, Collaborators::json(rules), Arc::new(link), inbound);
//! handle.start_match(initial_state, &match_config).await?;
//! ```

use crate::announcement::run_announcement_loop;
use crate::channel::{ChannelEvent, HostLink};
use crate::config::HostConfig;
use crate::error::{HostError, TransportError};
use crate::identity::SessionIdentity;
use crate::session::{Collaborators, HostCommand, HostNotification, HostSession};
use crate::traits::GameRules;
use crate::wire;
use bytes::Bytes;
use protocol::{HostBound, SessionInfo};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Executes the side effects an entry point asked for. Never fails, failures get logged.
pub(crate) fn dispatch<E: Serialize>(
    link: &dyn HostLink,
    notifier: &broadcast::Sender<HostNotification>,
    commands: Vec<HostCommand<E>>,
) {
    for command in commands {
        match command {
            HostCommand::Broadcast(message) => {
                send_encoded(&message, |body| link.broadcast(body), "broadcast");
            }
            HostCommand::Direct(peer, message) => {
                send_encoded(&message, |body| link.send_direct(peer, body), "direct");
            }
            HostCommand::Announce(info) => {
                send_encoded(&info, |body| link.announce(body), "announce");
            }
            HostCommand::Notify(notification) => {
                // No local subscriber is fine.
                let _ = notifier.send(notification);
            }
        }
    }
}

fn send_encoded<T: Serialize>(
    value: &T,
    send: impl FnOnce(Bytes) -> Result<(), TransportError>,
    kind: &'static str,
) {
    match wire::encode(value) {
        Ok(body) => {
            if let Err(error) = send(body) {
                warn!(kind, %error, "Send failed, state is committed anyway");
            }
        }
        Err(error) => error!(kind, %error, "Could not encode message"),
    }
}

/// Everything the inbound and announcement tasks share with the handle.
pub(crate) struct Shared<G: GameRules> {
    pub(crate) session: Mutex<HostSession<G>>,
    pub(crate) link: Arc<dyn HostLink>,
    pub(crate) notifier: broadcast::Sender<HostNotification>,
}

impl<G: GameRules> Shared<G> {
    /// Runs `action` on the session and dispatches its commands before the lock is released, so
    /// the peers see effects in commit order. Link sends only queue, nothing is awaited here.
    pub(crate) async fn act(
        &self,
        action: impl FnOnce(&mut HostSession<G>) -> Vec<HostCommand<G::Event>>,
    ) {
        let mut session = self.session.lock().await;
        let commands = action(&mut session);
        dispatch(self.link.as_ref(), &self.notifier, commands);
    }

    /// Like [`Self::act`] for entry points that can fail, nothing is sent on failure.
    pub(crate) async fn try_act<R, E>(
        &self,
        action: impl FnOnce(&mut HostSession<G>) -> Result<(R, Vec<HostCommand<G::Event>>), E>,
    ) -> Result<R, E> {
        let mut session = self.session.lock().await;
        let (result, commands) = action(&mut session)?;
        dispatch(self.link.as_ref(), &self.notifier, commands);
        Ok(result)
    }
}

pub struct Host;

impl Host {
    /// Spawns the host tasks on the current tokio runtime.
    pub fn start<G: GameRules>(
        identity: SessionIdentity,
        config: HostConfig,
        collaborators: Collaborators<G>,
        link: Arc<dyn HostLink>,
        inbound: mpsc::Receiver<ChannelEvent>,
    ) -> HostHandle<G> {
        let (notifier, _) = broadcast::channel(config.notification_capacity.max(1));
        let (stop_sender, stop_receiver) = watch::channel(false);
        let tick_period = config.tick_period();
        let max_ticks = config.max_ticks;
        info!(
            session_id = identity.session_id(),
            host_id = identity.host_id(),
            display_name = %config.display_name,
            "Hosting session"
        );

        let shared = Arc::new(Shared {
            session: Mutex::new(HostSession::new(identity.clone(), config, collaborators)),
            link,
            notifier,
        });

        let inbound_task = tokio::spawn(run_inbound(
            shared.clone(),
            inbound,
            stop_receiver.clone(),
        ));
        let announcement_task = tokio::spawn(run_announcement_loop(
            shared.clone(),
            stop_receiver,
            tick_period,
            max_ticks,
        ));

        HostHandle {
            shared,
            identity,
            stop: stop_sender,
            tasks: vec![inbound_task, announcement_task],
        }
    }
}

/// Feeds channel events into the session until stopped or the channel ends.
async fn run_inbound<G: GameRules>(
    shared: Arc<Shared<G>>,
    mut inbound: mpsc::Receiver<ChannelEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = inbound.recv() => event,
            _ = stop.changed() => break,
        };
        let Some(event) = event else {
            info!("Inbound channel ended");
            break;
        };
        match event {
            ChannelEvent::PeerConnected(peer) => {
                shared
                    .act(|session| session.handle_peer_connected(peer))
                    .await
            }
            ChannelEvent::PeerLeft(peer) => {
                shared.act(|session| session.handle_peer_left(peer)).await
            }
            ChannelEvent::Request(peer, body) => {
                let bound: HostBound<G::Event> = match wire::decode(&body) {
                    Ok(bound) => bound,
                    Err(error) => {
                        warn!(peer, %error, "Dropping undecodable request");
                        continue;
                    }
                };
                shared
                    .act(|session| session.handle_bound(peer, bound, Instant::now()))
                    .await
            }
            ChannelEvent::Closed(reason) => {
                warn!(%reason, "Channel closed");
                break;
            }
        }
    }
    debug!("Inbound task finished");
}

/// The local handle of a running host.
pub struct HostHandle<G: GameRules> {
    shared: Arc<Shared<G>>,
    identity: SessionIdentity,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<G: GameRules> HostHandle<G> {
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Local notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HostNotification> {
        self.shared.notifier.subscribe()
    }

    /// Leaves the pre-game phase. Every peer gets the initial state.
    pub async fn start_match(
        &self,
        initial: G::State,
        match_config: &G::Config,
    ) -> Result<(), HostError> {
        self.shared
            .try_act(|session| {
                session
                    .start_match(initial, match_config)
                    .map(|commands| ((), commands))
            })
            .await
    }

    /// Returns the index the history got truncated to.
    pub async fn request_undo(&self, to_index: Option<usize>) -> Result<usize, HostError> {
        let target = self
            .shared
            .try_act(|session| session.request_undo(to_index))
            .await?;
        Ok(target)
    }

    pub async fn set_timer(&self, seconds: u32) {
        self.shared.act(|session| session.set_timer(seconds)).await;
    }

    pub async fn session_info(&self) -> SessionInfo {
        self.shared.session.lock().await.session_info(Instant::now())
    }

    /// The serialized current state, for the storage collaborator.
    pub async fn snapshot(&self) -> Result<String, HostError> {
        self.shared.session.lock().await.holder().snapshot()
    }

    pub async fn state(&self) -> Option<G::State> {
        self.shared.session.lock().await.holder().state().cloned()
    }

    pub async fn history_len(&self) -> usize {
        self.shared.session.lock().await.holder().history_len()
    }

    pub async fn roster(&self) -> Vec<String> {
        self.shared.session.lock().await.roster().to_vec()
    }

    /// Stops both tasks, waits for in-flight work and closes the room.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(error) = task.await {
                error!(%error, "Host task failed");
            }
        }
        self.shared.link.close();
        info!(session_id = self.identity.session_id(), "Host stopped");
    }
}
