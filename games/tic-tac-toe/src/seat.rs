//! A peer's seat at the table: the proxy towards the host plus the replica following the board.

use crate::tic_tac_toe_logic::backend::TicTacToeRules;
use crate::tic_tac_toe_logic::traits_implementation::{Board, StonePlacement};
use host_core::channel::{PeerEvent, PeerLink};
use host_core::{HostProxy, JsonCodec, Replica, ReplicaUpdate, wire};
use protocol::PeerMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct Seat {
    proxy: HostProxy<StonePlacement>,
    replica: Replica<TicTacToeRules>,
    events: mpsc::Receiver<PeerEvent>,
}

impl Seat {
    /// `session_id` and `host_id` come from the announcement of the session.
    pub fn new(
        link: Arc<dyn PeerLink>,
        events: mpsc::Receiver<PeerEvent>,
        session_id: &str,
        host_id: &str,
        name: &str,
    ) -> Self {
        Seat {
            proxy: HostProxy::new(link, host_id),
            replica: Replica::new(
                Arc::new(TicTacToeRules),
                Arc::new(JsonCodec),
                Arc::new(JsonCodec),
                session_id,
                name,
            ),
            events,
        }
    }

    pub fn proxy(&self) -> &HostProxy<StonePlacement> {
        &self.proxy
    }

    pub fn board(&self) -> Option<&Board> {
        self.replica.state()
    }

    pub fn event_count(&self) -> usize {
        self.replica.event_count()
    }

    pub fn place(&self, row: u8, column: u8) -> bool {
        self.proxy.send_event(StonePlacement { column, row })
    }

    /// Waits for the next message that meant something for this seat. A resync request goes out
    /// on its own. `None` once the channel is gone.
    pub async fn next_update(&mut self) -> Option<ReplicaUpdate<StonePlacement>> {
        loop {
            let body = match self.events.recv().await? {
                PeerEvent::Message(body) => body,
                PeerEvent::Closed(reason) => {
                    info!(%reason, "Seat lost the channel");
                    return None;
                }
            };
            let message: PeerMessage<StonePlacement> = match wire::decode(&body) {
                Ok(message) => message,
                Err(error) => {
                    warn!(%error, "Dropping undecodable message");
                    continue;
                }
            };
            match self.replica.handle(message) {
                Ok(ReplicaUpdate::Ignored) => continue,
                Ok(ReplicaUpdate::NeedsResync) => {
                    self.proxy.request_snapshot();
                    return Some(ReplicaUpdate::NeedsResync);
                }
                Ok(update) => return Some(update),
                Err(error) => {
                    warn!(%error, "Snapshot unreadable, requesting a new one");
                    self.proxy.request_snapshot();
                }
            }
        }
    }
}
