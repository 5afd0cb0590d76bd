//! Plays one scripted match between two seats and prints the boards the replicas ended up with.
//!
//! Without arguments everything runs in process. With a relay url (e.g. `ws://127.0.0.1:8080/ws`)
//! host and seats talk through the relay server instead.

use host_core::channel::{ChannelEvent, HostLink, PeerEvent, PeerLink};
use host_core::memory_channel::MemoryHub;
use host_core::ws_channel::{connect_host, connect_peer};
use host_core::{Collaborators, Host, HostConfig, ReplicaUpdate, SessionIdentity, TransportError};
use std::error::Error;
use std::sync::Arc;
use tic_tac_toe::{Board, MatchConfig, Seat, Stone, TicTacToeRules};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Which shared channel the demo runs on.
enum Channel {
    Memory(MemoryHub),
    Relay(String),
}

impl Channel {
    async fn open_host(
        &self,
        session_id: &str,
    ) -> Result<(Arc<dyn HostLink>, mpsc::Receiver<ChannelEvent>), TransportError> {
        match self {
            Channel::Memory(hub) => {
                let (link, inbound) = hub.open_host(session_id)?;
                Ok((Arc::new(link), inbound))
            }
            Channel::Relay(url) => {
                let (link, inbound) = connect_host(url, session_id).await?;
                Ok((Arc::new(link), inbound))
            }
        }
    }

    async fn connect_peer(
        &self,
        session_id: &str,
    ) -> Result<(Arc<dyn PeerLink>, mpsc::Receiver<PeerEvent>), TransportError> {
        match self {
            Channel::Memory(hub) => {
                let (link, events) = hub.connect_peer(session_id)?;
                Ok((Arc::new(link), events))
            }
            Channel::Relay(url) => {
                let (link, events) = connect_peer(url, session_id).await?;
                Ok((Arc::new(link), events))
            }
        }
    }
}

fn render(board: &Board) -> String {
    board
        .cells
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Some(Stone::Circle) => 'O',
                    Some(Stone::Cross) => 'X',
                    None => '.',
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Waits until the seat reports something other than chatter, fails if the channel is gone.
async fn expect_update(
    seat: &mut Seat,
) -> Result<ReplicaUpdate<tic_tac_toe::StonePlacement>, Box<dyn Error>> {
    seat.next_update()
        .await
        .ok_or_else(|| "channel closed".into())
}

async fn run(channel: Channel) -> Result<(), Box<dyn Error>> {
    let identity = SessionIdentity::generate();
    let (host_link, inbound) = channel.open_host(identity.session_id()).await?;
    let config = HostConfig {
        display_name: "Tic tac toe demo".to_string(),
        ..HostConfig::default()
    };
    config.validate()?;
    let host = Host::start(
        identity.clone(),
        config,
        Collaborators::json(TicTacToeRules),
        host_link,
        inbound,
    );

    let mut seats = Vec::new();
    for name in ["Alice", "Bob"] {
        let (link, events) = channel.connect_peer(identity.session_id()).await?;
        let mut seat = Seat::new(link, events, identity.session_id(), identity.host_id(), name);
        seat.proxy().join(name, None);
        if let ReplicaUpdate::Admission {
            deny_message: Some(message),
            ..
        } = expect_update(&mut seat).await?
        {
            return Err(message.into());
        }
        seats.push(seat);
    }

    let match_config = MatchConfig::default();
    let roster = host.roster().await;
    let board = Board::from_roster(&roster, &match_config).ok_or("need exactly two players")?;
    host.start_match(board, &match_config).await?;
    for seat in seats.iter_mut() {
        expect_update(seat).await?;
    }

    // Circle takes the diagonal.
    let moves = [(0, 0, 0, 1), (1, 1, 0, 2), (2, 2, 0, 0)];
    for (round, &(row, column, answer_row, answer_column)) in moves.iter().enumerate() {
        seats[0].place(row, column);
        for seat in seats.iter_mut() {
            expect_update(seat).await?;
        }
        if round + 1 == moves.len() {
            break;
        }
        seats[1].place(answer_row, answer_column);
        for seat in seats.iter_mut() {
            expect_update(seat).await?;
        }
    }

    let info = host.session_info().await;
    tracing::info!(phase = %info.phase, turn = info.turn, "Match over");
    for (seat, name) in seats.iter().zip(["Alice", "Bob"]) {
        if let Some(board) = seat.board() {
            println!("{name} sees ({} events):\n{}\n", seat.event_count(), render(board));
        }
    }
    host.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tic_tac_toe=debug,host_core=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let channel = match std::env::args().nth(1) {
        Some(url) => Channel::Relay(url),
        None => Channel::Memory(MemoryHub::new()),
    };
    if let Err(error) = run(channel).await {
        tracing::error!(%error, "Demo failed");
    }
}
