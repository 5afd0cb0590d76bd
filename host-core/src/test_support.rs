//! A tiny turn based game for the unit tests: players take turns adding a positive amount to a
//! shared total.

use crate::admission::normalize_name;
use crate::error::ApplyError;
use crate::traits::{GameRules, MatchSummary};
use protocol::EventEnvelope;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub players: Vec<String>,
    pub total: i64,
    pub moves: u32,
}

impl Tally {
    pub fn new(players: &[&str]) -> Self {
        Self {
            players: players.iter().map(|p| p.to_string()).collect(),
            total: 0,
            moves: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Add(pub i64);

pub struct CountingGame;

impl GameRules for CountingGame {
    type Event = Add;
    type State = Tally;
    type Config = String;

    fn apply(&self, state: &mut Tally, player: &str, event: &Add) -> Result<(), ApplyError> {
        if event.0 <= 0 {
            return Err(ApplyError::rejected("amount must be positive"));
        }
        let expected = &state.players[state.moves as usize % state.players.len()];
        if normalize_name(expected) != normalize_name(player) {
            return Err(ApplyError::rejected(format!("It is {expected}'s turn")));
        }
        state.total += event.0;
        state.moves += 1;
        Ok(())
    }

    fn summary(&self, state: &Tally) -> MatchSummary {
        MatchSummary {
            players: state.players.clone(),
            factions: state
                .players
                .iter()
                .enumerate()
                .map(|(i, p)| (p.clone(), if i % 2 == 0 { "odd" } else { "even" }.to_string()))
                .collect(),
            bot_count: 0,
            phase: "counting".to_string(),
            main_phase: "main".to_string(),
            turn: state.moves,
        }
    }
}

pub fn envelope(player: &str, amount: i64) -> EventEnvelope<Add> {
    EventEnvelope {
        event: Add(amount),
        player: player.to_string(),
        timestamp_ms: 1_000 * amount,
    }
}
