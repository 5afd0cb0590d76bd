//! The rules of tic-tac-toe, implementing [`GameRules`]. The host and every replica run them.

use crate::tic_tac_toe_logic::traits_implementation::{
    Board, GameState, MatchConfig, StonePlacement,
};
use host_core::{ApplyError, GameRules, MatchSummary};
use std::collections::BTreeMap;

/// Stateless, everything lives in the [`Board`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TicTacToeRules;

impl GameRules for TicTacToeRules {
    type Event = StonePlacement;
    type State = Board;
    type Config = MatchConfig;

    /// Only the two seated players may place, and only on their turn.
    fn apply(
        &self,
        state: &mut Board,
        player: &str,
        event: &StonePlacement,
    ) -> Result<(), ApplyError> {
        let Some(stone) = state.stone_of(player) else {
            return Err(ApplyError::rejected(format!("{player} does not play in this match")));
        };
        state.check_legality(stone, event)?;
        state.apply_placement(stone, event);
        Ok(())
    }

    fn summary(&self, state: &Board) -> MatchSummary {
        let factions: BTreeMap<String, String> = state
            .players
            .iter()
            .zip(["Circle", "Cross"])
            .map(|(player, stone)| (player.clone(), stone.to_string()))
            .collect();
        let (phase, main_phase) = match state.game_state {
            GameState::Pending => (format!("{} to move", state.next_stone.label()), "Playing"),
            GameState::Won(stone) => (format!("{} won", stone.label()), "Finished"),
            GameState::Draw => ("Draw".to_string(), "Finished"),
        };
        MatchSummary {
            players: state.players.to_vec(),
            factions,
            bot_count: 0,
            phase,
            main_phase: main_phase.to_string(),
            turn: state.stones_placed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outsiders_cannot_place() {
        let mut board = Board::new("Alice", "Bob", &MatchConfig::default());
        let result =
            TicTacToeRules.apply(&mut board, "Olga", &StonePlacement { column: 0, row: 0 });
        assert_eq!(result, Err(ApplyError::rejected("Olga does not play in this match")));
        assert_eq!(board.stones_placed, 0);
    }

    #[test]
    fn summary_reflects_the_board() {
        let mut board = Board::new("Alice", "Bob", &MatchConfig::default());
        TicTacToeRules
            .apply(&mut board, "Alice", &StonePlacement { column: 1, row: 1 })
            .unwrap();
        let summary = TicTacToeRules.summary(&board);
        assert_eq!(summary.players, vec!["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(summary.factions["Bob"], "Cross");
        assert_eq!(summary.phase, "Cross to move");
        assert_eq!(summary.main_phase, "Playing");
        assert_eq!(summary.turn, 1);
    }
}
