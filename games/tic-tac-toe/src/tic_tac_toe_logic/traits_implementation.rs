//! Contains the board that acts as game state and the stone placement that is the event here.

use host_core::ApplyError;
use serde::{Deserialize, Serialize};

/// The stone a player sets. The first player of the roster plays circle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stone {
    Circle,
    Cross,
}

impl Stone {
    pub fn other(self) -> Stone {
        match self {
            Stone::Circle => Stone::Cross,
            Stone::Cross => Stone::Circle,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stone::Circle => "Circle",
            Stone::Cross => "Cross",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameState {
    Pending,
    Won(Stone),
    Draw,
}

/// The event a player submits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StonePlacement {
    pub column: u8,
    pub row: u8,
}

/// The configuration snapshot that accompanies the board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Who opens the match.
    pub starting: Stone,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            starting: Stone::Circle,
        }
    }
}

/// The game board used as game state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// Indexed `[row][column]`.
    pub cells: [[Option<Stone>; 3]; 3],
    /// Circle player first, cross player second.
    pub players: [String; 2],
    pub next_stone: Stone,
    pub game_state: GameState,
    pub stones_placed: u32,
}

impl Board {
    pub fn new(circle: impl Into<String>, cross: impl Into<String>, config: &MatchConfig) -> Board {
        Board {
            cells: [[None; 3]; 3],
            players: [circle.into(), cross.into()],
            next_stone: config.starting,
            game_state: GameState::Pending,
            stones_placed: 0,
        }
    }

    /// Needs exactly two players.
    pub fn from_roster(roster: &[String], config: &MatchConfig) -> Option<Board> {
        match roster {
            [circle, cross] => Some(Board::new(circle.clone(), cross.clone(), config)),
            _ => None,
        }
    }

    pub fn stone_of(&self, player: &str) -> Option<Stone> {
        if self.players[0] == player {
            Some(Stone::Circle)
        } else if self.players[1] == player {
            Some(Stone::Cross)
        } else {
            None
        }
    }

    pub fn player_of(&self, stone: Stone) -> &str {
        match stone {
            Stone::Circle => &self.players[0],
            Stone::Cross => &self.players[1],
        }
    }

    /// Checks if the move is legal.
    pub fn check_legality(
        &self,
        stone: Stone,
        placement: &StonePlacement,
    ) -> Result<(), ApplyError> {
        if self.game_state != GameState::Pending {
            return Err(ApplyError::rejected("The game is over"));
        }
        if stone != self.next_stone {
            return Err(ApplyError::rejected(format!(
                "It is {}'s turn",
                self.player_of(self.next_stone)
            )));
        }
        if placement.row > 2 || placement.column > 2 {
            return Err(ApplyError::rejected("Field outside of the board"));
        }
        if self.cells[placement.row as usize][placement.column as usize].is_some() {
            return Err(ApplyError::rejected("Field is already taken"));
        }
        Ok(())
    }

    /// Applies a legal move to the game board.
    pub fn apply_placement(&mut self, stone: Stone, placement: &StonePlacement) {
        self.cells[placement.row as usize][placement.column as usize] = Some(stone);
        self.next_stone = stone.other();
        self.stones_placed += 1;
        self.game_state = self.check_winning();
    }

    /// Does a winning check for the stone handed over.
    fn check_for(&self, stone: Stone) -> bool {
        let is_taken = |row: usize, col: usize| self.cells[row][col] == Some(stone);
        (0..3).any(|row| (0..3).all(|col| is_taken(row, col)))
            || (0..3).any(|col| (0..3).all(|row| is_taken(row, col)))
            || (0..3).all(|i| is_taken(i, i))
            || (0..3).all(|i| is_taken(i, 2 - i))
    }

    pub fn check_winning(&self) -> GameState {
        for stone in [Stone::Circle, Stone::Cross] {
            if self.check_for(stone) {
                return GameState::Won(stone);
            }
        }
        if self.cells.iter().flatten().all(Option::is_some) {
            return GameState::Draw;
        }
        GameState::Pending
    }
}
