//! Tic-tac-toe as a hosted match. Two players, any amount of observers.

pub mod seat;
pub mod tic_tac_toe_logic;

pub use seat::Seat;
pub use tic_tac_toe_logic::backend::TicTacToeRules;
pub use tic_tac_toe_logic::traits_implementation::{
    Board, GameState, MatchConfig, Stone, StonePlacement,
};
