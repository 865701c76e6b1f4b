use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum GameColor {
    /// Moves first ("white")
    Player1,
    Player2,
}

impl GameColor {
    pub fn opposite(&self) -> GameColor {
        match self {
            GameColor::Player1 => GameColor::Player2,
            GameColor::Player2 => GameColor::Player1,
        }
    }

    /// Scalar result of a game from `self` point of view: win 1, loss -1, draw 0.
    pub fn score(&self, winner: Option<GameColor>) -> f32 {
        match winner {
            Some(w) if w == *self => 1.0,
            Some(_) => -1.0,
            None => 0.0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GameStatus {
    Ongoing,
    Finished(Option<GameColor>),
}

impl GameStatus {
    pub fn is_ongoing(&self) -> bool {
        matches!(self, GameStatus::Ongoing)
    }

    pub fn is_finished(&self) -> bool {
        !self.is_ongoing()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("illegal move {0}")]
pub struct IllegalMove(pub String);

pub trait Move:
    Copy + Eq + Hash + Display + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Game: Game<Move = Self>;

    fn to_nn_idx(&self) -> usize;
}

pub trait Position:
    Copy + Eq + Hash + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Game: Game<Position = Self>;

    fn new() -> Self;
    fn turn(&self) -> GameColor;
    fn legal_moves(&self) -> Vec<<Self::Game as Game>::Move>;
    fn status(&self) -> GameStatus;
}

/// Authoritative rules engine of a single game.
pub trait Game: Sized + Send + 'static {
    type Position: Position<Game = Self>;
    type Move: Move<Game = Self>;
    const MOVES_NUM: usize;

    /// A game at the starting position
    fn new() -> Self;
    fn position(&self) -> &Self::Position;
    /// Number of plies applied since the starting position
    fn ply_count(&self) -> usize;
    fn status(&self) -> GameStatus;

    /// Apply a move, leaving the game untouched if the rules reject it.
    fn try_play(&mut self, m: Self::Move) -> Result<(), IllegalMove>;

    /// Force the game to end now, deciding the result from the current position.
    fn adjudicate(&mut self);
    fn is_adjudicated(&self) -> bool;

    fn is_over(&self) -> bool {
        self.status().is_finished()
    }

    fn winner(&self) -> Option<GameColor> {
        match self.status() {
            GameStatus::Finished(winner) => winner,
            GameStatus::Ongoing => None,
        }
    }
}
