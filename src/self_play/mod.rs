pub mod observer;
pub mod orchestrator;
pub mod selector;
pub mod session;
pub mod temperature;
pub mod writer;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::game::Game;

pub use observer::{GameObserver, LogObserver};
pub use orchestrator::{Orchestrator, RunStats};
pub use selector::{MoveSelector, PolicyPlayer, PolicyPlayerFactory, SelectorFactory};
pub use session::{play_game, GameOutput, GameSession, GameSummary, SessionLimits, StepOutcome};
pub use temperature::TemperaturePolicy;
pub use writer::{read_records, DataWriter, PendingWrite, WriteFailure};

/// One training sample: a position, the move distribution chosen there, and the final result of
/// the game from the point of view of the side that moved.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Record<G: Game> {
    pub position: G::Position,
    pub probs: Vec<(G::Move, f32)>,
    pub value: f32,
}

impl<G: Game> Record<G> {
    pub fn new(position: G::Position, probs: Vec<(G::Move, f32)>) -> Self {
        Self {
            position,
            probs,
            value: 0.0,
        }
    }
}

impl<G: Game> Clone for Record<G> {
    fn clone(&self) -> Self {
        Self {
            position: self.position,
            probs: self.probs.clone(),
            value: self.value,
        }
    }
}

impl<G: Game> PartialEq for Record<G> {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position && self.probs == other.probs && self.value == other.value
    }
}

impl<G: Game> fmt::Debug for Record<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("position", &self.position)
            .field("probs", &self.probs)
            .field("value", &self.value)
            .finish()
    }
}
