use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use itertools::interleave;

use crate::error::{ChannelError, GameFault};
use crate::game::{Game, GameColor, Position};
use crate::inference::ChannelPool;
use crate::self_play::selector::{MoveSelector, SelectorFactory};
use crate::self_play::Record;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    /// Plies after which the game is adjudicated
    pub max_ply: usize,
    /// Illegal actions in a row after which the game is adjudicated
    pub max_consecutive_failures: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_ply: 1000,
            max_consecutive_failures: 50,
        }
    }
}

/// What happened to the game after one action was submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    /// The action was refused, the same side plays again
    IllegalRetry,
    /// A limit was reached, the game must be adjudicated now
    ForceAdjudicate,
}

#[derive(Clone, Debug)]
pub struct GameSummary {
    pub ply_count: usize,
    pub winner: Option<GameColor>,
    pub adjudicated: bool,
    pub total_failures: usize,
    pub duration: Duration,
}

pub struct GameOutput<G: Game> {
    pub game: G,
    /// Records of both sides, interleaved ply by ply, first player first
    pub records: Vec<Record<G>>,
    pub summary: GameSummary,
}

/// A single game between two selectors.
pub struct GameSession<'a, G: Game> {
    game: G,
    players: [Box<dyn MoveSelector<G> + 'a>; 2],
    limits: SessionLimits,
    consecutive_failures: usize,
    total_failures: usize,
}

impl<'a, G: Game> GameSession<'a, G> {
    pub fn new(
        game: G,
        player1: Box<dyn MoveSelector<G> + 'a>,
        player2: Box<dyn MoveSelector<G> + 'a>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            game,
            players: [player1, player2],
            limits,
            consecutive_failures: 0,
            total_failures: 0,
        }
    }

    pub fn game(&self) -> &G {
        &self.game
    }

    pub fn total_failures(&self) -> usize {
        self.total_failures
    }

    fn player(&mut self, color: GameColor) -> &mut (dyn MoveSelector<G> + 'a) {
        match color {
            GameColor::Player1 => self.players[0].as_mut(),
            GameColor::Player2 => self.players[1].as_mut(),
        }
    }

    /// Submit an action of the side to move to the rules engine.
    pub fn apply_action(&mut self, m: G::Move) -> StepOutcome {
        let turn = self.game.position().turn();
        match self.game.try_play(m) {
            Ok(()) => {
                self.consecutive_failures = 0;
                if !self.game.is_over() && self.game.ply_count() >= self.limits.max_ply {
                    StepOutcome::ForceAdjudicate
                } else {
                    StepOutcome::Applied
                }
            }
            Err(err) => {
                log::debug!("{turn:?} played an {err}");
                metrics::counter!("selfplay.illegal_actions").increment(1);
                self.consecutive_failures += 1;
                self.total_failures += 1;
                self.player(turn).action_rejected(&m);

                if self.consecutive_failures >= self.limits.max_consecutive_failures {
                    log::warn!(
                        "ending the game due to lack of development, {} illegal actions in a row",
                        self.consecutive_failures
                    );
                    StepOutcome::ForceAdjudicate
                } else {
                    StepOutcome::IllegalRetry
                }
            }
        }
    }

    /// Play until the game ends or is adjudicated, then hand out the final game and the records.
    ///
    /// `stop` is checked before every action, a cancelled game returns no records.
    pub fn play(mut self, stop: &AtomicBool) -> Result<GameOutput<G>, GameFault> {
        let start_time = Instant::now();
        if self.game.ply_count() >= self.limits.max_ply {
            self.game.adjudicate();
        }

        while !self.game.is_over() {
            if stop.load(Ordering::Relaxed) {
                return Err(GameFault::Cancelled);
            }

            /* Selectors see the full position */
            let position = *self.game.position();
            let m = self.player(position.turn()).select_action(&position)?;
            match self.apply_action(m) {
                StepOutcome::Applied | StepOutcome::IllegalRetry => {}
                StepOutcome::ForceAdjudicate => self.game.adjudicate(),
            }
        }

        let winner = self.game.winner();
        for color in [GameColor::Player1, GameColor::Player2] {
            self.player(color).finish(color.score(winner));
        }
        let [mut player1, mut player2] = self.players;
        let records = interleave(player1.take_records(), player2.take_records()).collect();

        let summary = GameSummary {
            ply_count: self.game.ply_count(),
            winner,
            adjudicated: self.game.is_adjudicated(),
            total_failures: self.total_failures,
            duration: start_time.elapsed(),
        };
        Ok(GameOutput {
            game: self.game,
            records,
            summary,
        })
    }
}

/// Play one complete game on a channel borrowed from `pool`.
///
/// The channel goes back to the pool when this returns, whatever the outcome.
pub fn play_game<G: Game>(
    pool: &Arc<ChannelPool<G>>,
    factory: &dyn SelectorFactory<G>,
    limits: SessionLimits,
    stop: &AtomicBool,
) -> Result<GameOutput<G>, GameFault> {
    let channel = pool.borrow_channel().map_err(|err| match err {
        ChannelError::PoolClosed => GameFault::Cancelled,
        err => GameFault::Channel(err),
    })?;
    log::trace!("game started on channel {}", channel.id());

    let player1 = factory.build(&channel);
    let player2 = factory.build(&channel);
    let session = GameSession::new(G::new(), player1, player2, limits);
    session.play(stop)
}
