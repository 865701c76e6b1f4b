use itertools::Itertools;
use rand::distr::weighted::WeightedIndex;
use rand::prelude::*;

use crate::error::SelectorError;
use crate::game::Game;
use crate::inference::InferenceChannel;
use crate::self_play::temperature::TemperaturePolicy;
use crate::self_play::Record;

/// One side of a self-play game.
///
/// The selector keeps a record of every position it chose an action in. The session tells it when
/// the rules engine refused an action, and the final result once the game is over, before taking
/// the records.
pub trait MoveSelector<G: Game> {
    fn select_action(&mut self, position: &G::Position) -> Result<G::Move, SelectorError>;

    /// The last selected action was refused by the rules engine, no ply was played.
    fn action_rejected(&mut self, _m: &G::Move) {}

    /// `result` is +1 for a win, -1 for a loss and 0 for a draw, from this side's point of view.
    fn finish(&mut self, result: f32);

    fn take_records(&mut self) -> Vec<Record<G>>;
}

/// Creates the selectors of a game, both sharing the game's borrowed channel.
pub trait SelectorFactory<G: Game>: Send + Sync {
    fn build<'a>(&self, channel: &'a InferenceChannel<G>) -> Box<dyn MoveSelector<G> + 'a>;
}

/// Samples the next move directly from the network policy.
pub struct PolicyPlayer<'a, G: Game> {
    channel: &'a InferenceChannel<G>,
    temperature: TemperaturePolicy,
    rng: StdRng,
    records: Vec<Record<G>>,
}

impl<'a, G: Game> PolicyPlayer<'a, G> {
    pub fn new(channel: &'a InferenceChannel<G>, temperature: TemperaturePolicy) -> Self {
        Self::with_rng(channel, temperature, StdRng::from_rng(&mut rand::rng()))
    }

    pub fn with_rng(channel: &'a InferenceChannel<G>, temperature: TemperaturePolicy, rng: StdRng) -> Self {
        Self {
            channel,
            temperature,
            rng,
            records: Vec::new(),
        }
    }

    fn choose_move_from_probabilities(
        &mut self,
        moves_probs: &[(G::Move, f32)],
    ) -> Result<G::Move, SelectorError> {
        if moves_probs.is_empty() {
            return Err(SelectorError::NoLegalMoves);
        }

        let temperature = self.temperature.get_temperature(self.records.len());
        let (best_move, max_p) = moves_probs
            .iter()
            .max_by(|(_m1, p1), (_m2, p2)| p1.total_cmp(p2))
            .ok_or(SelectorError::NoLegalMoves)?;
        if temperature == 0.0 || *max_p <= 0.0 {
            return Ok(*best_move);
        }

        /* (prob / max_prob)^(1/temperature), the best move keeps weight 1 at any temperature.
         * WeightedIndex normalizes */
        let probabilities = moves_probs
            .iter()
            .map(|(_m, p)| (p / max_p).powf(1.0 / temperature))
            .collect_vec();
        let distribution = WeightedIndex::new(probabilities)
            .map_err(|err| SelectorError::Other(format!("invalid move distribution: {err}")))?;
        Ok(moves_probs[distribution.sample(&mut self.rng)].0)
    }
}

impl<G: Game> MoveSelector<G> for PolicyPlayer<'_, G> {
    fn select_action(&mut self, position: &G::Position) -> Result<G::Move, SelectorError> {
        let (probs, _value) = self.channel.evaluate(position)?;
        let m = self.choose_move_from_probabilities(&probs)?;
        self.records.push(Record::new(*position, probs));
        Ok(m)
    }

    fn action_rejected(&mut self, _m: &G::Move) {
        self.records.pop();
    }

    fn finish(&mut self, result: f32) {
        for record in self.records.iter_mut() {
            record.value = result;
        }
    }

    fn take_records(&mut self) -> Vec<Record<G>> {
        std::mem::take(&mut self.records)
    }
}

pub struct PolicyPlayerFactory {
    temperature: TemperaturePolicy,
}

impl PolicyPlayerFactory {
    pub fn new(temperature: TemperaturePolicy) -> Self {
        Self { temperature }
    }
}

impl<G: Game> SelectorFactory<G> for PolicyPlayerFactory {
    fn build<'a>(&self, channel: &'a InferenceChannel<G>) -> Box<dyn MoveSelector<G> + 'a> {
        Box::new(PolicyPlayer::new(channel, self.temperature.clone()))
    }
}
