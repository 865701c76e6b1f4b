pub mod linear;
pub mod store;

use std::path::Path;

use itertools::Itertools;

use crate::error::ModelError;
use crate::game::{Game, Move};

/// Per-move probabilities over the legal moves and a scalar value in [-1, 1], from the point of
/// view of the player to move.
pub type Evaluation<G> = (Vec<(<G as Game>::Move, f32)>, f32);

/// A policy/value evaluator whose weights live in a single file.
pub trait Network<G: Game>: Send + Sync {
    /// Evaluate a batch of positions, one output per input, in order.
    fn evaluate(&self, positions: &[G::Position]) -> Vec<Evaluation<G>>;

    fn save(&self, path: &Path) -> Result<(), ModelError>;

    /// Replace the weights in place with the ones stored at `path`.
    fn load_weights(&mut self, path: &Path) -> Result<(), ModelError>;
}

pub trait NetworkBuilder<G: Game>: Send + Sync {
    /// A freshly initialized network
    fn build_new(&self) -> Box<dyn Network<G>>;

    fn load(&self, path: &Path) -> Result<Box<dyn Network<G>>, ModelError> {
        let mut net = self.build_new();
        net.load_weights(path)?;
        Ok(net)
    }
}

/// Softmax over the scores of the legal moves only.
pub fn calc_moves_probs<G: Game>(moves: Vec<G::Move>, move_scores: &[f32]) -> Vec<(G::Move, f32)> {
    if moves.is_empty() {
        return Vec::new();
    }
    let moves_scores = moves
        .iter()
        .map(|m| move_scores[m.to_nn_idx()])
        .map(|s| if s.is_finite() { s } else { f32::MIN })
        .collect_vec();

    let max_p = moves_scores.iter().cloned().fold(f32::MIN, f32::max);
    let scores = moves_scores
        .into_iter()
        .map(|p| (p - max_p).exp())
        .collect_vec();
    let p_sum: f32 = scores.iter().sum();
    let probs = scores.into_iter().map(|p| p / p_sum).collect_vec();

    moves.into_iter().zip(probs).collect_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttt::{TttGame, TttMove};

    #[test]
    fn probs_sum_to_one_and_follow_scores() {
        let mut scores = vec![0.0; 9];
        scores[4] = 2.0;
        scores[0] = f32::NAN;
        let moves = vec![TttMove::from_idx(0), TttMove::from_idx(4), TttMove::from_idx(8)];

        let probs = calc_moves_probs::<TttGame>(moves, &scores);
        assert_eq!(probs.len(), 3);
        let sum: f32 = probs.iter().map(|(_m, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-5);

        let (best, _p) = probs.iter().max_by(|a, b| a.1.total_cmp(&b.1)).unwrap();
        assert_eq!(*best, TttMove::from_idx(4));
        /* Non finite scores are treated as the lowest score */
        assert!(probs[0].1 < probs[2].1);
    }

    #[test]
    fn no_moves_no_probs() {
        assert!(calc_moves_probs::<TttGame>(vec![], &[0.0; 9]).is_empty());
    }
}
