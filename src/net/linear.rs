use std::fs;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::game::{Game, Position};
use crate::net::{calc_moves_probs, Evaluation, Network, NetworkBuilder};

/// Initial scores are drawn uniformly from [-INIT_SCALE, INIT_SCALE]
const INIT_SCALE: f32 = 0.01;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearWeights {
    pub move_scores: Vec<f32>,
    pub value_bias: f32,
}

/// Position independent prior over moves, the smallest network that can be trained and reloaded.
pub struct LinearNet<G: Game> {
    weights: LinearWeights,
    _game: PhantomData<fn() -> G>,
}

impl<G: Game> LinearNet<G> {
    pub fn new_random(rng: &mut impl Rng) -> Self {
        let move_scores = (0..G::MOVES_NUM)
            .map(|_| rng.random_range(-INIT_SCALE..=INIT_SCALE))
            .collect();
        Self {
            weights: LinearWeights {
                move_scores,
                value_bias: 0.0,
            },
            _game: PhantomData,
        }
    }

    pub fn from_weights(weights: LinearWeights) -> Result<Self, ModelError> {
        if weights.move_scores.len() != G::MOVES_NUM {
            return Err(ModelError::Shape {
                expected: G::MOVES_NUM,
                found: weights.move_scores.len(),
            });
        }
        Ok(Self {
            weights,
            _game: PhantomData,
        })
    }

    pub fn weights(&self) -> &LinearWeights {
        &self.weights
    }
}

impl<G: Game> Network<G> for LinearNet<G> {
    fn evaluate(&self, positions: &[G::Position]) -> Vec<Evaluation<G>> {
        let value = self.weights.value_bias.tanh();
        positions
            .iter()
            .map(|pos| {
                let probs = calc_moves_probs::<G>(pos.legal_moves(), &self.weights.move_scores);
                (probs, value)
            })
            .collect()
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        /* Write aside and rename, readers never observe a half written file */
        let tmp_path = path.with_extension("tmp");
        let file = fs::File::create(&tmp_path).map_err(|source| ModelError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.weights)?;
        writer.flush()?;
        fs::rename(&tmp_path, path).map_err(|source| ModelError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    fn load_weights(&mut self, path: &Path) -> Result<(), ModelError> {
        let content = fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let weights: LinearWeights =
            serde_json::from_str(&content).map_err(|source| ModelError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        *self = Self::from_weights(weights)?;
        Ok(())
    }
}

pub struct LinearNetBuilder<G: Game> {
    _game: PhantomData<fn() -> G>,
}

impl<G: Game> LinearNetBuilder<G> {
    pub fn new() -> Self {
        Self {
            _game: PhantomData,
        }
    }
}

impl<G: Game> Default for LinearNetBuilder<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Game> NetworkBuilder<G> for LinearNetBuilder<G> {
    fn build_new(&self) -> Box<dyn Network<G>> {
        Box::new(LinearNet::<G>::new_random(&mut rand::rng()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttt::{TttGame, TttMove, TttPosition};

    #[test]
    fn fresh_net_is_almost_uniform() {
        let mut rng = StdRng::seed_from_u64(0x1b2d6a3f);
        let net = LinearNet::<TttGame>::new_random(&mut rng);

        let outputs = net.evaluate(&[TttPosition::new()]);
        assert_eq!(outputs.len(), 1);
        let (probs, value) = &outputs[0];
        assert_eq!(probs.len(), 9);
        assert_eq!(*value, 0.0);
        for (_m, p) in probs {
            assert!((p - 1.0 / 9.0).abs() < 0.01);
        }
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let mut scores = vec![0.0; 9];
        scores[2] = 5.0;
        let net = LinearNet::<TttGame>::from_weights(LinearWeights {
            move_scores: scores,
            value_bias: 0.5,
        })
        .unwrap();
        net.save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = LinearNetBuilder::<TttGame>::new().load(&path).unwrap();
        let (probs, value) = &loaded.evaluate(&[TttPosition::new()])[0];
        assert!((value - 0.5f32.tanh()).abs() < 1e-6);
        let (best, _p) = probs.iter().max_by(|a, b| a.1.total_cmp(&b.1)).unwrap();
        assert_eq!(*best, TttMove::from_idx(2));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, r#"{"move_scores": [0.0, 1.0], "value_bias": 0.0}"#).unwrap();

        let mut net = LinearNet::<TttGame>::new_random(&mut rand::rng());
        let before = net.weights().clone();
        let err = net.load_weights(&path).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Shape {
                expected: 9,
                found: 2
            }
        ));
        assert_eq!(*net.weights(), before);
    }
}
