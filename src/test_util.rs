use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::SelectorError;
use crate::game::Position;
use crate::inference::server::disconnected_channel;
use crate::inference::{ChannelPool, InferenceChannel};
use crate::self_play::selector::{MoveSelector, SelectorFactory};
use crate::self_play::Record;
use crate::ttt::{TttGame, TttMove, TttPosition};

#[derive(Clone, Copy, Debug)]
pub(crate) enum Behavior {
    /// Lowest index legal move
    FirstLegal,
    /// The same move every time, legal or not
    Repeat(TttMove),
    /// Fails with a selector error
    Faulty,
    Panicking,
}

/// Deterministic selector recording a one-hot distribution for each chosen move.
pub(crate) struct TestSelector {
    behavior: Behavior,
    records: Vec<Record<TttGame>>,
}

impl TestSelector {
    pub(crate) fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            records: Vec::new(),
        }
    }
}

impl MoveSelector<TttGame> for TestSelector {
    fn select_action(&mut self, position: &TttPosition) -> Result<TttMove, SelectorError> {
        let m = match self.behavior {
            Behavior::FirstLegal => *position
                .legal_moves()
                .first()
                .ok_or(SelectorError::NoLegalMoves)?,
            Behavior::Repeat(m) => m,
            Behavior::Faulty => return Err(SelectorError::Other("search diverged".to_string())),
            Behavior::Panicking => panic!("selector exploded"),
        };
        self.records.push(Record::new(*position, vec![(m, 1.0)]));
        Ok(m)
    }

    fn action_rejected(&mut self, _m: &TttMove) {
        self.records.pop();
    }

    fn finish(&mut self, result: f32) {
        for record in self.records.iter_mut() {
            record.value = result;
        }
    }

    fn take_records(&mut self) -> Vec<Record<TttGame>> {
        std::mem::take(&mut self.records)
    }
}

/// Builds `TestSelector`s, game `i` (counted in build order, two builds per game) gets the
/// behavior registered for it or the default one.
pub(crate) struct TestFactory {
    default: Behavior,
    per_game: HashMap<usize, Behavior>,
    builds: AtomicUsize,
    channels_seen: Mutex<Vec<usize>>,
}

impl TestFactory {
    pub(crate) fn new(default: Behavior) -> Self {
        Self {
            default,
            per_game: HashMap::new(),
            builds: AtomicUsize::new(0),
            channels_seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_game(mut self, game_idx: usize, behavior: Behavior) -> Self {
        self.per_game.insert(game_idx, behavior);
        self
    }

    pub(crate) fn channels_seen(&self) -> Vec<usize> {
        self.channels_seen.lock().unwrap().clone()
    }
}

impl SelectorFactory<TttGame> for TestFactory {
    fn build<'a>(&self, channel: &'a InferenceChannel<TttGame>) -> Box<dyn MoveSelector<TttGame> + 'a> {
        let game_idx = self.builds.fetch_add(1, Ordering::SeqCst) / 2;
        self.channels_seen.lock().unwrap().push(channel.id());
        let behavior = self.per_game.get(&game_idx).copied().unwrap_or(self.default);
        Box::new(TestSelector::new(behavior))
    }
}

pub(crate) fn test_pool(size: usize) -> Arc<ChannelPool<TttGame>> {
    Arc::new(ChannelPool::new((0..size).map(disconnected_channel).collect()))
}
