use std::path::Path;

use crate::error::GameFault;
use crate::game::GameColor;
use crate::self_play::session::GameSummary;
use crate::util::metrics::RunningAverage;

/// Receives the outcome of every game and flush, in the order the orchestrator consumes them.
pub trait GameObserver: Send {
    fn game_finished(&mut self, game_idx: usize, summary: &GameSummary);

    fn game_failed(&mut self, game_idx: usize, fault: &GameFault);

    fn data_flushed(&mut self, _path: &Path, _records_num: usize) {}
}

/// Reports games through the log and the metrics recorder.
pub struct LogObserver {
    game_duration: RunningAverage,
}

impl LogObserver {
    pub fn new() -> Self {
        Self {
            game_duration: RunningAverage::new(0.1, metrics::gauge!("selfplay.game_duration")),
        }
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl GameObserver for LogObserver {
    fn game_finished(&mut self, game_idx: usize, summary: &GameSummary) {
        log::info!("{}", summary_line(game_idx, summary));

        metrics::counter!("selfplay.games_completed").increment(1);
        if summary.adjudicated {
            metrics::counter!("selfplay.games_adjudicated").increment(1);
        }
        self.game_duration.set(summary.duration.as_secs_f64());
    }

    fn game_failed(&mut self, game_idx: usize, fault: &GameFault) {
        match fault {
            GameFault::Cancelled => log::debug!("game {game_idx} cancelled"),
            fault => {
                log::warn!("game {game_idx} abandoned: {fault}");
                metrics::counter!("selfplay.games_failed").increment(1);
            }
        }
    }

    fn data_flushed(&mut self, path: &Path, records_num: usize) {
        log::info!("save play data to {} ({records_num} records)", path.display());
        metrics::counter!("selfplay.flushes").increment(1);
        metrics::counter!("selfplay.records_flushed").increment(records_num as u64);
    }
}

pub(crate) fn summary_line(game_idx: usize, summary: &GameSummary) -> String {
    let winner = match summary.winner {
        Some(GameColor::Player1) => "player1",
        Some(GameColor::Player2) => "player2",
        None => "draw",
    };
    format!(
        "game {game_idx:3} time={:5.1}s halfmoves={:3} {winner:8} {}",
        summary.duration.as_secs_f64(),
        summary.ply_count,
        if summary.adjudicated { "adjudicated" } else { "" },
    )
    .trim_end()
    .to_string()
}
