use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::SelfPlayConfig;
use crate::error::{GameFault, PipelineError, StorageError};
use crate::game::{Game, GameColor};
use crate::inference::{ChannelPool, InferenceServer};
use crate::net::store::{ModelHandle, ModelStore};
use crate::self_play::observer::GameObserver;
use crate::self_play::selector::SelectorFactory;
use crate::self_play::session::{play_game, GameOutput, SessionLimits};
use crate::self_play::writer::{DataWriter, PendingWrite, WriteFailure};
use crate::self_play::Record;
use crate::util::worker_pool::{JobError, Ticket, WorkerPool};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub games_completed: usize,
    pub games_adjudicated: usize,
    pub games_failed: usize,
    pub games_cancelled: usize,
    pub player1_wins: usize,
    pub player2_wins: usize,
    pub draws: usize,
    pub flushes: usize,
    pub records_flushed: usize,
}

type GameTicket<G> = Ticket<Result<GameOutput<G>, GameFault>>;

/// Keeps `worker_threads` games in flight, collects their records and writes them to disk every
/// `nb_game_in_file` completed games, reloading the best model after each write.
///
/// Results are consumed in submission order. The record buffer is only touched by the thread
/// calling `run`, games hand their records back through their tickets.
pub struct Orchestrator<G: Game> {
    /* Dropped first, in-flight games must end before the pool and the backend go away */
    workers: WorkerPool,
    pool: Arc<ChannelPool<G>>,
    model: ModelHandle<G>,
    store: ModelStore<G>,
    factory: Arc<dyn SelectorFactory<G>>,
    observer: Box<dyn GameObserver>,
    writer: DataWriter,
    limits: SessionLimits,
    nb_game_in_file: usize,
    stop: Arc<AtomicBool>,
    buffer: Vec<Record<G>>,
    pending_writes: VecDeque<PendingWrite<G>>,
    stats: RunStats,
}

impl<G: Game> Orchestrator<G> {
    /// Load the best model and start the inference backend and the game workers.
    ///
    /// Failing to load or build a model is fatal.
    pub fn new(
        config: &SelfPlayConfig,
        store: ModelStore<G>,
        factory: Arc<dyn SelectorFactory<G>>,
        observer: Box<dyn GameObserver>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let model = store.load(config.new_model)?;

        let server = InferenceServer::start(
            model.clone(),
            config.inference_threads,
            config.inference_batch_size,
            config.inference_batch_timeout(),
        )?;
        let pool = Arc::new(ChannelPool::new(server.channels(config.eval_channels)));
        let workers = WorkerPool::new("self-play", config.worker_threads)?;
        log::info!(
            "self play ready: {} workers, {} inference channels",
            workers.size(),
            pool.size()
        );

        Ok(Self {
            workers,
            pool,
            model,
            store,
            factory,
            observer,
            writer: DataWriter::new(&config.play_data_dir, config.max_file_num),
            limits: config.session_limits(),
            nb_game_in_file: config.nb_game_in_file,
            stop: Arc::new(AtomicBool::new(false)),
            buffer: Vec::new(),
            pending_writes: VecDeque::new(),
            stats: RunStats::default(),
        })
    }

    /// Setting the flag makes `run` stop submitting games and cancels the ones in flight.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn pool(&self) -> &Arc<ChannelPool<G>> {
        &self.pool
    }

    pub fn model(&self) -> &ModelHandle<G> {
        &self.model
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Records of completed games not written yet
    pub fn buffered_records(&self) -> usize {
        self.buffer.len()
    }

    /// Play games until `games_limit` games were submitted (forever if `None`) or the stop flag is
    /// set, then write whatever is left in the buffer.
    ///
    /// Only storage collisions end the run early with an error, after a last write attempt.
    pub fn run(&mut self, games_limit: Option<usize>) -> Result<RunStats, PipelineError> {
        let mut in_flight: VecDeque<GameTicket<G>> = VecDeque::new();
        let mut submitted = 0;
        let mut game_idx = 0;
        let mut games_since_flush = 0;
        let mut fatal = None;

        loop {
            while fatal.is_none()
                && in_flight.len() < self.workers.size()
                && !self.stop.load(Ordering::Relaxed)
                && games_limit.map_or(true, |limit| submitted < limit)
            {
                in_flight.push_back(self.submit_game());
                submitted += 1;
            }

            /* Wait for the oldest game, not for whichever finishes first */
            let Some(ticket) = in_flight.pop_front() else {
                break;
            };
            game_idx += 1;
            if self.consume(game_idx, ticket) {
                games_since_flush += 1;
                if games_since_flush == self.nb_game_in_file {
                    games_since_flush = 0;
                    if let Err(err) = self.flush_buffer() {
                        fatal.get_or_insert(err);
                    }
                    self.refresh_model();
                }
            }

            if let Err(err) = self.poll_pending_writes(false) {
                fatal.get_or_insert(err);
            }
            if fatal.is_some() {
                self.stop.store(true, Ordering::Relaxed);
            }
        }

        let shutdown = self.shutdown_flush();
        if let Some(err) = fatal {
            return Err(err.into());
        }
        shutdown?;
        log::info!(
            "self play done: {} games completed, {} failed, {} records written",
            self.stats.games_completed,
            self.stats.games_failed,
            self.stats.records_flushed
        );
        Ok(self.stats.clone())
    }

    fn submit_game(&self) -> GameTicket<G> {
        let pool = Arc::clone(&self.pool);
        let factory = Arc::clone(&self.factory);
        let stop = Arc::clone(&self.stop);
        let limits = self.limits;
        self.workers
            .submit(move || play_game(&pool, factory.as_ref(), limits, &stop))
    }

    /// Account for one game, returns whether it completed.
    fn consume(&mut self, game_idx: usize, ticket: GameTicket<G>) -> bool {
        let res = ticket.wait().unwrap_or_else(|err| {
            Err(match err {
                JobError::Panicked(msg) => GameFault::Panicked(msg),
                JobError::Lost => GameFault::Cancelled,
            })
        });

        match res {
            Ok(output) => {
                let summary = &output.summary;
                self.stats.games_completed += 1;
                if summary.adjudicated {
                    self.stats.games_adjudicated += 1;
                }
                match summary.winner {
                    Some(GameColor::Player1) => self.stats.player1_wins += 1,
                    Some(GameColor::Player2) => self.stats.player2_wins += 1,
                    None => self.stats.draws += 1,
                }
                self.observer.game_finished(game_idx, summary);
                self.buffer.extend(output.records);
                true
            }
            Err(fault) => {
                match fault {
                    GameFault::Cancelled => self.stats.games_cancelled += 1,
                    _ => self.stats.games_failed += 1,
                }
                self.observer.game_failed(game_idx, &fault);
                false
            }
        }
    }

    /// Hand the whole buffer to the writer, an empty buffer is not written.
    fn flush_buffer(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            log::debug!("no records to flush");
            return Ok(());
        }
        let records = std::mem::take(&mut self.buffer);
        match self.writer.flush(records) {
            Ok(pending) => {
                log::info!("save play data to {}", pending.path().display());
                self.pending_writes.push_back(pending);
                Ok(())
            }
            Err(failure) => self.write_failed(failure),
        }
    }

    /// Put the records of a failed write back in front of the buffer.
    fn write_failed(&mut self, failure: WriteFailure<G>) -> Result<(), StorageError> {
        let WriteFailure { error, mut records } = failure;
        if !error.is_fatal() {
            log::warn!(
                "failed to write play data ({error}), keeping {} records for the next flush",
                records.len()
            );
        }
        records.append(&mut self.buffer);
        self.buffer = records;
        if error.is_fatal() {
            return Err(error);
        }
        Ok(())
    }

    /// Collect finished writes, in order. With `wait`, block until all of them are done.
    fn poll_pending_writes(&mut self, wait: bool) -> Result<(), StorageError> {
        let mut res = Ok(());
        while let Some(pending) = self.pending_writes.front() {
            if !wait && !pending.is_finished() {
                break;
            }
            let Some(pending) = self.pending_writes.pop_front() else {
                break;
            };
            let path = pending.path().to_path_buf();
            match pending.join() {
                Ok(records_num) => {
                    self.stats.flushes += 1;
                    self.stats.records_flushed += records_num;
                    self.observer.data_flushed(&path, records_num);
                }
                Err(failure) => {
                    if let Err(err) = self.write_failed(failure) {
                        res = res.and(Err(err));
                    }
                }
            }
        }
        res
    }

    fn refresh_model(&mut self) {
        if let Err(err) = self.store.refresh_if_changed(&self.model) {
            log::warn!("failed to reload the best model, keeping the current weights: {err}");
        }
    }

    /// Write everything still buffered and wait for all writes, retrying a failed batch once.
    fn shutdown_flush(&mut self) -> Result<(), StorageError> {
        let mut res = self.poll_pending_writes(true);
        for _ in 0..2 {
            if self.buffer.is_empty() {
                break;
            }
            let attempt = self
                .flush_buffer()
                .and_then(|()| self.poll_pending_writes(true));
            res = res.and(attempt);
        }
        if !self.buffer.is_empty() {
            log::error!("{} records could not be written", self.buffer.len());
        }
        res
    }
}

impl<G: Game> Drop for Orchestrator<G> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.pool.close();
    }
}
