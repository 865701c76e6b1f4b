use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use crate::config::SelfPlayConfig;
use crate::error::{PipelineError, StorageError};
use crate::game::Game;
use crate::net::store::ModelStore;
use crate::net::NetworkBuilder;
use crate::self_play::{LogObserver, Orchestrator, PolicyPlayerFactory, RunStats};
use crate::util;

#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
struct SelfPlayArgs {
    /// JSON config file, the flags below override its values
    #[clap(long)]
    config: Option<PathBuf>,
    /// Play this many games and exit, otherwise run until interrupted
    #[clap(long)]
    games_num: Option<usize>,
    #[clap(long)]
    workers: Option<usize>,
    #[clap(long)]
    channels: Option<usize>,
    #[clap(long)]
    play_data_dir: Option<PathBuf>,
    #[clap(long)]
    model_dir: Option<PathBuf>,
    /// Build a new best model even if one exists
    #[clap(long)]
    new: bool,
    #[clap(long)]
    max_game_length: Option<usize>,
    #[clap(long)]
    nb_game_in_file: Option<usize>,
    #[clap(long)]
    max_file_num: Option<usize>,
    #[clap(long)]
    temperature_policy: Option<String>,
    #[clap(long)]
    summary_file: Option<PathBuf>,
}

impl SelfPlayArgs {
    fn to_config(&self) -> Result<SelfPlayConfig, PipelineError> {
        let mut config = match &self.config {
            Some(path) => SelfPlayConfig::load(path)?,
            None => SelfPlayConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.worker_threads = workers;
            if self.channels.is_none() {
                config.eval_channels = config.eval_channels.max(workers);
            }
        }
        if let Some(channels) = self.channels {
            config.eval_channels = channels;
        }
        if let Some(dir) = &self.play_data_dir {
            config.play_data_dir = dir.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        config.new_model |= self.new;
        if let Some(max_game_length) = self.max_game_length {
            config.max_game_length = max_game_length;
        }
        if let Some(nb_game_in_file) = self.nb_game_in_file {
            config.nb_game_in_file = nb_game_in_file;
        }
        if let Some(max_file_num) = self.max_file_num {
            config.max_file_num = max_file_num;
        }
        if let Some(temperature_policy) = &self.temperature_policy {
            config.temperature_policy = temperature_policy.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

pub fn run_main<G: Game>(network_builder: Arc<dyn NetworkBuilder<G>>) -> Result<(), PipelineError> {
    util::init_logging();
    let args = SelfPlayArgs::parse();

    let metrics_snapshotter = match args.summary_file {
        Some(_) => {
            let recorder = DebuggingRecorder::new();
            let snapshotter = recorder.snapshotter();
            recorder
                .install()
                .map_err(|err| io::Error::other(err.to_string()))?;
            Some(snapshotter)
        }
        None => None,
    };

    let config = args.to_config()?;
    log::info!("self play config: {config:?}");

    let store = ModelStore::new(&config.model_dir, network_builder);
    let factory = Arc::new(PolicyPlayerFactory::new(config.temperature()?));
    let mut orchestrator = Orchestrator::new(&config, store, factory, Box::new(LogObserver::new()))?;

    let stop = orchestrator.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("interrupted, finishing the games in flight");
        stop.store(true, Ordering::Relaxed);
    })
    .map_err(|err| io::Error::other(err.to_string()))?;

    let stats = orchestrator.run(args.games_num)?;

    if let (Some(summary_file), Some(snapshotter)) = (args.summary_file, metrics_snapshotter) {
        let mut metrics = HashMap::new();
        for (key, _unit, _desc, value) in snapshotter.snapshot().into_vec() {
            let key = key.key().name().to_string();
            let value = match value {
                DebugValue::Counter(value) => serde_json::Value::from(value),
                DebugValue::Gauge(value) => serde_json::Value::from(value.0),
                DebugValue::Histogram(values) => {
                    serde_json::Value::from(values.into_iter().map(|v| v.0).collect::<Vec<_>>())
                }
            };
            metrics.insert(key, value);
        }

        #[derive(serde::Serialize)]
        struct Summary {
            player1_wins: usize,
            player2_wins: usize,
            draws: usize,
            stats: RunStats,
            metrics: HashMap<String, serde_json::Value>,
        }
        let summary = Summary {
            player1_wins: stats.player1_wins,
            player2_wins: stats.player2_wins,
            draws: stats.draws,
            stats,
            metrics,
        };
        let writer = std::fs::File::create_new(summary_file)?;
        serde_json::to_writer(writer, &summary).map_err(StorageError::Encode)?;
    }

    Ok(())
}
