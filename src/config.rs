use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::self_play::session::SessionLimits;
use crate::self_play::temperature::TemperaturePolicy;

/// Self-play pipeline configuration, loadable from JSON. Missing fields take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfPlayConfig {
    /// Games played concurrently
    pub worker_threads: usize,
    /// Inference channels, at least `worker_threads`
    pub eval_channels: usize,
    pub inference_threads: usize,
    pub inference_batch_size: usize,
    pub inference_batch_timeout_us: u64,
    /// Plies after which a game is adjudicated
    pub max_game_length: usize,
    /// Illegal actions in a row after which a game is adjudicated
    pub max_consecutive_failures: usize,
    /// Completed games per data file
    pub nb_game_in_file: usize,
    /// Data files kept in `play_data_dir`
    pub max_file_num: usize,
    pub play_data_dir: PathBuf,
    pub model_dir: PathBuf,
    /// Build a fresh best model even if one exists
    pub new_model: bool,
    /// See `TemperaturePolicy::from_str`
    pub temperature_policy: String,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            eval_channels: 4,
            inference_threads: 1,
            inference_batch_size: 4,
            inference_batch_timeout_us: 1000,
            max_game_length: 1000,
            max_consecutive_failures: 50,
            nb_game_in_file: 100,
            max_file_num: 2000,
            play_data_dir: PathBuf::from("data/play_data"),
            model_dir: PathBuf::from("data/model"),
            new_model: false,
            temperature_policy: "30,1.0,0.0".to_string(),
        }
    }
}

impl SelfPlayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SelfPlayConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("worker_threads", self.worker_threads),
            ("eval_channels", self.eval_channels),
            ("inference_threads", self.inference_threads),
            ("inference_batch_size", self.inference_batch_size),
            ("max_consecutive_failures", self.max_consecutive_failures),
            ("nb_game_in_file", self.nb_game_in_file),
            ("max_file_num", self.max_file_num),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be > 0")));
            }
        }
        if self.eval_channels < self.worker_threads {
            return Err(ConfigError::Validation(
                "eval_channels must be >= worker_threads".into(),
            ));
        }
        self.temperature()?;
        Ok(())
    }

    pub fn temperature(&self) -> Result<TemperaturePolicy, ConfigError> {
        self.temperature_policy.parse()
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_ply: self.max_game_length,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    pub fn inference_batch_timeout(&self) -> Duration {
        Duration::from_micros(self.inference_batch_timeout_us)
    }
}
