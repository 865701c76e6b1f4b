use std::path::PathBuf;

/// Errors raised by an inference channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("inference backend disconnected")]
    Disconnected,

    #[error("channel pool closed")]
    PoolClosed,
}

/// Errors raised by a move selector while choosing an action.
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("evaluation failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("no legal moves available")]
    NoLegalMoves,

    #[error("{0}")]
    Other(String),
}

/// Faults that abandon a single game. None of them stop the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GameFault {
    #[error("move selector failed: {0}")]
    Selector(#[from] SelectorError),

    #[error("could not borrow an inference channel: {0}")]
    Channel(#[from] ChannelError),

    #[error("game cancelled")]
    Cancelled,

    #[error("game worker panicked: {0}")]
    Panicked(String),
}

/// Errors raised while persisting or reading training data.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("data file already exists: {0}")]
    Collision(PathBuf),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode records: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Collisions mean two writers share a directory and name, the run can not go on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Collision(_))
    }
}

/// Errors raised while loading, saving or reloading model weights.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse model {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to save model {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("model shape mismatch: expected {expected} move scores, found {found}")]
    Shape { expected: usize, found: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Errors that stop the whole self-play pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
