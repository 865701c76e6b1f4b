use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::error::ModelError;
use crate::game::Game;
use crate::net::{Network, NetworkBuilder};

pub const BEST_MODEL_FILENAME: &str = "best_model.json";

/// Identity of a weights file, changes whenever its content does
pub type ModelDigest = u64;

pub struct LoadedModel<G: Game> {
    net: Box<dyn Network<G>>,
    digest: Option<ModelDigest>,
}

impl<G: Game> LoadedModel<G> {
    pub fn net(&self) -> &dyn Network<G> {
        self.net.as_ref()
    }

    pub fn digest(&self) -> Option<ModelDigest> {
        self.digest
    }
}

/// The currently loaded evaluator, shared read-only by the inference backend.
///
/// Evaluations hold the read lock for the duration of one batch, reloads take the write lock, so a
/// reload never overlaps an evaluation.
pub struct ModelHandle<G: Game> {
    inner: Arc<RwLock<LoadedModel<G>>>,
}

impl<G: Game> Clone for ModelHandle<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: Game> ModelHandle<G> {
    pub fn new(net: Box<dyn Network<G>>, digest: Option<ModelDigest>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LoadedModel { net, digest })),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, LoadedModel<G>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn reload(&self, path: &Path, digest: ModelDigest) -> Result<(), ModelError> {
        let mut model = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        model.net.load_weights(path)?;
        model.digest = Some(digest);
        Ok(())
    }
}

/// Owner of the "best model" pointer: a weights file inside the model directory.
pub struct ModelStore<G: Game> {
    model_dir: PathBuf,
    builder: Arc<dyn NetworkBuilder<G>>,
}

impl<G: Game> ModelStore<G> {
    pub fn new(model_dir: impl Into<PathBuf>, builder: Arc<dyn NetworkBuilder<G>>) -> Self {
        Self {
            model_dir: model_dir.into(),
            builder,
        }
    }

    pub fn best_model_path(&self) -> PathBuf {
        self.model_dir.join(BEST_MODEL_FILENAME)
    }

    /// Load the current best model, building and saving a fresh one if there is no best model yet or
    /// `force_new` is set.
    pub fn load(&self, force_new: bool) -> Result<ModelHandle<G>, ModelError> {
        let path = self.best_model_path();
        let net = if !force_new && path.exists() {
            let net = self.builder.load(&path)?;
            log::info!("loaded best model from {}", path.display());
            net
        } else {
            fs::create_dir_all(&self.model_dir)?;
            let net = self.builder.build_new();
            net.save(&path)?;
            log::info!("built a new model and saved it as best model {}", path.display());
            net
        };
        let digest = file_digest(&path)?;
        Ok(ModelHandle::new(net, digest))
    }

    /// Reload the weights into `handle` if the best model changed since they were loaded.
    ///
    /// Returns whether a reload happened.
    pub fn refresh_if_changed(&self, handle: &ModelHandle<G>) -> Result<bool, ModelError> {
        let path = self.best_model_path();
        let Some(digest) = file_digest(&path)? else {
            log::warn!("best model {} is missing, keeping current weights", path.display());
            return Ok(false);
        };
        if handle.read().digest() == Some(digest) {
            return Ok(false);
        }

        handle.reload(&path, digest)?;
        metrics::counter!("model.reloads").increment(1);
        log::info!("reloaded best model weights from {}", path.display());
        Ok(true)
    }
}

fn file_digest(path: &Path) -> Result<Option<ModelDigest>, ModelError> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ModelError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    Ok(Some(hasher.finish()))
}
