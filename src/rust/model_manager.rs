use std::path::{Path, PathBuf};
use std::fs;
use std::io;
use std::sync::Arc;
use std::env;
use tokio::sync::Mutex;
use sha2::{Sha256, Digest};

use crate::models::{BuiltinModel, ModelInfo};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model not downloaded: {0}")]
    NotDownloaded(String),
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Model verification failed")]
    VerificationFailed,
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: String,
        actual: String,
    },
}

/// Caches embedding model files on disk.
#[derive(Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    download_lock: Arc<Mutex<()>>,
}

impl ModelManager {
    /// Creates a new ModelManager with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var("SNAPCLASS_CACHE") {
            return PathBuf::from(path).join("models");
        }

        // 2. Use platform-specific cache directory
        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("snapclass").join("models");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".cache").join("snapclass").join("models");
        }

        // 4. If all else fails, use system temp directory
        env::temp_dir().join("snapclass").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            download_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn get_model_path(&self, model: BuiltinModel) -> PathBuf {
        self.model_path_for(&model.get_model_info())
    }

    fn model_path_for(&self, info: &ModelInfo) -> PathBuf {
        self.models_dir.join(&info.name).join("model.onnx")
    }

    pub fn is_model_downloaded(&self, model: BuiltinModel) -> bool {
        let model_path = self.get_model_path(model);
        log::debug!("Model path: {:?} (exists: {})", model_path, model_path.exists());
        model_path.exists()
    }

    /// Returns the cached model path, failing if it has not been downloaded
    pub fn require_model(&self, model: BuiltinModel) -> Result<PathBuf, ModelError> {
        let path = self.get_model_path(model);
        if !path.exists() {
            return Err(ModelError::NotDownloaded(format!(
                "{:?} is not cached at {:?}; download it first",
                model, path
            )));
        }
        Ok(path)
    }

    pub async fn download_model(&self, model: BuiltinModel) -> Result<(), ModelError> {
        let info = model.get_model_info();
        let _lock = self.download_lock.lock().await;

        let model_path = self.model_path_for(&info);
        if model_path.exists() {
            log::info!("Model file exists at {:?}, verifying...", model_path);
            if self.verify_file(&model_path, info.model_hash.as_deref())? {
                log::info!("Existing model file verified successfully");
                return Ok(());
            }
            log::warn!("Model file verification failed, redownloading");
        }

        match self.download_and_verify_file(&info, &model_path).await {
            Ok(()) => {
                log::info!("Model ready to use");
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to setup model file: {}", e);
                self.discard_download(model);
                Err(e)
            }
        }
    }

    /// Checks a file against a pinned SHA-256. Without a pin, any existing
    /// file passes.
    fn verify_file(&self, path: &Path, expected_hash: Option<&str>) -> Result<bool, ModelError> {
        let Some(expected_hash) = expected_hash else {
            log::warn!("No checksum pinned for {:?}, skipping verification", path);
            return Ok(path.exists());
        };
        let bytes = fs::read(path)?;
        let hash = sha256_hex(&bytes);
        log::debug!("Calculated hash: {} (expected {})", hash, expected_hash);
        Ok(hash == expected_hash)
    }

    pub fn verify_model(&self, model: BuiltinModel) -> Result<bool, ModelError> {
        let info = model.get_model_info();
        let model_path = self.model_path_for(&info);
        if !model_path.exists() {
            log::info!("Model file {:?} does not exist", model_path);
            return Ok(false);
        }
        self.verify_file(&model_path, info.model_hash.as_deref())
    }

    async fn download_and_verify_file(&self, info: &ModelInfo, path: &Path) -> Result<(), ModelError> {
        log::info!("Downloading model from {} to {:?}", info.model_url, path);
        let response = reqwest::get(&info.model_url).await?.error_for_status()?;
        let bytes = response.bytes().await?;
        log::info!("Downloaded {} bytes", bytes.len());

        if let Some(expected) = &info.model_hash {
            let hash = sha256_hex(&bytes);
            if &hash != expected {
                log::error!("Model hash mismatch: expected {}, got {}", expected, hash);
                return Err(ModelError::HashMismatch {
                    expected: expected.clone(),
                    actual: hash,
                });
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &bytes)?;

        if !self.verify_file(path, info.model_hash.as_deref())? {
            return Err(ModelError::VerificationFailed);
        }
        Ok(())
    }

    pub fn remove_download(&self, model: BuiltinModel) -> Result<(), ModelError> {
        let model_path = self.get_model_path(model);
        if model_path.exists() {
            fs::remove_file(&model_path)?;
        }
        Ok(())
    }

    /// Best-effort removal of a failed download. Returns whether the file is gone.
    fn discard_download(&self, model: BuiltinModel) -> bool {
        match self.remove_download(model) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to remove partial download {:?}: {}", self.get_model_path(model), e);
                false
            }
        }
    }

    /// Ensures that a model is downloaded and verified.
    /// If the model doesn't exist, it will be downloaded.
    /// If verification fails, it will be re-downloaded.
    pub async fn ensure_model_downloaded(&self, model: BuiltinModel) -> Result<PathBuf, ModelError> {
        if !self.is_model_downloaded(model) {
            log::info!("Model not found, downloading...");
            self.download_model(model).await?;
        } else if !self.verify_model(model)? {
            log::info!("Model verification failed, re-downloading...");
            self.remove_download(model)?;
            self.download_model(model).await?;
        }
        Ok(self.get_model_path(model))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
