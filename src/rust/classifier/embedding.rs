use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use image::imageops::{self, FilterType};
use log::{error, info};
use ndarray::{Array1, Array4};
use ort::session::Session;
use ort::value::Tensor;

use super::classifier::Embedding;
use super::error::ClassifierError;
use super::frame::Frame;
use crate::runtime::{create_session_builder, RuntimeConfig};

/// Turns an image frame into a fixed-length feature vector.
///
/// Implementations must be deterministic for identical input and return
/// vectors of one constant length.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, frame: &Frame) -> Result<Embedding, ClassifierError>;

    /// Length of the produced vectors, when known ahead of the first call
    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Preprocessing applied before a frame is fed to the network.
///
/// Frames are resized to `image_size` x `image_size`, scaled to `[0, 1]`,
/// then normalized per channel with `mean` and `std` and laid out as NCHW.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub image_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub runtime: RuntimeConfig,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Embeds frames with an ONNX image network, using the flattened first
/// output as the feature vector.
///
/// The model is expected to:
/// - Accept one float input of shape [1, 3, image_size, image_size]
/// - Produce at least one float output; its values become the embedding
pub struct OnnxImageEmbedder {
    pub model_path: String,
    session: Mutex<Session>,
    input_name: String,
    config: EmbedderConfig,
    dimension: usize,
}

impl std::fmt::Debug for OnnxImageEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxImageEmbedder")
            .field("model_path", &self.model_path)
            .field("input_name", &self.input_name)
            .field("config", &self.config)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl OnnxImageEmbedder {
    /// Loads an ONNX model and infers the embedding size by running a blank
    /// frame through it.
    ///
    /// # Errors
    /// - `BuildError` if the file does not exist or the session cannot be created
    /// - `ModelError` if the model has no inputs or outputs
    /// - `ValidationError` if `image_size` is zero
    pub fn from_file(model_path: impl AsRef<Path>, config: EmbedderConfig) -> Result<Self, ClassifierError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(ClassifierError::BuildError(format!("Model file not found: {}", model_path.display())));
        }
        if config.image_size == 0 {
            return Err(ClassifierError::ValidationError("Image size cannot be zero".into()));
        }

        let session = create_session_builder(&config.runtime)?
            .commit_from_file(model_path)
            .map_err(|e| {
                error!("Failed to load model {}: {}", model_path.display(), e);
                ClassifierError::BuildError(format!("Failed to load model: {}", e))
            })?;

        Self::validate_model(&session)?;
        let input_name = session.inputs[0].name.clone();
        info!("Model structure validated successfully (input '{}')", input_name);

        let mut embedder = Self {
            model_path: model_path.to_string_lossy().to_string(),
            session: Mutex::new(session),
            input_name,
            config,
            dimension: 0,
        };

        let blank_size = embedder.config.image_size;
        let blank = Frame::from(image::RgbImage::new(blank_size, blank_size));
        embedder.dimension = embedder.run(&blank)?.len();
        info!("Inferred embedding size from model: {}", embedder.dimension);

        Ok(embedder)
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    /// Resizes and normalizes a frame into the network's input layout.
    pub(crate) fn preprocess(&self, frame: &Frame) -> Array4<f32> {
        let size = self.config.image_size;
        let resized = if frame.width() == size && frame.height() == size {
            frame.as_rgb().clone()
        } else {
            imageops::resize(frame.as_rgb(), size, size, FilterType::Triangle)
        };

        let side = size as usize;
        let mut input = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                let value = pixel.0[channel] as f32 / 255.0;
                input[[0, channel, y as usize, x as usize]] =
                    (value - self.config.mean[channel]) / self.config.std[channel];
            }
        }
        input
    }

    fn run(&self, frame: &Frame) -> Result<Embedding, ClassifierError> {
        let input = self.preprocess(frame);

        let mut input_tensors = HashMap::new();
        input_tensors.insert(
            self.input_name.clone(),
            Tensor::from_array(input)
                .map_err(|e| ClassifierError::ModelError(format!("Failed to create input tensor: {}", e)))?,
        );

        let session = self.session.lock()
            .map_err(|_| ClassifierError::ModelError("Session lock poisoned".into()))?;
        let outputs = session.run(input_tensors)
            .map_err(|e| ClassifierError::EmbeddingError(format!("Failed to run model: {}", e)))?;
        let output_tensor = outputs[0].try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::EmbeddingError(format!("Failed to extract output tensor: {}", e)))?;

        Ok(Array1::from_iter(output_tensor.iter().copied()))
    }

    /// Validates that the model has the expected input/output structure
    fn validate_model(session: &Session) -> Result<(), ClassifierError> {
        if session.inputs.is_empty() {
            return Err(ClassifierError::ModelError("Model must have an image input".to_string()));
        }
        if session.outputs.is_empty() {
            return Err(ClassifierError::ModelError(
                "Model must have at least 1 output for embeddings".to_string()
            ));
        }
        Ok(())
    }
}

impl EmbeddingProvider for OnnxImageEmbedder {
    fn embed(&self, frame: &Frame) -> Result<Embedding, ClassifierError> {
        let embedding = self.run(frame)?;
        if embedding.len() != self.dimension {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }
}
