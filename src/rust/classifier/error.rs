use ort::Error as OrtError;
use std::io;

/// Represents the different types of errors that can occur in the image classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// An embedding's length does not match the dimensionality of the stored examples
    #[error("Dimension mismatch: expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// A class label outside `[0, max_classes)`
    #[error("Invalid label {label}: classifier accepts labels below {max_classes}")]
    InvalidLabel { label: usize, max_classes: usize },
    /// A training batch larger than the ingestion bound
    #[error("Batch too large: {size} images (max: {max})")]
    BatchTooLarge { size: usize, max: usize },
    /// Prediction was requested before any example was added
    #[error("Empty classifier: add examples before predicting")]
    EmptyClassifier,
    /// The persisted dataset exists but cannot be decoded
    #[error("Corrupt persisted state: {0}")]
    CorruptPersistedState(String),
    /// Reading or writing the persistence slot failed
    #[error("Storage error: {0}")]
    StorageError(#[from] io::Error),
    /// The embedding provider failed to embed a frame
    #[error("Embedding error: {0}")]
    EmbeddingError(String),
    /// A raw image could not be decoded
    #[error("Image error: {0}")]
    ImageError(String),
    /// Error occurred while loading or running the ONNX model
    #[error("Model error: {0}")]
    ModelError(String),
    /// Error occurred during the build phase
    #[error("Build error: {0}")]
    BuildError(String),
    /// Error occurred due to invalid input parameters
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<OrtError> for ClassifierError {
    fn from(err: OrtError) -> Self {
        ClassifierError::BuildError(err.to_string())
    }
}

impl From<image::ImageError> for ClassifierError {
    fn from(err: image::ImageError) -> Self {
        ClassifierError::ImageError(err.to_string())
    }
}
