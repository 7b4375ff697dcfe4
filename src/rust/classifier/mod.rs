mod error;
mod embedding;
mod frame;
#[allow(clippy::module_inception)]
mod classifier;
mod dataset;
pub mod builder;
mod utils;

use serde::Serialize;

pub use error::ClassifierError;
pub use classifier::{DistanceMetric, Embedding, KnnClassifier, Prediction, SharedClassifier};
pub use builder::{KnnClassifierBuilder, DEFAULT_NUM_CLASSES, DEFAULT_TOP_K};
pub use dataset::{ClassifierDataset, SerializedClass, SerializedDataset};
pub use embedding::{EmbedderConfig, EmbeddingProvider, OnnxImageEmbedder};
pub use frame::{Frame, RawImage};

/// Information about the current state and configuration of a classifier
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierInfo {
    /// Number of labels the classifier accepts
    pub max_classes: usize,
    /// Number of labels with at least one example
    pub num_classes: usize,
    /// Stored examples per label
    pub example_counts: Vec<usize>,
    /// Size of the embedding vectors, once known
    pub embedding_size: Option<usize>,
    /// Neighbors consulted per prediction
    pub top_k: usize,
    /// Distance used to rank neighbors
    pub metric: DistanceMetric,
}
