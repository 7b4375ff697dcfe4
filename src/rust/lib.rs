//! Real-time image classification with a persistent k-nearest-neighbor
//! dataset over image embeddings.
//!
//! Images are turned into feature vectors by an [`EmbeddingProvider`],
//! stored under integer labels in a [`KnnClassifier`], saved between sessions
//! through [`DatasetPersistence`], and classified frame by frame by an
//! [`InferenceLoop`].
//!
//! # Basic Usage
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use ndarray::array;
//! use snapclass::{KnnClassifier, DatasetPersistence, MemoryStore};
//!
//! let mut classifier = KnnClassifier::builder()
//!     .with_max_classes(3)
//!     .with_top_k(3)
//!     .build()?;
//! classifier.add_example(&array![0.0, 1.0], 0)?;
//! classifier.add_example(&array![1.0, 0.0], 1)?;
//!
//! let persistence = DatasetPersistence::new(Arc::new(MemoryStore::new()));
//! persistence.save(&classifier.export_dataset())?;
//!
//! let restored = persistence.load_dataset()?.expect("dataset was saved");
//! let mut fresh = KnnClassifier::builder().build()?;
//! fresh.import_dataset(restored)?;
//!
//! let prediction = fresh.predict(&array![0.9, 0.1], 1)?;
//! assert_eq!(prediction.label, 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Live Inference
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use snapclass::{
//!     BuiltinModel, ChannelFrameSource, DatasetPersistence, FileStore, InferenceLoop,
//!     KnnClassifier, LogSink, ModelManager, OnnxImageEmbedder,
//! };
//!
//! let model = BuiltinModel::MobileNetV2;
//! let model_path = ModelManager::new_default()?.ensure_model_downloaded(model).await?;
//! let embedder = Arc::new(OnnxImageEmbedder::from_file(model_path, model.embedder_config())?);
//!
//! let classifier = KnnClassifier::builder().build()?.into_shared();
//! let persistence = DatasetPersistence::new(Arc::new(FileStore::new_default()?));
//! let (frames, source) = ChannelFrameSource::new(4);
//!
//! let mut inference = InferenceLoop::new(classifier, embedder, persistence, Box::new(source), Arc::new(LogSink));
//! inference.start().await?;
//! // a capture task sends frames into `frames` ...
//! # drop(frames);
//! inference.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod classifier;
mod runtime;
pub mod model_manager;
pub mod models;
pub mod persistence;
pub mod ingest;
pub mod inference;

pub use classifier::{
    ClassifierDataset, ClassifierError, ClassifierInfo, DistanceMetric, EmbedderConfig, Embedding,
    EmbeddingProvider, Frame, KnnClassifier, KnnClassifierBuilder, OnnxImageEmbedder, Prediction,
    RawImage, SerializedClass, SerializedDataset, SharedClassifier,
};
pub use runtime::{RuntimeConfig, create_session_builder};
pub use model_manager::{ModelManager, ModelError};
pub use models::{BuiltinModel, ModelCharacteristics, ModelInfo};
pub use persistence::{DatasetPersistence, FileStore, KeyValueStore, MemoryStore, DEFAULT_STORAGE_KEY};
pub use ingest::{TrainingIngestion, TrainingReport, MAX_BATCH_SIZE};
pub use inference::{
    ChannelFrameSource, FrameSource, ImageFileSource, InferenceLoop, LogSink, LoopState, LoopStats,
    PredictionSink, PredictionUpdate,
};

pub fn init_logger() {
    env_logger::init();
}
