use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};

use crate::classifier::{ClassifierError, Embedding, EmbeddingProvider, Frame, RawImage, SharedClassifier};
use crate::persistence::DatasetPersistence;

/// Largest number of images accepted in one labeled batch
pub const MAX_BATCH_SIZE: usize = 200;

/// Examples added by one training run, per label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingReport {
    pub added: BTreeMap<usize, usize>,
}

impl TrainingReport {
    pub fn total(&self) -> usize {
        self.added.values().sum()
    }
}

/// Turns labeled images into stored examples and saves the result.
pub struct TrainingIngestion {
    classifier: SharedClassifier,
    embedder: Arc<dyn EmbeddingProvider>,
    persistence: DatasetPersistence,
}

impl TrainingIngestion {
    pub fn new(
        classifier: SharedClassifier,
        embedder: Arc<dyn EmbeddingProvider>,
        persistence: DatasetPersistence,
    ) -> Self {
        Self { classifier, embedder, persistence }
    }

    fn check_batch_size(size: usize) -> Result<(), ClassifierError> {
        if size > MAX_BATCH_SIZE {
            return Err(ClassifierError::BatchTooLarge { size, max: MAX_BATCH_SIZE });
        }
        Ok(())
    }

    /// Decodes, embeds and stores a batch of images under `label`.
    ///
    /// Every image is embedded before anything is stored, so a failure
    /// anywhere in the batch leaves the classifier unchanged.
    ///
    /// # Errors
    /// - `BatchTooLarge` if more than 200 images are given
    /// - `InvalidLabel` if the label is out of range
    /// - `ImageError` if an image cannot be decoded
    /// - `DimensionMismatch` if an embedding does not fit the stored examples
    pub async fn ingest(&self, label: usize, images: &[RawImage]) -> Result<usize, ClassifierError> {
        Self::check_batch_size(images.len())?;
        self.classifier.read().await.validate_label(label)?;

        let mut embeddings = Vec::with_capacity(images.len());
        for image in images {
            let frame = image.decode()?;
            embeddings.push(self.embedder.embed(&frame)?);
        }
        self.store(label, &embeddings).await
    }

    /// Embeds and stores already-captured frames under `label`, with the same
    /// bound and all-or-nothing behavior as [`ingest`](Self::ingest).
    pub async fn ingest_frames(&self, label: usize, frames: &[Frame]) -> Result<usize, ClassifierError> {
        Self::check_batch_size(frames.len())?;
        self.classifier.read().await.validate_label(label)?;

        let embeddings = frames
            .iter()
            .map(|frame| self.embedder.embed(frame))
            .collect::<Result<Vec<_>, _>>()?;
        self.store(label, &embeddings).await
    }

    async fn store(&self, label: usize, embeddings: &[Embedding]) -> Result<usize, ClassifierError> {
        let added = self.classifier.write().await.add_examples(embeddings, label)?;
        info!("Added {} examples to label {}", added, label);
        Ok(added)
    }

    /// Ingests every batch, then saves the classifier once.
    ///
    /// Batch sizes and labels are checked before any image is processed. If
    /// a later batch fails, the earlier ones stay in memory but nothing is
    /// saved.
    pub async fn train(&self, batches: &[(usize, Vec<RawImage>)]) -> Result<TrainingReport, ClassifierError> {
        {
            let classifier = self.classifier.read().await;
            for (label, images) in batches {
                Self::check_batch_size(images.len())?;
                classifier.validate_label(*label)?;
            }
        }

        let mut report = TrainingReport::default();
        for (label, images) in batches {
            if images.is_empty() {
                warn!("No images supplied for label {}", label);
                continue;
            }
            let added = self.ingest(*label, images).await?;
            *report.added.entry(*label).or_default() += added;
        }

        self.save().await?;
        info!("Training complete: {} examples added", report.total());
        Ok(report)
    }

    /// Writes the current dataset to persistence
    pub async fn save(&self) -> Result<(), ClassifierError> {
        let dataset = self.classifier.read().await.export_dataset();
        self.persistence.save(&dataset)?;
        Ok(())
    }
}
