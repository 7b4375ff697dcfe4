use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::dataset::ClassifierDataset;
use super::error::ClassifierError;
use super::utils::{cosine_distance, normalize_vector, squared_euclidean};

/// A single embedding vector produced by an [`EmbeddingProvider`](super::EmbeddingProvider).
pub type Embedding = Array1<f32>;

/// A classifier shared between training ingestion and the inference loop.
///
/// Ingestion and dataset import take the write lock; the inference loop only
/// ever reads.
pub type SharedClassifier = Arc<RwLock<KnnClassifier>>;

/// Distance used to rank stored examples against a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Sum of squared differences over the raw embedding values
    #[default]
    #[serde(rename = "euclidean")]
    SquaredEuclidean,
    /// `1 - cosine similarity`, insensitive to embedding magnitude
    Cosine,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SquaredEuclidean => write!(f, "euclidean"),
            Self::Cosine => write!(f, "cosine"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "squared_euclidean" | "l2" => Ok(Self::SquaredEuclidean),
            "cosine" => Ok(Self::Cosine),
            other => Err(ClassifierError::ValidationError(
                format!("Unknown distance metric '{}' (expected 'euclidean' or 'cosine')", other)
            )),
        }
    }
}

/// Outcome of a k-nearest-neighbor query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Majority label among the nearest neighbors
    pub label: usize,
    /// Fraction of the neighbors belonging to each label, indexed by label
    pub confidences: Vec<f32>,
}

/// A k-nearest-neighbor classifier over labeled embeddings.
///
/// Labels are integers in `[0, max_classes)`. The embedding dimensionality is
/// fixed by configuration, by the first added example, or by an imported
/// dataset, and every later example must match it.
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use ndarray::array;
/// use snapclass::KnnClassifier;
///
/// let mut classifier = KnnClassifier::builder().with_max_classes(2).build()?;
/// classifier.add_example(&array![0.0, 0.0], 0)?;
/// classifier.add_example(&array![1.0, 1.0], 1)?;
///
/// let prediction = classifier.predict(&array![0.1, 0.0], 1)?;
/// assert_eq!(prediction.label, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct KnnClassifier {
    pub(crate) max_classes: usize,
    pub(crate) top_k: usize,
    pub(crate) metric: DistanceMetric,
    pub(crate) dimension: Option<usize>,
    pub(crate) configured_dimension: Option<usize>,
    pub(crate) dataset: ClassifierDataset,
}

struct Neighbor {
    distance: f32,
    label: usize,
    row: usize,
}

impl KnnClassifier {
    /// Creates a new KnnClassifierBuilder for fluent construction
    pub fn builder() -> super::builder::KnnClassifierBuilder {
        super::builder::KnnClassifierBuilder::new()
    }

    /// Wraps the classifier for sharing with ingestion and the inference loop
    pub fn into_shared(self) -> SharedClassifier {
        Arc::new(RwLock::new(self))
    }

    /// Returns information about the classifier's current state
    pub fn info(&self) -> super::ClassifierInfo {
        super::ClassifierInfo {
            max_classes: self.max_classes,
            num_classes: self.num_classes(),
            example_counts: self.example_count_per_class(),
            embedding_size: self.dimension,
            top_k: self.top_k,
            metric: self.metric,
        }
    }

    pub fn max_classes(&self) -> usize {
        self.max_classes
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Embedding dimensionality, once known
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of distinct labels with at least one example
    pub fn num_classes(&self) -> usize {
        self.dataset.num_classes()
    }

    pub fn total_examples(&self) -> usize {
        self.dataset.total_examples()
    }

    /// Example count for every label in `[0, max_classes)`, zero when absent
    pub fn example_count_per_class(&self) -> Vec<usize> {
        (0..self.max_classes)
            .map(|label| self.dataset.example_count(label))
            .collect()
    }

    pub fn validate_label(&self, label: usize) -> Result<(), ClassifierError> {
        if label >= self.max_classes {
            return Err(ClassifierError::InvalidLabel { label, max_classes: self.max_classes });
        }
        Ok(())
    }

    /// Checks an embedding against the classifier's dimensionality without
    /// storing it.
    pub fn validate_embedding(&self, embedding: &Embedding) -> Result<(), ClassifierError> {
        if embedding.is_empty() {
            return Err(ClassifierError::ValidationError("Embedding cannot be empty".into()));
        }
        if let Some(expected) = self.dimension {
            if embedding.len() != expected {
                return Err(ClassifierError::DimensionMismatch { expected, actual: embedding.len() });
            }
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(ClassifierError::ValidationError("Embedding contains non-finite values".into()));
        }
        Ok(())
    }

    /// Stores one example under `label`.
    ///
    /// # Errors
    /// - `InvalidLabel` if `label >= max_classes`
    /// - `DimensionMismatch` if the embedding length differs from the stored examples
    /// - `ValidationError` if the embedding is empty or holds NaN/infinite values
    pub fn add_example(&mut self, embedding: &Embedding, label: usize) -> Result<(), ClassifierError> {
        self.validate_label(label)?;
        self.validate_embedding(embedding)?;
        self.dataset.push_example(label, embedding.view())?;
        self.dimension.get_or_insert(embedding.len());
        Ok(())
    }

    /// Stores a batch of examples under one label. Either every embedding is
    /// stored or, on any validation failure, none is.
    pub fn add_examples(&mut self, embeddings: &[Embedding], label: usize) -> Result<usize, ClassifierError> {
        self.validate_label(label)?;
        let batch_dimension = embeddings.first().map(|e| e.len());
        for embedding in embeddings {
            self.validate_embedding(embedding)?;
            if let Some(expected) = batch_dimension {
                if embedding.len() != expected {
                    return Err(ClassifierError::DimensionMismatch { expected, actual: embedding.len() });
                }
            }
        }
        for embedding in embeddings {
            self.add_example(embedding, label)?;
        }
        Ok(embeddings.len())
    }

    /// Predicts with the configured neighbor count
    pub fn classify(&self, embedding: &Embedding) -> Result<Prediction, ClassifierError> {
        self.predict(embedding, self.top_k)
    }

    /// Finds the `k` stored examples closest to `embedding` and votes.
    ///
    /// Neighbors are ranked by distance, then by label, then by insertion
    /// order, so results are deterministic. When fewer than `k` examples are
    /// stored, every example votes. Each label's confidence is its share of the
    /// votes, and a tied vote goes to the lowest label.
    ///
    /// # Errors
    /// - `EmptyClassifier` if no examples have been added
    /// - `ValidationError` if `k` is zero
    /// - `DimensionMismatch` if the query length differs from the stored examples
    pub fn predict(&self, embedding: &Embedding, k: usize) -> Result<Prediction, ClassifierError> {
        if self.num_classes() == 0 {
            return Err(ClassifierError::EmptyClassifier);
        }
        if k == 0 {
            return Err(ClassifierError::ValidationError("k must be at least 1".into()));
        }
        self.validate_embedding(embedding)?;

        let query = match self.metric {
            DistanceMetric::SquaredEuclidean => embedding.clone(),
            DistanceMetric::Cosine => normalize_vector(embedding.view()),
        };

        let mut neighbors: Vec<Neighbor> = Vec::with_capacity(self.total_examples());
        for (label, examples) in self.dataset.iter() {
            for (row, example) in examples.rows().into_iter().enumerate() {
                let distance = match self.metric {
                    DistanceMetric::SquaredEuclidean => squared_euclidean(query.view(), example),
                    DistanceMetric::Cosine => cosine_distance(query.view(), example),
                };
                neighbors.push(Neighbor { distance, label, row });
            }
        }

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.label.cmp(&b.label))
                .then(a.row.cmp(&b.row))
        });

        let effective_k = k.min(neighbors.len());
        let mut votes = vec![0usize; self.max_classes];
        for neighbor in &neighbors[..effective_k] {
            votes[neighbor.label] += 1;
        }

        let mut label = 0;
        for (candidate, &count) in votes.iter().enumerate() {
            if count > votes[label] {
                label = candidate;
            }
        }

        let confidences = votes
            .iter()
            .map(|&count| count as f32 / effective_k as f32)
            .collect();

        Ok(Prediction { label, confidences })
    }

    /// Returns a copy of the stored examples
    pub fn export_dataset(&self) -> ClassifierDataset {
        self.dataset.clone()
    }

    /// Replaces the stored examples with `dataset`. Nothing is merged; on
    /// error the current examples are kept.
    pub fn import_dataset(&mut self, dataset: ClassifierDataset) -> Result<(), ClassifierError> {
        if let Some(label) = dataset.max_label() {
            self.validate_label(label)?;
        }
        if let (Some(expected), Some(actual)) = (self.configured_dimension, dataset.dimension()) {
            if expected != actual {
                return Err(ClassifierError::DimensionMismatch { expected, actual });
            }
        }
        self.dimension = dataset.dimension().or(self.configured_dimension);
        self.dataset = dataset;
        Ok(())
    }

    /// Drops every example stored under `label`, returning how many were removed
    pub fn clear_class(&mut self, label: usize) -> Result<usize, ClassifierError> {
        self.validate_label(label)?;
        let removed = self.dataset.remove_class(label).map_or(0, |examples| examples.nrows());
        if self.dataset.is_empty() {
            self.dimension = self.configured_dimension;
        }
        Ok(removed)
    }

    pub fn clear_all_classes(&mut self) {
        self.dataset.clear();
        self.dimension = self.configured_dimension;
    }
}
