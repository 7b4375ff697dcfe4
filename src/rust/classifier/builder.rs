use log::info;

use super::classifier::{DistanceMetric, KnnClassifier};
use super::dataset::ClassifierDataset;
use super::error::ClassifierError;

/// Number of classes the classifier accepts unless configured otherwise
pub const DEFAULT_NUM_CLASSES: usize = 3;
/// Neighbors consulted per prediction unless configured otherwise
pub const DEFAULT_TOP_K: usize = 10;
/// Upper bound on the configurable number of classes
pub const MAX_CLASSES: usize = 100;

/// A builder for constructing a KnnClassifier with a fluent interface.
#[derive(Debug)]
pub struct KnnClassifierBuilder {
    max_classes: usize,
    top_k: usize,
    metric: DistanceMetric,
    dimension: Option<usize>,
    dataset: Option<ClassifierDataset>,
}

impl Default for KnnClassifierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KnnClassifierBuilder {
    /// Creates a builder with three classes, ten neighbors and squared
    /// Euclidean distance
    ///
    /// # Example
    /// ```
    /// use snapclass::KnnClassifierBuilder;
    ///
    /// let builder = KnnClassifierBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self {
            max_classes: DEFAULT_NUM_CLASSES,
            top_k: DEFAULT_TOP_K,
            metric: DistanceMetric::default(),
            dimension: None,
            dataset: None,
        }
    }

    /// Sets how many labels the classifier accepts; labels run from `0` to
    /// `max_classes - 1`
    pub fn with_max_classes(mut self, max_classes: usize) -> Self {
        self.max_classes = max_classes;
        self
    }

    /// Sets the neighbor count used by [`KnnClassifier::classify`]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Fixes the embedding dimensionality up front instead of inferring it
    /// from the first example. Usually taken from the embedding provider.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Seeds the classifier with previously stored examples
    pub fn with_dataset(mut self, dataset: ClassifierDataset) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Validates the configuration:
    /// - Between 1 and 100 classes
    /// - At least one neighbor
    /// - A non-zero dimension, when one is given
    fn validate(&self) -> Result<(), ClassifierError> {
        if self.max_classes == 0 {
            return Err(ClassifierError::ValidationError("At least one class is required".into()));
        }
        if self.max_classes > MAX_CLASSES {
            return Err(ClassifierError::ValidationError(
                format!("Maximum number of classes ({}) exceeded: {}", MAX_CLASSES, self.max_classes)
            ));
        }
        if self.top_k == 0 {
            return Err(ClassifierError::ValidationError("top_k must be at least 1".into()));
        }
        if self.dimension == Some(0) {
            return Err(ClassifierError::ValidationError("Embedding dimension cannot be zero".into()));
        }
        Ok(())
    }

    /// Builds and returns the final KnnClassifier instance
    ///
    /// # Returns
    /// * `Result<KnnClassifier, ClassifierError>` - The constructed classifier, or an error if:
    ///   - The configuration is invalid
    ///   - The seed dataset uses labels outside the configured range
    ///   - The seed dataset disagrees with the configured dimension
    ///
    /// # Example
    /// ```
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// use snapclass::{KnnClassifierBuilder, DistanceMetric};
    ///
    /// let classifier = KnnClassifierBuilder::new()
    ///     .with_max_classes(5)
    ///     .with_top_k(3)
    ///     .with_metric(DistanceMetric::Cosine)
    ///     .build()?;
    /// assert_eq!(classifier.num_classes(), 0);
    /// # Ok(())
    /// # }
    /// ```
    pub fn build(self) -> Result<KnnClassifier, ClassifierError> {
        self.validate()?;

        let mut classifier = KnnClassifier {
            max_classes: self.max_classes,
            top_k: self.top_k,
            metric: self.metric,
            dimension: self.dimension,
            configured_dimension: self.dimension,
            dataset: ClassifierDataset::new(),
        };

        if let Some(dataset) = self.dataset {
            classifier.import_dataset(dataset)?;
            info!(
                "Classifier seeded with {} examples across {} classes",
                classifier.total_examples(),
                classifier.num_classes()
            );
        }

        Ok(classifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_defaults() {
        let classifier = KnnClassifierBuilder::new().build().unwrap();
        assert_eq!(classifier.max_classes(), DEFAULT_NUM_CLASSES);
        assert_eq!(classifier.top_k(), DEFAULT_TOP_K);
        assert_eq!(classifier.metric(), DistanceMetric::SquaredEuclidean);
        assert_eq!(classifier.dimension(), None);
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(KnnClassifierBuilder::new().with_max_classes(0).build().is_err());
        assert!(KnnClassifierBuilder::new().with_max_classes(MAX_CLASSES + 1).build().is_err());
        assert!(KnnClassifierBuilder::new().with_top_k(0).build().is_err());
        assert!(KnnClassifierBuilder::new().with_dimension(0).build().is_err());
    }

    #[test]
    fn test_configured_dimension_enforced() {
        let mut classifier = KnnClassifierBuilder::new().with_dimension(4).build().unwrap();
        let result = classifier.add_example(&array![1.0, 2.0], 0);
        assert!(matches!(result, Err(ClassifierError::DimensionMismatch { expected: 4, actual: 2 })));
    }

    #[test]
    fn test_seed_dataset() {
        let mut seed = KnnClassifierBuilder::new().build().unwrap();
        seed.add_example(&array![1.0, 2.0], 1).unwrap();

        let classifier = KnnClassifierBuilder::new()
            .with_dataset(seed.export_dataset())
            .build()
            .unwrap();
        assert_eq!(classifier.example_count_per_class(), vec![0, 1, 0]);

        let mismatched = KnnClassifierBuilder::new()
            .with_dimension(3)
            .with_dataset(seed.export_dataset())
            .build();
        assert!(mismatched.is_err());
    }
}
