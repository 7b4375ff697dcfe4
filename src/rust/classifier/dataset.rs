use std::collections::{BTreeMap, HashSet};

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::error::ClassifierError;

/// The stored examples of a classifier, keyed by class label.
///
/// Each label maps to a 2-D array whose rows are the embeddings added under
/// that label. Every array has at least one row and all arrays share the same
/// column count (the embedding dimensionality).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierDataset {
    classes: BTreeMap<usize, Array2<f32>>,
}

/// One label's examples in their persisted form: the row-major flattened
/// values plus the `[rows, cols]` shape needed to rebuild the array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedClass {
    #[serde(rename = "classId")]
    pub class_id: usize,
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

/// The JSON-compatible form of a [`ClassifierDataset`], one record per label
/// in ascending label order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializedDataset(pub Vec<SerializedClass>);

impl ClassifierDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dataset from per-label arrays, checking the shape invariants.
    ///
    /// # Errors
    /// - `ValidationError` if an array has no rows or no columns
    /// - `DimensionMismatch` if two labels disagree on the column count
    pub fn from_classes(classes: BTreeMap<usize, Array2<f32>>) -> Result<Self, ClassifierError> {
        let mut dimension: Option<usize> = None;
        for (label, examples) in &classes {
            let (rows, cols) = examples.dim();
            if rows == 0 || cols == 0 {
                return Err(ClassifierError::ValidationError(
                    format!("Class {} has an empty example array ({}x{})", label, rows, cols)
                ));
            }
            match dimension {
                Some(expected) if expected != cols => {
                    return Err(ClassifierError::DimensionMismatch { expected, actual: cols });
                }
                _ => dimension = Some(cols),
            }
        }
        Ok(Self { classes })
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Number of labels holding at least one example
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.classes.keys().copied()
    }

    pub fn examples(&self, label: usize) -> Option<ArrayView2<'_, f32>> {
        self.classes.get(&label).map(|examples| examples.view())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, ArrayView2<'_, f32>)> {
        self.classes.iter().map(|(label, examples)| (*label, examples.view()))
    }

    pub fn example_count(&self, label: usize) -> usize {
        self.classes.get(&label).map_or(0, |examples| examples.nrows())
    }

    pub fn total_examples(&self) -> usize {
        self.classes.values().map(|examples| examples.nrows()).sum()
    }

    /// Column count shared by every label, or `None` when empty
    pub fn dimension(&self) -> Option<usize> {
        self.classes.values().next().map(|examples| examples.ncols())
    }

    /// Largest label present, used to range-check an imported dataset
    pub fn max_label(&self) -> Option<usize> {
        self.classes.keys().next_back().copied()
    }

    /// Appends one row under `label`. The caller has already checked the
    /// row length against the classifier's dimensionality.
    pub(crate) fn push_example(
        &mut self,
        label: usize,
        embedding: ArrayView1<'_, f32>,
    ) -> Result<(), ClassifierError> {
        match self.classes.get_mut(&label) {
            Some(examples) => {
                let expected = examples.ncols();
                examples.push_row(embedding).map_err(|_| ClassifierError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                })
            }
            None => {
                let row = embedding.to_owned().insert_axis(ndarray::Axis(0));
                self.classes.insert(label, row);
                Ok(())
            }
        }
    }

    pub(crate) fn remove_class(&mut self, label: usize) -> Option<Array2<f32>> {
        self.classes.remove(&label)
    }

    pub(crate) fn clear(&mut self) {
        self.classes.clear();
    }

    /// Flattens every label's array in row-major order alongside its shape.
    pub fn to_serialized(&self) -> SerializedDataset {
        SerializedDataset(
            self.classes
                .iter()
                .map(|(label, examples)| SerializedClass {
                    class_id: *label,
                    data: examples.iter().copied().collect(),
                    shape: vec![examples.nrows(), examples.ncols()],
                })
                .collect(),
        )
    }

    /// Rebuilds a dataset from its serialized form.
    ///
    /// # Errors
    /// `CorruptPersistedState` when a record repeats a class id, carries a
    /// shape that is not `[rows, cols]`, has zero rows or columns, holds a
    /// different number of values than its shape implies, or disagrees with
    /// the other records on the column count.
    pub fn from_serialized(serialized: SerializedDataset) -> Result<Self, ClassifierError> {
        let mut seen = HashSet::new();
        let mut classes = BTreeMap::new();
        let mut dimension: Option<usize> = None;

        for record in serialized.0 {
            let label = record.class_id;
            if !seen.insert(label) {
                return Err(ClassifierError::CorruptPersistedState(
                    format!("Class {} appears more than once", label)
                ));
            }
            let (rows, cols) = match record.shape.as_slice() {
                [rows, cols] => (*rows, *cols),
                other => {
                    return Err(ClassifierError::CorruptPersistedState(
                        format!("Class {} has shape {:?}, expected [rows, cols]", label, other)
                    ));
                }
            };
            if rows == 0 || cols == 0 {
                return Err(ClassifierError::CorruptPersistedState(
                    format!("Class {} has an empty shape [{}, {}]", label, rows, cols)
                ));
            }
            if let Some(expected) = dimension {
                if expected != cols {
                    return Err(ClassifierError::CorruptPersistedState(
                        format!("Class {} has {} columns, other classes have {}", label, cols, expected)
                    ));
                }
            }
            dimension = Some(cols);

            let values = record.data.len();
            let examples = Array2::from_shape_vec((rows, cols), record.data).map_err(|_| {
                ClassifierError::CorruptPersistedState(format!(
                    "Class {} holds {} values but its shape [{}, {}] needs {}",
                    label, values, rows, cols, rows.saturating_mul(cols)
                ))
            })?;
            classes.insert(label, examples);
        }

        Ok(Self { classes })
    }
}

impl SerializedDataset {
    pub fn to_json(&self) -> Result<String, ClassifierError> {
        serde_json::to_string(self)
            .map_err(|e| ClassifierError::ValidationError(format!("Failed to encode dataset: {}", e)))
    }

    pub fn from_json(text: &str) -> Result<Self, ClassifierError> {
        serde_json::from_str(text)
            .map_err(|e| ClassifierError::CorruptPersistedState(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
