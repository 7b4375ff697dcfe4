use std::sync::Arc;

use ndarray::Array1;
use snapclass::{
    ClassifierDataset, ClassifierError, DatasetPersistence, FileStore, KeyValueStore, KnnClassifier,
    MemoryStore, DEFAULT_STORAGE_KEY,
};

fn dataset_with(counts: &[usize], dimension: usize) -> ClassifierDataset {
    let mut classifier = KnnClassifier::builder()
        .with_max_classes(counts.len())
        .build()
        .unwrap();
    for (label, count) in counts.iter().enumerate() {
        for row in 0..*count {
            let embedding = Array1::from_iter(
                (0..dimension).map(|col| (label * 1000 + row * 10 + col) as f32 / 7.0 - 3.3),
            );
            classifier.add_example(&embedding, label).unwrap();
        }
    }
    classifier.export_dataset()
}

#[test]
fn test_round_trip_preserves_labels_shapes_and_values() {
    let persistence = DatasetPersistence::new(Arc::new(MemoryStore::new()));
    let datasets = [
        dataset_with(&[1], 1),
        dataset_with(&[3, 2], 4),
        dataset_with(&[0, 5, 0, 1], 16),
        dataset_with(&[200, 0, 7], 64),
    ];

    for dataset in datasets {
        persistence.save(&dataset).unwrap();
        let restored = persistence.load_dataset().unwrap().expect("saved dataset");

        assert_eq!(restored.labels().collect::<Vec<_>>(), dataset.labels().collect::<Vec<_>>());
        for (label, examples) in dataset.iter() {
            let restored_examples = restored.examples(label).unwrap();
            assert_eq!(restored_examples.dim(), examples.dim());
            for (a, b) in restored_examples.iter().zip(examples.iter()) {
                assert!((a - b).abs() <= f32::EPSILON * a.abs().max(1.0));
            }
        }
    }
}

#[test]
fn test_untouched_slot_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = DatasetPersistence::new(Arc::new(FileStore::new(dir.path()).unwrap()));
    assert!(persistence.load().unwrap().is_none());
}

#[test]
fn test_stored_text_is_single_encoded_json() {
    let store = MemoryStore::new();
    let persistence = DatasetPersistence::new(Arc::new(store.clone()));
    persistence.save(&dataset_with(&[1, 1], 2)).unwrap();

    let text = store.get(DEFAULT_STORAGE_KEY).unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    let records = value.as_array().expect("top-level array, not a string");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["classId"], 1);
    assert_eq!(records[1]["shape"], serde_json::json!([1, 2]));
}

#[test]
fn test_double_encoded_text_is_corrupt() {
    let store = MemoryStore::new();
    let persistence = DatasetPersistence::new(Arc::new(store.clone()));
    persistence.save(&dataset_with(&[1], 2)).unwrap();

    let text = store.get(DEFAULT_STORAGE_KEY).unwrap().unwrap();
    let double_encoded = serde_json::to_string(&text).unwrap();
    store.set(DEFAULT_STORAGE_KEY, &double_encoded).unwrap();

    assert!(matches!(persistence.load(), Err(ClassifierError::CorruptPersistedState(_))));
}

#[test]
fn test_keys_are_independent() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let first = DatasetPersistence::with_key(Arc::clone(&store), "first");
    let second = DatasetPersistence::with_key(Arc::clone(&store), "second");

    first.save(&dataset_with(&[2], 3)).unwrap();
    assert!(second.load().unwrap().is_none());
    assert_eq!(first.load_dataset().unwrap().unwrap().total_examples(), 2);
}
