mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{solid_frame, solid_png, ChannelSink, GatedEmbedder, MeanColorEmbedder, RecordingSink, BLUE, GREEN, RED};
use ndarray::array;
use snapclass::{
    ChannelFrameSource, DatasetPersistence, FrameSource, ImageFileSource, InferenceLoop, KeyValueStore, KnnClassifier,
    LoopState, MemoryStore, SharedClassifier, DEFAULT_STORAGE_KEY,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Saves three examples near red as label 0 and three near green as label 1
fn saved_persistence() -> DatasetPersistence {
    let mut classifier = KnnClassifier::builder().build().unwrap();
    classifier.add_example(&array![0.98, 0.04, 0.04], 0).unwrap();
    classifier.add_example(&array![0.95, 0.05, 0.05], 0).unwrap();
    classifier.add_example(&array![0.90, 0.10, 0.00], 0).unwrap();
    classifier.add_example(&array![0.04, 0.98, 0.04], 1).unwrap();
    classifier.add_example(&array![0.05, 0.95, 0.05], 1).unwrap();
    classifier.add_example(&array![0.10, 0.90, 0.00], 1).unwrap();

    let persistence = DatasetPersistence::new(Arc::new(MemoryStore::new()));
    persistence.save(&classifier.export_dataset()).unwrap();
    persistence
}

fn shared_classifier() -> SharedClassifier {
    KnnClassifier::builder().with_top_k(3).build().unwrap().into_shared()
}

#[tokio::test]
async fn test_start_with_untouched_slot_is_empty() {
    common::init();
    let classifier = shared_classifier();
    let persistence = DatasetPersistence::new(Arc::new(MemoryStore::new()));
    assert!(persistence.load().unwrap().is_none());

    let embedder = Arc::new(MeanColorEmbedder::new());
    let sink = Arc::new(RecordingSink::default());
    let source = ImageFileSource::new(vec![solid_png(RED), solid_png(GREEN)]);
    let mut inference = InferenceLoop::new(
        Arc::clone(&classifier),
        embedder.clone(),
        persistence,
        Box::new(source),
        sink.clone(),
    );

    inference.start().await.unwrap();
    assert_eq!(classifier.read().await.num_classes(), 0);
    timeout(WAIT, inference.wait()).await.unwrap();

    assert_eq!(inference.state(), LoopState::Idle);
    assert_eq!(embedder.calls(), 2);
    assert_eq!(inference.stats().frames(), 2);
    assert_eq!(inference.stats().predictions(), 0);
    assert!(sink.updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_predictions_follow_frame_order() {
    common::init();
    let classifier = shared_classifier();
    let sink = Arc::new(RecordingSink::default());
    let source = ImageFileSource::new(vec![solid_png(RED), solid_png(GREEN), solid_png(RED)]);
    let mut inference = InferenceLoop::new(
        Arc::clone(&classifier),
        Arc::new(MeanColorEmbedder::new()),
        saved_persistence(),
        Box::new(source),
        sink.clone(),
    );

    inference.start().await.unwrap();
    timeout(WAIT, inference.wait()).await.unwrap();

    let updates = sink.updates.lock().unwrap();
    let labels: Vec<usize> = updates.iter().map(|update| update.label).collect();
    assert_eq!(labels, vec![0, 1, 0]);
    for update in updates.iter() {
        assert_eq!(update.example_counts, vec![3, 3, 0]);
        let total: f32 = update.confidences.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }
    assert_eq!(inference.stats().predictions(), 3);
}

#[tokio::test]
async fn test_stop_prevents_further_embedding() {
    common::init();
    let embedder = Arc::new(MeanColorEmbedder::new());
    let (sink, mut updates) = ChannelSink::new();
    let (frames, source) = ChannelFrameSource::new(8);
    let mut inference = InferenceLoop::new(
        shared_classifier(),
        embedder.clone(),
        saved_persistence(),
        Box::new(source),
        Arc::new(sink),
    );

    inference.start().await.unwrap();
    assert_eq!(inference.state(), LoopState::Running);

    frames.send(solid_frame(GREEN)).await.unwrap();
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.label, 1);

    inference.stop().await;
    assert_eq!(inference.state(), LoopState::Idle);
    let calls = embedder.calls();

    frames.send(solid_frame(RED)).await.unwrap();
    frames.send(solid_frame(RED)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(embedder.calls(), calls);
    assert!(updates.try_recv().is_err());

    // Restarting reuses the same source and picks up the queued frames
    inference.start().await.unwrap();
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.label, 0);
    inference.stop().await;
}

#[tokio::test]
async fn test_frame_errors_do_not_stop_the_loop() {
    common::init();
    let (sink, mut updates) = ChannelSink::new();
    let (frames, source) = ChannelFrameSource::new(8);
    let mut inference = InferenceLoop::new(
        shared_classifier(),
        Arc::new(MeanColorEmbedder::failing_on(BLUE)),
        saved_persistence(),
        Box::new(source),
        Arc::new(sink),
    );

    inference.start().await.unwrap();
    frames.send(solid_frame(BLUE)).await.unwrap();
    frames.send(solid_frame(GREEN)).await.unwrap();

    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.label, 1);
    assert_eq!(inference.stats().errors(), 1);
    assert_eq!(inference.state(), LoopState::Running);
    inference.stop().await;
}

#[tokio::test]
async fn test_corrupt_save_starts_empty() {
    common::init();
    let store = MemoryStore::new();
    store.set(DEFAULT_STORAGE_KEY, "[{\"classId\": 0, \"data\": [1.0]").unwrap();

    let classifier = shared_classifier();
    classifier.write().await.add_example(&array![0.5, 0.5, 0.5], 2).unwrap();

    let (_frames, source) = ChannelFrameSource::new(1);
    let mut inference = InferenceLoop::new(
        Arc::clone(&classifier),
        Arc::new(MeanColorEmbedder::new()),
        DatasetPersistence::new(Arc::new(store)),
        Box::new(source),
        Arc::new(RecordingSink::default()),
    );

    inference.start().await.unwrap();
    assert_eq!(classifier.read().await.num_classes(), 0);
    assert_eq!(inference.state(), LoopState::Running);
    inference.stop().await;
}

#[tokio::test]
async fn test_start_loads_saved_dataset_once() {
    common::init();
    let classifier = shared_classifier();
    let persistence = saved_persistence();
    let (frames, source) = ChannelFrameSource::new(8);
    let (sink, mut updates) = ChannelSink::new();
    let mut inference = InferenceLoop::new(
        Arc::clone(&classifier),
        Arc::new(MeanColorEmbedder::new()),
        persistence.clone(),
        Box::new(source),
        Arc::new(sink),
    );

    inference.start().await.unwrap();
    assert_eq!(classifier.read().await.example_count_per_class(), vec![3, 3, 0]);

    // Changes to the saved copy are not picked up mid-run
    persistence.clear().unwrap();
    frames.send(solid_frame(RED)).await.unwrap();
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.example_counts, vec![3, 3, 0]);
    inference.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_waits_for_cycle_in_flight() {
    common::init();
    let (embedder, gate) = GatedEmbedder::new();
    let (sink, mut updates) = ChannelSink::new();
    let (frames, source) = ChannelFrameSource::new(8);
    let mut inference = InferenceLoop::new(
        shared_classifier(),
        Arc::new(embedder),
        saved_persistence(),
        Box::new(source),
        Arc::new(sink),
    );

    inference.start().await.unwrap();
    frames.send(solid_frame(GREEN)).await.unwrap();

    // Wait until the frame is inside the embedder
    let entered = gate.entered;
    tokio::task::spawn_blocking(move || entered.recv_timeout(WAIT))
        .await
        .unwrap()
        .unwrap();

    let stopping = tokio::spawn(async move {
        inference.stop().await;
        inference
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stopping.is_finished());
    assert!(updates.try_recv().is_err());

    gate.release.send(()).unwrap();
    let inference = timeout(WAIT, stopping).await.unwrap().unwrap();
    assert_eq!(inference.state(), LoopState::Idle);

    let update = updates.try_recv().expect("the in-flight frame is still published");
    assert_eq!(update.label, 1);
    assert_eq!(inference.stats().predictions(), 1);
    assert_eq!(inference.stats().frames(), 1);
}

#[tokio::test]
async fn test_start_while_running_restarts_on_same_source() {
    common::init();
    let classifier = shared_classifier();
    let (sink, mut updates) = ChannelSink::new();
    let (frames, source) = ChannelFrameSource::new(8);
    let mut inference = InferenceLoop::new(
        Arc::clone(&classifier),
        Arc::new(MeanColorEmbedder::new()),
        saved_persistence(),
        Box::new(source),
        Arc::new(sink),
    );

    inference.start().await.unwrap();
    frames.send(solid_frame(GREEN)).await.unwrap();
    assert_eq!(timeout(WAIT, updates.recv()).await.unwrap().unwrap().label, 1);

    // A second start reloads the saved dataset and keeps reading the same source
    classifier.write().await.clear_all_classes();
    inference.start().await.unwrap();
    assert_eq!(inference.state(), LoopState::Running);
    assert_eq!(classifier.read().await.example_count_per_class(), vec![3, 3, 0]);

    frames.send(solid_frame(RED)).await.unwrap();
    assert_eq!(timeout(WAIT, updates.recv()).await.unwrap().unwrap().label, 0);
    assert_eq!(inference.stats().predictions(), 2);
    inference.stop().await;
}

#[tokio::test]
async fn test_cancelled_image_read_keeps_every_frame() {
    common::init();
    let mut source = ImageFileSource::new(vec![solid_png(RED), solid_png(GREEN), solid_png(BLUE)]);

    // Drop a pending read the way a stop does
    let first = tokio::select! {
        biased;
        frame = source.next_frame() => frame,
        _ = std::future::ready(()) => None,
    };
    assert!(first.is_none());

    let mut colors = Vec::new();
    while let Some(frame) = source.next_frame().await {
        colors.push(frame.as_rgb().get_pixel(0, 0).0);
    }
    assert_eq!(colors, vec![RED, GREEN, BLUE]);
}
