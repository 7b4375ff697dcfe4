//! The live prediction loop: frame in, prediction out, one frame at a time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::classifier::{ClassifierError, EmbeddingProvider, Frame, RawImage, SharedClassifier};
use crate::persistence::DatasetPersistence;

/// Yields frames at the host's presentation rate.
///
/// Each call resolves when the next frame is ready; `None` ends the stream.
/// Implementations must be cancel-safe: the loop drops a pending call when
/// it is stopped.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Frame>;
}

/// Receives the result of every frame that produced a prediction.
pub trait PredictionSink: Send + Sync {
    fn on_prediction_update(&self, update: &PredictionUpdate);
}

/// What the loop publishes after classifying one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionUpdate {
    pub label: usize,
    /// Per-label share of the nearest neighbors
    pub confidences: Vec<f32>,
    /// Per-label stored example count
    pub example_counts: Vec<usize>,
}

/// Frames pushed by a capture task over a channel.
pub struct ChannelFrameSource {
    receiver: mpsc::Receiver<Frame>,
}

impl ChannelFrameSource {
    /// Returns the source and the sender a capture task feeds
    pub fn new(buffer: usize) -> (mpsc::Sender<Frame>, Self) {
        let (sender, receiver) = mpsc::channel(buffer);
        (sender, Self { receiver })
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }
}

/// Replays encoded images as frames, in order. Images that fail to decode
/// are logged and skipped.
pub struct ImageFileSource {
    images: VecDeque<RawImage>,
}

impl ImageFileSource {
    pub fn new(images: Vec<RawImage>) -> Self {
        Self { images: images.into() }
    }
}

#[async_trait]
impl FrameSource for ImageFileSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        // The only suspension point; nothing is dequeued before it
        tokio::task::yield_now().await;
        while let Some(image) = self.images.pop_front() {
            match image.decode() {
                Ok(frame) => return Some(frame),
                Err(e) => warn!("Skipping frame: {}", e),
            }
        }
        None
    }
}

/// Logs each update in the form `label 1: 12 examples - 80%`.
#[derive(Debug, Default)]
pub struct LogSink;

impl PredictionSink for LogSink {
    fn on_prediction_update(&self, update: &PredictionUpdate) {
        for (label, (count, confidence)) in update.example_counts.iter().zip(&update.confidences).enumerate() {
            if *count > 0 {
                let marker = if label == update.label { "*" } else { " " };
                info!("{} label {}: {} examples - {:.0}%", marker, label, count, confidence * 100.0);
            }
        }
    }
}

/// Whether the loop is currently cycling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// Counters kept across runs of one loop
#[derive(Debug, Default)]
pub struct LoopStats {
    frames: AtomicU64,
    predictions: AtomicU64,
    errors: AtomicU64,
}

impl LoopStats {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Frames that ended in a published prediction
    pub fn predictions(&self) -> u64 {
        self.predictions.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Everything one cycle needs, shared with the spawned loop task.
struct FrameCycle {
    classifier: SharedClassifier,
    embedder: Arc<dyn EmbeddingProvider>,
    sink: Arc<dyn PredictionSink>,
    stats: Arc<LoopStats>,
}

impl FrameCycle {
    /// Embeds one frame and, once classes exist, classifies and publishes it.
    /// The frame and its embedding are dropped on every return path.
    async fn process(&self, frame: Frame) -> Result<Option<PredictionUpdate>, ClassifierError> {
        let embedding = self.embedder.embed(&frame)?;
        drop(frame);

        let update = {
            let classifier = self.classifier.read().await;
            if classifier.num_classes() == 0 {
                return Ok(None);
            }
            let prediction = classifier.classify(&embedding)?;
            PredictionUpdate {
                label: prediction.label,
                confidences: prediction.confidences,
                example_counts: classifier.example_count_per_class(),
            }
        };

        self.sink.on_prediction_update(&update);
        Ok(Some(update))
    }

    async fn run(self, mut source: Box<dyn FrameSource>, mut stop: watch::Receiver<bool>) -> Box<dyn FrameSource> {
        loop {
            if *stop.borrow() {
                break;
            }
            let next = tokio::select! {
                biased;
                _ = stop.changed() => break,
                frame = source.next_frame() => frame,
            };
            let Some(frame) = next else {
                info!("Frame source exhausted, inference loop going idle");
                break;
            };

            self.stats.frames.fetch_add(1, Ordering::Relaxed);
            match self.process(frame).await {
                Ok(Some(update)) => {
                    self.stats.predictions.fetch_add(1, Ordering::Relaxed);
                    debug!("Predicted label {}", update.label);
                }
                Ok(None) => debug!("No classes yet, skipping prediction"),
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Frame failed: {}", e);
                }
            }
        }
        source
    }
}

struct RunningLoop {
    stop: watch::Sender<bool>,
    handle: JoinHandle<Box<dyn FrameSource>>,
}

/// Drives the per-frame cycle: frame, embed, classify, publish.
///
/// Collaborators are injected at construction. `start` loads the saved
/// dataset once; from then on only in-memory state is read. At most one
/// cycle is in flight, and `stop` waits for it rather than interrupting it.
pub struct InferenceLoop {
    classifier: SharedClassifier,
    embedder: Arc<dyn EmbeddingProvider>,
    sink: Arc<dyn PredictionSink>,
    persistence: DatasetPersistence,
    source: Option<Box<dyn FrameSource>>,
    running: Option<RunningLoop>,
    stats: Arc<LoopStats>,
}

impl InferenceLoop {
    pub fn new(
        classifier: SharedClassifier,
        embedder: Arc<dyn EmbeddingProvider>,
        persistence: DatasetPersistence,
        source: Box<dyn FrameSource>,
        sink: Arc<dyn PredictionSink>,
    ) -> Self {
        Self {
            classifier,
            embedder,
            sink,
            persistence,
            source: Some(source),
            running: None,
            stats: Arc::new(LoopStats::default()),
        }
    }

    pub fn state(&self) -> LoopState {
        match &self.running {
            Some(running) if !running.handle.is_finished() => LoopState::Running,
            _ => LoopState::Idle,
        }
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Restores the saved dataset, then starts cycling. Starting a running
    /// loop restarts it.
    ///
    /// A missing save leaves the classifier empty. A corrupt save is logged
    /// and also leaves it empty; the loop still starts.
    ///
    /// # Errors
    /// - `StorageError` if the persistence slot cannot be read
    /// - `ValidationError` if the frame source was lost to a panicked run
    pub async fn start(&mut self) -> Result<(), ClassifierError> {
        if self.running.is_some() {
            self.stop().await;
        }

        self.restore_dataset().await?;

        let source = self.source.take().ok_or_else(|| {
            ClassifierError::ValidationError("Frame source is no longer available".into())
        })?;
        let (stop, stop_rx) = watch::channel(false);
        let cycle = FrameCycle {
            classifier: Arc::clone(&self.classifier),
            embedder: Arc::clone(&self.embedder),
            sink: Arc::clone(&self.sink),
            stats: Arc::clone(&self.stats),
        };
        let handle = tokio::spawn(cycle.run(source, stop_rx));
        self.running = Some(RunningLoop { stop, handle });
        info!("Inference loop started");
        Ok(())
    }

    async fn restore_dataset(&self) -> Result<(), ClassifierError> {
        let loaded = match self.persistence.load_dataset() {
            Ok(dataset) => dataset,
            Err(ClassifierError::CorruptPersistedState(reason)) => {
                warn!("Discarding corrupt saved dataset: {}", reason);
                None
            }
            Err(e) => return Err(e),
        };

        let mut classifier = self.classifier.write().await;
        match loaded {
            Some(dataset) => {
                if let Err(e) = classifier.import_dataset(dataset) {
                    warn!("Saved dataset does not fit this classifier, starting empty: {}", e);
                    classifier.clear_all_classes();
                }
            }
            None => classifier.clear_all_classes(),
        }
        info!("Classifier has {} classes at start", classifier.num_classes());
        Ok(())
    }

    /// Cancels the next scheduled cycle and waits for any cycle in flight.
    /// No embedding calls happen after this returns until the next `start`.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        // Fails only when the task has already exited
        let _ = running.stop.send(true);
        self.reclaim(running.handle).await;
        info!("Inference loop stopped");
    }

    /// Waits until the frame source runs out, then goes idle.
    pub async fn wait(&mut self) {
        if let Some(running) = self.running.take() {
            self.reclaim(running.handle).await;
        }
    }

    async fn reclaim(&mut self, handle: JoinHandle<Box<dyn FrameSource>>) {
        match handle.await {
            Ok(source) => self.source = Some(source),
            Err(e) => error!("Inference loop task failed: {}", e),
        }
    }
}

impl Drop for InferenceLoop {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            let _ = running.stop.send(true);
        }
    }
}
