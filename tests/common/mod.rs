#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Mutex;

use env_logger::{Builder, Env};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::Array1;
use snapclass::{ClassifierError, Embedding, EmbeddingProvider, Frame, PredictionSink, PredictionUpdate, RawImage};
use tokio::sync::mpsc;

pub const RED: [u8; 3] = [250, 10, 10];
pub const GREEN: [u8; 3] = [10, 250, 10];
pub const BLUE: [u8; 3] = [10, 10, 250];

// Initialize test logger
pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

pub fn solid_frame(color: [u8; 3]) -> Frame {
    Frame::from(RgbImage::from_pixel(4, 4, Rgb(color)))
}

pub fn solid_png(color: [u8; 3]) -> RawImage {
    let image = RgbImage::from_pixel(4, 4, Rgb(color));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    RawImage::from_bytes(bytes.into_inner())
}

/// Embeds a frame as its mean RGB value scaled to [0, 1] and counts calls.
/// Frames whose mean color equals `fail_on` fail to embed.
#[derive(Default)]
pub struct MeanColorEmbedder {
    calls: AtomicUsize,
    fail_on: Option<[u8; 3]>,
}

impl MeanColorEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(color: [u8; 3]) -> Self {
        Self { calls: AtomicUsize::new(0), fail_on: Some(color) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for MeanColorEmbedder {
    fn embed(&self, frame: &Frame) -> Result<Embedding, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pixels = frame.as_rgb().pixels().count() as f32;
        let mut sums = [0f32; 3];
        for pixel in frame.as_rgb().pixels() {
            for channel in 0..3 {
                sums[channel] += pixel.0[channel] as f32;
            }
        }
        let mean = sums.map(|sum| sum / pixels);
        if let Some(color) = self.fail_on {
            if mean == color.map(|c| c as f32) {
                return Err(ClassifierError::EmbeddingError("unsupported frame".into()));
            }
        }
        Ok(Array1::from_iter(mean.iter().map(|value| value / 255.0)))
    }

    fn dimension(&self) -> Option<usize> {
        Some(3)
    }
}

/// Forwards every update to a channel the test can await.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<PredictionUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PredictionUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl PredictionSink for ChannelSink {
    fn on_prediction_update(&self, update: &PredictionUpdate) {
        let _ = self.sender.send(update.clone());
    }
}

/// Keeps every update in memory.
#[derive(Default)]
pub struct RecordingSink {
    pub updates: Mutex<Vec<PredictionUpdate>>,
}

impl PredictionSink for RecordingSink {
    fn on_prediction_update(&self, update: &PredictionUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }
}

/// Wraps [`MeanColorEmbedder`] so each call reports that it has started and
/// then blocks until the test releases it.
pub struct GatedEmbedder {
    inner: MeanColorEmbedder,
    entered: Mutex<std_mpsc::Sender<()>>,
    release: Mutex<std_mpsc::Receiver<()>>,
}

/// Test-side ends of a [`GatedEmbedder`]: started calls and releases.
pub struct Gate {
    pub entered: std_mpsc::Receiver<()>,
    pub release: std_mpsc::Sender<()>,
}

impl GatedEmbedder {
    pub fn new() -> (Self, Gate) {
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let embedder = Self {
            inner: MeanColorEmbedder::new(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (embedder, Gate { entered: entered_rx, release: release_tx })
    }
}

impl EmbeddingProvider for GatedEmbedder {
    fn embed(&self, frame: &Frame) -> Result<Embedding, ClassifierError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        self.inner.embed(frame)
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }
}
