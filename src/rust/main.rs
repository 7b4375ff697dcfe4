use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use snapclass::{
    BuiltinModel, DatasetPersistence, DistanceMetric, FileStore, ImageFileSource, InferenceLoop,
    KnnClassifier, LogSink, ModelManager, OnnxImageEmbedder, RawImage, SharedClassifier,
    TrainingIngestion, DEFAULT_STORAGE_KEY,
};
use snapclass::classifier::{DEFAULT_NUM_CLASSES, DEFAULT_TOP_K};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// ONNX image model to embed with; defaults to the cached built-in MobileNetV2
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,

    /// Force a fresh download of the built-in model
    #[arg(long, global = true)]
    fresh: bool,

    /// Directory holding the saved classifier (defaults to $SNAPCLASS_DATA or the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Storage key of the saved classifier
    #[arg(long, global = true, default_value = DEFAULT_STORAGE_KEY)]
    key: String,

    /// Number of classes, labelled 0..N
    #[arg(long, global = true, default_value_t = DEFAULT_NUM_CLASSES)]
    num_classes: usize,

    /// Neighbors consulted per prediction
    #[arg(short = 'k', long, global = true, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Distance metric: euclidean or cosine
    #[arg(long, global = true, default_value = "euclidean")]
    metric: DistanceMetric,

    /// Side length images are resized to before embedding
    #[arg(long, global = true)]
    image_size: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add labelled images and save the classifier
    Train {
        /// LABEL:DIR pairs, e.g. `0:photos/cats`; at most 200 images per directory
        #[arg(required = true, value_parser = parse_batch)]
        inputs: Vec<(usize, PathBuf)>,
    },
    /// Run the inference loop over image files or directories
    Predict {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show stored example counts
    Info,
    /// Delete the saved classifier
    Clear,
}

fn parse_batch(value: &str) -> Result<(usize, PathBuf), String> {
    let (label, dir) = value
        .split_once(':')
        .ok_or_else(|| format!("expected LABEL:DIR, got '{}'", value))?;
    let label = label.parse::<usize>().map_err(|e| format!("invalid label '{}': {}", label, e))?;
    Ok((label, PathBuf::from(dir)))
}

fn build_classifier(args: &Args) -> Result<SharedClassifier> {
    let classifier = KnnClassifier::builder()
        .with_max_classes(args.num_classes)
        .with_top_k(args.top_k)
        .with_metric(args.metric)
        .build()?;
    Ok(classifier.into_shared())
}

fn open_persistence(args: &Args) -> Result<DatasetPersistence> {
    let store = match &args.data_dir {
        Some(dir) => FileStore::new(dir),
        None => FileStore::new_default(),
    }
    .context("failed to open data directory")?;
    info!("Using data directory {:?}", store.dir());
    Ok(DatasetPersistence::with_key(Arc::new(store), args.key.clone()))
}

async fn load_embedder(args: &Args) -> Result<Arc<OnnxImageEmbedder>> {
    let model = BuiltinModel::MobileNetV2;
    let mut config = model.embedder_config();
    if let Some(size) = args.image_size {
        config.image_size = size;
    }

    let model_path = match &args.model {
        Some(path) => path.clone(),
        None => {
            let manager = ModelManager::new_default()?;
            if args.fresh {
                info!("Fresh download requested - removing any existing model files...");
                manager.remove_download(model)?;
            }
            manager.ensure_model_downloaded(model).await?
        }
    };

    let start = Instant::now();
    let embedder = OnnxImageEmbedder::from_file(&model_path, config)?;
    info!("Loaded {:?} in {:.2?}", model_path, start.elapsed());
    Ok(Arc::new(embedder))
}

fn collect_images(paths: &[PathBuf]) -> Result<Vec<RawImage>> {
    let mut images = Vec::new();
    for path in paths {
        if path.is_dir() {
            images.extend(RawImage::collect_dir(path)?);
        } else {
            images.push(RawImage::from_path(path)?);
        }
    }
    Ok(images)
}

async fn train(args: &Args, inputs: &[(usize, PathBuf)]) -> Result<()> {
    let classifier = build_classifier(args)?;
    let persistence = open_persistence(args)?;
    if let Some(dataset) = persistence.load_dataset()? {
        classifier.write().await.import_dataset(dataset)?;
    }

    let mut batches = Vec::with_capacity(inputs.len());
    for (label, dir) in inputs {
        let images = RawImage::collect_dir(dir).with_context(|| format!("failed to read {:?}", dir))?;
        info!("Label {}: {} images from {:?}", label, images.len(), dir);
        batches.push((*label, images));
    }

    let embedder = load_embedder(args).await?;
    let ingestion = TrainingIngestion::new(Arc::clone(&classifier), embedder, persistence);
    let start = Instant::now();
    let report = ingestion.train(&batches).await?;

    println!("Added {} examples in {:.2?}", report.total(), start.elapsed());
    for (label, count) in classifier.read().await.example_count_per_class().iter().enumerate() {
        println!("  label {}: {} examples", label, count);
    }
    Ok(())
}

async fn predict(args: &Args, paths: &[PathBuf]) -> Result<()> {
    let images = collect_images(paths)?;
    if images.is_empty() {
        bail!("no images found");
    }
    let frame_count = images.len();

    let embedder = load_embedder(args).await?;
    let mut inference = InferenceLoop::new(
        build_classifier(args)?,
        embedder,
        open_persistence(args)?,
        Box::new(ImageFileSource::new(images)),
        Arc::new(LogSink),
    );

    let start = Instant::now();
    inference.start().await?;
    inference.wait().await;

    let stats = inference.stats();
    info!("=== Inference Complete ===");
    info!("Frames: {} of {} ({} predictions, {} errors)", stats.frames(), frame_count, stats.predictions(), stats.errors());
    info!("Total time: {:.2?}", start.elapsed());
    if stats.predictions() == 0 {
        println!("No predictions made - train at least one class first");
    }
    Ok(())
}

async fn info(args: &Args) -> Result<()> {
    let classifier = build_classifier(args)?;
    let persistence = open_persistence(args)?;
    match persistence.load_dataset()? {
        Some(dataset) => classifier.write().await.import_dataset(dataset)?,
        None => println!("No saved classifier under '{}'", persistence.key()),
    }
    let info = classifier.read().await.info();
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match &args.command {
        Command::Train { inputs } => train(&args, inputs).await,
        Command::Predict { paths } => predict(&args, paths).await,
        Command::Info => info(&args).await,
        Command::Clear => {
            open_persistence(&args)?.clear()?;
            println!("Cleared saved classifier '{}'", args.key);
            Ok(())
        }
    }
}
