use clap::Parser;
use crossbeam_channel::Receiver;
use photo_classifier::error::{Error, Result};
use photo_classifier::sink::SELECT_PROMPT;
use photo_classifier::{
    AppPaths, ChannelSink, ClassifierConfig, InferenceEngine, OrtModelLoader, PipelineController,
    PipelineEvent, PipelineOutcome, RawImage, RunReport,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Classify images with a bundled ONNX model, one at a time.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file (model path, input size, activation, provider)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model file; relative names are looked up in the bundled models dir
    #[arg(long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// Print one JSON run report per image instead of text
    #[arg(long)]
    json: bool,

    /// Images to classify, in order
    #[arg(value_name = "IMAGE")]
    images: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    if args.images.is_empty() {
        println!("{SELECT_PROMPT}");
        return Ok(true);
    }

    let mut config = ClassifierConfig::load(args.config.as_deref())?;
    if let Some(model) = args.model {
        config.model_path = model;
    }
    let config = config.resolved(&AppPaths::discover());
    log::info!("Using model {}", config.model_path.display());

    let engine = InferenceEngine::new(OrtModelLoader::new(config.clone()));
    if let Err(err) = engine.warm_up().await {
        log::warn!("Model warm-up failed: {err}");
    }

    let (sink, rx) = ChannelSink::new();
    let controller = PipelineController::new(engine, config.normalizer(), Arc::new(sink))?;

    let mut all_ok = true;
    for path in args.images {
        let image = match RawImage::from_path(&path) {
            Ok(image) => image,
            Err(err) => {
                eprintln!("{}: {err}", path.display());
                all_ok = false;
                continue;
            }
        };
        controller.submit(image)?;
        let report = wait_for_report(rx.clone()).await?;
        if matches!(report.outcome, PipelineOutcome::Failed { .. }) {
            all_ok = false;
        }
        if args.json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            println!("{}: {}", path.display(), report.message());
        }
    }
    Ok(all_ok)
}

async fn wait_for_report(rx: Receiver<PipelineEvent>) -> Result<RunReport> {
    tokio::task::spawn_blocking(move || loop {
        match rx.recv() {
            Ok(PipelineEvent::Finished(report)) => return Ok(report),
            Ok(PipelineEvent::Busy(busy)) => log::debug!("Pipeline busy: {busy}"),
            Err(_) => return Err(Error::Init("Pipeline closed before reporting".into())),
        }
    })
    .await
    .map_err(|e| Error::Init(format!("Task join error: {e}")))?
}
