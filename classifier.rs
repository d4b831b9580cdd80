use crate::config::{ClassifierConfig, ScoreActivation};
use crate::error::{Error, Result};
use crate::models::{ClassificationCandidate, NormalizedImage};
use crate::onnx::{build_session, InferenceProvider};
use ndarray::{ArrayView, IxDyn};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait Classifier: Send + Sync {
    fn classify(&self, image: &NormalizedImage) -> Result<Vec<ClassificationCandidate>>;
}

pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self) -> Result<Box<dyn Classifier>>;
}

impl<F> ModelLoader for F
where
    F: Fn() -> Result<Box<dyn Classifier>> + Send + Sync + 'static,
{
    fn load(&self) -> Result<Box<dyn Classifier>> {
        self()
    }
}

pub struct OrtModelLoader {
    config: ClassifierConfig,
}

impl OrtModelLoader {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for OrtModelLoader {
    fn load(&self) -> Result<Box<dyn Classifier>> {
        Ok(Box::new(OrtClassifier::new(&self.config)?))
    }
}

pub struct OrtClassifier {
    session: Mutex<Session>,
    output_name: String,
    labels: Vec<String>,
    activation: ScoreActivation,
    min_confidence: f32,
    provider: InferenceProvider,
}

impl OrtClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let (session, provider) = build_session(&config.model_path, config.runtime())?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| Error::ModelUnavailable("Model declares no outputs".into()))?;
        let labels = match &config.labels_path {
            Some(path) => load_labels(path),
            None => load_labels_from_model(&config.model_path),
        };
        log::info!(
            "Loaded classifier {} on {} ({} labels)",
            config.model_path.display(),
            provider.label(),
            labels.len()
        );
        Ok(Self {
            session: Mutex::new(session),
            output_name,
            labels,
            activation: config.activation,
            min_confidence: config.min_confidence,
            provider,
        })
    }

    pub fn provider(&self) -> InferenceProvider {
        self.provider
    }

    fn run_scores(&self, image: &NormalizedImage) -> Result<Vec<f32>> {
        let input = ArrayView::from_shape(IxDyn(&image.shape()), image.as_slice())
            .map_err(|e| Error::InferenceExecution(format!("Invalid input tensor shape: {e}")))?;
        let tensor = TensorRef::from_array_view(input)
            .map_err(|e| Error::InferenceExecution(format!("Failed to build tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| Error::InferenceExecution(format!("Session mutex poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| Error::InferenceExecution(format!("Failed to run classifier: {e}")))?;
        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::InferenceExecution(format!("Failed to read scores: {e}")))?;
        log::debug!("Classifier output shape {:?}", shape);

        // [N] or [1, N]; anything with more than one row is not a score vector.
        let rows: i64 = shape.iter().rev().skip(1).product();
        if rows > 1 {
            return Err(Error::InferenceExecution(format!(
                "Expected one score vector, got output shape {:?}",
                shape
            )));
        }
        Ok(data.to_vec())
    }
}

impl Classifier for OrtClassifier {
    fn classify(&self, image: &NormalizedImage) -> Result<Vec<ClassificationCandidate>> {
        let scores = self.run_scores(image)?;
        Ok(scores_to_candidates(
            &scores,
            &self.labels,
            self.activation,
            self.min_confidence,
        ))
    }
}

pub fn scores_to_candidates(
    scores: &[f32],
    labels: &[String],
    activation: ScoreActivation,
    min_confidence: f32,
) -> Vec<ClassificationCandidate> {
    let probs = match activation {
        ScoreActivation::Identity => scores.to_vec(),
        ScoreActivation::Softmax => softmax(scores),
        ScoreActivation::Sigmoid => scores.iter().map(|v| sigmoid(*v)).collect(),
        ScoreActivation::Auto if is_distribution(scores) => scores.to_vec(),
        ScoreActivation::Auto => softmax(scores),
    };
    probs
        .into_iter()
        .enumerate()
        .filter(|(_, p)| p.is_finite() && *p >= min_confidence)
        .map(|(idx, p)| {
            let label = labels
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("class_{idx}"));
            ClassificationCandidate::new(label, p.clamp(0.0, 1.0))
        })
        .collect()
}

fn is_distribution(values: &[f32]) -> bool {
    if values.is_empty() || values.iter().any(|v| !(0.0..=1.0).contains(v)) {
        return false;
    }
    let sum: f32 = values.iter().sum();
    (sum - 1.0).abs() <= 1e-3
}

fn softmax(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let max_val = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut exps = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for v in values {
        let e = (v - max_val).exp();
        exps.push(e);
        sum += e;
    }
    if sum <= 0.0 {
        return vec![0.0; values.len()];
    }
    exps.iter().map(|e| e / sum).collect()
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

fn resolve_labels_path(model_path: &Path) -> Option<PathBuf> {
    let labels_path = model_path.with_extension("labels.txt");
    if labels_path.exists() {
        return Some(labels_path);
    }
    let stem = model_path.file_stem().and_then(|s| s.to_str())?;
    let fallback = Path::new("models").join(format!("{stem}.labels.txt"));
    fallback.exists().then_some(fallback)
}

fn load_labels_from_model(model_path: &Path) -> Vec<String> {
    match resolve_labels_path(model_path) {
        Some(path) => load_labels(&path),
        None => {
            log::warn!(
                "No labels sidecar found for {}; using class indices",
                model_path.display()
            );
            Vec::new()
        }
    }
}

fn load_labels(labels_path: &Path) -> Vec<String> {
    let contents = match std::fs::read_to_string(labels_path) {
        Ok(data) => data,
        Err(err) => {
            log::warn!(
                "Failed to read labels from {}: {}",
                labels_path.display(),
                err
            );
            return Vec::new();
        }
    };
    let labels: Vec<String> = contents.lines().filter_map(normalize_label).collect();
    if labels.is_empty() {
        log::warn!("Labels file is empty or invalid: {}", labels_path.display());
    }
    labels
}

/// Strips index prefixes (`0 cat`, `0: cat`), synonyms after a comma and quotes.
fn normalize_label(line: &str) -> Option<String> {
    let mut label = line.trim();
    if label.is_empty() {
        return None;
    }
    if let Some((prefix, rest)) = label.split_once(':') {
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
            label = rest.trim();
        }
    } else {
        let mut parts = label.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("");
        if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
            label = rest.trim();
        }
    }
    if let Some((head, _)) = label.split_once(',') {
        label = head.trim();
    }
    label = label.trim_matches('"').trim_matches('\'');
    if label.is_empty() {
        return None;
    }
    Some(label.to_string())
}
