use crate::classifier::{Classifier, ModelLoader};
use crate::error::{Error, Result};
use crate::models::{ClassificationResult, NormalizedImage};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

type LoadedModel = std::result::Result<Arc<dyn Classifier>, String>;

#[derive(Clone)]
pub struct InferenceEngine {
    inner: Arc<Inner>,
}

struct Inner {
    loader: Box<dyn ModelLoader>,
    model: OnceLock<LoadedModel>,
}

impl InferenceEngine {
    pub fn new<L: ModelLoader>(loader: L) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader: Box::new(loader),
                model: OnceLock::new(),
            }),
        }
    }

    pub fn from_classifier(classifier: Arc<dyn Classifier>) -> Self {
        let model = OnceLock::new();
        let _ = model.set(Ok(classifier));
        Self {
            inner: Arc::new(Inner {
                loader: Box::new(|| -> Result<Box<dyn Classifier>> {
                    Err(Error::ModelUnavailable("No loader configured".into()))
                }),
                model,
            }),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.inner.model.get(), Some(Ok(_)))
    }

    pub async fn warm_up(&self) -> Result<()> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.model().map(|_| ()))
            .await
            .map_err(|e| Error::ModelUnavailable(format!("Model load task failed: {e}")))?
    }

    pub async fn classify(&self, image: NormalizedImage) -> Result<ClassificationResult> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.classify_blocking(&image))
            .await
            .map_err(|e| Error::InferenceExecution(format!("Inference task failed: {e}")))?
    }

    pub fn classify_blocking(&self, image: &NormalizedImage) -> Result<ClassificationResult> {
        let model = self.model()?;
        let started = Instant::now();
        let run = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| model.classify(image)));
        let candidates = match run {
            Ok(res) => res.map_err(|e| e.within(crate::error::ErrorKind::InferenceExecution))?,
            Err(_) => {
                return Err(Error::InferenceExecution(
                    "Classifier panicked during inference".into(),
                ))
            }
        };
        log::debug!(
            "Inference produced {} candidates in {} ms",
            candidates.len(),
            started.elapsed().as_millis()
        );
        Ok(candidates.into())
    }

    fn model(&self) -> Result<Arc<dyn Classifier>> {
        let loaded = self.inner.model.get_or_init(|| self.load());
        loaded
            .as_ref()
            .map(Arc::clone)
            .map_err(|message| Error::ModelUnavailable(message.clone()))
    }

    fn load(&self) -> LoadedModel {
        log::info!("Loading classification model");
        let attempt = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.inner.loader.load()
        }));
        let loaded = match attempt {
            Ok(Ok(model)) => Ok(Arc::from(model)),
            Ok(Err(Error::ModelUnavailable(message))) => Err(message),
            Ok(Err(other)) => Err(other.to_string()),
            Err(_) => Err("Model loader panicked".to_string()),
        };
        match &loaded {
            Ok(_) => log::info!("Classification model ready"),
            Err(message) => log::error!("Model unavailable: {message}"),
        }
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassificationCandidate, TensorLayout};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(Vec<ClassificationCandidate>);

    impl Classifier for Fixed {
        fn classify(&self, _image: &NormalizedImage) -> Result<Vec<ClassificationCandidate>> {
            Ok(self.0.clone())
        }
    }

    struct Panicky;

    impl Classifier for Panicky {
        fn classify(&self, _image: &NormalizedImage) -> Result<Vec<ClassificationCandidate>> {
            panic!("model blew up")
        }
    }

    fn blank() -> NormalizedImage {
        NormalizedImage {
            width: 2,
            height: 2,
            layout: TensorLayout::Nchw,
            data: vec![0.0; 12],
        }
    }

    #[tokio::test]
    async fn loads_once_and_returns_candidates() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let engine = InferenceEngine::new(move || -> Result<Box<dyn Classifier>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Fixed(vec![ClassificationCandidate::new("cat", 0.87)])))
        });
        assert!(!engine.is_loaded());
        for _ in 0..3 {
            let result = engine.classify(blank()).await.unwrap();
            assert_eq!(result.candidates, vec![ClassificationCandidate::new("cat", 0.87)]);
        }
        assert!(engine.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_is_not_retried() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let engine = InferenceEngine::new(move || -> Result<Box<dyn Classifier>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::ModelUnavailable("best.onnx missing".into()))
        });
        for _ in 0..2 {
            let err = engine.classify(blank()).await.unwrap_err();
            assert!(matches!(err, Error::ModelUnavailable(ref m) if m == "best.onnx missing"));
        }
        assert!(engine.warm_up().await.is_err());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_output_is_not_an_error() {
        let engine = InferenceEngine::from_classifier(Arc::new(Fixed(Vec::new())));
        let result = engine.classify(blank()).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn classifier_panic_becomes_execution_error() {
        let engine = InferenceEngine::from_classifier(Arc::new(Panicky));
        let err = engine.classify(blank()).await.unwrap_err();
        assert!(matches!(err, Error::InferenceExecution(_)));
        // The engine keeps working after a panic.
        assert!(engine.is_loaded());
    }

    #[tokio::test]
    async fn warm_up_loads_the_model() {
        let engine = InferenceEngine::new(|| -> Result<Box<dyn Classifier>> {
            Ok(Box::new(Fixed(Vec::new())))
        });
        engine.warm_up().await.unwrap();
        assert!(engine.is_loaded());
    }
}
