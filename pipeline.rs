use crate::engine::InferenceEngine;
use crate::error::{Error, ErrorKind, Result};
use crate::models::{
    ClassificationCandidate, PipelineOutcome, PipelineState, RawImage, RunReport,
};
use crate::normalize::ImageNormalizer;
use crate::select::select_top;
use crate::sink::ResultSink;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use uuid::Uuid;

#[derive(Clone)]
pub struct PipelineController {
    inner: Arc<Inner>,
}

struct Inner {
    current: Mutex<Option<RunHandle>>,
    // Held across a slot change and the sink calls for it, so busy signals
    // from consecutive runs cannot interleave.
    notify: Mutex<()>,
    engine: InferenceEngine,
    normalizer: ImageNormalizer,
    sink: Arc<dyn ResultSink>,
    runtime: Handle,
}

#[derive(Debug, Clone)]
struct RunHandle {
    id: String,
    started_at: DateTime<Utc>,
}

impl PipelineController {
    pub fn new(
        engine: InferenceEngine,
        normalizer: ImageNormalizer,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Init(format!("Pipeline needs a tokio runtime: {e}")))?;
        Ok(Self::with_runtime(runtime, engine, normalizer, sink))
    }

    pub fn with_runtime(
        runtime: Handle,
        engine: InferenceEngine,
        normalizer: ImageNormalizer,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: Mutex::new(None),
                notify: Mutex::new(()),
                engine,
                normalizer,
                sink,
                runtime,
            }),
        }
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.inner.engine
    }

    pub fn state(&self) -> PipelineState {
        if self.inner.slot().is_some() {
            PipelineState::Busy
        } else {
            PipelineState::Idle
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state() == PipelineState::Busy
    }

    pub fn submit(&self, image: RawImage) -> Result<String> {
        let notify = self.inner.notify();
        let run_id = {
            let mut current = self.inner.slot();
            if let Some(active) = current.as_ref() {
                log::warn!(
                    "Rejected submit: run {} in flight since {}",
                    active.id,
                    active.started_at.to_rfc3339()
                );
                return Err(Error::PipelineBusy);
            }
            let run_id = Uuid::new_v4().to_string();
            *current = Some(RunHandle {
                id: run_id.clone(),
                started_at: Utc::now(),
            });
            run_id
        };
        log::info!("Run {run_id} accepted");
        self.inner.sink.on_busy_changed(true);
        drop(notify);

        let inner = self.inner.clone();
        let id = run_id.clone();
        self.inner.runtime.spawn(async move {
            let guard = RunGuard {
                inner: inner.clone(),
                run_id: id,
                armed: true,
            };
            let outcome = match execute(&inner, image).await {
                Ok(Some(top)) => PipelineOutcome::Reported(top),
                Ok(None) => PipelineOutcome::ReportedNone,
                Err(err) => PipelineOutcome::Failed {
                    kind: err.kind().unwrap_or(ErrorKind::InferenceExecution),
                    message: err.detail(),
                },
            };
            guard.complete(outcome);
        });
        Ok(run_id)
    }

    pub fn submit_selection(&self, image: Option<RawImage>) -> Result<Option<String>> {
        match image {
            Some(image) => self.submit(image).map(Some),
            None => {
                log::debug!("No image selected");
                Ok(None)
            }
        }
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) -> MutexGuard<'_, ()> {
        self.notify.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_run(&self, run_id: &str, outcome: PipelineOutcome) {
        let _notify = self.notify();
        {
            let mut current = self.slot();
            match current.as_ref() {
                Some(handle) if handle.id == run_id => *current = None,
                _ => {
                    log::warn!("Run {run_id} finished but no longer owns the slot");
                    return;
                }
            }
        }
        match &outcome {
            PipelineOutcome::Failed { kind, message } => {
                log::warn!("Run {run_id} failed: {kind}: {message}");
            }
            other => {
                log::info!("Run {run_id} finished: {}", other.message());
            }
        }
        self.sink.on_busy_changed(false);
        self.sink.on_outcome(RunReport {
            run_id: run_id.to_string(),
            outcome,
            completed_at: Utc::now(),
        });
    }
}

async fn execute(inner: &Inner, image: RawImage) -> Result<Option<ClassificationCandidate>> {
    let normalizer = inner.normalizer;
    let normalized = tokio::task::spawn_blocking(move || normalizer.normalize(&image))
        .await
        .map_err(|e| Error::Normalization(format!("Normalization task failed: {e}")))?
        .map_err(|e| e.within(ErrorKind::Normalization))?;
    let result = inner.engine.classify(normalized).await?;
    Ok(select_top(&result))
}

struct RunGuard {
    inner: Arc<Inner>,
    run_id: String,
    armed: bool,
}

impl RunGuard {
    fn complete(mut self, outcome: PipelineOutcome) {
        self.armed = false;
        self.inner.finish_run(&self.run_id, outcome);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.armed {
            self.inner.finish_run(
                &self.run_id,
                PipelineOutcome::Failed {
                    kind: ErrorKind::InferenceExecution,
                    message: "Run aborted before completion".into(),
                },
            );
        }
    }
}
