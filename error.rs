use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Normalization Error: {0}")]
    Normalization(String),

    #[error("Model Unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Inference Error: {0}")]
    InferenceExecution(String),

    #[error("Pipeline busy: an inference run is already in flight")]
    PipelineBusy,

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Initialization Failed: {0}")]
    Init(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Normalization,
    ModelUnavailable,
    InferenceExecution,
    PipelineBusy,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normalization => "NormalizationError",
            Self::ModelUnavailable => "ModelUnavailableError",
            Self::InferenceExecution => "InferenceExecutionError",
            Self::PipelineBusy => "PipelineBusyError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Error {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Normalization(_) => Some(ErrorKind::Normalization),
            Self::ModelUnavailable(_) => Some(ErrorKind::ModelUnavailable),
            Self::InferenceExecution(_) => Some(ErrorKind::InferenceExecution),
            Self::PipelineBusy => Some(ErrorKind::PipelineBusy),
            _ => None,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::Normalization(m) | Self::ModelUnavailable(m) | Self::InferenceExecution(m) => {
                m.clone()
            }
            other => other.to_string(),
        }
    }

    pub(crate) fn within(self, stage: ErrorKind) -> Self {
        if self.kind().is_some() {
            return self;
        }
        let message = self.to_string();
        match stage {
            ErrorKind::Normalization => Self::Normalization(message),
            ErrorKind::ModelUnavailable => Self::ModelUnavailable(message),
            ErrorKind::InferenceExecution => Self::InferenceExecution(message),
            ErrorKind::PipelineBusy => Self::PipelineBusy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_variants_report_their_kind() {
        assert_eq!(
            Error::Normalization("bad".into()).kind(),
            Some(ErrorKind::Normalization)
        );
        assert_eq!(Error::PipelineBusy.kind(), Some(ErrorKind::PipelineBusy));
        assert_eq!(Error::Config("x".into()).kind(), None);
    }

    #[test]
    fn foreign_errors_take_the_stage_kind() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        let err = io.within(ErrorKind::InferenceExecution);
        assert_eq!(err.kind(), Some(ErrorKind::InferenceExecution));
        assert!(err.to_string().contains("disk"));

        let kept = Error::ModelUnavailable("gone".into()).within(ErrorKind::Normalization);
        assert_eq!(kept.kind(), Some(ErrorKind::ModelUnavailable));
        assert_eq!(kept.detail(), "gone");
    }
}
