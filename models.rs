use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Luma8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            Self::Luma8 => 1,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum RawSource {
    Encoded(Vec<u8>),
    Pixels {
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    },
    Decoded(image::DynamicImage),
}

#[derive(Debug, Clone)]
pub struct RawImage {
    pub(crate) source: RawSource,
}

impl RawImage {
    pub fn from_encoded(bytes: Vec<u8>) -> Self {
        Self {
            source: RawSource::Encoded(bytes),
        }
    }

    pub fn from_pixels(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            source: RawSource::Pixels {
                width,
                height,
                format,
                data,
            },
        }
    }

    pub fn from_dynamic(image: image::DynamicImage) -> Self {
        Self {
            source: RawSource::Decoded(image),
        }
    }

    pub fn from_path(path: &Path) -> crate::error::Result<Self> {
        Ok(Self::from_encoded(std::fs::read(path)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TensorLayout {
    #[default]
    Nchw,
    Nhwc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for TargetSize {
    fn default() -> Self {
        Self::new(640, 640)
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) layout: TensorLayout,
    pub(crate) data: Vec<f32>,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        3
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn shape(&self) -> [usize; 4] {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.layout {
            TensorLayout::Nchw => [1, 3, h, w],
            TensorLayout::Nhwc => [1, h, w, 3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationCandidate {
    pub label: String,
    pub confidence: f32,
}

impl ClassificationCandidate {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Candidates of one inference call in model order. Empty means "no result".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub candidates: Vec<ClassificationCandidate>,
}

impl ClassificationResult {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClassificationCandidate> {
        self.candidates.iter()
    }
}

impl From<Vec<ClassificationCandidate>> for ClassificationResult {
    fn from(candidates: Vec<ClassificationCandidate>) -> Self {
        Self { candidates }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Reported(ClassificationCandidate),
    ReportedNone,
    Failed { kind: ErrorKind, message: String },
}

pub const NO_RESULT_MESSAGE: &str = "No identifiable class in this image";

impl PipelineOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Reported(top) => format!("{}, confidence: {}", top.label, top.confidence),
            Self::ReportedNone => NO_RESULT_MESSAGE.to_string(),
            Self::Failed { kind, message } => format!("{kind}: {message}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: PipelineOutcome,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    pub fn message(&self) -> String {
        self.outcome.message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_message_uses_label_and_confidence() {
        let outcome = PipelineOutcome::Reported(ClassificationCandidate::new("cat", 0.87));
        assert_eq!(outcome.message(), "cat, confidence: 0.87");
    }

    #[test]
    fn failed_message_names_the_kind() {
        let outcome = PipelineOutcome::Failed {
            kind: ErrorKind::ModelUnavailable,
            message: "missing".into(),
        };
        assert_eq!(outcome.message(), "ModelUnavailableError: missing");
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(PipelineOutcome::ReportedNone).unwrap();
        assert_eq!(json["status"], "reported_none");
    }

    #[test]
    fn tensor_shape_follows_layout() {
        let img = NormalizedImage {
            width: 4,
            height: 2,
            layout: TensorLayout::Nhwc,
            data: vec![0.0; 24],
        };
        assert_eq!(img.shape(), [1, 2, 4, 3]);
    }
}
