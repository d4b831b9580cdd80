pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod normalize;
pub mod onnx;
pub mod pipeline;
pub mod select;
pub mod sink;

pub use classifier::{Classifier, ModelLoader, OrtModelLoader};
pub use config::{AppPaths, ClassifierConfig};
pub use engine::InferenceEngine;
pub use error::{Error, ErrorKind, Result};
pub use models::{
    ClassificationCandidate, ClassificationResult, NormalizedImage, PipelineOutcome,
    PipelineState, RawImage, RunReport, TargetSize,
};
pub use normalize::{normalize, ImageNormalizer};
pub use pipeline::PipelineController;
pub use select::select_top;
pub use sink::{ChannelSink, PipelineEvent, ResultSink, StatusBoard};
