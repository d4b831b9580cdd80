use crate::error::{Error, Result};
use crate::models::{TargetSize, TensorLayout};
use crate::normalize::ImageNormalizer;
use crate::onnx::{OrtRuntimeConfig, ProviderChoice};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MODEL_ENV: &str = "PHOTO_CLASSIFIER_MODEL";
pub const MIN_CONFIDENCE_ENV: &str = "PHOTO_CLASSIFIER_MIN_CONFIDENCE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoreActivation {
    #[default]
    Auto,
    Softmax,
    Sigmoid,
    Identity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub layout: TensorLayout,
    pub activation: ScoreActivation,
    pub min_confidence: f32,
    pub provider: ProviderChoice,
    pub device_id: Option<u32>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("classifier.onnx"),
            labels_path: None,
            input_width: 640,
            input_height: 640,
            layout: TensorLayout::Nchw,
            activation: ScoreActivation::Auto,
            min_confidence: 0.0,
            provider: ProviderChoice::Auto,
            device_id: None,
        }
    }
}

impl ClassifierConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read {}: {e}", path.display()))
                })?;
                serde_json::from_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup(MODEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.model_path = PathBuf::from(model.trim());
        }
        if let Some(raw) = lookup(MIN_CONFIDENCE_ENV) {
            self.min_confidence = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{MIN_CONFIDENCE_ENV} is not a number: {raw}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_width == 0 || self.input_height == 0 {
            return Err(Error::Config(format!(
                "Model input must be positive, got {}x{}",
                self.input_width, self.input_height
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }

    pub fn target_size(&self) -> TargetSize {
        TargetSize::new(self.input_width, self.input_height)
    }

    pub fn normalizer(&self) -> ImageNormalizer {
        ImageNormalizer::new(self.target_size(), self.layout)
    }

    pub fn runtime(&self) -> OrtRuntimeConfig {
        OrtRuntimeConfig {
            provider: self.provider,
            device_id: self.device_id,
        }
    }

    pub fn resolved(mut self, paths: &AppPaths) -> Self {
        self.model_path = paths.resolve_model(&self.model_path);
        self.labels_path = self.labels_path.map(|p| paths.resolve_model(&p));
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppPaths {
    pub models_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Self {
        let bundled = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("models")))
            .filter(|dir| dir.is_dir());
        let models_dir = bundled.unwrap_or_else(|| PathBuf::from("models"));
        log::debug!("Model directory: {}", models_dir.display());
        Self { models_dir }
    }

    pub fn resolve_model(&self, name: &Path) -> PathBuf {
        if name.is_absolute() || name.exists() {
            name.to_path_buf()
        } else {
            self.models_dir.join(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ClassifierConfig =
            serde_json::from_str(r#"{ "model_path": "best.onnx", "activation": "sigmoid" }"#)
                .unwrap();
        assert_eq!(config.model_path, PathBuf::from("best.onnx"));
        assert_eq!(config.activation, ScoreActivation::Sigmoid);
        assert_eq!(config.target_size(), TargetSize::new(640, 640));
        assert_eq!(config.layout, TensorLayout::Nchw);
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir()
            .join(format!("photo_classifier_{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{ "input_width": 224, "input_height": 224 }"#).unwrap();
        let config = ClassifierConfig::load(Some(&path)).unwrap();
        assert_eq!(config.target_size(), TargetSize::new(224, 224));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ClassifierConfig::default();
        config
            .apply_overrides(|key| match key {
                MODEL_ENV => Some("/opt/models/best.onnx".into()),
                MIN_CONFIDENCE_ENV => Some("0.25".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.model_path, PathBuf::from("/opt/models/best.onnx"));
        assert_eq!(config.min_confidence, 0.25);
    }

    #[test]
    fn bad_override_is_a_config_error() {
        let mut config = ClassifierConfig::default();
        let err = config
            .apply_overrides(|key| (key == MIN_CONFIDENCE_ENV).then(|| "high".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let config = ClassifierConfig {
            input_width: 0,
            ..ClassifierConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ClassifierConfig {
            min_confidence: 1.5,
            ..ClassifierConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn relative_models_resolve_under_models_dir() {
        let paths = AppPaths {
            models_dir: PathBuf::from("/bundle/models"),
        };
        let config = ClassifierConfig {
            model_path: PathBuf::from("no_such_model.onnx"),
            labels_path: Some(PathBuf::from("no_such_model.labels.txt")),
            ..ClassifierConfig::default()
        }
        .resolved(&paths);
        assert_eq!(
            config.model_path,
            PathBuf::from("/bundle/models/no_such_model.onnx")
        );
        assert_eq!(
            config.labels_path,
            Some(PathBuf::from("/bundle/models/no_such_model.labels.txt"))
        );
    }
}
