use crate::error::{Error, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::Path;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

#[cfg(target_os = "windows")]
use ort::execution_providers::{DirectMLExecutionProvider, ExecutionProvider};
#[cfg(target_os = "windows")]
use std::path::PathBuf;

lazy_static! {
    static ref ORT_ENVIRONMENT: std::result::Result<(), String> = commit_environment();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceProvider {
    Cpu,
    DirectML { device_id: u32 },
}

impl InferenceProvider {
    pub fn label(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::DirectML { .. } => "GPU (DirectML)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderChoice {
    #[default]
    Auto,
    CpuOnly,
    DirectMLOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct OrtRuntimeConfig {
    pub provider: ProviderChoice,
    pub device_id: Option<u32>,
}

impl OrtRuntimeConfig {
    fn resolved_device_id(self) -> u32 {
        self.device_id.unwrap_or(0)
    }
}

#[cfg(target_os = "windows")]
fn resolve_ort_dylib_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("ORT_DYLIB_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join("onnxruntime").join("onnxruntime.dll");
    candidate.exists().then_some(candidate)
}

#[cfg(target_os = "windows")]
fn set_ort_dylib_path(dll_path: &Path) {
    std::env::set_var("ORT_DYLIB_PATH", dll_path);
    if let Some(dir) = dll_path.parent() {
        let paths = std::env::var_os("PATH").unwrap_or_default();
        let mut new_paths = std::ffi::OsString::new();
        new_paths.push(dir);
        new_paths.push(";");
        new_paths.push(&paths);
        std::env::set_var("PATH", new_paths);
    }
}

fn commit_environment() -> std::result::Result<(), String> {
    #[cfg(target_os = "windows")]
    {
        match resolve_ort_dylib_path() {
            Some(dll_path) => set_ort_dylib_path(&dll_path),
            None => return Err("onnxruntime.dll not found next to the executable".into()),
        }
    }
    let committed = ort::init()
        .with_name("photo-classifier")
        .commit()
        .map_err(|e| format!("Failed to init ORT environment: {e}"))?;
    if committed {
        if let Ok(env) = ort::environment::get_environment() {
            env.set_log_level(ort::logging::LogLevel::Warning);
        }
    }
    Ok(())
}

fn unavailable<E: std::fmt::Display>(e: E) -> Error {
    Error::ModelUnavailable(format!("{e}"))
}

fn ensure_environment() -> Result<()> {
    ORT_ENVIRONMENT
        .as_ref()
        .map(|_| ())
        .map_err(|e| Error::ModelUnavailable(e.clone()))
}

pub fn build_session(
    model_path: &Path,
    cfg: OrtRuntimeConfig,
) -> Result<(Session, InferenceProvider)> {
    if !model_path.exists() {
        return Err(Error::ModelUnavailable(format!(
            "Model not found: {}",
            model_path.display()
        )));
    }
    ensure_environment()?;
    let device_id = cfg.resolved_device_id();

    let try_build = |use_dml: bool| -> Result<Session> {
        let build = || -> Result<Session> {
            #[allow(unused_mut)]
            let mut builder = Session::builder()
                .map_err(unavailable)?
                .with_optimization_level(GraphOptimizationLevel::Level1)
                .map_err(unavailable)?
                .with_parallel_execution(false)
                .map_err(unavailable)?;
            if use_dml {
                #[cfg(target_os = "windows")]
                {
                    builder = builder.with_memory_pattern(false).map_err(unavailable)?;
                    let ep = DirectMLExecutionProvider::default()
                        .with_device_id(device_id as i32)
                        .build();
                    builder = builder.with_execution_providers([ep]).map_err(unavailable)?;
                }
            }
            builder.commit_from_file(model_path).map_err(unavailable)
        };
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(build)) {
            Ok(res) => res,
            Err(_) => Err(Error::ModelUnavailable(
                "ONNX Runtime panicked while building session".into(),
            )),
        }
    };

    let wants_dml = matches!(cfg.provider, ProviderChoice::Auto | ProviderChoice::DirectMLOnly);
    #[cfg(target_os = "windows")]
    {
        if wants_dml {
            if let Ok(true) = DirectMLExecutionProvider::default().is_available() {
                if let Ok(session) = try_build(true) {
                    return Ok((session, InferenceProvider::DirectML { device_id }));
                }
            }
        }
    }

    if cfg.provider == ProviderChoice::DirectMLOnly {
        return Err(Error::ModelUnavailable(format!(
            "DirectML requested for device {device_id} but unavailable"
        )));
    }
    if wants_dml && cfg!(target_os = "windows") {
        log::warn!(
            "DirectML execution provider unavailable; falling back to CPU for {}",
            model_path.display()
        );
    }

    let session = try_build(false)?;
    Ok((session, InferenceProvider::Cpu))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_unavailable_before_touching_ort() {
        let cfg = OrtRuntimeConfig {
            provider: ProviderChoice::CpuOnly,
            device_id: None,
        };
        let err = build_session(Path::new("/nonexistent/classifier.onnx"), cfg).unwrap_err();
        assert!(matches!(err, Error::ModelUnavailable(_)));
    }

    #[test]
    fn provider_choice_parses_from_config_names() {
        let choice: ProviderChoice = serde_json::from_str("\"cpu_only\"").unwrap();
        assert_eq!(choice, ProviderChoice::CpuOnly);
        assert_eq!(InferenceProvider::Cpu.label(), "CPU");
    }
}
