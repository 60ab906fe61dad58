// Inference backends
//
// Two interchangeable backends behind one capability trait:
// - Quantized: a single packed model file, stop-sequence completion
// - FullPrecision: a model directory, bounded decoding plus output extraction
//
// The factory is the only place that picks a variant; callers hold a
// `Box<dyn InferenceBackend>` and never check the concrete type.

pub mod full_precision;
pub mod quantized;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub use full_precision::FullPrecisionBackend;
pub use quantized::QuantizedBackend;
use crate::config::Config;
use crate::download::ModelFetcher;
use crate::error::Result;
use crate::prompt::Prompt;
use crate::runtime::{Device, ModelRuntime};
use crate::settings::GenerationSettings;
use crate::task::ProgressReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Quantized,
    FullPrecision,
}

impl BackendKind {
    /// Packed `.gguf` files go to the quantized backend, anything else to full precision.
    pub fn for_path(path: &Path) -> Self {
        let is_packed = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gguf"))
            .unwrap_or(false);
        if is_packed {
            BackendKind::Quantized
        } else {
            BackendKind::FullPrecision
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Quantized => write!(f, "quantized"),
            BackendKind::FullPrecision => write!(f, "full-precision"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quantized" | "gguf" => Ok(BackendKind::Quantized),
            "full-precision" | "full_precision" | "full" | "transformers" => Ok(BackendKind::FullPrecision),
            other => Err(format!(
                "unknown backend '{}': expected 'quantized' or 'full-precision'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelState {
    Unloaded,
    Loading,
    Loaded,
}

/// Snapshot of a backend's model lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub path: Option<PathBuf>,
    pub backend_kind: BackendKind,
    pub state: ModelState,
    pub device: Device,
    pub last_error: Option<String>,
    /// Backend-specific facts such as context size or thread count
    pub details: BTreeMap<String, String>,
}

impl ModelHandle {
    pub fn unloaded(backend_kind: BackendKind) -> Self {
        Self {
            path: None,
            backend_kind,
            state: ModelState::Unloaded,
            device: Device::Cpu,
            last_error: None,
            details: BTreeMap::new(),
        }
    }

    pub fn loaded(&self) -> bool {
        self.state == ModelState::Loaded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Translation(String),
    Failure(String),
}

/// Per-load overrides of the configured placement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub context_size: Option<u32>,
    pub threads: Option<u32>,
    pub gpu_layers: Option<i32>,
    /// Repository fetched when a full-precision directory is missing
    pub repo_id: Option<String>,
}

/// Model lifecycle plus one generation call.
///
/// `generate` never fails: internal errors come back as
/// [`TranslationOutcome::Failure`] with a readable reason.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Load a model, replacing any model already loaded
    async fn load(&mut self, path: &Path, options: &LoadOptions, progress: &ProgressReporter) -> Result<()>;

    /// Release the loaded model, if any
    async fn unload(&mut self);

    /// Run one translation prompt
    async fn generate(&self, prompt: &Prompt, settings: &GenerationSettings) -> TranslationOutcome;

    fn describe(&self) -> ModelHandle;

    fn is_loaded(&self) -> bool {
        self.describe().loaded()
    }

    fn last_error(&self) -> Option<String> {
        self.describe().last_error
    }
}

/// Creates fresh, unloaded backend instances.
#[derive(Clone)]
pub struct BackendFactory {
    config: Config,
    runtime: Arc<dyn ModelRuntime>,
    fetcher: Arc<dyn ModelFetcher>,
}

impl BackendFactory {
    pub fn new(config: Config, runtime: Arc<dyn ModelRuntime>, fetcher: Arc<dyn ModelFetcher>) -> Self {
        Self { config, runtime, fetcher }
    }

    pub fn create(&self, kind: BackendKind) -> Box<dyn InferenceBackend> {
        match kind {
            BackendKind::Quantized => Box::new(QuantizedBackend::new(
                self.config.quantized.clone(),
                Arc::clone(&self.runtime),
            )),
            BackendKind::FullPrecision => Box::new(FullPrecisionBackend::new(
                self.config.full_precision.clone(),
                Arc::clone(&self.runtime),
                Arc::clone(&self.fetcher),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_for_path() {
        assert_eq!(BackendKind::for_path(Path::new("models/x-q4_k_m.gguf")), BackendKind::Quantized);
        assert_eq!(BackendKind::for_path(Path::new("models/X.GGUF")), BackendKind::Quantized);
        assert_eq!(BackendKind::for_path(Path::new("models/Seed-X-PPO-7B")), BackendKind::FullPrecision);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("quantized".parse::<BackendKind>().unwrap(), BackendKind::Quantized);
        assert_eq!("GGUF".parse::<BackendKind>().unwrap(), BackendKind::Quantized);
        assert_eq!("full-precision".parse::<BackendKind>().unwrap(), BackendKind::FullPrecision);
        assert_eq!("transformers".parse::<BackendKind>().unwrap(), BackendKind::FullPrecision);
        assert!("vllm".parse::<BackendKind>().is_err());
    }
}
