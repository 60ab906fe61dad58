// Model runtime abstraction
//
// Backends own model lifecycle policy (format guards, fallbacks, prompt echo
// handling). The runtime underneath only knows how to open weights and run a
// single generation call:
// - ModelRuntime: opens a packed file or a model directory
// - TextModel: one loaded model, generates text and releases its memory
//
// `ollama` talks to a local Ollama server; tests plug in fakes and mocks.

pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use ollama::OllamaRuntime;
use crate::error::Result;
use crate::settings::GenerationSettings;

/// Where model weights are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Accelerator,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// What to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A single packed (quantized) model file
    PackedFile(PathBuf),
    /// A directory holding weights, config and tokenizer files
    Directory(PathBuf),
}

impl ModelSource {
    pub fn path(&self) -> &std::path::Path {
        match self {
            ModelSource::PackedFile(path) | ModelSource::Directory(path) => path,
        }
    }
}

/// Resource configuration for opening a model. `None` leaves the runtime default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub context_size: Option<u32>,
    pub threads: Option<u32>,
    /// Layers on the accelerator: `Some(0)` is CPU only, `Some(-1)` or `None` is all
    pub gpu_layers: Option<i32>,
    pub seed: Option<i64>,
}

impl Placement {
    pub fn device(&self) -> Device {
        match self.gpu_layers {
            Some(0) => Device::Cpu,
            _ => Device::Accelerator,
        }
    }
}

/// One generation call against a loaded model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationCall {
    pub prompt: String,
    pub max_tokens: u32,
    pub settings: GenerationSettings,
    /// Sequences that end generation; empty means run to `max_tokens` or EOS
    pub stop: Vec<String>,
    /// Return the prompt followed by the completion, as a full decode would
    pub echo_prompt: bool,
}

/// A loaded model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Run one generation call and return the decoded text
    async fn generate(&self, call: GenerationCall) -> Result<String>;

    /// Free the memory held by the model
    async fn release(&self) -> Result<()>;
}

/// Opens models for the backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Open a model with the given placement
    async fn open(&self, source: ModelSource, placement: Placement) -> Result<Box<dyn TextModel>>;

    /// Whether an accelerator is available for weight placement
    fn accelerator_available(&self) -> bool;
}
