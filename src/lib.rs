//! Seedx - Dual-backend Translation Orchestrator
//!
//! Runs Seed-X style translation models through one of two interchangeable
//! backends, a quantized packed model or a full-precision model directory,
//! builds backend-appropriate prompts, executes load/translate/download work
//! as background tasks and recovers a clean translation from raw output.

pub mod backend;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod history;
pub mod language;
pub mod orchestrator;
pub mod prompt;
pub mod runtime;
pub mod settings;
pub mod task;

pub use backend::{BackendKind, InferenceBackend, LoadOptions, ModelHandle, TranslationOutcome};
pub use config::Config;
pub use error::{Result, SeedxError};
pub use orchestrator::{TranslationOrchestrator, TranslationRequest};
