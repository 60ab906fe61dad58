use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::QuantizedConfig;
use crate::error::{Result, SeedxError};
use crate::prompt::Prompt;
use crate::runtime::{GenerationCall, ModelRuntime, ModelSource, Placement, TextModel};
use crate::settings::GenerationSettings;
use crate::task::ProgressReporter;
use super::{BackendKind, InferenceBackend, LoadOptions, ModelHandle, ModelState, TranslationOutcome};

/// Backend for a single packed (quantized) model file.
///
/// Stop sequences end generation right at the translation boundary, so the
/// completion is returned as-is after trimming.
pub struct QuantizedBackend {
    config: QuantizedConfig,
    runtime: Arc<dyn ModelRuntime>,
    model: Option<Box<dyn TextModel>>,
    handle: ModelHandle,
}

impl QuantizedBackend {
    pub fn new(config: QuantizedConfig, runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            config,
            runtime,
            model: None,
            handle: ModelHandle::unloaded(BackendKind::Quantized),
        }
    }

    /// Reject files whose name marks a numeric format known to crash the runtime.
    fn check_format(&self, path: &Path) -> Result<()> {
        let marker = self.config.unstable_format_marker.to_lowercase();
        if marker.is_empty() {
            return Ok(());
        }

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if filename.contains(&marker) {
            return Err(SeedxError::UnsupportedModelFormat(format!(
                "Detected {} model file. This format is not reliable with the quantized runtime and may crash the process.\n\
                 Recommended: use a quantized file like Q4_K_M (or Q5_K_M, Q8_0), or load the original model with the full-precision backend.\n\
                 File: {}",
                marker.to_uppercase(),
                path.display()
            )));
        }
        Ok(())
    }

    fn primary_placement(&self, options: &LoadOptions) -> Placement {
        Placement {
            context_size: Some(options.context_size.unwrap_or(self.config.context_size)),
            threads: Some(options.threads.unwrap_or(self.config.threads)),
            gpu_layers: Some(options.gpu_layers.unwrap_or(self.config.gpu_layers)),
            seed: Some(self.config.seed),
        }
    }

    fn fallback_placement(&self) -> Placement {
        Placement {
            context_size: Some(self.config.fallback_context_size),
            threads: Some(self.config.fallback_threads),
            gpu_layers: Some(0),
            seed: Some(self.config.seed),
        }
    }

    fn finish_load(&mut self, model: Box<dyn TextModel>, placement: &Placement) {
        self.model = Some(model);
        self.handle.state = ModelState::Loaded;
        self.handle.device = placement.device();
        self.handle.last_error = None;

        let details = &mut self.handle.details;
        details.clear();
        if let Some(ctx) = placement.context_size {
            details.insert("context_size".to_string(), ctx.to_string());
        }
        if let Some(layers) = placement.gpu_layers {
            details.insert("gpu_layers".to_string(), layers.to_string());
        }
        if let Some(threads) = placement.threads {
            details.insert("threads".to_string(), threads.to_string());
        }
    }

    fn reject(&mut self, error: SeedxError) -> Result<()> {
        self.handle.last_error = Some(error.to_string());
        Err(error)
    }

    fn fail(&mut self, error: SeedxError) -> Result<()> {
        self.handle.state = ModelState::Unloaded;
        self.handle.last_error = Some(error.to_string());
        Err(error)
    }
}

#[async_trait]
impl InferenceBackend for QuantizedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Quantized
    }

    async fn load(&mut self, path: &Path, options: &LoadOptions, progress: &ProgressReporter) -> Result<()> {
        // Rejected paths leave any loaded model in place
        if let Err(e) = self.check_format(path) {
            warn!("{}", e);
            return self.reject(e);
        }

        if !path.is_file() {
            return self.reject(SeedxError::ModelFileNotFound(path.display().to_string()));
        }

        self.unload().await;
        self.handle.state = ModelState::Loading;
        self.handle.path = Some(path.to_path_buf());
        self.handle.last_error = None;

        let placement = self.primary_placement(options);
        info!(
            "Loading model: {} (n_ctx={:?}, gpu_layers={:?}, threads={:?})",
            path.display(),
            placement.context_size,
            placement.gpu_layers,
            placement.threads
        );

        let source = ModelSource::PackedFile(path.to_path_buf());
        let first_error = match self.runtime.open(source.clone(), placement.clone()).await {
            Ok(model) => {
                self.finish_load(model, &placement);
                info!("Model loaded successfully");
                return Ok(());
            }
            Err(e) => e,
        };

        warn!("Error loading model: {}", first_error);
        let mut detail = format!("Error loading model: {}", first_error);

        if placement.gpu_layers != Some(0) {
            progress.report("Retrying with CPU only...");
            let fallback = self.fallback_placement();
            info!(
                "Trying CPU-only fallback (n_ctx={:?}, threads={:?})",
                fallback.context_size, fallback.threads
            );

            match self.runtime.open(source, fallback.clone()).await {
                Ok(model) => {
                    self.finish_load(model, &fallback);
                    info!("Model loaded successfully with CPU fallback");
                    return Ok(());
                }
                Err(e) => {
                    warn!("CPU fallback also failed: {}", e);
                    detail.push_str(&format!("\nCPU fallback also failed: {}", e));
                }
            }
        }

        self.fail(SeedxError::LoadFailure(detail))
    }

    async fn unload(&mut self) {
        if let Some(model) = self.model.take() {
            if let Err(e) = model.release().await {
                warn!("Failed to release quantized model: {}", e);
            }
            info!("Quantized model unloaded");
        }
        self.handle.state = ModelState::Unloaded;
        self.handle.details.clear();
    }

    async fn generate(&self, prompt: &Prompt, settings: &GenerationSettings) -> TranslationOutcome {
        let Some(model) = &self.model else {
            return TranslationOutcome::Failure(SeedxError::NotLoaded.to_string());
        };

        let call = GenerationCall {
            prompt: prompt.text.clone(),
            max_tokens: settings.max_tokens,
            settings: settings.clone(),
            stop: settings.stop_sequences.clone(),
            echo_prompt: false,
        };

        match model.generate(call).await {
            Ok(text) => TranslationOutcome::Translation(text.trim().to_string()),
            Err(e) => {
                warn!("Quantized generation failed: {}", e);
                TranslationOutcome::Failure(format!("Translation error: {}", e))
            }
        }
    }

    fn describe(&self) -> ModelHandle {
        self.handle.clone()
    }
}
