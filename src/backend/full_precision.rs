use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::FullPrecisionConfig;
use crate::download::{ModelFetcher, snapshot_incomplete};
use crate::error::{Result, SeedxError};
use crate::extract::{self, FAILURE_SENTINEL};
use crate::prompt::Prompt;
use crate::runtime::{Device, GenerationCall, ModelRuntime, ModelSource, Placement, TextModel};
use crate::settings::GenerationSettings;
use crate::task::ProgressReporter;
use super::{BackendKind, InferenceBackend, LoadOptions, ModelHandle, ModelState, TranslationOutcome};

/// Token cap for one decode: never more than configured, but scaled to the
/// input so short texts don't run away.
pub fn decode_cap(config: &FullPrecisionConfig, max_tokens: u32, source_chars: usize) -> u32 {
    let scaled = source_chars
        .saturating_mul(config.length_multiplier)
        .max(config.min_new_tokens);
    let scaled = u32::try_from(scaled).unwrap_or(u32::MAX);
    max_tokens.min(scaled)
}

/// Backend for an uncompressed model directory.
///
/// A missing directory is fetched from the configured repository first. The
/// decoded output carries the echoed prompt and whatever the model keeps
/// producing after the translation, so it goes through [`extract::recover`].
pub struct FullPrecisionBackend {
    config: FullPrecisionConfig,
    runtime: Arc<dyn ModelRuntime>,
    fetcher: Arc<dyn ModelFetcher>,
    model: Option<Box<dyn TextModel>>,
    handle: ModelHandle,
}

impl FullPrecisionBackend {
    pub fn new(config: FullPrecisionConfig, runtime: Arc<dyn ModelRuntime>, fetcher: Arc<dyn ModelFetcher>) -> Self {
        Self {
            config,
            runtime,
            fetcher,
            model: None,
            handle: ModelHandle::unloaded(BackendKind::FullPrecision),
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

    fn choose_device(&self) -> Device {
        if self.config.prefer_accelerator && self.runtime.accelerator_available() {
            Device::Accelerator
        } else {
            Device::Cpu
        }
    }
}

#[async_trait]
impl InferenceBackend for FullPrecisionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FullPrecision
    }

    async fn load(&mut self, path: &Path, options: &LoadOptions, progress: &ProgressReporter) -> Result<()> {
        info!("Loading model with full-precision backend: {}", path.display());

        // Rejected paths leave any loaded model in place
        if BackendKind::for_path(path) == BackendKind::Quantized {
            return self.reject(SeedxError::UnsupportedModelFormat(format!(
                "The full-precision backend does not read packed .gguf files; use the quantized backend instead.\nFile: {}",
                path.display()
            )));
        }

        if path.exists() && !path.is_dir() {
            return self.reject(SeedxError::ModelFileNotFound(format!(
                "expected a model directory at {}",
                path.display()
            )));
        }

        self.unload().await;
        self.handle.state = ModelState::Loading;
        self.handle.path = Some(path.to_path_buf());
        self.handle.last_error = None;

        if snapshot_incomplete(path) {
            let repo_id = options.repo_id.clone().unwrap_or_else(|| self.config.repo_id.clone());
            info!("Model directory missing or incomplete, downloading {} to {}", repo_id, path.display());
            progress.report(format!("Downloading {}...", repo_id));

            if let Err(e) = self.fetcher.fetch_snapshot(&repo_id, path, progress).await {
                let error = match e {
                    SeedxError::DownloadFailure(_) => e,
                    other => SeedxError::DownloadFailure(other.to_string()),
                };
                return self.fail(error);
            }
            info!("Model download completed: {}", path.display());
        }

        if !path.is_dir() {
            return self.fail(SeedxError::ModelFileNotFound(format!(
                "expected a model directory at {}",
                path.display()
            )));
        }

        let device = self.choose_device();
        let placement = Placement {
            context_size: options.context_size,
            threads: options.threads,
            gpu_layers: match device {
                Device::Cpu => Some(0),
                Device::Accelerator => options.gpu_layers,
            },
            seed: None,
        };
        info!("Loading model to {}", device);

        match self.runtime.open(ModelSource::Directory(path.to_path_buf()), placement).await {
            Ok(model) => {
                self.model = Some(model);
                self.handle.state = ModelState::Loaded;
                self.handle.device = device;
                self.handle.details.insert("device".to_string(), device.to_string());
                info!("Model loaded successfully with full-precision backend on {}", device);
                Ok(())
            }
            Err(e) => {
                warn!("Error loading model with full-precision backend: {}", e);
                self.fail(SeedxError::LoadFailure(format!(
                    "Error loading model with full-precision backend: {}",
                    e
                )))
            }
        }
    }

    async fn unload(&mut self) {
        if let Some(model) = self.model.take() {
            if let Err(e) = model.release().await {
                warn!("Failed to release full-precision model: {}", e);
            }
            info!("Full-precision model unloaded");
        }
        self.handle.state = ModelState::Unloaded;
        self.handle.details.clear();
    }

    async fn generate(&self, prompt: &Prompt, settings: &GenerationSettings) -> TranslationOutcome {
        let Some(model) = &self.model else {
            return TranslationOutcome::Failure(SeedxError::NotLoaded.to_string());
        };

        let max_tokens = decode_cap(&self.config, settings.max_tokens, prompt.source_chars);
        info!(
            "Translating text (length: {}), max_tokens: {}",
            prompt.source_chars, max_tokens
        );

        let call = GenerationCall {
            prompt: prompt.text.clone(),
            max_tokens,
            settings: settings.clone(),
            stop: Vec::new(),
            echo_prompt: true,
        };

        match model.generate(call).await {
            Ok(decoded) => {
                let translation = extract::recover(&decoded, &prompt.text, &prompt.target_code);
                if translation == FAILURE_SENTINEL {
                    TranslationOutcome::Failure(translation)
                } else {
                    TranslationOutcome::Translation(translation)
                }
            }
            Err(e) => {
                warn!("Full-precision generation failed: {}", e);
                TranslationOutcome::Failure(format!("Translation error: {}", e))
            }
        }
    }

    fn describe(&self) -> ModelHandle {
        self.handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{INCOMPLETE_MARKER, RemoteModel};
    use crate::runtime::{MockModelRuntime, MockTextModel};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records snapshot requests and creates the destination directory.
    #[derive(Default)]
    struct FakeFetcher {
        requests: Mutex<Vec<(String, PathBuf)>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl ModelFetcher for FakeFetcher {
        async fn fetch(&self, remote: &RemoteModel, progress: &ProgressReporter) -> Result<PathBuf> {
            let dest = PathBuf::from(remote.repo_name());
            self.fetch_snapshot(&remote.repo_id, &dest, progress).await
        }

        async fn fetch_snapshot(&self, repo_id: &str, dest: &Path, _progress: &ProgressReporter) -> Result<PathBuf> {
            self.requests
                .lock()
                .unwrap()
                .push((repo_id.to_string(), dest.to_path_buf()));
            if let Some(message) = &self.fail_with {
                return Err(SeedxError::Runtime(message.clone()));
            }
            std::fs::create_dir_all(dest)?;
            std::fs::write(dest.join("config.json"), b"{}")?;
            let _ = std::fs::remove_file(dest.join(INCOMPLETE_MARKER));
            Ok(dest.to_path_buf())
        }
    }

    fn boxed(model: MockTextModel) -> Box<dyn TextModel> {
        Box::new(model)
    }

    fn runtime_with(model: MockTextModel, accelerator: bool) -> MockModelRuntime {
        let mut runtime = MockModelRuntime::new();
        runtime.expect_accelerator_available().return_const(accelerator);
        runtime.expect_open().return_once(move |_, _| Ok(boxed(model)));
        runtime
    }

    fn prompt(text: &str) -> Prompt {
        Prompt {
            text: format!(
                "Translate the following English text into Polish:\n{}\n\nTranslation in Polish <pl>:",
                text
            ),
            target_code: "pl".to_string(),
            source_chars: text.chars().count(),
        }
    }

    fn model_dir(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("Seed-X-PPO-7B");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("config.json"), b"{}").unwrap();
        path
    }

    async fn load(backend: &mut FullPrecisionBackend, path: &Path) -> Result<()> {
        backend
            .load(path, &LoadOptions::default(), &ProgressReporter::silent())
            .await
    }

    #[test]
    fn test_decode_cap() {
        let config = FullPrecisionConfig::default();
        assert_eq!(decode_cap(&config, 512, 10), 150);
        assert_eq!(decode_cap(&config, 512, 100), 200);
        assert_eq!(decode_cap(&config, 512, 1000), 512);
        assert_eq!(decode_cap(&config, 100, 10), 100);

        let custom = FullPrecisionConfig {
            length_multiplier: 3,
            min_new_tokens: 32,
            ..Default::default()
        };
        assert_eq!(decode_cap(&custom, 512, 5), 32);
        assert_eq!(decode_cap(&custom, 512, 50), 150);
    }

    #[tokio::test]
    async fn test_rejects_packed_file() {
        let mut runtime = MockModelRuntime::new();
        runtime.expect_open().never();

        let mut backend = FullPrecisionBackend::new(
            FullPrecisionConfig::default(),
            Arc::new(runtime),
            Arc::new(FakeFetcher::default()),
        );
        let err = load(&mut backend, Path::new("models/model-q4_k_m.gguf")).await.unwrap_err();
        assert!(matches!(err, SeedxError::UnsupportedModelFormat(_)));
    }

    #[tokio::test]
    async fn test_rejected_path_keeps_loaded_model() {
        let dir = tempfile::tempdir().unwrap();
        let good = model_dir(&dir);
        let packed = dir.path().join("model-q4_k_m.gguf");
        std::fs::write(&packed, b"GGUF").unwrap();
        let plain_file = dir.path().join("weights.bin");
        std::fs::write(&plain_file, b"data").unwrap();

        let mut model = MockTextModel::new();
        model.expect_release().never();
        let fetcher = Arc::new(FakeFetcher::default());
        let mut backend = FullPrecisionBackend::new(
            FullPrecisionConfig::default(),
            Arc::new(runtime_with(model, true)),
            fetcher.clone(),
        );
        load(&mut backend, &good).await.unwrap();

        let err = load(&mut backend, &packed).await.unwrap_err();
        assert!(matches!(err, SeedxError::UnsupportedModelFormat(_)));
        let err = load(&mut backend, &plain_file).await.unwrap_err();
        assert!(matches!(err, SeedxError::ModelFileNotFound(_)));

        let handle = backend.describe();
        assert!(handle.loaded());
        assert_eq!(handle.path, Some(good));
        assert!(handle.last_error.is_some());
        assert!(fetcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_download_is_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let path = model_dir(&dir);
        std::fs::write(path.join(INCOMPLETE_MARKER), b"").unwrap();
        let fetcher = Arc::new(FakeFetcher::default());

        let mut backend = FullPrecisionBackend::new(
            FullPrecisionConfig::default(),
            Arc::new(runtime_with(MockTextModel::new(), false)),
            fetcher.clone(),
        );
        load(&mut backend, &path).await.unwrap();
        assert_eq!(fetcher.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("Seed-X-PPO-7B");
        let fetcher = Arc::new(FakeFetcher::default());

        let runtime = runtime_with(MockTextModel::new(), true);
        let mut backend = FullPrecisionBackend::new(
            FullPrecisionConfig::default(),
            Arc::new(runtime),
            fetcher.clone(),
        );
        load(&mut backend, &model_dir).await.unwrap();

        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(requests.as_slice(), &[("ByteDance-Seed/Seed-X-PPO-7B".to_string(), model_dir.clone())]);
        assert_eq!(backend.describe().device, Device::Accelerator);
        assert!(backend.is_loaded());
    }

    #[tokio::test]
    async fn test_download_failure_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher {
            fail_with: Some("offline".to_string()),
            ..Default::default()
        });

        let mut runtime = MockModelRuntime::new();
        runtime.expect_open().never();
        let mut backend = FullPrecisionBackend::new(FullPrecisionConfig::default(), Arc::new(runtime), fetcher);

        let err = load(&mut backend, &dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, SeedxError::DownloadFailure(_)));
        assert!(backend.last_error().is_some());
    }

    #[tokio::test]
    async fn test_cpu_placement_without_accelerator() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockModelRuntime::new();
        runtime.expect_accelerator_available().return_const(false);
        runtime
            .expect_open()
            .withf(|source, placement| {
                matches!(source, ModelSource::Directory(_)) && placement.gpu_layers == Some(0)
            })
            .return_once(|_, _| Ok(boxed(MockTextModel::new())));

        let mut backend = FullPrecisionBackend::new(
            FullPrecisionConfig::default(),
            Arc::new(runtime),
            Arc::new(FakeFetcher::default()),
        );
        load(&mut backend, &model_dir(&dir)).await.unwrap();
        assert_eq!(backend.describe().device, Device::Cpu);
    }

    #[tokio::test]
    async fn test_generate_extracts_from_echoed_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model
            .expect_generate()
            .withf(|call| call.echo_prompt && call.stop.is_empty() && call.max_tokens == 150)
            .returning(|call| Ok(format!("{} Witaj świecie\n<en> Hello world", call.prompt)));

        let mut backend = FullPrecisionBackend::new(
            FullPrecisionConfig::default(),
            Arc::new(runtime_with(model, true)),
            Arc::new(FakeFetcher::default()),
        );
        load(&mut backend, &model_dir(&dir)).await.unwrap();

        let outcome = backend.generate(&prompt("Hello world"), &GenerationSettings::default()).await;
        assert_eq!(outcome, TranslationOutcome::Translation("Witaj świecie".to_string()));
    }

    #[tokio::test]
    async fn test_generate_with_only_prompt_echo() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model.expect_generate().returning(|call| Ok(call.prompt));

        let mut backend = FullPrecisionBackend::new(
            FullPrecisionConfig::default(),
            Arc::new(runtime_with(model, false)),
            Arc::new(FakeFetcher::default()),
        );
        load(&mut backend, &model_dir(&dir)).await.unwrap();

        let outcome = backend.generate(&prompt("Hi"), &GenerationSettings::default()).await;
        assert_eq!(outcome, TranslationOutcome::Failure(FAILURE_SENTINEL.to_string()));
    }

    #[tokio::test]
    async fn test_generate_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model
            .expect_generate()
            .returning(|_| Err(SeedxError::Runtime("CUDA error".to_string())));

        let mut backend = FullPrecisionBackend::new(
            FullPrecisionConfig::default(),
            Arc::new(runtime_with(model, true)),
            Arc::new(FakeFetcher::default()),
        );
        load(&mut backend, &model_dir(&dir)).await.unwrap();

        let outcome = backend.generate(&prompt("Hi"), &GenerationSettings::default()).await;
        assert!(matches!(outcome, TranslationOutcome::Failure(reason) if reason.contains("CUDA error")));
    }
}
