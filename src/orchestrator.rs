use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::backend::{BackendFactory, BackendKind, InferenceBackend, LoadOptions, ModelHandle, TranslationOutcome};
use crate::config::Config;
use crate::download::{ModelDownloader, ModelFetcher, RemoteModel};
use crate::error::{Result, SeedxError};
use crate::history::{HistoryEntry, TranslationHistory};
use crate::language::LanguageDirectory;
use crate::prompt::PromptBuilder;
use crate::runtime::{ModelRuntime, OllamaRuntime};
use crate::settings::{GenerationSettings, SettingsOverrides};
use crate::task::{TaskExecutor, TaskHandle, TaskKind};

type SharedBackend = Arc<Mutex<Box<dyn InferenceBackend>>>;

/// One translation with the settings snapshot it runs under.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub chain_of_thought: bool,
    pub settings: GenerationSettings,
}

impl TranslationRequest {
    /// Apply per-request overrides on top of the snapshot.
    pub fn with_overrides(mut self, overrides: &SettingsOverrides) -> Self {
        self.settings = GenerationSettings::merge(&self.settings, overrides);
        self
    }
}

/// Owns the active backend, the persistent settings and the history, and
/// turns caller requests into tasks.
pub struct TranslationOrchestrator {
    factory: BackendFactory,
    prompts: PromptBuilder,
    fetcher: Arc<dyn ModelFetcher>,
    backend: Option<SharedBackend>,
    backend_kind: Option<BackendKind>,
    settings: GenerationSettings,
    history: Arc<StdMutex<TranslationHistory>>,
    preview_chars: usize,
}

impl TranslationOrchestrator {
    pub fn new(config: &Config, runtime: Arc<dyn ModelRuntime>, fetcher: Arc<dyn ModelFetcher>) -> Self {
        Self {
            factory: BackendFactory::new(config.clone(), runtime, Arc::clone(&fetcher)),
            prompts: PromptBuilder::new(LanguageDirectory::builtin()),
            fetcher,
            backend: None,
            backend_kind: None,
            settings: config.generation.clone(),
            history: Arc::new(StdMutex::new(TranslationHistory::new(config.history.max_entries))),
            preview_chars: config.history.preview_chars,
        }
    }

    /// Wire up the Ollama runtime and the hub downloader from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let runtime = Arc::new(OllamaRuntime::new(&config.runtime)?);
        let fetcher = Arc::new(ModelDownloader::new(&config.download)?);
        Ok(Self::new(config, runtime, fetcher))
    }

    pub fn languages(&self) -> &LanguageDirectory {
        self.prompts.languages()
    }

    pub fn current_backend(&self) -> Option<BackendKind> {
        self.backend_kind
    }

    /// Replace the active backend with a fresh, unloaded one.
    ///
    /// Waits for any running load or translate on the old backend, and the
    /// old model is released before the new instance exists.
    pub async fn switch_backend(&mut self, kind: BackendKind) {
        if let Some(previous) = self.backend.take() {
            let mut backend = previous.lock().await;
            if backend.is_loaded() {
                info!("Unloading {} backend before switching", backend.kind());
            }
            backend.unload().await;
        }

        info!("Switching to {} backend", kind);
        self.backend = Some(Arc::new(Mutex::new(self.factory.create(kind))));
        self.backend_kind = Some(kind);
    }

    /// Exclusive access to the active backend, or `BackendBusy` if a task holds it.
    fn claim_backend(&self) -> Result<OwnedMutexGuard<Box<dyn InferenceBackend>>> {
        let backend = self.backend.clone().ok_or(SeedxError::NoBackend)?;
        backend.try_lock_owned().map_err(|_| SeedxError::BackendBusy)
    }

    pub fn load_model(&self, path: impl Into<PathBuf>, options: LoadOptions) -> Result<TaskHandle<ModelHandle>> {
        let mut backend = self.claim_backend()?;
        let path = path.into();

        Ok(TaskExecutor::spawn(TaskKind::Load, move |progress| async move {
            progress.report(format!("Loading model with {} backend...", backend.kind()));
            backend.load(&path, &options, &progress).await?;
            progress.report("Model loaded successfully");
            Ok(backend.describe())
        }))
    }

    /// A request carrying a snapshot of the current settings.
    pub fn request(&self, text: impl Into<String>, source_lang: &str, target_lang: &str) -> TranslationRequest {
        TranslationRequest {
            text: text.into(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            chain_of_thought: false,
            settings: self.settings.clone(),
        }
    }

    /// Translate on the active backend; a successful result is appended to history.
    pub fn translate(&self, request: TranslationRequest) -> Result<TaskHandle<String>> {
        let backend = self.claim_backend()?;
        if !backend.is_loaded() {
            return Err(SeedxError::NotLoaded);
        }

        let recorder = self.recorder();
        let prompt = self.prompts.prompt_for(
            &request.text,
            &request.source_lang,
            &request.target_lang,
            request.chain_of_thought,
            backend.kind(),
        );

        Ok(TaskExecutor::spawn(TaskKind::Translate, move |progress| async move {
            progress.report("Translating...");
            let outcome = backend.generate(&prompt, &request.settings).await;
            drop(backend);

            match outcome {
                TranslationOutcome::Translation(translation) => {
                    recorder.record(&request, &translation);
                    Ok(translation)
                }
                TranslationOutcome::Failure(reason) => Err(SeedxError::GenerationFailure(reason)),
            }
        }))
    }

    /// Translate several requests in order under one task. Failures are kept
    /// in place as outcomes; only successes reach history.
    pub fn translate_batch(&self, requests: Vec<TranslationRequest>) -> Result<TaskHandle<Vec<TranslationOutcome>>> {
        let backend = self.claim_backend()?;
        if !backend.is_loaded() {
            return Err(SeedxError::NotLoaded);
        }

        let recorder = self.recorder();
        let jobs: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let prompt = self.prompts.prompt_for(
                    &request.text,
                    &request.source_lang,
                    &request.target_lang,
                    request.chain_of_thought,
                    backend.kind(),
                );
                (request, prompt)
            })
            .collect();

        Ok(TaskExecutor::spawn(TaskKind::Translate, move |progress| async move {
            let total = jobs.len();
            let mut outcomes = Vec::with_capacity(total);

            for (idx, (request, prompt)) in jobs.into_iter().enumerate() {
                progress.report(format!("Translating {}/{}", idx + 1, total));
                let outcome = backend.generate(&prompt, &request.settings).await;
                match &outcome {
                    TranslationOutcome::Translation(translation) => recorder.record(&request, translation),
                    TranslationOutcome::Failure(reason) => warn!("Batch item {} failed: {}", idx + 1, reason),
                }
                outcomes.push(outcome);
            }
            Ok(outcomes)
        }))
    }

    /// Fetch a remote model; the result is the local path it landed in.
    pub fn download_model(&self, remote: RemoteModel) -> TaskHandle<PathBuf> {
        let fetcher = Arc::clone(&self.fetcher);
        TaskExecutor::spawn(TaskKind::Download, move |progress| async move {
            info!("Downloading {}", remote.repo_id);
            fetcher.fetch(&remote, &progress).await
        })
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Merge overrides into the persistent settings. Out-of-range values are
    /// rejected and leave the settings unchanged.
    pub fn update_settings(&mut self, overrides: &SettingsOverrides) -> Result<()> {
        let merged = GenerationSettings::merge(&self.settings, overrides);
        merged.validate()?;
        self.settings = merged;
        Ok(())
    }

    /// Current model, waiting for a running task to finish.
    pub async fn model_info(&self) -> Option<ModelHandle> {
        let backend = self.backend.as_ref()?;
        Some(backend.lock().await.describe())
    }

    pub async fn is_model_loaded(&self) -> bool {
        self.model_info().await.map(|handle| handle.loaded()).unwrap_or(false)
    }

    pub async fn unload_model(&self) {
        if let Some(backend) = &self.backend {
            backend.lock().await.unload().await;
        }
    }

    pub fn get_history(&self) -> Vec<HistoryEntry> {
        lock_history(&self.history).entries()
    }

    pub fn clear_history(&self) {
        lock_history(&self.history).clear();
        info!("History cleared");
    }

    pub fn save_history<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        lock_history(&self.history).save(path)
    }

    /// Replace the history with a file's contents. The file is parsed before
    /// anything changes.
    pub fn load_history<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let entries = TranslationHistory::read(&path)?;
        lock_history(&self.history).replace(entries);
        info!("History loaded from {}", path.as_ref().display());
        Ok(())
    }

    fn recorder(&self) -> HistoryRecorder {
        HistoryRecorder {
            history: Arc::clone(&self.history),
            languages: self.prompts.languages().clone(),
            preview_chars: self.preview_chars,
        }
    }
}

/// Appends finished translations to the orchestrator's history from inside a task.
struct HistoryRecorder {
    history: Arc<StdMutex<TranslationHistory>>,
    languages: LanguageDirectory,
    preview_chars: usize,
}

impl HistoryRecorder {
    fn record(&self, request: &TranslationRequest, translation: &str) {
        let entry = HistoryEntry::new(
            self.languages.name_for(&request.source_lang),
            self.languages.name_for(&request.target_lang),
            request.text.as_str(),
            translation,
            self.preview_chars,
        );
        lock_history(&self.history).push(entry);
    }
}

// A panic while holding the lock cannot leave the deque half-updated
fn lock_history(history: &StdMutex<TranslationHistory>) -> MutexGuard<'_, TranslationHistory> {
    history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
