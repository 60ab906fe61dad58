use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::RuntimeConfig;
use crate::error::{Result, SeedxError};
use super::{GenerationCall, ModelRuntime, ModelSource, Placement, TextModel};

/// `/api/create` body: weights are referenced by uploaded blob digest
#[derive(Debug, Clone, Serialize)]
struct CreateRequest {
    model: String,
    files: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    parameters: BTreeMap<String, serde_json::Value>,
    stream: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_thread: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_gpu: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    raw: bool,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<i64>,
    options: ModelOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Runtime backed by a local Ollama server.
///
/// Opening a model registers the weights with the server under a derived name
/// and then warms it up, so placement errors surface at load time rather than
/// on the first translation.
pub struct OllamaRuntime {
    client: Client,
    endpoint: String,
    accelerator: bool,
}

impl OllamaRuntime {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            accelerator: config.accelerator,
        })
    }

    async fn post<T: Serialize>(&self, route: &str, body: &T) -> Result<String> {
        post_json(&self.client, &self.endpoint, route, body).await
    }

    /// Upload a file as a blob unless the server already has it; returns its digest.
    async fn push_blob(&self, path: &Path) -> Result<String> {
        let digest = file_digest(path.to_path_buf()).await?;
        let url = format!("{}/api/blobs/{}", self.endpoint, digest);

        let existing = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| SeedxError::Runtime(format!("HTTP request failed: {}", e)))?;
        if existing.status().is_success() {
            debug!("Blob {} already present on model server", digest);
            return Ok(digest);
        }

        info!("Uploading {} to model server", path.display());
        let file = tokio::fs::File::open(path).await?;
        let response = self
            .client
            .post(&url)
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(|e| SeedxError::Runtime(format!("Blob upload failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| SeedxError::Runtime(format!("Failed to read model server response: {}", e)))?;
            return Err(SeedxError::Runtime(format!("Blob upload rejected {}: {}", status, text.trim())));
        }
        Ok(digest)
    }
}

/// `sha256:<hex>` digest of a file, computed off the async runtime.
async fn file_digest(path: PathBuf) -> Result<String> {
    let hashed = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    })
    .await
    .map_err(|e| SeedxError::Runtime(format!("Digest task failed: {}", e)))?;
    Ok(hashed?)
}

/// Files to upload for a source, keyed by the name the server should see.
/// Hidden files and partial downloads in a directory are skipped.
fn weight_files(source: &ModelSource, absolute: &Path) -> Result<Vec<(String, PathBuf)>> {
    let name_of = |path: &Path| path.file_name().map(|s| s.to_string_lossy().to_string());

    let files: Vec<(String, PathBuf)> = match source {
        ModelSource::PackedFile(_) => name_of(absolute)
            .map(|name| vec![(name, absolute.to_path_buf())])
            .unwrap_or_default(),
        ModelSource::Directory(_) => WalkDir::new(absolute)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| name_of(entry.path()).map(|name| (name, entry.into_path())))
            .filter(|(name, _)| !name.starts_with('.') && !name.ends_with(".part"))
            .collect(),
    };

    if files.is_empty() {
        return Err(SeedxError::Runtime(format!("No model files found at {}", absolute.display())));
    }
    Ok(files)
}

fn create_request(name: &str, files: BTreeMap<String, String>, placement: &Placement) -> CreateRequest {
    let mut parameters = BTreeMap::new();
    if let Some(ctx) = placement.context_size {
        parameters.insert("num_ctx".to_string(), serde_json::Value::from(ctx));
    }

    CreateRequest {
        model: name.to_string(),
        files,
        parameters,
        stream: false,
    }
}

async fn post_json<T: Serialize>(client: &Client, endpoint: &str, route: &str, body: &T) -> Result<String> {
    let url = format!("{}{}", endpoint, route);
    debug!("Sending model server request to: {}", url);

    let response = client
        .post(&url)
        .json(body)
        .send()
        .await
        .map_err(|e| SeedxError::Runtime(format!("HTTP request failed: {}", e)))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| SeedxError::Runtime(format!("Failed to read model server response: {}", e)))?;
    if !status.is_success() {
        return Err(SeedxError::Runtime(format!("Model server error {}: {}", status, text.trim())));
    }
    Ok(text)
}

/// Server-side model name for a path: `seedx-` plus the sanitized file stem.
pub fn model_name_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "model".to_string());

    let sanitized: String = stem
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '-' })
        .collect();

    format!("seedx-{}", sanitized.trim_matches('-'))
}

fn placement_options(placement: &Placement) -> ModelOptions {
    ModelOptions {
        num_ctx: placement.context_size,
        num_thread: placement.threads,
        num_gpu: placement.gpu_layers.filter(|layers| *layers >= 0),
        seed: placement.seed.filter(|seed| *seed >= 0),
        ..Default::default()
    }
}

#[async_trait]
impl ModelRuntime for OllamaRuntime {
    async fn open(&self, source: ModelSource, placement: Placement) -> Result<Box<dyn TextModel>> {
        let absolute = std::fs::canonicalize(source.path())?;
        let name = model_name_for(&absolute);

        let mut files = BTreeMap::new();
        for (filename, path) in weight_files(&source, &absolute)? {
            let digest = self.push_blob(&path).await?;
            files.insert(filename, digest);
        }

        info!("Registering {} with model server as {}", absolute.display(), name);
        self.post("/api/create", &create_request(&name, files, &placement))
            .await?;

        let options = placement_options(&placement);
        info!(
            "Warming up {} (n_ctx={:?}, gpu_layers={:?}, threads={:?})",
            name, placement.context_size, placement.gpu_layers, placement.threads
        );
        self.post(
            "/api/generate",
            &GenerateRequest {
                model: name.clone(),
                prompt: String::new(),
                raw: true,
                stream: false,
                keep_alive: None,
                options: options.clone(),
            },
        )
        .await?;

        Ok(Box::new(OllamaModel {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            name,
            options,
        }))
    }

    fn accelerator_available(&self) -> bool {
        self.accelerator
    }
}

struct OllamaModel {
    client: Client,
    endpoint: String,
    name: String,
    options: ModelOptions,
}

#[async_trait]
impl TextModel for OllamaModel {
    async fn generate(&self, call: GenerationCall) -> Result<String> {
        let settings = &call.settings;
        let options = ModelOptions {
            num_predict: Some(call.max_tokens),
            temperature: Some(settings.temperature),
            top_p: Some(settings.top_p),
            // Greedy decoding ignores the sampling window
            top_k: Some(if settings.is_greedy() { 1 } else { settings.top_k }),
            repeat_penalty: Some(settings.repeat_penalty),
            stop: call.stop.clone(),
            ..self.options.clone()
        };

        let body = post_json(
            &self.client,
            &self.endpoint,
            "/api/generate",
            &GenerateRequest {
                model: self.name.clone(),
                prompt: call.prompt.clone(),
                raw: true,
                stream: false,
                keep_alive: None,
                options,
            },
        )
        .await?;

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| SeedxError::Runtime(format!("Failed to parse response: {}", e)))?;

        debug!("Raw model response: {}", parsed.response);

        if call.echo_prompt {
            Ok(format!("{}{}", call.prompt, parsed.response))
        } else {
            Ok(parsed.response)
        }
    }

    async fn release(&self) -> Result<()> {
        let request = GenerateRequest {
            model: self.name.clone(),
            prompt: String::new(),
            raw: true,
            stream: false,
            keep_alive: Some(0),
            options: ModelOptions::default(),
        };

        if let Err(e) = post_json(&self.client, &self.endpoint, "/api/generate", &request).await {
            warn!("Failed to release {}: {}", self.name, e);
            return Err(e);
        }
        info!("Released {}", self.name);
        Ok(())
    }
}
