use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{Result, SeedxError};
use crate::settings::GenerationSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub quantized: QuantizedConfig,
    pub full_precision: FullPrecisionConfig,
    pub generation: GenerationSettings,
    pub history: HistoryConfig,
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Model server endpoint URL
    pub endpoint: String,
    /// Request timeout for generation and load calls (seconds)
    pub timeout_secs: u64,
    /// Whether the model server has an accelerator to place weights on
    pub accelerator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizedConfig {
    /// Context window size
    pub context_size: u32,
    /// Number of CPU threads
    pub threads: u32,
    /// Layers offloaded to the accelerator: -1 = all, 0 = CPU only
    pub gpu_layers: i32,
    /// Random seed (-1 for random)
    pub seed: i64,
    /// Context window used by the CPU-only retry
    pub fallback_context_size: u32,
    /// Threads used by the CPU-only retry
    pub fallback_threads: u32,
    /// Filename token of a numeric format that crashes the runtime
    pub unstable_format_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FullPrecisionConfig {
    /// Repository fetched when the model directory is missing
    pub repo_id: String,
    /// Decode cap grows by this many tokens per input character
    pub length_multiplier: usize,
    /// Decode cap never drops below this many tokens
    pub min_new_tokens: usize,
    /// Place weights on the accelerator when one is available
    pub prefer_accelerator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of remembered translations
    pub max_entries: usize,
    /// Characters kept in input/output previews
    pub preview_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Model hub base URL
    pub hub_endpoint: String,
    /// Local directory downloads land in
    pub models_dir: String,
    /// User agent sent to the hub
    pub user_agent: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            timeout_secs: 600,
            accelerator: true,
        }
    }
}

impl Default for QuantizedConfig {
    fn default() -> Self {
        Self {
            context_size: 2048,
            threads: 8,
            gpu_layers: -1,
            seed: -1,
            fallback_context_size: 1024,
            fallback_threads: 4,
            unstable_format_marker: "bf16".to_string(),
        }
    }
}

impl Default for FullPrecisionConfig {
    fn default() -> Self {
        Self {
            repo_id: "ByteDance-Seed/Seed-X-PPO-7B".to_string(),
            length_multiplier: 2,
            min_new_tokens: 150,
            prefer_accelerator: true,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            preview_chars: 50,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            hub_endpoint: "https://huggingface.co".to_string(),
            models_dir: "models".to_string(),
            user_agent: concat!("seedx/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SeedxError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| SeedxError::Config(format!("Failed to parse config file: {}", e)))?;

        config.generation.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SeedxError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SeedxError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}
