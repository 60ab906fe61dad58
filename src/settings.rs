//! Sampling parameters and their override semantics.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeedxError};

/// Sampling parameters handed to a backend for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub repeat_penalty: f64,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.1,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.1,
            stop_sequences: vec!["</s>".to_string(), "\n\n".to_string()],
        }
    }
}

/// A partial set of settings; every `Some` field replaces the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsOverrides {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
}

impl SettingsOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl GenerationSettings {
    /// Right-biased merge: fields present in `overrides` win, the rest are kept.
    pub fn merge(base: &GenerationSettings, overrides: &SettingsOverrides) -> GenerationSettings {
        GenerationSettings {
            max_tokens: overrides.max_tokens.unwrap_or(base.max_tokens),
            temperature: overrides.temperature.unwrap_or(base.temperature),
            top_p: overrides.top_p.unwrap_or(base.top_p),
            top_k: overrides.top_k.unwrap_or(base.top_k),
            repeat_penalty: overrides.repeat_penalty.unwrap_or(base.repeat_penalty),
            stop_sequences: overrides
                .stop_sequences
                .clone()
                .unwrap_or_else(|| base.stop_sequences.clone()),
        }
    }

    /// Check every parameter against the range the backends accept.
    pub fn validate(&self) -> Result<()> {
        fn check(name: &str, ok: bool, range: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(SeedxError::Config(format!("{} must be in {}", name, range)))
            }
        }

        check("max_tokens", (1..=2048).contains(&self.max_tokens), "[1, 2048]")?;
        check("temperature", (0.0..=2.0).contains(&self.temperature), "[0, 2]")?;
        check("top_p", (0.0..=1.0).contains(&self.top_p), "[0, 1]")?;
        check("top_k", (1..=100).contains(&self.top_k), "[1, 100]")?;
        check("repeat_penalty", (0.0..=2.0).contains(&self.repeat_penalty), "[0, 2]")?;
        Ok(())
    }

    /// Zero temperature means greedy decoding.
    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }
}
