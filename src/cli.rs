use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::backend::BackendKind;
use crate::settings::SettingsOverrides;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate text with a local model
    Translate {
        /// Backend to run: quantized or full-precision (guessed from the model path if omitted)
        #[arg(short, long)]
        backend: Option<BackendKind>,

        /// Packed model file or model directory (defaults to the best packed model under models_dir)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Source language name or code
        #[arg(long, default_value = "English")]
        from: String,

        /// Target language name or code
        #[arg(long, default_value = "Chinese")]
        to: String,

        /// Ask for a detailed explanation along with the translation
        #[arg(long)]
        cot: bool,

        /// Text to translate; read from stdin when omitted
        #[arg(short, long)]
        text: Option<String>,

        /// Translate every non-empty line as its own request
        #[arg(long)]
        lines: bool,

        /// Append results to this history file
        #[arg(long)]
        history: Option<PathBuf>,

        #[command(flatten)]
        sampling: SamplingArgs,
    },

    /// Download a model variant (Q4_K_M, Q5_K_M, Q8_0, original) or any repository
    Download {
        /// Variant name from the catalog
        #[arg(short = 'V', long, conflicts_with = "repo")]
        variant: Option<String>,

        /// Repository id on the model hub
        #[arg(short, long)]
        repo: Option<String>,

        /// Single file to fetch from the repository
        #[arg(short, long, requires = "repo")]
        file: Option<String>,
    },

    /// Fetch the config and tokenizer files missing from a model directory
    Repair {
        /// Model directory to repair
        #[arg(short, long)]
        dir: PathBuf,

        /// Repository to fetch from (defaults to the configured full-precision repository)
        #[arg(short, long)]
        repo: Option<String>,
    },

    /// List downloadable variants and models already on disk
    Models,

    /// List supported languages and their codes
    Languages,

    /// Inspect or clear a history file
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum HistoryAction {
    /// Print the entries of a history file
    Show {
        #[arg(short, long)]
        file: PathBuf,

        /// Print full texts instead of previews
        #[arg(long)]
        full: bool,
    },

    /// Empty a history file
    Clear {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write the default configuration
    Init {
        #[arg(short, long, default_value = "seedx.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Generation overrides accepted on the command line.
#[derive(ClapArgs, Debug, Default)]
pub struct SamplingArgs {
    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f64>,

    #[arg(long)]
    pub top_p: Option<f64>,

    #[arg(long)]
    pub top_k: Option<u32>,

    #[arg(long)]
    pub repeat_penalty: Option<f64>,
}

impl SamplingArgs {
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            repeat_penalty: self.repeat_penalty,
            stop_sequences: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_translate() {
        let args = Args::try_parse_from([
            "seedx", "translate", "--backend", "full-precision", "--to", "pl", "--text", "Hello",
            "--temperature", "0",
        ])
        .unwrap();

        match args.command {
            Commands::Translate { backend, to, text, sampling, .. } => {
                assert_eq!(backend, Some(BackendKind::FullPrecision));
                assert_eq!(to, "pl");
                assert_eq!(text.as_deref(), Some("Hello"));
                assert_eq!(sampling.overrides().temperature, Some(0.0));
                assert!(sampling.overrides().max_tokens.is_none());
            }
            _ => panic!("expected translate"),
        }
    }

    #[test]
    fn test_download_file_requires_repo() {
        assert!(Args::try_parse_from(["seedx", "download", "--file", "x.gguf"]).is_err());
        assert!(Args::try_parse_from(["seedx", "download", "--variant", "Q4_K_M", "--repo", "a/b"]).is_err());
        assert!(Args::try_parse_from(["seedx", "download", "--repo", "a/b", "--file", "x.gguf"]).is_ok());
    }
}
