//! Seedx - Dual-backend Translation Orchestrator
//!
//! Command-line entry point: loads a model on the chosen backend, translates
//! text, manages downloads and history files.

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use seedx::backend::{BackendKind, LoadOptions, TranslationOutcome};
use seedx::catalog;
use seedx::cli::{Args, Commands, ConfigAction, HistoryAction};
use seedx::config::Config;
use seedx::download::{ModelDownloader, REQUIRED_FILES, RemoteModel};
use seedx::history::TranslationHistory;
use seedx::language::LanguageDirectory;
use seedx::orchestrator::{TranslationOrchestrator, TranslationRequest};
use seedx::task::ProgressReporter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;
    info!("Starting Seedx translation orchestrator");

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Translate { backend, model, from, to, cot, text, lines, history, sampling } => {
            let models_dir = PathBuf::from(&config.download.models_dir);
            let model_path = match model {
                Some(path) => path,
                None => catalog::preferred_model(&models_dir, &config.quantized.unstable_format_marker)
                    .ok_or_else(|| anyhow!(
                        "No model given and no packed model found under {}. Run `seedx download --variant Q4_K_M` first.",
                        models_dir.display()
                    ))?,
            };
            let kind = backend.unwrap_or_else(|| BackendKind::for_path(&model_path));

            let mut orchestrator = TranslationOrchestrator::from_config(&config)?;
            orchestrator.update_settings(&sampling.overrides())?;
            if let Some(history_path) = &history {
                if history_path.exists() {
                    orchestrator.load_history(history_path)?;
                }
            }

            let input = match text {
                Some(text) => text,
                None => read_stdin()?,
            };
            if input.trim().is_empty() {
                bail!("Nothing to translate");
            }

            orchestrator.switch_backend(kind).await;
            let pb = spinner(format!("Loading {}", model_path.display()))?;
            let loaded = orchestrator
                .load_model(&model_path, LoadOptions::default())?
                .wait_with(|message| pb.set_message(message.to_string()))
                .await;
            pb.finish_and_clear();
            let handle = loaded?;
            info!("Model ready on {} ({} backend)", handle.device, handle.backend_kind);

            let pb = spinner("Translating")?;
            if lines {
                let requests = input
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(|line| build_request(&orchestrator, line, &from, &to, cot))
                    .collect();
                let outcomes = orchestrator
                    .translate_batch(requests)?
                    .wait_with(|message| pb.set_message(message.to_string()))
                    .await;
                pb.finish_and_clear();

                for outcome in outcomes? {
                    match outcome {
                        TranslationOutcome::Translation(translation) => println!("{}", translation),
                        TranslationOutcome::Failure(reason) => {
                            warn!("Line failed: {}", reason);
                            println!();
                        }
                    }
                }
            } else {
                let request = build_request(&orchestrator, input.trim(), &from, &to, cot);
                let translation = orchestrator
                    .translate(request)?
                    .wait_with(|message| pb.set_message(message.to_string()))
                    .await;
                pb.finish_and_clear();
                println!("{}", translation?);
            }

            if let Some(history_path) = &history {
                orchestrator.save_history(history_path)?;
            }
            orchestrator.unload_model().await;
        }
        Commands::Download { variant, repo, file } => {
            let remote = match (variant, repo) {
                (Some(name), _) => catalog::find_variant(&name)
                    .map(|v| v.remote())
                    .ok_or_else(|| anyhow!(
                        "Unknown variant '{}'. Available: {}",
                        name,
                        catalog::VARIANTS.iter().map(|v| v.name).collect::<Vec<_>>().join(", ")
                    ))?,
                (None, Some(repo)) => match file {
                    Some(file) => RemoteModel::file(repo, file),
                    None => RemoteModel::snapshot(repo),
                },
                (None, None) => bail!("Specify --variant or --repo"),
            };

            let orchestrator = TranslationOrchestrator::from_config(&config)?;
            let pb = spinner(format!("Downloading {}", remote.repo_id))?;
            let result = orchestrator
                .download_model(remote)
                .wait_with(|message| pb.set_message(message.to_string()))
                .await;
            pb.finish_and_clear();

            let path = result?;
            println!("Downloaded to {}", path.display());
            println!("Use with: --backend {} --model {}", BackendKind::for_path(&path), path.display());
        }
        Commands::Repair { dir, repo } => {
            let repo = repo.unwrap_or_else(|| config.full_precision.repo_id.clone());
            info!("Checking {} for missing files from {}", dir.display(), repo);

            let downloader = ModelDownloader::new(&config.download)?;
            let pb = spinner(format!("Checking {}", dir.display()))?;
            let reporter = {
                let pb = pb.clone();
                ProgressReporter::new(move |message| pb.set_message(message))
            };
            let report = downloader.fetch_missing(&repo, &dir, REQUIRED_FILES, &reporter).await;
            pb.finish_and_clear();
            let report = report?;

            println!("Present:    {}", report.present.len());
            println!("Downloaded: {}", report.downloaded.len());
            for (file, error) in &report.failed {
                println!("Failed:     {} ({})", file, error);
            }
            if !report.failed.is_empty() {
                bail!("{} files could not be downloaded", report.failed.len());
            }
        }
        Commands::Models => {
            let models_dir = PathBuf::from(&config.download.models_dir);
            let downloader = ModelDownloader::new(&config.download)?;

            println!("\nDownloadable Models:");
            println!("{:<10} {:<8} {:<16} {:<10} {:<40}", "Name", "Size", "Backend", "Status", "Description");
            println!("{}", "-".repeat(86));
            for variant in catalog::VARIANTS {
                let status = if downloader.default_destination(&variant.remote()).exists() {
                    "Downloaded"
                } else {
                    "Missing"
                };
                println!(
                    "{:<10} {:<8} {:<16} {:<10} {:<40}",
                    variant.name,
                    variant.approx_size,
                    variant.backend_kind().to_string(),
                    status,
                    variant.description
                );
            }

            let local = catalog::scan_local(&models_dir);
            println!("\nLocal Models in {}:", models_dir.display());
            if local.is_empty() {
                println!("No models found.");
            }
            for model in local {
                println!(
                    "{:<16} {:>10.1} MB  {}",
                    model.backend_kind.to_string(),
                    model.size as f64 / 1024.0 / 1024.0,
                    model.path.display()
                );
            }
        }
        Commands::Languages => {
            println!("{:<20} {:<5}", "Language", "Code");
            println!("{}", "-".repeat(26));
            for entry in LanguageDirectory::builtin().entries() {
                println!("{:<20} {:<5}", entry.name, entry.code);
            }
        }
        Commands::History { action } => match action {
            HistoryAction::Show { file, full } => {
                let entries = TranslationHistory::read(&file)?;
                if entries.is_empty() {
                    println!("No history entries.");
                }
                for entry in entries {
                    let (input, output) = if full {
                        (entry.full_input, entry.full_output)
                    } else {
                        (entry.input, entry.output)
                    };
                    println!("[{}] {} -> {}", entry.timestamp, entry.source_lang, entry.target_lang);
                    println!("  {}", input);
                    println!("  {}", output);
                }
            }
            HistoryAction::Clear { file } => {
                TranslationHistory::new(config.history.max_entries).save(&file)?;
                println!("Cleared history in {}", file.display());
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    bail!("{} already exists; pass --force to overwrite", path.display());
                }
                Config::default().save_to_file(&path)?;
                println!("Wrote default configuration to {}", path.display());
            }
        },
    }

    info!("Seedx finished successfully");
    Ok(())
}

fn build_request(orchestrator: &TranslationOrchestrator, text: &str, from: &str, to: &str, cot: bool) -> TranslationRequest {
    let mut request = orchestrator.request(text, from, to);
    request.chain_of_thought = cot;
    request
}

/// `--config`, else `./seedx.toml` when present, else defaults
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("seedx.toml").exists() {
                info!("Found seedx.toml in current directory, loading...");
                Config::from_file("seedx.toml")?
            } else {
                Config::default()
            }
        }
    };
    Ok(config)
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    Ok(input)
}

fn spinner(message: impl Into<String>) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let seedx_dir = std::env::current_dir()?.join(".seedx");
    let log_dir = seedx_dir.join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "seedx.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer);

    subscriber
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("seedx.log").display()
    );

    Ok(())
}
