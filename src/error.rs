use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeedxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model file not found: {0}")]
    ModelFileNotFound(String),

    #[error("Unsupported model format: {0}")]
    UnsupportedModelFormat(String),

    #[error("Model loading failed: {0}")]
    LoadFailure(String),

    #[error("Download failed: {0}")]
    DownloadFailure(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Model runtime error: {0}")]
    Runtime(String),

    #[error("Model not loaded. Please load a model first.")]
    NotLoaded,

    #[error("No backend selected")]
    NoBackend,

    #[error("Backend is busy with another load or translate task")]
    BackendBusy,

    #[error("{kind} task failed: {message}")]
    TaskFailed { kind: String, message: String },

    #[error("Task ended without reporting a result")]
    TaskAborted,

    #[error("History error: {0}")]
    History(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SeedxError>;
