use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::DownloadConfig;
use crate::error::{Result, SeedxError};
use crate::task::ProgressReporter;

/// Files a full-precision model directory needs before it can be opened.
pub const REQUIRED_FILES: &[&str] = &[
    "config.json",
    "generation_config.json",
    "model.safetensors",
    "tokenizer.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
    "tokenizer.model",
];

/// Present in a snapshot directory until every file has arrived
pub const INCOMPLETE_MARKER: &str = ".seedx-incomplete";

/// A snapshot directory that was never fully downloaded.
pub fn snapshot_incomplete(dir: &Path) -> bool {
    !dir.join("config.json").is_file() || dir.join(INCOMPLETE_MARKER).exists()
}

/// A repository on the model hub, optionally narrowed to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteModel {
    pub repo_id: String,
    /// Specific file (a quantization variant); `None` fetches the whole snapshot
    pub filename: Option<String>,
}

impl RemoteModel {
    pub fn snapshot(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: None,
        }
    }

    pub fn file(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: Some(filename.into()),
        }
    }

    /// Last path segment of the repository id
    pub fn repo_name(&self) -> &str {
        self.repo_id.rsplit('/').next().unwrap_or(&self.repo_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub present: Vec<String>,
    pub downloaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Fetches models from a remote repository.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Fetch into the default location and return the local path
    async fn fetch(&self, remote: &RemoteModel, progress: &ProgressReporter) -> Result<PathBuf>;

    /// Fetch a whole repository snapshot into `dest`
    async fn fetch_snapshot(&self, repo_id: &str, dest: &Path, progress: &ProgressReporter) -> Result<PathBuf>;
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<RepoFile>,
}

#[derive(Debug, Deserialize)]
struct RepoFile {
    rfilename: String,
}

/// Downloads files from a Hugging Face compatible hub.
pub struct ModelDownloader {
    client: Client,
    hub_endpoint: String,
    models_dir: PathBuf,
}

impl ModelDownloader {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            hub_endpoint: config.hub_endpoint.trim_end_matches('/').to_string(),
            models_dir: PathBuf::from(&config.models_dir),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Where a remote model lands when no destination is given.
    pub fn default_destination(&self, remote: &RemoteModel) -> PathBuf {
        match &remote.filename {
            Some(filename) => self.models_dir.join(filename),
            None => self.models_dir.join(remote.repo_name()),
        }
    }

    fn file_url(&self, repo_id: &str, filename: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.hub_endpoint, repo_id, filename)
    }

    /// List every file in a repository.
    pub async fn list_repo_files(&self, repo_id: &str) -> Result<Vec<String>> {
        let url = format!("{}/api/models/{}", self.hub_endpoint, repo_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SeedxError::DownloadFailure(format!("Failed to query {}: {}", repo_id, e)))?;

        if !response.status().is_success() {
            return Err(SeedxError::DownloadFailure(format!(
                "Failed to query repository {}: HTTP {}",
                repo_id,
                response.status()
            )));
        }

        let info: RepoInfo = response
            .json()
            .await
            .map_err(|e| SeedxError::DownloadFailure(format!("Invalid repository listing: {}", e)))?;

        Ok(info.siblings.into_iter().map(|f| f.rfilename).collect())
    }

    /// Download one file from a repository into `dest_dir`.
    pub async fn fetch_file(
        &self,
        repo_id: &str,
        filename: &str,
        dest_dir: &Path,
        progress: &ProgressReporter,
    ) -> Result<PathBuf> {
        let local_path = dest_dir.join(filename);
        if let Some(parent) = local_path.parent() {
            async_fs::create_dir_all(parent).await?;
        }

        progress.report(format!("Downloading {}...", filename));
        let response = self
            .client
            .get(self.file_url(repo_id, filename))
            .send()
            .await
            .map_err(|e| SeedxError::DownloadFailure(format!("{}: {}", filename, e)))?;

        if !response.status().is_success() {
            return Err(SeedxError::DownloadFailure(format!(
                "Failed to download {} from {}: HTTP {}",
                filename,
                repo_id,
                response.status()
            )));
        }

        let mut temp_path = local_path.clone().into_os_string();
        temp_path.push(".part");
        let temp_path = PathBuf::from(temp_path);

        let downloaded = match stream_to_file(response, &temp_path, filename, progress).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = async_fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };
        async_fs::rename(&temp_path, &local_path).await?;

        info!("Downloaded {} ({} bytes) to {}", filename, downloaded, local_path.display());
        Ok(local_path)
    }

    /// Fetch only the required files missing from `dir`; per-file failures are
    /// collected instead of aborting.
    pub async fn fetch_missing(
        &self,
        repo_id: &str,
        dir: &Path,
        files: &[&str],
        progress: &ProgressReporter,
    ) -> Result<RepairReport> {
        async_fs::create_dir_all(dir).await?;
        let mut report = RepairReport::default();

        for filename in files {
            if dir.join(filename).exists() {
                report.present.push(filename.to_string());
                continue;
            }

            info!("Missing file: {}", filename);
            match self.fetch_file(repo_id, filename, dir, progress).await {
                Ok(_) => report.downloaded.push(filename.to_string()),
                Err(e) => {
                    warn!("Failed to download {}: {}", filename, e);
                    report.failed.push((filename.to_string(), e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

async fn stream_to_file(
    mut response: reqwest::Response,
    path: &Path,
    filename: &str,
    progress: &ProgressReporter,
) -> Result<u64> {
    let total = response.content_length().unwrap_or(0);
    let mut file = async_fs::File::create(path).await?;
    let mut downloaded: u64 = 0;
    let mut last_percent = 0;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| SeedxError::DownloadFailure(format!("{}: {}", filename, e)))?
    {
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if total > 0 {
            let percent = downloaded * 100 / total;
            if percent >= last_percent + 5 {
                last_percent = percent;
                progress.report(format!("Downloading {}: {}%", filename, percent));
            }
        }
    }

    file.flush().await?;
    Ok(downloaded)
}

#[async_trait]
impl ModelFetcher for ModelDownloader {
    async fn fetch(&self, remote: &RemoteModel, progress: &ProgressReporter) -> Result<PathBuf> {
        async_fs::create_dir_all(&self.models_dir).await?;

        let path = match &remote.filename {
            Some(filename) => {
                self.fetch_file(&remote.repo_id, filename, &self.models_dir, progress)
                    .await?
            }
            None => {
                let dest = self.default_destination(remote);
                self.fetch_snapshot(&remote.repo_id, &dest, progress).await?
            }
        };

        if !path.exists() {
            return Err(SeedxError::DownloadFailure(format!(
                "Download path not found: {}",
                path.display()
            )));
        }
        Ok(path)
    }

    async fn fetch_snapshot(&self, repo_id: &str, dest: &Path, progress: &ProgressReporter) -> Result<PathBuf> {
        progress.report(format!("Downloading repository {}...", repo_id));
        let files = self.list_repo_files(repo_id).await?;
        if files.is_empty() {
            return Err(SeedxError::DownloadFailure(format!("Repository {} has no files", repo_id)));
        }

        async_fs::create_dir_all(dest).await?;
        let marker = dest.join(INCOMPLETE_MARKER);
        async_fs::write(&marker, repo_id).await?;
        for (idx, filename) in files.iter().enumerate() {
            if dest.join(filename).exists() {
                continue;
            }
            progress.report(format!("[{}/{}] {}", idx + 1, files.len(), filename));
            self.fetch_file(repo_id, filename, dest, progress).await?;
        }
        async_fs::remove_file(&marker).await?;

        info!("Repository {} downloaded to {}", repo_id, dest.display());
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader() -> ModelDownloader {
        downloader_at("https://hub.example/")
    }

    fn downloader_at(endpoint: &str) -> ModelDownloader {
        ModelDownloader::new(&DownloadConfig {
            hub_endpoint: endpoint.to_string(),
            models_dir: "models".to_string(),
            user_agent: "test".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_default_destination() {
        let downloader = downloader();
        assert_eq!(
            downloader.default_destination(&RemoteModel::file("Mungert/Seed-X-PPO-7B-GGUF", "a.gguf")),
            PathBuf::from("models/a.gguf")
        );
        assert_eq!(
            downloader.default_destination(&RemoteModel::snapshot("ByteDance-Seed/Seed-X-PPO-7B")),
            PathBuf::from("models/Seed-X-PPO-7B")
        );
    }

    #[test]
    fn test_file_url() {
        assert_eq!(
            downloader().file_url("org/repo", "tokenizer.json"),
            "https://hub.example/org/repo/resolve/main/tokenizer.json"
        );
    }

    #[tokio::test]
    async fn test_fetch_missing_skips_present_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in REQUIRED_FILES {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }

        let report = downloader()
            .fetch_missing("org/repo", dir.path(), REQUIRED_FILES, &ProgressReporter::silent())
            .await
            .unwrap();

        assert_eq!(report.present.len(), REQUIRED_FILES.len());
        assert!(report.downloaded.is_empty());
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_snapshot_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("Seed-X-PPO-7B");
        assert!(snapshot_incomplete(&snapshot));

        std::fs::create_dir_all(&snapshot).unwrap();
        assert!(snapshot_incomplete(&snapshot));

        std::fs::write(snapshot.join("config.json"), b"{}").unwrap();
        assert!(!snapshot_incomplete(&snapshot));

        std::fs::write(snapshot.join(INCOMPLETE_MARKER), b"org/repo").unwrap();
        assert!(snapshot_incomplete(&snapshot));
    }

    #[tokio::test]
    async fn test_truncated_download_removes_partial_file() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        // Promises more bytes than it sends, then hangs up
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\npartial")
                .await
                .unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let result = downloader_at(&format!("http://{}", addr))
            .fetch_file("org/repo", "model.safetensors", dir.path(), &ProgressReporter::silent())
            .await;
        server.await.unwrap();

        assert!(matches!(result, Err(SeedxError::DownloadFailure(_))));
        assert!(!dir.path().join("model.safetensors").exists());
        assert!(!dir.path().join("model.safetensors.part").exists());
    }
}
