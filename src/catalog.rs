//! Downloadable model variants and discovery of models already on disk.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::backend::BackendKind;
use crate::download::RemoteModel;

/// Packed repository holding the quantized variants
pub const PACKED_REPO: &str = "Mungert/Seed-X-PPO-7B-GGUF";
/// Repository holding the full-precision snapshot
pub const FULL_PRECISION_REPO: &str = "ByteDance-Seed/Seed-X-PPO-7B";
/// Packed file picked first when present
pub const PREFERRED_FILE: &str = "Seed-X-PPO-7B-q4_k_m.gguf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelVariant {
    pub name: &'static str,
    pub repo_id: &'static str,
    /// `None` for a whole-repository snapshot
    pub filename: Option<&'static str>,
    pub approx_size: &'static str,
    pub description: &'static str,
}

impl ModelVariant {
    pub fn remote(&self) -> RemoteModel {
        match self.filename {
            Some(filename) => RemoteModel::file(self.repo_id, filename),
            None => RemoteModel::snapshot(self.repo_id),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.filename {
            Some(filename) => BackendKind::for_path(Path::new(filename)),
            None => BackendKind::FullPrecision,
        }
    }
}

pub const VARIANTS: &[ModelVariant] = &[
    ModelVariant {
        name: "Q4_K_M",
        repo_id: PACKED_REPO,
        filename: Some("Seed-X-PPO-7B-q4_k_m.gguf"),
        approx_size: "4.6GB",
        description: "Recommended balance of quality and speed",
    },
    ModelVariant {
        name: "Q5_K_M",
        repo_id: PACKED_REPO,
        filename: Some("Seed-X-PPO-7B-q5_k_m.gguf"),
        approx_size: "5.4GB",
        description: "Better quality, slower",
    },
    ModelVariant {
        name: "Q8_0",
        repo_id: PACKED_REPO,
        filename: Some("Seed-X-PPO-7B-q8_0.gguf"),
        approx_size: "8.0GB",
        description: "Best quality, requires more RAM",
    },
    ModelVariant {
        name: "original",
        repo_id: FULL_PRECISION_REPO,
        filename: None,
        approx_size: "15GB",
        description: "Full precision",
    },
];

/// Case-insensitive lookup by variant name.
pub fn find_variant(name: &str) -> Option<&'static ModelVariant> {
    VARIANTS.iter().find(|v| v.name.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalModel {
    pub path: PathBuf,
    pub backend_kind: BackendKind,
    /// File size, or the summed size of the directory's files
    pub size: u64,
}

/// Packed files and model directories (anything holding a `config.json`)
/// under `models_dir`, sorted by path.
pub fn scan_local(models_dir: &Path) -> Vec<LocalModel> {
    let mut models = Vec::new();

    for entry in WalkDir::new(models_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if entry.file_type().is_file() && BackendKind::for_path(path) == BackendKind::Quantized {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            models.push(LocalModel {
                path: path.to_path_buf(),
                backend_kind: BackendKind::Quantized,
                size,
            });
        } else if entry.file_type().is_dir() && path.join("config.json").is_file() {
            models.push(LocalModel {
                path: path.to_path_buf(),
                backend_kind: BackendKind::FullPrecision,
                size: dir_size(path),
            });
        }
    }

    models.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Found {} local models under {}", models.len(), models_dir.display());
    models
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// The packed model to open when none is named: the preferred Q4_K_M file if
/// it looks complete, else the largest packed file that is not in the
/// unstable format.
pub fn preferred_model(models_dir: &Path, unstable_marker: &str) -> Option<PathBuf> {
    let preferred = models_dir.join(PREFERRED_FILE);
    if preferred.metadata().map(|m| m.len() > 1024).unwrap_or(false) {
        return Some(preferred);
    }

    let marker = unstable_marker.to_lowercase();
    scan_local(models_dir)
        .into_iter()
        .filter(|m| m.backend_kind == BackendKind::Quantized)
        .filter(|m| {
            if marker.is_empty() {
                return true;
            }
            let name = m.path.file_name().map(|n| n.to_string_lossy().to_lowercase());
            !name.map(|n| n.contains(&marker)).unwrap_or(false)
        })
        .max_by_key(|m| m.size)
        .map(|m| m.path)
}
