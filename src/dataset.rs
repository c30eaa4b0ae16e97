//! Dataset discovery and active-dataset selection.
//!
//! A dataset is a regular file placed directly inside `dataset.dir` whose
//! extension (case-insensitive) appears in `dataset.extensions`.
//! Subdirectories are not scanned. The *active* dataset is the one modified
//! most recently; when two files share a modification time the
//! lexicographically greatest file name wins, so selection never depends on
//! directory listing order.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::DatasetConfig;
use crate::error::{PipelineError, Result};

/// A candidate dataset file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub path: PathBuf,
    /// File name without directory.
    pub name: String,
    pub modified: DateTime<Utc>,
    pub size_bytes: u64,
}

/// List candidate datasets, sorted by file name.
///
/// A missing dataset directory is [`PipelineError::DatasetNotFound`]; an
/// existing but empty directory yields an empty list.
pub fn discover(config: &DatasetConfig) -> Result<Vec<Dataset>> {
    let dir = &config.dir;
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::DatasetNotFound {
        message: format!("cannot read dataset directory {}: {}", dir.display(), e),
    })?;

    let mut datasets = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::DatasetNotFound {
            message: format!("cannot list dataset directory {}: {}", dir.display(), e),
        })?;
        let path = entry.path();
        if !has_allowed_extension(&path, &config.extensions) {
            continue;
        }
        // Entries that vanish or turn out not to be files are skipped.
        let metadata = match std::fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let name = entry.file_name().to_string_lossy().to_string();

        datasets.push(Dataset {
            path,
            name,
            modified: DateTime::<Utc>::from(modified),
            size_bytes: metadata.len(),
        });
    }

    datasets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(datasets)
}

/// Pick the most recently modified dataset.
pub fn select_active(candidates: Vec<Dataset>) -> Option<Dataset> {
    candidates
        .into_iter()
        .max_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)))
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    let ext = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
        None => return false,
    };
    extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}
