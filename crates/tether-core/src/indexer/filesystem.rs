//! Filesystem scanning helpers for indexing passes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::IngestConfig;

pub const IGNORE_FILE_NAME: &str = ".tetherignore";

/// Stub files (`.pyi`) share their module's name and are not indexed.
const PYTHON_EXTENSION: &str = "py";

/// A discovered source file, ready to be read and parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceCandidate {
    pub path: PathBuf,
    /// Forward-slash path relative to the repository root.
    pub relative_path: String,
    pub size_bytes: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ScanResult {
    pub files: Vec<SourceCandidate>,
    /// Relative paths over the size cap.
    pub oversized: Vec<String>,
}

pub fn is_python_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(PYTHON_EXTENSION))
        .unwrap_or(false)
}

fn relative_path(path: &Path, repo_root: &Path) -> String {
    path.strip_prefix(repo_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Walk `repo_root` for Python sources.
///
/// Honours `.gitignore` (when configured) and `.tetherignore`, prunes the
/// configured directory names at any depth and sets aside files over the
/// size cap. Results are sorted by relative path so runs are reproducible.
pub fn scan_repo_files(repo_root: &Path, config: &IngestConfig) -> ScanResult {
    let excluded: HashSet<String> = config.exclude_dirs.iter().cloned().collect();

    let walker = WalkBuilder::new(repo_root)
        .follow_links(false)
        .hidden(true)
        .parents(false)
        .git_ignore(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .git_global(false)
        .require_git(false)
        .add_custom_ignore_filename(IGNORE_FILE_NAME)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir || entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !excluded.contains(name.as_ref())
        })
        .build();

    let mut result = ScanResult::default();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Error walking directory: {}", e);
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if !is_python_source(path) {
            continue;
        }
        let rel = relative_path(path, repo_root);
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size_bytes > config.max_file_bytes {
            debug!(file = %rel, size_bytes, "Skipping oversized file");
            result.oversized.push(rel);
            continue;
        }
        result.files.push(SourceCandidate {
            path: path.to_path_buf(),
            relative_path: rel,
            size_bytes,
        });
    }
    result.files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    result.oversized.sort();
    result
}

pub fn compute_content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
