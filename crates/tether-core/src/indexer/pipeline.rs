//! Repository ingestion: walk, parse and store, one file at a time.
//!
//! A file that cannot be read or parsed is recorded and skipped; only store
//! failures abort a run. Cancellation is checked before every file and a
//! cancelled run never prunes.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::IngestConfig;
use crate::errors::{ParseError, TetherError, TetherResult};
use crate::indexer::filesystem::{compute_content_hash, scan_repo_files, SourceCandidate};
use crate::indexer::imports::module_name_for_path;
use crate::indexer::parser::parse;
use crate::models::{Repository, RepositoryRecord, SourceFile};
use crate::store::GraphStore;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IngestResult {
    pub repository: String,
    pub generation: i64,
    /// Files stored this run, including unchanged ones carried forward.
    pub files_processed: usize,
    pub files_unchanged: usize,
    /// Files over the configured size cap.
    pub files_skipped: usize,
    pub classes_found: usize,
    pub methods_found: usize,
    pub functions_found: usize,
    pub attributes_found: usize,
    pub imports_found: usize,
    pub files_pruned: usize,
    pub entities_pruned: usize,
    pub parse_errors: Vec<ParseError>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// Releases the store's per-repository ingestion claim on every exit path.
struct IngestionClaim<'a> {
    store: &'a dyn GraphStore,
    repository: String,
}

impl<'a> IngestionClaim<'a> {
    fn acquire(store: &'a dyn GraphStore, repository: &str) -> TetherResult<Self> {
        store.begin_ingestion(repository)?;
        Ok(Self {
            store,
            repository: repository.to_string(),
        })
    }
}

impl Drop for IngestionClaim<'_> {
    fn drop(&mut self) {
        self.store.end_ingestion(&self.repository);
    }
}

enum FileOutcome {
    Stored(crate::models::ParsedModule),
    Unchanged,
    Failed(ParseError),
}

pub struct RepositoryIngester<'a> {
    store: &'a dyn GraphStore,
    config: IngestConfig,
    cancel: CancellationToken,
}

impl<'a> RepositoryIngester<'a> {
    pub fn new(store: &'a dyn GraphStore, config: IngestConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ingest `repo_dir` under its directory name.
    pub fn ingest(&self, repo_dir: &Path) -> TetherResult<IngestResult> {
        let root = std::fs::canonicalize(repo_dir)?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repository".to_string());
        self.ingest_as(repo_dir, &Repository::named(name))
    }

    /// Ingest `repo_dir` under the caller-supplied repository identity.
    pub fn ingest_as(&self, repo_dir: &Path, repository: &Repository) -> TetherResult<IngestResult> {
        if !repo_dir.is_dir() {
            return Err(TetherError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Repository directory does not exist: {}", repo_dir.display()),
            )));
        }
        let started = Instant::now();
        let _claim = IngestionClaim::acquire(self.store, &repository.name)?;
        let record = self.store.upsert_repository(repository)?;
        info!(
            repository = %record.name,
            generation = record.generation,
            path = %repo_dir.display(),
            "Ingesting repository"
        );

        let scan = scan_repo_files(repo_dir, &self.config);
        let mut result = IngestResult {
            repository: record.name.clone(),
            generation: record.generation,
            files_skipped: scan.oversized.len(),
            ..IngestResult::default()
        };

        for candidate in &scan.files {
            if self.cancel.is_cancelled() {
                info!(repository = %record.name, "Ingestion cancelled");
                result.cancelled = true;
                break;
            }
            match self.process_file(&record, candidate)? {
                FileOutcome::Stored(module) => {
                    result.files_processed += 1;
                    result.classes_found += module.classes.len();
                    result.methods_found += module.method_count();
                    result.functions_found += module.functions.len();
                    result.attributes_found += module.attribute_count();
                    result.imports_found += module.imports.len();
                }
                FileOutcome::Unchanged => {
                    result.files_processed += 1;
                    result.files_unchanged += 1;
                }
                FileOutcome::Failed(error) => {
                    warn!(file = %candidate.relative_path, error = %error, "Skipping file");
                    // Keep the last good version of a broken file out of the prune.
                    self.store
                        .mark_file_current(&record, &candidate.relative_path)?;
                    result.parse_errors.push(error);
                }
            }
        }

        if self.config.prune_stale && !result.cancelled {
            let pruned = self.store.prune_stale(&record)?;
            result.files_pruned = pruned.files;
            result.entities_pruned = pruned.entities;
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            repository = %result.repository,
            files = result.files_processed,
            unchanged = result.files_unchanged,
            classes = result.classes_found,
            functions = result.functions_found,
            parse_errors = result.parse_errors.len(),
            cancelled = result.cancelled,
            elapsed_ms = result.elapsed_ms,
            "Ingestion finished"
        );
        Ok(result)
    }

    fn process_file(
        &self,
        record: &RepositoryRecord,
        candidate: &SourceCandidate,
    ) -> TetherResult<FileOutcome> {
        let rel = candidate.relative_path.as_str();
        let bytes = match std::fs::read(&candidate.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(FileOutcome::Failed(ParseError::new(
                    rel,
                    format!("read failed: {e}"),
                )))
            }
        };
        let content_hash = compute_content_hash(&bytes);

        if self.config.skip_unchanged
            && self.store.file_hash(record.id, rel)?.as_deref() == Some(content_hash.as_str())
            && self.store.mark_file_current(record, rel)?
        {
            debug!(file = rel, "Unchanged, carried forward");
            return Ok(FileOutcome::Unchanged);
        }

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                return Ok(FileOutcome::Failed(ParseError::new(
                    rel,
                    "file is not valid UTF-8",
                )))
            }
        };
        let module = match parse(&text, rel) {
            Ok(module) => module,
            Err(e) => return Ok(FileOutcome::Failed(e)),
        };

        let file = SourceFile {
            relative_path: rel.to_string(),
            module_name: module_name_for_path(rel),
            content_hash,
        };
        self.store.upsert_module(record, &file, &module)?;
        debug!(file = rel, classes = module.classes.len(), "Indexed");
        Ok(FileOutcome::Stored(module))
    }
}
