//! Graph storage contract and its SQLite backend.
//!
//! Ingestion writes through [`GraphStore`]; validation reads through it and
//! through the inheritance-aware helpers in [`resolution`]. Components take a
//! `&dyn GraphStore` so any backend honouring the contract can stand in.

pub mod database;
pub mod resolution;
pub mod schema;

use crate::errors::StorageResult;
use crate::models::{
    AttributeRecord, ClassRecord, FunctionRecord, GraphStats, ImportEdge, MethodRecord,
    ParsedModule, PruneStats, Repository, RepositoryRecord, SourceFile,
};

pub use database::SqliteGraphStore;

pub trait GraphStore: Send + Sync {
    // -- write path ----------------------------------------------------------

    /// Claim `repository` for one ingestion run. Fails with
    /// `StorageError::IngestionInProgress` while another run holds it.
    fn begin_ingestion(&self, repository: &str) -> StorageResult<()>;

    fn end_ingestion(&self, repository: &str);

    /// Insert or update the repository and advance its generation.
    fn upsert_repository(&self, repository: &Repository) -> StorageResult<RepositoryRecord>;

    /// Write one file and every entity parsed from it in a single
    /// transaction, stamped with the repository's current generation.
    /// Returns the file id.
    fn upsert_module(
        &self,
        repository: &RepositoryRecord,
        file: &SourceFile,
        module: &ParsedModule,
    ) -> StorageResult<i64>;

    /// Stamp an already stored file and its entities with the current
    /// generation without rewriting them. Returns false when the file is
    /// not stored.
    fn mark_file_current(
        &self,
        repository: &RepositoryRecord,
        relative_path: &str,
    ) -> StorageResult<bool>;

    /// Delete the repository's rows stamped with an older generation.
    fn prune_stale(&self, repository: &RepositoryRecord) -> StorageResult<PruneStats>;

    // -- read path -----------------------------------------------------------

    fn get_repository(&self, name: &str) -> StorageResult<Option<RepositoryRecord>>;

    fn file_hash(&self, repository_id: i64, relative_path: &str) -> StorageResult<Option<String>>;

    /// Exact, case-sensitive match on the simple class name.
    fn find_class(&self, name: &str, repository_id: Option<i64>)
        -> StorageResult<Vec<ClassRecord>>;

    fn find_class_qualified(
        &self,
        qualified_name: &str,
        repository_id: Option<i64>,
    ) -> StorageResult<Vec<ClassRecord>>;

    fn class_methods(&self, class_id: i64) -> StorageResult<Vec<MethodRecord>>;

    fn class_attributes(&self, class_id: i64) -> StorageResult<Vec<AttributeRecord>>;

    fn find_method(&self, class_id: i64, name: &str) -> StorageResult<Option<MethodRecord>>;

    fn find_attribute(&self, class_id: i64, name: &str)
        -> StorageResult<Option<AttributeRecord>>;

    fn file_imports(&self, file_id: i64) -> StorageResult<Vec<ImportEdge>>;

    /// Module-level functions named `name`, optionally restricted to one
    /// module.
    fn find_functions(&self, name: &str, module: Option<&str>)
        -> StorageResult<Vec<FunctionRecord>>;

    /// Whether any stored file is `module` itself or lives under it.
    fn module_indexed(&self, module: &str) -> StorageResult<bool>;

    /// Whether `module` binds `name` as a class, function, variable,
    /// imported name or submodule.
    fn module_defines(&self, module: &str, name: &str) -> StorageResult<bool>;

    /// Whether `module` binds `name` through an explicit `from … import`.
    fn module_imports_name(&self, module: &str, name: &str) -> StorageResult<bool>;

    fn module_has_star_import(&self, module: &str) -> StorageResult<bool>;

    /// Top-level names bound by `module`, for suggestions.
    fn module_members(&self, module: &str) -> StorageResult<Vec<String>>;

    fn stats(&self, repository_id: Option<i64>) -> StorageResult<GraphStats>;
}
