//! SQLite storage layer for Tether.
//!
//! One connection behind a `parking_lot::Mutex`; every per-file write runs in
//! its own transaction so a cancelled or failed run never leaves a
//! half-written entity behind.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::errors::{StorageError, StorageResult};
use crate::models::{
    AttributeRecord, ClassRecord, FunctionRecord, GraphStats, ImportEdge, MethodRecord,
    ParsedModule, PruneStats, Repository, RepositoryRecord, SourceFile,
};
use crate::store::{schema, GraphStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> StorageResult<String> {
    serde_json::to_string(value)
        .map_err(|e| StorageError::Backend(format!("Failed to encode column: {e}")))
}

fn exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StorageResult<bool> {
    let found: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(found != 0)
}

const REPOSITORY_COLUMNS: &str = "id, name, source_url, ingested_at, generation";

const CLASS_COLUMNS: &str =
    "id, repository_id, file_id, module_name, name, qualified_name, bases_json, docstring";

const METHOD_COLUMNS: &str = "id, class_id, name, qualified_name, parameters_json, \
     return_annotation, is_async, decorators_json";

const FUNCTION_COLUMNS: &str = "id, repository_id, file_id, module_name, name, qualified_name, \
     parameters_json, return_annotation, is_async";

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<RepositoryRecord> {
    Ok(RepositoryRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        source_url: row.get(2)?,
        ingested_at: row.get(3)?,
        generation: row.get(4)?,
    })
}

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<ClassRecord> {
    Ok(ClassRecord {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        file_id: row.get(2)?,
        module_name: row.get(3)?,
        name: row.get(4)?,
        qualified_name: row.get(5)?,
        bases: json_column(row, 6)?,
        docstring: row.get(7)?,
    })
}

fn method_from_row(row: &Row<'_>) -> rusqlite::Result<MethodRecord> {
    Ok(MethodRecord {
        id: row.get(0)?,
        class_id: row.get(1)?,
        name: row.get(2)?,
        qualified_name: row.get(3)?,
        parameters: json_column(row, 4)?,
        return_annotation: row.get(5)?,
        is_async: row.get::<_, i64>(6)? != 0,
        decorators: json_column(row, 7)?,
    })
}

fn attribute_from_row(row: &Row<'_>) -> rusqlite::Result<AttributeRecord> {
    Ok(AttributeRecord {
        id: row.get(0)?,
        class_id: row.get(1)?,
        name: row.get(2)?,
        type_annotation: row.get(3)?,
    })
}

fn function_from_row(row: &Row<'_>) -> rusqlite::Result<FunctionRecord> {
    Ok(FunctionRecord {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        file_id: row.get(2)?,
        module_name: row.get(3)?,
        name: row.get(4)?,
        qualified_name: row.get(5)?,
        parameters: json_column(row, 6)?,
        return_annotation: row.get(7)?,
        is_async: row.get::<_, i64>(8)? != 0,
    })
}

fn query_classes(
    conn: &Connection,
    column: &str,
    value: &str,
    repository_id: Option<i64>,
) -> StorageResult<Vec<ClassRecord>> {
    let sql = format!(
        "SELECT {CLASS_COLUMNS} FROM classes \
         WHERE {column} = ?1 AND (?2 IS NULL OR repository_id = ?2) ORDER BY id;"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![value, repository_id], class_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn select_repository(conn: &Connection, name: &str) -> StorageResult<Option<RepositoryRecord>> {
    match conn.query_row(
        &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE name = ?1;"),
        params![name],
        repository_from_row,
    ) {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Write helpers (run inside the per-file transaction)
// ---------------------------------------------------------------------------

fn write_file_row(
    conn: &Connection,
    repository: &RepositoryRecord,
    file: &SourceFile,
) -> StorageResult<i64> {
    conn.execute(
        "INSERT INTO files (repository_id, relative_path, module_name, content_hash, generation) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(repository_id, relative_path) DO UPDATE SET \
             module_name = excluded.module_name, \
             content_hash = excluded.content_hash, \
             generation = excluded.generation;",
        params![
            repository.id,
            file.relative_path,
            file.module_name,
            file.content_hash,
            repository.generation,
        ],
    )?;
    let file_id = conn.query_row(
        "SELECT id FROM files WHERE repository_id = ?1 AND relative_path = ?2;",
        params![repository.id, file.relative_path],
        |row| row.get(0),
    )?;
    Ok(file_id)
}

fn write_entities(
    conn: &Connection,
    repository: &RepositoryRecord,
    file_id: i64,
    module: &ParsedModule,
) -> StorageResult<()> {
    let generation = repository.generation;

    for class in &module.classes {
        conn.execute(
            "INSERT INTO classes ( \
                 repository_id, file_id, module_name, name, qualified_name, \
                 bases_json, docstring, line, generation \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(repository_id, qualified_name) DO UPDATE SET \
                 file_id = excluded.file_id, \
                 module_name = excluded.module_name, \
                 name = excluded.name, \
                 bases_json = excluded.bases_json, \
                 docstring = excluded.docstring, \
                 line = excluded.line, \
                 generation = excluded.generation;",
            params![
                repository.id,
                file_id,
                module.module_name,
                class.name,
                class.qualified_name,
                to_json(&class.bases)?,
                class.docstring,
                class.line as i64,
                generation,
            ],
        )?;
        let class_id: i64 = conn.query_row(
            "SELECT id FROM classes WHERE repository_id = ?1 AND qualified_name = ?2;",
            params![repository.id, class.qualified_name],
            |row| row.get(0),
        )?;

        for method in &class.methods {
            conn.execute(
                "INSERT INTO methods ( \
                     class_id, name, qualified_name, parameters_json, return_annotation, \
                     is_async, decorators_json, line, generation \
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(class_id, name) DO UPDATE SET \
                     qualified_name = excluded.qualified_name, \
                     parameters_json = excluded.parameters_json, \
                     return_annotation = excluded.return_annotation, \
                     is_async = excluded.is_async, \
                     decorators_json = excluded.decorators_json, \
                     line = excluded.line, \
                     generation = excluded.generation;",
                params![
                    class_id,
                    method.name,
                    method.qualified_name,
                    to_json(&method.parameters)?,
                    method.return_annotation,
                    method.is_async as i64,
                    to_json(&method.decorators)?,
                    method.line as i64,
                    generation,
                ],
            )?;
        }

        for attribute in &class.attributes {
            conn.execute(
                "INSERT INTO attributes (class_id, name, type_annotation, line, generation) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(class_id, name) DO UPDATE SET \
                     type_annotation = excluded.type_annotation, \
                     line = excluded.line, \
                     generation = excluded.generation;",
                params![
                    class_id,
                    attribute.name,
                    attribute.type_annotation,
                    attribute.line as i64,
                    generation,
                ],
            )?;
        }
    }

    for function in &module.functions {
        conn.execute(
            "INSERT INTO functions ( \
                 repository_id, file_id, module_name, name, qualified_name, parameters_json, \
                 return_annotation, is_async, decorators_json, line, generation \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(repository_id, qualified_name) DO UPDATE SET \
                 file_id = excluded.file_id, \
                 module_name = excluded.module_name, \
                 parameters_json = excluded.parameters_json, \
                 return_annotation = excluded.return_annotation, \
                 is_async = excluded.is_async, \
                 decorators_json = excluded.decorators_json, \
                 line = excluded.line, \
                 generation = excluded.generation;",
            params![
                repository.id,
                file_id,
                module.module_name,
                function.name,
                function.qualified_name,
                to_json(&function.parameters)?,
                function.return_annotation,
                function.is_async as i64,
                to_json(&function.decorators)?,
                function.line as i64,
                generation,
            ],
        )?;
    }

    for import in &module.imports {
        conn.execute(
            "INSERT INTO imports (file_id, imported_name, imported_from_module, alias, line, generation) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(file_id, imported_name, imported_from_module, alias) DO UPDATE SET \
                 line = excluded.line, \
                 generation = excluded.generation;",
            params![
                file_id,
                import.imported_name,
                import.imported_from_module,
                import.alias.as_deref().unwrap_or(""),
                import.line as i64,
                generation,
            ],
        )?;
    }

    for variable in &module.variables {
        conn.execute(
            "INSERT INTO variables (file_id, name, generation) VALUES (?1, ?2, ?3) \
             ON CONFLICT(file_id, name) DO UPDATE SET generation = excluded.generation;",
            params![file_id, variable, generation],
        )?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteGraphStore
// ---------------------------------------------------------------------------

/// SQLite-backed [`GraphStore`].
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    active_ingestions: Mutex<HashSet<String>>,
}

impl SqliteGraphStore {
    /// Open (creating if needed) the database at `db_path` and bring its
    /// schema up to date. Parent directories are created on demand.
    pub fn open(db_path: &Path, config: &StoreConfig) -> StorageResult<Self> {
        let resolved = expand_tilde(&db_path.to_string_lossy());
        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Backend(format!("Cannot create {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(&resolved)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        info!(path = %resolved.display(), "Opened graph store");
        Self::initialise(conn, Some(resolved))
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialise(conn, None)
    }

    fn initialise(conn: Connection, db_path: Option<PathBuf>) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            active_ingestions: Mutex::new(HashSet::new()),
        })
    }

    /// `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn schema_version(&self) -> i32 {
        schema::get_schema_version(&self.conn.lock())
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> StorageResult<()> {
        let conn = self.conn.into_inner();
        conn.close().map_err(|(_, e)| StorageError::Sqlite(e))
    }

    /// Copy the database to `destination` using the SQLite backup API.
    pub fn backup_to(&self, destination: &Path) -> StorageResult<PathBuf> {
        let resolved = expand_tilde(&destination.to_string_lossy());
        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Backend(format!("Cannot create {}: {e}", parent.display()))
                })?;
            }
        }
        let src_conn = self.conn.lock();
        let mut dst_conn = Connection::open(&resolved)?;
        let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
        backup.run_to_completion(100, Duration::from_millis(10), None)?;
        Ok(resolved)
    }
}

impl GraphStore for SqliteGraphStore {
    fn begin_ingestion(&self, repository: &str) -> StorageResult<()> {
        let mut active = self.active_ingestions.lock();
        if !active.insert(repository.to_string()) {
            return Err(StorageError::IngestionInProgress(repository.to_string()));
        }
        Ok(())
    }

    fn end_ingestion(&self, repository: &str) {
        self.active_ingestions.lock().remove(repository);
    }

    fn upsert_repository(&self, repository: &Repository) -> StorageResult<RepositoryRecord> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO repositories (name, source_url, ingested_at, generation) \
             VALUES (?1, ?2, COALESCE(?3, CURRENT_TIMESTAMP), 1) \
             ON CONFLICT(name) DO UPDATE SET \
                 source_url = COALESCE(excluded.source_url, repositories.source_url), \
                 ingested_at = excluded.ingested_at, \
                 generation = repositories.generation + 1;",
            params![repository.name, repository.source_url, repository.ingested_at],
        )?;
        select_repository(&conn, &repository.name)?.ok_or_else(|| {
            StorageError::Backend(format!("Repository '{}' vanished after upsert", repository.name))
        })
    }

    fn upsert_module(
        &self,
        repository: &RepositoryRecord,
        file: &SourceFile,
        module: &ParsedModule,
    ) -> StorageResult<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let file_id = write_file_row(&tx, repository, file)?;
        write_entities(&tx, repository, file_id, module)?;
        tx.commit()?;
        debug!(
            file = %file.relative_path,
            classes = module.classes.len(),
            functions = module.functions.len(),
            "Stored module"
        );
        Ok(file_id)
    }

    fn mark_file_current(
        &self,
        repository: &RepositoryRecord,
        relative_path: &str,
    ) -> StorageResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing = match tx.query_row(
            "SELECT id, generation FROM files WHERE repository_id = ?1 AND relative_path = ?2;",
            params![repository.id, relative_path],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        ) {
            Ok(found) => found,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let (file_id, previous) = existing;
        let generation = repository.generation;

        // Only rows live at the file's last write are carried forward.
        tx.execute(
            "UPDATE methods SET generation = ?1 WHERE generation = ?3 AND class_id IN \
             (SELECT id FROM classes WHERE file_id = ?2 AND generation = ?3);",
            params![generation, file_id, previous],
        )?;
        tx.execute(
            "UPDATE attributes SET generation = ?1 WHERE generation = ?3 AND class_id IN \
             (SELECT id FROM classes WHERE file_id = ?2 AND generation = ?3);",
            params![generation, file_id, previous],
        )?;
        for table in ["classes", "functions", "imports", "variables"] {
            tx.execute(
                &format!(
                    "UPDATE {table} SET generation = ?1 WHERE file_id = ?2 AND generation = ?3;"
                ),
                params![generation, file_id, previous],
            )?;
        }
        tx.execute(
            "UPDATE files SET generation = ?1 WHERE id = ?2;",
            params![generation, file_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn prune_stale(&self, repository: &RepositoryRecord) -> StorageResult<PruneStats> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let (repo_id, generation) = (repository.id, repository.generation);
        let mut entities = 0;

        for table in ["methods", "attributes"] {
            entities += tx.execute(
                &format!(
                    "DELETE FROM {table} WHERE generation < ?2 AND class_id IN \
                     (SELECT id FROM classes WHERE repository_id = ?1);"
                ),
                params![repo_id, generation],
            )?;
        }
        for table in ["imports", "variables"] {
            entities += tx.execute(
                &format!(
                    "DELETE FROM {table} WHERE generation < ?2 AND file_id IN \
                     (SELECT id FROM files WHERE repository_id = ?1);"
                ),
                params![repo_id, generation],
            )?;
        }
        for table in ["functions", "classes"] {
            entities += tx.execute(
                &format!("DELETE FROM {table} WHERE repository_id = ?1 AND generation < ?2;"),
                params![repo_id, generation],
            )?;
        }
        let files = tx.execute(
            "DELETE FROM files WHERE repository_id = ?1 AND generation < ?2;",
            params![repo_id, generation],
        )?;
        tx.commit()?;

        if files > 0 || entities > 0 {
            info!(
                repository = %repository.name,
                files,
                entities,
                "Pruned stale entities"
            );
        }
        Ok(PruneStats { files, entities })
    }

    fn get_repository(&self, name: &str) -> StorageResult<Option<RepositoryRecord>> {
        select_repository(&self.conn.lock(), name)
    }

    fn file_hash(&self, repository_id: i64, relative_path: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.lock();
        match conn.query_row(
            "SELECT content_hash FROM files WHERE repository_id = ?1 AND relative_path = ?2;",
            params![repository_id, relative_path],
            |row| row.get(0),
        ) {
            Ok(hash) => Ok(Some(hash)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn find_class(
        &self,
        name: &str,
        repository_id: Option<i64>,
    ) -> StorageResult<Vec<ClassRecord>> {
        query_classes(&self.conn.lock(), "name", name, repository_id)
    }

    fn find_class_qualified(
        &self,
        qualified_name: &str,
        repository_id: Option<i64>,
    ) -> StorageResult<Vec<ClassRecord>> {
        query_classes(&self.conn.lock(), "qualified_name", qualified_name, repository_id)
    }

    fn class_methods(&self, class_id: i64) -> StorageResult<Vec<MethodRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {METHOD_COLUMNS} FROM methods WHERE class_id = ?1 ORDER BY id;"
        ))?;
        let rows = stmt.query_map(params![class_id], method_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn class_attributes(&self, class_id: i64) -> StorageResult<Vec<AttributeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, class_id, name, type_annotation FROM attributes \
             WHERE class_id = ?1 ORDER BY id;",
        )?;
        let rows = stmt.query_map(params![class_id], attribute_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_method(&self, class_id: i64, name: &str) -> StorageResult<Option<MethodRecord>> {
        let conn = self.conn.lock();
        match conn.query_row(
            &format!("SELECT {METHOD_COLUMNS} FROM methods WHERE class_id = ?1 AND name = ?2;"),
            params![class_id, name],
            method_from_row,
        ) {
            Ok(method) => Ok(Some(method)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn find_attribute(
        &self,
        class_id: i64,
        name: &str,
    ) -> StorageResult<Option<AttributeRecord>> {
        let conn = self.conn.lock();
        match conn.query_row(
            "SELECT id, class_id, name, type_annotation FROM attributes \
             WHERE class_id = ?1 AND name = ?2;",
            params![class_id, name],
            attribute_from_row,
        ) {
            Ok(attribute) => Ok(Some(attribute)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn file_imports(&self, file_id: i64) -> StorageResult<Vec<ImportEdge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT imported_name, imported_from_module, alias, line FROM imports \
             WHERE file_id = ?1 ORDER BY line, id;",
        )?;
        let rows = stmt.query_map(params![file_id], |row| {
            let alias: String = row.get(2)?;
            Ok(ImportEdge {
                imported_name: row.get(0)?,
                imported_from_module: row.get(1)?,
                alias: if alias.is_empty() { None } else { Some(alias) },
                line: row.get::<_, i64>(3)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_functions(
        &self,
        name: &str,
        module: Option<&str>,
    ) -> StorageResult<Vec<FunctionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FUNCTION_COLUMNS} FROM functions \
             WHERE name = ?1 AND (?2 IS NULL OR module_name = ?2) ORDER BY id;"
        ))?;
        let rows = stmt.query_map(params![name, module], function_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn module_indexed(&self, module: &str) -> StorageResult<bool> {
        exists(
            &self.conn.lock(),
            "SELECT EXISTS(SELECT 1 FROM files WHERE module_name = ?1 \
                 OR substr(module_name, 1, length(?1) + 1) = ?1 || '.');",
            params![module],
        )
    }

    fn module_defines(&self, module: &str, name: &str) -> StorageResult<bool> {
        let conn = self.conn.lock();
        let checks = [
            "SELECT EXISTS(SELECT 1 FROM classes \
                 WHERE module_name = ?1 AND qualified_name = ?1 || '.' || ?2);",
            "SELECT EXISTS(SELECT 1 FROM functions WHERE module_name = ?1 AND name = ?2);",
            "SELECT EXISTS(SELECT 1 FROM variables v JOIN files f ON f.id = v.file_id \
                 WHERE f.module_name = ?1 AND v.name = ?2);",
            "SELECT EXISTS(SELECT 1 FROM imports i JOIN files f ON f.id = i.file_id \
                 WHERE f.module_name = ?1 AND ( \
                     i.alias = ?2 \
                     OR (i.alias = '' AND i.imported_name = ?2) \
                     OR (i.alias = '' AND i.imported_name = i.imported_from_module \
                         AND substr(i.imported_name, 1, length(?2) + 1) = ?2 || '.')));",
            "SELECT EXISTS(SELECT 1 FROM files WHERE module_name = ?1 || '.' || ?2 \
                 OR substr(module_name, 1, length(?1) + length(?2) + 2) = ?1 || '.' || ?2 || '.');",
        ];
        for sql in checks {
            if exists(&conn, sql, params![module, name])? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn module_imports_name(&self, module: &str, name: &str) -> StorageResult<bool> {
        exists(
            &self.conn.lock(),
            "SELECT EXISTS(SELECT 1 FROM imports i JOIN files f ON f.id = i.file_id \
                 WHERE f.module_name = ?1 AND i.imported_name <> i.imported_from_module \
                 AND (i.alias = ?2 OR (i.alias = '' AND i.imported_name = ?2)));",
            params![module, name],
        )
    }

    fn module_has_star_import(&self, module: &str) -> StorageResult<bool> {
        exists(
            &self.conn.lock(),
            "SELECT EXISTS(SELECT 1 FROM imports i JOIN files f ON f.id = i.file_id \
                 WHERE f.module_name = ?1 AND i.imported_name = '*');",
            params![module],
        )
    }

    fn module_members(&self, module: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM classes WHERE module_name = ?1 AND qualified_name = ?1 || '.' || name \
             UNION SELECT name FROM functions WHERE module_name = ?1 \
             UNION SELECT v.name FROM variables v JOIN files f ON f.id = v.file_id \
                 WHERE f.module_name = ?1 \
             UNION SELECT CASE WHEN i.alias = '' THEN i.imported_name ELSE i.alias END \
                 FROM imports i JOIN files f ON f.id = i.file_id \
                 WHERE f.module_name = ?1 AND i.imported_name <> '*' \
                     AND i.imported_name <> i.imported_from_module \
             ORDER BY 1;",
        )?;
        let rows = stmt.query_map(params![module], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn stats(&self, repository_id: Option<i64>) -> StorageResult<GraphStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> StorageResult<i64> {
            Ok(conn.query_row(sql, params![repository_id], |row| row.get(0))?)
        };
        Ok(GraphStats {
            repositories: count("SELECT COUNT(*) FROM repositories WHERE ?1 IS NULL OR id = ?1;")?,
            files: count("SELECT COUNT(*) FROM files WHERE ?1 IS NULL OR repository_id = ?1;")?,
            classes: count("SELECT COUNT(*) FROM classes WHERE ?1 IS NULL OR repository_id = ?1;")?,
            methods: count(
                "SELECT COUNT(*) FROM methods m JOIN classes c ON c.id = m.class_id \
                 WHERE ?1 IS NULL OR c.repository_id = ?1;",
            )?,
            functions: count(
                "SELECT COUNT(*) FROM functions WHERE ?1 IS NULL OR repository_id = ?1;",
            )?,
            attributes: count(
                "SELECT COUNT(*) FROM attributes a JOIN classes c ON c.id = a.class_id \
                 WHERE ?1 IS NULL OR c.repository_id = ?1;",
            )?,
            imports: count(
                "SELECT COUNT(*) FROM imports i JOIN files f ON f.id = i.file_id \
                 WHERE ?1 IS NULL OR f.repository_id = ?1;",
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::parse;

    fn source_file(path: &str, module: &ParsedModule) -> SourceFile {
        SourceFile {
            relative_path: path.to_string(),
            module_name: module.module_name.clone(),
            content_hash: "hash".to_string(),
        }
    }

    fn store_with(path: &str, src: &str) -> (SqliteGraphStore, RepositoryRecord) {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        let repo = store.upsert_repository(&Repository::named("demo")).unwrap();
        let module = parse(src, path).unwrap();
        store
            .upsert_module(&repo, &source_file(path, &module), &module)
            .unwrap();
        (store, repo)
    }

    const ENGINE: &str = "\
import os
from .base import Base as B
from .helpers import *

LIMIT = 10

class Engine(B):
    speed: int = 0

    def start(self, gear, *, force=False):
        self.running = True

def build(name):
    return Engine()
";

    #[test]
    fn open_in_memory_runs_migrations() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version(), schema::SCHEMA_VERSION);
        assert!(store.db_path().is_none());
    }

    #[test]
    fn upsert_repository_advances_generation() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        let first = store.upsert_repository(&Repository::named("demo")).unwrap();
        let second = store.upsert_repository(&Repository::named("demo")).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        assert!(second.ingested_at.is_some());
    }

    #[test]
    fn stored_module_is_queryable() {
        let (store, repo) = store_with("motor/engine.py", ENGINE);

        let classes = store.find_class("Engine", Some(repo.id)).unwrap();
        assert_eq!(classes.len(), 1);
        let engine = &classes[0];
        assert_eq!(engine.qualified_name, "motor.engine.Engine");
        assert_eq!(engine.bases[0].as_named(), Some("B"));

        let start = store.find_method(engine.id, "start").unwrap().unwrap();
        assert_eq!(start.parameters.len(), 3);
        assert!(store.find_method(engine.id, "stop").unwrap().is_none());
        assert!(store.find_attribute(engine.id, "running").unwrap().is_some());
        assert!(store.find_attribute(engine.id, "speed").unwrap().is_some());

        let imports = store.file_imports(engine.file_id).unwrap();
        assert_eq!(imports.len(), 3);
        assert_eq!(imports[1].alias.as_deref(), Some("B"));
        assert_eq!(imports[1].imported_from_module, "motor.base");
        assert_eq!(imports[0].alias, None);

        let functions = store.find_functions("build", Some("motor.engine")).unwrap();
        assert_eq!(functions.len(), 1);
        assert!(store.find_functions("build", Some("other")).unwrap().is_empty());
    }

    #[test]
    fn class_lookup_is_case_sensitive() {
        let (store, _) = store_with("motor/engine.py", ENGINE);
        assert!(store.find_class("engine", None).unwrap().is_empty());
    }

    #[test]
    fn module_queries_cover_every_binding_kind() {
        let (store, _) = store_with("motor/engine.py", ENGINE);
        assert!(store.module_indexed("motor").unwrap());
        assert!(store.module_indexed("motor.engine").unwrap());
        assert!(!store.module_indexed("motorway").unwrap());
        assert!(!store.module_indexed("motor.engine.Engine").unwrap());

        for name in ["Engine", "build", "LIMIT", "B", "os"] {
            assert!(store.module_defines("motor.engine", name).unwrap(), "{name}");
        }
        assert!(store.module_defines("motor", "engine").unwrap());
        assert!(!store.module_defines("motor.engine", "Missing").unwrap());
        assert!(store.module_has_star_import("motor.engine").unwrap());

        let members = store.module_members("motor.engine").unwrap();
        assert_eq!(members, vec!["B", "Engine", "LIMIT", "build"]);
    }

    #[test]
    fn reupsert_keeps_ids_and_counts() {
        let (store, repo) = store_with("motor/engine.py", ENGINE);
        let before = store.stats(Some(repo.id)).unwrap();
        let id_before = store.find_class("Engine", None).unwrap()[0].id;

        let repo = store.upsert_repository(&Repository::named("demo")).unwrap();
        let module = parse(ENGINE, "motor/engine.py").unwrap();
        store
            .upsert_module(&repo, &source_file("motor/engine.py", &module), &module)
            .unwrap();

        assert_eq!(store.stats(Some(repo.id)).unwrap(), before);
        assert_eq!(store.find_class("Engine", None).unwrap()[0].id, id_before);
    }

    #[test]
    fn prune_removes_only_older_generations() {
        let (store, _) = store_with("motor/engine.py", ENGINE);
        let repo = store.upsert_repository(&Repository::named("demo")).unwrap();
        let renamed = ENGINE.replace("def start", "def launch");
        let module = parse(&renamed, "motor/engine.py").unwrap();
        store
            .upsert_module(&repo, &source_file("motor/engine.py", &module), &module)
            .unwrap();

        let class_id = store.find_class("Engine", None).unwrap()[0].id;
        assert!(store.find_method(class_id, "start").unwrap().is_some());

        let pruned = store.prune_stale(&repo).unwrap();
        assert_eq!(pruned.files, 0);
        assert_eq!(pruned.entities, 1);
        assert!(store.find_method(class_id, "start").unwrap().is_none());
        assert!(store.find_method(class_id, "launch").unwrap().is_some());
    }

    #[test]
    fn mark_file_current_protects_live_rows_from_pruning() {
        let (store, _) = store_with("motor/engine.py", ENGINE);
        let repo = store.upsert_repository(&Repository::named("demo")).unwrap();
        assert!(store.mark_file_current(&repo, "motor/engine.py").unwrap());
        assert!(!store.mark_file_current(&repo, "missing.py").unwrap());

        let pruned = store.prune_stale(&repo).unwrap();
        assert_eq!(pruned, PruneStats::default());
        assert_eq!(store.find_class("Engine", None).unwrap().len(), 1);
    }

    #[test]
    fn prune_drops_files_missing_from_the_run() {
        let (store, _) = store_with("motor/engine.py", ENGINE);
        let repo = store.upsert_repository(&Repository::named("demo")).unwrap();
        let pruned = store.prune_stale(&repo).unwrap();
        assert_eq!(pruned.files, 1);
        let stats = store.stats(Some(repo.id)).unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.classes, 0);
        assert_eq!(stats.methods, 0);
        assert_eq!(stats.imports, 0);
    }

    #[test]
    fn concurrent_ingestion_of_same_repository_is_rejected() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        store.begin_ingestion("demo").unwrap();
        store.begin_ingestion("other").unwrap();
        assert!(matches!(
            store.begin_ingestion("demo"),
            Err(StorageError::IngestionInProgress(name)) if name == "demo"
        ));
        store.end_ingestion("demo");
        store.begin_ingestion("demo").unwrap();
    }

    #[test]
    fn file_backed_store_survives_reopen_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");
        {
            let store = SqliteGraphStore::open(&path, &StoreConfig::default()).unwrap();
            let repo = store.upsert_repository(&Repository::named("demo")).unwrap();
            let module = parse(ENGINE, "motor/engine.py").unwrap();
            store
                .upsert_module(&repo, &source_file("motor/engine.py", &module), &module)
                .unwrap();
            let copy = store.backup_to(&dir.path().join("copy.db")).unwrap();
            assert!(copy.exists());
            store.close().unwrap();
        }
        let reopened = SqliteGraphStore::open(&path, &StoreConfig::default()).unwrap();
        assert_eq!(reopened.find_class("Engine", None).unwrap().len(), 1);
        assert_eq!(
            reopened.file_hash(1, "motor/engine.py").unwrap().as_deref(),
            Some("hash")
        );
    }
}
