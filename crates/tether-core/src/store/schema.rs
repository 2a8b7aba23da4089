//! Table layout of the graph store and its versioned migrations.
//!
//! Tables map the graph contract onto foreign keys: files → repositories
//! (CONTAINS), classes/functions/variables → files (DEFINES), methods →
//! classes (HAS_METHOD), attributes → classes (HAS_ATTRIBUTE) and
//! imports → files (IMPORTS).

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::StorageResult;

/// Version written by the newest migration step.
pub const SCHEMA_VERSION: i32 = 1;

/// Core DDL statements: 10 CREATE TABLE + 9 CREATE INDEX.
///
/// Every statement is `IF NOT EXISTS`; replaying them on an open store is a no-op.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (10) ─────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS repositories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        source_url TEXT,
        ingested_at TEXT,
        generation INTEGER NOT NULL DEFAULT 0
    );",
    "CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        relative_path TEXT NOT NULL,
        module_name TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        generation INTEGER NOT NULL,
        UNIQUE(repository_id, relative_path)
    );",
    "CREATE TABLE IF NOT EXISTS classes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        module_name TEXT NOT NULL,
        name TEXT NOT NULL,
        qualified_name TEXT NOT NULL,
        bases_json TEXT NOT NULL DEFAULT '[]',
        docstring TEXT,
        line INTEGER NOT NULL DEFAULT 0,
        generation INTEGER NOT NULL,
        UNIQUE(repository_id, qualified_name)
    );",
    "CREATE TABLE IF NOT EXISTS methods (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        class_id INTEGER NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        qualified_name TEXT NOT NULL,
        parameters_json TEXT NOT NULL DEFAULT '[]',
        return_annotation TEXT,
        is_async INTEGER NOT NULL DEFAULT 0,
        decorators_json TEXT NOT NULL DEFAULT '[]',
        line INTEGER NOT NULL DEFAULT 0,
        generation INTEGER NOT NULL,
        UNIQUE(class_id, name)
    );",
    "CREATE TABLE IF NOT EXISTS attributes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        class_id INTEGER NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        type_annotation TEXT,
        line INTEGER NOT NULL DEFAULT 0,
        generation INTEGER NOT NULL,
        UNIQUE(class_id, name)
    );",
    "CREATE TABLE IF NOT EXISTS functions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        module_name TEXT NOT NULL,
        name TEXT NOT NULL,
        qualified_name TEXT NOT NULL,
        parameters_json TEXT NOT NULL DEFAULT '[]',
        return_annotation TEXT,
        is_async INTEGER NOT NULL DEFAULT 0,
        decorators_json TEXT NOT NULL DEFAULT '[]',
        line INTEGER NOT NULL DEFAULT 0,
        generation INTEGER NOT NULL,
        UNIQUE(repository_id, qualified_name)
    );",
    "CREATE TABLE IF NOT EXISTS imports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        imported_name TEXT NOT NULL,
        imported_from_module TEXT NOT NULL,
        alias TEXT NOT NULL DEFAULT '',
        line INTEGER NOT NULL DEFAULT 0,
        generation INTEGER NOT NULL,
        UNIQUE(file_id, imported_name, imported_from_module, alias)
    );",
    "CREATE TABLE IF NOT EXISTS variables (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        generation INTEGER NOT NULL,
        UNIQUE(file_id, name)
    );",
    // ── indexes (9) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_files_module ON files(module_name);",
    "CREATE INDEX IF NOT EXISTS idx_files_repo_generation ON files(repository_id, generation);",
    "CREATE INDEX IF NOT EXISTS idx_classes_name ON classes(name);",
    "CREATE INDEX IF NOT EXISTS idx_classes_qualified ON classes(qualified_name);",
    "CREATE INDEX IF NOT EXISTS idx_classes_module ON classes(module_name);",
    "CREATE INDEX IF NOT EXISTS idx_functions_name ON functions(name);",
    "CREATE INDEX IF NOT EXISTS idx_functions_module ON functions(module_name);",
    "CREATE INDEX IF NOT EXISTS idx_imports_file ON imports(file_id);",
    "CREATE INDEX IF NOT EXISTS idx_variables_file ON variables(file_id);",
];

// ─── Migrations ─────────────────────────────────────────────────────────────

type MigrationStep = fn(&Connection) -> StorageResult<()>;

/// Steps indexed by the version they produce.
const MIGRATIONS: &[(i32, MigrationStep)] = &[(1, baseline)];

/// Bring the store up to [`SCHEMA_VERSION`]. Steps run in order inside a
/// savepoint each; a failing step is rolled back, logged to
/// `migration_history` and returned.
pub fn migrate_schema(conn: &Connection) -> StorageResult<()> {
    let stored = get_schema_version(conn);
    if stored >= SCHEMA_VERSION {
        return Ok(());
    }
    info!(from = stored, to = SCHEMA_VERSION, "Migrating schema");

    for &(target, step) in MIGRATIONS.iter().filter(|(v, _)| *v > stored) {
        let from = target - 1;
        conn.execute_batch("SAVEPOINT tether_migrate_step;")?;
        let applied = step(conn)
            .and_then(|()| set_schema_version(conn, target))
            .and_then(|()| log_step(conn, from, target, None));
        if let Err(err) = applied {
            let _ = conn.execute_batch(
                "ROLLBACK TO SAVEPOINT tether_migrate_step; RELEASE SAVEPOINT tether_migrate_step;",
            );
            let _ = log_step(conn, from, target, Some(&err.to_string()));
            return Err(err);
        }
        conn.execute_batch("RELEASE SAVEPOINT tether_migrate_step;")?;
        debug!(version = target, "Schema migration step applied");
    }
    Ok(())
}

/// Stored schema version, 0 for a blank or unreadable store.
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|value| value.parse().ok())
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        [version.to_string()],
    )?;
    Ok(())
}

fn log_step(conn: &Connection, from: i32, to: i32, failure: Option<&str>) -> StorageResult<()> {
    let status = if failure.is_some() { "failed" } else { "success" };
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from, to, status, failure],
    )?;
    Ok(())
}

// ─── Steps ──────────────────────────────────────────────────────────────────

/// v0 -> v1: the DDL above is the whole layout.
fn baseline(_conn: &Connection) -> StorageResult<()> {
    Ok(())
}
