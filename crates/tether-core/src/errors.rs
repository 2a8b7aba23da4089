//! Error types for the Tether core library.

/// Invalid syntax in one source file or candidate script.
///
/// Recoverable: ingestion records it and moves on, script checks surface it
/// as a top-level failure instead of an empty result.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[error("{file}:{line}:{column}: {message}")]
pub struct ParseError {
    pub file: String,
    /// 1-based line of the first syntax error, 0 when unknown.
    pub line: usize,
    /// 1-based column of the first syntax error, 0 when unknown.
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: 0,
            column: 0,
            message: message.into(),
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = line;
        self.column = column;
        self
    }
}

/// Backend failures. Fatal for the current call and never retried here.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Repository '{0}' is already being ingested")]
    IngestionInProgress(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Top-level error enum for the Tether core library.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for TetherError {
    fn from(err: rusqlite::Error) -> Self {
        TetherError::Storage(StorageError::Sqlite(err))
    }
}

pub type TetherResult<T> = Result<T, TetherError>;

pub type StorageResult<T> = Result<T, StorageError>;
