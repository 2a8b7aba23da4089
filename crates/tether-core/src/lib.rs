//! Tether core library: a structural knowledge graph of Python repositories
//! and a validator that checks candidate scripts against it.
//!
//! The write path is [`indexer`]: files are walked, parsed with tree-sitter
//! and stored through a [`store::GraphStore`]. The read path is
//! [`validation`]: a script is analyzed into usage events, each event is
//! resolved against the graph, and the findings are summarized into a
//! [`validation::Report`]. Symbols the graph has never seen are reported as
//! unknown, never as hallucinations.

pub mod cancel;
pub mod config;
pub mod errors;
pub mod indexer;
pub mod models;
pub mod store;
pub mod validation;

pub use cancel::CancellationToken;
pub use config::{IngestConfig, StoreConfig, TetherConfig, ValidationConfig};
pub use errors::{ParseError, StorageError, TetherError, TetherResult};
pub use indexer::pipeline::{IngestResult, RepositoryIngester};
pub use store::{GraphStore, SqliteGraphStore};
pub use validation::{check_script, Finding, FindingStatus, Report};
