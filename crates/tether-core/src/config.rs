//! Tunable settings for ingestion, validation heuristics, and the store.
//!
//! Every field has a default, so a partial JSON file is enough. Environment
//! variables (`TETHER_*`) override the file for the handful of settings
//! operators usually flip per run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{TetherError, TetherResult};

/// Directory names skipped while walking a repository.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    "tests",
    "test",
    "__pycache__",
    ".git",
    "venv",
    ".venv",
    "env",
    "node_modules",
    "build",
    "dist",
    ".pytest_cache",
    "docs",
    "examples",
    "example",
    "demo",
    "benchmark",
    "site-packages",
    ".tether",
];

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub ingest: IngestConfig,
    pub validation: ValidationConfig,
    pub store: StoreConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Delete files and entities not touched by a complete re-ingestion.
    pub prune_stale: bool,
    /// Files whose content hash matches the stored one are not re-parsed.
    pub skip_unchanged: bool,
    pub exclude_dirs: Vec<String>,
    pub max_file_bytes: u64,
    pub respect_gitignore: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            prune_stale: false,
            skip_unchanged: true,
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|d| d.to_string()).collect(),
            max_file_bytes: 500 * 1024,
            respect_gitignore: true,
        }
    }
}

/// Confidence heuristics. None of these has a formal derivation; they are
/// knobs, not truths.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Receiver typed by `x = Foo()` or `with Foo() as x`.
    pub direct_instantiation_certainty: f64,
    /// Receiver typed by an annotation (`x: Foo = ...`, `def f(x: Foo)`).
    pub annotation_certainty: f64,
    /// Receiver is the class itself (`Foo.create()`).
    pub class_reference_certainty: f64,
    /// Multiplier applied per `y = x` hop.
    pub propagation_decay: f64,
    /// Attributes can be attached dynamically, so misses are less certain.
    pub attribute_factor: f64,
    /// Applied when some base classes could not be resolved.
    pub partial_hierarchy_factor: f64,
    /// NotFound below this collapses to Unknown.
    pub min_not_found_confidence: f64,
    pub import_not_found_confidence: f64,
    pub instantiation_not_found_confidence: f64,
    pub function_not_found_confidence: f64,
    /// Confidence lost per extra same-named candidate.
    pub ambiguity_penalty: f64,
    pub ambiguity_floor: f64,
    pub max_suggestions: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            direct_instantiation_certainty: 0.9,
            annotation_certainty: 0.8,
            class_reference_certainty: 0.9,
            propagation_decay: 0.85,
            attribute_factor: 0.9,
            partial_hierarchy_factor: 0.5,
            min_not_found_confidence: 0.5,
            import_not_found_confidence: 0.95,
            instantiation_not_found_confidence: 0.9,
            function_not_found_confidence: 0.85,
            ambiguity_penalty: 0.1,
            ambiguity_floor: 0.5,
            max_suggestions: 3,
        }
    }
}

impl ValidationConfig {
    /// Confidence of a positive match among `candidates` same-named symbols.
    pub fn ambiguity_confidence(&self, candidates: usize) -> f64 {
        if candidates <= 1 {
            return 1.0;
        }
        let penalty = self.ambiguity_penalty * (candidates - 1) as f64;
        (1.0 - penalty).max(self.ambiguity_floor)
    }

    fn validate(&self) -> TetherResult<()> {
        let probabilities = [
            ("direct_instantiation_certainty", self.direct_instantiation_certainty),
            ("annotation_certainty", self.annotation_certainty),
            ("class_reference_certainty", self.class_reference_certainty),
            ("propagation_decay", self.propagation_decay),
            ("attribute_factor", self.attribute_factor),
            ("partial_hierarchy_factor", self.partial_hierarchy_factor),
            ("min_not_found_confidence", self.min_not_found_confidence),
            ("import_not_found_confidence", self.import_not_found_confidence),
            (
                "instantiation_not_found_confidence",
                self.instantiation_not_found_confidence,
            ),
            ("function_not_found_confidence", self.function_not_found_confidence),
            ("ambiguity_penalty", self.ambiguity_penalty),
            ("ambiguity_floor", self.ambiguity_floor),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(TetherError::Config(format!(
                    "validation.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a write waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let v = val.trim().to_lowercase();
    match v.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> TetherResult<Option<T>> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| TetherError::Config(format!("{name} has an invalid value: {val}"))),
        Err(_) => Ok(None),
    }
}

impl TetherConfig {
    /// Load from a JSON file, then apply environment overrides.
    pub fn from_json_file(path: &Path) -> TetherResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TetherConfig = serde_json::from_str(&content)?;
        config.with_env_overrides()
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> TetherResult<Self> {
        TetherConfig::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> TetherResult<Self> {
        if let Some(flag) = env_flag("TETHER_PRUNE_STALE") {
            self.ingest.prune_stale = flag;
        }
        if let Some(bytes) = env_parse::<u64>("TETHER_MAX_FILE_BYTES")? {
            self.ingest.max_file_bytes = bytes;
        }
        if let Some(floor) = env_parse::<f64>("TETHER_MIN_NOT_FOUND_CONFIDENCE")? {
            self.validation.min_not_found_confidence = floor;
        }
        if let Some(timeout) = env_parse::<u64>("TETHER_BUSY_TIMEOUT_MS")? {
            self.store.busy_timeout_ms = timeout;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> TetherResult<()> {
        self.validation.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: TetherConfig =
            serde_json::from_str(r#"{"ingest": {"prune_stale": true}}"#).unwrap();
        assert!(config.ingest.prune_stale);
        assert_eq!(config.ingest.max_file_bytes, 500 * 1024);
        assert_eq!(config.validation.direct_instantiation_certainty, 0.9);
        assert_eq!(config.store.busy_timeout_ms, 5000);
    }

    #[test]
    fn out_of_range_certainty_is_rejected() {
        let mut config = TetherConfig::default();
        config.validation.propagation_decay = 1.5;
        assert!(matches!(config.validate(), Err(TetherError::Config(_))));
    }

    #[test]
    fn ambiguity_confidence_decays_to_floor() {
        let config = ValidationConfig::default();
        assert_eq!(config.ambiguity_confidence(1), 1.0);
        assert!((config.ambiguity_confidence(2) - 0.9).abs() < 1e-9);
        assert_eq!(config.ambiguity_confidence(50), config.ambiguity_floor);
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.json");
        std::fs::write(&path, r#"{"validation": {"max_suggestions": 5}}"#).unwrap();
        let config = TetherConfig::from_json_file(&path).unwrap();
        assert_eq!(config.validation.max_suggestions, 5);
    }
}
