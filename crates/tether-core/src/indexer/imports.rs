//! Module naming and relative-import resolution for Python sources.

use std::path::{Component, Path};

/// Layout directories that are not part of the importable package path.
const SOURCE_ROOTS: &[&str] = &["src"];

/// Convert a repository-relative file path to its dotted module name.
///
/// `pkg/mod.py` → `pkg.mod`, `pkg/__init__.py` → `pkg`. A leading `src/`
/// directory is dropped so `src/pkg/mod.py` imports as `pkg.mod`.
pub fn module_name_for_path(relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");
    let without_ext = Path::new(&normalized).with_extension("");
    let mut parts: Vec<&str> = without_ext
        .components()
        .filter_map(|c| match c {
            Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();
    if parts.len() > 1 && SOURCE_ROOTS.contains(&parts[0]) {
        parts.remove(0);
    }
    if parts.last() == Some(&"__init__") {
        parts.pop();
    }
    parts.join(".")
}

/// Whether the file is a package `__init__` module.
pub fn is_package_init(relative_path: &str) -> bool {
    Path::new(relative_path)
        .file_stem()
        .map(|stem| stem == "__init__")
        .unwrap_or(false)
}

/// Resolve a relative import (`from ..x import y`) to an absolute module.
///
/// `level` is the number of leading dots. Walking above the top-level package
/// keeps whatever remains, which is the best available guess.
pub fn resolve_relative_module(
    current_module: &str,
    is_package: bool,
    level: usize,
    suffix: &str,
) -> String {
    let mut package: Vec<&str> = if current_module.is_empty() {
        Vec::new()
    } else {
        current_module.split('.').collect()
    };
    if !is_package {
        package.pop();
    }
    for _ in 0..level.saturating_sub(1) {
        package.pop();
    }
    let suffix = suffix.trim_matches('.');
    if !suffix.is_empty() {
        package.push(suffix);
    }
    package.join(".")
}
