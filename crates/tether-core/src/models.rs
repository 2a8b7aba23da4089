//! Shared typed models used across indexing, storage, and validation layers.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// How a parameter binds arguments at a call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrKeyword,
    VarPositional,
    KeywordOnly,
    VarKeyword,
}

impl ParamKind {
    pub fn accepts_positional(self) -> bool {
        matches!(self, ParamKind::PositionalOnly | ParamKind::PositionalOrKeyword)
    }

    pub fn accepts_keyword(self) -> bool {
        matches!(self, ParamKind::PositionalOrKeyword | ParamKind::KeywordOnly)
    }
}

/// A single parameter of a function or method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub has_default: bool,
    pub kind: ParamKind,
    /// Annotation text; `None` when unannotated, never guessed.
    pub annotation: Option<String>,
}

impl ParamSpec {
    pub fn is_required(&self) -> bool {
        !self.has_default
            && !matches!(self.kind, ParamKind::VarPositional | ParamKind::VarKeyword)
    }
}

// ---------------------------------------------------------------------------
// Parsed entities
// ---------------------------------------------------------------------------

/// A base-class expression as written in the class header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum BaseRef {
    /// Reducible to a dotted name, e.g. `Base` or `pkg.mod.Base`.
    Named(String),
    /// Anything else (`make_mixin()`, `bases[0]`); never resolvable.
    Dynamic(String),
}

impl BaseRef {
    pub fn as_named(&self) -> Option<&str> {
        match self {
            BaseRef::Named(name) => Some(name),
            BaseRef::Dynamic(_) => None,
        }
    }
}

/// An import statement, one edge per imported name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEdge {
    /// `b` for `from a import b`, `a.b` for `import a.b`, `*` for star imports.
    pub imported_name: String,
    /// Absolute dotted module path (relative imports resolved best-effort).
    pub imported_from_module: String,
    pub alias: Option<String>,
    pub line: usize,
}

impl ImportEdge {
    pub fn is_star(&self) -> bool {
        self.imported_name == "*"
    }

    /// `import a.b` rather than `from a import b`.
    pub fn is_module_import(&self) -> bool {
        self.imported_name == self.imported_from_module
    }

    /// Name the import binds in the importing scope.
    pub fn bound_name(&self) -> &str {
        if let Some(alias) = &self.alias {
            return alias;
        }
        if self.is_module_import() {
            // `import a.b` binds `a`.
            return self
                .imported_name
                .split('.')
                .next()
                .unwrap_or(&self.imported_name);
        }
        &self.imported_name
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodEntity {
    pub name: String,
    pub qualified_name: String,
    pub parameters: Vec<ParamSpec>,
    pub return_annotation: Option<String>,
    pub is_async: bool,
    pub decorators: Vec<String>,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeEntity {
    pub name: String,
    pub type_annotation: Option<String>,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntity {
    pub name: String,
    pub qualified_name: String,
    pub bases: Vec<BaseRef>,
    pub docstring: Option<String>,
    pub line: usize,
    pub methods: Vec<MethodEntity>,
    pub attributes: Vec<AttributeEntity>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntity {
    pub name: String,
    pub qualified_name: String,
    pub parameters: Vec<ParamSpec>,
    pub return_annotation: Option<String>,
    pub is_async: bool,
    pub decorators: Vec<String>,
    pub line: usize,
}

/// Everything the parser extracts from one source file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedModule {
    pub file_path: String,
    pub module_name: String,
    pub imports: Vec<ImportEdge>,
    pub classes: Vec<ClassEntity>,
    pub functions: Vec<FunctionEntity>,
    /// Module-level assignment targets.
    pub variables: Vec<String>,
}

impl ParsedModule {
    pub fn method_count(&self) -> usize {
        self.classes.iter().map(|c| c.methods.len()).sum()
    }

    pub fn attribute_count(&self) -> usize {
        self.classes.iter().map(|c| c.attributes.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub source_url: Option<String>,
    pub ingested_at: Option<String>,
}

impl Repository {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_url: None,
            ingested_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: i64,
    pub name: String,
    pub source_url: Option<String>,
    pub ingested_at: Option<String>,
    /// Incremented on every ingestion run; rows remember the run that last
    /// touched them.
    pub generation: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub relative_path: String,
    pub module_name: String,
    pub content_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub id: i64,
    pub repository_id: i64,
    pub file_id: i64,
    pub module_name: String,
    pub name: String,
    pub qualified_name: String,
    pub bases: Vec<BaseRef>,
    pub docstring: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRecord {
    pub id: i64,
    pub class_id: i64,
    pub name: String,
    pub qualified_name: String,
    pub parameters: Vec<ParamSpec>,
    pub return_annotation: Option<String>,
    pub is_async: bool,
    pub decorators: Vec<String>,
}

impl MethodRecord {
    pub fn is_static(&self) -> bool {
        self.decorators.iter().any(|d| d == "staticmethod")
    }

    pub fn is_property(&self) -> bool {
        self.decorators
            .iter()
            .any(|d| d == "property" || d.ends_with(".setter") || d.ends_with("cached_property"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub id: i64,
    pub class_id: i64,
    pub name: String,
    pub type_annotation: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub id: i64,
    pub repository_id: i64,
    pub file_id: i64,
    pub module_name: String,
    pub name: String,
    pub qualified_name: String,
    pub parameters: Vec<ParamSpec>,
    pub return_annotation: Option<String>,
    pub is_async: bool,
}

/// Entity counts for the whole store or one repository.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub repositories: i64,
    pub files: i64,
    pub classes: i64,
    pub methods: i64,
    pub functions: i64,
    pub attributes: i64,
    pub imports: i64,
}

/// Rows removed by a stale-generation prune.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub files: usize,
    /// Classes, methods, attributes, functions, imports and variables.
    pub entities: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import(name: &str, module: &str, alias: Option<&str>) -> ImportEdge {
        ImportEdge {
            imported_name: name.to_string(),
            imported_from_module: module.to_string(),
            alias: alias.map(str::to_string),
            line: 1,
        }
    }

    #[test]
    fn bound_name_for_plain_module_import() {
        assert_eq!(import("os.path", "os.path", None).bound_name(), "os");
    }

    #[test]
    fn bound_name_prefers_alias() {
        assert_eq!(import("numpy", "numpy", Some("np")).bound_name(), "np");
        assert_eq!(import("Foo", "pkg.mod", Some("F")).bound_name(), "F");
    }

    #[test]
    fn bound_name_for_from_import() {
        assert_eq!(import("Foo", "pkg.mod", None).bound_name(), "Foo");
    }

    #[test]
    fn required_parameters_exclude_defaults_and_variadics() {
        let p = |kind, has_default| ParamSpec {
            name: "p".into(),
            has_default,
            kind,
            annotation: None,
        };
        assert!(p(ParamKind::PositionalOrKeyword, false).is_required());
        assert!(!p(ParamKind::PositionalOrKeyword, true).is_required());
        assert!(!p(ParamKind::VarPositional, false).is_required());
        assert!(p(ParamKind::KeywordOnly, false).is_required());
    }

    #[test]
    fn base_ref_serializes_tagged() {
        let json = serde_json::to_string(&BaseRef::Named("pkg.Base".into())).unwrap();
        assert_eq!(json, r#"{"kind":"named","text":"pkg.Base"}"#);
        let back: BaseRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_named(), Some("pkg.Base"));
    }
}
