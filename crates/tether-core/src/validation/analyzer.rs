//! Candidate-script analysis into typed usage events.
//!
//! Type tracking is deliberately shallow: a per-scope map from variable to
//! class, fed by direct instantiation, annotations, `with … as` and plain
//! `y = x` copies. There are no control-flow merges and no return-type
//! propagation; the last assignment seen in source order wins, and anything
//! else makes the variable unknown.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tree_sitter::Node;

use crate::errors::ParseError;
use crate::indexer::imports::resolve_relative_module;
use crate::indexer::parser::{
    child_blocks, dotted_name, named_children, node_text, parse_parameters, parse_tree,
};
use crate::models::{ImportEdge, ParamKind};

static DOTTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap()
});

static BUILTINS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "abs", "aiter", "all", "anext", "any", "ascii", "bin", "bool", "breakpoint",
        "bytearray", "bytes", "callable", "chr", "classmethod", "compile", "complex",
        "delattr", "dict", "dir", "divmod", "enumerate", "eval", "exec", "filter", "float",
        "format", "frozenset", "getattr", "globals", "hasattr", "hash", "help", "hex", "id",
        "input", "int", "isinstance", "issubclass", "iter", "len", "list", "locals", "map",
        "max", "memoryview", "min", "next", "object", "oct", "open", "ord", "pow", "print",
        "property", "range", "repr", "reversed", "round", "set", "setattr", "slice",
        "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
        "__import__", "self", "cls", "None", "True", "False", "NotImplemented", "Ellipsis",
        "BaseException", "Exception", "ArithmeticError", "AssertionError", "AttributeError",
        "BlockingIOError", "BrokenPipeError", "BufferError", "ConnectionError",
        "EOFError", "FileExistsError", "FileNotFoundError", "FloatingPointError",
        "GeneratorExit", "ImportError", "IndexError", "InterruptedError",
        "IsADirectoryError", "KeyError", "KeyboardInterrupt", "LookupError", "MemoryError",
        "ModuleNotFoundError", "NameError", "NotADirectoryError", "NotImplementedError",
        "OSError", "OverflowError", "PermissionError", "RecursionError", "ReferenceError",
        "RuntimeError", "StopAsyncIteration", "StopIteration", "SyntaxError", "SystemError",
        "SystemExit", "TimeoutError", "TypeError", "UnboundLocalError", "UnicodeError",
        "UnicodeDecodeError", "UnicodeEncodeError", "ValueError", "ZeroDivisionError",
        "Warning", "DeprecationWarning", "RuntimeWarning", "UserWarning",
    ]
    .into_iter()
    .collect()
});

const LITERAL_KINDS: &[&str] = &[
    "string",
    "concatenated_string",
    "integer",
    "float",
    "list",
    "dictionary",
    "set",
    "tuple",
    "list_comprehension",
    "dictionary_comprehension",
    "set_comprehension",
    "true",
    "false",
    "none",
];

// ---------------------------------------------------------------------------
// Event model
// ---------------------------------------------------------------------------

/// 1-based source position of a usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Site {
    pub line: usize,
    pub column: usize,
}

impl Site {
    fn of(node: Node<'_>) -> Self {
        let p = node.start_position();
        Site {
            line: p.row + 1,
            column: p.column + 1,
        }
    }
}

/// Shape of the arguments at a call site.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CallArgs {
    pub positional: usize,
    pub keywords: Vec<String>,
    /// `*args` or `**kwargs` at the call site; arity cannot be checked.
    pub has_splat: bool,
}

impl CallArgs {
    pub fn arg_count(&self) -> usize {
        self.positional + self.keywords.len()
    }
}

/// How a receiver's class became known.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// `x = Foo()` or `with Foo() as x`.
    Instantiation,
    /// `x: Foo = …` or an annotated parameter.
    Annotation,
    /// The class object itself, `Foo.create()`.
    ClassReference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub origin: Origin,
    /// Number of `y = x` copies between the origin and the use.
    pub hops: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReceiverType {
    Known {
        class_name: String,
        module: Option<String>,
        provenance: Provenance,
    },
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UsageEvent {
    ImportUsage {
        module: String,
        /// `None` for `import module` and star imports.
        name: Option<String>,
        alias: Option<String>,
        site: Site,
    },
    Instantiation {
        var: Option<String>,
        class_name: String,
        module: Option<String>,
        /// Star-imported modules that may bind an otherwise unbound name.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        star_sources: Vec<String>,
        args: CallArgs,
        site: Site,
    },
    MethodCall {
        receiver: String,
        target: ReceiverType,
        method_name: String,
        args: CallArgs,
        site: Site,
    },
    AttributeAccess {
        receiver: String,
        target: ReceiverType,
        attr_name: String,
        site: Site,
    },
    FunctionCall {
        name: String,
        module: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        star_sources: Vec<String>,
        args: CallArgs,
        site: Site,
    },
}

impl UsageEvent {
    pub fn site(&self) -> Site {
        match self {
            UsageEvent::ImportUsage { site, .. }
            | UsageEvent::Instantiation { site, .. }
            | UsageEvent::MethodCall { site, .. }
            | UsageEvent::AttributeAccess { site, .. }
            | UsageEvent::FunctionCall { site, .. } => *site,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            UsageEvent::ImportUsage { .. } => "import",
            UsageEvent::Instantiation { .. } => "instantiation",
            UsageEvent::MethodCall { .. } => "method_call",
            UsageEvent::AttributeAccess { .. } => "attribute_access",
            UsageEvent::FunctionCall { .. } => "function_call",
        }
    }

    /// Short human-readable description, e.g. `engine.start()`.
    pub fn describe(&self) -> String {
        match self {
            UsageEvent::ImportUsage {
                module, name: None, ..
            } => format!("import {module}"),
            UsageEvent::ImportUsage {
                module,
                name: Some(name),
                ..
            } => format!("from {module} import {name}"),
            UsageEvent::Instantiation {
                class_name, module, ..
            } => format!("{}()", qualified(module.as_deref(), class_name)),
            UsageEvent::MethodCall {
                receiver,
                method_name,
                ..
            } => format!("{receiver}.{method_name}()"),
            UsageEvent::AttributeAccess {
                receiver,
                attr_name,
                ..
            } => format!("{receiver}.{attr_name}"),
            UsageEvent::FunctionCall { name, module, .. } => {
                format!("{}()", qualified(module.as_deref(), name))
            }
        }
    }
}

fn qualified(module: Option<&str>, name: &str) -> String {
    match module {
        Some(module) if !module.is_empty() => format!("{module}.{name}"),
        _ => name.to_string(),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScriptAnalysis {
    pub events: Vec<UsageEvent>,
    pub imports: Vec<ImportEdge>,
}

// ---------------------------------------------------------------------------
// Analysis state
// ---------------------------------------------------------------------------

/// What a script-level name is bound to by an import.
#[derive(Clone, Debug)]
enum ImportBinding {
    /// `import a.b` binds `a`; attribute chains spell the module path.
    PlainModule,
    /// `import a.b as m`.
    Module(String),
    /// `from m import name`.
    Name { module: String, name: String },
}

/// Variable type inside the analyzer. `Local` marks instances or references
/// of script-defined classes, which produce no events.
#[derive(Clone, Debug)]
enum VarType {
    Known {
        class_name: String,
        module: Option<String>,
        provenance: Provenance,
    },
    Local,
    Unknown,
}

impl VarType {
    fn copied(&self) -> VarType {
        match self {
            VarType::Known {
                class_name,
                module,
                provenance,
            } => VarType::Known {
                class_name: class_name.clone(),
                module: module.clone(),
                provenance: Provenance {
                    origin: provenance.origin,
                    hops: provenance.hops + 1,
                },
            },
            other => other.clone(),
        }
    }

    fn receiver(&self) -> Option<ReceiverType> {
        match self {
            VarType::Known {
                class_name,
                module,
                provenance,
            } => Some(ReceiverType::Known {
                class_name: class_name.clone(),
                module: module.clone(),
                provenance: *provenance,
            }),
            VarType::Local => None,
            VarType::Unknown => Some(ReceiverType::Unknown),
        }
    }
}

/// Resolved target of a call expression.
enum Callee {
    Ignore,
    LocalClass,
    Qualified { name: String, module: Option<String> },
    /// Unbound name in a script with star imports.
    Starred { name: String, sources: Vec<String> },
    Method { receiver: String, target: ReceiverType, method: String },
}

fn is_class_like(name: &str) -> bool {
    name.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false)
}

fn call_args(node: Option<Node<'_>>, source: &[u8]) -> CallArgs {
    let mut args = CallArgs::default();
    let Some(node) = node else {
        return args;
    };
    if node.kind() == "generator_expression" {
        args.positional = 1;
        return args;
    }
    for child in named_children(node) {
        match child.kind() {
            "keyword_argument" => {
                if let Some(name) = child.child_by_field_name("name") {
                    args.keywords.push(node_text(name, source).to_string());
                }
            }
            "list_splat" | "dictionary_splat" => args.has_splat = true,
            "comment" => {}
            _ => args.positional += 1,
        }
    }
    args
}

fn is_method(def: Node<'_>) -> bool {
    let mut parent = def.parent();
    if parent.map(|p| p.kind() == "decorated_definition").unwrap_or(false) {
        parent = parent.and_then(|p| p.parent());
    }
    parent
        .filter(|p| p.kind() == "block")
        .and_then(|block| block.parent())
        .map(|p| p.kind() == "class_definition")
        .unwrap_or(false)
}

/// Identifier chain of an `a.b.c` expression, `None` for anything else.
fn identifier_chain<'s>(node: Node<'_>, source: &'s [u8]) -> Option<Vec<&'s str>> {
    match node.kind() {
        "identifier" => Some(vec![node_text(node, source)]),
        "attribute" => {
            let mut parts = identifier_chain(node.child_by_field_name("object")?, source)?;
            parts.push(node_text(node.child_by_field_name("attribute")?, source));
            Some(parts)
        }
        _ => None,
    }
}

struct Analyzer<'s> {
    source: &'s [u8],
    path: String,
    imports: HashMap<String, ImportBinding>,
    star_sources: Vec<String>,
    local_classes: HashSet<String>,
    local_functions: HashSet<String>,
    scopes: Vec<HashMap<String, VarType>>,
    out: ScriptAnalysis,
}

impl<'s> Analyzer<'s> {
    fn text(&self, node: Node<'_>) -> &'s str {
        node_text(node, self.source)
    }

    fn lookup_var(&self, name: &str) -> Option<&VarType> {
        if let Some(found) = self.scopes.last().and_then(|s| s.get(name)) {
            return Some(found);
        }
        self.scopes.first().and_then(|s| s.get(name))
    }

    fn bind(&mut self, name: &str, ty: VarType) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ty);
        }
    }

    fn emit(&mut self, event: UsageEvent) {
        self.out.events.push(event);
    }

    // -- pre-pass ---------------------------------------------------------

    fn collect_definitions(&mut self, node: Node<'_>) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match current.kind() {
                "class_definition" => {
                    if let Some(name) = current.child_by_field_name("name") {
                        self.local_classes.insert(self.text(name).to_string());
                    }
                }
                "function_definition" if !is_method(current) => {
                    if let Some(name) = current.child_by_field_name("name") {
                        self.local_functions.insert(self.text(name).to_string());
                    }
                }
                _ => {}
            }
            stack.extend(named_children(current));
        }
    }

    // -- name resolution --------------------------------------------------

    /// Resolve a dotted identifier chain whose head is not a variable.
    fn resolve_chain(&self, parts: &[&str]) -> Callee {
        let Some((&head, rest)) = parts.split_first() else {
            return Callee::Ignore;
        };
        let last = parts[parts.len() - 1];

        if rest.is_empty() {
            if self.local_classes.contains(head) {
                return Callee::LocalClass;
            }
            if self.local_functions.contains(head) {
                return Callee::Ignore;
            }
            return match self.imports.get(head) {
                Some(ImportBinding::Name { module, name }) => Callee::Qualified {
                    name: name.clone(),
                    module: Some(module.clone()),
                },
                Some(_) => Callee::Ignore,
                None if BUILTINS.contains(head) => Callee::Ignore,
                None if !self.star_sources.is_empty() => Callee::Starred {
                    name: head.to_string(),
                    sources: self.star_sources.clone(),
                },
                None => Callee::Qualified {
                    name: head.to_string(),
                    module: None,
                },
            };
        }

        // Module path, plus how many leading parts it consumed.
        let (module, consumed) = match self.imports.get(head) {
            Some(ImportBinding::PlainModule) => (head.to_string(), 1),
            Some(ImportBinding::Module(module)) => (module.clone(), 1),
            Some(ImportBinding::Name { module, name }) if is_class_like(name) => {
                return self.class_member(
                    parts,
                    name,
                    Some(module.clone()),
                    1,
                );
            }
            Some(ImportBinding::Name { module, name }) => (format!("{module}.{name}"), 1),
            None => {
                if BUILTINS.contains(head)
                    || self.local_classes.contains(head)
                    || self.local_functions.contains(head)
                {
                    return Callee::Ignore;
                }
                return Callee::Method {
                    receiver: parts[..parts.len() - 1].join("."),
                    target: ReceiverType::Unknown,
                    method: last.to_string(),
                };
            }
        };

        let mut module = module;
        for (offset, part) in parts[consumed..parts.len() - 1].iter().enumerate() {
            if is_class_like(part) {
                return self.class_member(parts, part, Some(module), consumed + offset + 1);
            }
            module = format!("{module}.{part}");
        }
        Callee::Qualified {
            name: last.to_string(),
            module: Some(module),
        }
    }

    /// `parts[..class_end]` names a class; the call targets a member of it.
    fn class_member(
        &self,
        parts: &[&str],
        class_name: &str,
        module: Option<String>,
        class_end: usize,
    ) -> Callee {
        let receiver = parts[..parts.len() - 1].join(".");
        let method = parts[parts.len() - 1].to_string();
        if class_end == parts.len() - 1 {
            Callee::Method {
                receiver,
                target: ReceiverType::Known {
                    class_name: class_name.to_string(),
                    module,
                    provenance: Provenance {
                        origin: Origin::ClassReference,
                        hops: 0,
                    },
                },
                method,
            }
        } else {
            Callee::Method {
                receiver,
                target: ReceiverType::Unknown,
                method,
            }
        }
    }

    fn callee_of(&self, function: Node<'_>) -> Callee {
        if let Some(parts) = identifier_chain(function, self.source) {
            let head = parts[0];
            if let Some(var) = self.lookup_var(head) {
                if parts.len() == 1 {
                    return Callee::Ignore;
                }
                let target = if parts.len() == 2 {
                    var.receiver()
                } else {
                    var.receiver().map(|_| ReceiverType::Unknown)
                };
                return match target {
                    Some(target) => Callee::Method {
                        receiver: parts[..parts.len() - 1].join("."),
                        target,
                        method: parts[parts.len() - 1].to_string(),
                    },
                    None => Callee::Ignore,
                };
            }
            return self.resolve_chain(&parts);
        }

        if function.kind() != "attribute" {
            return Callee::Ignore;
        }
        let (Some(object), Some(attribute)) = (
            function.child_by_field_name("object"),
            function.child_by_field_name("attribute"),
        ) else {
            return Callee::Ignore;
        };
        if LITERAL_KINDS.contains(&object.kind()) {
            return Callee::Ignore;
        }
        let target = match self.type_of_value(object) {
            VarType::Local => return Callee::Ignore,
            VarType::Known {
                class_name,
                module,
                provenance,
            } => ReceiverType::Known {
                class_name,
                module,
                provenance,
            },
            VarType::Unknown => ReceiverType::Unknown,
        };
        Callee::Method {
            receiver: self.text(object).to_string(),
            target,
            method: self.text(attribute).to_string(),
        }
    }

    /// Type of an assigned or receiving expression.
    fn type_of_value(&self, node: Node<'_>) -> VarType {
        match node.kind() {
            "parenthesized_expression" => node
                .named_child(0)
                .map(|inner| self.type_of_value(inner))
                .unwrap_or(VarType::Unknown),
            "call" => {
                let Some(function) = node.child_by_field_name("function") else {
                    return VarType::Unknown;
                };
                match self.callee_of(function) {
                    Callee::LocalClass => VarType::Local,
                    Callee::Qualified { name, module } if is_class_like(&name) => VarType::Known {
                        class_name: name,
                        module,
                        provenance: Provenance {
                            origin: Origin::Instantiation,
                            hops: 0,
                        },
                    },
                    // With one star source the class can only come from there.
                    Callee::Starred { name, sources } if is_class_like(&name) && sources.len() == 1 => {
                        VarType::Known {
                            class_name: name,
                            module: sources.into_iter().next(),
                            provenance: Provenance {
                                origin: Origin::Instantiation,
                                hops: 0,
                            },
                        }
                    }
                    _ => VarType::Unknown,
                }
            }
            "identifier" => {
                let name = self.text(node);
                if let Some(var) = self.lookup_var(name) {
                    return var.copied();
                }
                match self.resolve_chain(&[name]) {
                    Callee::LocalClass => VarType::Local,
                    Callee::Qualified {
                        name,
                        module: Some(module),
                    } if is_class_like(&name) => VarType::Known {
                        class_name: name,
                        module: Some(module),
                        provenance: Provenance {
                            origin: Origin::ClassReference,
                            hops: 0,
                        },
                    },
                    _ => VarType::Unknown,
                }
            }
            _ => VarType::Unknown,
        }
    }

    /// Class named by an annotation such as `Foo`, `pkg.Foo` or `"Foo"`.
    fn type_from_annotation(&self, annotation: &str) -> Option<VarType> {
        let text = annotation.trim().trim_matches(|c| c == '"' || c == '\'');
        if !DOTTED_RE.is_match(text) {
            return None;
        }
        let parts: Vec<&str> = text.split('.').collect();
        let last = parts[parts.len() - 1];
        if !is_class_like(last) {
            return None;
        }
        // Nested classes such as `mod.Outer.Inner` resolve to a method
        // target here and are not tracked.
        let module = match self.resolve_chain(&parts) {
            Callee::LocalClass => return Some(VarType::Local),
            Callee::Qualified { module, .. } => module,
            _ => return None,
        };
        if parts.len() == 1 && BUILTINS.contains(last) {
            return None;
        }
        Some(VarType::Known {
            class_name: last.to_string(),
            module,
            provenance: Provenance {
                origin: Origin::Annotation,
                hops: 0,
            },
        })
    }

    // -- statements -------------------------------------------------------

    fn block(&mut self, node: Node<'_>) {
        for stmt in named_children(node) {
            self.statement(stmt);
        }
    }

    fn statement(&mut self, node: Node<'_>) {
        match node.kind() {
            "import_statement" => self.import_statement(node),
            "import_from_statement" => self.import_from_statement(node),
            "future_import_statement" => {}
            "class_definition" => self.class_definition(node),
            "function_definition" => self.function_scope(node, false),
            "decorated_definition" => {
                for child in named_children(node) {
                    if child.kind() == "decorator" {
                        if let Some(expr) = child.named_child(0) {
                            self.expression(expr);
                        }
                    }
                }
                if let Some(def) = node.child_by_field_name("definition") {
                    match def.kind() {
                        "class_definition" => self.class_definition(def),
                        "function_definition" => self.function_scope(def, false),
                        _ => {}
                    }
                }
            }
            "expression_statement" => {
                for expr in named_children(node) {
                    match expr.kind() {
                        "assignment" => {
                            self.assignment(expr);
                        }
                        "augmented_assignment" => self.augmented_assignment(expr),
                        _ => self.expression(expr),
                    }
                }
            }
            "with_statement" => self.with_statement(node),
            "for_statement" => {
                if let Some(right) = node.child_by_field_name("right") {
                    self.expression(right);
                }
                if let Some(left) = node.child_by_field_name("left") {
                    self.unbind_targets(left);
                }
                for block in child_blocks(node) {
                    self.block(block);
                }
            }
            _ => self.compound(node),
        }
    }

    /// Conditions and clauses of any other statement, then its blocks.
    fn compound(&mut self, node: Node<'_>) {
        for child in named_children(node) {
            match child.kind() {
                "block" => self.block(child),
                kind if kind.ends_with("_clause") => self.compound(child),
                kind if kind.ends_with("_statement") || kind.ends_with("_definition") => {
                    self.statement(child)
                }
                _ => self.expression(child),
            }
        }
    }

    fn import_statement(&mut self, node: Node<'_>) {
        let site = Site::of(node);
        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            let (module, alias) = match name.kind() {
                "aliased_import" => (
                    name.child_by_field_name("name")
                        .and_then(|n| dotted_name(n, self.source)),
                    name.child_by_field_name("alias")
                        .map(|a| self.text(a).to_string()),
                ),
                _ => (dotted_name(name, self.source), None),
            };
            let Some(module) = module else {
                continue;
            };
            match &alias {
                Some(alias) => {
                    self.imports
                        .insert(alias.clone(), ImportBinding::Module(module.clone()));
                }
                None => {
                    let head = module.split('.').next().unwrap_or(&module).to_string();
                    self.imports.insert(head, ImportBinding::PlainModule);
                }
            }
            self.out.imports.push(ImportEdge {
                imported_name: module.clone(),
                imported_from_module: module.clone(),
                alias: alias.clone(),
                line: site.line,
            });
            self.emit(UsageEvent::ImportUsage {
                module,
                name: None,
                alias,
                site,
            });
        }
    }

    fn import_from_statement(&mut self, node: Node<'_>) {
        let site = Site::of(node);
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let module = if module_node.kind() == "relative_import" {
            let mut level = 0;
            let mut suffix = String::new();
            for part in named_children(module_node) {
                match part.kind() {
                    "import_prefix" => level = self.text(part).matches('.').count(),
                    "dotted_name" => suffix = dotted_name(part, self.source).unwrap_or_default(),
                    _ => {}
                }
            }
            resolve_relative_module("", false, level, &suffix)
        } else {
            match dotted_name(module_node, self.source) {
                Some(m) => m,
                None => return,
            }
        };

        if named_children(node)
            .iter()
            .any(|c| c.kind() == "wildcard_import")
        {
            if !self.star_sources.contains(&module) {
                self.star_sources.push(module.clone());
            }
            self.out.imports.push(ImportEdge {
                imported_name: "*".to_string(),
                imported_from_module: module.clone(),
                alias: None,
                line: site.line,
            });
            self.emit(UsageEvent::ImportUsage {
                module: module.clone(),
                name: None,
                alias: None,
                site,
            });
        }

        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            let (imported, alias) = match name.kind() {
                "aliased_import" => (
                    name.child_by_field_name("name")
                        .and_then(|n| dotted_name(n, self.source)),
                    name.child_by_field_name("alias")
                        .map(|a| self.text(a).to_string()),
                ),
                _ => (dotted_name(name, self.source), None),
            };
            let Some(imported) = imported else {
                continue;
            };
            let bound = alias.clone().unwrap_or_else(|| imported.clone());
            self.imports.insert(
                bound,
                ImportBinding::Name {
                    module: module.clone(),
                    name: imported.clone(),
                },
            );
            self.out.imports.push(ImportEdge {
                imported_name: imported.clone(),
                imported_from_module: module.clone(),
                alias: alias.clone(),
                line: site.line,
            });
            self.emit(UsageEvent::ImportUsage {
                module: module.clone(),
                name: Some(imported),
                alias,
                site,
            });
        }
    }

    fn class_definition(&mut self, node: Node<'_>) {
        if let Some(bases) = node.child_by_field_name("superclasses") {
            self.expression(bases);
        }
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        // Class bodies get their own scope; methods see `self` as local.
        self.scopes.push(HashMap::new());
        for stmt in named_children(body) {
            match stmt.kind() {
                "function_definition" => self.function_scope(stmt, true),
                "decorated_definition" => {
                    let is_static = named_children(stmt).iter().any(|c| {
                        c.kind() == "decorator"
                            && c.named_child(0)
                                .map(|e| self.text(e) == "staticmethod")
                                .unwrap_or(false)
                    });
                    match stmt.child_by_field_name("definition") {
                        Some(def) if def.kind() == "function_definition" => {
                            self.function_scope(def, !is_static)
                        }
                        _ => self.statement(stmt),
                    }
                }
                _ => self.statement(stmt),
            }
        }
        self.scopes.pop();
    }

    fn function_scope(&mut self, node: Node<'_>, first_param_is_receiver: bool) {
        let mut scope = HashMap::new();
        if let Some(params) = node.child_by_field_name("parameters") {
            let specs = parse_parameters(params, self.source);
            for (index, spec) in specs.iter().enumerate() {
                let ty = if index == 0
                    && first_param_is_receiver
                    && spec.kind.accepts_positional()
                {
                    VarType::Local
                } else if matches!(spec.kind, ParamKind::VarPositional | ParamKind::VarKeyword) {
                    VarType::Unknown
                } else {
                    spec.annotation
                        .as_deref()
                        .and_then(|a| self.type_from_annotation(a))
                        .unwrap_or(VarType::Unknown)
                };
                scope.insert(spec.name.clone(), ty);
            }
            // Default values are evaluated in the enclosing scope.
            for child in named_children(params) {
                if let Some(value) = child.child_by_field_name("value") {
                    self.expression(value);
                }
            }
        }
        self.scopes.push(scope);
        if let Some(body) = node.child_by_field_name("body") {
            self.block(body);
        }
        self.scopes.pop();
    }

    /// Returns the type of the assigned value so chained assignments share it.
    fn assignment(&mut self, node: Node<'_>) -> VarType {
        let left = node.child_by_field_name("left");
        let single_target = left
            .filter(|l| l.kind() == "identifier")
            .map(|l| self.text(l).to_string());

        let value_type = match node.child_by_field_name("right") {
            Some(right) if right.kind() == "assignment" => self.assignment(right),
            Some(right) => {
                let ty = self.type_of_value(right);
                self.value_expression(right, single_target.as_deref());
                ty
            }
            None => VarType::Unknown,
        };
        let annotated = node
            .child_by_field_name("type")
            .and_then(|t| self.type_from_annotation(self.text(t)));
        let ty = match annotated {
            Some(ty) => ty,
            None => value_type,
        };

        if let Some(left) = left {
            match single_target {
                Some(name) => self.bind(&name, ty.clone()),
                None => self.unbind_targets(left),
            }
        }
        ty
    }

    fn augmented_assignment(&mut self, node: Node<'_>) {
        if let Some(right) = node.child_by_field_name("right") {
            self.expression(right);
        }
        if let Some(left) = node.child_by_field_name("left") {
            self.unbind_targets(left);
        }
    }

    fn with_statement(&mut self, node: Node<'_>) {
        for child in named_children(node) {
            match child.kind() {
                "with_clause" => {
                    for item in named_children(child) {
                        let Some(value) = item.child_by_field_name("value") else {
                            continue;
                        };
                        if value.kind() == "as_pattern" {
                            let expr = value.named_child(0);
                            let alias = value
                                .child_by_field_name("alias")
                                .and_then(|a| a.named_child(0).or(Some(a)));
                            let target = alias
                                .filter(|a| a.kind() == "identifier")
                                .map(|a| self.text(a).to_string());
                            if let Some(expr) = expr {
                                let ty = self.type_of_value(expr);
                                self.value_expression(expr, target.as_deref());
                                if let Some(target) = target {
                                    self.bind(&target, ty);
                                }
                            }
                        } else {
                            self.expression(value);
                        }
                    }
                }
                "block" => self.block(child),
                _ => {}
            }
        }
    }

    /// Assignment targets other than a single name lose their tracking;
    /// subscripts and attributes still have their inner expressions visited.
    fn unbind_targets(&mut self, target: Node<'_>) {
        match target.kind() {
            "identifier" => {
                let name = self.text(target).to_string();
                self.bind(&name, VarType::Unknown);
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list" => {
                for child in named_children(target) {
                    self.unbind_targets(child);
                }
            }
            "attribute" => {
                if let Some(object) = target.child_by_field_name("object") {
                    self.expression(object);
                }
            }
            _ => self.expression(target),
        }
    }

    // -- expressions ------------------------------------------------------

    fn value_expression(&mut self, node: Node<'_>, target: Option<&str>) {
        if node.kind() == "call" {
            self.call(node, target);
        } else {
            self.expression(node);
        }
    }

    fn expression(&mut self, node: Node<'_>) {
        match node.kind() {
            "call" => self.call(node, None),
            "attribute" => self.attribute(node),
            "lambda" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.expression(body);
                }
            }
            "assignment" => {
                self.assignment(node);
            }
            "named_expression" => {
                if let Some(value) = node.child_by_field_name("value") {
                    let ty = self.type_of_value(value);
                    self.value_expression(value, None);
                    if let Some(name) = node.child_by_field_name("name") {
                        let name = self.text(name).to_string();
                        self.bind(&name, ty);
                    }
                }
            }
            _ => {
                for child in named_children(node) {
                    self.expression(child);
                }
            }
        }
    }

    fn attribute(&mut self, node: Node<'_>) {
        let (Some(object), Some(attribute)) = (
            node.child_by_field_name("object"),
            node.child_by_field_name("attribute"),
        ) else {
            return;
        };
        let attr_name = self.text(attribute).to_string();

        if object.kind() == "identifier" {
            let head = self.text(object);
            let target = match self.lookup_var(head) {
                Some(var) => var.receiver(),
                None => match self.resolve_chain(&[head]) {
                    Callee::Qualified {
                        name,
                        module: Some(module),
                    } if is_class_like(&name) => Some(ReceiverType::Known {
                        class_name: name,
                        module: Some(module),
                        provenance: Provenance {
                            origin: Origin::ClassReference,
                            hops: 0,
                        },
                    }),
                    _ => None,
                },
            };
            if let Some(target) = target {
                self.emit(UsageEvent::AttributeAccess {
                    receiver: head.to_string(),
                    target,
                    attr_name,
                    site: Site::of(attribute),
                });
            }
            return;
        }
        self.expression(object);
    }

    fn call(&mut self, node: Node<'_>, target_var: Option<&str>) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let arguments = node.child_by_field_name("arguments");
        let args = call_args(arguments, self.source);
        let site = Site::of(node);

        // Receivers of method calls may hold calls or attribute accesses.
        if function.kind() == "attribute" {
            if let Some(object) = function.child_by_field_name("object") {
                self.expression(object);
            }
        }

        match self.callee_of(function) {
            Callee::Ignore | Callee::LocalClass => {}
            Callee::Qualified { name, module } if is_class_like(&name) => {
                self.emit(UsageEvent::Instantiation {
                    var: target_var.map(str::to_string),
                    class_name: name,
                    module,
                    star_sources: Vec::new(),
                    args,
                    site,
                });
            }
            Callee::Qualified { name, module } => {
                self.emit(UsageEvent::FunctionCall {
                    name,
                    module,
                    star_sources: Vec::new(),
                    args,
                    site,
                });
            }
            Callee::Starred { name, sources } if is_class_like(&name) => {
                self.emit(UsageEvent::Instantiation {
                    var: target_var.map(str::to_string),
                    class_name: name,
                    module: None,
                    star_sources: sources,
                    args,
                    site,
                });
            }
            Callee::Starred { name, sources } => {
                self.emit(UsageEvent::FunctionCall {
                    name,
                    module: None,
                    star_sources: sources,
                    args,
                    site,
                });
            }
            Callee::Method {
                receiver,
                target,
                method,
            } => {
                let site = function
                    .child_by_field_name("attribute")
                    .map(Site::of)
                    .unwrap_or(site);
                self.emit(UsageEvent::MethodCall {
                    receiver,
                    target,
                    method_name: method,
                    args,
                    site,
                });
            }
        }

        if function.kind() != "attribute" && function.kind() != "identifier" {
            self.expression(function);
        }
        if let Some(arguments) = arguments {
            self.expression(arguments);
        }
    }
}

/// Analyze a candidate script into usage events.
///
/// `path` only labels diagnostics. Unparsable input fails with
/// [`ParseError`] rather than yielding an empty analysis.
pub fn analyze(script_text: &str, path: Option<&str>) -> Result<ScriptAnalysis, ParseError> {
    let path = path.unwrap_or("<script>");
    let tree = parse_tree(script_text, path)?;
    let root = tree.root_node();

    let mut analyzer = Analyzer {
        source: script_text.as_bytes(),
        path: path.to_string(),
        imports: HashMap::new(),
        star_sources: Vec::new(),
        local_classes: HashSet::new(),
        local_functions: HashSet::new(),
        scopes: vec![HashMap::new()],
        out: ScriptAnalysis::default(),
    };
    analyzer.collect_definitions(root);
    analyzer.block(root);
    tracing::debug!(
        path = %analyzer.path,
        events = analyzer.out.events.len(),
        "Analyzed script"
    );
    Ok(analyzer.out)
}
