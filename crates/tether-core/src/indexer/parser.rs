//! Python source parsing into structural entities.
//!
//! Uses the native tree-sitter Python grammar. A tree containing ERROR or
//! MISSING nodes counts as invalid syntax, so a broken file never contributes
//! half-extracted entities to the graph.

use std::sync::LazyLock;

use regex::Regex;
use tree_sitter::{Node, Parser, Tree};

use crate::errors::ParseError;
use crate::indexer::imports::{is_package_init, module_name_for_path, resolve_relative_module};
use crate::models::{
    AttributeEntity, BaseRef, ClassEntity, FunctionEntity, ImportEdge, MethodEntity, ParamKind,
    ParamSpec, ParsedModule,
};

static DOCSTRING_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(?i:[rbuf]{0,2})("""|'''|"|')"#).unwrap());

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

/// Parse Python source into a syntax tree, rejecting trees with errors.
pub fn parse_tree(source: &str, file_path: &str) -> Result<Tree, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| ParseError::new(file_path, format!("Failed to set language: {e}")))?;

    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| ParseError::new(file_path, "parser produced no tree"))?;

    if let Some(node) = first_error_node(tree.root_node()) {
        let position = node.start_position();
        let message = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "invalid syntax".to_string()
        };
        return Err(ParseError::new(file_path, message).at(position.row + 1, position.column + 1));
    }
    Ok(tree)
}

/// First ERROR or MISSING node in source order.
fn first_error_node(root: Node<'_>) -> Option<Node<'_>> {
    if !root.has_error() {
        return None;
    }
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    Some(root)
}

pub(crate) fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    let children = node.named_children(&mut cursor).collect();
    children
}

/// Statement blocks directly owned by a compound statement, including the
/// blocks of its `elif`/`else`/`except`/`finally`/`case` clauses.
pub(crate) fn child_blocks(node: Node<'_>) -> Vec<Node<'_>> {
    let mut blocks = Vec::new();
    for child in named_children(node) {
        if child.kind() == "block" {
            blocks.push(child);
        } else if child.kind().ends_with("_clause") {
            blocks.extend(child_blocks(child));
        }
    }
    blocks
}

pub(crate) fn node_text<'s>(node: Node<'_>, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or("")
}

/// Reduce an expression to a dotted name: `a`, `a.b.c`, `a.B[T]` → `a.B`.
pub(crate) fn dotted_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source).to_string()),
        "dotted_name" => Some(node_text(node, source).split_whitespace().collect()),
        "attribute" => {
            let object = dotted_name(node.child_by_field_name("object")?, source)?;
            let attribute = node_text(node.child_by_field_name("attribute")?, source);
            Some(format!("{object}.{attribute}"))
        }
        "subscript" => dotted_name(node.child_by_field_name("value")?, source),
        _ => None,
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn clean_docstring(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let caps = DOCSTRING_OPEN_RE.captures(trimmed)?;
    let quote = caps.get(1)?.as_str();
    let body = &trimmed[caps.get(0)?.end()..];
    let body = body.strip_suffix(quote).unwrap_or(body).trim();
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

/// Parse a `parameters` / `lambda_parameters` node.
pub(crate) fn parse_parameters(node: Node<'_>, source: &[u8]) -> Vec<ParamSpec> {
    let mut params: Vec<ParamSpec> = Vec::new();
    let mut keyword_only = false;

    let positional_kind = |keyword_only: bool| {
        if keyword_only {
            ParamKind::KeywordOnly
        } else {
            ParamKind::PositionalOrKeyword
        }
    };

    for child in named_children(node) {
        match child.kind() {
            "identifier" => params.push(ParamSpec {
                name: node_text(child, source).to_string(),
                has_default: false,
                kind: positional_kind(keyword_only),
                annotation: None,
            }),
            "typed_parameter" => {
                let annotation = child
                    .child_by_field_name("type")
                    .map(|t| node_text(t, source).to_string());
                let Some(inner) = child.named_child(0) else {
                    continue;
                };
                let name = node_text(inner, source).trim_start_matches('*').to_string();
                let kind = match inner.kind() {
                    "list_splat_pattern" => {
                        keyword_only = true;
                        ParamKind::VarPositional
                    }
                    "dictionary_splat_pattern" => ParamKind::VarKeyword,
                    _ => positional_kind(keyword_only),
                };
                params.push(ParamSpec {
                    name,
                    has_default: false,
                    kind,
                    annotation,
                });
            }
            "default_parameter" | "typed_default_parameter" => {
                let name = child
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source).to_string())
                    .unwrap_or_default();
                let annotation = child
                    .child_by_field_name("type")
                    .map(|t| node_text(t, source).to_string());
                params.push(ParamSpec {
                    name,
                    has_default: true,
                    kind: positional_kind(keyword_only),
                    annotation,
                });
            }
            "list_splat_pattern" => {
                keyword_only = true;
                params.push(ParamSpec {
                    name: node_text(child, source).trim_start_matches('*').to_string(),
                    has_default: false,
                    kind: ParamKind::VarPositional,
                    annotation: None,
                });
            }
            "dictionary_splat_pattern" => params.push(ParamSpec {
                name: node_text(child, source).trim_start_matches('*').to_string(),
                has_default: false,
                kind: ParamKind::VarKeyword,
                annotation: None,
            }),
            "keyword_separator" => keyword_only = true,
            "positional_separator" => {
                for param in params.iter_mut() {
                    if param.kind == ParamKind::PositionalOrKeyword {
                        param.kind = ParamKind::PositionalOnly;
                    }
                }
            }
            _ => {}
        }
    }
    params
}

/// Decorator expressions without `@`; call decorators keep only the callee.
fn split_decorated<'t>(node: Node<'t>, source: &[u8]) -> (Vec<String>, Option<Node<'t>>) {
    let mut decorators = Vec::new();
    for child in named_children(node) {
        if child.kind() != "decorator" {
            continue;
        }
        let Some(expr) = child.named_child(0) else {
            continue;
        };
        let target = if expr.kind() == "call" {
            expr.child_by_field_name("function").unwrap_or(expr)
        } else {
            expr
        };
        decorators.push(node_text(target, source).split_whitespace().collect());
    }
    (decorators, node.child_by_field_name("definition"))
}

fn is_async_def(node: Node<'_>) -> bool {
    node.child(0).map(|c| c.kind() == "async").unwrap_or(false)
}

/// Assignment targets (`a`, `a, b`, `self.x`) flattened from pattern lists.
fn flatten_targets(node: Node<'_>) -> Vec<Node<'_>> {
    match node.kind() {
        "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list" => named_children(node)
            .into_iter()
            .flat_map(flatten_targets)
            .collect(),
        _ => vec![node],
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

struct Extractor<'s> {
    source: &'s [u8],
    is_package: bool,
    module: ParsedModule,
}

impl<'s> Extractor<'s> {
    fn text(&self, node: Node<'_>) -> &'s str {
        node_text(node, self.source)
    }

    fn module_block(&mut self, block: Node<'_>) {
        for stmt in named_children(block) {
            match stmt.kind() {
                "import_statement" => self.import_statement(stmt),
                "import_from_statement" => self.import_from_statement(stmt),
                "class_definition" => {
                    let prefix = self.module.module_name.clone();
                    self.class_definition(stmt, &prefix);
                }
                "function_definition" => self.module_function(stmt, Vec::new()),
                "decorated_definition" => {
                    let (decorators, definition) = split_decorated(stmt, self.source);
                    match definition {
                        Some(def) if def.kind() == "function_definition" => {
                            self.module_function(def, decorators)
                        }
                        Some(def) if def.kind() == "class_definition" => {
                            let prefix = self.module.module_name.clone();
                            self.class_definition(def, &prefix);
                        }
                        _ => {}
                    }
                }
                "expression_statement" => self.module_assignment(stmt),
                _ => {
                    for nested in child_blocks(stmt) {
                        self.module_block(nested);
                    }
                }
            }
        }
    }

    fn import_statement(&mut self, node: Node<'_>) {
        let line = node.start_position().row + 1;
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
            if let Some(module) = module {
                self.module.imports.push(ImportEdge {
                    imported_name: module.clone(),
                    imported_from_module: module,
                    alias,
                    line,
                });
            }
        }
    }

    fn import_from_statement(&mut self, node: Node<'_>) {
        let line = node.start_position().row + 1;
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
            resolve_relative_module(&self.module.module_name, self.is_package, level, &suffix)
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
            self.module.imports.push(ImportEdge {
                imported_name: "*".to_string(),
                imported_from_module: module.clone(),
                alias: None,
                line,
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
            if let Some(imported) = imported {
                self.module.imports.push(ImportEdge {
                    imported_name: imported,
                    imported_from_module: module.clone(),
                    alias,
                    line,
                });
            }
        }
    }

    fn module_assignment(&mut self, stmt: Node<'_>) {
        for expr in named_children(stmt) {
            if expr.kind() != "assignment" {
                continue;
            }
            let Some(left) = expr.child_by_field_name("left") else {
                continue;
            };
            for target in flatten_targets(left) {
                if target.kind() == "identifier" {
                    let name = self.text(target).to_string();
                    if !self.module.variables.contains(&name) {
                        self.module.variables.push(name);
                    }
                }
            }
        }
    }

    fn module_function(&mut self, node: Node<'_>, decorators: Vec<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let qualified_name = qualify(&self.module.module_name, &name);
        let parameters = node
            .child_by_field_name("parameters")
            .map(|p| parse_parameters(p, self.source))
            .unwrap_or_default();

        let mut nested = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            self.collect_nested_classes(body, &qualified_name, &mut nested);
        }

        let function = FunctionEntity {
            name,
            qualified_name,
            parameters,
            return_annotation: node
                .child_by_field_name("return_type")
                .map(|r| self.text(r).to_string()),
            is_async: is_async_def(node),
            decorators,
            line: node.start_position().row + 1,
        };
        // Conditional redefinitions collapse to the last one.
        self.module.functions.retain(|f| f.name != function.name);
        self.module.functions.push(function);

        for (prefix, class_node) in nested {
            self.class_definition(class_node, &prefix);
        }
    }

    fn class_definition(&mut self, node: Node<'_>, prefix: &str) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let qualified_name = qualify(prefix, &name);

        let bases = node
            .child_by_field_name("superclasses")
            .map(|args| self.base_refs(args))
            .unwrap_or_default();

        let mut class = ClassEntity {
            name,
            qualified_name,
            bases,
            docstring: None,
            line: node.start_position().row + 1,
            methods: Vec::new(),
            attributes: Vec::new(),
        };

        let mut nested = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            class.docstring = self.docstring(body);
            self.class_block(body, &mut class, &mut nested);
        }
        self.module.classes.push(class);

        for (nested_prefix, class_node) in nested {
            self.class_definition(class_node, &nested_prefix);
        }
    }

    fn base_refs(&self, args: Node<'_>) -> Vec<BaseRef> {
        named_children(args)
            .into_iter()
            .filter(|n| !matches!(n.kind(), "keyword_argument" | "comment"))
            .map(|n| match dotted_name(n, self.source) {
                Some(name) => BaseRef::Named(name),
                None => BaseRef::Dynamic(self.text(n).to_string()),
            })
            .collect()
    }

    fn docstring(&self, body: Node<'_>) -> Option<String> {
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let expr = first.named_child(0)?;
        if expr.kind() != "string" {
            return None;
        }
        clean_docstring(self.text(expr))
    }

    fn class_block<'t>(
        &mut self,
        block: Node<'t>,
        class: &mut ClassEntity,
        nested: &mut Vec<(String, Node<'t>)>,
    ) {
        for stmt in named_children(block) {
            match stmt.kind() {
                "function_definition" => self.method(stmt, Vec::new(), class, nested),
                "decorated_definition" => {
                    let (decorators, definition) = split_decorated(stmt, self.source);
                    match definition {
                        Some(def) if def.kind() == "function_definition" => {
                            self.method(def, decorators, class, nested)
                        }
                        Some(def) if def.kind() == "class_definition" => {
                            nested.push((class.qualified_name.clone(), def))
                        }
                        _ => {}
                    }
                }
                "class_definition" => nested.push((class.qualified_name.clone(), stmt)),
                "expression_statement" => self.class_body_assignment(stmt, class),
                _ => {
                    for inner in child_blocks(stmt) {
                        self.class_block(inner, class, nested);
                    }
                }
            }
        }
    }

    fn class_body_assignment(&self, stmt: Node<'_>, class: &mut ClassEntity) {
        for expr in named_children(stmt) {
            if expr.kind() != "assignment" {
                continue;
            }
            let annotation = expr
                .child_by_field_name("type")
                .map(|t| self.text(t).to_string());
            let Some(left) = expr.child_by_field_name("left") else {
                continue;
            };
            for target in flatten_targets(left) {
                if target.kind() == "identifier" {
                    add_attribute(
                        class,
                        self.text(target),
                        annotation.clone(),
                        target.start_position().row + 1,
                    );
                }
            }
        }
    }

    fn method<'t>(
        &mut self,
        node: Node<'t>,
        decorators: Vec<String>,
        class: &mut ClassEntity,
        nested: &mut Vec<(String, Node<'t>)>,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let qualified_name = qualify(&class.qualified_name, &name);
        let parameters = node
            .child_by_field_name("parameters")
            .map(|p| parse_parameters(p, self.source))
            .unwrap_or_default();

        if let Some(body) = node.child_by_field_name("body") {
            let is_static = decorators.iter().any(|d| d == "staticmethod");
            let receiver = parameters
                .first()
                .filter(|p| !is_static && p.kind.accepts_positional())
                .map(|p| p.name.clone());
            if let Some(receiver) = receiver {
                self.collect_receiver_attributes(body, &receiver, class);
            }
            self.collect_nested_classes(body, &qualified_name, nested);
        }

        let method = MethodEntity {
            name,
            qualified_name,
            parameters,
            return_annotation: node
                .child_by_field_name("return_type")
                .map(|r| self.text(r).to_string()),
            is_async: is_async_def(node),
            decorators,
            line: node.start_position().row + 1,
        };
        add_method(&mut class.methods, method);
    }

    /// `self.x = ...` anywhere in a method body, nested blocks included.
    fn collect_receiver_attributes(&self, body: Node<'_>, receiver: &str, class: &mut ClassEntity) {
        let mut stack = vec![body];
        while let Some(node) = stack.pop() {
            match node.kind() {
                "class_definition" => continue,
                "assignment" | "augmented_assignment" => {
                    let annotation = node
                        .child_by_field_name("type")
                        .map(|t| self.text(t).to_string());
                    if let Some(left) = node.child_by_field_name("left") {
                        for target in flatten_targets(left) {
                            if let Some(attr) = self.receiver_attribute(target, receiver) {
                                add_attribute(
                                    class,
                                    attr,
                                    annotation.clone(),
                                    target.start_position().row + 1,
                                );
                            }
                        }
                    }
                }
                _ => {}
            }
            let mut children = named_children(node);
            children.reverse();
            stack.extend(children);
        }
    }

    fn receiver_attribute(&self, target: Node<'_>, receiver: &str) -> Option<&'s str> {
        if target.kind() != "attribute" {
            return None;
        }
        let object = target.child_by_field_name("object")?;
        if object.kind() != "identifier" || self.text(object) != receiver {
            return None;
        }
        Some(self.text(target.child_by_field_name("attribute")?))
    }

    fn collect_nested_classes<'t>(
        &self,
        block: Node<'t>,
        prefix: &str,
        out: &mut Vec<(String, Node<'t>)>,
    ) {
        for stmt in named_children(block) {
            match stmt.kind() {
                "class_definition" => out.push((prefix.to_string(), stmt)),
                "function_definition" => {
                    if let (Some(name), Some(body)) = (
                        stmt.child_by_field_name("name"),
                        stmt.child_by_field_name("body"),
                    ) {
                        let inner_prefix = qualify(prefix, self.text(name));
                        self.collect_nested_classes(body, &inner_prefix, out);
                    }
                }
                "decorated_definition" => {
                    if let Some(def) = stmt.child_by_field_name("definition") {
                        if def.kind() == "class_definition" {
                            out.push((prefix.to_string(), def));
                        }
                    }
                }
                _ => {
                    for inner in child_blocks(stmt) {
                        self.collect_nested_classes(inner, prefix, out);
                    }
                }
            }
        }
    }
}

fn add_attribute(class: &mut ClassEntity, name: &str, annotation: Option<String>, line: usize) {
    if let Some(existing) = class.attributes.iter_mut().find(|a| a.name == name) {
        if existing.type_annotation.is_none() {
            existing.type_annotation = annotation;
        }
        return;
    }
    class.attributes.push(AttributeEntity {
        name: name.to_string(),
        type_annotation: annotation,
        line,
    });
}

/// Later definitions replace earlier ones, except property setters and
/// deleters, which keep the getter.
fn add_method(methods: &mut Vec<MethodEntity>, method: MethodEntity) {
    let is_accessor = method
        .decorators
        .iter()
        .any(|d| d.ends_with(".setter") || d.ends_with(".deleter"));
    if let Some(index) = methods.iter().position(|m| m.name == method.name) {
        if !is_accessor {
            methods[index] = method;
        }
        return;
    }
    methods.push(method);
}

/// Parse one Python source file into its structural entities.
pub fn parse(file_text: &str, file_path: &str) -> Result<ParsedModule, ParseError> {
    let tree = parse_tree(file_text, file_path)?;
    let mut extractor = Extractor {
        source: file_text.as_bytes(),
        is_package: is_package_init(file_path),
        module: ParsedModule {
            file_path: file_path.to_string(),
            module_name: module_name_for_path(file_path),
            ..ParsedModule::default()
        },
    };
    extractor.module_block(tree.root_node());
    Ok(extractor.module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class<'a>(module: &'a ParsedModule, name: &str) -> &'a ClassEntity {
        module
            .classes
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("class {name} not extracted"))
    }

    #[test]
    fn extracts_plain_aliased_and_from_imports() {
        let src = "\
import os
import numpy as np
from pkg.models import Foo, Bar as B
";
        let module = parse(src, "app/main.py").unwrap();
        assert_eq!(module.module_name, "app.main");
        assert_eq!(module.imports.len(), 4);
        assert_eq!(module.imports[0].imported_name, "os");
        assert_eq!(module.imports[0].imported_from_module, "os");
        assert_eq!(module.imports[1].alias.as_deref(), Some("np"));
        assert_eq!(module.imports[2].imported_name, "Foo");
        assert_eq!(module.imports[2].imported_from_module, "pkg.models");
        assert_eq!(module.imports[3].imported_name, "Bar");
        assert_eq!(module.imports[3].alias.as_deref(), Some("B"));
        assert_eq!(module.imports[3].line, 3);
    }

    #[test]
    fn resolves_relative_and_star_imports() {
        let src = "\
from . import sibling
from ..core import *
from .helpers import tool
";
        let module = parse(src, "pkg/sub/mod.py").unwrap();
        assert_eq!(module.imports[0].imported_name, "sibling");
        assert_eq!(module.imports[0].imported_from_module, "pkg.sub");
        assert!(module.imports[1].is_star());
        assert_eq!(module.imports[1].imported_from_module, "pkg.core");
        assert_eq!(module.imports[2].imported_from_module, "pkg.sub.helpers");
    }

    #[test]
    fn relative_import_inside_package_init() {
        let module = parse("from .engine import Engine\n", "pkg/__init__.py").unwrap();
        assert_eq!(module.module_name, "pkg");
        assert_eq!(module.imports[0].imported_from_module, "pkg.engine");
    }

    #[test]
    fn reduces_base_classes_and_marks_dynamic_ones() {
        let src = "\
class Widget(Base, pkg.Mixin, Generic[T], make_mixin(), metaclass=Meta):
    pass
";
        let module = parse(src, "ui.py").unwrap();
        let widget = class(&module, "Widget");
        assert_eq!(widget.qualified_name, "ui.Widget");
        assert_eq!(
            widget.bases,
            vec![
                BaseRef::Named("Base".into()),
                BaseRef::Named("pkg.Mixin".into()),
                BaseRef::Named("Generic".into()),
                BaseRef::Dynamic("make_mixin()".into()),
            ]
        );
    }

    #[test]
    fn extracts_parameter_kinds_and_annotations() {
        let src = "\
class Service:
    def run(self, a, b: int = 1, *args, c, d=2, **kw) -> bool:
        return True

    def strict(self, x, /, y, *, z):
        pass
";
        let module = parse(src, "svc.py").unwrap();
        let service = class(&module, "Service");
        let run = &service.methods[0];
        assert_eq!(run.return_annotation.as_deref(), Some("bool"));
        let kinds: Vec<ParamKind> = run.parameters.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParamKind::PositionalOrKeyword,
                ParamKind::PositionalOrKeyword,
                ParamKind::PositionalOrKeyword,
                ParamKind::VarPositional,
                ParamKind::KeywordOnly,
                ParamKind::KeywordOnly,
                ParamKind::VarKeyword,
            ]
        );
        assert_eq!(run.parameters[1].annotation, None);
        assert_eq!(run.parameters[2].annotation.as_deref(), Some("int"));
        assert!(run.parameters[2].has_default);
        assert_eq!(run.parameters[3].name, "args");
        assert_eq!(run.parameters[6].name, "kw");

        let strict = &service.methods[1];
        let kinds: Vec<ParamKind> = strict.parameters.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParamKind::PositionalOnly,
                ParamKind::PositionalOnly,
                ParamKind::PositionalOrKeyword,
                ParamKind::KeywordOnly,
            ]
        );
    }

    #[test]
    fn collects_self_attributes_from_any_method_and_class_body() {
        let src = "\
class Config:
    default_mode = 'fast'
    retries: int

    def __init__(self):
        self.name = 'x'

    def load(self, flag):
        if flag:
            self.cache: dict = {}
        for item in range(3):
            self.count += item
";
        let module = parse(src, "config.py").unwrap();
        let config = class(&module, "Config");
        let names: Vec<&str> = config.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["default_mode", "retries", "name", "cache", "count"]);
        let cache = config.attributes.iter().find(|a| a.name == "cache").unwrap();
        assert_eq!(cache.type_annotation.as_deref(), Some("dict"));
        let name = config.attributes.iter().find(|a| a.name == "name").unwrap();
        assert_eq!(name.type_annotation, None);
    }

    #[test]
    fn records_decorators_and_async_methods() {
        let src = "\
class Client:
    @staticmethod
    def build(url):
        pass

    @property
    def status(self):
        return 1

    @status.setter
    def status(self, value):
        self._status = value

    @retry(times=3)
    async def fetch(self):
        pass
";
        let module = parse(src, "client.py").unwrap();
        let client = class(&module, "Client");
        assert_eq!(client.methods.len(), 3);
        assert_eq!(client.methods[0].decorators, vec!["staticmethod"]);
        assert_eq!(client.methods[1].decorators, vec!["property"]);
        let fetch = &client.methods[2];
        assert!(fetch.is_async);
        assert_eq!(fetch.decorators, vec!["retry"]);
        assert!(client.attributes.iter().any(|a| a.name == "_status"));
    }

    #[test]
    fn scopes_nested_classes_under_enclosing_name() {
        let src = "\
class Outer:
    class Inner:
        def ping(self):
            pass

def factory():
    class Local:
        pass
    return Local
";
        let module = parse(src, "shapes.py").unwrap();
        assert_eq!(class(&module, "Inner").qualified_name, "shapes.Outer.Inner");
        assert_eq!(class(&module, "Local").qualified_name, "shapes.factory.Local");
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].qualified_name, "shapes.factory");
    }

    #[test]
    fn extracts_functions_variables_and_docstrings() {
        let src = "\
VERSION = '1.0'
a, b = 1, 2

class Doc:
    \"\"\"Explains things.\"\"\"

async def main(argv=None):
    pass
";
        let module = parse(src, "tool.py").unwrap();
        assert_eq!(module.variables, vec!["VERSION", "a", "b"]);
        assert_eq!(class(&module, "Doc").docstring.as_deref(), Some("Explains things."));
        assert!(module.functions[0].is_async);
        assert!(module.functions[0].parameters[0].has_default);
    }

    #[test]
    fn definitions_inside_conditionals_are_still_module_level() {
        let src = "\
try:
    from fast import impl
except ImportError:
    impl = None

if True:
    class Guarded:
        pass
";
        let module = parse(src, "compat.py").unwrap();
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.variables, vec!["impl"]);
        assert_eq!(class(&module, "Guarded").qualified_name, "compat.Guarded");
    }

    #[test]
    fn invalid_syntax_is_a_parse_error() {
        let err = parse("def broken(:\n    pass\n", "bad.py").unwrap_err();
        assert_eq!(err.file, "bad.py");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn clean_docstring_strips_prefix_and_quotes() {
        assert_eq!(clean_docstring("r'''raw'''").as_deref(), Some("raw"));
        assert_eq!(clean_docstring("\"\"").as_deref(), None);
    }
}
