//! Inheritance-aware member resolution over a [`GraphStore`].
//!
//! Base classes are stored as the strings written in the class header and
//! resolved here, lazily, per query. A base that cannot be tied to a stored
//! class (external library, dynamic expression, not ingested yet) ends its
//! branch as unknown rather than as a miss.
//!
//! Traversal is an explicit depth-first walk with per-class state. Reaching a
//! class that is still on the current path is a cycle and counts as an
//! unknown branch; reaching an already finished class (diamond inheritance)
//! adds nothing.

use std::collections::HashMap;

use crate::errors::StorageResult;
use crate::models::{AttributeRecord, BaseRef, ClassRecord, MethodRecord};
use crate::store::GraphStore;

/// Outcome of looking a member up through a class hierarchy.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution<T> {
    Found { member: T, owner: ClassRecord },
    /// Every resolvable branch was checked without a match.
    NotFound { unresolved_branches: usize },
    /// No branch could be checked to the end.
    Unknown,
}

impl<T> Resolution<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found { .. })
    }
}

/// Result of an attribute lookup: data attributes, methods and properties all
/// count.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassMember {
    Attribute(AttributeRecord),
    Method(MethodRecord),
}

type ClassKey = (i64, String);

fn key(class: &ClassRecord) -> ClassKey {
    (class.repository_id, class.qualified_name.clone())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    OnPath,
    Done,
}

struct Frame {
    class_key: ClassKey,
    pending: Vec<ClassRecord>,
}

/// Resolve a base-class string written in `class`'s header to stored classes.
///
/// Tries, in order: the class's own module, then the names imported by the
/// class's file. A base bound by an import, or spelled as a dotted path,
/// resolves only to its import target; when that target is not indexed the
/// result is empty. Only a bare, unbound name falls back to a simple-name
/// lookup (same repository first, then every repository), and not when the
/// file has star imports that could bind it. Several candidates are separate
/// branches.
pub fn resolve_base(
    store: &dyn GraphStore,
    class: &ClassRecord,
    base: &str,
) -> StorageResult<Vec<ClassRecord>> {
    // A class never resolves a base to itself (`class Thread(threading.Thread)`).
    let others = |found: Vec<ClassRecord>| -> Vec<ClassRecord> {
        found.into_iter().filter(|c| c.id != class.id).collect()
    };
    let repo = Some(class.repository_id);

    if !class.module_name.is_empty() {
        let local = format!("{}.{}", class.module_name, base);
        let found = others(store.find_class_qualified(&local, repo)?);
        if !found.is_empty() {
            return Ok(found);
        }
    }

    let (head, rest) = match base.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (base, None),
    };
    let mut bound_by_import = false;
    let mut star_imports = false;
    for import in store.file_imports(class.file_id)? {
        if import.is_star() {
            star_imports = true;
            let target = format!("{}.{}", import.imported_from_module, base);
            let found = others(store.find_class_qualified(&target, None)?);
            if !found.is_empty() {
                return Ok(found);
            }
            continue;
        }
        if import.bound_name() != head {
            continue;
        }
        bound_by_import = true;
        let target = if import.is_module_import() && import.alias.is_none() {
            // `import a.b` binds `a`; the base already spells the full path.
            base.to_string()
        } else if import.is_module_import() {
            join(&import.imported_from_module, rest)
        } else {
            join(
                &format!("{}.{}", import.imported_from_module, import.imported_name),
                rest,
            )
        };
        let found = match target.rsplit_once('.') {
            Some((module, name)) => others(locate_class(store, name, Some(module))?),
            None => others(store.find_class_qualified(&target, None)?),
        };
        if !found.is_empty() {
            return Ok(found);
        }
    }

    if bound_by_import {
        return Ok(Vec::new());
    }
    if rest.is_some() {
        return Ok(others(store.find_class_qualified(base, None)?));
    }
    if star_imports {
        return Ok(Vec::new());
    }
    let found = others(store.find_class(base, repo)?);
    if !found.is_empty() {
        return Ok(found);
    }
    Ok(others(store.find_class(base, None)?))
}

fn join(prefix: &str, rest: Option<&str>) -> String {
    match rest {
        Some(rest) => format!("{prefix}.{rest}"),
        None => prefix.to_string(),
    }
}

/// Walk `start`'s hierarchy looking for a member with `lookup`.
fn resolve_member<T>(
    store: &dyn GraphStore,
    start: &ClassRecord,
    mut lookup: impl FnMut(&ClassRecord) -> StorageResult<Option<T>>,
) -> StorageResult<Resolution<T>> {
    let mut state: HashMap<ClassKey, VisitState> = HashMap::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut unknown_branches = 0usize;
    let mut checked_leaves = 0usize;

    let mut enter = |class: &ClassRecord,
                     state: &mut HashMap<ClassKey, VisitState>,
                     stack: &mut Vec<Frame>,
                     unknown_branches: &mut usize,
                     checked_leaves: &mut usize|
     -> StorageResult<Option<T>> {
        if let Some(member) = lookup(class)? {
            return Ok(Some(member));
        }
        let mut pending = Vec::new();
        let mut live_bases = 0;
        for base in &class.bases {
            match base {
                BaseRef::Dynamic(_) => {
                    live_bases += 1;
                    *unknown_branches += 1;
                }
                BaseRef::Named(name) if name == "object" => {}
                BaseRef::Named(name) => {
                    live_bases += 1;
                    let candidates = resolve_base(store, class, name)?;
                    if candidates.is_empty() {
                        *unknown_branches += 1;
                    }
                    pending.extend(candidates);
                }
            }
        }
        if live_bases == 0 {
            *checked_leaves += 1;
        }
        pending.reverse();
        state.insert(key(class), VisitState::OnPath);
        stack.push(Frame {
            class_key: key(class),
            pending,
        });
        Ok(None)
    };

    if let Some(member) = enter(
        start,
        &mut state,
        &mut stack,
        &mut unknown_branches,
        &mut checked_leaves,
    )? {
        return Ok(Resolution::Found {
            member,
            owner: start.clone(),
        });
    }

    while let Some(frame) = stack.last_mut() {
        let Some(next) = frame.pending.pop() else {
            let finished = frame.class_key.clone();
            stack.pop();
            state.insert(finished, VisitState::Done);
            continue;
        };
        let visited = state.get(&key(&next)).copied();
        match visited {
            Some(VisitState::OnPath) => unknown_branches += 1,
            Some(VisitState::Done) => {}
            None => {
                if let Some(member) = enter(
                    &next,
                    &mut state,
                    &mut stack,
                    &mut unknown_branches,
                    &mut checked_leaves,
                )? {
                    return Ok(Resolution::Found {
                        member,
                        owner: next,
                    });
                }
            }
        }
    }

    if checked_leaves == 0 && unknown_branches > 0 {
        return Ok(Resolution::Unknown);
    }
    Ok(Resolution::NotFound { unresolved_branches: unknown_branches })
}

/// Find `method_name` on `class` or any resolvable ancestor.
pub fn resolve_method(
    store: &dyn GraphStore,
    class: &ClassRecord,
    method_name: &str,
) -> StorageResult<Resolution<MethodRecord>> {
    resolve_member(store, class, |c| store.find_method(c.id, method_name))
}

/// Find `attr_name` on `class` or any resolvable ancestor, accepting data
/// attributes, methods and properties.
pub fn resolve_attribute(
    store: &dyn GraphStore,
    class: &ClassRecord,
    attr_name: &str,
) -> StorageResult<Resolution<ClassMember>> {
    resolve_member(store, class, |c| {
        if let Some(attribute) = store.find_attribute(c.id, attr_name)? {
            return Ok(Some(ClassMember::Attribute(attribute)));
        }
        Ok(store.find_method(c.id, attr_name)?.map(ClassMember::Method))
    })
}

/// Member names across every resolvable class of the hierarchy, nearest
/// first. Used for "did you mean" suggestions.
pub fn hierarchy_member_names(
    store: &dyn GraphStore,
    class: &ClassRecord,
    include_attributes: bool,
) -> StorageResult<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    let mut seen_classes: Vec<ClassKey> = Vec::new();
    let mut queue = vec![class.clone()];
    while let Some(current) = queue.pop() {
        let current_key = key(&current);
        if seen_classes.contains(&current_key) {
            continue;
        }
        seen_classes.push(current_key);

        for method in store.class_methods(current.id)? {
            if !names.contains(&method.name) {
                names.push(method.name);
            }
        }
        if include_attributes {
            for attribute in store.class_attributes(current.id)? {
                if !names.contains(&attribute.name) {
                    names.push(attribute.name);
                }
            }
        }
        for base in current.bases.iter().filter_map(BaseRef::as_named) {
            if base != "object" {
                queue.extend(resolve_base(store, &current, base)?);
            }
        }
    }
    Ok(names)
}

/// Locate stored classes for a script-side class reference.
///
/// With a module, the class must live in that module, or under it when the
/// module is a package that re-exports the name (an explicit import of it,
/// or a star import). A submodule sharing the class's name is not a match.
/// Without a module, any same-named class qualifies.
pub fn locate_class(
    store: &dyn GraphStore,
    class_name: &str,
    module: Option<&str>,
) -> StorageResult<Vec<ClassRecord>> {
    let Some(module) = module else {
        return store.find_class(class_name, None);
    };
    let exact = store.find_class_qualified(&format!("{module}.{class_name}"), None)?;
    if !exact.is_empty() {
        return Ok(exact);
    }
    if !store.module_imports_name(module, class_name)? && !store.module_has_star_import(module)? {
        return Ok(Vec::new());
    }
    let package_prefix = format!("{module}.");
    Ok(store
        .find_class(class_name, None)?
        .into_iter()
        .filter(|c| c.module_name.starts_with(&package_prefix))
        .collect())
}
