//! Resolution of usage events against the graph store.
//!
//! A `NotFound` is only reported when the miss is confident: the receiver
//! type must be known, every part of the hierarchy that could hold the member
//! must be indexed, and the resulting certainty must clear
//! `min_not_found_confidence`. Everything short of that is `Unknown`.

use serde::Serialize;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::config::ValidationConfig;
use crate::errors::StorageResult;
use crate::models::{ClassRecord, MethodRecord, ParamKind, ParamSpec};
use crate::store::resolution::{
    hierarchy_member_names, locate_class, resolve_attribute, resolve_method, ClassMember,
    Resolution,
};
use crate::store::GraphStore;
use crate::validation::analyzer::{CallArgs, Origin, Provenance, ReceiverType, UsageEvent};
use crate::validation::suggest::suggest;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Valid,
    NotFound,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Finding {
    pub event: UsageEvent,
    pub status: FindingStatus,
    /// Certainty of the status. Always 0.0 for `Unknown`.
    pub confidence: f64,
    pub message: String,
    /// Qualified name of the matched symbol for `Valid` findings.
    pub resolved_to: Option<String>,
    pub suggestions: Vec<String>,
    /// Call-shape problems on an otherwise valid call.
    pub warnings: Vec<String>,
}

impl Finding {
    fn new(event: &UsageEvent, status: FindingStatus, confidence: f64, message: String) -> Self {
        Self {
            event: event.clone(),
            status,
            confidence,
            message,
            resolved_to: None,
            suggestions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn unknown(event: &UsageEvent, message: impl Into<String>) -> Self {
        Self::new(event, FindingStatus::Unknown, 0.0, message.into())
    }

    fn valid(event: &UsageEvent, confidence: f64, resolved_to: String) -> Self {
        let mut finding = Self::new(
            event,
            FindingStatus::Valid,
            confidence,
            format!("Resolved to {resolved_to}"),
        );
        finding.resolved_to = Some(resolved_to);
        finding
    }

    fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn category(&self) -> &'static str {
        self.event.category()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub findings: Vec<Finding>,
    /// Set when cancellation stopped the run before every event was seen.
    pub cancelled: bool,
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

fn origin_certainty(config: &ValidationConfig, provenance: Provenance) -> f64 {
    let base = match provenance.origin {
        Origin::Instantiation => config.direct_instantiation_certainty,
        Origin::Annotation => config.annotation_certainty,
        Origin::ClassReference => config.class_reference_certainty,
    };
    base * config.propagation_decay.powi(provenance.hops as i32)
}

/// Problems with how `args` would bind to `params`. Empty when the call site
/// uses `*args`/`**kwargs`, since arity is then unknowable.
pub fn signature_warnings(params: &[ParamSpec], args: &CallArgs, skip_receiver: bool) -> Vec<String> {
    if args.has_splat {
        return Vec::new();
    }
    let params = if skip_receiver && !params.is_empty() {
        &params[1..]
    } else {
        params
    };
    let mut warnings = Vec::new();

    let positional: Vec<&ParamSpec> = params.iter().filter(|p| p.kind.accepts_positional()).collect();
    let var_positional = params.iter().any(|p| p.kind == ParamKind::VarPositional);
    let var_keyword = params.iter().any(|p| p.kind == ParamKind::VarKeyword);

    if !var_positional && args.positional > positional.len() {
        warnings.push(format!(
            "takes {} positional argument(s) but {} were given",
            positional.len(),
            args.positional
        ));
    }

    for keyword in &args.keywords {
        let accepted = params
            .iter()
            .any(|p| p.name == *keyword && p.kind.accepts_keyword());
        if !accepted && !var_keyword {
            warnings.push(format!("unexpected keyword argument '{keyword}'"));
        }
    }

    let filled: Vec<&str> = positional
        .iter()
        .take(args.positional)
        .map(|p| p.name.as_str())
        .collect();
    for param in params.iter().filter(|p| p.is_required()) {
        if !filled.contains(&param.name.as_str()) && !args.keywords.contains(&param.name) {
            warnings.push(format!("missing required argument '{}'", param.name));
        }
    }
    warnings
}

fn method_call_warnings(method: &MethodRecord, args: &CallArgs, origin: Origin) -> Vec<String> {
    if method.is_property() {
        return Vec::new();
    }
    let is_classmethod = method.decorators.iter().any(|d| d == "classmethod");
    let skip_receiver = !method.is_static() && (origin != Origin::ClassReference || is_classmethod);
    signature_warnings(&method.parameters, args, skip_receiver)
}

struct Validator<'a> {
    store: &'a dyn GraphStore,
    config: &'a ValidationConfig,
}

impl Validator<'_> {
    fn module_suggestions(&self, module: &str, name: &str) -> StorageResult<Vec<String>> {
        let members = self.store.module_members(module)?;
        Ok(suggest(name, &members, self.config.max_suggestions))
    }

    /// Result for a name that is not defined where the script says it is.
    /// `module` must be indexed for a miss to count.
    fn module_miss(
        &self,
        event: &UsageEvent,
        module: &str,
        name: &str,
        confidence: f64,
    ) -> StorageResult<Finding> {
        if !self.store.module_indexed(module)? {
            return Ok(Finding::unknown(event, format!("Module '{module}' is not indexed")));
        }
        if self.store.module_has_star_import(module)? {
            return Ok(Finding::unknown(
                event,
                format!("'{name}' may come from a star import in '{module}'"),
            ));
        }
        if confidence < self.config.min_not_found_confidence {
            return Ok(Finding::unknown(event, format!("'{name}' not found in '{module}'")));
        }
        let suggestions = self.module_suggestions(module, name)?;
        Ok(Finding::new(
            event,
            FindingStatus::NotFound,
            confidence,
            format!("'{name}' is not defined in module '{module}'"),
        )
        .with_suggestions(suggestions))
    }

    fn import_usage(
        &self,
        event: &UsageEvent,
        module: &str,
        name: Option<&str>,
    ) -> StorageResult<Finding> {
        let Some(name) = name else {
            if self.store.module_indexed(module)? {
                return Ok(Finding::valid(event, 1.0, module.to_string()));
            }
            // `import pkg.missing` where `pkg` itself is indexed.
            return match module.rsplit_once('.') {
                Some((parent, last))
                    if self.store.module_indexed(parent)?
                        && !self.store.module_defines(parent, last)? =>
                {
                    self.module_miss(event, parent, last, self.config.import_not_found_confidence)
                }
                _ => Ok(Finding::unknown(event, format!("Module '{module}' is not indexed"))),
            };
        };

        if !self.store.module_indexed(module)? {
            return Ok(Finding::unknown(event, format!("Module '{module}' is not indexed")));
        }
        if self.store.module_defines(module, name)? {
            return Ok(Finding::valid(event, 1.0, format!("{module}.{name}")));
        }
        if self.store.module_has_star_import(module)? {
            let mut finding = Finding::valid(event, self.config.ambiguity_floor, format!("{module}.{name}"));
            finding.message = format!("'{name}' is assumed to be re-exported by a star import in '{module}'");
            finding.resolved_to = None;
            return Ok(finding);
        }
        self.module_miss(event, module, name, self.config.import_not_found_confidence)
    }

    fn constructor_warnings(&self, class: &ClassRecord, args: &CallArgs) -> StorageResult<Vec<String>> {
        match resolve_method(self.store, class, "__init__")? {
            Resolution::Found { member, .. } => Ok(signature_warnings(&member.parameters, args, true)),
            _ => Ok(Vec::new()),
        }
    }

    /// Valid finding for a name matched somewhere in the store, if any.
    fn callable_anywhere(
        &self,
        event: &UsageEvent,
        name: &str,
        module: Option<&str>,
        args: &CallArgs,
        prefer_class: bool,
    ) -> StorageResult<Option<Finding>> {
        let classes = locate_class(self.store, name, module)?;
        let functions = self.store.find_functions(name, module)?;

        let class_finding = || -> StorageResult<Option<Finding>> {
            let Some(first) = classes.first() else {
                return Ok(None);
            };
            let confidence = self.config.ambiguity_confidence(classes.len());
            let warnings = if classes.len() == 1 {
                self.constructor_warnings(first, args)?
            } else {
                Vec::new()
            };
            Ok(Some(
                Finding::valid(event, confidence, first.qualified_name.clone()).with_warnings(warnings),
            ))
        };
        let function_finding = || -> Option<Finding> {
            let first = functions.first()?;
            let confidence = self.config.ambiguity_confidence(functions.len());
            let warnings = if functions.len() == 1 {
                signature_warnings(&first.parameters, args, false)
            } else {
                Vec::new()
            };
            Some(Finding::valid(event, confidence, first.qualified_name.clone()).with_warnings(warnings))
        };

        if prefer_class {
            if let Some(found) = class_finding()? {
                return Ok(Some(found));
            }
            Ok(function_finding())
        } else {
            if let Some(found) = function_finding() {
                return Ok(Some(found));
            }
            class_finding()
        }
    }

    /// Instantiation and function calls share resolution; they differ in
    /// which kind of symbol is preferred and in the miss confidence.
    fn callable(
        &self,
        event: &UsageEvent,
        name: &str,
        module: Option<&str>,
        args: &CallArgs,
        prefer_class: bool,
    ) -> StorageResult<Finding> {
        if let Some(found) = self.callable_anywhere(event, name, module, args, prefer_class)? {
            return Ok(found);
        }
        let Some(module) = module else {
            return Ok(Finding::unknown(
                event,
                format!("'{name}' is not imported and not indexed anywhere"),
            ));
        };
        if self.store.module_defines(module, name)? {
            // Re-exported from elsewhere: accept any indexed definition.
            if let Some(found) = self.callable_anywhere(event, name, None, args, prefer_class)? {
                return Ok(found);
            }
            return Ok(Finding::unknown(
                event,
                format!("'{name}' is bound in '{module}' but its definition is not indexed"),
            ));
        }
        let confidence = if prefer_class {
            self.config.instantiation_not_found_confidence
        } else {
            self.config.function_not_found_confidence
        };
        self.module_miss(event, module, name, confidence)
    }

    /// An unbound name in a script with star imports. It is valid when one
    /// of the star sources provides it; a miss counts only when every source
    /// is indexed and none could re-export the name.
    fn starred(
        &self,
        event: &UsageEvent,
        name: &str,
        sources: &[String],
        args: &CallArgs,
        prefer_class: bool,
    ) -> StorageResult<Finding> {
        let mut every_source_checked = true;
        for source in sources {
            if let Some(found) = self.callable_anywhere(event, name, Some(source), args, prefer_class)? {
                return Ok(found);
            }
            if !self.store.module_indexed(source)?
                || self.store.module_has_star_import(source)?
                || self.store.module_defines(source, name)?
            {
                every_source_checked = false;
            }
        }
        let Some(last) = sources.last().filter(|_| every_source_checked) else {
            return Ok(Finding::unknown(
                event,
                format!("'{name}' may come from a star import of {}", sources.join(", ")),
            ));
        };
        let confidence = if prefer_class {
            self.config.instantiation_not_found_confidence
        } else {
            self.config.function_not_found_confidence
        };
        self.module_miss(event, last, name, confidence)
    }

    /// Member use on a name that turned out to be an indexed module, as in
    /// `from PIL import Image; Image.open(path)`.
    fn module_member(
        &self,
        event: &UsageEvent,
        module: &str,
        name: &str,
        args: Option<&CallArgs>,
    ) -> StorageResult<Finding> {
        if let Some(args) = args {
            let prefer_class = name.starts_with(|c: char| c.is_ascii_uppercase());
            return self.callable(event, name, Some(module), args, prefer_class);
        }
        if self.store.module_defines(module, name)? {
            return Ok(Finding::valid(event, 1.0, format!("{module}.{name}")));
        }
        let confidence = self.config.function_not_found_confidence * self.config.attribute_factor;
        self.module_miss(event, module, name, confidence)
    }

    fn member(
        &self,
        event: &UsageEvent,
        target: &ReceiverType,
        member_name: &str,
        args: Option<&CallArgs>,
    ) -> StorageResult<Finding> {
        let ReceiverType::Known {
            class_name,
            module,
            provenance,
        } = target
        else {
            return Ok(Finding::unknown(event, "Receiver type could not be determined"));
        };
        if let (Origin::ClassReference, Some(module)) = (provenance.origin, module.as_deref()) {
            let submodule = format!("{module}.{class_name}");
            if self.store.find_class_qualified(&submodule, None)?.is_empty()
                && self.store.module_indexed(&submodule)?
            {
                return self.module_member(event, &submodule, member_name, args);
            }
        }
        let classes = locate_class(self.store, class_name, module.as_deref())?;
        if classes.is_empty() {
            return Ok(Finding::unknown(
                event,
                format!("Class '{class_name}' is not indexed"),
            ));
        }
        let is_call = args.is_some();

        let mut unresolved_branches = 0;
        let mut any_unknown = false;
        for class in &classes {
            if is_call {
                if let Resolution::Found { member, owner } = resolve_method(self.store, class, member_name)? {
                    let confidence = self.config.ambiguity_confidence(classes.len());
                    let warnings = args
                        .map(|a| method_call_warnings(&member, a, provenance.origin))
                        .unwrap_or_default();
                    return Ok(Finding::valid(
                        event,
                        confidence,
                        format!("{}.{}", owner.qualified_name, member.name),
                    )
                    .with_warnings(warnings));
                }
            }
            // Attributes cover properties, data members and callable attributes.
            match resolve_attribute(self.store, class, member_name)? {
                Resolution::Found { member, owner } => {
                    let name = match member {
                        ClassMember::Attribute(a) => a.name,
                        ClassMember::Method(m) => m.name,
                    };
                    return Ok(Finding::valid(
                        event,
                        self.config.ambiguity_confidence(classes.len()),
                        format!("{}.{}", owner.qualified_name, name),
                    ));
                }
                Resolution::NotFound { unresolved_branches: n } => {
                    unresolved_branches = unresolved_branches.max(n);
                }
                Resolution::Unknown => any_unknown = true,
            }
        }

        if any_unknown {
            return Ok(Finding::unknown(
                event,
                format!("Hierarchy of '{class_name}' is not fully indexed"),
            ));
        }
        if is_dunder(member_name) {
            return Ok(Finding::unknown(
                event,
                format!("'{member_name}' may be provided by the object model"),
            ));
        }
        for class in &classes {
            for hook in ["__getattr__", "__getattribute__"] {
                if resolve_method(self.store, class, hook)?.is_found() {
                    return Ok(Finding::unknown(
                        event,
                        format!("'{class_name}' defines {hook}"),
                    ));
                }
            }
        }

        let mut confidence = origin_certainty(self.config, *provenance)
            * self.config.ambiguity_confidence(classes.len());
        if !is_call {
            confidence *= self.config.attribute_factor;
        }
        if unresolved_branches > 0 {
            confidence *= self.config.partial_hierarchy_factor;
        }
        let kind = if is_call { "method" } else { "attribute" };
        if confidence < self.config.min_not_found_confidence {
            return Ok(Finding::unknown(
                event,
                format!("No {kind} '{member_name}' on '{class_name}', but receiver certainty is low"),
            ));
        }

        let mut candidates = Vec::new();
        for class in &classes {
            candidates.extend(hierarchy_member_names(self.store, class, true)?);
        }
        let suggestions = suggest(member_name, &candidates, self.config.max_suggestions);
        Ok(Finding::new(
            event,
            FindingStatus::NotFound,
            confidence,
            format!("'{class_name}' has no {kind} '{member_name}'"),
        )
        .with_suggestions(suggestions))
    }

    fn check(&self, event: &UsageEvent) -> StorageResult<Finding> {
        match event {
            UsageEvent::ImportUsage { module, name, .. } => {
                self.import_usage(event, module, name.as_deref())
            }
            UsageEvent::Instantiation {
                class_name,
                star_sources,
                args,
                ..
            } if !star_sources.is_empty() => self.starred(event, class_name, star_sources, args, true),
            UsageEvent::Instantiation {
                class_name,
                module,
                args,
                ..
            } => self.callable(event, class_name, module.as_deref(), args, true),
            UsageEvent::FunctionCall {
                name,
                star_sources,
                args,
                ..
            } if !star_sources.is_empty() => self.starred(event, name, star_sources, args, false),
            UsageEvent::FunctionCall {
                name, module, args, ..
            } => self.callable(event, name, module.as_deref(), args, false),
            UsageEvent::MethodCall {
                target,
                method_name,
                args,
                ..
            } => self.member(event, target, method_name, Some(args)),
            UsageEvent::AttributeAccess {
                target, attr_name, ..
            } => self.member(event, target, attr_name, None),
        }
    }
}

/// Resolve every event against `store`.
///
/// Cancellation is checked before each event; a cancelled run returns the
/// findings produced so far with `cancelled` set. Only storage failures are
/// errors.
pub fn validate(
    events: &[UsageEvent],
    store: &dyn GraphStore,
    config: &ValidationConfig,
    cancel: &CancellationToken,
) -> StorageResult<ValidationOutcome> {
    let validator = Validator { store, config };
    let mut outcome = ValidationOutcome::default();
    for event in events {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        let finding = validator.check(event)?;
        if finding.status == FindingStatus::NotFound {
            debug!(
                usage = %event.describe(),
                line = event.site().line,
                confidence = finding.confidence,
                "Unresolved usage"
            );
        }
        outcome.findings.push(finding);
    }
    info!(
        events = events.len(),
        findings = outcome.findings.len(),
        cancelled = outcome.cancelled,
        "Validation finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::parse;
    use crate::models::{Repository, SourceFile};
    use crate::store::SqliteGraphStore;
    use crate::validation::analyzer::{analyze, Site};

    fn store_with(files: &[(&str, &str)]) -> SqliteGraphStore {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        let repo = store.upsert_repository(&Repository::named("shop")).unwrap();
        for (path, src) in files {
            let module = parse(src, path).unwrap();
            let file = SourceFile {
                relative_path: path.to_string(),
                module_name: module.module_name.clone(),
                content_hash: String::new(),
            };
            store.upsert_module(&repo, &file, &module).unwrap();
        }
        store
    }

    fn shop() -> SqliteGraphStore {
        store_with(&[
            (
                "shop/cart.py",
                "\
from .base import Model

class Cart(Model):
    def __init__(self, owner, currency='EUR'):
        self.owner = owner
        self.items = []

    def add_item(self, sku, qty=1, *, note=None):
        pass

    @staticmethod
    def empty():
        pass

def make_cart(owner):
    return Cart(owner)
",
            ),
            (
                "shop/base.py",
                "class Model:\n    def save(self):\n        pass\n",
            ),
            ("shop/__init__.py", "from .cart import Cart\n"),
        ])
    }

    fn run(store: &SqliteGraphStore, script: &str) -> Vec<Finding> {
        let analysis = analyze(script, Some("candidate.py")).unwrap();
        validate(
            &analysis.events,
            store,
            &ValidationConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap()
        .findings
    }

    fn status_of<'a>(findings: &'a [Finding], usage: &str) -> &'a Finding {
        findings
            .iter()
            .find(|f| f.event.describe() == usage)
            .unwrap_or_else(|| panic!("no finding for {usage}: {findings:#?}"))
    }

    #[test]
    fn inherited_and_missing_methods() {
        let store = shop();
        let findings = run(
            &store,
            "from shop.cart import Cart\n\nc = Cart('ann')\nc.save()\nc.checkout()\n",
        );
        let save = status_of(&findings, "c.save()");
        assert_eq!(save.status, FindingStatus::Valid);
        assert_eq!(save.resolved_to.as_deref(), Some("shop.base.Model.save"));

        let missing = status_of(&findings, "c.checkout()");
        assert_eq!(missing.status, FindingStatus::NotFound);
        assert!(missing.confidence >= 0.8);
    }

    #[test]
    fn unknown_receiver_is_never_not_found() {
        let store = shop();
        let findings = run(&store, "from shop.cart import make_cart\n\nc = make_cart('a')\nc.checkout()\n");
        let call = status_of(&findings, "c.checkout()");
        assert_eq!(call.status, FindingStatus::Unknown);
        assert_eq!(call.confidence, 0.0);
    }

    #[test]
    fn attributes_and_suggestions() {
        let store = shop();
        let findings = run(
            &store,
            "from shop.cart import Cart\n\nc = Cart('a')\nc.owner\nc.add_itme('x')\n",
        );
        assert_eq!(status_of(&findings, "c.owner").status, FindingStatus::Valid);
        let typo = status_of(&findings, "c.add_itme()");
        assert_eq!(typo.status, FindingStatus::NotFound);
        assert_eq!(typo.suggestions.first().map(String::as_str), Some("add_item"));
    }

    #[test]
    fn propagation_lowers_confidence_until_unknown() {
        let store = shop();
        let script = "from shop.cart import Cart\n\na = Cart('x')\nb = a\nb.nope()\n";
        let analysis = analyze(script, None).unwrap();
        let strict = ValidationConfig {
            min_not_found_confidence: 0.8,
            ..ValidationConfig::default()
        };
        let token = CancellationToken::new();

        let relaxed = validate(&analysis.events, &store, &ValidationConfig::default(), &token).unwrap();
        let finding = status_of(&relaxed.findings, "b.nope()");
        assert_eq!(finding.status, FindingStatus::NotFound);
        assert!((finding.confidence - 0.9 * 0.85).abs() < 1e-9);

        let strict = validate(&analysis.events, &store, &strict, &token).unwrap();
        assert_eq!(status_of(&strict.findings, "b.nope()").status, FindingStatus::Unknown);
    }

    #[test]
    fn partially_indexed_hierarchy_collapses_to_unknown() {
        let store = store_with(&[(
            "app/views.py",
            "import django.views\n\nclass Base:\n    pass\n\nclass Page(Base, django.views.View):\n    def render(self):\n        pass\n",
        )]);
        let findings = run(&store, "from app.views import Page\n\np = Page()\np.dispatch()\n");
        assert_eq!(status_of(&findings, "p.dispatch()").status, FindingStatus::Unknown);
    }

    #[test]
    fn dunder_members_are_never_not_found() {
        let store = shop();
        let findings = run(&store, "from shop.cart import Cart\n\nc = Cart('a')\nc.__enter__()\n");
        assert_eq!(status_of(&findings, "c.__enter__()").status, FindingStatus::Unknown);
    }

    #[test]
    fn import_checks() {
        let store = shop();
        let findings = run(
            &store,
            "\
from shop.cart import Cart, make_cart, Basket
from shop import Cart as C
from numpy import array
import shop.payments
",
        );
        assert_eq!(status_of(&findings, "from shop.cart import Cart").status, FindingStatus::Valid);
        assert_eq!(status_of(&findings, "from shop.cart import make_cart").status, FindingStatus::Valid);
        let basket = status_of(&findings, "from shop.cart import Basket");
        assert_eq!(basket.status, FindingStatus::NotFound);
        assert!((basket.confidence - 0.95).abs() < 1e-9);
        assert_eq!(status_of(&findings, "from shop import Cart").status, FindingStatus::Valid);
        assert_eq!(status_of(&findings, "from numpy import array").status, FindingStatus::Unknown);
        assert_eq!(status_of(&findings, "import shop.payments").status, FindingStatus::NotFound);
    }

    #[test]
    fn instantiation_accepts_factories_and_reexports() {
        let store = shop();
        let findings = run(
            &store,
            "import shop\nfrom shop.cart import make_cart\n\na = shop.Cart('x')\nb = shop.cart.Wagon()\nmake_cart('y')\n",
        );
        let reexported = status_of(&findings, "shop.Cart()");
        assert_eq!(reexported.status, FindingStatus::Valid);
        assert_eq!(reexported.resolved_to.as_deref(), Some("shop.cart.Cart"));
        assert_eq!(status_of(&findings, "shop.cart.Wagon()").status, FindingStatus::NotFound);
        assert_eq!(status_of(&findings, "shop.cart.make_cart()").status, FindingStatus::Valid);
    }

    #[test]
    fn signature_problems_are_warnings_on_valid_calls() {
        let store = shop();
        let findings = run(
            &store,
            "\
from shop.cart import Cart, make_cart

c = Cart()
c.add_item('a', 2, 3)
c.add_item('a', colour='red')
c.add_item(*skus)
Cart.empty()
make_cart('a', 'b')
",
        );
        let init = findings
            .iter()
            .find(|f| f.category() == "instantiation")
            .unwrap();
        assert_eq!(init.status, FindingStatus::Valid);
        assert_eq!(init.warnings, vec!["missing required argument 'owner'"]);

        let calls: Vec<&Finding> = findings.iter().filter(|f| f.category() == "method_call").collect();
        assert_eq!(calls[0].warnings, vec!["takes 2 positional argument(s) but 3 were given"]);
        assert_eq!(calls[1].warnings, vec!["unexpected keyword argument 'colour'"]);
        assert!(calls[2].warnings.is_empty());
        assert_eq!(calls[3].status, FindingStatus::Valid);
        assert!(calls[3].warnings.is_empty());

        let factory = findings
            .iter()
            .find(|f| f.category() == "function_call")
            .unwrap();
        assert_eq!(factory.warnings, vec!["takes 1 positional argument(s) but 2 were given"]);
    }

    #[test]
    fn cancellation_returns_partial_outcome() {
        let store = shop();
        let event = UsageEvent::FunctionCall {
            name: "make_cart".into(),
            module: Some("shop.cart".into()),
            star_sources: Vec::new(),
            args: CallArgs::default(),
            site: Site::default(),
        };
        let token = CancellationToken::new();
        token.cancel();
        let outcome = validate(&[event], &store, &ValidationConfig::default(), &token).unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn ambiguous_classes_lower_confidence() {
        let store = store_with(&[
            ("a/models.py", "class User:\n    pass\n"),
            ("b/models.py", "class User:\n    pass\n"),
        ]);
        let findings = run(&store, "u = User()\n");
        let finding = &findings[0];
        assert_eq!(finding.status, FindingStatus::Valid);
        assert!((finding.confidence - 0.9).abs() < 1e-9);
    }
}
