//! End-to-end behaviour: ingest real directories, then check scripts.

use std::fs;
use std::path::Path;

use tether_core::cancel::CancellationToken;
use tether_core::config::{IngestConfig, ValidationConfig};
use tether_core::indexer::pipeline::RepositoryIngester;
use tether_core::models::Repository;
use tether_core::store::{GraphStore, SqliteGraphStore};
use tether_core::validation::{check_script, Report};
use tether_core::{FindingStatus, TetherError};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn ingest(store: &SqliteGraphStore, root: &Path, name: &str, config: IngestConfig) {
    let result = RepositoryIngester::new(store, config)
        .ingest_as(root, &Repository::named(name))
        .unwrap();
    assert!(result.parse_errors.is_empty(), "{:?}", result.parse_errors);
}

fn check(store: &SqliteGraphStore, script: &str) -> Report {
    check_script(
        store,
        script,
        Some("candidate.py"),
        &ValidationConfig::default(),
        &CancellationToken::new(),
    )
    .unwrap()
}

fn statuses(store: &SqliteGraphStore, script: &str) -> Vec<(String, FindingStatus, f64)> {
    let analysis = tether_core::validation::analyze(script, None).unwrap();
    tether_core::validation::validate(
        &analysis.events,
        store,
        &ValidationConfig::default(),
        &CancellationToken::new(),
    )
    .unwrap()
    .findings
    .into_iter()
    .map(|f| (f.event.describe(), f.status, f.confidence))
    .collect()
}

fn status_of(findings: &[(String, FindingStatus, f64)], usage: &str) -> (FindingStatus, f64) {
    findings
        .iter()
        .find(|(u, _, _)| u == usage)
        .map(|(_, s, c)| (*s, *c))
        .unwrap_or_else(|| panic!("no finding for {usage}: {findings:?}"))
}

#[test]
fn scenario_a_missing_method_lowers_overall_confidence() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "demo/foo.py", "class Foo:\n    def bar(self):\n        pass\n");
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "demo", IngestConfig::default());

    let script = "from demo.foo import Foo\n\nf = Foo()\nf.bar()\nf.baz()\n";
    let findings = statuses(&store, script);
    assert_eq!(status_of(&findings, "f.bar()").0, FindingStatus::Valid);
    assert_eq!(status_of(&findings, "f.baz()").0, FindingStatus::NotFound);

    let report = check(&store, script);
    assert_eq!(report.not_found_count, 1);
    assert!(report.overall_confidence.unwrap() < 1.0);
    assert_eq!(report.hallucinations[0].usage, "f.baz()");
    assert_eq!(report.hallucinations[0].suggestions, vec!["bar"]);
}

#[test]
fn scenario_b_inherited_method_is_valid() {
    let repo = tempfile::tempdir().unwrap();
    write(
        repo.path(),
        "family.py",
        "class Base:\n    def greet(self):\n        pass\n\nclass Child(Base):\n    pass\n",
    );
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "family", IngestConfig::default());

    let findings = statuses(&store, "from family import Child\n\nc = Child()\nc.greet()\n");
    assert_eq!(status_of(&findings, "c.greet()").0, FindingStatus::Valid);
}

#[test]
fn multi_level_inheritance_across_modules() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "zoo/__init__.py", "");
    write(repo.path(), "zoo/a.py", "class A:\n    def feed(self, amount):\n        pass\n");
    write(repo.path(), "zoo/b.py", "from zoo.a import A\n\nclass B(A):\n    pass\n");
    write(repo.path(), "zoo/c.py", "from .b import B\n\nclass C(B):\n    pass\n");
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "zoo", IngestConfig::default());

    let findings = statuses(&store, "from zoo.c import C\n\nx = C()\nx.feed(3)\n");
    assert_eq!(status_of(&findings, "x.feed()").0, FindingStatus::Valid);
}

#[test]
fn scenario_c_unindexed_module_is_indeterminate() {
    let store = SqliteGraphStore::open_in_memory().unwrap();
    let report = check(
        &store,
        "import requests\nfrom pandas import DataFrame\n\ndf = DataFrame()\ndf.to_csv('x')\nrequests.get('u')\n",
    );
    assert_eq!(report.not_found_count, 0);
    assert_eq!(report.valid_count, 0);
    assert_eq!(report.unknown_count, report.total);
    assert_eq!(report.overall_confidence, None);
    assert!(report.recommendations.iter().any(|r| r.contains("not indexed")));
}

#[test]
fn inheritance_cycle_is_unknown() {
    let repo = tempfile::tempdir().unwrap();
    write(
        repo.path(),
        "loop.py",
        "class A(B):\n    pass\n\nclass B(A):\n    pass\n",
    );
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "loop", IngestConfig::default());

    let findings = statuses(&store, "from loop import A\n\na = A()\na.anything()\n");
    assert_eq!(status_of(&findings, "a.anything()").0, FindingStatus::Unknown);
}

#[test]
fn unknown_receivers_never_produce_not_found() {
    let repo = tempfile::tempdir().unwrap();
    write(
        repo.path(),
        "svc.py",
        "class Service:\n    def run(self):\n        pass\n\ndef build():\n    return Service()\n",
    );
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "svc", IngestConfig::default());

    let findings = statuses(
        &store,
        "from svc import build\n\ns = build()\ns.stop()\nbuild().stop()\n",
    );
    for (usage, status, _) in &findings {
        if usage.ends_with(".stop()") {
            assert_eq!(*status, FindingStatus::Unknown, "{usage}");
        }
    }
}

#[test]
fn external_base_does_not_bind_to_same_named_local_class() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "app/widgets.py", "class View:\n    def render(self):\n        pass\n");
    write(
        repo.path(),
        "app/views.py",
        "from django.views import View\n\nclass MyView(View):\n    pass\n",
    );
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "app", IngestConfig::default());

    let findings = statuses(
        &store,
        "from app.views import MyView\n\nv = MyView()\nv.dispatch()\nv.render()\n",
    );
    assert_eq!(status_of(&findings, "app.views.MyView()").0, FindingStatus::Valid);
    assert_eq!(status_of(&findings, "v.dispatch()"), (FindingStatus::Unknown, 0.0));
    assert_eq!(status_of(&findings, "v.render()"), (FindingStatus::Unknown, 0.0));
}

#[test]
fn names_from_script_star_imports_resolve_through_their_source() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "ui/frame.py", "class Frame:\n    def draw(self):\n        pass\n");
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "ui", IngestConfig::default());

    let external = statuses(&store, "from tkinter import *\n\nf = Frame()\nf.pack()\n");
    assert_eq!(status_of(&external, "Frame()"), (FindingStatus::Unknown, 0.0));
    assert_eq!(status_of(&external, "f.pack()"), (FindingStatus::Unknown, 0.0));

    let indexed = statuses(&store, "from ui.frame import *\n\nf = Frame()\nf.draw()\nf.pack()\n");
    assert_eq!(status_of(&indexed, "Frame()").0, FindingStatus::Valid);
    assert_eq!(status_of(&indexed, "f.draw()").0, FindingStatus::Valid);
    assert_eq!(status_of(&indexed, "f.pack()").0, FindingStatus::NotFound);
}

#[test]
fn capitalised_submodule_import_is_treated_as_a_module() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "PIL/__init__.py", "");
    write(
        repo.path(),
        "PIL/Image.py",
        "def open(fp):\n    pass\n\nclass Image:\n    def save(self, path):\n        pass\n",
    );
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "pil", IngestConfig::default());

    let findings = statuses(
        &store,
        "from PIL import Image\n\nimg = Image.open('x.png')\npic = Image.Image()\nImage.close()\n",
    );
    assert_eq!(status_of(&findings, "from PIL import Image").0, FindingStatus::Valid);
    assert_eq!(status_of(&findings, "Image.open()"), (FindingStatus::Valid, 1.0));
    assert_eq!(status_of(&findings, "Image.Image()").0, FindingStatus::Valid);
    assert_eq!(status_of(&findings, "Image.close()").0, FindingStatus::NotFound);
}

#[test]
fn direct_instantiation_miss_is_confident() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "svc.py", "class Service:\n    def run(self):\n        pass\n");
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "svc", IngestConfig::default());

    let findings = statuses(&store, "from svc import Service\n\ns = Service()\ns.launch()\n");
    let (status, confidence) = status_of(&findings, "s.launch()");
    assert_eq!(status, FindingStatus::NotFound);
    assert!(confidence >= 0.8);
}

#[test]
fn ingestion_is_idempotent() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "pkg/__init__.py", "");
    write(
        repo.path(),
        "pkg/models.py",
        "import json\n\nLIMIT = 3\n\nclass User:\n    name: str\n\n    def save(self):\n        self.saved = True\n\ndef load():\n    pass\n",
    );
    let store = SqliteGraphStore::open_in_memory().unwrap();
    let config = IngestConfig {
        skip_unchanged: false,
        ..IngestConfig::default()
    };
    ingest(&store, repo.path(), "pkg", config.clone());
    let first = store.stats(None).unwrap();
    let users = store.find_class("User", None).unwrap();
    let methods = store.class_methods(users[0].id).unwrap();

    ingest(&store, repo.path(), "pkg", config);
    assert_eq!(store.stats(None).unwrap(), first);
    let again = store.find_class("User", None).unwrap();
    assert_eq!(again, users);
    assert_eq!(store.class_methods(again[0].id).unwrap(), methods);
    assert_eq!(first.classes, 1);
    assert_eq!(first.attributes, 2);
}

#[test]
fn scenario_d_reingestion_is_additive_by_default() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "lib/core.py", "class Foo:\n    def bar(self):\n        pass\n");
    write(repo.path(), "lib/old.py", "def legacy():\n    pass\n");
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "lib", IngestConfig::default());

    write(repo.path(), "lib/core.py", "class Foo:\n    def baz(self):\n        pass\n");
    fs::remove_file(repo.path().join("lib/old.py")).unwrap();
    ingest(&store, repo.path(), "lib", IngestConfig::default());

    let findings = statuses(
        &store,
        "from lib.core import Foo\nfrom lib.old import legacy\n\nf = Foo()\nf.bar()\nf.baz()\nlegacy()\n",
    );
    assert_eq!(status_of(&findings, "f.bar()").0, FindingStatus::Valid);
    assert_eq!(status_of(&findings, "f.baz()").0, FindingStatus::Valid);
    assert_eq!(status_of(&findings, "lib.old.legacy()").0, FindingStatus::Valid);
}

#[test]
fn scenario_d_prune_keeps_only_current_symbols() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "lib/core.py", "class Foo:\n    def bar(self):\n        pass\n");
    write(repo.path(), "lib/old.py", "def legacy():\n    pass\n");
    let store = SqliteGraphStore::open_in_memory().unwrap();
    let prune = IngestConfig {
        prune_stale: true,
        ..IngestConfig::default()
    };
    ingest(&store, repo.path(), "lib", prune.clone());

    write(repo.path(), "lib/core.py", "class Foo:\n    def baz(self):\n        pass\n");
    fs::remove_file(repo.path().join("lib/old.py")).unwrap();
    let result = RepositoryIngester::new(&store, prune)
        .ingest_as(repo.path(), &Repository::named("lib"))
        .unwrap();
    assert_eq!(result.files_pruned, 1);
    assert!(result.entities_pruned >= 2);

    let findings = statuses(
        &store,
        "from lib.core import Foo\n\nf = Foo()\nf.bar()\nf.baz()\n",
    );
    assert_eq!(status_of(&findings, "f.bar()").0, FindingStatus::NotFound);
    assert_eq!(status_of(&findings, "f.baz()").0, FindingStatus::Valid);
    assert!(!store.module_indexed("lib.old").unwrap());
}

#[test]
fn broken_file_survives_prune_with_last_good_version() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "app.py", "class App:\n    def start(self):\n        pass\n");
    let store = SqliteGraphStore::open_in_memory().unwrap();
    let prune = IngestConfig {
        prune_stale: true,
        ..IngestConfig::default()
    };
    ingest(&store, repo.path(), "app", prune.clone());

    write(repo.path(), "app.py", "class App:\n    def start(self:\n");
    let result = RepositoryIngester::new(&store, prune)
        .ingest_as(repo.path(), &Repository::named("app"))
        .unwrap();
    assert_eq!(result.parse_errors.len(), 1);
    assert_eq!(result.files_pruned, 0);

    let findings = statuses(&store, "from app import App\n\nApp().start()\n");
    assert_eq!(status_of(&findings, "App().start()").0, FindingStatus::Valid);
}

#[test]
fn unparsable_script_is_an_error_not_a_clean_report() {
    let store = SqliteGraphStore::open_in_memory().unwrap();
    let err = check_script(
        &store,
        "def broken(:\n",
        Some("bad.py"),
        &ValidationConfig::default(),
        &CancellationToken::new(),
    )
    .unwrap_err();
    match err {
        TetherError::Parse(e) => assert_eq!(e.file, "bad.py"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn cancelled_check_is_flagged_partial() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "svc.py", "class Service:\n    pass\n");
    let store = SqliteGraphStore::open_in_memory().unwrap();
    ingest(&store, repo.path(), "svc", IngestConfig::default());

    let token = CancellationToken::new();
    token.cancel();
    let report = check_script(
        &store,
        "from svc import Service\n\nService()\n",
        None,
        &ValidationConfig::default(),
        &token,
    )
    .unwrap();
    assert!(report.partial);
    assert_eq!(report.total, 0);
}

#[test]
fn file_backed_store_persists_between_opens() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "svc.py", "class Service:\n    def run(self):\n        pass\n");
    let data = tempfile::tempdir().unwrap();
    let db_path = data.path().join("graph").join("tether.db");

    {
        let store = SqliteGraphStore::open(&db_path, &Default::default()).unwrap();
        ingest(&store, repo.path(), "svc", IngestConfig::default());
        store.close().unwrap();
    }
    let store = SqliteGraphStore::open(&db_path, &Default::default()).unwrap();
    let findings = statuses(&store, "from svc import Service\n\nService().run()\n");
    assert_eq!(status_of(&findings, "Service().run()").0, FindingStatus::Valid);
}
