//! Integration tests for watcher events flowing through a dev session.

use modgraph_core::hmr::{FileEvent, HmrOutcome, HmrPayload, UpdateKind};
use modgraph_core::{DevSession, ProjectConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// index.html -> main.js -> { App.js (self accepting) -> counter.js, style.css }
fn start() -> (TempDir, DevSession, UnboundedReceiver<HmrPayload>) {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "index.html", r#"<script type="module" src="/src/main.js"></script>"#);
    write(root, "src/main.js", "import './App.js'\nimport './style.css'\n");
    write(
        root,
        "src/App.js",
        "import { n } from './counter.js'\nexport default n\nimport.meta.hot.accept()\n",
    );
    write(root, "src/counter.js", "export const n = 1\n");
    write(root, "src/style.css", "body { color: red }");

    let (tx, rx) = unbounded_channel();
    let session = DevSession::new(ProjectConfig::new(root), Arc::new(tx)).unwrap();
    assert_eq!(session.crawl(Path::new("index.html")).unwrap(), 5);
    (dir, session, rx)
}

fn next_payload(rx: &mut UnboundedReceiver<HmrPayload>) -> HmrPayload {
    rx.try_recv().expect("a payload should have been sent")
}

#[test]
fn test_leaf_change_updates_nearest_accepting_importer() {
    let (dir, session, mut rx) = start();

    let outcome = session.handle_file_event(&FileEvent::change(dir.path().join("src/counter.js")));
    let HmrOutcome::Update(updates) = outcome else {
        panic!("expected an update, got {outcome:?}");
    };
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].kind, UpdateKind::JsUpdate);
    assert_eq!(updates[0].path, "/src/App.js");
    assert_eq!(updates[0].accepted_path, "/src/App.js");
    assert!(!updates[0].is_within_circular_import);

    assert!(matches!(next_payload(&mut rx), HmrPayload::Update { .. }));

    // The changed module and the chain up to the boundary are dirty.
    let counter = session.module_id_for(Path::new("src/counter.js"));
    session.with_graph(|graph| {
        assert!(graph.get_module_by_id(&counter).unwrap().transform_result().is_none());
    });
    assert_eq!(session.reload_file(Path::new("src/counter.js")).unwrap(), 1);
}

#[test]
fn test_css_change_is_a_css_update() {
    let (dir, session, _rx) = start();

    let outcome = session.handle_file_event(&FileEvent::change(dir.path().join("src/style.css")));
    let HmrOutcome::Update(updates) = outcome else {
        panic!("expected an update, got {outcome:?}");
    };
    assert_eq!(updates[0].kind, UpdateKind::CssUpdate);
    assert_eq!(updates[0].path, "/src/style.css");
}

#[test]
fn test_change_without_boundary_reloads() {
    let (dir, session, mut rx) = start();

    let outcome = session.handle_file_event(&FileEvent::change(dir.path().join("src/main.js")));
    assert_eq!(
        outcome,
        HmrOutcome::FullReload {
            path: None,
            triggered_by: "/src/main.js".to_string()
        }
    );
    assert_eq!(
        next_payload(&mut rx),
        HmrPayload::FullReload {
            path: None,
            triggered_by: Some("/src/main.js".to_string())
        }
    );
}

#[test]
fn test_untracked_files() {
    let (dir, session, mut rx) = start();
    write(dir.path(), "notes.txt", "hi");
    write(dir.path(), "about.html", "<p>about</p>");

    let outcome = session.handle_file_event(&FileEvent::change(dir.path().join("notes.txt")));
    assert_eq!(outcome, HmrOutcome::NoUpdate);
    assert!(rx.try_recv().is_err());

    let outcome = session.handle_file_event(&FileEvent::change(dir.path().join("about.html")));
    assert!(outcome.is_full_reload());
}

#[test]
fn test_unlink_removes_module_from_graph() {
    let (dir, session, _rx) = start();
    let counter = session.module_id_for(Path::new("src/counter.js"));
    let app = session.module_id_for(Path::new("src/App.js"));

    fs::remove_file(dir.path().join("src/counter.js")).unwrap();
    let outcome = session.handle_file_event(&FileEvent::unlink(dir.path().join("src/counter.js")));
    assert!(matches!(outcome, HmrOutcome::Update(_)));

    session.with_graph(|graph| {
        assert!(graph.get_module_by_id(&counter).is_none());
        assert!(graph.get_module_by_id(&app).unwrap().imported_modules().is_empty());
        graph.check_consistency().unwrap();
    });

    // A repeated unlink finds nothing to do.
    let again = session.handle_file_event(&FileEvent::unlink(dir.path().join("src/counter.js")));
    assert_eq!(again, HmrOutcome::NoUpdate);
}

#[test]
fn test_client_invalidation_moves_up_to_importers() {
    let (_dir, session, _rx) = start();
    let app = session.module_id_for(Path::new("src/App.js"));

    // main.js accepts nothing and only the page imports it.
    assert!(session.handle_invalidate(&app).is_full_reload());
    assert!(session.handle_invalidate("/not/in/graph.js").is_full_reload());
}

#[test]
fn test_package_json_change_clears_package_cache() {
    let (dir, session, _rx) = start();
    write(dir.path(), "package.json", r#"{"name":"app"}"#);
    session
        .packages()
        .find_nearest_package_data(dir.path())
        .unwrap();
    let epoch = session.packages().epoch();

    session.handle_file_event(&FileEvent::change(dir.path().join("package.json")));
    assert_ne!(session.packages().epoch(), epoch);
}
