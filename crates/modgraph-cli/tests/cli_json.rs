//! Integration tests for `modgraph --json` command output.

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "modgraph-cli", "--bin", "modgraph", "--"]);
    cmd
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "index.html", r#"<script type="module" src="/src/main.js"></script>"#);
    write(root, "src/main.js", "import React from 'react'\nimport './App.js'\n");
    write(root, "src/App.js", "export default 1\nimport.meta.hot.accept()\n");
    write(root, "node_modules/react/package.json", r#"{"name":"react","main":"index.js"}"#);
    write(root, "node_modules/react/index.js", "");
    dir
}

fn run_json(dir: &TempDir, args: &[&str]) -> serde_json::Value {
    let output = cargo_bin()
        .arg("--json")
        .arg("--cwd")
        .arg(dir.path())
        .args(args)
        .output()
        .expect("Failed to run modgraph");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_str(&stdout).expect("stdout should be valid JSON")
}

#[test]
fn test_resolve_json() {
    let dir = project();
    let json = run_json(&dir, &["resolve", "react", "--importer", "src/main.js"]);

    assert_eq!(json["specifier"], "react");
    assert_eq!(json["resolution"]["kind"], "resolved");
    let id = json["resolution"]["id"].as_str().unwrap();
    assert!(id.ends_with("node_modules/react/index.js"), "{id}");
}

#[test]
fn test_resolve_builtin_for_ssr_is_external() {
    let dir = project();
    let json = run_json(&dir, &["resolve", "node:fs", "--ssr"]);

    assert_eq!(json["resolution"]["kind"], "external");
    assert_eq!(json["resolution"]["id"], "node:fs");
}

#[test]
fn test_scan_json_and_metadata() {
    let dir = project();
    let json = run_json(&dir, &["scan", "--write"]);

    let deps = json["deps"].as_object().unwrap();
    assert_eq!(deps.keys().collect::<Vec<_>>(), vec!["react"]);
    assert!(json["hash"].as_str().is_some_and(|h| !h.is_empty()));
    let metadata = json["metadata"].as_str().unwrap();
    assert!(Path::new(metadata).is_file(), "{metadata}");
}

#[test]
fn test_graph_json() {
    let dir = project();
    let json = run_json(&dir, &["graph", "index.html"]);

    assert_eq!(json["loaded"], 3);
    let modules = json["modules"].as_array().unwrap();
    let app = modules
        .iter()
        .find(|m| m["id"].as_str().is_some_and(|id| id.ends_with("src/App.js")))
        .expect("App.js should be in the graph");
    assert_eq!(app["self_accepting"], true);
    assert_eq!(app["state"], "fresh");
}
