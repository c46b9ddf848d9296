use super::*;
use crate::config::BuildInput;
use crate::packages::PackageCache;
use crate::resolver::ResolveOptions;
use crate::transform::{Loader, TransformOutput};
use std::fs;
use tempfile::{tempdir, TempDir};

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn id(root: &Path, rel: &str) -> String {
    normalize_slashes(&dunce::canonicalize(root).unwrap().join(rel))
}

fn scanner(config: ProjectConfig) -> DependencyScanner {
    let config = Arc::new(config);
    let resolver = Resolver::new(ResolveOptions::from_config(&config), Arc::new(PackageCache::new())).unwrap();
    DependencyScanner::new(config, Arc::new(resolver))
}

/// index.html -> src/main.js -> react, ./util.js -> missing-pkg
fn react_project() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "index.html", r#"<script type="module" src="/src/main.js"></script>"#);
    write(root, "src/main.js", "import React from 'react'\nimport { util } from './util.js'\n");
    write(root, "src/util.js", "import 'missing-pkg'\nexport const util = 1\n");
    write(root, "node_modules/react/package.json", r#"{"name":"react","main":"index.js"}"#);
    write(
        root,
        "node_modules/react/index.js",
        "require('./cjs/react.development.js')\nrequire('scheduler')\n",
    );
    dir
}

#[test]
fn test_scan_records_and_externalizes_dependency() {
    let dir = react_project();
    let result = scanner(ProjectConfig::new(dir.path())).scan().unwrap();

    assert_eq!(
        result.deps,
        BTreeMap::from([("react".to_string(), id(dir.path(), "node_modules/react/index.js"))])
    );
    // react's internals were never crawled, so `scheduler` is not reported.
    assert_eq!(
        result.missing,
        BTreeMap::from([("missing-pkg".to_string(), id(dir.path(), "src/util.js"))])
    );
}

#[test]
fn test_deps_sorted_and_hash_stable() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "main.js", "import 'zod'\nimport 'axios'\nimport 'm-lib'\n");
    for name in ["zod", "axios", "m-lib"] {
        write(root, &format!("node_modules/{name}/package.json"), &format!(r#"{{"name":"{name}","main":"index.js"}}"#));
        write(root, &format!("node_modules/{name}/index.js"), "export default 1");
    }
    let config = ProjectConfig::new(root).with_optimize_deps(crate::config::OptimizeDepsConfig {
        entries: Some(vec!["main.js".to_string()]),
        ..Default::default()
    });

    let first = scanner(config.clone()).scan().unwrap();
    let keys: Vec<_> = first.deps.keys().cloned().collect();
    assert_eq!(keys, vec!["axios", "m-lib", "zod"]);

    let second = scanner(config).scan().unwrap();
    assert_eq!(first.hash(), second.hash());
    assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
}

#[test]
fn test_cancelled_scan_is_empty() {
    let dir = react_project();
    let scanner = scanner(ProjectConfig::new(dir.path()));
    scanner.handle().cancel();
    assert!(scanner.handle().is_cancelled());
    assert_eq!(scanner.scan().unwrap(), ScanResult::default());
}

#[test]
fn test_vue_ts_script_imports_are_forced() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "index.html", r#"<script type="module" src="./App.vue"></script>"#);
    write(
        root,
        "App.vue",
        r#"<template><Chart /></template>
<script setup lang="ts">
import type { Props } from 'types-only'
import Chart from 'chart-lib'
</script>
"#,
    );
    write(root, "node_modules/chart-lib/package.json", r#"{"name":"chart-lib","module":"dist/index.mjs"}"#);
    write(root, "node_modules/chart-lib/dist/index.mjs", "export default {}");

    let result = scanner(ProjectConfig::new(root)).scan().unwrap();
    assert_eq!(
        result.deps.get("chart-lib"),
        Some(&id(root, "node_modules/chart-lib/dist/index.mjs"))
    );
    assert!(!result.missing.contains_key("types-only"));
}

#[test]
fn test_linked_package_is_crawled() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "main.js", "import 'local-lib'");
    write(root, "packages/local-lib/package.json", r#"{"name":"local-lib","main":"index.js"}"#);
    write(root, "packages/local-lib/index.js", "import 'react'");
    write(root, "node_modules/react/package.json", r#"{"name":"react","main":"index.js"}"#);
    write(root, "node_modules/react/index.js", "");
    #[cfg(unix)]
    std::os::unix::fs::symlink(root.join("packages/local-lib"), root.join("node_modules/local-lib")).unwrap();
    #[cfg(not(unix))]
    return;

    let result = scanner(ProjectConfig::new(root))
        .scan_entries(&[id(root, "main.js")])
        .unwrap();
    let keys: Vec<_> = result.deps.keys().cloned().collect();
    assert_eq!(keys, vec!["react"]);
}

#[test]
fn test_excluded_and_asset_imports_are_leaves() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "main.js",
        "import 'big-lib'\nimport './style.css'\nimport logo from './logo.png'\nimport w from './w.js?worker'\n",
    );
    write(root, "node_modules/big-lib/package.json", r#"{"name":"big-lib","main":"index.js"}"#);
    write(root, "node_modules/big-lib/index.js", "");
    let config = ProjectConfig::new(root).with_optimize_deps(crate::config::OptimizeDepsConfig {
        exclude: vec!["big-lib".to_string()],
        ..Default::default()
    });

    let result = scanner(config).scan_entries(&[id(root, "main.js")]).unwrap();
    assert!(result.is_empty());
}

#[test]
fn test_hard_resolve_error_fails_scan_with_entries() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "index.html", r#"<script type="module">import 'strict/internal'</script>"#);
    write(
        root,
        "node_modules/strict/package.json",
        r#"{"name":"strict","exports":{".":"./index.js"}}"#,
    );
    write(root, "node_modules/strict/index.js", "");

    let err = scanner(ProjectConfig::new(root)).scan().unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Failed to scan for dependencies from entries:"));
    assert!(message.contains("index.html"));
    match err {
        ScanError::Failed { source, .. } => match *source {
            ScanError::Resolve { specifier, source, .. } => {
                assert_eq!(specifier, "strict/internal");
                assert!(source.to_string().contains("./internal"));
            }
            other => panic!("unexpected inner error {other:?}"),
        },
        other => panic!("unexpected error {other:?}"),
    }
}

struct FailingTransform;

impl TransformEngine for FailingTransform {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn transform(&self, _id: &str, _source: &str, _loader: Loader) -> TransformOutput {
        TransformOutput {
            errors: vec!["Unexpected token".to_string()],
            ..TransformOutput::default()
        }
    }
}

#[test]
fn test_transform_errors_abort() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "main.ts", "const x: = 1");
    let scanner = scanner(ProjectConfig::new(root)).with_transformer(Arc::new(FailingTransform));

    let err = scanner.scan_entries(&[id(root, "main.ts")]).unwrap_err();
    assert!(matches!(err, ScanError::Transform { ref errors, .. } if errors[0] == "Unexpected token"));
}

#[test]
fn test_compute_entries_html_discovery_skips_ignored_dirs() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "index.html", "");
    write(root, "pages/about.html", "");
    write(root, "node_modules/pkg/demo.html", "");
    write(root, "dist/index.html", "");
    write(root, "__tests__/fixture.html", "");

    let entries = scanner(ProjectConfig::new(root)).compute_entries().unwrap();
    assert_eq!(entries, vec![id(root, "index.html"), id(root, "pages/about.html")]);
}

#[test]
fn test_compute_entries_explicit_and_build_input() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "src/a.ts", "");
    write(root, "src/b.js", "");
    write(root, "src/c.css", "");
    write(root, "__tests__/t.js", "");

    let globbed = ProjectConfig::new(root).with_optimize_deps(crate::config::OptimizeDepsConfig {
        entries: Some(vec!["src/**/*".to_string(), "!src/b.js".to_string()]),
        ..Default::default()
    });
    assert_eq!(scanner(globbed).compute_entries().unwrap(), vec![id(root, "src/a.ts")]);

    let mut built = ProjectConfig::new(root);
    built.build.input = Some(BuildInput::List(vec!["src/b.js".to_string(), "src/missing.js".to_string()]));
    assert_eq!(scanner(built).compute_entries().unwrap(), vec![id(root, "src/b.js")]);
}

#[test]
fn test_no_entries_returns_empty() {
    let dir = tempdir().unwrap();
    let result = scanner(ProjectConfig::new(dir.path())).scan().unwrap();
    assert!(result.is_empty());
}

#[test]
fn test_invalid_glob_is_reported() {
    let dir = tempdir().unwrap();
    let config = ProjectConfig::new(dir.path()).with_optimize_deps(crate::config::OptimizeDepsConfig {
        entries: Some(vec!["src/[.js".to_string()]),
        ..Default::default()
    });
    assert!(matches!(scanner(config).compute_entries(), Err(ScanError::Glob { .. })));
}
