//! `modgraph scan` command implementation.

use miette::{IntoDiagnostic, Result};
use modgraph_core::{DependencyScanner, DepsOptimizer, PackageCache, ProjectConfig, ResolveOptions, Resolver};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Serialize)]
struct ScanOutput<'a> {
    deps: &'a BTreeMap<String, String>,
    missing: &'a BTreeMap<String, String>,
    hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
}

pub fn run(mut project: ProjectConfig, entries: Vec<String>, write: bool, json: bool) -> Result<()> {
    if !entries.is_empty() {
        project.optimize_deps.entries = Some(entries);
    }
    let project = Arc::new(project);

    let resolver = Resolver::new(
        ResolveOptions::from_config(&project),
        Arc::new(PackageCache::new()),
    )
    .into_diagnostic()?;
    let scanner = DependencyScanner::new(Arc::clone(&project), Arc::new(resolver));

    let result = scanner.scan().into_diagnostic()?;

    let metadata = if write {
        let optimizer = DepsOptimizer::from_scan(&project, &result);
        optimizer.write_metadata().into_diagnostic()?;
        Some(optimizer.deps_dir().join("_metadata.json").display().to_string())
    } else {
        None
    };

    if json {
        return super::print_json(&ScanOutput {
            deps: &result.deps,
            missing: &result.missing,
            hash: result.hash(),
            metadata,
        });
    }

    if result.deps.is_empty() {
        println!("No dependencies to pre-bundle");
    } else {
        println!("Dependencies ({}):", result.deps.len());
        for (id, file) in &result.deps {
            println!("  {id} -> {file}");
        }
    }
    if !result.missing.is_empty() {
        println!("Missing ({}):", result.missing.len());
        for (id, importer) in &result.missing {
            println!("  {id} (imported by {importer})");
        }
    }
    println!("Hash: {}", result.hash());
    if let Some(path) = metadata {
        println!("Wrote {path}");
    }
    Ok(())
}
