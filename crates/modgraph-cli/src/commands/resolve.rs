//! `modgraph resolve` command implementation.

use miette::{IntoDiagnostic, Result};
use modgraph_core::config::{Command, Consumer};
use modgraph_core::{
    ImportKind, PackageCache, ProjectConfig, Resolution, ResolveOptions, ResolveRequest, Resolver,
};
use modgraph_util::path::normalize_slashes;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ResolveArgs {
    pub specifier: String,
    pub importer: Option<PathBuf>,
    pub require: bool,
    pub ssr: bool,
    pub build: bool,
}

#[derive(Serialize)]
struct ResolveOutput<'a> {
    specifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    importer: Option<&'a str>,
    resolution: &'a Resolution,
}

pub fn run(mut project: ProjectConfig, args: &ResolveArgs, json: bool) -> Result<()> {
    if args.ssr {
        project = project.with_consumer(Consumer::Server);
    }
    if args.build {
        project = project.with_command(Command::Build);
    }

    let resolver = Resolver::new(
        ResolveOptions::from_config(&project),
        Arc::new(PackageCache::new()),
    )
    .into_diagnostic()?;

    let importer = args
        .importer
        .as_deref()
        .map(|importer| importer_id(&project.root, importer));
    let mut request = ResolveRequest::new(&args.specifier);
    if let Some(importer) = &importer {
        request = request.importer(importer);
    }
    if args.require {
        request = request.kind(ImportKind::Require);
    }

    let resolution = resolver.resolve(&request).into_diagnostic()?;

    if json {
        return super::print_json(&ResolveOutput {
            specifier: &args.specifier,
            importer: importer.as_deref(),
            resolution: &resolution,
        });
    }

    match &resolution {
        Resolution::Resolved { id, side_effects } => {
            println!("{id}");
            if let Some(side_effects) = side_effects {
                println!("  sideEffects: {side_effects}");
            }
        }
        Resolution::External { id, .. } => println!("{id} (external)"),
        Resolution::Special(special) => println!("{} (placeholder)", special.encode()),
        Resolution::NotFound => {
            eprintln!("error: could not resolve \"{}\"", args.specifier);
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Absolute id of an importer given relative to the project root. The file
/// need not exist.
fn importer_id(root: &Path, importer: &Path) -> String {
    let path = root.join(importer);
    let path = dunce::canonicalize(&path).unwrap_or(path);
    normalize_slashes(&path)
}
