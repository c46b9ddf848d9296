//! `modgraph graph` command implementation.

use miette::{IntoDiagnostic, Result};
use modgraph_core::graph::ModuleState;
use modgraph_core::hmr::NoopTransport;
use modgraph_core::{DevSession, ModuleGraph, ProjectConfig};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct NodeOutput {
    id: String,
    state: ModuleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    self_accepting: Option<bool>,
    imports: Vec<String>,
    importers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GraphOutput {
    loaded: usize,
    modules: Vec<NodeOutput>,
}

pub fn run(project: ProjectConfig, entry: &Path, json: bool) -> Result<()> {
    let session = DevSession::new(project, Arc::new(NoopTransport)).into_diagnostic()?;
    let loaded = session.crawl(entry).into_diagnostic()?;
    let modules = session.with_graph(describe);

    if json {
        return super::print_json(&GraphOutput { loaded, modules });
    }

    println!("Loaded {loaded} modules ({} in graph)", modules.len());
    for node in &modules {
        let marker = match node.self_accepting {
            Some(true) => " [accepts]",
            Some(false) => "",
            None => " [not loaded]",
        };
        println!("{}{marker}", node.id);
        for import in &node.imports {
            println!("  -> {import}");
        }
    }
    Ok(())
}

/// Nodes sorted by id, edges by the id of the other end.
fn describe(graph: &ModuleGraph) -> Vec<NodeOutput> {
    let id_of = |m| graph.get(m).map(|n| n.id().to_string());
    let mut modules: Vec<NodeOutput> = graph
        .iter()
        .map(|(_, node)| {
            let mut imports: Vec<String> = node.imported_modules().iter().filter_map(|&m| id_of(m)).collect();
            let mut importers: Vec<String> = node.importers().iter().filter_map(|&m| id_of(m)).collect();
            imports.sort();
            importers.sort();
            NodeOutput {
                id: node.id().to_string(),
                state: node.state(),
                self_accepting: node.is_self_accepting(),
                imports,
                importers,
            }
        })
        .collect();
    modules.sort_by(|a, b| a.id.cmp(&b.id));
    modules
}
