//! Boundary search for a changed module.

use crate::graph::{GraphError, ModuleGraph, ModuleId};
use crate::patterns::is_css_request;
use std::collections::{HashSet, VecDeque};

/// A module that will apply an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub boundary: ModuleId,
    /// The module whose change the boundary accepts.
    pub accepted_via: ModuleId,
    pub is_within_circular_import: bool,
}

/// Walk importers of `changed` breadth-first, collecting accept boundaries.
///
/// Returns `true` when some path reaches a module with no importers that
/// accepts nothing: a dead end, which means the page must reload. `visited`
/// is shared across all modules of one change, so no module is processed
/// twice and cycles terminate.
pub fn propagate_update(
    graph: &ModuleGraph,
    changed: ModuleId,
    visited: &mut HashSet<ModuleId>,
    boundaries: &mut Vec<Boundary>,
) -> Result<bool, GraphError> {
    let mut queue = VecDeque::from([changed]);

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        let node = graph.node(current)?;

        // Never analyzed: the client has not loaded it, nothing to update.
        let Some(self_accepting) = node.is_self_accepting() else {
            continue;
        };

        if self_accepting {
            boundaries.push(boundary(graph, current, current));
            // CSS importers of a self-accepting module can be stale.
            for &importer in node.importers() {
                if graph.get(importer).is_some_and(|i| is_css_request(i.id())) {
                    queue.push_back(importer);
                }
            }
            continue;
        }

        if node.accepted_hmr_exports().is_some() {
            // Partially accepting with no importers counts as self accepting.
            boundaries.push(boundary(graph, current, current));
        } else {
            if node.importers().is_empty() {
                return Ok(true);
            }
            let all_css = node
                .importers()
                .iter()
                .all(|i| graph.get(*i).is_some_and(|n| is_css_request(n.id())));
            if !is_css_request(node.id()) && all_css {
                return Ok(true);
            }
        }

        for &importer in node.importers() {
            let importer_node = graph.node(importer)?;
            if importer_node.accepted_hmr_deps().contains(&current) {
                boundaries.push(boundary(graph, importer, current));
                continue;
            }
            queue.push_back(importer);
        }
    }
    Ok(false)
}

fn boundary(graph: &ModuleGraph, boundary: ModuleId, accepted_via: ModuleId) -> Boundary {
    Boundary {
        boundary,
        accepted_via,
        is_within_circular_import: graph.is_in_cycle(boundary),
    }
}
