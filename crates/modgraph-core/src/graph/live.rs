//! The dev-session module graph.
//!
//! Nodes live in an arena (`Vec<Option<ModuleNode>>`) addressed by
//! [`ModuleId`]; edges are handle sets on both ends. Removing a module
//! leaves a `None` slot so outstanding handles never alias a new node.

use super::node::{ModuleId, ModuleNode};
use super::{GraphError, ModuleLookup};
use crate::transform::TransformOutput;
use modgraph_util::path::clean_url;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: Vec<Option<ModuleNode>>,
    id_to_module: HashMap<String, ModuleId>,
    file_to_modules: HashMap<String, BTreeSet<ModuleId>>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the node for `id`. Distinct ids for the same file
    /// (query variants) are distinct nodes.
    pub fn ensure_module(&mut self, id: &str) -> ModuleId {
        if let Some(&module) = self.id_to_module.get(id) {
            return module;
        }
        let module = ModuleId(self.nodes.len());
        let file = clean_url(id).to_string();
        self.nodes.push(Some(ModuleNode::new(id.to_string(), file.clone())));
        self.id_to_module.insert(id.to_string(), module);
        self.file_to_modules.entry(file).or_default().insert(module);
        module
    }

    #[must_use]
    pub fn module_id(&self, id: &str) -> Option<ModuleId> {
        self.id_to_module.get(id).copied()
    }

    #[must_use]
    pub fn get_module_by_id(&self, id: &str) -> Option<&ModuleNode> {
        self.module_id(id).and_then(|m| self.get(m))
    }

    /// Handles of every module backed by `file`, in creation order.
    #[must_use]
    pub fn get_modules_by_file(&self, file: &str) -> Vec<ModuleId> {
        self.file_to_modules
            .get(file)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get(&self, module: ModuleId) -> Option<&ModuleNode> {
        self.nodes.get(module.0).and_then(Option::as_ref)
    }

    /// Like [`get`](Self::get), but a dead or foreign handle is an error.
    pub fn node(&self, module: ModuleId) -> Result<&ModuleNode, GraphError> {
        self.get(module)
            .ok_or_else(|| GraphError::UnknownModule(module.to_string()))
    }

    fn node_mut(&mut self, module: ModuleId) -> Result<&mut ModuleNode, GraphError> {
        self.nodes
            .get_mut(module.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| GraphError::UnknownModule(module.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.id_to_module.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id_to_module.is_empty()
    }

    /// Live modules in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &ModuleNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (ModuleId(i), n)))
    }

    /// Record `importer -> imported`, on both ends.
    pub fn add_import(&mut self, importer: ModuleId, imported: ModuleId) -> Result<(), GraphError> {
        self.node(imported)?;
        self.node_mut(importer)?.imported_modules.insert(imported);
        self.node_mut(imported)?.importers.insert(importer);
        Ok(())
    }

    /// Replace the imports and accept metadata of `module` after it was
    /// (re)analyzed.
    ///
    /// Returns the previously imported modules that lost their last
    /// importer with this update.
    pub fn update_module_info(
        &mut self,
        module: ModuleId,
        imported: &[ModuleId],
        accepted: &[ModuleId],
        accepted_exports: Option<BTreeSet<String>>,
        is_self_accepting: bool,
    ) -> Result<Vec<ModuleId>, GraphError> {
        for &m in imported.iter().chain(accepted) {
            self.node(m)?;
        }

        let next: BTreeSet<ModuleId> = imported.iter().copied().collect();
        let node = self.node_mut(module)?;
        node.is_self_accepting = Some(is_self_accepting);
        node.accepted_hmr_deps = accepted.iter().copied().collect();
        node.accepted_hmr_exports = accepted_exports;
        let previous = std::mem::replace(&mut node.imported_modules, next.clone());

        for &m in &next {
            self.node_mut(m)?.importers.insert(module);
        }

        let mut no_longer_imported = Vec::new();
        for m in previous.difference(&next) {
            if let Ok(dep) = self.node_mut(*m) {
                dep.importers.remove(&module);
                if dep.importers.is_empty() {
                    no_longer_imported.push(*m);
                }
            }
        }
        Ok(no_longer_imported)
    }

    /// Store the transform engine's output on a node, making it fresh.
    pub fn set_transform_result(
        &mut self,
        module: ModuleId,
        result: TransformOutput,
    ) -> Result<(), GraphError> {
        self.node_mut(module)?.transform_result = Some(result);
        Ok(())
    }

    /// Mark `module` dirty and propagate to importers that do not accept it.
    ///
    /// `seen` is shared across one invalidation pass so each module is
    /// handled once, including through import cycles. HMR-triggered
    /// invalidation stamps `last_hmr_timestamp`; any other source stamps
    /// `last_invalidation_timestamp`.
    pub fn invalidate_module(
        &mut self,
        module: ModuleId,
        seen: &mut HashSet<ModuleId>,
        timestamp: u64,
        is_hmr: bool,
    ) -> Result<(), GraphError> {
        self.node(module)?;
        let mut stack = vec![module];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let node = self.node_mut(current)?;
            node.transform_result = None;
            if is_hmr {
                node.last_hmr_timestamp = timestamp;
            } else {
                node.last_invalidation_timestamp = timestamp;
            }
            let importers: Vec<ModuleId> = node.importers.iter().copied().collect();
            for importer in importers {
                let accepts = self
                    .get(importer)
                    .is_some_and(|i| i.accepted_hmr_deps.contains(&current));
                if !accepts {
                    stack.push(importer);
                }
            }
        }
        Ok(())
    }

    /// Mark every module dirty. Structure is kept.
    pub fn invalidate_all(&mut self, timestamp: u64) {
        for node in self.nodes.iter_mut().flatten() {
            node.transform_result = None;
            node.last_invalidation_timestamp = timestamp;
        }
        debug!(modules = self.id_to_module.len(), "invalidated all modules");
    }

    /// Invalidate every module backed by `file`. Returns their handles.
    pub fn on_file_change(&mut self, file: &str, timestamp: u64) -> Vec<ModuleId> {
        let modules = self.get_modules_by_file(file);
        let mut seen = HashSet::new();
        for &m in &modules {
            // Handles come from the file index and are live.
            let _ = self.invalidate_module(m, &mut seen, timestamp, false);
        }
        modules
    }

    /// Remove every module backed by `file` and excise their edges on both
    /// ends. Modules only reachable through them stay as orphans. Returns
    /// the removed ids.
    pub fn on_file_delete(&mut self, file: &str) -> Vec<String> {
        let modules = self.get_modules_by_file(file);
        let mut removed = Vec::with_capacity(modules.len());
        for m in modules {
            if let Some(id) = self.remove_module(m) {
                removed.push(id);
            }
        }
        removed
    }

    fn remove_module(&mut self, module: ModuleId) -> Option<String> {
        let node = self.nodes.get_mut(module.0)?.take()?;
        for importer in &node.importers {
            if let Some(Some(i)) = self.nodes.get_mut(importer.0) {
                i.imported_modules.remove(&module);
                i.accepted_hmr_deps.remove(&module);
            }
        }
        for imported in &node.imported_modules {
            if let Some(Some(i)) = self.nodes.get_mut(imported.0) {
                i.importers.remove(&module);
            }
        }
        self.id_to_module.remove(&node.id);
        if let Some(set) = self.file_to_modules.get_mut(&node.file) {
            set.remove(&module);
            if set.is_empty() {
                self.file_to_modules.remove(&node.file);
            }
        }
        debug!(id = %node.id, "removed module");
        Some(node.id)
    }

    /// Whether `module` can reach itself through its imports.
    #[must_use]
    pub fn is_in_cycle(&self, module: ModuleId) -> bool {
        let mut seen = HashSet::new();
        let mut stack: Vec<ModuleId> = self
            .get(module)
            .map(|n| n.imported_modules.iter().copied().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if current == module {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(node) = self.get(current) {
                stack.extend(node.imported_modules.iter().copied());
            }
        }
        false
    }

    /// Verify edge symmetry and index coherence.
    pub fn check_consistency(&self) -> Result<(), GraphError> {
        let broken = |msg: String| Err(GraphError::Inconsistent(msg));
        for (m, node) in self.iter() {
            if self.id_to_module.get(&node.id) != Some(&m) {
                return broken(format!("{} is not indexed by id", node.id));
            }
            if !self.file_to_modules.get(&node.file).is_some_and(|s| s.contains(&m)) {
                return broken(format!("{} is not indexed by file {}", node.id, node.file));
            }
            for imported in &node.imported_modules {
                match self.get(*imported) {
                    Some(dep) if dep.importers.contains(&m) => {}
                    Some(dep) => {
                        return broken(format!("{} imports {} without back edge", node.id, dep.id));
                    }
                    None => return broken(format!("{} imports removed module {imported}", node.id)),
                }
            }
            for importer in &node.importers {
                match self.get(*importer) {
                    Some(i) if i.imported_modules.contains(&m) => {}
                    Some(i) => {
                        return broken(format!("{} lists importer {} without forward edge", node.id, i.id));
                    }
                    None => return broken(format!("{} lists removed importer {importer}", node.id)),
                }
            }
        }
        if self.id_to_module.len() != self.iter().count() {
            return broken("id index holds removed modules".to_string());
        }
        Ok(())
    }
}

impl ModuleLookup for ModuleGraph {
    fn contains_module(&self, id: &str) -> bool {
        self.id_to_module.contains_key(id)
    }

    fn module_file(&self, id: &str) -> Option<&str> {
        self.get_module_by_id(id).map(ModuleNode::file)
    }

    fn module_ids_by_file(&self, file: &str) -> Vec<String> {
        self.get_modules_by_file(file)
            .into_iter()
            .filter_map(|m| self.get(m).map(|n| n.id.clone()))
            .collect()
    }

    fn importer_ids(&self, id: &str) -> Vec<String> {
        let Some(node) = self.get_module_by_id(id) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = node
            .importers
            .iter()
            .filter_map(|m| self.get(*m).map(|n| n.id.clone()))
            .collect();
        ids.sort();
        ids
    }

    fn module_count(&self) -> usize {
        self.len()
    }
}
