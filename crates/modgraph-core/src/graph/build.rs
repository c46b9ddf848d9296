//! Build-summary module graph.
//!
//! After a build only identity and importer relations are known: there are
//! no transform results, timestamps, or accept metadata. The build graph is
//! append-only and exposes just that restricted capability set.

use super::{GraphError, ModuleLookup};
use modgraph_util::path::clean_url;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildModuleNode {
    pub id: String,
    pub file: String,
    pub importers: BTreeSet<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct BuildModuleGraph {
    modules: BTreeMap<String, BuildModuleNode>,
    #[serde(skip)]
    file_to_modules: BTreeMap<String, BTreeSet<String>>,
}

impl BuildModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from `(id, importer ids)` pairs as reported by a
    /// bundler. Every importer must itself be one of the modules.
    pub fn from_module_infos<'a, I, J>(infos: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (&'a str, J)> + Clone,
        J: IntoIterator<Item = &'a str>,
    {
        let mut graph = Self::new();
        for (id, _) in infos.clone() {
            graph.register_module(id);
        }
        for (id, importers) in infos {
            graph.add_importers(id, importers)?;
        }
        Ok(graph)
    }

    /// Register `id` if absent. Existing modules are left untouched.
    pub fn register_module(&mut self, id: &str) -> &BuildModuleNode {
        let file = clean_url(id).to_string();
        self.file_to_modules
            .entry(file.clone())
            .or_default()
            .insert(id.to_string());
        self.modules
            .entry(id.to_string())
            .or_insert_with(|| BuildModuleNode {
                id: id.to_string(),
                file,
                importers: BTreeSet::new(),
            })
    }

    /// Append importer relations to a registered module.
    pub fn add_importers<'a>(
        &mut self,
        id: &str,
        importers: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), GraphError> {
        let importers: Vec<&str> = importers.into_iter().collect();
        if let Some(unknown) = importers.iter().find(|i| !self.modules.contains_key(**i)) {
            return Err(GraphError::UnknownModule((*unknown).to_string()));
        }
        let node = self
            .modules
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownModule(id.to_string()))?;
        node.importers.extend(importers.into_iter().map(str::to_string));
        Ok(())
    }

    #[must_use]
    pub fn get_module_by_id(&self, id: &str) -> Option<&BuildModuleNode> {
        self.modules.get(id)
    }

    #[must_use]
    pub fn get_modules_by_file(&self, file: &str) -> Vec<&BuildModuleNode> {
        self.file_to_modules
            .get(file)
            .into_iter()
            .flatten()
            .filter_map(|id| self.modules.get(id))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildModuleNode> {
        self.modules.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ModuleLookup for BuildModuleGraph {
    fn contains_module(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    fn module_file(&self, id: &str) -> Option<&str> {
        self.modules.get(id).map(|n| n.file.as_str())
    }

    fn module_ids_by_file(&self, file: &str) -> Vec<String> {
        self.file_to_modules
            .get(file)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn importer_ids(&self, id: &str) -> Vec<String> {
        self.modules
            .get(id)
            .map(|n| n.importers.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn module_count(&self) -> usize {
        self.modules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_module_infos() {
        let infos = vec![
            ("/src/main.js", vec![]),
            ("/src/a.vue", vec!["/src/main.js"]),
            ("/src/a.vue?vue&type=style", vec!["/src/a.vue"]),
        ];
        let graph = BuildModuleGraph::from_module_infos(
            infos.iter().map(|(id, imp)| (*id, imp.iter().copied())),
        )
        .unwrap();

        assert_eq!(graph.len(), 3);
        let ids: Vec<_> = graph
            .get_modules_by_file("/src/a.vue")
            .into_iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["/src/a.vue", "/src/a.vue?vue&type=style"]);
        assert_eq!(graph.importer_ids("/src/a.vue"), vec!["/src/main.js".to_string()]);
        assert_eq!(graph.module_file("/src/a.vue?vue&type=style"), Some("/src/a.vue"));
    }

    #[test]
    fn test_unknown_importer_is_rejected() {
        let mut graph = BuildModuleGraph::new();
        graph.register_module("/a.js");
        let err = graph.add_importers("/a.js", ["/ghost.js"]).unwrap_err();
        assert_eq!(err, GraphError::UnknownModule("/ghost.js".to_string()));
        assert!(graph.add_importers("/missing.js", []).is_err());
    }

    #[test]
    fn test_register_is_append_only() {
        let mut graph = BuildModuleGraph::new();
        graph.register_module("/a.js");
        graph.register_module("/b.js");
        graph.add_importers("/a.js", ["/b.js"]).unwrap();
        let again = graph.register_module("/a.js");
        assert_eq!(again.importers.len(), 1);
        assert!(!graph.is_empty());
    }
}
