use crate::transform::TransformOutput;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Handle of a node in a [`ModuleGraph`](super::ModuleGraph) arena.
///
/// Handles are never reused within one graph: a removed module's handle
/// stays dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub(crate) usize);

impl ModuleId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a module's cached transform is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Fresh,
    Dirty,
}

/// A module in the live graph.
///
/// Edges are handle sets. `importers` and `imported_modules` are kept
/// mutually consistent by the graph; nodes never own each other.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub(crate) id: String,
    pub(crate) file: String,
    pub(crate) importers: BTreeSet<ModuleId>,
    pub(crate) imported_modules: BTreeSet<ModuleId>,
    pub(crate) accepted_hmr_deps: BTreeSet<ModuleId>,
    pub(crate) accepted_hmr_exports: Option<BTreeSet<String>>,
    /// `None` until the module has been analyzed once.
    pub(crate) is_self_accepting: Option<bool>,
    pub(crate) transform_result: Option<TransformOutput>,
    pub(crate) last_hmr_timestamp: u64,
    pub(crate) last_invalidation_timestamp: u64,
}

impl ModuleNode {
    pub(crate) fn new(id: String, file: String) -> Self {
        Self {
            id,
            file,
            importers: BTreeSet::new(),
            imported_modules: BTreeSet::new(),
            accepted_hmr_deps: BTreeSet::new(),
            accepted_hmr_exports: None,
            is_self_accepting: None,
            transform_result: None,
            last_hmr_timestamp: 0,
            last_invalidation_timestamp: 0,
        }
    }

    /// Resolved id, unique within the graph.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// File on disk. Several ids can share one file (query variants).
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    #[must_use]
    pub fn importers(&self) -> &BTreeSet<ModuleId> {
        &self.importers
    }

    #[must_use]
    pub fn imported_modules(&self) -> &BTreeSet<ModuleId> {
        &self.imported_modules
    }

    #[must_use]
    pub fn accepted_hmr_deps(&self) -> &BTreeSet<ModuleId> {
        &self.accepted_hmr_deps
    }

    #[must_use]
    pub fn accepted_hmr_exports(&self) -> Option<&BTreeSet<String>> {
        self.accepted_hmr_exports.as_ref()
    }

    #[must_use]
    pub fn is_self_accepting(&self) -> Option<bool> {
        self.is_self_accepting
    }

    #[must_use]
    pub fn transform_result(&self) -> Option<&TransformOutput> {
        self.transform_result.as_ref()
    }

    #[must_use]
    pub fn last_hmr_timestamp(&self) -> u64 {
        self.last_hmr_timestamp
    }

    #[must_use]
    pub fn last_invalidation_timestamp(&self) -> u64 {
        self.last_invalidation_timestamp
    }

    #[must_use]
    pub fn state(&self) -> ModuleState {
        if self.transform_result.is_some() {
            ModuleState::Fresh
        } else {
            ModuleState::Dirty
        }
    }
}
