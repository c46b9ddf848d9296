//! Module graphs.
//!
//! [`ModuleGraph`] is the live dev-session graph: full node metadata,
//! mutable, cycle tolerant. [`BuildModuleGraph`] is the summary left after a
//! build, restricted to identity and importer lookups. Code that only needs
//! those lookups takes a [`ModuleLookup`] and works with either.

mod build;
mod live;
mod node;

pub use build::{BuildModuleGraph, BuildModuleNode};
pub use live::ModuleGraph;
pub use node::{ModuleId, ModuleNode, ModuleState};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Unknown module {0}")]
    UnknownModule(String),

    #[error("Module graph is inconsistent: {0}")]
    Inconsistent(String),
}

/// Lookups shared by the live and build-summary graphs.
pub trait ModuleLookup {
    fn contains_module(&self, id: &str) -> bool;

    /// File backing `id`, without query or hash.
    fn module_file(&self, id: &str) -> Option<&str>;

    fn module_ids_by_file(&self, file: &str) -> Vec<String>;

    /// Ids of the modules importing `id`, sorted.
    fn importer_ids(&self, id: &str) -> Vec<String>;

    fn module_count(&self) -> usize;
}
