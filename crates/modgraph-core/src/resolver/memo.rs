//! Single-flight resolution memo for one scan or build pass.
//!
//! Concurrent callers with the same key share one computation: the first
//! caller runs the resolution, later callers block on the same cell and
//! observe the identical result. The map lock is only held to find or
//! insert a cell, never during filesystem work.

use super::{Resolution, ResolveError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

type Cell = Arc<OnceLock<Result<Resolution, Arc<ResolveError>>>>;

#[derive(Debug, Default)]
struct Entries {
    epoch: u64,
    cells: HashMap<String, Cell>,
}

#[derive(Debug, Default)]
pub struct ResolveMemo {
    entries: Mutex<Entries>,
}

impl ResolveMemo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized result for `key`, computing it with `resolve` on
    /// first use. A changed package-cache `epoch` drops every entry first.
    pub fn get_or_resolve(
        &self,
        epoch: u64,
        key: String,
        resolve: impl FnOnce() -> Result<Resolution, ResolveError>,
    ) -> Result<Resolution, ResolveError> {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.epoch != epoch {
                entries.cells.clear();
                entries.epoch = epoch;
            }
            Arc::clone(entries.cells.entry(key).or_default())
        };

        cell.get_or_init(|| resolve().map_err(Arc::new))
            .clone()
            .map_err(ResolveError::Shared)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cells
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
