//! Dependency scanner.
//!
//! Crawls the project from its entries with the resolver in scan mode and
//! records every bare import that resolves into `node_modules` (or is force
//! included) and can be pre-bundled. Those imports are treated as external,
//! so the crawl never descends into dependency internals.
//!
//! The published map is a `BTreeMap`, so it is sorted by specifier no matter
//! which order the crawl visited modules in. [`ScanResult::hash`] depends on
//! that order.

mod crawl;
pub mod html;

use crate::config::ProjectConfig;
use crate::resolver::{ResolveError, Resolver};
use crate::transform::{PassthroughTransform, TransformEngine};
use crate::patterns::is_scannable;
use modgraph_util::path::{normalize_slashes, posix_normalize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that abort a scan.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to resolve \"{specifier}\" imported by \"{importer}\": {source}")]
    Resolve {
        specifier: String,
        importer: String,
        #[source]
        source: ResolveError,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transform failed for {id}:\n{}", .errors.join("\n"))]
    Transform { id: String, errors: Vec<String> },

    #[error("Invalid entry pattern {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Invalid scan input: {0}")]
    InvalidInput(String),

    #[error("Failed to scan for dependencies from entries:\n{}\n\n{source}", .entries.join("\n"))]
    Failed {
        entries: Vec<String>,
        source: Box<ScanError>,
    },
}

/// Outcome of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Bare specifier to resolved entry file, sorted by specifier.
    pub deps: BTreeMap<String, String>,
    /// Unresolvable bare specifier to the first importer that used it.
    pub missing: BTreeMap<String, String>,
}

impl ScanResult {
    /// Stable identity of the dependency set.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut buf = String::new();
        for (id, file) in &self.deps {
            buf.push_str(id);
            buf.push('\0');
            buf.push_str(file);
            buf.push('\n');
        }
        modgraph_util::hash::blake3_bytes(buf.as_bytes())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty() && self.missing.is_empty()
    }
}

/// Cooperative cancellation for a running scan.
#[derive(Debug, Clone)]
pub struct ScanHandle {
    cancelled: Arc<AtomicBool>,
}

impl ScanHandle {
    /// Stop the crawl at its next checkpoint. The scan then returns an empty
    /// result instead of an error.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct DependencyScanner {
    config: Arc<ProjectConfig>,
    resolver: Arc<Resolver>,
    transformer: Arc<dyn TransformEngine>,
    root: PathBuf,
    cancelled: Arc<AtomicBool>,
}

impl std::fmt::Debug for DependencyScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyScanner")
            .field("root", &self.root)
            .field("transformer", &self.transformer.name())
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}

impl DependencyScanner {
    /// A scanner using `resolver` in scan mode and the passthrough transform.
    #[must_use]
    pub fn new(config: Arc<ProjectConfig>, resolver: Arc<Resolver>) -> Self {
        let root = dunce::canonicalize(&config.root).unwrap_or_else(|_| config.root.clone());
        Self {
            config,
            resolver,
            transformer: Arc::new(PassthroughTransform),
            root,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn with_transformer(mut self, transformer: Arc<dyn TransformEngine>) -> Self {
        self.transformer = transformer;
        self
    }

    /// Handle for cancelling this scanner's scans from another thread.
    #[must_use]
    pub fn handle(&self) -> ScanHandle {
        ScanHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Entry files: explicit entry globs, else build input, else every
    /// `**/*.html`. Only existing scannable files are kept.
    pub fn compute_entries(&self) -> Result<Vec<String>, ScanError> {
        if !self.root.is_dir() {
            return Err(ScanError::InvalidInput(format!(
                "project root {} is not a directory",
                self.root.display()
            )));
        }
        let optimize = &self.config.optimize_deps;
        let entries = if let Some(patterns) = &optimize.entries {
            self.glob_entries(patterns)?
        } else if let Some(input) = &self.config.build.input {
            input.paths().into_iter().map(|p| self.resolve_path(p)).collect()
        } else {
            self.glob_entries(&["**/*.html".to_string()])?
        };

        Ok(entries
            .into_iter()
            .filter(|entry| is_scannable(entry, &optimize.extensions) && Path::new(entry).exists())
            .collect())
    }

    /// Compute entries and crawl them.
    pub fn scan(&self) -> Result<ScanResult, ScanError> {
        let start = Instant::now();
        let entries = self.compute_entries()?;

        if entries.is_empty() {
            let optimize = &self.config.optimize_deps;
            if optimize.entries.is_none() && optimize.include.is_empty() {
                warn!(
                    "(!) Could not auto-determine entry point from build input or html files \
                     and there are no explicit optimizeDeps.include patterns. \
                     Skipping dependency pre-bundling."
                );
            }
            return Ok(ScanResult::default());
        }
        if self.is_cancelled() {
            return Ok(ScanResult::default());
        }

        debug!(entries = ?entries, "crawling dependencies");
        let result = self.scan_entries(&entries).map_err(|e| ScanError::Failed {
            entries: entries.clone(),
            source: Box::new(e),
        })?;
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            deps = result.deps.len(),
            "scan completed"
        );
        Ok(result)
    }

    /// Crawl from the given entry files (absolute forward-slash ids).
    pub fn scan_entries(&self, entries: &[String]) -> Result<ScanResult, ScanError> {
        let result = crawl::Crawl::new(self, entries).run()?;
        if self.is_cancelled() {
            debug!("scan cancelled");
            return Ok(ScanResult::default());
        }

        if !result.missing.is_empty() {
            let list: Vec<String> = result
                .missing
                .iter()
                .map(|(id, importer)| format!("  {id} (imported by {importer})"))
                .collect();
            warn!(
                "The following dependencies are imported but could not be resolved:\n\n{}\n\nAre they installed?",
                list.join("\n")
            );
        }
        Ok(result)
    }

    fn resolve_path(&self, p: &str) -> String {
        let path = self.root.join(p);
        let path = dunce::canonicalize(&path).unwrap_or(path);
        posix_normalize(&normalize_slashes(&path))
    }

    fn glob_entries(&self, patterns: &[String]) -> Result<Vec<String>, ScanError> {
        let is_dynamic = |p: &str| p.contains(['*', '?', '[', '{']) || p.starts_with('!');
        if !patterns.iter().any(|p| is_dynamic(p)) {
            return Ok(patterns.iter().map(|p| self.resolve_path(p)).collect());
        }

        let compile = |p: &str| {
            glob::Pattern::new(p).map_err(|source| ScanError::Glob {
                pattern: p.to_string(),
                source,
            })
        };
        let mut include = Vec::new();
        let mut ignore = Vec::new();
        for pattern in patterns {
            match pattern.strip_prefix('!') {
                Some(negated) => ignore.push(compile(negated)?),
                None => include.push(compile(pattern.trim_start_matches("./"))?),
            }
        }

        let out_dir = self.config.build.out_dir.trim_matches('/');
        let skip_common = self.config.optimize_deps.entries.is_none();
        let root = &self.root;
        let files = modgraph_util::fs::walk_files(root, |dir| {
            let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name == "node_modules" || (skip_common && (name == "__tests__" || name == "coverage")) {
                return true;
            }
            let rel = normalize_slashes(dir.strip_prefix(root).unwrap_or(dir));
            !out_dir.is_empty() && (rel == out_dir || rel.ends_with(&format!("/{out_dir}")))
        });

        let options = glob::MatchOptions {
            require_literal_separator: true,
            ..glob::MatchOptions::default()
        };
        Ok(files
            .into_iter()
            .filter_map(|file| {
                let rel = normalize_slashes(file.strip_prefix(root).ok()?);
                let included = include.iter().any(|p| p.matches_with(&rel, options));
                let ignored = ignore.iter().any(|p| p.matches_with(&rel, options));
                (included && !ignored).then(|| normalize_slashes(&file))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests;
