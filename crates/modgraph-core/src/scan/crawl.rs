//! Wave-parallel crawl behind [`DependencyScanner`](super::DependencyScanner).
//!
//! Each wave visits the current frontier in parallel on the rayon pool.
//! Results are merged in frontier order, which keeps the first-recorded
//! entry for a specifier deterministic. Resolution goes through one
//! single-flight memo per crawl, so concurrent workers asking for the same
//! `(specifier, importer dir)` share a single filesystem probe.

use super::html::{extract_import_paths, extract_scripts, ScriptBlock};
use super::{DependencyScanner, ScanError, ScanResult};
use crate::config::module_list_contains;
use crate::imports::{scan_imports, ImportKind};
use crate::patterns::{
    is_css_request, is_data_url, is_external_url, is_html_type, is_js_type, is_json_or_wasm,
    is_known_asset, is_optimizable, is_scanner_bare_import, is_scannable, is_special_query,
    is_virtual_id,
};
use crate::resolver::{ResolveMemo, ResolveRequest};
use crate::transform::Loader;
use modgraph_util::fs::read_to_string_lossy;
use modgraph_util::path::{clean_url, is_in_node_modules};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

/// A unit of crawl work.
#[derive(Debug, Clone)]
enum Unit {
    /// A file on disk, by absolute id.
    File(String),
    /// Script block extracted from an HTML-like container.
    Script {
        id: String,
        content: String,
        loader: Loader,
    },
}

/// What one visit found.
#[derive(Debug, Default)]
struct Visit {
    next: Vec<Unit>,
    deps: Vec<(String, String)>,
    missing: Vec<(String, String)>,
}

pub(super) struct Crawl<'a> {
    scanner: &'a DependencyScanner,
    entries: &'a [String],
    memo: ResolveMemo,
    exclude: Vec<String>,
    /// Dependencies committed by earlier waves.
    deps: RwLock<BTreeMap<String, String>>,
}

impl<'a> Crawl<'a> {
    pub(super) fn new(scanner: &'a DependencyScanner, entries: &'a [String]) -> Self {
        Self {
            scanner,
            entries,
            memo: ResolveMemo::new(),
            exclude: scanner.config.optimize_deps.exclude.clone(),
            deps: RwLock::new(BTreeMap::new()),
        }
    }

    pub(super) fn run(self) -> Result<ScanResult, ScanError> {
        let mut seen: HashSet<String> = self.entries.iter().cloned().collect();
        let mut frontier: Vec<Unit> = self.entries.iter().cloned().map(Unit::File).collect();
        let mut missing = BTreeMap::new();

        while !frontier.is_empty() {
            if self.scanner.is_cancelled() {
                return Ok(ScanResult::default());
            }

            let visits: Vec<Visit> = frontier
                .par_iter()
                .map(|unit| self.visit(unit))
                .collect::<Result<_, _>>()?;

            let mut next = Vec::new();
            {
                let mut deps = self.deps.write().unwrap_or_else(PoisonError::into_inner);
                for visit in visits {
                    for (id, file) in visit.deps {
                        deps.entry(id).or_insert(file);
                    }
                    for (id, importer) in visit.missing {
                        missing.entry(id).or_insert(importer);
                    }
                    for unit in visit.next {
                        if let Unit::File(id) = &unit {
                            if !seen.insert(id.clone()) {
                                continue;
                            }
                        }
                        next.push(unit);
                    }
                }
            }
            frontier = next;
        }

        let deps = self.deps.into_inner().unwrap_or_else(PoisonError::into_inner);
        Ok(ScanResult { deps, missing })
    }

    fn visit(&self, unit: &Unit) -> Result<Visit, ScanError> {
        let mut visit = Visit::default();
        if self.scanner.is_cancelled() {
            return Ok(visit);
        }

        match unit {
            Unit::File(id) if is_html_type(id) => {
                let raw = read_source(id)?;
                for block in extract_scripts(id, &raw) {
                    match block {
                        ScriptBlock::Src(src) => {
                            if let Some(next) = self.resolve_import(&src, id, ImportKind::Import, false, &mut visit)? {
                                visit.next.push(Unit::File(next));
                            }
                        }
                        ScriptBlock::Inline { id, mut content, loader, .. } => {
                            if matches!(loader, Loader::Ts | Loader::Tsx) {
                                content.push_str(&extract_import_paths(&content));
                            }
                            visit.next.push(Unit::Script { id, content, loader });
                        }
                    }
                }
            }
            Unit::File(id) if is_js_type(id) => {
                let loader = Loader::from_id(id).unwrap_or(Loader::Js);
                let source = read_source(id)?;
                let code = self.transform(id, &source, loader)?;
                self.crawl_imports(id, &code, false, &mut visit)?;
            }
            Unit::File(_) => {}
            Unit::Script { id, content, loader } => {
                let code = self.transform(id, content, *loader)?;
                let ts = matches!(loader, Loader::Ts | Loader::Tsx);
                self.crawl_imports(id, &code, ts, &mut visit)?;
            }
        }
        Ok(visit)
    }

    fn crawl_imports(&self, importer: &str, code: &str, ts: bool, visit: &mut Visit) -> Result<(), ScanError> {
        for import in scan_imports(code) {
            if let Some(next) = self.resolve_import(&import.raw, importer, import.kind, ts, visit)? {
                visit.next.push(Unit::File(next));
            }
        }
        Ok(())
    }

    fn transform(&self, id: &str, source: &str, loader: Loader) -> Result<String, ScanError> {
        if loader == Loader::Js {
            return Ok(source.to_string());
        }
        let output = self.scanner.transformer.transform(id, source, loader);
        if !output.is_ok() {
            return Err(ScanError::Transform {
                id: id.to_string(),
                errors: output.errors,
            });
        }
        Ok(output.code)
    }

    /// Decide what an import leads to. Returns the next file to crawl, or
    /// `None` when the import is external or a leaf.
    fn resolve_import(
        &self,
        specifier: &str,
        importer: &str,
        kind: ImportKind,
        ts: bool,
        visit: &mut Visit,
    ) -> Result<Option<String>, ScanError> {
        if is_external_url(specifier) || is_data_url(specifier) || is_virtual_id(specifier) {
            return Ok(None);
        }
        let extensions = &self.scanner.config.optimize_deps.extensions;

        if is_html_type(specifier) {
            let Some(resolved) = self.resolve(specifier, importer, kind, ts)? else {
                return Ok(None);
            };
            // Optimizable containers in node_modules are left to pre-bundling.
            if is_in_node_modules(&resolved) && is_optimizable(&resolved, extensions) {
                return Ok(None);
            }
            return Ok(Some(clean_url(&resolved).to_string()));
        }

        if is_scanner_bare_import(specifier) {
            let known = self
                .deps
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(specifier);
            if known || module_list_contains(&self.exclude, specifier) {
                return Ok(self.external_unless_entry(specifier));
            }

            let Some(resolved) = self.resolve(specifier, importer, kind, ts)? else {
                visit
                    .missing
                    .push((specifier.to_string(), clean_url(importer).to_string()));
                return Ok(None);
            };
            if should_externalize_dep(&resolved, specifier) {
                return Ok(self.external_unless_entry(specifier));
            }
            let included = self
                .scanner
                .config
                .optimize_deps
                .include
                .iter()
                .any(|i| i == specifier);
            if is_in_node_modules(&resolved) || included {
                // Dependency: record it and stop crawling here.
                if is_optimizable(&resolved, extensions) {
                    visit.deps.push((specifier.to_string(), resolved));
                }
                return Ok(self.external_unless_entry(specifier));
            }
            if is_scannable(&resolved, extensions) {
                // Linked package: keep crawling its source.
                return Ok(Some(clean_url(&resolved).to_string()));
            }
            return Ok(self.external_unless_entry(specifier));
        }

        if is_css_request(specifier)
            || is_json_or_wasm(specifier)
            || is_known_asset(specifier)
            || is_special_query(specifier)
        {
            return Ok(self.external_unless_entry(specifier));
        }

        match self.resolve(specifier, importer, kind, ts)? {
            Some(resolved)
                if !should_externalize_dep(&resolved, specifier)
                    && is_scannable(&resolved, extensions) =>
            {
                Ok(Some(clean_url(&resolved).to_string()))
            }
            _ => Ok(self.external_unless_entry(specifier)),
        }
    }

    fn resolve(
        &self,
        specifier: &str,
        importer: &str,
        kind: ImportKind,
        ts: bool,
    ) -> Result<Option<String>, ScanError> {
        let request = ResolveRequest::new(specifier)
            .importer(importer)
            .kind(kind)
            .scan(true)
            .ts_importer(ts);
        self.scanner
            .resolver
            .resolve_cached(&self.memo, &request)
            .map(|resolution| resolution.id())
            .map_err(|source| ScanError::Resolve {
                specifier: specifier.to_string(),
                importer: clean_url(importer).to_string(),
                source,
            })
    }

    /// Entries are crawled even when reached through an import.
    fn external_unless_entry(&self, id: &str) -> Option<String> {
        self.entries.iter().any(|e| e == id).then(|| id.to_string())
    }
}

fn read_source(id: &str) -> Result<String, ScanError> {
    let path = Path::new(clean_url(id));
    read_to_string_lossy(path).map_err(|source| ScanError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolved ids that are not real files stay external.
fn should_externalize_dep(resolved: &str, raw: &str) -> bool {
    let absolute = resolved.starts_with('/') || {
        let b = resolved.as_bytes();
        b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && b[2] == b'/'
    };
    !absolute || resolved == raw || resolved.contains('\0')
}
