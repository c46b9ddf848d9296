//! Dev session context.
//!
//! One [`DevSession`] per dev server instance owns every component: config,
//! package cache, resolver, optional optimizer, the module graph, and the
//! HMR engine. It is constructed once and passed to whatever needs it.
//!
//! The graph has a single mutation point: a `Mutex` taken only to commit.
//! Loading a module reads, transforms, and resolves its imports without the
//! lock, so unrelated modules load concurrently; the edge commit is short.

use crate::config::ProjectConfig;
use crate::error::Error;
use crate::graph::{ModuleGraph, ModuleId};
use crate::hmr::{analyze_hot_accept, FileEvent, HmrEngine, HmrOutcome, HmrTransport};
use crate::imports::{scan_imports, ImportKind, ImportSpecCore};
use crate::optimizer::DepsOptimizer;
use crate::packages::PackageCache;
use crate::patterns::{is_css_request, is_html_type, is_js_type};
use crate::resolver::{Resolution, ResolveOptions, ResolveRequest, Resolver, SpecialModule};
use crate::scan::html::{extract_scripts, ScriptBlock};
use crate::transform::{Loader, PassthroughTransform, TransformEngine, TransformOutput};
use modgraph_util::fs::read_to_string_lossy;
use modgraph_util::path::{clean_url, is_in_node_modules, normalize_slashes};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Result of loading one module into the graph.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub module: ModuleId,
    /// Resolved ids of its imports, in source order.
    pub imports: Vec<String>,
}

pub struct DevSession {
    config: Arc<ProjectConfig>,
    root: PathBuf,
    packages: Arc<PackageCache>,
    resolver: Arc<Resolver>,
    optimizer: Option<Arc<DepsOptimizer>>,
    transformer: Arc<dyn TransformEngine>,
    graph: Mutex<ModuleGraph>,
    hmr: HmrEngine,
}

impl std::fmt::Debug for DevSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevSession")
            .field("root", &self.root)
            .field("transformer", &self.transformer.name())
            .field("optimized", &self.optimizer.is_some())
            .finish_non_exhaustive()
    }
}

impl DevSession {
    pub fn new(config: ProjectConfig, transport: Arc<dyn HmrTransport>) -> Result<Self, Error> {
        Self::with_optimizer(config, None, transport)
    }

    /// A session whose resolver redirects bare imports to `optimizer`'s
    /// pre-bundled files.
    pub fn with_optimizer(
        config: ProjectConfig,
        optimizer: Option<Arc<DepsOptimizer>>,
        transport: Arc<dyn HmrTransport>,
    ) -> Result<Self, Error> {
        let config = Arc::new(config);
        let root = dunce::canonicalize(&config.root).unwrap_or_else(|_| config.root.clone());
        let packages = Arc::new(PackageCache::new());
        let mut resolver = Resolver::new(ResolveOptions::from_config(&config), Arc::clone(&packages))?;
        if let Some(optimizer) = &optimizer {
            resolver = resolver.with_optimizer(Arc::clone(optimizer));
        }
        let hmr = HmrEngine::new(&root, Arc::clone(&packages), transport);
        Ok(Self {
            config,
            root,
            packages,
            resolver: Arc::new(resolver),
            optimizer,
            transformer: Arc::new(PassthroughTransform),
            graph: Mutex::new(ModuleGraph::new()),
            hmr,
        })
    }

    #[must_use]
    pub fn with_transformer(mut self, transformer: Arc<dyn TransformEngine>) -> Self {
        self.transformer = transformer;
        self
    }

    #[must_use]
    pub fn config(&self) -> &Arc<ProjectConfig> {
        &self.config
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    #[must_use]
    pub fn packages(&self) -> &Arc<PackageCache> {
        &self.packages
    }

    #[must_use]
    pub fn optimizer(&self) -> Option<&Arc<DepsOptimizer>> {
        self.optimizer.as_ref()
    }

    #[must_use]
    pub fn hmr(&self) -> &HmrEngine {
        &self.hmr
    }

    fn lock_graph(&self) -> MutexGuard<'_, ModuleGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read access to the graph.
    pub fn with_graph<R>(&self, f: impl FnOnce(&ModuleGraph) -> R) -> R {
        f(&self.lock_graph())
    }

    /// Absolute id for a path given relative to the project root.
    #[must_use]
    pub fn module_id_for(&self, path: &Path) -> String {
        let path = self.root.join(path);
        let path = dunce::canonicalize(&path).unwrap_or(path);
        normalize_slashes(&path)
    }

    /// Load `id`: read or stub its source, transform it, resolve its imports
    /// and accepted deps, then commit node, edges, and transform result.
    ///
    /// Loading an optional peer dependency placeholder fails here, not at
    /// resolve time.
    pub fn load_module(&self, id: &str) -> Result<LoadedModule, Error> {
        let special = SpecialModule::decode(id);
        if let Some(err) = special.as_ref().and_then(SpecialModule::deferred_error) {
            if !self.config.is_production() {
                return Err(err.into());
            }
        }

        let (output, imports) = match &special {
            Some(special) => {
                let code = special
                    .load(self.config.is_production(), self.config.is_build())
                    .unwrap_or_default();
                (TransformOutput::new(code), Vec::new())
            }
            None => self.analyze(id)?,
        };

        let is_css = special.is_none() && is_css_request(id);
        let accept = analyze_hot_accept(&output.code);

        let mut imported_ids = Vec::with_capacity(imports.len());
        for import in &imports {
            if let Some(resolved) = self.resolve_import(&import.raw, id, import.kind)? {
                if !imported_ids.contains(&resolved) {
                    imported_ids.push(resolved);
                }
            }
        }
        let mut accepted_ids = Vec::new();
        for dep in &accept.accepted_deps {
            if let Some(resolved) = self.resolve_import(dep, id, ImportKind::Import)? {
                accepted_ids.push(resolved);
            }
        }

        let (module, pruned) = {
            let mut graph = self.lock_graph();
            let module = graph.ensure_module(id);
            let imported: Vec<ModuleId> = imported_ids.iter().map(|i| graph.ensure_module(i)).collect();
            let accepted: Vec<ModuleId> = accepted_ids.iter().map(|i| graph.ensure_module(i)).collect();
            let pruned = graph.update_module_info(
                module,
                &imported,
                &accepted,
                accept.accepted_exports,
                accept.is_self_accepting || is_css,
            )?;
            graph.set_transform_result(module, output)?;
            let pruned: Vec<String> = pruned
                .into_iter()
                .filter_map(|m| graph.get(m).map(|n| n.id().to_string()))
                .collect();
            (module, pruned)
        };

        self.hmr.send_prune(&pruned);
        debug!(id = %id, imports = imported_ids.len(), "loaded module");
        Ok(LoadedModule {
            module,
            imports: imported_ids,
        })
    }

    /// Source and import specifiers of a file-backed module.
    fn analyze(&self, id: &str) -> Result<(TransformOutput, Vec<ImportSpecCore>), Error> {
        let file = clean_url(id);
        let source = read_to_string_lossy(Path::new(file)).map_err(|source| Error::Load {
            id: id.to_string(),
            source,
        })?;

        if is_css_request(file) {
            return Ok((TransformOutput::new(source), Vec::new()));
        }
        if is_html_type(file) {
            let mut imports = Vec::new();
            for block in extract_scripts(file, &source) {
                match block {
                    ScriptBlock::Src(src) => imports.push(ImportSpecCore::new(src, ImportKind::Import, None)),
                    ScriptBlock::Inline { content, .. } => imports.extend(scan_imports(&content)),
                }
            }
            // Pages never accept updates; they reload.
            return Ok((TransformOutput::new(""), imports));
        }

        let loader = Loader::from_id(file).unwrap_or(Loader::Js);
        let output = if loader == Loader::Js {
            TransformOutput::new(source)
        } else {
            self.transformer.transform(id, &source, loader)
        };
        if !output.is_ok() {
            return Err(Error::Transform {
                id: id.to_string(),
                errors: output.errors,
            });
        }
        let imports = scan_imports(&output.code);
        Ok((output, imports))
    }

    /// Resolve an import for the graph. External and unresolvable imports
    /// get no node.
    fn resolve_import(&self, specifier: &str, importer: &str, kind: ImportKind) -> Result<Option<String>, Error> {
        let request = ResolveRequest::new(specifier).importer(importer).kind(kind);
        match self.resolver.resolve(&request)? {
            Resolution::Resolved { id, .. } => Ok(Some(id)),
            Resolution::Special(special) => Ok(Some(special.encode())),
            Resolution::External { .. } => Ok(None),
            Resolution::NotFound => {
                warn!(specifier = %specifier, importer = %importer, "failed to resolve import");
                Ok(None)
            }
        }
    }

    /// Resolve one specifier as the dev server would.
    pub fn resolve(&self, specifier: &str, importer: Option<&str>) -> Result<Resolution, Error> {
        let mut request = ResolveRequest::new(specifier);
        if let Some(importer) = importer {
            request = request.importer(importer);
        }
        Ok(self.resolver.resolve(&request)?)
    }

    /// Load `entry` (relative to the root) and every project source it
    /// reaches. Dependencies in `node_modules` get nodes but are not
    /// loaded. Returns the number of modules loaded.
    pub fn crawl(&self, entry: &Path) -> Result<usize, Error> {
        let id = self.module_id_for(entry);
        self.crawl_from(vec![id])
    }

    /// Reload the modules of a changed file and anything new they import.
    pub fn reload_file(&self, path: &Path) -> Result<usize, Error> {
        let file = self.module_id_for(path);
        let ids = self.with_graph(|graph| {
            graph
                .get_modules_by_file(&file)
                .into_iter()
                .filter_map(|m| graph.get(m).map(|n| n.id().to_string()))
                .filter(|id| should_load(id))
                .collect::<Vec<_>>()
        });
        self.crawl_from(ids)
    }

    fn crawl_from(&self, start: Vec<String>) -> Result<usize, Error> {
        let mut seen: HashSet<String> = start.iter().cloned().collect();
        let mut queue: VecDeque<String> = start.into();
        let mut loaded = 0;
        while let Some(id) = queue.pop_front() {
            let module = self.load_module(&id)?;
            loaded += 1;
            for next in module.imports {
                if should_load(&next) && !self.is_fresh(&next) && seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        Ok(loaded)
    }

    fn is_fresh(&self, id: &str) -> bool {
        self.with_graph(|graph| {
            graph
                .get_module_by_id(id)
                .is_some_and(|n| n.transform_result().is_some())
        })
    }

    /// Feed a watcher event to the HMR engine.
    pub fn handle_file_event(&self, event: &FileEvent) -> HmrOutcome {
        let mut graph = self.lock_graph();
        self.hmr.handle_file_event(&mut graph, event)
    }

    /// A client could not apply an update to `id`.
    pub fn handle_invalidate(&self, id: &str) -> HmrOutcome {
        let mut graph = self.lock_graph();
        self.hmr.handle_invalidate(&mut graph, id)
    }

    /// Mark every module dirty, e.g. after a config change.
    pub fn invalidate_all(&self) {
        self.lock_graph().invalidate_all(crate::hmr::now_ms());
    }
}

/// Project sources worth loading: existing JS, HTML, or CSS files outside
/// `node_modules`. Placeholder ids are leaves.
fn should_load(id: &str) -> bool {
    if id.contains('\0') || SpecialModule::decode(id).is_some() || is_in_node_modules(id) {
        return false;
    }
    let file = clean_url(id);
    (is_js_type(file) || is_html_type(file) || is_css_request(file)) && Path::new(file).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmr::{HmrPayload, NoopTransport};
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_crawl_builds_graph() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "index.html", r#"<script type="module" src="/src/main.js"></script>"#);
        write(root, "src/main.js", "import './App.js'\nimport './style.css'\nimport 'react'\n");
        write(root, "src/App.js", "export default 1\nimport.meta.hot.accept()\n");
        write(root, "src/style.css", "body {}");
        write(root, "node_modules/react/package.json", r#"{"name":"react","main":"index.js"}"#);
        write(root, "node_modules/react/index.js", "require('./cjs')");

        let session = DevSession::new(ProjectConfig::new(root), Arc::new(NoopTransport)).unwrap();
        let loaded = session.crawl(Path::new("index.html")).unwrap();
        assert_eq!(loaded, 4);

        let app = session.module_id_for(Path::new("src/App.js"));
        session.with_graph(|graph| {
            graph.check_consistency().unwrap();
            let node = graph.get_module_by_id(&app).unwrap();
            assert_eq!(node.is_self_accepting(), Some(true));
            // react is a node but was not loaded.
            let react = graph
                .iter()
                .find(|(_, n)| n.id().contains("node_modules/react"))
                .map(|(_, n)| n);
            assert!(react.is_some_and(|n| n.is_self_accepting().is_none()));
        });
    }

    #[test]
    fn test_reanalysis_prunes_dropped_imports() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "main.js", "import './a.js'\n");
        write(root, "a.js", "export const a = 1\n");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<HmrPayload>();
        let session = DevSession::new(ProjectConfig::new(root), Arc::new(tx)).unwrap();
        session.crawl(Path::new("main.js")).unwrap();

        write(root, "main.js", "export {}\n");
        session.reload_file(Path::new("main.js")).unwrap();
        let a = session.module_id_for(Path::new("a.js"));
        match rx.try_recv().unwrap() {
            HmrPayload::Prune { paths } => assert_eq!(paths, vec!["/a.js".to_string()]),
            other => panic!("unexpected payload {other:?}"),
        }
        session.with_graph(|graph| {
            assert!(graph.get_module_by_id(&a).unwrap().importers().is_empty());
        });
    }

    #[test]
    fn test_optional_peer_dep_fails_on_load() {
        let dir = tempdir().unwrap();
        let session = DevSession::new(ProjectConfig::new(dir.path()), Arc::new(NoopTransport)).unwrap();
        let id = SpecialModule::OptionalPeerDep {
            specifier: "peer".to_string(),
            parent: "lib".to_string(),
        }
        .encode();
        let err = session.load_module(&id).unwrap_err();
        assert!(err.to_string().contains("Is it installed?"), "{err}");
    }
}
