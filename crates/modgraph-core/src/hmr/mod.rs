//! HMR invalidation engine.
//!
//! Turns watcher events into client instructions: map the changed file to
//! its graph modules, find the accept boundaries above them, and emit an
//! update for those boundaries, or a full reload when some importer chain
//! ends without one. Graph access is passed in per call; the engine owns no
//! module state.

pub mod accept;
mod payload;
mod propagate;

pub use accept::{analyze_hot_accept, HotAccept};
pub use payload::{HmrPayload, HmrUpdate, UpdateKind};
pub use propagate::{propagate_update, Boundary};

use crate::graph::{GraphError, ModuleGraph, ModuleId};
use crate::packages::PackageCache;
use crate::patterns::{is_css_request, is_html_file, FS_PREFIX};
use modgraph_util::path::normalize_slashes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Add,
    Change,
    Unlink,
}

/// A filesystem watcher notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

impl FileEvent {
    #[must_use]
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    #[must_use]
    pub fn change(path: impl Into<PathBuf>) -> Self {
        Self::new(FileEventKind::Change, path)
    }

    #[must_use]
    pub fn unlink(path: impl Into<PathBuf>) -> Self {
        Self::new(FileEventKind::Unlink, path)
    }
}

/// What a change means for connected clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HmrOutcome {
    /// Re-import these boundaries.
    Update(Vec<HmrUpdate>),
    /// Reload the page.
    FullReload {
        path: Option<String>,
        triggered_by: String,
    },
    /// Nothing the client has loaded is affected.
    NoUpdate,
}

impl HmrOutcome {
    #[must_use]
    pub fn into_payload(self) -> Option<HmrPayload> {
        match self {
            Self::Update(updates) => Some(HmrPayload::Update { updates }),
            Self::FullReload { path, triggered_by } => Some(HmrPayload::FullReload {
                path,
                triggered_by: Some(triggered_by),
            }),
            Self::NoUpdate => None,
        }
    }

    #[must_use]
    pub fn is_full_reload(&self) -> bool {
        matches!(self, Self::FullReload { .. })
    }
}

/// Delivery of payloads to clients. The wire format is the transport's
/// business.
pub trait HmrTransport: Send + Sync {
    fn send(&self, payload: HmrPayload);
}

impl HmrTransport for UnboundedSender<HmrPayload> {
    fn send(&self, payload: HmrPayload) {
        if UnboundedSender::send(self, payload).is_err() {
            debug!("HMR channel closed, dropping payload");
        }
    }
}

/// Drops every payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

impl HmrTransport for NoopTransport {
    fn send(&self, _payload: HmrPayload) {}
}

pub struct HmrEngine {
    root: String,
    packages: Arc<PackageCache>,
    transport: Arc<dyn HmrTransport>,
}

impl std::fmt::Debug for HmrEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmrEngine")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl HmrEngine {
    #[must_use]
    pub fn new(root: &Path, packages: Arc<PackageCache>, transport: Arc<dyn HmrTransport>) -> Self {
        let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        Self {
            root: normalize_slashes(&root).trim_end_matches('/').to_string(),
            packages,
            transport,
        }
    }

    /// Process one watcher event and deliver the resulting payload.
    ///
    /// Repeating an event is harmless: a second change recomputes the same
    /// boundaries, a second unlink finds nothing left to remove.
    pub fn handle_file_event(&self, graph: &mut ModuleGraph, event: &FileEvent) -> HmrOutcome {
        let file = event_file(&event.path);
        if file.ends_with("/package.json") {
            self.packages.clear();
            debug!(file = %file, epoch = self.packages.epoch(), "package.json changed, cleared package cache");
        }

        let modules = graph.get_modules_by_file(&file);
        let timestamp = now_ms();
        let outcome = match event.kind {
            FileEventKind::Change if modules.is_empty() => {
                if is_html_file(&file) {
                    let short = self.to_url(&file);
                    HmrOutcome::FullReload {
                        path: Some(short.clone()),
                        triggered_by: short,
                    }
                } else {
                    debug!(file = %file, "change to file outside the module graph ignored");
                    HmrOutcome::NoUpdate
                }
            }
            FileEventKind::Unlink => {
                let outcome = if modules.is_empty() {
                    HmrOutcome::NoUpdate
                } else {
                    self.update_modules(graph, &file, &modules, timestamp)
                };
                let removed = graph.on_file_delete(&file);
                debug!(file = %file, removed = removed.len(), "file deleted");
                outcome
            }
            _ if modules.is_empty() => HmrOutcome::NoUpdate,
            _ => self.update_modules(graph, &file, &modules, timestamp),
        };

        self.dispatch(&outcome);
        outcome
    }

    /// A client reported that `id` could not apply its update (a dead end
    /// on the client side). The update moves up to its importers; with no
    /// importers left, the page reloads.
    pub fn handle_invalidate(&self, graph: &mut ModuleGraph, id: &str) -> HmrOutcome {
        let outcome = match graph.get_module_by_id(id) {
            Some(node) if !node.importers().is_empty() => {
                let importers: Vec<ModuleId> = node.importers().iter().copied().collect();
                let file = node.file().to_string();
                let timestamp = match node.last_hmr_timestamp() {
                    0 => now_ms(),
                    t => t,
                };
                self.update_modules(graph, &file, &importers, timestamp)
            }
            _ => HmrOutcome::FullReload {
                path: None,
                triggered_by: self.to_url(id),
            },
        };
        self.dispatch(&outcome);
        outcome
    }

    /// Compute the outcome for `modules` changing, invalidating them.
    ///
    /// Propagation errors cannot surface to the user; they degrade to a
    /// full reload.
    pub fn update_modules(
        &self,
        graph: &mut ModuleGraph,
        file: &str,
        modules: &[ModuleId],
        timestamp: u64,
    ) -> HmrOutcome {
        match self.try_update_modules(graph, file, modules, timestamp) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(file = %file, error = %err, "HMR propagation failed, reloading page");
                HmrOutcome::FullReload {
                    path: None,
                    triggered_by: self.to_url(file),
                }
            }
        }
    }

    fn try_update_modules(
        &self,
        graph: &mut ModuleGraph,
        file: &str,
        modules: &[ModuleId],
        timestamp: u64,
    ) -> Result<HmrOutcome, GraphError> {
        let mut traversed = HashSet::new();
        let mut invalidated = HashSet::new();
        let mut seen_updates = HashSet::new();
        let mut updates = Vec::new();
        let mut dead_end = false;

        for &module in modules {
            let mut boundaries = Vec::new();
            let has_dead_end = propagate_update(graph, module, &mut traversed, &mut boundaries)?;
            graph.invalidate_module(module, &mut invalidated, timestamp, true)?;
            if dead_end {
                continue;
            }
            if has_dead_end {
                dead_end = true;
                continue;
            }
            for b in boundaries {
                let path = self.to_url(graph.node(b.boundary)?.id());
                let accepted_path = self.to_url(graph.node(b.accepted_via)?.id());
                if !seen_updates.insert((path.clone(), accepted_path.clone())) {
                    continue;
                }
                let kind = if is_css_request(&path) {
                    UpdateKind::CssUpdate
                } else {
                    UpdateKind::JsUpdate
                };
                updates.push(HmrUpdate {
                    kind,
                    path,
                    accepted_path,
                    timestamp,
                    is_within_circular_import: b.is_within_circular_import,
                });
            }
        }

        let short = self.to_url(file);
        if dead_end {
            info!(file = %short, "page reload");
            return Ok(HmrOutcome::FullReload {
                path: None,
                triggered_by: short,
            });
        }
        if updates.is_empty() {
            debug!(file = %short, "no update happened");
            return Ok(HmrOutcome::NoUpdate);
        }
        info!(
            file = %short,
            boundaries = ?updates.iter().map(|u| u.path.as_str()).collect::<Vec<_>>(),
            "hmr update"
        );
        Ok(HmrOutcome::Update(updates))
    }

    /// Tell clients to drop modules that lost their last importer.
    pub fn send_prune(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let paths = ids.iter().map(|id| self.to_url(id)).collect();
        self.transport.send(HmrPayload::Prune { paths });
    }

    fn dispatch(&self, outcome: &HmrOutcome) {
        if let Some(payload) = outcome.clone().into_payload() {
            self.transport.send(payload);
        }
    }

    /// Client-facing URL for a module id: root-relative inside the project,
    /// `/@fs/` outside it. Placeholder ids pass through.
    #[must_use]
    pub fn to_url(&self, id: &str) -> String {
        if let Some(rest) = id.strip_prefix(self.root.as_str()) {
            if rest.starts_with('/') {
                return rest.to_string();
            }
        }
        let is_abs = id.starts_with('/') || id.as_bytes().get(1) == Some(&b':');
        if is_abs {
            format!("{FS_PREFIX}{}", id.trim_start_matches('/'))
        } else {
            id.to_string()
        }
    }
}

/// Watcher paths in the graph's id form. Deleted files no longer
/// canonicalize, so their parent directory is used instead.
fn event_file(path: &Path) -> String {
    if let Ok(real) = dunce::canonicalize(path) {
        return normalize_slashes(&real);
    }
    let parent = path.parent().and_then(|p| dunce::canonicalize(p).ok());
    match (parent, path.file_name()) {
        (Some(parent), Some(name)) => normalize_slashes(&parent.join(name)),
        _ => normalize_slashes(path),
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformOutput;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<HmrPayload>>);

    impl HmrTransport for Recorder {
        fn send(&self, payload: HmrPayload) {
            self.0.lock().unwrap().push(payload);
        }
    }

    fn engine() -> (HmrEngine, Arc<Recorder>, Arc<PackageCache>) {
        let recorder = Arc::new(Recorder::default());
        let packages = Arc::new(PackageCache::new());
        let engine = HmrEngine::new(Path::new("/project"), Arc::clone(&packages), recorder.clone());
        (engine, recorder, packages)
    }

    /// `edges` as analyzed modules; `self_accepting` lists self-accepting ids.
    fn graph(edges: &[(&str, &str)], self_accepting: &[&str]) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        for (importer, imported) in edges {
            let a = graph.ensure_module(importer);
            let b = graph.ensure_module(imported);
            graph.add_import(a, b).unwrap();
        }
        let modules: Vec<(ModuleId, String, Vec<ModuleId>)> = graph
            .iter()
            .map(|(m, n)| (m, n.id().to_string(), n.imported_modules().iter().copied().collect()))
            .collect();
        for (m, id, imported) in modules {
            let accepts = self_accepting.contains(&id.as_str());
            graph.update_module_info(m, &imported, &[], None, accepts).unwrap();
            graph.set_transform_result(m, TransformOutput::new("")).unwrap();
        }
        graph
    }

    #[test]
    fn test_hmr_no_boundary_full_reload() {
        let (engine, recorder, _) = engine();
        let mut graph = graph(&[("/project/root.js", "/project/leaf.js")], &[]);

        let outcome = engine.handle_file_event(&mut graph, &FileEvent::change("/project/leaf.js"));
        assert_eq!(
            outcome,
            HmrOutcome::FullReload {
                path: None,
                triggered_by: "/leaf.js".to_string()
            }
        );
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
        let leaf = graph.get_module_by_id("/project/leaf.js").unwrap();
        assert!(leaf.transform_result().is_none());
        assert!(leaf.last_hmr_timestamp() > 0);
    }

    #[test]
    fn test_hmr_self_accepting_boundary() {
        let (engine, recorder, _) = engine();
        let mut graph = graph(
            &[("/project/root.js", "/project/mid.js"), ("/project/mid.js", "/project/leaf.js")],
            &["/project/mid.js"],
        );

        let outcome = engine.handle_file_event(&mut graph, &FileEvent::change("/project/leaf.js"));
        let HmrOutcome::Update(updates) = outcome else {
            panic!("expected partial update, got {outcome:?}");
        };
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].path, "/mid.js");
        assert_eq!(updates[0].accepted_path, "/mid.js");
        assert_eq!(updates[0].kind, UpdateKind::JsUpdate);
        assert!(matches!(recorder.0.lock().unwrap()[0], HmrPayload::Update { .. }));
        graph.check_consistency().unwrap();
    }

    #[test]
    fn test_duplicate_change_is_idempotent() {
        let (engine, _, _) = engine();
        let mut graph = graph(&[("/project/main.js", "/project/App.js")], &["/project/App.js"]);

        let event = FileEvent::change("/project/App.js");
        let first = engine.handle_file_event(&mut graph, &event);
        let second = engine.handle_file_event(&mut graph, &event);
        let paths = |o: &HmrOutcome| match o {
            HmrOutcome::Update(u) => u.iter().map(|u| u.path.clone()).collect::<Vec<_>>(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(paths(&first), paths(&second));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_html_outside_graph_reloads_and_unknown_file_is_ignored() {
        let (engine, recorder, _) = engine();
        let mut graph = ModuleGraph::new();

        let html = engine.handle_file_event(&mut graph, &FileEvent::change("/project/about.html"));
        assert!(html.is_full_reload());
        let other = engine.handle_file_event(&mut graph, &FileEvent::change("/project/notes.txt"));
        assert_eq!(other, HmrOutcome::NoUpdate);
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unlink_updates_importers_then_removes() {
        let (engine, _, _) = engine();
        let mut graph = graph(
            &[("/project/main.js", "/project/App.js"), ("/project/App.js", "/project/util.js")],
            &["/project/App.js"],
        );

        let outcome = engine.handle_file_event(&mut graph, &FileEvent::unlink("/project/util.js"));
        assert!(matches!(outcome, HmrOutcome::Update(ref u) if u[0].path == "/App.js"));
        assert!(graph.get_module_by_id("/project/util.js").is_none());
        graph.check_consistency().unwrap();

        let again = engine.handle_file_event(&mut graph, &FileEvent::unlink("/project/util.js"));
        assert_eq!(again, HmrOutcome::NoUpdate);
    }

    #[test]
    fn test_package_json_event_clears_cache() {
        let (engine, _, packages) = engine();
        let before = packages.epoch();
        engine.handle_file_event(
            &mut ModuleGraph::new(),
            &FileEvent::change("/project/node_modules/react/package.json"),
        );
        assert!(packages.epoch() > before);
    }

    #[test]
    fn test_client_dead_end_reloads() {
        let (engine, _, _) = engine();
        let mut graph = graph(&[("/project/main.js", "/project/App.js")], &["/project/App.js"]);

        // App could not apply it; main accepts nothing and has no importers.
        let outcome = engine.handle_invalidate(&mut graph, "/project/App.js");
        assert!(outcome.is_full_reload());
        let orphan = engine.handle_invalidate(&mut graph, "/project/main.js");
        assert!(orphan.is_full_reload());
    }

    #[test]
    fn test_urls() {
        let (engine, _, _) = engine();
        assert_eq!(engine.to_url("/project/src/a.js"), "/src/a.js");
        assert_eq!(engine.to_url("/projectx/a.js"), "/@fs/projectx/a.js");
        assert_eq!(engine.to_url("__browser-external:fs"), "__browser-external:fs");
    }

    #[tokio::test]
    async fn test_channel_transport() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let engine = HmrEngine::new(Path::new("/project"), Arc::new(PackageCache::new()), Arc::new(tx));
        engine.send_prune(&["/project/old.js".to_string()]);
        assert_eq!(
            rx.recv().await,
            Some(HmrPayload::Prune {
                paths: vec!["/old.js".to_string()]
            })
        );
    }
}
