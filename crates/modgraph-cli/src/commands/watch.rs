//! `modgraph watch` command implementation.
//!
//! Crawls the entry into a dev session, then turns filesystem events into
//! HMR decisions and prints every payload the session emits.

use miette::{IntoDiagnostic, Result};
use modgraph_core::hmr::{FileEvent, FileEventKind, HmrPayload};
use modgraph_core::{DevSession, ProjectConfig};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub fn run(project: ProjectConfig, entry: &Path, json: bool) -> Result<()> {
    let root = project.root.clone();
    let (payload_tx, mut payload_rx) = mpsc::unbounded_channel::<HmrPayload>();
    let session = DevSession::new(project, Arc::new(payload_tx)).into_diagnostic()?;
    let loaded = session.crawl(entry).into_diagnostic()?;
    if !json {
        println!("Loaded {loaded} modules from {}", entry.display());
        println!("Watching {} (Ctrl+C to stop)", root.display());
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = event_tx.send(res);
        },
        Config::default(),
    )
    .into_diagnostic()?;
    watcher.watch(&root, RecursiveMode::Recursive).into_diagnostic()?;

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(async {
        loop {
            tokio::select! {
                Some(res) = event_rx.recv() => match res {
                    Ok(event) => handle_event(&session, &event),
                    Err(e) => warn!(error = %e, "watch error"),
                },
                Some(payload) = payload_rx.recv() => print_payload(&payload, json)?,
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok::<(), miette::Report>(())
    })?;

    drop(watcher);
    Ok(())
}

fn handle_event(session: &DevSession, event: &Event) {
    for path in &event.paths {
        if should_ignore(path) {
            continue;
        }
        let Some(kind) = event_kind(&event.kind, path) else {
            continue;
        };
        debug!(path = %path.display(), ?kind, "file event");
        session.handle_file_event(&FileEvent::new(kind, path.clone()));
        if kind != FileEventKind::Unlink {
            // Re-analyze so the next change sees fresh edges.
            if let Err(e) = session.reload_file(path) {
                warn!(path = %path.display(), error = %e, "failed to reload module");
            }
        }
    }
}

/// Renames surface as modifications; a path that is gone was unlinked.
fn event_kind(kind: &EventKind, path: &Path) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Add),
        EventKind::Modify(_) if path.exists() => Some(FileEventKind::Change),
        EventKind::Modify(_) | EventKind::Remove(_) => Some(FileEventKind::Unlink),
        _ => None,
    }
}

fn should_ignore(path: &Path) -> bool {
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("node_modules" | ".git" | "target" | "dist")
        )
    }) || path.is_dir()
}

fn print_payload(payload: &HmrPayload, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(payload).into_diagnostic()?);
        return Ok(());
    }
    match payload {
        HmrPayload::Update { updates } => {
            for update in updates {
                if update.path == update.accepted_path {
                    println!("[hmr] update {}", update.path);
                } else {
                    println!("[hmr] update {} (via {})", update.path, update.accepted_path);
                }
            }
        }
        HmrPayload::FullReload { triggered_by, .. } => match triggered_by {
            Some(file) => println!("[hmr] page reload {file}"),
            None => println!("[hmr] page reload"),
        },
        HmrPayload::Prune { paths } => println!("[hmr] prune {}", paths.join(", ")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::path::PathBuf;

    #[test]
    fn test_event_kind_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let file: PathBuf = dir.path().join("a.js");
        std::fs::write(&file, "").unwrap();

        assert_eq!(event_kind(&EventKind::Create(CreateKind::File), &file), Some(FileEventKind::Add));
        assert_eq!(event_kind(&EventKind::Modify(ModifyKind::Any), &file), Some(FileEventKind::Change));
        let gone = dir.path().join("gone.js");
        assert_eq!(event_kind(&EventKind::Modify(ModifyKind::Any), &gone), Some(FileEventKind::Unlink));
        assert_eq!(event_kind(&EventKind::Remove(RemoveKind::File), &gone), Some(FileEventKind::Unlink));
        assert_eq!(event_kind(&EventKind::Any, &file), None);
    }

    #[test]
    fn test_ignored_paths() {
        assert!(should_ignore(Path::new("/p/node_modules/react/index.js")));
        assert!(should_ignore(Path::new("/p/.git/HEAD")));
        assert!(!should_ignore(Path::new("/p/src/main.js")));
    }
}
