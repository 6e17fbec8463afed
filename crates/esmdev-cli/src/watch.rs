//! File watching for HMR.
//!
//! Events are collected on a std thread and flushed as one batch once the
//! tree has been quiet for [`DEBOUNCE`].

use miette::{IntoDiagnostic, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const DEBOUNCE: Duration = Duration::from_millis(50);

/// Watch `root` recursively and send debounced batches of changed paths.
///
/// Watching stops when the returned watcher is dropped.
pub fn spawn(root: &Path, out_dir: PathBuf, tx: mpsc::Sender<Vec<PathBuf>>) -> Result<RecommendedWatcher> {
    let (events_tx, events_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
    let mut watcher = RecommendedWatcher::new(events_tx, Config::default()).into_diagnostic()?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .into_diagnostic()?;
    debug!(root = %root.display(), "watching for changes");

    std::thread::spawn(move || {
        let mut pending = BTreeSet::new();
        loop {
            match events_rx.recv_timeout(DEBOUNCE) {
                Ok(Ok(event)) => {
                    if !is_change(&event.kind) {
                        continue;
                    }
                    pending.extend(
                        event
                            .paths
                            .into_iter()
                            .filter(|p| !should_ignore(p, &out_dir)),
                    );
                }
                Ok(Err(e)) => warn!(error = %e, "watch error"),
                Err(RecvTimeoutError::Timeout) => {
                    if pending.is_empty() {
                        continue;
                    }
                    let batch: Vec<PathBuf> = std::mem::take(&mut pending).into_iter().collect();
                    if tx.blocking_send(batch).is_err() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    Ok(watcher)
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Dependencies, VCS data, prebundle output, dotfiles and editor backups.
fn should_ignore(path: &Path, out_dir: &Path) -> bool {
    if path.starts_with(out_dir) {
        return true;
    }
    let ignored_dir = path.components().any(|c| match c {
        Component::Normal(name) => name == "node_modules" || name == ".git",
        _ => false,
    });
    if ignored_dir {
        return true;
    }
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with('.') || n.ends_with('~'))
}
