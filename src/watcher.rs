//! Filesystem watching with per-path debouncing.
//!
//! Bursts of events for one path (editor autosave, atomic replace dances)
//! coalesce into a single action: re-index if the file still exists,
//! remove otherwise. All debounce state is owned by the dispatch loop, so
//! a superseded timer can never fire concurrently with the event that
//! replaced it.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::mpsc::{Receiver, RecvTimeoutError, channel},
    time::{Duration, Instant},
};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::{
    error::Result,
    pipeline::Pipeline,
    walker,
};

/// Default quiet window before a pending change is dispatched.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// How often the dispatch loop drains ready entries.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tantivy writer memory budget for watch dispatches.
const WRITER_BUDGET: usize = 15_000_000;

/// The single action a settled path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Reindex,
    Remove,
}

/// Debounces change events by path.
///
/// Recording a path restarts its timer; `take_ready` drains the paths
/// whose window elapsed uncontested, each with its latest action.
#[derive(Debug)]
pub struct Debouncer {
    pending: HashMap<PathBuf, (Instant, PendingAction)>,
    window: Duration,
}

impl Debouncer {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            window: Duration::from_millis(debounce_ms),
        }
    }

    /// Record an event for a path, restarting its debounce timer.
    pub fn record(&mut self, path: PathBuf, action: PendingAction) {
        self.pending.insert(path, (Instant::now(), action));
    }

    /// Forget a pending path without dispatching.
    pub fn remove(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Take all paths whose debounce window has fully elapsed.
    pub fn take_ready(&mut self) -> Vec<(PathBuf, PendingAction)> {
        let now = Instant::now();
        let mut ready = Vec::new();

        self.pending.retain(|path, (last_change, action)| {
            if now.duration_since(*last_change) >= self.window {
                ready.push((path.clone(), *action));
                false
            } else {
                true
            }
        });

        ready
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Watches a note folder and re-indexes settled changes.
pub struct FileWatcher {
    // Held for its side effect: dropping it stops the watch.
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<notify::Event>>,
    folder: PathBuf,
}

impl FileWatcher {
    /// Start watching a folder recursively.
    ///
    /// Fails when the platform watcher cannot observe the path; callers
    /// fall back to periodic rescans.
    pub fn start(folder: &Path) -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher =
            notify::recommended_watcher(move |event| {
                let _ = tx.send(event);
            })?;
        watcher.watch(folder, RecursiveMode::Recursive)?;

        tracing::info!(folder = %folder.display(), "watching for changes");

        Ok(Self {
            _watcher: watcher,
            events: rx,
            folder: folder.to_path_buf(),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Run the dispatch loop until the watch channel closes.
    ///
    /// Each settled path triggers exactly one action: re-index when the
    /// file exists, removal when it does not. This covers create, modify,
    /// delete, and both halves of a move.
    pub fn run(
        &self,
        pipeline: &Pipeline<'_>,
        debounce_ms: u64,
    ) -> Result<()> {
        let mut debouncer = Debouncer::new(debounce_ms);
        let mut writer = pipeline.lexical().writer(WRITER_BUDGET)?;

        loop {
            match self.events.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => {
                    for path in event.paths {
                        if !walker::is_supported(&path) {
                            continue;
                        }
                        let action = if path.exists() {
                            PendingAction::Reindex
                        } else {
                            PendingAction::Remove
                        };
                        debouncer.record(path, action);
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "watch event error");
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("watch channel closed");
                    return Ok(());
                }
            }

            let mut dispatched = false;
            for (path, action) in debouncer.take_ready() {
                dispatch(pipeline, &writer, &path, action);
                dispatched = true;
            }
            if dispatched {
                writer.commit()?;
            }
        }
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

fn dispatch(
    pipeline: &Pipeline<'_>,
    writer: &tantivy::IndexWriter,
    path: &Path,
    action: PendingAction,
) {
    match action {
        PendingAction::Reindex => match walker::discover_one(path) {
            Ok(Some(file)) => {
                let outcome = pipeline.index_file(writer, &file);
                tracing::debug!(path = %path.display(), ?outcome, "re-indexed");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to stat changed file"
                );
            }
        },
        PendingAction::Remove => {
            let path_str = path.to_string_lossy();
            match pipeline.remove_path(writer, &path_str) {
                Ok(removed) => {
                    tracing::debug!(
                        path = %path.display(),
                        removed,
                        "removed from index"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove from index"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use super::*;

    #[test]
    fn debouncer_waits_for_quiet_window() {
        let mut debouncer = Debouncer::new(50);

        let path = PathBuf::from("/notes/file.md");
        debouncer.record(path.clone(), PendingAction::Reindex);

        assert!(debouncer.take_ready().is_empty());
        assert!(debouncer.has_pending());

        sleep(Duration::from_millis(60));

        let ready = debouncer.take_ready();
        assert_eq!(ready, vec![(path, PendingAction::Reindex)]);
        assert!(!debouncer.has_pending());
    }

    #[test]
    fn debouncer_resets_on_new_event() {
        let mut debouncer = Debouncer::new(50);

        let path = PathBuf::from("/notes/file.md");
        debouncer.record(path.clone(), PendingAction::Reindex);

        sleep(Duration::from_millis(30));
        debouncer.record(path.clone(), PendingAction::Reindex);

        sleep(Duration::from_millis(30));
        assert!(debouncer.take_ready().is_empty());

        sleep(Duration::from_millis(30));
        assert_eq!(debouncer.take_ready().len(), 1);
    }

    #[test]
    fn burst_of_events_coalesces_to_one_action() {
        let mut debouncer = Debouncer::new(500);
        let path = PathBuf::from("/notes/file.md");

        // Five modifications within ~100ms.
        for _ in 0..5 {
            debouncer.record(path.clone(), PendingAction::Reindex);
            sleep(Duration::from_millis(20));
        }
        assert!(debouncer.take_ready().is_empty());

        sleep(Duration::from_millis(550));

        let ready = debouncer.take_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].1, PendingAction::Reindex);
        assert!(debouncer.take_ready().is_empty());
    }

    #[test]
    fn latest_action_wins() {
        let mut debouncer = Debouncer::new(30);
        let path = PathBuf::from("/notes/file.md");

        debouncer.record(path.clone(), PendingAction::Reindex);
        debouncer.record(path.clone(), PendingAction::Remove);

        sleep(Duration::from_millis(40));

        let ready = debouncer.take_ready();
        assert_eq!(ready, vec![(path, PendingAction::Remove)]);
    }

    #[test]
    fn independent_paths_have_independent_timers() {
        let mut debouncer = Debouncer::new(50);

        let first = PathBuf::from("/notes/first.md");
        let second = PathBuf::from("/notes/second.md");

        debouncer.record(first.clone(), PendingAction::Reindex);
        sleep(Duration::from_millis(30));
        debouncer.record(second.clone(), PendingAction::Reindex);

        sleep(Duration::from_millis(25));
        let ready = debouncer.take_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, first);

        assert!(debouncer.has_pending());
        sleep(Duration::from_millis(30));
        let ready = debouncer.take_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, second);
    }

    #[test]
    fn removed_path_never_dispatches() {
        let mut debouncer = Debouncer::new(30);
        let path = PathBuf::from("/notes/file.md");

        debouncer.record(path.clone(), PendingAction::Reindex);
        debouncer.remove(&path);

        sleep(Duration::from_millis(40));
        assert!(debouncer.take_ready().is_empty());
    }
}
