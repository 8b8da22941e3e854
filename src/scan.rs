//! Full, incremental, and resumed scans over the note folder, with a
//! persisted singleton checkpoint and throttled progress reporting.
//!
//! The checkpoint is the sole source of truth for resuming an interrupted
//! scan. Files are prepared (read, parse, chunk, embed) on the rayon pool
//! in batches; store and lexical writes are applied on the scan thread in
//! sorted path order, so the checkpoint cursor always trails a fully
//! committed prefix of the file list.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Instant,
};

use globset::GlobSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    pipeline::{IndexOutcome, Pipeline, Prepared},
    store::{IndexStore, now_unix_secs},
    walker::{self, DiscoveredFile},
};

/// Emit progress after this many files at the latest.
pub const PROGRESS_EVERY_FILES: usize = 10;

/// Emit progress after this much time at the latest.
pub const PROGRESS_EVERY_MS: u64 = 2000;

/// Interval for the fallback rescan loop when file watching is
/// unavailable.
pub const DEFAULT_RESCAN_INTERVAL_SECS: u64 = 300;

/// Files prepared per rayon batch.
const PREPARE_BATCH: usize = 32;

/// Tantivy writer memory budget.
const WRITER_BUDGET: usize = 15_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    InProgress,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Singleton progress record for the most recent scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub folder: String,
    pub total_files: usize,
    pub processed_files: usize,
    /// Resumption cursor, compared lexicographically (plain string order)
    /// against the sorted file list. The walker sorts with the same
    /// collation; keep both in sync.
    pub last_processed_path: String,
    pub started_at: u64,
    pub updated_at: u64,
    pub status: ScanStatus,
}

impl ScanCheckpoint {
    fn begin(folder: &str, total_files: usize) -> Self {
        let now = now_unix_secs();
        Self {
            folder: folder.to_string(),
            total_files,
            processed_files: 0,
            last_processed_path: String::new(),
            started_at: now,
            updated_at: now,
            status: ScanStatus::InProgress,
        }
    }

    pub fn save(&self, store: &IndexStore) -> Result<()> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| crate::error::Error::Config(e.to_string()))?;
        store.set_checkpoint(&bytes)
    }

    /// Load the stored checkpoint. Garbage bytes are treated as no
    /// checkpoint at all rather than an error.
    pub fn load(store: &IndexStore) -> Result<Option<Self>> {
        let Some(bytes) = store.get_checkpoint_bytes()? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                tracing::warn!(error = %e, "undecodable scan checkpoint");
                Ok(None)
            }
        }
    }
}

/// Receives throttled progress notifications during a scan.
pub trait ProgressSink {
    fn on_progress(&self, processed: usize, total: usize, last_path: &str);
}

/// Sink that ignores all progress.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&self, _processed: usize, _total: usize, _last_path: &str) {}
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub folder: PathBuf,
    pub exclude: Option<GlobSet>,
    pub progress_files: usize,
    pub progress_ms: u64,
}

impl ScanOptions {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            exclude: None,
            progress_files: PROGRESS_EVERY_FILES,
            progress_ms: PROGRESS_EVERY_MS,
        }
    }
}

/// Counters describing a finished scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed: usize,
}

/// Clear all indexed state, then process every eligible file.
pub fn full_scan(
    pipeline: &Pipeline<'_>,
    opts: &ScanOptions,
    sink: &dyn ProgressSink,
) -> Result<ScanSummary> {
    let files = walker::discover_files(&opts.folder, opts.exclude.as_ref())?;

    pipeline.store().clear_documents()?;
    {
        let mut writer = pipeline.lexical().writer(WRITER_BUDGET)?;
        pipeline.lexical().remove_all(&writer)?;
        writer.commit()?;
    }

    let checkpoint =
        ScanCheckpoint::begin(&opts.folder.to_string_lossy(), files.len());
    run_scan(pipeline, files, opts, sink, checkpoint)
}

/// Process every eligible file (unchanged ones short-circuit), then drop
/// documents whose backing file no longer exists.
pub fn incremental_scan(
    pipeline: &Pipeline<'_>,
    opts: &ScanOptions,
    sink: &dyn ProgressSink,
) -> Result<ScanSummary> {
    let files = walker::discover_files(&opts.folder, opts.exclude.as_ref())?;

    let checkpoint =
        ScanCheckpoint::begin(&opts.folder.to_string_lossy(), files.len());
    let mut summary = run_scan(pipeline, files.clone(), opts, sink, checkpoint)?;

    summary.removed = remove_missing(pipeline, &files)?;
    Ok(summary)
}

/// Continue an interrupted scan from its checkpoint cursor.
///
/// With no checkpoint, or a completed one, this is an incremental scan.
/// Otherwise processing restarts at the first path strictly greater than
/// `last_processed_path`, carrying the prior processed count forward.
pub fn resume_scan(
    pipeline: &Pipeline<'_>,
    opts: &ScanOptions,
    sink: &dyn ProgressSink,
) -> Result<ScanSummary> {
    let previous = ScanCheckpoint::load(pipeline.store())?;
    let Some(previous) = previous else {
        return incremental_scan(pipeline, opts, sink);
    };
    if previous.status == ScanStatus::Completed {
        return incremental_scan(pipeline, opts, sink);
    }

    let files = walker::discover_files(&opts.folder, opts.exclude.as_ref())?;
    let remaining: Vec<DiscoveredFile> = files
        .into_iter()
        .filter(|f| f.path > previous.last_processed_path)
        .collect();

    let mut checkpoint = previous.clone();
    checkpoint.status = ScanStatus::InProgress;
    checkpoint.total_files = previous
        .total_files
        .max(previous.processed_files + remaining.len());

    tracing::info!(
        cursor = %previous.last_processed_path,
        remaining = remaining.len(),
        "resuming interrupted scan"
    );

    run_scan(pipeline, remaining, opts, sink, checkpoint)
}

fn run_scan(
    pipeline: &Pipeline<'_>,
    files: Vec<DiscoveredFile>,
    opts: &ScanOptions,
    sink: &dyn ProgressSink,
    mut checkpoint: ScanCheckpoint,
) -> Result<ScanSummary> {
    let mut summary = ScanSummary {
        total: files.len(),
        ..ScanSummary::default()
    };

    checkpoint.save(pipeline.store())?;

    let mut writer = pipeline.lexical().writer(WRITER_BUDGET)?;
    let mut last_emit = Instant::now();
    let mut files_since_emit = 0usize;
    let file_count = files.len();
    let mut position = 0usize;

    for batch in files.chunks(PREPARE_BATCH) {
        let prepared: Vec<(usize, Result<Prepared>)> = batch
            .par_iter()
            .enumerate()
            .map(|(i, file)| (i, pipeline.prepare(file)))
            .collect();

        for (offset, result) in prepared {
            let file = &batch[offset];
            let outcome = match result {
                Ok(Prepared::Skipped) => IndexOutcome::Skipped,
                Ok(Prepared::Ready(doc)) => {
                    match pipeline.commit(&writer, &doc) {
                        Ok(()) => IndexOutcome::Processed,
                        Err(e) => {
                            // Store-level failure: finalize and surface.
                            checkpoint.status = ScanStatus::Failed;
                            checkpoint.updated_at = now_unix_secs();
                            if let Err(save_err) =
                                checkpoint.save(pipeline.store())
                            {
                                tracing::error!(
                                    error = %save_err,
                                    "failed to persist failed checkpoint"
                                );
                            }
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        path = %file.path,
                        error = %e,
                        "skipping unreadable note"
                    );
                    IndexOutcome::Failed(e.to_string())
                }
            };

            match outcome {
                IndexOutcome::Processed => summary.processed += 1,
                IndexOutcome::Skipped => summary.skipped += 1,
                IndexOutcome::Failed(_) => summary.failed += 1,
            }

            position += 1;
            checkpoint.processed_files += 1;
            checkpoint.last_processed_path = file.path.clone();
            files_since_emit += 1;

            let is_final = position == file_count;
            let due_by_count = files_since_emit >= opts.progress_files;
            let due_by_time =
                last_emit.elapsed().as_millis() as u64 >= opts.progress_ms;
            if due_by_count || due_by_time || is_final {
                // The cursor may only advance past durably committed
                // lexical writes, or a resume would skip their files.
                writer.commit()?;
                checkpoint.updated_at = now_unix_secs();
                checkpoint.save(pipeline.store())?;
                sink.on_progress(
                    checkpoint.processed_files,
                    checkpoint.total_files,
                    &checkpoint.last_processed_path,
                );
                files_since_emit = 0;
                last_emit = Instant::now();
            }
        }
    }

    checkpoint.status = ScanStatus::Completed;
    checkpoint.updated_at = now_unix_secs();
    checkpoint.save(pipeline.store())?;

    tracing::info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "scan finished"
    );

    Ok(summary)
}

/// Delete documents whose backing file was not discovered.
fn remove_missing(
    pipeline: &Pipeline<'_>,
    discovered: &[DiscoveredFile],
) -> Result<usize> {
    let on_disk: HashSet<&str> =
        discovered.iter().map(|f| f.path.as_str()).collect();

    let stale: Vec<String> = pipeline
        .store()
        .list_documents()?
        .into_iter()
        .filter(|(_, record)| !on_disk.contains(record.path.as_str()))
        .map(|(_, record)| record.path)
        .collect();

    if stale.is_empty() {
        return Ok(0);
    }

    let mut writer = pipeline.lexical().writer(WRITER_BUDGET)?;
    let mut removed = 0;
    for path in &stale {
        if pipeline.remove_path(&writer, path)? {
            removed += 1;
        }
    }
    writer.commit()?;

    tracing::info!(removed, "dropped notes whose files disappeared");
    Ok(removed)
}

/// Folder for follow-up scans: the checkpoint's folder, falling back to
/// the persisted setting.
pub fn stored_folder(store: &IndexStore) -> Result<Option<PathBuf>> {
    if let Some(checkpoint) = ScanCheckpoint::load(store)?
        && !checkpoint.folder.is_empty()
    {
        return Ok(Some(PathBuf::from(checkpoint.folder)));
    }
    Ok(store.get_setting("folder")?.map(PathBuf::from))
}

/// Persist the scanned folder so later `sync`/`watch` calls can omit it.
pub fn remember_folder(store: &IndexStore, folder: &Path) -> Result<()> {
    store.set_setting("folder", &folder.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{embedder::Embedder, lexical::LexicalIndex, note_id::NoteId};

    struct Fixture {
        _data_tmp: tempfile::TempDir,
        _model_tmp: tempfile::TempDir,
        notes_tmp: tempfile::TempDir,
        store: IndexStore,
        lexical: LexicalIndex,
        embedder: Embedder,
    }

    impl Fixture {
        fn pipeline(&self) -> Pipeline<'_> {
            Pipeline::new(&self.store, &self.lexical, &self.embedder)
        }

        fn options(&self) -> ScanOptions {
            ScanOptions::new(self.notes_tmp.path())
        }

        fn write(&self, name: &str, content: &str) {
            std::fs::write(self.notes_tmp.path().join(name), content)
                .unwrap();
        }

        fn stored_file_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self
                .store
                .list_documents()
                .unwrap()
                .into_iter()
                .map(|(_, record)| record.file_name)
                .collect();
            names.sort();
            names
        }
    }

    fn fixture() -> Fixture {
        let data_tmp = tempfile::tempdir().unwrap();
        let model_tmp = tempfile::tempdir().unwrap();
        let notes_tmp = tempfile::tempdir().unwrap();
        let store =
            IndexStore::open(&data_tmp.path().join("index.redb")).unwrap();
        let lexical = LexicalIndex::open_in_ram().unwrap();
        let embedder = Embedder::new(model_tmp.path());
        Fixture {
            _data_tmp: data_tmp,
            _model_tmp: model_tmp,
            notes_tmp,
            store,
            lexical,
            embedder,
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(usize, usize, String)>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_progress(&self, processed: usize, total: usize, last: &str) {
            self.events.lock().unwrap().push((
                processed,
                total,
                last.to_string(),
            ));
        }
    }

    #[test]
    fn full_scan_indexes_everything() {
        let fx = fixture();
        fx.write("a.md", "# Alpha\n\nfirst note");
        fx.write("b.md", "# Beta\n\nsecond note");
        fx.write("c.txt", "plain third note");

        let summary =
            full_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(fx.store.document_count().unwrap(), 3);

        let checkpoint = ScanCheckpoint::load(&fx.store).unwrap().unwrap();
        assert_eq!(checkpoint.status, ScanStatus::Completed);
        assert_eq!(checkpoint.processed_files, 3);
        assert_eq!(checkpoint.total_files, 3);
    }

    #[test]
    fn full_scan_clears_previous_state() {
        let fx = fixture();
        fx.write("old.md", "# Old\n\nold note");
        full_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();

        std::fs::remove_file(fx.notes_tmp.path().join("old.md")).unwrap();
        fx.write("new.md", "# New\n\nnew note");
        full_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();

        assert_eq!(fx.stored_file_names(), vec!["new.md".to_string()]);
        assert!(fx.lexical.search("old", 10, false).unwrap().is_empty());
    }

    #[test]
    fn incremental_scan_skips_unchanged() {
        let fx = fixture();
        fx.write("a.md", "# Alpha\n\nstable");
        fx.write("b.md", "# Beta\n\nstable");

        full_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();
        let summary =
            incremental_scan(&fx.pipeline(), &fx.options(), &NullSink)
                .unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.removed, 0);
    }

    #[test]
    fn incremental_scan_removes_missing_files() {
        let fx = fixture();
        fx.write("keep.md", "# Keep\n\nstays");
        fx.write("drop.md", "# Drop\n\ngoes away");
        full_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();

        std::fs::remove_file(fx.notes_tmp.path().join("drop.md")).unwrap();
        let summary =
            incremental_scan(&fx.pipeline(), &fx.options(), &NullSink)
                .unwrap();

        assert_eq!(summary.removed, 1);
        assert_eq!(fx.stored_file_names(), vec!["keep.md".to_string()]);

        // Cascade: vectors and lexical entries are gone too.
        let dropped =
            NoteId::from_path(&format!(
                "{}/drop.md",
                fx.notes_tmp.path().canonicalize().unwrap().display()
            ));
        assert!(fx.store.get_document(dropped.numeric).unwrap().is_none());
    }

    #[test]
    fn unchanged_files_keep_indexed_at() {
        let fx = fixture();
        fx.write("a.md", "# Alpha\n\nstable");
        full_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();

        let before = fx.store.list_documents().unwrap();
        incremental_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();
        let after = fx.store.list_documents().unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn resume_processes_only_paths_after_cursor() {
        let fx = fixture();
        for name in ["a.md", "b.md", "c.md", "d.md"] {
            fx.write(name, &format!("# {name}\n\ncontent of {name}"));
        }

        let files =
            walker::discover_files(fx.notes_tmp.path(), None).unwrap();
        assert_eq!(files.len(), 4);

        // Interrupted mid-scan: a and b were processed, cursor sits at b.
        let mut checkpoint = ScanCheckpoint::begin(
            &fx.notes_tmp.path().to_string_lossy(),
            4,
        );
        checkpoint.processed_files = 2;
        checkpoint.last_processed_path = files[1].path.clone();
        checkpoint.save(&fx.store).unwrap();

        let summary =
            resume_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.processed, 2);
        assert_eq!(fx.stored_file_names(), vec!["c.md", "d.md"]);

        let finished = ScanCheckpoint::load(&fx.store).unwrap().unwrap();
        assert_eq!(finished.status, ScanStatus::Completed);
        assert_eq!(finished.processed_files, 4);
        assert_eq!(finished.total_files, 4);
    }

    #[test]
    fn resume_without_checkpoint_is_incremental() {
        let fx = fixture();
        fx.write("a.md", "# Alpha\n\nnote");

        let summary =
            resume_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(fx.store.document_count().unwrap(), 1);
    }

    #[test]
    fn resume_with_garbage_checkpoint_is_incremental() {
        let fx = fixture();
        fx.write("a.md", "# Alpha\n\nnote");
        fx.store.set_checkpoint(b"definitely not json").unwrap();

        let summary =
            resume_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();
        assert_eq!(summary.processed, 1);

        let checkpoint = ScanCheckpoint::load(&fx.store).unwrap().unwrap();
        assert_eq!(checkpoint.status, ScanStatus::Completed);
    }

    #[test]
    fn resume_after_completed_checkpoint_is_incremental() {
        let fx = fixture();
        fx.write("a.md", "# Alpha\n\nnote");
        full_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();

        fx.write("b.md", "# Beta\n\nanother");
        let summary =
            resume_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(fx.store.document_count().unwrap(), 2);
    }

    #[test]
    fn unreadable_file_is_counted_failed_not_fatal() {
        let fx = fixture();
        fx.write("good.md", "# Good\n\nfine");
        std::fs::write(fx.notes_tmp.path().join("bad.md"), [0xff, 0xfe])
            .unwrap();

        let summary =
            full_scan(&fx.pipeline(), &fx.options(), &NullSink).unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);

        let checkpoint = ScanCheckpoint::load(&fx.store).unwrap().unwrap();
        assert_eq!(checkpoint.status, ScanStatus::Completed);
    }

    #[test]
    fn progress_is_throttled_by_file_count() {
        let fx = fixture();
        for i in 0..4 {
            fx.write(&format!("n{i}.md"), "# N\n\nnote");
        }

        // Default throttle (10 files / 2000 ms): only the final file emits.
        let sink = RecordingSink::default();
        full_scan(&fx.pipeline(), &fx.options(), &sink).unwrap();
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 4);
        assert_eq!(events[0].1, 4);
    }

    #[test]
    fn progress_every_file_when_configured() {
        let fx = fixture();
        for i in 0..4 {
            fx.write(&format!("n{i}.md"), "# N\n\nnote");
        }

        let mut opts = fx.options();
        opts.progress_files = 1;
        let sink = RecordingSink::default();
        full_scan(&fx.pipeline(), &opts, &sink).unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 4);
        let processed: Vec<usize> = events.iter().map(|e| e.0).collect();
        assert_eq!(processed, vec![1, 2, 3, 4]);
    }

    #[test]
    fn folder_is_remembered() {
        let fx = fixture();
        remember_folder(&fx.store, fx.notes_tmp.path()).unwrap();
        assert_eq!(
            stored_folder(&fx.store).unwrap(),
            Some(fx.notes_tmp.path().to_path_buf())
        );
    }
}
