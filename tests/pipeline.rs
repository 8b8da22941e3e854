//! End-to-end pipeline coverage: scan a real folder, search it, sync
//! edits and deletions, and resume from a checkpoint. Runs without model
//! artifacts, so the engine exercises its keyword-only degradation path.

use notedex::{
    Embedder,
    IndexStore,
    LexicalIndex,
    Pipeline,
    hybrid::{self, MatchKind, SearchOptions},
    scan::{self, NullSink, ScanCheckpoint, ScanOptions, ScanStatus},
    walker,
};

struct Env {
    _data_tmp: tempfile::TempDir,
    _model_tmp: tempfile::TempDir,
    notes_tmp: tempfile::TempDir,
    store: IndexStore,
    lexical: LexicalIndex,
    embedder: Embedder,
}

impl Env {
    fn new() -> Self {
        let data_tmp = tempfile::tempdir().unwrap();
        let model_tmp = tempfile::tempdir().unwrap();
        let notes_tmp = tempfile::tempdir().unwrap();

        let store =
            IndexStore::open(&data_tmp.path().join("index.redb")).unwrap();
        let lexical =
            LexicalIndex::open(&data_tmp.path().join("tantivy")).unwrap();
        let embedder = Embedder::new(model_tmp.path());

        Self {
            _data_tmp: data_tmp,
            _model_tmp: model_tmp,
            notes_tmp,
            store,
            lexical,
            embedder,
        }
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(&self.store, &self.lexical, &self.embedder)
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions::new(self.notes_tmp.path())
    }

    fn write(&self, name: &str, content: &str) {
        std::fs::write(self.notes_tmp.path().join(name), content).unwrap();
    }

    fn search(&self, query: &str) -> Vec<hybrid::SearchResult> {
        hybrid::search(
            query,
            &SearchOptions::default(),
            &self.store,
            &self.lexical,
            &self.embedder,
        )
        .unwrap()
    }
}

#[test]
fn scan_then_search_returns_keyword_results() {
    let env = Env::new();
    env.write(
        "cooking.md",
        "# Cooking Pasta\n\nBoil salted water, then cook the pasta al dente.",
    );
    env.write(
        "rust.md",
        "# Rust Notes\n\nOwnership and borrowing keep memory safe.",
    );
    env.write("shopping.txt", "eggs, milk, flour, olive oil");

    let summary =
        scan::full_scan(&env.pipeline(), &env.scan_options(), &NullSink)
            .unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 0);

    let results = env.search("pasta");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].title, "Cooking Pasta");
    assert_eq!(results[0].kind, MatchKind::Keyword);
    assert!(!results[0].snippet.is_empty());

    let checkpoint = ScanCheckpoint::load(&env.store).unwrap().unwrap();
    assert_eq!(checkpoint.status, ScanStatus::Completed);
    assert_eq!(checkpoint.processed_files, 3);
}

#[test]
fn sync_indexes_edits_and_removes_deleted_notes() {
    let env = Env::new();
    env.write("a.md", "# Alpha\n\nthe original wording");
    env.write("b.md", "# Beta\n\nthis one will disappear");

    scan::full_scan(&env.pipeline(), &env.scan_options(), &NullSink)
        .unwrap();
    assert_eq!(env.search("wording").len(), 1);
    assert_eq!(env.search("disappear").len(), 1);

    // Modification times have whole-second granularity.
    std::thread::sleep(std::time::Duration::from_millis(1100));

    env.write("a.md", "# Alpha\n\ncompletely rewritten sentence");
    std::fs::remove_file(env.notes_tmp.path().join("b.md")).unwrap();

    let summary =
        scan::incremental_scan(&env.pipeline(), &env.scan_options(), &NullSink)
            .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.removed, 1);

    assert_eq!(env.search("rewritten").len(), 1);
    assert!(env.search("wording").is_empty());
    assert!(env.search("disappear").is_empty());
}

#[test]
fn unchanged_notes_are_skipped_on_sync() {
    let env = Env::new();
    env.write("stable.md", "# Stable\n\nnothing changes here");

    scan::full_scan(&env.pipeline(), &env.scan_options(), &NullSink)
        .unwrap();
    let before = env.store.list_documents().unwrap();

    let summary =
        scan::incremental_scan(&env.pipeline(), &env.scan_options(), &NullSink)
            .unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 0);

    let after = env.store.list_documents().unwrap();
    assert_eq!(before, after, "skipped notes must not be rewritten");
}

#[test]
fn resume_continues_after_the_checkpoint_cursor() {
    let env = Env::new();
    for name in ["a.md", "b.md", "c.md", "d.md"] {
        env.write(name, &format!("# {name}\n\nbody of {name}"));
    }

    let files = walker::discover_files(env.notes_tmp.path(), None).unwrap();

    // Simulate a scan killed after two files.
    let interrupted = ScanCheckpoint {
        folder: env.notes_tmp.path().to_string_lossy().to_string(),
        total_files: 4,
        processed_files: 2,
        last_processed_path: files[1].path.clone(),
        started_at: 1,
        updated_at: 1,
        status: ScanStatus::InProgress,
    };
    interrupted.save(&env.store).unwrap();

    let summary =
        scan::resume_scan(&env.pipeline(), &env.scan_options(), &NullSink)
            .unwrap();
    assert_eq!(summary.processed, 2);

    let mut names: Vec<String> = env
        .store
        .list_documents()
        .unwrap()
        .into_iter()
        .map(|(_, record)| record.file_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["c.md", "d.md"]);

    let finished = ScanCheckpoint::load(&env.store).unwrap().unwrap();
    assert_eq!(finished.status, ScanStatus::Completed);
    assert_eq!(finished.processed_files, 4);
}

#[test]
fn search_on_empty_index_is_empty_not_an_error() {
    let env = Env::new();
    assert!(env.search("anything").is_empty());
}
