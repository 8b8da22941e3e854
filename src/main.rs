use std::{path::Path, time::Duration};

use clap::Parser;
use globset::{Glob, GlobSet, GlobSetBuilder};
use kdam::{Bar, BarExt, tqdm};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};
use notedex::{
    DataDir,
    Embedder,
    Error,
    IndexStore,
    LexicalIndex,
    Pipeline,
    Result,
    hybrid,
    mcp,
    scan::{self, ProgressSink, ScanCheckpoint, ScanOptions},
    watcher::FileWatcher,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("NOTEDEX_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let model_dir = data_dir.model_dir(cli.model_dir.as_deref());

    match cli.command {
        Command::Scan(args) => {
            let engine = Engine::open(&data_dir, &model_dir)?;
            let folder = canonical_folder(&args.folder)?;
            let exclude = build_exclude(&args.exclude)?;
            scan::remember_folder(&engine.store, &folder)?;

            let mut opts = ScanOptions::new(folder);
            opts.exclude = exclude;
            let summary = scan::full_scan(
                &engine.pipeline(),
                &opts,
                &BarSink::new("scanning"),
            )?;
            print_summary(&summary);
        }
        Command::Sync(args) => {
            let engine = Engine::open(&data_dir, &model_dir)?;
            let folder =
                resolve_folder(&engine.store, args.folder.as_deref())?;
            let exclude = build_exclude(&args.exclude)?;

            let mut opts = ScanOptions::new(folder);
            opts.exclude = exclude;
            let summary = scan::incremental_scan(
                &engine.pipeline(),
                &opts,
                &BarSink::new("syncing"),
            )?;
            print_summary(&summary);
        }
        Command::Resume(args) => {
            let engine = Engine::open(&data_dir, &model_dir)?;
            let folder =
                resolve_folder(&engine.store, args.folder.as_deref())?;

            let opts = ScanOptions::new(folder);
            let summary = scan::resume_scan(
                &engine.pipeline(),
                &opts,
                &BarSink::new("resuming"),
            )?;
            print_summary(&summary);
        }
        Command::Search(args) => {
            let engine = Engine::open(&data_dir, &model_dir)?;
            let opts = hybrid::SearchOptions {
                limit: args.count,
                min_score: args.min_score,
                keyword_only: args.keyword_only,
                fuzzy: args.fuzzy,
            };
            let results = hybrid::search(
                &args.query,
                &opts,
                &engine.store,
                &engine.lexical,
                &engine.embedder,
            )?;

            if args.json {
                print_results_json(&args.query, &results)?;
            } else {
                print_results_human(&results);
            }
        }
        Command::Watch(args) => {
            let engine = Engine::open(&data_dir, &model_dir)?;
            let folder =
                resolve_folder(&engine.store, args.folder.as_deref())?;
            cmd_watch(
                &engine,
                &folder,
                args.debounce_ms,
                args.fallback_interval_secs,
            )?;
        }
        Command::Status(args) => {
            let engine = Engine::open(&data_dir, &model_dir)?;
            cmd_status(&engine, &data_dir, &model_dir, args.json)?;
        }
        Command::Mcp => {
            mcp::run_mcp(data_dir, model_dir)?;
        }
        Command::Completions(args) => {
            args.generate();
        }
    }

    Ok(())
}

struct Engine {
    store: IndexStore,
    lexical: LexicalIndex,
    embedder: Embedder,
}

impl Engine {
    fn open(data_dir: &DataDir, model_dir: &Path) -> Result<Self> {
        Ok(Self {
            store: IndexStore::open(&data_dir.index_db())?,
            lexical: LexicalIndex::open(&data_dir.tantivy_dir()?)?,
            embedder: Embedder::new(model_dir),
        })
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(&self.store, &self.lexical, &self.embedder)
    }
}

fn canonical_folder(folder: &Path) -> Result<std::path::PathBuf> {
    if !folder.is_dir() {
        return Err(Error::Config(format!(
            "not a directory: {}",
            folder.display()
        )));
    }
    Ok(folder.canonicalize()?)
}

fn resolve_folder(
    store: &IndexStore,
    explicit: Option<&Path>,
) -> Result<std::path::PathBuf> {
    if let Some(folder) = explicit {
        return canonical_folder(folder);
    }
    match scan::stored_folder(store)? {
        Some(folder) => canonical_folder(&folder),
        None => Err(Error::NotFound {
            kind: "folder",
            name: "no folder configured; run `notedex scan <folder>` first"
                .to_string(),
        }),
    }
}

fn build_exclude(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| {
            Error::Config(format!("invalid glob pattern '{pattern}': {e}"))
        })?);
    }
    Ok(Some(
        builder
            .build()
            .map_err(|e| Error::Config(e.to_string()))?,
    ))
}

/// Progress sink rendering a kdam bar on stderr.
struct BarSink {
    bar: std::sync::Mutex<Bar>,
}

impl BarSink {
    fn new(desc: &str) -> Self {
        Self {
            bar: std::sync::Mutex::new(tqdm!(desc = desc.to_string())),
        }
    }
}

impl ProgressSink for BarSink {
    fn on_progress(&self, processed: usize, total: usize, _last_path: &str) {
        let Ok(mut bar) = self.bar.lock() else {
            return;
        };
        bar.total = total;
        let _ = bar.update_to(processed);
    }
}

fn print_summary(summary: &scan::ScanSummary) {
    eprintln!();
    println!(
        "{} file(s): {} indexed, {} unchanged, {} failed, {} removed",
        summary.total,
        summary.processed,
        summary.skipped,
        summary.failed,
        summary.removed
    );
}

fn print_results_human(results: &[hybrid::SearchResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{:>3}. [{:.3}] {} {} #{}",
            i + 1,
            result.score,
            result.kind.as_str(),
            result.path,
            &result.note_id[..result.note_id.len().min(6)]
        );
        if !result.title.is_empty() {
            println!("     {}", result.title);
        }
        if !result.snippet.is_empty() {
            println!("     {}", result.snippet);
        }
    }
    println!("\n{} result(s)", results.len());
}

fn print_results_json(
    query: &str,
    results: &[hybrid::SearchResult],
) -> Result<()> {
    let value = serde_json::json!({
        "query": query,
        "result_count": results.len(),
        "results": results,
    });
    let rendered = serde_json::to_string_pretty(&value)
        .map_err(|e| Error::Config(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

fn cmd_watch(
    engine: &Engine,
    folder: &Path,
    debounce_ms: u64,
    fallback_interval_secs: u64,
) -> Result<()> {
    let pipeline = engine.pipeline();
    let opts = ScanOptions::new(folder);

    // Catch up on anything that changed while not watching.
    scan::incremental_scan(&pipeline, &opts, &scan::NullSink)?;

    match FileWatcher::start(folder) {
        Ok(watcher) => watcher.run(&pipeline, debounce_ms),
        Err(e) => {
            tracing::warn!(
                error = %e,
                interval_secs = fallback_interval_secs,
                "file watching unavailable, falling back to periodic rescans"
            );
            loop {
                std::thread::sleep(Duration::from_secs(
                    fallback_interval_secs,
                ));
                if let Err(e) =
                    scan::incremental_scan(&pipeline, &opts, &scan::NullSink)
                {
                    tracing::error!(error = %e, "periodic rescan failed");
                }
            }
        }
    }
}

fn cmd_status(
    engine: &Engine,
    data_dir: &DataDir,
    model_dir: &Path,
    json: bool,
) -> Result<()> {
    let documents = engine.store.document_count()?;
    let checkpoint = ScanCheckpoint::load(&engine.store)?;
    let model_ready = engine.embedder.is_ready();

    if json {
        let value = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "model_dir": model_dir.display().to_string(),
            "model_ready": model_ready,
            "documents": documents,
            "checkpoint": checkpoint,
        });
        let rendered = serde_json::to_string_pretty(&value)
            .map_err(|e| Error::Config(e.to_string()))?;
        println!("{rendered}");
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!(
            "Model: {} ({})",
            model_dir.display(),
            if model_ready { "ready" } else { "missing" }
        );
        println!("Documents: {documents}");
        match checkpoint {
            Some(cp) => {
                println!(
                    "Last scan: {} ({}/{} files, folder {})",
                    cp.status.as_str(),
                    cp.processed_files,
                    cp.total_files,
                    cp.folder
                );
            }
            None => println!("Last scan: never"),
        }
    }
    Ok(())
}
