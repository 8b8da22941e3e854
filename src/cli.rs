use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "notedex",
    about = "A local hybrid keyword + semantic search engine for your notes"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the model artifact directory (model.onnx + vocab.txt)
    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fully re-index a notes folder from scratch
    Scan(ScanArgs),
    /// Incrementally index changed files and drop deleted ones
    Sync(SyncArgs),
    /// Continue an interrupted scan from its checkpoint
    Resume(ResumeArgs),
    /// Search the index with combined keyword and semantic retrieval
    Search(SearchArgs),
    /// Watch the notes folder and re-index changes as they settle
    Watch(WatchArgs),
    /// Show index status and the latest scan checkpoint
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Scan / Sync / Resume --

#[derive(Debug, Parser)]
pub struct ScanArgs {
    /// The notes folder to index
    pub folder: PathBuf,

    /// Glob patterns (relative to the folder) to skip
    #[arg(long)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct SyncArgs {
    /// The notes folder to sync (default: the last scanned folder)
    pub folder: Option<PathBuf>,

    /// Glob patterns (relative to the folder) to skip
    #[arg(long)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct ResumeArgs {
    /// The notes folder (default: the checkpoint's folder)
    pub folder: Option<PathBuf>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Minimum semantic similarity score
    #[arg(long, default_value = "0.3")]
    pub min_score: f32,

    /// Skip the semantic arm, keyword matching only
    #[arg(long)]
    pub keyword_only: bool,

    /// Allow one-typo prefix matching in the keyword arm
    #[arg(long)]
    pub fuzzy: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Watch --

#[derive(Debug, Parser)]
pub struct WatchArgs {
    /// The notes folder to watch (default: the last scanned folder)
    pub folder: Option<PathBuf>,

    /// Quiet window before a changed file is re-indexed, in milliseconds
    #[arg(long, default_value = "500")]
    pub debounce_ms: u64,

    /// Rescan interval when file watching is unavailable, in seconds
    #[arg(long, default_value = "300")]
    pub fallback_interval_secs: u64,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "notedex",
            &mut std::io::stdout(),
        );
    }
}
