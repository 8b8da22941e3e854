//! notedex - a local hybrid search engine for folders of notes.
//!
//! notedex indexes directory trees of markdown and plain-text files,
//! providing keyword search via [Tantivy](https://github.com/quickwit-oss/tantivy)
//! combined with semantic retrieval over locally computed sentence
//! embeddings. Indexing is incremental (modification-time based), survives
//! interruption through a persisted scan checkpoint, and degrades to
//! keyword-only search when no embedding model is installed.
//!
//! # Quick start
//!
//! ```no_run
//! use notedex::{DataDir, Embedder, IndexStore, LexicalIndex, Pipeline};
//! use notedex::hybrid::{self, SearchOptions};
//! use notedex::scan::{self, NullSink, ScanOptions};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = IndexStore::open(&data_dir.index_db()).unwrap();
//! let lexical = LexicalIndex::open(&data_dir.tantivy_dir().unwrap()).unwrap();
//! let embedder = Embedder::new(&data_dir.model_dir(None));
//!
//! let pipeline = Pipeline::new(&store, &lexical, &embedder);
//! let opts = ScanOptions::new("/home/user/notes");
//! scan::full_scan(&pipeline, &opts, &NullSink).unwrap();
//!
//! let results = hybrid::search(
//!     "borrow checker",
//!     &SearchOptions::default(),
//!     &store,
//!     &lexical,
//!     &embedder,
//! )
//! .unwrap();
//! for r in &results {
//!     println!("[{:.3}] {} ({})", r.score, r.path, r.kind.as_str());
//! }
//! ```

pub mod chunker;
pub mod data_dir;
pub mod embedder;
pub mod error;
pub mod hybrid;
pub mod lexical;
pub mod mcp;
pub mod note_id;
pub mod parser;
pub mod pipeline;
pub mod scan;
pub mod similarity;
pub mod snippet;
pub mod store;
pub mod tokenizer;
pub mod walker;
pub mod watcher;

pub use data_dir::DataDir;
pub use embedder::Embedder;
pub use error::{Error, Result};
pub use lexical::LexicalIndex;
pub use note_id::NoteId;
pub use pipeline::Pipeline;
pub use store::IndexStore;
