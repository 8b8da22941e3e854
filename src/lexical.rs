use std::path::Path;

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    collector::TopDocs,
    doc,
    query::QueryParser,
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::error::Result;

/// Field names used in the schema.
pub mod fields {
    pub const NOTE_ID: &str = "note_id";
    pub const NOTE_KEY: &str = "note_key";
    pub const PATH: &str = "path";
    pub const FILE_NAME: &str = "file_name";
    pub const TITLE: &str = "title";
    pub const BODY: &str = "body";
    pub const MTIME: &str = "mtime";
}

/// Manages the tantivy full-text index over note bodies and titles.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    schema: Schema,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
pub struct SchemaFields {
    pub note_id: Field,
    pub note_key: Field,
    pub path: Field,
    pub file_name: Field,
    pub title: Field,
    pub body: Field,
    pub mtime: Field,
}

/// A keyword match from the index.
#[derive(Debug, Clone)]
pub struct LexicalMatch {
    pub score: f32,
    pub note_id: String,
    pub note_key: u64,
    pub path: String,
    pub file_name: String,
    pub title: String,
    pub mtime: u64,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let note_id = builder.add_text_field(fields::NOTE_ID, STRING | STORED);
    let note_key = builder.add_u64_field(fields::NOTE_KEY, STORED | FAST);
    let path = builder.add_text_field(fields::PATH, STRING | STORED);
    let file_name =
        builder.add_text_field(fields::FILE_NAME, STRING | STORED);

    let title_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let title = builder.add_text_field(fields::TITLE, title_opts);

    let body_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer("en_stem")
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let body = builder.add_text_field(fields::BODY, body_opts);

    let mtime = builder.add_u64_field(fields::MTIME, STORED | FAST);

    let schema = builder.build();
    let fields = SchemaFields {
        note_id,
        note_key,
        path,
        file_name,
        title,
        body,
        mtime,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

impl LexicalIndex {
    /// Open or create a lexical index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, _) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(
                mmap_dir,
                schema.clone(),
                tantivy::IndexSettings::default(),
            )?
        };

        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            schema,
        })
    }

    /// Create an in-memory lexical index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, _) = build_schema();
        let index = Index::create_in_ram(schema.clone());
        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            schema,
        })
    }

    /// Get the resolved field handles.
    pub fn fields(&self) -> SchemaFields {
        let f = |name: &str| self.schema.get_field(name).unwrap();
        SchemaFields {
            note_id: f(fields::NOTE_ID),
            note_key: f(fields::NOTE_KEY),
            path: f(fields::PATH),
            file_name: f(fields::FILE_NAME),
            title: f(fields::TITLE),
            body: f(fields::BODY),
            mtime: f(fields::MTIME),
        }
    }

    /// Create a writer with the given memory budget (in bytes).
    pub fn writer(&self, memory_budget: usize) -> Result<IndexWriter> {
        Ok(self.index.writer(memory_budget)?)
    }

    /// Add a note to the index via the given writer.
    ///
    /// Any existing entry with the same id is deleted first, so re-indexing
    /// replaces rather than duplicates.
    #[allow(clippy::too_many_arguments)]
    pub fn index_document(
        &self,
        writer: &IndexWriter,
        note_id: &str,
        note_key: u64,
        path: &str,
        file_name: &str,
        title: &str,
        body: &str,
        mtime: u64,
    ) -> Result<()> {
        let f = self.fields();

        let term = tantivy::Term::from_field_text(f.note_id, note_id);
        writer.delete_term(term);

        writer.add_document(doc!(
            f.note_id => note_id,
            f.note_key => note_key,
            f.path => path,
            f.file_name => file_name,
            f.title => title,
            f.body => body,
            f.mtime => mtime,
        ))?;

        Ok(())
    }

    /// Delete a single note by its hex id.
    pub fn remove_document(&self, writer: &IndexWriter, note_id: &str) {
        let f = self.fields();
        let term = tantivy::Term::from_field_text(f.note_id, note_id);
        writer.delete_term(term);
    }

    /// Delete every indexed note (full re-scan).
    pub fn remove_all(&self, writer: &IndexWriter) -> Result<()> {
        writer.delete_all_documents()?;
        Ok(())
    }

    /// Search with per-word prefix wildcarding.
    ///
    /// Each query term becomes a prefix query against the body (fuzzy adds
    /// Levenshtein distance 1), OR-ed with a lenient BM25 parse over title
    /// and body so full-word matches rank naturally. The title field is
    /// boosted 2x. Results are deduplicated by note id.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        fuzzy: bool,
    ) -> Result<Vec<LexicalMatch>> {
        let f = self.fields();
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let mut parser =
            QueryParser::for_index(&self.index, vec![f.title, f.body]);
        parser.set_field_boost(f.title, 2.0);
        let (bm25_query, _errors) = parser.parse_query_lenient(query_str);

        let mut should_clauses: Vec<(
            tantivy::query::Occur,
            Box<dyn tantivy::query::Query>,
        )> = vec![(tantivy::query::Occur::Should, bm25_query)];

        let distance = if fuzzy { 1 } else { 0 };
        for term_str in query_str.split_whitespace() {
            if term_str.len() < 2 {
                continue;
            }
            let term = tantivy::Term::from_field_text(
                f.body,
                &term_str.to_lowercase(),
            );
            let prefix = tantivy::query::FuzzyTermQuery::new_prefix(
                term, distance, true,
            );
            // Prefix hits are recall clauses; keep their contribution well
            // below BM25 so full-word relevance dominates the ranking.
            let boosted =
                tantivy::query::BoostQuery::new(Box::new(prefix), 0.1);
            should_clauses
                .push((tantivy::query::Occur::Should, Box::new(boosted)));
        }

        let combined =
            tantivy::query::BooleanQuery::new(should_clauses);
        let top_docs =
            searcher.search(&combined, &TopDocs::with_limit(limit))?;

        // Deduplicate by note id (keep highest score).
        let mut seen = std::collections::HashSet::new();
        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let note_id = extract_text(&doc, f.note_id);
            if seen.insert(note_id.clone()) {
                results.push(LexicalMatch {
                    score,
                    note_id,
                    note_key: extract_u64(&doc, f.note_key),
                    path: extract_text(&doc, f.path),
                    file_name: extract_text(&doc, f.file_name),
                    title: extract_text(&doc, f.title),
                    mtime: extract_u64(&doc, f.mtime),
                });
            }
        }

        Ok(results)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}
