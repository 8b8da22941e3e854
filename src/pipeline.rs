//! Per-file indexing unit: parse, chunk, embed, then write the document
//! and its chunks transactionally.
//!
//! Preparation (reads, parsing, embedding) is separated from committing so
//! scans can prepare files on the worker pool while index writes stay on
//! one thread in sorted order.

use tantivy::IndexWriter;

use crate::{
    chunker,
    embedder::Embedder,
    error::{Error, Result},
    lexical::LexicalIndex,
    note_id::NoteId,
    parser,
    store::{ChunkEmbedding, DocumentRecord, IndexStore, now_unix_secs},
    walker::DiscoveredFile,
};

/// What happened to a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Processed,
    /// The stored record is at least as new as the file; nothing was done.
    Skipped,
    Failed(String),
}

/// A fully prepared document, ready to commit.
#[derive(Debug)]
pub struct PreparedDocument {
    pub id: NoteId,
    pub record: DocumentRecord,
    pub chunks: Vec<ChunkEmbedding>,
}

#[derive(Debug)]
pub enum Prepared {
    Ready(Box<PreparedDocument>),
    Skipped,
}

pub struct Pipeline<'a> {
    store: &'a IndexStore,
    lexical: &'a LexicalIndex,
    embedder: &'a Embedder,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a IndexStore,
        lexical: &'a LexicalIndex,
        embedder: &'a Embedder,
    ) -> Self {
        Self {
            store,
            lexical,
            embedder,
        }
    }

    pub fn store(&self) -> &IndexStore {
        self.store
    }

    pub fn lexical(&self) -> &LexicalIndex {
        self.lexical
    }

    /// Parse, chunk, and embed one file without touching the indexes.
    ///
    /// Returns [`Prepared::Skipped`] when the stored record's modification
    /// time shows the file has not changed. An unavailable embedding
    /// engine produces a document with no chunks; keyword indexing still
    /// proceeds.
    pub fn prepare(&self, file: &DiscoveredFile) -> Result<Prepared> {
        let id = NoteId::from_path(&file.path);

        if let Some(existing) = self.store.get_document(id.numeric)?
            && file.mtime <= existing.modified_at
        {
            return Ok(Prepared::Skipped);
        }

        let raw = std::fs::read(&file.path)?;
        let parsed = parser::parse(&raw, &file.file_name)?;

        let chunk_texts = chunker::chunk_text(
            &parsed.body,
            chunker::DEFAULT_CHUNK_SIZE,
            chunker::DEFAULT_CHUNK_OVERLAP,
        );

        let mut chunks = Vec::with_capacity(chunk_texts.len());
        for text in chunk_texts {
            match self.embedder.embed(&text) {
                Ok(vector) => chunks.push(ChunkEmbedding { text, vector }),
                Err(Error::EmbeddingUnavailable(reason)) => {
                    tracing::debug!(
                        path = %file.path,
                        %reason,
                        "indexing without embeddings"
                    );
                    chunks.clear();
                    break;
                }
                Err(Error::Model(reason)) => {
                    tracing::warn!(
                        path = %file.path,
                        %reason,
                        "encoder failed, indexing without embeddings"
                    );
                    chunks.clear();
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let record = DocumentRecord {
            id: id.hex.clone(),
            path: file.path.clone(),
            file_name: file.file_name.clone(),
            title: parsed.title,
            body: parsed.body,
            size: file.size,
            modified_at: file.mtime,
            indexed_at: now_unix_secs(),
            word_count: parsed.word_count,
            kind: parsed.kind.as_str().to_string(),
        };

        Ok(Prepared::Ready(Box::new(PreparedDocument {
            id,
            record,
            chunks,
        })))
    }

    /// Write a prepared document to the store and the lexical index.
    ///
    /// The store write is one transaction covering the record and all its
    /// chunks. The lexical write becomes visible at the caller's next
    /// writer commit.
    pub fn commit(
        &self,
        writer: &IndexWriter,
        doc: &PreparedDocument,
    ) -> Result<()> {
        self.store
            .upsert_document(doc.id.numeric, &doc.record, &doc.chunks)?;
        self.lexical.index_document(
            writer,
            &doc.record.id,
            doc.id.numeric,
            &doc.record.path,
            &doc.record.file_name,
            &doc.record.title,
            &doc.record.body,
            doc.record.modified_at,
        )?;
        Ok(())
    }

    /// Prepare and commit one file, folding errors into the outcome.
    pub fn index_file(
        &self,
        writer: &IndexWriter,
        file: &DiscoveredFile,
    ) -> IndexOutcome {
        match self.prepare(file) {
            Ok(Prepared::Skipped) => IndexOutcome::Skipped,
            Ok(Prepared::Ready(doc)) => match self.commit(writer, &doc) {
                Ok(()) => IndexOutcome::Processed,
                Err(e) => {
                    tracing::warn!(
                        path = %file.path,
                        error = %e,
                        "failed to commit note"
                    );
                    IndexOutcome::Failed(e.to_string())
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %file.path,
                    error = %e,
                    "failed to index note"
                );
                IndexOutcome::Failed(e.to_string())
            }
        }
    }

    /// Remove the document for a path from the store and lexical index.
    pub fn remove_path(
        &self,
        writer: &IndexWriter,
        path: &str,
    ) -> Result<bool> {
        let id = NoteId::from_path(path);
        let removed = self.store.delete_document(id.numeric)?;
        self.lexical.remove_document(writer, &id.hex);
        Ok(removed)
    }
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}
