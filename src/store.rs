//! Engine state persistence on a single redb database.
//!
//! All tables live in one database file so a document's record and its
//! chunks commit in one write transaction: an observer can never see a
//! document without its chunks or orphaned chunks without their document.
//!
//! Chunk vectors are stored per document as one binary entry:
//! - 4 bytes: chunk count C (u32 LE)
//! - 4 bytes: embedding dimension D (u32 LE)
//! - C * D * 4 bytes: f32 LE values in row-major order (row = ordinal)

use std::{path::Path, time::SystemTime};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    embedder::{vector_from_bytes, vector_to_bytes},
    error::Result,
};

const DOCUMENTS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("documents");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const CHUNK_TEXTS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("chunk_texts");
const CHECKPOINT: TableDefinition<&str, &[u8]> =
    TableDefinition::new("checkpoint");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

const CHECKPOINT_KEY: &str = "current";

/// Header size: 4 bytes chunk count + 4 bytes dimension.
const VECTOR_HEADER: usize = 8;

/// Current wall-clock time as seconds since the Unix epoch.
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A persisted note record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// 32-character hex identity derived from the absolute path.
    pub id: String,
    /// Absolute file path.
    pub path: String,
    pub file_name: String,
    pub title: String,
    /// Cleaned body text.
    pub body: String,
    pub size: u64,
    /// Content modification time (unix secs), used for change detection.
    pub modified_at: u64,
    /// When this record was last written by the indexing pipeline.
    pub indexed_at: u64,
    pub word_count: usize,
    /// "markdown" or "plain".
    pub kind: String,
}

/// A chunk ready for persistence; the ordinal is its slice position.
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub text: String,
    /// Unit-norm embedding vector.
    pub vector: Vec<f32>,
}

/// All chunk vectors of one document, in ordinal order.
#[derive(Debug, Clone)]
pub struct DocumentVectors {
    pub key: u64,
    pub vectors: Vec<Vec<f32>>,
}

pub struct IndexStore {
    db: Database,
}

impl IndexStore {
    /// Open or create the index database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(CHUNK_TEXTS)?;
        txn.open_table(CHECKPOINT)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Documents + chunks --

    /// Write a document record and its chunks in one transaction.
    ///
    /// Replaces any previous record and chunk data for the key. An empty
    /// chunk slice clears stored vectors (lexical-only indexing).
    pub fn upsert_document(
        &self,
        key: u64,
        record: &DocumentRecord,
        chunks: &[ChunkEmbedding],
    ) -> Result<()> {
        let record_bytes = serde_json::to_vec(record)
            .map_err(|e| crate::error::Error::Config(e.to_string()))?;

        let txn = self.db.begin_write()?;
        {
            let mut documents = txn.open_table(DOCUMENTS)?;
            documents.insert(key, record_bytes.as_slice())?;

            let mut vectors = txn.open_table(VECTORS)?;
            let mut texts = txn.open_table(CHUNK_TEXTS)?;
            if chunks.is_empty() {
                vectors.remove(key)?;
                texts.remove(key)?;
            } else {
                let blob = encode_vectors(chunks);
                vectors.insert(key, blob.as_slice())?;

                let chunk_texts: Vec<&str> =
                    chunks.iter().map(|c| c.text.as_str()).collect();
                let text_bytes = serde_json::to_vec(&chunk_texts)
                    .map_err(|e| {
                        crate::error::Error::Config(e.to_string())
                    })?;
                texts.insert(key, text_bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_document(&self, key: u64) -> Result<Option<DocumentRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;

        let Some(guard) = table.get(key)? else {
            return Ok(None);
        };

        match serde_json::from_slice(guard.value()) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(key, error = %e, "undecodable document record");
                Ok(None)
            }
        }
    }

    /// Remove a document and all its chunks in one transaction.
    pub fn delete_document(&self, key: u64) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut documents = txn.open_table(DOCUMENTS)?;
            let removed = documents.remove(key)?.is_some();
            let mut vectors = txn.open_table(VECTORS)?;
            vectors.remove(key)?;
            let mut texts = txn.open_table(CHUNK_TEXTS)?;
            texts.remove(key)?;
            removed
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Remove multiple documents and their chunks in a single transaction.
    pub fn batch_delete_documents(&self, keys: &[u64]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut documents = txn.open_table(DOCUMENTS)?;
            let mut vectors = txn.open_table(VECTORS)?;
            let mut texts = txn.open_table(CHUNK_TEXTS)?;
            for &key in keys {
                documents.remove(key)?;
                vectors.remove(key)?;
                texts.remove(key)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_documents(&self) -> Result<Vec<(u64, DocumentRecord)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            match serde_json::from_slice(v.value()) {
                Ok(record) => result.push((k.value(), record)),
                Err(e) => {
                    tracing::warn!(
                        key = k.value(),
                        error = %e,
                        "undecodable document record"
                    );
                }
            }
        }
        Ok(result)
    }

    pub fn document_count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Drop every document, vector, and chunk-text entry (full re-scan).
    pub fn clear_documents(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(DOCUMENTS)?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(CHUNK_TEXTS)?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(CHUNK_TEXTS)?;
        txn.commit()?;
        Ok(())
    }

    /// Load every stored chunk vector, grouped per document.
    ///
    /// Entries whose byte length disagrees with their header are logged and
    /// skipped, per the corrupt-vector policy.
    pub fn load_chunk_vectors(&self) -> Result<Vec<DocumentVectors>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;

        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let key = k.value();
            match decode_vectors(v.value()) {
                Some(vectors) => result.push(DocumentVectors { key, vectors }),
                None => {
                    tracing::warn!(key, "corrupt vector entry, skipping");
                }
            }
        }
        Ok(result)
    }

    /// Fetch one chunk's source text by document key and ordinal.
    pub fn chunk_text(&self, key: u64, ordinal: u32) -> Result<Option<String>> {
        let texts = self.chunk_texts(key)?;
        Ok(texts.into_iter().nth(ordinal as usize))
    }

    pub fn chunk_texts(&self, key: u64) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNK_TEXTS)?;

        let Some(guard) = table.get(key)? else {
            return Ok(Vec::new());
        };

        match serde_json::from_slice(guard.value()) {
            Ok(texts) => Ok(texts),
            Err(e) => {
                tracing::warn!(key, error = %e, "undecodable chunk texts");
                Ok(Vec::new())
            }
        }
    }

    // -- Checkpoint --

    pub fn set_checkpoint(&self, data: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHECKPOINT)?;
            table.insert(CHECKPOINT_KEY, data)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_checkpoint_bytes(&self) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHECKPOINT)?;
        Ok(table.get(CHECKPOINT_KEY)?.map(|v| v.value().to_vec()))
    }

    pub fn clear_checkpoint(&self) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(CHECKPOINT)?;
            table.remove(CHECKPOINT_KEY)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    #[cfg(test)]
    fn put_raw_vectors(&self, key: u64, data: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            table.insert(key, data)?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore").finish_non_exhaustive()
    }
}

fn encode_vectors(chunks: &[ChunkEmbedding]) -> Vec<u8> {
    let dimension = chunks[0].vector.len();
    let mut blob = Vec::with_capacity(
        VECTOR_HEADER + chunks.len() * dimension * 4,
    );
    blob.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    blob.extend_from_slice(&(dimension as u32).to_le_bytes());
    for chunk in chunks {
        assert_eq!(
            chunk.vector.len(),
            dimension,
            "all chunk vectors of a document must share one dimension"
        );
        blob.extend_from_slice(&vector_to_bytes(&chunk.vector));
    }
    blob
}

fn decode_vectors(bytes: &[u8]) -> Option<Vec<Vec<f32>>> {
    if bytes.len() < VECTOR_HEADER {
        return None;
    }

    let count = u32::from_le_bytes(bytes[0..4].try_into().ok()?) as usize;
    let dimension = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;

    let expected = VECTOR_HEADER + count * dimension * 4;
    if bytes.len() != expected {
        return None;
    }

    let mut vectors = Vec::with_capacity(count);
    for row in 0..count {
        let start = VECTOR_HEADER + row * dimension * 4;
        let end = start + dimension * 4;
        vectors.push(vector_from_bytes(&bytes[start..end])?);
    }
    Some(vectors)
}
