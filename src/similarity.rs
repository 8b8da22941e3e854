//! Brute-force vector similarity over the stored chunk embeddings.
//!
//! Stored and query vectors are unit-normalized, so similarity is a plain
//! dot product. A linear scan is the committed design for corpora under
//! roughly 10k chunks; that is the scaling boundary of this module, and
//! anything larger wants a real index structure instead.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::{error::Result, store::IndexStore};

/// Default minimum similarity score for a chunk to count as a match.
pub const DEFAULT_MIN_SCORE: f32 = 0.3;

/// Vectors per rayon shard in the scan.
const SHARD_SIZE: usize = 256;

/// A scored chunk match.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub doc_key: u64,
    pub ordinal: u32,
    pub score: f32,
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Rank stored chunks against a query vector.
///
/// Scans every stored vector in parallel shards, drops scores below
/// `min_score`, keeps only the best-scoring chunk per document, and
/// returns at most `top_k` hits sorted by score descending.
pub fn similarity_search(
    store: &IndexStore,
    query: &[f32],
    top_k: usize,
    min_score: f32,
) -> Result<Vec<ChunkHit>> {
    let documents = store.load_chunk_vectors()?;

    let entries: Vec<(u64, u32, Vec<f32>)> = documents
        .into_iter()
        .flat_map(|doc| {
            doc.vectors
                .into_iter()
                .enumerate()
                .map(move |(ordinal, vector)| {
                    (doc.key, ordinal as u32, vector)
                })
        })
        .collect();

    let scored: Vec<ChunkHit> = entries
        .par_chunks(SHARD_SIZE)
        .flat_map_iter(|shard| {
            shard.iter().filter_map(|(doc_key, ordinal, vector)| {
                if vector.len() != query.len() {
                    return None;
                }
                let score = dot(query, vector);
                (score >= min_score).then_some(ChunkHit {
                    doc_key: *doc_key,
                    ordinal: *ordinal,
                    score,
                })
            })
        })
        .collect();

    // One hit per document: keep the highest-scoring chunk.
    let mut best: HashMap<u64, ChunkHit> = HashMap::new();
    for hit in scored {
        match best.get(&hit.doc_key) {
            Some(existing) if existing.score >= hit.score => {}
            _ => {
                best.insert(hit.doc_key, hit);
            }
        }
    }

    let mut ranked: Vec<ChunkHit> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(top_k);

    Ok(ranked)
}
