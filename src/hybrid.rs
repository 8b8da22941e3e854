//! Hybrid query coordination: semantic and keyword arms run concurrently
//! and merge into one ranked, deduplicated result list.
//!
//! Fusion policy: semantic hits come first in score order. Keyword hits are
//! appended only for notes the semantic pass did not return, carrying a
//! fixed default score below the semantic minimum so a keyword match never
//! displaces a semantic match for the same note. A note found by both arms
//! keeps its semantic score and is tagged accordingly.

use std::collections::HashMap;

use serde::Serialize;

use crate::{
    embedder::Embedder,
    error::{Error, Result},
    lexical::{LexicalIndex, LexicalMatch},
    similarity::{self, ChunkHit},
    snippet,
    store::IndexStore,
};

pub const DEFAULT_RESULT_LIMIT: usize = 10;

/// Score assigned to keyword-only matches at fusion time.
pub const DEFAULT_KEYWORD_SCORE: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Semantic,
    Keyword,
    Both,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Both => "both",
        }
    }
}

/// A fused search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub note_id: String,
    pub title: String,
    pub file_name: String,
    pub path: String,
    pub snippet: String,
    pub score: f32,
    pub kind: MatchKind,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Minimum semantic similarity score.
    pub min_score: f32,
    /// Skip the semantic arm entirely.
    pub keyword_only: bool,
    /// Allow Levenshtein-1 prefix matching in the keyword arm.
    pub fuzzy: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RESULT_LIMIT,
            min_score: similarity::DEFAULT_MIN_SCORE,
            keyword_only: false,
            fuzzy: false,
        }
    }
}

/// Run the hybrid query and return at most `opts.limit` fused results.
///
/// The two arms run concurrently. An unavailable embedding engine degrades
/// the semantic arm to an empty set; keyword results still come back.
pub fn search(
    query: &str,
    opts: &SearchOptions,
    store: &IndexStore,
    lexical: &LexicalIndex,
    embedder: &Embedder,
) -> Result<Vec<SearchResult>> {
    let (semantic, keyword) = rayon::join(
        || semantic_hits(query, opts, store, embedder),
        || lexical.search(query, opts.limit * 2, opts.fuzzy),
    );

    fuse(semantic?, keyword?, store, query, opts.limit)
}

fn semantic_hits(
    query: &str,
    opts: &SearchOptions,
    store: &IndexStore,
    embedder: &Embedder,
) -> Result<Vec<ChunkHit>> {
    if opts.keyword_only {
        return Ok(Vec::new());
    }

    let query_vector = match embedder.embed(query) {
        Ok(vector) => vector,
        Err(Error::EmbeddingUnavailable(reason)) => {
            tracing::debug!(%reason, "semantic arm degraded to empty");
            return Ok(Vec::new());
        }
        Err(Error::Model(reason)) => {
            tracing::warn!(%reason, "encoder failed, semantic arm degraded");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    similarity::similarity_search(
        store,
        &query_vector,
        opts.limit,
        opts.min_score,
    )
}

fn fuse(
    semantic: Vec<ChunkHit>,
    keyword: Vec<LexicalMatch>,
    store: &IndexStore,
    query: &str,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let mut results: Vec<SearchResult> = Vec::new();
    let mut by_key: HashMap<u64, usize> = HashMap::new();

    for hit in semantic {
        let Some(record) = store.get_document(hit.doc_key)? else {
            continue;
        };
        let snippet = store
            .chunk_text(hit.doc_key, hit.ordinal)?
            .or_else(|| snippet::extract_snippet(&record.body, query))
            .unwrap_or_default();

        by_key.insert(hit.doc_key, results.len());
        results.push(SearchResult {
            note_id: record.id,
            title: record.title,
            file_name: record.file_name,
            path: record.path,
            snippet,
            score: hit.score,
            kind: MatchKind::Semantic,
        });
    }

    for keyword_match in keyword {
        if let Some(&index) = by_key.get(&keyword_match.note_key) {
            results[index].kind = MatchKind::Both;
            continue;
        }
        let Some(record) = store.get_document(keyword_match.note_key)? else {
            tracing::debug!(
                key = keyword_match.note_key,
                "keyword match without a stored record"
            );
            continue;
        };
        let snippet = snippet::extract_snippet(&record.body, query)
            .unwrap_or_default();

        by_key.insert(keyword_match.note_key, results.len());
        results.push(SearchResult {
            note_id: record.id,
            title: record.title,
            file_name: record.file_name,
            path: record.path,
            snippet,
            score: DEFAULT_KEYWORD_SCORE,
            kind: MatchKind::Keyword,
        });
    }

    results.truncate(limit);
    Ok(results)
}
