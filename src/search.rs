//! Hybrid search: lexical (BM25) and dense (cosine) retrieval fused with
//! Reciprocal Rank Fusion (RRF).
//!
//! Each retrieval mode produces its own chunk-id ranking; RRF combines them
//! without needing the two scores to live on a comparable scale (unlike a
//! min-max-normalized weighted merge, a chunk that ranks first in one list
//! and is entirely absent from the other still surfaces near the top —
//! appropriate for a single-user index where either signal alone is often
//! reliable).
//!
//! # Algorithm
//!
//! 1. Fetch up to `2 * top_k` BM25 candidates per leg (lexical ranking).
//! 2. If embedding is enabled, embed the query and fetch up to `2 * top_k`
//!    vector candidates (cosine ranking).
//! 3. Fuse both ranked id lists via [`reciprocal_rank_fusion`]:
//!    `score(id) = Σ 1 / (rrf_k + rank)` over every list containing `id`.
//! 4. Look up each fused id's full record (content, offsets, metadata) from
//!    the BM25 index, which holds one entry per chunk regardless of
//!    whether embedding is enabled.
//!
//! The full fused candidate pool is returned untruncated — dedup (by
//! content prefix) and reranking run on the whole pool in `KnowledgeCore`,
//! which truncates to `top_k` only as its final step.

use std::collections::HashMap;

use anyhow::Result;

use crate::bm25::{Bm25Filter, Bm25Index};
use crate::embedding::EmbeddingService;
use crate::models::{ResultSource, SearchResult, SearchResultMetadata};
use crate::vector_store::{VectorFilter, VectorStore};

#[derive(Debug, Default, Clone)]
pub struct SearchFilter {
    pub host_id: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub rrf_k: f64,
    pub filter: SearchFilter,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            rrf_k: 60.0,
            filter: SearchFilter::default(),
        }
    }
}

/// Combine multiple ranked id lists (best match first) into one fused
/// ranking via Reciprocal Rank Fusion: `score += 1 / (k + rank)`, 1-indexed
/// rank, summed across every list the id appears in.
pub fn reciprocal_rank_fusion(ranked_lists: &[&[String]], k: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();

    for list in ranked_lists {
        for (i, id) in list.iter().enumerate() {
            let rank = (i + 1) as f64;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank);
        }
    }

    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

/// Run hybrid search over the BM25 and (if enabled) vector indexes.
///
/// An empty or whitespace-only query returns an empty result set, not an
/// error — unless a `hostId` filter is set, in which case it lists up to
/// `top_k` arbitrary chunks owned by that host (used to enumerate a host's
/// memories without a real query). `content` in returned results may still
/// be ciphertext for host-memory chunks — decryption is the caller's
/// (`KnowledgeCore`'s) responsibility, since only it holds the `Crypto`
/// handle.
pub async fn hybrid_search(
    bm25: &Bm25Index,
    vector_store: &VectorStore,
    embedding: &EmbeddingService,
    query: &str,
    opts: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    let bm25_filter = Bm25Filter {
        host_id: opts.filter.host_id.clone(),
        tag: opts.filter.tag.clone(),
    };

    if query.trim().is_empty() {
        if opts.filter.host_id.is_none() {
            return Ok(Vec::new());
        }
        // Empty query + hostId filter lists arbitrary chunks owned by that
        // host, used to enumerate host memory without a lexical/dense probe.
        let docs = bm25.list(&bm25_filter, opts.top_k);
        return Ok(docs
            .into_iter()
            .map(|doc| SearchResult {
                id: doc.id,
                doc_id: doc.doc_id,
                content: doc.content,
                score: 0.0,
                metadata: SearchResultMetadata {
                    filename: doc.filename,
                    host_id: doc.host_id,
                    tags: doc.tags,
                    start_offset: doc.start_offset,
                    end_offset: doc.end_offset,
                },
                source: ResultSource::Local,
            })
            .collect());
    }

    let candidate_k = opts.top_k * 2;
    let bm25_hits = bm25.search(query, candidate_k, &bm25_filter);

    let vector_hits = if embedding.is_enabled() && vector_store.is_ready() {
        let filter = VectorFilter {
            host_id: opts.filter.host_id.clone(),
            tag: opts.filter.tag.clone(),
        };
        match embedding.embed_single(query).await {
            Ok(query_vec) => vector_store.search(&query_vec, candidate_k, &filter),
            Err(e) => {
                eprintln!("warning: query embedding failed, falling back to lexical-only search: {e}");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    if bm25_hits.is_empty() && vector_hits.is_empty() {
        return Ok(Vec::new());
    }

    let bm25_ids: Vec<String> = bm25_hits.iter().map(|h| h.id.clone()).collect();
    let vector_ids: Vec<String> = vector_hits.iter().map(|h| h.chunk_id.clone()).collect();

    let fused = reciprocal_rank_fusion(&[&bm25_ids, &vector_ids], opts.rrf_k);

    // Untruncated: the caller dedups/reranks over the full fused pool and
    // truncates to `top_k` only as its last step (§4.8 steps 4-7).
    let mut results = Vec::with_capacity(fused.len());
    for (chunk_id, score) in fused.into_iter() {
        if let Some(doc) = bm25.get_by_id(&chunk_id) {
            results.push(SearchResult {
                id: doc.id,
                doc_id: doc.doc_id,
                content: doc.content,
                score,
                metadata: SearchResultMetadata {
                    filename: doc.filename,
                    host_id: doc.host_id,
                    tags: doc.tags,
                    start_offset: doc.start_offset,
                    end_offset: doc.end_offset,
                },
                source: ResultSource::Local,
            });
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fusion_favors_items_ranked_high_in_both_lists() {
        let a = ids(&["x", "y", "z"]);
        let b = ids(&["y", "x", "z"]);
        let fused = reciprocal_rank_fusion(&[&a, &b], 60.0);
        assert_eq!(fused[0].0, "x");
        assert_eq!(fused[1].0, "y");
    }

    #[test]
    fn fusion_includes_items_present_in_only_one_list() {
        let a = ids(&["x"]);
        let b: Vec<String> = Vec::new();
        let fused = reciprocal_rank_fusion(&[&a, &b], 60.0);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].0, "x");
    }

    #[test]
    fn fusion_score_matches_formula() {
        let a = ids(&["x"]);
        let fused = reciprocal_rank_fusion(&[&a], 60.0);
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_query_returns_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let bm25 = Bm25Index::new(dir.path());
        let vectors = VectorStore::new(dir.path());
        let embedding =
            EmbeddingService::new(crate::config::EmbeddingConfig::default()).unwrap();
        let results = hybrid_search(&bm25, &vectors, &embedding, "   ", &SearchOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn lexical_only_search_finds_bm25_matches_without_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let bm25 = Bm25Index::new(dir.path());
        bm25.add_documents(vec![crate::models::BM25Doc {
            id: "c1".to_string(),
            doc_id: "d1".to_string(),
            content: "the quick brown fox".to_string(),
            filename: "f.txt".to_string(),
            host_id: None,
            tags: Vec::new(),
            start_offset: 0,
            end_offset: 19,
        }])
        .unwrap();
        let vectors = VectorStore::new(dir.path());
        let embedding =
            EmbeddingService::new(crate::config::EmbeddingConfig::default()).unwrap();

        let results = hybrid_search(&bm25, &vectors, &embedding, "fox", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "d1");
    }
}
