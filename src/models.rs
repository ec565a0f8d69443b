//! Core data types shared across components: [`Document`], [`Chunk`],
//! [`BM25Doc`], and the [`SearchResult`] value type returned to callers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `fileType` tag recognized on a [`Document`].
pub const FILE_TYPE_FILE: &str = "file";
/// `fileType` tag for an encrypted host memory.
pub const FILE_TYPE_HOST_MEMORY: &str = "host-memory";
/// Tag auto-attached to every host-memory document.
pub const TAG_HOST_MEMORY: &str = "host-memory";

/// An ingested unit of knowledge.
///
/// Unknown fields round-trip through `extra` so a newer writer's fields
/// survive being loaded and re-saved by this version (forward
/// compatibility for the `DocumentIndex` file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    /// 128-bit hex digest of the plaintext content (SHA-256 truncated to 16 bytes).
    pub content_hash: String,
    pub host_id: Option<String>,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub chunk_count: usize,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Document {
    pub fn is_host_memory(&self) -> bool {
        self.file_type == FILE_TYPE_HOST_MEMORY
    }
}

/// A retrieval unit belonging to a [`Document`].
///
/// `content` is plaintext for ordinary files and ciphertext (`ENC:v1:...`)
/// for host-memory documents; the `vector` is always computed from
/// plaintext regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub vector: Vec<f32>,
    pub start_offset: usize,
    pub end_offset: usize,
    pub filename: String,
    pub host_id: Option<String>,
    pub tags: Vec<String>,
}

/// A chunk produced by the [`crate::chunk`] module before embedding.
#[derive(Debug, Clone)]
pub struct ChunkWithoutVector {
    pub chunk_index: usize,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Lexical-index mirror of a [`Chunk`], owned by the BM25Index.
///
/// Every chunk is BM25-indexed regardless of whether embedding is enabled,
/// so `BM25Doc` carries the full metadata needed to build a [`SearchResult`]
/// on its own — the search pipeline looks content up here after RRF fusion
/// rather than maintaining a third, separate chunk-content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BM25Doc {
    pub id: String,
    pub doc_id: String,
    pub content: String,
    pub filename: String,
    pub host_id: Option<String>,
    pub tags: Vec<String>,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Where a [`SearchResult`] was retrieved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Local,
    Remote,
}

/// Metadata attached to a [`SearchResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultMetadata {
    pub filename: String,
    pub host_id: Option<String>,
    pub tags: Vec<String>,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// A single hit returned by `KnowledgeCore::search`.
///
/// Content is always plaintext from the caller's perspective — encrypted
/// chunks are decrypted before being wrapped here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub doc_id: String,
    pub content: String,
    pub score: f64,
    pub metadata: SearchResultMetadata,
    pub source: ResultSource,
}
