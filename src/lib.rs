//! # Knowledge Core
//!
//! Embedded hybrid-search engine for a terminal assistant's local knowledge
//! base: chunking, dense + lexical indexing fused by Reciprocal Rank Fusion,
//! optional LLM reranking, and encrypted host-memory storage with a
//! three-tier dedup policy.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────────────┐   ┌─────────────┐
//! │  chunk   │──▶│ embed   │──▶│ VectorStore   │   │  BM25Index  │
//! │ (§chunk) │   │(§embed) │   │   (cosine)    │   │  (lexical)  │
//! └──────────┘   └─────────┘   └───────┬───────┘   └──────┬──────┘
//!                                      │                  │
//!                                      └───────┬──────────┘
//!                                              ▼
//!                                      ┌──────────────┐
//!                                      │ RRF fusion   │
//!                                      │  (§search)   │
//!                                      └──────┬───────┘
//!                                             ▼
//!                                      ┌──────────────┐
//!                                      │ Reranker?    │
//!                                      │ (optional)   │
//!                                      └──────────────┘
//! ```
//!
//! [`core::KnowledgeCore`] is the single entry point a host application
//! drives: `add_document`, `search`, `add_host_memory_smart`, and the
//! password/model-lifecycle operations. It owns:
//!
//! - [`document_index::DocumentIndex`] — the authoritative catalog of
//!   ingested documents, persisted as one JSON file.
//! - [`vector_store::VectorStore`] and [`bm25::Bm25Index`] — the two
//!   retrieval legs; [`search::hybrid_search`] fuses their rankings.
//! - [`embedding::EmbeddingService`] — a pluggable local (fastembed/tract)
//!   or remote (OpenAI, Ollama) embedding provider.
//! - [`crypto::Crypto`] — password-derived AES-256-GCM encryption of
//!   host-memory payloads, transparent to search (content is decrypted
//!   before a [`models::SearchResult`] is returned).
//! - Optional [`reranker::Reranker`] / [`reranker::ConflictResolver`]
//!   collaborators, each with a `Disabled*` null-object default so the core
//!   never branches on "is an LLM configured."
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration loading and validation |
//! | [`models`] | Core data types: `Document`, `Chunk`, `BM25Doc`, `SearchResult` |
//! | [`chunk`] | Fixed/paragraph/semantic text chunking |
//! | [`embedding`] | Embedding provider trait and local/remote implementations |
//! | [`vector_store`] | Persisted dense vector index with cosine search |
//! | [`bm25`] | Persisted inverted index with CJK-aware tokenization |
//! | [`search`] | Hybrid search: RRF fusion of the two retrieval legs |
//! | [`reranker`] | Optional LLM reranker and host-memory conflict resolver |
//! | [`remote`] | Optional companion-server search adapter |
//! | [`document_index`] | Document metadata catalog |
//! | [`crypto`] | Password-derived encryption for host-memory payloads |
//! | [`atomic`] | Atomic (temp + fsync + rename) file writes |
//! | [`error`] | The `KnowledgeError` taxonomy |
//! | [`core`] | `KnowledgeCore`: the orchestrator tying everything together |
//!
//! ## Configuration
//!
//! The core is configured via a TOML file (default: `config/knowledge.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules. [`config::KnowledgeConfig::default()`] is always
//! constructible without a file.

pub mod atomic;
pub mod bm25;
pub mod chunk;
pub mod config;
pub mod core;
pub mod crypto;
pub mod document_index;
pub mod embedding;
pub mod error;
pub mod models;
pub mod remote;
pub mod reranker;
pub mod search;
pub mod vector_store;

pub use crate::core::{CoreStats, DedupOutcome, KnowledgeCore};
pub use crate::error::KnowledgeError;
pub use crate::models::{Document, SearchResult};
