//! `KnowledgeCore` (C8): the orchestrator that wires chunking, embedding,
//! the two indexes, document metadata, and the optional LLM collaborators
//! into the operations a caller actually invokes.
//!
//! Every mutating operation follows the same order: index mutations first
//! (BM25, then vectors), document metadata last via [`DocumentIndex::put`].
//! `DocumentIndex::put` is the only one of the three that persists
//! synchronously, so a crash between steps leaves at worst an orphaned
//! index entry (cleaned up by [`KnowledgeCore::reconcile`] on next start),
//! never a `Document` pointing at missing chunks.

use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::bm25::Bm25Index;
use crate::chunk::{self, ChunkOptions, ChunkStrategy};
use crate::config::KnowledgeConfig;
use crate::crypto::Crypto;
use crate::document_index::DocumentIndex;
use crate::embedding::EmbeddingService;
use crate::error::KnowledgeError;
use crate::models::{BM25Doc, Document, SearchResult, FILE_TYPE_FILE, FILE_TYPE_HOST_MEMORY, TAG_HOST_MEMORY};
use crate::remote::{DisabledRemoteSearch, RemoteSearch};
use crate::reranker::{ConflictDecision, ConflictResolver, DisabledConflictResolver, DisabledReranker, Reranker};
use crate::search::{hybrid_search, SearchFilter, SearchOptions};
use crate::vector_store::{VectorFilter, VectorRecord, VectorStore};

/// Cosine similarity at or above this is treated as the same fact (tier 1
/// if the hash doesn't already match, otherwise redundant with it).
const DEDUP_EXACT_SIMILARITY: f32 = 0.95;
/// Cosine similarity below this is not considered a near-duplicate at all.
const DEDUP_CONFLICT_FLOOR: f32 = 0.75;

/// Outcome of [`KnowledgeCore::add_host_memory_smart`].
#[derive(Debug, Clone)]
pub enum DedupOutcome {
    /// No conflicting memory existed; stored as a new document.
    Inserted(Document),
    /// An exact-hash or near-identical (cosine >= 0.95) memory already
    /// existed; the new text was discarded.
    SkippedDuplicate(Document),
    /// A near-duplicate (cosine in [0.75, 0.95)) existed and the conflict
    /// resolver chose `update`: the existing document's content was
    /// overwritten in place.
    Updated(Document),
    /// The conflict resolver chose `replace`: the old document was deleted
    /// and the new text stored as a fresh document.
    Replaced { old_id: String, new: Document },
    /// The conflict resolver chose `keep_both`.
    KeptBoth(Document),
}

impl DedupOutcome {
    pub fn document(&self) -> &Document {
        match self {
            DedupOutcome::Inserted(d)
            | DedupOutcome::SkippedDuplicate(d)
            | DedupOutcome::Updated(d)
            | DedupOutcome::KeptBoth(d) => d,
            DedupOutcome::Replaced { new, .. } => new,
        }
    }
}

pub struct KnowledgeCore {
    config: KnowledgeConfig,
    crypto: Crypto,
    embedding: RwLock<EmbeddingService>,
    vector_store: VectorStore,
    bm25: Bm25Index,
    documents: DocumentIndex,
    reranker: Box<dyn Reranker>,
    conflict_resolver: Box<dyn ConflictResolver>,
    remote_search: Box<dyn RemoteSearch>,
}

impl KnowledgeCore {
    /// Construct and run startup reconciliation (§4 of the design: load
    /// persisted state, detect a stale vector dimensionality, report but
    /// never panic on a recoverable inconsistency).
    pub fn new(config: KnowledgeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_root)
            .with_context(|| format!("creating data root {}", config.data_root.display()))?;

        let crypto = Crypto::new(&config.data_root, config.crypto.persist_to_keychain);
        let embedding = EmbeddingService::new(config.embedding.clone())?;
        let vector_store = VectorStore::new(&config.data_root);
        let bm25 = Bm25Index::new(&config.data_root);
        let documents = DocumentIndex::new(&config.data_root);

        let core = Self {
            config,
            crypto,
            embedding: RwLock::new(embedding),
            vector_store,
            bm25,
            documents,
            reranker: Box::new(DisabledReranker),
            conflict_resolver: Box::new(DisabledConflictResolver),
            remote_search: Box::new(DisabledRemoteSearch),
        };
        core.reconcile()?;
        Ok(core)
    }

    /// Inject a real LLM reranker/conflict-resolver. Builder-style: returns
    /// `self` so callers chain it onto `new`.
    pub fn with_reranker(mut self, reranker: Box<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn with_conflict_resolver(mut self, resolver: Box<dyn ConflictResolver>) -> Self {
        self.conflict_resolver = resolver;
        self
    }

    /// Inject a companion-server search adapter (§6). Only takes effect if
    /// `retrieval.mcp_server_id` is also set — an injected adapter with no
    /// configured id is simply never called.
    pub fn with_remote_search(mut self, remote_search: Box<dyn RemoteSearch>) -> Self {
        self.remote_search = remote_search;
        self
    }

    pub fn crypto(&self) -> &Crypto {
        &self.crypto
    }

    /// Load persisted document/BM25/vector state and reconcile the vector
    /// store's dimensionality against the active embedding model. A
    /// mismatch (e.g. after `switch_model` or a config change) drops the
    /// stale vectors rather than failing startup — search falls back to
    /// lexical-only until documents are re-embedded.
    fn reconcile(&self) -> Result<()> {
        self.documents.load()?;
        self.bm25.initialize()?;

        let dims = self.embedding.read().unwrap().dimensions();
        match self.vector_store.initialize(dims) {
            Ok(()) => {}
            Err(e) => match e.downcast_ref::<KnowledgeError>() {
                Some(KnowledgeError::DimensionMismatch { expected, found }) => {
                    eprintln!(
                        "warning: vector store had {found}-dim vectors, active model produces \
                         {expected}; cleared stale vectors, search will be lexical-only until \
                         documents are re-embedded"
                    );
                }
                _ => return Err(e),
            },
        }
        Ok(())
    }

    fn chunk_options(&self) -> Result<ChunkOptions> {
        let strategy: ChunkStrategy = self.config.chunking.strategy.parse()?;
        let embedding = self.embedding.read().unwrap();
        let max_chunk_chars = if embedding.is_enabled() {
            embedding.max_tokens()
        } else {
            self.config.chunking.max_chunk_chars
        };
        Ok(ChunkOptions {
            strategy,
            max_chunk_chars,
            overlap_chars: self.config.chunking.overlap_chars,
        })
    }

    /// Ingest an ordinary file's plaintext content. Duplicate content
    /// (matched by content hash) is reported as `KnowledgeError::Duplicate`
    /// rather than silently re-indexed.
    pub async fn add_document(
        &self,
        filename: &str,
        content: &str,
        tags: Vec<String>,
    ) -> Result<Document> {
        let content_hash = hash_content(content);
        if let Some(existing) = self.documents.find_by_hash(&content_hash) {
            return Err(anyhow::Error::new(KnowledgeError::Duplicate(existing.id)));
        }

        let doc_id = uuid::Uuid::new_v4().to_string();
        let chunk_opts = self.chunk_options()?;
        let chunks = chunk::chunk(content, &chunk_opts);

        let bm25_docs: Vec<BM25Doc> = chunks
            .iter()
            .map(|c| BM25Doc {
                id: chunk_id(&doc_id, c.chunk_index),
                doc_id: doc_id.clone(),
                content: c.content.clone(),
                filename: filename.to_string(),
                host_id: None,
                tags: tags.clone(),
                start_offset: c.start_offset,
                end_offset: c.end_offset,
            })
            .collect();
        self.bm25.add_documents(bm25_docs)?;

        self.embed_and_store(&doc_id, None, &tags, &chunks).await?;

        let now = now_unix();
        let doc = Document {
            id: doc_id,
            filename: filename.to_string(),
            file_type: FILE_TYPE_FILE.to_string(),
            file_size: content.len() as u64,
            content_hash,
            host_id: None,
            tags,
            created_at: now,
            updated_at: now,
            chunk_count: chunks.len(),
            extra: Default::default(),
        };
        self.documents.put(doc.clone())?;
        Ok(doc)
    }

    async fn embed_and_store(
        &self,
        doc_id: &str,
        host_id: Option<&str>,
        tags: &[String],
        chunks: &[crate::models::ChunkWithoutVector],
    ) -> Result<()> {
        let enabled = self.embedding.read().unwrap().is_enabled();
        if !enabled || chunks.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedding.read().unwrap().embed(&texts).await?;
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors.into_iter())
            .map(|(c, vector)| VectorRecord {
                chunk_id: chunk_id(doc_id, c.chunk_index),
                doc_id: doc_id.to_string(),
                vector,
                host_id: host_id.map(|h| h.to_string()),
                tags: tags.to_vec(),
            })
            .collect();
        self.vector_store.add_records(records)?;
        Ok(())
    }

    pub fn remove_document(&self, doc_id: &str) -> Result<()> {
        self.bm25.remove_by_doc_id(doc_id)?;
        self.vector_store.remove_by_doc_id(doc_id)?;
        self.documents.delete(doc_id)?;
        Ok(())
    }

    /// Hybrid search (§4.8): RRF-fuse lexical and (if enabled) vector
    /// candidates, merge in the remote-search collaborator's results (if
    /// configured), deduplicate near-identical content, optionally rerank,
    /// then decrypt any host-memory ciphertext before returning.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        host_id: Option<String>,
        tag: Option<String>,
    ) -> Result<Vec<SearchResult>> {
        let top_k = top_k.unwrap_or(self.config.retrieval.search_top_k.max(1) as usize);
        let opts = SearchOptions {
            top_k,
            rrf_k: self.config.retrieval.rrf_k,
            filter: SearchFilter { host_id, tag },
        };

        let embedding = self.embedding.read().unwrap();
        let mut results = hybrid_search(&self.bm25, &self.vector_store, &embedding, query, &opts).await?;
        drop(embedding);

        if self.config.retrieval.mcp_server_id.is_some() {
            let remote_results = self.remote_search.search(query, opts.top_k).await;
            results.extend(remote_results);
        }

        dedup_by_content_prefix(&mut results);

        let mut results = if self.config.retrieval.enable_rerank {
            self.reranker.rerank(query, results, top_k).await
        } else {
            results.truncate(top_k);
            results
        };

        for result in &mut results {
            if Crypto::is_encrypted(&result.content) {
                match self.crypto.decrypt(&result.content) {
                    Ok(plaintext) => result.content = plaintext,
                    Err(e) => {
                        eprintln!(
                            "warning: failed to decrypt search result {} ({e}), leaving ciphertext in place",
                            result.id
                        );
                    }
                }
            }
        }

        Ok(results)
    }

    /// Insert a host memory unconditionally (no dedup check). Used by
    /// `add_host_memory_smart` once it has decided a fresh insert is
    /// warranted, and directly by callers that want to bypass dedup.
    pub async fn add_host_memory(&self, host_id: &str, text: &str, mut tags: Vec<String>) -> Result<Document> {
        if !tags.iter().any(|t| t == TAG_HOST_MEMORY) {
            tags.push(TAG_HOST_MEMORY.to_string());
        }

        let content_hash = hash_content(text);
        let doc_id = uuid::Uuid::new_v4().to_string();
        let filename = format!("host-memory/{host_id}/{doc_id}.txt");

        let chunk_opts = self.chunk_options()?;
        let chunks = chunk::chunk(text, &chunk_opts);

        // Each chunk is encrypted independently so a decrypted SearchResult
        // carries only that chunk's span, not the whole memory's text.
        for c in &chunks {
            let ciphertext = self.crypto.encrypt(&c.content)?;
            let doc = BM25Doc {
                id: chunk_id(&doc_id, c.chunk_index),
                doc_id: doc_id.clone(),
                content: ciphertext,
                filename: filename.clone(),
                host_id: Some(host_id.to_string()),
                tags: tags.clone(),
                start_offset: c.start_offset,
                end_offset: c.end_offset,
            };
            self.bm25.add_encrypted_document(doc, &c.content)?;
        }

        self.embed_and_store(&doc_id, Some(host_id), &tags, &chunks).await?;

        let now = now_unix();
        let doc = Document {
            id: doc_id,
            filename,
            file_type: FILE_TYPE_HOST_MEMORY.to_string(),
            file_size: text.len() as u64,
            content_hash,
            host_id: Some(host_id.to_string()),
            tags,
            created_at: now,
            updated_at: now,
            chunk_count: chunks.len(),
            extra: Default::default(),
        };
        self.documents.put(doc.clone())?;
        Ok(doc)
    }

    /// Overwrite an existing host memory's content in place (tier-3
    /// `update` outcome): re-chunk, re-index, and re-embed the new text
    /// under the same document id, then drop the stale index entries.
    pub async fn update_memory(&self, doc_id: &str, new_text: &str) -> Result<Document> {
        let mut existing = self
            .documents
            .get(doc_id)
            .ok_or_else(|| anyhow::anyhow!("no document with id {doc_id}"))?;

        self.bm25.remove_by_doc_id(doc_id)?;
        self.vector_store.remove_by_doc_id(doc_id)?;

        let chunk_opts = self.chunk_options()?;
        let chunks = chunk::chunk(new_text, &chunk_opts);

        // Each chunk is encrypted independently, same as `add_host_memory`,
        // so a decrypted SearchResult carries only that chunk's span.
        for c in &chunks {
            let ciphertext = self.crypto.encrypt(&c.content)?;
            let doc = BM25Doc {
                id: chunk_id(doc_id, c.chunk_index),
                doc_id: doc_id.to_string(),
                content: ciphertext,
                filename: existing.filename.clone(),
                host_id: existing.host_id.clone(),
                tags: existing.tags.clone(),
                start_offset: c.start_offset,
                end_offset: c.end_offset,
            };
            self.bm25.add_encrypted_document(doc, &c.content)?;
        }
        self.embed_and_store(doc_id, existing.host_id.as_deref(), &existing.tags, &chunks)
            .await?;

        existing.content_hash = hash_content(new_text);
        existing.file_size = new_text.len() as u64;
        existing.chunk_count = chunks.len();
        existing.updated_at = now_unix();
        self.documents.put(existing.clone())?;
        Ok(existing)
    }

    /// Three-tier dedup insert for host memories (§ memory dedup policy):
    ///
    /// 1. **Exact**: a document with the same content hash already exists
    ///    under this host id → skip, return the existing document.
    /// 2. **Near-identical** (cosine >= 0.95): the new text is functionally
    ///    the same fact as an existing memory → skip.
    /// 3. **Ambiguous** (cosine in [0.75, 0.95)): ask the conflict resolver
    ///    to decide `skip`/`update`/`replace`/`keep_both`.
    ///
    /// Below 0.75 (or with embedding disabled, where only the hash check
    /// applies) the memory is inserted as new.
    pub async fn add_host_memory_smart(
        &self,
        host_id: &str,
        text: &str,
        tags: Vec<String>,
    ) -> Result<DedupOutcome> {
        let content_hash = hash_content(text);
        if let Some(existing) = self
            .documents
            .by_host(host_id)
            .into_iter()
            .find(|d| d.content_hash == content_hash)
        {
            return Ok(DedupOutcome::SkippedDuplicate(existing));
        }

        let embedding_enabled = self.embedding.read().unwrap().is_enabled();
        if !embedding_enabled {
            let doc = self.add_host_memory(host_id, text, tags).await?;
            return Ok(DedupOutcome::Inserted(doc));
        }

        let query_vec = self.embedding.read().unwrap().embed_single(text).await?;
        let filter = VectorFilter {
            host_id: Some(host_id.to_string()),
            tag: None,
        };
        let nearest = self.vector_store.search(&query_vec, 1, &filter);

        let Some(top) = nearest.first() else {
            let doc = self.add_host_memory(host_id, text, tags).await?;
            return Ok(DedupOutcome::Inserted(doc));
        };

        if top.score >= DEDUP_EXACT_SIMILARITY {
            let existing = self
                .documents
                .get(&top.doc_id)
                .ok_or_else(|| anyhow::anyhow!("dangling vector record for doc {}", top.doc_id))?;
            return Ok(DedupOutcome::SkippedDuplicate(existing));
        }

        if top.score < DEDUP_CONFLICT_FLOOR {
            let doc = self.add_host_memory(host_id, text, tags).await?;
            return Ok(DedupOutcome::Inserted(doc));
        }

        let existing = self
            .documents
            .get(&top.doc_id)
            .ok_or_else(|| anyhow::anyhow!("dangling vector record for doc {}", top.doc_id))?;
        let existing_plaintext = self.read_host_memory_text(&existing)?;

        match self.conflict_resolver.resolve(&existing_plaintext, text, top.score).await {
            ConflictDecision::Skip => Ok(DedupOutcome::SkippedDuplicate(existing)),
            ConflictDecision::Update(merged) => {
                let updated = self.update_memory(&existing.id, &merged).await?;
                Ok(DedupOutcome::Updated(updated))
            }
            ConflictDecision::Replace => {
                let old_id = existing.id.clone();
                self.remove_document(&old_id)?;
                let new_doc = self.add_host_memory(host_id, text, tags).await?;
                Ok(DedupOutcome::Replaced { old_id, new: new_doc })
            }
            ConflictDecision::KeepBoth => {
                let doc = self.add_host_memory(host_id, text, tags).await?;
                Ok(DedupOutcome::KeptBoth(doc))
            }
        }
    }

    /// Decrypt a host-memory document's full plaintext by decrypting and
    /// concatenating every one of its BM25-indexed chunks in order — each
    /// chunk's ciphertext covers only that chunk's own span, so a single
    /// chunk is only the whole memory when the memory fit in one chunk.
    fn read_host_memory_text(&self, doc: &Document) -> Result<String> {
        let mut text = String::new();
        let mut found_any = false;
        for chunk_index in 0..doc.chunk_count.max(1) {
            if let Some(indexed) = self.bm25.get_by_id(&chunk_id(&doc.id, chunk_index)) {
                text.push_str(&self.crypto.decrypt(&indexed.content)?);
                found_any = true;
            }
        }
        if !found_any {
            anyhow::bail!("no indexed chunks found for host memory {}", doc.id);
        }
        Ok(text)
    }

    /// Set the password for the first time.
    pub fn set_password(&self, password: &str) -> Result<()> {
        self.crypto.set_password(password)
    }

    pub fn unlock(&self, password: &str) -> Result<()> {
        self.crypto.unlock(password)
    }

    /// Re-key every host-memory ciphertext in the BM25 index, atomically:
    /// nothing is committed until every blob has been decrypted with the
    /// old key and re-encrypted with the new one.
    pub fn change_password(&self, old: &str, new: &str) -> Result<usize> {
        let host_docs: Vec<Document> = self.documents.list().into_iter().filter(|d| d.is_host_memory()).collect();

        let mut chunk_ids = Vec::new();
        let mut blobs = Vec::new();
        for doc in &host_docs {
            for chunk_index in 0..doc.chunk_count.max(1) {
                let id = chunk_id(&doc.id, chunk_index);
                if let Some(indexed) = self.bm25.get_by_id(&id) {
                    chunk_ids.push(id);
                    blobs.push(indexed.content);
                }
            }
        }

        let restaged = self.crypto.change_password(old, new, &blobs)?;

        for (id, ciphertext) in chunk_ids.into_iter().zip(restaged.into_iter()) {
            self.bm25.update_content(&id, ciphertext)?;
        }
        self.bm25.flush()?;
        Ok(host_docs.len())
    }

    pub fn switch_embedding_model(&self, model_id: &str) -> Result<()> {
        let mut embedding = self.embedding.write().unwrap();
        embedding.switch_model(model_id)?;
        let dims = embedding.dimensions();
        drop(embedding);
        if let Err(e) = self.vector_store.initialize(dims) {
            if let Some(KnowledgeError::DimensionMismatch { .. }) = e.downcast_ref::<KnowledgeError>() {
                eprintln!("warning: switched to a model with different dimensionality; existing vectors cleared, re-embed documents to restore semantic search");
            } else {
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn document(&self, id: &str) -> Option<Document> {
        self.documents.get(id)
    }

    pub fn list_documents(&self) -> Vec<Document> {
        self.documents.list()
    }

    pub fn stats(&self) -> CoreStats {
        let bm25_stats = self.bm25.stats();
        let vector_stats = self.vector_store.stats();
        CoreStats {
            document_count: self.documents.count(),
            chunk_count: bm25_stats.doc_count,
            vector_count: vector_stats.record_count,
            embedding_enabled: self.embedding.read().unwrap().is_enabled(),
            embedding_model: self.embedding.read().unwrap().current_model().to_string(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.config.data_root
    }

    /// Snapshot the on-disk store into `dest`: `documents.json`, the
    /// `vectors/` directory, the `bm25/` index, a `settings.toml` snapshot
    /// of the active config, and `.password`/`.salt` if a password is set.
    /// Everything is flushed first so the snapshot reflects the latest
    /// in-memory state, not just the last debounced write.
    pub fn export(&self, dest: &Path) -> Result<()> {
        self.documents.save()?;
        self.bm25.flush()?;
        self.vector_store.flush()?;

        std::fs::create_dir_all(dest)
            .with_context(|| format!("creating export directory {}", dest.display()))?;

        copy_file(&self.config.data_root.join("documents.json"), &dest.join("documents.json"))?;
        copy_dir_if_present(&self.config.data_root.join("vectors"), &dest.join("vectors"))?;
        copy_dir_if_present(&self.config.data_root.join("bm25"), &dest.join("bm25"))?;
        copy_file_if_present(&self.config.data_root.join(".password"), &dest.join(".password"))?;
        copy_file_if_present(&self.config.data_root.join(".salt"), &dest.join(".salt"))?;

        let settings_toml = toml::to_string_pretty(&self.config)
            .with_context(|| "serializing settings snapshot")?;
        std::fs::write(dest.join("settings.toml"), settings_toml)
            .with_context(|| format!("writing {}", dest.join("settings.toml").display()))?;

        Ok(())
    }

    /// Restore a store previously written by [`KnowledgeCore::export`],
    /// overwriting this instance's on-disk state. Order matters: the
    /// password/salt files land first so the imported ciphertexts are
    /// immediately decryptable, then the vector directory is replaced
    /// wholesale, then the document catalog, and finally every in-memory
    /// index is reloaded from the new files.
    pub fn import(&self, src: &Path) -> Result<()> {
        copy_file_if_present(&src.join(".password"), &self.config.data_root.join(".password"))?;
        copy_file_if_present(&src.join(".salt"), &self.config.data_root.join(".salt"))?;

        let vectors_dest = self.config.data_root.join("vectors");
        if vectors_dest.exists() {
            std::fs::remove_dir_all(&vectors_dest)
                .with_context(|| format!("clearing {}", vectors_dest.display()))?;
        }
        copy_dir_if_present(&src.join("vectors"), &vectors_dest)?;
        copy_dir_if_present(&src.join("bm25"), &self.config.data_root.join("bm25"))?;
        copy_file(&src.join("documents.json"), &self.config.data_root.join("documents.json"))?;

        self.documents.load()?;
        self.bm25.initialize()?;
        let dims = self.embedding.read().unwrap().dimensions();
        match self.vector_store.initialize(dims) {
            Ok(()) => {}
            Err(e) => match e.downcast_ref::<KnowledgeError>() {
                Some(KnowledgeError::DimensionMismatch { expected, found }) => {
                    eprintln!(
                        "warning: imported vectors had {found} dims, active model produces \
                         {expected}; cleared, re-embed documents to restore semantic search"
                    );
                }
                _ => return Err(e),
            },
        }
        Ok(())
    }
}

fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    std::fs::copy(src, dest)
        .with_context(|| format!("copying {} to {}", src.display(), dest.display()))?;
    Ok(())
}

fn copy_file_if_present(src: &Path, dest: &Path) -> Result<()> {
    if src.exists() {
        copy_file(src, dest)?;
    }
    Ok(())
}

fn copy_dir_if_present(src: &Path, dest: &Path) -> Result<()> {
    if !src.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dest)
        .with_context(|| format!("creating {}", dest.display()))?;
    for entry in std::fs::read_dir(src).with_context(|| format!("reading {}", src.display()))? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if path.is_dir() {
            copy_dir_if_present(&path, &dest_path)?;
        } else {
            copy_file(&path, &dest_path)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub vector_count: usize,
    pub embedding_enabled: bool,
    pub embedding_model: String,
}

/// Suppress near-duplicates that slipped through fusion (§4.8 step 4):
/// keep only the first occurrence of each distinct first-100-characters
/// prefix of trimmed content. Order-preserving, so it runs after fusion
/// (and any remote merge) but before rerank sees the candidate list.
fn dedup_by_content_prefix(results: &mut Vec<SearchResult>) {
    let mut seen = std::collections::HashSet::new();
    results.retain(|r| {
        let prefix: String = r.content.trim().chars().take(100).collect();
        seen.insert(prefix)
    });
}

fn chunk_id(doc_id: &str, chunk_index: usize) -> String {
    format!("{doc_id}:{chunk_index}")
}

fn hash_content(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..16])
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &Path) -> KnowledgeConfig {
        let mut config = KnowledgeConfig::default();
        config.data_root = dir.to_path_buf();
        config.embedding.provider = "disabled".to_string();
        config
    }

    #[tokio::test]
    async fn add_and_search_plain_document() {
        let dir = tempdir().unwrap();
        let core = KnowledgeCore::new(test_config(dir.path())).unwrap();
        core.add_document("notes.txt", "the quick brown fox jumps", Vec::new())
            .await
            .unwrap();

        let results = core.search("fox", None, None, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("fox"));
    }

    #[tokio::test]
    async fn duplicate_document_is_rejected() {
        let dir = tempdir().unwrap();
        let core = KnowledgeCore::new(test_config(dir.path())).unwrap();
        core.add_document("a.txt", "same content", Vec::new()).await.unwrap();
        let err = core.add_document("b.txt", "same content", Vec::new()).await.unwrap_err();
        let knowledge_err = err.downcast_ref::<KnowledgeError>().unwrap();
        assert!(matches!(knowledge_err, KnowledgeError::Duplicate(_)));
    }

    #[tokio::test]
    async fn remove_document_drops_it_from_search() {
        let dir = tempdir().unwrap();
        let core = KnowledgeCore::new(test_config(dir.path())).unwrap();
        let doc = core.add_document("a.txt", "unique zebra content", Vec::new()).await.unwrap();
        core.remove_document(&doc.id).unwrap();
        let results = core.search("zebra", None, None, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn host_memory_round_trips_through_encryption() {
        let dir = tempdir().unwrap();
        let core = KnowledgeCore::new(test_config(dir.path())).unwrap();
        core.set_password("hunter2").unwrap();

        core.add_host_memory("alice", "alice prefers dark roast coffee", Vec::new())
            .await
            .unwrap();

        let results = core.search("coffee", None, Some("alice".to_string()), None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "alice prefers dark roast coffee");
    }

    #[tokio::test]
    async fn exact_duplicate_host_memory_is_skipped() {
        let dir = tempdir().unwrap();
        let core = KnowledgeCore::new(test_config(dir.path())).unwrap();
        core.set_password("hunter2").unwrap();

        core.add_host_memory_smart("alice", "alice likes tea", Vec::new()).await.unwrap();
        let outcome = core
            .add_host_memory_smart("alice", "alice likes tea", Vec::new())
            .await
            .unwrap();
        assert!(matches!(outcome, DedupOutcome::SkippedDuplicate(_)));
        assert_eq!(core.list_documents().len(), 1);
    }

    #[tokio::test]
    async fn change_password_reencrypts_host_memories() {
        let dir = tempdir().unwrap();
        let core = KnowledgeCore::new(test_config(dir.path())).unwrap();
        core.set_password("old-pw").unwrap();
        core.add_host_memory("alice", "alice's secret note", Vec::new()).await.unwrap();

        let count = core.change_password("old-pw", "new-pw").unwrap();
        assert_eq!(count, 1);

        let results = core.search("secret", None, None, None).await.unwrap();
        assert_eq!(results[0].content, "alice's secret note");
    }

    #[tokio::test]
    async fn export_then_import_preserves_search_results() {
        let dir = tempdir().unwrap();
        let core = KnowledgeCore::new(test_config(dir.path())).unwrap();
        core.add_document("a.txt", "unique walrus content", Vec::new()).await.unwrap();

        let export_dir = tempdir().unwrap();
        core.export(export_dir.path()).unwrap();

        let fresh_dir = tempdir().unwrap();
        let fresh = KnowledgeCore::new(test_config(fresh_dir.path())).unwrap();
        fresh.import(export_dir.path()).unwrap();

        let results = fresh.search("walrus", None, None, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(fresh.stats().document_count, 1);
    }

    #[test]
    fn dedup_by_content_prefix_keeps_first_occurrence() {
        let long_content = "a".repeat(150);
        let mut results = vec![
            search_result("c1", &long_content, 1.0),
            search_result("c2", &long_content, 0.5),
            search_result("c3", "totally different text", 0.9),
        ];
        dedup_by_content_prefix(&mut results);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "c1");
        assert_eq!(results[1].id, "c3");
    }

    #[tokio::test]
    async fn remote_search_results_merge_in_when_configured() {
        use crate::models::{ResultSource, SearchResultMetadata};
        use crate::remote::RemoteSearch;
        use async_trait::async_trait;

        struct StubRemote;
        #[async_trait]
        impl RemoteSearch for StubRemote {
            async fn search(&self, _query: &str, _limit: usize) -> Vec<SearchResult> {
                vec![SearchResult {
                    id: "remote-1".to_string(),
                    doc_id: "remote-doc".to_string(),
                    content: "a remote hit about zebras".to_string(),
                    score: 1.0,
                    metadata: SearchResultMetadata {
                        filename: "remote".to_string(),
                        host_id: None,
                        tags: Vec::new(),
                        start_offset: 0,
                        end_offset: 0,
                    },
                    source: ResultSource::Remote,
                }]
            }
        }

        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.retrieval.mcp_server_id = Some("companion".to_string());
        let core = KnowledgeCore::new(config).unwrap().with_remote_search(Box::new(StubRemote));

        core.add_document("a.txt", "local zebra fact", Vec::new()).await.unwrap();
        let results = core.search("zebra", None, None, None).await.unwrap();

        assert!(results.iter().any(|r| r.source == ResultSource::Remote));
        assert!(results.iter().any(|r| r.source == ResultSource::Local));
    }

    fn search_result(id: &str, content: &str, score: f64) -> SearchResult {
        use crate::models::{ResultSource, SearchResultMetadata};
        SearchResult {
            id: id.to_string(),
            doc_id: id.to_string(),
            content: content.to_string(),
            score,
            metadata: SearchResultMetadata {
                filename: "f.txt".to_string(),
                host_id: None,
                tags: Vec::new(),
                start_offset: 0,
                end_offset: content.len(),
            },
            source: ResultSource::Local,
        }
    }
}
