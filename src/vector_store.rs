//! Dense vector index over chunk embeddings (C4).
//!
//! Brute-force cosine similarity over an in-memory `Vec`, the same shape as
//! the old in-memory `Store`'s vector table, persisted to a single JSON file
//! under `vectors/index.json`. Writes are debounced: a mutation marks the
//! store dirty, and [`VectorStore::maybe_persist`] only hits disk once 10
//! mutations have accumulated or 300s have elapsed since the last write,
//! with [`VectorStore::flush`] forcing one immediately (call at shutdown).
//!
//! Dimension mismatch between the active embedding model and the stored
//! vectors (e.g. after `switch_model`) is detected at [`VectorStore::initialize`]
//! and surfaces as [`KnowledgeError::DimensionMismatch`]; the caller decides
//! whether to drop and rebuild.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::embedding::cosine_similarity;
use crate::error::KnowledgeError;

const COMPACT_DELETE_THRESHOLD: usize = 10;
const COMPACT_INTERVAL: Duration = Duration::from_secs(300);
const FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub vector: Vec<f32>,
    pub host_id: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub score: f32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VectorStoreStats {
    pub record_count: usize,
    pub dims: Option<usize>,
}

/// Optional filter applied to `search`/`get_by_doc_id`-style queries.
#[derive(Debug, Default, Clone)]
pub struct VectorFilter {
    pub host_id: Option<String>,
    pub tag: Option<String>,
}

impl VectorFilter {
    fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(host_id) = &self.host_id {
            if let Some(record_host) = &record.host_id {
                if record_host != host_id {
                    return false;
                }
            }
        }
        if let Some(tag) = &self.tag {
            if !record.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

#[derive(Serialize, Deserialize)]
struct VectorFile {
    version: u32,
    dims: Option<usize>,
    records: Vec<VectorRecord>,
}

pub struct VectorStore {
    path: PathBuf,
    dims: RwLock<Option<usize>>,
    records: RwLock<Vec<VectorRecord>>,
    dirty_mutations: RwLock<usize>,
    last_persist: RwLock<Instant>,
}

impl VectorStore {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            path: data_root.as_ref().join("vectors").join("index.json"),
            dims: RwLock::new(None),
            records: RwLock::new(Vec::new()),
            dirty_mutations: RwLock::new(0),
            last_persist: RwLock::new(Instant::now()),
        }
    }

    /// Load persisted records, if any, and reconcile `expected_dims` against
    /// what's on disk. A mismatch drops the stale vectors (caller must
    /// re-embed and re-add) but leaves the file alone until the next write.
    pub fn initialize(&self, expected_dims: usize) -> Result<()> {
        if !self.path.exists() {
            *self.dims.write().unwrap() = Some(expected_dims);
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let file: VectorFile =
            serde_json::from_str(&content).with_context(|| "parsing vector store file")?;

        match file.dims {
            Some(found) if found != expected_dims => {
                *self.dims.write().unwrap() = Some(expected_dims);
                *self.records.write().unwrap() = Vec::new();
                return Err(anyhow::Error::new(KnowledgeError::DimensionMismatch {
                    expected: expected_dims,
                    found,
                }));
            }
            _ => {
                *self.dims.write().unwrap() = Some(expected_dims);
                *self.records.write().unwrap() = file.records;
            }
        }

        Ok(())
    }

    pub fn dims(&self) -> Option<usize> {
        *self.dims.read().unwrap()
    }

    pub fn is_ready(&self) -> bool {
        self.dims.read().unwrap().is_some()
    }

    /// Insert or replace records by `chunk_id`.
    pub fn add_records(&self, batch: Vec<VectorRecord>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        {
            let mut records = self.records.write().unwrap();
            for record in batch {
                records.retain(|r| r.chunk_id != record.chunk_id);
                records.push(record);
            }
        }
        self.mark_dirty(1)?;
        Ok(())
    }

    pub fn remove_by_chunk_id(&self, chunk_id: &str) -> Result<()> {
        let removed = {
            let mut records = self.records.write().unwrap();
            let before = records.len();
            records.retain(|r| r.chunk_id != chunk_id);
            before != records.len()
        };
        if removed {
            self.mark_dirty(1)?;
        }
        Ok(())
    }

    pub fn remove_by_doc_id(&self, doc_id: &str) -> Result<usize> {
        let removed = {
            let mut records = self.records.write().unwrap();
            let before = records.len();
            records.retain(|r| r.doc_id != doc_id);
            before - records.len()
        };
        if removed > 0 {
            self.mark_dirty(removed)?;
        }
        Ok(removed)
    }

    pub fn get_by_doc_id(&self, doc_id: &str) -> Vec<VectorRecord> {
        self.records
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.doc_id == doc_id)
            .cloned()
            .collect()
    }

    /// Brute-force cosine similarity search against `query_vec`, highest
    /// score first, truncated to `limit`.
    pub fn search(&self, query_vec: &[f32], limit: usize, filter: &VectorFilter) -> Vec<VectorHit> {
        let records = self.records.read().unwrap();
        let mut hits: Vec<VectorHit> = records
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| VectorHit {
                chunk_id: r.chunk_id.clone(),
                doc_id: r.doc_id.clone(),
                score: cosine_similarity(query_vec, &r.vector),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
    }

    pub fn stats(&self) -> VectorStoreStats {
        VectorStoreStats {
            record_count: self.records.read().unwrap().len(),
            dims: *self.dims.read().unwrap(),
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.records.write().unwrap().clear();
        self.flush()
    }

    fn mark_dirty(&self, n: usize) -> Result<()> {
        let should_persist = {
            let mut count = self.dirty_mutations.write().unwrap();
            *count += n;
            *count >= COMPACT_DELETE_THRESHOLD
                || self.last_persist.read().unwrap().elapsed() >= COMPACT_INTERVAL
        };
        if should_persist {
            self.flush()?;
        }
        Ok(())
    }

    /// Force an immediate write to disk, resetting the debounce counters.
    pub fn flush(&self) -> Result<()> {
        let dims = *self.dims.read().unwrap();
        let records = self.records.read().unwrap().clone();
        let file = VectorFile {
            version: FILE_VERSION,
            dims,
            records,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &bytes)?;
        *self.dirty_mutations.write().unwrap() = 0;
        *self.last_persist.write().unwrap() = Instant::now();
        Ok(())
    }

    /// Explicit compaction: identical to `flush` today since deletions are
    /// applied to the in-memory `Vec` immediately. Exposed separately so
    /// callers (and the CLI `stats`/maintenance path) don't need to know
    /// that compaction and persistence currently share an implementation.
    pub fn compact(&self) -> Result<()> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(chunk_id: &str, doc_id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            chunk_id: chunk_id.to_string(),
            doc_id: doc_id.to_string(),
            vector,
            host_id: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn initialize_on_fresh_dir_sets_dims() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(dir.path());
        store.initialize(3).unwrap();
        assert_eq!(store.dims(), Some(3));
    }

    #[test]
    fn add_and_search_returns_best_match_first() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(dir.path());
        store.initialize(2).unwrap();
        store
            .add_records(vec![
                record("c1", "d1", vec![1.0, 0.0]),
                record("c2", "d1", vec![0.0, 1.0]),
            ])
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 2, &VectorFilter::default());
        assert_eq!(hits[0].chunk_id, "c1");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn remove_by_doc_id_drops_all_its_chunks() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(dir.path());
        store.initialize(2).unwrap();
        store
            .add_records(vec![
                record("c1", "d1", vec![1.0, 0.0]),
                record("c2", "d1", vec![0.0, 1.0]),
                record("c3", "d2", vec![1.0, 1.0]),
            ])
            .unwrap();

        let removed = store.remove_by_doc_id("d1").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.get_by_doc_id("d1").len(), 0);
        assert_eq!(store.get_by_doc_id("d2").len(), 1);
    }

    #[test]
    fn persists_and_reloads_across_instances() {
        let dir = tempdir().unwrap();
        {
            let store = VectorStore::new(dir.path());
            store.initialize(2).unwrap();
            store.add_records(vec![record("c1", "d1", vec![1.0, 0.0])]).unwrap();
            store.flush().unwrap();
        }
        let reopened = VectorStore::new(dir.path());
        reopened.initialize(2).unwrap();
        assert_eq!(reopened.stats().record_count, 1);
    }

    #[test]
    fn dimension_mismatch_is_reported_and_clears_records() {
        let dir = tempdir().unwrap();
        {
            let store = VectorStore::new(dir.path());
            store.initialize(2).unwrap();
            store.add_records(vec![record("c1", "d1", vec![1.0, 0.0])]).unwrap();
            store.flush().unwrap();
        }
        let reopened = VectorStore::new(dir.path());
        let err = reopened.initialize(5).unwrap_err();
        let knowledge_err = err.downcast_ref::<KnowledgeError>().unwrap();
        matches!(knowledge_err, KnowledgeError::DimensionMismatch { .. });
        assert_eq!(reopened.stats().record_count, 0);
    }

    #[test]
    fn filter_by_host_id_restricts_results() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(dir.path());
        store.initialize(2).unwrap();
        let mut r1 = record("c1", "d1", vec![1.0, 0.0]);
        r1.host_id = Some("alice".to_string());
        let mut r2 = record("c2", "d2", vec![1.0, 0.0]);
        r2.host_id = Some("bob".to_string());
        store.add_records(vec![r1, r2]).unwrap();

        let filter = VectorFilter {
            host_id: Some("alice".to_string()),
            tag: None,
        };
        let hits = store.search(&[1.0, 0.0], 10, &filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }
}
