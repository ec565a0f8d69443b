//! Document metadata catalog (C7): single-writer, shared-reader access to
//! the `documents.json` file that records every ingested [`Document`]
//! (ordinary files and host memories alike).
//!
//! Persists as one versioned JSON envelope, written atomically via
//! [`crate::atomic::write_atomic`] on every mutation — unlike the
//! debounced `VectorStore`/`Bm25Index`, document metadata changes are rare
//! enough (one per `addDocument`/`removeDocument` call) that batching
//! would only add staleness risk for no real throughput benefit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::models::Document;

const FILE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct DocumentFile {
    version: u32,
    last_updated: i64,
    documents: Vec<Document>,
}

pub struct DocumentIndex {
    path: PathBuf,
    documents: RwLock<HashMap<String, Document>>,
}

impl DocumentIndex {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            path: data_root.as_ref().join("documents.json"),
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Load the catalog from disk. A missing file is treated as an empty
    /// catalog (first run), not an error.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let file: DocumentFile =
            serde_json::from_str(&content).with_context(|| "parsing document index file")?;

        let mut documents = self.documents.write().unwrap();
        documents.clear();
        for doc in file.documents {
            documents.insert(doc.id.clone(), doc);
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let documents = self.documents.read().unwrap();
        let mut docs: Vec<Document> = documents.values().cloned().collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        let file = DocumentFile {
            version: FILE_VERSION,
            last_updated: now_unix(),
            documents: docs,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &bytes)
    }

    pub fn put(&self, doc: Document) -> Result<()> {
        self.documents.write().unwrap().insert(doc.id.clone(), doc);
        self.save()
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.documents.read().unwrap().get(id).cloned()
    }

    pub fn delete(&self, id: &str) -> Result<Option<Document>> {
        let removed = self.documents.write().unwrap().remove(id);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn find_by_hash(&self, content_hash: &str) -> Option<Document> {
        self.documents
            .read()
            .unwrap()
            .values()
            .find(|d| d.content_hash == content_hash)
            .cloned()
    }

    pub fn list(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self.documents.read().unwrap().values().cloned().collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        docs
    }

    pub fn by_host(&self, host_id: &str) -> Vec<Document> {
        self.documents
            .read()
            .unwrap()
            .values()
            .filter(|d| d.host_id.as_deref() == Some(host_id))
            .cloned()
            .collect()
    }

    pub fn by_tag(&self, tag: &str) -> Vec<Document> {
        self.documents
            .read()
            .unwrap()
            .values()
            .filter(|d| d.tags.iter().any(|t| t == tag))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.documents.read().unwrap().len()
    }
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
    use std::collections::HashMap as StdHashMap;
    use tempfile::tempdir;

    fn doc(id: &str, content_hash: &str) -> Document {
        Document {
            id: id.to_string(),
            filename: format!("{id}.txt"),
            file_type: "file".to_string(),
            file_size: 10,
            content_hash: content_hash.to_string(),
            host_id: None,
            tags: Vec::new(),
            created_at: 0,
            updated_at: 0,
            chunk_count: 1,
            extra: StdHashMap::new(),
        }
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let index = DocumentIndex::new(dir.path());
        index.load().unwrap();
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let index = DocumentIndex::new(dir.path());
        index.put(doc("d1", "hash1")).unwrap();
        assert!(index.get("d1").is_some());
    }

    #[test]
    fn find_by_hash_locates_duplicate() {
        let dir = tempdir().unwrap();
        let index = DocumentIndex::new(dir.path());
        index.put(doc("d1", "hash1")).unwrap();
        assert!(index.find_by_hash("hash1").is_some());
        assert!(index.find_by_hash("nope").is_none());
    }

    #[test]
    fn delete_removes_and_persists() {
        let dir = tempdir().unwrap();
        let index = DocumentIndex::new(dir.path());
        index.put(doc("d1", "hash1")).unwrap();
        let removed = index.delete("d1").unwrap();
        assert!(removed.is_some());
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn persists_and_reloads_across_instances() {
        let dir = tempdir().unwrap();
        {
            let index = DocumentIndex::new(dir.path());
            index.put(doc("d1", "hash1")).unwrap();
        }
        let reopened = DocumentIndex::new(dir.path());
        reopened.load().unwrap();
        assert_eq!(reopened.count(), 1);
    }

    #[test]
    fn by_host_and_by_tag_filter_correctly() {
        let dir = tempdir().unwrap();
        let index = DocumentIndex::new(dir.path());
        let mut d1 = doc("d1", "h1");
        d1.host_id = Some("alice".to_string());
        d1.tags = vec!["work".to_string()];
        let d2 = doc("d2", "h2");
        index.put(d1).unwrap();
        index.put(d2).unwrap();

        assert_eq!(index.by_host("alice").len(), 1);
        assert_eq!(index.by_tag("work").len(), 1);
        assert_eq!(index.by_host("bob").len(), 0);
    }
}
