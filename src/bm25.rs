//! Lexical (BM25) index over chunk text (C5).
//!
//! Scoring follows the standard Okapi BM25 formula with `k1 = 1.5`,
//! `b = 0.75`. Tokenization is case-folded and CJK-aware: runs of CJK
//! codepoints are emitted as both unigrams and bigrams (since CJK text has
//! no whitespace word boundaries), while everything else is split on
//! Unicode word boundaries via `unicode-segmentation`. No stemming, no
//! stopword removal — matching a single-user local index where recall
//! matters more than precision tuning.
//!
//! Persists to a single file (`bm25/index.bin`) using the same debounced
//! write strategy as [`crate::vector_store::VectorStore`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::atomic::write_atomic;
use crate::models::BM25Doc;

const K1: f32 = 1.5;
const B: f32 = 0.75;
const COMPACT_DELETE_THRESHOLD: usize = 10;
const COMPACT_INTERVAL: Duration = Duration::from_secs(300);
const FILE_VERSION: u32 = 1;

/// Tokenize `text` for indexing or querying.
///
/// Non-CJK runs are split on Unicode word boundaries and lowercased; CJK
/// runs (Han, Hiragana, Katakana, Hangul) are emitted as both 1-grams and
/// 2-grams over their codepoints, since whitespace tokenization does not
/// apply to those scripts.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cjk_run: Vec<char> = Vec::new();

    let flush_cjk = |run: &mut Vec<char>, tokens: &mut Vec<String>| {
        if run.is_empty() {
            return;
        }
        for c in run.iter() {
            tokens.push(c.to_string());
        }
        for w in run.windows(2) {
            tokens.push(w.iter().collect());
        }
        run.clear();
    };

    for word in text.split_word_bounds() {
        if word.chars().all(is_cjk) && !word.trim().is_empty() {
            cjk_run.extend(word.chars());
            continue;
        }
        flush_cjk(&mut cjk_run, &mut tokens);

        let lowered = word.to_lowercase();
        let trimmed = lowered.trim();
        if trimmed.is_empty() || !trimmed.chars().any(|c| c.is_alphanumeric()) {
            continue;
        }
        tokens.push(trimmed.to_string());
    }
    flush_cjk(&mut cjk_run, &mut tokens);

    tokens
}

fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x2E80..=0x2FDF   // CJK radicals / Kangxi radicals
        | 0x3040..=0x30FF // Hiragana / Katakana
        | 0x3400..=0x4DBF // CJK extension A
        | 0x4E00..=0x9FFF // CJK unified ideographs
        | 0xAC00..=0xD7A3 // Hangul syllables
        | 0xF900..=0xFAFF // CJK compatibility ideographs
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedDoc {
    doc: BM25Doc,
    term_counts: HashMap<String, u32>,
    token_count: usize,
}

#[derive(Serialize, Deserialize)]
struct Bm25File {
    version: u32,
    docs: Vec<IndexedDoc>,
}

#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub id: String,
    pub doc_id: String,
    pub score: f32,
}

#[derive(Debug, Default, Clone)]
pub struct Bm25Filter {
    pub host_id: Option<String>,
    pub tag: Option<String>,
}

impl Bm25Filter {
    fn matches(&self, doc: &BM25Doc) -> bool {
        if let Some(host_id) = &self.host_id {
            if let Some(doc_host) = &doc.host_id {
                if doc_host != host_id {
                    return false;
                }
            }
        }
        if let Some(tag) = &self.tag {
            if !doc.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Bm25Stats {
    pub doc_count: usize,
    pub avg_doc_len: f32,
}

pub struct Bm25Index {
    path: PathBuf,
    docs: RwLock<Vec<IndexedDoc>>,
    dirty_mutations: RwLock<usize>,
    last_persist: RwLock<Instant>,
}

impl Bm25Index {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            path: data_root.as_ref().join("bm25").join("index.bin"),
            docs: RwLock::new(Vec::new()),
            dirty_mutations: RwLock::new(0),
            last_persist: RwLock::new(Instant::now()),
        }
    }

    pub fn is_ready(&self) -> bool {
        true
    }

    pub fn initialize(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let file: Bm25File =
            serde_json::from_slice(&bytes).with_context(|| "parsing BM25 index file")?;
        *self.docs.write().unwrap() = file.docs;
        Ok(())
    }

    pub fn add_documents(&self, docs: Vec<BM25Doc>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        {
            let mut stored = self.docs.write().unwrap();
            for doc in docs {
                let tokens = tokenize(&doc.content);
                let mut term_counts = HashMap::new();
                for t in &tokens {
                    *term_counts.entry(t.clone()).or_insert(0) += 1;
                }
                stored.retain(|d| d.doc.id != doc.id);
                stored.push(IndexedDoc {
                    token_count: tokens.len(),
                    term_counts,
                    doc,
                });
            }
        }
        self.mark_dirty(1)?;
        Ok(())
    }

    /// Like [`Bm25Index::add_documents`], but tokenizes `plaintext` instead
    /// of `doc.content` — used for host-memory chunks, whose `content` is
    /// ciphertext (encrypted at rest) while remaining lexically searchable
    /// on the plaintext that was encrypted.
    pub fn add_encrypted_document(&self, doc: BM25Doc, plaintext: &str) -> Result<()> {
        let tokens = tokenize(plaintext);
        let mut term_counts = HashMap::new();
        for t in &tokens {
            *term_counts.entry(t.clone()).or_insert(0) += 1;
        }
        {
            let mut stored = self.docs.write().unwrap();
            stored.retain(|d| d.doc.id != doc.id);
            stored.push(IndexedDoc {
                token_count: tokens.len(),
                term_counts,
                doc,
            });
        }
        self.mark_dirty(1)?;
        Ok(())
    }

    /// Overwrite a chunk's stored `content` (e.g. re-encrypted ciphertext
    /// after a password change) without re-tokenizing — the indexed terms
    /// still reflect the same underlying plaintext, only the wire
    /// ciphertext changed.
    pub fn update_content(&self, id: &str, new_content: String) -> Result<()> {
        let found = {
            let mut stored = self.docs.write().unwrap();
            match stored.iter_mut().find(|d| d.doc.id == id) {
                Some(indexed) => {
                    indexed.doc.content = new_content;
                    true
                }
                None => false,
            }
        };
        if found {
            self.mark_dirty(1)?;
        }
        Ok(())
    }

    /// Look up a single indexed chunk's full record by its chunk id, for
    /// building a [`crate::models::SearchResult`] after fusion has picked
    /// which ids matter.
    pub fn get_by_id(&self, id: &str) -> Option<BM25Doc> {
        self.docs
            .read()
            .unwrap()
            .iter()
            .find(|d| d.doc.id == id)
            .map(|d| d.doc.clone())
    }

    /// Arbitrary (unranked) documents matching `filter`, for the empty-query
    /// "list what this host owns" boundary case — no tokenization, no scoring.
    pub fn list(&self, filter: &Bm25Filter, limit: usize) -> Vec<BM25Doc> {
        self.docs
            .read()
            .unwrap()
            .iter()
            .filter(|d| filter.matches(&d.doc))
            .take(limit)
            .map(|d| d.doc.clone())
            .collect()
    }

    pub fn remove_by_doc_id(&self, doc_id: &str) -> Result<usize> {
        let removed = {
            let mut stored = self.docs.write().unwrap();
            let before = stored.len();
            stored.retain(|d| d.doc.doc_id != doc_id);
            before - stored.len()
        };
        if removed > 0 {
            self.mark_dirty(removed)?;
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        self.docs.write().unwrap().clear();
        self.flush()
    }

    pub fn stats(&self) -> Bm25Stats {
        let docs = self.docs.read().unwrap();
        let doc_count = docs.len();
        let avg_doc_len = if doc_count == 0 {
            0.0
        } else {
            docs.iter().map(|d| d.token_count as f32).sum::<f32>() / doc_count as f32
        };
        Bm25Stats {
            doc_count,
            avg_doc_len,
        }
    }

    /// Score all indexed docs against `query` via Okapi BM25, highest first,
    /// truncated to `limit`.
    pub fn search(&self, query: &str, limit: usize, filter: &Bm25Filter) -> Vec<Bm25Hit> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let docs = self.docs.read().unwrap();
        let doc_count = docs.len();
        if doc_count == 0 {
            return Vec::new();
        }
        let avg_doc_len: f32 =
            docs.iter().map(|d| d.token_count as f32).sum::<f32>() / doc_count as f32;

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for term in &query_terms {
            let df = docs
                .iter()
                .filter(|d| d.term_counts.contains_key(term))
                .count();
            doc_freq.insert(term.as_str(), df);
        }

        let mut hits: Vec<Bm25Hit> = docs
            .iter()
            .filter(|d| filter.matches(&d.doc))
            .filter_map(|d| {
                let score = bm25_score(&query_terms, d, doc_count, avg_doc_len, &doc_freq);
                if score > 0.0 {
                    Some(Bm25Hit {
                        id: d.doc.id.clone(),
                        doc_id: d.doc.doc_id.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
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

    pub fn flush(&self) -> Result<()> {
        let docs = self.docs.read().unwrap().clone();
        let file = Bm25File {
            version: FILE_VERSION,
            docs,
        };
        let bytes = serde_json::to_vec(&file)?;
        write_atomic(&self.path, &bytes)?;
        *self.dirty_mutations.write().unwrap() = 0;
        *self.last_persist.write().unwrap() = Instant::now();
        Ok(())
    }
}

fn bm25_score(
    query_terms: &[String],
    doc: &IndexedDoc,
    doc_count: usize,
    avg_doc_len: f32,
    doc_freq: &HashMap<&str, usize>,
) -> f32 {
    let doc_len = doc.token_count as f32;
    let mut score = 0.0f32;

    for term in query_terms {
        let freq = *doc.term_counts.get(term).unwrap_or(&0) as f32;
        if freq == 0.0 {
            continue;
        }
        let df = *doc_freq.get(term.as_str()).unwrap_or(&0) as f32;
        let idf = (((doc_count as f32 - df + 0.5) / (df + 0.5)) + 1.0).ln();
        let numer = freq * (K1 + 1.0);
        let denom = freq + K1 * (1.0 - B + B * (doc_len / avg_doc_len.max(1.0)));
        score += idf * (numer / denom);
    }

    score
}
