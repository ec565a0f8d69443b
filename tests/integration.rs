//! End-to-end scenarios against an in-process `KnowledgeCore`. No network
//! calls: embeddings come from the `"disabled"` or `"hash"` providers (see
//! `knowledge_core::embedding::HashProvider`), and the one test that needs a
//! conflict decision supplies a local stub resolver rather than calling a
//! real chat endpoint.

use async_trait::async_trait;
use tempfile::tempdir;

use knowledge_core::config::KnowledgeConfig;
use knowledge_core::core::{DedupOutcome, KnowledgeCore};
use knowledge_core::reranker::{ConflictDecision, ConflictResolver};

fn disabled_config(dir: &std::path::Path) -> KnowledgeConfig {
    let mut config = KnowledgeConfig::default();
    config.data_root = dir.to_path_buf();
    config.embedding.provider = "disabled".to_string();
    config
}

fn hash_config(dir: &std::path::Path, dims: usize) -> KnowledgeConfig {
    let mut config = KnowledgeConfig::default();
    config.data_root = dir.to_path_buf();
    config.embedding.provider = "hash".to_string();
    config.embedding.dims = Some(dims);
    config
}

/// Scenario S1: ingest a handful of plain documents and confirm a query
/// surfaces the right one by lexical match alone.
#[tokio::test]
async fn s1_ingest_and_search_plain_documents() {
    let dir = tempdir().unwrap();
    let core = KnowledgeCore::new(disabled_config(dir.path())).unwrap();

    core.add_document("recipe.txt", "sourdough bread needs a active starter", Vec::new())
        .await
        .unwrap();
    core.add_document("manual.txt", "the router restarts when you hold reset for ten seconds", Vec::new())
        .await
        .unwrap();

    let results = core.search("starter", None, None, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].content.contains("starter"));
    assert_eq!(core.stats().document_count, 2);
}

/// Scenario S2: re-ingesting byte-identical content under a new filename is
/// rejected as a duplicate rather than silently re-indexed.
#[tokio::test]
async fn s2_duplicate_document_content_is_suppressed() {
    let dir = tempdir().unwrap();
    let core = KnowledgeCore::new(disabled_config(dir.path())).unwrap();

    core.add_document("v1.txt", "quarterly revenue grew 12 percent", Vec::new())
        .await
        .unwrap();
    let err = core
        .add_document("v2.txt", "quarterly revenue grew 12 percent", Vec::new())
        .await
        .unwrap_err();

    assert!(err
        .downcast_ref::<knowledge_core::KnowledgeError>()
        .map(|e| matches!(e, knowledge_core::KnowledgeError::Duplicate(_)))
        .unwrap_or(false));
    assert_eq!(core.stats().document_count, 1);
}

/// Scenario S3: an exact-hash repeat of a host memory is skipped even with
/// embeddings disabled, since the tier-1 content-hash check runs first.
#[tokio::test]
async fn s3_exact_duplicate_host_memory_short_circuits_before_embedding() {
    let dir = tempdir().unwrap();
    let core = KnowledgeCore::new(disabled_config(dir.path())).unwrap();
    core.set_password("hunter2").unwrap();

    let first = core
        .add_host_memory_smart("alice", "alice's favorite color is teal", Vec::new())
        .await
        .unwrap();
    let second = core
        .add_host_memory_smart("alice", "alice's favorite color is teal", Vec::new())
        .await
        .unwrap();

    assert!(matches!(first, DedupOutcome::Inserted(_)));
    assert!(matches!(second, DedupOutcome::SkippedDuplicate(_)));
    assert_eq!(core.list_documents().len(), 1);
}

/// A conflict resolver stubbed to always merge the two memories into the
/// newer wording, as if a chat model had decided this was an `update`.
struct StubUpdateResolver {
    merged: String,
}

#[async_trait]
impl ConflictResolver for StubUpdateResolver {
    async fn resolve(&self, _existing_text: &str, _new_text: &str, _similarity: f32) -> ConflictDecision {
        ConflictDecision::Update(self.merged.clone())
    }
}

/// Scenario S4: two host memories that share most of their vocabulary land
/// in the mid-similarity conflict band; the resolver's `update` decision
/// overwrites the existing memory with the merged wording rather than
/// inserting a second document.
#[tokio::test]
async fn s4_mid_similarity_host_memories_trigger_conflict_resolution() {
    let dir = tempdir().unwrap();
    let core = KnowledgeCore::new(hash_config(dir.path(), 64))
        .unwrap()
        .with_conflict_resolver(Box::new(StubUpdateResolver {
            merged: "the service listens on port 8080".to_string(),
        }));
    core.set_password("hunter2").unwrap();

    core.add_host_memory_smart("bob", "the service runs on port 8080", Vec::new())
        .await
        .unwrap();
    let outcome = core
        .add_host_memory_smart("bob", "the service listens on port 8080", Vec::new())
        .await
        .unwrap();

    match outcome {
        DedupOutcome::Updated(doc) => {
            assert_eq!(core.list_documents().len(), 1);
            let results = core.search("service", None, Some("bob".to_string()), None).await.unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].content, "the service listens on port 8080");
            assert_eq!(doc.host_id.as_deref(), Some("bob"));
        }
        other => panic!("expected an Updated outcome from the mid-similarity band, got {other:?}"),
    }
}

/// Scenario S5: host memories are stored as ciphertext on disk and only
/// decrypted on the way out through `search`.
#[tokio::test]
async fn s5_host_memory_is_encrypted_at_rest() {
    let dir = tempdir().unwrap();
    let core = KnowledgeCore::new(disabled_config(dir.path())).unwrap();
    core.set_password("hunter2").unwrap();

    core.add_host_memory("carol", "carol's passport number is private", Vec::new())
        .await
        .unwrap();

    // The indexed chunk's `content` field is the only place the full text
    // is stored verbatim; it must be ciphertext, not the plaintext phrase.
    let bm25_blob = std::fs::read_to_string(dir.path().join("bm25").join("index.bin")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&bm25_blob).unwrap();
    let contents: Vec<&str> = parsed["docs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["doc"]["content"].as_str().unwrap())
        .collect();
    assert!(!contents.is_empty());
    for content in contents {
        assert!(content.starts_with("ENC:v1:"));
        assert!(!content.contains("passport"));
    }

    let results = core.search("passport", None, Some("carol".to_string()), None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "carol's passport number is private");
}

/// Scenario S6: switching the embedding model to a different dimensionality
/// clears stale vectors rather than failing, and a subsequent re-embed of
/// existing documents restores semantic search under the new width.
#[tokio::test]
async fn s6_dimension_migration_between_tiers_reconciles_instead_of_failing() {
    let dir = tempdir().unwrap();
    let core = KnowledgeCore::new(hash_config(dir.path(), 32)).unwrap();

    let doc = core
        .add_document("a.txt", "the warehouse ships orders every weekday", Vec::new())
        .await
        .unwrap();
    assert_eq!(core.stats().vector_count, 1);

    // Switching to a wider hash width is a dimensionality change the store
    // must reconcile rather than error out on.
    core.switch_embedding_model("64").unwrap();
    assert_eq!(core.stats().vector_count, 0, "stale narrower vectors must be dropped on mismatch");

    // Lexical search still finds the document; vector search does not until
    // it is re-embedded under the new model.
    let results = core.search("warehouse", None, None, None).await.unwrap();
    assert_eq!(results.len(), 1);

    core.remove_document(&doc.id).unwrap();
    core.add_document("a.txt", "the warehouse ships orders every weekday", Vec::new())
        .await
        .unwrap();
    assert_eq!(core.stats().vector_count, 1);
    assert_eq!(core.stats().embedding_model, "hash");
}

/// Empty query plus a host id filter lists that host's memories rather than
/// returning an empty result set, enabling "show me everything you know
/// about this host" without a real query string.
#[tokio::test]
async fn empty_query_with_host_filter_lists_host_memory() {
    let dir = tempdir().unwrap();
    let core = KnowledgeCore::new(disabled_config(dir.path())).unwrap();
    core.set_password("hunter2").unwrap();

    core.add_host_memory("dana", "dana prefers email over chat", Vec::new()).await.unwrap();
    core.add_host_memory("dana", "dana is in the UTC-5 timezone", Vec::new()).await.unwrap();
    core.add_host_memory("erin", "erin's birthday is in March", Vec::new()).await.unwrap();

    let results = core.search("", None, Some("dana".to_string()), None).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.metadata.host_id.as_deref() == Some("dana")));
}

/// Export/import round-trips both plaintext documents and encrypted host
/// memories, and the restored store can decrypt and search them.
#[tokio::test]
async fn export_import_round_trips_encrypted_and_plain_content() {
    let dir = tempdir().unwrap();
    let core = KnowledgeCore::new(disabled_config(dir.path())).unwrap();
    core.set_password("hunter2").unwrap();

    core.add_document("notes.txt", "the launch window opens at dawn", Vec::new()).await.unwrap();
    core.add_host_memory("frank", "frank's api key rotates monthly", Vec::new()).await.unwrap();

    let export_dir = tempdir().unwrap();
    core.export(export_dir.path()).unwrap();

    let fresh_dir = tempdir().unwrap();
    let fresh = KnowledgeCore::new(disabled_config(fresh_dir.path())).unwrap();
    fresh.import(export_dir.path()).unwrap();

    let plain = fresh.search("launch", None, None, None).await.unwrap();
    assert_eq!(plain.len(), 1);

    fresh.unlock("hunter2").unwrap();
    let host = fresh.search("rotates", None, Some("frank".to_string()), None).await.unwrap();
    assert_eq!(host.len(), 1);
    assert_eq!(host[0].content, "frank's api key rotates monthly");
}
