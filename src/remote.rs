//! The remote-search collaborator (§6): an optional companion-server
//! adapter that `search` fans a query out to alongside the local BM25/vector
//! legs. Out of scope per the purpose statement — only its contract is
//! named here — so this module is a narrow capability trait plus a
//! `DisabledRemoteSearch` null object, the same shape as [`crate::reranker`].
//!
//! Results the adapter returns are tagged `source = Remote` and merged into
//! the candidate pool before dedup/rerank (`KnowledgeCore::search`).
//! Failures are swallowed: local results still return (`RemoteFailure`,
//! never fatal).

use async_trait::async_trait;

use crate::models::SearchResult;

/// A companion-server search adapter, identified by `mcpServerId` in
/// [`crate::config::KnowledgeConfig`].
#[async_trait]
pub trait RemoteSearch: Send + Sync {
    /// Run `query` against the remote collaborator. Returns an empty vec
    /// (never an error to the caller) on any failure — `KnowledgeCore`
    /// logs and swallows it, per §6/§7 `RemoteFailure`.
    async fn search(&self, query: &str, limit: usize) -> Vec<SearchResult>;
}

/// Used when no `mcpServerId` is configured. `search` never has to branch
/// on "is a remote adapter present."
pub struct DisabledRemoteSearch;

#[async_trait]
impl RemoteSearch for DisabledRemoteSearch {
    async fn search(&self, _query: &str, _limit: usize) -> Vec<SearchResult> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_remote_search_returns_nothing() {
        let adapter = DisabledRemoteSearch;
        assert!(adapter.search("anything", 10).await.is_empty());
    }
}
