//! External chat-completion collaborators: the optional LLM [`Reranker`]
//! (C6) and the host-memory [`ConflictResolver`] used by the three-tier
//! dedup policy.
//!
//! Both are narrow traits with a `Disabled*` null-object implementation, so
//! `KnowledgeCore` never has to special-case "no LLM configured" — it just
//! injects the disabled variant. Both concrete implementations call an
//! OpenAI-compatible `/v1/chat/completions` endpoint using the same
//! reqwest-with-retry shape as [`crate::embedding::OpenAIProvider`], and are
//! fail-open: a network error, non-2xx response, or unparsable reply never
//! fails the caller's operation — it just falls back to the no-op behavior
//! (skip reranking; `keep_both` for conflicts).

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::models::SearchResult;

/// Reorders and rescorees a candidate list without changing its contents.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
        top_k: usize,
    ) -> Vec<SearchResult>;
}

/// No-op reranker: returns the first `top_k` candidates unchanged, in the
/// order they arrived (already RRF-fused). Used when `enable_rerank` is
/// false or no chat-completion endpoint is configured.
pub struct DisabledReranker;

#[async_trait]
impl Reranker for DisabledReranker {
    async fn rerank(
        &self,
        _query: &str,
        candidates: Vec<SearchResult>,
        top_k: usize,
    ) -> Vec<SearchResult> {
        let mut candidates = candidates;
        candidates.truncate(top_k);
        candidates
    }
}

/// Calls an OpenAI-compatible chat-completion endpoint to reorder
/// candidates by relevance. Requires `OPENAI_API_KEY`.
pub struct ChatCompletionReranker {
    url: String,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl ChatCompletionReranker {
    pub fn new(model: String, url: Option<String>, timeout_secs: u64, max_retries: u32) -> Self {
        Self {
            url: url.unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            model,
            timeout_secs,
            max_retries,
        }
    }
}

#[async_trait]
impl Reranker for ChatCompletionReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
        top_k: usize,
    ) -> Vec<SearchResult> {
        match self.try_rerank(query, &candidates).await {
            Ok(order) if order.len() == candidates.len() => {
                let mut reordered: Vec<SearchResult> = order
                    .into_iter()
                    .filter_map(|i| candidates.get(i).cloned())
                    .collect();
                reordered.truncate(top_k);
                reordered
            }
            _ => {
                eprintln!("warning: rerank call failed or returned malformed order, keeping original ranking");
                let mut candidates = candidates;
                candidates.truncate(top_k);
                candidates
            }
        }
    }
}

impl ChatCompletionReranker {
    async fn try_rerank(&self, query: &str, candidates: &[SearchResult]) -> Result<Vec<usize>> {
        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{i}] {}", c.content.chars().take(500).collect::<String>()))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Query: {query}\n\nCandidates:\n{listing}\n\n\
             Return a JSON array of candidate indices (the numbers in brackets), \
             best match first, containing every index exactly once. \
             Respond with ONLY the JSON array, no other text."
        );

        let content = call_chat_completion(
            &self.url,
            &self.model,
            &prompt,
            self.timeout_secs,
            self.max_retries,
        )
        .await?;

        let order: Vec<usize> = serde_json::from_str(content.trim())
            .map_err(|e| anyhow::anyhow!("rerank response was not a JSON index array: {e}"))?;
        Ok(order)
    }
}

/// Outcome of comparing a new host memory against a near-duplicate existing
/// one (cosine similarity in `[0.75, 0.95)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Discard the new memory; the existing one already covers it.
    Skip,
    /// Overwrite the existing memory's content with the carried merged text.
    Update(String),
    /// Delete the existing memory and insert the new one as a fresh document.
    Replace,
    /// Store both; they're related but not interchangeable.
    KeepBoth,
}

#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// `similarity` is the cosine similarity (0.0-1.0) between the two
    /// memories' embeddings, passed through so the model can weigh how
    /// close a call this is.
    async fn resolve(&self, existing_text: &str, new_text: &str, similarity: f32) -> ConflictDecision;
}

/// Fail-open default: always `keep_both`. Used when no chat-completion
/// endpoint is configured, and as the fallback on any call failure.
pub struct DisabledConflictResolver;

#[async_trait]
impl ConflictResolver for DisabledConflictResolver {
    async fn resolve(&self, _existing_text: &str, _new_text: &str, _similarity: f32) -> ConflictDecision {
        ConflictDecision::KeepBoth
    }
}

pub struct ChatCompletionConflictResolver {
    url: String,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl ChatCompletionConflictResolver {
    pub fn new(model: String, url: Option<String>, timeout_secs: u64, max_retries: u32) -> Self {
        Self {
            url: url.unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            model,
            timeout_secs,
            max_retries,
        }
    }
}

#[derive(Deserialize)]
struct ConflictResponse {
    action: String,
    #[serde(rename = "mergedContent")]
    merged_content: Option<String>,
}

#[async_trait]
impl ConflictResolver for ChatCompletionConflictResolver {
    async fn resolve(&self, existing_text: &str, new_text: &str, similarity: f32) -> ConflictDecision {
        match self.try_resolve(existing_text, new_text, similarity).await {
            Ok(decision) => decision,
            Err(e) => {
                eprintln!("warning: conflict-resolver call failed ({e}), defaulting to keep_both");
                ConflictDecision::KeepBoth
            }
        }
    }
}

impl ChatCompletionConflictResolver {
    async fn try_resolve(&self, existing_text: &str, new_text: &str, similarity: f32) -> Result<ConflictDecision> {
        let similarity_pct = (similarity * 100.0).round();
        let prompt = format!(
            "Existing memory: {existing_text}\n\nNew memory: {new_text}\n\n\
             These two memories are {similarity_pct}% similar. Decide how to reconcile them. \
             Respond with ONLY a JSON object: {{\"action\": one of \"skip\", \"update\", \"replace\", \
             \"keep_both\", \"mergedContent\": string (required when action is \"update\"), \
             \"reason\": string}}.\n\
             - skip: the existing memory already covers the new information.\n\
             - update: the new text is a more accurate/complete version of the same fact; \
               mergedContent should carry the reconciled wording to store in place.\n\
             - replace: the new memory supersedes the old one entirely (treat as a new fact).\n\
             - keep_both: they are related but distinct; store both."
        );

        let content = call_chat_completion(
            &self.url,
            &self.model,
            &prompt,
            self.timeout_secs,
            self.max_retries,
        )
        .await?;

        let parsed: ConflictResponse = serde_json::from_str(content.trim())
            .map_err(|e| anyhow::anyhow!("conflict-resolver response was not valid JSON: {e}"))?;

        match parsed.action.as_str() {
            "skip" => Ok(ConflictDecision::Skip),
            "update" => {
                let merged = parsed.merged_content.unwrap_or_else(|| new_text.to_string());
                Ok(ConflictDecision::Update(merged))
            }
            "replace" => Ok(ConflictDecision::Replace),
            "keep_both" => Ok(ConflictDecision::KeepBoth),
            other => Err(anyhow::anyhow!("unknown conflict action: {other}")),
        }
    }
}

/// Shared chat-completion call with the same retry/backoff shape as
/// [`crate::embedding::OpenAIProvider`]: HTTP 429/5xx retries with
/// exponential backoff (1s, 2s, 4s, ... capped at 32s), 4xx fails
/// immediately.
async fn call_chat_completion(
    url: &str,
    model: &str,
    prompt: &str,
    timeout_secs: u64,
    max_retries: u32,
) -> Result<String> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
        "temperature": 0,
    });

    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return extract_message_content(&json);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("chat completion error {status}: {body_text}"));
                    continue;
                }
                let body_text = response.text().await.unwrap_or_default();
                anyhow::bail!("chat completion error {status}: {body_text}");
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("chat completion failed after retries")))
}

fn extract_message_content(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("chat completion response missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultSource, SearchResultMetadata};

    fn result(id: &str, content: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            doc_id: id.to_string(),
            content: content.to_string(),
            score: 1.0,
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

    #[tokio::test]
    async fn disabled_reranker_truncates_without_reordering() {
        let reranker = DisabledReranker;
        let candidates = vec![result("a", "one"), result("b", "two"), result("c", "three")];
        let out = reranker.rerank("query", candidates, 2).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "a");
        assert_eq!(out[1].id, "b");
    }

    #[tokio::test]
    async fn disabled_conflict_resolver_always_keeps_both() {
        let resolver = DisabledConflictResolver;
        let decision = resolver.resolve("old fact", "new fact", 0.8).await;
        assert_eq!(decision, ConflictDecision::KeepBoth);
    }

    #[test]
    fn extract_message_content_reads_standard_shape() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "hello"}}]
        });
        assert_eq!(extract_message_content(&json).unwrap(), "hello");
    }

    #[test]
    fn extract_message_content_errors_on_missing_field() {
        let json = serde_json::json!({"choices": []});
        assert!(extract_message_content(&json).is_err());
    }
}
