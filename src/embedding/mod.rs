//! Embedding provider abstraction, implementations, and the stateful
//! [`EmbeddingService`] the rest of the core depends on (C3).
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]** — calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaProvider`]** — calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`LocalProvider`]** — runs models locally via fastembed (primary) or tract (musl/Intel Mac); no network calls after model download.
//!
//! [`EmbeddingService`] wraps one of these behind a single handle that can
//! be re-pointed at a different model tier at runtime (`switch_model`); the
//! `VectorStore` compares `dimensions()` against its own stored width to
//! decide whether a switch invalidates the existing index.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`] — similarity between two L2-normalized vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian `f32` byte encoding for on-disk vector records
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-embeddings-tract")]
mod local_tract;

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::KnowledgeError;

/// Trait for embedding providers.
///
/// Defines the interface that all embedding backends must implement.
/// The actual embedding computation is performed by [`embed_texts`]
/// (kept as a free function due to async trait limitations).
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Returns the provider's advertised max input length, in chars, used
    /// to size chunks so a single chunk never overflows the model.
    fn max_chars(&self) -> usize;
}

/// Stateful handle around the active [`EmbeddingProvider`] (C3).
///
/// Construct once at startup from [`EmbeddingConfig`]; call [`switch_model`]
/// to move between tiers (`lite`/`standard`/`large`) or providers without
/// rebuilding the whole service.
///
/// [`switch_model`]: EmbeddingService::switch_model
pub struct EmbeddingService {
    config: EmbeddingConfig,
    provider: Box<dyn EmbeddingProvider>,
}

impl EmbeddingService {
    /// Build a service from config. A `"disabled"` provider is a legal,
    /// fully constructed service — it only errors when asked to embed.
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(&config)?;
        Ok(Self { config, provider })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub fn current_model(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dims()
    }

    /// Advertised max chars per chunk for the active model; the Chunker's
    /// `max_chunk_chars` is clamped to this when embedding is enabled.
    pub fn max_tokens(&self) -> usize {
        self.provider.max_chars()
    }

    /// Embed a batch of texts, preserving order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        embed_texts(self.provider.as_ref(), &self.config, texts)
            .await
            .map_err(|e| {
                anyhow::Error::new(KnowledgeError::ModelUnavailable(e.to_string())).context(e)
            })
    }

    /// Embed a single query string.
    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed(std::slice::from_ref(&text.to_string())).await?;
        results
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    /// Swap the active model/tier. `model_id` is one of `"lite"`,
    /// `"standard"`, `"large"`, or (for local) an explicit model name.
    /// Leaves the service untouched on failure so callers can keep running
    /// against the previous model.
    pub fn switch_model(&mut self, model_id: &str) -> Result<()> {
        let mut next_config = self.config.clone();
        next_config.local_model = model_id.to_string();
        if next_config.provider == "local" {
            next_config.model = None;
            next_config.dims = None;
        }
        let provider = create_provider(&next_config)
            .with_context(|| format!("switching to model '{model_id}'"))?;
        self.config = next_config;
        self.provider = provider;
        Ok(())
    }
}

/// Embed a batch of texts using the configured provider.
///
/// Dispatches to the appropriate backend based on the config's `provider`
/// field; `_provider` supplies metadata only.
///
/// # Errors
///
/// - `"disabled"` provider: always returns an error.
/// - `"openai"`/`"ollama"` provider: returns an error if required config
///   is missing, the API returns a non-retryable error, or retries are exhausted.
pub async fn embed_texts(
    _provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "hash" => embed_hash(config, texts).await,
        "openai" => embed_openai(config, texts).await,
        "ollama" => embed_ollama(config, texts).await,
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => embed_local_fastembed(config, texts).await,
        #[cfg(feature = "local-embeddings-tract")]
        "local" => embed_local_tract(config, texts).await,
        #[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
        "local" => bail!(
            "Local embedding provider requires one of: --features local-embeddings-fastembed, --features local-embeddings-tract"
        ),
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>> {
    let results = embed_texts(provider, config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    fn max_chars(&self) -> usize {
        0
    }
}

// ============ Hash Provider (deterministic, offline) ============

/// A deterministic, offline embedding provider: hashes tokens into a
/// fixed-width vector (the hashing trick), so texts sharing vocabulary land
/// close together in cosine distance without a trained model or network
/// access. Selected via `provider = "hash"`; dimensionality comes from
/// `embedding.dims` (default 64), which makes it useful for exercising
/// dimension-mismatch reconciliation between two configured widths.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config.dims.unwrap_or(64);
        if dims == 0 {
            bail!("embedding.dims must be > 0 for the hash provider");
        }
        Ok(Self { dims })
    }
}

impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_chars(&self) -> usize {
        100_000
    }
}

async fn embed_hash(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let dims = config.dims.unwrap_or(64);
    Ok(texts.iter().map(|t| hash_embed_one(t, dims)).collect())
}

fn hash_embed_one(text: &str, dims: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut vec = vec![0.0f32; dims];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let h = hasher.finish();
        let idx = (h % dims as u64) as usize;
        let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vec[idx] += sign;
    }

    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
    vec
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_chars(&self) -> usize {
        8191 * 4
    }
}

/// Call the OpenAI embeddings API with retry/backoff.
async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_openai_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "OpenAI API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("OpenAI API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance (`POST /api/embed`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    #[allow(dead_code)]
    url: String,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self { model, dims, url })
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_chars(&self) -> usize {
        2048 * 4
    }
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;

    let url = config.url.as_deref().unwrap_or("http://localhost:11434");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/api/embed", url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_ollama_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Ollama API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("Ollama API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    url,
                    e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama embedding failed after retries")))
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Provider (fastembed or tract) ============

/// Local-tier model catalog: tier id -> (concrete model name, dims, max chars).
///
/// `"lite"`/`"standard"`/`"large"` are the tier ids a caller passes to
/// `switch_model`; an explicit model name (e.g. `"bge-base-en-v1.5"`) also
/// works directly since the three tiers alias three real model ids.
fn tier_manifest(tier_or_model: &str) -> (String, usize, usize) {
    let (name, dims, max_chars) = match tier_or_model {
        "lite" | "all-minilm-l6-v2" => ("all-minilm-l6-v2", 384, 256 * 4),
        "standard" | "bge-base-en-v1.5" => ("bge-base-en-v1.5", 768, 384 * 4),
        "large" | "bge-large-en-v1.5" => ("bge-large-en-v1.5", 1024, 512 * 4),
        "bge-small-en-v1.5" => ("bge-small-en-v1.5", 384, 256 * 4),
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => ("nomic-embed-text-v1.5", 768, 2048 * 4),
        "multilingual-e5-small" => ("multilingual-e5-small", 384, 256 * 4),
        "multilingual-e5-base" => ("multilingual-e5-base", 768, 384 * 4),
        "multilingual-e5-large" => ("multilingual-e5-large", 1024, 512 * 4),
        _ => (tier_or_model, 384, 256 * 4),
    };
    (name.to_string(), dims, max_chars)
}

/// Embedding provider for local inference (fastembed on primary platforms, tract on musl/Intel Mac).
///
/// Models are downloaded on first use from Hugging Face and cached; after
/// initial download no network calls are needed.
#[cfg(any(
    feature = "local-embeddings-fastembed",
    feature = "local-embeddings-tract"
))]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    max_chars: usize,
}

#[cfg(any(
    feature = "local-embeddings-fastembed",
    feature = "local-embeddings-tract"
))]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims, max_chars) = resolve_local_model(config);
        Ok(Self {
            model_name,
            dims,
            max_chars,
        })
    }
}

#[cfg(any(
    feature = "local-embeddings-fastembed",
    feature = "local-embeddings-tract"
))]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_chars(&self) -> usize {
        self.max_chars
    }
}

#[cfg(any(
    feature = "local-embeddings-fastembed",
    feature = "local-embeddings-tract"
))]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize, usize) {
    let requested = config.model.clone().unwrap_or_else(|| config.local_model.clone());
    let (model_name, default_dims, max_chars) = tier_manifest(&requested);
    let dims = config.dims.unwrap_or(default_dims);
    (model_name.to_string(), dims, max_chars)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
async fn embed_local_fastembed(
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let requested = config.model.clone().unwrap_or_else(|| config.local_model.clone());
    let (model_name, _, _) = tier_manifest(&requested);
    let fastembed_model = config_to_fastembed_model(&model_name)?;
    let batch_size = config.batch_size;
    let texts = texts.to_vec();

    tokio::task::spawn_blocking(move || {
        let mut model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        let embeddings = model
            .embed(texts, Some(batch_size))
            .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))?;

        Ok(embeddings)
    })
    .await?
}

#[cfg(feature = "local-embeddings-tract")]
async fn embed_local_tract(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    local_tract::embed_local_tract(config, texts).await
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hash"` | [`HashProvider`] (deterministic, offline) |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (fastembed or tract, see features) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "hash" => Ok(Box::new(HashProvider::new(config)?)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        #[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
        "local" => bail!(
            "Local embedding provider requires one of: --features local-embeddings-fastembed, --features local-embeddings-tract"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty/mismatched-length
/// inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty() {
        let sim = cosine_similarity(&[], &[]);
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        let sim = cosine_similarity(&a, &b);
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn disabled_service_reports_zero_dims_and_is_disabled() {
        let config = EmbeddingConfig::default();
        let service = EmbeddingService::new(config).unwrap();
        assert!(!service.is_enabled());
        assert_eq!(service.dimensions(), 0);
    }

    #[tokio::test]
    async fn disabled_service_embed_fails() {
        let config = EmbeddingConfig::default();
        let service = EmbeddingService::new(config).unwrap();
        let result = service.embed(&["hello".to_string()]).await;
        assert!(result.is_err());
    }

    #[test]
    fn tier_manifest_lite_standard_large_have_distinct_dims() {
        let (_, lite_dims, _) = tier_manifest("lite");
        let (_, standard_dims, _) = tier_manifest("standard");
        let (_, large_dims, _) = tier_manifest("large");
        assert_ne!(lite_dims, standard_dims);
        assert_ne!(standard_dims, large_dims);
    }

    fn hash_config(dims: usize) -> EmbeddingConfig {
        let mut config = EmbeddingConfig::default();
        config.provider = "hash".to_string();
        config.dims = Some(dims);
        config
    }

    #[tokio::test]
    async fn hash_provider_is_deterministic() {
        let service = EmbeddingService::new(hash_config(32)).unwrap();
        let a = service.embed_single("the quick brown fox").await.unwrap();
        let b = service.embed_single("the quick brown fox").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn hash_provider_rates_shared_vocabulary_more_similar_than_unrelated_text() {
        let service = EmbeddingService::new(hash_config(64)).unwrap();
        let near = service
            .embed(&[
                "the service runs on port 8080".to_string(),
                "the service listens on port 8080".to_string(),
                "bananas are a good source of potassium".to_string(),
            ])
            .await
            .unwrap();

        let sim_near = cosine_similarity(&near[0], &near[1]);
        let sim_far = cosine_similarity(&near[0], &near[2]);
        assert!(sim_near > sim_far);
        assert!(sim_near > 0.5, "expected near-duplicate sentences to score highly, got {sim_near}");
    }

    #[tokio::test]
    async fn hash_provider_respects_configured_dims() {
        let service = EmbeddingService::new(hash_config(16)).unwrap();
        assert_eq!(service.dimensions(), 16);
        let v = service.embed_single("hello world").await.unwrap();
        assert_eq!(v.len(), 16);
    }

    #[test]
    fn hash_provider_rejects_zero_dims() {
        let config = hash_config(0);
        assert!(HashProvider::new(&config).is_err());
    }
}
