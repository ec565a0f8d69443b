//! Configuration parsing and validation.
//!
//! The knowledge core is configured via a TOML file (default:
//! `config/knowledge.toml`). A [`KnowledgeConfig`] is always constructible
//! without a file via `Default`, so tests and the startup reconciliation
//! path can build a core without touching disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KnowledgeConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            enabled: true,
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            crypto: CryptoConfig::default(),
        }
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("knowledge")
}

/// `embeddingMode` ∈ {local, remote} plus the concrete provider/model tier.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"local"`, `"openai"`, `"ollama"`, or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Tier id (`"lite"`, `"standard"`, `"large"`) or an explicit model name.
    #[serde(default = "default_model")]
    pub local_model: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            local_model: default_model(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "lite".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// `chunkStrategy` and sizing knobs read by the Chunker.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Overridden per-call by `EmbeddingService::max_tokens()` when embedding is active.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_chunk_chars: default_max_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_strategy() -> String {
    "paragraph".to_string()
}
fn default_max_chunk_chars() -> usize {
    2000
}
fn default_overlap_chars() -> usize {
    200
}

/// Retrieval tuning: `searchTopK`, `enableRerank`, `hybridWeight`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_top_k")]
    pub search_top_k: i64,
    #[serde(default)]
    pub enable_rerank: bool,
    /// Reserved for a future weighted-RRF variant (§9); unused by fusion today.
    #[serde(default = "default_hybrid_weight")]
    pub hybrid_weight: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_similarity")]
    pub similarity: f32,
    /// Companion-server adapter id (§6 remote-search collaborator), or
    /// `None` to search local indexes only.
    #[serde(default)]
    pub mcp_server_id: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_top_k: default_search_top_k(),
            enable_rerank: false,
            hybrid_weight: default_hybrid_weight(),
            rrf_k: default_rrf_k(),
            similarity: default_similarity(),
            mcp_server_id: None,
        }
    }
}

fn default_search_top_k() -> i64 {
    5
}
fn default_hybrid_weight() -> f64 {
    0.7
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_similarity() -> f32 {
    0.7
}

/// Crypto sentinel file names, relative to `data_root`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CryptoConfig {
    #[serde(default)]
    pub persist_to_keychain: bool,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            persist_to_keychain: false,
        }
    }
}

pub fn load_config(path: &Path) -> Result<KnowledgeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: KnowledgeConfig =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &KnowledgeConfig) -> Result<()> {
    if config.chunking.max_chunk_chars == 0 {
        anyhow::bail!("chunking.max_chunk_chars must be > 0");
    }
    match config.chunking.strategy.as_str() {
        "fixed" | "paragraph" | "semantic" => {}
        other => anyhow::bail!(
            "Unknown chunkStrategy: '{}'. Must be fixed, paragraph, or semantic.",
            other
        ),
    }

    if config.retrieval.search_top_k < 1 {
        anyhow::bail!("retrieval.search_top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_weight) {
        anyhow::bail!("retrieval.hybrid_weight must be in [0.0, 1.0]");
    }

    if config.embedding.is_enabled() {
        match config.embedding.provider.as_str() {
            "local" | "hash" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, local, hash, openai, or ollama.",
                other
            ),
        }
        if !matches!(config.embedding.provider.as_str(), "local" | "hash")
            && (config.embedding.model.is_none() || config.embedding.dims == Some(0))
        {
            anyhow::bail!(
                "embedding.model and embedding.dims must be set when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = KnowledgeConfig::default();
        validate(&config).unwrap();
    }

    #[test]
    fn rejects_zero_max_chunk_chars() {
        let mut config = KnowledgeConfig::default();
        config.chunking.max_chunk_chars = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_out_of_range_hybrid_weight() {
        let mut config = KnowledgeConfig::default();
        config.retrieval.hybrid_weight = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unknown_chunk_strategy() {
        let mut config = KnowledgeConfig::default();
        config.chunking.strategy = "bogus".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_enabled_embedding_missing_model() {
        let mut config = KnowledgeConfig::default();
        config.embedding.provider = "openai".to_string();
        assert!(validate(&config).is_err());
    }
}
