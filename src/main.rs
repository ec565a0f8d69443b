//! `knowledge` — a thin CLI over [`knowledge_core::KnowledgeCore`] for
//! manually exercising the hybrid-search engine: ingest files, capture host
//! memories, search, inspect stats, and manage the password/export
//! lifecycle. All business logic lives in the library; this binary only
//! parses arguments and prints results.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use knowledge_core::config::{self, KnowledgeConfig};
use knowledge_core::core::KnowledgeCore;

#[derive(Parser)]
#[command(
    name = "knowledge",
    about = "Local hybrid-search knowledge core — ingest, search, and manage host memories",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/knowledge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data root and verify the configuration loads.
    Init,

    /// Ingest a file's contents as a document.
    Add {
        /// Path to the file to ingest.
        path: PathBuf,

        /// Tags to attach to the document.
        #[arg(long)]
        tag: Vec<String>,
    },

    /// Capture a host memory, applying the three-tier dedup policy.
    Remember {
        /// Host id the memory belongs to.
        host: String,

        /// The memory text.
        text: String,
    },

    /// Search the knowledge base.
    Search {
        /// Search query. Empty with `--host` lists that host's memories.
        #[arg(default_value = "")]
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict to a host id (for host-memory search/listing).
        #[arg(long)]
        host: Option<String>,

        /// Restrict to a tag.
        #[arg(long)]
        tag: Option<String>,
    },

    /// Remove a document (and its chunks) by id.
    Remove {
        /// Document id.
        doc_id: String,
    },

    /// Print index statistics.
    Stats,

    /// Snapshot the data root to a directory.
    Export {
        /// Destination directory.
        dir: PathBuf,
    },

    /// Restore a data root from a directory previously written by `export`.
    Import {
        /// Source directory.
        dir: PathBuf,
    },

    /// Change the encryption password, re-encrypting every host memory.
    ChangePassword {
        /// Current password.
        old: String,

        /// New password.
        new: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config_or_default(&cli.config)?;
    let core = KnowledgeCore::new(cfg)?;

    match cli.command {
        Commands::Init => {
            println!("Initialized knowledge store at {}", core.data_root().display());
        }
        Commands::Add { path, tag } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let doc = core.add_document(&filename, &content, tag).await?;
            println!("Ingested {} as document {} ({} chunks)", filename, doc.id, doc.chunk_count);
        }
        Commands::Remember { host, text } => {
            let outcome = core.add_host_memory_smart(&host, &text, Vec::new()).await?;
            println!("{outcome:?}");
        }
        Commands::Search { query, limit, host, tag } => {
            let results = core.search(&query, limit, host, tag).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for r in results {
                println!("[{:.3}] {} ({})", r.score, r.content, r.metadata.filename);
            }
        }
        Commands::Remove { doc_id } => {
            core.remove_document(&doc_id)?;
            println!("Removed document {doc_id}");
        }
        Commands::Stats => {
            let stats = core.stats();
            println!(
                "documents={} chunks={} vectors={} embedding_enabled={} model={}",
                stats.document_count,
                stats.chunk_count,
                stats.vector_count,
                stats.embedding_enabled,
                stats.embedding_model
            );
        }
        Commands::Export { dir } => {
            core.export(&dir)?;
            println!("Exported knowledge store to {}", dir.display());
        }
        Commands::Import { dir } => {
            core.import(&dir)?;
            println!("Imported knowledge store from {}", dir.display());
        }
        Commands::ChangePassword { old, new } => {
            let count = core.change_password(&old, &new)?;
            println!("Re-encrypted {count} host memories");
        }
    }

    Ok(())
}

fn load_config_or_default(path: &PathBuf) -> Result<KnowledgeConfig> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(KnowledgeConfig::default())
    }
}
