//! Error taxonomy for the knowledge core.
//!
//! Every fallible operation still returns `anyhow::Result<T>`, matching the
//! rest of the codebase — this module only adds a typed discriminant for the
//! handful of cases callers need to branch on (`Duplicate` is success, not
//! failure; `DimensionMismatch` drives reconciliation) rather than an
//! exhaustive error enum for everything.

use std::fmt;

/// A classified failure (or non-failure, for `Duplicate`) from the core.
///
/// Construct with `anyhow::Error::new(KnowledgeError::...)` or wrap via
/// `.context(...)`; callers that need to distinguish cases downcast the
/// resulting `anyhow::Error` back with `.downcast_ref::<KnowledgeError>()`.
#[derive(Debug, Clone)]
pub enum KnowledgeError {
    /// Operation attempted before the relevant component was initialized.
    NotInitialized(String),
    /// Embedding model missing or failed to load.
    ModelUnavailable(String),
    /// Stored vectors no longer match the active embedding model's dimensionality.
    DimensionMismatch { expected: usize, found: usize },
    /// Wrong password, corrupt ciphertext, or missing key.
    CryptoError(String),
    /// Reranker, remote search, or conflict-resolver call failed.
    RemoteFailure(String),
    /// A disk write failed; in-memory state remains consistent.
    PersistenceError(String),
    /// Not an error: `addDocument` found an existing document with this id.
    Duplicate(String),
}

impl fmt::Display for KnowledgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnowledgeError::NotInitialized(what) => write!(f, "not initialized: {what}"),
            KnowledgeError::ModelUnavailable(msg) => write!(f, "embedding model unavailable: {msg}"),
            KnowledgeError::DimensionMismatch { expected, found } => write!(
                f,
                "dimension mismatch: store has {found}-dim vectors, model produces {expected}"
            ),
            KnowledgeError::CryptoError(msg) => write!(f, "crypto error: {msg}"),
            KnowledgeError::RemoteFailure(msg) => write!(f, "remote call failed: {msg}"),
            KnowledgeError::PersistenceError(msg) => write!(f, "persistence error: {msg}"),
            KnowledgeError::Duplicate(doc_id) => write!(f, "duplicate of document {doc_id}"),
        }
    }
}

impl std::error::Error for KnowledgeError {}

impl KnowledgeError {
    /// The existing docId, if this is a `Duplicate`.
    pub fn duplicate_doc_id(&self) -> Option<&str> {
        match self {
            KnowledgeError::Duplicate(id) => Some(id.as_str()),
            _ => None,
        }
    }
}
