//! Vector store abstraction for embedding records.
//!
//! The orchestrator only needs three operations: an existence probe used by the file loader to
//! honour the force flag, a bulk delete keyed by document version, and a bulk insert. Backends:
//!
//! - [`PgVectorStore`]: PostgreSQL with a pgvector column.
//! - [`MemoryVectorStore`]: process-local, for development and tests.

mod memory;
mod postgres;

pub use memory::MemoryVectorStore;
pub use postgres::PgVectorStore;

use async_trait::async_trait;
use thiserror::Error;

/// One embedded chunk of a document version.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// Version the chunk was extracted from.
    pub document_version_id: String,
    /// Chunk text.
    pub content: String,
    /// Vector produced for `content`.
    pub embedding: Vec<f32>,
}

/// Errors returned by vector store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The pgvector extension is absent from the target database.
    #[error("pgvector extension is not installed; run CREATE EXTENSION vector")]
    MissingExtension,
    /// A statement failed.
    #[error("Vector store query failed: {0}")]
    Query(#[from] sqlx::Error),
    /// A record's vector does not fit the table's vector column.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the vector column.
        expected: usize,
        /// Dimension of the offending record.
        actual: usize,
    },
}

/// Persistence operations required by the embedding pipeline.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether any record exists for the given document version.
    async fn has_version(&self, version_id: &str) -> Result<bool, StoreError>;

    /// Delete every record whose version is in `version_ids`, returning the number removed.
    async fn delete_by_version_ids(&self, version_ids: &[String]) -> Result<u64, StoreError>;

    /// Insert all records, returning how many were written.
    async fn insert_many(&self, records: Vec<EmbeddingRecord>) -> Result<u64, StoreError>;
}
