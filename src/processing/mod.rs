//! Embedding pipeline: per-file load/chunk/embed, aggregation, and persistence.

mod aggregate;
pub mod chunking;
mod pipeline;
mod service;
pub mod types;

pub use chunking::{Chunk, ChunkedDocument, Chunker, SemanticChunker};
pub use service::{EmbeddingApi, EmbeddingService};
pub use types::{
    BatchDisposition, BatchReport, BatchRequest, ChunkingError, FileError, FileOutcome,
    FileRef, FileReport, FileStatus, ServiceError,
};
