//! Core data types and error definitions for the embedding pipeline.

use crate::{
    embedding::EmbeddingClientError, loader::LoaderError, metrics::BatchTally,
    store::{EmbeddingRecord, StoreError},
};
use anyhow::Error as TokenizerError;
use serde::Deserialize;
use thiserror::Error;

/// Errors produced while turning a file into semantic chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
    /// File contents are not UTF-8 text.
    #[error("file '{name}' is not valid UTF-8 text: {source}")]
    UnsupportedEncoding {
        /// Display name of the file.
        name: String,
        /// Decoder error.
        #[source]
        source: std::str::Utf8Error,
    },
    /// The blocking split task panicked or was cancelled.
    #[error("chunking task did not complete: {0}")]
    Interrupted(#[from] tokio::task::JoinError),
}

/// Errors that fail a single file's pipeline. They never abort the batch.
#[derive(Debug, Error)]
pub enum FileError {
    /// The loader could not produce the file.
    #[error("Failed to load file: {0}")]
    Load(#[from] LoaderError),
    /// Chunking failed.
    #[error("Failed to chunk file: {0}")]
    Chunking(#[from] ChunkingError),
    /// The embedding provider failed.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
}

/// Errors that fail a whole batch.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Deleting stale records or inserting new ones failed.
    #[error("Failed to persist embeddings: {0}")]
    Store(#[from] StoreError),
}

/// Reference to one file version in a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    /// Storage identifier of the file.
    pub file_id: String,
    /// Version of the file to embed.
    pub version_id: String,
}

/// Validated batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    /// Files to embed, in request order. Never empty.
    pub files: Vec<FileRef>,
    /// Re-embed versions that already have records, replacing them.
    pub force: bool,
}

/// What happened to one file.
#[derive(Debug)]
pub enum FileStatus {
    /// Records were produced. May be empty when the file held no text.
    Embedded(Vec<EmbeddingRecord>),
    /// The loader reported the version as already embedded.
    Skipped,
    /// The embedder returned a different number of vectors than there were chunks.
    LengthMismatch {
        /// Number of chunks sent.
        chunks: usize,
        /// Number of vectors returned.
        embeddings: usize,
    },
    /// A pipeline step failed.
    Failed(FileError),
}

impl FileStatus {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Embedded(_) => "embedded",
            Self::Skipped => "skipped",
            Self::LengthMismatch { .. } => "length_mismatch",
            Self::Failed(_) => "failed",
        }
    }
}

/// Result of one file's pipeline, tagged with the file it belongs to.
#[derive(Debug)]
pub struct FileOutcome {
    /// Storage identifier of the file.
    pub file_id: String,
    /// Version the outcome applies to.
    pub version_id: String,
    /// Outcome tag and payload.
    pub status: FileStatus,
}

/// Per-file summary kept after records have been moved out for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    /// Storage identifier of the file.
    pub file_id: String,
    /// Version the report applies to.
    pub version_id: String,
    /// One of `embedded`, `skipped`, `length_mismatch`, `failed`.
    pub status: &'static str,
    /// Records produced for the file.
    pub records: usize,
    /// Failure message, for failed files.
    pub error: Option<String>,
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDisposition {
    /// New records were written.
    Persisted,
    /// No file produced records; nothing was deleted or written.
    NothingToEmbed,
}

/// Summary of a processed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Whether anything was written.
    pub disposition: BatchDisposition,
    /// Per-file outcomes, in request order.
    pub files: Vec<FileReport>,
    /// Versions whose previous records were deleted before insert.
    pub replaced_versions: Vec<String>,
    /// Rows removed by the force delete.
    pub deleted: u64,
    /// Rows inserted.
    pub inserted: u64,
}

impl BatchReport {
    /// Counters for the metrics registry.
    ///
    /// Embedded files that held no text count in none of the file buckets.
    pub fn tally(&self) -> BatchTally {
        let count = |status: &str| {
            self.files
                .iter()
                .filter(|file| file.status == status)
                .count() as u64
        };
        BatchTally {
            embedded: self
                .files
                .iter()
                .filter(|file| file.status == "embedded" && file.records > 0)
                .count() as u64,
            skipped: count("skipped"),
            mismatched: count("length_mismatch"),
            failed: count("failed"),
            inserted: self.inserted,
            replaced: self.replaced_versions.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(version_id: &str, status: &'static str, records: usize) -> FileReport {
        FileReport {
            file_id: format!("file-{version_id}"),
            version_id: version_id.to_string(),
            status,
            records,
            error: None,
        }
    }

    #[test]
    fn tally_counts_only_files_with_records_as_embedded() {
        let batch = BatchReport {
            disposition: BatchDisposition::Persisted,
            files: vec![
                report("v1", "embedded", 3),
                report("v2", "embedded", 0),
                report("v3", "skipped", 0),
                report("v4", "length_mismatch", 0),
                report("v5", "failed", 0),
            ],
            replaced_versions: vec!["v1".to_string()],
            deleted: 2,
            inserted: 3,
        };

        assert_eq!(
            batch.tally(),
            BatchTally {
                embedded: 1,
                skipped: 1,
                mismatched: 1,
                failed: 1,
                inserted: 3,
                replaced: 1,
            }
        );
    }
}
