//! Folding settled per-file outcomes into one batch.

use crate::{
    processing::types::{FileOutcome, FileReport, FileStatus},
    store::EmbeddingRecord,
};

/// Flattened view of a settled batch.
#[derive(Debug, Default)]
pub(crate) struct Aggregate {
    /// Records from every file that produced any, file by file.
    pub(crate) records: Vec<EmbeddingRecord>,
    /// Versions that produced records, deduplicated, first occurrence first.
    pub(crate) processed_versions: Vec<String>,
    /// One report per outcome, in the order given.
    pub(crate) files: Vec<FileReport>,
}

/// Concatenate records of successful files and collect the versions they belong to.
///
/// Skipped, mismatched, failed and empty files contribute neither records nor versions, so a
/// forced delete never reaches a version that is not about to be rewritten.
pub(crate) fn aggregate(outcomes: Vec<FileOutcome>) -> Aggregate {
    let mut batch = Aggregate::default();

    for outcome in outcomes {
        let FileOutcome {
            file_id,
            version_id,
            status,
        } = outcome;
        let label = status.label();
        let (records, error) = match status {
            FileStatus::Embedded(records) => (records, None),
            FileStatus::Failed(error) => (Vec::new(), Some(error.to_string())),
            FileStatus::Skipped | FileStatus::LengthMismatch { .. } => (Vec::new(), None),
        };

        if !records.is_empty() && !batch.processed_versions.contains(&version_id) {
            batch.processed_versions.push(version_id.clone());
        }
        batch.files.push(FileReport {
            file_id,
            version_id,
            status: label,
            records: records.len(),
            error,
        });
        batch.records.extend(records);
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoaderError;
    use crate::processing::types::FileError;

    fn record(version: &str, content: &str) -> EmbeddingRecord {
        EmbeddingRecord {
            document_version_id: version.into(),
            content: content.into(),
            embedding: vec![0.1],
        }
    }

    fn outcome(file: &str, version: &str, status: FileStatus) -> FileOutcome {
        FileOutcome {
            file_id: file.into(),
            version_id: version.into(),
            status,
        }
    }

    #[test]
    fn only_successful_files_contribute() {
        let batch = aggregate(vec![
            outcome(
                "f1",
                "v1",
                FileStatus::Embedded(vec![record("v1", "a"), record("v1", "b")]),
            ),
            outcome("f2", "v2", FileStatus::Skipped),
            outcome(
                "f3",
                "v3",
                FileStatus::LengthMismatch {
                    chunks: 3,
                    embeddings: 2,
                },
            ),
            outcome(
                "f4",
                "v4",
                FileStatus::Failed(FileError::Load(LoaderError::InvalidUrl("bad".into()))),
            ),
            outcome("f5", "v5", FileStatus::Embedded(vec![record("v5", "c")])),
        ]);

        assert_eq!(batch.processed_versions, vec!["v1", "v5"]);
        let contents: Vec<&str> = batch
            .records
            .iter()
            .map(|record| record.content.as_str())
            .collect();
        assert_eq!(contents, vec!["a", "b", "c"]);

        let statuses: Vec<&str> = batch.files.iter().map(|file| file.status).collect();
        assert_eq!(
            statuses,
            vec!["embedded", "skipped", "length_mismatch", "failed", "embedded"]
        );
        assert!(batch.files[3].error.as_deref().unwrap().contains("bad"));
    }

    #[test]
    fn empty_embedded_file_is_not_processed() {
        let batch = aggregate(vec![outcome("f1", "v1", FileStatus::Embedded(Vec::new()))]);

        assert!(batch.records.is_empty());
        assert!(batch.processed_versions.is_empty());
        assert_eq!(batch.files[0].status, "embedded");
    }

    #[test]
    fn repeated_versions_are_listed_once() {
        let batch = aggregate(vec![
            outcome("f1", "v1", FileStatus::Embedded(vec![record("v1", "a")])),
            outcome("f1", "v1", FileStatus::Embedded(vec![record("v1", "a")])),
        ]);

        assert_eq!(batch.processed_versions, vec!["v1"]);
        assert_eq!(batch.records.len(), 2);
    }
}
