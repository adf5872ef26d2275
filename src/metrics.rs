use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing embedding activity.
#[derive(Default)]
pub struct EmbeddingMetrics {
    batches: AtomicU64,
    files_embedded: AtomicU64,
    files_skipped: AtomicU64,
    files_mismatched: AtomicU64,
    files_failed: AtomicU64,
    records_inserted: AtomicU64,
    versions_replaced: AtomicU64,
}

/// Per-batch tallies folded into [`EmbeddingMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTally {
    /// Files that produced at least one record.
    pub embedded: u64,
    /// Files the loader reported as already embedded.
    pub skipped: u64,
    /// Files dropped because chunk and vector counts differed.
    pub mismatched: u64,
    /// Files whose pipeline returned an error.
    pub failed: u64,
    /// Records written to the vector store.
    pub inserted: u64,
    /// Versions whose previous records were deleted before insert.
    pub replaced: u64,
}

impl EmbeddingMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a settled batch.
    pub fn record_batch(&self, tally: BatchTally) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.files_embedded
            .fetch_add(tally.embedded, Ordering::Relaxed);
        self.files_skipped
            .fetch_add(tally.skipped, Ordering::Relaxed);
        self.files_mismatched
            .fetch_add(tally.mismatched, Ordering::Relaxed);
        self.files_failed.fetch_add(tally.failed, Ordering::Relaxed);
        self.records_inserted
            .fetch_add(tally.inserted, Ordering::Relaxed);
        self.versions_replaced
            .fetch_add(tally.replaced, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            files_embedded: self.files_embedded.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            files_mismatched: self.files_mismatched.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            versions_replaced: self.versions_replaced.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of embedding counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Batch requests that reached the pipeline since startup.
    pub batches: u64,
    /// Files that produced at least one record.
    pub files_embedded: u64,
    /// Files skipped as already embedded.
    pub files_skipped: u64,
    /// Files dropped on a chunk/vector count mismatch.
    pub files_mismatched: u64,
    /// Files whose pipeline failed.
    pub files_failed: u64,
    /// Records inserted into the vector store.
    pub records_inserted: u64,
    /// Versions whose previous records were replaced.
    pub versions_replaced: u64,
}
