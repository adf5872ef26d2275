use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{EmbeddingRecord, StoreError, VectorStore};

/// Process-local vector store.
#[derive(Default)]
pub struct MemoryVectorStore {
    rows: RwLock<Vec<EmbeddingRecord>>,
}

impl MemoryVectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records`.
    pub fn with_records(records: Vec<EmbeddingRecord>) -> Self {
        Self {
            rows: RwLock::new(records),
        }
    }

    /// Copy of every stored record, in insertion order.
    pub async fn records(&self) -> Vec<EmbeddingRecord> {
        self.rows.read().await.clone()
    }

    /// Records stored for one version.
    pub async fn records_for(&self, version_id: &str) -> Vec<EmbeddingRecord> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|record| record.document_version_id == version_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn has_version(&self, version_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .any(|record| record.document_version_id == version_id))
    }

    async fn delete_by_version_ids(&self, version_ids: &[String]) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|record| !version_ids.contains(&record.document_version_id));
        Ok((before - rows.len()) as u64)
    }

    async fn insert_many(&self, records: Vec<EmbeddingRecord>) -> Result<u64, StoreError> {
        let count = records.len() as u64;
        self.rows.write().await.extend(records);
        Ok(count)
    }
}
