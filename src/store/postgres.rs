use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{EmbeddingRecord, StoreError, VectorStore};

/// Rows per INSERT statement; four binds each keeps us well under the 65535 parameter limit.
const INSERT_BATCH_ROWS: usize = 1000;

/// PostgreSQL/pgvector backend.
pub struct PgVectorStore {
    pool: PgPool,
    table: String,
    dimension: usize,
}

impl PgVectorStore {
    /// Wrap an existing pool.
    ///
    /// `table` must already be validated as a SQL identifier; it is interpolated into statements.
    pub fn new(pool: PgPool, table: &str, dimension: usize) -> Self {
        Self {
            pool,
            table: table.to_string(),
            dimension,
        }
    }

    /// Verify pgvector is installed and create the embeddings table when missing.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        let extension: Option<(String,)> =
            sqlx::query_as("SELECT extname::text FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(&self.pool)
                .await?;
        if extension.is_none() {
            return Err(StoreError::MissingExtension);
        }

        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY,
                document_version_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding vector({}) NOT NULL
            )
            "#,
            self.table, self.dimension
        );
        sqlx::query(&create_table).execute(&self.pool).await?;

        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {}_version_idx ON {} (document_version_id)",
            self.table.replace('.', "_"),
            self.table
        );
        sqlx::query(&create_index).execute(&self.pool).await?;

        tracing::debug!(table = %self.table, "Embeddings table ready");
        Ok(())
    }

    fn check_dimensions(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        match records
            .iter()
            .find(|record| record.embedding.len() != self.dimension)
        {
            Some(record) => Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: record.embedding.len(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn has_version(&self, version_id: &str) -> Result<bool, StoreError> {
        let query = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE document_version_id = $1)",
            self.table
        );
        let exists: bool = sqlx::query_scalar(&query)
            .bind(version_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn delete_by_version_ids(&self, version_ids: &[String]) -> Result<u64, StoreError> {
        if version_ids.is_empty() {
            return Ok(0);
        }

        let query = format!(
            "DELETE FROM {} WHERE document_version_id = ANY($1)",
            self.table
        );
        let result = sqlx::query(&query)
            .bind(version_ids)
            .execute(&self.pool)
            .await?;
        tracing::debug!(
            table = %self.table,
            versions = version_ids.len(),
            rows = result.rows_affected(),
            "Deleted embeddings"
        );
        Ok(result.rows_affected())
    }

    async fn insert_many(&self, records: Vec<EmbeddingRecord>) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.check_dimensions(&records)?;

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for batch in records.chunks(INSERT_BATCH_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (id, document_version_id, content, embedding) ",
                self.table
            ));
            builder.push_values(batch, |mut row, record| {
                row.push_bind(Uuid::new_v4())
                    .push_bind(record.document_version_id.clone())
                    .push_bind(record.content.clone())
                    .push_bind(Vector::from(record.embedding.clone()));
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}
