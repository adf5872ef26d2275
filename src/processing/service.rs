//! Embedding service coordinating authentication, the per-file pipelines, and persistence.

use crate::{
    auth::{Authenticator, AuthError, ClientIdentity, PgAuthenticator, StaticAuthenticator},
    config::{AuthProvider, Config, VectorStoreDriver},
    embedding::{EmbeddingClient, build_embedding_client},
    loader::{FileLoader, HttpFileLoader},
    metrics::{EmbeddingMetrics, MetricsSnapshot},
    processing::{
        aggregate::{Aggregate, aggregate},
        chunking::{Chunker, SemanticChunker, determine_chunk_size},
        pipeline::{PipelineContext, run_file},
        types::{BatchDisposition, BatchReport, BatchRequest, ServiceError},
    },
    store::{MemoryVectorStore, PgVectorStore, VectorStore},
};
use anyhow::Context;
use async_trait::async_trait;
use futures_util::future::join_all;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

/// Runs embedding batches end to end.
///
/// The service owns long-lived handles to every collaborator so the HTTP surface only deals in
/// requests and reports. Construct it once near process start and share it through an `Arc`.
pub struct EmbeddingService {
    authenticator: Arc<dyn Authenticator>,
    loader: Arc<dyn FileLoader>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    metrics: Arc<EmbeddingMetrics>,
}

/// Abstraction over the embedding service used by the HTTP surface.
#[async_trait]
pub trait EmbeddingApi: Send + Sync {
    /// Resolve the request's API key into a client identity.
    async fn authenticate(&self, api_key: Option<&str>) -> Result<ClientIdentity, AuthError>;

    /// Embed every file in `request` on behalf of `client`.
    async fn embed_batch(
        &self,
        client: &ClientIdentity,
        request: BatchRequest,
    ) -> Result<BatchReport, ServiceError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl EmbeddingService {
    /// Assemble a service from explicit collaborators.
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        loader: Arc<dyn FileLoader>,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            authenticator,
            loader,
            chunker,
            embedder,
            store,
            metrics: Arc::new(EmbeddingMetrics::new()),
        }
    }

    /// Build the production service described by `config`.
    ///
    /// Connects to PostgreSQL when either the store or the authenticator needs it and makes sure
    /// the embeddings table exists.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = match config.database_url.as_deref() {
            Some(url)
                if config.vector_store_driver == VectorStoreDriver::Postgres
                    || config.auth_provider == AuthProvider::Postgres =>
            {
                let pool = PgPoolOptions::new()
                    .max_connections(config.database_max_connections)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect(url)
                    .await
                    .context("failed to connect to PostgreSQL")?;
                Some(pool)
            }
            _ => None,
        };

        let store: Arc<dyn VectorStore> = match (config.vector_store_driver, pool.clone()) {
            (VectorStoreDriver::Postgres, Some(pool)) => {
                let store = PgVectorStore::new(
                    pool,
                    &config.embeddings_table,
                    config.embedding_dimension,
                );
                store
                    .ensure_table()
                    .await
                    .context("failed to prepare embeddings table")?;
                Arc::new(store)
            }
            (VectorStoreDriver::Postgres, None) => {
                anyhow::bail!("DATABASE_URL is required for the postgres vector store")
            }
            (VectorStoreDriver::Memory, _) => {
                tracing::warn!("Using in-memory vector store; embeddings are lost on restart");
                Arc::new(MemoryVectorStore::new())
            }
        };

        let authenticator: Arc<dyn Authenticator> = match (config.auth_provider, pool) {
            (AuthProvider::Postgres, Some(pool)) => {
                Arc::new(PgAuthenticator::new(pool, &config.clients_table))
            }
            (AuthProvider::Postgres, None) => {
                anyhow::bail!("DATABASE_URL is required for the postgres authenticator")
            }
            (AuthProvider::Static, _) => {
                Arc::new(StaticAuthenticator::new(config.api_keys.iter().cloned()))
            }
        };

        let loader = HttpFileLoader::new(&config.file_storage_url, store.clone())
            .context("failed to build file loader")?
            .with_max_bytes(config.file_max_bytes);

        let chunk_size = determine_chunk_size(
            config.text_splitter_chunk_size,
            config.embedding_provider,
            &config.embedding_model,
        );
        let chunker = SemanticChunker::new(
            chunk_size,
            config.text_splitter_chunk_overlap.unwrap_or(0),
            config.embedding_provider,
            &config.embedding_model,
        )
        .context("failed to build chunker")?;

        tracing::info!(
            provider = ?config.embedding_provider,
            model = %config.embedding_model,
            dimension = config.embedding_dimension,
            chunk_size,
            "Embedding service initialized"
        );

        Ok(Self::new(
            authenticator,
            Arc::new(loader),
            Arc::new(chunker),
            Arc::from(build_embedding_client(config)),
            store,
        ))
    }

    /// Resolve an API key, rejecting missing keys before touching the authenticator.
    pub async fn authenticate(&self, api_key: Option<&str>) -> Result<ClientIdentity, AuthError> {
        let api_key = api_key.ok_or(AuthError::MissingCredential)?;
        self.authenticator.authenticate(api_key).await
    }

    /// Run every file's pipeline concurrently, then persist what they produced.
    ///
    /// Per-file failures are recorded in the report and never fail the batch. When `force` is
    /// set, records of the versions that produced new records are deleted before the insert;
    /// the two steps are not one transaction.
    pub async fn embed_batch(
        &self,
        client: &ClientIdentity,
        request: BatchRequest,
    ) -> Result<BatchReport, ServiceError> {
        let BatchRequest { files, force } = request;
        tracing::info!(
            client_id = %client.id,
            files = files.len(),
            force,
            "Embedding batch started"
        );

        let context = PipelineContext {
            loader: self.loader.as_ref(),
            chunker: self.chunker.as_ref(),
            embedder: self.embedder.as_ref(),
        };
        let outcomes = join_all(
            files
                .iter()
                .map(|file| run_file(&context, file, client, force)),
        )
        .await;

        let Aggregate {
            records,
            processed_versions,
            files,
        } = aggregate(outcomes);
        tracing::info!(records = records.len(), "Embedding batch settled");

        if records.is_empty() {
            let report = BatchReport {
                disposition: BatchDisposition::NothingToEmbed,
                files,
                replaced_versions: Vec::new(),
                deleted: 0,
                inserted: 0,
            };
            self.metrics.record_batch(report.tally());
            return Ok(report);
        }

        let (deleted, replaced_versions) = if force {
            let deleted = self
                .store
                .delete_by_version_ids(&processed_versions)
                .await
                .inspect_err(|error| {
                    tracing::error!(error = %error, "Failed to delete stale embeddings");
                })?;
            (deleted, processed_versions)
        } else {
            (0, Vec::new())
        };

        let inserted = self.store.insert_many(records).await.inspect_err(|error| {
            tracing::error!(
                error = %error,
                deleted,
                "Failed to insert embeddings"
            );
        })?;
        tracing::info!(
            inserted,
            deleted,
            replaced = replaced_versions.len(),
            "Embeddings inserted"
        );

        let report = BatchReport {
            disposition: BatchDisposition::Persisted,
            files,
            replaced_versions,
            deleted,
            inserted,
        };
        self.metrics.record_batch(report.tally());
        Ok(report)
    }

    /// Return the current embedding metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl EmbeddingApi for EmbeddingService {
    async fn authenticate(&self, api_key: Option<&str>) -> Result<ClientIdentity, AuthError> {
        EmbeddingService::authenticate(self, api_key).await
    }

    async fn embed_batch(
        &self,
        client: &ClientIdentity,
        request: BatchRequest,
    ) -> Result<BatchReport, ServiceError> {
        EmbeddingService::embed_batch(self, client, request).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        EmbeddingService::metrics_snapshot(self)
    }
}
