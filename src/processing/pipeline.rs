//! The per-file pipeline: load, chunk, embed, pair.

use crate::{
    auth::ClientIdentity,
    embedding::EmbeddingClient,
    loader::{FileLoader, LoadRequest},
    processing::{
        chunking::Chunker,
        types::{FileError, FileOutcome, FileRef, FileStatus},
    },
    store::EmbeddingRecord,
};

/// Collaborators a pipeline run borrows from the service.
pub(crate) struct PipelineContext<'a> {
    pub(crate) loader: &'a dyn FileLoader,
    pub(crate) chunker: &'a dyn Chunker,
    pub(crate) embedder: &'a dyn EmbeddingClient,
}

/// Run one file through the pipeline. Errors are folded into the returned outcome.
pub(crate) async fn run_file(
    context: &PipelineContext<'_>,
    file: &FileRef,
    client: &ClientIdentity,
    force: bool,
) -> FileOutcome {
    let status = match embed_file(context, file, client, force).await {
        Ok(status) => status,
        Err(error) => {
            tracing::warn!(
                file_id = %file.file_id,
                version_id = %file.version_id,
                error = %error,
                "File pipeline failed"
            );
            FileStatus::Failed(error)
        }
    };

    FileOutcome {
        file_id: file.file_id.clone(),
        version_id: file.version_id.clone(),
        status,
    }
}

async fn embed_file(
    context: &PipelineContext<'_>,
    file: &FileRef,
    client: &ClientIdentity,
    force: bool,
) -> Result<FileStatus, FileError> {
    let request = LoadRequest {
        file_id: file.file_id.clone(),
        version_id: file.version_id.clone(),
        client_id: client.id.clone(),
        force,
    };
    let Some(descriptor) = context.loader.load_file(&request).await? else {
        tracing::info!(
            file_id = %file.file_id,
            version_id = %file.version_id,
            "File already embedded; skipping"
        );
        return Ok(FileStatus::Skipped);
    };
    tracing::info!(
        file_id = %file.file_id,
        version_id = %file.version_id,
        name = %descriptor.name,
        bytes = descriptor.bytes.len(),
        checksum = %descriptor.checksum,
        "File loaded"
    );

    let contents = context.chunker.chunk(&descriptor).await?.contents();
    tracing::debug!(
        version_id = %file.version_id,
        chunks = contents.len(),
        "File chunked"
    );
    if contents.is_empty() {
        return Ok(FileStatus::Embedded(Vec::new()));
    }

    let embeddings = context
        .embedder
        .generate_embeddings(contents.clone())
        .await?;
    if embeddings.len() != contents.len() {
        tracing::warn!(
            version_id = %file.version_id,
            chunks = contents.len(),
            embeddings = embeddings.len(),
            "Embedding count does not match chunk count; dropping file"
        );
        return Ok(FileStatus::LengthMismatch {
            chunks: contents.len(),
            embeddings: embeddings.len(),
        });
    }

    let records = pair_records(&file.version_id, contents, embeddings);
    Ok(FileStatus::Embedded(records))
}

/// Pair each chunk with the vector at the same index.
fn pair_records(
    version_id: &str,
    contents: Vec<String>,
    embeddings: Vec<Vec<f32>>,
) -> Vec<EmbeddingRecord> {
    contents
        .into_iter()
        .zip(embeddings)
        .map(|(content, embedding)| EmbeddingRecord {
            document_version_id: version_id.to_string(),
            content,
            embedding,
        })
        .collect()
}
