//! File loading for the embedding pipeline.
//!
//! A loader turns a `(file, version)` reference into a [`FileDescriptor`] holding the raw bytes,
//! or reports that the version is already embedded and should be skipped. The HTTP loader checks
//! the vector store for existing rows before downloading anything, so a non-forced request for
//! an embedded version costs one query.

use crate::store::{StoreError, VectorStore};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url, header::CONTENT_DISPOSITION, header::CONTENT_TYPE};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const CLIENT_ID_HEADER: &str = "x-client-id";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Parameters for a single file load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// Storage identifier of the file.
    pub file_id: String,
    /// Version of the file to load.
    pub version_id: String,
    /// Client the request acts for.
    pub client_id: String,
    /// Load even when the version already has embeddings.
    pub force: bool,
}

/// A downloaded file ready for chunking.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    /// Storage identifier of the file.
    pub file_id: String,
    /// Version the bytes belong to.
    pub version_id: String,
    /// Display name, used in logs.
    pub name: String,
    /// MIME type reported by storage, if any.
    pub content_type: Option<String>,
    /// Raw file contents.
    pub bytes: Vec<u8>,
    /// Hex SHA-256 of `bytes`.
    pub checksum: String,
}

impl FileDescriptor {
    /// Build a descriptor, computing the checksum from `bytes`.
    pub fn new(
        file_id: impl Into<String>,
        version_id: impl Into<String>,
        name: impl Into<String>,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let checksum = hex::encode(Sha256::digest(&bytes));
        Self {
            file_id: file_id.into(),
            version_id: version_id.into(),
            name: name.into(),
            content_type,
            bytes,
            checksum,
        }
    }
}

/// Errors raised while loading a file.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The existing-embeddings probe failed.
    #[error("Failed to check existing embeddings: {0}")]
    Store(#[from] StoreError),
    /// Storage base URL could not be used to build a download URL.
    #[error("Invalid file storage URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("File download failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Storage has no such file version.
    #[error("File {file_id} version {version_id} not found")]
    NotFound {
        /// Requested file.
        file_id: String,
        /// Requested version.
        version_id: String,
    },
    /// The download exceeds the configured size limit.
    #[error("File {file_id} exceeds the {limit} byte download limit")]
    TooLarge {
        /// Requested file.
        file_id: String,
        /// Configured limit in bytes.
        limit: u64,
    },
    /// Storage answered with an unexpected status.
    #[error("Unexpected file storage response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by storage.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Source of files for the embedding pipeline.
#[async_trait]
pub trait FileLoader: Send + Sync {
    /// Load the requested file, or return `None` when it is already embedded and `force` is
    /// false.
    async fn load_file(&self, request: &LoadRequest) -> Result<Option<FileDescriptor>, LoaderError>;
}

/// Loader that downloads files from an HTTP storage service.
///
/// Files are fetched from `GET {base}/files/{file_id}/versions/{version_id}`, with the client id
/// forwarded in `x-client-id`.
pub struct HttpFileLoader {
    client: Client,
    base_url: Url,
    store: Arc<dyn VectorStore>,
    max_bytes: u64,
}

impl HttpFileLoader {
    /// Build a loader against `base_url`, consulting `store` for already-embedded versions.
    pub fn new(base_url: &str, store: Arc<dyn VectorStore>) -> Result<Self, LoaderError> {
        let client = Client::builder()
            .user_agent("docvec/0.1")
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        let base_url = Url::parse(base_url).map_err(|err| LoaderError::InvalidUrl(err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(LoaderError::InvalidUrl(base_url.to_string()));
        }
        tracing::debug!(url = %base_url, "Initialized file storage client");
        Ok(Self {
            client,
            base_url,
            store,
            max_bytes: DEFAULT_MAX_BYTES,
        })
    }

    /// Reject downloads larger than `max_bytes`.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Read the response body, stopping as soon as it exceeds the size limit.
    async fn read_body(&self, mut response: Response, file_id: &str) -> Result<Vec<u8>, LoaderError> {
        let too_large = || LoaderError::TooLarge {
            file_id: file_id.to_string(),
            limit: self.max_bytes,
        };
        if response
            .content_length()
            .is_some_and(|length| length > self.max_bytes)
        {
            return Err(too_large());
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    fn download_url(&self, file_id: &str, version_id: &str) -> Result<Url, LoaderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| LoaderError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["files", file_id, "versions", version_id]);
        Ok(url)
    }
}

#[async_trait]
impl FileLoader for HttpFileLoader {
    async fn load_file(&self, request: &LoadRequest) -> Result<Option<FileDescriptor>, LoaderError> {
        if !request.force && self.store.has_version(&request.version_id).await? {
            tracing::debug!(
                file_id = %request.file_id,
                version_id = %request.version_id,
                "Version already embedded; skipping download"
            );
            return Ok(None);
        }

        let url = self.download_url(&request.file_id, &request.version_id)?;
        let response = self
            .client
            .get(url)
            .header(CLIENT_ID_HEADER, &request.client_id)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(LoaderError::NotFound {
                    file_id: request.file_id.clone(),
                    version_id: request.version_id.clone(),
                });
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(LoaderError::UnexpectedStatus { status, body });
            }
        }

        let headers = response.headers();
        let name = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(disposition_filename)
            .unwrap_or_else(|| request.file_id.clone());
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = self.read_body(response, &request.file_id).await?;

        Ok(Some(FileDescriptor::new(
            request.file_id.clone(),
            request.version_id.clone(),
            name,
            content_type,
            bytes,
        )))
    }
}

/// Extract `filename` from a `Content-Disposition` header value.
fn disposition_filename(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EmbeddingRecord, MemoryVectorStore};
    use httpmock::{Method::GET, MockServer};

    fn request(force: bool) -> LoadRequest {
        LoadRequest {
            file_id: "f1".into(),
            version_id: "v1".into(),
            client_id: "client-a".into(),
            force,
        }
    }

    fn embedded_store() -> Arc<dyn VectorStore> {
        Arc::new(MemoryVectorStore::with_records(vec![EmbeddingRecord {
            document_version_id: "v1".into(),
            content: "old".into(),
            embedding: vec![1.0],
        }]))
    }

    #[test]
    fn parses_quoted_and_bare_filenames() {
        assert_eq!(
            disposition_filename(r#"attachment; filename="report.txt""#).as_deref(),
            Some("report.txt")
        );
        assert_eq!(
            disposition_filename("inline; filename=notes.md").as_deref(),
            Some("notes.md")
        );
        assert_eq!(disposition_filename("inline"), None);
    }

    #[tokio::test]
    async fn downloads_file_with_client_header() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/files/f1/versions/v1")
                    .header("x-client-id", "client-a");
                then.status(200)
                    .header("content-type", "text/plain")
                    .header("content-disposition", r#"attachment; filename="guide.txt""#)
                    .body("hello world");
            })
            .await;

        let loader = HttpFileLoader::new(&server.base_url(), Arc::new(MemoryVectorStore::new()))
            .expect("loader");
        let file = loader
            .load_file(&request(false))
            .await
            .expect("load")
            .expect("descriptor");

        mock.assert();
        assert_eq!(file.name, "guide.txt");
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(file.bytes, b"hello world");
        assert_eq!(
            file.checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn skips_embedded_version_without_force() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/files/f1/versions/v1");
                then.status(200).body("unused");
            })
            .await;

        let loader = HttpFileLoader::new(&server.base_url(), embedded_store()).expect("loader");
        let file = loader.load_file(&request(false)).await.expect("load");

        assert!(file.is_none());
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn force_downloads_embedded_version() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/files/f1/versions/v1");
                then.status(200).body("fresh");
            })
            .await;

        let loader = HttpFileLoader::new(&server.base_url(), embedded_store()).expect("loader");
        let file = loader
            .load_file(&request(true))
            .await
            .expect("load")
            .expect("descriptor");

        mock.assert();
        assert_eq!(file.name, "f1");
        assert_eq!(file.bytes, b"fresh");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/f1/versions/v1");
                then.status(404);
            })
            .await;

        let loader = HttpFileLoader::new(&server.base_url(), Arc::new(MemoryVectorStore::new()))
            .expect("loader");
        let error = loader.load_file(&request(false)).await.unwrap_err();

        assert!(matches!(error, LoaderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn oversized_download_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/f1/versions/v1");
                then.status(200).body("hello world");
            })
            .await;

        let loader = HttpFileLoader::new(&server.base_url(), Arc::new(MemoryVectorStore::new()))
            .expect("loader")
            .with_max_bytes(5);
        let error = loader.load_file(&request(false)).await.unwrap_err();

        assert!(matches!(
            error,
            LoaderError::TooLarge { ref file_id, limit: 5 } if file_id == "f1"
        ));
    }

    #[tokio::test]
    async fn download_at_the_limit_is_accepted() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/f1/versions/v1");
                then.status(200).body("hello");
            })
            .await;

        let loader = HttpFileLoader::new(&server.base_url(), Arc::new(MemoryVectorStore::new()))
            .expect("loader")
            .with_max_bytes(5);
        let file = loader
            .load_file(&request(false))
            .await
            .expect("load")
            .expect("descriptor");

        assert_eq!(file.bytes, b"hello");
    }

    #[test]
    fn download_url_escapes_segments() {
        let loader = HttpFileLoader::new(
            "http://storage.local/api/",
            Arc::new(MemoryVectorStore::new()),
        )
        .expect("loader");
        let url = loader.download_url("a/b", "v 1").expect("url");
        assert_eq!(
            url.as_str(),
            "http://storage.local/api/files/a%2Fb/versions/v%201"
        );
    }
}
