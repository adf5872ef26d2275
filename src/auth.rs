//! API-key extraction and client resolution.
//!
//! The key is read from a configurable header (default `x-api-key`), with
//! `Authorization: Bearer <key>` as a fallback. Resolution is delegated to an
//! [`Authenticator`]: either a lookup in the clients table or a static map from configuration.

use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use thiserror::Error;

/// Identity a request acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Client identifier forwarded to the file loader.
    pub id: String,
}

/// Errors raised while authenticating a request.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was present on the request.
    #[error("missing API key")]
    MissingCredential,
    /// The credential did not resolve to a client.
    #[error("unknown API key")]
    UnknownCredential,
    /// The lookup itself failed.
    #[error("client lookup failed: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Resolves API keys into client identities.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve `api_key`, failing with [`AuthError::UnknownCredential`] when it is not recognised.
    async fn authenticate(&self, api_key: &str) -> Result<ClientIdentity, AuthError>;
}

/// Pull the API key out of request headers.
pub fn extract_api_key(headers: &HeaderMap, header_name: &str) -> Option<String> {
    let direct = headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(key) = direct {
        return Some(key.to_string());
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Authenticator backed by a fixed key map.
pub struct StaticAuthenticator {
    clients: HashMap<String, String>,
}

impl StaticAuthenticator {
    /// Build from `(api_key, client_id)` pairs.
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            clients: pairs.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, api_key: &str) -> Result<ClientIdentity, AuthError> {
        self.clients
            .get(api_key)
            .map(|id| ClientIdentity { id: id.clone() })
            .ok_or(AuthError::UnknownCredential)
    }
}

/// Authenticator that looks keys up in a `(id, api_key)` clients table.
pub struct PgAuthenticator {
    pool: PgPool,
    table: String,
}

impl PgAuthenticator {
    /// `table` must already be validated as a SQL identifier.
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl Authenticator for PgAuthenticator {
    async fn authenticate(&self, api_key: &str) -> Result<ClientIdentity, AuthError> {
        let query = format!(
            "SELECT id::text FROM {} WHERE api_key = $1 LIMIT 1",
            self.table
        );
        let row: Option<(String,)> = sqlx::query_as(&query)
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(id,)| ClientIdentity { id })
            .ok_or(AuthError::UnknownCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_configured_header_first() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static(" key-1 "));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer key-2"));

        assert_eq!(
            extract_api_key(&headers, "x-api-key").as_deref(),
            Some("key-1")
        );
    }

    #[test]
    fn falls_back_to_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer key-2"));

        assert_eq!(
            extract_api_key(&headers, "x-api-key").as_deref(),
            Some("key-2")
        );
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        for value in ["bearer key-3", "BEARER key-3", "BeArEr   key-3 "] {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
            assert_eq!(
                extract_api_key(&headers, "x-api-key").as_deref(),
                Some("key-3"),
                "{value}"
            );
        }
    }

    #[test]
    fn missing_or_blank_credentials_yield_none() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_api_key(&headers, "x-api-key"), None);

        headers.insert("x-api-key", HeaderValue::from_static("   "));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_api_key(&headers, "x-api-key"), None);
    }

    #[tokio::test]
    async fn static_authenticator_resolves_known_keys() {
        let auth = StaticAuthenticator::new([("key-1".to_string(), "client-a".to_string())]);

        let identity = auth.authenticate("key-1").await.expect("known key");
        assert_eq!(identity.id, "client-a");

        let error = auth.authenticate("nope").await.unwrap_err();
        assert!(matches!(error, AuthError::UnknownCredential));
    }
}
