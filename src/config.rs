use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_EMBEDDINGS_TABLE: &str = "embeddings";
const DEFAULT_CLIENTS_TABLE: &str = "clients";
const DEFAULT_API_KEY_HEADER: &str = "x-api-key";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_FILE_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the embedding service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// PostgreSQL connection string used by the vector store and client lookup.
    pub database_url: Option<String>,
    /// Upper bound on pooled database connections.
    pub database_max_connections: u32,
    /// Table holding `(document_version_id, content, embedding)` rows.
    pub embeddings_table: String,
    /// Table mapping API keys to client identifiers.
    pub clients_table: String,
    /// Backend persisting embedding records.
    pub vector_store_driver: VectorStoreDriver,
    /// Backend resolving API keys into client identities.
    pub auth_provider: AuthProvider,
    /// Static `key=client` pairs used when `auth_provider` is `static`.
    pub api_keys: Vec<(String, String)>,
    /// Request header carrying the API key.
    pub api_key_header: String,
    /// Base URL of the file storage service documents are downloaded from.
    pub file_storage_url: String,
    /// Largest file download accepted, in bytes.
    pub file_max_bytes: u64,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Optional Ollama base URL.
    pub ollama_url: Option<String>,
    /// Optional OpenAI-compatible base URL.
    pub openai_url: Option<String>,
    /// Bearer token for the OpenAI-compatible provider.
    pub openai_api_key: Option<String>,
    /// Optional override for the automatic chunk size selection.
    pub text_splitter_chunk_size: Option<usize>,
    /// Optional token overlap between adjacent chunks.
    pub text_splitter_chunk_overlap: Option<usize>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI (or compatible) embeddings API.
    OpenAI,
    /// Deterministic in-process hashing, for offline runs.
    Hash,
}

/// Storage backends for embedding records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreDriver {
    /// PostgreSQL with the pgvector extension.
    Postgres,
    /// Process-local store; contents vanish on restart.
    Memory,
}

/// Sources of API-key to client resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    /// Look keys up in the clients table.
    Postgres,
    /// Resolve keys against `API_KEYS`.
    Static,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vector_store_driver = load_env_optional("VECTOR_STORE_DRIVER")
            .map(|value| {
                value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("VECTOR_STORE_DRIVER".into()))
            })
            .transpose()?
            .unwrap_or(VectorStoreDriver::Postgres);
        let auth_provider = load_env_optional("AUTH_PROVIDER")
            .map(|value| {
                value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("AUTH_PROVIDER".into()))
            })
            .transpose()?
            .unwrap_or(AuthProvider::Postgres);
        let api_keys = load_env_optional("API_KEYS")
            .map(|value| parse_api_keys(&value))
            .transpose()?
            .unwrap_or_default();

        let config = Self {
            database_url: load_env_optional("DATABASE_URL"),
            database_max_connections: parse_optional("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            embeddings_table: load_env_optional("EMBEDDINGS_TABLE")
                .unwrap_or_else(|| DEFAULT_EMBEDDINGS_TABLE.to_string()),
            clients_table: load_env_optional("CLIENTS_TABLE")
                .unwrap_or_else(|| DEFAULT_CLIENTS_TABLE.to_string()),
            vector_store_driver,
            auth_provider,
            api_keys,
            api_key_header: load_env_optional("API_KEY_HEADER")
                .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string())
                .to_ascii_lowercase(),
            file_storage_url: load_env("FILE_STORAGE_URL")?,
            file_max_bytes: parse_optional("FILE_MAX_BYTES")?.unwrap_or(DEFAULT_FILE_MAX_BYTES),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            ollama_url: load_env_optional("OLLAMA_URL"),
            openai_url: load_env_optional("OPENAI_URL"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            text_splitter_chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?,
            text_splitter_chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?,
            server_port: parse_optional("SERVER_PORT")?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let needs_database = self.vector_store_driver == VectorStoreDriver::Postgres
            || self.auth_provider == AuthProvider::Postgres;
        if needs_database && self.database_url.is_none() {
            return Err(ConfigError::MissingVariable("DATABASE_URL".into()));
        }
        if self.auth_provider == AuthProvider::Static && self.api_keys.is_empty() {
            return Err(ConfigError::MissingVariable("API_KEYS".into()));
        }
        if self.file_max_bytes == 0 {
            return Err(ConfigError::InvalidValue("FILE_MAX_BYTES".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if !is_sql_identifier(&self.embeddings_table) {
            return Err(ConfigError::InvalidValue("EMBEDDINGS_TABLE".into()));
        }
        if !is_sql_identifier(&self.clients_table) {
            return Err(ConfigError::InvalidValue("CLIENTS_TABLE".into()));
        }
        Ok(())
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Parse `key=client` pairs separated by commas.
pub(crate) fn parse_api_keys(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, client) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidValue("API_KEYS".into()))?;
            let (key, client) = (key.trim(), client.trim());
            if key.is_empty() || client.is_empty() {
                return Err(ConfigError::InvalidValue("API_KEYS".into()));
            }
            Ok((key.to_string(), client.to_string()))
        })
        .collect()
}

/// Table names are interpolated into SQL, so only plain (optionally schema-qualified)
/// identifiers are accepted.
pub(crate) fn is_sql_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for VectorStoreDriver {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "pgvector" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for AuthProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "static" => Ok(Self::Static),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment and install it in the global cache.
///
/// A `.env` file in the working directory is read first when present. Later calls return the
/// configuration installed by the first successful call.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    Ok(CONFIG.get_or_init(|| config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_api_key_pairs() {
        let pairs = parse_api_keys(" key-a=client-1, key-b = client-2 ,").expect("pairs");
        assert_eq!(
            pairs,
            vec![
                ("key-a".to_string(), "client-1".to_string()),
                ("key-b".to_string(), "client-2".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_api_key_without_client() {
        assert!(parse_api_keys("key-a").is_err());
        assert!(parse_api_keys("key-a=").is_err());
    }

    #[test]
    fn table_names_must_be_identifiers() {
        assert!(is_sql_identifier("embeddings"));
        assert!(is_sql_identifier("public.embeddings"));
        assert!(is_sql_identifier("_vectors_2"));
        assert!(!is_sql_identifier("embeddings; DROP TABLE clients"));
        assert!(!is_sql_identifier("a.b.c"));
        assert!(!is_sql_identifier("1table"));
        assert!(!is_sql_identifier(""));
    }

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!("OpenAI".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::OpenAI));
        assert_eq!("hash".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::Hash));
        assert_eq!(
            "pgvector".parse::<VectorStoreDriver>(),
            Ok(VectorStoreDriver::Postgres)
        );
        assert_eq!("Static".parse::<AuthProvider>(), Ok(AuthProvider::Static));
        assert!("qdrant".parse::<VectorStoreDriver>().is_err());
    }
}
