//! Chunk-size heuristics and semantic chunking of downloaded files.
//!
//! - Automatic sizing: derive a token budget from the embedding model's context window and
//!   clamp to a conservative range; `TEXT_SPLITTER_CHUNK_SIZE` overrides it.
//! - Overlap: optionally carry a sliding token overlap (`TEXT_SPLITTER_CHUNK_OVERLAP`) from one
//!   chunk into the next.
//! - Token counting: `tiktoken-rs` for known encodings, whitespace counting when the model's
//!   tokenizer is unavailable (common for Ollama models).
//!
//! Splitting runs on the blocking pool so large documents do not stall the request task.

use crate::config::EmbeddingProvider;
use crate::loader::FileDescriptor;
use anyhow::Error as TokenizerError;
use async_trait::async_trait;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, model::get_context_size, o200k_base, p50k_base,
    p50k_edit, r50k_base,
};

use super::types::ChunkingError;

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const MIN_AUTOMATIC_CHUNK_SIZE: usize = 256;
const MAX_AUTOMATIC_CHUNK_SIZE: usize = 1024;
const UTF8_BOM: &str = "\u{feff}";

/// A contiguous span of extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk text.
    pub content: String,
}

/// Ordered chunks extracted from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedDocument {
    /// Chunks in document order.
    pub chunks: Vec<Chunk>,
}

impl ChunkedDocument {
    /// Chunk contents in order, as passed to the embedder.
    pub fn contents(&self) -> Vec<String> {
        self.chunks.iter().map(|chunk| chunk.content.clone()).collect()
    }
}

/// Splits a loaded file into ordered text chunks.
#[async_trait]
pub trait Chunker: Send + Sync {
    /// Extract and chunk the file's text.
    async fn chunk(&self, file: &FileDescriptor) -> Result<ChunkedDocument, ChunkingError>;
}

/// Token-budgeted semantic chunker over UTF-8 text files.
pub struct SemanticChunker {
    chunk_size: usize,
    overlap: usize,
    token_counter: TokenCounter,
}

impl SemanticChunker {
    /// Build a chunker whose token counter matches `provider`/`model`.
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        provider: EmbeddingProvider,
        model: &str,
    ) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        let token_counter = build_token_counter(provider, model)?;
        tracing::debug!(
            chunk_size,
            overlap,
            provider = ?provider,
            model,
            "Initialized semantic chunker"
        );
        Ok(Self {
            chunk_size,
            overlap,
            token_counter,
        })
    }

    /// Chunker counting whitespace-separated words, independent of any model.
    pub fn whitespace(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            chunk_size,
            overlap,
            token_counter: default_token_counter(),
        })
    }
}

#[async_trait]
impl Chunker for SemanticChunker {
    async fn chunk(&self, file: &FileDescriptor) -> Result<ChunkedDocument, ChunkingError> {
        let text = std::str::from_utf8(&file.bytes)
            .map_err(|source| ChunkingError::UnsupportedEncoding {
                name: file.name.clone(),
                source,
            })?
            .trim_start_matches(UTF8_BOM)
            .to_string();
        if text.trim().is_empty() {
            return Ok(ChunkedDocument::default());
        }

        let (chunk_size, overlap) = (self.chunk_size, self.overlap);
        let counter = self.token_counter.clone();
        let pieces = tokio::task::spawn_blocking(move || {
            chunk_text_with_counter(&text, chunk_size, overlap, counter)
        })
        .await?;

        Ok(ChunkedDocument {
            chunks: pieces
                .into_iter()
                .filter(|piece| !piece.trim().is_empty())
                .map(|content| Chunk { content })
                .collect(),
        })
    }
}

/// Determine the chunk size, respecting an explicit override.
///
/// Without an override the size is a quarter of the provider/model context window, clamped
/// into `[256, 1024]`.
pub fn determine_chunk_size(
    override_size: Option<usize>,
    provider: EmbeddingProvider,
    model: &str,
) -> usize {
    if let Some(explicit) = override_size {
        return explicit.max(1);
    }

    let window = embedding_context_window(provider, model);
    let base = (window / 4).max(1);
    base.clamp(MIN_AUTOMATIC_CHUNK_SIZE, MAX_AUTOMATIC_CHUNK_SIZE)
}

/// Look up the embedding context window for a given provider/model combination.
pub(crate) fn embedding_context_window(provider: EmbeddingProvider, model: &str) -> usize {
    match provider {
        EmbeddingProvider::OpenAI => openai_embedding_context_window(model),
        EmbeddingProvider::Ollama | EmbeddingProvider::Hash => {
            ollama_embedding_context_window(model)
        }
    }
}

fn openai_embedding_context_window(model: &str) -> usize {
    if model.starts_with("text-embedding-3") || model.starts_with("text-embedding-ada-002") {
        return 8192;
    }

    let size = get_context_size(model);
    if size == 4096 && model.contains("embedding") {
        tracing::debug!(model, "Using default embedding context window fallback");
    }
    size
}

fn ollama_embedding_context_window(model: &str) -> usize {
    let normalized = model.to_lowercase();
    let base = normalized.split(':').next().unwrap_or_default();
    match base {
        "nomic-embed-text" | "mxbai-embed-large" | "mxbai-embed-large-v1" | "bge-m3" => 8192,
        value if value.contains("all-minilm") => 512,
        value if value.contains("e5-large") => 4096,
        _ => {
            tracing::trace!(model, "Using default Ollama context window estimate");
            4096
        }
    }
}

/// Build a token counter for the given provider/model.
///
/// OpenAI models must resolve a tokenizer; other providers fall back to whitespace counting when
/// no encoding fits.
fn build_token_counter(
    provider: EmbeddingProvider,
    model: &str,
) -> Result<TokenCounter, ChunkingError> {
    match provider {
        EmbeddingProvider::OpenAI => build_tiktoken_counter(model),
        EmbeddingProvider::Ollama | EmbeddingProvider::Hash => {
            match build_tiktoken_counter(model) {
                Ok(counter) => Ok(counter),
                Err(error) => {
                    tracing::warn!(
                        model,
                        error = %error,
                        "Tokenizer unavailable; falling back to whitespace counter"
                    );
                    Ok(default_token_counter())
                }
            }
        }
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

fn default_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = token_counter.clone();
    let chunker = semchunk_rs::Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, overlap, &token_counter)
}

/// Prefix each chunk with the tail of its predecessor, keeping every result within
/// `chunk_size` tokens.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if chunks.is_empty() || effective_overlap == 0 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;

    for current in chunks {
        let next = match previous.as_deref() {
            Some(prev) => build_overlapped_chunk(
                prev,
                &current,
                effective_overlap,
                chunk_size,
                token_counter,
            ),
            None => current.clone(),
        };
        overlapped.push(next);
        previous = Some(current);
    }

    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
    token_counter: &TokenCounter,
) -> String {
    let tail = suffix_within_budget(previous, overlap, token_counter);
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);

    if !tail.is_empty() {
        combined.push_str(tail);
        let needs_space = !tail.ends_with(char::is_whitespace)
            && !current.starts_with(char::is_whitespace);
        if needs_space {
            combined.push(' ');
        }
    }

    combined.push_str(current);
    suffix_within_budget(&combined, chunk_size, token_counter).to_string()
}

/// Longest whitespace-trimmed suffix of `text` whose token count fits `budget`.
fn suffix_within_budget<'a>(text: &'a str, budget: usize, token_counter: &TokenCounter) -> &'a str {
    if budget == 0 {
        return "";
    }

    let trimmed = text.trim_start();
    if token_counter.as_ref()(trimmed) <= budget {
        return trimmed;
    }

    text.char_indices()
        .skip(1)
        .map(|(offset, _)| text[offset..].trim_start())
        .find(|candidate| token_counter.as_ref()(*candidate) <= budget)
        .unwrap_or("")
}
