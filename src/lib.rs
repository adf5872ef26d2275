#![deny(missing_docs)]

//! Core library for the docvec batch embedding service.

/// HTTP routing and REST handlers.
pub mod api;
/// API-key extraction and client resolution.
pub mod auth;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// File storage client.
pub mod loader;
/// Structured logging and tracing setup.
pub mod logging;
/// Embedding metrics helpers.
pub mod metrics;
/// Document embedding pipeline.
pub mod processing;
/// Vector store backends.
pub mod store;
