//! coderag-embed - Query embedding providers
//!
//! Dense retrieval needs the query text mapped into the same vector space
//! that ingestion used for chunk embeddings. This crate provides:
//!
//! - [`HttpEmbedder`], a client for OpenAI-compatible `/embeddings` endpoints
//! - [`MockEmbedder`], a deterministic embedder for tests and offline runs

mod http;
mod mock;

pub use http::HttpEmbedder;
pub use mock::MockEmbedder;

// Re-export the Embedder trait for convenience
pub use coderag_core::Embedder;
