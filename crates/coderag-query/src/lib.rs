//! coderag-query - Query analysis, retrieval and fusion
//!
//! This crate answers natural-language and identifier queries over a
//! multi-repository code knowledge base by running four retrieval strategies
//! concurrently and fusing their scores.
//!
//! # Features
//!
//! - Query classification (identifier / structural / conceptual / mixed)
//!   selecting per-strategy fusion weights
//! - Dense, sparse, pattern and graph retrieval behind one `Retriever` trait
//! - Per-strategy time budgets; failed strategies only degrade the result
//! - Weighted score fusion with per-source coverage accounting
//! - Token budgeting of the serialized results
//! - Dependency and cross-repository reference queries over the entity graph
//!
//! # Example
//!
//! ```rust,ignore
//! use coderag_query::{QueryEngine, QueryRequest};
//! use std::sync::Arc;
//!
//! let engine = QueryEngine::new(Arc::new(store), None, config);
//! let envelope = engine
//!     .query(QueryRequest::new("UserService.validateCredentials").with_limit(5))
//!     .await?;
//! ```

pub mod analyzer;
mod budget;
mod engine;
mod fusion;
mod graph;
mod retrieval;

#[cfg(test)]
pub(crate) mod test_support;

pub use analyzer::{analyze, analyze_with_index, weights_for};
pub use budget::{apply_token_budget, estimate_tokens, BudgetReport, CHARS_PER_TOKEN};
pub use engine::{QueryEngine, QueryRequest, MAX_QUERY_CHARS};
pub use fusion::{fuse, normalize, SourceOutcome};
pub use graph::{GraphExpander, Traversal, TraversalMode};
pub use retrieval::{
    DenseRetriever, GraphRetriever, PatternRetriever, RetrievalRequest, Retriever, RetrieverSet,
    SparseRetriever,
};

// Re-export for convenience
pub use coderag_core::{FusedResult, ResultEnvelope};
