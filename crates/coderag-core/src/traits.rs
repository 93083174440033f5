//! Core traits defining the interfaces between components.

use async_trait::async_trait;

use crate::error::Result;
use crate::results::ScoredCandidate;
use crate::types::{
    Chunk, Entity, EntityKey, RepoFilter, Relationship, Repository, RepositorySummary, Stats,
};

/// Storage layer trait.
///
/// Reads are safe to issue concurrently. Every batch write runs in a single
/// transaction: it either lands completely or not at all.
#[async_trait]
pub trait Store: Send + Sync {
    // Repository operations
    async fn insert_repository(&self, repository: Repository) -> Result<()>;
    async fn list_repositories(&self) -> Result<Vec<RepositorySummary>>;

    // Entity and relationship operations
    async fn insert_entities(&self, entities: &[Entity]) -> Result<()>;
    async fn insert_relationships(&self, relationships: &[Relationship]) -> Result<()>;
    async fn get_entity(&self, key: &EntityKey) -> Result<Option<Entity>>;

    /// Resolve a name to entities: exact id, name or qualified name
    /// (case-insensitive), restricted to `repos` when given.
    async fn find_entities(
        &self,
        name: &str,
        repos: Option<&RepoFilter>,
        limit: usize,
    ) -> Result<Vec<Entity>>;

    /// Edges leaving `key` with `strength >= min_strength`.
    async fn get_outgoing_edges(&self, key: &EntityKey, min_strength: f32)
        -> Result<Vec<Relationship>>;

    /// Edges arriving at `key` with `strength >= min_strength`.
    async fn get_incoming_edges(&self, key: &EntityKey, min_strength: f32)
        -> Result<Vec<Relationship>>;

    // Chunk operations
    async fn batch_insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;
    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>>;
    async fn get_chunks_for_entity(&self, key: &EntityKey) -> Result<Vec<Chunk>>;

    // Search operations

    /// Term-overlap search. Raw score is negated BM25 (higher is better).
    async fn lexical_search(
        &self,
        query: &str,
        repos: Option<&RepoFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredCandidate>>;

    /// Structural search. Raw score is the pattern specificity tier.
    async fn pattern_search(
        &self,
        pattern: &str,
        repos: Option<&RepoFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredCandidate>>;

    /// Nearest-neighbour search. Raw score is `1 - cosine_distance / 2`.
    ///
    /// Returns `RagError::CapabilityUnavailable` when the vector index is not
    /// provisioned.
    async fn vector_search(
        &self,
        embedding: &[f32],
        repos: Option<&RepoFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredCandidate>>;

    /// Whether `vector_search` is backed by an index.
    fn has_vector_capability(&self) -> bool;

    // Stats
    async fn get_stats(&self) -> Result<Stats>;
}

/// External embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}
