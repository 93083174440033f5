//! Retrieval strategies.
//!
//! Each strategy is a thin adapter over the store. Strategies do not time
//! themselves and never share mutable state; the orchestrator runs them
//! concurrently under its own timeout.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use coderag_core::{
    repo_allowed, sort_candidates, Embedder, EntityKey, GraphConfig, QueryAnalysis, RagError,
    RepoFilter, Result, ScoredCandidate, Source, Store,
};

use crate::analyzer::identifier_tokens;
use crate::graph::{GraphExpander, TraversalMode};

/// Input shared by every strategy for one query.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub analysis: QueryAnalysis,
    pub repositories: Option<RepoFilter>,

    /// Candidates to return (already includes fusion headroom).
    pub limit: usize,
}

/// A retrieval strategy.
///
/// Returning `RagError::CapabilityUnavailable` marks the strategy as
/// unavailable for this request rather than failed.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn source(&self) -> Source;

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ScoredCandidate>>;
}

/// Nearest-neighbour search over chunk embeddings.
pub struct DenseRetriever<S> {
    store: Arc<S>,
    embedder: Option<Arc<dyn Embedder>>,
    embed_timeout: Duration,
}

impl<S: Store> DenseRetriever<S> {
    pub fn new(store: Arc<S>, embedder: Option<Arc<dyn Embedder>>, embed_timeout: Duration) -> Self {
        Self {
            store,
            embedder,
            embed_timeout,
        }
    }
}

#[async_trait]
impl<S: Store + 'static> Retriever for DenseRetriever<S> {
    fn source(&self) -> Source {
        Source::Dense
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ScoredCandidate>> {
        let Some(embedder) = &self.embedder else {
            return Err(RagError::capability_unavailable("query_embedding"));
        };
        if !self.store.has_vector_capability() {
            return Err(RagError::capability_unavailable("vector_search"));
        }

        let embedding = tokio::time::timeout(self.embed_timeout, embedder.embed_query(&request.query))
            .await
            .map_err(|_| {
                RagError::embedding(format!(
                    "Query embedding timed out after {}ms",
                    self.embed_timeout.as_millis()
                ))
            })??;

        self.store
            .vector_search(&embedding, request.repositories.as_ref(), request.limit)
            .await
    }
}

/// Lexical term-overlap search.
pub struct SparseRetriever<S> {
    store: Arc<S>,
}

impl<S: Store> SparseRetriever<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> Retriever for SparseRetriever<S> {
    fn source(&self) -> Source {
        Source::Sparse
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ScoredCandidate>> {
        self.store
            .lexical_search(&request.query, request.repositories.as_ref(), request.limit)
            .await
    }
}

/// Structural pattern search.
pub struct PatternRetriever<S> {
    store: Arc<S>,
}

impl<S: Store> PatternRetriever<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> Retriever for PatternRetriever<S> {
    fn source(&self) -> Source {
        Source::Pattern
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ScoredCandidate>> {
        self.store
            .pattern_search(&request.query, request.repositories.as_ref(), request.limit)
            .await
    }
}

/// Chunks of entities reachable from the entities a query names.
///
/// Seed chunks score 1.0; a chunk reached at hop `h` scores the product of
/// edge strengths along its path divided by `h`.
pub struct GraphRetriever<S> {
    store: Arc<S>,
    graph: GraphExpander<S>,
    config: GraphConfig,
}

impl<S: Store> GraphRetriever<S> {
    pub fn new(store: Arc<S>, config: GraphConfig) -> Self {
        Self {
            graph: GraphExpander::new(Arc::clone(&store)),
            store,
            config,
        }
    }
}

#[async_trait]
impl<S: Store + 'static> Retriever for GraphRetriever<S> {
    fn source(&self) -> Source {
        Source::Graph
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ScoredCandidate>> {
        let repos = request.repositories.as_ref();

        let mut seeds = Vec::new();
        let mut seed_keys: BTreeSet<EntityKey> = BTreeSet::new();
        for token in identifier_tokens(&request.query) {
            if seeds.len() >= self.config.max_seeds {
                break;
            }
            for entity in self.graph.resolve(&token, repos, self.config.max_seeds).await? {
                if seeds.len() < self.config.max_seeds && seed_keys.insert(entity.key()) {
                    seeds.push(entity);
                }
            }
        }

        if seeds.is_empty() {
            debug!("Graph strategy: no seed entities for {:?}", request.query);
            return Ok(Vec::new());
        }

        let traversal = self
            .graph
            .traverse(
                &seeds,
                self.config.default_depth.clamp(1, self.config.max_depth.max(1)),
                self.config.min_strength,
                TraversalMode::Outgoing,
            )
            .await?;

        let scored_entities = seeds
            .iter()
            .map(|e| (e.key(), 1.0f32))
            .chain(
                traversal
                    .reached
                    .iter()
                    .filter(|r| repo_allowed(repos, &r.entity.repo))
                    .map(|r| (r.entity.key(), r.path_strength / r.depth as f32)),
            );

        let mut candidates = Vec::new();
        for (key, score) in scored_entities {
            for chunk in self.store.get_chunks_for_entity(&key).await? {
                candidates.push(ScoredCandidate::new(chunk, score, Source::Graph));
            }
        }

        sort_candidates(&mut candidates);
        candidates.truncate(request.limit);

        debug!(
            "Graph strategy: {} seed(s), {} reached, {} candidates",
            seeds.len(),
            traversal.reached.len(),
            candidates.len()
        );

        Ok(candidates)
    }
}

/// The four strategies the orchestrator runs for every query.
#[derive(Clone)]
pub struct RetrieverSet {
    pub dense: Arc<dyn Retriever>,
    pub sparse: Arc<dyn Retriever>,
    pub pattern: Arc<dyn Retriever>,
    pub graph: Arc<dyn Retriever>,
}

impl RetrieverSet {
    /// Store-backed strategies.
    pub fn standard<S: Store + 'static>(
        store: Arc<S>,
        embedder: Option<Arc<dyn Embedder>>,
        embed_timeout: Duration,
        graph: GraphConfig,
    ) -> Self {
        Self {
            dense: Arc::new(DenseRetriever::new(Arc::clone(&store), embedder, embed_timeout)),
            sparse: Arc::new(SparseRetriever::new(Arc::clone(&store))),
            pattern: Arc::new(PatternRetriever::new(Arc::clone(&store))),
            graph: Arc::new(GraphRetriever::new(store, graph)),
        }
    }

    pub fn get(&self, source: Source) -> &Arc<dyn Retriever> {
        match source {
            Source::Dense => &self.dense,
            Source::Sparse => &self.sparse,
            Source::Pattern => &self.pattern,
            Source::Graph => &self.graph,
        }
    }

    /// Replace the strategy for `retriever.source()`.
    pub fn replace(&mut self, retriever: Arc<dyn Retriever>) {
        match retriever.source() {
            Source::Dense => self.dense = retriever,
            Source::Sparse => self.sparse = retriever,
            Source::Pattern => self.pattern = retriever,
            Source::Graph => self.graph = retriever,
        }
    }
}
