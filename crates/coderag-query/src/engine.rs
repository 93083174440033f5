//! Query orchestration: validation, analysis, concurrent retrieval, fusion
//! and token budgeting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use coderag_core::{
    repo_allowed, CrossReferenceReport, DependencyReport, Embedder, Entity, QueryMetrics,
    RagConfig, RagError, RepoFilter, RepositorySummary, Result, ResultEnvelope, Source, Stats,
    Store,
};

use crate::analyzer::{analyze_with_index, identifier_tokens};
use crate::budget::apply_token_budget;
use crate::fusion::{fuse, SourceOutcome};
use crate::graph::{GraphExpander, TraversalMode};
use crate::retrieval::{RetrievalRequest, Retriever, RetrieverSet};

/// Longest accepted query, in characters.
pub const MAX_QUERY_CHARS: usize = 2048;

/// A fused repository query.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub query: String,

    /// Restrict to these repositories. `None` or empty means all.
    pub repositories: Option<Vec<String>>,

    /// Token budget for result content; defaults to `search.default_max_tokens`.
    pub max_tokens: Option<usize>,

    /// Number of results; defaults to `search.default_limit`.
    pub limit: Option<usize>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_repositories<I, T>(mut self, repositories: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.repositories = Some(repositories.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Multi-strategy query engine.
///
/// Runs dense, sparse, pattern and graph retrieval concurrently, each under
/// its own time budget, and fuses whatever came back. A strategy that fails
/// or times out only degrades the result; the query fails only when no
/// strategy succeeded.
pub struct QueryEngine<S> {
    /// Storage backend.
    store: Arc<S>,

    retrievers: RetrieverSet,

    graph: GraphExpander<S>,

    config: RagConfig,
}

impl<S: Store + 'static> QueryEngine<S> {
    /// Create a new query engine. Without an embedder dense retrieval is
    /// reported as unavailable.
    pub fn new(store: Arc<S>, embedder: Option<Arc<dyn Embedder>>, config: RagConfig) -> Self {
        let retrievers = RetrieverSet::standard(
            Arc::clone(&store),
            embedder,
            Duration::from_millis(config.search.embed_timeout_ms),
            config.graph.clone(),
        );

        Self {
            graph: GraphExpander::new(Arc::clone(&store)),
            store,
            retrievers,
            config,
        }
    }

    /// Replace one strategy.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retrievers.replace(retriever);
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Run a fused query.
    pub async fn query(&self, request: QueryRequest) -> Result<ResultEnvelope> {
        let start = Instant::now();

        validate_query(&request.query)?;
        let max_tokens = request
            .max_tokens
            .unwrap_or(self.config.search.default_max_tokens);
        if max_tokens == 0 {
            return Err(RagError::invalid_argument("max_tokens must be positive"));
        }

        let repositories = self.repo_filter(request.repositories.as_deref()).await?;
        let known_entity = self.names_known_entity(&request.query, repositories.as_ref()).await;
        let analysis = analyze_with_index(&request.query, known_entity);

        let limit = self.config.search.effective_limit(request.limit);
        let retrieval = Arc::new(RetrievalRequest {
            query: request.query.trim().to_string(),
            analysis: analysis.clone(),
            repositories,
            limit: self.config.search.fetch_limit(limit),
        });

        info!(
            "Query {:?}: {} (confidence {:.2})",
            request.query, analysis.query_type, analysis.confidence
        );

        let (dense, sparse, pattern, graph) = tokio::join!(
            self.run_strategy(Source::Dense, &retrieval),
            self.run_strategy(Source::Sparse, &retrieval),
            self.run_strategy(Source::Pattern, &retrieval),
            self.run_strategy(Source::Graph, &retrieval),
        );

        let outcomes: BTreeMap<Source, SourceOutcome> = [
            (Source::Dense, dense),
            (Source::Sparse, sparse),
            (Source::Pattern, pattern),
            (Source::Graph, graph),
        ]
        .into_iter()
        .collect();

        let mut metrics = QueryMetrics::default();
        for (source, outcome) in &outcomes {
            metrics.set_stage(*source, outcome.elapsed);
            metrics.failures.extend(outcome.failure(*source));
        }

        let fusion_start = Instant::now();
        let (mut results, coverage) = fuse(&outcomes, &analysis.weights, limit)?;
        let budget = apply_token_budget(&mut results, max_tokens)?;
        metrics.fusion = fusion_start.elapsed();

        debug!(
            "Fused to {} results ({} trimmed, {} dropped to fit {} tokens)",
            results.len(),
            budget.trimmed,
            budget.dropped,
            max_tokens
        );

        metrics.total = start.elapsed();

        info!(
            "Query completed in {:?}: {} results, {} degraded source(s)",
            metrics.total,
            results.len(),
            coverage.degraded().len()
        );

        Ok(ResultEnvelope {
            query: request.query,
            results,
            analysis,
            metrics,
            coverage,
        })
    }

    /// Run one strategy under the strategy time budget.
    ///
    /// The strategy runs on its own task so a panic is contained and a
    /// timed-out strategy is aborted rather than left running.
    async fn run_strategy(&self, source: Source, request: &Arc<RetrievalRequest>) -> SourceOutcome {
        let budget = Duration::from_millis(self.config.search.strategy_timeout_ms);
        let retriever = Arc::clone(self.retrievers.get(source));
        let request = Arc::clone(request);
        let started = Instant::now();

        let mut task = tokio::spawn(async move { retriever.retrieve(&request).await });

        match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(Ok(candidates))) => {
                debug!("{} strategy returned {} candidates", source, candidates.len());
                SourceOutcome::ok(candidates, started.elapsed())
            }
            Ok(Ok(Err(e))) if e.is_capability_unavailable() => {
                debug!("{} strategy unavailable: {}", source, e);
                SourceOutcome::unavailable()
            }
            Ok(Ok(Err(e))) => strategy_failed(source, e.to_string(), started.elapsed()),
            Ok(Err(join_error)) => strategy_failed(source, join_error.to_string(), started.elapsed()),
            Err(_) => {
                task.abort();
                let elapsed = started.elapsed();
                let err = RagError::StrategyTimeout {
                    source_name: source.to_string(),
                    elapsed_ms: elapsed.as_millis() as u64,
                };
                warn!("{}", err);
                SourceOutcome::timed_out(err.to_string(), elapsed)
            }
        }
    }

    /// Entities `entity` depends on, up to `depth` hops along outgoing edges.
    pub async fn dependencies(
        &self,
        entity: &str,
        depth: Option<u32>,
        repositories: Option<&[String]>,
    ) -> Result<DependencyReport> {
        let start = Instant::now();
        let depth = self.config.graph.effective_depth(depth);
        let min_strength = self.config.graph.min_strength;

        let repositories = self.repo_filter(repositories).await?;
        let repos = repositories.as_ref();
        let roots = self.resolve_roots(entity, repos).await?;

        let traversal = self
            .graph
            .traverse(&roots, depth, min_strength, TraversalMode::Outgoing)
            .await?;

        let dependencies = traversal
            .reached
            .into_iter()
            .filter(|r| repo_allowed(repos, &r.entity.repo))
            .collect::<Vec<_>>();
        let edges = traversal
            .edges
            .into_iter()
            .filter(|e| repo_allowed(repos, &e.edge.from.repo) || repo_allowed(repos, &e.edge.to.repo))
            .collect();

        info!(
            "Dependencies of {:?}: {} entities within {} hop(s)",
            entity,
            dependencies.len(),
            depth
        );

        Ok(DependencyReport {
            entity: entity.to_string(),
            roots,
            depth,
            min_strength,
            dependencies,
            edges,
            elapsed: start.elapsed(),
        })
    }

    /// Direct edges, in either direction, linking `entity` to another repository.
    pub async fn cross_references(
        &self,
        entity: &str,
        min_strength: Option<f32>,
        repositories: Option<&[String]>,
    ) -> Result<CrossReferenceReport> {
        let start = Instant::now();
        let min_strength = min_strength.unwrap_or(self.config.graph.min_strength);
        if !(0.0..=1.0).contains(&min_strength) {
            return Err(RagError::invalid_argument(format!(
                "min_strength must be within [0, 1], got {}",
                min_strength
            )));
        }

        let repositories = self.repo_filter(repositories).await?;
        let repos = repositories.as_ref();
        let roots = self.resolve_roots(entity, repos).await?;

        let traversal = self
            .graph
            .traverse(&roots, 1, min_strength, TraversalMode::Both)
            .await?;

        let references: Vec<_> = traversal
            .edges
            .into_iter()
            .filter(|e| e.edge.is_cross_repository())
            .filter(|e| repo_allowed(repos, &e.edge.from.repo) && repo_allowed(repos, &e.edge.to.repo))
            .collect();

        info!(
            "Cross references of {:?}: {} edges with strength >= {}",
            entity,
            references.len(),
            min_strength
        );

        Ok(CrossReferenceReport {
            entity: entity.to_string(),
            roots,
            depth: 1,
            min_strength,
            references,
            elapsed: start.elapsed(),
        })
    }

    pub async fn list_repositories(&self) -> Result<Vec<RepositorySummary>> {
        self.store.list_repositories().await
    }

    pub async fn stats(&self) -> Result<Stats> {
        self.store.get_stats().await
    }

    /// Normalize a repository list into a filter, rejecting unknown names.
    async fn repo_filter(&self, repositories: Option<&[String]>) -> Result<Option<RepoFilter>> {
        let Some(names) = repositories.filter(|r| !r.is_empty()) else {
            return Ok(None);
        };

        let known: RepoFilter = self
            .store
            .list_repositories()
            .await?
            .into_iter()
            .map(|r| r.repository.name)
            .collect();

        if let Some(missing) = names.iter().find(|n| !known.contains(n.as_str())) {
            return Err(RagError::RepositoryNotFound {
                name: missing.clone(),
            });
        }

        Ok(Some(names.iter().cloned().collect()))
    }

    async fn resolve_roots(&self, entity: &str, repos: Option<&RepoFilter>) -> Result<Vec<Entity>> {
        if entity.trim().is_empty() {
            return Err(RagError::invalid_argument("entity must not be empty"));
        }

        let roots = self
            .graph
            .resolve(entity, repos, self.config.graph.max_seeds)
            .await?;
        if roots.is_empty() {
            return Err(RagError::unknown_entity(entity));
        }
        Ok(roots)
    }

    /// Whether a single-token query names an entity exactly.
    async fn names_known_entity(&self, query: &str, repos: Option<&RepoFilter>) -> bool {
        if query.split_whitespace().count() != 1 {
            return false;
        }
        let Some(token) = identifier_tokens(query).into_iter().next() else {
            return false;
        };

        match self.graph.resolve(&token, repos, 1).await {
            Ok(found) => !found.is_empty(),
            Err(e) => {
                warn!("Entity index probe failed: {}", e);
                false
            }
        }
    }
}

fn strategy_failed(source: Source, message: String, elapsed: Duration) -> SourceOutcome {
    let err = RagError::StrategyFailure {
        source_name: source.to_string(),
        message,
    };
    warn!("{}", err);
    SourceOutcome::failed(err.to_string(), elapsed)
}

fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(RagError::invalid_query("query must not be empty"));
    }

    let chars = query.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(RagError::invalid_query(format!(
            "query is {} characters, limit is {}",
            chars, MAX_QUERY_CHARS
        )));
    }

    if query
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        return Err(RagError::invalid_query("query contains control characters"));
    }

    Ok(())
}
