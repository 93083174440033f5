//! Request-scoped result types: candidates, fused results, analysis, metrics.
//!
//! Nothing in this module is persisted; every value lives for one request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::types::{Chunk, ChunkKind, Entity, Metadata, Relationship};

/// Retrieval strategy that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Dense,
    Sparse,
    Pattern,
    Graph,
}

impl Source {
    /// All sources in canonical order.
    pub const ALL: [Source; 4] = [Source::Dense, Source::Sparse, Source::Pattern, Source::Graph];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Sparse => "sparse",
            Self::Pattern => "pattern",
            Self::Graph => "graph",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk scored by a single strategy.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub chunk: Chunk,
    pub raw_score: f32,
    pub source: Source,
}

impl ScoredCandidate {
    pub fn new(chunk: Chunk, raw_score: f32, source: Source) -> Self {
        Self {
            chunk,
            raw_score,
            source,
        }
    }
}

/// Sort candidates by score descending, ties by chunk id ascending.
pub fn sort_candidates(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .total_cmp(&a.raw_score)
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
}

/// Query classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Identifier,
    Structural,
    Conceptual,
    Mixed,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Identifier => "identifier",
            Self::Structural => "structural",
            Self::Conceptual => "conceptual",
            Self::Mixed => "mixed",
        };
        f.write_str(s)
    }
}

/// Per-strategy fusion weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub dense: f32,
    pub sparse: f32,
    pub pattern: f32,
    pub graph: f32,
}

impl FusionWeights {
    pub const fn new(dense: f32, sparse: f32, pattern: f32, graph: f32) -> Self {
        Self {
            dense,
            sparse,
            pattern,
            graph,
        }
    }

    pub fn get(&self, source: Source) -> f32 {
        match source {
            Source::Dense => self.dense,
            Source::Sparse => self.sparse,
            Source::Pattern => self.pattern,
            Source::Graph => self.graph,
        }
    }

    pub fn sum(&self) -> f32 {
        self.dense + self.sparse + self.pattern + self.graph
    }
}

/// Classification of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query_type: QueryType,

    /// Classification confidence in `[0, 1]`.
    pub confidence: f32,

    pub weights: FusionWeights,

    /// Which classification rule fired.
    pub reasoning: String,
}

/// Metadata attached to a fused result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub entity_id: Option<String>,
    pub chunk_type: Option<ChunkKind>,
    pub file_path: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub language: Option<String>,

    /// Set when the token budget shortened `content`.
    #[serde(default)]
    pub truncated: bool,

    /// Ingestion-provided metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: Metadata,
}

impl ResultMetadata {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            entity_id: chunk.entity_id.clone(),
            chunk_type: Some(chunk.chunk_type),
            file_path: chunk.file_path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            language: chunk.language.clone(),
            truncated: false,
            extra: chunk.metadata.clone(),
        }
    }
}

/// A result merged across strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    /// 1-based position in the final ranking.
    pub rank: u32,
    pub chunk_id: String,
    pub repo: String,
    pub content: String,

    #[serde(rename = "score")]
    pub fused_score: f32,

    /// Normalized score of every source that contributed.
    #[serde(rename = "sources")]
    pub per_source_scores: BTreeMap<Source, f32>,

    pub metadata: ResultMetadata,
}

/// Outcome of one strategy for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Ran and returned (possibly zero) candidates.
    Ok,
    /// Backing capability not provisioned; empty by design.
    Unavailable,
    Failed,
    TimedOut,
}

impl SourceStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

/// A recorded strategy failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: Source,
    #[serde(rename = "kind")]
    pub status: SourceStatus,
    pub message: String,
}

/// Per-stage timings of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    #[serde(with = "duration_ms")]
    pub dense: Duration,
    #[serde(with = "duration_ms")]
    pub sparse: Duration,
    #[serde(with = "duration_ms")]
    pub pattern: Duration,
    #[serde(with = "duration_ms")]
    pub graph: Duration,
    #[serde(with = "duration_ms")]
    pub fusion: Duration,

    /// Wall clock for the whole request (stages overlap).
    #[serde(with = "duration_ms")]
    pub total: Duration,

    #[serde(default)]
    pub failures: Vec<SourceFailure>,
}

impl QueryMetrics {
    pub fn set_stage(&mut self, source: Source, elapsed: Duration) {
        match source {
            Source::Dense => self.dense = elapsed,
            Source::Sparse => self.sparse = elapsed,
            Source::Pattern => self.pattern = elapsed,
            Source::Graph => self.graph = elapsed,
        }
    }

    pub fn stage(&self, source: Source) -> Duration {
        match source {
            Source::Dense => self.dense,
            Source::Sparse => self.sparse,
            Source::Pattern => self.pattern,
            Source::Graph => self.graph,
        }
    }
}

/// Contribution of one source to a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCoverage {
    pub status: SourceStatus,

    /// Candidates the strategy returned before fusion.
    pub candidates: usize,

    /// Final results this source contributed a score to.
    pub contributed: usize,

    /// `contributed / total results`, 0 when there are no results.
    pub fraction: f32,
}

/// Per-source contribution accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub total_results: usize,
    pub sources: BTreeMap<Source, SourceCoverage>,
}

impl CoverageReport {
    pub fn get(&self, source: Source) -> Option<&SourceCoverage> {
        self.sources.get(&source)
    }

    /// Number of final results `source` contributed to.
    pub fn contributed(&self, source: Source) -> usize {
        self.get(source).map_or(0, |c| c.contributed)
    }

    /// Sources that returned nothing because they failed or were unavailable.
    pub fn degraded(&self) -> Vec<Source> {
        self.sources
            .iter()
            .filter(|(_, c)| c.status != SourceStatus::Ok)
            .map(|(s, _)| *s)
            .collect()
    }
}

/// Response of a fused repository query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub query: String,
    pub results: Vec<FusedResult>,
    pub analysis: QueryAnalysis,
    pub metrics: QueryMetrics,
    pub coverage: CoverageReport,
}

/// Direction an edge was followed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
}

/// An entity reached during traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachedEntity {
    pub entity: Entity,

    /// Hop count from the nearest root.
    pub depth: u32,

    /// Product of edge strengths along the strongest shortest path.
    pub path_strength: f32,
}

/// An edge followed during traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversedEdge {
    #[serde(flatten)]
    pub edge: Relationship,

    /// Hop at which the edge was followed (1 for edges leaving a root).
    pub depth: u32,

    pub direction: EdgeDirection,
}

/// Response of a dependency query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyReport {
    pub entity: String,
    pub roots: Vec<Entity>,
    pub depth: u32,
    pub min_strength: f32,
    pub dependencies: Vec<ReachedEntity>,
    pub edges: Vec<TraversedEdge>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

/// Response of a cross-reference query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossReferenceReport {
    pub entity: String,
    pub roots: Vec<Entity>,
    pub depth: u32,
    pub min_strength: f32,
    pub references: Vec<TraversedEdge>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

/// Serialize durations as fractional milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (value.as_secs_f64() * 1000.0).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = f64::deserialize(deserializer)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(ms / 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkKind;

    fn candidate(id: &str, score: f32) -> ScoredCandidate {
        ScoredCandidate::new(Chunk::with_id(id, "r", ChunkKind::Code, ""), score, Source::Sparse)
    }

    #[test]
    fn test_sort_candidates_breaks_ties_by_chunk_id() {
        let mut c = vec![candidate("b", 0.5), candidate("c", 0.9), candidate("a", 0.5)];
        sort_candidates(&mut c);
        let ids: Vec<_> = c.iter().map(|c| c.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_metrics_serialize_as_millis() {
        let metrics = QueryMetrics {
            total: Duration::from_millis(12),
            ..Default::default()
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["total"], serde_json::json!(12.0));
    }

    #[test]
    fn test_fused_result_serializes_sources_map() {
        let mut sources = BTreeMap::new();
        sources.insert(Source::Sparse, 1.0);
        sources.insert(Source::Pattern, 0.5);
        let result = FusedResult {
            rank: 1,
            chunk_id: "r:x:code".to_string(),
            repo: "r".to_string(),
            content: "fn x() {}".to_string(),
            fused_score: 0.75,
            per_source_scores: sources,
            metadata: ResultMetadata::default(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["score"], serde_json::json!(0.75));
        assert_eq!(json["sources"]["sparse"], serde_json::json!(1.0));
    }

    #[test]
    fn test_coverage_degraded_sources() {
        let mut report = CoverageReport::default();
        report.sources.insert(
            Source::Dense,
            SourceCoverage {
                status: SourceStatus::Unavailable,
                candidates: 0,
                contributed: 0,
                fraction: 0.0,
            },
        );
        report.sources.insert(
            Source::Sparse,
            SourceCoverage {
                status: SourceStatus::Ok,
                candidates: 3,
                contributed: 2,
                fraction: 1.0,
            },
        );
        assert_eq!(report.degraded(), vec![Source::Dense]);
        assert_eq!(report.contributed(Source::Sparse), 2);
        assert_eq!(report.contributed(Source::Graph), 0);
    }
}
