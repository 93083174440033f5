//! Weighted score fusion across retrieval strategies.
//!
//! fused_score = Σ weight[source] · normalize(source, raw_score)
//!
//! Dense, pattern and graph scores already live on a `[0, 1]` scale and are
//! only clamped. Sparse (negated BM25) is unbounded and is divided by the
//! best sparse score of the request. Both are monotone, so a better raw score
//! never yields a lower normalized one.

use std::collections::BTreeMap;
use std::time::Duration;

use coderag_core::{
    Chunk, CoverageReport, FusedResult, FusionWeights, RagError, Result, ResultMetadata,
    ScoredCandidate, Source, SourceCoverage, SourceFailure, SourceStatus,
};

/// What one strategy produced for one request.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub status: SourceStatus,
    pub candidates: Vec<ScoredCandidate>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn ok(candidates: Vec<ScoredCandidate>, elapsed: Duration) -> Self {
        Self {
            status: SourceStatus::Ok,
            candidates,
            elapsed,
            error: None,
        }
    }

    /// Capability missing: contributes nothing and reports zero elapsed time.
    pub fn unavailable() -> Self {
        Self {
            status: SourceStatus::Unavailable,
            candidates: Vec::new(),
            elapsed: Duration::ZERO,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: SourceStatus::Failed,
            candidates: Vec::new(),
            elapsed,
            error: Some(message.into()),
        }
    }

    pub fn timed_out(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: SourceStatus::TimedOut,
            candidates: Vec::new(),
            elapsed,
            error: Some(message.into()),
        }
    }

    /// Failure record for metrics, if this outcome is a failure.
    pub fn failure(&self, source: Source) -> Option<SourceFailure> {
        self.status.is_failure().then(|| SourceFailure {
            source,
            status: self.status,
            message: self.error.clone().unwrap_or_default(),
        })
    }
}

/// Normalize a raw score into `[0, 1]`. `max` is the best raw score the
/// source produced in this request.
pub fn normalize(source: Source, raw: f32, max: f32) -> f32 {
    let score = match source {
        Source::Sparse => {
            if max > 0.0 {
                raw / max
            } else {
                0.0
            }
        }
        Source::Dense | Source::Pattern | Source::Graph => raw,
    };
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

struct Accumulator {
    chunk: Chunk,
    scores: BTreeMap<Source, f32>,
}

/// Fuse per-source outcomes into at most `limit` ranked results.
///
/// Fails with `AllStrategiesFailed` when no source succeeded and at least
/// one failed or timed out. Sources that are merely unavailable do not count
/// as failures.
pub fn fuse(
    outcomes: &BTreeMap<Source, SourceOutcome>,
    weights: &FusionWeights,
    limit: usize,
) -> Result<(Vec<FusedResult>, CoverageReport)> {
    let any_ok = outcomes.values().any(|o| o.status == SourceStatus::Ok);
    let failures: Vec<String> = outcomes
        .iter()
        .filter(|(_, o)| o.status.is_failure())
        .map(|(s, o)| format!("{}: {}", s, o.error.as_deref().unwrap_or("failed")))
        .collect();

    if !any_ok && !failures.is_empty() {
        return Err(RagError::AllStrategiesFailed { failures });
    }

    // Group by chunk id
    let mut grouped: BTreeMap<String, Accumulator> = BTreeMap::new();

    for (source, outcome) in outcomes {
        if outcome.status != SourceStatus::Ok {
            continue;
        }

        let max = outcome
            .candidates
            .iter()
            .map(|c| c.raw_score)
            .fold(f32::NEG_INFINITY, f32::max);

        for candidate in &outcome.candidates {
            let normalized = normalize(*source, candidate.raw_score, max);
            let entry = grouped
                .entry(candidate.chunk.chunk_id.clone())
                .or_insert_with(|| Accumulator {
                    chunk: candidate.chunk.clone(),
                    scores: BTreeMap::new(),
                });
            let slot = entry.scores.entry(*source).or_insert(normalized);
            *slot = slot.max(normalized);
        }
    }

    let mut results: Vec<FusedResult> = grouped
        .into_values()
        .map(|acc| {
            let fused_score: f32 = acc
                .scores
                .iter()
                .map(|(source, score)| weights.get(*source) * score)
                .sum();
            FusedResult {
                rank: 0,
                chunk_id: acc.chunk.chunk_id.clone(),
                repo: acc.chunk.repo.clone(),
                metadata: ResultMetadata::from_chunk(&acc.chunk),
                content: acc.chunk.content,
                fused_score,
                per_source_scores: acc.scores,
            }
        })
        .collect();

    // Sort by score descending, ties by chunk id
    results.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(limit);

    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i as u32 + 1;
    }

    let coverage = coverage(outcomes, &results);
    Ok((results, coverage))
}

fn coverage(outcomes: &BTreeMap<Source, SourceOutcome>, results: &[FusedResult]) -> CoverageReport {
    let total = results.len();
    let sources = Source::ALL
        .iter()
        .map(|source| {
            let contributed = results
                .iter()
                .filter(|r| r.per_source_scores.contains_key(source))
                .count();
            let (status, candidates) = outcomes
                .get(source)
                .map_or((SourceStatus::Unavailable, 0), |o| (o.status, o.candidates.len()));
            let fraction = if total == 0 {
                0.0
            } else {
                contributed as f32 / total as f32
            };
            (
                *source,
                SourceCoverage {
                    status,
                    candidates,
                    contributed,
                    fraction,
                },
            )
        })
        .collect();

    CoverageReport {
        total_results: total,
        sources,
    }
}
