//! Configuration types for the retrieval system.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Graph traversal policy.
    #[serde(default)]
    pub graph: GraphConfig,

    /// External embedding provider.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Enable WAL mode (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// SQLite cache size in KB (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,

    /// Provision the sqlite-vec index. When false, dense retrieval runs degraded.
    #[serde(default = "default_true")]
    pub vector_search: bool,

    /// Dimensionality shared by every embedding in the deployment.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            wal_mode: true,
            cache_size: -64000, // 64MB
            busy_timeout_ms: 30000,
            vector_search: true,
            embedding_dimension: 768,
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Maximum number of results.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Per-source fetch is `limit * candidate_multiplier` (at least `min_candidates`).
    /// Must be >= 2 so every source fetches strictly more than the final limit.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Lower bound on the per-source fetch size.
    #[serde(default = "default_min_candidates")]
    pub min_candidates: usize,

    /// Time budget for each retrieval strategy.
    #[serde(default = "default_strategy_timeout")]
    pub strategy_timeout_ms: u64,

    /// Time budget for the query embedding call (inside the dense budget).
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout_ms: u64,

    /// Token budget applied when the caller does not pass one.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
            candidate_multiplier: 3,
            min_candidates: 20,
            strategy_timeout_ms: 2000,
            embed_timeout_ms: 1500,
            default_max_tokens: 8000,
        }
    }
}

impl SearchConfig {
    /// Clamp a requested limit into `1..=max_limit`.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }

    /// Per-source candidate count for a final `limit`.
    pub fn fetch_limit(&self, limit: usize) -> usize {
        limit
            .saturating_mul(self.candidate_multiplier.max(2))
            .max(self.min_candidates)
    }
}

/// Graph traversal policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Hops followed when the caller does not pass a depth.
    #[serde(default = "default_graph_depth")]
    pub default_depth: u32,

    /// Requested depths are clamped to this.
    #[serde(default = "default_graph_max_depth")]
    pub max_depth: u32,

    /// Edges weaker than this are not followed unless the caller overrides it.
    #[serde(default = "default_min_strength")]
    pub min_strength: f32,

    /// Seed entities considered when resolving a query.
    #[serde(default = "default_max_seeds")]
    pub max_seeds: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_depth: 2,
            max_depth: 5,
            min_strength: 0.5,
            max_seeds: 5,
        }
    }
}

impl GraphConfig {
    /// Clamp a requested depth into `1..=max_depth`.
    pub fn effective_depth(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_depth)
            .clamp(1, self.max_depth.max(1))
    }
}

/// External embedding provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible API (e.g. `http://localhost:8080/v1`).
    /// When unset, dense retrieval runs degraded.
    #[serde(default)]
    pub api_base: Option<String>,

    /// Model name sent with each request.
    #[serde(default)]
    pub model: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_cache_size() -> i32 {
    -64000
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_embedding_dimension() -> usize {
    768
}

fn default_limit() -> usize {
    10
}

fn default_max_limit() -> usize {
    100
}

fn default_candidate_multiplier() -> usize {
    3
}

fn default_min_candidates() -> usize {
    20
}

fn default_strategy_timeout() -> u64 {
    2000
}

fn default_embed_timeout() -> u64 {
    1500
}

fn default_max_tokens() -> usize {
    8000
}

fn default_graph_depth() -> u32 {
    2
}

fn default_graph_max_depth() -> u32 {
    5
}

fn default_min_strength() -> f32 {
    0.5
}

fn default_max_seeds() -> usize {
    5
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coderag")
        .join("coderag.db")
}

impl RagConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::RagError::Config {
                message: format!("Failed to parse config: {}", e),
            }
        })?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> crate::error::Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("coderag").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("coderag.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        // Return defaults
        Ok(Self::default())
    }
}
