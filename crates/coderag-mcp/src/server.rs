//! MCP server implementation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use coderag_core::{Embedder, RagConfig, RagError, Result};
use coderag_embed::HttpEmbedder;
use coderag_query::{QueryEngine, QueryRequest};
use coderag_store::{SqliteStore, StoreOptions};

/// Code retrieval MCP server state.
pub struct CodeRagServer {
    /// Database store.
    store: Arc<SqliteStore>,

    /// Query engine.
    engine: Arc<QueryEngine<SqliteStore>>,
}

/// `query_repositories` parameters.
#[derive(Debug, Deserialize, Serialize)]
pub struct QueryParams {
    /// Natural-language question, identifier or code pattern.
    pub query: String,

    /// Repositories to search (optional, default: all).
    #[serde(default)]
    pub repositories: Option<Vec<String>>,

    /// Token budget for the serialized results (optional).
    #[serde(default)]
    pub max_tokens: Option<usize>,

    /// Maximum number of results (optional).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `query_dependency` parameters.
#[derive(Debug, Deserialize, Serialize)]
pub struct DependencyParams {
    /// Entity id, name, qualified name or `repo:entity_id`.
    pub entity: String,

    /// Hops to follow (optional, clamped to the configured maximum).
    #[serde(default)]
    pub depth: Option<u32>,

    #[serde(default)]
    pub repositories: Option<Vec<String>>,
}

/// `get_cross_references` parameters.
#[derive(Debug, Deserialize, Serialize)]
pub struct CrossReferenceParams {
    pub entity: String,

    /// Minimum edge strength in `[0, 1]` (optional).
    #[serde(default)]
    pub min_strength: Option<f32>,

    #[serde(default)]
    pub repositories: Option<Vec<String>>,
}

/// Error half of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
}

/// Tool result.
#[derive(Debug, Serialize)]
pub struct ToolResult {
    /// Whether the operation was successful.
    pub success: bool,

    /// JSON payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ToolError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result.and_then(|value| serde_json::to_value(value).map_err(RagError::from)) {
            Ok(data) => Self::success(data),
            Err(e) => Self::from(e),
        }
    }
}

impl From<RagError> for ToolResult {
    fn from(err: RagError) -> Self {
        Self::error(err.error_code(), err.to_string())
    }
}

impl CodeRagServer {
    /// Create a server over the database named in `config`.
    pub fn new(config: RagConfig) -> Result<Self> {
        info!(
            "Initializing coderag MCP server with database at {:?}",
            config.database.path
        );

        let store = SqliteStore::open(&config.database.path, StoreOptions::from(&config.database))?;
        Self::from_store(Arc::new(store), config)
    }

    /// Create a server with an in-memory database.
    pub fn new_memory(config: RagConfig) -> Result<Self> {
        info!("Initializing coderag MCP server with in-memory database");

        let store = SqliteStore::open_memory(StoreOptions::from(&config.database))?;
        Self::from_store(Arc::new(store), config)
    }

    /// Create a server over an open store, with the embedder `config` describes.
    pub fn from_store(store: Arc<SqliteStore>, config: RagConfig) -> Result<Self> {
        let embedder: Option<Arc<dyn Embedder>> =
            match HttpEmbedder::from_config(&config.embedding, store.dimension())? {
                Some(embedder) => {
                    info!("Query embeddings from {}", embedder.endpoint());
                    Some(Arc::new(embedder))
                }
                None => {
                    warn!("No embedding provider configured - dense retrieval disabled");
                    None
                }
            };
        Ok(Self::with_embedder(store, embedder, config))
    }

    /// Create a server with an explicit embedder.
    pub fn with_embedder(
        store: Arc<SqliteStore>,
        embedder: Option<Arc<dyn Embedder>>,
        config: RagConfig,
    ) -> Self {
        let engine = Arc::new(QueryEngine::new(Arc::clone(&store), embedder, config));
        Self { store, engine }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Get the server info.
    pub fn info() -> ServerInfo {
        ServerInfo {
            name: "coderag".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Hybrid code retrieval across multiple repositories".to_string(),
        }
    }

    /// List available tools.
    pub fn tools() -> Vec<ToolInfo> {
        let repositories = json!({
            "type": "array",
            "items": { "type": "string" },
            "description": "Restrict to these repositories (default: all)"
        });

        vec![
            ToolInfo {
                name: "query_repositories".to_string(),
                description: "Search code, docs and symbols across repositories with fused \
                              semantic, lexical, pattern and graph retrieval"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "repositories": repositories.clone(),
                        "max_tokens": { "type": "integer", "minimum": 1 },
                        "limit": { "type": "integer", "minimum": 1 }
                    },
                    "required": ["query"]
                }),
            },
            ToolInfo {
                name: "query_dependency".to_string(),
                description: "List what an entity depends on, following outgoing relationships"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "entity": { "type": "string" },
                        "depth": { "type": "integer", "minimum": 1 },
                        "repositories": repositories.clone()
                    },
                    "required": ["entity"]
                }),
            },
            ToolInfo {
                name: "get_cross_references".to_string(),
                description: "List direct relationships linking an entity to other repositories"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "entity": { "type": "string" },
                        "min_strength": { "type": "number", "minimum": 0, "maximum": 1 },
                        "repositories": repositories
                    },
                    "required": ["entity"]
                }),
            },
            ToolInfo {
                name: "list_repositories".to_string(),
                description: "List indexed repositories with entity and chunk counts".to_string(),
                input_schema: json!({ "type": "object", "properties": {} }),
            },
        ]
    }

    /// Dispatch a tool call by name with JSON arguments.
    pub async fn call(&self, tool: &str, arguments: Value) -> ToolResult {
        match tool {
            "query_repositories" => match parse_params(arguments) {
                Ok(params) => self.query_repositories(params).await,
                Err(e) => e,
            },
            "query_dependency" => match parse_params(arguments) {
                Ok(params) => self.query_dependency(params).await,
                Err(e) => e,
            },
            "get_cross_references" => match parse_params(arguments) {
                Ok(params) => self.get_cross_references(params).await,
                Err(e) => e,
            },
            "list_repositories" => self.list_repositories().await,
            other => ToolResult::error("UNKNOWN_TOOL", format!("Unknown tool '{}'", other)),
        }
    }

    /// Fused query across repositories.
    pub async fn query_repositories(&self, params: QueryParams) -> ToolResult {
        info!("Querying repositories for: {:?}", params.query);

        let request = QueryRequest {
            query: params.query,
            repositories: params.repositories,
            max_tokens: params.max_tokens,
            limit: params.limit,
        };

        ToolResult::from_result(self.engine.query(request).await)
    }

    /// Dependencies of an entity.
    pub async fn query_dependency(&self, params: DependencyParams) -> ToolResult {
        info!("Dependency query for: {:?}", params.entity);

        ToolResult::from_result(
            self.engine
                .dependencies(&params.entity, params.depth, params.repositories.as_deref())
                .await,
        )
    }

    /// Cross-repository references of an entity.
    pub async fn get_cross_references(&self, params: CrossReferenceParams) -> ToolResult {
        info!("Cross-reference query for: {:?}", params.entity);

        ToolResult::from_result(
            self.engine
                .cross_references(
                    &params.entity,
                    params.min_strength,
                    params.repositories.as_deref(),
                )
                .await,
        )
    }

    /// List indexed repositories.
    pub async fn list_repositories(&self) -> ToolResult {
        let repositories = self.engine.list_repositories().await;
        ToolResult::from_result(repositories.map(|repositories| {
            json!({
                "repositories": repositories,
                "vector_search": self.store.vec_enabled(),
            })
        }))
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(arguments: Value) -> std::result::Result<T, ToolResult> {
    serde_json::from_value(arguments).map_err(|e| {
        ToolResult::from(RagError::invalid_argument(format!("Invalid arguments: {}", e)))
    })
}

/// Server info.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Tool info.
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,

    /// JSON schema of the tool's arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}
