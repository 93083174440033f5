//! Core domain types for the knowledge base.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Open key-value metadata attached to entities and chunks.
///
/// Ordered so that serialized responses are stable across runs.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Set of repository names used to restrict a request. `None` means all repositories.
pub type RepoFilter = BTreeSet<String>;

/// Whether `repo` passes an optional repository filter.
pub fn repo_allowed(filter: Option<&RepoFilter>, repo: &str) -> bool {
    filter.map_or(true, |f| f.contains(repo))
}

/// A repository whose code has been ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository identifier (unique).
    pub name: String,

    /// Optional description.
    pub description: Option<String>,

    /// Last ingestion timestamp (Unix millis), if ingestion recorded one.
    pub indexed_at: Option<u64>,
}

impl Repository {
    /// Create a new repository record.
    pub fn new(name: &str, description: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            description: description.map(String::from),
            indexed_at: None,
        }
    }
}

/// A repository together with its content counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySummary {
    #[serde(flatten)]
    pub repository: Repository,
    pub entities: u64,
    pub chunks: u64,
}

/// Kind of code construct an entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Function,
    Method,
    Class,
    Struct,
    Trait,
    Interface,
    Module,
    Enum,
    Constant,
    Variable,
    Other,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Trait => "trait",
            Self::Interface => "interface",
            Self::Module => "module",
            Self::Enum => "enum",
            Self::Constant => "constant",
            Self::Variable => "variable",
            Self::Other => "other",
        }
    }

    /// Parse a stored kind. Unrecognized values map to `Other`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "function" | "fn" => Self::Function,
            "method" => Self::Method,
            "class" => Self::Class,
            "struct" => Self::Struct,
            "trait" => Self::Trait,
            "interface" => Self::Interface,
            "module" | "mod" | "package" => Self::Module,
            "enum" => Self::Enum,
            "constant" | "const" => Self::Constant,
            "variable" | "var" => Self::Variable,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global key of an entity: entity ids are only unique within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub repo: String,
    pub id: String,
}

impl EntityKey {
    pub fn new(repo: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repo, self.id)
    }
}

/// A named code construct (function, class, module, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Owning repository.
    pub repo: String,

    /// Identifier, unique within `repo`.
    pub entity_id: String,

    /// Short name (e.g. `validateCredentials`).
    pub name: String,

    /// Fully qualified name (e.g. `UserService.validateCredentials`).
    pub qualified_name: String,

    pub kind: EntityKind,

    /// Source file, when ingestion recorded it.
    pub file_path: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Entity {
    /// Create a new entity whose qualified name defaults to its name.
    pub fn new(repo: &str, entity_id: &str, name: &str, kind: EntityKind) -> Self {
        Self {
            repo: repo.to_string(),
            entity_id: entity_id.to_string(),
            name: name.to_string(),
            qualified_name: name.to_string(),
            kind,
            file_path: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_qualified_name(mut self, qualified_name: &str) -> Self {
        self.qualified_name = qualified_name.to_string();
        self
    }

    pub fn with_file_path(mut self, path: &str) -> Self {
        self.file_path = Some(path.to_string());
        self
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.repo, &self.entity_id)
    }
}

/// Kind of relationship between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Calls,
    Imports,
    Extends,
    Implements,
    References,
    Contains,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Imports => "imports",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::References => "references",
            Self::Contains => "contains",
        }
    }

    /// Parse a stored kind. Unrecognized values map to `References`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "calls" => Self::Calls,
            "imports" => Self::Imports,
            "extends" => Self::Extends,
            "implements" => Self::Implements,
            "contains" => Self::Contains,
            _ => Self::References,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed, strength-weighted edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: EntityKey,
    pub to: EntityKey,
    pub kind: RelationKind,

    /// Confidence of the relation, in `[0, 1]`.
    pub strength: f32,
}

impl Relationship {
    pub fn new(from: EntityKey, to: EntityKey, kind: RelationKind, strength: f32) -> Self {
        Self {
            from,
            to,
            kind,
            strength,
        }
    }

    /// Whether the edge connects entities in different repositories.
    pub fn is_cross_repository(&self) -> bool {
        self.from.repo != self.to.repo
    }
}

/// Kind of content a chunk holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Code,
    Doc,
    Signature,
    Summary,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Doc => "doc",
            Self::Signature => "signature",
            Self::Summary => "summary",
        }
    }

    /// Parse a stored kind. Unrecognized values map to `Code`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "doc" | "docstring" => Self::Doc,
            "signature" => Self::Signature,
            "summary" => Self::Summary,
            _ => Self::Code,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of retrievable content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Globally unique id, `"{repo}:{entity_id}:{kind}"` for entity chunks.
    pub chunk_id: String,

    /// Owning repository.
    pub repo: String,

    /// Entity this chunk belongs to; absent for free-standing chunks (e.g. READMEs).
    pub entity_id: Option<String>,

    pub chunk_type: ChunkKind,

    pub content: String,

    /// Embedding vector; present only if the chunk was embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Source file; present when ingestion knew the origin.
    pub file_path: Option<String>,

    /// 1-based start line; present together with `end_line`.
    pub start_line: Option<u32>,

    /// 1-based inclusive end line.
    pub end_line: Option<u32>,

    pub language: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    /// Build the canonical chunk id for an entity chunk.
    pub fn make_id(repo: &str, entity_id: &str, kind: ChunkKind) -> String {
        format!("{}:{}:{}", repo, entity_id, kind)
    }

    /// Create a chunk belonging to an entity.
    pub fn new(repo: &str, entity_id: &str, kind: ChunkKind, content: &str) -> Self {
        let mut chunk = Self::with_id(&Self::make_id(repo, entity_id, kind), repo, kind, content);
        chunk.entity_id = Some(entity_id.to_string());
        chunk
    }

    /// Create a chunk with an explicit id and no owning entity.
    pub fn with_id(chunk_id: &str, repo: &str, kind: ChunkKind, content: &str) -> Self {
        Self {
            chunk_id: chunk_id.to_string(),
            repo: repo.to_string(),
            entity_id: None,
            chunk_type: kind,
            content: content.to_string(),
            embedding: None,
            file_path: None,
            start_line: None,
            end_line: None,
            language: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_span(mut self, file_path: &str, start_line: u32, end_line: u32) -> Self {
        self.file_path = Some(file_path.to_string());
        self.start_line = Some(start_line);
        self.end_line = Some(end_line);
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Key of the owning entity, if any.
    pub fn entity_key(&self) -> Option<EntityKey> {
        self.entity_id
            .as_ref()
            .map(|id| EntityKey::new(&self.repo, id))
    }
}

/// Statistics about the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub repositories: u64,
    pub entities: u64,
    pub relationships: u64,
    pub chunks: u64,

    /// Chunks with an embedding stored.
    pub embeddings: u64,

    /// Database size in bytes.
    pub storage_bytes: u64,

    /// Whether nearest-neighbour search is available.
    pub vector_search: bool,
}
