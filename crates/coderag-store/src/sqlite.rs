//! SQLite-based storage implementation.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use coderag_core::{
    sort_candidates, Chunk, ChunkKind, DatabaseConfig, Entity, EntityKey, EntityKind,
    MatchTarget, Metadata, Pattern, RagError, RelationKind, Relationship, RepoFilter,
    Repository, RepositorySummary, Result, ScoredCandidate, Source, Stats, Store,
};

use crate::schema::{vec_schema, SCHEMA};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// SQLite VM steps between cancellation checks.
const PROGRESS_INTERVAL_OPS: i32 = 1000;

/// vec0 refuses KNN queries with `k` above this.
const VEC_MAX_K: usize = 4096;

/// Pattern candidates buffered per requested result before the buffer is
/// ranked and cut back to the limit.
const PATTERN_COMPACT_FACTOR: usize = 4;

const CHUNK_COLUMNS: &str = "c.chunk_id, c.repo, c.entity_id, c.chunk_type, c.content, \
     c.file_path, c.start_line, c.end_line, c.language, c.metadata";

const ENTITY_COLUMNS: &str =
    "e.repo, e.entity_id, e.name, e.qualified_name, e.kind, e.file_path, e.metadata";

const EDGE_COLUMNS: &str = "from_repo, from_id, to_repo, to_id, kind, strength";

/// Options controlling how the store is opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Provision the vector index.
    pub vector_search: bool,

    /// Embedding dimensionality enforced on insert and query.
    pub embedding_dimension: usize,

    pub wal_mode: bool,
    pub cache_size: i32,
    pub busy_timeout_ms: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&DatabaseConfig::default())
    }
}

impl From<&DatabaseConfig> for StoreOptions {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            vector_search: config.vector_search,
            embedding_dimension: config.embedding_dimension,
            wal_mode: config.wal_mode,
            cache_size: config.cache_size,
            busy_timeout_ms: config.busy_timeout_ms,
        }
    }
}

impl StoreOptions {
    /// Options with the vector index disabled.
    pub fn without_vectors() -> Self {
        Self {
            vector_search: false,
            ..Self::default()
        }
    }

    /// Options with the given embedding dimensionality.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            embedding_dimension: dimension,
            ..Self::default()
        }
    }
}

/// SQLite-based store implementation.
///
/// Uses a blocking Mutex for thread-safe access and runs SQLite operations
/// on the blocking thread pool via `spawn_blocking`.
pub struct SqliteStore {
    /// Connection wrapped in blocking Mutex.
    conn: Arc<Mutex<Connection>>,

    /// Whether the sqlite-vec index is provisioned.
    vec_enabled: bool,

    /// Embedding dimensionality.
    dimension: usize,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::register_vec_extension();

        // Open connection with appropriate flags
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RagError::database(format!("Failed to open database: {}", e)))?;

        Self::init(conn, options, path)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory(options: StoreOptions) -> Result<Self> {
        Self::register_vec_extension();

        let conn = Connection::open_in_memory()
            .map_err(|e| RagError::database(format!("Failed to open in-memory database: {}", e)))?;

        Self::init(conn, options, Path::new(":memory:"))
    }

    /// Initialize the store with a connection.
    fn init(conn: Connection, options: StoreOptions, path: &Path) -> Result<Self> {
        if options.embedding_dimension == 0 {
            return Err(RagError::Config {
                message: "embedding_dimension must be positive".to_string(),
            });
        }

        Self::configure_connection(&conn, &options)?;
        Self::register_functions(&conn)?;

        // Initialize schema
        conn.execute_batch(SCHEMA)
            .map_err(|e| RagError::database(format!("Failed to initialize schema: {}", e)))?;

        let vec_enabled = options.vector_search && Self::probe_vec_extension(&conn);

        if vec_enabled {
            conn.execute_batch(&vec_schema(options.embedding_dimension))
                .map_err(|e| RagError::database(format!("Failed to create vec table: {}", e)))?;
            info!("sqlite-vec index available - vector search enabled");
        } else if options.vector_search {
            warn!("sqlite-vec extension not available - vector search disabled");
        } else {
            info!("Vector search disabled by configuration");
        }

        info!("Database opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            vec_enabled,
            dimension: options.embedding_dimension,
        })
    }

    /// Configure SQLite connection for optimal performance.
    fn configure_connection(conn: &Connection, options: &StoreOptions) -> Result<()> {
        let journal_mode = if options.wal_mode { "WAL" } else { "DELETE" };
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = {};
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = {};
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
            PRAGMA foreign_keys = ON;
            "#,
            journal_mode, options.cache_size, options.busy_timeout_ms
        ))
        .map_err(|e| RagError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Register sqlite-vec as an auto extension for every connection this process opens.
    fn register_vec_extension() {
        static REGISTER: Once = Once::new();
        REGISTER.call_once(|| {
            // SAFETY: sqlite3_vec_init has the signature SQLite expects of an
            // extension entry point; registration happens once per process.
            let rc = unsafe {
                #[allow(clippy::missing_transmute_annotations)]
                rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                    sqlite_vec::sqlite3_vec_init as *const (),
                )))
            };
            if rc != rusqlite::ffi::SQLITE_OK {
                warn!("Failed to register sqlite-vec extension (code {})", rc);
            }
        });
    }

    /// Check whether vec0 is usable on this connection.
    fn probe_vec_extension(conn: &Connection) -> bool {
        match conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0)) {
            Ok(version) => {
                debug!("sqlite-vec {}", version);
                true
            }
            Err(_) => false,
        }
    }

    /// Register `regexp(pattern, text)` used by pattern search.
    fn register_functions(conn: &Connection) -> Result<()> {
        conn.create_scalar_function(
            "regexp",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let re: Arc<Regex> =
                    ctx.get_or_create_aux(0, |vr| -> std::result::Result<Regex, BoxError> {
                        Ok(Regex::new(vr.as_str()?)?)
                    })?;
                let matched = match ctx.get_raw(1) {
                    ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                        .map(|text| re.is_match(text))
                        .unwrap_or(false),
                    _ => false,
                };
                Ok(matched)
            },
        )
        .map_err(|e| RagError::database(format!("Failed to register regexp function: {}", e)))
    }

    /// Check if vector search is available.
    pub fn vec_enabled(&self) -> bool {
        self.vec_enabled
    }

    /// Embedding dimensionality enforced by this store.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Run an operation on the connection from the blocking thread pool.
    ///
    /// Dropping the returned future cancels the operation: it is skipped if
    /// it has not started, and its statements are interrupted if it has.
    async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let guard = CancelOnDrop::default();
        let cancelled = Arc::clone(&guard.0);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| RagError::database(e.to_string()))?;
            if cancelled.load(Ordering::Relaxed) {
                return Err(RagError::internal("Storage operation cancelled"));
            }

            let flag = Arc::clone(&cancelled);
            conn.progress_handler(PROGRESS_INTERVAL_OPS, Some(move || flag.load(Ordering::Relaxed)));
            let result = f(&mut conn);
            conn.progress_handler(0, None::<fn() -> bool>);
            result
        })
        .await
        .map_err(|e| RagError::internal(format!("Storage task failed: {}", e)))?
    }
}

/// Flags its operation as cancelled when the awaiting future goes away.
#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Store for SqliteStore {
    // Repository operations

    async fn insert_repository(&self, repository: Repository) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO repositories (name, description, indexed_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(name) DO UPDATE SET
                    description = excluded.description,
                    indexed_at = excluded.indexed_at
                "#,
                params![
                    repository.name,
                    repository.description,
                    repository.indexed_at.map(|t| t as i64),
                ],
            )
            .map_err(|e| write_error(e, "Failed to insert repository"))?;

            debug!("Upserted repository: {}", repository.name);
            Ok(())
        })
        .await
    }

    async fn list_repositories(&self) -> Result<Vec<RepositorySummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT r.name, r.description, r.indexed_at,
                           (SELECT COUNT(*) FROM entities e WHERE e.repo = r.name),
                           (SELECT COUNT(*) FROM chunks c WHERE c.repo = r.name)
                    FROM repositories r
                    ORDER BY r.name
                    "#,
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            let repositories = stmt
                .query_map([], |row| {
                    Ok(RepositorySummary {
                        repository: Repository {
                            name: row.get(0)?,
                            description: row.get(1)?,
                            indexed_at: row.get::<_, Option<i64>>(2)?.map(|t| t as u64),
                        },
                        entities: row.get::<_, i64>(3)? as u64,
                        chunks: row.get::<_, i64>(4)? as u64,
                    })
                })
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(repositories)
        })
        .await
    }

    // Entity and relationship operations

    async fn insert_entities(&self, entities: &[Entity]) -> Result<()> {
        let entities: Vec<Entity> = entities.to_vec();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT INTO entities (repo, entity_id, name, qualified_name, kind, file_path, metadata)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        ON CONFLICT(repo, entity_id) DO UPDATE SET
                            name = excluded.name,
                            qualified_name = excluded.qualified_name,
                            kind = excluded.kind,
                            file_path = excluded.file_path,
                            metadata = excluded.metadata
                        "#,
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;

                for entity in &entities {
                    let metadata = serde_json::to_string(&entity.metadata)?;
                    stmt.execute(params![
                        entity.repo,
                        entity.entity_id,
                        entity.name,
                        entity.qualified_name,
                        entity.kind.as_str(),
                        entity.file_path,
                        metadata,
                    ])
                    .map_err(|e| write_error(e, &format!("Failed to insert entity {}", entity.key())))?;
                }
            }

            tx.commit().map_err(|e| RagError::database(e.to_string()))?;

            debug!("Inserted {} entities", entities.len());
            Ok(())
        })
        .await
    }

    async fn insert_relationships(&self, relationships: &[Relationship]) -> Result<()> {
        if let Some(bad) = relationships
            .iter()
            .find(|r| !r.strength.is_finite() || !(0.0..=1.0).contains(&r.strength))
        {
            return Err(RagError::invalid_argument(format!(
                "Relationship strength must be in [0, 1], got {} for {} -> {}",
                bad.strength, bad.from, bad.to
            )));
        }

        let relationships: Vec<Relationship> = relationships.to_vec();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT INTO relationships (from_repo, from_id, to_repo, to_id, kind, strength)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        ON CONFLICT(from_repo, from_id, to_repo, to_id, kind) DO UPDATE SET
                            strength = excluded.strength
                        "#,
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;

                for rel in &relationships {
                    stmt.execute(params![
                        rel.from.repo,
                        rel.from.id,
                        rel.to.repo,
                        rel.to.id,
                        rel.kind.as_str(),
                        rel.strength as f64,
                    ])
                    .map_err(|e| {
                        write_error(e, &format!("Failed to insert relationship {} -> {}", rel.from, rel.to))
                    })?;
                }
            }

            tx.commit().map_err(|e| RagError::database(e.to_string()))?;

            debug!("Inserted {} relationships", relationships.len());
            Ok(())
        })
        .await
    }

    async fn get_entity(&self, key: &EntityKey) -> Result<Option<Entity>> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM entities e WHERE e.repo = ?1 AND e.entity_id = ?2",
                ENTITY_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RagError::database(e.to_string()))?;

            let result = stmt
                .query_row(params![key.repo, key.id], row_to_entity)
                .optional()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(result)
        })
        .await
    }

    async fn find_entities(
        &self,
        name: &str,
        repos: Option<&RepoFilter>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let name = name.to_string();
        let filter = repo_filter_json(repos)?;
        self.with_conn(move |conn| {
            let sql = format!(
                r#"
                SELECT {} FROM entities e
                WHERE (e.entity_id = ?1 COLLATE NOCASE
                       OR e.name = ?1 COLLATE NOCASE
                       OR e.qualified_name = ?1 COLLATE NOCASE)
                  AND (?2 IS NULL OR e.repo IN (SELECT value FROM json_each(?2)))
                ORDER BY (e.entity_id = ?1 OR e.qualified_name = ?1 OR e.name = ?1) DESC,
                         e.repo, e.entity_id
                LIMIT ?3
                "#,
                ENTITY_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RagError::database(e.to_string()))?;

            let entities = stmt
                .query_map(params![name, filter, limit as i64], row_to_entity)
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(entities)
        })
        .await
    }

    async fn get_outgoing_edges(
        &self,
        key: &EntityKey,
        min_strength: f32,
    ) -> Result<Vec<Relationship>> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                r#"
                SELECT {} FROM relationships
                WHERE from_repo = ?1 AND from_id = ?2 AND strength >= ?3
                ORDER BY strength DESC, to_repo, to_id, kind
                "#,
                EDGE_COLUMNS
            );
            query_edges(conn, &sql, &key, min_strength)
        })
        .await
    }

    async fn get_incoming_edges(
        &self,
        key: &EntityKey,
        min_strength: f32,
    ) -> Result<Vec<Relationship>> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                r#"
                SELECT {} FROM relationships
                WHERE to_repo = ?1 AND to_id = ?2 AND strength >= ?3
                ORDER BY strength DESC, from_repo, from_id, kind
                "#,
                EDGE_COLUMNS
            );
            query_edges(conn, &sql, &key, min_strength)
        })
        .await
    }

    // Chunk operations

    async fn batch_insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let dimension = self.dimension;
        if let Some(bad) = chunks.iter().find(|c| {
            c.embedding
                .as_ref()
                .is_some_and(|e| e.len() != dimension)
        }) {
            return Err(RagError::invalid_argument(format!(
                "Embedding for {} has dimension {}, expected {}",
                bad.chunk_id,
                bad.embedding.as_ref().map_or(0, Vec::len),
                dimension
            )));
        }

        let chunks: Vec<Chunk> = chunks.to_vec();
        let vec_enabled = self.vec_enabled;
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            let mut embedded = 0usize;
            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT INTO chunks (chunk_id, repo, entity_id, chunk_type, content, embedding,
                                            file_path, start_line, end_line, language, metadata)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                        "#,
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;

                let mut vec_stmt = if vec_enabled {
                    Some(
                        tx.prepare("INSERT INTO vec_chunks (chunk_id, embedding) VALUES (?1, ?2)")
                            .map_err(|e| RagError::database(e.to_string()))?,
                    )
                } else {
                    None
                };

                for chunk in &chunks {
                    let embedding_bytes = chunk.embedding.as_deref().map(vec_to_bytes);
                    let metadata = serde_json::to_string(&chunk.metadata)?;
                    stmt.execute(params![
                        chunk.chunk_id,
                        chunk.repo,
                        chunk.entity_id,
                        chunk.chunk_type.as_str(),
                        chunk.content,
                        embedding_bytes,
                        chunk.file_path,
                        chunk.start_line,
                        chunk.end_line,
                        chunk.language,
                        metadata,
                    ])
                    .map_err(|e| write_error(e, &format!("Failed to insert chunk {}", chunk.chunk_id)))?;

                    if let (Some(vec_stmt), Some(bytes)) = (vec_stmt.as_mut(), embedding_bytes) {
                        vec_stmt
                            .execute(params![chunk.chunk_id, bytes])
                            .map_err(|e| {
                                RagError::database(format!(
                                    "Failed to insert embedding for {}: {}",
                                    chunk.chunk_id, e
                                ))
                            })?;
                        embedded += 1;
                    }
                }
            }

            tx.commit().map_err(|e| RagError::database(e.to_string()))?;

            debug!("Inserted {} chunks ({} indexed for vector search)", chunks.len(), embedded);
            Ok(())
        })
        .await
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let chunk_id = chunk_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {}, c.embedding FROM chunks c WHERE c.chunk_id = ?1",
                CHUNK_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RagError::database(e.to_string()))?;

            let result = stmt
                .query_row(params![chunk_id], |row| {
                    let mut chunk = row_to_chunk(row)?;
                    let bytes: Option<Vec<u8>> = row.get(10)?;
                    chunk.embedding = bytes.map(|b| bytes_to_vec(&b));
                    Ok(chunk)
                })
                .optional()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(result)
        })
        .await
    }

    async fn get_chunks_for_entity(&self, key: &EntityKey) -> Result<Vec<Chunk>> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM chunks c WHERE c.repo = ?1 AND c.entity_id = ?2 ORDER BY c.chunk_id",
                CHUNK_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RagError::database(e.to_string()))?;

            let chunks = stmt
                .query_map(params![key.repo, key.id], row_to_chunk)
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(chunks)
        })
        .await
    }

    // Search operations

    async fn lexical_search(
        &self,
        query: &str,
        repos: Option<&RepoFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredCandidate>> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let filter = repo_filter_json(repos)?;

        self.with_conn(move |conn| {
            let sql = format!(
                r#"
                SELECT {}, bm25(chunks_fts) AS rank
                FROM chunks_fts
                JOIN chunks c ON c.id = chunks_fts.rowid
                WHERE chunks_fts MATCH ?1
                  AND (?2 IS NULL OR c.repo IN (SELECT value FROM json_each(?2)))
                ORDER BY rank, c.chunk_id
                LIMIT ?3
                "#,
                CHUNK_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RagError::database(e.to_string()))?;

            let results = stmt
                .query_map(params![fts_query, filter, limit as i64], |row| {
                    let chunk = row_to_chunk(row)?;
                    let rank: f64 = row.get(10)?;
                    Ok(ScoredCandidate::new(chunk, (-rank) as f32, Source::Sparse))
                })
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(results)
        })
        .await
    }

    async fn pattern_search(
        &self,
        pattern: &str,
        repos: Option<&RepoFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredCandidate>> {
        let pattern = Pattern::parse(pattern)?;
        let filter = repo_filter_json(repos)?;

        self.with_conn(move |conn| {
            let sql = format!(
                r#"
                SELECT {}, e.name, e.qualified_name
                FROM chunks c
                LEFT JOIN entities e ON e.repo = c.repo AND e.entity_id = c.entity_id
                WHERE (?2 IS NULL OR c.repo IN (SELECT value FROM json_each(?2)))
                  AND (regexp(?1, c.content)
                       OR regexp(?1, e.name)
                       OR regexp(?1, e.qualified_name)
                       OR regexp(?1, c.entity_id))
                "#,
                CHUNK_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RagError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params![pattern.prefilter_regex(), filter], |row| {
                    let chunk = row_to_chunk(row)?;
                    let name: Option<String> = row.get(10)?;
                    let qualified_name: Option<String> = row.get(11)?;
                    Ok((chunk, name, qualified_name))
                })
                .map_err(|e| RagError::database(e.to_string()))?;

            // Every prefilter match is scored; only the best `limit` are kept.
            let keep = limit.max(1);
            let mut results: Vec<ScoredCandidate> = Vec::new();
            for row in rows {
                let (chunk, name, qualified_name) =
                    row.map_err(|e| RagError::database(e.to_string()))?;
                let Some(score) = pattern.specificity(&MatchTarget {
                    entity_id: chunk.entity_id.as_deref(),
                    name: name.as_deref(),
                    qualified_name: qualified_name.as_deref(),
                    content: &chunk.content,
                }) else {
                    continue;
                };
                results.push(ScoredCandidate::new(chunk, score, Source::Pattern));
                if results.len() >= keep * PATTERN_COMPACT_FACTOR {
                    sort_candidates(&mut results);
                    results.truncate(keep);
                }
            }

            sort_candidates(&mut results);
            results.truncate(limit);

            Ok(results)
        })
        .await
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        repos: Option<&RepoFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredCandidate>> {
        if !self.vec_enabled {
            return Err(RagError::capability_unavailable("vector_search"));
        }

        if embedding.len() != self.dimension {
            return Err(RagError::invalid_argument(format!(
                "Query embedding has dimension {}, expected {}",
                embedding.len(),
                self.dimension
            )));
        }

        let embedding_bytes = vec_to_bytes(embedding);
        let filter = repo_filter_json(repos)?;

        self.with_conn(move |conn| {
            // Unfiltered requests use the KNN index. Filtered requests score
            // every embedded chunk of the selected repositories.
            let sql = match filter.as_ref() {
                None => format!(
                    r#"
                    SELECT {}, v.distance
                    FROM (
                        SELECT chunk_id, distance
                        FROM vec_chunks
                        WHERE embedding MATCH ?1 AND k = ?2
                    ) v
                    JOIN chunks c ON c.chunk_id = v.chunk_id
                    ORDER BY v.distance, c.chunk_id
                    LIMIT ?2
                    "#,
                    CHUNK_COLUMNS
                ),
                Some(_) => format!(
                    r#"
                    SELECT {}, vec_distance_cosine(c.embedding, ?1) AS distance
                    FROM chunks c
                    WHERE c.embedding IS NOT NULL
                      AND c.repo IN (SELECT value FROM json_each(?3))
                    ORDER BY distance, c.chunk_id
                    LIMIT ?2
                    "#,
                    CHUNK_COLUMNS
                ),
            };
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RagError::database(e.to_string()))?;

            let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<ScoredCandidate> {
                let chunk = row_to_chunk(row)?;
                let distance: f64 = row.get(10)?;
                let similarity = (1.0 - distance / 2.0).clamp(0.0, 1.0) as f32;
                Ok(ScoredCandidate::new(chunk, similarity, Source::Dense))
            };

            let rows = match &filter {
                None => {
                    let k = limit.clamp(1, VEC_MAX_K) as i64;
                    stmt.query_map(params![embedding_bytes, k], map_row)
                }
                Some(filter) => stmt.query_map(
                    params![embedding_bytes, limit as i64, filter],
                    map_row,
                ),
            };

            let mut results = rows
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;
            results.truncate(limit);

            Ok(results)
        })
        .await
    }

    fn has_vector_capability(&self) -> bool {
        self.vec_enabled
    }

    // Stats

    async fn get_stats(&self) -> Result<Stats> {
        let vec_enabled = self.vec_enabled;
        self.with_conn(move |conn| {
            let count = |sql: &str| -> Result<u64> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(|e| RagError::database(e.to_string()))
            };

            let repositories = count("SELECT COUNT(*) FROM repositories")?;
            let entities = count("SELECT COUNT(*) FROM entities")?;
            let relationships = count("SELECT COUNT(*) FROM relationships")?;
            let chunks = count("SELECT COUNT(*) FROM chunks")?;
            let embeddings = count("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")?;

            // Get page count and page size to estimate storage
            let page_count: u64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .unwrap_or(0);
            let page_size: u64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .unwrap_or(4096);

            Ok(Stats {
                repositories,
                entities,
                relationships,
                chunks,
                embeddings,
                storage_bytes: page_count * page_size,
                vector_search: vec_enabled,
            })
        })
        .await
    }
}

// Helper functions

/// Map a write failure to the error taxonomy: constraint violations are data
/// problems the caller must see, not generic database errors.
fn write_error(e: rusqlite::Error, context: &str) -> RagError {
    let message = e.to_string();
    if message.contains("FOREIGN KEY constraint failed") {
        RagError::integrity(format!("{}: referenced row does not exist", context))
    } else if message.contains("UNIQUE constraint failed") {
        RagError::invalid_argument(format!("{}: already exists and is immutable", context))
    } else if message.contains("CHECK constraint failed") {
        RagError::invalid_argument(format!("{}: {}", context, message))
    } else {
        RagError::database(format!("{}: {}", context, message))
    }
}

fn query_edges(
    conn: &Connection,
    sql: &str,
    key: &EntityKey,
    min_strength: f32,
) -> Result<Vec<Relationship>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| RagError::database(e.to_string()))?;

    let edges = stmt
        .query_map(
            params![key.repo, key.id, min_strength as f64],
            row_to_relationship,
        )
        .map_err(|e| RagError::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RagError::database(e.to_string()))?;

    Ok(edges)
}

/// Serialize a repository filter for `json_each` binding.
fn repo_filter_json(repos: Option<&RepoFilter>) -> Result<Option<String>> {
    repos
        .map(|r| serde_json::to_string(r).map_err(RagError::from))
        .transpose()
}

/// Convert a row to a Chunk (embedding not loaded).
fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let chunk_type: String = row.get(3)?;
    let metadata: Option<String> = row.get(9)?;

    Ok(Chunk {
        chunk_id: row.get(0)?,
        repo: row.get(1)?,
        entity_id: row.get(2)?,
        chunk_type: ChunkKind::parse(&chunk_type),
        content: row.get(4)?,
        embedding: None,
        file_path: row.get(5)?,
        start_line: row.get(6)?,
        end_line: row.get(7)?,
        language: row.get(8)?,
        metadata: parse_metadata(metadata),
    })
}

/// Convert a row to an Entity.
fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let kind: String = row.get(4)?;
    let metadata: Option<String> = row.get(6)?;

    Ok(Entity {
        repo: row.get(0)?,
        entity_id: row.get(1)?,
        name: row.get(2)?,
        qualified_name: row.get(3)?,
        kind: EntityKind::parse(&kind),
        file_path: row.get(5)?,
        metadata: parse_metadata(metadata),
    })
}

/// Convert a row to a Relationship.
fn row_to_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relationship> {
    let kind: String = row.get(4)?;
    let strength: f64 = row.get(5)?;

    Ok(Relationship {
        from: EntityKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        to: EntityKey::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        kind: RelationKind::parse(&kind),
        strength: strength as f32,
    })
}

fn parse_metadata(raw: Option<String>) -> Metadata {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

/// Convert f32 vector to bytes (little-endian).
fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert little-endian bytes back to an f32 vector.
fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Build an FTS5 query matching any query term.
///
/// Terms are split on non-alphanumerics the way the unicode61 tokenizer
/// splits content; camelCase words also contribute their parts. Every term is
/// quoted so FTS5 operators in user input stay inert.
fn fts_query(query: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut push = |t: String| {
        if t.chars().count() >= 2 && !terms.contains(&t) {
            terms.push(t);
        }
    };

    for word in query.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        push(word.to_lowercase());
        let parts = camel_parts(word);
        if parts.len() > 1 {
            for part in parts {
                push(part.to_lowercase());
            }
        }
    }

    if terms.is_empty() {
        return None;
    }

    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Split `validateCredentials` into `validate`, `Credentials`.
fn camel_parts(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev_lower = false;
    for (i, c) in word.char_indices() {
        if c.is_uppercase() && prev_lower {
            parts.push(&word[start..i]);
            start = i;
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
    }
    parts.push(&word[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn seeded(options: StoreOptions) -> SqliteStore {
        let store = SqliteStore::open_memory(options).unwrap();
        store
            .insert_repository(Repository::new("auth", Some("Auth service")))
            .await
            .unwrap();
        store
            .insert_repository(Repository::new("web", None))
            .await
            .unwrap();

        store
            .insert_entities(&[
                Entity::new("auth", "UserService", "UserService", EntityKind::Class),
                Entity::new("auth", "UserService.validateCredentials", "validateCredentials", EntityKind::Method)
                    .with_qualified_name("UserService.validateCredentials")
                    .with_file_path("src/user_service.ts"),
                Entity::new("web", "LoginHandler", "LoginHandler", EntityKind::Function),
            ])
            .await
            .unwrap();

        store
            .insert_relationships(&[
                Relationship::new(
                    EntityKey::new("web", "LoginHandler"),
                    EntityKey::new("auth", "UserService.validateCredentials"),
                    RelationKind::Calls,
                    0.9,
                ),
                Relationship::new(
                    EntityKey::new("auth", "UserService.validateCredentials"),
                    EntityKey::new("auth", "UserService"),
                    RelationKind::References,
                    0.3,
                ),
            ])
            .await
            .unwrap();

        store
            .batch_insert_chunks(&[
                Chunk::new(
                    "auth",
                    "UserService.validateCredentials",
                    ChunkKind::Code,
                    "validateCredentials(user, password) { return hash(password) === user.hash; }",
                )
                .with_span("src/user_service.ts", 10, 12),
                Chunk::new("auth", "UserService", ChunkKind::Doc, "UserService manages accounts and sessions"),
                Chunk::new(
                    "web",
                    "LoginHandler",
                    ChunkKind::Code,
                    "function LoginHandler(req) { return users.validateCredentials(req.user, req.pw); }",
                ),
            ])
            .await
            .unwrap();

        store
    }

    fn filter(repos: &[&str]) -> RepoFilter {
        repos.iter().map(|r| r.to_string()).collect()
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = SqliteStore::open_memory(StoreOptions::default()).unwrap();
        assert!(store.list_repositories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("coderag.db");

        {
            let store = SqliteStore::open(&path, StoreOptions::without_vectors()).unwrap();
            store
                .insert_repository(Repository::new("auth", None))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path, StoreOptions::without_vectors()).unwrap();
        let repos = store.list_repositories().await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].repository.name, "auth");
    }

    #[tokio::test]
    async fn test_list_repositories_counts() {
        let store = seeded(StoreOptions::without_vectors()).await;
        let repos = store.list_repositories().await.unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].repository.name, "auth");
        assert_eq!(repos[0].entities, 2);
        assert_eq!(repos[0].chunks, 2);
        assert_eq!(repos[1].repository.name, "web");
        assert_eq!(repos[1].chunks, 1);
    }

    #[tokio::test]
    async fn test_get_and_find_entities() {
        let store = seeded(StoreOptions::without_vectors()).await;

        let entity = store
            .get_entity(&EntityKey::new("auth", "UserService.validateCredentials"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.name, "validateCredentials");
        assert_eq!(entity.file_path.as_deref(), Some("src/user_service.ts"));

        let found = store.find_entities("userservice.VALIDATECREDENTIALS", None, 5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_id, "UserService.validateCredentials");

        let filtered = store
            .find_entities("LoginHandler", Some(&filter(&["auth"])), 5)
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn test_edges_respect_min_strength() {
        let store = seeded(StoreOptions::without_vectors()).await;
        let key = EntityKey::new("auth", "UserService.validateCredentials");

        let strong = store.get_outgoing_edges(&key, 0.5).await.unwrap();
        assert!(strong.is_empty());
        let all = store.get_outgoing_edges(&key, 0.0).await.unwrap();
        assert_eq!(all.len(), 1);

        let incoming = store.get_incoming_edges(&key, 0.5).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].from, EntityKey::new("web", "LoginHandler"));
        assert!(incoming[0].is_cross_repository());
    }

    #[tokio::test]
    async fn test_dangling_edge_is_integrity_error() {
        let store = seeded(StoreOptions::without_vectors()).await;
        let err = store
            .insert_relationships(&[Relationship::new(
                EntityKey::new("auth", "UserService"),
                EntityKey::new("auth", "Missing"),
                RelationKind::Calls,
                0.8,
            )])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INTEGRITY_ERROR");
    }

    #[tokio::test]
    async fn test_strength_out_of_range_rejected() {
        let store = seeded(StoreOptions::without_vectors()).await;
        let err = store
            .insert_relationships(&[Relationship::new(
                EntityKey::new("auth", "UserService"),
                EntityKey::new("web", "LoginHandler"),
                RelationKind::Calls,
                1.5,
            )])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_batch_insert_is_atomic() {
        let store = seeded(StoreOptions::without_vectors()).await;

        // Second chunk reuses an existing id: the whole batch must roll back.
        let err = store
            .batch_insert_chunks(&[
                Chunk::with_id("auth:fresh", "auth", ChunkKind::Doc, "fresh content"),
                Chunk::new("auth", "UserService", ChunkKind::Doc, "duplicate"),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        assert!(store.get_chunk("auth:fresh").await.unwrap().is_none());

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.chunks, 3);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = SqliteStore::open_memory(StoreOptions::with_dimension(4)).unwrap();
        store.insert_repository(Repository::new("r", None)).await.unwrap();
        let err = store
            .batch_insert_chunks(&[Chunk::with_id("r:a", "r", ChunkKind::Code, "a")
                .with_embedding(vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_lexical_search_matches_identifier_terms() {
        let store = seeded(StoreOptions::without_vectors()).await;

        let results = store
            .lexical_search("UserService.validateCredentials", None, 10)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.source == Source::Sparse));
        assert!(results.windows(2).all(|w| w[0].raw_score >= w[1].raw_score));

        let web_only = store
            .lexical_search("validateCredentials", Some(&filter(&["web"])), 10)
            .await
            .unwrap();
        assert_eq!(web_only.len(), 1);
        assert_eq!(web_only[0].chunk.repo, "web");
    }

    #[tokio::test]
    async fn test_lexical_search_ignores_fts_operators() {
        let store = seeded(StoreOptions::without_vectors()).await;
        let results = store.lexical_search("NOT (\"*", None, 10).await.unwrap();
        assert!(results.is_empty());
        let results = store.lexical_search("sessions AND", None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_pattern_search_ranks_by_specificity() {
        let store = seeded(StoreOptions::without_vectors()).await;

        let results = store
            .pattern_search("UserService.validateCredentials", None, 10)
            .await
            .unwrap();
        assert_eq!(
            results[0].chunk.chunk_id,
            "auth:UserService.validateCredentials:code"
        );
        assert_eq!(results[0].raw_score, coderag_core::pattern::SCORE_EXACT);

        let wildcard = store.pattern_search("validate*(", None, 10).await.unwrap();
        assert_eq!(wildcard.len(), 2);
        assert!(wildcard.iter().all(|c| c.source == Source::Pattern));
    }

    #[tokio::test]
    async fn test_vector_search_unavailable_when_disabled() {
        let store = seeded(StoreOptions::without_vectors()).await;
        assert!(!store.has_vector_capability());

        let err = store
            .vector_search(&vec![0.0; 768], None, 10)
            .await
            .unwrap_err();
        assert!(err.is_capability_unavailable());
    }

    #[tokio::test]
    async fn test_vector_round_trip() {
        let store = SqliteStore::open_memory(StoreOptions::with_dimension(4)).unwrap();
        assert!(store.has_vector_capability());

        store.insert_repository(Repository::new("r", None)).await.unwrap();
        store.insert_repository(Repository::new("s", None)).await.unwrap();
        store
            .batch_insert_chunks(&[
                Chunk::with_id("r:a", "r", ChunkKind::Code, "a").with_embedding(vec![1.0, 0.0, 0.0, 0.0]),
                Chunk::with_id("r:b", "r", ChunkKind::Code, "b").with_embedding(vec![0.0, 1.0, 0.0, 0.0]),
                Chunk::with_id("s:c", "s", ChunkKind::Code, "c").with_embedding(vec![0.7, 0.7, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store
            .vector_search(&[1.0, 0.0, 0.0, 0.0], None, 10)
            .await
            .unwrap();
        assert_eq!(results[0].chunk.chunk_id, "r:a");
        assert!(results.iter().all(|r| r.raw_score <= results[0].raw_score));
        assert!((results[0].raw_score - 1.0).abs() < 1e-4);

        let filtered = store
            .vector_search(&[1.0, 0.0, 0.0, 0.0], Some(&filter(&["s"])), 10)
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk.chunk_id, "s:c");

        let stored = store.get_chunk("r:a").await.unwrap().unwrap();
        assert_eq!(stored.embedding, Some(vec![1.0, 0.0, 0.0, 0.0]));
    }

    #[tokio::test]
    async fn test_pattern_exact_match_survives_many_content_hits() {
        let store = SqliteStore::open_memory(StoreOptions::without_vectors()).unwrap();
        store.insert_repository(Repository::new("r", None)).await.unwrap();
        store
            .insert_entities(&[Entity::new("r", "needle", "needle", EntityKind::Function)])
            .await
            .unwrap();

        let mut chunks: Vec<Chunk> = (0..600)
            .map(|i| {
                Chunk::with_id(
                    &format!("r:a{:05}", i),
                    "r",
                    ChunkKind::Code,
                    "let x = needle(haystack);",
                )
            })
            .collect();
        chunks.push(Chunk::new("r", "needle", ChunkKind::Code, "fn needle() {}"));
        store.batch_insert_chunks(&chunks).await.unwrap();

        let results = store.pattern_search("needle", None, 10).await.unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(results[0].chunk.chunk_id, "r:needle:code");
        assert_eq!(results[0].raw_score, coderag_core::pattern::SCORE_EXACT);
        assert!(results[1..].iter().all(|r| r.raw_score < results[0].raw_score));
    }

    #[tokio::test]
    async fn test_vector_filter_reaches_small_repository() {
        let store = SqliteStore::open_memory(StoreOptions::with_dimension(4)).unwrap();
        store.insert_repository(Repository::new("big", None)).await.unwrap();
        store.insert_repository(Repository::new("small", None)).await.unwrap();

        let mut chunks: Vec<Chunk> = (0..300)
            .map(|i| {
                Chunk::with_id(&format!("big:{:03}", i), "big", ChunkKind::Code, "big")
                    .with_embedding(vec![1.0, 0.0, 0.0, 0.0])
            })
            .collect();
        chunks.push(
            Chunk::with_id("small:only", "small", ChunkKind::Code, "small")
                .with_embedding(vec![0.0, 1.0, 0.0, 0.0]),
        );
        store.batch_insert_chunks(&chunks).await.unwrap();

        let results = store
            .vector_search(&[1.0, 0.0, 0.0, 0.0], Some(&filter(&["small"])), 30)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "small:only");
        assert!((results[0].raw_score - 0.5).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_vector_ties_break_by_chunk_id() {
        let store = SqliteStore::open_memory(StoreOptions::with_dimension(4)).unwrap();
        store.insert_repository(Repository::new("r", None)).await.unwrap();

        // Inserted in reverse id order.
        store
            .batch_insert_chunks(&[
                Chunk::with_id("r:d", "r", ChunkKind::Code, "d").with_embedding(vec![0.0, 0.0, 1.0, 0.0]),
                Chunk::with_id("r:c", "r", ChunkKind::Code, "c").with_embedding(vec![0.0, 0.0, 0.0, 1.0]),
                Chunk::with_id("r:b", "r", ChunkKind::Code, "b").with_embedding(vec![1.0, 0.0, 0.0, 0.0]),
                Chunk::with_id("r:a", "r", ChunkKind::Code, "a").with_embedding(vec![1.0, 0.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let query = [1.0, 0.0, 0.0, 0.0];
        for repos in [None, Some(filter(&["r"]))] {
            let results = store.vector_search(&query, repos.as_ref(), 4).await.unwrap();
            let ids: Vec<&str> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
            assert_eq!(ids, vec!["r:a", "r:b", "r:c", "r:d"]);
            assert_eq!(results[0].raw_score, results[1].raw_score);
            assert!(results[1].raw_score > results[2].raw_score);
        }
    }

    #[tokio::test]
    async fn test_abandoned_operation_releases_connection() {
        let store = seeded(StoreOptions::without_vectors()).await;

        let endless = store.with_conn(|conn| {
            conn.query_row(
                "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n) \
                 SELECT count(*) FROM n",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|e| RagError::database(e.to_string()))
        });
        assert!(tokio::time::timeout(Duration::from_millis(50), endless)
            .await
            .is_err());

        let stats = tokio::time::timeout(Duration::from_secs(5), store.get_stats())
            .await
            .expect("connection still held by the abandoned query")
            .unwrap();
        assert_eq!(stats.repositories, 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = seeded(StoreOptions::without_vectors()).await;
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.repositories, 2);
        assert_eq!(stats.entities, 3);
        assert_eq!(stats.relationships, 2);
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.embeddings, 0);
        assert!(!stats.vector_search);
    }

    #[test]
    fn test_fts_query_terms() {
        assert_eq!(
            fts_query("UserService.validateCredentials").as_deref(),
            Some("\"userservice\" OR \"user\" OR \"service\" OR \"validatecredentials\" OR \"validate\" OR \"credentials\"")
        );
        assert_eq!(fts_query("a * ( )"), None);
    }

    #[test]
    fn test_camel_parts() {
        assert_eq!(camel_parts("validateCredentials"), vec!["validate", "Credentials"]);
        assert_eq!(camel_parts("HTTPServer"), vec!["HTTPServer"]);
        assert_eq!(camel_parts("plain"), vec!["plain"]);
    }

    #[test]
    fn test_vec_bytes_round_trip() {
        let v = vec![0.25f32, -1.0, 3.5];
        assert_eq!(bytes_to_vec(&vec_to_bytes(&v)), v);
    }
}
