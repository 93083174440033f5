//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Repositories table
CREATE TABLE IF NOT EXISTS repositories (
    name TEXT PRIMARY KEY,
    description TEXT,
    indexed_at INTEGER
);

-- Entities table
CREATE TABLE IF NOT EXISTS entities (
    repo TEXT NOT NULL REFERENCES repositories(name) ON DELETE CASCADE,
    entity_id TEXT NOT NULL,
    name TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    file_path TEXT,
    metadata TEXT DEFAULT '{}',
    PRIMARY KEY (repo, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_entities_qualified_name ON entities(qualified_name COLLATE NOCASE);

-- Relationships table: endpoints must exist when the edge is created
CREATE TABLE IF NOT EXISTS relationships (
    from_repo TEXT NOT NULL,
    from_id TEXT NOT NULL,
    to_repo TEXT NOT NULL,
    to_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    strength REAL NOT NULL CHECK (strength >= 0.0 AND strength <= 1.0),
    PRIMARY KEY (from_repo, from_id, to_repo, to_id, kind),
    FOREIGN KEY (from_repo, from_id) REFERENCES entities(repo, entity_id) ON DELETE CASCADE,
    FOREIGN KEY (to_repo, to_id) REFERENCES entities(repo, entity_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_repo, to_id);

-- Chunks table; the integer rowid backs the FTS5 external content table
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY,
    chunk_id TEXT NOT NULL UNIQUE,
    repo TEXT NOT NULL REFERENCES repositories(name) ON DELETE CASCADE,
    entity_id TEXT,
    chunk_type TEXT NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB,
    file_path TEXT,
    start_line INTEGER,
    end_line INTEGER,
    language TEXT,
    metadata TEXT DEFAULT '{}',
    FOREIGN KEY (repo, entity_id) REFERENCES entities(repo, entity_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunks_repo ON chunks(repo);
CREATE INDEX IF NOT EXISTS idx_chunks_entity ON chunks(repo, entity_id);

-- FTS5 virtual table for lexical search
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    content=chunks,
    content_rowid=id
);

-- Triggers to keep FTS5 in sync with chunks table
CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content) VALUES (NEW.id, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', OLD.id, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', OLD.id, OLD.content);
    INSERT INTO chunks_fts(rowid, content) VALUES (NEW.id, NEW.content);
END;
"#;

/// Schema for the sqlite-vec virtual table.
/// This must be created separately once the extension is available.
pub fn vec_schema(dimension: usize) -> String {
    format!(
        r#"
CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
    chunk_id TEXT PRIMARY KEY,
    embedding float[{}] distance_metric=cosine
);
"#,
        dimension
    )
}

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;
