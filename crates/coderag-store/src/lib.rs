//! coderag-store - SQLite storage layer
//!
//! This crate provides persistent storage for repositories, entities,
//! relationships, chunks and embeddings using SQLite, with FTS5 for lexical
//! search, a `regexp` SQL function for pattern search, and the sqlite-vec
//! extension for optional nearest-neighbour search.

mod schema;
mod sqlite;

pub use sqlite::{SqliteStore, StoreOptions};

// Re-export schema for testing/migrations
pub use schema::{vec_schema, SCHEMA, SCHEMA_VERSION};
