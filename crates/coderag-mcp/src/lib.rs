//! coderag-mcp - MCP tool surface
//!
//! This crate exposes multi-repository code retrieval as MCP (Model Context
//! Protocol) tools for AI assistants. Every tool returns a `ToolResult`
//! carrying either a JSON payload or an error code and message.
//!
//! # Tools
//!
//! - `query_repositories` - Fused search across repositories
//! - `query_dependency` - What an entity depends on
//! - `get_cross_references` - Relationships linking an entity to other repositories
//! - `list_repositories` - Indexed repositories with counts

mod server;

pub use server::{
    CodeRagServer, CrossReferenceParams, DependencyParams, QueryParams, ServerInfo, ToolError,
    ToolInfo, ToolResult,
};
