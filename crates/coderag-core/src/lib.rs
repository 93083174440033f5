//! coderag-core - Core types and traits for multi-repository code retrieval
//!
//! This crate provides the foundational types, traits, and error handling
//! used throughout the coderag workspace.

pub mod config;
pub mod error;
pub mod pattern;
pub mod results;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RagError, Result};
pub use pattern::{MatchTarget, Pattern};
pub use results::*;
pub use traits::*;
pub use types::*;
