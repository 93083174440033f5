//! Deterministic embedder that needs no model or network.

use async_trait::async_trait;

use coderag_core::{Embedder, Result};

/// A mock embedder for testing that doesn't require actual models.
///
/// Identical texts always map to identical unit vectors.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    /// Create a new mock embedder with default settings.
    pub fn new() -> Self {
        Self { dimension: 768 }
    }

    /// Create a mock embedder with a custom dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Embed text synchronously, for seeding stores in tests.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        // FNV-1a so that anagrams land on different vectors
        let hash = text
            .bytes()
            .fold(0xcbf29ce484222325u64, |acc, b| (acc ^ b as u64).wrapping_mul(0x100000001b3));

        let mut embedding: Vec<f32> = (0..self.dimension)
            .map(|i| {
                let mixed = hash.wrapping_mul(i as u64 * 2 + 1).rotate_left((i % 64) as u32);
                (mixed % 1000) as f32 / 1000.0 - 0.5
            })
            .collect();

        // L2 normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
