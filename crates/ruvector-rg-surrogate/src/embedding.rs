//! Feature embeddings: raw node/edge features → hidden width.

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::error::Result;
use crate::linear::{Linear, ParameterShapes};
use crate::tensor::relu_inplace;

/// Linear projection followed by ReLU.
#[derive(Debug, Clone)]
pub struct FeatureEmbedding {
    proj: Linear,
}

/// Embeds coupling-state node features `[lambda, gamma, mu, scale]`.
pub type NodeEmbedding = FeatureEmbedding;

/// Embeds rate-of-change edge features.
pub type EdgeEmbedding = FeatureEmbedding;

impl FeatureEmbedding {
    /// Create an embedding `input_dim → embed_dim`.
    pub fn new<R: Rng + ?Sized>(input_dim: usize, embed_dim: usize, rng: &mut R) -> Self {
        Self {
            proj: Linear::new(input_dim, embed_dim, rng),
        }
    }

    /// Wrap an explicit projection.
    pub fn from_linear(proj: Linear) -> Self {
        Self { proj }
    }

    /// Input feature width
    pub fn input_dim(&self) -> usize {
        self.proj.input_dim()
    }

    /// Embedding width
    pub fn embed_dim(&self) -> usize {
        self.proj.output_dim()
    }

    /// Embed `(num_items, input_dim)` into `(num_items, embed_dim)`.
    ///
    /// Zero rows in, zero rows out.
    pub fn forward(&self, features: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let mut out = self.proj.forward(features)?;
        relu_inplace(&mut out);
        Ok(out)
    }

    pub(crate) fn collect_shapes(&self, prefix: &str, out: &mut ParameterShapes) {
        self.proj.collect_shapes(prefix, out);
    }
}
