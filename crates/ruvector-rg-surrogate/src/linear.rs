//! Dense projection layer and parameter bookkeeping.
//!
//! Weights are stored `(input_dim, output_dim)` so that a batch of row
//! vectors projects as `x · W + b`. Initialization draws from
//! `N(0, 1/input_dim)` using a caller-supplied generator; there is no global
//! RNG anywhere in the crate.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SurrogateError};

/// Named parameter shapes, keyed by dotted path (e.g. `encoder.layers.0.w_node`).
pub type ParameterShapes = BTreeMap<String, Vec<usize>>;

/// Sample a `(rows, cols)` matrix from `N(0, 1/fan_in)`.
pub(crate) fn init_matrix<R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    fan_in: usize,
    rng: &mut R,
) -> Array2<f32> {
    let std = 1.0 / (fan_in.max(1) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| {
        let z: f64 = StandardNormal.sample(rng);
        (z * std) as f32
    })
}

/// Linear transformation layer: `y = x · W (+ b)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Linear {
    /// Create a layer with a zero-initialized bias.
    pub fn new<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        Self {
            weight: init_matrix(input_dim, output_dim, input_dim, rng),
            bias: Some(Array1::zeros(output_dim)),
        }
    }

    /// Create a bias-free projection.
    pub fn without_bias<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        Self {
            weight: init_matrix(input_dim, output_dim, input_dim, rng),
            bias: None,
        }
    }

    /// Wrap explicit weights, e.g. loaded by a persistence layer.
    pub fn from_weights(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self> {
        if let Some(b) = &bias {
            if b.len() != weight.ncols() {
                return Err(SurrogateError::BadWeights(format!(
                    "bias length {} does not match weight output dim {}",
                    b.len(),
                    weight.ncols()
                )));
            }
        }
        Ok(Self { weight, bias })
    }

    /// Input dimension
    pub fn input_dim(&self) -> usize {
        self.weight.nrows()
    }

    /// Output dimension
    pub fn output_dim(&self) -> usize {
        self.weight.ncols()
    }

    /// Weight matrix `(input_dim, output_dim)`
    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    /// Forward pass over a batch of rows `(n, input_dim)`.
    pub fn forward(&self, input: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if input.ncols() != self.input_dim() {
            return Err(SurrogateError::dimension_mismatch(
                format!("width {}", self.input_dim()),
                format!("width {}", input.ncols()),
            ));
        }
        let mut out = input.dot(&self.weight);
        if let Some(b) = &self.bias {
            out += b;
        }
        Ok(out)
    }

    /// Forward pass over `(batch, seq, input_dim)`.
    pub fn forward_3d(&self, input: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (batch, seq, width) = input.dim();
        let flat = input
            .as_standard_layout()
            .into_owned()
            .into_shape((batch * seq, width))
            .map_err(|e| SurrogateError::InvalidInput(e.to_string()))?;
        let out = self.forward(flat.view())?;
        let out_dim = self.output_dim();
        out.into_shape((batch, seq, out_dim))
            .map_err(|e| SurrogateError::InvalidInput(e.to_string()))
    }

    /// Record this layer's parameter shapes under `prefix`.
    pub fn collect_shapes(&self, prefix: &str, out: &mut ParameterShapes) {
        out.insert(format!("{prefix}.weight"), self.weight.shape().to_vec());
        if let Some(b) = &self.bias {
            out.insert(format!("{prefix}.bias"), b.shape().to_vec());
        }
    }
}
