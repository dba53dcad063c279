//! Scaled dot-product multi-head attention over batched sequences.

use ndarray::{s, Array3, ArrayView3, Axis};
use rand::Rng;

use crate::error::{Result, SurrogateError};
use crate::linear::{Linear, ParameterShapes};
use crate::tensor::softmax_last_axis_inplace;

/// Score assigned to masked-out query/key pairs before softmax.
pub const MASK_SENTINEL: f32 = -1e9;

/// Multi-head attention mechanism.
///
/// Used for both decoder self-attention (key/value default to the query)
/// and cross-attention against the encoder output. Stateless across calls.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    embed_dim: usize,
    num_heads: usize,
    head_dim: usize,
    w_q: Linear,
    w_k: Linear,
    w_v: Linear,
    w_o: Linear,
}

impl MultiHeadAttention {
    /// Create a new multi-head attention layer.
    ///
    /// # Errors
    /// `SurrogateError::Config` if `embed_dim` is not divisible by `num_heads`.
    pub fn new<R: Rng + ?Sized>(embed_dim: usize, num_heads: usize, rng: &mut R) -> Result<Self> {
        if num_heads == 0 || embed_dim == 0 || embed_dim % num_heads != 0 {
            return Err(SurrogateError::Config(format!(
                "embed_dim ({embed_dim}) must be divisible by num_heads ({num_heads})"
            )));
        }

        Ok(Self {
            embed_dim,
            num_heads,
            head_dim: embed_dim / num_heads,
            w_q: Linear::without_bias(embed_dim, embed_dim, rng),
            w_k: Linear::without_bias(embed_dim, embed_dim, rng),
            w_v: Linear::without_bias(embed_dim, embed_dim, rng),
            w_o: Linear::without_bias(embed_dim, embed_dim, rng),
        })
    }

    /// Embedding width (D)
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    /// Number of heads (H)
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Per-head width (D / H)
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Self-attention: key and value are the query.
    pub fn self_attention(&self, x: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        self.forward(x, None, None, None)
    }

    /// Cross-attention against `memory` (key = value = memory).
    pub fn cross_attention(
        &self,
        query: ArrayView3<'_, f32>,
        memory: ArrayView3<'_, f32>,
    ) -> Result<Array3<f32>> {
        self.forward(query, Some(memory), None, None)
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `query` - `(B, Lq, D)`
    /// * `key` - `(B, Lk, D)`, defaults to `query`
    /// * `value` - `(B, Lk, D)`, defaults to `key`
    /// * `mask` - `(B, Lq, Lk)`; `false` entries are excluded from attention
    ///
    /// # Returns
    /// `(B, Lq, D)`, the same shape as `query`.
    pub fn forward(
        &self,
        query: ArrayView3<'_, f32>,
        key: Option<ArrayView3<'_, f32>>,
        value: Option<ArrayView3<'_, f32>>,
        mask: Option<ArrayView3<'_, bool>>,
    ) -> Result<Array3<f32>> {
        // Shrink all three views to one common lifetime before defaulting.
        let query = query.reborrow();
        let key = match key {
            Some(k) => k.reborrow(),
            None => query,
        };
        let value = match value {
            Some(v) => v.reborrow(),
            None => key,
        };

        let (batch, len_q, width) = query.dim();
        let (key_batch, len_k, key_width) = key.dim();
        if width != self.embed_dim || key_width != self.embed_dim {
            return Err(SurrogateError::dimension_mismatch(
                format!("width {}", self.embed_dim),
                format!("query width {width}, key width {key_width}"),
            ));
        }
        if key_batch != batch {
            return Err(SurrogateError::dimension_mismatch(
                format!("key batch {batch}"),
                format!("key batch {key_batch}"),
            ));
        }
        if value.dim() != key.dim() {
            return Err(SurrogateError::dimension_mismatch(
                format!("value shape {:?}", key.shape()),
                format!("value shape {:?}", value.shape()),
            ));
        }
        if let Some(m) = &mask {
            if m.dim() != (batch, len_q, len_k) {
                return Err(SurrogateError::dimension_mismatch(
                    format!("mask shape {:?}", [batch, len_q, len_k]),
                    format!("mask shape {:?}", m.shape()),
                ));
            }
        }

        let q = self.w_q.forward_3d(query)?;
        let k = self.w_k.forward_3d(key)?;
        let v = self.w_v.forward_3d(value)?;

        let scale = 1.0 / (self.head_dim as f32).sqrt();
        let mut context = Array3::<f32>::zeros((batch, len_q, self.embed_dim));

        for b in 0..batch {
            for h in 0..self.num_heads {
                let cols = h * self.head_dim..(h + 1) * self.head_dim;
                let q_h = q.slice(s![b, .., cols.clone()]);
                let k_h = k.slice(s![b, .., cols.clone()]);
                let v_h = v.slice(s![b, .., cols.clone()]);

                let mut scores = q_h.dot(&k_h.t()) * scale;
                if let Some(m) = &mask {
                    let m_b = m.index_axis(Axis(0), b);
                    scores.zip_mut_with(&m_b, |score, &keep| {
                        if !keep {
                            *score = MASK_SENTINEL;
                        }
                    });
                }
                softmax_last_axis_inplace(&mut scores);

                context
                    .slice_mut(s![b, .., cols])
                    .assign(&scores.dot(&v_h));
            }
        }

        self.w_o.forward_3d(context.view())
    }

    pub(crate) fn collect_shapes(&self, prefix: &str, out: &mut ParameterShapes) {
        self.w_q.collect_shapes(&format!("{prefix}.w_q"), out);
        self.w_k.collect_shapes(&format!("{prefix}.w_k"), out);
        self.w_v.collect_shapes(&format!("{prefix}.w_v"), out);
        self.w_o.collect_shapes(&format!("{prefix}.w_o"), out);
    }
}
