//! Resonance decoder: cross-attends a query against the encoder output and
//! reads the final query position through three prediction heads.
//!
//! Each [`DecoderLayer`] is post-norm:
//!
//! ```text
//! x = LN(x + SelfAttn(x))
//! x = LN(x + CrossAttn(x, memory))
//! x = LN(x + FFN(x))
//! ```

use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::attention::MultiHeadAttention;
use crate::config::SurrogateConfig;
use crate::error::{Result, SurrogateError};
use crate::linear::{Linear, ParameterShapes};
use crate::tensor::{layer_norm_inplace, relu_inplace, stable_sigmoid, LAYER_NORM_EPS};

/// Width of the coupling head (lambda, gamma, mu).
pub const COUPLING_WIDTH: usize = 3;

/// Position-wise feed-forward block: `Linear → ReLU → Linear`.
#[derive(Debug, Clone)]
pub struct FeedForward {
    expand: Linear,
    contract: Linear,
}

impl FeedForward {
    /// Create a block `hidden → ff_width → hidden`.
    pub fn new<R: Rng + ?Sized>(hidden: usize, ff_width: usize, rng: &mut R) -> Self {
        Self {
            expand: Linear::new(hidden, ff_width, rng),
            contract: Linear::new(ff_width, hidden, rng),
        }
    }

    /// Intermediate width
    pub fn width(&self) -> usize {
        self.expand.output_dim()
    }

    /// Apply to `(B, L, hidden)`.
    pub fn forward(&self, x: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let mut h = self.expand.forward_3d(x)?;
        relu_inplace(&mut h);
        self.contract.forward_3d(h.view())
    }

    fn collect_shapes(&self, prefix: &str, out: &mut ParameterShapes) {
        self.expand.collect_shapes(&format!("{prefix}.expand"), out);
        self.contract.collect_shapes(&format!("{prefix}.contract"), out);
    }
}

/// Self-attention, cross-attention and feed-forward, each with residual + norm.
#[derive(Debug, Clone)]
pub struct DecoderLayer {
    self_attention: MultiHeadAttention,
    cross_attention: MultiHeadAttention,
    feed_forward: FeedForward,
}

impl DecoderLayer {
    /// Create a decoder layer.
    pub fn new<R: Rng + ?Sized>(
        hidden: usize,
        num_heads: usize,
        ff_width: usize,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(Self {
            self_attention: MultiHeadAttention::new(hidden, num_heads, rng)?,
            cross_attention: MultiHeadAttention::new(hidden, num_heads, rng)?,
            feed_forward: FeedForward::new(hidden, ff_width, rng),
        })
    }

    /// Attention heads in both the self and cross attention
    pub fn num_heads(&self) -> usize {
        self.self_attention.num_heads()
    }

    /// Feed-forward intermediate width
    pub fn feed_forward_width(&self) -> usize {
        self.feed_forward.width()
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `x` - queries `(B, Lq, D)`
    /// * `memory` - encoder output `(B, N, D)`
    /// * `self_mask` - `(B, Lq, Lq)`
    /// * `cross_mask` - `(B, Lq, N)`
    pub fn forward(
        &self,
        x: ArrayView3<'_, f32>,
        memory: ArrayView3<'_, f32>,
        self_mask: Option<ArrayView3<'_, bool>>,
        cross_mask: Option<ArrayView3<'_, bool>>,
    ) -> Result<Array3<f32>> {
        let attended = self.self_attention.forward(x, None, None, self_mask)?;
        let mut h = &x + &attended;
        layer_norm_inplace(&mut h, LAYER_NORM_EPS);

        let attended = self
            .cross_attention
            .forward(h.view(), Some(memory), None, cross_mask)?;
        h += &attended;
        layer_norm_inplace(&mut h, LAYER_NORM_EPS);

        let transformed = self.feed_forward.forward(h.view())?;
        h += &transformed;
        layer_norm_inplace(&mut h, LAYER_NORM_EPS);

        Ok(h)
    }

    fn collect_shapes(&self, prefix: &str, out: &mut ParameterShapes) {
        self.self_attention
            .collect_shapes(&format!("{prefix}.self_attention"), out);
        self.cross_attention
            .collect_shapes(&format!("{prefix}.cross_attention"), out);
        self.feed_forward
            .collect_shapes(&format!("{prefix}.feed_forward"), out);
    }
}

/// Head outputs for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadPrediction {
    /// Predicted couplings `[lambda, gamma, mu]` (unconstrained)
    pub couplings: [f32; 3],
    /// Fixed-point probability in `[0, 1]`
    pub is_fixed_point: f32,
    /// Predicted action value
    pub action: f32,
}

/// Batched head outputs; row `b` belongs to batch item `b`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderOutput {
    /// `(B, 3)`
    pub couplings: Array2<f32>,
    /// `(B)`, every entry in `[0, 1]`
    pub is_fixed_point: Array1<f32>,
    /// `(B)`
    pub action: Array1<f32>,
}

impl DecoderOutput {
    /// Number of batch items.
    pub fn batch_size(&self) -> usize {
        self.action.len()
    }

    /// Prediction for batch item `index`.
    pub fn get(&self, index: usize) -> Option<HeadPrediction> {
        if index >= self.batch_size() {
            return None;
        }
        let row = self.couplings.row(index);
        Some(HeadPrediction {
            couplings: [row[0], row[1], row[2]],
            is_fixed_point: self.is_fixed_point[index],
            action: self.action[index],
        })
    }

    /// The single prediction of a batch of one; `None` for any other batch size.
    pub fn squeeze(&self) -> Option<HeadPrediction> {
        if self.batch_size() == 1 {
            self.get(0)
        } else {
            None
        }
    }

    /// All predictions in batch order.
    pub fn to_predictions(&self) -> Vec<HeadPrediction> {
        (0..self.batch_size()).filter_map(|i| self.get(i)).collect()
    }
}

/// Decoder stack plus coupling, fixed-point and action heads.
#[derive(Debug, Clone)]
pub struct ResonanceDecoder {
    hidden_width: usize,
    layers: Vec<DecoderLayer>,
    coupling_head: Linear,
    fixed_point_head: Linear,
    action_head: Linear,
}

impl ResonanceDecoder {
    /// Create a decoder from a validated configuration.
    pub fn new<R: Rng + ?Sized>(config: &SurrogateConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_width;

        let layers = (0..config.decoder_layers)
            .map(|_| {
                DecoderLayer::new(hidden, config.decoder_heads, config.feed_forward_width, rng)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            hidden_width: hidden,
            layers,
            coupling_head: Linear::new(hidden, COUPLING_WIDTH, rng),
            fixed_point_head: Linear::new(hidden, 1, rng),
            action_head: Linear::new(hidden, 1, rng),
        })
    }

    /// Replace the prediction heads with explicit weights.
    ///
    /// Heads must map `hidden_width` to 3, 1 and 1 outputs respectively.
    pub fn with_heads(mut self, coupling: Linear, fixed_point: Linear, action: Linear) -> Result<Self> {
        for (name, head, width) in [
            ("coupling", &coupling, COUPLING_WIDTH),
            ("fixed_point", &fixed_point, 1),
            ("action", &action, 1),
        ] {
            if head.input_dim() != self.hidden_width || head.output_dim() != width {
                return Err(SurrogateError::BadWeights(format!(
                    "{name} head must be ({}, {width}), got ({}, {})",
                    self.hidden_width,
                    head.input_dim(),
                    head.output_dim()
                )));
            }
        }
        self.coupling_head = coupling;
        self.fixed_point_head = fixed_point;
        self.action_head = action;
        Ok(self)
    }

    /// Hidden width (D)
    pub fn hidden_width(&self) -> usize {
        self.hidden_width
    }

    /// Number of decoder layers
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Attention heads per layer; `None` when there are no layers.
    pub fn num_heads(&self) -> Option<usize> {
        self.layers.first().map(DecoderLayer::num_heads)
    }

    /// Feed-forward width per layer; `None` when there are no layers.
    pub fn feed_forward_width(&self) -> Option<usize> {
        self.layers.first().map(DecoderLayer::feed_forward_width)
    }

    /// Decode a batch of encodings `(B, N, D)`.
    ///
    /// Without explicit `queries` the last encoded node of each item is the
    /// single query.
    pub fn forward(
        &self,
        encoded: ArrayView3<'_, f32>,
        queries: Option<ArrayView3<'_, f32>>,
    ) -> Result<DecoderOutput> {
        self.forward_masked(encoded, queries, None, None)
    }

    /// [`forward`](Self::forward) with optional self-attention `(B, Lq, Lq)`
    /// and cross-attention `(B, Lq, N)` masks.
    pub fn forward_masked(
        &self,
        encoded: ArrayView3<'_, f32>,
        queries: Option<ArrayView3<'_, f32>>,
        self_mask: Option<ArrayView3<'_, bool>>,
        cross_mask: Option<ArrayView3<'_, bool>>,
    ) -> Result<DecoderOutput> {
        let (_, num_nodes, _) = encoded.dim();
        if num_nodes == 0 {
            return Err(SurrogateError::InvalidInput(
                "cannot decode an empty encoding".into(),
            ));
        }

        let mut x = match queries {
            Some(q) => q.to_owned(),
            None => encoded.slice(s![.., num_nodes - 1..num_nodes, ..]).to_owned(),
        };
        if x.len_of(Axis(1)) == 0 {
            return Err(SurrogateError::InvalidInput("query sequence is empty".into()));
        }

        for layer in &self.layers {
            x = layer.forward(x.view(), encoded, self_mask, cross_mask)?;
        }

        let last = x.len_of(Axis(1)) - 1;
        self.heads(x.index_axis(Axis(1), last))
    }

    /// Decode one `(N, D)` encoding.
    pub fn decode(&self, encoded: ArrayView2<'_, f32>) -> Result<HeadPrediction> {
        self.forward(encoded.insert_axis(Axis(0)), None)?
            .squeeze()
            .ok_or_else(|| SurrogateError::InvalidInput("decoder produced no prediction".into()))
    }

    fn heads(&self, last: ArrayView2<'_, f32>) -> Result<DecoderOutput> {
        let couplings = self.coupling_head.forward(last)?;
        let is_fixed_point = self
            .fixed_point_head
            .forward(last)?
            .column(0)
            .mapv(stable_sigmoid);
        let action = self.action_head.forward(last)?.column(0).to_owned();

        Ok(DecoderOutput {
            couplings,
            is_fixed_point,
            action,
        })
    }

    pub(crate) fn collect_shapes(&self, prefix: &str, out: &mut ParameterShapes) {
        for (i, layer) in self.layers.iter().enumerate() {
            layer.collect_shapes(&format!("{prefix}.layers.{i}"), out);
        }
        self.coupling_head
            .collect_shapes(&format!("{prefix}.coupling_head"), out);
        self.fixed_point_head
            .collect_shapes(&format!("{prefix}.fixed_point_head"), out);
        self.action_head
            .collect_shapes(&format!("{prefix}.action_head"), out);
    }
}
