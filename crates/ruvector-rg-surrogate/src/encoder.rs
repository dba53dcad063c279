//! Holographic encoder: trajectory graph → per-node hidden representation.
//!
//! ```text
//! nodes ─ NodeEmbedding ─┐
//!                        ├─ [GraphAttention → +residual → LayerNorm] × L ─ +PE ─ W_out ─ (N, D)
//! edges ─ EdgeEmbedding ─┘
//! ```
//!
//! The graph attention stack is bypassed for graphs without edges; such a
//! graph still passes through positional encoding and the output projection.

use ndarray::Array2;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::attention::{GraphAttention, PositionalEncoding};
use crate::config::SurrogateConfig;
use crate::embedding::{EdgeEmbedding, NodeEmbedding};
use crate::error::Result;
use crate::graph::{SurrogateInput, TrajectoryGraph};
use crate::linear::{Linear, ParameterShapes};
use crate::tensor::{layer_norm_inplace, LAYER_NORM_EPS};

/// Shape summary of the graph that produced an encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderMetadata {
    /// Number of nodes (trajectory steps)
    pub num_nodes: usize,
    /// Number of edges (transitions)
    pub num_edges: usize,
    /// Node feature tensor shape
    pub node_shape: [usize; 2],
    /// Edge feature tensor shape
    pub edge_shape: [usize; 2],
    /// Adjacency tensor shape
    pub adjacency_shape: [usize; 2],
}

impl EncoderMetadata {
    fn of(graph: &TrajectoryGraph) -> Self {
        let shape2 = |s: &[usize]| [s[0], s[1]];
        Self {
            num_nodes: graph.num_nodes(),
            num_edges: graph.num_edges(),
            node_shape: shape2(graph.node_features().shape()),
            edge_shape: shape2(graph.edge_features().shape()),
            adjacency_shape: shape2(graph.adjacency().shape()),
        }
    }
}

/// Graph-attention encoder over trajectory graphs.
#[derive(Debug, Clone)]
pub struct HolographicEncoder {
    hidden_width: usize,
    node_embedding: NodeEmbedding,
    edge_embedding: EdgeEmbedding,
    layers: Vec<GraphAttention>,
    positional: PositionalEncoding,
    output_projection: Linear,
}

impl HolographicEncoder {
    /// Create an encoder; the configuration is validated before any weights are drawn.
    pub fn new<R: Rng + ?Sized>(config: &SurrogateConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let hidden = config.hidden_width;
        let edge_width = config.edge_embed_width();

        let node_embedding = NodeEmbedding::new(config.node_feature_width, hidden, rng);
        let edge_embedding = EdgeEmbedding::new(config.edge_feature_width, edge_width, rng);
        let layers = (0..config.encoder_layers)
            .map(|_| GraphAttention::new(hidden, edge_width, config.encoder_heads, rng))
            .collect::<Result<Vec<_>>>()?;
        let positional = PositionalEncoding::new(hidden, config.max_positions)?;
        let output_projection = Linear::without_bias(hidden, hidden, rng);

        Ok(Self {
            hidden_width: hidden,
            node_embedding,
            edge_embedding,
            layers,
            positional,
            output_projection,
        })
    }

    /// Output width (D)
    pub fn hidden_width(&self) -> usize {
        self.hidden_width
    }

    /// Number of graph attention layers
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Heads per graph attention layer; `None` when there are no layers.
    pub fn num_heads(&self) -> Option<usize> {
        self.layers.first().map(GraphAttention::num_heads)
    }

    /// Raw node feature width accepted by the node embedding
    pub fn node_feature_width(&self) -> usize {
        self.node_embedding.input_dim()
    }

    /// Raw edge feature width accepted by the edge embedding
    pub fn edge_feature_width(&self) -> usize {
        self.edge_embedding.input_dim()
    }

    /// Longest graph the positional table covers
    pub fn max_positions(&self) -> usize {
        self.positional.max_len()
    }

    /// Encode any supported input.
    pub fn encode(&self, input: &SurrogateInput) -> Result<(Array2<f32>, EncoderMetadata)> {
        match input {
            SurrogateInput::Graph(graph) => self.encode_graph(graph),
            other => self.encode_graph(&other.to_graph()),
        }
    }

    /// Encode a graph into `(num_nodes, hidden_width)`.
    pub fn encode_graph(&self, graph: &TrajectoryGraph) -> Result<(Array2<f32>, EncoderMetadata)> {
        let metadata = EncoderMetadata::of(graph);

        let mut h = self.node_embedding.forward(graph.node_features().view())?;

        // No edges: the edge tensor is never read, whatever its width.
        let bypassed = graph.num_edges() == 0;
        if !bypassed {
            let e = self.edge_embedding.forward(graph.edge_features().view())?;
            for layer in &self.layers {
                let update = layer.forward(h.view(), e.view(), graph.adjacency().view())?;
                h += &update;
                layer_norm_inplace(&mut h, LAYER_NORM_EPS);
            }
        }

        let h = self.positional.apply_2d(h.view())?;
        let encoded = self.output_projection.forward(h.view())?;

        tracing::debug!(
            num_nodes = metadata.num_nodes,
            num_edges = metadata.num_edges,
            bypassed,
            "encoded trajectory graph"
        );

        Ok((encoded, metadata))
    }

    /// Encode many inputs in parallel; results keep input order.
    pub fn encode_batch(
        &self,
        inputs: &[SurrogateInput],
    ) -> Result<Vec<(Array2<f32>, EncoderMetadata)>> {
        inputs.par_iter().map(|input| self.encode(input)).collect()
    }

    pub(crate) fn collect_shapes(&self, prefix: &str, out: &mut ParameterShapes) {
        self.node_embedding
            .collect_shapes(&format!("{prefix}.node_embedding"), out);
        self.edge_embedding
            .collect_shapes(&format!("{prefix}.edge_embedding"), out);
        for (i, layer) in self.layers.iter().enumerate() {
            layer.collect_shapes(&format!("{prefix}.layers.{i}"), out);
        }
        self.output_projection
            .collect_shapes(&format!("{prefix}.output_projection"), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SurrogateError;
    use crate::state::{CouplingState, Trajectory};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn trajectory(len: usize) -> Trajectory {
        let mut traj = Trajectory::default();
        for i in 1..len {
            let v = 10.0 - i as f64;
            traj.push(CouplingState::new(v, v * 0.5, v * 0.25, 1.0 / (i + 1) as f64), None);
        }
        traj
    }

    fn encoder(config: &SurrogateConfig) -> HolographicEncoder {
        HolographicEncoder::new(config, &mut StdRng::seed_from_u64(42)).unwrap()
    }

    #[test]
    fn test_six_step_trajectory() {
        let config = SurrogateConfig {
            hidden_width: 128,
            encoder_layers: 3,
            encoder_heads: 4,
            ..SurrogateConfig::default()
        };
        let enc = encoder(&config);
        let (encoded, meta) = enc.encode(&trajectory(6).into()).unwrap();

        assert_eq!(encoded.dim(), (6, 128));
        assert_eq!(meta.num_nodes, 6);
        assert_eq!(meta.num_edges, 5);
        assert_eq!(meta.node_shape, [6, 4]);
        assert_eq!(meta.edge_shape, [5, 3]);
        assert_eq!(meta.adjacency_shape, [5, 2]);
        assert!(encoded.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_single_state_bypasses_graph_layers() {
        let enc = encoder(&SurrogateConfig::default());
        let (encoded, meta) = enc.encode(&CouplingState::default().into()).unwrap();

        assert_eq!(encoded.dim(), (1, 128));
        assert_eq!(meta.num_edges, 0);
        assert_eq!(meta.edge_shape, [0, 3]);
        assert_eq!(meta.adjacency_shape, [0, 2]);
    }

    #[test]
    fn test_edgeless_graph_ignores_edge_width() {
        let enc = encoder(&SurrogateConfig::micro());
        let graph = TrajectoryGraph::from_parts(
            Array2::from_elem((1, 4), 0.5),
            Array2::zeros((0, 0)),
            Array2::zeros((0, 2)),
        )
        .unwrap();

        let (encoded, meta) = enc.encode_graph(&graph).unwrap();
        assert_eq!(encoded.dim(), (1, 32));
        assert_eq!(meta.edge_shape, [0, 0]);

        // same encoding as a well-formed single-node graph
        let reference = TrajectoryGraph::from_parts(
            Array2::from_elem((1, 4), 0.5),
            Array2::zeros((0, 3)),
            Array2::zeros((0, 2)),
        )
        .unwrap();
        assert_eq!(encoded, enc.encode_graph(&reference).unwrap().0);
    }

    #[test]
    fn test_trajectory_and_graph_encode_identically() {
        let enc = encoder(&SurrogateConfig::micro());
        let traj = trajectory(5);
        let (a, meta_a) = enc.encode(&SurrogateInput::from(&traj)).unwrap();
        let (b, meta_b) = enc.encode(&SurrogateInput::from(traj.to_graph())).unwrap();
        assert_eq!(a, b);
        assert_eq!(meta_a, meta_b);
    }

    #[test]
    fn test_sequence_longer_than_table() {
        let config = SurrogateConfig {
            max_positions: 4,
            ..SurrogateConfig::micro()
        };
        let enc = encoder(&config);
        let err = enc.encode(&trajectory(5).into()).unwrap_err();
        assert_eq!(err, SurrogateError::SequenceTooLong { len: 5, max_len: 4 });
    }

    #[test]
    fn test_wrong_node_width() {
        let enc = encoder(&SurrogateConfig::micro());
        let graph =
            TrajectoryGraph::from_parts(Array2::zeros((2, 5)), Array2::zeros((1, 3)), ndarray::array![[0, 1]])
                .unwrap();
        let err = enc.encode_graph(&graph).unwrap_err();
        assert!(matches!(err, SurrogateError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SurrogateConfig {
            hidden_width: 30,
            ..SurrogateConfig::micro()
        };
        let err = HolographicEncoder::new(&config, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_encode_batch_preserves_order() {
        let enc = encoder(&SurrogateConfig::micro());
        let inputs: Vec<SurrogateInput> = (1..=4).map(|n| trajectory(n).into()).collect();
        let batch = enc.encode_batch(&inputs).unwrap();
        assert_eq!(batch.len(), 4);
        for (input, (encoded, meta)) in inputs.iter().zip(batch.iter()) {
            assert_eq!(meta.num_nodes, input.len());
            assert_eq!(*encoded, enc.encode(input).unwrap().0);
        }
    }
}
