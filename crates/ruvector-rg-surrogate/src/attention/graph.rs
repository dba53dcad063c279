//! Edge-restricted graph attention with per-destination normalization.
//!
//! Unlike dense attention, each node only attends over its incoming edges,
//! and the softmax runs independently within each destination's group of
//! edges (a segment softmax). A node with no incoming edges receives
//! nothing from aggregation.

use ndarray::{s, Array2, ArrayView2};
use rand::Rng;

use crate::error::{Result, SurrogateError};
use crate::graph::validate_adjacency;
use crate::linear::{init_matrix, Linear, ParameterShapes};
use crate::tensor::{leaky_relu, segment_softmax};

/// Graph attention layer for trajectory graphs.
#[derive(Debug, Clone)]
pub struct GraphAttention {
    node_dim: usize,
    edge_dim: usize,
    num_heads: usize,
    w_node: Linear,
    w_edge: Linear,
    /// One attention vector per head over `[src, dst, edge]`, shape `(H, 3 * node_dim)`
    attn: Array2<f32>,
}

impl GraphAttention {
    /// Create a graph attention layer.
    ///
    /// # Errors
    /// `SurrogateError::Config` if any width or the head count is zero.
    pub fn new<R: Rng + ?Sized>(
        node_dim: usize,
        edge_dim: usize,
        num_heads: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if node_dim == 0 || edge_dim == 0 || num_heads == 0 {
            return Err(SurrogateError::Config(format!(
                "graph attention needs positive widths and heads \
                 (node_dim={node_dim}, edge_dim={edge_dim}, heads={num_heads})"
            )));
        }

        Ok(Self {
            node_dim,
            edge_dim,
            num_heads,
            w_node: Linear::without_bias(node_dim, node_dim, rng),
            w_edge: Linear::without_bias(edge_dim, node_dim, rng),
            attn: init_matrix(num_heads, 3 * node_dim, node_dim, rng),
        })
    }

    /// Build from explicit weights.
    ///
    /// `w_node` is `(node_dim, node_dim)`, `w_edge` is `(edge_dim, node_dim)`
    /// and `attn` is `(heads, 3 * node_dim)`.
    pub fn from_weights(w_node: Array2<f32>, w_edge: Array2<f32>, attn: Array2<f32>) -> Result<Self> {
        let node_dim = w_node.nrows();
        if w_node.ncols() != node_dim || w_edge.ncols() != node_dim {
            return Err(SurrogateError::BadWeights(format!(
                "projection shapes {:?} / {:?} do not share node_dim {node_dim}",
                w_node.shape(),
                w_edge.shape()
            )));
        }
        if attn.ncols() != 3 * node_dim || attn.nrows() == 0 {
            return Err(SurrogateError::BadWeights(format!(
                "attention vectors must be (heads, {}), got {:?}",
                3 * node_dim,
                attn.shape()
            )));
        }
        Ok(Self {
            node_dim,
            edge_dim: w_edge.nrows(),
            num_heads: attn.nrows(),
            w_node: Linear::from_weights(w_node, None)?,
            w_edge: Linear::from_weights(w_edge, None)?,
            attn,
        })
    }

    /// Node feature width
    pub fn node_dim(&self) -> usize {
        self.node_dim
    }

    /// Edge feature width
    pub fn edge_dim(&self) -> usize {
        self.edge_dim
    }

    /// Number of heads
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `nodes` - `(Nn, node_dim)`
    /// * `edges` - `(Ne, edge_dim)`
    /// * `adjacency` - `(Ne, 2)` rows of `(source, destination)`
    ///
    /// # Returns
    /// Aggregated node features `(Nn, node_dim)`. With no edges every row is zero.
    pub fn forward(
        &self,
        nodes: ArrayView2<'_, f32>,
        edges: ArrayView2<'_, f32>,
        adjacency: ArrayView2<'_, usize>,
    ) -> Result<Array2<f32>> {
        let num_nodes = nodes.nrows();
        let num_edges = edges.nrows();
        if adjacency.dim() != (num_edges, 2) {
            return Err(SurrogateError::dimension_mismatch(
                format!("adjacency ({num_edges}, 2)"),
                format!("adjacency {:?}", adjacency.shape()),
            ));
        }
        validate_adjacency(adjacency, num_nodes)?;

        let h = self.w_node.forward(nodes)?;
        let e = self.w_edge.forward(edges)?;

        let mut out = Array2::<f32>::zeros((num_nodes, self.node_dim));
        if num_edges == 0 {
            return Ok(out);
        }

        // a_h · [h_src, h_dst, e] split into three partial scores
        let d = self.node_dim;
        let src_scores = h.dot(&self.attn.slice(s![.., 0..d]).t());
        let dst_scores = h.dot(&self.attn.slice(s![.., d..2 * d]).t());
        let edge_scores = e.dot(&self.attn.slice(s![.., 2 * d..3 * d]).t());

        let mut logits = Array2::<f32>::zeros((num_edges, self.num_heads));
        for (i, pair) in adjacency.outer_iter().enumerate() {
            let (src, dst) = (pair[0], pair[1]);
            for head in 0..self.num_heads {
                logits[[i, head]] = leaky_relu(
                    src_scores[[src, head]] + dst_scores[[dst, head]] + edge_scores[[i, head]],
                );
            }
        }

        let weights = segment_softmax(logits.view(), adjacency.column(1), num_nodes)?;

        for (i, pair) in adjacency.outer_iter().enumerate() {
            let (src, dst) = (pair[0], pair[1]);
            let w: f32 = weights.row(i).sum();
            out.row_mut(dst).scaled_add(w, &h.row(src));
        }
        out /= self.num_heads as f32;

        Ok(out)
    }

    pub(crate) fn collect_shapes(&self, prefix: &str, out: &mut ParameterShapes) {
        self.w_node.collect_shapes(&format!("{prefix}.w_node"), out);
        self.w_edge.collect_shapes(&format!("{prefix}.w_edge"), out);
        out.insert(format!("{prefix}.attn"), self.attn.shape().to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Identity node projection and zero attention vectors: every incoming
    /// edge of a node gets the same weight.
    fn uniform_layer(node_dim: usize, edge_dim: usize, heads: usize) -> GraphAttention {
        GraphAttention::from_weights(
            Array2::eye(node_dim),
            Array2::zeros((edge_dim, node_dim)),
            Array2::zeros((heads, 3 * node_dim)),
        )
        .unwrap()
    }

    /// Edge-by-edge, head-by-head evaluation of the layer with plain loops.
    fn reference_forward(
        w_node: &Array2<f32>,
        w_edge: &Array2<f32>,
        attn: &Array2<f32>,
        nodes: &Array2<f32>,
        edges: &Array2<f32>,
        adjacency: &Array2<usize>,
    ) -> Array2<f32> {
        let d = w_node.ncols();
        let heads = attn.nrows();
        let project = |x: &Array2<f32>, w: &Array2<f32>| {
            Array2::from_shape_fn((x.nrows(), w.ncols()), |(r, c)| {
                (0..x.ncols()).map(|k| x[[r, k]] * w[[k, c]]).sum::<f32>()
            })
        };
        let h = project(nodes, w_node);
        let e = project(edges, w_edge);

        let num_edges = adjacency.nrows();
        let mut logits = Array2::<f32>::zeros((num_edges, heads));
        for i in 0..num_edges {
            let (src, dst) = (adjacency[[i, 0]], adjacency[[i, 1]]);
            for k in 0..heads {
                let mut z = 0.0;
                for j in 0..d {
                    z += attn[[k, j]] * h[[src, j]]
                        + attn[[k, d + j]] * h[[dst, j]]
                        + attn[[k, 2 * d + j]] * e[[i, j]];
                }
                logits[[i, k]] = if z > 0.0 { z } else { 0.01 * z };
            }
        }

        let mut out = Array2::<f32>::zeros((nodes.nrows(), d));
        for k in 0..heads {
            for i in 0..num_edges {
                let (src, dst) = (adjacency[[i, 0]], adjacency[[i, 1]]);
                let group: Vec<usize> = (0..num_edges).filter(|&m| adjacency[[m, 1]] == dst).collect();
                let max = group.iter().map(|&m| logits[[m, k]]).fold(f32::NEG_INFINITY, f32::max);
                let total: f32 = group.iter().map(|&m| (logits[[m, k]] - max).exp()).sum();
                let w = (logits[[i, k]] - max).exp() / total;
                for j in 0..d {
                    out[[dst, j]] += w * h[[src, j]];
                }
            }
        }
        out / heads as f32
    }

    #[test]
    fn test_forward_matches_loop_evaluation() {
        let mut rng = StdRng::seed_from_u64(21);
        let (node_dim, edge_dim, heads) = (4, 3, 3);
        let w_node = init_matrix(node_dim, node_dim, node_dim, &mut rng) * 3.0;
        let w_edge = init_matrix(edge_dim, node_dim, edge_dim, &mut rng) * 3.0;
        let attn = init_matrix(heads, 3 * node_dim, node_dim, &mut rng) * 3.0;
        let gat = GraphAttention::from_weights(w_node.clone(), w_edge.clone(), attn.clone()).unwrap();

        let nodes = Array2::from_shape_fn((5, node_dim), |(i, j)| ((i * 5 + j) as f32 * 0.7).sin());
        let edges = Array2::from_shape_fn((6, edge_dim), |(i, j)| ((i * 3 + j) as f32 * 0.4).cos());
        // node 1 has three incoming edges, node 4 has a self-loop, nodes 0 and 3 have none
        let adjacency = array![[0_usize, 1], [1, 2], [2, 1], [3, 1], [4, 4], [2, 4]];

        let out = gat.forward(nodes.view(), edges.view(), adjacency.view()).unwrap();
        let expected = reference_forward(&w_node, &w_edge, &attn, &nodes, &edges, &adjacency);

        let max_diff = (&out - &expected)
            .iter()
            .fold(0.0_f32, |m, v| m.max(v.abs()));
        assert!(max_diff < 1e-5, "max diff {max_diff}");
        assert!(out.row(0).iter().all(|&v| v == 0.0));
        assert!(out.row(3).iter().all(|&v| v == 0.0));
        assert!(out.row(1).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_source_and_destination_scores_are_distinct() {
        // attention only on the source block: the heavier source dominates
        let mut attn = Array2::<f32>::zeros((1, 6));
        attn[[0, 0]] = 10.0;
        let gat = GraphAttention::from_weights(Array2::eye(2), Array2::zeros((1, 2)), attn).unwrap();
        let nodes = array![[1.0_f32, 0.0], [0.0, 1.0], [1.0, 0.0]];
        let edges = Array2::<f32>::zeros((2, 1));
        let adjacency = array![[0_usize, 2], [1, 2]];

        let out = gat.forward(nodes.view(), edges.view(), adjacency.view()).unwrap();
        let w0 = 1.0 / (1.0 + (-10.0_f32).exp());
        assert_abs_diff_eq!(out[[2, 0]], w0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[2, 1]], 1.0 - w0, epsilon = 1e-6);

        // the same weight on the destination block is shared by both edges
        let mut attn = Array2::<f32>::zeros((1, 6));
        attn[[0, 2]] = 10.0;
        let gat = GraphAttention::from_weights(Array2::eye(2), Array2::zeros((1, 2)), attn).unwrap();
        let out = gat.forward(nodes.view(), edges.view(), adjacency.view()).unwrap();
        assert_abs_diff_eq!(out[[2, 0]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[2, 1]], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_forward_shape() {
        let mut rng = StdRng::seed_from_u64(11);
        let gat = GraphAttention::new(64, 32, 4, &mut rng).unwrap();
        let nodes = Array2::from_shape_fn((10, 64), |(i, j)| ((i * 64 + j) as f32 * 0.01).cos());
        let edges = Array2::from_shape_fn((15, 32), |(i, j)| ((i + j) as f32 * 0.1).sin());
        let adjacency = Array2::from_shape_fn((15, 2), |(i, c)| (i * 3 + c * 7) % 10);

        let out = gat.forward(nodes.view(), edges.view(), adjacency.view()).unwrap();
        assert_eq!(out.dim(), (10, 64));
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_chain_aggregates_predecessor() {
        let gat = uniform_layer(2, 3, 2);
        let nodes = array![[1.0_f32, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let edges = Array2::<f32>::ones((2, 3));
        let adjacency = array![[0_usize, 1], [1, 2]];

        let out = gat.forward(nodes.view(), edges.view(), adjacency.view()).unwrap();
        // node 0 has no incoming edges
        assert_eq!(out.row(0).to_vec(), vec![0.0, 0.0]);
        assert_abs_diff_eq!(out[[1, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[2, 1]], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_duplicate_edges_contribute_additively() {
        let gat = uniform_layer(2, 1, 1);
        let nodes = array![[3.0_f32, 0.0], [0.0, 0.0], [0.0, 6.0]];
        let edges = Array2::<f32>::zeros((3, 1));
        let adjacency = array![[0_usize, 1], [0, 1], [2, 1]];

        let out = gat.forward(nodes.view(), edges.view(), adjacency.view()).unwrap();
        // three equally weighted members in node 1's group, two from node 0
        assert_abs_diff_eq!(out[[1, 0]], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[1, 1]], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_edges_gives_zeros() {
        let mut rng = StdRng::seed_from_u64(12);
        let gat = GraphAttention::new(8, 4, 2, &mut rng).unwrap();
        let nodes = Array2::<f32>::ones((1, 8));
        let out = gat
            .forward(
                nodes.view(),
                Array2::<f32>::zeros((0, 4)).view(),
                Array2::<usize>::zeros((0, 2)).view(),
            )
            .unwrap();
        assert_eq!(out, Array2::<f32>::zeros((1, 8)));
    }

    #[test]
    fn test_out_of_range_adjacency() {
        let mut rng = StdRng::seed_from_u64(13);
        let gat = GraphAttention::new(8, 4, 2, &mut rng).unwrap();
        let nodes = Array2::<f32>::ones((2, 8));
        let edges = Array2::<f32>::ones((1, 4));
        let err = gat
            .forward(nodes.view(), edges.view(), array![[0_usize, 5]].view())
            .unwrap_err();
        assert!(matches!(err, SurrogateError::InvalidAdjacency { node: 5, .. }));
    }

    #[test]
    fn test_bad_weights() {
        assert!(GraphAttention::from_weights(
            Array2::eye(4),
            Array2::zeros((3, 4)),
            Array2::zeros((2, 8)),
        )
        .is_err());
    }
}
