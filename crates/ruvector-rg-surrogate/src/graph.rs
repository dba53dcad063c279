//! Graph representation of a trajectory and the tagged model input.
//!
//! Every trajectory step becomes a node; consecutive steps are joined by a
//! directed edge `(i, i + 1)` whose features are the rate of change of the
//! couplings with respect to the scale.

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SurrogateError};
use crate::state::{CouplingState, Trajectory};

/// Scale deltas at or below this magnitude yield a zero rate.
pub const SCALE_DIFF_TOLERANCE: f64 = 1e-12;

/// Width of a coupling-state node feature vector.
pub const NODE_FEATURE_WIDTH: usize = 4;

/// Width of a rate-of-change edge feature vector.
pub const EDGE_FEATURE_WIDTH: usize = 3;

/// Node/edge feature tensors plus adjacency for one trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphRepr")]
pub struct TrajectoryGraph {
    node_features: Array2<f32>,
    edge_features: Array2<f32>,
    adjacency: Array2<usize>,
}

#[derive(Deserialize)]
struct GraphRepr {
    node_features: Array2<f32>,
    edge_features: Array2<f32>,
    adjacency: Array2<usize>,
}

impl TryFrom<GraphRepr> for TrajectoryGraph {
    type Error = SurrogateError;

    fn try_from(repr: GraphRepr) -> Result<Self> {
        Self::from_parts(repr.node_features, repr.edge_features, repr.adjacency)
    }
}

impl TrajectoryGraph {
    /// Build the graph for a trajectory.
    ///
    /// Precomputed rates are used when present; otherwise the rate is the
    /// finite difference of couplings over the scale delta.
    pub fn from_trajectory(trajectory: &Trajectory) -> Self {
        let states = trajectory.states();
        let num_nodes = states.len();
        let num_edges = num_nodes.saturating_sub(1);

        let node_features = Array2::from_shape_fn((num_nodes, NODE_FEATURE_WIDTH), |(i, j)| {
            states[i].to_features()[j] as f32
        });

        let mut edge_features = Array2::<f32>::zeros((num_edges, EDGE_FEATURE_WIDTH));
        let mut adjacency = Array2::<usize>::zeros((num_edges, 2));
        for (i, pair) in states.windows(2).enumerate() {
            let rates = trajectory
                .rates_at(i + 1)
                .unwrap_or_else(|| finite_difference_rates(&pair[0], &pair[1]));
            for (j, r) in rates.iter().enumerate() {
                edge_features[[i, j]] = *r as f32;
            }
            adjacency[[i, 0]] = i;
            adjacency[[i, 1]] = i + 1;
        }

        Self {
            node_features,
            edge_features,
            adjacency,
        }
    }

    /// Validate and wrap a raw tensor bundle.
    pub fn from_parts(
        node_features: Array2<f32>,
        edge_features: Array2<f32>,
        adjacency: Array2<usize>,
    ) -> Result<Self> {
        let num_nodes = node_features.nrows();
        if num_nodes == 0 {
            return Err(SurrogateError::InvalidInput(
                "graph needs at least one node".into(),
            ));
        }
        if adjacency.ncols() != 2 {
            return Err(SurrogateError::dimension_mismatch(
                "adjacency (E, 2)",
                format!("adjacency {:?}", adjacency.shape()),
            ));
        }
        if adjacency.nrows() != edge_features.nrows() {
            return Err(SurrogateError::dimension_mismatch(
                format!("{} adjacency rows", edge_features.nrows()),
                format!("{} adjacency rows", adjacency.nrows()),
            ));
        }
        validate_adjacency(adjacency.view(), num_nodes)?;

        Ok(Self {
            node_features,
            edge_features,
            adjacency,
        })
    }

    /// Node features `(N, node_width)`
    pub fn node_features(&self) -> &Array2<f32> {
        &self.node_features
    }

    /// Edge features `(E, edge_width)`
    pub fn edge_features(&self) -> &Array2<f32> {
        &self.edge_features
    }

    /// Adjacency `(E, 2)` as `(source, destination)` rows
    pub fn adjacency(&self) -> &Array2<usize> {
        &self.adjacency
    }

    /// Destination column of the adjacency list.
    pub fn destinations(&self) -> ArrayView1<'_, usize> {
        self.adjacency.column(1)
    }

    /// Number of nodes
    pub fn num_nodes(&self) -> usize {
        self.node_features.nrows()
    }

    /// Number of edges
    pub fn num_edges(&self) -> usize {
        self.edge_features.nrows()
    }
}

impl From<&Trajectory> for TrajectoryGraph {
    fn from(trajectory: &Trajectory) -> Self {
        Self::from_trajectory(trajectory)
    }
}

impl Trajectory {
    /// Graph representation of this trajectory.
    pub fn to_graph(&self) -> TrajectoryGraph {
        TrajectoryGraph::from_trajectory(self)
    }
}

fn finite_difference_rates(prev: &CouplingState, curr: &CouplingState) -> [f64; 3] {
    let dk = curr.scale - prev.scale;
    if dk.abs() <= SCALE_DIFF_TOLERANCE {
        return [0.0; 3];
    }
    let (c, p) = (curr.couplings(), prev.couplings());
    [(c[0] - p[0]) / dk, (c[1] - p[1]) / dk, (c[2] - p[2]) / dk]
}

/// Check every adjacency index against the node count.
pub(crate) fn validate_adjacency(adjacency: ArrayView2<'_, usize>, num_nodes: usize) -> Result<()> {
    for (edge, row) in adjacency.outer_iter().enumerate() {
        for &node in row.iter() {
            if node >= num_nodes {
                return Err(SurrogateError::InvalidAdjacency {
                    edge,
                    node,
                    num_nodes,
                });
            }
        }
    }
    Ok(())
}

/// Closed set of inputs accepted by the model.
///
/// Everything is reduced to a [`TrajectoryGraph`] once, at the API boundary,
/// by [`SurrogateInput::to_graph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurrogateInput {
    /// A single initial state, treated as a one-node trajectory
    State(CouplingState),
    /// A full trajectory
    Trajectory(Trajectory),
    /// A pre-built graph tensor bundle
    Graph(TrajectoryGraph),
}

impl SurrogateInput {
    /// Parse a tagged JSON bundle (`{"kind": "trajectory", ...}`).
    ///
    /// Unknown tags or malformed bundles are [`SurrogateError::InvalidInput`].
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reduce to graph tensors.
    pub fn to_graph(&self) -> TrajectoryGraph {
        match self {
            Self::State(state) => Trajectory::new(*state).to_graph(),
            Self::Trajectory(trajectory) => trajectory.to_graph(),
            Self::Graph(graph) => graph.clone(),
        }
    }

    /// The trajectory view of this input, when there is one.
    pub fn to_trajectory(&self) -> Option<Trajectory> {
        match self {
            Self::State(state) => Some(Trajectory::new(*state)),
            Self::Trajectory(trajectory) => Some(trajectory.clone()),
            Self::Graph(_) => None,
        }
    }

    /// Number of trajectory steps (graph nodes) in this input.
    pub fn len(&self) -> usize {
        match self {
            Self::State(_) => 1,
            Self::Trajectory(trajectory) => trajectory.len(),
            Self::Graph(graph) => graph.num_nodes(),
        }
    }

    /// Never true: every variant carries at least one node.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<CouplingState> for SurrogateInput {
    fn from(state: CouplingState) -> Self {
        Self::State(state)
    }
}

impl From<Trajectory> for SurrogateInput {
    fn from(trajectory: Trajectory) -> Self {
        Self::Trajectory(trajectory)
    }
}

impl From<&Trajectory> for SurrogateInput {
    fn from(trajectory: &Trajectory) -> Self {
        Self::Trajectory(trajectory.clone())
    }
}

impl From<TrajectoryGraph> for SurrogateInput {
    fn from(graph: TrajectoryGraph) -> Self {
        Self::Graph(graph)
    }
}
