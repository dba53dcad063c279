//! # RuVector RG Surrogate
//!
//! A graph-attention transformer that stands in for an iterative
//! renormalization-group flow simulation. One forward pass maps a partial
//! trajectory of coupling states to the predicted final couplings, a
//! fixed-point probability and an action value.
//!
//! Everything is built from `ndarray` primitives; there is no autodiff and no
//! training loop. Weights are drawn once from a caller-supplied RNG (or
//! loaded explicitly) and never change afterwards.
//!
//! ## Architecture
//!
//! ```text
//! Trajectory ─► TrajectoryGraph ─► HolographicEncoder ─► ResonanceDecoder ─► heads
//!               (N×4, E×3, E×2)     GAT × L, PE, W_out     self/cross attn     couplings
//!                                   (N, D)                 + FFN × L           fixed point
//!                                                                              action
//! ```
//!
//! ## Example
//!
//! ```rust
//! use ruvector_rg_surrogate::{CouplingState, SurrogateConfig, SurrogateModel, Trajectory};
//!
//! let model = SurrogateModel::seeded(SurrogateConfig::micro(), 42).unwrap();
//!
//! let mut trajectory = Trajectory::new(CouplingState::new(10.0, 10.0, 10.0, 1.0));
//! trajectory.push(CouplingState::new(9.5, 9.8, 9.9, 0.9), None);
//!
//! let prediction = model.forward(&trajectory).unwrap();
//! assert!((0.0..=1.0).contains(&prediction.is_fixed_point));
//!
//! let rollout = model.predict_trajectory(&trajectory, &[0.5, 0.25]).unwrap();
//! assert_eq!(rollout.len(), 4);
//! ```

#![warn(missing_docs)]

pub mod attention;
pub mod config;
pub mod decoder;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod graph;
pub mod linear;
pub mod model;
pub mod state;
pub mod tensor;

// Re-export commonly used types
pub use attention::{GraphAttention, MultiHeadAttention, PositionalEncoding};
pub use config::SurrogateConfig;
pub use decoder::{DecoderLayer, DecoderOutput, FeedForward, HeadPrediction, ResonanceDecoder};
pub use embedding::{EdgeEmbedding, FeatureEmbedding, NodeEmbedding};
pub use encoder::{EncoderMetadata, HolographicEncoder};
pub use error::{Result, SurrogateError};
pub use graph::{SurrogateInput, TrajectoryGraph};
pub use linear::{Linear, ParameterShapes};
pub use model::{FixedPointPrediction, Prediction, SurrogateModel};
pub use state::{CouplingState, Trajectory, FIXED_POINT_LEVEL};
