//! Attention primitives.
//!
//! - [`MultiHeadAttention`]: dense scaled dot-product attention over batched
//!   sequences, used by the decoder
//! - [`GraphAttention`]: attention restricted to graph edges with a
//!   per-destination softmax, used by the encoder
//! - [`PositionalEncoding`]: additive sinusoidal position table

mod graph;
mod multi_head;
mod positional;

pub use graph::GraphAttention;
pub use multi_head::{MultiHeadAttention, MASK_SENTINEL};
pub use positional::{PositionalEncoding, POSITIONAL_BASE};
