//! Error types for the RG-flow surrogate.
//!
//! Every failure is a pure function of the call's inputs and the model's
//! configuration, so nothing here is retried internally.

use thiserror::Error;

/// Error types for surrogate construction and inference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurrogateError {
    /// Configuration is invalid or internally inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// Explicitly supplied weights do not match the layer shape
    #[error("bad weights: {0}")]
    BadWeights(String),

    /// Input is neither a trajectory nor a well-formed graph bundle
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Tensor width or shape disagrees with what the layer expects
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected shape description
        expected: String,
        /// Actual shape description
        actual: String,
    },

    /// Sequence is longer than the positional encoding table
    #[error("sequence length {len} exceeds positional table max_len {max_len}")]
    SequenceTooLong {
        /// Requested sequence length
        len: usize,
        /// Rows in the positional table
        max_len: usize,
    },

    /// Adjacency references a node outside the graph
    #[error("edge {edge} references node {node}, but graph has {num_nodes} nodes")]
    InvalidAdjacency {
        /// Row index into the adjacency list
        edge: usize,
        /// Offending node index
        node: usize,
        /// Number of nodes in the graph
        num_nodes: usize,
    },
}

/// Result type alias for surrogate operations
pub type Result<T> = std::result::Result<T, SurrogateError>;

impl SurrogateError {
    /// Build a [`SurrogateError::DimensionMismatch`] from anything displayable.
    pub fn dimension_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Check if this error is a configuration issue (requires rebuilding the model)
    #[inline]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::BadWeights(_))
    }

    /// Check if this error was caused by the call's input rather than the model
    #[inline]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::DimensionMismatch { .. }
                | Self::SequenceTooLong { .. }
                | Self::InvalidAdjacency { .. }
        )
    }
}

impl From<serde_json::Error> for SurrogateError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
