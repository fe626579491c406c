//! Error types for equivar.

use thiserror::Error;

/// Equivar error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Declared feature width disagrees with the tensor handed in.
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// Topology and feature tensors disagree on how many nodes or edges exist.
    #[error("{what} count mismatch: graph has {expected}, features have {got}")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Malformed topology.
    #[error("{what} index {index} out of range (bound {bound})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        bound: usize,
    },

    /// Tensor rank does not match the graph tensor variant.
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// Batched tensors with different batch sizes were mixed.
    #[error("batch size mismatch: expected {expected}, got {got}")]
    BatchMismatch { expected: usize, got: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
