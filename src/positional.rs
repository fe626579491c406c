//! Equivariant positional update.
//!
//! Moves every node along the displacement vectors of its incident edges:
//!
//! ```text
//! x_v' = x_v + AGG_{k: nbrs[k] = v} (x_{xs[k]} - x_{nbrs[k]}) * phi_x(m_k)
//! ```
//!
//! `phi_x` maps each edge message to a single scalar, so the correction only
//! rotates with the displacements and ignores translations.

use std::fmt;

use candle_core::D;
use candle_nn::{Init, VarBuilder};

use crate::error::{Error, Result};
use crate::graph::{Adjacency, FeaturedGraph, GraphTensor};
use crate::scatter::{gather, scatter, Reduction};
use crate::transform::{Dense, Transform};

/// Per-edge displacement `x_i - x_j`.
pub fn displacement(x_i: &GraphTensor, x_j: &GraphTensor) -> Result<GraphTensor> {
    x_i.check_layout(x_j)?;
    x_i.map(|a| a - x_j.tensor())
}

/// Per-edge squared Euclidean distance, kept as a width-1 column.
pub fn squared_distance(x_i: &GraphTensor, x_j: &GraphTensor) -> Result<GraphTensor> {
    displacement(x_i, x_j)?.map(|d| d.sqr()?.sum_keepdim(D::Minus1))
}

/// Updates node coordinates from per-edge messages.
///
/// Implementations must be E(n)-equivariant in `x`: for any orthogonal `R`
/// and translation `t`, `encode(x R^T + t) == encode(x) R^T + t`.
pub trait PositionalEncode: fmt::Debug {
    /// Return new positions, one row per node.
    ///
    /// `messages` carries one row per edge of `adj`, before any aggregation.
    fn positional_encode(
        &self,
        adj: &Adjacency,
        x: &GraphTensor,
        messages: &GraphTensor,
    ) -> Result<GraphTensor>;

    /// The coordinate-correction transform.
    fn transform(&self) -> &dyn Transform;

    fn describe(&self) -> String;
}

/// E(n)-equivariant positional encoder.
#[derive(Debug, Clone)]
pub struct EEquivGraphPE<T = Dense> {
    nn: T,
    reduction: Reduction,
}

impl EEquivGraphPE<Dense> {
    /// Encoder for messages of width `message_dim`, averaging corrections per node.
    pub fn new(message_dim: usize, init: Init, vb: VarBuilder) -> Result<Self> {
        let nn = Dense::new(message_dim, 1, None, init, vb)?;
        Ok(Self {
            nn,
            reduction: Reduction::Mean,
        })
    }
}

impl<T: Transform> EEquivGraphPE<T> {
    /// Wrap an existing coordinate transform. It must produce one scalar per edge.
    pub fn from_parts(nn: T, reduction: Reduction) -> Result<Self> {
        if nn.out_dim() != 1 {
            return Err(Error::DimensionMismatch {
                context: "coordinate transform output",
                expected: 1,
                got: nn.out_dim(),
            });
        }
        Ok(Self { nn, reduction })
    }

    #[must_use]
    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    pub fn nn(&self) -> &T {
        &self.nn
    }

    /// Update the positions of `fg`, reading its edge features as the per-edge messages.
    pub fn forward(&self, fg: &FeaturedGraph) -> Result<FeaturedGraph> {
        let pf = fg.positional_features();
        let adj = fg
            .graph()
            .adjacency(pf.tensor().device())?
            .with_batch_size(fg.batch_size());
        let messages = gather(fg.edge_features(), adj.es())?;
        let x = self.positional_encode(&adj, pf, &messages)?;
        fg.with_positional_features(x)
    }
}

impl<T: Transform> PositionalEncode for EEquivGraphPE<T> {
    fn positional_encode(
        &self,
        adj: &Adjacency,
        x: &GraphTensor,
        messages: &GraphTensor,
    ) -> Result<GraphTensor> {
        if x.num_items() != adj.num_nodes() {
            return Err(Error::CountMismatch {
                what: "node",
                expected: adj.num_nodes(),
                got: x.num_items(),
            });
        }
        if messages.num_items() != adj.num_edges() {
            return Err(Error::CountMismatch {
                what: "message",
                expected: adj.num_edges(),
                got: messages.num_items(),
            });
        }
        x.check_layout(messages)?;

        let diff = displacement(&gather(x, adj.xs())?, &gather(x, adj.nbrs())?)?;
        let weight = self.nn.invoke("coordinate transform", messages)?;
        let scaled = diff.map(|d| d.broadcast_mul(weight.tensor()))?;
        let correction = scatter(self.reduction, &scaled, adj.nbrs(), adj.num_nodes())?;
        x.map(|t| t + correction.tensor())
    }

    fn transform(&self) -> &dyn Transform {
        &self.nn
    }

    fn describe(&self) -> String {
        format!("EEquivGraphPE({}, aggr={})", self.nn.describe(), self.reduction)
    }
}

impl<T: Transform> fmt::Display for EEquivGraphPE<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
