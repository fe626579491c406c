//! equivar: E(n)-equivariant graph convolution.
//!
//! Provides the `EEquivGraphConv` message-passing layer and its positional
//! encoder, built on `candle` tensors over a sparse, index-array graph.
//!
//! ```rust,ignore
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//! use equivar::{EEquivGraphConv, EEquivGraphConvConfig};
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let conv = EEquivGraphConv::new(&EEquivGraphConvConfig::new(16, 32, 3, 4), vb)?;
//! let fg = conv.forward(&fg)?; // node features (N, 32), positions (N, 3)
//! ```

pub mod error;
pub mod graph;
pub mod nn;
pub mod positional;
pub mod scatter;
pub mod transform;

#[cfg(feature = "backend-burn")]
pub mod burn_scatter;

pub use error::{Error, Result};
pub use graph::{Adjacency, FeaturedGraph, GraphTensor, SparseGraph};
pub use nn::{EEquivGraphConv, EEquivGraphConvConfig, Propagated};
pub use positional::{EEquivGraphPE, PositionalEncode};
pub use scatter::Reduction;
pub use transform::{Dense, Transform};
