//! Sparse graph containers.
//!
//! Topology is stored as three parallel index arrays over flat feature
//! arenas, never as linked node/edge objects:
//!
//! ```text
//! edge k:  xs[k] --> nbrs[k]      features: ef[es[k]]
//! ```
//!
//! - [`SparseGraph`]: the topology, validated at construction.
//! - [`Adjacency`]: the per-forward-pass view of a [`SparseGraph`] with its
//!   index arrays uploaded to a device.
//! - [`FeaturedGraph`]: topology plus node, edge and positional features.
//! - [`GraphTensor`]: a feature tensor tagged as single-graph or batched.

use std::sync::Arc;

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};

/// A feature tensor laid out one row per item (node or edge).
///
/// - single: `(items, dim)`
/// - batched: `(batch, items, dim)`
///
/// The rank is checked once in [`GraphTensor::single`] / [`GraphTensor::batched`]
/// and preserved by every operation afterwards.
#[derive(Debug, Clone)]
pub struct GraphTensor(Repr);

#[derive(Debug, Clone)]
enum Repr {
    Single(Tensor),
    Batched(Tensor),
}

impl GraphTensor {
    /// Wrap a rank-2 `(items, dim)` tensor.
    pub fn single(t: Tensor) -> Result<Self> {
        check_rank(2, &t)?;
        Ok(Self(Repr::Single(t)))
    }

    /// Wrap a rank-3 `(batch, items, dim)` tensor.
    pub fn batched(t: Tensor) -> Result<Self> {
        check_rank(3, &t)?;
        Ok(Self(Repr::Batched(t)))
    }

    pub fn tensor(&self) -> &Tensor {
        match &self.0 {
            Repr::Single(t) | Repr::Batched(t) => t,
        }
    }

    pub fn into_tensor(self) -> Tensor {
        match self.0 {
            Repr::Single(t) | Repr::Batched(t) => t,
        }
    }

    pub fn is_batched(&self) -> bool {
        matches!(self.0, Repr::Batched(_))
    }

    pub fn batch_size(&self) -> Option<usize> {
        match &self.0 {
            Repr::Single(_) => None,
            Repr::Batched(t) => Some(t.dims()[0]),
        }
    }

    /// Axis along which nodes or edges are indexed.
    pub fn item_axis(&self) -> usize {
        match self.0 {
            Repr::Single(_) => 0,
            Repr::Batched(_) => 1,
        }
    }

    pub fn num_items(&self) -> usize {
        self.tensor().dims()[self.item_axis()]
    }

    /// Feature width (last axis).
    pub fn dim(&self) -> usize {
        let dims = self.tensor().dims();
        dims[dims.len() - 1]
    }

    /// Apply a tensor op, keeping the single/batched tag.
    ///
    /// Fails with [`Error::RankMismatch`] if `f` changes the rank.
    pub fn map<F>(&self, f: F) -> Result<Self>
    where
        F: FnOnce(&Tensor) -> candle_core::Result<Tensor>,
    {
        let t = f(self.tensor())?;
        check_rank(self.tensor().rank(), &t)?;
        Ok(self.rewrap(t))
    }

    /// Wrap `t` with the same tag as `self`. `t` must have the same rank.
    pub(crate) fn rewrap(&self, t: Tensor) -> Self {
        debug_assert_eq!(t.rank(), self.tensor().rank());
        match self.0 {
            Repr::Single(_) => Self(Repr::Single(t)),
            Repr::Batched(_) => Self(Repr::Batched(t)),
        }
    }

    /// View a single-graph tensor as a batch of one. Batched tensors are returned as-is.
    pub fn to_batched(&self) -> Result<Self> {
        match &self.0 {
            Repr::Single(t) => Ok(Self(Repr::Batched(t.unsqueeze(0)?))),
            Repr::Batched(_) => Ok(self.clone()),
        }
    }

    /// Fail unless `other` has the same single/batched layout and batch size.
    pub fn check_layout(&self, other: &GraphTensor) -> Result<()> {
        match (self.batch_size(), other.batch_size()) {
            (None, None) => Ok(()),
            (Some(a), Some(b)) if a == b => Ok(()),
            (Some(a), Some(b)) => Err(Error::BatchMismatch { expected: a, got: b }),
            _ => Err(Error::RankMismatch {
                expected: self.tensor().rank(),
                got: other.tensor().rank(),
            }),
        }
    }
}

fn check_rank(expected: usize, t: &Tensor) -> Result<()> {
    if t.rank() != expected {
        return Err(Error::RankMismatch {
            expected,
            got: t.rank(),
        });
    }
    Ok(())
}

/// Directed multigraph topology in coordinate form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseGraph {
    num_nodes: usize,
    num_edge_features: usize,
    xs: Vec<u32>,
    nbrs: Vec<u32>,
    es: Vec<u32>,
}

impl SparseGraph {
    /// One directed edge per pair; edge `k` reads edge-feature row `k`.
    pub fn directed(num_nodes: usize, edges: &[(usize, usize)]) -> Result<Self> {
        let xs = edges.iter().map(|&(s, _)| s).collect();
        let nbrs = edges.iter().map(|&(_, d)| d).collect();
        let es = (0..edges.len()).collect();
        Self::from_parts(num_nodes, edges.len(), xs, nbrs, es)
    }

    /// Both directions per pair, sharing the pair's edge-feature row.
    ///
    /// A self-loop contributes a single directed edge.
    pub fn undirected(num_nodes: usize, edges: &[(usize, usize)]) -> Result<Self> {
        let mut xs = Vec::with_capacity(2 * edges.len());
        let mut nbrs = Vec::with_capacity(2 * edges.len());
        let mut es = Vec::with_capacity(2 * edges.len());
        for (k, &(u, v)) in edges.iter().enumerate() {
            xs.push(u);
            nbrs.push(v);
            es.push(k);
            if u != v {
                xs.push(v);
                nbrs.push(u);
                es.push(k);
            }
        }
        Self::from_parts(num_nodes, edges.len(), xs, nbrs, es)
    }

    /// Build from explicit index arrays.
    pub fn from_parts(
        num_nodes: usize,
        num_edge_features: usize,
        xs: Vec<usize>,
        nbrs: Vec<usize>,
        es: Vec<usize>,
    ) -> Result<Self> {
        if nbrs.len() != xs.len() {
            return Err(Error::CountMismatch {
                what: "destination index",
                expected: xs.len(),
                got: nbrs.len(),
            });
        }
        if es.len() != xs.len() {
            return Err(Error::CountMismatch {
                what: "edge-feature index",
                expected: xs.len(),
                got: es.len(),
            });
        }
        if num_nodes > u32::MAX as usize || num_edge_features > u32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "graph too large for u32 indices: {num_nodes} nodes, {num_edge_features} edge features"
            )));
        }

        Ok(Self {
            num_nodes,
            num_edge_features,
            xs: to_indices(xs, "source node", num_nodes)?,
            nbrs: to_indices(nbrs, "destination node", num_nodes)?,
            es: to_indices(es, "edge feature", num_edge_features)?,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of directed edges (messages per forward pass).
    pub fn num_edges(&self) -> usize {
        self.xs.len()
    }

    /// Number of edge-feature rows the graph reads.
    pub fn num_edge_features(&self) -> usize {
        self.num_edge_features
    }

    pub fn sources(&self) -> &[u32] {
        &self.xs
    }

    pub fn destinations(&self) -> &[u32] {
        &self.nbrs
    }

    pub fn edge_feature_indices(&self) -> &[u32] {
        &self.es
    }

    /// Number of edges arriving at `node`.
    pub fn in_degree(&self, node: usize) -> usize {
        self.nbrs.iter().filter(|&&d| d as usize == node).count()
    }

    /// Upload the index arrays to `device`.
    pub fn adjacency(&self, device: &Device) -> Result<Adjacency> {
        let m = self.num_edges();
        Ok(Adjacency {
            xs: Tensor::from_slice(&self.xs, m, device)?,
            nbrs: Tensor::from_slice(&self.nbrs, m, device)?,
            es: Tensor::from_slice(&self.es, m, device)?,
            num_nodes: self.num_nodes,
            num_edges: m,
            num_edge_features: self.num_edge_features,
            batch_size: None,
        })
    }

    /// Fail unless `features` carries one row per node.
    pub fn check_num_nodes(&self, features: &GraphTensor) -> Result<()> {
        check_count("node", self.num_nodes, features.num_items())
    }

    /// Fail unless `features` carries one row per edge-feature slot.
    pub fn check_num_edges(&self, features: &GraphTensor) -> Result<()> {
        check_count("edge", self.num_edge_features, features.num_items())
    }
}

fn to_indices(raw: Vec<usize>, what: &'static str, bound: usize) -> Result<Vec<u32>> {
    raw.into_iter()
        .map(|index| {
            if index < bound {
                Ok(index as u32)
            } else {
                Err(Error::IndexOutOfRange { what, index, bound })
            }
        })
        .collect()
}

fn check_count(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::CountMismatch {
            what,
            expected,
            got,
        });
    }
    Ok(())
}

/// Read-only view of a [`SparseGraph`] for one forward pass.
#[derive(Debug, Clone)]
pub struct Adjacency {
    xs: Tensor,
    nbrs: Tensor,
    es: Tensor,
    num_nodes: usize,
    num_edges: usize,
    num_edge_features: usize,
    batch_size: Option<usize>,
}

impl Adjacency {
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Source node per edge (`u32`, length `num_edges`).
    pub fn xs(&self) -> &Tensor {
        &self.xs
    }

    /// Destination node per edge.
    pub fn nbrs(&self) -> &Tensor {
        &self.nbrs
    }

    /// Edge-feature row per edge.
    pub fn es(&self) -> &Tensor {
        &self.es
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    pub fn num_edge_features(&self) -> usize {
        self.num_edge_features
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }
}

/// Graph topology with node (`nf`), edge (`ef`) and positional (`pf`) features.
#[derive(Debug, Clone)]
pub struct FeaturedGraph {
    graph: Arc<SparseGraph>,
    nf: GraphTensor,
    ef: GraphTensor,
    pf: GraphTensor,
}

impl FeaturedGraph {
    /// Counts and batch layout are validated here, before any layer runs.
    pub fn new(
        graph: impl Into<Arc<SparseGraph>>,
        nf: GraphTensor,
        ef: GraphTensor,
        pf: GraphTensor,
    ) -> Result<Self> {
        let graph = graph.into();
        graph.check_num_nodes(&nf)?;
        graph.check_num_nodes(&pf)?;
        graph.check_num_edges(&ef)?;
        nf.check_layout(&pf)?;
        nf.check_layout(&ef)?;
        Ok(Self { graph, nf, ef, pf })
    }

    pub fn graph(&self) -> &SparseGraph {
        &self.graph
    }

    pub fn node_features(&self) -> &GraphTensor {
        &self.nf
    }

    pub fn edge_features(&self) -> &GraphTensor {
        &self.ef
    }

    pub fn positional_features(&self) -> &GraphTensor {
        &self.pf
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.nf.batch_size()
    }

    /// Same topology and edge features, new node and positional features.
    pub fn with_features(&self, nf: GraphTensor, pf: GraphTensor) -> Result<Self> {
        Self::new(self.graph.clone(), nf, self.ef.clone(), pf)
    }

    /// Same topology, node and edge features, new positional features.
    pub fn with_positional_features(&self, pf: GraphTensor) -> Result<Self> {
        Self::new(self.graph.clone(), self.nf.clone(), self.ef.clone(), pf)
    }

    /// Whether both graphs point at the same topology allocation.
    ///
    /// Graphs returned by a layer's `forward` share the input's topology, so
    /// callers can use this as a cheap pointer check before reusing cached
    /// per-topology data such as an [`Adjacency`].
    pub fn shares_topology(&self, other: &FeaturedGraph) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph)
    }
}
