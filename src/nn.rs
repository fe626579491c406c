use std::fmt;

use candle_core::{Tensor, D};
use candle_nn::{Activation, Init, VarBuilder};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::graph::{Adjacency, FeaturedGraph, GraphTensor};
use crate::positional::{squared_distance, EEquivGraphPE, PositionalEncode};
use crate::scatter::{aggregate_neighbors, gather, Reduction};
use crate::transform::{Dense, Transform};

/// Construction parameters for [`EEquivGraphConv`].
#[derive(Debug, Clone)]
pub struct EEquivGraphConvConfig {
    /// Node feature width consumed.
    pub in_dim: usize,
    /// Message and node feature width produced.
    pub out_dim: usize,
    /// Coordinate width.
    pub pos_dim: usize,
    /// Edge feature width.
    pub edge_dim: usize,
    /// Weight initialization for all three transforms (biases start at zero).
    pub init: Init,
    /// Activation applied after the edge transform.
    pub activation: Option<Activation>,
    /// Message aggregation per destination node. `None` is rejected.
    pub aggregation: Option<Reduction>,
    /// Aggregation of coordinate corrections per destination node.
    pub position_aggregation: Reduction,
}

impl EEquivGraphConvConfig {
    pub fn new(in_dim: usize, out_dim: usize, pos_dim: usize, edge_dim: usize) -> Self {
        Self {
            in_dim,
            out_dim,
            pos_dim,
            edge_dim,
            init: candle_nn::init::DEFAULT_KAIMING_NORMAL,
            activation: None,
            aggregation: Some(Reduction::Sum),
            position_aggregation: Reduction::Mean,
        }
    }

    #[must_use]
    pub fn with_init(mut self, init: Init) -> Self {
        self.init = init;
        self
    }

    #[must_use]
    pub fn with_activation(mut self, activation: Option<Activation>) -> Self {
        self.activation = activation;
        self
    }

    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Option<Reduction>) -> Self {
        self.aggregation = aggregation;
        self
    }

    #[must_use]
    pub fn with_position_aggregation(mut self, reduction: Reduction) -> Self {
        self.position_aggregation = reduction;
        self
    }

    /// `[h_i, h_j, |x_i - x_j|^2, e]`
    pub fn edge_input_dim(&self) -> usize {
        2 * self.in_dim + self.edge_dim + 1
    }

    /// `[h, aggregated message]`
    pub fn node_input_dim(&self) -> usize {
        self.in_dim + self.out_dim
    }

    pub fn validate(&self) -> Result<()> {
        for (name, dim) in [
            ("in_dim", self.in_dim),
            ("out_dim", self.out_dim),
            ("pos_dim", self.pos_dim),
        ] {
            if dim == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.aggregation.is_none() {
            return Err(skip_unsupported());
        }
        Ok(())
    }
}

fn skip_unsupported() -> Error {
    Error::InvalidConfig("EEquivGraphConv needs an aggregation; skipping it is unsupported".into())
}

fn check_width(context: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::DimensionMismatch {
            context,
            expected,
            got,
        });
    }
    Ok(())
}

/// Concatenate the edge transform input `[h_i, h_j, |x_i - x_j|^2, e]`.
///
/// All arguments must already be gathered to one row per edge.
pub fn edge_input(
    h_i: &GraphTensor,
    h_j: &GraphTensor,
    x_i: &GraphTensor,
    x_j: &GraphTensor,
    e: &GraphTensor,
) -> Result<GraphTensor> {
    let dist = squared_distance(x_i, x_j)?;
    h_i.check_layout(h_j)?;
    h_i.check_layout(&dist)?;
    h_i.check_layout(e)?;
    h_i.map(|hi| Tensor::cat(&[hi, h_j.tensor(), dist.tensor(), e.tensor()], D::Minus1))
}

/// Outputs of one [`EEquivGraphConv::propagate`] pass.
#[derive(Debug, Clone)]
pub struct Propagated {
    /// Per-edge messages, `(M, message_dim)`.
    pub messages: GraphTensor,
    /// Updated node features, `(N, out_dim)`.
    pub node_features: GraphTensor,
    /// Updated positions, `(N, pos_dim)`.
    pub positions: GraphTensor,
}

/// E(n)-equivariant graph convolution (Satorras et al., 2021).
///
/// ```text
/// m_k  = phi_e(h_{xs[k]}, h_{nbrs[k]}, |x_{xs[k]} - x_{nbrs[k]}|^2, e_{es[k]})
/// x_v' = PE(x, m)_v
/// h_v' = phi_h(h_v, AGG_{k: nbrs[k] = v} m_k)
/// ```
///
/// Node features only see squared distances, so they are invariant under
/// rotations, reflections and translations of the positions; positions
/// transform with them.
///
/// # Reference
///
/// Satorras, Hoogeboom & Welling, "E(n) Equivariant Graph Neural Networks",
/// ICML 2021.
#[derive(Debug, Clone)]
pub struct EEquivGraphConv<E = Dense, P = EEquivGraphPE, H = Dense> {
    pe: P,
    nn_edge: E,
    nn_node: H,
    in_dim: usize,
    edge_dim: usize,
    pos_dim: Option<usize>,
    aggregation: Reduction,
}

impl EEquivGraphConv {
    /// Build all three transforms from `config`.
    ///
    /// Parameters live under `edge.*`, `position.*` and `node.*` in `vb`.
    pub fn new(config: &EEquivGraphConvConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let nn_edge = Dense::new(
            config.edge_input_dim(),
            config.out_dim,
            config.activation,
            config.init,
            vb.pp("edge"),
        )?;
        let pe = EEquivGraphPE::new(config.out_dim, config.init, vb.pp("position"))?
            .with_reduction(config.position_aggregation);
        let nn_node = Dense::new(
            config.node_input_dim(),
            config.out_dim,
            None,
            config.init,
            vb.pp("node"),
        )?;

        Ok(Self {
            pe,
            nn_edge,
            nn_node,
            in_dim: config.in_dim,
            edge_dim: config.edge_dim,
            pos_dim: Some(config.pos_dim),
            aggregation: config.aggregation.ok_or_else(skip_unsupported)?,
        })
    }
}

impl<E: Transform, P: PositionalEncode, H: Transform> EEquivGraphConv<E, P, H> {
    /// Assemble a layer from already-built parts.
    ///
    /// `in_dim` and `edge_dim` are inferred from the transform shapes; any
    /// coordinate width is accepted until [`Self::with_pos_dim`] pins one.
    pub fn from_parts(pe: P, nn_edge: E, nn_node: H) -> Result<Self> {
        let message_dim = nn_edge.out_dim();
        check_width(
            "coordinate transform input",
            message_dim,
            pe.transform().in_dim(),
        )?;
        if nn_node.in_dim() <= message_dim {
            return Err(Error::DimensionMismatch {
                context: "node transform input",
                expected: message_dim + 1,
                got: nn_node.in_dim(),
            });
        }
        let in_dim = nn_node.in_dim() - message_dim;
        if nn_edge.in_dim() < 2 * in_dim + 1 {
            return Err(Error::DimensionMismatch {
                context: "edge transform input",
                expected: 2 * in_dim + 1,
                got: nn_edge.in_dim(),
            });
        }
        let edge_dim = nn_edge.in_dim() - 2 * in_dim - 1;

        Ok(Self {
            pe,
            nn_edge,
            nn_node,
            in_dim,
            edge_dim,
            pos_dim: None,
            aggregation: Reduction::Sum,
        })
    }

    #[must_use]
    pub fn with_pos_dim(mut self, pos_dim: usize) -> Self {
        self.pos_dim = Some(pos_dim);
        self
    }

    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Reduction) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.nn_node.out_dim()
    }

    pub fn message_dim(&self) -> usize {
        self.nn_edge.out_dim()
    }

    pub fn edge_dim(&self) -> usize {
        self.edge_dim
    }

    pub fn pos_dim(&self) -> Option<usize> {
        self.pos_dim
    }

    pub fn aggregation(&self) -> Reduction {
        self.aggregation
    }

    pub fn positional_encoder(&self) -> &P {
        &self.pe
    }

    /// The three transforms in the order `edge`, `position`, `node`.
    pub fn named_transforms(&self) -> Vec<(&'static str, &dyn Transform)> {
        vec![
            ("edge", &self.nn_edge as &dyn Transform),
            ("position", self.pe.transform()),
            ("node", &self.nn_node as &dyn Transform),
        ]
    }

    /// Trainable tensors keyed `<role>.<name>`, e.g. `edge.weight`.
    pub fn parameters(&self) -> Vec<(String, Tensor)> {
        self.named_transforms()
            .into_iter()
            .flat_map(|(role, t)| {
                t.parameters()
                    .into_iter()
                    .map(move |(name, p)| (format!("{role}.{name}"), p))
            })
            .collect()
    }

    /// Per-edge messages from gathered endpoint features, positions and edge features.
    pub fn message(
        &self,
        h_i: &GraphTensor,
        h_j: &GraphTensor,
        x_i: &GraphTensor,
        x_j: &GraphTensor,
        e: &GraphTensor,
    ) -> Result<GraphTensor> {
        let input = edge_input(h_i, h_j, x_i, x_j, e)?;
        self.nn_edge.invoke("edge transform", &input)
    }

    /// New node features from the old ones and the per-node aggregated messages.
    pub fn update(&self, v: &GraphTensor, aggregated: &GraphTensor) -> Result<GraphTensor> {
        v.check_layout(aggregated)?;
        let input = v.map(|h| Tensor::cat(&[h, aggregated.tensor()], D::Minus1))?;
        self.nn_node.invoke("node transform", &input)
    }

    /// Message, positional update, aggregation and node update over `adj`.
    ///
    /// The positional encoder sees per-edge messages; the node update sees
    /// their per-node aggregate.
    pub fn propagate(
        &self,
        adj: &Adjacency,
        e: &GraphTensor,
        v: &GraphTensor,
        x: &GraphTensor,
        aggr: Option<Reduction>,
    ) -> Result<Propagated> {
        let aggr = aggr.ok_or_else(skip_unsupported)?;

        let h_i = gather(v, adj.xs())?;
        let h_j = gather(v, adj.nbrs())?;
        let x_i = gather(x, adj.xs())?;
        let x_j = gather(x, adj.nbrs())?;
        let e_k = gather(e, adj.es())?;

        let messages = self.message(&h_i, &h_j, &x_i, &x_j, &e_k)?;
        trace!(dims = ?messages.tensor().dims(), "messages");

        let positions = self.pe.positional_encode(adj, x, &messages)?;

        let Some(aggregated) = aggregate_neighbors(adj, Some(aggr), &messages)? else {
            return Err(skip_unsupported());
        };
        trace!(dims = ?aggregated.tensor().dims(), %aggr, "aggregated");

        let node_features = self.update(v, &aggregated)?;

        Ok(Propagated {
            messages,
            node_features,
            positions,
        })
    }

    /// Run the layer on `fg`, returning a graph with new node and positional features.
    pub fn forward(&self, fg: &FeaturedGraph) -> Result<FeaturedGraph> {
        self.forward_with_messages(fg).map(|(out, _)| out)
    }

    /// Like [`Self::forward`], also returning the per-edge messages.
    pub fn forward_with_messages(
        &self,
        fg: &FeaturedGraph,
    ) -> Result<(FeaturedGraph, GraphTensor)> {
        let (nf, ef, pf) = (
            fg.node_features(),
            fg.edge_features(),
            fg.positional_features(),
        );
        check_width("node features", self.in_dim, nf.dim())?;
        check_width("edge features", self.edge_dim, ef.dim())?;
        if let Some(pos_dim) = self.pos_dim {
            check_width("positional features", pos_dim, pf.dim())?;
        }

        let graph = fg.graph();
        debug!(
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            batch = ?fg.batch_size(),
            "EEquivGraphConv forward"
        );

        let adj = graph
            .adjacency(nf.tensor().device())?
            .with_batch_size(fg.batch_size());
        let out = self.propagate(&adj, ef, nf, pf, Some(self.aggregation))?;
        let updated = fg.with_features(out.node_features, out.positions)?;
        Ok((updated, out.messages))
    }
}

impl<E: Transform, P: PositionalEncode, H: Transform> fmt::Display for EEquivGraphConv<E, P, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EEquivGraphConv(edge={}, position={}, node={})",
            self.nn_edge.describe(),
            self.pe.describe(),
            self.nn_node.describe()
        )
    }
}
