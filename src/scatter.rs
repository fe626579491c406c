//! Gather/scatter primitives and neighbor aggregation.
//!
//! Both primitives work along the item axis of a [`GraphTensor`] (axis 0 for
//! a single graph, axis 1 for a batch), so the same code serves both layouts.

use std::fmt;

use candle_core::Tensor;

use crate::error::{Error, Result};
use crate::graph::{Adjacency, GraphTensor};

/// Commutative, associative reduction used by [`scatter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    /// Sum of the incoming rows. Identity: zero.
    #[default]
    Sum,
    /// Average of the incoming rows. Slots with no rows stay zero.
    Mean,
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => f.write_str("sum"),
            Self::Mean => f.write_str("mean"),
        }
    }
}

/// Replicate rows of `src` according to `indices` (one output row per index).
pub fn gather(src: &GraphTensor, indices: &Tensor) -> Result<GraphTensor> {
    let axis = src.item_axis();
    src.map(|t| t.contiguous()?.index_select(indices, axis))
}

/// Combine rows of `values` into `num_slots` rows; row `k` lands in slot `indices[k]`.
pub fn scatter(
    op: Reduction,
    values: &GraphTensor,
    indices: &Tensor,
    num_slots: usize,
) -> Result<GraphTensor> {
    let axis = values.item_axis();
    let src = values.tensor().contiguous()?;
    let (dtype, device) = (src.dtype(), src.device());

    let mut shape = src.dims().to_vec();
    shape[axis] = num_slots;
    let summed = Tensor::zeros(shape.as_slice(), dtype, device)?.index_add(indices, &src, axis)?;

    let out = match op {
        Reduction::Sum => summed,
        Reduction::Mean => {
            let ones = Tensor::ones(indices.dims1()?, dtype, device)?;
            let counts = Tensor::zeros(num_slots, dtype, device)?.index_add(indices, &ones, 0)?;
            let counts = counts.maximum(&counts.ones_like()?)?;
            // (N,) -> (N, 1) or (1, N, 1) for broadcasting
            let mut count_shape = vec![1usize; shape.len()];
            count_shape[axis] = num_slots;
            summed.broadcast_div(&counts.reshape(count_shape)?)?
        }
    };
    Ok(values.rewrap(out))
}

/// Reduce per-edge `messages` into per-node rows by destination (`adj.nbrs()`).
///
/// `aggr == None` skips aggregation and yields `None`.
pub fn aggregate_neighbors(
    adj: &Adjacency,
    aggr: Option<Reduction>,
    messages: &GraphTensor,
) -> Result<Option<GraphTensor>> {
    let Some(op) = aggr else {
        return Ok(None);
    };
    if messages.num_items() != adj.num_edges() {
        return Err(Error::CountMismatch {
            what: "message",
            expected: adj.num_edges(),
            got: messages.num_items(),
        });
    }
    if let (Some(expected), Some(got)) = (adj.batch_size(), messages.batch_size()) {
        if expected != got {
            return Err(Error::BatchMismatch { expected, got });
        }
    }
    scatter(op, messages, adj.nbrs(), adj.num_nodes()).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SparseGraph;
    use candle_core::{DType, Device};

    fn single(rows: &[&[f32]]) -> GraphTensor {
        let width = rows[0].len();
        let data: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        let t = Tensor::from_vec(data, (rows.len(), width), &Device::Cpu).unwrap();
        GraphTensor::single(t).unwrap()
    }

    fn idx(v: &[u32]) -> Tensor {
        Tensor::new(v, &Device::Cpu).unwrap()
    }

    #[test]
    fn gather_replicates_rows() {
        let src = single(&[&[1.0, 2.0], &[3.0, 4.0]]);
        let out = gather(&src, &idx(&[1, 1, 0])).unwrap();
        assert_eq!(
            out.tensor().to_vec2::<f32>().unwrap(),
            vec![vec![3.0, 4.0], vec![3.0, 4.0], vec![1.0, 2.0]]
        );
    }

    #[test]
    fn scatter_sum_and_mean() {
        let vals = single(&[&[1.0], &[3.0], &[5.0]]);
        let slots = idx(&[0, 0, 2]);

        let sum = scatter(Reduction::Sum, &vals, &slots, 4).unwrap();
        assert_eq!(
            sum.tensor().to_vec2::<f32>().unwrap(),
            vec![vec![4.0], vec![0.0], vec![5.0], vec![0.0]]
        );

        let mean = scatter(Reduction::Mean, &vals, &slots, 4).unwrap();
        assert_eq!(
            mean.tensor().to_vec2::<f32>().unwrap(),
            vec![vec![2.0], vec![0.0], vec![5.0], vec![0.0]]
        );
    }

    #[test]
    fn scatter_batched_keeps_batch_axis() {
        let t = Tensor::new(&[[[1f32], [2.0]], [[10.0], [20.0]]], &Device::Cpu).unwrap();
        let vals = GraphTensor::batched(t).unwrap();
        let out = scatter(Reduction::Sum, &vals, &idx(&[1, 1]), 3).unwrap();
        assert!(out.is_batched());
        assert_eq!(out.tensor().dims(), &[2, 3, 1]);
        assert_eq!(
            out.tensor().to_vec3::<f32>().unwrap(),
            vec![
                vec![vec![0.0], vec![3.0], vec![0.0]],
                vec![vec![0.0], vec![30.0], vec![0.0]]
            ]
        );
    }

    #[test]
    fn aggregate_by_destination() {
        let g = SparseGraph::directed(3, &[(0, 1), (2, 1), (1, 0)]).unwrap();
        let adj = g.adjacency(&Device::Cpu).unwrap();
        let msgs = single(&[&[1.0, 0.0], &[2.0, 1.0], &[7.0, 7.0]]);
        let agg = aggregate_neighbors(&adj, Some(Reduction::Sum), &msgs)
            .unwrap()
            .unwrap();
        assert_eq!(
            agg.tensor().to_vec2::<f32>().unwrap(),
            vec![vec![7.0, 7.0], vec![3.0, 1.0], vec![0.0, 0.0]]
        );
    }

    #[test]
    fn skip_marker_passes_through() {
        let g = SparseGraph::directed(2, &[(0, 1)]).unwrap();
        let adj = g.adjacency(&Device::Cpu).unwrap();
        let msgs = single(&[&[1.0]]);
        assert!(aggregate_neighbors(&adj, None, &msgs).unwrap().is_none());
    }

    #[test]
    fn batch_of_one_matches_unbatched() {
        let g = SparseGraph::undirected(4, &[(0, 1), (1, 2), (0, 2)]).unwrap();
        let adj = g.adjacency(&Device::Cpu).unwrap();
        let msgs = GraphTensor::single(
            Tensor::randn(0f32, 1f32, (g.num_edges(), 5), &Device::Cpu).unwrap(),
        )
        .unwrap();

        for op in [Reduction::Sum, Reduction::Mean] {
            let flat = aggregate_neighbors(&adj, Some(op), &msgs).unwrap().unwrap();
            let batched = aggregate_neighbors(
                &adj.clone().with_batch_size(Some(1)),
                Some(op),
                &msgs.to_batched().unwrap(),
            )
            .unwrap()
            .unwrap();
            assert!(batched.is_batched());
            let diff = (batched.tensor().squeeze(0).unwrap() - flat.tensor())
                .unwrap()
                .abs()
                .unwrap()
                .sum_all()
                .unwrap()
                .to_scalar::<f32>()
                .unwrap();
            assert_eq!(diff, 0.0, "{op} batch-of-one differs");
        }
    }

    #[test]
    fn message_count_must_match_edges() {
        let g = SparseGraph::directed(2, &[(0, 1)]).unwrap();
        let adj = g.adjacency(&Device::Cpu).unwrap();
        let msgs = GraphTensor::single(Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap())
            .unwrap();
        let err = aggregate_neighbors(&adj, Some(Reduction::Sum), &msgs).unwrap_err();
        assert!(matches!(err, Error::CountMismatch { what: "message", .. }));
    }
}
