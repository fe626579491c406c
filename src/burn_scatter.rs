//! Burn-backed message-passing primitives (opt-in).
//!
//! Mirrors the candle gather/scatter path on Burn tensors so the same graph
//! can run on Burn backends (ndarray / wgpu / tch).
//!
//! The candle implementation in [`crate::scatter`] and [`crate::positional`]
//! is the reference; the tests below check this module against it.
//! Only single-graph `(items, dim)` tensors are covered.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

use crate::graph::SparseGraph;
use crate::scatter::Reduction;

/// Replicate rows of `src` according to `indices`.
pub fn gather<B: Backend>(src: Tensor<B, 2>, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
    src.select(0, indices)
}

/// Combine rows of `values` into `num_slots` rows; row `k` lands in slot `indices[k]`.
pub fn scatter<B: Backend>(
    op: Reduction,
    values: Tensor<B, 2>,
    indices: Tensor<B, 1, Int>,
    num_slots: usize,
) -> Tensor<B, 2> {
    let [m, d] = values.dims();
    let device = values.device();
    let summed = Tensor::<B, 2>::zeros([num_slots, d], &device).select_assign(
        0,
        indices.clone(),
        values,
    );
    match op {
        Reduction::Sum => summed,
        Reduction::Mean => {
            let ones = Tensor::<B, 2>::ones([m, 1], &device);
            let counts = Tensor::<B, 2>::zeros([num_slots, 1], &device)
                .select_assign(0, indices, ones)
                .clamp_min(1.0);
            summed / counts
        }
    }
}

/// Per-row squared distance, shape `[m, 1]`.
pub fn squared_distance<B: Backend>(x_i: Tensor<B, 2>, x_j: Tensor<B, 2>) -> Tensor<B, 2> {
    let m = x_i.dims()[0];
    (x_i - x_j).powf_scalar(2.0).sum_dim(1).reshape([m, 1])
}

/// Index arrays of a [`SparseGraph`] uploaded to a Burn device.
#[derive(Debug, Clone)]
pub struct BurnAdjacency<B: Backend> {
    xs: Tensor<B, 1, Int>,
    nbrs: Tensor<B, 1, Int>,
    es: Tensor<B, 1, Int>,
    num_nodes: usize,
}

impl<B: Backend> BurnAdjacency<B> {
    pub fn new(graph: &SparseGraph, device: &B::Device) -> Self {
        Self {
            xs: int_tensor(graph.sources(), device),
            nbrs: int_tensor(graph.destinations(), device),
            es: int_tensor(graph.edge_feature_indices(), device),
            num_nodes: graph.num_nodes(),
        }
    }

    /// Edge features gathered to one row per directed edge.
    pub fn edge_rows(&self, ef: Tensor<B, 2>) -> Tensor<B, 2> {
        gather(ef, self.es.clone())
    }

    /// Squared endpoint distance per edge, `[m, 1]`.
    pub fn edge_distances(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        squared_distance(
            gather(x.clone(), self.xs.clone()),
            gather(x, self.nbrs.clone()),
        )
    }

    /// Reduce per-edge rows into per-node rows by destination.
    pub fn aggregate(&self, op: Reduction, messages: Tensor<B, 2>) -> Tensor<B, 2> {
        scatter(op, messages, self.nbrs.clone(), self.num_nodes)
    }

    /// Positional update given the per-edge scalar weights `[m, 1]`.
    pub fn positional_update(
        &self,
        op: Reduction,
        x: Tensor<B, 2>,
        weights: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let diff = gather(x.clone(), self.xs.clone()) - gather(x.clone(), self.nbrs.clone());
        x + self.aggregate(op, diff * weights)
    }
}

fn int_tensor<B: Backend>(indices: &[u32], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = indices.iter().map(|&i| i64::from(i)).collect();
    let len = data.len();
    Tensor::from_data(TensorData::new(data, [len]), device)
}
