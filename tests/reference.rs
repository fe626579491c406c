//! `EEquivGraphConv` with fixed weights against a plain per-edge loop in ndarray.

use candle_core::{Device, Tensor};
use candle_nn::{Activation, Linear};
use equivar::{
    Dense, EEquivGraphConv, EEquivGraphPE, FeaturedGraph, GraphTensor, Reduction, SparseGraph,
};
use ndarray::{concatenate, s, Array1, Array2, Axis};

fn silu(x: f64) -> f64 {
    x / (1.0 + (-x).exp())
}

/// Deterministic, sign-mixed weights.
fn weights(rows: usize, cols: usize, salt: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        (((i * cols + j) * 7 + salt) % 11) as f64 * 0.05 - 0.25
    })
}

fn bias(len: usize, salt: usize) -> Array1<f64> {
    Array1::from_shape_fn(len, |i| ((i + salt) % 5) as f64 * 0.1 - 0.2)
}

fn to_candle(a: &Array2<f64>) -> Tensor {
    let (r, c) = a.dim();
    Tensor::from_vec(a.iter().copied().collect::<Vec<_>>(), (r, c), &Device::Cpu).unwrap()
}

fn to_candle_1(a: &Array1<f64>) -> Tensor {
    Tensor::from_vec(a.to_vec(), a.len(), &Device::Cpu).unwrap()
}

fn to_ndarray(t: &Tensor) -> Array2<f64> {
    let (r, c) = t.dims2().unwrap();
    Array2::from_shape_vec((r, c), t.flatten_all().unwrap().to_vec1::<f64>().unwrap()).unwrap()
}

struct Weights {
    w_e: Array2<f64>,
    b_e: Array1<f64>,
    w_x: Array2<f64>,
    b_x: Array1<f64>,
    w_h: Array2<f64>,
    b_h: Array1<f64>,
}

impl Weights {
    fn new(in_dim: usize, out_dim: usize, edge_dim: usize) -> Self {
        Self {
            w_e: weights(out_dim, 2 * in_dim + edge_dim + 1, 1),
            b_e: bias(out_dim, 1),
            w_x: weights(1, out_dim, 3),
            b_x: bias(1, 2),
            w_h: weights(out_dim, in_dim + out_dim, 5),
            b_h: bias(out_dim, 3),
        }
    }

    fn layer(&self) -> EEquivGraphConv {
        let linear =
            |w: &Array2<f64>, b: &Array1<f64>| Linear::new(to_candle(w), Some(to_candle_1(b)));
        let pe = EEquivGraphPE::from_parts(
            Dense::from_linear(linear(&self.w_x, &self.b_x), None),
            Reduction::Mean,
        )
        .unwrap();
        EEquivGraphConv::from_parts(
            pe,
            Dense::from_linear(linear(&self.w_e, &self.b_e), Some(Activation::Silu)),
            Dense::from_linear(linear(&self.w_h, &self.b_h), None),
        )
        .unwrap()
    }
}

/// Returns (node features, positions, messages).
fn reference(
    w: &Weights,
    n: usize,
    edges: &[(usize, usize)],
    h: &Array2<f64>,
    x: &Array2<f64>,
    ef: &Array2<f64>,
) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
    let out_dim = w.w_e.nrows();
    let pos_dim = x.ncols();
    let mut messages = Array2::zeros((edges.len(), out_dim));
    let mut agg = Array2::<f64>::zeros((n, out_dim));
    let mut corr = Array2::<f64>::zeros((n, pos_dim));
    let mut counts = vec![0usize; n];

    for (k, &(i, j)) in edges.iter().enumerate() {
        let diff = &x.row(i) - &x.row(j);
        let radial = diff.iter().map(|d| d * d).sum::<f64>();
        let input = concatenate![
            Axis(0),
            h.row(i),
            h.row(j),
            Array1::from_elem(1, radial).view(),
            ef.row(k)
        ];
        let m = (w.w_e.dot(&input) + &w.b_e).mapv(silu);
        let weight = w.w_x.dot(&m)[0] + w.b_x[0];

        corr.row_mut(j).scaled_add(weight, &diff);
        counts[j] += 1;
        agg.row_mut(j).scaled_add(1.0, &m);
        messages.row_mut(k).assign(&m);
    }

    let mut x_new = x.clone();
    let mut h_new = Array2::zeros((n, w.w_h.nrows()));
    for v in 0..n {
        if counts[v] > 0 {
            let c = &corr.row(v) / counts[v] as f64;
            x_new.row_mut(v).scaled_add(1.0, &c);
        }
        let input = concatenate![Axis(0), h.row(v), agg.row(v)];
        h_new.row_mut(v).assign(&(w.w_h.dot(&input) + &w.b_h));
    }
    (h_new, x_new, messages)
}

fn max_abs(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    assert_eq!(a.dim(), b.dim());
    (a - b).iter().fold(0.0, |acc, d| acc.max(d.abs()))
}

#[test]
fn matches_per_edge_loop() {
    let (in_dim, out_dim, edge_dim, pos_dim) = (3, 5, 2, 3);
    let n = 5;
    let edges = [(0, 1), (1, 0), (1, 2), (3, 2), (0, 2), (2, 2), (4, 0)];

    let h = Array2::from_shape_fn((n, in_dim), |(i, j)| (i as f64 - j as f64) * 0.3);
    let x = Array2::from_shape_fn((n, pos_dim), |(i, j)| ((i * 3 + j) % 4) as f64 - 1.5);
    let ef = Array2::from_shape_fn((edges.len(), edge_dim), |(k, j)| 0.1 * (k + j) as f64);

    let w = Weights::new(in_dim, out_dim, edge_dim);
    let layer = w.layer().with_pos_dim(pos_dim);
    assert_eq!(layer.in_dim(), in_dim);
    assert_eq!(layer.edge_dim(), edge_dim);

    let fg = FeaturedGraph::new(
        SparseGraph::directed(n, &edges).unwrap(),
        GraphTensor::single(to_candle(&h)).unwrap(),
        GraphTensor::single(to_candle(&ef)).unwrap(),
        GraphTensor::single(to_candle(&x)).unwrap(),
    )
    .unwrap();
    let (out, messages) = layer.forward_with_messages(&fg).unwrap();

    let (h_ref, x_ref, m_ref) = reference(&w, n, &edges, &h, &x, &ef);
    assert!(max_abs(&to_ndarray(messages.tensor()), &m_ref) < 1e-10);
    assert!(max_abs(&to_ndarray(out.node_features().tensor()), &h_ref) < 1e-10);
    assert!(max_abs(&to_ndarray(out.positional_features().tensor()), &x_ref) < 1e-10);

    // node 3 and node 4 receive nothing: positions unchanged
    assert_eq!(x_ref.slice(s![3.., ..]), x.slice(s![3.., ..]));
}

#[test]
fn two_node_single_edge() {
    let (in_dim, out_dim, edge_dim) = (3, 2, 1);
    let w = Weights::new(in_dim, out_dim, edge_dim);
    let layer = w.layer();
    assert_eq!(layer.named_transforms()[0].1.in_dim(), 8);

    let h = ndarray::array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let x = ndarray::array![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
    let ef = ndarray::array![[0.5]];

    let fg = FeaturedGraph::new(
        SparseGraph::directed(2, &[(0, 1)]).unwrap(),
        GraphTensor::single(to_candle(&h)).unwrap(),
        GraphTensor::single(to_candle(&ef)).unwrap(),
        GraphTensor::single(to_candle(&x)).unwrap(),
    )
    .unwrap();
    let (out, messages) = layer.forward_with_messages(&fg).unwrap();

    // the edge transform sees [1,0,0, 0,1,0, 1.0, 0.5]
    let input = ndarray::array![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.5];
    let m = (w.w_e.dot(&input) + &w.b_e).mapv(silu);
    let got = to_ndarray(messages.tensor());
    assert!((&got.row(0) - &m).iter().all(|d| d.abs() < 1e-12));

    let (h_ref, x_ref, _) = reference(&w, 2, &[(0, 1)], &h, &x, &ef);
    assert!(max_abs(&to_ndarray(out.node_features().tensor()), &h_ref) < 1e-12);
    assert!(max_abs(&to_ndarray(out.positional_features().tensor()), &x_ref) < 1e-12);
}
