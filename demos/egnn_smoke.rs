//! Minimal EEquivGraphConv smoke example (Candle backend).
//!
//! Run:
//!   cargo run --example egnn_smoke

use candle_core::{DType, Device, Tensor};
use candle_nn::{Activation, VarBuilder, VarMap};
use equivar::{EEquivGraphConv, EEquivGraphConvConfig, FeaturedGraph, GraphTensor, SparseGraph};

fn main() -> equivar::Result<()> {
    let dev = &Device::Cpu;
    let dtype = DType::F32;

    let n = 6usize;
    let (in_dim, out_dim, pos_dim, edge_dim) = (4usize, 8usize, 3usize, 2usize);

    // a ring
    let ring: Vec<(usize, usize)> = (0..n).map(|i| (i, (i + 1) % n)).collect();
    let graph = SparseGraph::undirected(n, &ring)?;

    let nf = Tensor::randn(0f32, 1f32, (n, in_dim), dev)?;
    let ef = Tensor::randn(0f32, 1f32, (graph.num_edge_features(), edge_dim), dev)?;
    let pf = Tensor::randn(0f32, 1f32, (n, pos_dim), dev)?;
    let fg = FeaturedGraph::new(
        graph,
        GraphTensor::single(nf)?,
        GraphTensor::single(ef)?,
        GraphTensor::single(pf)?,
    )?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, dtype, dev);
    let config = EEquivGraphConvConfig::new(in_dim, out_dim, pos_dim, edge_dim)
        .with_activation(Some(Activation::Silu));
    let layer = EEquivGraphConv::new(&config, vb)?;
    println!("{layer}");

    let (out, messages) = layer.forward_with_messages(&fg)?;
    println!("h shape: {:?}", out.node_features().tensor().dims());
    println!("x shape: {:?}", out.positional_features().tensor().dims());
    println!("messages shape: {:?}", messages.tensor().dims());

    for (name, p) in layer.parameters() {
        println!("{name}: {:?}", p.dims());
    }

    Ok(())
}
