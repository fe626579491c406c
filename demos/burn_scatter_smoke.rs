//! Minimal Burn aggregation smoke example.
//!
//! Run:
//!   cargo run --example burn_scatter_smoke --features backend-burn

#[cfg(not(feature = "backend-burn"))]
fn main() {
    eprintln!("This example requires `--features backend-burn`.");
}

#[cfg(feature = "backend-burn")]
fn main() {
    use burn::tensor::backend::Backend;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use equivar::burn_scatter::BurnAdjacency;
    use equivar::{Reduction, SparseGraph};

    type B = NdArray<f32>;

    let device = <B as Backend>::Device::default();
    let graph = match SparseGraph::undirected(3, &[(0, 1), (1, 2)]) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("bad graph: {e}");
            return;
        }
    };
    let adj = BurnAdjacency::<B>::new(&graph, &device);

    let x = burn::tensor::Tensor::<B, 2>::from_data(
        TensorData::new(vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0], [3, 3]),
        &device,
    );
    let d = adj.edge_distances(x.clone());
    println!("squared distances: {:?}", d.to_data().to_vec::<f32>());

    let weights = burn::tensor::Tensor::<B, 2>::ones([graph.num_edges(), 1], &device) * 0.1;
    let x2 = adj.positional_update(Reduction::Mean, x, weights);
    println!("x' (row-major): {:?}", x2.to_data().to_vec::<f32>());
}
