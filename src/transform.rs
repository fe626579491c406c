//! Learned transforms.
//!
//! The layers in this crate never depend on a concrete dense-layer type.
//! They take any [`Transform`]: a parameterized map `R^in_dim -> R^out_dim`
//! applied to the last axis of a tensor. [`candle_nn::Linear`] is a
//! `Transform` as-is; [`Dense`] adds an optional activation.

use std::fmt;

use candle_core::Tensor;
use candle_nn::{Activation, Init, Linear, Module, VarBuilder};

use crate::error::{Error, Result};
use crate::graph::GraphTensor;

/// A trainable map over the last tensor axis.
pub trait Transform: fmt::Debug {
    /// Width of the last axis this transform consumes.
    fn in_dim(&self) -> usize;

    /// Width of the last axis this transform produces.
    fn out_dim(&self) -> usize;

    /// Raw forward pass. Callers normally go through [`Transform::invoke`].
    fn apply(&self, xs: &Tensor) -> candle_core::Result<Tensor>;

    /// Trainable tensors, in a stable order, keyed by local name.
    fn parameters(&self) -> Vec<(&'static str, Tensor)>;

    /// One-line description used by layer `Display` impls.
    fn describe(&self) -> String {
        format!("Transform({} => {})", self.in_dim(), self.out_dim())
    }

    /// Check the input width against [`Transform::in_dim`], then apply.
    fn invoke(&self, context: &'static str, xs: &GraphTensor) -> Result<GraphTensor> {
        if xs.dim() != self.in_dim() {
            return Err(Error::DimensionMismatch {
                context,
                expected: self.in_dim(),
                got: xs.dim(),
            });
        }
        xs.map(|t| self.apply(t))
    }
}

impl Transform for Linear {
    fn in_dim(&self) -> usize {
        self.weight().dims()[1]
    }

    fn out_dim(&self) -> usize {
        self.weight().dims()[0]
    }

    fn apply(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.forward(xs)
    }

    fn parameters(&self) -> Vec<(&'static str, Tensor)> {
        let mut params = vec![("weight", self.weight().clone())];
        if let Some(bias) = self.bias() {
            params.push(("bias", bias.clone()));
        }
        params
    }

    fn describe(&self) -> String {
        format!("Linear({} => {})", self.in_dim(), self.out_dim())
    }
}

/// Affine map followed by an optional activation: `act(x W^T + b)`.
#[derive(Debug, Clone)]
pub struct Dense {
    linear: Linear,
    activation: Option<Activation>,
}

impl Dense {
    /// Create a dense transform with weights drawn from `init` and zero bias.
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        activation: Option<Activation>,
        init: Init,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints((out_dim, in_dim), "weight", init)?;
        let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
        Ok(Self {
            linear: Linear::new(weight, Some(bias)),
            activation,
        })
    }

    /// Wrap existing weights (e.g. fixed weights in tests).
    pub fn from_linear(linear: Linear, activation: Option<Activation>) -> Self {
        Self { linear, activation }
    }

    pub fn linear(&self) -> &Linear {
        &self.linear
    }

    pub fn activation(&self) -> Option<Activation> {
        self.activation
    }
}

impl Transform for Dense {
    fn in_dim(&self) -> usize {
        self.linear.in_dim()
    }

    fn out_dim(&self) -> usize {
        self.linear.out_dim()
    }

    fn apply(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let ys = self.linear.forward(xs)?;
        match &self.activation {
            Some(act) => act.forward(&ys),
            None => Ok(ys),
        }
    }

    fn parameters(&self) -> Vec<(&'static str, Tensor)> {
        Transform::parameters(&self.linear)
    }

    fn describe(&self) -> String {
        match &self.activation {
            Some(act) => format!("Dense({} => {}, {act:?})", self.in_dim(), self.out_dim()),
            None => format!("Dense({} => {})", self.in_dim(), self.out_dim()),
        }
    }
}

impl fmt::Display for Dense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
