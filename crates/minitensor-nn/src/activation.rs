// Activation modules — Wrappers around tensor activation functions
//
// Thin wrappers that turn tensor-level activations (like tensor.relu())
// into Module implementations, so they compose inside Sequential.

use minitensor_core::{FloatDType, Result, Tensor, WithDType};

use crate::module::Module;

/// ReLU activation: max(0, x)
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl<T: WithDType> Module<T> for ReLU {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        x.relu()
    }
    fn parameters(&self) -> Vec<Tensor<T>> {
        vec![]
    }
}

/// Tanh activation
#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl<T: FloatDType> Module<T> for Tanh {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        x.tanh()
    }
    fn parameters(&self) -> Vec<Tensor<T>> {
        vec![]
    }
}

/// Sigmoid activation: 1 / (1 + e^(-x))
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl<T: FloatDType> Module<T> for Sigmoid {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        x.sigmoid()
    }
    fn parameters(&self) -> Vec<Tensor<T>> {
        vec![]
    }
}

/// Softmax over the last axis. `dim` must name the last axis of the input.
#[derive(Debug, Clone, Copy)]
pub struct Softmax {
    pub dim: usize,
}

impl Softmax {
    pub fn new(dim: usize) -> Self {
        Softmax { dim }
    }
}

impl<T: FloatDType> Module<T> for Softmax {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        x.softmax(self.dim)
    }
    fn parameters(&self) -> Vec<Tensor<T>> {
        vec![]
    }
}
