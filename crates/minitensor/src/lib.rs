//! # minitensor
//!
//! A small tensor library with reverse-mode automatic differentiation.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use minitensor::prelude::*;
//!
//! # fn main() -> minitensor::Result<()> {
//! let a = Tensor::new(vec![1.0f64, 2.0, 3.0, 4.0], (2, 2), true)?;
//! let b = Tensor::new(vec![1.0f64, 1.0, 1.0, 1.0], (2, 2), true)?;
//! let y = a.matmul(&b)?.sum_all()?;
//! y.backward()?;
//! assert_eq!(a.grad()?.map(|g| g.to_vec()).transpose()?, Some(vec![2.0; 4]));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `minitensor-core` | Tensor, Shape, DType, Layout, dense kernels, Autograd |
//! | `minitensor-nn` | Module trait, Linear, Sequential, activations, initializers, losses |
//!
//! ## Modules
//!
//! - [`dynamic`] — `AnyTensor`, a tensor whose dtype is chosen at runtime

/// Re-export core types.
pub use minitensor_core::{
    Axis, BinaryOp, DType, Error, ErrorKind, FloatDType, Layout, LossOp, Nested, Op, ReduceOp,
    Result, ScalarOp, Shape, Tensor, TensorId, UnaryOp, WithDType,
};

/// Re-export neural network modules.
pub mod nn {
    pub use minitensor_nn::*;
}

/// Runtime dtype dispatch over `Tensor<i32 | f32 | f64>`.
pub mod dynamic;

pub use dynamic::AnyTensor;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::dynamic::AnyTensor;
    pub use crate::nn::{
        bce_loss, mae_loss, mse_loss, Constant, HeNormal, Initializer, Linear, Module, ReLU,
        Sequential, Sigmoid, Softmax, Tanh, XavierUniform,
    };
    pub use crate::{Axis, DType, Error, FloatDType, Nested, Result, Shape, Tensor, WithDType};
}
