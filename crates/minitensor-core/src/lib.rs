//! # minitensor-core
//!
//! Dense tensors and reverse-mode automatic differentiation.
//!
//! This crate provides:
//! - [`Tensor`] — n-dimensional array with automatic differentiation
//! - [`Shape`] / [`Layout`] — shape, strides and broadcasting
//! - [`DType`] / [`WithDType`] — element types (i32, f32, f64)
//! - [`Op`] — the recorded operation (grad function) of each tensor
//! - [`Error`] / [`ErrorKind`] — the error taxonomy
// - dtype: supported element types
// - shape / layout: shapes, strides, broadcast reading plans
// - dense: contiguous-buffer kernels (broadcast, reduce, matmul)
// - op / backprop: the computational graph and the backward pass
// - tensor: the user-facing Tensor type

pub mod backprop;
pub mod dense;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod op;
pub mod shape;
pub mod tensor;

pub use dtype::{DType, FloatDType, WithDType};
pub use error::{Error, ErrorKind, Result};
pub use layout::Layout;
pub use op::{Axis, BinaryOp, LossOp, Op, ReduceOp, ScalarOp, TensorId, UnaryOp};
pub use shape::Shape;
pub use tensor::{Nested, Tensor};
