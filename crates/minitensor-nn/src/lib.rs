//! # minitensor-nn
//!
//! Layers, activations, initializers and loss functions for minitensor.
//!
//! Provides reusable building blocks following the [`Module`] trait pattern:
//!
//! 1. **Module trait** — every layer implements `forward()`
//! 2. **Linear** — fully connected: `y = x @ W + b`
//! 3. **Sequential** — a chain of modules
//! 4. **Activations** — ReLU, Tanh, Sigmoid, Softmax as modules
//! 5. **Initializers** — HeNormal, XavierUniform, Constant
//! 6. **Loss functions** — mse_loss, mae_loss, bce_loss
//!
//! Modules are generic over the element type (like `Tensor<T>`).

pub mod activation;
pub mod init;
pub mod linear;
pub mod loss;
pub mod module;
pub mod sequential;

pub use activation::{ReLU, Sigmoid, Softmax, Tanh};
pub use init::{Constant, HeNormal, Initializer, XavierUniform};
pub use linear::Linear;
pub use loss::{bce_loss, mae_loss, mse_loss};
pub use module::Module;
pub use sequential::Sequential;
