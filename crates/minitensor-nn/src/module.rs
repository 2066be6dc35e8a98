// Module trait — The interface every layer implements
//
// The key method is forward(): it takes an input tensor and returns the
// output, recording the graph as it goes. parameters() returns every
// trainable tensor so a training loop can read gradients and write updated
// values back with `Tensor::set_data`.
//
// GENERIC OVER ELEMENT TYPE:
//
// Modules are generic over T: WithDType, like Tensor<T>. Layers whose math
// needs transcendental functions (Tanh, Sigmoid, Softmax) implement Module
// only for T: FloatDType.

use minitensor_core::{Result, Tensor, WithDType};

/// The fundamental trait for all layers.
///
/// # Example
/// ```ignore
/// struct TwoLayer {
///     fc1: Linear<f64>,
///     fc2: Linear<f64>,
/// }
///
/// impl Module<f64> for TwoLayer {
///     fn forward(&self, x: &Tensor<f64>) -> Result<Tensor<f64>> {
///         self.fc2.forward(&self.fc1.forward(x)?.relu()?)
///     }
///     fn parameters(&self) -> Vec<Tensor<f64>> {
///         let mut p = self.fc1.parameters();
///         p.extend(self.fc2.parameters());
///         p
///     }
/// }
/// ```
pub trait Module<T: WithDType> {
    /// Compute the output tensor from the input tensor.
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>>;

    /// Return all trainable parameters of this module.
    fn parameters(&self) -> Vec<Tensor<T>>;

    /// Return all trainable parameters with human-readable names.
    ///
    /// Leaf modules override this with names like `"weight"` / `"bias"`.
    /// The default uses positional indices (`param_0`, `param_1`, ...).
    fn named_parameters(&self) -> Vec<(String, Tensor<T>)> {
        self.parameters()
            .into_iter()
            .enumerate()
            .map(|(i, p)| (format!("param_{i}"), p))
            .collect()
    }

    /// Total number of scalar parameters in this module.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.elem_count()).sum()
    }

    /// Reset the gradient of every parameter to zeros.
    fn zero_grad(&self) -> Result<()> {
        for p in self.parameters() {
            p.zero_grad()?;
        }
        Ok(())
    }
}
