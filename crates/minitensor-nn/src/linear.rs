// Linear — Fully-connected (dense) layer
//
// y = x @ W + b
//
// SHAPES:
//   input:  [batch, in_features]
//   weight: [in_features, out_features]
//   bias:   [1, out_features]            (broadcast over the batch)
//   output: [batch, out_features]
//
// The weight is stored [in, out] so the forward pass is a plain matmul with
// no transpose node in the graph, and fan_in is shape[0] for the
// initializers.
//
// INITIALIZATION:
//   Linear::new uses HeNormal for the weight and zeros for the bias.
//   Linear::with_init accepts any pair of Initializers, which is also the
//   only way to build an integer Linear (HeNormal needs floats).

use minitensor_core::{Error, FloatDType, Result, Tensor, WithDType};
use rand::RngCore;

use crate::init::{Constant, HeNormal, Initializer};
use crate::module::Module;

/// A fully-connected layer: y = x @ W + b.
pub struct Linear<T: WithDType> {
    weight: Tensor<T>,
    bias: Tensor<T>,
    in_features: usize,
    out_features: usize,
}

impl<T: FloatDType> Linear<T> {
    /// Create a Linear layer with He-normal weights and a zero bias.
    pub fn new(in_features: usize, out_features: usize, rng: &mut dyn RngCore) -> Result<Self> {
        Self::with_init(
            in_features,
            out_features,
            &HeNormal,
            &Constant(T::zero()),
            rng,
        )
    }
}

impl<T: WithDType> Linear<T> {
    /// Create a Linear layer, filling the weight and bias with the given
    /// initializers. Both parameters require grad.
    #[tracing::instrument(level = "debug", skip(weight_init, bias_init, rng))]
    pub fn with_init(
        in_features: usize,
        out_features: usize,
        weight_init: &dyn Initializer<T>,
        bias_init: &dyn Initializer<T>,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        let weight = Tensor::zeros((in_features, out_features), true)?;
        weight_init.initialize(&weight, rng)?;
        let bias = Tensor::zeros((1, out_features), true)?;
        bias_init.initialize(&bias, rng)?;
        Ok(Linear {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Create a Linear layer from existing weight `[in, out]` and bias
    /// `[1, out]` tensors (e.g. fixed values in a test).
    pub fn from_tensors(weight: Tensor<T>, bias: Tensor<T>) -> Result<Self> {
        if weight.rank() != 2 {
            return Err(Error::RankMismatch {
                op: "linear weight",
                expected: 2,
                got: weight.rank(),
            });
        }
        let (in_features, out_features) = (weight.dims()[0], weight.dims()[1]);
        if bias.dims() != [1, out_features] {
            return Err(Error::ShapeMismatch {
                expected: (1, out_features).into(),
                got: bias.shape().clone(),
            });
        }
        Ok(Linear {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Weight matrix `[in_features, out_features]`.
    pub fn weight(&self) -> &Tensor<T> {
        &self.weight
    }

    /// Bias row `[1, out_features]`.
    pub fn bias(&self) -> &Tensor<T> {
        &self.bias
    }
}

impl<T: WithDType> Module<T> for Linear<T> {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        x.matmul(&self.weight)?.add(&self.bias)
    }

    fn parameters(&self) -> Vec<Tensor<T>> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    fn named_parameters(&self) -> Vec<(String, Tensor<T>)> {
        vec![
            ("weight".to_string(), self.weight.clone()),
            ("bias".to_string(), self.bias.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_linear_shapes_and_parameters() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = Linear::<f32>::new(4, 3, &mut rng).unwrap();
        assert_eq!(layer.weight().dims(), &[4, 3]);
        assert_eq!(layer.bias().dims(), &[1, 3]);
        assert_eq!(layer.num_parameters(), 15);
        assert!(layer.parameters().iter().all(|p| p.requires_grad()));
        assert_eq!(layer.bias().to_vec().unwrap(), vec![0.0; 3]);

        let x = Tensor::<f32>::ones((5, 4), false).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.dims(), &[5, 3]);
    }

    #[test]
    fn test_linear_from_tensors_forward() {
        // W = [[1, 2], [3, 4]], b = [[10, 20]]
        let w = Tensor::new(vec![1, 2, 3, 4], (2, 2), true).unwrap();
        let b = Tensor::new(vec![10, 20], (1, 2), true).unwrap();
        let layer = Linear::from_tensors(w, b).unwrap();

        let x = Tensor::new(vec![1, 1, 2, 0], (2, 2), false).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.to_vec().unwrap(), vec![14, 26, 12, 24]);
    }

    #[test]
    fn test_linear_from_tensors_rejects_bad_bias() {
        let w = Tensor::<f64>::zeros((2, 3), true).unwrap();
        let b = Tensor::<f64>::zeros(3, true).unwrap();
        assert!(Linear::from_tensors(w, b).is_err());
    }
}
