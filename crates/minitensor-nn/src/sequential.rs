// Sequential — A chain of modules applied one after another
//
// Example:
//   let model = Sequential::new()
//       .add(Linear::new(2, 8, &mut rng)?)
//       .add(ReLU)
//       .add(Linear::new(8, 1, &mut rng)?);
//
//   let output = model.forward(&input)?;
//
// The output of each layer becomes the input to the next.

use minitensor_core::{Result, Tensor, WithDType};

use crate::module::Module;

/// A container that chains modules sequentially.
///
/// Sequential itself implements Module, so it can be nested.
pub struct Sequential<T: WithDType> {
    layers: Vec<Box<dyn Module<T>>>,
}

impl<T: WithDType> Sequential<T> {
    /// Create an empty Sequential.
    pub fn new() -> Self {
        Sequential { layers: Vec::new() }
    }

    /// Add a layer to the end of the sequence. Returns self for chaining.
    #[allow(clippy::should_implement_trait)]
    pub fn add<M: Module<T> + 'static>(mut self, module: M) -> Self {
        self.layers.push(Box::new(module));
        self
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the sequential is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<T: WithDType> Default for Sequential<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: WithDType> Module<T> for Sequential<T> {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        let mut out = x.clone();
        for layer in &self.layers {
            out = layer.forward(&out)?;
        }
        Ok(out)
    }

    fn parameters(&self) -> Vec<Tensor<T>> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn named_parameters(&self) -> Vec<(String, Tensor<T>)> {
        let mut named = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            for (k, v) in layer.named_parameters() {
                named.push((format!("layers.{i}.{k}"), v));
            }
        }
        named
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Linear, ReLU};

    #[test]
    fn test_empty_sequential_is_identity() {
        let model = Sequential::<i32>::new();
        assert!(model.is_empty());
        let x = Tensor::new(vec![1, 2], 2, false).unwrap();
        assert_eq!(model.forward(&x).unwrap().to_vec().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_named_parameters_are_prefixed() {
        let w = Tensor::new(vec![1, -1], (2, 1), true).unwrap();
        let b = Tensor::new(vec![0], (1, 1), true).unwrap();
        let model = Sequential::new()
            .add(Linear::from_tensors(w, b).unwrap())
            .add(ReLU);
        assert_eq!(model.len(), 2);

        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["layers.0.weight", "layers.0.bias"]);

        // [[3, 5]] @ [[1], [-1]] = [[-2]] -> relu -> [[0]]
        let x = Tensor::new(vec![3, 5], (1, 2), false).unwrap();
        assert_eq!(model.forward(&x).unwrap().to_vec().unwrap(), vec![0]);
    }
}
