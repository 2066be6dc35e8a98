// Loss functions
//
// Free-function forms of the tensor losses, for call sites that read
// better as `mse_loss(&pred, &target)` than as a method on the prediction.
// Every loss reduces to a shape-[1] tensor and requires prediction and
// target to have identical shapes (no broadcasting).
//
//   mse_loss  — mean((p - y)²)
//   mae_loss  — mean(|p - y|)
//   bce_loss  — -mean(y·ln(p) + (1-y)·ln(1-p)), p strictly inside (0, 1)
//
// Gradients flow to both arguments when they require grad.

use minitensor_core::{FloatDType, Result, Tensor, WithDType};

/// Mean squared error.
pub fn mse_loss<T: WithDType>(prediction: &Tensor<T>, target: &Tensor<T>) -> Result<Tensor<T>> {
    prediction.mse_loss(target)
}

/// Mean absolute error.
pub fn mae_loss<T: WithDType>(prediction: &Tensor<T>, target: &Tensor<T>) -> Result<Tensor<T>> {
    prediction.mae_loss(target)
}

/// Binary cross-entropy on probabilities (apply Sigmoid first).
pub fn bce_loss<T: FloatDType>(prediction: &Tensor<T>, target: &Tensor<T>) -> Result<Tensor<T>> {
    prediction.bce_loss(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use minitensor_core::ErrorKind;

    #[test]
    fn test_mse_and_mae() {
        let p = Tensor::new(vec![1.0f64, 2.0, 3.0], 3, true).unwrap();
        let y = Tensor::new(vec![1.0f64, 2.0, 5.0], 3, false).unwrap();
        let mse = mse_loss(&p, &y).unwrap();
        let mae = mae_loss(&p, &y).unwrap();
        assert_eq!(mse.dims(), &[1]);
        assert_relative_eq!(mse.to_scalar().unwrap(), 4.0 / 3.0);
        assert_relative_eq!(mae.to_scalar().unwrap(), 2.0 / 3.0);
    }

    #[test]
    fn test_bce_value_and_domain() {
        let p = Tensor::new(vec![0.5f64, 0.5], 2, false).unwrap();
        let y = Tensor::new(vec![1.0f64, 0.0], 2, false).unwrap();
        let l = bce_loss(&p, &y).unwrap();
        assert_relative_eq!(l.to_scalar().unwrap(), std::f64::consts::LN_2, epsilon = 1e-12);

        let p = Tensor::new(vec![1.0f64, 0.5], 2, false).unwrap();
        let err = bce_loss(&p, &y).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);
    }

    #[test]
    fn test_loss_shape_mismatch() {
        let p = Tensor::<f32>::zeros(3, false).unwrap();
        let y = Tensor::<f32>::zeros(4, false).unwrap();
        assert_eq!(mse_loss(&p, &y).unwrap_err().kind(), ErrorKind::Shape);
    }
}
