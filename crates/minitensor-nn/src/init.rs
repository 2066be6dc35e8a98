// nn::init — Parameter initialization strategies
//
// An Initializer fills a parameter buffer in place. Layers hold their
// parameters as ordinary tensors, so initialization is "write into the
// buffer of an existing tensor" rather than "build a new tensor", which
// keeps tensor identity (and every clone of it) intact.
//
// AVAILABLE INITIALIZERS:
//
//   HeNormal        — N(0, sqrt(2 / fan_in)), fan_in = shape[0]
//   XavierUniform   — U(-l, l), l = sqrt(6 / (shape[0] + shape[1]))
//   Constant(v)     — every element = v
//
// HeNormal and XavierUniform need a 2-D (or higher) shape to compute fans.
// On a rank-0 or rank-1 shape they leave the buffer untouched.
//
// Randomness is always drawn from a caller-supplied RNG, so a seeded
// StdRng gives reproducible parameters.

use minitensor_core::{FloatDType, Result, Shape, Tensor, WithDType};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};

/// A strategy for filling a parameter buffer.
pub trait Initializer<T: WithDType> {
    /// Fill `buf` (laid out row-major with `shape`) in place.
    fn fill(&self, buf: &mut [T], shape: &Shape, rng: &mut dyn RngCore);

    /// Fill the data buffer of `tensor` in place.
    fn initialize(&self, tensor: &Tensor<T>, rng: &mut dyn RngCore) -> Result<()> {
        let mut buf = tensor.to_vec()?;
        self.fill(&mut buf, tensor.shape(), rng);
        tensor.set_data(&buf)
    }
}

/// He (Kaiming) normal initialization, suited to ReLU networks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeNormal;

impl<T: FloatDType> Initializer<T> for HeNormal {
    fn fill(&self, buf: &mut [T], shape: &Shape, rng: &mut dyn RngCore) {
        if shape.rank() < 2 {
            return;
        }
        let fan_in = shape.dims()[0] as f64;
        let std = (2.0 / fan_in).sqrt();
        for v in buf.iter_mut() {
            let z: f64 = StandardNormal.sample(rng);
            *v = T::from_f64(z * std);
        }
    }
}

/// Xavier (Glorot) uniform initialization, suited to tanh/sigmoid networks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct XavierUniform;

impl<T: FloatDType> Initializer<T> for XavierUniform {
    fn fill(&self, buf: &mut [T], shape: &Shape, rng: &mut dyn RngCore) {
        if shape.rank() < 2 {
            return;
        }
        let dims = shape.dims();
        let limit = (6.0 / (dims[0] + dims[1]) as f64).sqrt();
        for v in buf.iter_mut() {
            *v = T::from_f64(rng.gen_range(-limit..limit));
        }
    }
}

/// Fill with a single value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant<T>(pub T);

impl<T: WithDType> Initializer<T> for Constant<T> {
    fn fill(&self, buf: &mut [T], _shape: &Shape, _rng: &mut dyn RngCore) {
        buf.fill(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_he_normal_statistics() {
        let mut rng = StdRng::seed_from_u64(7);
        let shape = Shape::from((200, 100));
        let mut buf = vec![0.0f64; shape.elem_count()];
        HeNormal.fill(&mut buf, &shape, &mut rng);

        let n = buf.len() as f64;
        let mean = buf.iter().sum::<f64>() / n;
        let var = buf.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let expected_std = (2.0f64 / 200.0).sqrt();
        assert!(mean.abs() < 0.01, "mean = {mean}");
        assert!((var.sqrt() - expected_std).abs() < 0.01, "std = {}", var.sqrt());
        assert!(buf.iter().all(|&v| v != 0.0));
    }

    #[test]
    fn test_he_normal_fills_every_element() {
        // fan_in = 1 gives the widest distribution, fan_in = 4096 the narrowest.
        for dims in [(1, 3), (4096, 2)] {
            let shape = Shape::from(dims);
            let mut buf = vec![0.0f32; shape.elem_count()];
            HeNormal.fill(&mut buf, &shape, &mut StdRng::seed_from_u64(1));
            assert!(buf.iter().all(|v| v.is_finite() && *v != 0.0), "{dims:?}: {buf:?}");
        }
    }

    #[test]
    fn test_xavier_uniform_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let shape = Shape::from((4, 8));
        let mut buf = vec![0.0f32; shape.elem_count()];
        XavierUniform.fill(&mut buf, &shape, &mut rng);

        let limit = (6.0f32 / 12.0).sqrt();
        assert!(buf.iter().all(|v| v.abs() <= limit));
        assert!(buf.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_rank_one_is_left_untouched() {
        let mut rng = StdRng::seed_from_u64(0);
        let shape = Shape::from(5);
        let mut buf = vec![3.0f64; 5];
        HeNormal.fill(&mut buf, &shape, &mut rng);
        XavierUniform.fill(&mut buf, &shape, &mut rng);
        assert_eq!(buf, vec![3.0; 5]);
    }

    #[test]
    fn test_constant_and_seeded_reproducibility() {
        let t = Tensor::<i32>::zeros((2, 2), false).unwrap();
        Constant(4).initialize(&t, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(t.to_vec().unwrap(), vec![4; 4]);

        let a = Tensor::<f64>::zeros((3, 3), false).unwrap();
        let b = Tensor::<f64>::zeros((3, 3), false).unwrap();
        HeNormal.initialize(&a, &mut StdRng::seed_from_u64(42)).unwrap();
        HeNormal.initialize(&b, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a.to_vec().unwrap(), b.to_vec().unwrap());
    }
}
