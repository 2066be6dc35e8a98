// AnyTensor — A dtype-erased tensor for callers that pick the dtype at runtime
//
// The core library is generic: Tensor<i32>, Tensor<f32> and Tensor<f64> are
// distinct types, and mixing them is a compile error. Bindings and other
// dynamic front ends instead receive the dtype as a string ("float32",
// "int32", ...). AnyTensor wraps one of the three instantiations and
// dispatches every operation to it.
//
// RULES:
//   - Tensor-tensor ops require both operands to have the same dtype;
//     otherwise they return Error::Msg. There is no implicit promotion.
//   - Scalars and data are passed as f64 and cast to the element type
//     (truncating for int32).
//   - Float-only ops (tanh, exp, softmax, bce_loss, ...) return Error::Msg
//     on an int32 tensor.
//   - Data and gradients read back as f64.

use std::fmt;
use std::str::FromStr;

use minitensor_core::{Axis, DType, Error, Result, Shape, Tensor, WithDType};

/// A tensor of any supported element type.
#[derive(Debug, Clone)]
pub enum AnyTensor {
    I32(Tensor<i32>),
    F32(Tensor<f32>),
    F64(Tensor<f64>),
}

// Apply `$body` to the inner tensor and rewrap the result in the same variant.
macro_rules! map_any {
    ($value:expr, $t:ident => $body:expr) => {
        match $value {
            AnyTensor::I32($t) => AnyTensor::I32($body),
            AnyTensor::F32($t) => AnyTensor::F32($body),
            AnyTensor::F64($t) => AnyTensor::F64($body),
        }
    };
}

// Apply `$body` to the inner tensor and return its (non-tensor) result.
macro_rules! with_any {
    ($value:expr, $t:ident => $body:expr) => {
        match $value {
            AnyTensor::I32($t) => $body,
            AnyTensor::F32($t) => $body,
            AnyTensor::F64($t) => $body,
        }
    };
}

// Like map_any, but int32 is rejected.
macro_rules! map_float {
    ($value:expr, $op:expr, $t:ident => $body:expr) => {
        match $value {
            AnyTensor::I32(_) => Err(float_only($op)),
            AnyTensor::F32($t) => Ok(AnyTensor::F32($body)),
            AnyTensor::F64($t) => Ok(AnyTensor::F64($body)),
        }
    };
}

// Pair two tensors of the same dtype.
macro_rules! zip_any {
    ($lhs:expr, $rhs:expr, $a:ident, $b:ident => $body:expr) => {
        match ($lhs, $rhs) {
            (AnyTensor::I32($a), AnyTensor::I32($b)) => Ok(AnyTensor::I32($body)),
            (AnyTensor::F32($a), AnyTensor::F32($b)) => Ok(AnyTensor::F32($body)),
            (AnyTensor::F64($a), AnyTensor::F64($b)) => Ok(AnyTensor::F64($body)),
            (a, b) => Err(dtype_mismatch(a.dtype(), b.dtype())),
        }
    };
}

fn float_only(op: &str) -> Error {
    Error::msg(format!("{op} requires a floating-point dtype, got int32"))
}

fn dtype_mismatch(lhs: DType, rhs: DType) -> Error {
    Error::msg(format!("dtype mismatch: {lhs} vs {rhs}"))
}

fn parse_dtype(name: &str) -> Result<DType> {
    let dtype = DType::from_str(name)?;
    tracing::trace!(requested = name, %dtype, "dtype selected");
    Ok(dtype)
}

fn cast<T: WithDType>(data: &[f64]) -> Vec<T> {
    data.iter().map(|&v| T::from_f64(v)).collect()
}

fn widen<T: WithDType>(data: Vec<T>) -> Vec<f64> {
    data.into_iter().map(WithDType::to_f64).collect()
}

impl AnyTensor {
    // Construction

    /// Build a tensor from f64 data, casting to the dtype named by `dtype`.
    pub fn new(
        data: &[f64],
        shape: impl Into<Shape>,
        requires_grad: bool,
        dtype: &str,
    ) -> Result<Self> {
        let shape = shape.into();
        Ok(match parse_dtype(dtype)? {
            DType::I32 => AnyTensor::I32(Tensor::new(cast(data), shape, requires_grad)?),
            DType::F32 => AnyTensor::F32(Tensor::new(cast(data), shape, requires_grad)?),
            DType::F64 => AnyTensor::F64(Tensor::new(cast(data), shape, requires_grad)?),
        })
    }

    /// A tensor filled with `value` (cast to the dtype).
    pub fn full(
        shape: impl Into<Shape>,
        value: f64,
        requires_grad: bool,
        dtype: &str,
    ) -> Result<Self> {
        let shape = shape.into();
        Ok(match parse_dtype(dtype)? {
            DType::I32 => AnyTensor::I32(Tensor::full(shape, i32::from_f64(value), requires_grad)?),
            DType::F32 => AnyTensor::F32(Tensor::full(shape, f32::from_f64(value), requires_grad)?),
            DType::F64 => AnyTensor::F64(Tensor::full(shape, value, requires_grad)?),
        })
    }

    pub fn zeros(shape: impl Into<Shape>, requires_grad: bool, dtype: &str) -> Result<Self> {
        Self::full(shape, 0.0, requires_grad, dtype)
    }

    pub fn ones(shape: impl Into<Shape>, requires_grad: bool, dtype: &str) -> Result<Self> {
        Self::full(shape, 1.0, requires_grad, dtype)
    }

    // Accessors

    pub fn dtype(&self) -> DType {
        with_any!(self, t => t.dtype())
    }

    pub fn shape(&self) -> &Shape {
        with_any!(self, t => t.shape())
    }

    pub fn dims(&self) -> &[usize] {
        with_any!(self, t => t.dims())
    }

    pub fn strides(&self) -> &[usize] {
        with_any!(self, t => t.strides())
    }

    pub fn elem_count(&self) -> usize {
        with_any!(self, t => t.elem_count())
    }

    pub fn requires_grad(&self) -> bool {
        with_any!(self, t => t.requires_grad())
    }

    pub fn is_leaf(&self) -> bool {
        with_any!(self, t => t.is_leaf())
    }

    /// The graph parents of this tensor.
    pub fn parents(&self) -> Vec<AnyTensor> {
        match self {
            AnyTensor::I32(t) => t.parents().into_iter().map(AnyTensor::I32).collect(),
            AnyTensor::F32(t) => t.parents().into_iter().map(AnyTensor::F32).collect(),
            AnyTensor::F64(t) => t.parents().into_iter().map(AnyTensor::F64).collect(),
        }
    }

    /// Name of the recorded backward rule ("Leaf" for leaves).
    pub fn grad_fn(&self) -> &'static str {
        with_any!(self, t => t.op().backward_name())
    }

    pub fn set_requires_grad(self, requires_grad: bool) -> Self {
        map_any!(self, t => t.set_requires_grad(requires_grad))
    }

    pub fn detach(&self) -> Self {
        map_any!(self, t => t.detach())
    }

    // Data

    /// Element data, row-major, widened to f64.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        Ok(with_any!(self, t => widen(t.to_vec()?)))
    }

    /// The gradient widened to f64, if one has been accumulated.
    pub fn grad_f64(&self) -> Result<Option<Vec<f64>>> {
        with_any!(self, t => match t.grad()? {
            Some(g) => Ok(Some(widen(g.to_vec()?))),
            None => Ok(None),
        })
    }

    /// Overwrite the data in place from f64 values.
    pub fn set_data(&self, data: &[f64]) -> Result<()> {
        with_any!(self, t => t.set_data(cast(data).as_slice()))
    }

    // Arithmetic

    pub fn add(&self, rhs: &AnyTensor) -> Result<Self> {
        zip_any!(self, rhs, a, b => a.add(b)?)
    }

    pub fn sub(&self, rhs: &AnyTensor) -> Result<Self> {
        zip_any!(self, rhs, a, b => a.sub(b)?)
    }

    pub fn mul(&self, rhs: &AnyTensor) -> Result<Self> {
        zip_any!(self, rhs, a, b => a.mul(b)?)
    }

    pub fn div(&self, rhs: &AnyTensor) -> Result<Self> {
        zip_any!(self, rhs, a, b => a.div(b)?)
    }

    pub fn add_scalar(&self, k: f64) -> Result<Self> {
        Ok(map_any!(self, t => t.add_scalar(WithDType::from_f64(k))?))
    }

    pub fn sub_scalar(&self, k: f64) -> Result<Self> {
        Ok(map_any!(self, t => t.sub_scalar(WithDType::from_f64(k))?))
    }

    pub fn mul_scalar(&self, k: f64) -> Result<Self> {
        Ok(map_any!(self, t => t.mul_scalar(WithDType::from_f64(k))?))
    }

    pub fn div_scalar(&self, k: f64) -> Result<Self> {
        Ok(map_any!(self, t => t.div_scalar(WithDType::from_f64(k))?))
    }

    /// k - self
    pub fn rsub_scalar(&self, k: f64) -> Result<Self> {
        Ok(map_any!(self, t => t.rsub_scalar(WithDType::from_f64(k))?))
    }

    /// k / self
    pub fn rdiv_scalar(&self, k: f64) -> Result<Self> {
        Ok(map_any!(self, t => t.rdiv_scalar(WithDType::from_f64(k))?))
    }

    pub fn neg(&self) -> Result<Self> {
        Ok(map_any!(self, t => t.neg()?))
    }

    pub fn relu(&self) -> Result<Self> {
        Ok(map_any!(self, t => t.relu()?))
    }

    // Reductions (None reduces every element)

    pub fn sum(&self, axis: Option<usize>) -> Result<Self> {
        Ok(map_any!(self, t => t.sum(Axis::from(axis))?))
    }

    pub fn mean(&self, axis: Option<usize>) -> Result<Self> {
        Ok(map_any!(self, t => t.mean(Axis::from(axis))?))
    }

    pub fn max(&self, axis: Option<usize>) -> Result<Self> {
        Ok(map_any!(self, t => t.max(Axis::from(axis))?))
    }

    pub fn min(&self, axis: Option<usize>) -> Result<Self> {
        Ok(map_any!(self, t => t.min(Axis::from(axis))?))
    }

    // Shape and linear algebra

    pub fn matmul(&self, rhs: &AnyTensor) -> Result<Self> {
        zip_any!(self, rhs, a, b => a.matmul(b)?)
    }

    pub fn transpose(&self) -> Result<Self> {
        Ok(map_any!(self, t => t.transpose()?))
    }

    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        Ok(map_any!(self, t => t.reshape(shape)?))
    }

    // Losses

    pub fn mse_loss(&self, target: &AnyTensor) -> Result<Self> {
        zip_any!(self, target, p, y => p.mse_loss(y)?)
    }

    pub fn mae_loss(&self, target: &AnyTensor) -> Result<Self> {
        zip_any!(self, target, p, y => p.mae_loss(y)?)
    }

    pub fn bce_loss(&self, target: &AnyTensor) -> Result<Self> {
        match (self, target) {
            (AnyTensor::F32(p), AnyTensor::F32(y)) => Ok(AnyTensor::F32(p.bce_loss(y)?)),
            (AnyTensor::F64(p), AnyTensor::F64(y)) => Ok(AnyTensor::F64(p.bce_loss(y)?)),
            (AnyTensor::I32(_), AnyTensor::I32(_)) => Err(float_only("bce_loss")),
            (a, b) => Err(dtype_mismatch(a.dtype(), b.dtype())),
        }
    }

    // Floating-point only

    pub fn tanh(&self) -> Result<Self> {
        map_float!(self, "tanh", t => t.tanh()?)
    }

    pub fn sigmoid(&self) -> Result<Self> {
        map_float!(self, "sigmoid", t => t.sigmoid()?)
    }

    pub fn exp(&self) -> Result<Self> {
        map_float!(self, "exp", t => t.exp()?)
    }

    pub fn log(&self) -> Result<Self> {
        map_float!(self, "log", t => t.log()?)
    }

    pub fn sqrt(&self) -> Result<Self> {
        map_float!(self, "sqrt", t => t.sqrt()?)
    }

    pub fn sin(&self) -> Result<Self> {
        map_float!(self, "sin", t => t.sin()?)
    }

    pub fn cos(&self) -> Result<Self> {
        map_float!(self, "cos", t => t.cos()?)
    }

    pub fn tan(&self) -> Result<Self> {
        map_float!(self, "tan", t => t.tan()?)
    }

    pub fn powf(&self, exponent: f64) -> Result<Self> {
        map_float!(self, "powf", t => t.powf(exponent)?)
    }

    pub fn softmax(&self, dim: usize) -> Result<Self> {
        map_float!(self, "softmax", t => t.softmax(dim)?)
    }

    // Autograd

    pub fn backward(&self) -> Result<()> {
        with_any!(self, t => t.backward())
    }

    pub fn zero_grad(&self) -> Result<()> {
        with_any!(self, t => t.zero_grad())
    }
}

impl From<Tensor<i32>> for AnyTensor {
    fn from(t: Tensor<i32>) -> Self {
        AnyTensor::I32(t)
    }
}

impl From<Tensor<f32>> for AnyTensor {
    fn from(t: Tensor<f32>) -> Self {
        AnyTensor::F32(t)
    }
}

impl From<Tensor<f64>> for AnyTensor {
    fn from(t: Tensor<f64>) -> Self {
        AnyTensor::F64(t)
    }
}

impl fmt::Display for AnyTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        with_any!(self, t => fmt::Display::fmt(t, f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minitensor_core::ErrorKind;

    #[test]
    fn test_dtype_parsing_and_cast() {
        let t = AnyTensor::new(&[1.7, -2.2], 2, false, "int32").unwrap();
        assert_eq!(t.dtype(), DType::I32);
        assert_eq!(t.to_f64_vec().unwrap(), vec![1.0, -2.0]);

        let t = AnyTensor::ones((2, 2), true, "f32").unwrap();
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.to_string(), "Tensor(dtype=float32, shape=[2, 2], requires_grad=true)");

        assert!(AnyTensor::zeros(2, false, "bfloat16").is_err());
    }

    #[test]
    fn test_mixed_dtypes_are_rejected() {
        let a = AnyTensor::ones(2, false, "float32").unwrap();
        let b = AnyTensor::ones(2, false, "float64").unwrap();
        let err = a.add(&b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.to_string().contains("dtype mismatch"));
    }

    #[test]
    fn test_float_only_ops_reject_int32() {
        let t = AnyTensor::ones(3, false, "int32").unwrap();
        let rejected = [
            t.exp(),
            t.log(),
            t.sqrt(),
            t.sin(),
            t.cos(),
            t.tan(),
            t.powf(2.0),
            t.softmax(0),
        ];
        for result in rejected {
            let err = result.unwrap_err();
            assert!(err.to_string().contains("floating-point dtype"), "{err}");
        }
        assert!(t.relu().is_ok());

        // No implicit promotion: cast through f64 data instead.
        let f = AnyTensor::new(&t.to_f64_vec().unwrap(), 3, false, "float32").unwrap();
        assert_eq!(f.sqrt().unwrap().to_f64_vec().unwrap(), vec![1.0; 3]);
    }

    #[test]
    fn test_backward_through_dispatch() {
        let x = AnyTensor::new(&[1.0, 2.0, 3.0], 3, true, "float64").unwrap();
        let y = x.mul(&x).unwrap().sum(None).unwrap();
        assert_eq!(y.grad_fn(), "SumBackward");
        y.backward().unwrap();
        assert_eq!(x.grad_f64().unwrap(), Some(vec![2.0, 4.0, 6.0]));

        x.zero_grad().unwrap();
        assert_eq!(x.grad_f64().unwrap(), Some(vec![0.0; 3]));
    }
}
