// Op — Computational graph node for automatic differentiation
//
// Every tensor that results from a computation records HOW it was created
// via the Op enum. The recorded Op is the tensor's grad function: the closed
// set of variants below is every differentiable operation in the library,
// and backprop.rs maps each variant to its derivative rule.
//
// Example: c = a + b
//   a.op = Op::None (leaf)
//   b.op = Op::None (leaf)
//   c.op = Op::Binary { lhs: a, rhs: b, op: Add }
//
// Each variant holds the input Tensor<T> handles (Arc-wrapped, cheap to
// clone) plus whatever else its derivative needs: scalars, the original shape
// for reshape, the winning indices for max/min. Ops are only recorded when the
// output requires grad, so graphs built from constants cost nothing.
//
// Variants never hold the output tensor itself. Rules that need the output
// (tanh, sigmoid, exp, sqrt, tan) read it from the node being processed during
// the backward walk, which keeps the graph free of reference cycles.

use std::fmt;

use crate::dtype::WithDType;
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Unique identifier for a tensor. Used as keys during the backward walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) u64);

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorId {
    /// Generate a new unique tensor ID (uses a global atomic counter).
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Element-wise tensor-tensor operations (with broadcasting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Tensor-scalar operations. `RSub` and `RDiv` are the reflected forms
/// `k - a` and `k / a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOp {
    Add,
    Sub,
    Mul,
    Div,
    RSub,
    RDiv,
}

/// Element-wise single-input operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Relu,
    Tanh,
    Sigmoid,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tan,
}

/// Reductions. Max and Min record the winning element per output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
}

/// Losses. Each reduces a prediction/target pair to a shape-[1] tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossOp {
    Mse,
    Mae,
    Bce,
}

/// Reduction axis: everything, or one dimension (which is dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Full,
    Dim(usize),
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Full => write!(f, "full"),
            Axis::Dim(d) => write!(f, "{}", d),
        }
    }
}

impl From<usize> for Axis {
    fn from(d: usize) -> Self {
        Axis::Dim(d)
    }
}

impl From<Option<usize>> for Axis {
    /// `None` reduces over every element.
    fn from(d: Option<usize>) -> Self {
        d.map_or(Axis::Full, Axis::Dim)
    }
}

/// Records the operation that produced a tensor, storing references to inputs.
#[derive(Clone)]
pub enum Op<T: WithDType> {
    /// No operation: this is a leaf tensor (input data or trainable parameter).
    None,

    /// Element-wise binary with broadcasting: result = op(lhs, rhs)
    Binary {
        lhs: Tensor<T>,
        rhs: Tensor<T>,
        op: BinaryOp,
    },

    /// Tensor-scalar: result = op(input, scalar)
    Scalar {
        input: Tensor<T>,
        scalar: T,
        op: ScalarOp,
    },

    /// Element-wise unary: result = op(input)
    Unary { input: Tensor<T>, op: UnaryOp },

    /// result = input ^ exponent
    Powf { input: Tensor<T>, exponent: f64 },

    /// Reduction along `axis`. `indices` holds, per output element, the flat
    /// index of the input element that won a max/min (empty for sum/mean).
    Reduce {
        input: Tensor<T>,
        op: ReduceOp,
        axis: Axis,
        indices: Vec<usize>,
    },

    /// 2-D matrix multiplication: result = lhs @ rhs
    Matmul { lhs: Tensor<T>, rhs: Tensor<T> },

    /// 2-D transpose
    Transpose { input: Tensor<T> },

    /// Same elements, different shape. src_shape lets backward reshape back.
    Reshape { input: Tensor<T>, src_shape: Shape },

    /// loss(prediction, target) reduced to a single element
    Loss {
        prediction: Tensor<T>,
        target: Tensor<T>,
        op: LossOp,
    },
}

impl<T: WithDType> fmt::Debug for Op<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::None => write!(f, "None"),
            Op::Binary { lhs, rhs, op } => {
                write!(f, "Binary({:?}, id={}, id={})", op, lhs.id(), rhs.id())
            }
            Op::Scalar { input, scalar, op } => {
                write!(f, "Scalar({:?}, {}, id={})", op, scalar, input.id())
            }
            Op::Unary { input, op } => write!(f, "Unary({:?}, id={})", op, input.id()),
            Op::Powf { input, exponent } => {
                write!(f, "Powf({}, id={})", exponent, input.id())
            }
            Op::Reduce {
                input, op, axis, ..
            } => write!(f, "Reduce({:?}, axis={}, id={})", op, axis, input.id()),
            Op::Matmul { lhs, rhs } => write!(f, "Matmul(id={}, id={})", lhs.id(), rhs.id()),
            Op::Transpose { input } => write!(f, "Transpose(id={})", input.id()),
            Op::Reshape { input, src_shape } => {
                write!(f, "Reshape({} → {}, id={})", src_shape, input.shape(), input.id())
            }
            Op::Loss {
                prediction,
                target,
                op,
            } => write!(
                f,
                "Loss({:?}, prediction id={}, target id={})",
                op,
                prediction.id(),
                target.id()
            ),
        }
    }
}

impl<T: WithDType> Op<T> {
    /// Return references to all input tensors of this operation.
    /// These are the tensor's parents in the graph.
    pub fn inputs(&self) -> Vec<&Tensor<T>> {
        match self {
            Op::None => vec![],
            Op::Binary { lhs, rhs, .. } | Op::Matmul { lhs, rhs } => vec![lhs, rhs],
            Op::Loss {
                prediction, target, ..
            } => vec![prediction, target],
            Op::Scalar { input, .. }
            | Op::Unary { input, .. }
            | Op::Powf { input, .. }
            | Op::Reduce { input, .. }
            | Op::Transpose { input }
            | Op::Reshape { input, .. } => vec![input],
        }
    }

    /// Name of the backward rule, as it appears in trace spans.
    pub fn backward_name(&self) -> &'static str {
        match self {
            Op::None => "Leaf",
            Op::Binary { op, .. } => match op {
                BinaryOp::Add => "AddBackward",
                BinaryOp::Sub => "SubBackward",
                BinaryOp::Mul => "MulBackward",
                BinaryOp::Div => "DivBackward",
            },
            Op::Scalar { op, .. } => match op {
                ScalarOp::Add => "AddScalarBackward",
                ScalarOp::Sub => "SubScalarBackward",
                ScalarOp::Mul => "MulScalarBackward",
                ScalarOp::Div => "DivScalarBackward",
                ScalarOp::RSub => "ScalarSubBackward",
                ScalarOp::RDiv => "ScalarDivBackward",
            },
            Op::Unary { op, .. } => match op {
                UnaryOp::Neg => "NegBackward",
                UnaryOp::Relu => "ReluBackward",
                UnaryOp::Tanh => "TanhBackward",
                UnaryOp::Sigmoid => "SigmoidBackward",
                UnaryOp::Exp => "ExpBackward",
                UnaryOp::Log => "LogBackward",
                UnaryOp::Sqrt => "SqrtBackward",
                UnaryOp::Sin => "SinBackward",
                UnaryOp::Cos => "CosBackward",
                UnaryOp::Tan => "TanBackward",
            },
            Op::Powf { .. } => "PowBackward",
            Op::Reduce { op, .. } => match op {
                ReduceOp::Sum => "SumBackward",
                ReduceOp::Mean => "MeanBackward",
                ReduceOp::Max => "MaxBackward",
                ReduceOp::Min => "MinBackward",
            },
            Op::Matmul { .. } => "MatmulBackward",
            Op::Transpose { .. } => "TransposeBackward",
            Op::Reshape { .. } => "ReshapeBackward",
            Op::Loss { op, .. } => match op {
                LossOp::Mse => "MseLossBackward",
                LossOp::Mae => "MaeLossBackward",
                LossOp::Bce => "BceLossBackward",
            },
        }
    }
}
