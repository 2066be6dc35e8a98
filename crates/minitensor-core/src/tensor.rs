use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::dense;
use crate::dtype::{DType, FloatDType, WithDType};
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::op::{Axis, BinaryOp, LossOp, Op, ReduceOp, ScalarOp, TensorId, UnaryOp};
use crate::shape::Shape;

// Tensor — The fundamental data structure
//
// A Tensor is an n-dimensional array of numbers that optionally takes part in
// reverse-mode automatic differentiation. It:
//
//   1. Owns a contiguous row-major buffer of T (i32, f32 or f64)
//   2. Has a shape with at least one dimension, all positive
//   3. Optionally records the operation that created it (for autograd)
//   4. Optionally holds a gradient, allocated by the first backward() that
//      reaches it and accumulated into by every later one
//
// MEMORY MODEL:
//
//   Tensor<T> is a handle around Arc<TensorInner<T>>. Cloning a Tensor is
//   cheap (just increments a counter) and every clone sees the same data and
//   the same gradient slot. The recorded Op holds handles to the inputs, so a
//   parent lives as long as the last child that references it.
//
//   Data and gradient sit behind RwLocks so that set_data(), zero_grad() and
//   backward() can mutate through &self. A poisoned lock is reported as an
//   error rather than unwrapped.
//
// REQUIRES-GRAD PROPAGATION:
//
//   An op's output requires grad iff any input does. Only then is the Op
//   recorded; otherwise the output is a plain leaf with Op::None.

/// Inner data of a tensor, shared via Arc.
struct TensorInner<T: WithDType> {
    /// Unique identifier for this tensor (used in the backward walk).
    id: TensorId,
    /// Contiguous element buffer. Shared with `detach()`ed handles.
    data: Arc<RwLock<Vec<T>>>,
    /// Shape + row-major strides.
    layout: Layout,
    /// The operation that created this tensor. Op::None for leaves.
    op: Op<T>,
    requires_grad: bool,
    /// Gradient slot. None until the first backward contribution.
    grad: Arc<RwLock<Option<Tensor<T>>>>,
}

/// An n-dimensional array with optional gradient tracking.
///
/// # Example
/// ```
/// use minitensor_core::Tensor;
///
/// let a = Tensor::new(vec![1.0f64, 2.0, 3.0, 4.0], (2, 2), true)?;
/// let b = Tensor::new(vec![5.0f64, 6.0, 7.0, 8.0], (2, 2), true)?;
/// let c = a.matmul(&b)?;
/// c.backward()?;
/// assert_eq!(a.grad()?.unwrap().to_vec()?, vec![11.0, 15.0, 11.0, 15.0]);
/// # Ok::<(), minitensor_core::Error>(())
/// ```
pub struct Tensor<T: WithDType> {
    inner: Arc<TensorInner<T>>,
}

// Manual Clone: Arc::clone is cheap (just increment refcount).
impl<T: WithDType> Clone for Tensor<T> {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: WithDType> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(id={}, shape={}, dtype={}, op={:?})",
            self.inner.id,
            self.inner.layout.shape(),
            T::DTYPE,
            self.inner.op,
        )
    }
}

impl<T: WithDType> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(dtype={}, shape={}, requires_grad={})",
            T::DTYPE,
            self.shape(),
            self.inner.requires_grad
        )
    }
}

/// Nested representation of a tensor's data, mirroring its shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<T> {
    Scalar(T),
    List(Vec<Nested<T>>),
}

impl<T: WithDType> Tensor<T> {
    // Internal constructors

    /// Create a tensor from a buffer whose length already matches `shape`.
    pub(crate) fn from_parts(data: Vec<T>, shape: Shape, op: Op<T>, requires_grad: bool) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                data: Arc::new(RwLock::new(data)),
                layout: Layout::contiguous(shape),
                op,
                requires_grad,
                grad: Arc::new(RwLock::new(None)),
            }),
        }
    }

    /// Output of a forward op: requires grad iff any input does, and the op
    /// is only built and recorded in that case.
    fn derived(
        data: Vec<T>,
        shape: Shape,
        requires_grad: bool,
        op: impl FnOnce() -> Op<T>,
    ) -> Self {
        let op = if requires_grad { op() } else { Op::None };
        Self::from_parts(data, shape, op, requires_grad)
    }

    // Creation methods

    /// Create a tensor from a flat row-major buffer.
    ///
    /// Fails when the shape has no dimensions or a zero dimension, or when
    /// `data.len()` differs from the shape's element count.
    pub fn new(data: Vec<T>, shape: impl Into<Shape>, requires_grad: bool) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        let expected = shape.elem_count();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        Ok(Self::from_parts(data, shape, Op::None, requires_grad))
    }

    /// Create a tensor by copying a slice.
    pub fn from_slice(data: &[T], shape: impl Into<Shape>, requires_grad: bool) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        let expected = shape.elem_count();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        let data = dense::collect(data.iter().copied())?;
        Ok(Self::from_parts(data, shape, Op::None, requires_grad))
    }

    /// Create a tensor filled with `value`.
    pub fn full(shape: impl Into<Shape>, value: T, requires_grad: bool) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        let data = dense::alloc(shape.elem_count(), value)?;
        Ok(Self::from_parts(data, shape, Op::None, requires_grad))
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>, requires_grad: bool) -> Result<Self> {
        Self::full(shape, T::zero(), requires_grad)
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: impl Into<Shape>, requires_grad: bool) -> Result<Self> {
        Self::full(shape, T::one(), requires_grad)
    }

    /// Zeros with the same shape as `self`; never requires grad.
    pub fn zeros_like(&self) -> Result<Self> {
        Self::zeros(self.shape(), false)
    }

    /// Ones with the same shape as `self`; never requires grad.
    pub fn ones_like(&self) -> Result<Self> {
        Self::ones(self.shape(), false)
    }

    /// Same data, id and gradient slot, with gradient tracking switched on
    /// or off. Switching it off also drops the recorded op.
    pub fn set_requires_grad(self, requires_grad: bool) -> Self {
        let op = if requires_grad {
            self.inner.op.clone()
        } else {
            Op::None
        };
        Tensor {
            inner: Arc::new(TensorInner {
                id: self.inner.id,
                data: Arc::clone(&self.inner.data),
                layout: self.inner.layout.clone(),
                op,
                requires_grad,
                grad: Arc::clone(&self.inner.grad),
            }),
        }
    }

    /// Create a detached handle: same data buffer, no gradient tracking,
    /// fresh id and empty gradient slot.
    pub fn detach(&self) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                data: Arc::clone(&self.inner.data),
                layout: self.inner.layout.clone(),
                op: Op::None,
                requires_grad: false,
                grad: Arc::new(RwLock::new(None)),
            }),
        }
    }

    // Accessors

    /// Unique tensor ID.
    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    /// The shape of this tensor.
    pub fn shape(&self) -> &Shape {
        self.inner.layout.shape()
    }

    /// The dimensions as a slice (shortcut for shape().dims()).
    pub fn dims(&self) -> &[usize] {
        self.inner.layout.dims()
    }

    /// Number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.inner.layout.rank()
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.inner.layout.elem_count()
    }

    /// Row-major strides.
    pub fn strides(&self) -> &[usize] {
        self.inner.layout.strides()
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad
    }

    /// Whether this tensor was created directly rather than by an op.
    pub fn is_leaf(&self) -> bool {
        matches!(self.inner.op, Op::None)
    }

    /// The op that created this tensor (its grad function).
    pub fn op(&self) -> &Op<T> {
        &self.inner.op
    }

    /// The tensors this one was computed from. Empty for leaves.
    pub fn parents(&self) -> Vec<Tensor<T>> {
        self.inner.op.inputs().into_iter().cloned().collect()
    }

    pub(crate) fn read_data(&self) -> Result<RwLockReadGuard<'_, Vec<T>>> {
        self.inner
            .data
            .read()
            .map_err(|_| Error::msg("tensor data lock poisoned"))
    }

    fn write_data(&self) -> Result<RwLockWriteGuard<'_, Vec<T>>> {
        self.inner
            .data
            .write()
            .map_err(|_| Error::msg("tensor data lock poisoned"))
    }

    fn read_grad(&self) -> Result<RwLockReadGuard<'_, Option<Tensor<T>>>> {
        self.inner
            .grad
            .read()
            .map_err(|_| Error::msg("tensor grad lock poisoned"))
    }

    fn write_grad(&self) -> Result<RwLockWriteGuard<'_, Option<Tensor<T>>>> {
        self.inner
            .grad
            .write()
            .map_err(|_| Error::msg("tensor grad lock poisoned"))
    }

    // Data access

    /// Copy all elements out as a flat row-major Vec.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let data = self.read_data()?;
        dense::collect(data.iter().copied())
    }

    /// Copy all elements out, nested to mirror the shape.
    pub fn to_nested(&self) -> Result<Nested<T>> {
        fn build<T: Copy>(data: &[T], dims: &[usize]) -> Nested<T> {
            match dims.split_first() {
                None => Nested::Scalar(data[0]),
                Some((&n, rest)) => {
                    let chunk = data.len() / n;
                    Nested::List(
                        (0..n)
                            .map(|i| build(&data[i * chunk..(i + 1) * chunk], rest))
                            .collect(),
                    )
                }
            }
        }
        let data = self.read_data()?;
        Ok(build(&data, self.dims()))
    }

    /// The single element of a one-element tensor.
    pub fn to_scalar(&self) -> Result<T> {
        if self.elem_count() != 1 {
            return Err(Error::ShapeMismatch {
                expected: Shape::from(1),
                got: self.shape().clone(),
            });
        }
        Ok(self.read_data()?[0])
    }

    /// Element at a multi-dimensional coordinate.
    pub fn get(&self, index: &[usize]) -> Result<T> {
        let in_bounds = index.len() == self.rank()
            && index.iter().zip(self.dims()).all(|(&i, &d)| i < d);
        if !in_bounds {
            return Err(Error::msg(format!(
                "index {:?} out of bounds for shape {}",
                index,
                self.shape()
            )));
        }
        let flat = self.inner.layout.flat_index(index);
        Ok(self.read_data()?[flat])
    }

    // In-place mutation

    /// Overwrite the data buffer in place (e.g. a parameter update).
    ///
    /// Every clone of this tensor, including the one held by a module, sees
    /// the new values. The shape is unchanged, so `data` must have exactly
    /// `elem_count()` elements. The graph and gradient are left alone.
    pub fn set_data(&self, data: &[T]) -> Result<()> {
        let expected = self.elem_count();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape: self.shape().clone(),
                expected,
                got: data.len(),
            });
        }
        let mut guard = self.write_data()?;
        guard.copy_from_slice(data);
        Ok(())
    }

    // Gradient slot

    /// The accumulated gradient, if any backward pass has reached this tensor.
    ///
    /// The returned tensor shares its buffer with the slot, so a later
    /// `zero_grad()` or `backward()` is visible through it.
    pub fn grad(&self) -> Result<Option<Tensor<T>>> {
        Ok(self.read_grad()?.clone())
    }

    /// Reset the gradient to zeros in place, keeping the allocation.
    /// Does nothing if no gradient has been allocated.
    pub fn zero_grad(&self) -> Result<()> {
        let slot = self.read_grad()?;
        if let Some(grad) = slot.as_ref() {
            grad.write_data()?.iter_mut().for_each(|v| *v = T::zero());
        }
        Ok(())
    }

    /// Current gradient values, or ones if no gradient exists yet.
    pub(crate) fn grad_or_ones(&self) -> Result<Vec<T>> {
        match self.read_grad()?.as_ref() {
            Some(grad) => grad.to_vec(),
            None => dense::alloc(self.elem_count(), T::one()),
        }
    }

    /// Allocate the gradient as ones if absent.
    pub(crate) fn seed_grad(&self) -> Result<()> {
        let mut slot = self.write_grad()?;
        if slot.is_none() {
            let ones = dense::alloc(self.elem_count(), T::one())?;
            *slot = Some(Self::from_parts(ones, self.shape().clone(), Op::None, false));
        }
        Ok(())
    }

    /// Add `contribution` into the gradient slot, allocating it on first use.
    pub(crate) fn accumulate_grad(&self, contribution: &[T]) -> Result<()> {
        let mut slot = self.write_grad()?;
        match slot.as_ref() {
            Some(grad) => {
                let mut data = grad.write_data()?;
                for (g, &c) in data.iter_mut().zip(contribution) {
                    *g = g.try_add(c).ok_or(Error::Overflow { op: "backward" })?;
                }
            }
            None => {
                tracing::trace!(id = %self.id(), shape = %self.shape(), "allocating gradient");
                let data = dense::collect(contribution.iter().copied())?;
                *slot = Some(Self::from_parts(data, self.shape().clone(), Op::None, false));
            }
        }
        Ok(())
    }

    // Arithmetic operations (with broadcasting)

    /// Element-wise addition: self + rhs.
    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Add)
    }

    /// Element-wise subtraction: self - rhs.
    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Sub)
    }

    /// Element-wise multiplication: self * rhs.
    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Mul)
    }

    /// Element-wise division: self / rhs. Fails if any element of rhs is zero.
    pub fn div(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Div)
    }

    /// Generic binary operation dispatch.
    fn binary_op(&self, rhs: &Self, op: BinaryOp) -> Result<Self> {
        let out_shape = Shape::broadcast_shape(self.shape(), rhs.shape())?;
        let lhs_data = self.read_data()?;
        let rhs_data = rhs.read_data()?;
        // Every rhs element is used at least once, so any zero is a zero divisor.
        if op == BinaryOp::Div && rhs_data.iter().any(|&v| v == T::zero()) {
            return Err(Error::DivideByZero { op: "div" });
        }
        let f: fn(T, T) -> Option<T> = match op {
            BinaryOp::Add => T::try_add,
            BinaryOp::Sub => T::try_sub,
            BinaryOp::Mul => T::try_mul,
            BinaryOp::Div => T::try_div,
        };
        let name = match op {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        };
        let data = dense::binary_map(
            &lhs_data,
            self.shape(),
            &rhs_data,
            rhs.shape(),
            &out_shape,
            name,
            f,
        )?;
        let requires_grad = self.requires_grad() || rhs.requires_grad();
        Ok(Self::derived(data, out_shape, requires_grad, || Op::Binary {
            lhs: self.clone(),
            rhs: rhs.clone(),
            op,
        }))
    }

    // Scalar operations

    /// self + k
    pub fn add_scalar(&self, k: T) -> Result<Self> {
        self.scalar_op(k, ScalarOp::Add)
    }

    /// self - k
    pub fn sub_scalar(&self, k: T) -> Result<Self> {
        self.scalar_op(k, ScalarOp::Sub)
    }

    /// self * k
    pub fn mul_scalar(&self, k: T) -> Result<Self> {
        self.scalar_op(k, ScalarOp::Mul)
    }

    /// self / k. Fails if k is zero.
    pub fn div_scalar(&self, k: T) -> Result<Self> {
        self.scalar_op(k, ScalarOp::Div)
    }

    /// k - self
    pub fn rsub_scalar(&self, k: T) -> Result<Self> {
        self.scalar_op(k, ScalarOp::RSub)
    }

    /// k / self. Fails if any element of self is zero.
    pub fn rdiv_scalar(&self, k: T) -> Result<Self> {
        self.scalar_op(k, ScalarOp::RDiv)
    }

    fn scalar_op(&self, k: T, op: ScalarOp) -> Result<Self> {
        let data = self.read_data()?;
        match op {
            ScalarOp::Div if k == T::zero() => {
                return Err(Error::DivideByZero { op: "div_scalar" })
            }
            ScalarOp::RDiv if data.iter().any(|&v| v == T::zero()) => {
                return Err(Error::DivideByZero { op: "rdiv_scalar" })
            }
            _ => {}
        }
        let f: fn(T, T) -> Option<T> = match op {
            ScalarOp::Add => T::try_add,
            ScalarOp::Sub => T::try_sub,
            ScalarOp::Mul => T::try_mul,
            ScalarOp::Div => T::try_div,
            ScalarOp::RSub => |a, k| k.try_sub(a),
            ScalarOp::RDiv => |a, k| k.try_div(a),
        };
        let name = match op {
            ScalarOp::Add => "add_scalar",
            ScalarOp::Sub => "sub_scalar",
            ScalarOp::Mul => "mul_scalar",
            ScalarOp::Div => "div_scalar",
            ScalarOp::RSub => "rsub_scalar",
            ScalarOp::RDiv => "rdiv_scalar",
        };
        let out = dense::try_collect(data.iter().map(|&a| f(a, k)), name)?;
        Ok(Self::derived(
            out,
            self.shape().clone(),
            self.requires_grad(),
            || Op::Scalar {
                input: self.clone(),
                scalar: k,
                op,
            },
        ))
    }

    // Unary operations

    /// Element-wise negation. Fails on `i32::MIN`, which has no negation.
    pub fn neg(&self) -> Result<Self> {
        if self.read_data()?.iter().any(|&x| x.try_neg().is_none()) {
            return Err(Error::Overflow { op: "neg" });
        }
        self.unary_op(UnaryOp::Neg, |x| -x)
    }

    /// ReLU: max(0, x)
    pub fn relu(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Relu, |x| if x > T::zero() { x } else { T::zero() })
    }

    /// Generic unary operation dispatch. Validation is the caller's job.
    fn unary_op(&self, op: UnaryOp, f: impl Fn(T) -> T) -> Result<Self> {
        let data = self.read_data()?;
        let out = dense::collect(data.iter().map(|&x| f(x)))?;
        Ok(Self::derived(
            out,
            self.shape().clone(),
            self.requires_grad(),
            || Op::Unary {
                input: self.clone(),
                op,
            },
        ))
    }

    // Reductions

    /// Sum along `axis` (the axis is dropped) or over everything.
    pub fn sum(&self, axis: impl Into<Axis>) -> Result<Self> {
        self.reduce_op(ReduceOp::Sum, axis.into())
    }

    /// Sum all elements into a shape-[1] tensor.
    pub fn sum_all(&self) -> Result<Self> {
        self.reduce_op(ReduceOp::Sum, Axis::Full)
    }

    /// Mean along `axis` or over everything. Integer tensors truncate.
    pub fn mean(&self, axis: impl Into<Axis>) -> Result<Self> {
        self.reduce_op(ReduceOp::Mean, axis.into())
    }

    pub fn mean_all(&self) -> Result<Self> {
        self.reduce_op(ReduceOp::Mean, Axis::Full)
    }

    /// Maximum over everything or along axis 0. Ties go to the first element.
    pub fn max(&self, axis: impl Into<Axis>) -> Result<Self> {
        self.reduce_op(ReduceOp::Max, axis.into())
    }

    pub fn max_all(&self) -> Result<Self> {
        self.reduce_op(ReduceOp::Max, Axis::Full)
    }

    /// Minimum over everything or along axis 0. Ties go to the first element.
    pub fn min(&self, axis: impl Into<Axis>) -> Result<Self> {
        self.reduce_op(ReduceOp::Min, axis.into())
    }

    pub fn min_all(&self) -> Result<Self> {
        self.reduce_op(ReduceOp::Min, Axis::Full)
    }

    /// Generic reduction dispatch.
    fn reduce_op(&self, op: ReduceOp, axis: Axis) -> Result<Self> {
        let rank = self.rank();
        let unsupported = match axis {
            Axis::Full => false,
            Axis::Dim(d) => d >= rank || (matches!(op, ReduceOp::Max | ReduceOp::Min) && d != 0),
        };
        if unsupported {
            let name = match op {
                ReduceOp::Sum => "sum",
                ReduceOp::Mean => "mean",
                ReduceOp::Max => "max",
                ReduceOp::Min => "min",
            };
            return Err(Error::UnsupportedAxis {
                op: name,
                axis: axis.to_string(),
                rank,
            });
        }

        let out_shape = match axis {
            Axis::Full => Shape::from(1),
            Axis::Dim(d) => self.shape().without_dim(d),
        };
        let data = self.read_data()?;
        let (out, indices) = match op {
            ReduceOp::Sum | ReduceOp::Mean => {
                let (mut out, n) = match axis {
                    Axis::Full => {
                        let mut total = T::zero();
                        for &v in data.iter() {
                            total = total.try_add(v).ok_or(Error::Overflow { op: "sum" })?;
                        }
                        (vec![total], self.elem_count())
                    }
                    Axis::Dim(d) => (dense::sum_axis(&data, self.shape(), d)?, self.dims()[d]),
                };
                if op == ReduceOp::Mean {
                    let n = T::from_usize(n);
                    out.iter_mut().for_each(|v| *v = *v / n);
                }
                (out, Vec::new())
            }
            ReduceOp::Max => dense::extremum(&data, self.shape(), axis, |a, b| a > b)?,
            ReduceOp::Min => dense::extremum(&data, self.shape(), axis, |a, b| a < b)?,
        };
        Ok(Self::derived(out, out_shape, self.requires_grad(), || {
            Op::Reduce {
                input: self.clone(),
                op,
                axis,
                indices,
            }
        }))
    }

    // Linear algebra and shape operations

    /// Matrix multiplication: [m, k] @ [k, n] → [m, n]. Both must be rank 2.
    #[tracing::instrument(level = "trace", skip_all, fields(lhs = %self.shape(), rhs = %rhs.shape()))]
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        for t in [self, rhs] {
            if t.rank() != 2 {
                return Err(Error::RankMismatch {
                    op: "matmul",
                    expected: 2,
                    got: t.rank(),
                });
            }
        }
        let (m, k1) = (self.dims()[0], self.dims()[1]);
        let (k2, n) = (rhs.dims()[0], rhs.dims()[1]);
        if k1 != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
        }
        let a = self.read_data()?;
        let b = rhs.read_data()?;
        let out = dense::matmul(&a, &b, m, k1, n)?;
        let requires_grad = self.requires_grad() || rhs.requires_grad();
        Ok(Self::derived(out, Shape::from((m, n)), requires_grad, || {
            Op::Matmul {
                lhs: self.clone(),
                rhs: rhs.clone(),
            }
        }))
    }

    /// Transpose a rank-2 tensor. The result owns a permuted copy.
    pub fn transpose(&self) -> Result<Self> {
        if self.rank() != 2 {
            return Err(Error::RankMismatch {
                op: "transpose",
                expected: 2,
                got: self.rank(),
            });
        }
        let (rows, cols) = (self.dims()[0], self.dims()[1]);
        let data = self.read_data()?;
        let out = dense::transpose2d(&data, rows, cols)?;
        Ok(Self::derived(
            out,
            Shape::from((cols, rows)),
            self.requires_grad(),
            || Op::Transpose {
                input: self.clone(),
            },
        ))
    }

    /// Shorthand for `transpose()`.
    pub fn t(&self) -> Result<Self> {
        self.transpose()
    }

    /// Reshape to a new shape with the same element count.
    pub fn reshape(&self, new_shape: impl Into<Shape>) -> Result<Self> {
        let new_shape = new_shape.into();
        new_shape.validate()?;
        let src = self.elem_count();
        let dst = new_shape.elem_count();
        if src != dst {
            return Err(Error::ReshapeElementMismatch {
                src,
                dst,
                dst_shape: new_shape,
            });
        }
        let out = self.to_vec()?;
        Ok(Self::derived(out, new_shape, self.requires_grad(), || {
            Op::Reshape {
                input: self.clone(),
                src_shape: self.shape().clone(),
            }
        }))
    }

    /// Materialize this tensor at a broadcast-compatible `target` shape.
    /// Not recorded in the graph.
    pub fn expand(&self, target: impl Into<Shape>) -> Result<Self> {
        let target = target.into();
        target.validate()?;
        let joint = Shape::broadcast_shape(self.shape(), &target)?;
        if joint != target {
            return Err(Error::Broadcast {
                lhs: self.shape().clone(),
                rhs: target,
            });
        }
        let data = self.read_data()?;
        let out = dense::expand(&data, self.shape(), &target)?;
        Ok(Self::from_parts(out, target, Op::None, false))
    }

    /// Sum a broadcast-shaped tensor back down to `target`, the shape it
    /// was expanded from. Not recorded in the graph.
    pub fn unbroadcast(&self, target: impl Into<Shape>) -> Result<Self> {
        let target = target.into();
        target.validate()?;
        let joint = Shape::broadcast_shape(self.shape(), &target)?;
        if &joint != self.shape() {
            return Err(Error::Broadcast {
                lhs: self.shape().clone(),
                rhs: target,
            });
        }
        let data = self.read_data()?;
        let out = dense::unbroadcast(&data, self.shape(), &target)?;
        Ok(Self::from_parts(out, target, Op::None, false))
    }

    // Losses (self is the prediction)

    /// Mean squared error: sum((pred - target)²) / N, shape [1].
    pub fn mse_loss(&self, target: &Self) -> Result<Self> {
        self.loss_op(target, LossOp::Mse)
    }

    /// Mean absolute error: sum(|pred - target|) / N, shape [1].
    pub fn mae_loss(&self, target: &Self) -> Result<Self> {
        self.loss_op(target, LossOp::Mae)
    }

    fn loss_op(&self, target: &Self, op: LossOp) -> Result<Self> {
        if self.shape() != target.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: target.shape().clone(),
            });
        }
        let p = self.read_data()?;
        let y = target.read_data()?;
        let n = T::from_usize(self.elem_count());
        let value = match op {
            LossOp::Mse | LossOp::Mae => {
                let name = if op == LossOp::Mse { "mse_loss" } else { "mae_loss" };
                let mut total = T::zero();
                for (&p, &y) in p.iter().zip(y.iter()) {
                    let term = p.try_sub(y).and_then(|d| {
                        if op == LossOp::Mse {
                            d.try_mul(d)
                        } else if d < T::zero() {
                            d.try_neg()
                        } else {
                            Some(d)
                        }
                    });
                    total = term
                        .and_then(|t| total.try_add(t))
                        .ok_or(Error::Overflow { op: name })?;
                }
                total / n
            }
            LossOp::Bce => {
                if let Some(&bad) = p.iter().find(|&&v| !(v > T::zero() && v < T::one())) {
                    return Err(Error::Domain {
                        op: "bce_loss",
                        value: bad.to_f64(),
                    });
                }
                let total: f64 = p
                    .iter()
                    .zip(y.iter())
                    .map(|(&p, &y)| {
                        let (p, y) = (p.to_f64(), y.to_f64());
                        y * p.ln() + (1.0 - y) * (1.0 - p).ln()
                    })
                    .sum();
                T::from_f64(-total / self.elem_count() as f64)
            }
        };
        let requires_grad = self.requires_grad() || target.requires_grad();
        Ok(Self::derived(vec![value], Shape::from(1), requires_grad, || {
            Op::Loss {
                prediction: self.clone(),
                target: target.clone(),
                op,
            }
        }))
    }

    // Autograd

    /// Backpropagate from this tensor.
    ///
    /// Seeds this tensor's gradient with ones unless it already has one, then
    /// accumulates gradients into every tensor of the graph that requires
    /// grad. Does nothing if this tensor does not require grad. On error no
    /// gradient is modified.
    pub fn backward(&self) -> Result<()> {
        crate::backprop::backward(self)
    }
}

// Floating-point only operations

impl<T: FloatDType> Tensor<T> {
    /// Hyperbolic tangent.
    pub fn tanh(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Tanh, |x| x.tanh())
    }

    /// Sigmoid: 1 / (1 + e^(-x))
    pub fn sigmoid(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Sigmoid, |x| T::one() / (T::one() + (-x).exp()))
    }

    pub fn exp(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Exp, |x| x.exp())
    }

    /// Natural logarithm. Fails on non-positive elements.
    pub fn log(&self) -> Result<Self> {
        self.check_domain("log", |x| x > T::zero())?;
        self.unary_op(UnaryOp::Log, |x| x.ln())
    }

    /// Square root. Fails on negative elements.
    pub fn sqrt(&self) -> Result<Self> {
        self.check_domain("sqrt", |x| x >= T::zero())?;
        self.unary_op(UnaryOp::Sqrt, |x| x.sqrt())
    }

    pub fn sin(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Sin, |x| x.sin())
    }

    pub fn cos(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Cos, |x| x.cos())
    }

    pub fn tan(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Tan, |x| x.tan())
    }

    /// Element-wise power with a constant exponent.
    pub fn powf(&self, exponent: f64) -> Result<Self> {
        let data = self.read_data()?;
        let e = T::from_f64(exponent);
        let out = dense::collect(data.iter().map(|&x| x.powf(e)))?;
        Ok(Self::derived(
            out,
            self.shape().clone(),
            self.requires_grad(),
            || Op::Powf {
                input: self.clone(),
                exponent,
            },
        ))
    }

    fn check_domain(&self, op: &'static str, ok: impl Fn(T) -> bool) -> Result<()> {
        let data = self.read_data()?;
        match data.iter().find(|&&x| !ok(x)) {
            Some(&bad) => Err(Error::Domain {
                op,
                value: bad.to_f64(),
            }),
            None => Ok(()),
        }
    }

    /// Softmax along `dim`, which must be the last axis of a rank-1 or
    /// rank-2 tensor.
    ///
    /// Built from max, sub, exp, sum and div, so gradients flow through
    /// those ops; there is no dedicated backward rule. The max is subtracted
    /// first for numerical stability.
    pub fn softmax(&self, dim: usize) -> Result<Self> {
        let rank = self.rank();
        if rank > 2 || dim + 1 != rank {
            return Err(Error::UnsupportedAxis {
                op: "softmax",
                axis: dim.to_string(),
                rank,
            });
        }
        if rank == 1 {
            return self.softmax_axis0();
        }
        // Rows become columns so the reduction runs along axis 0.
        self.t()?.softmax_axis0()?.t()
    }

    fn softmax_axis0(&self) -> Result<Self> {
        let max = self.max(0)?;
        let exp = self.sub(&max)?.exp()?;
        let sum = exp.sum(0)?;
        exp.div(&sum)
    }

    /// Binary cross-entropy: -mean(y·ln(p) + (1-y)·ln(1-p)), shape [1].
    /// Predictions must lie strictly between 0 and 1.
    pub fn bce_loss(&self, target: &Self) -> Result<Self> {
        self.loss_op(target, LossOp::Bce)
    }
}

// Operator overloading
//
// `&a + &b` and `&a * 2.0` return Result<Tensor<T>>, so they compose with `?`:
//
//   let y = (&(&x * &w)? + &b)?;

macro_rules! tensor_binary_ops {
    ($($trait:ident, $method:ident, $scalar_method:ident;)*) => {
        $(
            impl<T: WithDType> std::ops::$trait<&Tensor<T>> for &Tensor<T> {
                type Output = Result<Tensor<T>>;
                fn $method(self, rhs: &Tensor<T>) -> Self::Output {
                    Tensor::$method(self, rhs)
                }
            }

            impl<T: WithDType> std::ops::$trait<T> for &Tensor<T> {
                type Output = Result<Tensor<T>>;
                fn $method(self, rhs: T) -> Self::Output {
                    self.$scalar_method(rhs)
                }
            }
        )*
    };
}

tensor_binary_ops! {
    Add, add, add_scalar;
    Sub, sub, sub_scalar;
    Mul, mul, mul_scalar;
    Div, div, div_scalar;
}

// Scalar on the left: `2.0 - &t`, `1.0 / &t`. Coherence rules forbid a
// blanket impl over T, so each element type gets its own.
macro_rules! scalar_lhs_ops {
    ($($t:ty),*) => {
        $(
            impl std::ops::Add<&Tensor<$t>> for $t {
                type Output = Result<Tensor<$t>>;
                fn add(self, rhs: &Tensor<$t>) -> Self::Output {
                    rhs.add_scalar(self)
                }
            }

            impl std::ops::Sub<&Tensor<$t>> for $t {
                type Output = Result<Tensor<$t>>;
                fn sub(self, rhs: &Tensor<$t>) -> Self::Output {
                    rhs.rsub_scalar(self)
                }
            }

            impl std::ops::Mul<&Tensor<$t>> for $t {
                type Output = Result<Tensor<$t>>;
                fn mul(self, rhs: &Tensor<$t>) -> Self::Output {
                    rhs.mul_scalar(self)
                }
            }

            impl std::ops::Div<&Tensor<$t>> for $t {
                type Output = Result<Tensor<$t>>;
                fn div(self, rhs: &Tensor<$t>) -> Self::Output {
                    rhs.rdiv_scalar(self)
                }
            }
        )*
    };
}

scalar_lhs_ops!(i32, f32, f64);

impl<T: WithDType> std::ops::Neg for &Tensor<T> {
    type Output = Result<Tensor<T>>;
    fn neg(self) -> Self::Output {
        Tensor::neg(self)
    }
}
