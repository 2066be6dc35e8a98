// Dense kernels — the array engine under the autograd graph
//
// Everything here works on plain contiguous row-major buffers (`&[T]` plus a
// Shape) and knows nothing about gradients. Tensor methods validate their
// arguments, call into these kernels to compute output data, and then record
// the graph node. backprop.rs uses the same kernels to compute gradients.
//
// Buffers are reserved with `try_reserve_exact` so that an impossible
// allocation is reported as Error::Allocation instead of aborting.
//
// KERNELS:
//
//   alloc / collect        — fallible buffer construction
//   try_collect            — same, for checked element arithmetic
//   expand                 — materialize a buffer at a broadcast shape
//   binary_map             — element-wise op of two buffers with broadcasting
//   unbroadcast            — sum a broadcast gradient back to an operand shape
//   sum_axis               — sum along one axis (the axis is dropped)
//   extremum               — max/min over FULL or axis 0, with winner indices
//   replicate_axis         — inverse of sum_axis: copy along a removed axis
//   matmul / transpose2d   — 2-D linear algebra

use crate::dtype::WithDType;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::op::Axis;
use crate::shape::Shape;

/// Allocate a buffer of `n` copies of `value`.
pub fn alloc<T: Clone>(n: usize, value: T) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| Error::Allocation { elements: n })?;
    v.resize(n, value);
    Ok(v)
}

/// Collect an exact-size iterator into a freshly reserved buffer.
pub fn collect<T, I>(iter: I) -> Result<Vec<T>>
where
    I: ExactSizeIterator<Item = T>,
{
    let n = iter.len();
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| Error::Allocation { elements: n })?;
    v.extend(iter);
    Ok(v)
}

/// Collect checked element results. The first `None` is reported as an
/// overflow in `op`.
pub fn try_collect<T, I>(iter: I, op: &'static str) -> Result<Vec<T>>
where
    I: ExactSizeIterator<Item = Option<T>>,
{
    let n = iter.len();
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| Error::Allocation { elements: n })?;
    for item in iter {
        v.push(item.ok_or(Error::Overflow { op })?);
    }
    Ok(v)
}

/// Materialize `data` (of shape `src`) at the broadcast shape `target`.
///
/// Dimensions that are 1 (or missing) in `src` are replicated; matching
/// dimensions are copied through the source stride. When the shapes already
/// match this is a plain copy.
pub fn expand<T: Copy>(data: &[T], src: &Shape, target: &Shape) -> Result<Vec<T>> {
    if src == target {
        return collect(data.iter().copied());
    }
    let layout = Layout::broadcast(src, target);
    collect(layout.strided_indices().map(|i| data[i]))
}

/// Element-wise `f(lhs, rhs)` where both buffers are read at `out_shape`,
/// the broadcast of their shapes. `f` returns `None` on overflow.
pub fn binary_map<T: Copy, F>(
    lhs: &[T],
    lhs_shape: &Shape,
    rhs: &[T],
    rhs_shape: &Shape,
    out_shape: &Shape,
    op: &'static str,
    f: F,
) -> Result<Vec<T>>
where
    F: Fn(T, T) -> Option<T>,
{
    if lhs_shape == rhs_shape {
        let pairs = lhs.iter().zip(rhs.iter()).map(|(&a, &b)| f(a, b));
        return try_collect(pairs, op);
    }
    let li = Layout::broadcast(lhs_shape, out_shape).strided_indices();
    let ri = Layout::broadcast(rhs_shape, out_shape).strided_indices();
    try_collect(li.zip(ri).map(|(i, j)| f(lhs[i], rhs[j])), op)
}

/// Sum along `axis`, dropping it. The output has the shape
/// `shape.without_dim(axis)`.
pub fn sum_axis<T: WithDType>(data: &[T], shape: &Shape, axis: usize) -> Result<Vec<T>> {
    let dims = shape.dims();
    let outer: usize = dims[..axis].iter().product();
    let n = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();

    let mut out = alloc(outer * inner, T::zero())?;
    for o in 0..outer {
        for k in 0..n {
            let base = (o * n + k) * inner;
            for i in 0..inner {
                let slot = &mut out[o * inner + i];
                *slot = slot
                    .try_add(data[base + i])
                    .ok_or(Error::Overflow { op: "sum" })?;
            }
        }
    }
    Ok(out)
}

/// Copy `data` (shaped like `shape` with `axis` removed) along `axis` so the
/// result has `shape`. This is the gradient of `sum_axis`.
pub fn replicate_axis<T: Copy>(data: &[T], shape: &Shape, axis: usize) -> Result<Vec<T>> {
    let dims = shape.dims();
    let n = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();
    collect((0..shape.elem_count()).map(|flat| {
        let o = flat / (n * inner);
        let i = flat % inner;
        data[o * inner + i]
    }))
}

/// Sum a gradient shaped like a broadcast result back to `target`.
///
/// Leading axes are summed away until the ranks agree, then every axis
/// where the target has extent 1 and the gradient does not is summed and
/// kept with extent 1.
pub fn unbroadcast<T: WithDType>(grad: &[T], shape: &Shape, target: &Shape) -> Result<Vec<T>> {
    if shape == target {
        return collect(grad.iter().copied());
    }
    let mut data = grad.to_vec();
    let mut dims = shape.dims().to_vec();

    while dims.len() > target.rank() {
        data = sum_axis(&data, &Shape::new(dims.clone()), 0)?;
        dims.remove(0);
    }
    for (axis, &t) in target.dims().iter().enumerate() {
        if t == 1 && dims[axis] > 1 {
            data = sum_axis(&data, &Shape::new(dims.clone()), axis)?;
            dims[axis] = 1;
        }
    }
    Ok(data)
}

/// Max or min over FULL or axis 0.
///
/// Returns the reduced values and, per output element, the flat index of the
/// winning input element. `better(candidate, current)` decides whether a
/// candidate replaces the current winner, so a strict comparison keeps the
/// first-seen element on ties.
pub fn extremum<T: WithDType>(
    data: &[T],
    shape: &Shape,
    axis: Axis,
    better: fn(T, T) -> bool,
) -> Result<(Vec<T>, Vec<usize>)> {
    match axis {
        Axis::Full => {
            let mut best = 0;
            for (i, &v) in data.iter().enumerate().skip(1) {
                if better(v, data[best]) {
                    best = i;
                }
            }
            Ok((vec![data[best]], vec![best]))
        }
        Axis::Dim(0) => {
            let n = shape.dims()[0];
            let inner = shape.elem_count() / n;
            let mut indices = collect(0..inner)?;
            for k in 1..n {
                for (i, best) in indices.iter_mut().enumerate() {
                    let candidate = k * inner + i;
                    if better(data[candidate], data[*best]) {
                        *best = candidate;
                    }
                }
            }
            let values = collect(indices.iter().map(|&i| data[i]))?;
            Ok((values, indices))
        }
        Axis::Dim(d) => Err(Error::UnsupportedAxis {
            op: "extremum",
            axis: d.to_string(),
            rank: shape.rank(),
        }),
    }
}

/// `[m, k] @ [k, n]` with the (i, r, j) loop order.
pub fn matmul<T: WithDType>(
    a: &[T],
    b: &[T],
    m: usize,
    k: usize,
    n: usize,
) -> Result<Vec<T>> {
    let mut out = alloc(m * n, T::zero())?;
    for i in 0..m {
        for r in 0..k {
            let av = a[i * k + r];
            for j in 0..n {
                let slot = &mut out[i * n + j];
                *slot = av
                    .try_mul(b[r * n + j])
                    .and_then(|p| slot.try_add(p))
                    .ok_or(Error::Overflow { op: "matmul" })?;
            }
        }
    }
    Ok(out)
}

/// Transpose a `[rows, cols]` buffer into `[cols, rows]`.
pub fn transpose2d<T: Copy>(data: &[T], rows: usize, cols: usize) -> Result<Vec<T>> {
    let layout = Layout::contiguous(Shape::from((rows, cols))).transpose(0, 1)?;
    collect(layout.strided_indices().map(|i| data[i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_row_and_column() {
        let col = [1, 2, 3];
        let out = expand(&col, &Shape::from((3, 1)), &Shape::from((3, 2))).unwrap();
        assert_eq!(out, vec![1, 1, 2, 2, 3, 3]);

        let row = [1, 2];
        let out = expand(&row, &Shape::from(2), &Shape::from((3, 2))).unwrap();
        assert_eq!(out, vec![1, 2, 1, 2, 1, 2]);
    }

    #[test]
    fn test_binary_map_broadcast() {
        let a = [10, 20, 30]; // [3, 1]
        let b = [1, 2, 3, 4]; // [1, 4]
        let out = binary_map(
            &a,
            &Shape::from((3, 1)),
            &b,
            &Shape::from((1, 4)),
            &Shape::from((3, 4)),
            "add",
            |x: i32, y| x.checked_add(y),
        )
        .unwrap();
        assert_eq!(out, vec![11, 12, 13, 14, 21, 22, 23, 24, 31, 32, 33, 34]);
    }

    #[test]
    fn test_integer_overflow_is_reported() {
        let s = Shape::from(2);
        let err = binary_map(&[i32::MAX, 1], &s, &[1, 1], &s, &s, "add", |x, y| {
            x.checked_add(y)
        });
        assert!(matches!(err, Err(Error::Overflow { op: "add" })));

        let err = sum_axis(&[i32::MAX, 1], &Shape::from((2, 1)), 0);
        assert!(matches!(err, Err(Error::Overflow { op: "sum" })));

        let err = matmul(&[i32::MAX, 2], &[2, 0], 1, 2, 1);
        assert!(matches!(err, Err(Error::Overflow { op: "matmul" })));
    }

    #[test]
    fn test_sum_axis() {
        // [[1, 2, 3], [4, 5, 6]]
        let data = [1, 2, 3, 4, 5, 6];
        let s = Shape::from((2, 3));
        assert_eq!(sum_axis(&data, &s, 0).unwrap(), vec![5, 7, 9]);
        assert_eq!(sum_axis(&data, &s, 1).unwrap(), vec![6, 15]);
    }

    #[test]
    fn test_replicate_axis_inverts_shape_of_sum() {
        let s = Shape::from((2, 3));
        assert_eq!(
            replicate_axis(&[1, 2, 3], &s, 0).unwrap(),
            vec![1, 2, 3, 1, 2, 3]
        );
        assert_eq!(
            replicate_axis(&[7, 8], &s, 1).unwrap(),
            vec![7, 7, 7, 8, 8, 8]
        );
    }

    #[test]
    fn test_unbroadcast() {
        let grad = [1.0f64; 12];
        let s = Shape::from((3, 4));
        assert_eq!(
            unbroadcast(&grad, &s, &Shape::from((3, 1))).unwrap(),
            vec![4.0, 4.0, 4.0]
        );
        assert_eq!(
            unbroadcast(&grad, &s, &Shape::from((1, 4))).unwrap(),
            vec![3.0; 4]
        );
        assert_eq!(unbroadcast(&grad, &s, &Shape::from(4)).unwrap(), vec![3.0; 4]);
        assert_eq!(
            unbroadcast(&grad, &Shape::from((2, 3, 2)), &Shape::from((1, 1)))
                .unwrap(),
            vec![12.0]
        );
    }

    #[test]
    fn test_extremum_ties_keep_first() {
        let data = [3, 7, 7, 1];
        let (v, idx) = extremum(&data, &Shape::from(4), Axis::Full, |a, b| a > b).unwrap();
        assert_eq!(v, vec![7]);
        assert_eq!(idx, vec![1]);

        // [[1, 9], [5, 9]] along axis 0
        let data = [1, 9, 5, 9];
        let (v, idx) =
            extremum(&data, &Shape::from((2, 2)), Axis::Dim(0), |a, b| a > b).unwrap();
        assert_eq!(v, vec![5, 9]);
        assert_eq!(idx, vec![2, 1]);

        let err = extremum(&data, &Shape::from((2, 2)), Axis::Dim(1), |a, b| a > b);
        assert!(matches!(err, Err(Error::UnsupportedAxis { .. })));
    }

    #[test]
    fn test_matmul_and_transpose() {
        let a = [1, 2, 3, 4];
        let b = [5, 6, 7, 8];
        assert_eq!(matmul(&a, &b, 2, 2, 2).unwrap(), vec![19, 22, 43, 50]);
        assert_eq!(
            transpose2d(&[1, 2, 3, 4, 5, 6], 2, 3).unwrap(),
            vec![1, 4, 2, 5, 3, 6]
        );
    }

    #[test]
    fn test_alloc_failure_is_reported() {
        let err = alloc(usize::MAX, 0u64);
        assert!(matches!(err, Err(Error::Allocation { .. })));
    }
}
