use crate::error::Result;
use crate::shape::Shape;

// Layout — How a logical shape maps onto a flat buffer
//
// Tensor buffers are always contiguous and row-major. A Layout is the
// *reading plan* the dense kernels use to walk a buffer as if it had another
// shape:
//
// 1. **Strides**: How many elements to skip in the flat buffer to move one
//    step along each dimension. A contiguous [2,3] matrix has strides [3,1].
//
// 2. **Broadcast**: A size-1 (or missing) dimension read with stride 0 repeats
//    its element along that dimension. [3,1] read as [3,4] has strides [1,0].
//
// 3. **Transpose**: Swap shape and strides. [2,3] with strides [3,1] read as
//    its transpose is [3,2] with strides [1,3]; walking that layout in
//    logical order and copying yields the transposed buffer.

/// Layout describes how a logical shape maps to flat storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
}

impl Layout {
    /// Create a new contiguous layout for the given shape.
    pub fn contiguous(shape: Shape) -> Self {
        let strides = shape.stride_contiguous();
        Layout { shape, strides }
    }

    /// Create a layout with explicit strides.
    pub fn new(shape: Shape, strides: Vec<usize>) -> Self {
        Layout { shape, strides }
    }

    /// Read a contiguous buffer of shape `src` as the broadcast shape `target`.
    /// `target` must already be the broadcast of `src` with something.
    pub fn broadcast(src: &Shape, target: &Shape) -> Self {
        Layout {
            shape: target.clone(),
            strides: src.broadcast_strides(target),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// Whether walking this layout visits the buffer in plain order.
    pub fn is_contiguous(&self) -> bool {
        self.strides == self.shape.stride_contiguous()
    }

    /// Transpose two dimensions. Returns a new layout with swapped shape/strides.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Layout> {
        let rank = self.rank();
        if dim0 >= rank || dim1 >= rank {
            return Err(crate::Error::RankMismatch {
                op: "transpose",
                expected: dim0.max(dim1) + 1,
                got: rank,
            });
        }
        let mut new_dims = self.shape.dims().to_vec();
        let mut new_strides = self.strides.clone();
        new_dims.swap(dim0, dim1);
        new_strides.swap(dim0, dim1);
        Ok(Layout::new(Shape::new(new_dims), new_strides))
    }

    /// Flat buffer index for a multi-dimensional coordinate:
    /// `sum(index[i] * stride[i])`.
    pub fn flat_index(&self, index: &[usize]) -> usize {
        index
            .iter()
            .zip(self.strides.iter())
            .map(|(&i, &s)| i * s)
            .sum()
    }

    /// Iterator over the flat buffer index of every logical element, in
    /// row-major logical order.
    pub fn strided_indices(&self) -> StridedIter {
        StridedIter::new(self)
    }
}

// StridedIter — Iterates over flat buffer indices respecting strides
//
// For a contiguous layout this just counts 0, 1, 2, 3, ...
// For a broadcast or transposed layout it revisits or jumps around the
// buffer following the strides.

/// Iterator that yields flat buffer indices for each element of a Layout.
pub struct StridedIter {
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    /// Flat index of `current`, maintained incrementally.
    flat: usize,
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(layout: &Layout) -> Self {
        StridedIter {
            current: vec![0; layout.rank()],
            dims: layout.dims().to_vec(),
            strides: layout.strides().to_vec(),
            flat: 0,
            remaining: layout.elem_count(),
            started: false,
        }
    }

    /// Advance the multi-dimensional index by one (rightmost dimension first).
    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            self.flat += self.strides[i];
            if self.current[i] < self.dims[i] {
                return;
            }
            self.flat -= self.current[i] * self.strides[i];
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.flat)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}
