//! Dense column-major matrices and submatrix views.
//!
//! The block-recursive algorithms address submatrices constantly; a view
//! carries `(base, stride, rows, cols)` so a recursive call takes one value
//! instead of six integers. Mutable views can be split into disjoint
//! quadrants, which is what lets the recursion hand independent blocks to
//! different workers.

use std::marker::PhantomData;

use crate::{E, I};

/// An owned dense matrix in column-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    data: Vec<E>,
    rows: I,
    cols: I,
}

impl DenseMatrix {
    pub fn zeros(rows: I, cols: I) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    pub fn from_fn(rows: I, cols: I, mut f: impl FnMut(I, I) -> E) -> Self {
        let mut m = Self::zeros(rows, cols);
        for j in 0..cols {
            for i in 0..rows {
                m.data[i + j * rows] = f(i, j);
            }
        }
        m
    }

    pub fn rows(&self) -> I {
        self.rows
    }

    pub fn cols(&self) -> I {
        self.cols
    }

    pub fn get(&self, i: I, j: I) -> E {
        debug_assert!(i < self.rows && j < self.cols);
        self.data[i + j * self.rows]
    }

    pub fn set(&mut self, i: I, j: I, value: E) {
        debug_assert!(i < self.rows && j < self.cols);
        self.data[i + j * self.rows] = value;
    }

    /// Raw column-major storage.
    pub fn as_slice(&self) -> &[E] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [E] {
        &mut self.data
    }

    pub fn as_view(&self) -> MatView<'_> {
        MatView {
            ptr: self.data.as_ptr(),
            stride: self.rows,
            rows: self.rows,
            cols: self.cols,
            _marker: PhantomData,
        }
    }

    pub fn as_view_mut(&mut self) -> MatViewMut<'_> {
        MatViewMut {
            ptr: self.data.as_mut_ptr(),
            stride: self.rows,
            rows: self.rows,
            cols: self.cols,
            _marker: PhantomData,
        }
    }
}

/// A shared view of a column-major submatrix.
#[derive(Clone, Copy)]
pub struct MatView<'a> {
    ptr: *const E,
    stride: I,
    rows: I,
    cols: I,
    _marker: PhantomData<&'a E>,
}

// The view only reads the elements it spans.
unsafe impl Send for MatView<'_> {}
unsafe impl Sync for MatView<'_> {}

impl<'a> MatView<'a> {
    /// View over a full column-major slice (`stride == rows`).
    pub fn from_slice(data: &'a [E], rows: I, cols: I) -> Self {
        assert!(data.len() >= rows * cols);
        Self {
            ptr: data.as_ptr(),
            stride: rows,
            rows,
            cols,
            _marker: PhantomData,
        }
    }

    pub fn rows(&self) -> I {
        self.rows
    }

    pub fn cols(&self) -> I {
        self.cols
    }

    pub fn get(&self, i: I, j: I) -> E {
        debug_assert!(i < self.rows && j < self.cols);
        unsafe { *self.ptr.add(i + j * self.stride) }
    }

    /// Subview starting at `(ro, co)` spanning `rows × cols`.
    pub fn submatrix(&self, ro: I, co: I, rows: I, cols: I) -> MatView<'a> {
        debug_assert!(ro + rows <= self.rows && co + cols <= self.cols);
        MatView {
            ptr: unsafe { self.ptr.add(ro + co * self.stride) },
            stride: self.stride,
            rows,
            cols,
            _marker: PhantomData,
        }
    }

    pub fn split_rows(&self, at: I) -> (MatView<'a>, MatView<'a>) {
        (
            self.submatrix(0, 0, at, self.cols),
            self.submatrix(at, 0, self.rows - at, self.cols),
        )
    }

    pub fn split_cols(&self, at: I) -> (MatView<'a>, MatView<'a>) {
        (
            self.submatrix(0, 0, self.rows, at),
            self.submatrix(0, at, self.rows, self.cols - at),
        )
    }
}

/// An exclusive view of a column-major submatrix.
///
/// Splitting produces views over disjoint element sets, so the pieces can
/// be handed to different worker threads. All element access goes through
/// the accessors; the raw pointer is never exposed.
pub struct MatViewMut<'a> {
    ptr: *mut E,
    stride: I,
    rows: I,
    cols: I,
    _marker: PhantomData<&'a mut E>,
}

// Exclusive views of disjoint blocks may move across worker threads.
unsafe impl Send for MatViewMut<'_> {}

impl<'a> MatViewMut<'a> {
    /// Mutable view over a full column-major slice (`stride == rows`).
    pub fn from_slice(data: &'a mut [E], rows: I, cols: I) -> Self {
        assert!(data.len() >= rows * cols);
        Self {
            ptr: data.as_mut_ptr(),
            stride: rows,
            rows,
            cols,
            _marker: PhantomData,
        }
    }

    pub fn rows(&self) -> I {
        self.rows
    }

    pub fn cols(&self) -> I {
        self.cols
    }

    pub fn get(&self, i: I, j: I) -> E {
        debug_assert!(i < self.rows && j < self.cols);
        unsafe { *self.ptr.add(i + j * self.stride) }
    }

    pub fn set(&mut self, i: I, j: I, value: E) {
        debug_assert!(i < self.rows && j < self.cols);
        unsafe { *self.ptr.add(i + j * self.stride) = value }
    }

    /// Reborrow with a shorter lifetime.
    pub fn rb(&mut self) -> MatViewMut<'_> {
        MatViewMut {
            ptr: self.ptr,
            stride: self.stride,
            rows: self.rows,
            cols: self.cols,
            _marker: PhantomData,
        }
    }

    /// Shared view of the same block.
    pub fn as_view(&self) -> MatView<'_> {
        MatView {
            ptr: self.ptr,
            stride: self.stride,
            rows: self.rows,
            cols: self.cols,
            _marker: PhantomData,
        }
    }

    /// Exclusive subview starting at `(ro, co)` spanning `rows × cols`.
    pub fn submatrix(self, ro: I, co: I, rows: I, cols: I) -> MatViewMut<'a> {
        debug_assert!(ro + rows <= self.rows && co + cols <= self.cols);
        MatViewMut {
            ptr: unsafe { self.ptr.add(ro + co * self.stride) },
            stride: self.stride,
            rows,
            cols,
            _marker: PhantomData,
        }
    }

    /// Splits into the four quadrants around `(r, c)`:
    /// `(A11, A12, A21, A22)`. The quadrants are disjoint.
    pub fn split_quad(
        self,
        r: I,
        c: I,
    ) -> (
        MatViewMut<'a>,
        MatViewMut<'a>,
        MatViewMut<'a>,
        MatViewMut<'a>,
    ) {
        debug_assert!(r <= self.rows && c <= self.cols);
        let sub = |ro: I, co: I, rows: I, cols: I| MatViewMut {
            ptr: unsafe { self.ptr.add(ro + co * self.stride) },
            stride: self.stride,
            rows,
            cols,
            _marker: PhantomData,
        };
        (
            sub(0, 0, r, c),
            sub(0, c, r, self.cols - c),
            sub(r, 0, self.rows - r, c),
            sub(r, c, self.rows - r, self.cols - c),
        )
    }

    pub fn split_rows(self, at: I) -> (MatViewMut<'a>, MatViewMut<'a>) {
        debug_assert!(at <= self.rows);
        let cols = self.cols;
        let (top, _, bottom, _) = self.split_quad(at, cols);
        (top, bottom)
    }

    pub fn split_cols(self, at: I) -> (MatViewMut<'a>, MatViewMut<'a>) {
        debug_assert!(at <= self.cols);
        let rows = self.rows;
        let (left, right, _, _) = self.split_quad(rows, at);
        (left, right)
    }

    pub fn fill(&mut self, value: E) {
        for j in 0..self.cols {
            for i in 0..self.rows {
                self.set(i, j, value);
            }
        }
    }

    pub fn copy_from(&mut self, src: MatView<'_>) {
        debug_assert!(self.rows == src.rows() && self.cols == src.cols());
        for j in 0..self.cols {
            for i in 0..self.rows {
                self.set(i, j, src.get(i, j));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadrant_split_addresses_disjoint_blocks() {
        let mut m = DenseMatrix::from_fn(5, 5, |i, j| (10 * i + j) as E);
        {
            let (mut a11, mut a12, mut a21, mut a22) = m.as_view_mut().split_quad(3, 3);
            assert_eq!(a11.get(2, 2), 22.0);
            assert_eq!(a12.get(0, 1), 4.0);
            assert_eq!(a21.get(1, 0), 40.0);
            assert_eq!(a22.get(1, 1), 44.0);
            a11.set(0, 0, -1.0);
            a12.set(0, 0, -2.0);
            a21.set(0, 0, -3.0);
            a22.set(0, 0, -4.0);
        }
        assert_eq!(m.get(0, 0), -1.0);
        assert_eq!(m.get(0, 3), -2.0);
        assert_eq!(m.get(3, 0), -3.0);
        assert_eq!(m.get(3, 3), -4.0);
    }

    #[test]
    fn views_share_the_parent_stride() {
        let m = DenseMatrix::from_fn(4, 3, |i, j| (i + 10 * j) as E);
        let v = m.as_view().submatrix(1, 1, 2, 2);
        assert_eq!(v.get(0, 0), 11.0);
        assert_eq!(v.get(1, 1), 22.0);
    }

    #[test]
    fn zero_sized_views_are_permitted() {
        let mut m = DenseMatrix::zeros(3, 3);
        let v = m.as_view_mut().submatrix(3, 3, 0, 0);
        assert_eq!(v.rows(), 0);
        assert_eq!(v.cols(), 0);
    }
}
