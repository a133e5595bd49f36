//! Borrowed row-major matrix views.

use crate::error::{invalid_argument, Result};

/// Checks `len >= rows*ld` and `ld >= cols` (the latter only when the
/// matrix has rows).
fn check_extent(name: &str, len: usize, rows: usize, cols: usize, ld: usize) -> Result<()> {
    if rows > 0 && ld < cols {
        return Err(invalid_argument(format!(
            "leading dimension of {name} ({ld}) must be >= its column count ({cols})"
        )));
    }
    let needed = rows
        .checked_mul(ld)
        .ok_or_else(|| invalid_argument(format!("{name}: {rows} rows of stride {ld} overflow")))?;
    if len < needed {
        return Err(invalid_argument(format!(
            "{name} holds {len} elements, {rows} rows with leading dimension {ld} need {needed}"
        )));
    }
    Ok(())
}

/// A read-only `rows × cols` matrix whose row `r` starts at `r * ld`.
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a> {
    data: &'a [f64],
    rows: usize,
    cols: usize,
    ld: usize,
}

impl<'a> MatrixView<'a> {
    /// Wraps `data`, which must hold at least `rows * ld` elements.
    pub fn new(name: &str, data: &'a [f64], rows: usize, cols: usize, ld: usize) -> Result<Self> {
        check_extent(name, data.len(), rows, cols, ld)?;
        Ok(MatrixView {
            data,
            rows,
            cols,
            ld,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn ld(&self) -> usize {
        self.ld
    }

    /// The `rows × cols` sub-matrix with top-left corner `(row, col)`.
    ///
    /// Sub-views only need their last row to be complete, so they may end
    /// before `rows * ld`.
    ///
    /// # Panics
    ///
    /// Panics if the block reaches outside this view.
    pub fn block(&self, row: usize, col: usize, rows: usize, cols: usize) -> MatrixView<'a> {
        assert!(
            row + rows <= self.rows && col + cols <= self.cols,
            "block ({row}, {col}) of {rows}x{cols} outside {}x{} matrix",
            self.rows,
            self.cols
        );
        let data = if rows == 0 {
            &self.data[..0]
        } else {
            &self.data[row * self.ld + col..(row + rows - 1) * self.ld + col + cols]
        };
        MatrixView {
            data,
            rows,
            cols,
            ld: self.ld,
        }
    }

    /// The `cols` logical elements of row `r`.
    #[inline(always)]
    pub fn row(&self, r: usize) -> &'a [f64] {
        let start = r * self.ld;
        &self.data[start..start + self.cols]
    }

    #[inline(always)]
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.row(r)[c]
    }
}

/// A mutable `rows × cols` matrix whose row `r` starts at `r * ld`.
#[derive(Debug)]
pub struct MatrixViewMut<'a> {
    data: &'a mut [f64],
    rows: usize,
    cols: usize,
    ld: usize,
}

impl<'a> MatrixViewMut<'a> {
    /// Wraps `data`, which must hold at least `rows * ld` elements.
    pub fn new(
        name: &str,
        data: &'a mut [f64],
        rows: usize,
        cols: usize,
        ld: usize,
    ) -> Result<Self> {
        check_extent(name, data.len(), rows, cols, ld)?;
        Ok(MatrixViewMut {
            data,
            rows,
            cols,
            ld,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn ld(&self) -> usize {
        self.ld
    }

    #[inline(always)]
    pub fn row_mut(&mut self, r: usize) -> &mut [f64] {
        let start = r * self.ld;
        &mut self.data[start..start + self.cols]
    }

    /// Storage of the `rows × cols` block at `(row, col)`, from its first
    /// element to the end of its last row. Row `i` of the block starts at
    /// offset `i * ld`.
    ///
    /// # Panics
    ///
    /// Panics if the block reaches outside this view or is empty.
    pub fn block_mut(&mut self, row: usize, col: usize, rows: usize, cols: usize) -> &mut [f64] {
        assert!(
            rows > 0 && row + rows <= self.rows && col + cols <= self.cols,
            "block ({row}, {col}) of {rows}x{cols} outside {}x{} matrix",
            self.rows,
            self.cols
        );
        &mut self.data[row * self.ld + col..(row + rows - 1) * self.ld + col + cols]
    }

    /// `C = beta * C` over the logical extent.
    ///
    /// `beta == 0` writes exact zeros, so NaN or infinity already in C does
    /// not survive; `beta == 1` leaves C untouched.
    pub fn scale(&mut self, beta: f64) {
        if beta == 1.0 {
            return;
        }
        for r in 0..self.rows {
            let row = self.row_mut(r);
            if beta == 0.0 {
                row.fill(0.0);
            } else {
                row.iter_mut().for_each(|x| *x *= beta);
            }
        }
    }
}
