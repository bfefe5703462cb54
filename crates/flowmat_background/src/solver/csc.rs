use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CscError {
    #[error("index {index} out of bounds (max {max})")]
    OutOfBoundsIndex { index: usize, max: usize },

    #[error("column pointer {index} is {actual} (expected {expected})")]
    InvalidColumnPointers {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("row indices ({rows}) and values ({values}) length mismatch")]
    RowValueLengthMismatch { rows: usize, values: usize },

    #[error("rows in column {col} not strictly increasing")]
    RowsNotStrictlyIncreasing { col: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim {
    pub nrows: usize,
    pub ncols: usize,
}

/// Compressed sparse column matrix.
///
/// Column pointers bracket each column's slice of the row-index and value
/// arrays; rows are strictly increasing within a column.
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix {
    pub dim: Dim,
    /// len = ncols + 1
    pub col_ptr: Vec<usize>,
    /// len = nnz
    pub rows: Vec<usize>,
    /// len = nnz
    pub vals: Vec<f64>,
}

impl CscMatrix {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            dim: Dim { nrows, ncols },
            col_ptr: vec![0; ncols + 1],
            rows: Vec::new(),
            vals: Vec::new(),
        }
    }

    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    /// (row indices, values) of column j.
    pub fn col(&self, j: usize) -> (&[usize], &[f64]) {
        let (s, e) = (self.col_ptr[j], self.col_ptr[j + 1]);
        (&self.rows[s..e], &self.vals[s..e])
    }

    /// Entry at (i, j); zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (rows, vals) = self.col(j);
        match rows.binary_search(&i) {
            Ok(p) => vals[p],
            Err(_) => 0.0,
        }
    }

    /// y += x * A[:, j]
    pub fn axpy_col(&self, j: usize, x: f64, y: &mut [f64]) {
        let (rows, vals) = self.col(j);
        for (&i, &a) in rows.iter().zip(vals.iter()) {
            y[i] += x * a;
        }
    }

    /// Dense y = A x, skipping zero entries of x.
    pub fn matvec(&self, x: ArrayView1<f64>) -> Array1<f64> {
        debug_assert_eq!(x.len(), self.dim.ncols);
        let mut y = Array1::zeros(self.dim.nrows);
        let y_slice = y.as_slice_mut().expect("freshly allocated dense vector");
        for (j, &xj) in x.iter().enumerate() {
            if xj != 0.0 {
                self.axpy_col(j, xj, y_slice);
            }
        }
        y
    }

    /// Column j as an nrows x 1 matrix.
    pub fn extract_col(&self, j: usize) -> CscMatrix {
        let (rows, vals) = self.col(j);
        CscMatrix {
            dim: Dim {
                nrows: self.dim.nrows,
                ncols: 1,
            },
            col_ptr: vec![0, rows.len()],
            rows: rows.to_vec(),
            vals: vals.to_vec(),
        }
    }

    /// (row, col, value) triples in column-major order -- the wire format.
    pub fn to_triples(&self) -> Vec<(usize, usize, f64)> {
        let mut out = Vec::with_capacity(self.nnz());
        for j in 0..self.dim.ncols {
            let (rows, vals) = self.col(j);
            for (&i, &v) in rows.iter().zip(vals.iter()) {
                out.push((i, j, v));
            }
        }
        out
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.dim.nrows, self.dim.ncols));
        for j in 0..self.dim.ncols {
            let (rows, vals) = self.col(j);
            for (&i, &v) in rows.iter().zip(vals.iter()) {
                out[[i, j]] = v;
            }
        }
        out
    }

    pub fn check_invariants(&self) -> Result<(), CscError> {
        if self.col_ptr.len() != self.dim.ncols + 1 {
            return Err(CscError::InvalidColumnPointers {
                index: 0,
                expected: self.dim.ncols + 1,
                actual: self.col_ptr.len(),
            });
        }
        if self.rows.len() != self.vals.len() {
            return Err(CscError::RowValueLengthMismatch {
                rows: self.rows.len(),
                values: self.vals.len(),
            });
        }
        if *self.col_ptr.last().expect("col_ptr is never empty") != self.nnz() {
            return Err(CscError::InvalidColumnPointers {
                index: self.dim.ncols,
                expected: self.nnz(),
                actual: *self.col_ptr.last().expect("col_ptr is never empty"),
            });
        }
        for j in 0..self.dim.ncols {
            let (s, e) = (self.col_ptr[j], self.col_ptr[j + 1]);
            if s > e {
                return Err(CscError::InvalidColumnPointers {
                    index: j,
                    expected: s,
                    actual: e,
                });
            }
            let mut prev = None;
            for &r in &self.rows[s..e] {
                if r >= self.dim.nrows {
                    return Err(CscError::OutOfBoundsIndex {
                        index: r,
                        max: self.dim.nrows,
                    });
                }
                if prev.is_some_and(|p| r <= p) {
                    return Err(CscError::RowsNotStrictlyIncreasing { col: j });
                }
                prev = Some(r);
            }
        }
        Ok(())
    }
}

/// Triplet accumulator.  Duplicates sum; zeros (input or combined) drop.
#[derive(Debug)]
pub struct CscBuilder {
    dim: Dim,
    /// (col, row, value), unsorted until build.
    entries: Vec<(usize, usize, f64)>,
}

impl CscBuilder {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            dim: Dim { nrows, ncols },
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) -> Result<(), CscError> {
        if row >= self.dim.nrows {
            return Err(CscError::OutOfBoundsIndex {
                index: row,
                max: self.dim.nrows,
            });
        }
        if col >= self.dim.ncols {
            return Err(CscError::OutOfBoundsIndex {
                index: col,
                max: self.dim.ncols,
            });
        }
        if value != 0.0 {
            self.entries.push((col, row, value));
        }
        Ok(())
    }

    pub fn build(mut self) -> CscMatrix {
        // Stable sort keeps duplicate accumulation order deterministic.
        self.entries.sort_by_key(|&(c, r, _)| (c, r));

        let mut combined: Vec<(usize, usize, f64)> = Vec::with_capacity(self.entries.len());
        for (c, r, v) in self.entries {
            match combined.last_mut() {
                Some((lc, lr, lv)) if *lc == c && *lr == r => *lv += v,
                _ => combined.push((c, r, v)),
            }
        }
        combined.retain(|&(_, _, v)| v != 0.0);

        let mut col_ptr = vec![0usize; self.dim.ncols + 1];
        for &(c, _, _) in &combined {
            col_ptr[c + 1] += 1;
        }
        for j in 0..self.dim.ncols {
            col_ptr[j + 1] += col_ptr[j];
        }

        let mut rows = Vec::with_capacity(combined.len());
        let mut vals = Vec::with_capacity(combined.len());
        for (_, r, v) in combined {
            rows.push(r);
            vals.push(v);
        }

        let a = CscMatrix {
            dim: self.dim,
            col_ptr,
            rows,
            vals,
        };
        debug_assert!(a.check_invariants().is_ok());
        a
    }
}
