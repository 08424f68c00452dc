// src/sparse.rs

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::ThreadSafeStdError;

/// Coordinate-format sparse matrix.
///
/// Entries are kept sorted by `(row, col)`, contain no duplicates and no explicit zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    nrows: usize,
    ncols: usize,
    entries: Vec<(usize, usize, f64)>,
}

impl SparseMatrix {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self { nrows, ncols, entries: Vec::new() }
    }

    pub fn identity(n: usize) -> Self {
        Self {
            nrows: n,
            ncols: n,
            entries: (0..n).map(|i| (i, i, 1.0)).collect(),
        }
    }

    /// Builds a matrix from `(row, col, value)` triplets.
    /// Duplicate coordinates are summed and resulting zeros dropped.
    pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> Result<Self, ThreadSafeStdError>
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut entries: Vec<(usize, usize, f64)> = Vec::new();
        for (i, j, v) in triplets {
            if i >= nrows || j >= ncols {
                return Err(format!(
                    "Sparse entry ({}, {}) outside of {}x{} matrix",
                    i, j, nrows, ncols
                )
                .into());
            }
            entries.push((i, j, v));
        }
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        let mut merged: Vec<(usize, usize, f64)> = Vec::with_capacity(entries.len());
        for (i, j, v) in entries {
            match merged.last_mut() {
                Some(last) if last.0 == i && last.1 == j => last.2 += v,
                _ => merged.push((i, j, v)),
            }
        }
        merged.retain(|&(_, _, v)| v != 0.0);
        Ok(Self { nrows, ncols, entries: merged })
    }

    pub fn from_dense(dense: &ArrayView2<f64>) -> Self {
        let mut entries = Vec::new();
        for ((i, j), &v) in dense.indexed_iter() {
            if v != 0.0 {
                entries.push((i, j, v));
            }
        }
        Self { nrows: dense.nrows(), ncols: dense.ncols(), entries }
    }

    pub fn from_diagonal(diag: &Array1<f64>) -> Self {
        let n = diag.len();
        Self {
            nrows: n,
            ncols: n,
            entries: diag
                .iter()
                .enumerate()
                .filter(|(_, &v)| v != 0.0)
                .map(|(i, &v)| (i, i, v))
                .collect(),
        }
    }

    /// Places `blocks` along the diagonal of a new square matrix.
    pub fn block_diagonal(blocks: &[&SparseMatrix]) -> Self {
        let n: usize = blocks.iter().map(|b| b.nrows.max(b.ncols)).sum();
        let mut entries = Vec::new();
        let mut offset = 0;
        for block in blocks {
            entries.extend(block.entries.iter().map(|&(i, j, v)| (i + offset, j + offset, v)));
            offset += block.nrows.max(block.ncols);
        }
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        Self { nrows: n, ncols: n, entries }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self
            .entries
            .binary_search_by(|e| (e.0, e.1).cmp(&(row, col)))
        {
            Ok(pos) => self.entries[pos].2,
            Err(_) => 0.0,
        }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.nrows, self.ncols));
        for &(i, j, v) in &self.entries {
            dense[[i, j]] = v;
        }
        dense
    }

    pub fn transpose(&self) -> Self {
        let mut entries: Vec<(usize, usize, f64)> =
            self.entries.iter().map(|&(i, j, v)| (j, i, v)).collect();
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        Self { nrows: self.ncols, ncols: self.nrows, entries }
    }

    pub fn diagonal(&self) -> Array1<f64> {
        let mut diag = Array1::zeros(self.nrows.min(self.ncols));
        for &(i, j, v) in &self.entries {
            if i == j {
                diag[i] = v;
            }
        }
        diag
    }

    pub fn is_diagonal(&self) -> bool {
        self.entries.iter().all(|&(i, j, _)| i == j)
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        self.nrows == self.ncols
            && self
                .entries
                .iter()
                .all(|&(i, j, v)| (self.get(j, i) - v).abs() <= tolerance * v.abs().max(1.0))
    }

    pub fn scale(&mut self, factor: f64) {
        for e in self.entries.iter_mut() {
            e.2 *= factor;
        }
        if factor == 0.0 {
            self.entries.clear();
        }
    }

    /// Picks rows and columns by position, in the given order.
    pub fn select(&self, rows: &[usize], cols: &[usize]) -> Self {
        let row_map = position_map(self.nrows, rows);
        let col_map = position_map(self.ncols, cols);
        let mut entries = Vec::new();
        for &(i, j, v) in &self.entries {
            for &ni in &row_map[i] {
                for &nj in &col_map[j] {
                    entries.push((ni, nj, v));
                }
            }
        }
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        Self { nrows: rows.len(), ncols: cols.len(), entries }
    }

    /// Sparse-dense product `self * rhs`.
    pub fn dot_dense(&self, rhs: &ArrayView2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        if rhs.nrows() != self.ncols {
            return Err(format!(
                "Cannot multiply {}x{} sparse matrix by {}x{} dense matrix",
                self.nrows,
                self.ncols,
                rhs.nrows(),
                rhs.ncols()
            )
            .into());
        }
        let mut out = Array2::zeros((self.nrows, rhs.ncols()));
        for &(i, j, v) in &self.entries {
            let src = rhs.row(j);
            out.row_mut(i).scaled_add(v, &src);
        }
        Ok(out)
    }
}

// Old index -> new positions; a source index may be selected more than once.
fn position_map(len: usize, picks: &[usize]) -> Vec<Vec<usize>> {
    let mut map = vec![Vec::new(); len];
    for (new_idx, &old_idx) in picks.iter().enumerate() {
        if old_idx < len {
            map[old_idx].push(new_idx);
        }
    }
    map
}
