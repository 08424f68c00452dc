// src/named_matrix.rs

use log::{debug, trace, warn};
use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::binary_codec::{self, BinaryLayout, LabeledEntries};
use crate::error::{find_duplicates, normalize_label, NameLookupError, ThreadSafeStdError};
use crate::linalg_backends::{BackendInverse, BackendSVD, BackendSymmetricInverse, LinAlgBackendProvider};
use crate::matrix_io;
use crate::rsvd::{randomized_svd, RsvdConfig};
use crate::sparse::SparseMatrix;

/// Structural type of a [`NamedMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixKind {
    General,
    Diagonal,
    SymmetricSparse,
}

/// Storage, tagged by structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatrixData {
    General(SparseMatrix),
    SymmetricSparse(SparseMatrix),
    /// Square matrix holding only its diagonal.
    Diagonal(Array1<f64>),
}

impl MatrixData {
    pub fn kind(&self) -> MatrixKind {
        match self {
            MatrixData::General(_) => MatrixKind::General,
            MatrixData::SymmetricSparse(_) => MatrixKind::SymmetricSparse,
            MatrixData::Diagonal(_) => MatrixKind::Diagonal,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            MatrixData::General(m) | MatrixData::SymmetricSparse(m) => m.shape(),
            MatrixData::Diagonal(d) => (d.len(), d.len()),
        }
    }

    pub fn to_sparse(&self) -> SparseMatrix {
        match self {
            MatrixData::General(m) | MatrixData::SymmetricSparse(m) => m.clone(),
            MatrixData::Diagonal(d) => SparseMatrix::from_diagonal(d),
        }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            MatrixData::General(m) | MatrixData::SymmetricSparse(m) => m.to_dense(),
            MatrixData::Diagonal(d) => Array2::from_diag(d),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self {
            MatrixData::General(m) | MatrixData::SymmetricSparse(m) => m.get(row, col),
            MatrixData::Diagonal(d) => {
                if row == col {
                    d[row]
                } else {
                    0.0
                }
            }
        }
    }

    fn is_symmetric(&self) -> bool {
        match self {
            MatrixData::Diagonal(_) | MatrixData::SymmetricSparse(_) => true,
            MatrixData::General(m) => m.is_symmetric(1e-12),
        }
    }
}

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

// Versions are unique across instances, so a cache can never match a different matrix.
fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Single-slot cache tagged with the matrix version it was computed from.
#[derive(Debug, Clone)]
pub struct VersionedCache<T> {
    slot: Option<(u64, T)>,
}

impl<T> Default for VersionedCache<T> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<T> VersionedCache<T> {
    /// Returns the cached value only if it was computed at `version`.
    pub fn get(&self, version: u64) -> Option<&T> {
        match &self.slot {
            Some((v, value)) if *v == version => Some(value),
            _ => None,
        }
    }

    pub fn get_or_try_insert_with<F>(&mut self, version: u64, compute: F) -> Result<&T, ThreadSafeStdError>
    where
        F: FnOnce() -> Result<T, ThreadSafeStdError>,
    {
        let fresh = matches!(&self.slot, Some((v, _)) if *v == version);
        if !fresh {
            if self.slot.is_some() {
                trace!("Cached factor is stale, recomputing for version {}", version);
            }
            let value = compute()?;
            self.slot = Some((version, value));
        }
        match &self.slot {
            Some((_, value)) => Ok(value),
            None => Err("versioned cache is empty after insert".into()),
        }
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

/// Thin singular value decomposition `A = U diag(s) Vᵀ`.
#[derive(Debug, Clone)]
pub struct SvdFactors {
    pub u: Array2<f64>,
    pub s: Array1<f64>,
    pub vt: Array2<f64>,
}

/// Sparse matrix with unique, ordered, upper-case row and column labels.
///
/// Every mutating method bumps [`NamedMatrix::version`], which invalidates
/// derived factors computed earlier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedMatrix {
    row_names: Vec<String>,
    col_names: Vec<String>,
    data: MatrixData,
    #[serde(skip, default = "next_version")]
    version: u64,
    #[serde(skip)]
    svd_cache: VersionedCache<SvdFactors>,
}

impl PartialEq for NamedMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.row_names == other.row_names && self.col_names == other.col_names && self.data == other.data
    }
}

impl NamedMatrix {
    /// Builds a matrix, normalizing labels and checking dimensions and uniqueness.
    pub fn new(row_names: Vec<String>, col_names: Vec<String>, data: MatrixData) -> Result<Self, ThreadSafeStdError> {
        let row_names: Vec<String> = row_names.iter().map(|n| normalize_label(n)).collect();
        let col_names: Vec<String> = col_names.iter().map(|n| normalize_label(n)).collect();
        let (nrows, ncols) = data.shape();
        if row_names.len() != nrows || col_names.len() != ncols {
            return Err(format!(
                "NamedMatrix: {} row names and {} column names do not match a {}x{} matrix",
                row_names.len(),
                col_names.len(),
                nrows,
                ncols
            )
            .into());
        }
        if let MatrixData::SymmetricSparse(_) = data {
            if row_names != col_names {
                return Err("NamedMatrix: symmetric storage requires identical row and column names".into());
            }
        }
        let row_dups = find_duplicates(&row_names);
        let col_dups = find_duplicates(&col_names);
        if !row_dups.is_empty() || !col_dups.is_empty() {
            return Err(format!(
                "NamedMatrix: duplicate labels; rows: [{}], cols: [{}]",
                row_dups.join(","),
                col_dups.join(",")
            )
            .into());
        }
        Ok(Self {
            row_names,
            col_names,
            data,
            version: next_version(),
            svd_cache: VersionedCache::default(),
        })
    }

    pub fn from_dense(row_names: Vec<String>, col_names: Vec<String>, dense: &Array2<f64>) -> Result<Self, ThreadSafeStdError> {
        Self::new(row_names, col_names, MatrixData::General(SparseMatrix::from_dense(&dense.view())))
    }

    pub fn from_diagonal(names: Vec<String>, diag: Array1<f64>) -> Result<Self, ThreadSafeStdError> {
        Self::new(names.clone(), names, MatrixData::Diagonal(diag))
    }

    pub fn row_names(&self) -> &[String] {
        &self.row_names
    }

    pub fn col_names(&self) -> &[String] {
        &self.col_names
    }

    pub fn nrows(&self) -> usize {
        self.row_names.len()
    }

    pub fn ncols(&self) -> usize {
        self.col_names.len()
    }

    pub fn kind(&self) -> MatrixKind {
        self.data.kind()
    }

    pub fn data(&self) -> &MatrixData {
        &self.data
    }

    /// Mutation stamp; changes on every mutation and is unique per instance.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_square(&self) -> bool {
        self.nrows() == self.ncols()
    }

    pub fn nnz(&self) -> usize {
        match &self.data {
            MatrixData::General(m) | MatrixData::SymmetricSparse(m) => m.nnz(),
            MatrixData::Diagonal(d) => d.iter().filter(|v| **v != 0.0).count(),
        }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        self.data.to_dense()
    }

    pub fn to_sparse(&self) -> SparseMatrix {
        self.data.to_sparse()
    }

    pub fn diagonal(&self) -> Array1<f64> {
        match &self.data {
            MatrixData::Diagonal(d) => d.clone(),
            MatrixData::General(m) | MatrixData::SymmetricSparse(m) => m.diagonal(),
        }
    }

    pub fn value(&self, row: &str, col: &str) -> Result<f64, ThreadSafeStdError> {
        let row = normalize_label(row);
        let col = normalize_label(col);
        let i = self.row_names.iter().position(|n| *n == row);
        let j = self.col_names.iter().position(|n| *n == col);
        match (i, j) {
            (Some(i), Some(j)) => Ok(self.data.get(i, j)),
            _ => {
                let mut err = NameLookupError::new("NamedMatrix::value");
                if i.is_none() {
                    err.missing_rows.push(row);
                }
                if j.is_none() {
                    err.missing_cols.push(col);
                }
                Err(Box::new(err))
            }
        }
    }

    fn touch(&mut self) {
        self.version = next_version();
    }

    /// Replaces labels and storage together.
    fn replace(&mut self, row_names: Vec<String>, col_names: Vec<String>, data: MatrixData) {
        self.row_names = row_names;
        self.col_names = col_names;
        self.data = data;
        self.touch();
    }

    /// Identity over the current labels.
    pub fn identity(&self) -> Result<NamedMatrix, ThreadSafeStdError> {
        let data = if self.is_square() {
            MatrixData::Diagonal(Array1::ones(self.nrows()))
        } else {
            let k = self.nrows().min(self.ncols());
            MatrixData::General(SparseMatrix::from_triplets(
                self.nrows(),
                self.ncols(),
                (0..k).map(|i| (i, i, 1.0)),
            )?)
        };
        NamedMatrix::new(self.row_names.clone(), self.col_names.clone(), data)
    }

    /// Zero matrix over the current labels, same structure.
    pub fn zero(&self) -> Result<NamedMatrix, ThreadSafeStdError> {
        let data = match &self.data {
            MatrixData::Diagonal(d) => MatrixData::Diagonal(Array1::zeros(d.len())),
            MatrixData::SymmetricSparse(m) => MatrixData::SymmetricSparse(SparseMatrix::zeros(m.nrows(), m.ncols())),
            MatrixData::General(m) => MatrixData::General(SparseMatrix::zeros(m.nrows(), m.ncols())),
        };
        NamedMatrix::new(self.row_names.clone(), self.col_names.clone(), data)
    }

    /// Dense thin SVD, cached until the next mutation.
    pub fn svd(&mut self) -> Result<&SvdFactors, ThreadSafeStdError> {
        let version = self.version;
        let data = &self.data;
        self.svd_cache.get_or_try_insert_with(version, || {
            let dense = data.to_dense();
            let (m, n) = dense.dim();
            let k = m.min(n);
            debug!("NamedMatrix::svd: dense SVD of {}x{} matrix", m, n);
            let out = LinAlgBackendProvider::<f64>::new()
                .svd_into(dense, true, true)
                .map_err(|e| format!("NamedMatrix::svd failed: {}", e))?;
            let u = out.u.ok_or("NamedMatrix::svd: backend returned no U")?;
            let vt = out.vt.ok_or("NamedMatrix::svd: backend returned no Vt")?;
            Ok(SvdFactors {
                u: u.slice(s![.., ..k]).to_owned(),
                s: out.s.slice(s![..k]).to_owned(),
                vt: vt.slice(s![..k, ..]).to_owned(),
            })
        })
    }

    /// Left singular vectors labelled `LEFT_SING_VEC_<i>`.
    pub fn get_u(&mut self) -> Result<NamedMatrix, ThreadSafeStdError> {
        let rows = self.row_names.clone();
        let u = self.svd()?.u.clone();
        let cols = synthesized_names("LEFT_SING_VEC", u.ncols());
        NamedMatrix::from_dense(rows, cols, &u)
    }

    /// Right singular vectors labelled `RIGHT_SING_VEC_<i>`.
    pub fn get_v(&mut self) -> Result<NamedMatrix, ThreadSafeStdError> {
        let rows = self.col_names.clone();
        let v = self.svd()?.vt.t().to_owned();
        let cols = synthesized_names("RIGHT_SING_VEC", v.ncols());
        NamedMatrix::from_dense(rows, cols, &v)
    }

    /// Singular values as a diagonal matrix labelled `SING_VAL_<i>`.
    pub fn get_s(&mut self) -> Result<NamedMatrix, ThreadSafeStdError> {
        let s = self.svd()?.s.clone();
        let names = synthesized_names("SING_VAL", s.len());
        NamedMatrix::from_diagonal(names, s)
    }

    /// Inverse. Diagonal storage inverts elementwise; symmetric storage goes through
    /// an `LDLᵀ` solve against the identity.
    pub fn inv(&self) -> Result<NamedMatrix, ThreadSafeStdError> {
        if !self.is_square() {
            return Err(format!(
                "NamedMatrix::inv: matrix is not square ({}x{})",
                self.nrows(),
                self.ncols()
            )
            .into());
        }
        let data = match &self.data {
            MatrixData::Diagonal(d) => {
                if let Some(pos) = d.iter().position(|v| *v == 0.0) {
                    return Err(format!(
                        "NamedMatrix::inv: zero diagonal entry for '{}'",
                        self.row_names[pos]
                    )
                    .into());
                }
                MatrixData::Diagonal(d.mapv(|v| 1.0 / v))
            }
            other => {
                let dense = other.to_dense();
                let backend = LinAlgBackendProvider::<f64>::new();
                let inverse = if other.is_symmetric() {
                    backend.inverse_symmetric(&dense)
                } else {
                    warn!("NamedMatrix::inv: matrix is not symmetric, using an LU inverse");
                    backend.inverse_general(&dense)
                }
                .map_err(|e| format!("NamedMatrix::inv: {}", e))?;
                let sparse = SparseMatrix::from_dense(&inverse.view());
                match other {
                    MatrixData::SymmetricSparse(_) => MatrixData::SymmetricSparse(sparse),
                    _ => MatrixData::General(sparse),
                }
            }
        };
        NamedMatrix::new(self.col_names.clone(), self.row_names.clone(), data)
    }

    pub fn inv_ip(&mut self) -> Result<(), ThreadSafeStdError> {
        let inverse = self.inv()?;
        self.replace(inverse.row_names, inverse.col_names, inverse.data);
        Ok(())
    }

    /// Truncated pseudo-inverse `V Σ⁻¹ Uᵀ` keeping singular values above
    /// `threshold * σ_max`, at most `max_rank` of them.
    pub fn pseudo_inv_ip(&mut self, threshold: f64, max_rank: usize) -> Result<(), ThreadSafeStdError> {
        self.pseudo_inv_ip_with(threshold, max_rank, &RsvdConfig::default())
    }

    pub fn pseudo_inv_ip_with(&mut self, threshold: f64, max_rank: usize, config: &RsvdConfig) -> Result<(), ThreadSafeStdError> {
        let new_rows = self.col_names.clone();
        let new_cols = self.row_names.clone();
        let data = match &self.data {
            MatrixData::Diagonal(d) => {
                let max_abs = d.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
                let mut order: Vec<usize> = (0..d.len()).collect();
                order.sort_by(|&a, &b| d[b].abs().total_cmp(&d[a].abs()));
                let mut inverse = Array1::zeros(d.len());
                for &i in order.iter().take(max_rank) {
                    if max_abs > 0.0 && d[i].abs() > threshold * max_abs {
                        inverse[i] = 1.0 / d[i];
                    }
                }
                MatrixData::Diagonal(inverse)
            }
            other => {
                let dense = other.to_dense();
                let svd = randomized_svd(&dense.view(), max_rank, config)?;
                let s_max = svd.s.get(0).copied().unwrap_or(0.0);
                let kept = svd
                    .s
                    .iter()
                    .take_while(|&&sv| s_max > 0.0 && sv > threshold * s_max)
                    .count();
                debug!(
                    "NamedMatrix::pseudo_inv_ip: keeping {} of {} singular values (threshold {}, max rank {})",
                    kept,
                    svd.s.len(),
                    threshold,
                    max_rank
                );
                let v = svd.v.slice(s![.., ..kept]).to_owned();
                let inv_s = svd.s.slice(s![..kept]).mapv(|sv| 1.0 / sv);
                let u_t = svd.u.slice(s![.., ..kept]).t().to_owned();
                let pinv = (&v * &inv_s).dot(&u_t);
                let sparse = SparseMatrix::from_dense(&pinv.view());
                match other {
                    MatrixData::SymmetricSparse(_) => MatrixData::SymmetricSparse(sparse),
                    _ => MatrixData::General(sparse),
                }
            }
        };
        self.replace(new_rows, new_cols, data);
        Ok(())
    }

    fn index_of(names: &[String]) -> HashMap<&str, usize> {
        names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect()
    }

    /// Submatrix over `rows` x `cols` in the requested order.
    ///
    /// Fails if either list is empty. All absent names on both axes are
    /// reported together in a [`NameLookupError`].
    pub fn get(&self, rows: &[String], cols: &[String]) -> Result<NamedMatrix, ThreadSafeStdError> {
        if rows.is_empty() {
            return Err("NamedMatrix::get: requested row names are empty".into());
        }
        if cols.is_empty() {
            return Err("NamedMatrix::get: requested column names are empty".into());
        }
        let rows: Vec<String> = rows.iter().map(|n| normalize_label(n)).collect();
        let cols: Vec<String> = cols.iter().map(|n| normalize_label(n)).collect();
        let row_index = Self::index_of(&self.row_names);
        let col_index = Self::index_of(&self.col_names);

        let mut missing = NameLookupError::new("NamedMatrix::get");
        let row_idx: Vec<usize> = rows
            .iter()
            .filter_map(|n| {
                let found = row_index.get(n.as_str()).copied();
                if found.is_none() {
                    missing.missing_rows.push(n.clone());
                }
                found
            })
            .collect();
        let col_idx: Vec<usize> = cols
            .iter()
            .filter_map(|n| {
                let found = col_index.get(n.as_str()).copied();
                if found.is_none() {
                    missing.missing_cols.push(n.clone());
                }
                found
            })
            .collect();
        missing.into_result()?;

        let same_axes = rows == cols && self.row_names == self.col_names;
        let data = match &self.data {
            MatrixData::Diagonal(d) if same_axes => MatrixData::Diagonal(Array1::from_iter(row_idx.iter().map(|&i| d[i]))),
            MatrixData::SymmetricSparse(m) if same_axes => MatrixData::SymmetricSparse(m.select(&row_idx, &col_idx)),
            other => MatrixData::General(other.to_sparse().select(&row_idx, &col_idx)),
        };
        trace!("NamedMatrix::get: {}x{} -> {}x{}", self.nrows(), self.ncols(), rows.len(), cols.len());
        NamedMatrix::new(rows, cols, data)
    }

    /// Like [`get`](Self::get), then removes the extracted rows and columns from `self`.
    pub fn extract(&mut self, rows: &[String], cols: &[String]) -> Result<NamedMatrix, ThreadSafeStdError> {
        let extracted = self.get(rows, cols)?;
        self.drop_rows_and_cols(rows, cols)?;
        Ok(extracted)
    }

    pub fn drop_rows(&mut self, names: &[String]) -> Result<(), ThreadSafeStdError> {
        self.drop_rows_and_cols(names, &[])
    }

    pub fn drop_cols(&mut self, names: &[String]) -> Result<(), ThreadSafeStdError> {
        self.drop_rows_and_cols(&[], names)
    }

    /// Removes the named rows and columns; labels and values change together.
    pub fn drop_rows_and_cols(&mut self, rows: &[String], cols: &[String]) -> Result<(), ThreadSafeStdError> {
        if rows.is_empty() && cols.is_empty() {
            return Ok(());
        }
        let drop_r: Vec<String> = rows.iter().map(|n| normalize_label(n)).collect();
        let drop_c: Vec<String> = cols.iter().map(|n| normalize_label(n)).collect();
        let mut missing = NameLookupError::new("NamedMatrix::drop");
        missing.missing_rows = drop_r.iter().filter(|n| !self.row_names.contains(*n)).cloned().collect();
        missing.missing_cols = drop_c.iter().filter(|n| !self.col_names.contains(*n)).cloned().collect();
        missing.into_result()?;

        let keep_row_idx: Vec<usize> = (0..self.nrows()).filter(|&i| !drop_r.contains(&self.row_names[i])).collect();
        let keep_col_idx: Vec<usize> = (0..self.ncols()).filter(|&j| !drop_c.contains(&self.col_names[j])).collect();
        let new_rows: Vec<String> = keep_row_idx.iter().map(|&i| self.row_names[i].clone()).collect();
        let new_cols: Vec<String> = keep_col_idx.iter().map(|&j| self.col_names[j].clone()).collect();

        let same_axes = new_rows == new_cols && self.row_names == self.col_names;
        let data = match &self.data {
            MatrixData::Diagonal(d) if same_axes => MatrixData::Diagonal(Array1::from_iter(keep_row_idx.iter().map(|&i| d[i]))),
            MatrixData::SymmetricSparse(m) if same_axes => MatrixData::SymmetricSparse(m.select(&keep_row_idx, &keep_col_idx)),
            other => MatrixData::General(other.to_sparse().select(&keep_row_idx, &keep_col_idx)),
        };
        self.replace(new_rows, new_cols, data);
        Ok(())
    }

    /// First `n` columns.
    pub fn left_cols(&self, n: usize) -> Result<NamedMatrix, ThreadSafeStdError> {
        if n > self.ncols() {
            return Err(format!("NamedMatrix::left_cols: {} requested, matrix has {}", n, self.ncols()).into());
        }
        let idx: Vec<usize> = (0..n).collect();
        self.select_cols(&idx)
    }

    /// Last `n` columns.
    pub fn right_cols(&self, n: usize) -> Result<NamedMatrix, ThreadSafeStdError> {
        if n > self.ncols() {
            return Err(format!("NamedMatrix::right_cols: {} requested, matrix has {}", n, self.ncols()).into());
        }
        let idx: Vec<usize> = (self.ncols() - n..self.ncols()).collect();
        self.select_cols(&idx)
    }

    fn select_cols(&self, idx: &[usize]) -> Result<NamedMatrix, ThreadSafeStdError> {
        let all_rows: Vec<usize> = (0..self.nrows()).collect();
        let cols = idx.iter().map(|&j| self.col_names[j].clone()).collect();
        let sparse = self.data.to_sparse().select(&all_rows, idx);
        NamedMatrix::new(self.row_names.clone(), cols, MatrixData::General(sparse))
    }

    pub fn transpose(&self) -> NamedMatrix {
        let mut t = self.clone();
        t.transpose_ip();
        t
    }

    /// Swaps the axes. Diagonal and symmetric storage keep their values and only swap labels.
    pub fn transpose_ip(&mut self) {
        let data = match &self.data {
            MatrixData::Diagonal(d) => MatrixData::Diagonal(d.clone()),
            MatrixData::SymmetricSparse(m) => MatrixData::SymmetricSparse(m.clone()),
            MatrixData::General(m) => MatrixData::General(m.transpose()),
        };
        let rows = self.col_names.clone();
        let cols = self.row_names.clone();
        self.replace(rows, cols, data);
    }

    pub fn scale_ip(&mut self, factor: f64) {
        match &mut self.data {
            MatrixData::Diagonal(d) => d.mapv_inplace(|v| v * factor),
            MatrixData::General(m) | MatrixData::SymmetricSparse(m) => m.scale(factor),
        }
        self.touch();
    }

    /// Label-checked product `self * other`.
    pub fn dot(&self, other: &NamedMatrix) -> Result<NamedMatrix, ThreadSafeStdError> {
        if self.col_names != other.row_names {
            return Err("NamedMatrix::dot: column names of the left operand differ from row names of the right operand".into());
        }
        let product = self.data.to_sparse().dot_dense(&other.to_dense().view())?;
        NamedMatrix::from_dense(self.row_names.clone(), other.col_names.clone(), &product)
    }

    // --- persistence ---

    pub fn to_ascii<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        matrix_io::write_ascii(self, path)
    }

    pub fn from_ascii<P: AsRef<Path>>(path: P) -> Result<NamedMatrix, ThreadSafeStdError> {
        matrix_io::read_ascii(path)
    }

    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        matrix_io::write_csv(self, path)
    }

    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<NamedMatrix, ThreadSafeStdError> {
        matrix_io::read_csv(path)
    }

    pub fn to_labeled_entries(&self) -> LabeledEntries {
        LabeledEntries {
            row_names: self.row_names.clone(),
            col_names: self.col_names.clone(),
            entries: self.data.to_sparse().iter().collect(),
        }
    }

    pub fn from_labeled_entries(decoded: LabeledEntries) -> Result<NamedMatrix, ThreadSafeStdError> {
        let sparse = SparseMatrix::from_triplets(decoded.nrows(), decoded.ncols(), decoded.entries)?;
        NamedMatrix::new(decoded.row_names, decoded.col_names, MatrixData::General(sparse))
    }

    pub fn to_binary<P: AsRef<Path>>(&self, path: P, layout: BinaryLayout) -> Result<(), ThreadSafeStdError> {
        binary_codec::write_binary_file(path, &self.to_labeled_entries(), layout)
    }

    /// Reads either binary layout.
    pub fn from_binary<P: AsRef<Path>>(path: P) -> Result<NamedMatrix, ThreadSafeStdError> {
        let (layout, decoded) = binary_codec::read_binary_file(path)?;
        trace!("NamedMatrix::from_binary: {:?} layout", layout);
        Self::from_labeled_entries(decoded)
    }

    /// Loads by extension: `.jcb`/`.jco` binary, `.mat`/`.cov` ascii, `.csv` csv.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NamedMatrix, ThreadSafeStdError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_uppercase())
            .unwrap_or_default();
        match ext.as_str() {
            "JCB" | "JCO" => Self::from_binary(path),
            "MAT" | "COV" => Self::from_ascii(path),
            "CSV" => Self::from_csv(path),
            _ => Err(format!(
                "NamedMatrix::from_file: unrecognized extension '{}' for {:?}, should be JCB, JCO, MAT, COV or CSV",
                ext, path
            )
            .into()),
        }
    }

    /// Bincode snapshot of labels and storage.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        let file = File::create(path.as_ref())
            .map_err(|e| format!("Failed to create file at {:?}: {}", path.as_ref(), e))?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| format!("Failed to serialize NamedMatrix: {}", e))?;
        Ok(())
    }

    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<NamedMatrix, ThreadSafeStdError> {
        let file = File::open(path.as_ref())
            .map_err(|e| format!("Failed to open file at {:?}: {}", path.as_ref(), e))?;
        let mut reader = BufReader::new(file);
        let loaded: NamedMatrix = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| format!("Failed to deserialize NamedMatrix: {}", e))?;
        // Revalidate invariants on the way in.
        NamedMatrix::new(loaded.row_names, loaded.col_names, loaded.data)
    }
}

fn synthesized_names(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{}_{}", prefix, i)).collect()
}
