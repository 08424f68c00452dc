// src/ensemble.rs

use log::{debug, info, trace};
use ndarray::{Array1, Array2, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::binary_codec::{self, BinaryLayout, LabeledEntries};
use crate::covariance::CovarianceMatrix;
use crate::diagnostics::DiagnosticsSink;
use crate::draw::{DrawRequest, RandomDrawEngine};
use crate::error::{find_duplicates, normalize_label, NameLookupError, ThreadSafeStdError};
use crate::matrix_io;
use crate::sampling::SamplingContext;
use crate::scenario::ValueProvider;

/// Empirical variances at or below this are treated as degenerate.
pub const MIN_EMPIRICAL_VARIANCE: f64 = 1.0e-30;

/// Dense realizations x variables matrix with unique labels on both axes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ensemble {
    real_names: Vec<String>,
    var_names: Vec<String>,
    reals: Array2<f64>,
    #[serde(skip)]
    var_map: HashMap<String, usize>,
}

impl PartialEq for Ensemble {
    fn eq(&self, other: &Self) -> bool {
        self.real_names == other.real_names && self.var_names == other.var_names && self.reals == other.reals
    }
}

fn normalized(names: &[String]) -> Vec<String> {
    names.iter().map(|n| normalize_label(n)).collect()
}

impl Ensemble {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an ensemble from parts, checking shape and label uniqueness.
    pub fn from_array(real_names: Vec<String>, var_names: Vec<String>, reals: Array2<f64>) -> Result<Self, ThreadSafeStdError> {
        if reals.nrows() != real_names.len() {
            return Err(format!(
                "Ensemble::from_array: {} rows but {} realization names",
                reals.nrows(),
                real_names.len()
            )
            .into());
        }
        if reals.ncols() != var_names.len() {
            return Err(format!(
                "Ensemble::from_array: {} columns but {} variable names",
                reals.ncols(),
                var_names.len()
            )
            .into());
        }
        let mut en = Self {
            real_names: normalized(&real_names),
            var_names: normalized(&var_names),
            reals,
            var_map: HashMap::new(),
        };
        en.check_for_dups()?;
        en.rebuild_var_map();
        Ok(en)
    }

    /// Zero-filled ensemble with the given labels.
    pub fn reserve(real_names: Vec<String>, var_names: Vec<String>) -> Result<Self, ThreadSafeStdError> {
        let reals = Array2::zeros((real_names.len(), var_names.len()));
        Self::from_array(real_names, var_names, reals)
    }

    pub fn zeros_like(&self) -> Ensemble {
        Self {
            real_names: self.real_names.clone(),
            var_names: self.var_names.clone(),
            reals: Array2::zeros(self.reals.raw_dim()),
            var_map: self.var_map.clone(),
        }
    }

    pub fn set_zeros(&mut self) {
        self.reals.fill(0.0);
    }

    pub fn real_names(&self) -> &[String] {
        &self.real_names
    }

    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    pub fn reals(&self) -> &Array2<f64> {
        &self.reals
    }

    /// In-place access to the values; the shape is fixed.
    pub fn reals_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        self.reals.view_mut()
    }

    /// `(realizations, variables)`
    pub fn shape(&self) -> (usize, usize) {
        self.reals.dim()
    }

    pub fn var_index(&self, name: &str) -> Option<usize> {
        self.var_map.get(&normalize_label(name)).copied()
    }

    fn rebuild_var_map(&mut self) {
        self.var_map = self.var_names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
    }

    /// Replaces the values, keeping the labels.
    pub fn set_eigen(&mut self, reals: Array2<f64>) -> Result<(), ThreadSafeStdError> {
        if reals.dim() != self.shape() {
            return Err(format!(
                "Ensemble::set_eigen: new values are {:?} but the ensemble is {:?}",
                reals.dim(),
                self.shape()
            )
            .into());
        }
        self.reals = reals;
        Ok(())
    }

    pub fn set_real_names(&mut self, real_names: Vec<String>) -> Result<(), ThreadSafeStdError> {
        if real_names.len() != self.real_names.len() {
            return Err(format!(
                "Ensemble::set_real_names: {} names given for {} realizations",
                real_names.len(),
                self.real_names.len()
            )
            .into());
        }
        let real_names = normalized(&real_names);
        let dups = find_duplicates(&real_names);
        if !dups.is_empty() {
            return Err(format!("Ensemble::set_real_names: duplicate names: {}", dups.join(",")).into());
        }
        self.real_names = real_names;
        Ok(())
    }

    /// Fails listing every duplicated variable and realization name.
    pub fn check_for_dups(&self) -> Result<(), ThreadSafeStdError> {
        let mut dups = find_duplicates(&self.var_names);
        dups.extend(find_duplicates(&self.real_names));
        if dups.is_empty() {
            Ok(())
        } else {
            Err(format!("duplicate var/real names in ensemble: {}", dups.join(",")).into())
        }
    }

    fn real_indices(&self, names: &[String], missing: &mut NameLookupError) -> Vec<usize> {
        let index: HashMap<&str, usize> = self.real_names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        names
            .iter()
            .filter_map(|n| {
                let n = normalize_label(n);
                let found = index.get(n.as_str()).copied();
                if found.is_none() {
                    missing.missing_rows.push(n);
                }
                found
            })
            .collect()
    }

    fn var_indices(&self, names: &[String], missing: &mut NameLookupError) -> Vec<usize> {
        names
            .iter()
            .filter_map(|n| {
                let n = normalize_label(n);
                let found = self.var_map.get(&n).copied();
                if found.is_none() {
                    missing.missing_cols.push(n);
                }
                found
            })
            .collect()
    }

    /// Dense copy over `rows` x `cols` in the requested order. An empty list keeps
    /// the current order on that axis; every absent name is reported together.
    pub fn get_eigen(&self, rows: &[String], cols: &[String]) -> Result<Array2<f64>, ThreadSafeStdError> {
        let mut missing = NameLookupError::new("Ensemble::get_eigen");
        let row_idx = if rows.is_empty() {
            None
        } else {
            Some(self.real_indices(rows, &mut missing))
        };
        let col_idx = if cols.is_empty() {
            None
        } else {
            Some(self.var_indices(cols, &mut missing))
        };
        missing.into_result()?;
        let selected = match &row_idx {
            Some(idx) => self.reals.select(Axis(0), idx),
            None => self.reals.clone(),
        };
        Ok(match &col_idx {
            Some(idx) => selected.select(Axis(1), idx),
            None => selected,
        })
    }

    /// Reorders (and possibly subsets) in place; empty lists keep the current axis.
    pub fn reorder(&mut self, rows: &[String], cols: &[String]) -> Result<(), ThreadSafeStdError> {
        let reals = self.get_eigen(rows, cols)?;
        let new_rows = if rows.is_empty() { self.real_names.clone() } else { normalized(rows) };
        let new_cols = if cols.is_empty() { self.var_names.clone() } else { normalized(cols) };
        let dups: Vec<String> = find_duplicates(&new_rows).into_iter().chain(find_duplicates(&new_cols)).collect();
        if !dups.is_empty() {
            return Err(format!("Ensemble::reorder: duplicate names requested: {}", dups.join(",")).into());
        }
        self.reals = reals;
        self.real_names = new_rows;
        self.var_names = new_cols;
        self.rebuild_var_map();
        Ok(())
    }

    pub fn get_real_names_by_index(&self, indices: &[usize]) -> Result<Vec<String>, ThreadSafeStdError> {
        indices
            .iter()
            .map(|&i| {
                self.real_names
                    .get(i)
                    .cloned()
                    .ok_or_else(|| format!("Ensemble: realization index {} out of range ({})", i, self.real_names.len()).into())
            })
            .collect()
    }

    pub fn get_real_vector(&self, index: usize) -> Result<Array1<f64>, ThreadSafeStdError> {
        if index >= self.real_names.len() {
            return Err(format!(
                "Ensemble::get_real_vector: index {} >= number of realizations {}",
                index,
                self.real_names.len()
            )
            .into());
        }
        Ok(self.reals.row(index).to_owned())
    }

    pub fn get_real_vector_by_name(&self, real_name: &str) -> Result<Array1<f64>, ThreadSafeStdError> {
        let name = normalize_label(real_name);
        let idx = self
            .real_names
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| format!("Ensemble::get_real_vector: realization '{}' not found", name))?;
        self.get_real_vector(idx)
    }

    /// Adds one realization taking every variable's value from `values`.
    ///
    /// Nothing changes if the name is taken or any variable is missing.
    pub fn append(&mut self, real_name: &str, values: &dyn ValueProvider) -> Result<(), ThreadSafeStdError> {
        let name = normalize_label(real_name);
        if self.real_names.contains(&name) {
            return Err(format!("Ensemble::append: real_name '{}' already in real_names", name).into());
        }
        let row = values
            .values_for(&self.var_names)
            .map_err(|e| format!("Ensemble::append: {}", e))?;
        self.reals
            .push_row(Array1::from(row).view())
            .map_err(|e| format!("Ensemble::append: {}", e))?;
        self.real_names.push(name);
        Ok(())
    }

    /// Appends all rows of `other`, which must carry the same variables and no
    /// realization names already present here.
    pub fn append_other_rows(&mut self, other: &Ensemble) -> Result<(), ThreadSafeStdError> {
        if other.var_names.len() != self.var_names.len() {
            return Err(format!(
                "Ensemble::append_other_rows: other has {} variables, this has {}",
                other.var_names.len(),
                self.var_names.len()
            )
            .into());
        }
        let mut missing = NameLookupError::new("Ensemble::append_other_rows (other variables not in this ensemble)");
        missing.missing_cols = other.var_names.iter().filter(|n| !self.var_map.contains_key(*n)).cloned().collect();
        missing.into_result()?;
        let own: HashSet<&str> = self.real_names.iter().map(String::as_str).collect();
        let shared: Vec<String> = other.real_names.iter().filter(|n| own.contains(n.as_str())).cloned().collect();
        if !shared.is_empty() {
            return Err(format!(
                "Ensemble::append_other_rows: the following realization names are in both ensembles: {}",
                shared.join(",")
            )
            .into());
        }
        let aligned = other.get_eigen(&[], &self.var_names)?;
        self.reals
            .append(Axis(0), aligned.view())
            .map_err(|e| format!("Ensemble::append_other_rows: {}", e))?;
        self.real_names.extend(other.real_names.iter().cloned());
        Ok(())
    }

    /// Removes the named realizations; names not present are ignored.
    pub fn drop_rows(&mut self, names: &[String]) {
        let drop: HashSet<String> = names.iter().map(|n| normalize_label(n)).collect();
        let keep: Vec<usize> = (0..self.real_names.len()).filter(|&i| !drop.contains(&self.real_names[i])).collect();
        self.retain_rows(&keep);
    }

    pub fn drop_rows_by_index(&mut self, indices: &[usize]) -> Result<(), ThreadSafeStdError> {
        self.check_row_indices(indices)?;
        let drop: HashSet<usize> = indices.iter().copied().collect();
        let keep: Vec<usize> = (0..self.real_names.len()).filter(|i| !drop.contains(i)).collect();
        self.retain_rows(&keep);
        Ok(())
    }

    /// Keeps only `names`, in that order.
    pub fn keep_rows(&mut self, names: &[String]) -> Result<(), ThreadSafeStdError> {
        let mut missing = NameLookupError::new("Ensemble::keep_rows");
        let idx = self.real_indices(names, &mut missing);
        missing.into_result()?;
        self.retain_rows(&idx);
        Ok(())
    }

    /// Keeps the rows at `indices`, preserving their current order.
    pub fn keep_rows_by_index(&mut self, indices: &[usize]) -> Result<(), ThreadSafeStdError> {
        self.check_row_indices(indices)?;
        let keep: HashSet<usize> = indices.iter().copied().collect();
        let idx: Vec<usize> = (0..self.real_names.len()).filter(|i| keep.contains(i)).collect();
        self.retain_rows(&idx);
        Ok(())
    }

    fn check_row_indices(&self, indices: &[usize]) -> Result<(), ThreadSafeStdError> {
        let bad: Vec<String> = indices
            .iter()
            .filter(|&&i| i >= self.real_names.len())
            .map(|i| i.to_string())
            .collect();
        if bad.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "Ensemble: realization indices out of range ({} realizations): {}",
                self.real_names.len(),
                bad.join(",")
            )
            .into())
        }
    }

    fn retain_rows(&mut self, idx: &[usize]) {
        self.reals = self.reals.select(Axis(0), idx);
        self.real_names = idx.iter().map(|&i| self.real_names[i].clone()).collect();
    }

    /// Adds `other`'s columns into the same-named columns here. Realization order must match.
    pub fn add_2_cols_ip(&mut self, other: &Ensemble) -> Result<(), ThreadSafeStdError> {
        if other.real_names.len() != self.real_names.len() {
            return Err("Ensemble::add_2_cols_ip: first dimensions don't match".into());
        }
        let mismatch: Vec<String> = self
            .real_names
            .iter()
            .zip(other.real_names.iter())
            .filter(|(a, b)| a != b)
            .map(|(a, _)| a.clone())
            .collect();
        if !mismatch.is_empty() {
            return Err(format!("Ensemble::add_2_cols_ip: the following real_names don't match other: {}", mismatch.join(",")).into());
        }
        self.add_2_cols_named(&other.var_names, &other.reals)
    }

    /// Adds the columns of `values`, labelled by `var_names`, into the same-named columns here.
    pub fn add_2_cols_named(&mut self, var_names: &[String], values: &Array2<f64>) -> Result<(), ThreadSafeStdError> {
        if values.nrows() != self.real_names.len() {
            return Err("Ensemble::add_2_cols_ip: first dimensions don't match".into());
        }
        if values.ncols() != var_names.len() {
            return Err("Ensemble::add_2_cols_ip: values and names have different column counts".into());
        }
        let mut missing = NameLookupError::new("Ensemble::add_2_cols_ip");
        let idx = self.var_indices(var_names, &mut missing);
        missing.into_result()?;
        for (src, &dst) in idx.iter().enumerate() {
            let mut col = self.reals.column_mut(dst);
            col += &values.column(src);
        }
        Ok(())
    }

    /// Appends new columns; none of `var_names` may already exist.
    pub fn extend_cols(&mut self, var_names: &[String], values: &Array2<f64>) -> Result<(), ThreadSafeStdError> {
        if values.nrows() != self.real_names.len() || values.ncols() != var_names.len() {
            return Err(format!(
                "Ensemble::extend_cols: values are {:?}, expected ({}, {})",
                values.dim(),
                self.real_names.len(),
                var_names.len()
            )
            .into());
        }
        let names = normalized(var_names);
        let mut clash: Vec<String> = names.iter().filter(|n| self.var_map.contains_key(*n)).cloned().collect();
        clash.extend(find_duplicates(&names));
        if !clash.is_empty() {
            return Err(format!("Ensemble::extend_cols: names already present or repeated: {}", clash.join(",")).into());
        }
        self.reals
            .append(Axis(1), values.view())
            .map_err(|e| format!("Ensemble::extend_cols: {}", e))?;
        self.var_names.extend(names);
        self.rebuild_var_map();
        Ok(())
    }

    /// Deviations from the column means over the selected rows and columns.
    pub fn get_eigen_mean_diff(&self, rows: &[String], cols: &[String]) -> Result<Array2<f64>, ThreadSafeStdError> {
        let mut values = self.get_eigen(rows, cols)?;
        if let Some(mean) = values.mean_axis(Axis(0)) {
            values -= &mean;
        }
        Ok(values)
    }

    pub fn get_mean_vector(&self) -> Array1<f64> {
        self.reals
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.var_names.len()))
    }

    /// Per-variable mean and sample standard deviation over `rows` (all if empty).
    pub fn get_moment_maps(&self, rows: &[String]) -> Result<(BTreeMap<String, f64>, BTreeMap<String, f64>), ThreadSafeStdError> {
        let values = self.get_eigen(rows, &[])?;
        if values.nrows() == 0 {
            return Err("Ensemble::get_moment_maps: ensemble has no realizations".into());
        }
        let ddof = if values.nrows() > 1 { 1.0 } else { 0.0 };
        let mut means = BTreeMap::new();
        let mut stds = BTreeMap::new();
        for (name, col) in self.var_names.iter().zip(values.axis_iter(Axis(1))) {
            means.insert(name.clone(), col.mean().unwrap_or(0.0));
            stds.insert(name.clone(), col.std(ddof));
        }
        Ok((means, stds))
    }

    /// Empirical diagonal covariance from mean-centered realizations (divisor n).
    pub fn get_diagonal_cov_matrix(&self) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        let n = self.real_names.len();
        if n == 0 {
            return Err("Ensemble::get_diagonal_cov_matrix: ensemble has no realizations".into());
        }
        let diff = self.get_eigen_mean_diff(&[], &[])?;
        let variances = diff.map_axis(Axis(0), |col| col.dot(&col) / n as f64);
        let degenerate: Vec<String> = self
            .var_names
            .iter()
            .zip(variances.iter())
            .filter(|(_, v)| !(**v > MIN_EMPIRICAL_VARIANCE))
            .map(|(name, v)| format!("{}: {}", name, v))
            .collect();
        if !degenerate.is_empty() {
            return Err(format!(
                "Ensemble::get_diagonal_cov_matrix: invalid variance for ensemble variables {}",
                degenerate.join(", ")
            )
            .into());
        }
        CovarianceMatrix::from_variances(self.var_names.clone(), variances)
    }

    /// Replaces the realizations with a covariance-structured draw over the
    /// current variable names. See [`RandomDrawEngine::draw`].
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        num_reals: usize,
        covariance: &CovarianceMatrix,
        center: &dyn ValueProvider,
        draw_names: &[String],
        groups: &[(String, Vec<String>)],
        engine: &RandomDrawEngine,
        ctx: &mut SamplingContext,
        sink: &mut DiagnosticsSink,
    ) -> Result<(), ThreadSafeStdError> {
        let request = DrawRequest {
            num_reals,
            covariance,
            center,
            var_names: &self.var_names,
            draw_names,
            groups,
        };
        let drawn = engine.draw(&request, ctx, sink)?;
        self.real_names = drawn.real_names;
        self.var_names = drawn.var_names;
        self.reals = drawn.reals;
        self.rebuild_var_map();
        Ok(())
    }

    // --- persistence ---

    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        matrix_io::write_labeled_csv(path, "real_name", &self.real_names, &self.var_names, &self.reals.view())
    }

    /// Reads every column of a csv file.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Ensemble, ThreadSafeStdError> {
        let parsed = matrix_io::read_labeled_csv(path)?;
        Self::from_array(parsed.row_names, parsed.col_names, parsed.values)
    }

    /// Reads a csv file into an ensemble over `wanted`, in that order.
    ///
    /// Columns not in `wanted` are ignored. Every name in `required` must be in
    /// the header, otherwise all absent ones are reported. Wanted names absent
    /// from the file are zero-filled; the names actually found are returned.
    pub fn from_csv_columns<P: AsRef<Path>>(
        path: P,
        wanted: &[String],
        required: &[String],
    ) -> Result<(Ensemble, Vec<String>), ThreadSafeStdError> {
        let path = path.as_ref();
        let parsed = matrix_io::read_labeled_csv(path)?;
        let loaded = Self::from_array(parsed.row_names, parsed.col_names, parsed.values)?;
        loaded.select_columns(wanted, required, &format!("csv file {:?}", path))
    }

    fn select_columns(&self, wanted: &[String], required: &[String], source: &str) -> Result<(Ensemble, Vec<String>), ThreadSafeStdError> {
        let wanted = normalized(wanted);
        let mut missing = NameLookupError::new(format!("the following names were not found in {}", source));
        missing.missing_cols = normalized(required)
            .into_iter()
            .filter(|n| !self.var_map.contains_key(n))
            .collect();
        missing.into_result()?;

        let mut out = Ensemble::reserve(self.real_names.clone(), wanted.clone())?;
        let mut found = Vec::new();
        for (j, name) in wanted.iter().enumerate() {
            if let Some(&src) = self.var_map.get(name) {
                out.reals.column_mut(j).assign(&self.reals.column(src));
                found.push(name.clone());
            }
        }
        let ignored = self.var_names.len().saturating_sub(found.len());
        if ignored > 0 {
            debug!("{}: ignoring {} columns not requested", source, ignored);
        }
        trace!("{}: {} of {} requested columns present", source, found.len(), wanted.len());
        Ok((out, found))
    }

    fn to_labeled_entries(&self, transposed: bool) -> LabeledEntries {
        let (nrows, ncols) = self.shape();
        let mut entries = Vec::with_capacity(nrows * ncols);
        for ((i, j), &v) in self.reals.indexed_iter() {
            if transposed {
                entries.push((j, i, v));
            } else {
                entries.push((i, j, v));
            }
        }
        if transposed {
            LabeledEntries {
                row_names: self.var_names.clone(),
                col_names: self.real_names.clone(),
                entries,
            }
        } else {
            LabeledEntries {
                row_names: self.real_names.clone(),
                col_names: self.var_names.clone(),
                entries,
            }
        }
    }

    /// Modern binary layout, realizations as rows.
    pub fn to_binary<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        binary_codec::write_binary_file(path, &self.to_labeled_entries(false), BinaryLayout::Modern)
    }

    /// Legacy binary layout. With `transposed` the variables are written as rows,
    /// which is how observation ensembles fit the longer row-label field.
    pub fn to_binary_legacy<P: AsRef<Path>>(&self, path: P, transposed: bool) -> Result<(), ThreadSafeStdError> {
        binary_codec::write_binary_file(path, &self.to_labeled_entries(transposed), BinaryLayout::Legacy)
    }

    /// Reads either layout; `transposed` swaps the axes of legacy files only.
    pub fn from_binary<P: AsRef<Path>>(path: P, transposed: bool) -> Result<Ensemble, ThreadSafeStdError> {
        let (layout, decoded) = binary_codec::read_binary_file(path.as_ref())?;
        let mut reals = Array2::<f64>::zeros((decoded.nrows(), decoded.ncols()));
        for &(i, j, v) in &decoded.entries {
            reals[[i, j]] = v;
        }
        let loaded = if layout == BinaryLayout::Legacy && transposed {
            Self::from_array(decoded.col_names, decoded.row_names, reals.reversed_axes())?
        } else {
            Self::from_array(decoded.row_names, decoded.col_names, reals)?
        };
        info!(
            "Read {}x{} ensemble from {:?} ({:?} layout)",
            loaded.real_names.len(),
            loaded.var_names.len(),
            path.as_ref(),
            layout
        );
        Ok(loaded)
    }

    /// Like [`from_binary`](Self::from_binary) with the column selection rules of
    /// [`from_csv_columns`](Self::from_csv_columns).
    pub fn from_binary_columns<P: AsRef<Path>>(
        path: P,
        transposed: bool,
        wanted: &[String],
        required: &[String],
    ) -> Result<(Ensemble, Vec<String>), ThreadSafeStdError> {
        let loaded = Self::from_binary(path.as_ref(), transposed)?;
        loaded.select_columns(wanted, required, &format!("binary file {:?}", path.as_ref()))
    }

    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        let file = File::create(path.as_ref())
            .map_err(|e| format!("Failed to create file at {:?}: {}", path.as_ref(), e))?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| format!("Failed to serialize Ensemble: {}", e))?;
        Ok(())
    }

    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Ensemble, ThreadSafeStdError> {
        let file = File::open(path.as_ref())
            .map_err(|e| format!("Failed to open file at {:?}: {}", path.as_ref(), e))?;
        let mut reader = BufReader::new(file);
        let loaded: Ensemble = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| format!("Failed to deserialize Ensemble: {}", e))?;
        Ensemble::from_array(loaded.real_names, loaded.var_names, loaded.reals)
    }
}
