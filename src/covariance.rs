// src/covariance.rs

use log::{debug, info};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};

use crate::error::{find_duplicates, normalize_label, NameLookupError, ThreadSafeStdError};
use crate::linalg_backends::{BackendCholesky, LinAlgBackendProvider};
use crate::named_matrix::{MatrixData, MatrixKind, NamedMatrix, SvdFactors, VersionedCache};
use crate::scenario::{missing_names, ControlScenario, ObservationRecord, ParameterRecord, PriorInformationRecord};
use crate::sparse::SparseMatrix;

/// Variance assigned to observations and prior-information terms with no weight.
/// Equivalent to a weight of 1e-30, so zero-weight prior information takes the same path.
pub const ZERO_WEIGHT_VARIANCE: f64 = 1.0e60;

const SYMMETRY_TOLERANCE: f64 = 1e-10;

/// Symmetric [`NamedMatrix`] with identical row and column labels.
///
/// Read access goes through `Deref`; every mutation is routed through this
/// type so the cached Cholesky factor can check the matrix version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CovarianceMatrix {
    matrix: NamedMatrix,
    #[serde(skip)]
    cholesky_cache: VersionedCache<Array2<f64>>,
}

impl PartialEq for CovarianceMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.matrix == other.matrix
    }
}

impl Deref for CovarianceMatrix {
    type Target = NamedMatrix;

    fn deref(&self) -> &NamedMatrix {
        &self.matrix
    }
}

impl CovarianceMatrix {
    /// Wraps `matrix`, which must be square with identical labels on both axes.
    ///
    /// General storage is checked for symmetry and stored as symmetric.
    pub fn from_named_matrix(matrix: NamedMatrix) -> Result<Self, ThreadSafeStdError> {
        if !matrix.is_square() || matrix.row_names() != matrix.col_names() {
            return Err(format!(
                "CovarianceMatrix: matrix must be square with identical row and column names ({}x{})",
                matrix.nrows(),
                matrix.ncols()
            )
            .into());
        }
        let matrix = match matrix.data() {
            MatrixData::General(m) => {
                if !m.is_symmetric(SYMMETRY_TOLERANCE) {
                    return Err("CovarianceMatrix: matrix is not symmetric".into());
                }
                let names = matrix.row_names().to_vec();
                NamedMatrix::new(names.clone(), names, MatrixData::SymmetricSparse(m.clone()))?
            }
            _ => matrix,
        };
        Ok(Self {
            matrix,
            cholesky_cache: VersionedCache::default(),
        })
    }

    /// Diagonal covariance with the given variances.
    pub fn from_variances(names: Vec<String>, variances: Array1<f64>) -> Result<Self, ThreadSafeStdError> {
        Self::from_named_matrix(NamedMatrix::from_diagonal(names, variances)?)
    }

    /// Uniform-variance diagonal covariance over the current labels.
    pub fn diagonal(&self, value: f64) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        Self::from_variances(self.names().to_vec(), Array1::from_elem(self.nrows(), value))
    }

    /// Diagonal part of `other`.
    pub fn from_diagonal(other: &CovarianceMatrix) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        Self::from_variances(other.names().to_vec(), other.matrix.diagonal())
    }

    pub fn names(&self) -> &[String] {
        self.matrix.row_names()
    }

    pub fn as_named_matrix(&self) -> &NamedMatrix {
        &self.matrix
    }

    pub fn into_named_matrix(self) -> NamedMatrix {
        self.matrix
    }

    pub fn is_diagonal(&self) -> bool {
        self.matrix.kind() == MatrixKind::Diagonal
    }

    /// Variances per name, in label order.
    pub fn variances(&self) -> Array1<f64> {
        self.matrix.diagonal()
    }

    /// Lower Cholesky factor, cached until the next mutation.
    pub fn cholesky(&mut self) -> Result<&Array2<f64>, ThreadSafeStdError> {
        let version = self.matrix.version();
        let data = self.matrix.data();
        self.cholesky_cache.get_or_try_insert_with(version, || match data {
            MatrixData::Diagonal(d) => {
                if let Some(pos) = d.iter().position(|v| *v < 0.0) {
                    return Err(format!("CovarianceMatrix::cholesky: negative variance at position {}", pos).into());
                }
                Ok(Array2::from_diag(&d.mapv(f64::sqrt)))
            }
            other => {
                debug!("CovarianceMatrix::cholesky: factorizing {}x{} matrix", other.shape().0, other.shape().1);
                LinAlgBackendProvider::<f64>::new()
                    .cholesky_lower(&other.to_dense())
                    .map_err(|e| format!("CovarianceMatrix::cholesky: {}", e).into())
            }
        })
    }

    pub fn svd(&mut self) -> Result<&SvdFactors, ThreadSafeStdError> {
        self.matrix.svd()
    }

    pub fn inv(&self) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        Self::from_named_matrix(self.matrix.inv()?)
    }

    pub fn inv_ip(&mut self) -> Result<(), ThreadSafeStdError> {
        self.matrix.inv_ip()
    }

    pub fn scale_ip(&mut self, factor: f64) {
        self.matrix.scale_ip(factor);
    }

    /// Sub-covariance over `names`, in that order.
    pub fn get(&self, names: &[String]) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        Self::from_named_matrix(self.matrix.get(names, names)?)
    }

    /// Like [`get`](Self::get), then removes `names` from `self`.
    pub fn extract(&mut self, names: &[String]) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        Self::from_named_matrix(self.matrix.extract(names, names)?)
    }

    pub fn drop(&mut self, names: &[String]) -> Result<(), ThreadSafeStdError> {
        self.matrix.drop_rows_and_cols(names, names)
    }

    /// Loads a `.unc` uncertainty file or any matrix file [`NamedMatrix::from_file`] understands.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        let path = path.as_ref();
        let is_unc = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("unc"))
            .unwrap_or(false);
        if is_unc {
            Self::from_uncertainty_file(path)
        } else {
            Self::from_named_matrix(NamedMatrix::from_file(path)?)
                .map_err(|e| format!("CovarianceMatrix::from_file {:?}: {}", path, e).into())
        }
    }

    /// Reads `STANDARD_DEVIATION` and `COVARIANCE_MATRIX` blocks and assembles
    /// them block-diagonally in order of appearance.
    pub fn from_uncertainty_file<P: AsRef<Path>>(path: P) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| format!("cannot open uncertainty file {:?}: {}", path, e))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let blocks = parse_uncertainty_blocks(&text, &base_dir)
            .map_err(|e| format!("uncertainty file {:?}: {}", path, e))?;

        let names: Vec<String> = blocks.iter().flat_map(|b| b.names.iter().cloned()).collect();
        let dups = find_duplicates(&names);
        if !dups.is_empty() {
            return Err(format!(
                "uncertainty file {:?}: names listed in more than one block: {}",
                path,
                dups.join(",")
            )
            .into());
        }
        if names.is_empty() {
            return Err(format!("uncertainty file {:?} has no entries", path).into());
        }

        let all_std = blocks.iter().all(|b| !b.from_matrix);
        let data = if all_std {
            let variances: Vec<f64> = blocks.iter().flat_map(|b| b.values.diagonal().to_vec()).collect();
            MatrixData::Diagonal(Array1::from(variances))
        } else {
            let parts: Vec<&SparseMatrix> = blocks.iter().map(|b| &b.values).collect();
            MatrixData::SymmetricSparse(SparseMatrix::block_diagonal(&parts))
        };
        info!(
            "Loaded {} names from {} block(s) of uncertainty file {:?}",
            names.len(),
            blocks.len(),
            path
        );
        Self::from_named_matrix(NamedMatrix::new(names.clone(), names, data)?)
    }

    /// Writes an uncertainty file. Diagonal matrices become a `STANDARD_DEVIATION`
    /// block; anything else is written to a sibling `<stem>.mat` referenced by a
    /// `COVARIANCE_MATRIX` block.
    pub fn to_uncertainty_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| format!("Failed to create uncertainty file {:?}: {}", path, e))?;
        let mut out = BufWriter::new(file);
        let write_err = |e: std::io::Error| format!("Failed to write uncertainty file {:?}: {}", path, e);
        match self.matrix.data() {
            MatrixData::Diagonal(d) => {
                writeln!(out, "START STANDARD_DEVIATION").map_err(write_err)?;
                for (name, var) in self.names().iter().zip(d.iter()) {
                    writeln!(out, "  {:<20}  {:e}", name.to_lowercase(), var.sqrt()).map_err(write_err)?;
                }
                writeln!(out, "END STANDARD_DEVIATION").map_err(write_err)?;
            }
            _ => {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| format!("uncertainty file path {:?} has no file stem", path))?;
                let mat_name = format!("{}.mat", stem);
                let mat_path = path.parent().map(|p| p.join(&mat_name)).unwrap_or_else(|| PathBuf::from(&mat_name));
                self.matrix.to_ascii(&mat_path)?;
                writeln!(out, "START COVARIANCE_MATRIX").map_err(write_err)?;
                writeln!(out, "  file {}", mat_name).map_err(write_err)?;
                writeln!(out, "  variance_multiplier 1.0").map_err(write_err)?;
                writeln!(out, "END COVARIANCE_MATRIX").map_err(write_err)?;
            }
        }
        out.flush().map_err(write_err)?;
        Ok(())
    }

    /// Diagonal prior covariance from parameter bounds: `((ub - lb) / sigma_range)²`,
    /// in log10 space for log-transformed parameters. Fixed and tied parameters are skipped.
    pub fn from_parameter_bounds(parameters: &[ParameterRecord], sigma_range: f64) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        if sigma_range <= 0.0 {
            return Err(format!("CovarianceMatrix::from_parameter_bounds: sigma range must be positive, got {}", sigma_range).into());
        }
        let mut names = Vec::new();
        let mut variances = Vec::new();
        for rec in parameters.iter().filter(|p| p.is_adjustable()) {
            let (lower, upper) = if rec.is_log() {
                (rec.lower_bound.log10(), rec.upper_bound.log10())
            } else {
                (rec.lower_bound, rec.upper_bound)
            };
            names.push(rec.name.clone());
            variances.push(((upper - lower) / sigma_range).powi(2));
        }
        if names.is_empty() {
            return Err("CovarianceMatrix::from_parameter_bounds: no non-fixed/non-tied parameters found".into());
        }
        Self::from_variances(names, Array1::from(variances))
    }

    /// Diagonal noise covariance `(1/w)²` from observation and prior-information weights.
    ///
    /// Zero-weight entries are kept with [`ZERO_WEIGHT_VARIANCE`]; at least one
    /// entry must carry a positive weight.
    pub fn from_observation_weights(
        observations: &[ObservationRecord],
        prior_information: &[PriorInformationRecord],
    ) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        let weighted = observations
            .iter()
            .map(|o| (&o.name, o.weight))
            .chain(prior_information.iter().map(|p| (&p.name, p.weight)));
        let mut names = Vec::new();
        let mut variances = Vec::new();
        let mut nonzero = 0usize;
        for (name, weight) in weighted {
            names.push(name.clone());
            if weight > 0.0 {
                nonzero += 1;
                variances.push((1.0 / weight).powi(2));
            } else {
                variances.push(ZERO_WEIGHT_VARIANCE);
            }
        }
        if nonzero == 0 {
            return Err("CovarianceMatrix::from_observation_weights: no non-zero weighted observations found".into());
        }
        Self::from_variances(names, Array1::from(variances))
    }

    /// Prior parameter covariance (`is_parameter`) or observation noise covariance.
    ///
    /// A covariance file named in the scenario options is loaded through
    /// [`from_file`](Self::from_file) and must cover every adjustable parameter,
    /// or every nonzero-weight observation; all absent names are reported
    /// together. Without a file the bounds or weights are used.
    pub fn from_scenario(scenario: &ControlScenario, is_parameter: bool) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        let filename = if is_parameter {
            scenario.options.par_cov_filename.as_ref()
        } else {
            scenario.options.obs_cov_filename.as_ref()
        };
        let Some(path) = filename else {
            return if is_parameter {
                Self::from_parameter_bounds(scenario.parameters(), scenario.options.par_sigma_range)
            } else {
                Self::from_observation_weights(scenario.observations(), scenario.prior_information())
            };
        };

        let cov = Self::from_file(path)?;
        let (required, kind) = if is_parameter {
            (scenario.adjustable_parameter_names(), "parameters")
        } else {
            (scenario.nonzero_weight_observation_names(), "observations")
        };
        let mut missing = NameLookupError::new(format!("{} not found in covariance file {:?}", kind, path));
        missing.missing_rows = missing_names(&required, cov.names());
        missing.into_result()?;
        info!("Loaded {}x{} {} covariance from {:?}", cov.names().len(), cov.names().len(), kind, path);
        Ok(cov)
    }
}

struct UncertaintyBlock {
    names: Vec<String>,
    values: SparseMatrix,
    from_matrix: bool,
}

fn parse_uncertainty_blocks(text: &str, base_dir: &Path) -> Result<Vec<UncertaintyBlock>, ThreadSafeStdError> {
    let mut blocks = Vec::new();
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

    while let Some((line_no, line)) = lines.next() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let keyword = tokens[0].to_uppercase();
        if keyword != "START" || tokens.len() < 2 {
            return Err(format!("line {}: expected 'START <block>', found '{}'", line_no, line).into());
        }
        match tokens[1].to_uppercase().as_str() {
            "STANDARD_DEVIATION" => {
                let mut names = Vec::new();
                let mut variances = Vec::new();
                loop {
                    let (n, l) = lines
                        .next()
                        .ok_or("EOF encountered while reading standard_deviation block")?;
                    let toks: Vec<&str> = l.split_whitespace().collect();
                    if toks[0].eq_ignore_ascii_case("END") {
                        break;
                    }
                    if toks.len() < 2 {
                        return Err(format!("line {}: expected 'name sigma', found '{}'", n, l).into());
                    }
                    let sigma: f64 = toks[1]
                        .parse()
                        .map_err(|e| format!("line {}: bad standard deviation '{}': {}", n, toks[1], e))?;
                    names.push(normalize_label(toks[0]));
                    variances.push(sigma * sigma);
                }
                blocks.push(UncertaintyBlock {
                    names,
                    values: SparseMatrix::from_diagonal(&Array1::from(variances)),
                    from_matrix: false,
                });
            }
            "COVARIANCE_MATRIX" => {
                let mut file: Option<String> = None;
                let mut multiplier = 1.0;
                loop {
                    let (n, l) = lines
                        .next()
                        .ok_or("EOF encountered while reading covariance_matrix block")?;
                    let cleaned = l.replace(['"', '\''], "");
                    let toks: Vec<&str> = cleaned.split_whitespace().collect();
                    let key = toks[0].to_uppercase();
                    if key == "END" {
                        break;
                    }
                    let value = toks
                        .last()
                        .filter(|_| toks.len() > 1)
                        .ok_or_else(|| format!("line {}: '{}' has no value", n, l))?;
                    if key == "FILE" {
                        file = Some(value.to_string());
                    } else if key.starts_with("VARIANCE") {
                        multiplier = value
                            .parse()
                            .map_err(|e| format!("line {}: bad variance multiplier '{}': {}", n, value, e))?;
                    } else {
                        return Err(format!("line {}: unrecognized token '{}' in covariance_matrix block", n, toks[0]).into());
                    }
                }
                let file = file.ok_or("covariance_matrix block has no 'file' entry")?;
                let cov_path = base_dir.join(&file);
                debug!("Reading covariance block from {:?} (multiplier {})", cov_path, multiplier);
                let cov = CovarianceMatrix::from_file(&cov_path)?;
                let mut values = cov.to_sparse();
                values.scale(multiplier);
                blocks.push(UncertaintyBlock {
                    names: cov.names().to_vec(),
                    values,
                    from_matrix: true,
                });
            }
            other => return Err(format!("line {}: unrecognized block '{}'", line_no, other).into()),
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::TransformKind;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn diagonal_round_trips_through_uncertainty_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = CovarianceMatrix::from_variances(names(&["X", "Y"]), array![1.0, 1.0]).unwrap();
        let cov = base.diagonal(4.0).unwrap();
        let path = dir.path().join("prior.unc");
        cov.to_uncertainty_file(&path).unwrap();
        let back = CovarianceMatrix::from_uncertainty_file(&path).unwrap();
        assert!(back.is_diagonal());
        assert_eq!(back.names(), &names(&["X", "Y"])[..]);
        for v in back.variances().iter() {
            assert_abs_diff_eq!(v.sqrt(), 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn full_matrix_round_trips_through_sibling_mat_file() {
        let dir = tempfile::tempdir().unwrap();
        let dense = array![[2.0, 0.5], [0.5, 1.0]];
        let cov = CovarianceMatrix::from_named_matrix(NamedMatrix::from_dense(names(&["A", "B"]), names(&["A", "B"]), &dense).unwrap()).unwrap();
        let path = dir.path().join("full.unc");
        cov.to_uncertainty_file(&path).unwrap();
        assert!(dir.path().join("full.mat").exists());
        let back = CovarianceMatrix::from_file(&path).unwrap();
        assert_eq!(back.kind(), MatrixKind::SymmetricSparse);
        assert_abs_diff_eq!(back.to_dense(), dense, epsilon = 1e-12);
    }

    #[test]
    fn mixed_blocks_assemble_block_diagonally() {
        let dir = tempfile::tempdir().unwrap();
        let block = CovarianceMatrix::from_named_matrix(
            NamedMatrix::from_dense(names(&["B", "C"]), names(&["B", "C"]), &array![[1.0, 0.2], [0.2, 1.0]]).unwrap(),
        )
        .unwrap();
        block.to_ascii(dir.path().join("bc.mat")).unwrap();
        let unc = "# comment\nstart standard_deviation\n a 3.0\nend standard_deviation\nSTART COVARIANCE_MATRIX\n file \"bc.mat\"\n variance_multiplier 2.0\nEND COVARIANCE_MATRIX\nstart standard_deviation\n d 0.5\nend standard_deviation\n";
        let path = dir.path().join("mixed.unc");
        fs::write(&path, unc).unwrap();
        let cov = CovarianceMatrix::from_uncertainty_file(&path).unwrap();
        assert_eq!(cov.names(), &names(&["A", "B", "C", "D"])[..]);
        let dense = cov.to_dense();
        assert_abs_diff_eq!(dense[[0, 0]], 9.0);
        assert_abs_diff_eq!(dense[[1, 2]], 0.4);
        assert_abs_diff_eq!(dense[[2, 1]], 0.4);
        assert_abs_diff_eq!(dense[[3, 3]], 0.25);
        assert_abs_diff_eq!(dense[[0, 1]], 0.0);
        assert_abs_diff_eq!(dense[[2, 3]], 0.0);
    }

    #[test]
    fn duplicate_names_across_blocks_are_all_reported() {
        let dir = tempfile::tempdir().unwrap();
        let unc = "START STANDARD_DEVIATION\n a 1\n b 1\nEND STANDARD_DEVIATION\nSTART STANDARD_DEVIATION\n b 2\n a 2\nEND STANDARD_DEVIATION\n";
        let path = dir.path().join("dup.unc");
        fs::write(&path, unc).unwrap();
        let msg = CovarianceMatrix::from_uncertainty_file(&path).unwrap_err().to_string();
        assert!(msg.contains('A') && msg.contains('B'), "{}", msg);
    }

    #[test]
    fn unterminated_block_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eof.unc");
        fs::write(&path, "START STANDARD_DEVIATION\n a 1\n").unwrap();
        assert!(CovarianceMatrix::from_uncertainty_file(&path).is_err());
    }

    #[test]
    fn parameter_bounds_skip_fixed_and_tied() {
        let params = vec![
            ParameterRecord::new("p1", 1.0, 0.0, 8.0),
            ParameterRecord::new("p2", 10.0, 1.0, 10000.0).with_transform(TransformKind::Log),
            ParameterRecord::new("p3", 1.0, 0.0, 2.0).with_transform(TransformKind::Fixed),
            ParameterRecord::new("p4", 1.0, 0.0, 2.0).with_transform(TransformKind::Tied { parent: "p1".into() }),
        ];
        let cov = CovarianceMatrix::from_parameter_bounds(&params, 4.0).unwrap();
        assert_eq!(cov.names(), &names(&["P1", "P2"])[..]);
        assert_abs_diff_eq!(cov.variances(), array![4.0, 1.0], epsilon = 1e-12);

        let frozen = vec![ParameterRecord::new("p3", 1.0, 0.0, 2.0).with_transform(TransformKind::Fixed)];
        assert!(CovarianceMatrix::from_parameter_bounds(&frozen, 4.0).is_err());
    }

    #[test]
    fn observation_weights_use_sentinel_for_zero_weight() {
        let obs = vec![
            ObservationRecord::new("o1", 1.0, 2.0, "g"),
            ObservationRecord::new("o2", 1.0, 0.0, "g"),
        ];
        let pi = vec![PriorInformationRecord::new("pi1", 0.5), PriorInformationRecord::new("pi2", 0.0)];
        let cov = CovarianceMatrix::from_observation_weights(&obs, &pi).unwrap();
        assert_abs_diff_eq!(cov.variances(), array![0.25, ZERO_WEIGHT_VARIANCE, 4.0, ZERO_WEIGHT_VARIANCE]);
        assert!(((1.0f64 / 1e-30).powi(2) / ZERO_WEIGHT_VARIANCE - 1.0).abs() < 1e-12);

        let silent = vec![ObservationRecord::new("o2", 1.0, 0.0, "g")];
        assert!(CovarianceMatrix::from_observation_weights(&silent, &[]).is_err());
    }

    fn file_scenario(par_cov: Option<PathBuf>, obs_cov: Option<PathBuf>) -> ControlScenario {
        ControlScenario::new(
            vec![
                ParameterRecord::new("hk", 10.0, 1.0, 100.0).with_transform(TransformKind::Log),
                ParameterRecord::new("rch", 1.0, 0.5, 1.5),
                ParameterRecord::new("sy", 0.2, 0.1, 0.3),
                ParameterRecord::new("top", 30.0, 30.0, 30.0).with_transform(TransformKind::Fixed),
            ],
            vec![
                ObservationRecord::new("h1", 1.0, 2.0, "heads"),
                ObservationRecord::new("h2", 1.0, 0.0, "heads"),
            ],
            vec![],
            crate::scenario::EnsembleOptions {
                par_cov_filename: par_cov,
                obs_cov_filename: obs_cov,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn scenario_without_files_uses_bounds_and_weights() {
        let sc = file_scenario(None, None);
        let par = CovarianceMatrix::from_scenario(&sc, true).unwrap();
        assert_eq!(par.names(), &names(&["HK", "RCH", "SY"])[..]);
        let obs = CovarianceMatrix::from_scenario(&sc, false).unwrap();
        assert_abs_diff_eq!(obs.variances(), array![0.25, ZERO_WEIGHT_VARIANCE]);
    }

    #[test]
    fn parameter_covariance_file_must_cover_adjustable_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("par.unc");
        fs::write(&path, "START STANDARD_DEVIATION
 hk 0.5
 top 1.0
END STANDARD_DEVIATION
").unwrap();
        let sc = file_scenario(Some(path), None);
        let err = CovarianceMatrix::from_scenario(&sc, true).unwrap_err();
        let lookup = err.downcast_ref::<NameLookupError>().expect("typed lookup error");
        assert_eq!(lookup.missing_rows, names(&["RCH", "SY"]));
    }

    #[test]
    fn parameter_covariance_file_replaces_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("par.mat");
        let labels = names(&["SY", "RCH", "HK"]);
        let dense = array![[0.01, 0.0, 0.0], [0.0, 0.04, 0.01], [0.0, 0.01, 0.09]];
        NamedMatrix::from_dense(labels.clone(), labels.clone(), &dense).unwrap().to_ascii(&path).unwrap();
        let sc = file_scenario(Some(path), None);
        let cov = CovarianceMatrix::from_scenario(&sc, true).unwrap();
        assert_eq!(cov.names(), &labels[..]);
        assert_abs_diff_eq!(cov.to_dense(), dense, epsilon = 1e-12);
    }

    #[test]
    fn observation_covariance_file_may_omit_zero_weight_observations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.unc");
        fs::write(&path, "START STANDARD_DEVIATION
 h1 0.1
END STANDARD_DEVIATION
").unwrap();
        let sc = file_scenario(None, Some(path));
        let cov = CovarianceMatrix::from_scenario(&sc, false).unwrap();
        assert_eq!(cov.names(), &names(&["H1"])[..]);
        assert_abs_diff_eq!(cov.variances(), array![0.01], epsilon = 1e-12);
    }

    #[test]
    fn cholesky_cache_tracks_mutation() {
        let dense = array![[4.0, 2.0], [2.0, 3.0]];
        let mut cov = CovarianceMatrix::from_named_matrix(NamedMatrix::from_dense(names(&["A", "B"]), names(&["A", "B"]), &dense).unwrap()).unwrap();
        let l = cov.cholesky().unwrap().clone();
        assert_abs_diff_eq!(l.dot(&l.t()), dense, epsilon = 1e-12);
        cov.scale_ip(4.0);
        let l2 = cov.cholesky().unwrap().clone();
        assert_abs_diff_eq!(l2, &l * 2.0, epsilon = 1e-12);
    }

    #[test]
    fn non_symmetric_general_matrix_is_rejected() {
        let m = NamedMatrix::from_dense(names(&["A", "B"]), names(&["A", "B"]), &array![[1.0, 2.0], [0.0, 1.0]]).unwrap();
        assert!(CovarianceMatrix::from_named_matrix(m).is_err());
    }
}
