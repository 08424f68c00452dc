// src/rsvd.rs

//! Randomized truncated factorizations.
//!
//! Both routines sketch the range of the input with a Gaussian test matrix,
//! sharpen the sketch with a few power iterations, and solve a small dense
//! problem on the projected matrix. When the sketch width reaches the full
//! dimension the result matches the dense factorization up to rounding.

use log::{debug, trace, warn};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::ThreadSafeStdError;
use crate::linalg_backends::{BackendEigh, BackendQR, BackendSVD, LinAlgBackendProvider};

/// Tuning knobs for the randomized factorizations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RsvdConfig {
    /// Extra sketch columns beyond the requested rank.
    pub oversampling: usize,
    /// Number of power (subspace) iterations.
    pub power_iterations: usize,
    /// Seed for the Gaussian test matrix.
    pub seed: u64,
}

impl Default for RsvdConfig {
    fn default() -> Self {
        RsvdConfig {
            oversampling: 10,
            power_iterations: 2,
            seed: 2025,
        }
    }
}

/// Leading singular triples; `s` is descending, `u` and `v` hold singular vectors as columns.
#[derive(Debug, Clone)]
pub struct TruncatedSvd {
    pub u: Array2<f64>,
    pub s: Array1<f64>,
    pub v: Array2<f64>,
}

/// Leading eigenpairs of a symmetric matrix, eigenvalues descending.
#[derive(Debug, Clone)]
pub struct TruncatedEigh {
    pub eigenvalues: Array1<f64>,
    pub eigenvectors: Array2<f64>,
}

// Orthonormal basis for the range of `a`, refined by power iterations.
fn sketch_range_basis(
    a: &ArrayView2<f64>,
    sketch_width: usize,
    config: &RsvdConfig,
) -> Result<Array2<f64>, ThreadSafeStdError> {
    let backend = LinAlgBackendProvider::<f64>::new();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let omega = Array2::<f64>::random_using((a.ncols(), sketch_width), StandardNormal, &mut rng);

    let sketch_y = a.dot(&omega);
    let mut q_basis = backend
        .qr_q_factor(&sketch_y)
        .map_err(|e| format!("QR decomposition of initial sketch failed: {}", e))?;

    for iter_idx in 0..config.power_iterations {
        trace!("Randomized range finder power iteration {}/{}", iter_idx + 1, config.power_iterations);
        let q_tilde_candidate = a.t().dot(&q_basis);
        let q_tilde = backend
            .qr_q_factor(&q_tilde_candidate)
            .map_err(|e| format!("QR in power iteration {} failed: {}", iter_idx + 1, e))?;
        let q_candidate = a.dot(&q_tilde);
        q_basis = backend
            .qr_q_factor(&q_candidate)
            .map_err(|e| format!("QR in power iteration {} failed: {}", iter_idx + 1, e))?;
    }
    Ok(q_basis)
}

/// Randomized truncated SVD returning at most `k` components.
pub fn randomized_svd(
    a: &ArrayView2<f64>,
    k: usize,
    config: &RsvdConfig,
) -> Result<TruncatedSvd, ThreadSafeStdError> {
    let (m, n) = a.dim();
    let k = k.min(m.min(n));
    if k == 0 {
        debug!("Randomized SVD: empty input or k=0 (m={}, n={})", m, n);
        return Ok(TruncatedSvd {
            u: Array2::zeros((m, 0)),
            s: Array1::zeros(0),
            v: Array2::zeros((n, 0)),
        });
    }
    let sketch_width = (k + config.oversampling).min(m.min(n));
    trace!("Randomized SVD: k={}, sketch width={}, input {}x{}", k, sketch_width, m, n);

    let q_basis = sketch_range_basis(a, sketch_width, config)?;
    let projected_b = q_basis.t().dot(a);

    let backend = LinAlgBackendProvider::<f64>::new();
    let svd_b = backend
        .svd_into(projected_b, true, true)
        .map_err(|e| format!("SVD of projected matrix failed: {}", e))?;
    let u_b = svd_b.u.ok_or("SVD of projected matrix did not return U")?;
    let vt_b = svd_b.vt.ok_or("SVD of projected matrix did not return V")?;

    let rank = k.min(svd_b.s.len());
    if rank < k {
        warn!("Randomized SVD: projected rank {} below requested {}", rank, k);
    }
    let u = q_basis.dot(&u_b.slice(s![.., ..rank]));
    let v = vt_b.slice(s![..rank, ..]).t().to_owned();
    let s = svd_b.s.slice(s![..rank]).to_owned();
    Ok(TruncatedSvd { u, s, v })
}

/// Randomized truncated eigendecomposition of a symmetric matrix returning at most `k` pairs.
pub fn randomized_eigh(
    a: &ArrayView2<f64>,
    k: usize,
    config: &RsvdConfig,
) -> Result<TruncatedEigh, ThreadSafeStdError> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(format!("Randomized eigendecomposition requires a square matrix, got {:?}", a.dim()).into());
    }
    let k = k.min(n);
    if k == 0 {
        return Ok(TruncatedEigh {
            eigenvalues: Array1::zeros(0),
            eigenvectors: Array2::zeros((n, 0)),
        });
    }
    let sketch_width = (k + config.oversampling).min(n);
    trace!("Randomized eigh: k={}, sketch width={}, n={}", k, sketch_width, n);

    let q_basis = sketch_range_basis(a, sketch_width, config)?;
    let mut projected = q_basis.t().dot(a).dot(&q_basis);
    // Symmetrize against rounding before the dense solve.
    let projected_t = projected.t().to_owned();
    projected += &projected_t;
    projected.mapv_inplace(|v| v * 0.5);

    let backend = LinAlgBackendProvider::<f64>::new();
    let small = backend
        .eigh_upper(&projected)
        .map_err(|e| format!("Eigendecomposition of projected matrix failed: {}", e))?;

    // Ascending -> descending, keep the leading k.
    let order: Vec<usize> = (0..small.eigenvalues.len()).rev().take(k).collect();
    let eigenvalues = Array1::from_iter(order.iter().map(|&i| small.eigenvalues[i]));
    let selected = small.eigenvectors.select(Axis(1), &order);
    let eigenvectors = q_basis.dot(&selected);
    Ok(TruncatedEigh { eigenvalues, eigenvectors })
}
