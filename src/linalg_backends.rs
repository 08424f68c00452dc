// src/linalg_backends.rs

use ndarray::{Array1, Array2};
use ndarray_linalg::{
    Cholesky as NdLinalgCholesky, Eigh as NdLinalgEigh, Inverse as NdLinalgInverse, InverseH as NdLinalgInverseH,
    QR as NdLinalgQR, SVDInto as NdLinalgSVDInto, UPLO,
};
use std::marker::PhantomData;

use crate::error::ThreadSafeStdError;

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput<F: 'static> {
    /// Eigenvalues in ascending order.
    pub eigenvalues: Array1<F>,
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<F>,
}

/// Symmetric eigendecomposition reading the upper triangle.
pub trait BackendEigh<F: 'static + Copy + Send + Sync> {
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, ThreadSafeStdError>;
}

/// Thin QR decomposition, returning only Q.
pub trait BackendQR<F: 'static + Copy + Send + Sync> {
    fn qr_q_factor(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError>;
}

/// Output of a Singular Value Decomposition.
#[derive(Debug)]
pub struct SVDOutput<F: 'static> {
    pub u: Option<Array2<F>>,
    pub s: Array1<F>,
    pub vt: Option<Array2<F>>,
}

pub trait BackendSVD<F: 'static + Copy + Send + Sync> {
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>, ThreadSafeStdError>;
}

/// Lower Cholesky factor `L` with `A = L Lᵀ`. Fails when `A` is not positive definite.
pub trait BackendCholesky<F: 'static + Copy + Send + Sync> {
    fn cholesky_lower(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError>;
}

/// Inverse of a symmetric (possibly indefinite) matrix through a Bunch-Kaufman `LDLᵀ` factorization.
pub trait BackendSymmetricInverse<F: 'static + Copy + Send + Sync> {
    fn inverse_symmetric(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError>;
}

/// General square inverse through an LU factorization.
pub trait BackendInverse<F: 'static + Copy + Send + Sync> {
    fn inverse_general(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError>;
}

/// LAPACK-backed implementation through ndarray-linalg.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_dyn_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendEigh<f64> for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, ThreadSafeStdError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(format!("Eigendecomposition requires a square matrix, got {:?}", matrix.dim()).into());
        }
        if matrix.is_empty() {
            return Ok(EighOutput { eigenvalues: Array1::zeros(0), eigenvectors: Array2::zeros((0, 0)) });
        }
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

impl BackendQR<f64> for NdarrayLinAlgBackend {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        let (q_factor, _r) = matrix.qr().map_err(to_dyn_error)?;
        Ok(q_factor)
    }
}

impl BackendSVD<f64> for NdarrayLinAlgBackend {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<f64>, ThreadSafeStdError> {
        let (nrows, ncols) = matrix.dim();
        if matrix.is_empty() {
            let k = nrows.min(ncols);
            return Ok(SVDOutput {
                u: if compute_u { Some(Array2::zeros((nrows, nrows))) } else { None },
                s: Array1::zeros(k),
                vt: if compute_v { Some(Array2::zeros((ncols, ncols))) } else { None },
            });
        }
        let (u, s, vt) = matrix.svd_into(compute_u, compute_v).map_err(to_dyn_error)?;
        Ok(SVDOutput { u, s, vt })
    }
}

impl BackendCholesky<f64> for NdarrayLinAlgBackend {
    fn cholesky_lower(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        if matrix.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }
        matrix
            .cholesky(UPLO::Lower)
            .map_err(|e| format!("Cholesky factorization failed (matrix not positive definite?): {}", e).into())
    }
}

impl BackendSymmetricInverse<f64> for NdarrayLinAlgBackend {
    fn inverse_symmetric(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        if matrix.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }
        let inverse = matrix
            .invh()
            .map_err(|e| -> ThreadSafeStdError { format!("Symmetric LDLT solve failed: {}", e).into() })?;
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err("Symmetric LDLT solve produced non-finite values (singular matrix)".into());
        }
        Ok(inverse)
    }
}

impl BackendInverse<f64> for NdarrayLinAlgBackend {
    fn inverse_general(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        if matrix.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }
        let inverse = matrix
            .inv()
            .map_err(|e| -> ThreadSafeStdError { format!("LU inverse failed: {}", e).into() })?;
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err("LU inverse produced non-finite values (singular matrix)".into());
        }
        Ok(inverse)
    }
}

/// Dispatch handle used throughout the crate. Selects the concrete backend at compile time.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

impl<F> BackendEigh<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendEigh<F>,
{
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.eigh_upper(matrix)
    }
}

impl<F> BackendQR<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendQR<F>,
{
    fn qr_q_factor(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.qr_q_factor(matrix)
    }
}

impl<F> BackendSVD<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendSVD<F>,
{
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.svd_into(matrix, compute_u, compute_v)
    }
}

impl<F> BackendCholesky<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendCholesky<F>,
{
    fn cholesky_lower(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.cholesky_lower(matrix)
    }
}

impl<F> BackendSymmetricInverse<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendSymmetricInverse<F>,
{
    fn inverse_symmetric(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.inverse_symmetric(matrix)
    }
}

impl<F> BackendInverse<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendInverse<F>,
{
    fn inverse_general(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.inverse_general(matrix)
    }
}
