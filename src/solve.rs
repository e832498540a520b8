use anyhow::{anyhow, ensure, Result};
use nalgebra::{DMatrix, RealField};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use ndarray::{Array1, Zip};

use crate::incidence::FusionIncidence;

/// Solves the U-update system `A u = rhs` for a fixed, prefactored `A`.
pub trait LinearSolve<F> {
    fn solve(&self, rhs: &Array1<F>) -> Result<Array1<F>>;
}

/// Any closure `&Array1<F> -> Result<Array1<F>>` used as a solver.
///
///     use ndarray::arr1;
///     use convexpath::{LinearSolve, SolveFn};
///
///     let halve = SolveFn(|b: &ndarray::Array1<f64>| Ok(b.mapv(|x| x / 2.)));
///     assert_eq!(halve.solve(&arr1(&[2., 4.])).unwrap(), arr1(&[1., 2.]));
pub struct SolveFn<T>(pub T);

impl<F, T> LinearSolve<F> for SolveFn<T>
where
    T: Fn(&Array1<F>) -> Result<Array1<F>>,
{
    fn solve(&self, rhs: &Array1<F>) -> Result<Array1<F>> {
        (self.0)(rhs)
    }
}

/// Sparse Cholesky factor of the U-update system matrix.
pub struct SparseCholesky<F>
where
    F: RealField,
{
    factor: CscCholesky<F>,
    dim: usize,
}

impl<F> SparseCholesky<F>
where
    F: RealField + Copy,
{
    pub fn factor(matrix: &CscMatrix<F>) -> Result<Self> {
        ensure!(
            matrix.nrows() == matrix.ncols(),
            "system matrix must be square, got {} x {}",
            matrix.nrows(),
            matrix.ncols()
        );
        let factor = CscCholesky::factor(matrix)
            .map_err(|e| anyhow!("cholesky factorization failed: {:?}", e))?;
        Ok(Self {
            factor,
            dim: matrix.nrows(),
        })
    }

    /// Factor `system_matrix(incidence, rho)`
    pub fn for_incidence(incidence: &FusionIncidence, rho: F) -> Result<Self> {
        Self::factor(&system_matrix(incidence, rho))
    }
}

impl<F> LinearSolve<F> for SparseCholesky<F>
where
    F: RealField + Copy,
{
    fn solve(&self, rhs: &Array1<F>) -> Result<Array1<F>> {
        ensure!(
            rhs.len() == self.dim,
            "right-hand side has length {}, system has {}",
            rhs.len(),
            self.dim
        );
        let b = DMatrix::from_iterator(self.dim, 1, rhs.iter().copied());
        let x = self.factor.solve(&b);
        ensure!(
            x.iter().all(|v| v.is_finite()),
            "linear solve produced non-finite values"
        );
        Ok(Array1::from_iter(x.iter().copied()))
    }
}

/// Assemble `(1/rho) I + DᵗD` for the difference operator of `incidence`.
///
/// The ADMM U-update scales its right-hand side by `1/rho`, so this is
/// `rho DᵗD + I` divided through by `rho`.
pub fn system_matrix<F>(incidence: &FusionIncidence, rho: F) -> CscMatrix<F>
where
    F: RealField + Copy,
{
    let n = incidence.n_coords();
    let mut coo = CooMatrix::new(n, n);
    let diag = F::one() / rho;
    (0..n).for_each(|i| coo.push(i, i, diag));
    Zip::from(incidence.first())
        .and(incidence.second())
        .for_each(|&i, &j| {
            coo.push(i, i, F::one());
            coo.push(j, j, F::one());
            coo.push(i, j, -F::one());
            coo.push(j, i, -F::one());
        });
    CscMatrix::from(&coo)
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    use super::{system_matrix, LinearSolve, SparseCholesky};
    use crate::incidence::FusionIncidence;
    use crate::operator::{adjoint, difference};

    #[test]
    fn system_matrix_matches_operator() {
        let inc = FusionIncidence::from_edges(3, 2, &[(0, 1), (1, 2), (0, 2)]).unwrap();
        let rho = 2.0;
        let a = system_matrix(&inc, rho);
        let u = arr1(&[1., -2., 0.5, 3., -1., 4.]);
        let direct = &u / rho + &adjoint(&difference(&u, &inc), &inc);
        let dense = nalgebra::DMatrix::from(&a);
        let prod = &dense * nalgebra::DVector::from_iterator(6, u.iter().copied());
        for k in 0..6 {
            assert_abs_diff_eq!(prod[k], direct[k], epsilon = 1e-12);
        }
    }

    #[test]
    fn cholesky_solves() {
        let inc = FusionIncidence::from_edges(4, 1, &[(0, 1), (1, 2), (2, 3)]).unwrap();
        let solver = SparseCholesky::for_incidence(&inc, 1.0).unwrap();
        let rhs = arr1(&[1., 0., -2., 5.]);
        let u = solver.solve(&rhs).unwrap();
        let back = &u + &adjoint(&difference(&u, &inc), &inc);
        for k in 0..4 {
            assert_abs_diff_eq!(back[k], rhs[k], epsilon = 1e-10);
        }
    }

    #[test]
    fn wrong_length_is_an_error() {
        let inc = FusionIncidence::from_edges(2, 1, &[(0, 1)]).unwrap();
        let solver = SparseCholesky::for_incidence(&inc, 1.0).unwrap();
        assert!(solver.solve(&arr1(&[1., 2., 3.])).is_err());
    }
}
