use anyhow::{ensure, Result};
use ndarray::{Array1, Zip};
use num_traits::Float;

use crate::config::InnerSolve;
use crate::incidence::{FusionGraph, FusionIncidence};
use crate::operator::{adjoint, difference};
use crate::prox::Shrinkage;
use crate::solve::LinearSolve;

/// Primal centroids, edge differences and dual multipliers of one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmmState<F> {
    pub u: Array1<F>,
    pub v: Array1<F>,
    pub dual: Array1<F>,
}

impl<F> AdmmState<F>
where
    F: Float + Send + Sync,
{
    pub fn new(u: Array1<F>, v: Array1<F>, dual: Array1<F>) -> Self {
        Self { u, v, dual }
    }

    /// The solution at zero penalty: `U = X`, `V = D(X)`, `Λ = 0`
    pub fn from_data(x: &Array1<F>, incidence: &FusionIncidence) -> Self {
        let v = difference(x, incidence);
        let dual = Array1::zeros(v.len());
        Self {
            u: x.clone(),
            v,
            dual,
        }
    }
}

/// One fusion graph together with the solver for its U-update system.
pub struct FusionAxis<F, S> {
    incidence: FusionIncidence,
    weights: Array1<F>,
    solver: S,
}

impl<F, S> FusionAxis<F, S>
where
    F: Float + Send + Sync,
    S: LinearSolve<F>,
{
    pub fn new(incidence: FusionIncidence, weights: Array1<F>, solver: S) -> Result<Self> {
        ensure!(
            weights.len() == incidence.n_edges(),
            "{} weights for {} edges",
            weights.len(),
            incidence.n_edges()
        );
        ensure!(
            weights.iter().all(|w| w.is_finite() && *w >= F::zero()),
            "weights must be finite and nonnegative"
        );
        Ok(Self {
            incidence,
            weights,
            solver,
        })
    }

    /// Standard layout of `graph` with blocks of length `block_len`
    pub fn from_graph(graph: &FusionGraph<F>, block_len: usize, solver: S) -> Result<Self> {
        Self::new(graph.incidence(block_len)?, graph.weights().clone(), solver)
    }

    pub fn incidence(&self) -> &FusionIncidence {
        &self.incidence
    }

    pub fn weights(&self) -> &Array1<F> {
        &self.weights
    }

    pub(crate) fn check_state(&self, state: &AdmmState<F>) -> Result<()> {
        let (n, m) = (self.incidence.n_coords(), self.incidence.n_slots());
        ensure!(
            state.u.len() == n && state.v.len() == m && state.dual.len() == m,
            "state lengths ({}, {}, {}) do not match incidence ({}, {})",
            state.u.len(),
            state.v.len(),
            state.dual.len(),
            n,
            m
        );
        Ok(())
    }

    /// One ADMM sweep at strength `lambda` toward `target`, starting from
    /// `state`.
    pub fn sweep<P>(
        &self,
        shrink: &P,
        state: &AdmmState<F>,
        target: &Array1<F>,
        lambda: F,
        rho: F,
    ) -> Result<AdmmState<F>>
    where
        P: Shrinkage<F>,
    {
        let inv_rho = F::one() / rho;

        let mut scaled = Array1::<F>::zeros(state.v.len());
        Zip::from(&mut scaled)
            .and(&state.v)
            .and(&state.dual)
            .par_for_each(|s, &v, &l| *s = rho * v - l);
        let mut rhs = adjoint(&scaled, &self.incidence);
        Zip::from(&mut rhs)
            .and(target)
            .par_for_each(|r, &x| *r = inv_rho * x + inv_rho * *r);
        let u = self.solver.solve(&rhs)?;

        let du = difference(&u, &self.incidence);
        let mut prox_in = Array1::<F>::zeros(du.len());
        Zip::from(&mut prox_in)
            .and(&du)
            .and(&state.dual)
            .par_for_each(|p, &d, &l| *p = d + inv_rho * l);
        let v = shrink.shrink(&prox_in, lambda, rho, &self.weights, &self.incidence);

        let mut dual = state.dual.clone();
        Zip::from(&mut dual)
            .and(&du)
            .and(&v)
            .par_for_each(|l, &d, &v| *l = *l + rho * (d - v));

        Ok(AdmmState { u, v, dual })
    }

    /// One sweep toward `target` where `mask` is one and toward the current
    /// centroids where it is zero.
    pub fn sweep_masked<P>(
        &self,
        shrink: &P,
        state: &AdmmState<F>,
        target: &Array1<F>,
        mask: Option<&Array1<F>>,
        lambda: F,
        rho: F,
    ) -> Result<AdmmState<F>>
    where
        P: Shrinkage<F>,
    {
        match mask {
            None => self.sweep(shrink, state, target, lambda, rho),
            Some(mask) => {
                let observed = observed_target(target, mask, &state.u);
                self.sweep(shrink, state, &observed, lambda, rho)
            }
        }
    }

    /// Sweep according to `inner`, returning the state and the number of
    /// sweeps run.
    #[allow(clippy::too_many_arguments)]
    pub fn solve<P>(
        &self,
        shrink: &P,
        state: &AdmmState<F>,
        target: &Array1<F>,
        mask: Option<&Array1<F>>,
        lambda: F,
        rho: F,
        inner: &InnerSolve<F>,
    ) -> Result<(AdmmState<F>, usize)>
    where
        P: Shrinkage<F>,
    {
        let mut next = self.sweep_masked(shrink, state, target, mask, lambda, rho)?;
        let (thresh, max_inner_iter) = match *inner {
            InnerSolve::OneSweep => return Ok((next, 1)),
            InnerSolve::ToConvergence {
                thresh,
                max_inner_iter,
            } => (thresh, max_inner_iter),
        };
        let mut sweeps = 1;
        let mut prev_v = state.v.clone();
        let mut prev_u = state.u.clone();
        while sweeps < max_inner_iter {
            let (primal, dual) = self.residuals(&next, &prev_v, rho);
            // imputed coordinates keep drifting after V has settled
            let drift = match mask {
                Some(_) => norm_diff(&next.u, &prev_u),
                None => F::zero(),
            };
            if primal <= thresh && dual <= thresh && drift <= thresh {
                break;
            }
            prev_v = next.v.clone();
            prev_u = next.u.clone();
            next = self.sweep_masked(shrink, &next, target, mask, lambda, rho)?;
            sweeps += 1;
        }
        Ok((next, sweeps))
    }

    /// Primal residual `|D(U) - V|` and dual residual `rho |Dᵗ(V - V_prev)|`
    pub(crate) fn residuals(&self, state: &AdmmState<F>, prev_v: &Array1<F>, rho: F) -> (F, F) {
        let du = difference(&state.u, &self.incidence);
        let primal = norm_diff(&du, &state.v);
        let dv = &state.v - prev_v;
        let dual = rho * adjoint(&dv, &self.incidence).mapv(|x| x * x).sum().sqrt();
        (primal, dual)
    }
}

/// `M∘X + (1 − M)∘U` for a 0/1 mask. Unobserved entries of `target` are
/// never read, so they may hold NaN.
pub(crate) fn observed_target<F>(target: &Array1<F>, mask: &Array1<F>, u: &Array1<F>) -> Array1<F>
where
    F: Float + Send + Sync,
{
    let mut out = u.clone();
    Zip::from(&mut out)
        .and(target)
        .and(mask)
        .par_for_each(|o, &x, &m| {
            if m > F::zero() {
                *o = x;
            }
        });
    out
}

pub(crate) fn norm_diff<F>(a: &Array1<F>, b: &Array1<F>) -> F
where
    F: Float,
{
    Zip::from(a)
        .and(b)
        .fold(F::zero(), |acc, &x, &y| acc + (x - y) * (x - y))
        .sqrt()
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    use super::{observed_target, AdmmState, FusionAxis};
    use crate::config::InnerSolve;
    use crate::incidence::FusionGraph;
    use crate::operator::difference;
    use crate::prox::GroupL2;
    use crate::solve::SparseCholesky;

    fn pair_axis() -> FusionAxis<f64, SparseCholesky<f64>> {
        let graph = FusionGraph::<f64>::complete(2);
        let inc = graph.incidence(1).unwrap();
        let solver = SparseCholesky::for_incidence(&inc, 1.0).unwrap();
        FusionAxis::from_graph(&graph, 1, solver).unwrap()
    }

    #[test]
    fn zero_strength_keeps_data() {
        let axis = pair_axis();
        let x = arr1(&[0., 2.]);
        let state = AdmmState::from_data(&x, axis.incidence());
        let next = axis.sweep(&GroupL2, &state, &x, 0., 1.).unwrap();
        assert_abs_diff_eq!(next.u[0], 0., epsilon = 1e-12);
        assert_abs_diff_eq!(next.u[1], 2., epsilon = 1e-12);
        assert_eq!(next.dual, arr1(&[0.]));
    }

    #[test]
    fn converges_to_shrunk_pair() {
        // u1 - u2 = -2 + 2 * lambda for lambda below 1
        let axis = pair_axis();
        let x = arr1(&[0., 2.]);
        let state = AdmmState::from_data(&x, axis.incidence());
        let inner = InnerSolve::ToConvergence {
            thresh: 1e-12,
            max_inner_iter: 5000,
        };
        let (next, sweeps) = axis.solve(&GroupL2, &state, &x, None, 0.6, 1., &inner).unwrap();
        assert!(sweeps > 1);
        assert_abs_diff_eq!(next.u[0], 0.6, epsilon = 1e-8);
        assert_abs_diff_eq!(next.u[1], 1.4, epsilon = 1e-8);
        let du = difference(&next.u, axis.incidence());
        assert_abs_diff_eq!(du[0], next.v[0], epsilon = 1e-8);
    }

    #[test]
    fn fuses_above_threshold() {
        let axis = pair_axis();
        let x = arr1(&[0., 2.]);
        let state = AdmmState::from_data(&x, axis.incidence());
        let inner = InnerSolve::ToConvergence {
            thresh: 1e-12,
            max_inner_iter: 5000,
        };
        let (next, _) = axis.solve(&GroupL2, &state, &x, None, 1.5, 1., &inner).unwrap();
        assert_eq!(next.v[0], 0.);
        assert_abs_diff_eq!(next.u[0], 1., epsilon = 1e-8);
        assert_abs_diff_eq!(next.u[1], 1., epsilon = 1e-8);
    }

    #[test]
    fn masked_entries_follow_centroids() {
        let x = arr1(&[0., 2., f64::NAN]);
        let mask = arr1(&[1., 1., 0.]);
        let u = arr1(&[5., 5., 1.5]);
        assert_eq!(observed_target(&x, &mask, &u), arr1(&[0., 2., 1.5]));
    }

    #[test]
    fn unobserved_point_is_pulled_to_its_neighbour() {
        // the second point is missing, only the penalty moves it
        let axis = pair_axis();
        let x = arr1(&[0., f64::NAN]);
        let mask = arr1(&[1., 0.]);
        let start = arr1(&[0., 2.]);
        let state = AdmmState::from_data(&start, axis.incidence());
        let inner = InnerSolve::ToConvergence {
            thresh: 1e-12,
            max_inner_iter: 20_000,
        };
        let (next, _) = axis
            .solve(&GroupL2, &state, &x, Some(&mask), 0.5, 1., &inner)
            .unwrap();
        assert!(next.u.iter().all(|u| u.is_finite()));
        assert_abs_diff_eq!(next.u[0], 0., epsilon = 1e-6);
        assert_abs_diff_eq!(next.u[1], 0., epsilon = 1e-6);
    }

    #[test]
    fn rejects_mismatched_weights() {
        let graph = FusionGraph::<f64>::complete(3);
        let inc = graph.incidence(1).unwrap();
        let solver = SparseCholesky::for_incidence(&inc, 1.0).unwrap();
        assert!(FusionAxis::new(inc, arr1(&[1., 1.]), solver).is_err());
    }
}
