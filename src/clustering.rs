use anyhow::{ensure, Result};
use log::{debug, info};
use ndarray::{Array1, Array2, Axis, Zip};
use num_traits::Float;

use crate::admm::{AdmmState, FusionAxis};
use crate::config::PathConfig;
use crate::continuation::{FusionCount, Stepper};
use crate::fusion::FusionIndicator;
use crate::incidence::FusionIncidence;
use crate::path::{should_record, Checkpoint, PathRecord, Termination};
use crate::prox::Shrinkage;
use crate::solve::LinearSolve;

/// Result of a convex clustering path.
#[derive(Debug, Clone)]
pub struct ClusteringPath<F> {
    pub path: PathRecord<Checkpoint<F>>,
    pub termination: Termination,
    /// Outer steps run
    pub iterations: usize,
    /// ADMM sweeps run, rejected trials included
    pub sweeps: usize,
    /// Steps accepted after the bisection ran out of trials
    pub bail_outs: usize,
}

/// Convex clustering of the rows of a data matrix along a path of penalty
/// strengths.
///
/// The centroid of observation `i` is row `i` of the data; fusion weights
/// and the system solver come in through a [`FusionAxis`] built for blocks of
/// length `p` (the number of columns).
pub struct ConvexClustering<F> {
    config: PathConfig<F>,
}

impl<F> ConvexClustering<F>
where
    F: Float + Send + Sync,
{
    pub fn new(config: PathConfig<F>) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self {
            config: PathConfig::default(),
        }
    }

    pub fn config(&self) -> &PathConfig<F> {
        &self.config
    }

    /// Compute the path from the zero-penalty solution of `x`.
    pub fn fit<S, P>(
        &self,
        x: &Array2<F>,
        axis: &FusionAxis<F, S>,
        shrink: P,
    ) -> Result<ClusteringPath<F>>
    where
        S: LinearSolve<F> + Sync,
        P: Shrinkage<F> + Sync,
    {
        self.fit_from(x, None, axis, shrink, None)
    }

    /// Like [`fit`](Self::fit) with a 0/1 `mask` of observed entries. Missing
    /// entries of `x` start at their column's observed mean and follow the
    /// centroids from there on.
    pub fn fit_masked<S, P>(
        &self,
        x: &Array2<F>,
        mask: &Array2<F>,
        axis: &FusionAxis<F, S>,
        shrink: P,
    ) -> Result<ClusteringPath<F>>
    where
        S: LinearSolve<F> + Sync,
        P: Shrinkage<F> + Sync,
    {
        self.fit_from(x, Some(mask), axis, shrink, None)
    }

    /// Compute the path from an explicit initial state, or from the
    /// zero-penalty solution when `state` is `None`.
    pub fn fit_from<S, P>(
        &self,
        x: &Array2<F>,
        mask: Option<&Array2<F>>,
        axis: &FusionAxis<F, S>,
        shrink: P,
        state: Option<AdmmState<F>>,
    ) -> Result<ClusteringPath<F>>
    where
        S: LinearSolve<F> + Sync,
        P: Shrinkage<F> + Sync,
    {
        self.config.validate()?;
        check_data(x, axis.incidence())?;
        let (target, mask) = match mask {
            Some(mask) => {
                check_mask(mask, x)?;
                (flatten(&impute(x, mask)), Some(flatten(mask)))
            }
            None => (flatten(x), None),
        };
        let state = match state {
            Some(state) => state,
            None => AdmmState::from_data(&target, axis.incidence()),
        };
        axis.check_state(&state)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()?;
        pool.install(|| self.run(x.dim(), &target, mask.as_ref(), axis, &shrink, state))
    }

    fn run<S, P>(
        &self,
        dim: (usize, usize),
        target: &Array1<F>,
        mask: Option<&Array1<F>>,
        axis: &FusionAxis<F, S>,
        shrink: &P,
        mut state: AdmmState<F>,
    ) -> Result<ClusteringPath<F>>
    where
        S: LinearSolve<F>,
        P: Shrinkage<F>,
    {
        let config = &self.config;
        let incidence = axis.incidence();
        info!(
            "convex clustering: {} observations x {} features, {} edges",
            dim.0,
            dim.1,
            incidence.n_edges()
        );
        let mut fused = FusionIndicator::new(incidence.n_edges());
        let mut path = PathRecord::new(checkpoint(config.lambda_init, &state, &fused, dim)?);
        let mut iter = 0;
        let mut sweeps = 0;
        let mut bail_outs = 0;

        let termination = match Stepper::from_config(config) {
            Some(mut stepper) => {
                let mut lambda = config.lambda_init;
                let mut lower = lambda;
                while iter < config.max_iter && !fused.is_complete() {
                    iter += 1;
                    let old = fused.count();
                    let ((next, next_fused), accepted, bailed) =
                        stepper.step(lower, lambda, |l| {
                            let (trial, n) = axis.solve(
                                shrink,
                                &state,
                                target,
                                mask,
                                l,
                                config.rho,
                                &config.inner,
                            )?;
                            sweeps += n;
                            let trial_fused = fused.update(&trial.v, incidence);
                            let counts = vec![FusionCount::new(old, trial_fused.count())];
                            Ok(((trial, trial_fused), counts))
                        })?;
                    if bailed {
                        bail_outs += 1;
                    }
                    let changed = next_fused != fused;
                    state = next;
                    fused = next_fused;
                    lambda = accepted;
                    if should_record(changed, iter, config.keep) {
                        path.push(checkpoint(lambda, &state, &fused, dim)?);
                        debug!(
                            "step {}: lambda={:.6e}, {}/{} edges fused",
                            iter,
                            as_f64(lambda),
                            fused.count(),
                            fused.len()
                        );
                    }
                    lower = lambda;
                    lambda = stepper.advance(lambda, iter, fused.count());
                }
                if fused.is_complete() {
                    Termination::FullyFused
                } else {
                    Termination::MaxIter
                }
            }
            None => {
                let grid = config.continuation.grid();
                for &lambda in grid.iter() {
                    if iter >= config.max_iter {
                        break;
                    }
                    iter += 1;
                    let (next, n) = axis.solve(
                        shrink,
                        &state,
                        target,
                        mask,
                        lambda,
                        config.rho,
                        &config.inner,
                    )?;
                    sweeps += n;
                    fused = fused.update(&next.v, incidence);
                    state = next;
                    path.push(checkpoint(lambda, &state, &fused, dim)?);
                    debug!(
                        "grid lambda={:.6e}: {}/{} edges fused after {} sweeps",
                        as_f64(lambda),
                        fused.count(),
                        fused.len(),
                        n
                    );
                }
                if iter == grid.len() {
                    Termination::GridExhausted
                } else {
                    Termination::MaxIter
                }
            }
        };

        info!(
            "path finished ({:?}) after {} steps and {} sweeps with {} checkpoints",
            termination,
            iter,
            sweeps,
            path.len()
        );
        Ok(ClusteringPath {
            path,
            termination,
            iterations: iter,
            sweeps,
            bail_outs,
        })
    }
}

/// The data must hold one row per observation and one column per block entry
pub(crate) fn check_data<F>(x: &Array2<F>, incidence: &FusionIncidence) -> Result<()> {
    let (n, p) = x.dim();
    ensure!(
        incidence.block_len() == p && incidence.n_coords() == n * p,
        "data is {} x {}, incidence expects {} observations of length {}",
        n,
        p,
        incidence.n_coords() / incidence.block_len().max(1),
        incidence.block_len()
    );
    Ok(())
}

pub(crate) fn check_mask<F: Float>(mask: &Array2<F>, x: &Array2<F>) -> Result<()> {
    ensure!(
        mask.dim() == x.dim(),
        "mask is {:?}, data is {:?}",
        mask.dim(),
        x.dim()
    );
    ensure!(
        mask.iter().all(|&m| m == F::zero() || m == F::one()),
        "mask entries must be 0 or 1"
    );
    Ok(())
}

/// Missing entries replaced by the observed mean of their column, or zero
/// when the whole column is missing
pub(crate) fn impute<F>(x: &Array2<F>, mask: &Array2<F>) -> Array2<F>
where
    F: Float + Send + Sync,
{
    let mut out = x.clone();
    Zip::from(out.axis_iter_mut(Axis(1)))
        .and(mask.axis_iter(Axis(1)))
        .par_for_each(|mut col, observed| {
            let (sum, count) = col
                .iter()
                .zip(observed.iter())
                .filter(|(_, m)| **m > F::zero())
                .fold((F::zero(), F::zero()), |(s, c), (&v, _)| (s + v, c + F::one()));
            let mean = if count > F::zero() { sum / count } else { F::zero() };
            col.iter_mut()
                .zip(observed.iter())
                .filter(|(_, m)| **m == F::zero())
                .for_each(|(v, _)| *v = mean);
        });
    out
}

/// Row-major stacking: row `i` becomes coordinates `i*p..(i+1)*p`
pub(crate) fn flatten<F: Copy>(x: &Array2<F>) -> Array1<F> {
    x.iter().copied().collect()
}

pub(crate) fn unflatten<F: Copy>(u: &Array1<F>, dim: (usize, usize)) -> Result<Array2<F>> {
    Ok(Array2::from_shape_vec(dim, u.to_vec())?)
}

pub(crate) fn as_f64<F: Float>(x: F) -> f64 {
    x.to_f64().unwrap_or(f64::NAN)
}

fn checkpoint<F>(
    lambda: F,
    state: &AdmmState<F>,
    fused: &FusionIndicator,
    dim: (usize, usize),
) -> Result<Checkpoint<F>>
where
    F: Float,
{
    Ok(Checkpoint {
        lambda,
        u: unflatten(&state.u, dim)?,
        v: state.v.clone(),
        fused: fused.clone(),
    })
}
