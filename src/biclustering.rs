use anyhow::{ensure, Result};
use log::{debug, info};
use ndarray::{Array1, Array2, Zip};
use num_traits::Float;

use crate::admm::{norm_diff, observed_target, AdmmState, FusionAxis};
use crate::clustering::{as_f64, check_mask, flatten, impute, unflatten};
use crate::config::{InnerSolve, PathConfig};
use crate::continuation::{FusionCount, Stepper};
use crate::fusion::FusionIndicator;
use crate::path::{should_record, BiCheckpoint, PathRecord, Termination};
use crate::prox::Shrinkage;
use crate::solve::LinearSolve;

/// Joint state of the row and column sub-problems.
///
/// `p` and `q` absorb the disagreement between the two sub-solves; with
/// `U = X` and both at zero initially, `U + P + Q = X` holds at every step.
/// With a mask, `X` is the data with missing entries imputed.
#[derive(Debug, Clone, PartialEq)]
pub struct BiState<F> {
    pub u: Array2<F>,
    pub p: Array2<F>,
    pub q: Array2<F>,
    pub row: AdmmState<F>,
    pub col: AdmmState<F>,
}

/// Result of a convex bi-clustering path.
#[derive(Debug, Clone)]
pub struct BiClusteringPath<F> {
    pub path: PathRecord<BiCheckpoint<F>>,
    pub termination: Termination,
    pub iterations: usize,
    pub sweeps: usize,
    /// Steps accepted after the bisection ran out of trials
    pub bail_outs: usize,
    /// Consensus variables after the last accepted step
    pub p: Array2<F>,
    pub q: Array2<F>,
    /// `(|U - Y|, |Y - U'|)` of every accepted step: what was added to `p`
    /// and to `q`
    pub consensus: Vec<(F, F)>,
}

/// Convex bi-clustering: rows and columns of the same matrix are fused
/// along one shared path of penalty strengths.
///
/// The row axis sees the `n` rows as observations with blocks of length
/// `p`; the column axis sees the `p` columns as observations with blocks of
/// length `n`.
pub struct ConvexBiClustering<F> {
    config: PathConfig<F>,
}

impl<F> ConvexBiClustering<F>
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

    pub fn fit<S, T, P>(
        &self,
        x: &Array2<F>,
        row_axis: &FusionAxis<F, S>,
        col_axis: &FusionAxis<F, T>,
        shrink: P,
    ) -> Result<BiClusteringPath<F>>
    where
        S: LinearSolve<F> + Sync,
        T: LinearSolve<F> + Sync,
        P: Shrinkage<F> + Sync,
    {
        self.fit_inner(x, None, row_axis, col_axis, shrink)
    }

    /// Like [`fit`](Self::fit) with a 0/1 `mask` of observed entries. Both
    /// sub-solves pull missing entries toward their own current centroids.
    pub fn fit_masked<S, T, P>(
        &self,
        x: &Array2<F>,
        mask: &Array2<F>,
        row_axis: &FusionAxis<F, S>,
        col_axis: &FusionAxis<F, T>,
        shrink: P,
    ) -> Result<BiClusteringPath<F>>
    where
        S: LinearSolve<F> + Sync,
        T: LinearSolve<F> + Sync,
        P: Shrinkage<F> + Sync,
    {
        self.fit_inner(x, Some(mask), row_axis, col_axis, shrink)
    }

    fn fit_inner<S, T, P>(
        &self,
        x: &Array2<F>,
        mask: Option<&Array2<F>>,
        row_axis: &FusionAxis<F, S>,
        col_axis: &FusionAxis<F, T>,
        shrink: P,
    ) -> Result<BiClusteringPath<F>>
    where
        S: LinearSolve<F> + Sync,
        T: LinearSolve<F> + Sync,
        P: Shrinkage<F> + Sync,
    {
        self.config.validate()?;
        let (n, p) = x.dim();
        let (row_inc, col_inc) = (row_axis.incidence(), col_axis.incidence());
        ensure!(
            row_inc.n_coords() == n * p && row_inc.block_len() == p,
            "row axis must fuse {} rows of length {}",
            n,
            p
        );
        ensure!(
            col_inc.n_coords() == n * p && col_inc.block_len() == n,
            "column axis must fuse {} columns of length {}",
            p,
            n
        );
        let (x, masks) = match mask {
            Some(mask) => {
                check_mask(mask, x)?;
                let masks = Masks {
                    row: flatten(mask),
                    col: flatten_t(mask),
                };
                (impute(x, mask), Some(masks))
            }
            None => (x.clone(), None),
        };
        let state = BiState {
            p: Array2::zeros((n, p)),
            q: Array2::zeros((n, p)),
            row: AdmmState::from_data(&flatten(&x), row_inc),
            col: AdmmState::from_data(&flatten_t(&x), col_inc),
            u: x,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()?;
        pool.install(|| self.run(row_axis, col_axis, &shrink, masks.as_ref(), state))
    }

    fn run<S, T, P>(
        &self,
        row_axis: &FusionAxis<F, S>,
        col_axis: &FusionAxis<F, T>,
        shrink: &P,
        masks: Option<&Masks<F>>,
        mut state: BiState<F>,
    ) -> Result<BiClusteringPath<F>>
    where
        S: LinearSolve<F>,
        T: LinearSolve<F>,
        P: Shrinkage<F>,
    {
        let config = &self.config;
        let (row_inc, col_inc) = (row_axis.incidence(), col_axis.incidence());
        info!(
            "convex bi-clustering: {} x {} matrix, {} row edges, {} column edges",
            state.u.nrows(),
            state.u.ncols(),
            row_inc.n_edges(),
            col_inc.n_edges()
        );
        let axes = Axes {
            row: row_axis,
            col: col_axis,
            masks,
        };
        let mut fused_row = FusionIndicator::new(row_inc.n_edges());
        let mut fused_col = FusionIndicator::new(col_inc.n_edges());
        let mut path = PathRecord::new(checkpoint(config.lambda_init, &state, &fused_row, &fused_col));
        let mut consensus = vec![];
        let mut iter = 0;
        let mut sweeps = 0;
        let mut bail_outs = 0;

        let termination = match Stepper::from_config(config) {
            Some(mut stepper) => {
                let mut lambda = config.lambda_init;
                let mut lower = lambda;
                while iter < config.max_iter
                    && !(fused_row.is_complete() && fused_col.is_complete())
                {
                    iter += 1;
                    let (old_row, old_col) = (fused_row.count(), fused_col.count());
                    let ((next, residual, next_row, next_col), accepted, bailed) =
                        stepper.step(lower, lambda, |l| {
                            let (trial, residual, n) = solve_pass(&axes, shrink, &state, l, config)?;
                            sweeps += n;
                            let trial_row = fused_row.update(&trial.row.v, row_inc);
                            let trial_col = fused_col.update(&trial.col.v, col_inc);
                            let counts = vec![
                                FusionCount::new(old_row, trial_row.count()),
                                FusionCount::new(old_col, trial_col.count()),
                            ];
                            Ok(((trial, residual, trial_row, trial_col), counts))
                        })?;
                    if bailed {
                        bail_outs += 1;
                    }
                    let changed = next_row != fused_row || next_col != fused_col;
                    state = next;
                    fused_row = next_row;
                    fused_col = next_col;
                    lambda = accepted;
                    consensus.push(residual);
                    if should_record(changed, iter, config.keep) {
                        path.push(checkpoint(lambda, &state, &fused_row, &fused_col));
                        debug!(
                            "step {}: lambda={:.6e}, rows {}/{} and columns {}/{} edges fused",
                            iter,
                            as_f64(lambda),
                            fused_row.count(),
                            fused_row.len(),
                            fused_col.count(),
                            fused_col.len()
                        );
                    }
                    lower = lambda;
                    lambda = stepper.advance(lambda, iter, fused_row.count() + fused_col.count());
                }
                if fused_row.is_complete() && fused_col.is_complete() {
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
                    let (next, residual, n) = solve_pass(&axes, shrink, &state, lambda, config)?;
                    sweeps += n;
                    fused_row = fused_row.update(&next.row.v, row_inc);
                    fused_col = fused_col.update(&next.col.v, col_inc);
                    state = next;
                    consensus.push(residual);
                    path.push(checkpoint(lambda, &state, &fused_row, &fused_col));
                }
                if iter == grid.len() {
                    Termination::GridExhausted
                } else {
                    Termination::MaxIter
                }
            }
        };

        info!(
            "bi-clustering path finished ({:?}) after {} steps and {} sweeps with {} checkpoints",
            termination,
            iter,
            sweeps,
            path.len()
        );
        Ok(BiClusteringPath {
            path,
            termination,
            iterations: iter,
            sweeps,
            bail_outs,
            p: state.p,
            q: state.q,
            consensus,
        })
    }
}

/// Observation masks laid out for each axis
pub(crate) struct Masks<F> {
    row: Array1<F>,
    col: Array1<F>,
}

/// Both fusion axes of one bi-clustering problem
pub(crate) struct Axes<'a, F, S, T> {
    row: &'a FusionAxis<F, S>,
    col: &'a FusionAxis<F, T>,
    masks: Option<&'a Masks<F>>,
}

/// One consensus pass at `lambda`: a row sweep toward `U + P`, then a column
/// sweep toward `Y + Q` where `Y` is the row result.
pub(crate) fn consensus_pass<F, S, T, P>(
    axes: &Axes<'_, F, S, T>,
    shrink: &P,
    state: &BiState<F>,
    lambda: F,
    rho: F,
) -> Result<(BiState<F>, (F, F))>
where
    F: Float + Send + Sync,
    S: LinearSolve<F>,
    T: LinearSolve<F>,
    P: Shrinkage<F>,
{
    let dim = state.u.dim();

    let mut row_target = flatten(&(&state.u + &state.p));
    if let Some(masks) = axes.masks {
        row_target = observed_target(&row_target, &masks.row, &state.row.u);
    }
    let row = axes.row.sweep(shrink, &state.row, &row_target, lambda, rho)?;
    let y = unflatten(&row.u, dim)?;
    let mut p = state.p.clone();
    Zip::from(&mut p)
        .and(&state.u)
        .and(&y)
        .par_for_each(|p, &u, &y| *p = *p + u - y);

    let mut col_target = flatten_t(&(&y + &state.q));
    if let Some(masks) = axes.masks {
        col_target = observed_target(&col_target, &masks.col, &state.col.u);
    }
    let col = axes.col.sweep(shrink, &state.col, &col_target, lambda, rho)?;
    let u = unflatten_t(&col.u, dim)?;
    let mut q = state.q.clone();
    Zip::from(&mut q)
        .and(&y)
        .and(&u)
        .par_for_each(|q, &y, &u| *q = *q + y - u);

    let residual = (frobenius_diff(&state.u, &y), frobenius_diff(&y, &u));
    Ok((BiState { u, p, q, row, col }, residual))
}

/// A consensus pass, repeated to convergence in exact mode. Returns the
/// state, the last pass' consensus residual and the passes run.
fn solve_pass<F, S, T, P>(
    axes: &Axes<'_, F, S, T>,
    shrink: &P,
    state: &BiState<F>,
    lambda: F,
    config: &PathConfig<F>,
) -> Result<(BiState<F>, (F, F), usize)>
where
    F: Float + Send + Sync,
    S: LinearSolve<F>,
    T: LinearSolve<F>,
    P: Shrinkage<F>,
{
    let rho = config.rho;
    let (mut next, mut residual) = consensus_pass(axes, shrink, state, lambda, rho)?;
    let (thresh, max_inner_iter) = match config.inner {
        InnerSolve::OneSweep => return Ok((next, residual, 1)),
        InnerSolve::ToConvergence {
            thresh,
            max_inner_iter,
        } => (thresh, max_inner_iter),
    };
    let mut passes = 1;
    let (mut prev_row_v, mut prev_col_v) = (state.row.v.clone(), state.col.v.clone());
    while passes < max_inner_iter {
        let (row_primal, row_dual) = axes.row.residuals(&next.row, &prev_row_v, rho);
        let (col_primal, col_dual) = axes.col.residuals(&next.col, &prev_col_v, rho);
        let worst = [row_primal, row_dual, col_primal, col_dual, residual.0, residual.1]
            .iter()
            .fold(F::zero(), |acc, &r| acc.max(r));
        if worst <= thresh {
            break;
        }
        prev_row_v = next.row.v.clone();
        prev_col_v = next.col.v.clone();
        let (after, r) = consensus_pass(axes, shrink, &next, lambda, rho)?;
        next = after;
        residual = r;
        passes += 1;
    }
    Ok((next, residual, passes))
}

/// Row-major stacking of the transpose: column `j` becomes coordinates
/// `j*n..(j+1)*n`
fn flatten_t<F: Copy>(x: &Array2<F>) -> Array1<F> {
    x.t().iter().copied().collect()
}

fn unflatten_t<F: Copy>(u: &Array1<F>, dim: (usize, usize)) -> Result<Array2<F>> {
    let t = unflatten(u, (dim.1, dim.0))?;
    Ok(t.reversed_axes().as_standard_layout().to_owned())
}

fn frobenius_diff<F: Float>(a: &Array2<F>, b: &Array2<F>) -> F {
    let a = Array1::from_iter(a.iter().copied());
    let b = Array1::from_iter(b.iter().copied());
    norm_diff(&a, &b)
}

fn checkpoint<F: Float>(
    lambda: F,
    state: &BiState<F>,
    fused_row: &FusionIndicator,
    fused_col: &FusionIndicator,
) -> BiCheckpoint<F> {
    BiCheckpoint {
        lambda,
        u: state.u.clone(),
        v_row: state.row.v.clone(),
        v_col: state.col.v.clone(),
        fused_row: fused_row.clone(),
        fused_col: fused_col.clone(),
    }
}
