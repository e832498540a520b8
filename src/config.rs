use anyhow::{ensure, Result};
use num_traits::Float;

/// How the penalty strength moves between outer steps.
#[derive(Debug, Clone, PartialEq)]
pub enum Continuation<F> {
    /// Bisect each step until it fuses just enough edges
    Adaptive {
        max_trials: usize,
        initial_step: F,
        small_step: F,
    },
    /// Accept every step; grow by `step` once `burn_in` steps have run
    Fixed { step: F },
    /// Visit a user-supplied non-decreasing sequence of strengths
    Grid(Vec<F>),
}

impl<F> Continuation<F>
where
    F: Float,
{
    pub fn adaptive() -> Self {
        Continuation::Adaptive {
            max_trials: 15,
            initial_step: F::from(1.1).unwrap(),
            small_step: F::from(1.01).unwrap(),
        }
    }

    pub fn fixed(step: F) -> Self {
        Continuation::Fixed { step }
    }

    /// Strengths of a grid path; empty for the other strategies
    pub fn grid(&self) -> &[F] {
        match self {
            Continuation::Grid(grid) => grid,
            _ => &[],
        }
    }
}

/// Work done at one strength before the controller looks at it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InnerSolve<F> {
    /// A single ADMM sweep
    OneSweep,
    /// Sweeps until both residuals are at most `thresh`
    ToConvergence { thresh: F, max_inner_iter: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathConfig<F> {
    /// Starting penalty strength
    pub lambda_init: F,
    /// ADMM penalty parameter
    pub rho: F,
    /// Cap on outer steps
    pub max_iter: usize,
    /// Outer steps before a fixed-step path starts growing
    pub burn_in: usize,
    /// Record a checkpoint at least every `keep` outer steps
    pub keep: usize,
    pub threads: usize,
    pub continuation: Continuation<F>,
    pub inner: InnerSolve<F>,
}

impl<F> Default for PathConfig<F>
where
    F: Float,
{
    fn default() -> Self {
        Self {
            lambda_init: F::from(1e-4).unwrap(),
            rho: F::one(),
            max_iter: 10_000,
            burn_in: 50,
            keep: 10,
            threads: 4,
            continuation: Continuation::adaptive(),
            inner: InnerSolve::OneSweep,
        }
    }
}

impl<F> PathConfig<F>
where
    F: Float,
{
    /// Iterate every strength to convergence, the exact counterpart of the
    /// one-sweep path.
    pub fn exact(mut self, thresh: F, max_inner_iter: usize) -> Self {
        self.inner = InnerSolve::ToConvergence {
            thresh,
            max_inner_iter,
        };
        self
    }

    pub fn validate(&self) -> Result<()> {
        let one = F::one();
        ensure!(
            self.lambda_init > F::zero() && self.lambda_init.is_finite(),
            "initial penalty strength must be positive"
        );
        ensure!(self.rho > F::zero(), "rho must be positive");
        ensure!(self.keep >= 1, "keep must be at least 1");
        ensure!(self.threads >= 1, "threads must be at least 1");
        match &self.continuation {
            Continuation::Adaptive {
                max_trials,
                initial_step,
                small_step,
            } => {
                ensure!(*max_trials >= 1, "max_trials must be at least 1");
                ensure!(
                    *initial_step >= one && *small_step >= one,
                    "step multipliers must be at least 1"
                );
            }
            Continuation::Fixed { step } => {
                ensure!(*step >= one, "step multiplier must be at least 1")
            }
            Continuation::Grid(grid) => {
                ensure!(!grid.is_empty(), "strength grid is empty");
                ensure!(
                    grid.iter().all(|l| *l >= F::zero() && l.is_finite()),
                    "strength grid must be finite and nonnegative"
                );
                ensure!(
                    grid.windows(2).all(|w| w[0] <= w[1]),
                    "strength grid must be non-decreasing"
                );
            }
        }
        if let InnerSolve::ToConvergence {
            thresh,
            max_inner_iter,
        } = self.inner
        {
            ensure!(thresh > F::zero(), "convergence threshold must be positive");
            ensure!(max_inner_iter >= 1, "max_inner_iter must be at least 1");
        }
        Ok(())
    }
}
