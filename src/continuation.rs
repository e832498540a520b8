use anyhow::Result;
use log::{debug, trace};
use num_traits::Float;

use crate::config::{Continuation, PathConfig};

/// Fused-edge counts of one axis before and after a trial sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionCount {
    pub old: usize,
    pub new: usize,
}

impl FusionCount {
    pub fn new(old: usize, new: usize) -> Self {
        Self { old, new }
    }

    fn unchanged(&self) -> bool {
        self.new == self.old
    }

    fn overshoot(&self) -> bool {
        self.new > self.old + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision<F> {
    Accept,
    /// Trial budget spent; the last candidate is taken as is
    BailOut,
    /// Redo the step from the old state at this strength
    Retry(F),
}

/// Bracket search for a strength that fuses at most one new edge per axis.
///
/// `lower` is a strength known not to fuse anything new (the last accepted
/// one), `candidate` the proposed strength, which starts as the upper end.
///
///     use convexpath::{Bisection, Decision, FusionCount};
///
///     let mut search = Bisection::new(1.0, 2.0, 15);
///     // two new fusions: too far, try halfway
///     assert_eq!(search.judge(&[FusionCount::new(3, 5)]), Decision::Retry(1.5));
///     // nothing new: not far enough
///     assert_eq!(search.judge(&[FusionCount::new(3, 3)]), Decision::Retry(1.75));
///     assert_eq!(search.judge(&[FusionCount::new(3, 4)]), Decision::Accept);
///     assert_eq!(search.lambda(), 1.75);
#[derive(Debug, Clone)]
pub struct Bisection<F> {
    lower: F,
    upper: F,
    lambda: F,
    trials: usize,
    max_trials: usize,
}

impl<F> Bisection<F>
where
    F: Float,
{
    pub fn new(lower: F, candidate: F, max_trials: usize) -> Self {
        Self {
            lower,
            upper: candidate,
            lambda: candidate,
            trials: 0,
            max_trials,
        }
    }

    /// Strength of the trial being judged
    pub fn lambda(&self) -> F {
        self.lambda
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    pub fn bracket(&self) -> (F, F) {
        (self.lower, self.upper)
    }

    /// Judge the trial at `self.lambda()` from every axis' counts.
    ///
    /// The first trial may fuse nothing. Later trials, and any trial that
    /// fuses anything, must add at most one fusion per axis and at least one
    /// overall.
    pub fn judge(&mut self, counts: &[FusionCount]) -> Decision<F> {
        self.trials += 1;
        let unchanged = counts.iter().all(FusionCount::unchanged);
        if unchanged && self.trials == 1 {
            return Decision::Accept;
        }
        if counts.iter().any(FusionCount::overshoot) {
            self.upper = self.lambda;
        } else if unchanged {
            self.lower = self.lambda;
        } else {
            return Decision::Accept;
        }
        if self.trials > self.max_trials {
            return Decision::BailOut;
        }
        let two = F::one() + F::one();
        self.lambda = (self.lower + self.upper) / two;
        Decision::Retry(self.lambda)
    }
}

/// Geometric growth multiplier, switched to the small step once anything
/// has fused.
#[derive(Debug, Clone, Copy)]
pub struct StepSize<F> {
    current: F,
    small: F,
}

impl<F> StepSize<F>
where
    F: Float,
{
    pub fn new(initial: F, small: F) -> Self {
        Self {
            current: initial,
            small,
        }
    }

    pub fn current(&self) -> F {
        self.current
    }

    /// Next strength after accepting `lambda` with `n_fused` edges fused
    pub fn advance(&mut self, lambda: F, n_fused: usize) -> F {
        if n_fused > 0 {
            self.current = self.small;
        }
        lambda * self.current
    }
}

/// Outer-step policy of a continuous (non-grid) path.
#[derive(Debug, Clone)]
pub(crate) enum Stepper<F> {
    Adaptive { step: StepSize<F>, max_trials: usize },
    Fixed { step: F, burn_in: usize },
}

impl<F> Stepper<F>
where
    F: Float,
{
    /// `None` for grid paths, which have no outer-step policy
    pub(crate) fn from_config(config: &PathConfig<F>) -> Option<Self> {
        match config.continuation {
            Continuation::Adaptive {
                max_trials,
                initial_step,
                small_step,
            } => Some(Stepper::Adaptive {
                step: StepSize::new(initial_step, small_step),
                max_trials,
            }),
            Continuation::Fixed { step } => Some(Stepper::Fixed {
                step,
                burn_in: config.burn_in,
            }),
            Continuation::Grid(_) => None,
        }
    }

    /// Run the trials of one outer step. `trial` evaluates a strength from
    /// the old state and reports per-axis fusion counts; the accepted trial
    /// comes back with its strength and whether the trial budget ran out.
    pub(crate) fn step<T, E>(&self, lower: F, lambda: F, mut trial: E) -> Result<(T, F, bool)>
    where
        E: FnMut(F) -> Result<(T, Vec<FusionCount>)>,
    {
        let max_trials = match self {
            Stepper::Fixed { .. } => return Ok((trial(lambda)?.0, lambda, false)),
            Stepper::Adaptive { max_trials, .. } => *max_trials,
        };
        let mut search = Bisection::new(lower, lambda, max_trials);
        loop {
            let (out, counts) = trial(search.lambda())?;
            match search.judge(&counts) {
                Decision::Accept => return Ok((out, search.lambda(), false)),
                Decision::BailOut => {
                    debug!(
                        "bisection gave up after {} trials at lambda={:.6e} with counts {:?}",
                        search.trials(),
                        search.lambda().to_f64().unwrap_or(f64::NAN),
                        counts
                    );
                    return Ok((out, search.lambda(), true));
                }
                Decision::Retry(next) => trace!(
                    "trial {} rejected ({:?}), retrying at lambda={:.6e}",
                    search.trials(),
                    counts,
                    next.to_f64().unwrap_or(f64::NAN)
                ),
            }
        }
    }

    /// Strength of the next outer step
    pub(crate) fn advance(&mut self, lambda: F, iter: usize, n_fused: usize) -> F {
        match self {
            Stepper::Adaptive { step, .. } => step.advance(lambda, n_fused),
            Stepper::Fixed { step, burn_in } => {
                if iter >= *burn_in {
                    lambda * *step
                } else {
                    lambda
                }
            }
        }
    }
}
