use ndarray::{Array1, Array2};

use crate::fusion::FusionIndicator;

/// Why the outer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every edge fused
    FullyFused,
    /// `max_iter` outer steps ran first
    MaxIter,
    /// Every strength of a user grid was visited
    GridExhausted,
}

/// Snapshot of a single-axis path.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint<F> {
    pub lambda: F,
    /// Centroids, one row per observation
    pub u: Array2<F>,
    pub v: Array1<F>,
    pub fused: FusionIndicator,
}

/// Snapshot of a bi-clustering path.
#[derive(Debug, Clone, PartialEq)]
pub struct BiCheckpoint<F> {
    pub lambda: F,
    pub u: Array2<F>,
    pub v_row: Array1<F>,
    pub v_col: Array1<F>,
    pub fused_row: FusionIndicator,
    pub fused_col: FusionIndicator,
}

pub trait HasLambda<F> {
    fn lambda(&self) -> F;
}

impl<F: Copy> HasLambda<F> for Checkpoint<F> {
    fn lambda(&self) -> F {
        self.lambda
    }
}

impl<F: Copy> HasLambda<F> for BiCheckpoint<F> {
    fn lambda(&self) -> F {
        self.lambda
    }
}

/// Append-only sequence of checkpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRecord<C> {
    checkpoints: Vec<C>,
}

impl<C> PathRecord<C> {
    /// A path always starts from its initial checkpoint
    pub fn new(initial: C) -> Self {
        Self {
            checkpoints: vec![initial],
        }
    }

    pub fn push(&mut self, checkpoint: C) {
        self.checkpoints.push(checkpoint);
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&C> {
        self.checkpoints.get(idx)
    }

    pub fn last(&self) -> Option<&C> {
        self.checkpoints.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, C> {
        self.checkpoints.iter()
    }

    pub fn lambdas<F>(&self) -> Vec<F>
    where
        C: HasLambda<F>,
    {
        self.checkpoints.iter().map(|c| c.lambda()).collect()
    }
}

impl<F: Copy> PathRecord<Checkpoint<F>> {
    pub fn centroids(&self) -> Vec<&Array2<F>> {
        self.checkpoints.iter().map(|c| &c.u).collect()
    }

    pub fn fusions(&self) -> Vec<&FusionIndicator> {
        self.checkpoints.iter().map(|c| &c.fused).collect()
    }
}

impl<'a, C> IntoIterator for &'a PathRecord<C> {
    type Item = &'a C;
    type IntoIter = std::slice::Iter<'a, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.checkpoints.iter()
    }
}

/// Record when the fusion pattern changed, and every `keep` steps regardless
pub(crate) fn should_record(changed: bool, iter: usize, keep: usize) -> bool {
    changed || iter % keep == 0
}
