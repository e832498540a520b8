use ndarray::{Array1, Zip};
use num_traits::Float;

use crate::incidence::FusionIncidence;

/// One flag per edge, set once the edge's difference block is exactly zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionIndicator {
    fused: Vec<bool>,
}

impl FusionIndicator {
    pub fn new(n_edges: usize) -> Self {
        Self {
            fused: vec![false; n_edges],
        }
    }

    pub fn count(&self) -> usize {
        self.fused.iter().filter(|&&f| f).count()
    }

    pub fn len(&self) -> usize {
        self.fused.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fused.is_empty()
    }

    /// All edges fused
    pub fn is_complete(&self) -> bool {
        self.fused.iter().all(|&f| f)
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.fused
    }

    /// Flags after a sweep produced `v`. Edges stay fused once marked; an
    /// unfused edge is marked when every entry of its block equals zero.
    ///
    /// The comparison is exact: the shrinkage operators emit literal zeros.
    pub fn update<F>(&self, v: &Array1<F>, incidence: &FusionIncidence) -> Self
    where
        F: Float + Send + Sync,
    {
        let zero = F::zero();
        let mut fused = vec![false; self.fused.len()];
        Zip::from(&mut fused[..])
            .and(&self.fused[..])
            .and(incidence.slots().rows())
            .par_for_each(|f, &was, slots| {
                *f = was || slots.iter().all(|&s| v[s] == zero);
            });
        Self { fused }
    }
}

impl From<Vec<bool>> for FusionIndicator {
    fn from(fused: Vec<bool>) -> Self {
        Self { fused }
    }
}
