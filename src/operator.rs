use ndarray::{Array1, Array2, Zip};
use num_traits::Float;

use crate::incidence::FusionIncidence;

/// Edge differences `D(u)`: for each edge, the first endpoint block minus the
/// second, written into the edge's slots.
pub fn difference<F>(u: &Array1<F>, incidence: &FusionIncidence) -> Array1<F>
where
    F: Float + Send + Sync,
{
    let mut blocks = Array2::<F>::zeros((incidence.n_edges(), incidence.block_len()));
    Zip::from(blocks.rows_mut())
        .and(incidence.first().rows())
        .and(incidence.second().rows())
        .par_for_each(|mut b, one, two| {
            Zip::from(&mut b)
                .and(&one)
                .and(&two)
                .for_each(|d, &i, &j| *d = u[i] - u[j]);
        });
    let mut out = Array1::<F>::zeros(incidence.n_slots());
    Zip::from(&blocks)
        .and(incidence.slots())
        .for_each(|&d, &s| out[s] = d);
    out
}

/// Adjoint `Dᵗ(v)`: scatter-add each edge block onto its first endpoint and
/// subtract it from its second.
pub fn adjoint<F>(v: &Array1<F>, incidence: &FusionIncidence) -> Array1<F>
where
    F: Float + Send + Sync,
{
    let mut out = Array1::<F>::zeros(incidence.n_coords());
    Zip::from(incidence.slots())
        .and(incidence.first())
        .and(incidence.second())
        .for_each(|&s, &i, &j| {
            out[i] = out[i] + v[s];
            out[j] = out[j] - v[s];
        });
    out
}
