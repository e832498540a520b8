use ndarray::{Array1, Array2, Zip};
use num_traits::Float;

use crate::incidence::FusionIncidence;

/// Proximal map of the fusion penalty, applied to a stacked edge-difference
/// vector.
pub trait Shrinkage<F>
where
    F: Float + Send + Sync,
{
    /// Shrink `delta` toward zero for penalty strength `lambda`, ADMM penalty
    /// `rho` and one weight per edge.
    fn shrink(
        &self,
        delta: &Array1<F>,
        lambda: F,
        rho: F,
        weights: &Array1<F>,
        incidence: &FusionIncidence,
    ) -> Array1<F>;
}

/// Group soft-thresholding of each edge block:
/// `block * max(0, 1 - (w_e * lambda / rho) / |block|_2)`
///
///     use ndarray::arr1;
///     use convexpath::{FusionIncidence, GroupL2, Shrinkage};
///
///     let inc = FusionIncidence::from_edges(2, 2, &[(0, 1)]).unwrap();
///     let out = GroupL2.shrink(&arr1(&[3., 4.]), 2.5, 1., &arr1(&[1.]), &inc);
///     assert_eq!(out, arr1(&[1.5, 2.]));
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupL2;

impl<F> Shrinkage<F> for GroupL2
where
    F: Float + Send + Sync,
{
    fn shrink(
        &self,
        delta: &Array1<F>,
        lambda: F,
        rho: F,
        weights: &Array1<F>,
        incidence: &FusionIncidence,
    ) -> Array1<F> {
        let zero = F::zero();
        let mut blocks = Array2::<F>::zeros((incidence.n_edges(), incidence.block_len()));
        Zip::from(blocks.rows_mut())
            .and(incidence.slots().rows())
            .and(weights)
            .par_for_each(|mut b, slots, &w| {
                let norm = slots
                    .iter()
                    .fold(zero, |acc, &s| acc + delta[s] * delta[s])
                    .sqrt();
                let ratio = F::one() - (w * lambda / rho) / norm;
                // 0/0 leaves the block as is
                let scale = if ratio.is_nan() { F::one() } else { ratio.max(zero) };
                Zip::from(&mut b)
                    .and(&slots)
                    .for_each(|o, &s| *o = scale * delta[s]);
            });
        scatter(&blocks, incidence)
    }
}

/// Coordinate-wise soft-thresholding on the weighted scale:
/// `sgn(d * w) * max(0, |d * w| - lambda * w^2 / rho) / w`
///
///     use ndarray::arr1;
///     use convexpath::{ElementwiseL1, FusionIncidence, Shrinkage};
///
///     let inc = FusionIncidence::from_edges(2, 2, &[(0, 1)]).unwrap();
///     let out = ElementwiseL1.shrink(&arr1(&[3., -0.5]), 1., 1., &arr1(&[2.]), &inc);
///     assert_eq!(out, arr1(&[1., 0.]));
#[derive(Debug, Default, Clone, Copy)]
pub struct ElementwiseL1;

impl<F> Shrinkage<F> for ElementwiseL1
where
    F: Float + Send + Sync,
{
    fn shrink(
        &self,
        delta: &Array1<F>,
        lambda: F,
        rho: F,
        weights: &Array1<F>,
        incidence: &FusionIncidence,
    ) -> Array1<F> {
        let zero = F::zero();
        let mut blocks = Array2::<F>::zeros((incidence.n_edges(), incidence.block_len()));
        Zip::from(blocks.rows_mut())
            .and(incidence.slots().rows())
            .and(weights)
            .par_for_each(|mut b, slots, &w| {
                Zip::from(&mut b).and(&slots).for_each(|o, &s| {
                    if w == zero {
                        *o = delta[s];
                        return;
                    }
                    let ols = delta[s] * w;
                    let mag = (ols.abs() - lambda * w * w / rho).max(zero);
                    *o = if ols == zero { zero } else { ols.signum() * mag / w };
                });
            });
        scatter(&blocks, incidence)
    }
}

/// Runtime choice between the two shrinkage operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    L1,
    L2,
}

impl Default for Penalty {
    fn default() -> Self {
        Penalty::L2
    }
}

impl<F> Shrinkage<F> for Penalty
where
    F: Float + Send + Sync,
{
    fn shrink(
        &self,
        delta: &Array1<F>,
        lambda: F,
        rho: F,
        weights: &Array1<F>,
        incidence: &FusionIncidence,
    ) -> Array1<F> {
        match self {
            Penalty::L1 => ElementwiseL1.shrink(delta, lambda, rho, weights, incidence),
            Penalty::L2 => GroupL2.shrink(delta, lambda, rho, weights, incidence),
        }
    }
}

fn scatter<F>(blocks: &Array2<F>, incidence: &FusionIncidence) -> Array1<F>
where
    F: Float + Send + Sync,
{
    let mut out = Array1::<F>::zeros(incidence.n_slots());
    Zip::from(blocks)
        .and(incidence.slots())
        .for_each(|&b, &s| out[s] = b);
    out
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    use super::{ElementwiseL1, GroupL2, Penalty, Shrinkage};
    use crate::incidence::FusionIncidence;

    fn two_edges() -> FusionIncidence {
        FusionIncidence::from_edges(3, 2, &[(0, 1), (1, 2)]).unwrap()
    }

    #[test]
    fn group_zero_strength_is_identity() {
        let delta = arr1(&[1.5, -2., 0.25, 7.]);
        let out = GroupL2.shrink(&delta, 0., 1., &arr1(&[1., 1.]), &two_edges());
        assert_eq!(out, delta);
    }

    #[test]
    fn group_full_strength_gives_exact_zero() {
        // |(3, 4)| = 5 and |(0.6, 0.8)| = 1
        let delta = arr1(&[3., 4., 0.6, 0.8]);
        let out = GroupL2.shrink(&delta, 1., 1., &arr1(&[5., 2.]), &two_edges());
        assert_eq!(out, arr1(&[0., 0., 0., 0.]));
    }

    #[test]
    fn group_scales_per_edge() {
        let delta = arr1(&[3., 4., 3., 4.]);
        let out = GroupL2.shrink(&delta, 2., 2., &arr1(&[1., 4.]), &two_edges());
        // strengths 1 and 4 on a block of norm 5
        assert_abs_diff_eq!(out[0], 2.4, epsilon = 1e-12);
        assert_abs_diff_eq!(out[1], 3.2, epsilon = 1e-12);
        assert_abs_diff_eq!(out[2], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(out[3], 0.8, epsilon = 1e-12);
    }

    #[test]
    fn group_zero_block_without_strength_is_not_nan() {
        let delta = arr1(&[0., 0., 1., 1.]);
        let out = GroupL2.shrink(&delta, 0., 1., &arr1(&[0., 0.]), &two_edges());
        assert!(out.iter().all(|v: &f64| !v.is_nan()));
        assert_eq!(out, delta);
    }

    #[test]
    fn elementwise_threshold() {
        let delta = arr1(&[2., -2., 0.5, 0.]);
        let out = ElementwiseL1.shrink(&delta, 1., 1., &arr1(&[1., 1.]), &two_edges());
        assert_eq!(out, arr1(&[1., -1., 0., 0.]));
    }

    #[test]
    fn elementwise_weighted_and_rho() {
        // threshold on the weighted scale is lambda * w^2 / rho = 2
        let delta = arr1(&[3., -1.5, 1., 1.]);
        let out = ElementwiseL1.shrink(&delta, 1., 2., &arr1(&[2., 0.]), &two_edges());
        assert_abs_diff_eq!(out[0], 2., epsilon = 1e-12);
        assert_abs_diff_eq!(out[1], -0.5, epsilon = 1e-12);
        // zero weight leaves the edge unpenalised
        assert_eq!(out[2], 1.);
        assert_eq!(out[3], 1.);
    }

    #[test]
    fn penalty_dispatch() {
        let delta = arr1(&[3., 4., 1., 0.]);
        let w = arr1(&[1., 1.]);
        let inc = two_edges();
        assert_eq!(
            Penalty::L2.shrink(&delta, 1., 1., &w, &inc),
            GroupL2.shrink(&delta, 1., 1., &w, &inc)
        );
        assert_eq!(
            Penalty::L1.shrink(&delta, 1., 1., &w, &inc),
            ElementwiseL1.shrink(&delta, 1., 1., &w, &inc)
        );
    }
}
