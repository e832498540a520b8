use anyhow::{bail, ensure, Result};
use ndarray::{Array1, Array2, ArrayView1};
use num_traits::Float;

use crate::fusion::FusionIndicator;

/// Index layout of a fusion graph over stacked coordinate blocks.
///
/// Row `e` of each matrix describes edge `e`: `ind` holds the slots of the
/// edge inside the stacked difference vector, `e_one` and `e_two` the
/// coordinates of its two endpoint blocks inside the stacked observation
/// vector. All three are `cardE x p`.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionIncidence {
    ind: Array2<usize>,
    e_one: Array2<usize>,
    e_two: Array2<usize>,
    n_coords: usize,
}

impl FusionIncidence {
    /// Wrap precomputed index matrices, checking that the edge slots partition
    /// `0..cardE*p` and that every endpoint index is below `n_coords`.
    pub fn new(
        ind: Array2<usize>,
        e_one: Array2<usize>,
        e_two: Array2<usize>,
        n_coords: usize,
    ) -> Result<Self> {
        ensure!(
            ind.dim() == e_one.dim() && ind.dim() == e_two.dim(),
            "incidence matrices must share one shape, got {:?}, {:?} and {:?}",
            ind.dim(),
            e_one.dim(),
            e_two.dim()
        );
        if let Some(&bad) = e_one.iter().chain(e_two.iter()).find(|&&i| i >= n_coords) {
            bail!("endpoint index {} out of range for {} coordinates", bad, n_coords);
        }
        let mut seen = vec![false; ind.len()];
        for &slot in ind.iter() {
            if slot >= seen.len() || seen[slot] {
                bail!("edge slot {} is out of range or used twice", slot);
            }
            seen[slot] = true;
        }
        Ok(Self {
            ind,
            e_one,
            e_two,
            n_coords,
        })
    }

    /// Standard layout: observation `i` owns coordinates `i*p..(i+1)*p` and
    /// edge `e` owns slots `e*p..(e+1)*p`.
    ///
    ///     use convexpath::FusionIncidence;
    ///
    ///     let inc = FusionIncidence::from_edges(3, 2, &[(0, 1), (1, 2)]).unwrap();
    ///     assert_eq!(inc.n_edges(), 2);
    ///     assert_eq!(inc.n_slots(), 4);
    ///     assert_eq!(inc.n_coords(), 6);
    pub fn from_edges(n_obs: usize, block_len: usize, edges: &[(usize, usize)]) -> Result<Self> {
        let shape = (edges.len(), block_len);
        let ind = Array2::from_shape_fn(shape, |(e, k)| e * block_len + k);
        let e_one = Array2::from_shape_fn(shape, |(e, k)| edges[e].0 * block_len + k);
        let e_two = Array2::from_shape_fn(shape, |(e, k)| edges[e].1 * block_len + k);
        Self::new(ind, e_one, e_two, n_obs * block_len)
    }

    pub fn n_edges(&self) -> usize {
        self.ind.nrows()
    }

    /// Number of coordinates every edge contributes (`p`)
    pub fn block_len(&self) -> usize {
        self.ind.ncols()
    }

    /// Length of the stacked observation vector
    pub fn n_coords(&self) -> usize {
        self.n_coords
    }

    /// Length of the stacked edge-difference vector
    pub fn n_slots(&self) -> usize {
        self.ind.len()
    }

    pub fn edge_slots(&self, e: usize) -> ArrayView1<usize> {
        self.ind.row(e)
    }

    pub(crate) fn slots(&self) -> &Array2<usize> {
        &self.ind
    }

    pub(crate) fn first(&self) -> &Array2<usize> {
        &self.e_one
    }

    pub(crate) fn second(&self) -> &Array2<usize> {
        &self.e_two
    }
}

/// Weighted undirected edge list over `n_obs` observations.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionGraph<F> {
    n_obs: usize,
    edges: Vec<(usize, usize)>,
    weights: Array1<F>,
}

impl<F> FusionGraph<F>
where
    F: Float + Send + Sync,
{
    pub fn new(n_obs: usize, edges: Vec<(usize, usize)>, weights: Array1<F>) -> Result<Self> {
        ensure!(
            edges.len() == weights.len(),
            "{} edges but {} weights",
            edges.len(),
            weights.len()
        );
        for &(i, j) in edges.iter() {
            ensure!(i < n_obs && j < n_obs, "edge ({}, {}) out of range", i, j);
            ensure!(i != j, "self-loop on observation {}", i);
        }
        ensure!(
            weights.iter().all(|w| w.is_finite() && *w >= F::zero()),
            "weights must be finite and nonnegative"
        );
        Ok(Self {
            n_obs,
            edges,
            weights,
        })
    }

    /// Every pair `(i, j)` with `i < j`, unit weights
    pub fn complete(n_obs: usize) -> Self {
        let edges: Vec<(usize, usize)> = (0..n_obs)
            .flat_map(|i| ((i + 1)..n_obs).map(move |j| (i, j)))
            .collect();
        let weights = Array1::from_elem(edges.len(), F::one());
        Self {
            n_obs,
            edges,
            weights,
        }
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn weights(&self) -> &Array1<F> {
        &self.weights
    }

    pub fn incidence(&self, block_len: usize) -> Result<FusionIncidence> {
        FusionIncidence::from_edges(self.n_obs, block_len, &self.edges)
    }

    /// Cluster label of each observation, taking fused edges as merges.
    /// Labels are numbered in order of first appearance.
    pub fn cluster_labels(&self, fused: &FusionIndicator) -> Vec<usize> {
        let mut parent: Vec<usize> = (0..self.n_obs).collect();
        fn root(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }
        self.edges
            .iter()
            .zip(fused.as_slice())
            .filter(|(_, f)| **f)
            .for_each(|(&(i, j), _)| {
                let (ri, rj) = (root(&mut parent, i), root(&mut parent, j));
                if ri != rj {
                    parent[ri.max(rj)] = ri.min(rj);
                }
            });
        let mut labels = vec![0; self.n_obs];
        let mut next = 0;
        let mut by_root = vec![usize::MAX; self.n_obs];
        for i in 0..self.n_obs {
            let r = root(&mut parent, i);
            if by_root[r] == usize::MAX {
                by_root[r] = next;
                next += 1;
            }
            labels[i] = by_root[r];
        }
        labels
    }
}
