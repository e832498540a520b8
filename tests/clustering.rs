#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use convexpath::{
        Continuation, ConvexClustering, ElementwiseL1, FusionAxis, FusionGraph, GroupL2,
        PathConfig, Penalty, SparseCholesky, Termination,
    };

    fn axis(graph: &FusionGraph<f64>, block_len: usize) -> FusionAxis<f64, SparseCholesky<f64>> {
        let inc = graph.incidence(block_len).unwrap();
        FusionAxis::from_graph(graph, block_len, SparseCholesky::for_incidence(&inc, 1.).unwrap())
            .unwrap()
    }

    #[test]
    fn single_edge_l1_closed_form() {
        // u1 = lambda and u2 = 2 - lambda until the pair fuses at lambda = 1
        let x = arr2(&[[0.], [2.]]);
        let graph = FusionGraph::<f64>::complete(2);
        let config = PathConfig {
            continuation: Continuation::Grid(vec![0.99, 1.01]),
            ..PathConfig::default()
        }
        .exact(1e-12, 200_000);
        let result = ConvexClustering::new(config)
            .fit(&x, &axis(&graph, 1), ElementwiseL1)
            .unwrap();
        assert_eq!(result.termination, Termination::GridExhausted);

        let below = result.path.get(1).unwrap();
        assert!(!below.fused.as_slice()[0]);
        assert_abs_diff_eq!(below.u[[0, 0]], 0.99, epsilon = 1e-6);
        assert_abs_diff_eq!(below.u[[0, 0]] - below.u[[1, 0]], -0.02, epsilon = 1e-6);

        let above = result.path.get(2).unwrap();
        assert!(above.fused.is_complete());
        assert_abs_diff_eq!(above.u[[0, 0]], 1., epsilon = 1e-6);
        assert_abs_diff_eq!(above.u[[1, 0]], 1., epsilon = 1e-6);
    }

    #[test]
    fn two_pairs_fuse_within_first() {
        let x = arr2(&[[0., 0.], [0., 1.], [10., 0.], [10., 1.]]);
        let graph = FusionGraph::<f64>::complete(4);
        let config = PathConfig {
            lambda_init: 1e-2,
            burn_in: 0,
            max_iter: 500,
            continuation: Continuation::fixed(1.1),
            ..PathConfig::default()
        }
        .exact(1e-9, 20_000);
        let result = ConvexClustering::new(config)
            .fit(&x, &axis(&graph, 2), GroupL2)
            .unwrap();
        assert_eq!(result.termination, Termination::FullyFused);
        assert!(result.path.len() >= 3);

        // edges of the complete graph: (0,1) (0,2) (0,3) (1,2) (1,3) (2,3)
        let first = result
            .path
            .iter()
            .find(|c| c.fused.count() > 0)
            .unwrap();
        for (e, &f) in first.fused.as_slice().iter().enumerate() {
            if f {
                assert!(e == 0 || e == 5, "edge {} fused before the pairs", e);
            }
        }
        let clusters: Vec<usize> = result
            .path
            .iter()
            .map(|c| graph.cluster_labels(&c.fused).into_iter().max().unwrap() + 1)
            .collect();
        assert!(clusters.contains(&2));
        assert_eq!(*clusters.last().unwrap(), 1);
    }

    #[test]
    fn adaptive_fuses_one_edge_at_a_time() {
        // chain fusion strengths: (0,1) at 1, (2,3) at 4, then the two pairs at 4.5
        let x = arr2(&[[0.], [1.], [3.], [7.]]);
        let graph = FusionGraph::new(4, vec![(0, 1), (1, 2), (2, 3)], arr1(&[1., 1., 1.])).unwrap();
        let config = PathConfig {
            keep: 1,
            ..PathConfig::default()
        }
        .exact(1e-10, 100_000);
        let result = ConvexClustering::new(config)
            .fit(&x, &axis(&graph, 1), GroupL2)
            .unwrap();
        assert_eq!(result.termination, Termination::FullyFused);

        let lambdas = result.path.lambdas();
        assert!(lambdas.windows(2).all(|w| w[0] <= w[1]));
        let counts: Vec<usize> = result.path.iter().map(|c| c.fused.count()).collect();
        assert!(counts.windows(2).all(|w| w[1] == w[0] || w[1] == w[0] + 1));

        let fused_at: Vec<f64> = counts
            .windows(2)
            .zip(lambdas[1..].iter())
            .filter(|(w, _)| w[1] > w[0])
            .map(|(_, &l)| l)
            .collect();
        assert_eq!(fused_at.len(), 3);
        for (&got, &expected) in fused_at.iter().zip([1., 4., 4.5].iter()) {
            assert!(got >= expected - 1e-3 && got <= expected * 1.1 + 1e-3);
        }
    }

    #[test]
    fn adaptive_one_sweep_terminates() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = Array2::from_shape_fn((10, 2), |_| rng.random_range(-5.0..5.0));
        let graph = FusionGraph::<f64>::complete(10);
        let config = PathConfig {
            keep: 1,
            ..PathConfig::default()
        };
        let result = ConvexClustering::new(config)
            .fit(&x, &axis(&graph, 2), Penalty::L2)
            .unwrap();
        assert_eq!(result.termination, Termination::FullyFused);
        assert!(result.iterations < 10_000);
        assert!(result.sweeps >= result.iterations);

        let lambdas = result.path.lambdas();
        assert!(lambdas.windows(2).all(|w| w[0] <= w[1]));
        let counts: Vec<usize> = result.path.iter().map(|c| c.fused.count()).collect();
        assert!(counts.windows(2).all(|w| w[0] <= w[1]));
        let jumps = counts.windows(2).filter(|w| w[1] > w[0] + 1).count();
        assert!(jumps <= result.bail_outs);
        let last = result.path.last().unwrap();
        assert!(last.u.iter().all(|u| u.is_finite()));
    }

    #[test]
    fn zero_weight_edge_never_fuses() {
        let x = arr2(&[[0.], [1.]]);
        let graph = FusionGraph::new(2, vec![(0, 1)], arr1(&[0.])).unwrap();
        for penalty in [Penalty::L1, Penalty::L2] {
            let config = PathConfig {
                burn_in: 0,
                max_iter: 20,
                continuation: Continuation::fixed(2.0),
                ..PathConfig::default()
            };
            let result = ConvexClustering::new(config)
                .fit(&x, &axis(&graph, 1), penalty)
                .unwrap();
            assert_eq!(result.termination, Termination::MaxIter);
            let last = result.path.last().unwrap();
            assert_eq!(last.fused.count(), 0);
            assert!(last.v.iter().all(|v| v.is_finite()));
            assert_abs_diff_eq!(last.u[[0, 0]], 0., epsilon = 1e-9);
            assert_abs_diff_eq!(last.u[[1, 0]], 1., epsilon = 1e-9);
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let x = arr2(&[[0.], [1.]]);
        let graph = FusionGraph::<f64>::complete(2);
        let config = PathConfig {
            keep: 0,
            ..PathConfig::default()
        };
        assert!(ConvexClustering::new(config)
            .fit(&x, &axis(&graph, 1), GroupL2)
            .is_err());
    }

    #[test]
    fn mismatched_data_is_rejected() {
        let x = arr2(&[[0., 1.], [1., 2.]]);
        let graph = FusionGraph::<f64>::complete(2);
        assert!(ConvexClustering::<f64>::with_defaults()
            .fit(&x, &axis(&graph, 1), GroupL2)
            .is_err());
    }
}
