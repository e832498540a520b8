#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Array2};

    use convexpath::{
        Continuation, ConvexBiClustering, FusionAxis, FusionGraph, GroupL2, PathConfig,
        SparseCholesky, Termination,
    };

    fn axis(graph: &FusionGraph<f64>, block_len: usize) -> FusionAxis<f64, SparseCholesky<f64>> {
        let inc = graph.incidence(block_len).unwrap();
        FusionAxis::from_graph(graph, block_len, SparseCholesky::for_incidence(&inc, 1.).unwrap())
            .unwrap()
    }

    fn checkerboard() -> Array2<f64> {
        arr2(&[
            [1.0, 1.1, 5.0],
            [0.9, 1.0, 5.2],
            [4.0, 4.1, 9.0],
            [4.2, 3.9, 9.1],
        ])
    }

    #[test]
    fn both_axes_collapse() {
        let x = checkerboard();
        let rows = FusionGraph::<f64>::complete(4);
        let cols = FusionGraph::<f64>::complete(3);
        let config = PathConfig {
            lambda_init: 1e-2,
            burn_in: 0,
            continuation: Continuation::fixed(1.05),
            ..PathConfig::default()
        };
        let result = ConvexBiClustering::new(config)
            .fit(&x, &axis(&rows, 3), &axis(&cols, 4), GroupL2)
            .unwrap();
        assert_eq!(result.termination, Termination::FullyFused);
        let last = result.path.last().unwrap();
        assert!(last.fused_row.is_complete());
        assert!(last.fused_col.is_complete());
        assert_eq!(result.consensus.len(), result.iterations);

        // U + P + Q stays equal to the data
        let total = &last.u + &result.p + &result.q;
        for (a, b) in total.iter().zip(x.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn adaptive_path_fuses_just_enough() {
        let x = checkerboard();
        let rows = FusionGraph::<f64>::complete(4);
        let cols = FusionGraph::<f64>::complete(3);
        let config = PathConfig {
            max_iter: 100_000,
            keep: 1,
            ..PathConfig::default()
        };
        let result = ConvexBiClustering::new(config)
            .fit(&x, &axis(&rows, 3), &axis(&cols, 4), GroupL2)
            .unwrap();
        assert_eq!(result.termination, Termination::FullyFused);
        assert!(result.iterations < 100_000);
        assert_eq!(result.path.len(), result.iterations + 1);

        let lambdas = result.path.lambdas();
        assert!(lambdas.windows(2).all(|w| w[0] <= w[1]));
        let counts: Vec<(usize, usize)> = result
            .path
            .iter()
            .map(|c| (c.fused_row.count(), c.fused_col.count()))
            .collect();
        let mut jumps = 0;
        for w in counts.windows(2) {
            let (row, col) = (w[1].0 - w[0].0, w[1].1 - w[0].1);
            if row > 1 || col > 1 {
                jumps += 1;
            }
        }
        // only a spent trial budget lets an axis gain more than one fusion
        assert!(jumps <= result.bail_outs);
        let last = result.path.last().unwrap();
        assert!(last.fused_row.is_complete());
        assert!(last.fused_col.is_complete());
    }

    #[test]
    fn exact_grid_reaches_consensus() {
        let x = checkerboard();
        let rows = FusionGraph::<f64>::complete(4);
        let cols = FusionGraph::<f64>::complete(3);
        let config = PathConfig {
            continuation: Continuation::Grid(vec![0.05, 0.1, 0.5, 1., 3.]),
            ..PathConfig::default()
        }
        .exact(1e-9, 100_000);
        let result = ConvexBiClustering::new(config)
            .fit(&x, &axis(&rows, 3), &axis(&cols, 4), GroupL2)
            .unwrap();
        assert_eq!(result.termination, Termination::GridExhausted);
        assert_eq!(result.consensus.len(), 5);
        for &(to_p, to_q) in result.consensus.iter() {
            assert!(to_p <= 1e-8, "row consensus increment {}", to_p);
            assert!(to_q <= 1e-8, "column consensus increment {}", to_q);
        }
        let last = result.path.last().unwrap();
        let total = &last.u + &result.p + &result.q;
        for (a, b) in total.iter().zip(x.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn masked_entry_is_filled_in() {
        let mut x = checkerboard();
        x[[1, 2]] = f64::NAN;
        let mut mask = Array2::ones((4, 3));
        mask[[1, 2]] = 0.;
        let rows = FusionGraph::<f64>::complete(4);
        let cols = FusionGraph::<f64>::complete(3);
        let config = PathConfig {
            lambda_init: 1e-2,
            burn_in: 0,
            continuation: Continuation::fixed(1.05),
            ..PathConfig::default()
        };
        let result = ConvexBiClustering::new(config)
            .fit_masked(&x, &mask, &axis(&rows, 3), &axis(&cols, 4), GroupL2)
            .unwrap();
        assert_eq!(result.termination, Termination::FullyFused);
        for c in result.path.iter() {
            assert!(c.u.iter().all(|u| u.is_finite()));
        }
        // imputed from the rest of its column
        let start = result.path.get(0).unwrap();
        assert_abs_diff_eq!(start.u[[1, 2]], (5.0 + 9.0 + 9.1) / 3., epsilon = 1e-12);
    }

    #[test]
    fn axes_must_match_data() {
        let x = checkerboard();
        let rows = FusionGraph::<f64>::complete(4);
        let cols = FusionGraph::<f64>::complete(3);
        // row and column axes swapped
        let result = ConvexBiClustering::<f64>::with_defaults().fit(
            &x,
            &axis(&cols, 4),
            &axis(&rows, 3),
            GroupL2,
        );
        assert!(result.is_err());
    }
}
